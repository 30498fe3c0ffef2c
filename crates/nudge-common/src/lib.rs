//! Shared domain types and port contracts for the nudge mention lifecycle.
//!
//! The lifecycle orchestrator in the `nudge` crate only talks to the outside
//! world through the traits in [`ports`]; the SQLite store, the Slack client and
//! the schedulers are adapters behind them.

pub mod error;
pub mod model;
pub mod ports;

pub use error::{StoreError, ValidationError};
pub use model::{
    CallbackKind, MentionEvent, MentionKey, MentionRecord, MentionState, TaskPayload, Tenant,
};
pub use ports::{MentionStore, NotificationPort, ReplyOracle, SchedulerPort, TenantStore};
