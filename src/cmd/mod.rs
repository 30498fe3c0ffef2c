//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                          |
//! |-----------|-------------------------------------------|
//! | `serve`   | `Serve`                                   |
//! | `config`  | `Config`                                  |
//! | `tenant`  | `Tenant`                                  |
//! | `store`   | `InitDb`, `Mentions`, `Tasks`, `Prune`    |

pub mod config;
pub mod serve;
pub mod store;
pub mod tenant;

pub use config::cmd_config;
pub use serve::cmd_serve;
pub use store::{cmd_init_db, cmd_mentions, cmd_prune, cmd_tasks};
pub use tenant::cmd_tenant;
