//! Slack adapter: Web API client, bot token resolution, request signing and
//! inbound payload types.

pub mod client;
pub mod credentials;
pub mod dto;
pub mod signature;

pub use client::SlackClient;
pub use credentials::{CredentialCache, CredentialProvider};
pub use signature::SignatureError;
