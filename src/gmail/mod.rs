// src/gmail/mod.rs
//! Gmail collaborators: credentials, message fetch and inbox watch.

pub mod client;
pub mod credentials;
pub mod fetcher;
pub mod message;
pub mod watch;

pub use client::GmailClient;
pub use credentials::{CachedCredentials, Credential, CredentialProvider, DynCredentials};
pub use fetcher::MessageFetcher;
pub use message::RawMessage;
pub use watch::{spawn_watch_scheduler, WatchManager, WatchRenewal, WatchSchedule};
