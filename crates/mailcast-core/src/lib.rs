//! `mailcast-core` — configuration and bootstrap errors shared by every
//! mailcast crate.

pub mod config;
pub mod error;

pub use config::MailcastConfig;
pub use error::{MailcastError, Result};
