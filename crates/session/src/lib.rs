//! labsync sessions: keep one resource list in sync with a control-plane channel
//! and decide when the user should hear about it.

#![forbid(unsafe_code)]

mod config;
mod error;
mod policy;
mod session;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use policy::{NotificationPolicy, PolicyConfig, Scope};
pub use session::{EventOutcome, ListHandle, Session, SessionState, SessionUpdate};
