//! Live-connection core: who is online, how each socket is served, and how
//! an inbound request turns into stored state and a live delivery.

pub mod dispatcher;
pub mod gateway;
pub mod registry;
pub mod session;
pub mod store;

use thiserror::Error;

pub use dispatcher::{Dispatcher, DropReason, Outcome};
pub use gateway::Gateway;
pub use registry::{ConnHandle, Outbound, Registration, Registry};
pub use session::{SessionHandle, SessionState};
pub use store::Store;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session cancelled")]
    Cancelled,

    #[error("session outbound channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
