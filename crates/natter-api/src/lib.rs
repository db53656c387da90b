pub mod auth;
pub mod connect;
pub mod middleware;
pub mod routes;
pub mod threads;

pub use auth::{AppState, AppStateInner};
pub use routes::router;
