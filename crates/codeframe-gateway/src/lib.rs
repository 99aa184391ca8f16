//! HTTP gateway for CodeFRAME: the JSON API the dashboard talks to, plus
//! the WebSocket feed that relays the event bus. Transport concerns beyond
//! the routes themselves (reverse proxies, TLS, upgrade headers) live
//! outside the core.

mod error;
mod routes;
mod server;
mod state;
mod ws;

pub use error::ApiError;
pub use server::build_router;
pub use state::AppState;
