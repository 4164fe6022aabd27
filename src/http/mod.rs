//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, rate limit, panic boundary)
//!     → proxy.rs (resolve route, select backend, forward within deadline)
//!     → request.rs (rewrite target, strip hop-by-hop, X-Forwarded-For)
//!     → response.rs (relay body, report completion)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{Dispatcher, ProxyError};
pub use request::REQUEST_ID_HEADER;
pub use response::{BodyEnd, BodySummary, ObservedBody};
pub use server::HttpServer;
