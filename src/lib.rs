//! # rexpress
//!
//! An Express-style routing and middleware layer on an async HTTP/1.1 engine.
//!
//! Routes and middleware are registered on an [`App`] (or a standalone
//! [`Router`] mounted under a prefix). Each request walks the registered
//! functions in order until one finalizes the [`Response`]; requests nothing
//! answers get `404 Cannot <METHOD> <path>`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rexpress::{App, Router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = App::new();
//!     app.get("/hello/:name", |req, res| async move {
//!         res.send(format!("Hello, {}!", req.param("name").unwrap_or("world")))?;
//!         Ok(())
//!     })?;
//!
//!     let mut api = Router::new();
//!     api.get("/status", |_req, res| async move {
//!         res.json(&serde_json::json!({ "ok": true }))?;
//!         Ok(())
//!     })?;
//!     app.mount("/api", api)?;
//!
//!     let server = app
//!         .listen("127.0.0.1:8080", |addr| println!("Listening on http://{addr}"))
//!         .await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::{App, Dispatcher, Listening};
pub use context::{Params, Request, Response, ResponseError};
pub use http::{Headers, IncomingRequest, Method, OutgoingResponse, StatusCode};
pub use middleware::{Handler, HandlerError, HandlerResult, Middleware, RequestLogger, handler};
pub use router::{PatternError, Router};
pub use server::{Server, ServerConfig, ServerError};
