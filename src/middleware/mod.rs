//! Handler and middleware functions.
//!
//! Every function in a dispatch chain, whether global middleware, route
//! middleware or the terminal handler, has the same shape: it receives a
//! [`Request`] and a [`Response`] handle and returns a future resolving to a
//! [`HandlerResult`]. Functions run strictly one after another; a function
//! short-circuits the rest of the chain by finalizing the response.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware, including plain async closures.
//! - [`Handler`] — type-erased, cheaply-cloneable middleware stored in route tables.
//! - [`handler`] / [`from_middleware`] — build a [`Handler`] from a closure or a type.
//! - [`RequestLogger`] — built-in request logger.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::context::{Request, Response};

/// Error returned by a handler. Any error type converts into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What every handler and middleware resolves to.
pub type HandlerResult = Result<(), HandlerError>;

/// Boxed future returned by [`Middleware::handle`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// The core trait for all rexpress middleware and handlers.
///
/// Implementors receive a [`Request`] and a [`Response`]. They may:
///
/// - **Pass through** — return `Ok(())` without finalizing; the next function runs.
/// - **Short-circuit** — finalize the response; nothing after them runs.
/// - **Decorate** — set headers or status for a later function to send.
///
/// Async closures `Fn(Request, Response) -> impl Future<Output = HandlerResult>`
/// implement this trait through the blanket impl below.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because handlers are shared across
///   Tokio tasks.
/// - Returning `Err` stops the chain; the dispatcher logs the error and answers
///   `500` if the response is still open.
pub trait Middleware: Send + Sync + 'static {
    /// Handle one step of the request.
    fn handle(&self, req: Request, res: Response) -> HandlerFuture;
}

impl<T, F> Middleware for T
where
    T: Fn(Request, Response) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, req: Request, res: Response) -> HandlerFuture {
        Box::pin((self)(req, res))
    }
}

/// A type-erased, reference-counted middleware.
///
/// Route tables store every function as a `Handler`; the [`Arc`] keeps them cheap
/// to share between the tables and the tasks that run them.
pub type Handler = Arc<dyn Middleware>;

/// Converts an async closure into a [`Handler`].
///
/// The explicit `Fn` bound lets closure argument types be inferred at the
/// call site.
///
/// # Examples
///
/// ```rust
/// use rexpress::middleware::{Handler, handler};
///
/// let hello: Handler = handler(|_req, res| async move {
///     res.send("hello")?;
///     Ok(())
/// });
/// ```
pub fn handler<H, F>(f: H) -> Handler
where
    H: Fn(Request, Response) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(f)
}

/// Converts a [`Middleware`] implementation into a [`Handler`].
///
/// # Examples
///
/// ```rust
/// use rexpress::middleware::{RequestLogger, from_middleware};
///
/// let logger = from_middleware(RequestLogger);
/// ```
pub fn from_middleware<M>(middleware: M) -> Handler
where
    M: Middleware,
{
    Arc::new(middleware)
}

/// Built-in middleware that logs each request as it enters the chain.
///
/// Emits a single `tracing::info!` record with the method, URL and client
/// address, then lets the chain continue. Completion (status and duration) is
/// logged by the dispatcher once the response is finalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn handle(&self, req: Request, _res: Response) -> HandlerFuture {
        tracing::info!(
            method = %req.http_method(),
            url = %req.url(),
            ip = %req.ip(),
            "request received"
        );
        Box::pin(async { Ok(()) })
    }
}
