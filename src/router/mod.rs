//! Request routing — map URL patterns and HTTP methods to handler chains.
//!
//! This module provides [`Router`], which registers handler chains against a method and a
//! path pattern, global middleware, and mounted sub-routers. Three segment kinds are
//! supported:
//!
//! | Pattern              | Example match              | Captured params                  |
//! |----------------------|----------------------------|----------------------------------|
//! | `/users`             | `/users`                   | *(none)*                         |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                      |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "docs/readme.txt"`   |
//!
//! Trailing and repeated slashes are ignored on both patterns and incoming paths, so
//! `/users/` and `/users` are treated as equivalent.
//!
//! Routes are matched in registration order; the first route whose method and pattern both
//! match the incoming request wins. When nothing matches, the dispatcher answers
//! `404 Cannot <METHOD> <path>`.

use std::future::Future;

pub mod pattern;
pub mod table;

pub use pattern::{PatternError, RoutePattern, Segment, WILDCARD_PARAM};
pub use table::{DispatchError, Mount, RouteEntry, RouteMatch, RouteTable, fallback_body};

use crate::context::{Request, Response};
use crate::http::Method;
use crate::middleware::{Handler, HandlerResult, Middleware, from_middleware, handler};
use table::Layer;

/// A standalone routing table with a registration API.
///
/// A `Router` can be used as the application root (see [`crate::App`]) or built on its own
/// and attached to a parent with [`Router::mount`]. Registration methods return
/// `Result<&mut Self, PatternError>` so a malformed pattern never registers silently and
/// calls chain with `?`.
///
/// # Examples
///
/// ```rust
/// use rexpress::Router;
///
/// # fn build() -> Result<Router, rexpress::PatternError> {
/// let mut router = Router::new();
///
/// router.get("/ping", |_req, res| async move {
///     res.send("pong")?;
///     Ok(())
/// })?;
///
/// router.get("/users/:id", |req, res| async move {
///     let id = req.param("id").unwrap_or("unknown").to_owned();
///     res.json(&serde_json::json!({ "id": id }))?;
///     Ok(())
/// })?;
/// # Ok(router)
/// # }
/// ```
#[derive(Default)]
pub struct Router {
    table: RouteTable,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rexpress::Router;
    ///
    /// let router = Router::new();
    /// assert!(router.is_empty());
    /// ```
    pub fn new() -> Self {
        Self {
            table: RouteTable::new(),
        }
    }

    /// Register a handler chain for `method` requests matching `path`.
    ///
    /// Every verb helper is a thin wrapper over this. The chain runs in order and stops
    /// at the first function that finalizes the response.
    ///
    /// # Arguments
    ///
    /// - `method` — the request method to answer.
    /// - `path` — URL pattern string (e.g. `"/users"`, `"/users/:id"`, or `"/files/*"`).
    /// - `chain` — middleware followed by the terminal handler.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when `path` does not compile; nothing is registered.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rexpress::{Router, http::Method, middleware::handler};
    ///
    /// let mut router = Router::new();
    /// let auth = handler(|req, res| async move {
    ///     if req.get("authorization").is_none() {
    ///         res.status(401)?.end()?;
    ///     }
    ///     Ok(())
    /// });
    /// let show = handler(|_req, res| async move {
    ///     res.send("secret")?;
    ///     Ok(())
    /// });
    /// router.route(Method::Get, "/secret", vec![auth, show]).unwrap();
    /// assert_eq!(router.len(), 1);
    /// ```
    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        chain: Vec<Handler>,
    ) -> Result<&mut Self, PatternError> {
        self.add_route(Some(method), path, chain)
    }

    /// Register a handler chain for every method on `path`.
    pub fn all_chain(&mut self, path: &str, chain: Vec<Handler>) -> Result<&mut Self, PatternError> {
        self.add_route(None, path, chain)
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Get, path, vec![handler(h)])
    }

    /// Register a handler for `POST` requests matching `path`.
    pub fn post<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Post, path, vec![handler(h)])
    }

    /// Register a handler for `PUT` requests matching `path`.
    pub fn put<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Put, path, vec![handler(h)])
    }

    /// Register a handler for `DELETE` requests matching `path`.
    pub fn delete<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Delete, path, vec![handler(h)])
    }

    /// Register a handler for `PATCH` requests matching `path`.
    pub fn patch<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Patch, path, vec![handler(h)])
    }

    /// Register a handler for `HEAD` requests matching `path`.
    pub fn head<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Head, path, vec![handler(h)])
    }

    /// Register a handler for `OPTIONS` requests matching `path`.
    pub fn options<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Options, path, vec![handler(h)])
    }

    /// Register a handler for every method on `path`.
    pub fn all<H, F>(&mut self, path: &str, h: H) -> Result<&mut Self, PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.all_chain(path, vec![handler(h)])
    }

    /// Add global middleware written as an async closure.
    ///
    /// It runs for every request that reaches this router, before any route or mount
    /// registered after it. Middleware added after a mount does not apply to requests
    /// that the mounted router handles.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rexpress::Router;
    ///
    /// let mut router = Router::new();
    /// router.use_fn(|_req, res| async move {
    ///     res.set("X-Powered-By", "rexpress")?;
    ///     Ok(())
    /// });
    /// ```
    pub fn use_fn<H, F>(&mut self, h: H) -> &mut Self
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.table.push(Layer::Middleware(handler(h)));
        self
    }

    /// Add global middleware implemented as a type, such as
    /// [`RequestLogger`](crate::middleware::RequestLogger).
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.table.push(Layer::Middleware(from_middleware(middleware)));
        self
    }

    /// Attach `router` under `prefix`.
    ///
    /// Requests whose path starts with `prefix` at a segment boundary are walked through
    /// the child with the prefix stripped. The child is moved behind an `Arc` and never
    /// copied. Prefixes may bind parameters (`/orgs/:org`) but not wildcards.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when `prefix` does not compile.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rexpress::Router;
    ///
    /// let mut routes = Router::new();
    /// routes.post("/two", |_req, res| async move { res.send("two")?; Ok(()) }).unwrap();
    ///
    /// let mut app = Router::new();
    /// app.mount("/routes", routes).unwrap();
    /// assert!(app.find(&"POST".parse().unwrap(), "/routes/two").is_some());
    /// ```
    pub fn mount(&mut self, prefix: &str, router: Router) -> Result<&mut Self, PatternError> {
        let prefix = RoutePattern::parse_prefix(prefix)?;
        self.table.push_mount(prefix, router.table);
        Ok(self)
    }

    fn add_route(
        &mut self,
        method: Option<Method>,
        path: &str,
        chain: Vec<Handler>,
    ) -> Result<&mut Self, PatternError> {
        let pattern = RoutePattern::parse(path)?;
        self.table.push(Layer::Route(RouteEntry::new(method, pattern, chain)));
        Ok(self)
    }

    /// Look up the route that would answer `method` and `path`.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.table.find(method, path)
    }

    /// Return the number of layers (routes, middleware and mounts) registered in this router.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Return `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Consume the router, yielding its table for dispatch.
    pub fn into_table(self) -> RouteTable {
        self.table
    }
}
