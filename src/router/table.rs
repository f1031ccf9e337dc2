//! Route table storage, lookup and the dispatch walk.
//!
//! A [`RouteTable`] is one ordered stack of layers: global middleware, routes
//! and mounted child tables, in registration order. The per-method route list
//! is a filtered view over that stack, so relative order between middleware,
//! routes and mounts is exactly the order they were registered in.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use super::pattern::{RoutePattern, split_path};
use crate::context::{Params, Request, Response};
use crate::http::{Method, StatusCode};
use crate::middleware::{Handler, HandlerError};

/// Failures that end a dispatch walk early.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("parameter {name:?} is bound by both a mount prefix and the route below it")]
    ParamCollision { name: String },

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),
}

/// One registered route: method, compiled pattern and handler chain.
pub struct RouteEntry {
    // `None` matches every method.
    method: Option<Method>,
    pattern: RoutePattern,
    chain: Vec<Handler>,
}

impl RouteEntry {
    pub(crate) fn new(method: Option<Method>, pattern: RoutePattern, chain: Vec<Handler>) -> Self {
        Self {
            method,
            pattern,
            chain,
        }
    }

    /// The method this route answers, `None` for every method.
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    /// Number of functions in the chain.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    fn accepts(&self, method: &Method) -> bool {
        self.method.as_ref().is_none_or(|m| m == method)
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// A child table attached under a path prefix.
pub struct Mount {
    prefix: RoutePattern,
    table: Arc<RouteTable>,
}

impl Mount {
    pub fn prefix(&self) -> &RoutePattern {
        &self.prefix
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }
}

pub(crate) enum Layer {
    Middleware(Handler),
    Route(RouteEntry),
    Mount(Mount),
}

/// Ordered layers of one router.
#[derive(Default)]
pub struct RouteTable {
    layers: Vec<Layer>,
}

/// Successful lookup result: the entry and the params it bound.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: Params,
}

// How far a walk got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    // No route matched; the caller keeps walking.
    Unmatched,
    // A route matched and its chain ran.
    Matched,
    // A middleware finalized the response.
    Finalized,
}

// Bindings accumulated by the mount prefixes above the table being walked.
#[derive(Clone, Default)]
struct Scope {
    params: Params,
    base_url: String,
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<Outcome, DispatchError>> + Send + 'a>>;

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub(crate) fn push_mount(&mut self, prefix: RoutePattern, table: RouteTable) {
        self.layers.push(Layer::Mount(Mount {
            prefix,
            table: Arc::new(table),
        }));
    }

    /// Routes registered directly in this table for `method`, in priority order.
    pub fn routes_for<'a>(&'a self, method: &'a Method) -> impl Iterator<Item = &'a RouteEntry> + 'a {
        self.layers.iter().filter_map(move |layer| match layer {
            Layer::Route(entry) if entry.accepts(method) => Some(entry),
            _ => None,
        })
    }

    /// Mounted child tables, in registration order.
    pub fn mounts(&self) -> impl Iterator<Item = &Mount> {
        self.layers.iter().filter_map(|layer| match layer {
            Layer::Mount(mount) => Some(mount),
            _ => None,
        })
    }

    /// Number of layers of any kind.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Find the route that would handle `method` and `path`, ignoring middleware.
    ///
    /// Routes and mounts are tried in registration order; the first structural
    /// match wins. Returns `None` when no route matches, or when a child route
    /// rebinds a name already bound by a mount prefix.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let parts: Vec<&str> = split_path(path).collect();
        self.find_in(method, &parts, &Params::new())
    }

    fn find_in<'a>(&'a self, method: &Method, parts: &[&str], outer: &Params) -> Option<RouteMatch<'a>> {
        for layer in &self.layers {
            match layer {
                Layer::Middleware(_) => {}
                Layer::Route(entry) => {
                    if !entry.accepts(method) {
                        continue;
                    }
                    if let Some(bound) = entry.pattern.match_segments(parts) {
                        let params = merge_params(outer, bound).ok()?;
                        return Some(RouteMatch { entry, params });
                    }
                }
                Layer::Mount(mount) => {
                    let Some(found) = mount.prefix.match_prefix(parts) else {
                        continue;
                    };
                    let scope = merge_params(outer, found.params).ok()?;
                    if let Some(hit) = mount.table.find_in(method, &parts[found.consumed..], &scope) {
                        return Some(hit);
                    }
                }
            }
        }
        None
    }

    /// Run one request through this table.
    ///
    /// Middleware and routes execute in registration order and the walk stops
    /// as soon as the response is finalized. When nothing matches, the
    /// fallback `404` (`Cannot <METHOD> <path>`) is sent. A failing handler
    /// stops the walk; it is logged and answered with `500` if the response is
    /// still open.
    pub async fn dispatch(&self, request: Request, response: Response) {
        let method = request.http_method().clone();
        let path = request.path().to_owned();
        let parts: Vec<&str> = split_path(&path).collect();

        match self.walk(&request, &response, &method, &parts, Scope::default()).await {
            Ok(Outcome::Unmatched) => {
                debug!(method = %method, path = %path, "no route matched");
                send_fallback(&response, &method, &path);
            }
            Ok(Outcome::Matched | Outcome::Finalized) => {}
            Err(e) => {
                error!(method = %method, path = %path, error = %e, "dispatch failed");
                if !response.is_finalized() {
                    let sent = response
                        .status(StatusCode::INTERNAL_SERVER_ERROR.as_u16())
                        .and_then(|res| res.content_type("text/plain; charset=utf-8"))
                        .and_then(|res| res.end_with("Internal Server Error"));
                    if let Err(e) = sent {
                        debug!(error = %e, "could not send error response");
                    }
                }
            }
        }
    }

    fn walk<'a>(
        &'a self,
        request: &'a Request,
        response: &'a Response,
        method: &'a Method,
        parts: &'a [&'a str],
        scope: Scope,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            for layer in &self.layers {
                if response.is_finalized() {
                    return Ok(Outcome::Finalized);
                }
                match layer {
                    Layer::Middleware(handler) => {
                        let req = request.scoped(scope.params.clone(), &scope.base_url);
                        handler
                            .handle(req, response.clone())
                            .await
                            .map_err(DispatchError::Handler)?;
                    }
                    Layer::Route(entry) => {
                        if !entry.accepts(method) {
                            continue;
                        }
                        let Some(bound) = entry.pattern.match_segments(parts) else {
                            continue;
                        };
                        let params = merge_params(&scope.params, bound)?;
                        debug!(pattern = entry.pattern.as_str(), "route matched");
                        let req = request.scoped(params, &scope.base_url);
                        for handler in &entry.chain {
                            if response.is_finalized() {
                                break;
                            }
                            handler
                                .handle(req.clone(), response.clone())
                                .await
                                .map_err(DispatchError::Handler)?;
                        }
                        return Ok(Outcome::Matched);
                    }
                    Layer::Mount(mount) => {
                        let Some(found) = mount.prefix.match_prefix(parts) else {
                            continue;
                        };
                        let mut base_url = scope.base_url.clone();
                        for part in &parts[..found.consumed] {
                            base_url.push('/');
                            base_url.push_str(part);
                        }
                        let inner = Scope {
                            params: merge_params(&scope.params, found.params)?,
                            base_url,
                        };
                        let rest = &parts[found.consumed..];
                        match mount.table.walk(request, response, method, rest, inner).await? {
                            Outcome::Unmatched => continue,
                            outcome => return Ok(outcome),
                        }
                    }
                }
            }

            if response.is_finalized() {
                Ok(Outcome::Finalized)
            } else {
                Ok(Outcome::Unmatched)
            }
        })
    }
}

// Outer and inner bindings are disjoint namespaces; a shared name is a caller error.
fn merge_params(outer: &Params, inner: Params) -> Result<Params, DispatchError> {
    let mut merged = outer.clone();
    for (name, value) in inner.iter() {
        if merged.insert(name, value).is_some() {
            return Err(DispatchError::ParamCollision {
                name: name.to_owned(),
            });
        }
    }
    Ok(merged)
}

/// Body of the fallback response for an unmatched request.
pub fn fallback_body(method: &Method, path: &str) -> String {
    format!("Cannot {} {}", method.as_str().to_ascii_uppercase(), path)
}

fn send_fallback(response: &Response, method: &Method, path: &str) {
    let sent = response
        .status(StatusCode::NOT_FOUND.as_u16())
        .and_then(|res| res.content_type("text/plain; charset=utf-8"))
        .and_then(|res| res.end_with(fallback_body(method, path)));
    if let Err(e) = sent {
        debug!(error = %e, "could not send fallback response");
    }
}
