//! Per-request façades handed to middleware and handlers.
//!
//! [`Request`] is a read-only view over the incoming request event with the
//! derived properties computed once; [`Response`] is the single-finalization
//! response handle. Both are cheap to clone: every function in a dispatch
//! chain receives its own handle onto the same per-request state.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;

use crate::http::{Headers, IncomingRequest, Method};

pub mod response;

pub use response::{Response, ResponseError};

/// Path parameters bound by the matched route (and any mount prefixes above it).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: HashMap<String, String>,
}

/// Shorter alias used throughout the router.
pub type Params = Parameters;

impl Parameters {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one bound under `key`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.map.insert(key.into(), value.into())
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Remove a value from the parameters map
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// Everything derived from the incoming event, shared by all handles of one request.
struct RequestShared {
    incoming: IncomingRequest,
    method: String,
    url: String,
    query: HashMap<String, String>,
    peer: SocketAddr,
    ip: String,
}

/// The request façade.
///
/// # Examples
///
/// ```
/// use rexpress::context::Request;
/// use rexpress::http::{IncomingRequest, Method};
///
/// let incoming = IncomingRequest::new(Method::Get, "/properties?something=true");
/// let req = Request::new(incoming, "127.0.0.1:4000".parse().unwrap());
///
/// assert_eq!(req.method(), "get");
/// assert_eq!(req.path(), "/properties");
/// assert_eq!(req.url(), "/properties?something=true");
/// assert_eq!(req.query_param("something"), Some("true"));
/// assert_eq!(req.ip(), "0000:0000:0000:0000:0000:ffff:7f00:0001");
/// ```
#[derive(Clone)]
pub struct Request {
    shared: Arc<RequestShared>,
    params: Arc<Params>,
    base_url: Arc<str>,
}

impl Request {
    /// Wrap an incoming request event received from `peer`.
    pub fn new(incoming: IncomingRequest, peer: SocketAddr) -> Self {
        let method = incoming.method().to_lowercase();
        let url = match incoming.query_string() {
            Some(query) => format!("{}?{}", incoming.path(), query),
            None => incoming.path().to_owned(),
        };
        let query = incoming
            .query_string()
            .map(parse_query_string)
            .unwrap_or_default();

        Self {
            shared: Arc::new(RequestShared {
                method,
                url,
                query,
                ip: expanded_ip(peer.ip()),
                peer,
                incoming,
            }),
            params: Arc::new(Params::new()),
            base_url: Arc::from(""),
        }
    }

    // A handle onto the same request with the bindings of one route or mount.
    pub(crate) fn scoped(&self, params: Params, base_url: &str) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            params: Arc::new(params),
            base_url: Arc::from(base_url),
        }
    }

    /// The request method, lower-case (`"get"`, `"post"`, ...).
    pub fn method(&self) -> &str {
        &self.shared.method
    }

    /// The typed request method.
    pub fn http_method(&self) -> &Method {
        self.shared.incoming.method()
    }

    /// The path component only, without the query string.
    pub fn path(&self) -> &str {
        self.shared.incoming.path()
    }

    /// The path followed by `?` and the raw query string when one was sent.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// The raw query string, without the leading `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.shared.incoming.query_string()
    }

    /// The decoded query mapping. When a key repeats, the last value wins.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.shared.query
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.shared.query.get(key).map(String::as_str)
    }

    /// Parameters bound by route matching, keyed exactly as declared.
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// The mount prefixes, as matched, that led to the current handler; `""` at the root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The client address as a fully expanded IPv6 string.
    ///
    /// IPv4 peers are rendered in IPv4-mapped form, so the result is always 39
    /// characters long.
    pub fn ip(&self) -> &str {
        &self.shared.ip
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    /// Case-insensitive request header lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.shared.incoming.headers().get(name)
    }

    pub fn headers(&self) -> &Headers {
        self.shared.incoming.headers()
    }

    pub fn body(&self) -> &Bytes {
        self.shared.incoming.body()
    }

    /// Deserialize the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.body())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.shared.method)
            .field("url", &self.shared.url)
            .field("params", &self.params)
            .field("base_url", &self.base_url)
            .field("ip", &self.shared.ip)
            .finish()
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Keys and values are percent-decoded with `+` read as a space. A key with
/// no `=` maps to the empty string. Repeated keys keep the last value.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

// Eight zero-padded hex groups; IPv4 goes through its ::ffff: mapping.
fn expanded_ip(ip: IpAddr) -> String {
    let v6 = match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    v6.segments()
        .iter()
        .map(|group| format!("{group:04x}"))
        .collect::<Vec<_>>()
        .join(":")
}
