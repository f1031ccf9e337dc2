//! The response façade.
//!
//! A [`Response`] buffers a pending status and header map until it is
//! finalized by [`end`](Response::end), [`send`](Response::send),
//! [`json`](Response::json) or [`redirect`](Response::redirect). Finalization
//! hands a complete [`OutgoingResponse`] to the connection engine through a
//! one-shot channel and happens at most once; every later mutation fails with
//! [`ResponseError::AlreadyFinalized`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::http::{Headers, OutgoingResponse, StatusCode, headers};

/// Misuse of a [`Response`].
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response has already been finalized")]
    AlreadyFinalized,

    #[error("connection was closed before the response was finalized")]
    ConnectionAborted,

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid character in header {name:?}")]
    InvalidHeader { name: String },

    #[error("failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Finalized,
}

struct ResponseState {
    status: StatusCode,
    // Whether `status` was called; `redirect` honours an explicit status.
    status_explicit: bool,
    headers: Headers,
    phase: Phase,
    sink: Option<oneshot::Sender<OutgoingResponse>>,
}

impl ResponseState {
    fn ensure_open(&self) -> Result<(), ResponseError> {
        if self.phase == Phase::Finalized {
            return Err(ResponseError::AlreadyFinalized);
        }
        match &self.sink {
            Some(sink) if !sink.is_closed() => Ok(()),
            _ => Err(ResponseError::ConnectionAborted),
        }
    }

    // Caller has checked `ensure_open` under the same lock.
    fn finalize(&mut self, body: Bytes) -> Result<(), ResponseError> {
        let sink = self.sink.take().ok_or(ResponseError::ConnectionAborted)?;
        self.phase = Phase::Finalized;
        let outgoing = OutgoingResponse::from_parts(self.status, self.headers.clone(), body);
        sink.send(outgoing)
            .map_err(|_| ResponseError::ConnectionAborted)
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), ResponseError> {
    if headers::is_valid_name(name) && headers::is_valid_value(value) {
        Ok(())
    } else {
        Err(ResponseError::InvalidHeader {
            name: name.to_owned(),
        })
    }
}

/// Handle onto one request's pending response.
///
/// Mutators take `&self` and return the same handle so calls chain:
///
/// ```
/// # async fn demo() -> Result<(), rexpress::ResponseError> {
/// use rexpress::Response;
///
/// let (res, finished) = Response::channel();
/// res.status(201)?.set("X-Request-Id", "abc")?.json(&serde_json::json!({"ok": true}))?;
///
/// let sent = finished.await.unwrap();
/// assert_eq!(sent.status().as_u16(), 201);
/// assert_eq!(sent.headers().get("content-type"), Some("application/json"));
/// assert!(res.set("X-Late", "1").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Response {
    state: Arc<Mutex<ResponseState>>,
}

impl Response {
    /// Create an open response and the receiver the engine waits on.
    ///
    /// The receiver resolves with the finished response on finalization, or
    /// with an error once every handle has been dropped without finalizing.
    pub fn channel() -> (Self, oneshot::Receiver<OutgoingResponse>) {
        let (tx, rx) = oneshot::channel();
        let state = ResponseState {
            status: StatusCode::OK,
            status_explicit: false,
            headers: Headers::new(),
            phase: Phase::Open,
            sink: Some(tx),
        };
        (
            Self {
                state: Arc::new(Mutex::new(state)),
            },
            rx,
        )
    }

    // Run `f` against the state if the response is still open.
    fn mutate(
        &self,
        f: impl FnOnce(&mut ResponseState) -> Result<(), ResponseError>,
    ) -> Result<&Self, ResponseError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        f(&mut state)?;
        Ok(self)
    }

    // Like `mutate`, then finalize with `body` before releasing the lock.
    fn mutate_and_finalize(
        &self,
        body: Bytes,
        f: impl FnOnce(&mut ResponseState) -> Result<(), ResponseError>,
    ) -> Result<(), ResponseError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        f(&mut state)?;
        state.finalize(body)
    }

    /// Set the pending status code. Repeated calls overwrite.
    pub fn status(&self, code: u16) -> Result<&Self, ResponseError> {
        self.mutate(|state| {
            state.status = StatusCode::new(code).ok_or(ResponseError::InvalidStatus(code))?;
            state.status_explicit = true;
            Ok(())
        })
    }

    /// The pending (or, once finalized, the sent) status code.
    pub fn status_code(&self) -> StatusCode {
        self.state.lock().status
    }

    /// Set a header, replacing any value stored under the same name in any casing.
    ///
    /// Fails with [`ResponseError::InvalidHeader`] when the name is not a token
    /// or the value contains CR, LF or NUL.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) -> Result<&Self, ResponseError> {
        let (name, value) = (name.into(), value.into());
        self.mutate(|state| {
            validate_header(&name, &value)?;
            state.headers.set(name, value);
            Ok(())
        })
    }

    /// Alias of [`set`](Self::set).
    pub fn header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<&Self, ResponseError> {
        self.set(name, value)
    }

    /// Add another value for `name`, keeping existing ones (e.g. `Set-Cookie`).
    pub fn append(&self, name: impl Into<String>, value: impl Into<String>) -> Result<&Self, ResponseError> {
        let (name, value) = (name.into(), value.into());
        self.mutate(|state| {
            validate_header(&name, &value)?;
            state.headers.append(name, value);
            Ok(())
        })
    }

    /// Set the `Content-Type` header.
    pub fn content_type(&self, value: impl Into<String>) -> Result<&Self, ResponseError> {
        self.set("Content-Type", value)
    }

    /// First value of a pending header, case-insensitive.
    pub fn get(&self, name: &str) -> Option<String> {
        self.state.lock().headers.get(name).map(str::to_owned)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.state.lock().headers.contains(name)
    }

    /// Remove a header in any casing; no-op when absent.
    pub fn remove_header(&self, name: &str) -> Result<&Self, ResponseError> {
        self.mutate(|state| {
            state.headers.remove(name);
            Ok(())
        })
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().phase == Phase::Finalized
    }

    /// Finalize with an empty body.
    pub fn end(&self) -> Result<(), ResponseError> {
        self.end_with(Bytes::new())
    }

    /// Finalize with `body`, leaving headers as they are.
    pub fn end_with(&self, body: impl Into<Bytes>) -> Result<(), ResponseError> {
        self.mutate_and_finalize(body.into(), |_| Ok(()))
    }

    /// Finalize with a text body, defaulting the content type to HTML.
    pub fn send(&self, body: impl Into<String>) -> Result<(), ResponseError> {
        self.mutate_and_finalize(Bytes::from(body.into()), |state| {
            if !state.headers.contains("content-type") {
                state.headers.set("Content-Type", "text/html; charset=utf-8");
            }
            Ok(())
        })
    }

    /// Finalize with `code` and its reason phrase (or the bare number) as a text body.
    pub fn send_status(&self, code: u16) -> Result<(), ResponseError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let status = StatusCode::new(code).ok_or(ResponseError::InvalidStatus(code))?;
        let body = status
            .canonical_reason()
            .map_or_else(|| status.as_u16().to_string(), str::to_owned);
        state.status = status;
        state.status_explicit = true;
        state.headers.set("Content-Type", "text/plain; charset=utf-8");
        state.finalize(Bytes::from(body))
    }

    /// Serialize `value` as the body with `Content-Type: application/json` and finalize.
    ///
    /// On a serialization error the response is left untouched and open.
    pub fn json<T>(&self, value: &T) -> Result<(), ResponseError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)?;
        self.mutate_and_finalize(Bytes::from(body), |state| {
            state.headers.set("Content-Type", "application/json");
            Ok(())
        })
    }

    /// Redirect to `location`: 302 unless a status was set explicitly, empty body.
    pub fn redirect(&self, location: impl Into<String>) -> Result<(), ResponseError> {
        let location = location.into();
        self.mutate_and_finalize(Bytes::new(), |state| {
            validate_header("Location", &location)?;
            if !state.status_explicit {
                state.status = StatusCode::FOUND;
            }
            state.headers.set("Location", location);
            Ok(())
        })
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("phase", &state.phase)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_200_with_empty_body() {
        let (res, rx) = Response::channel();
        res.end().unwrap();
        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::OK);
        assert!(sent.body_bytes().is_empty());
        assert!(sent.headers().is_empty());
    }

    #[test]
    fn header_lifecycle_is_case_insensitive() {
        let (res, _rx) = Response::channel();
        assert!(!res.has_header("x"));
        res.set("x", "v").unwrap();
        assert!(res.has_header("x"));
        assert!(res.has_header("X"));
        res.remove_header("x").unwrap();
        assert!(!res.has_header("x"));
        res.set("X", "v2").unwrap();
        assert!(res.has_header("x"));
        assert_eq!(res.get("x").as_deref(), Some("v2"));
        // removing an absent header is fine
        res.remove_header("missing").unwrap();
    }

    #[test]
    fn set_with_other_casing_overwrites() {
        let (res, _rx) = Response::channel();
        res.set("Content-Type", "text/plain").unwrap();
        res.set("content-type", "text/csv").unwrap();
        assert_eq!(res.get("CONTENT-TYPE").as_deref(), Some("text/csv"));
        assert_eq!(res.state.lock().headers.len(), 1);
    }

    #[tokio::test]
    async fn json_overrides_content_type_and_round_trips() {
        let (res, rx) = Response::channel();
        res.content_type("text/plain").unwrap();
        res.json(&serde_json::json!({ "hello": "world" })).unwrap();
        let sent = rx.await.unwrap();
        assert_eq!(sent.headers().get("content-type"), Some("application/json"));
        let decoded: serde_json::Value = serde_json::from_slice(sent.body_bytes()).unwrap();
        assert_eq!(decoded, serde_json::json!({ "hello": "world" }));
    }

    #[tokio::test]
    async fn redirect_defaults_to_found() {
        let (res, rx) = Response::channel();
        res.redirect("/target").unwrap();
        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::FOUND);
        assert_eq!(sent.headers().get("location"), Some("/target"));
        assert!(sent.body_bytes().is_empty());
    }

    #[tokio::test]
    async fn redirect_honours_explicit_status() {
        let (res, rx) = Response::channel();
        res.status(301).unwrap().redirect("/moved").unwrap();
        assert_eq!(rx.await.unwrap().status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[tokio::test]
    async fn send_defaults_to_html_but_keeps_explicit_type() {
        let (res, rx) = Response::channel();
        res.send("<p>hi</p>").unwrap();
        let sent = rx.await.unwrap();
        assert_eq!(
            sent.headers().get("content-type"),
            Some("text/html; charset=utf-8")
        );

        let (res, rx) = Response::channel();
        res.content_type("text/plain").unwrap().send("hi").unwrap();
        assert_eq!(rx.await.unwrap().headers().get("content-type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn send_status_uses_reason_phrase() {
        let (res, rx) = Response::channel();
        res.send_status(404).unwrap();
        let sent = rx.await.unwrap();
        assert_eq!(sent.status(), StatusCode::NOT_FOUND);
        assert_eq!(sent.body_text(), "Not Found");
    }

    #[test]
    fn mutations_after_finalize_fail() {
        let (res, _rx) = Response::channel();
        res.end().unwrap();
        assert!(res.is_finalized());
        assert!(matches!(res.status(500), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(res.set("a", "b"), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(res.remove_header("a"), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(res.end(), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(
            res.json(&serde_json::json!(null)),
            Err(ResponseError::AlreadyFinalized)
        ));
        assert!(matches!(res.redirect("/x"), Err(ResponseError::AlreadyFinalized)));
    }

    #[test]
    fn finalization_is_shared_across_clones() {
        let (res, _rx) = Response::channel();
        let other = res.clone();
        other.end().unwrap();
        assert!(res.is_finalized());
        assert!(matches!(res.end(), Err(ResponseError::AlreadyFinalized)));
    }

    #[test]
    fn dropped_receiver_reports_abort() {
        let (res, rx) = Response::channel();
        drop(rx);
        assert!(matches!(res.set("a", "b"), Err(ResponseError::ConnectionAborted)));
        assert!(matches!(res.end(), Err(ResponseError::ConnectionAborted)));
        assert!(!res.is_finalized());
    }

    #[test]
    fn header_injection_is_rejected() {
        let (res, _rx) = Response::channel();
        assert!(matches!(
            res.set("X-Note", "a\r\nSet-Cookie: evil=1"),
            Err(ResponseError::InvalidHeader { .. })
        ));
        assert!(matches!(
            res.append("Set-Cookie", "a=1\nX-Injected: yes"),
            Err(ResponseError::InvalidHeader { .. })
        ));
        assert!(matches!(
            res.set("Bad Name", "v"),
            Err(ResponseError::InvalidHeader { .. })
        ));
        assert!(!res.has_header("x-note"));
        assert!(!res.has_header("set-cookie"));
    }

    #[tokio::test]
    async fn redirect_with_line_break_stays_open() {
        let (res, rx) = Response::channel();
        assert!(matches!(
            res.redirect("/x\r\nX-Injected: yes"),
            Err(ResponseError::InvalidHeader { .. })
        ));
        assert!(!res.is_finalized());
        assert!(!res.has_header("location"));

        res.redirect("/x").unwrap();
        let sent = rx.await.unwrap();
        let wire = String::from_utf8(sent.into_bytes(false).to_vec()).unwrap();
        assert!(wire.contains("Location: /x\r\n"));
        assert!(!wire.contains("X-Injected"));
    }

    #[test]
    fn finalized_state_wins_over_status_validation() {
        let (res, _rx) = Response::channel();
        res.end().unwrap();
        assert!(matches!(res.status(42), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(res.send_status(42), Err(ResponseError::AlreadyFinalized)));
    }

    #[test]
    fn finalizers_leave_headers_alone_once_finalized() {
        let (res, _rx) = Response::channel();
        let other = res.clone();
        other.end().unwrap();

        assert!(matches!(res.send("late"), Err(ResponseError::AlreadyFinalized)));
        assert!(matches!(
            res.json(&serde_json::json!({})),
            Err(ResponseError::AlreadyFinalized)
        ));
        assert!(matches!(res.redirect("/late"), Err(ResponseError::AlreadyFinalized)));
        assert!(!res.has_header("content-type"));
        assert!(!res.has_header("location"));
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn concurrent_finalizers_send_exactly_once() {
        let (res, rx) = Response::channel();
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let res = res.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        res.send(format!("send {i}")).is_ok()
                    } else {
                        res.json(&serde_json::json!({ "i": i })).is_ok()
                    }
                })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let sent = rx.await.unwrap();
        let content_type = sent.headers().get("content-type").unwrap();
        // the headers sent match the body of the finalizer that won
        if sent.body_text().starts_with("send") {
            assert_eq!(content_type, "text/html; charset=utf-8");
        } else {
            assert_eq!(content_type, "application/json");
        }
    }

    #[test]
    fn invalid_status_is_rejected() {
        let (res, _rx) = Response::channel();
        assert!(matches!(res.status(42), Err(ResponseError::InvalidStatus(42))));
        assert_eq!(res.status_code(), StatusCode::OK);
    }
}
