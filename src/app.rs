//! The application root: a [`Router`] plus the `listen` / `close` lifecycle.
//!
//! [`App`] is built exactly like a [`Router`] (it dereferences to one). Calling
//! [`App::listen`] freezes the route table behind an `Arc`, binds the
//! connection engine and returns a [`Listening`] handle used to close it.

use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::{Request, Response};
use crate::http::{IncomingRequest, OutgoingResponse};
use crate::router::{RouteTable, Router};
use crate::server::{Server, ServerConfig, ServerError};

/// An application: a root router and the engine configuration it will listen with.
///
/// # Examples
///
/// ```rust,no_run
/// use rexpress::App;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut app = App::new();
///     app.get("/", |_req, res| async move {
///         res.send("Hello, World!")?;
///         Ok(())
///     })?;
///
///     let server = app
///         .listen("127.0.0.1:8080", |addr| println!("Listening on http://{addr}"))
///         .await?;
///     tokio::signal::ctrl_c().await?;
///     server.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Default)]
pub struct App {
    router: Router,
    config: ServerConfig,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// An application that will listen with the given engine limits.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            router: Router::new(),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Freeze the routes into a [`Dispatcher`] without starting a server.
    pub fn into_dispatcher(self) -> Dispatcher {
        Dispatcher::new(self.router)
    }

    /// Bind `addr`, call `on_ready` with the bound address, and start serving in
    /// the background.
    ///
    /// Use port `0` to let the OS pick a free port; `on_ready` and
    /// [`Listening::local_addr`] report the one chosen.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the address cannot be bound.
    pub async fn listen(
        self,
        addr: impl AsRef<str>,
        on_ready: impl FnOnce(SocketAddr),
    ) -> Result<Listening, ServerError> {
        let server = Server::bind_with(addr, self.config).await?;
        let local_addr = server.local_addr();
        let dispatcher = Dispatcher::new(self.router);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(dispatcher, async move {
            // A dropped sender also means shut down.
            let _ = shutdown_rx.await;
        }));

        on_ready(local_addr);
        Ok(Listening {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

impl Deref for App {
    type Target = Router;

    fn deref(&self) -> &Router {
        &self.router
    }
}

impl DerefMut for App {
    fn deref_mut(&mut self) -> &mut Router {
        &mut self.router
    }
}

/// Handle to a running server.
#[derive(Debug)]
pub struct Listening {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl Listening {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    ///
    /// Connections already being served finish on their own.
    pub async fn close(self) -> Result<(), ServerError> {
        let _ = self.shutdown.send(());
        self.task.await?
    }
}

/// Frozen, shareable route table that turns request events into responses.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
}

// Aborts the dispatch task if the exchange is dropped before finalization.
struct AbortOnDrop(Option<JoinHandle<()>>);

impl AbortOnDrop {
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

impl Dispatcher {
    pub fn new(router: Router) -> Self {
        Self {
            table: Arc::new(router.into_table()),
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Run one request event through the route table and wait for its response.
    ///
    /// Resolves as soon as the response is finalized; handlers may keep running
    /// afterwards. Resolves to `None` when every response handle was dropped
    /// without finalizing. Dropping the returned future before then abandons
    /// the dispatch: its task is aborted and any surviving handle reports
    /// [`ResponseError::ConnectionAborted`](crate::ResponseError::ConnectionAborted).
    pub async fn handle(&self, incoming: IncomingRequest, peer: SocketAddr) -> Option<OutgoingResponse> {
        let start = Instant::now();
        let method = incoming.method().clone();
        let path = incoming.path().to_owned();

        let request = Request::new(incoming, peer);
        let (response, finished) = Response::channel();
        let table = Arc::clone(&self.table);
        let guard = AbortOnDrop(Some(tokio::spawn(async move {
            table.dispatch(request, response).await;
        })));

        let outcome = finished.await;
        guard.disarm();

        match outcome {
            Ok(outgoing) => {
                info!(
                    "{} {} - {} ({:?})",
                    method,
                    path,
                    outgoing.status().as_u16(),
                    start.elapsed()
                );
                Some(outgoing)
            }
            Err(_) => {
                warn!(method = %method, path = %path, "handler chain ended without finalizing the response");
                None
            }
        }
    }
}
