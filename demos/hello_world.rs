//! Minimal rexpress application.
//!
//! ```sh
//! RUST_LOG=info cargo run --example hello_world
//! curl http://127.0.0.1:8080/hello/ferris
//! curl http://127.0.0.1:8080/api/items/42?verbose=true
//! ```

use rexpress::{App, RequestLogger, Router};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut app = App::new();
    app.use_middleware(RequestLogger);

    app.get("/", |_req, res| async move {
        res.send("<h1>Hello, World!</h1>")?;
        Ok(())
    })?
    .get("/hello/:name", |req, res| async move {
        let name = req.param("name").unwrap_or("stranger");
        res.content_type("text/plain; charset=utf-8")?
            .send(format!("Hello, {name}!"))?;
        Ok(())
    })?
    .get("/old", |_req, res| async move {
        res.redirect("/")?;
        Ok(())
    })?;

    let mut api = Router::new();
    api.get("/items/:id", |req, res| async move {
        res.json(&json!({
            "id": req.param("id"),
            "verbose": req.query_param("verbose") == Some("true"),
            "mountedAt": req.base_url(),
        }))?;
        Ok(())
    })?
    .post("/items", |req, res| async move {
        let item: serde_json::Value = req.json()?;
        res.status(201)?.json(&item)?;
        Ok(())
    })?;
    app.mount("/api", api)?;

    let server = app
        .listen("127.0.0.1:8080", |addr| {
            tracing::info!("Listening on http://{addr}");
        })
        .await?;

    tokio::signal::ctrl_c().await?;
    server.close().await?;
    Ok(())
}
