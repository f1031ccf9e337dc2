//! End-to-end tests: a real server on an ephemeral port, driven with raw HTTP/1.1.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rexpress::{App, Listening, RequestLogger, Router, ServerConfig};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

async fn start(app: App) -> Listening {
    app.listen("127.0.0.1:0", |_| {}).await.unwrap()
}

async fn exchange(addr: SocketAddr, raw: String) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8(buf).unwrap();

    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let status = status_line.split(' ').nth(1).unwrap().parse().unwrap();
    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    Reply {
        status,
        headers,
        body: body.to_owned(),
    }
}

async fn request(addr: SocketAddr, method: &str, target: &str) -> Reply {
    exchange(
        addr,
        format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
    )
    .await
}

async fn request_with_body(addr: SocketAddr, method: &str, target: &str, body: &str) -> Reply {
    exchange(
        addr,
        format!(
            "{method} {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
             Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
    )
    .await
}

#[tokio::test]
async fn unmatched_requests_get_the_fallback() {
    let server = start(App::new()).await;
    let addr = server.local_addr();

    let reply = request(addr, "GET", "/nothing/here").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body, "Cannot GET /nothing/here");

    let reply = request(addr, "DELETE", "/").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body, "Cannot DELETE /");

    server.close().await.unwrap();
}

#[tokio::test]
async fn first_registered_route_wins() {
    let mut app = App::new();
    app.get("/", |_req, res| async move {
        res.send("first")?;
        Ok(())
    })
    .unwrap();
    app.get("/", |_req, res| async move {
        res.send("second")?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;

    let reply = request(server.local_addr(), "GET", "/").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "first");
    assert_eq!(reply.header("content-type"), Some("text/html; charset=utf-8"));
    server.close().await.unwrap();
}

#[tokio::test]
async fn path_params_and_query_are_exposed() {
    let mut app = App::new();
    app.get("/params/:one/:two", |req, res| async move {
        res.json(&json!({
            "one": req.param("one"),
            "two": req.param("two"),
        }))?;
        Ok(())
    })
    .unwrap();
    app.get("/query", |req, res| async move {
        res.json(req.query())?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;
    let addr = server.local_addr();

    let reply = request(addr, "GET", "/params/hello/world%20wide").await;
    assert_eq!(reply.json(), json!({ "one": "hello", "two": "world wide" }));

    let reply = request(addr, "GET", "/params/another/1").await;
    assert_eq!(reply.json(), json!({ "one": "another", "two": "1" }));

    let reply = request(addr, "GET", "/query?one=1&two=2&three=3&four=4").await;
    assert_eq!(
        reply.json(),
        json!({ "one": "1", "two": "2", "three": "3", "four": "4" })
    );

    let reply = request(addr, "GET", "/query?one=1&two=two&one=uno").await;
    assert_eq!(reply.json(), json!({ "one": "uno", "two": "two" }));

    let reply = request(addr, "GET", "/params/only-one").await;
    assert_eq!(reply.status, 404);

    server.close().await.unwrap();
}

#[tokio::test]
async fn request_properties() {
    let mut app = App::new();
    app.get("/properties", |req, res| async move {
        res.json(&json!({
            "url": req.url(),
            "path": req.path(),
            "method": req.method(),
            "ip": req.ip(),
            "host": req.get("host"),
        }))?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;

    let reply = request(server.local_addr(), "GET", "/properties?something=true").await;
    let body = reply.json();
    assert_eq!(body["url"], "/properties?something=true");
    assert_eq!(body["path"], "/properties");
    assert_eq!(body["method"], "get");
    assert_eq!(body["host"], "localhost");
    let ip = body["ip"].as_str().unwrap();
    assert_eq!(ip.len(), 39);
    assert_eq!(ip, "0000:0000:0000:0000:0000:ffff:7f00:0001");
    server.close().await.unwrap();
}

#[tokio::test]
async fn response_header_lifecycle() {
    let mut app = App::new();
    app.get("/headers", |_req, res| async move {
        let before = res.has_header("x-custom");
        res.set("X-Custom", "a")?;
        let after_set = res.has_header("x-custom");
        res.remove_header("X-CUSTOM")?;
        let after_remove = res.has_header("x-custom");
        res.set("x-custom", "kept")?;
        res.json(&json!([before, after_set, after_remove]))?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;

    let reply = request(server.local_addr(), "GET", "/headers").await;
    assert_eq!(reply.json(), json!([false, true, false]));
    assert_eq!(reply.header("x-custom"), Some("kept"));
    assert_eq!(reply.header("content-type"), Some("application/json"));
    server.close().await.unwrap();
}

#[tokio::test]
async fn json_body_round_trip() {
    let mut app = App::new();
    app.post("/echo", |req, res| async move {
        let value: Value = req.json()?;
        res.status(201)?.json(&value)?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;

    let payload = r#"{"hello":"world","n":[1,2,3]}"#;
    let reply = request_with_body(server.local_addr(), "POST", "/echo", payload).await;
    assert_eq!(reply.status, 201);
    assert_eq!(reply.json(), json!({ "hello": "world", "n": [1, 2, 3] }));
    server.close().await.unwrap();
}

#[tokio::test]
async fn redirect_can_be_followed() {
    let mut app = App::new();
    app.get("/redirect", |_req, res| async move {
        res.redirect("/target")?;
        Ok(())
    })
    .unwrap();
    app.get("/target", |_req, res| async move {
        res.send("arrived")?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;
    let addr = server.local_addr();

    let reply = request(addr, "GET", "/redirect").await;
    assert_eq!(reply.status, 302);
    assert!(reply.body.is_empty());
    let location = reply.header("location").unwrap().to_owned();

    let reply = request(addr, "GET", &location).await;
    assert_eq!(reply.body, "arrived");
    server.close().await.unwrap();
}

#[tokio::test]
async fn mounted_router_keeps_method_semantics() {
    let mut routes = Router::new();
    routes
        .get("/one", |req, res| async move {
            res.send(format!("one {}", req.base_url()))?;
            Ok(())
        })
        .unwrap()
        .post("/two", |_req, res| async move {
            res.send("two")?;
            Ok(())
        })
        .unwrap()
        .delete("/three", |_req, res| async move {
            res.send("three")?;
            Ok(())
        })
        .unwrap();

    let mut app = App::new();
    app.mount("/routes", routes).unwrap();
    let server = start(app).await;
    let addr = server.local_addr();

    assert_eq!(request(addr, "GET", "/routes/one").await.body, "one /routes");
    assert_eq!(request(addr, "POST", "/routes/two").await.body, "two");
    assert_eq!(request(addr, "DELETE", "/routes/three").await.body, "three");

    let reply = request(addr, "POST", "/routes/one").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body, "Cannot POST /routes/one");

    // The prefix only matches whole segments.
    assert_eq!(request(addr, "GET", "/routesone").await.status, 404);
    server.close().await.unwrap();
}

#[tokio::test]
async fn middleware_runs_before_routes_in_order() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    let mut app = App::new();
    app.use_middleware(RequestLogger);
    app.use_fn(move |_req, res| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            res.set("X-Powered-By", "rexpress")?;
            Ok(())
        }
    });
    app.get("/", |_req, res| async move {
        res.send("ok")?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;
    let addr = server.local_addr();

    let reply = request(addr, "GET", "/").await;
    assert_eq!(reply.header("x-powered-by"), Some("rexpress"));

    // Middleware also runs for requests that end in the fallback.
    let reply = request(addr, "GET", "/missing").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.header("x-powered-by"), Some("rexpress"));

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    server.close().await.unwrap();
}

#[tokio::test]
async fn failing_handler_answers_500() {
    let mut app = App::new();
    app.get("/boom", |_req, _res| async move { Err("kaboom".into()) })
        .unwrap();
    let server = start(app).await;

    let reply = request(server.local_addr(), "GET", "/boom").await;
    assert_eq!(reply.status, 500);
    assert_eq!(reply.body, "Internal Server Error");
    server.close().await.unwrap();
}

#[tokio::test]
async fn keep_alive_serves_several_requests() {
    let mut app = App::new();
    app.get("/n/:n", |req, res| async move {
        res.send(req.param("n").unwrap_or_default().to_owned())?;
        Ok(())
    })
    .unwrap();
    let server = start(app).await;

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream
        .write_all(
            b"GET /n/1 HTTP/1.1\r\nHost: x\r\n\r\nGET /n/2 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let mut buf = String::new();
    stream.read_to_string(&mut buf).await.unwrap();
    assert_eq!(buf.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(buf.contains("Connection: keep-alive"));
    assert!(buf.ends_with("\r\n\r\n2"));
    server.close().await.unwrap();
}

#[tokio::test]
async fn on_ready_reports_bound_address() {
    let mut reported = None;
    let server = App::new()
        .listen("127.0.0.1:0", |addr| reported = Some(addr))
        .await
        .unwrap();
    assert_eq!(reported, Some(server.local_addr()));
    assert_ne!(server.local_addr().port(), 0);

    let addr = server.local_addr();
    server.close().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

fn limited_app() -> App {
    let mut app = App::with_config(ServerConfig::default().max_request_size(1024));
    app.post("/upload", |req, res| async move {
        res.send(req.body().len().to_string())?;
        Ok(())
    })
    .unwrap();
    app.get("/slow", |_req, res| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        res.send("done")?;
        Ok(())
    })
    .unwrap();
    app
}

#[tokio::test]
async fn malformed_request_gets_400() {
    let server = start(App::new()).await;

    let reply = exchange(server.local_addr(), "NOT A REQUEST\r\n\r\n".to_owned()).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.header("connection"), Some("close"));
    server.close().await.unwrap();
}

#[tokio::test]
async fn body_within_limit_is_accepted() {
    let server = start(limited_app()).await;

    let body = "x".repeat(512);
    let reply = request_with_body(server.local_addr(), "POST", "/upload", &body).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "512");
    server.close().await.unwrap();
}

#[tokio::test]
async fn declared_body_over_limit_gets_413() {
    let server = start(limited_app()).await;

    let reply = exchange(
        server.local_addr(),
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4096\r\n\r\n".to_owned(),
    )
    .await;
    assert_eq!(reply.status, 413);
    server.close().await.unwrap();
}

#[tokio::test]
async fn overflowing_content_length_gets_413() {
    let server = start(limited_app()).await;

    let reply = exchange(
        server.local_addr(),
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 18446744073709551615\r\n\r\n"
            .to_owned(),
    )
    .await;
    assert_eq!(reply.status, 413);

    // The server is still up.
    let reply = request(server.local_addr(), "GET", "/missing").await;
    assert_eq!(reply.status, 404);
    server.close().await.unwrap();
}

#[tokio::test]
async fn data_sent_during_a_slow_handler_is_capped() {
    let server = start(limited_app()).await;

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream.write_all(&[b'a'; 2048]).await.unwrap();

    let mut buf = String::new();
    stream.read_to_string(&mut buf).await.unwrap();
    assert!(buf.starts_with("HTTP/1.1 413 "), "unexpected reply: {buf}");
    assert!(!buf.contains("done"));
    server.close().await.unwrap();
}
