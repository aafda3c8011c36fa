use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use reel_proxy::config::ListenConfig;
use reel_proxy::{ProxyConfig, ProxyHandle, ProxyServer};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// In-process upstream counting every request it serves.
struct Upstream {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    shutdown_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl Upstream {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

async fn upstream_reply(req: Request<Incoming>, hits: Arc<AtomicUsize>) -> Response<Full<Bytes>> {
    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
    let path = req.uri().path().to_string();
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let _ = req.into_body().collect().await;

    let body = match path.as_str() {
        "/count" => format!("{n} requests so far"),
        "/host" => host,
        _ => "hello, world".to_string(),
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

async fn spawn_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let counter = Arc::clone(&hits);
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accept = listener.accept() => {
                    let Ok((stream, _peer)) = accept else { continue };
                    let counter = Arc::clone(&counter);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let counter = Arc::clone(&counter);
                            async move { Ok::<_, hyper::Error>(upstream_reply(req, counter).await) }
                        });
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
            }
        }
    });

    Upstream {
        addr,
        hits,
        shutdown_tx,
        join,
    }
}

fn proxy_config(target: &str, cassettes: &Path) -> ProxyConfig {
    ProxyConfig {
        listen: ListenConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        target_url: target.to_string(),
        cassette_directory: cassettes.to_path_buf(),
        tls_skip_verify: true,
        ..Default::default()
    }
}

async fn spawn_proxy(target: &str, cassettes: &Path) -> ProxyHandle {
    ProxyServer::new(proxy_config(target, cassettes))
        .unwrap()
        .serve()
        .await
        .unwrap()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn get_text(client: &reqwest::Client, proxy: &ProxyHandle, path: &str) -> String {
    client
        .get(format!("http://{}{}", proxy.listen_addr, path))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap()
}

async fn configure(
    client: &reqwest::Client,
    proxy: &ProxyHandle,
    update: serde_json::Value,
) -> serde_json::Value {
    let response = client
        .post(format!("http://{}/__reel__/config", proxy.listen_addr))
        .body(update.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_transparent_mode_forwards_without_recording() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();

    assert_eq!(get_text(&client, &proxy, "/count").await, "1 requests so far");
    assert_eq!(get_text(&client, &proxy, "/count").await, "2 requests so far");
    assert_eq!(upstream.hits(), 2);
    assert_eq!(std::fs::read_dir(cassettes.path()).unwrap().count(), 0);

    proxy.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_replays_after_upstream_goes_away() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();

    configure(&client, &proxy, json!({ "cassette": "offline" })).await;
    assert_eq!(get_text(&client, &proxy, "/hello").await, "hello, world");
    upstream.shutdown().await;

    for _ in 0..3 {
        assert_eq!(get_text(&client, &proxy, "/hello").await, "hello, world");
    }

    let saved: serde_json::Value = serde_json::from_slice(
        &std::fs::read(cassettes.path().join("offline.json")).unwrap(),
    )
    .unwrap();
    let episodes = saved.as_array().unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0]["Request"]["Method"], "GET");
    assert_eq!(episodes[0]["Request"]["URL"], "/hello");
    assert_eq!(episodes[0]["Response"]["StatusCode"], 200);
    // Text content types are stored as readable strings.
    assert_eq!(episodes[0]["Response"]["Body"], "hello, world");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_cassettes_are_isolated() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();

    configure(&client, &proxy, json!({ "cassette": "first" })).await;
    assert_eq!(get_text(&client, &proxy, "/count").await, "1 requests so far");

    configure(&client, &proxy, json!({ "cassette": "second" })).await;
    assert_eq!(get_text(&client, &proxy, "/count").await, "2 requests so far");

    configure(&client, &proxy, json!({ "cassette": "first" })).await;
    assert_eq!(get_text(&client, &proxy, "/count").await, "1 requests so far");

    configure(&client, &proxy, json!({ "cassette": "second" })).await;
    assert_eq!(get_text(&client, &proxy, "/count").await, "2 requests so far");
    assert_eq!(upstream.hits(), 2);

    proxy.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_form_bodies_are_part_of_the_match() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();
    configure(&client, &proxy, json!({ "cassette": "forms" })).await;

    let post = |body: &'static str| {
        client
            .post(format!("http://{}/count", proxy.listen_addr))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
    };

    let first = post("name=alice&role=admin").await.unwrap().text().await.unwrap();
    let second = post("name=bob&role=admin").await.unwrap().text().await.unwrap();
    assert_eq!(first, "1 requests so far");
    assert_eq!(second, "2 requests so far");

    // Same fields in a different order replay the first exchange.
    let again = post("role=admin&name=alice").await.unwrap().text().await.unwrap();
    assert_eq!(again, "1 requests so far");
    assert_eq!(upstream.hits(), 2);

    proxy.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_form_fields_discriminate_recordings() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();
    configure(&client, &proxy, json!({ "cassette": "superset" })).await;

    let post = |body: &'static str| {
        client
            .post(format!("http://{}/count", proxy.listen_addr))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
    };

    // The second form holds every field of the first plus one more.
    let narrow = post("Foo=Bar").await.unwrap().text().await.unwrap();
    let wide = post("Foo=Bar&Baz=Quux").await.unwrap().text().await.unwrap();
    assert_eq!(narrow, "1 requests so far");
    assert_eq!(wide, "2 requests so far");

    let narrow = post("Foo=Bar").await.unwrap().text().await.unwrap();
    let wide = post("Foo=Bar&Baz=Quux").await.unwrap().text().await.unwrap();
    assert_eq!(narrow, "1 requests so far");
    assert_eq!(wide, "2 requests so far");
    assert_eq!(upstream.hits(), 2);

    proxy.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_denies_unrecorded_requests() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();

    configure(
        &client,
        &proxy,
        json!({ "cassette": "locked", "deny_unrecorded_requests": true }),
    )
    .await;
    let response = client
        .get(format!("http://{}/count", proxy.listen_addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert!(response.bytes().await.unwrap().is_empty());
    assert_eq!(upstream.hits(), 0);
    assert!(!cassettes.path().join("locked.json").exists());

    proxy.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_control_endpoint_applies_partial_updates() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();
    let url = format!("http://{}/__reel__/config", proxy.listen_addr);

    let initial: serde_json::Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(
        initial,
        json!({
            "cassette": "",
            "record_new_episodes": true,
            "deny_unrecorded_requests": false,
            "rewrite_host_header": true,
            "match_headers": []
        })
    );

    configure(&client, &proxy, json!({ "cassette": "partial" })).await;
    let updated = configure(&client, &proxy, json!({ "record_new_episodes": false })).await;
    assert_eq!(updated["cassette"], "partial");
    assert_eq!(updated["record_new_episodes"], false);
    assert_eq!(updated["rewrite_host_header"], true);

    let response = client.delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(upstream.hits(), 0);

    proxy.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_rewrites_host_header_on_request() {
    let upstream = spawn_upstream().await;
    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&format!("http://{}", upstream.addr), cassettes.path()).await;
    let client = client();

    assert_eq!(
        get_text(&client, &proxy, "/host").await,
        upstream.addr.to_string()
    );

    configure(&client, &proxy, json!({ "rewrite_host_header": false })).await;
    assert_eq!(
        get_text(&client, &proxy, "/host").await,
        proxy.listen_addr.to_string()
    );

    proxy.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_upstream_failure_returns_bad_gateway_and_records_nothing() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let target = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let cassettes = tempfile::tempdir().unwrap();
    let proxy = spawn_proxy(&target, cassettes.path()).await;
    let client = client();
    configure(&client, &proxy, json!({ "cassette": "down" })).await;

    let response = client
        .get(format!("http://{}/count", proxy.listen_addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_server_error());
    assert!(!cassettes.path().join("down.json").exists());

    proxy.shutdown().await;
}
