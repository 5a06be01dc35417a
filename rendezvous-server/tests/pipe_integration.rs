//! End-to-end scenarios run against a real bound listener, since the
//! pipe broker's rendezvous semantics depend on genuinely concurrent
//! HTTP connections rather than a single in-process service call.

use std::time::Duration;

use rendezvous_server::build_router;
use rendezvous_server::state::AppState;

async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn blob_round_trip_and_metrics() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let put = client
        .put(format!("{base}/s/abc"))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 201);

    let get = client.get(format!("{base}/s/abc")).send().await.unwrap();
    assert_eq!(get.status(), 200);
    assert_eq!(get.text().await.unwrap(), "hello");

    let metrics = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("file_count: 1"));
}

#[tokio::test]
async fn oversize_blob_is_rejected() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let body = vec![0u8; 10_241];
    let put = client
        .put(format!("{base}/s/big"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 400);
}

#[tokio::test]
async fn pipe_hello_reflects_content_type_and_clears_metric() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let base2 = base.clone();
    let reader = tokio::spawn(async move {
        let client = reqwest::Client::new();
        client.get(format!("{base2}/p/x")).send().await.unwrap()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let writer = client
        .put(format!("{base}/p/x"))
        .header("content-type", "text/plain")
        .body("ping\n")
        .send()
        .await
        .unwrap();
    assert_eq!(writer.status(), 200);

    let response = reader.await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(response.text().await.unwrap(), "ping\n");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let metrics = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("pipe_count: 0"));
}

#[tokio::test]
async fn duplicate_reader_is_rejected() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let base2 = base.clone();
    let _first = tokio::spawn(async move {
        let client = reqwest::Client::new();
        client.get(format!("{base2}/p/dup")).send().await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = client
        .get(format!("{base}/p/dup"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
}

#[tokio::test]
async fn fanout_completion_notifies_sender() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let base2 = base.clone();
    let r1 = tokio::spawn(async move {
        let client = reqwest::Client::new();
        client
            .get(format!("{base2}/p/fan?n=2"))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    });
    let base3 = base.clone();
    let r2 = tokio::spawn(async move {
        let client = reqwest::Client::new();
        client
            .get(format!("{base3}/p/fan?n=2"))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let sender = client
        .put(format!("{base}/p/fan?n=2"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(sender.status(), 200);
    let sender_body = sender.text().await.unwrap();
    assert!(sender_body.contains("Start sending to 2 receiver(s)"));
    assert!(sender_body.contains("All receiver(s) received successfully"));

    assert_eq!(r1.await.unwrap(), bytes::Bytes::from_static(b"payload"));
    assert_eq!(r2.await.unwrap(), bytes::Bytes::from_static(b"payload"));
}

#[tokio::test]
async fn fanout_multipart_part_headers_reach_receiver_with_html_rewritten() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let base2 = base.clone();
    let reader = tokio::spawn(async move {
        let client = reqwest::Client::new();
        client
            .get(format!("{base2}/p/fan-mp?n=1"))
            .send()
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"<h1>hi</h1>".to_vec())
            .file_name("snippet.html")
            .mime_str("text/html")
            .unwrap(),
    );
    let sender = client
        .put(format!("{base}/p/fan-mp?n=1"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(sender.status(), 200);

    let response = reader.await.unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    assert!(response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("snippet.html"));
    assert_eq!(response.bytes().await.unwrap(), &b"<h1>hi</h1>"[..]);
}
