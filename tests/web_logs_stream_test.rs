#[tokio::test]
async fn logs_stream_emits_named_log_events() {
    use axum::http::Request;
    use axum::routing::get;
    use http_body_util::BodyExt as _;
    use std::time::Duration;
    use tower::ServiceExt;

    let dir = tempfile::tempdir().unwrap();
    let config = spotheat::config::LoggingConfig {
        file: dir.path().join("spotheat.log").to_string_lossy().to_string(),
        ..Default::default()
    };
    let _ = spotheat::logging::init_logging(&config);

    let router = axum::Router::new().route("/api/logs/stream", get(spotheat::web::logs_stream));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/logs/stream")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let ct = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    assert!(ct.contains("text/event-stream"));

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        spotheat::logging::get_logger("sse").info("relay_cycle_marker_42");
    });

    let mut body = response.into_body();
    let mut buf: Vec<u8> = Vec::new();
    let needle = b"relay_cycle_marker_42";
    let wait = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(frame)) = body.frame().await {
            if let Some(data) = frame.data_ref() {
                buf.extend_from_slice(data);
                if buf.windows(needle.len()).any(|w| w == needle) {
                    break;
                }
            }
        }
    })
    .await;

    assert!(wait.is_ok(), "timed out waiting for SSE log event");
    let s = String::from_utf8_lossy(&buf);
    assert!(s.contains("event: log"), "missing named event: {}", s);
    assert!(s.contains("relay_cycle_marker_42"), "missing log line: {}", s);
}
