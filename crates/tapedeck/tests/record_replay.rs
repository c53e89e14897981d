//! End-to-end record and playback through a running proxy.

mod common;

use common::{
    direct_client, proxied_client, silent_origin, slow_origin, test_config, Upstream,
};
use std::time::Duration;
use tapedeck::config::AuthConfig;
use tapedeck::tape::{RecordedRequest, RecordedResponse};
use tapedeck::{MatchRule, Recorder, SessionError, Tape, TapeError, TapeMode, TapeOptions, TapeStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_read_write_records_once_then_replays() {
    let upstream = Upstream::start().await;
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(test_config(&dir)).unwrap();

    let tape = recorder.start("status", TapeOptions::default()).await.unwrap();
    let client = proxied_client(recorder.proxy_addr().unwrap());

    let first = client.get(upstream.url("/status")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-tapedeck"], "REC");
    assert_eq!(first.text().await.unwrap(), "/status #1");

    let second = client.get(upstream.url("/status")).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-tapedeck"], "PLAY");
    assert_eq!(second.headers()["x-origin"], "upstream");
    assert_eq!(second.text().await.unwrap(), "/status #1");

    assert_eq!(upstream.hits(), 1);
    assert_eq!(tape.size(), 1);
    assert!(recorder.stop().await.unwrap());
}

#[tokio::test]
async fn test_read_only_miss_never_contacts_upstream() {
    let upstream = Upstream::start().await;
    let dir = TempDir::new().unwrap();

    let store = TapeStore::new(dir.path());
    let tape = Tape::new("readonly", TapeMode::ReadWrite, MatchRule::default());
    tape.record(
        RecordedRequest::new("GET", &upstream.url("/known")),
        RecordedResponse::new(200).with_body("known"),
    )
    .unwrap();
    store.save(&tape).unwrap();

    let recorder = Recorder::new(test_config(&dir)).unwrap();
    recorder
        .start("readonly", TapeOptions::default().with_mode(TapeMode::ReadOnly))
        .await
        .unwrap();
    let client = proxied_client(recorder.proxy_addr().unwrap());

    let hit = client.get(upstream.url("/known")).send().await.unwrap();
    assert_eq!(hit.headers()["x-tapedeck"], "PLAY");
    assert_eq!(hit.text().await.unwrap(), "known");

    let miss = client.get(upstream.url("/unknown")).send().await.unwrap();
    assert_eq!(miss.status(), 502);
    assert_eq!(miss.headers()["x-tapedeck-error"], "no_recorded_interaction");
    let body: serde_json::Value = miss.json().await.unwrap();
    assert_eq!(body["error"], "no_recorded_interaction");

    assert_eq!(upstream.hits(), 0);
    // Nothing new recorded, nothing written
    assert!(!recorder.stop().await.unwrap());
}

#[tokio::test]
async fn test_read_sequential_replays_in_order() {
    let dir = TempDir::new().unwrap();
    let url = "http://sequence.test/next";

    let store = TapeStore::new(dir.path());
    let tape = Tape::new("sequence", TapeMode::WriteSequential, MatchRule::default());
    for body in ["first", "second"] {
        tape.record(
            RecordedRequest::new("GET", url),
            RecordedResponse::new(200).with_body(body),
        )
        .unwrap();
    }
    store.save(&tape).unwrap();

    let recorder = Recorder::new(test_config(&dir)).unwrap();
    recorder
        .start(
            "sequence",
            TapeOptions::default().with_mode(TapeMode::ReadSequential),
        )
        .await
        .unwrap();
    let client = proxied_client(recorder.proxy_addr().unwrap());

    assert_eq!(client.get(url).send().await.unwrap().text().await.unwrap(), "first");
    assert_eq!(client.get(url).send().await.unwrap().text().await.unwrap(), "second");
    let exhausted = client.get(url).send().await.unwrap();
    assert_eq!(exhausted.status(), 502);

    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_recorded_tape_replays_in_new_session() {
    let upstream = Upstream::start().await;
    let dir = TempDir::new().unwrap();

    {
        let recorder = Recorder::new(test_config(&dir)).unwrap();
        recorder.start("persisted", TapeOptions::default()).await.unwrap();
        let client = proxied_client(recorder.proxy_addr().unwrap());
        let response = client
            .post(upstream.url("/items"))
            .body("payload")
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()["x-tapedeck"], "REC");
        assert!(recorder.stop().await.unwrap());
    }
    assert!(dir.path().join("persisted.yaml").exists());
    assert!(!dir.path().join("persisted.yaml.tmp").exists());
    upstream.stop();

    let recorder = Recorder::new(test_config(&dir)).unwrap();
    recorder
        .start("persisted", TapeOptions::default().with_mode(TapeMode::ReadOnly))
        .await
        .unwrap();
    let client = proxied_client(recorder.proxy_addr().unwrap());
    let replayed = client
        .post(upstream.url("/items"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(replayed.headers()["x-tapedeck"], "PLAY");
    assert_eq!(replayed.text().await.unwrap(), "/items #1");
    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_write_only_always_forwards() {
    let upstream = Upstream::start().await;
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(test_config(&dir)).unwrap();
    let tape = recorder
        .start("write", TapeOptions::default().with_mode(TapeMode::WriteOnly))
        .await
        .unwrap();
    let client = proxied_client(recorder.proxy_addr().unwrap());

    for _ in 0..2 {
        let response = client.get(upstream.url("/again")).send().await.unwrap();
        assert_eq!(response.headers()["x-tapedeck"], "REC");
    }
    assert_eq!(upstream.hits(), 2);
    assert_eq!(tape.size(), 2);
    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_tape_is_service_unavailable() {
    let upstream = Upstream::start().await;
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(test_config(&dir)).unwrap();
    let addr = recorder.start_server().await.unwrap();

    let response = proxied_client(addr)
        .get(upstream.url("/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.headers()["x-tapedeck-error"], "no_tape");
    assert_eq!(upstream.hits(), 0);
    recorder.stop_server().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_upstream_records_nothing() {
    let upstream = Upstream::start().await;
    let url = upstream.url("/gone");
    upstream.stop();
    // Let the aborted listener close
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(test_config(&dir)).unwrap();
    let tape = recorder.start("gone", TapeOptions::default()).await.unwrap();

    let response = proxied_client(recorder.proxy_addr().unwrap())
        .get(url)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(response.headers()["x-tapedeck-error"], "upstream_unavailable");
    assert_eq!(tape.size(), 0);
    assert!(!recorder.stop().await.unwrap());
}

#[tokio::test]
async fn test_upstream_timeout_records_nothing() {
    let origin = silent_origin().await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.proxy.timeout_secs = 1;
    let recorder = Recorder::new(config).unwrap();
    let tape = recorder.start("timeout", TapeOptions::default()).await.unwrap();

    let response = proxied_client(recorder.proxy_addr().unwrap())
        .get(format!("http://{origin}/hang"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
    assert_eq!(response.headers()["x-tapedeck-error"], "upstream_timeout");
    assert_eq!(tape.size(), 0);
    assert!(!recorder.stop().await.unwrap());
}

#[tokio::test]
async fn test_stop_saves_recording_in_flight() {
    let origin = slow_origin(Duration::from_millis(500)).await;
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(test_config(&dir)).unwrap();
    recorder.start("inflight", TapeOptions::default()).await.unwrap();

    let client = proxied_client(recorder.proxy_addr().unwrap());
    let pending =
        tokio::spawn(async move { client.get(format!("http://{origin}/slow")).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(recorder.stop().await.unwrap());
    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.headers()["x-tapedeck"], "REC");

    let saved = TapeStore::new(dir.path()).load("inflight").unwrap();
    assert_eq!(saved.size(), 1);
}

#[tokio::test]
async fn test_late_response_after_stop_is_not_reported_as_recorded() {
    let origin = slow_origin(Duration::from_millis(500)).await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.proxy.create_on_startup = false;
    let recorder = Recorder::new(config).unwrap();
    let addr = recorder.start_server().await.unwrap();
    let tape = recorder.start("late", TapeOptions::default()).await.unwrap();

    let client = proxied_client(addr);
    let pending =
        tokio::spawn(async move { client.get(format!("http://{origin}/slow")).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The proxy outlives the session, so the request is still upstream
    assert!(!recorder.stop().await.unwrap());
    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert!(!response.headers().contains_key("x-tapedeck"));
    assert_eq!(tape.size(), 0);
    assert!(!dir.path().join("late.yaml").exists());
    recorder.stop_server().await.unwrap();
}

#[tokio::test]
async fn test_proxy_authentication() {
    let upstream = Upstream::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.proxy.auth = Some(AuthConfig {
        username: "user".to_string(),
        password: "secret".to_string(),
    });
    let recorder = Recorder::new(config).unwrap();
    recorder.start("auth", TapeOptions::default()).await.unwrap();
    let addr = recorder.proxy_addr().unwrap();

    let denied = proxied_client(addr)
        .get(upstream.url("/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 407);
    assert!(denied.headers().contains_key("proxy-authenticate"));

    let client = reqwest::Client::builder()
        .proxy(
            reqwest::Proxy::all(format!("http://{addr}"))
                .unwrap()
                .basic_auth("user", "secret"),
        )
        .build()
        .unwrap();
    let allowed = client.get(upstream.url("/status")).send().await.unwrap();
    assert_eq!(allowed.status(), 200);
    assert_eq!(upstream.hits(), 1);
    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let upstream = Upstream::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.proxy.request_buffer_size = 16;
    let recorder = Recorder::new(config).unwrap();
    recorder.start("limits", TapeOptions::default()).await.unwrap();

    let response = proxied_client(recorder.proxy_addr().unwrap())
        .post(upstream.url("/upload"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    assert_eq!(upstream.hits(), 0);
    recorder.stop().await.unwrap();
}

#[tokio::test]
async fn test_metrics_served_on_proxy_port() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(test_config(&dir)).unwrap();
    let addr = recorder.start_server().await.unwrap();

    // Counted as a no_tape outcome
    let refused = proxied_client(addr)
        .get("http://metrics.test/")
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status(), 503);

    let response = direct_client()
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let text = response.text().await.unwrap();
    assert!(text.contains("tapedeck_requests_total"));
    assert!(text.contains("outcome=\"no_tape\""));
    recorder.stop_server().await.unwrap();
}

#[tokio::test]
async fn test_read_only_session_on_missing_tape_fails() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(test_config(&dir)).unwrap();
    let result = recorder
        .start("absent", TapeOptions::default().with_mode(TapeMode::ReadOnly))
        .await;
    assert!(matches!(
        result,
        Err(SessionError::Tape(TapeError::TapeNotFound(_)))
    ));
    assert!(!recorder.is_running());
}
