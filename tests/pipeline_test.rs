//! End-to-end pipeline tests: expansion, generation, write-back, dedup,
//! fallback, and failure handling against a mocked WordPress site.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{stub_router, StubBehavior, StubProvider, TestHarness};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use altsmith::config::Config;
use altsmith_common::{AssetId, Error, FailureKind, JobOutcome, RunScope, TriggerSource};
use altsmith_db::queries::{clients, ledger, stats};

fn media_item(id: i64, file: &str) -> serde_json::Value {
    json!({
        "id": id,
        "source_url": format!("https://blog.example.com/wp-content/uploads/{file}"),
        "alt_text": "",
        "title": { "rendered": file },
        "media_type": "image",
        "post": null,
        "modified_gmt": "2026-08-01T10:00:00"
    })
}

/// Mock a site with the given media items on page one and a working
/// write-back endpoint for each.
async fn site_with_media(items: Vec<serde_json::Value>) -> MockServer {
    let server = MockServer::start().await;

    let ids: Vec<i64> = items
        .iter()
        .filter(|i| i["media_type"] == "image")
        .map(|i| i["id"].as_i64().unwrap())
        .collect();

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/media"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/media"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    for id in ids {
        Mock::given(method("POST"))
            .and(path(format!("/wp-json/wp/v2/media/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id })))
            .mount(&server)
            .await;
    }

    server
}

/// Config tuned so failure tests do not sit in retry backoff.
fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.workers = 2;
    config.scheduler.job_retries = 2;
    config.scheduler.retry_base_ms = 1;
    config.scheduler.retry_cap_ms = 10;
    config
}

#[tokio::test]
async fn run_processes_every_image() {
    let site = site_with_media(vec![
        media_item(101, "alps.jpg"),
        media_item(102, "harbor.jpg"),
        media_item(103, "market.jpg"),
        // Non-image attachments are not jobs.
        json!({
            "id": 104,
            "source_url": "https://blog.example.com/wp-content/uploads/clip.mp4",
            "alt_text": "",
            "title": { "rendered": "clip.mp4" },
            "media_type": "video",
            "post": null,
            "modified_gmt": "2026-08-01T10:00:00"
        }),
    ])
    .await;

    let router = stub_router(vec![StubProvider::new("stub", StubBehavior::Succeed)]);
    let harness = TestHarness::with_router(fast_config(), router);
    let client_id = harness.register_client("blog", &site.uri());

    let run = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let run = harness.wait_for_run(run.id, Duration::from_secs(10)).await;

    assert_eq!(run.status.to_string(), "completed");
    assert_eq!(run.total, 3);
    assert_eq!(run.processed, 3);
    assert_eq!(run.failed, 0);
    assert_eq!(run.skipped, 0);

    let conn = harness.conn();
    let (done, failed, skipped) = ledger::outcome_counts(&conn, &client_id).unwrap();
    assert_eq!((done, failed, skipped), (3, 0, 0));

    let client_stats = stats::get_client_stats(&conn, &client_id).unwrap();
    assert_eq!(client_stats.processed, 3);
    assert!(client_stats.last_run_at.is_some());
}

#[tokio::test]
async fn second_run_skips_unchanged_assets() {
    let site = site_with_media(vec![media_item(101, "alps.jpg"), media_item(102, "harbor.jpg")]).await;

    let router = stub_router(vec![StubProvider::new("stub", StubBehavior::Succeed)]);
    let harness = TestHarness::with_router(fast_config(), router);
    let client_id = harness.register_client("blog", &site.uri());

    let first = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let first = harness.wait_for_run(first.id, Duration::from_secs(10)).await;
    assert_eq!(first.processed, 2);

    // Same media, same modified_gmt: nothing is written a second time.
    let second = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Webhook, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let second = harness.wait_for_run(second.id, Duration::from_secs(10)).await;

    assert_eq!(second.status.to_string(), "completed");
    assert_eq!(second.total, 0);
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 2);

    let conn = harness.conn();
    let global = stats::global_stats(&conn).unwrap();
    assert_eq!(global.processed, 2);
    assert_eq!(global.skipped, 2);
}

#[tokio::test]
async fn provider_fallback_credits_the_winner() {
    let site = site_with_media(vec![media_item(101, "alps.jpg")]).await;

    let first = StubProvider::new("stub-a", StubBehavior::FailTransient);
    let second = StubProvider::new("stub-b", StubBehavior::Succeed);
    let first_calls = first.calls.clone();
    let second_calls = second.calls.clone();

    let router = stub_router(vec![first, second]);
    let harness = TestHarness::with_router(fast_config(), router);
    let client_id = harness.register_client("blog", &site.uri());

    let run = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let run = harness.wait_for_run(run.id, Duration::from_secs(10)).await;

    assert_eq!(run.processed, 1);
    assert!(first_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    assert_eq!(second_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let conn = harness.conn();
    let entry = ledger::get_entry(&conn, &client_id, AssetId::new(101))
        .unwrap()
        .unwrap();
    assert_eq!(entry.outcome, Some(JobOutcome::Done));
    assert_eq!(entry.provider.as_deref(), Some("stub-b"));
}

#[tokio::test]
async fn transient_failures_retry_within_budget_then_fail() {
    let site = site_with_media(vec![media_item(101, "alps.jpg")]).await;

    let provider = StubProvider::new("stub", StubBehavior::FailTransient);
    let calls = provider.calls.clone();
    let router = stub_router(vec![provider]);
    let harness = TestHarness::with_router(fast_config(), router);
    let client_id = harness.register_client("blog", &site.uri());

    let run = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let run = harness.wait_for_run(run.id, Duration::from_secs(10)).await;

    // The job fails but the run still completes.
    assert_eq!(run.status.to_string(), "completed");
    assert_eq!(run.failed, 1);
    assert_eq!(run.processed, 0);

    // job_retries = 2 in fast_config: exactly two generation attempts.
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    let conn = harness.conn();
    let entry = ledger::get_entry(&conn, &client_id, AssetId::new(101))
        .unwrap()
        .unwrap();
    assert_eq!(entry.outcome, Some(JobOutcome::Failed));
    assert_eq!(entry.failure_kind, Some(FailureKind::Transient));
    assert_eq!(entry.attempts, 1);
}

#[tokio::test]
async fn content_failures_do_not_retry() {
    let site = site_with_media(vec![media_item(101, "alps.jpg")]).await;

    let provider = StubProvider::new("stub", StubBehavior::FailContent);
    let calls = provider.calls.clone();
    let router = stub_router(vec![provider]);
    let harness = TestHarness::with_router(fast_config(), router);
    let client_id = harness.register_client("blog", &site.uri());

    let run = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let run = harness.wait_for_run(run.id, Duration::from_secs(10)).await;

    assert_eq!(run.failed, 1);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let conn = harness.conn();
    let entry = ledger::get_entry(&conn, &client_id, AssetId::new(101))
        .unwrap()
        .unwrap();
    assert_eq!(entry.failure_kind, Some(FailureKind::Content));
}

#[tokio::test]
async fn rejected_credentials_revoke_the_client() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/media"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "rest_forbidden",
            "message": "Sorry, you are not allowed to do that."
        })))
        .mount(&site)
        .await;

    let router = stub_router(vec![StubProvider::new("stub", StubBehavior::Succeed)]);
    let harness = TestHarness::with_router(fast_config(), router);
    let client_id = harness.register_client("blog", &site.uri());

    let run = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let run = harness.wait_for_run(run.id, Duration::from_secs(10)).await;

    assert_eq!(run.status.to_string(), "failed");
    assert!(run.error.as_deref().unwrap_or("").contains("credentials"));

    let conn = harness.conn();
    let client = clients::get_client(&conn, &client_id).unwrap();
    assert!(!client.auth_ok);
    drop(conn);

    // Further submissions are refused until re-registration.
    let refused = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Webhook, RunScope::Client(client_id.clone()))
        .await;
    assert_matches!(refused, Err(Error::InvalidInput(_)));

    // Re-registering restores the client.
    harness.register_client("blog", &site.uri());
    let client = clients::get_client(&harness.conn(), &client_id).unwrap();
    assert!(client.auth_ok);
}

#[tokio::test]
async fn overlapping_runs_share_the_worker_pool() {
    let site_a = site_with_media(vec![media_item(101, "alps.jpg"), media_item(102, "harbor.jpg")]).await;
    let site_b = site_with_media(vec![media_item(201, "dunes.jpg"), media_item(202, "forest.jpg")]).await;

    // One worker for the whole process; a slow provider makes any overlap
    // between the two runs observable.
    let provider =
        StubProvider::new("stub", StubBehavior::Succeed).with_latency(Duration::from_millis(30));
    let max_in_flight = provider.max_in_flight.clone();

    let mut config = fast_config();
    config.scheduler.workers = 1;
    let harness = TestHarness::with_router(config, stub_router(vec![provider]));
    let client_a = harness.register_client("blog-a", &site_a.uri());
    let client_b = harness.register_client("blog-b", &site_b.uri());

    let run_a = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_a))
        .await
        .unwrap();
    let run_b = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Webhook, RunScope::Client(client_b))
        .await
        .unwrap();

    let run_a = harness.wait_for_run(run_a.id, Duration::from_secs(10)).await;
    let run_b = harness.wait_for_run(run_b.id, Duration::from_secs(10)).await;

    assert_eq!(run_a.processed, 2);
    assert_eq!(run_b.processed, 2);
    // Concurrent runs never exceed the configured worker count combined.
    assert_eq!(max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn modified_asset_is_readmitted() {
    let site = site_with_media(vec![media_item(101, "alps.jpg")]).await;

    let router = stub_router(vec![StubProvider::new("stub", StubBehavior::Succeed)]);
    let harness = TestHarness::with_router(fast_config(), router);
    let client_id = harness.register_client("blog", &site.uri());

    let first = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Manual, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let first = harness.wait_for_run(first.id, Duration::from_secs(10)).await;
    assert_eq!(first.processed, 1);

    // The image is edited: modified_gmt changes, so the hash changes.
    site.reset().await;
    let mut edited = media_item(101, "alps.jpg");
    edited["modified_gmt"] = json!("2026-08-02T09:30:00");
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/media"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([edited])))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/media"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&site)
        .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wp/v2/media/101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 101 })))
        .mount(&site)
        .await;

    let second = harness
        .ctx
        .scheduler
        .submit(TriggerSource::Webhook, RunScope::Client(client_id.clone()))
        .await
        .unwrap();
    let second = harness.wait_for_run(second.id, Duration::from_secs(10)).await;

    assert_eq!(second.processed, 1);
    assert_eq!(second.skipped, 0);
}
