//! End-to-end ingestion against a mocked GitHub and a real SQLite file.

use std::sync::Arc;
use std::time::Duration;

use scan_harvester::sources::GitHubSource;
use scan_harvester::store::SqliteStore;
use scan_harvester::{
    HarvesterConfig, IngestionScheduler, ListingError, QueryField, RecordStore, RepoRef,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER: &str = "velancio";
const REPO: &str = "vulnerability_scans";

fn repo() -> RepoRef {
    RepoRef::new(OWNER, REPO)
}

fn config(server: &MockServer) -> HarvesterConfig {
    HarvesterConfig::default()
        .with_api_base_url(server.uri())
        .with_raw_base_url(server.uri())
        .with_retry_delay(Duration::from_millis(10))
}

fn scan_file(scan_id: &str, key: &str, ids: &[&str]) -> Value {
    let records: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "severity": "HIGH",
                "cvss": 8.5,
                "status": "fixed",
                "package_name": "openssl",
                "current_version": "1.1.1t-r0",
                "fixed_version": "1.1.1u-r0",
                "description": "Buffer overflow in OpenSSL",
                "published_date": "2025-01-24T00:00:00Z",
                "link": "https://nvd.nist.gov/vuln/detail/CVE-2024-1234",
                "risk_factors": ["Remote Code Execution", "High CVSS Score", "Public Exploit Available"]
            })
        })
        .collect();

    json!([{
        "scanResults": {
            "scan_id": scan_id,
            "timestamp": "2025-01-28T10:30:00Z",
            "scan_status": "completed",
            "resource_type": "container",
            "resource_name": "payment-processor:1.2.0",
            key: records,
            "summary": {"total_vulnerabilities": ids.len()}
        }
    }])
}

async fn mount_listing(server: &MockServer, entries: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/contents", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(200).set_body_json(entries))
        .mount(server)
        .await;
}

async fn mount_file(server: &MockServer, name: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}/main/{}", OWNER, REPO, name)))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_scan_scenario_with_failing_file() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        json!([
            {"name": "a.json", "type": "file"},
            {"name": "b.json", "type": "file"},
            {"name": "bad.json", "type": "file"},
            {"name": "README.md", "type": "file"},
            {"name": "archive", "type": "dir"},
            {"name": "odd.json", "type": null}
        ]),
    )
    .await;
    mount_file(
        &server,
        "a.json",
        ResponseTemplate::new(200).set_body_json(scan_file(
            "scan-a",
            "vulnerabilities",
            &["CVE-2024-0001", "CVE-2024-0002", "CVE-2024-0003"],
        )),
    )
    .await;
    mount_file(
        &server,
        "b.json",
        ResponseTemplate::new(200).set_body_json(scan_file(
            "scan-b",
            "vulnerabilities",
            &["CVE-2024-0004", "CVE-2024-0005"],
        )),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}/main/bad.json", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("vulns.db")).unwrap());
    let config = config(&server);
    let source = Arc::new(GitHubSource::new(&config).unwrap());
    let scheduler = IngestionScheduler::new(&config, source.clone(), source, store.clone());

    let summary = scheduler.ingest(&repo()).await.unwrap();

    assert_eq!(summary.total_persisted, 5);
    assert_eq!(summary.files_listed, 3);
    assert_eq!(summary.files_failed, 1);
    assert_eq!(store.count().await.unwrap(), 5);
    assert!(store
        .query_by_field(QueryField::SourceFile, "bad.json")
        .await
        .unwrap()
        .is_empty());

    let from_a = store
        .query_by_field(QueryField::ScanId, "scan-a")
        .await
        .unwrap();
    assert_eq!(from_a.len(), 3);
    assert_eq!(from_a[0].id, "CVE-2024-0001");
    assert_eq!(from_a[0].cvss_score, Some(8.5));
    assert_eq!(
        from_a[0].risk_factors,
        vec![
            "Remote Code Execution".to_string(),
            "High CVSS Score".to_string(),
            "Public Exploit Available".to_string(),
        ]
    );
    assert_eq!(from_a[0].scan_time, "2025-01-28T10:30:00Z");
    assert_eq!(from_a[0].resource_name, "payment-processor:1.2.0");
}

#[tokio::test]
async fn test_findings_key_and_retry_recovery() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([{"name": "findings.json", "type": "file"}])).await;

    // First attempt fails, the retry succeeds.
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}/main/findings.json", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_file(
        &server,
        "findings.json",
        ResponseTemplate::new(200).set_body_json(scan_file(
            "scan-f",
            "findings",
            &["GHSA-1", "GHSA-2"],
        )),
    )
    .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let config = config(&server);
    let source = Arc::new(GitHubSource::new(&config).unwrap());
    let scheduler = IngestionScheduler::new(&config, source.clone(), source, store.clone());

    let total = scheduler.ingest_total(&repo()).await.unwrap();

    assert_eq!(total, 2);
    let rows = store
        .query_by_field(QueryField::ScanId, "scan-f")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].source_file, "findings.json");
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let server = MockServer::start().await;
    mount_listing(&server, json!([{"name": "a.json", "type": "file"}])).await;

    let mut first = scan_file("scan-1", "vulnerabilities", &["CVE-2024-1111"]);
    first[0]["scanResults"]["vulnerabilities"][0]["severity"] = json!("MEDIUM");
    let mut second = scan_file("scan-2", "vulnerabilities", &["CVE-2024-1111"]);
    second[0]["scanResults"]["vulnerabilities"][0]["severity"] = json!("LOW");

    Mock::given(method("GET"))
        .and(path(format!("/{}/{}/main/a.json", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(200).set_body_json(first))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_file(
        &server,
        "a.json",
        ResponseTemplate::new(200).set_body_json(second),
    )
    .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let config = config(&server);
    let source = Arc::new(GitHubSource::new(&config).unwrap());
    let scheduler = IngestionScheduler::new(&config, source.clone(), source, store.clone());

    assert_eq!(scheduler.ingest_total(&repo()).await.unwrap(), 1);
    assert_eq!(scheduler.ingest_total(&repo()).await.unwrap(), 1);

    assert_eq!(store.count().await.unwrap(), 1);
    let rows = store
        .query_by_field(QueryField::PackageName, "openssl")
        .await
        .unwrap();
    assert_eq!(rows[0].severity, "MEDIUM");
    assert_eq!(rows[0].scan_id, "scan-1");
}

#[tokio::test]
async fn test_unparseable_and_schema_mismatched_files_contribute_zero() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        json!([
            {"name": "object.json", "type": "file"},
            {"name": "garbage.json", "type": "file"},
            {"name": "nolist.json", "type": "file"}
        ]),
    )
    .await;
    mount_file(
        &server,
        "object.json",
        ResponseTemplate::new(200).set_body_json(json!({"scanResults": {}})),
    )
    .await;
    mount_file(
        &server,
        "garbage.json",
        ResponseTemplate::new(200).set_body_string("{not json"),
    )
    .await;
    mount_file(
        &server,
        "nolist.json",
        ResponseTemplate::new(200).set_body_json(json!([{"scanResults": {"scan_id": "x"}}])),
    )
    .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let config = config(&server);
    let source = Arc::new(GitHubSource::new(&config).unwrap());
    let scheduler = IngestionScheduler::new(&config, source.clone(), source, store.clone());

    let summary = scheduler.ingest(&repo()).await.unwrap();

    assert_eq!(summary.total_persisted, 0);
    assert_eq!(summary.files_failed, 2);
    assert_eq!(summary.files_succeeded, 1);
    assert_eq!(summary.batches_skipped, 1);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_listing_failure_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/contents", OWNER, REPO)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let config = config(&server);
    let source = Arc::new(GitHubSource::new(&config).unwrap());
    let scheduler = IngestionScheduler::new(&config, source.clone(), source, store);

    let err = scheduler.ingest(&repo()).await.unwrap_err();
    assert!(matches!(err, ListingError::Status(404)));
}
