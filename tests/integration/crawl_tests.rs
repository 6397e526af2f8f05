//! End-to-end crawls against a mock HTTP server

use crate::{html, test_job_config, test_user_agent};
use driftnet::config::{JobConfig, ProxyConfig};
use driftnet::sink::{JsonLinesSink, MemorySink};
use driftnet::{Engine, JobStatus, OutcomeStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_follows_in_scope_links_only() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{}/a">A</a>
            <a href="https://other.test/x">Elsewhere</a>
            </body></html>"#,
            base
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html("<html><head><title>A</title></head></html>".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let engine = Engine::builder()
        .user_agent(test_user_agent())
        .sink(sink.clone())
        .build();

    let id = engine
        .submit(&[format!("{}/", base)], test_job_config())
        .expect("submit failed");
    let snapshot = tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .expect("crawl did not finish")
        .expect("job vanished");

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counters.fetched, 2);
    assert_eq!(snapshot.counters.succeeded, 2);
    assert_eq!(snapshot.counters.filtered, 1);

    let titles: Vec<String> = sink
        .records()
        .iter()
        .filter_map(|r| r.data.get("title").and_then(|t| t.as_str()).map(String::from))
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"Home".to_string()));
    assert!(titles.contains(&"A".to_string()));
}

#[tokio::test]
async fn test_robots_txt_respect() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nDisallow: /private\n").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<a href="{0}/private/page">Secret</a><a href="{0}/public">Public</a>"#,
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(html("<p>hello</p>".to_string()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/page"))
        .respond_with(html("<p>secret</p>".to_string()))
        .expect(0)
        .mount(&server)
        .await;

    let engine = Engine::builder().user_agent(test_user_agent()).build();
    let mut outcomes = engine.subscribe_outcomes();

    let id = engine
        .submit(&[format!("{}/", base)], test_job_config())
        .unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counters.succeeded, 2);
    assert_eq!(snapshot.counters.skipped, 1);

    let mut blocked = 0;
    while let Ok(event) = outcomes.try_recv() {
        if event.outcome.status == OutcomeStatus::BlockedByRobots {
            assert!(event.outcome.key.as_str().ends_with("/private/page"));
            blocked += 1;
        }
    }
    assert_eq!(blocked, 1);
}

#[tokio::test]
async fn test_server_errors_retry_up_to_limit() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let engine = Engine::builder().user_agent(test_user_agent()).build();
    let config = JobConfig {
        max_attempts: 2,
        ..test_job_config()
    };

    let id = engine.submit(&[format!("{}/", base)], config).unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counters.failed, 1);
    assert_eq!(snapshot.counters.retried, 2);
    assert_eq!(snapshot.counters.attempts, 3);
}

#[tokio::test]
async fn test_not_found_is_terminal() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(r#"<a href="{}/missing">gone</a>"#, base)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let engine = Engine::builder().user_agent(test_user_agent()).build();
    let id = engine
        .submit(&[format!("{}/", base)], test_job_config())
        .unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.counters.succeeded, 1);
    assert_eq!(snapshot.counters.failed, 1);
    assert_eq!(snapshot.counters.retried, 0);
}

#[tokio::test]
async fn test_non_html_content_is_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(r#"<a href="{}/data">data</a>"#, base)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"a": 1}"#)
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let engine = Engine::builder().user_agent(test_user_agent()).build();
    let id = engine
        .submit(&[format!("{}/", base)], test_job_config())
        .unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counters.succeeded, 1);
    assert_eq!(snapshot.counters.skipped, 1);
    assert_eq!(snapshot.counters.records_emitted, 1);
}

#[tokio::test]
async fn test_records_written_as_json_lines() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();
    let records_path = dir.path().join("out").join("records.jsonl");

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<title>Root</title><a href="{}/leaf">leaf</a>"#,
            base
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/leaf"))
        .respond_with(html("<title>Leaf</title>".to_string()))
        .mount(&server)
        .await;

    let engine = Engine::builder()
        .user_agent(test_user_agent())
        .sink(Arc::new(JsonLinesSink::new(&records_path)))
        .build();
    let id = engine
        .submit(&[format!("{}/", base)], test_job_config())
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .unwrap()
        .unwrap();

    let content = std::fs::read_to_string(&records_path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line["kind"] == "page"));
}

#[tokio::test]
async fn test_depth_one_crawl_stops_at_children() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<a href="{}/a">A</a><a href="https://other.test/b">B</a>"#,
            base
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(format!(r#"<a href="{}/a/b">deeper</a>"#, base)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a/b"))
        .respond_with(html("<p>too deep</p>".to_string()))
        .expect(0)
        .mount(&server)
        .await;

    let engine = Engine::builder().user_agent(test_user_agent()).build();
    let config = JobConfig {
        max_depth: 1,
        same_domain_only: true,
        ..test_job_config()
    };

    let id = engine.submit(&[format!("{}/", base)], config).unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counters.fetched, 2);
    assert_eq!(snapshot.counters.succeeded, 2);
    // other.test is off-domain, /a/b is past the depth limit
    assert_eq!(snapshot.counters.filtered, 2);
    assert_eq!(snapshot.frontier.visited, 2);
}

#[tokio::test]
async fn test_host_spacing_holds_between_requests() {
    let server = MockServer::start().await;
    let base = server.uri();

    let links: String = (1..4)
        .map(|i| format!(r#"<a href="{}/p{}">p</a>"#, base, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(links))
        .expect(1)
        .mount(&server)
        .await;
    for i in 1..4 {
        Mock::given(method("GET"))
            .and(path(format!("/p{}", i)))
            .respond_with(html("<p>leaf</p>".to_string()))
            .expect(1)
            .mount(&server)
            .await;
    }

    let engine = Engine::builder().user_agent(test_user_agent()).build();
    let config = JobConfig {
        respect_robots: false,
        max_attempts: 0,
        min_host_delay_ms: 100,
        ..test_job_config()
    };

    let started = Instant::now();
    let id = engine.submit(&[format!("{}/", base)], config).unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), engine.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counters.succeeded, 4);
    assert_eq!(snapshot.frontier.dispatched, 4);
    // four requests to one host need three full gaps
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_proxy_api_adds_endpoints() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proxy"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  10.0.0.5:3128\n"))
        .expect(1)
        .mount(&api)
        .await;

    let engine = Engine::builder()
        .user_agent(test_user_agent())
        .proxy_config(ProxyConfig {
            endpoints: vec!["http://10.0.0.1:8080".to_string()],
            api_url: Some(format!("{}/proxy", api.uri())),
            ..ProxyConfig::default()
        })
        .build();

    assert_eq!(engine.refresh_proxies().await.unwrap(), 1);
    let endpoints: Vec<String> = engine
        .proxies()
        .snapshot()
        .into_iter()
        .map(|status| status.endpoint.as_str().to_string())
        .collect();
    assert_eq!(endpoints, vec!["http://10.0.0.1:8080", "http://10.0.0.5:3128"]);
}

#[tokio::test]
async fn test_proxy_api_failure_keeps_static_list() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proxy"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&api)
        .await;

    let engine = Engine::builder()
        .user_agent(test_user_agent())
        .proxy_config(ProxyConfig {
            endpoints: vec!["http://10.0.0.1:8080".to_string()],
            api_url: Some(format!("{}/proxy", api.uri())),
            ..ProxyConfig::default()
        })
        .build();

    assert!(engine.refresh_proxies().await.is_err());
    assert_eq!(engine.proxies().len(), 1);
}
