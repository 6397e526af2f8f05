mod crawl_tests;
mod resume_tests;

use driftnet::config::{JobConfig, UserAgentConfig};

/// User agent for every test engine
pub fn test_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

/// Job settings with politeness and backoff shrunk for tests
pub fn test_job_config() -> JobConfig {
    JobConfig {
        max_depth: 5,
        workers: 4,
        min_host_delay_ms: 0,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 20,
        request_timeout_ms: 5_000,
        ..JobConfig::default()
    }
}

pub fn html(body: String) -> wiremock::ResponseTemplate {
    wiremock::ResponseTemplate::new(200).set_body_raw(body, "text/html")
}
