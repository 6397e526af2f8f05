use crate::config::types::{
    AuthConfig, Config, JobConfig, OutputConfig, ProxyConfig, RobotsConfig, UserAgentConfig,
};
use crate::url::UrlKey;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_user_agent_config(&config.user_agent)?;
    validate_seeds(&config.job.seeds)?;
    validate_job_config(&config.job.settings)?;
    validate_proxy_config(&config.proxy)?;
    validate_robots_config(&config.robots)?;
    validate_auth_config(&config.auth, config.job.settings.auth_required)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Parses and normalizes start URLs
///
/// A job needs at least one seed, and every seed must be an absolute http(s)
/// URL with a host.
pub fn validate_seeds(seeds: &[String]) -> Result<Vec<UrlKey>, ConfigError> {
    if seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one start URL is required".to_string(),
        ));
    }

    seeds
        .iter()
        .map(|seed| {
            UrlKey::parse(seed)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", seed, e)))
        })
        .collect()
}

/// Validates per-job settings
pub fn validate_job_config(config: &JobConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    if config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be <= 20, got {}",
            config.max_attempts
        )));
    }

    if config.request_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_ms must be >= 100ms, got {}ms",
            config.request_timeout_ms
        )));
    }

    if config.per_host_concurrency == Some(0) {
        return Err(ConfigError::Validation(
            "per_host_concurrency must be >= 1 when set".to_string(),
        ));
    }

    if config.retry_max_delay_ms < config.retry_base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry_max_delay_ms ({}) must be >= retry_base_delay_ms ({})",
            config.retry_max_delay_ms, config.retry_base_delay_ms
        )));
    }

    if !(0.0..=1.0).contains(&config.max_error_rate) {
        return Err(ConfigError::Validation(format!(
            "max_error_rate must be between 0.0 and 1.0, got {}",
            config.max_error_rate
        )));
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    for ext in &config.exclude_extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            return Err(ConfigError::Validation(format!(
                "exclude_extensions entries must look like '.pdf', got '{}'",
                ext
            )));
        }
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Doubles as the robots.txt product token, so keep it to token characters
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            config.crawler_name
        )));
    }

    if config.crawler_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crawler_version cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if let Some(api_url) = &config.api_url {
        let url = Url::parse(api_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid proxy api_url '{}': {}", api_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Proxy api_url '{}' must use http or https",
                api_url
            )));
        }
    }

    for endpoint in &config.endpoints {
        let url = Url::parse(endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid proxy endpoint '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ConfigError::Validation(format!(
                "Proxy endpoint '{}' must use http, https, socks5 or socks5h",
                endpoint
            )));
        }
    }

    if config.max_concurrency_per_proxy < 1 {
        return Err(ConfigError::Validation(
            "max_concurrency_per_proxy must be >= 1".to_string(),
        ));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    if config.max_cooldown_ms < config.base_cooldown_ms {
        return Err(ConfigError::Validation(format!(
            "max_cooldown_ms ({}) must be >= base_cooldown_ms ({})",
            config.max_cooldown_ms, config.base_cooldown_ms
        )));
    }

    if !(config.health_decay > 0.0 && config.health_decay <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "health_decay must be in (0.0, 1.0], got {}",
            config.health_decay
        )));
    }

    if config.rate_limit_requests > 0 && config.rate_limit_window_ms == 0 {
        return Err(ConfigError::Validation(
            "rate_limit_window_ms must be > 0 when rate_limit_requests is set".to_string(),
        ));
    }

    Ok(())
}

fn validate_robots_config(config: &RobotsConfig) -> Result<(), ConfigError> {
    if config.ttl_secs == 0 {
        return Err(ConfigError::Validation("robots ttl_secs must be > 0".to_string()));
    }
    Ok(())
}

fn validate_auth_config(config: &AuthConfig, required: bool) -> Result<(), ConfigError> {
    if config.cookie.is_some() && config.token.is_some() {
        return Err(ConfigError::Validation(
            "auth accepts either cookie or token, not both".to_string(),
        ));
    }

    if required && config.cookie.is_none() && config.token.is_none() {
        return Err(ConfigError::Validation(
            "auth-required is set but neither cookie nor token is configured".to_string(),
        ));
    }

    for pattern in &config.hosts {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.checkpoint_path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_path cannot be empty".to_string(),
        ));
    }

    if config.records_path.is_empty() {
        return Err(ConfigError::Validation(
            "records_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a host pattern; a leading "*." matches any subdomain
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is not a valid host name",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}
