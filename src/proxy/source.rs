use crate::fetch::{FetchError, FetchRequest, Fetcher};
use crate::proxy::{ProxyEndpoint, ProxyPool};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Timeout for one proxy list request
pub const PROXY_API_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxySourceError {
    #[error("invalid proxy api url '{0}'")]
    InvalidUrl(String),

    #[error("proxy api request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("proxy api answered HTTP {0}")]
    Status(u16),
}

/// Parses a proxy list body: one address per line
///
/// Blank lines and `#` comments are skipped. Bare `host:port` entries are
/// taken to be HTTP proxies.
pub fn parse_proxy_list(body: &str) -> Vec<ProxyEndpoint> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let candidate = if line.contains("://") {
                line.to_string()
            } else {
                format!("http://{}", line)
            };
            match Url::parse(&candidate) {
                Ok(url) if url.host_str().is_some() => Some(ProxyEndpoint::new(candidate)),
                _ => {
                    debug!("Skipping malformed proxy entry '{}'", line);
                    None
                }
            }
        })
        .collect()
}

/// Fetches the proxy list from `api_url` and adds every new entry to `pool`
///
/// The request goes out directly, never through the pool it is filling.
///
/// # Arguments
///
/// * `fetcher` - Performs the request
/// * `api_url` - Endpoint answering with proxy addresses as text
/// * `pool` - Receives the addresses
///
/// # Returns
///
/// The number of endpoints that were not already in the pool.
pub async fn refresh_from_api(
    fetcher: &dyn Fetcher,
    api_url: &str,
    pool: &ProxyPool,
) -> Result<usize, ProxySourceError> {
    let url = Url::parse(api_url).map_err(|_| ProxySourceError::InvalidUrl(api_url.to_string()))?;

    let response = fetcher
        .fetch(FetchRequest {
            url: &url,
            proxy: None,
            session: None,
            timeout: PROXY_API_TIMEOUT,
        })
        .await?;

    if !response.is_success() {
        return Err(ProxySourceError::Status(response.status));
    }

    let endpoints = parse_proxy_list(&response.body);
    let fetched = endpoints.len();
    let added = endpoints
        .into_iter()
        .filter(|endpoint| pool.add(endpoint.clone()))
        .count();

    info!("Proxy api returned {} endpoints ({} new)", fetched, added);
    Ok(added)
}
