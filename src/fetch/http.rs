use crate::config::UserAgentConfig;
use crate::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::proxy::ProxyEndpoint;
use async_trait::async_trait;
use reqwest::{header, redirect::Policy, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::trace;

/// Builds an HTTP client, optionally routed through a proxy
///
/// Redirects are followed up to 10 hops; the per-request timeout is set on
/// each request.
pub fn build_http_client(
    user_agent: &str,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// reqwest-backed fetcher with one client per proxy endpoint
pub struct HttpFetcher {
    user_agent: String,
    clients: Mutex<HashMap<Option<ProxyEndpoint>, Client>>,
}

impl HttpFetcher {
    pub fn new(user_agent: &UserAgentConfig) -> Self {
        Self {
            user_agent: user_agent.header_value(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, FetchError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let key = proxy.cloned();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.user_agent, proxy)
            .map_err(|e| FetchError::Request(e.to_string()))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        let client = self.client_for(request.proxy)?;
        let mut builder = client.get(request.url.clone()).timeout(request.timeout);

        if let Some(session) = request.session {
            for (name, value) in &session.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(cookie) = session.cookie_header() {
                builder = builder.header(header::COOKIE, cookie);
            }
        }

        let response = builder.send().await.map_err(classify_error)?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(classify_error)?;
        trace!("GET {} -> {} ({} bytes)", request.url, status, body.len());

        Ok(FetchResponse {
            status,
            final_url,
            headers,
            body,
        })
    }
}

fn classify_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_connect() {
        FetchError::Connect(error.to_string())
    } else if error.is_builder() {
        FetchError::Request(error.to_string())
    } else {
        FetchError::Network(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        let ua = UserAgentConfig::default().header_value();
        assert!(build_http_client(&ua, None).is_ok());

        let proxy = ProxyEndpoint::new("socks5://127.0.0.1:1080");
        assert!(build_http_client(&ua, Some(&proxy)).is_ok());
    }

    #[test]
    fn test_invalid_proxy_is_request_error() {
        let fetcher = HttpFetcher::new(&UserAgentConfig::default());
        let proxy = ProxyEndpoint::new("not a proxy url");
        assert!(matches!(
            fetcher.client_for(Some(&proxy)),
            Err(FetchError::Request(_))
        ));
    }

    #[test]
    fn test_clients_cached_per_proxy() {
        let fetcher = HttpFetcher::new(&UserAgentConfig::default());
        let proxy = ProxyEndpoint::new("http://127.0.0.1:3128");

        fetcher.client_for(None).unwrap();
        fetcher.client_for(Some(&proxy)).unwrap();
        fetcher.client_for(Some(&proxy)).unwrap();

        assert_eq!(fetcher.clients.lock().unwrap().len(), 2);
    }
}
