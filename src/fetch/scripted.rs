//! In-memory fetcher for orchestration tests

use crate::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Page {
        status: u16,
        content_type: String,
        body: String,
        headers: Vec<(String, String)>,
    },
    Fail(FetchError),
    /// Never completes
    Hang,
}

impl Scripted {
    pub(crate) fn html(body: &str) -> Self {
        Self::status(200, "text/html; charset=utf-8", body)
    }

    pub(crate) fn text(body: &str) -> Self {
        Self::status(200, "text/plain", body)
    }

    pub(crate) fn status(status: u16, content_type: &str, body: &str) -> Self {
        Self::Page {
            status,
            content_type: content_type.to_string(),
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    pub(crate) fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            Self::Page {
                status,
                content_type,
                body,
                mut headers,
            } => {
                headers.push((name.to_ascii_lowercase(), value.to_string()));
                Self::Page {
                    status,
                    content_type,
                    body,
                    headers,
                }
            }
            other => other,
        }
    }
}

#[derive(Default)]
struct Script {
    /// Played in order; the last entry repeats
    responses: VecDeque<Scripted>,
}

/// Serves scripted responses keyed by full URL; unknown URLs get a 404
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    hits: Mutex<HashMap<String, u32>>,
    proxies: Mutex<Vec<Option<String>>>,
    started: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub(crate) fn route(&self, url: &str, response: Scripted) {
        self.route_sequence(url, vec![response]);
    }

    pub(crate) fn route_sequence(&self, url: &str, responses: Vec<Scripted>) {
        self.scripts.lock().unwrap().insert(
            url.to_string(),
            Script {
                responses: responses.into(),
            },
        );
    }

    pub(crate) fn hits(&self, url: &str) -> u32 {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_hits(&self) -> u32 {
        self.hits.lock().unwrap().values().sum()
    }

    pub(crate) fn proxies_seen(&self) -> Vec<Option<String>> {
        self.proxies.lock().unwrap().clone()
    }

    /// Every request in the order it started, with its start time
    pub(crate) fn requests(&self) -> Vec<(String, Instant)> {
        self.started.lock().unwrap().clone()
    }

    fn next_response(&self, url: &str) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(script) if script.responses.len() > 1 => {
                script.responses.pop_front().unwrap_or(Scripted::Hang)
            }
            Some(script) => script
                .responses
                .front()
                .cloned()
                .unwrap_or(Scripted::Hang),
            None => Scripted::status(404, "text/html", "not found"),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        let url = request.url.as_str().to_string();
        *self.hits.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
        self.started
            .lock()
            .unwrap()
            .push((url.clone(), Instant::now()));
        self.proxies
            .lock()
            .unwrap()
            .push(request.proxy.map(|p| p.as_str().to_string()));

        let response = self.next_response(&url);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match response {
            Scripted::Page {
                status,
                content_type,
                body,
                headers,
            } => {
                let mut headers: HashMap<String, String> = headers.into_iter().collect();
                headers.insert("content-type".to_string(), content_type);
                Ok(FetchResponse {
                    status,
                    final_url: request.url.clone(),
                    headers,
                    body,
                })
            }
            Scripted::Fail(error) => Err(error),
            Scripted::Hang => std::future::pending().await,
        }
    }
}
