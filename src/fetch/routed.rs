use crate::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::proxy::{ProxyLease, ProxyOutcome, ProxyPool};
use crate::session::Session;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fetches `url` through `lease`, then releases the lease with the outcome
///
/// The fetch is bounded by `timeout` and abandoned if `abort` fires. The lease
/// is released on every path.
pub async fn fetch_with_lease(
    fetcher: &dyn Fetcher,
    pool: &ProxyPool,
    lease: ProxyLease,
    url: &Url,
    session: Option<&Session>,
    timeout: Duration,
    abort: Option<&CancellationToken>,
) -> Result<FetchResponse, FetchError> {
    let endpoint = lease.endpoint().cloned();
    let started = Instant::now();

    let result = {
        let request = FetchRequest {
            url,
            proxy: endpoint.as_ref(),
            session,
            timeout,
        };
        let aborted = async {
            match abort {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = aborted => Err(FetchError::Aborted),
            fetched = tokio::time::timeout(timeout, fetcher.fetch(request)) => {
                fetched.unwrap_or(Err(FetchError::Timeout))
            }
        }
    };

    let outcome = match &result {
        Ok(_) => ProxyOutcome::Success,
        Err(error) => error.proxy_outcome(),
    };
    if let (ProxyOutcome::Success, Some(endpoint)) = (outcome, &endpoint) {
        pool.report(endpoint, started.elapsed());
    }
    pool.release(lease, outcome);

    result
}
