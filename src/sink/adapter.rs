use crate::frontier::{Admission, Candidate, Frontier, FrontierItem};
use crate::job::JobCounters;
use crate::parse::Record;
use crate::sink::RecordSink;
use crate::url::UrlKey;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// How a page's discovered links fared at the frontier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkAdmission {
    pub admitted: usize,
    pub duplicates: usize,
    pub filtered: usize,
    /// Links that do not normalize to a crawlable URL
    pub invalid: usize,
}

/// Routes parser output: records to the sink, links to the frontier
///
/// One adapter lives for one run of a job. Emitting never blocks the worker.
pub struct ResultSinkAdapter {
    tx: Mutex<Option<mpsc::UnboundedSender<Record>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<JobCounters>,
}

impl ResultSinkAdapter {
    /// Starts the background task that feeds `sink`
    pub fn spawn(sink: Arc<dyn RecordSink>, counters: Arc<JobCounters>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Record>();
        let drain_counters = Arc::clone(&counters);

        let drain = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match sink.emit(record).await {
                    Ok(()) => drain_counters.record_emit(true),
                    Err(e) => {
                        warn!("Failed to export record: {}", e);
                        drain_counters.record_emit(false);
                    }
                }
            }
            if let Err(e) = sink.flush().await {
                warn!("Failed to flush record sink: {}", e);
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            drain: Mutex::new(Some(drain)),
            counters,
        }
    }

    pub fn emit(&self, record: Record) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let sent = match tx {
            Some(tx) => tx.send(record).is_ok(),
            None => false,
        };
        if !sent {
            warn!("Record sink already shut down, dropping record");
            self.counters.record_emit(false);
        }
    }

    /// Offers each link to the frontier as a child of `parent`
    pub fn admit_links(
        &self,
        frontier: &Frontier,
        parent: &FrontierItem,
        links: &[String],
    ) -> LinkAdmission {
        let mut summary = LinkAdmission::default();

        for link in links {
            let key = match UrlKey::parse(link) {
                Ok(key) => key,
                Err(e) => {
                    trace!("Dropping link {}: {}", link, e);
                    summary.invalid += 1;
                    continue;
                }
            };

            let admission = frontier.enqueue(Candidate::discovered(key, parent));
            self.counters.record_admission(&admission);
            match admission {
                Admission::Admitted => summary.admitted += 1,
                Admission::Duplicate => summary.duplicates += 1,
                Admission::Filtered(_) => summary.filtered += 1,
                Admission::Closed => {}
            }
        }

        summary
    }

    /// Closes the channel and waits for queued records to reach the sink
    pub async fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let drain = self.drain.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(drain) = drain {
            if let Err(e) = drain.await {
                warn!("Record sink task ended abnormally: {}", e);
            }
        }
    }
}
