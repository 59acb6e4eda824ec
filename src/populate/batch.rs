use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::PopulateError;
use super::client::{PopulationClient, PopulationReceipt};
use super::request::PopulationRequest;

#[derive(Debug)]
pub struct EntryResult {
    pub index: usize,
    pub host: String,
    pub path: String,
    pub outcome: Result<PopulationReceipt, PopulateError>,
}

impl EntryResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-entry results of one batch, in the order the entries were supplied.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<EntryResult>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &EntryResult> {
        self.results.iter().filter(|result| result.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntryResult> {
        self.results.iter().filter(|result| !result.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(EntryResult::is_success)
    }
}

/// Issues one population call per entry. A failing entry never stops the others,
/// and no call is retried.
#[derive(Debug, Clone)]
pub struct BatchDriver {
    client: PopulationClient,
    concurrency: usize,
}

impl BatchDriver {
    pub fn new(client: PopulationClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<I, R>(&self, requests: I) -> BatchReport
    where
        I: IntoIterator<Item = R>,
        R: Into<PopulationRequest>,
    {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<EntryResult>> = Vec::new();
        let mut labels = Vec::new();

        for (index, request) in requests.into_iter().enumerate() {
            let request: PopulationRequest = request.into();
            labels.push((request.host.clone(), request.path.clone()));
            slots.push(None);

            let client = self.client.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = client.send(&request).await;
                EntryResult {
                    index,
                    host: request.host,
                    path: request.path,
                    outcome,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    let index = result.index;
                    slots[index] = Some(result);
                }
                Err(err) => {
                    warn!(error = %err, "population task did not complete");
                }
            }
        }

        let results: Vec<EntryResult> = slots
            .into_iter()
            .zip(labels)
            .enumerate()
            .map(|(index, (slot, (host, path)))| {
                slot.unwrap_or_else(|| EntryResult {
                    index,
                    host,
                    path,
                    outcome: Err(PopulateError::Transport {
                        cause: anyhow::anyhow!("population task aborted before completing"),
                    }),
                })
            })
            .collect();

        let report = BatchReport { results };
        info!(
            total = report.len(),
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            concurrency = self.concurrency,
            "cache population batch complete"
        );
        report
    }
}
