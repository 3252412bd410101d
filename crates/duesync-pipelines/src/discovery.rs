//! DiscoveryPipeline: finds invoices not yet linked to a DUE.

use crate::cancel::CancellationObserver;
use crate::error::PipelineError;
use crate::fullfetch;
use chrono::Utc;
use duesync_config::FeatureFlags;
use duesync_core::{DueNumber, InvoiceKey, RunSummary};
use duesync_http::HttpClient;
use duesync_store::Store;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;

#[derive(Clone)]
pub struct DiscoveryPipeline {
    http: HttpClient,
    store: Store,
    base_url: String,
    flags: FeatureFlags,
    workers: usize,
    max_per_run: Option<u32>,
}

impl DiscoveryPipeline {
    pub fn new(
        http: HttpClient,
        store: Store,
        base_url: String,
        flags: FeatureFlags,
        workers: usize,
        max_per_run: Option<u32>,
    ) -> Self {
        Self {
            http,
            store,
            base_url,
            flags,
            workers: workers.max(1),
            max_per_run,
        }
    }

    /// Clones this pipeline with `limit`/`workers` overridden where given,
    /// falling back to the values it was built with otherwise — lets a
    /// single CLI invocation override the configured defaults.
    pub fn with_overrides(&self, limit: Option<u32>, workers: Option<usize>) -> Self {
        Self {
            max_per_run: limit.or(self.max_per_run),
            workers: workers.unwrap_or(self.workers).max(1),
            ..self.clone()
        }
    }

    pub async fn run(&self, cancel: CancellationObserver) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();

        let candidates = self
            .store
            .list_unlinked_invoice_keys(self.max_per_run.map(i64::from))
            .await?;
        if candidates.is_empty() {
            return Ok(summary);
        }

        let due_to_keys = self.lookup_phase(candidates, &cancel, &mut summary).await?;
        self.fetch_phase(due_to_keys, &cancel, &mut summary).await?;

        Ok(summary)
    }

    /// Resolves each unlinked invoice key to zero or more DUE numbers,
    /// de-duplicating DUE numbers across the whole run.
    /// An empty lookup result is a legitimate outcome (the invoice has no
    /// DUE yet), recorded as a skip rather than an error.
    async fn lookup_phase(
        &self,
        candidates: Vec<InvoiceKey>,
        cancel: &CancellationObserver,
        summary: &mut RunSummary,
    ) -> Result<HashMap<String, Vec<InvoiceKey>>, PipelineError> {
        let mut due_to_keys: HashMap<String, Vec<InvoiceKey>> = HashMap::new();

        let lookups = stream::iter(candidates.into_iter().map(|key| {
            let http = self.http.clone();
            let base_url = self.base_url.clone();
            async move {
                let result = fullfetch::lookup_due_numbers(&http, &base_url, key.as_str()).await;
                (key, result)
            }
        }))
        .buffer_unordered(self.workers);
        tokio::pin!(lookups);

        while let Some((key, result)) = lookups.next().await {
            if cancel.is_cancelled() {
                break;
            }
            match result {
                Ok(numbers) if numbers.is_empty() => summary.record_skip(),
                Ok(numbers) => {
                    for raw in numbers {
                        // The upstream sometimes returns more than one DUE
                        // number for an invoice; every one is consumed
                        // rather than only the first.
                        if let Ok(due_number) = DueNumber::new(raw) {
                            due_to_keys
                                .entry(due_number.into_inner())
                                .or_default()
                                .push(key.clone());
                        }
                    }
                }
                Err(err) => match err.category() {
                    Some(category) => summary.record_error(category),
                    None => return Err(err),
                },
            }
        }

        Ok(due_to_keys)
    }

    /// Runs the full-fetch protocol and persists each unique DUE number
    /// found during the lookup phase.
    async fn fetch_phase(
        &self,
        due_to_keys: HashMap<String, Vec<InvoiceKey>>,
        cancel: &CancellationObserver,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let fetches = stream::iter(due_to_keys.into_iter().map(|(raw_due_number, keys)| {
            let http = self.http.clone();
            let store = self.store.clone();
            let base_url = self.base_url.clone();
            let flags = self.flags;
            let cancel = cancel.clone();
            async move {
                let due_number = match DueNumber::new(raw_due_number) {
                    Ok(n) => n,
                    Err(_) => return (None, Err(PipelineError::Permanent("invalid DUE number".into()))),
                };
                if cancel.is_cancelled() {
                    return (Some(due_number), Err(PipelineError::Cancelled));
                }

                match fullfetch::fetch_due(&http, &base_url, flags, &due_number, &cancel).await {
                    Ok(batch) => {
                        // persist_due_batch writes the link rows for `keys`
                        // in the same transaction as the DUE itself;
                        // LinkCache is not re-invoked here.
                        let persisted = store
                            .persist_due_batch(batch, keys, Utc::now())
                            .await
                            .map_err(PipelineError::from);
                        (Some(due_number), persisted)
                    }
                    Err(e) => (Some(due_number), Err(e)),
                }
            }
        }))
        .buffer_unordered(self.workers);
        tokio::pin!(fetches);

        while let Some((due_number, result)) = fetches.next().await {
            match result {
                Ok(()) => summary.record_success(),
                Err(PipelineError::Cancelled) => {}
                Err(err) => {
                    tracing::warn!(due_number = ?due_number.map(|d| d.into_inner()), error = %err, "discovery: DUE failed");
                    match err.category() {
                        Some(category) => summary.record_error(category),
                        None => return Err(err),
                    }
                }
            }
        }

        Ok(())
    }
}
