//! RefreshPipeline: keeps stored DUEs current with minimal upstream traffic.

use crate::cancel::CancellationObserver;
use crate::error::PipelineError;
use crate::fullfetch;
use chrono::{Duration as ChronoDuration, Utc};
use duesync_config::FeatureFlags;
use duesync_core::{DueNumber, Partition, RunSummary, SituationPartitions};
use duesync_http::HttpClient;
use duesync_store::{RefreshCandidate, Store};
use futures_util::stream::{self, StreamExt};

#[derive(Clone)]
pub struct RefreshPipeline {
    http: HttpClient,
    store: Store,
    base_url: String,
    flags: FeatureFlags,
    workers: usize,
    max_per_run: Option<u32>,
    situations: SituationPartitions,
    staleness_hours: i64,
}

impl RefreshPipeline {
    pub fn new(
        http: HttpClient,
        store: Store,
        base_url: String,
        flags: FeatureFlags,
        workers: usize,
        max_per_run: Option<u32>,
        situations: SituationPartitions,
        staleness_hours: i64,
    ) -> Self {
        Self {
            http,
            store,
            base_url,
            flags,
            workers: workers.max(1),
            max_per_run,
            situations,
            staleness_hours,
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
        let stale_before = Utc::now() - ChronoDuration::hours(self.staleness_hours);
        let mut candidates = self
            .store
            .select_refresh_candidates(
                self.situations.cancelled_values().to_vec(),
                self.situations.pending_values().to_vec(),
                stale_before,
            )
            .await?;

        if let Some(max) = self.max_per_run {
            candidates.truncate(max as usize);
        }

        let mut summary = RunSummary::default();

        let results = stream::iter(candidates.into_iter().map(|candidate| {
            let http = self.http.clone();
            let store = self.store.clone();
            let base_url = self.base_url.clone();
            let flags = self.flags;
            let situations = self.situations.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (candidate.due_number, Err(PipelineError::Cancelled));
                }
                let outcome = refresh_one(&http, &store, &base_url, flags, &situations, &candidate, &cancel).await;
                (candidate.due_number, outcome)
            }
        }))
        .buffer_unordered(self.workers);
        tokio::pin!(results);

        while let Some((due_number, result)) = results.next().await {
            match result {
                Ok(()) => summary.record_success(),
                Err(PipelineError::Cancelled) => {}
                Err(err) => {
                    tracing::warn!(due_number = %due_number, error = %err, "refresh: DUE failed");
                    match err.category() {
                        Some(category) => summary.record_error(category),
                        None => return Err(err),
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Forces a full-fetch of one DUE number regardless of its stored
    /// situation or revision (forces a full fetch regardless of whether a
    /// cheaper probe would have sufficed).
    pub async fn refresh_one(&self, due_number: DueNumber, cancel: CancellationObserver) -> Result<(), PipelineError> {
        let batch = fullfetch::fetch_due(&self.http, &self.base_url, self.flags, &due_number, &cancel).await?;
        self.store.persist_due_batch(batch, Vec::new(), Utc::now()).await?;
        Ok(())
    }

    /// Refreshes only the bonded-concessionary-acts subpayload for each DUE
    /// in `due_numbers`, replacing just that table's rows.
    pub async fn refresh_bonded_acts(
        &self,
        due_numbers: Vec<DueNumber>,
        table_name: &'static str,
        segment: &'static str,
        cancel: CancellationObserver,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        let results = stream::iter(due_numbers.into_iter().map(|due_number| {
            let http = self.http.clone();
            let store = self.store.clone();
            let base_url = self.base_url.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (due_number, Err(PipelineError::Cancelled));
                }
                let url = format!("{base_url}/due/{due_number}/{segment}");
                let payload = fullfetch_get(&http, &url).await;
                let outcome = match payload {
                    Ok(value) => {
                        let rows = duesync_normalizer::Normalizer::auxiliary_rows(&due_number, &value)
                            .map_err(PipelineError::from);
                        match rows {
                            Ok(rows) => store
                                .replace_bonded_acts(due_number.clone(), table_name, rows)
                                .await
                                .map_err(PipelineError::from),
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                };
                (due_number, outcome)
            }
        }))
        .buffer_unordered(self.workers);
        tokio::pin!(results);

        while let Some((due_number, result)) = results.next().await {
            match result {
                Ok(()) => summary.record_success(),
                Err(PipelineError::Cancelled) => {}
                Err(err) => {
                    tracing::warn!(due_number = %due_number, error = %err, "refresh-bonded-acts: DUE failed");
                    match err.category() {
                        Some(category) => summary.record_error(category),
                        None => return Err(err),
                    }
                }
            }
        }
        Ok(summary)
    }
}

async fn fullfetch_get(http: &HttpClient, url: &str) -> Result<serde_json::Value, PipelineError> {
    http.do_request(reqwest::Method::GET, url, None)
        .await
        .map_err(PipelineError::from)
}

/// Performs the revision-probe decision for one candidate: probe, compare,
/// and either no-op, full-fetch, or skip-with-a-log.
#[allow(clippy::too_many_arguments)]
async fn refresh_one(
    http: &HttpClient,
    store: &Store,
    base_url: &str,
    flags: FeatureFlags,
    situations: &SituationPartitions,
    candidate: &RefreshCandidate,
    cancel: &CancellationObserver,
) -> Result<(), PipelineError> {
    let situation = candidate.situation.as_deref().unwrap_or("");
    let partition = situations.classify(situation);

    if partition == Partition::Pending {
        let batch = fullfetch::fetch_due(http, base_url, flags, &candidate.due_number, cancel).await?;
        store.persist_due_batch(batch, Vec::new(), Utc::now()).await?;
        return Ok(());
    }

    let probe = fullfetch::probe_revision(http, base_url, &candidate.due_number).await?;
    let probed_revision = probe.remote_revision().map(|dt| dt.with_timezone(&Utc));

    match (probed_revision, candidate.remote_revision) {
        (Some(probed), Some(stored)) if probed == stored => {
            store.mark_synced(candidate.due_number.clone(), Utc::now()).await?;
            Ok(())
        }
        (Some(probed), Some(stored)) if probed < stored => {
            tracing::warn!(
                due_number = %candidate.due_number,
                probed = %probed,
                stored = %stored,
                "refresh: upstream revision older than stored; not overwriting"
            );
            Ok(())
        }
        _ => {
            let batch = fullfetch::fetch_due(http, base_url, flags, &candidate.due_number, cancel).await?;
            store.persist_due_batch(batch, Vec::new(), Utc::now()).await?;
            Ok(())
        }
    }
}
