//! `Orchestrator`: wires the shared HTTP/store plumbing to the six runnable
//! operations a deployment invokes.

use crate::cancel::CancellationObserver;
use crate::discovery::DiscoveryPipeline;
use crate::error::PipelineError;
use crate::refresh::RefreshPipeline;
use duesync_auth::TokenAuthority;
use duesync_config::Config;
use duesync_core::{DueNumber, RunSummary};
use duesync_http::HttpClient;
use duesync_ratelimit::RateGate;
use duesync_store::{PoolConfig, Store, StoreCounts};
use std::str::FromStr;
use std::time::Duration;

pub struct Orchestrator {
    http: HttpClient,
    store: Store,
    base_url: String,
    discovery: DiscoveryPipeline,
    refresh: RefreshPipeline,
}

impl Orchestrator {
    /// Builds the shared HTTP client and store from configuration, then
    /// assembles both pipelines on top of them: one rate gate, one token
    /// authority, one connection pool, shared across every run.
    pub async fn bootstrap(cfg: Config) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Permanent(format!("failed to build HTTP client: {e}")))?;

        let rate_gate = RateGate::new(cfg.safe_request_limit);
        let token_authority = TokenAuthority::new(
            http_client.clone(),
            format!("{}/token", cfg.upstream_base_url),
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            Duration::from_secs(cfg.token_validity_min * 60),
            Duration::from_secs(cfg.token_safety_margin_min * 60),
            Duration::from_secs(cfg.auth_interval_sec),
        );
        let timezone = chrono_tz::Tz::from_str(&cfg.timezone)
            .map_err(|_| PipelineError::Permanent(format!("unrecognized timezone {}", cfg.timezone)))?;
        let http = HttpClient::new(http_client, rate_gate, token_authority, timezone);

        let pool_config = PoolConfig {
            max_size: cfg.db.pool_max_size,
            ..Default::default()
        };
        let store = Store::connect(&cfg.db.connection_url(), pool_config).map_err(PipelineError::from)?;

        let base_url = cfg.upstream_base_url.clone();
        let discovery = DiscoveryPipeline::new(
            http.clone(),
            store.clone(),
            base_url.clone(),
            cfg.flags,
            cfg.workers,
            cfg.max_discovery_per_run,
        );
        let refresh = RefreshPipeline::new(
            http.clone(),
            store.clone(),
            base_url.clone(),
            cfg.flags,
            cfg.workers,
            cfg.max_refresh_per_run,
            cfg.situations.clone(),
            cfg.staleness_hours,
        );

        Ok(Self {
            http,
            store,
            base_url,
            discovery,
            refresh,
        })
    }

    /// Discover new invoice-to-DUE links and full-fetch each one found
    /// (the `discover-new` command). `limit`/`workers` override the
    /// configured defaults for this invocation only, when given.
    pub async fn discover_new(
        &self,
        limit: Option<u32>,
        workers: Option<usize>,
        cancel: CancellationObserver,
    ) -> Result<RunSummary, PipelineError> {
        self.discovery.with_overrides(limit, workers).run(cancel).await
    }

    /// Re-probe/refresh already-known DUEs (the `refresh-existing` command).
    /// `limit`/`workers` override the configured defaults for this
    /// invocation only, when given.
    pub async fn refresh_existing(
        &self,
        limit: Option<u32>,
        workers: Option<usize>,
        cancel: CancellationObserver,
    ) -> Result<RunSummary, PipelineError> {
        self.refresh.with_overrides(limit, workers).run(cancel).await
    }

    /// Runs `discover-new` followed by `refresh-existing` in one invocation
    /// (the `full` command), summing their summaries.
    pub async fn full(
        &self,
        limit: Option<u32>,
        workers: Option<usize>,
        cancel: CancellationObserver,
    ) -> Result<RunSummary, PipelineError> {
        let mut discovered = self.discovery.with_overrides(limit, workers).run(cancel.clone()).await?;
        let refreshed = self.refresh.with_overrides(limit, workers).run(cancel).await?;
        discovered.merge(refreshed);
        Ok(discovered)
    }

    /// Forces a full re-fetch of exactly one DUE number (the `refresh-one`
    /// command).
    pub async fn refresh_one(&self, due_number: DueNumber, cancel: CancellationObserver) -> Result<(), PipelineError> {
        self.refresh.refresh_one(due_number, cancel).await
    }

    /// Refreshes only the bonded-suspension or bonded-exemption acts
    /// subpayload for a list of DUEs (the `refresh-bonded-acts` command).
    pub async fn refresh_bonded_acts(
        &self,
        due_numbers: Vec<DueNumber>,
        which: BondedActsKind,
        cancel: CancellationObserver,
    ) -> Result<RunSummary, PipelineError> {
        let (table_name, segment) = which.table_and_segment();
        self.refresh
            .refresh_bonded_acts(due_numbers, table_name, segment, cancel)
            .await
    }

    /// Reports stored counts without contacting upstream (the `status` command).
    pub async fn status(&self) -> Result<StoreCounts, PipelineError> {
        self.store.counts().await.map_err(PipelineError::from)
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Which bonded-concessionary-acts subpayload to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondedActsKind {
    Suspension,
    Exemption,
}

impl BondedActsKind {
    fn table_and_segment(self) -> (&'static str, &'static str) {
        match self {
            BondedActsKind::Suspension => ("due_atos_concessorios_suspensao", "atos-concessorios/suspensao"),
            BondedActsKind::Exemption => ("due_atos_concessorios_isencao", "atos-concessorios/isencao"),
        }
    }
}
