//! End-to-end pipeline tests against a mocked upstream and a real Postgres
//! instance, covering the discover-new and refresh-existing flows.
//!
//! Gated on `TEST_DATABASE_URL`, same as `duesync-store`'s own integration
//! tests: skips with a message rather than failing when unset.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use duesync_config::FeatureFlags;
use duesync_core::{DueNumber, SituationPartitions};
use duesync_http::HttpClient;
use duesync_pipelines::{cancellation_pair, DiscoveryPipeline, RefreshPipeline};
use duesync_ratelimit::RateGate;
use duesync_store::{PoolConfig, Store};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("tests/migrations");

async fn test_store() -> Option<Store> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = Store::connect(&url, PoolConfig::default()).expect("connect to test database");
    store
        .scoped(|conn| {
            conn.run_pending_migrations(MIGRATIONS)
                .map(|_| ())
                .map_err(|e| duesync_store::StoreError::Connection(e.to_string()))
        })
        .await
        .expect("run test migrations");
    Some(store)
}

async fn truncate_all(store: &Store) {
    store
        .scoped(|conn| {
            sql_query("TRUNCATE nfe_sap, due_principal, due_itens, due_eventos_historico, due_child_rows, nf_due_vinculo")
                .execute(conn)
                .map(|_| ())
                .map_err(duesync_store::StoreError::from)
        })
        .await
        .expect("truncate fixture tables");
}

async fn seed_unlinked_invoice(store: &Store, invoice_key: String) {
    store
        .scoped(move |conn| {
            sql_query("INSERT INTO nfe_sap (invoice_key) VALUES ($1)")
                .bind::<diesel::sql_types::Text, _>(invoice_key)
                .execute(conn)
                .map(|_| ())
                .map_err(duesync_store::StoreError::from)
        })
        .await
        .expect("seed fixture row");
}

async fn test_http(server: &MockServer) -> HttpClient {
    let token_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"access_token": "tok", "expires_in": 3600})),
        )
        .mount(&token_server)
        .await;
    let token_authority = duesync_auth::TokenAuthority::new(
        reqwest::Client::new(),
        format!("{}/token", token_server.uri()),
        "id",
        "secret",
        Duration::from_secs(3600),
        Duration::from_secs(300),
        Duration::from_secs(0),
    );
    let gate = RateGate::with_clock(1000, Arc::new(duesync_ratelimit::SystemClock));
    HttpClient::new(reqwest::Client::new(), gate, token_authority, chrono_tz::America::Sao_Paulo)
}

#[tokio::test]
async fn discovery_links_and_persists_a_newly_found_due() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;
    seed_unlinked_invoice(&store, "2".repeat(44)).await;

    let server = MockServer::start().await;
    let invoice_key = "2".repeat(44);
    Mock::given(method("GET"))
        .and(path(format!("/vinculos/{invoice_key}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["24BR0000000099"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/due/24BR0000000099"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": "24BR0000000099",
            "situacao": "ANALISE",
            "itens": [],
        })))
        .mount(&server)
        .await;

    let http = test_http(&server).await;
    let pipeline = DiscoveryPipeline::new(http, store.clone(), server.uri(), FeatureFlags::default(), 4, None);
    let (_token, observer) = cancellation_pair();
    let summary = pipeline.run(observer).await.unwrap();

    assert_eq!(summary.successes, 1);
    let due_number = DueNumber::new("24BR0000000099").unwrap();
    let revision = store.get_due_revision(due_number.clone()).await.unwrap();
    assert_eq!(revision.unwrap().situation.as_deref(), Some("ANALISE"));
    assert_eq!(
        store.get_link(duesync_core::InvoiceKey::new(invoice_key).unwrap()).await.unwrap(),
        Some(due_number)
    );
}

#[tokio::test]
async fn discovery_finds_no_due_for_an_invoice_and_records_no_error() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;
    let invoice_key = "1".repeat(44);
    seed_unlinked_invoice(&store, invoice_key.clone()).await;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/vinculos/{invoice_key}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let http = test_http(&server).await;
    let pipeline = DiscoveryPipeline::new(http, store.clone(), server.uri(), FeatureFlags::default(), 4, None);
    let (_token, observer) = cancellation_pair();
    let summary = pipeline.run(observer).await.unwrap();

    assert_eq!(summary.successes, 0);
    assert_eq!(summary.skips, 1);
    assert_eq!(store.get_link(duesync_core::InvoiceKey::new(invoice_key).unwrap()).await.unwrap(), None);
}

#[tokio::test]
async fn discovery_is_a_noop_when_no_invoice_lacks_a_due() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;

    let server = MockServer::start().await;
    let http = test_http(&server).await;
    let pipeline = DiscoveryPipeline::new(http, store, server.uri(), FeatureFlags::default(), 4, None);
    let (_token, observer) = cancellation_pair();
    let summary = pipeline.run(observer).await.unwrap();

    assert_eq!(summary.successes, 0);
    assert_eq!(summary.skips, 0);
}

#[tokio::test]
async fn refresh_marks_synced_without_a_full_fetch_when_the_probed_revision_is_unchanged() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;

    let due_number = DueNumber::new("24BR0000000050").unwrap();
    let principal = serde_json::json!({
        "number": "24BR0000000050",
        "situacao": "AVERBADA",
        "dataUltimaAtualizacao": "2024-05-01T09:00:00-03:00",
        "itens": [],
    });
    let batch = duesync_normalizer::Normalizer::normalize(&due_number, &principal, None, None, None).unwrap();
    store.persist_due_batch(batch, Vec::new(), Utc::now()).await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/due/24BR0000000050"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": "24BR0000000050",
            "situacao": "AVERBADA",
            "dataUltimaAtualizacao": "2024-05-01T09:00:00-03:00",
        })))
        .mount(&server)
        .await;

    let http = test_http(&server).await;
    let situations = SituationPartitions::new(
        vec!["CANCELADA".into()],
        vec!["ANALISE".into()],
        vec!["AVERBADA".into()],
    );
    let pipeline = RefreshPipeline::new(http, store.clone(), server.uri(), FeatureFlags::default(), 4, None, situations, 0);
    let (_token, observer) = cancellation_pair();
    let summary = pipeline.run(observer).await.unwrap();

    assert_eq!(summary.successes, 1);
    // Exactly one GET: the probe. A revision match never triggers a second,
    // full-fetch GET against the same endpoint.
    let requests = server.received_requests().await.unwrap();
    let principal_gets = requests.iter().filter(|r| r.url.path() == "/due/24BR0000000050").count();
    assert_eq!(principal_gets, 1);
}

#[tokio::test]
async fn refresh_full_fetches_when_the_probed_revision_has_advanced() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;

    let due_number = DueNumber::new("24BR0000000051").unwrap();
    let principal = serde_json::json!({
        "number": "24BR0000000051",
        "situacao": "AVERBADA",
        "dataUltimaAtualizacao": "2024-05-01T09:00:00-03:00",
        "itens": [],
    });
    let batch = duesync_normalizer::Normalizer::normalize(&due_number, &principal, None, None, None).unwrap();
    store.persist_due_batch(batch, Vec::new(), Utc::now()).await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/due/24BR0000000051"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": "24BR0000000051",
            "situacao": "AVERBADA",
            "dataUltimaAtualizacao": "2024-06-15T09:00:00-03:00",
            "itens": [{"ncm": "87654321", "descricaoMercadoria": "coffee", "valorDeclarado": "42.00"}],
        })))
        .mount(&server)
        .await;

    let http = test_http(&server).await;
    let situations = SituationPartitions::new(
        vec!["CANCELADA".into()],
        vec!["ANALISE".into()],
        vec!["AVERBADA".into()],
    );
    let pipeline = RefreshPipeline::new(http, store.clone(), server.uri(), FeatureFlags::default(), 4, None, situations, 0);
    let (_token, observer) = cancellation_pair();
    let summary = pipeline.run(observer).await.unwrap();

    assert_eq!(summary.successes, 1);
    let requests = server.received_requests().await.unwrap();
    let principal_gets = requests.iter().filter(|r| r.url.path() == "/due/24BR0000000051").count();
    assert_eq!(principal_gets, 2, "probe, then a full re-fetch on a changed revision");

    let revision = store.get_due_revision(due_number).await.unwrap().unwrap();
    assert_eq!(
        revision.remote_revision.unwrap(),
        chrono::DateTime::parse_from_rfc3339("2024-06-15T09:00:00-03:00").unwrap().with_timezone(&Utc)
    );
}

#[tokio::test]
async fn a_rate_lock_on_one_due_does_not_abort_the_others_in_the_same_run() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;

    let due_numbers = ["24BR0000000060", "24BR0000000061", "24BR0000000062"];
    let invoice_keys = ["3".repeat(44), "4".repeat(44), "5".repeat(44)];
    for invoice_key in &invoice_keys {
        seed_unlinked_invoice(&store, invoice_key.clone()).await;
    }

    let server = MockServer::start().await;
    for (invoice_key, due_number) in invoice_keys.iter().zip(due_numbers.iter()) {
        Mock::given(method("GET"))
            .and(path(format!("/vinculos/{invoice_key}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([due_number])))
            .mount(&server)
            .await;
    }
    // First two DUEs fetch normally.
    for due_number in &due_numbers[..2] {
        Mock::given(method("GET"))
            .and(path(format!("/due/{due_number}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "number": due_number,
                "situacao": "ANALISE",
                "itens": [],
            })))
            .mount(&server)
            .await;
    }
    // The third is locked out by the upstream.
    Mock::given(method("GET"))
        .and(path(format!("/due/{}", due_numbers[2])))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"error\":\"PUCX-ER1001: limite excedido, liberado após as 23:59:59\"}",
        ))
        .mount(&server)
        .await;

    let http = test_http(&server).await;
    let pipeline = DiscoveryPipeline::new(http, store.clone(), server.uri(), FeatureFlags::default(), 1, None);
    let (_token, observer) = cancellation_pair();
    let summary = pipeline.run(observer).await.unwrap();

    assert_eq!(summary.successes, 2);
    assert_eq!(summary.errors_by_category.get("rate_locked"), Some(&1));
}

#[tokio::test]
async fn cancelling_before_a_refresh_run_starts_fetches_nothing() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;

    for suffix in ["0000000070", "0000000071", "0000000072"] {
        let due_number = DueNumber::new(format!("24BR{suffix}")).unwrap();
        let principal = serde_json::json!({
            "number": due_number.as_str(),
            "situacao": "AVERBADA",
            "dataUltimaAtualizacao": "2024-05-01T09:00:00-03:00",
            "itens": [],
        });
        let batch = duesync_normalizer::Normalizer::normalize(&due_number, &principal, None, None, None).unwrap();
        store.persist_due_batch(batch, Vec::new(), Utc::now() - chrono::Duration::hours(48)).await.unwrap();
    }

    let server = MockServer::start().await;
    // No mocks registered; any call made by the pipeline after cancellation
    // is observed would panic with an unhandled-request error from wiremock.
    let http = test_http(&server).await;
    let situations = SituationPartitions::new(
        vec!["CANCELADA".into()],
        vec!["ANALISE".into()],
        vec!["AVERBADA".into()],
    );
    let pipeline = RefreshPipeline::new(http, store, server.uri(), FeatureFlags::default(), 2, None, situations, 0);
    let (token, observer) = cancellation_pair();
    token.cancel();
    let summary = pipeline.run(observer).await.unwrap();

    assert_eq!(summary.successes, 0);
    assert_eq!(summary.skips, 0);
    assert_eq!(summary.total_errors(), 0);
}

#[tokio::test]
async fn with_overrides_caps_the_per_run_limit_below_the_configured_default() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    truncate_all(&store).await;

    let invoice_keys = ["6".repeat(44), "7".repeat(44), "8".repeat(44)];
    for invoice_key in &invoice_keys {
        seed_unlinked_invoice(&store, invoice_key.clone()).await;
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let http = test_http(&server).await;
    // Built with no per-run cap; the override should limit this invocation
    // to a single invoice without mutating the pipeline it was cloned from.
    let base_pipeline = DiscoveryPipeline::new(http, store, server.uri(), FeatureFlags::default(), 4, None);
    let limited = base_pipeline.with_overrides(Some(1), None);
    let (_token, observer) = cancellation_pair();
    let summary = limited.run(observer).await.unwrap();

    assert_eq!(summary.skips, 1);
}
