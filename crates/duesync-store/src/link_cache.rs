//! `LinkCache`: persistent invoice-key → DUE-number mapping.
//!
//! A distinct contract implemented entirely over `Store`'s link table; it
//! owns no state of its own.

use crate::{Store, StoreResult};
use chrono::Utc;
use duesync_core::{DueNumber, InvoiceKey};

#[derive(Clone)]
pub struct LinkCache {
    store: Store,
}

impl LinkCache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn contains(&self, invoice_key: &InvoiceKey) -> StoreResult<bool> {
        Ok(self.store.get_link(invoice_key.clone()).await?.is_some())
    }

    pub async fn get(&self, invoice_key: &InvoiceKey) -> StoreResult<Option<DueNumber>> {
        self.store.get_link(invoice_key.clone()).await
    }

    pub async fn put(&self, invoice_key: InvoiceKey, due_number: DueNumber) -> StoreResult<()> {
        self.bulk_put(due_number, vec![invoice_key]).await
    }

    /// Links every key in `invoice_keys` to `due_number` in one write.
    /// Used by the discovery pipeline to flush accumulated associations in
    /// batches, even when the DUE bodies behind them were unchanged.
    pub async fn bulk_put(&self, due_number: DueNumber, invoice_keys: Vec<InvoiceKey>) -> StoreResult<()> {
        self.store
            .scoped(move |conn| crate::queries::upsert_links(conn, &due_number, &invoice_keys, Utc::now()))
            .await
    }
}
