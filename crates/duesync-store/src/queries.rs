//! Standalone query functions operating on a single `PgConnection`: free
//! functions over a borrowed connection so they compose inside one
//! transaction regardless of which pooled handle supplied it.

use crate::error::StoreResult;
use crate::models::{
    DuePrincipalRecord, LinkRecord, NewChildRow, NewDueEvent, NewDueItem, NewDuePrincipal, NewLink,
};
use crate::schema::{due_child_rows, due_eventos_historico, due_itens, due_principal, nf_due_vinculo, nfe_sap};
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use duesync_core::{DueNumber, InvoiceKey};
use duesync_normalizer::NormalizedBatch;

/// Stored situation/revision for one DUE, as needed by the refresh decision.
#[derive(Debug, Clone)]
pub struct DueRevision {
    pub situation: Option<String>,
    pub remote_revision: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RefreshCandidate {
    pub due_number: DueNumber,
    pub situation: Option<String>,
    pub remote_revision: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreCounts {
    pub due_principal: i64,
    pub links: i64,
    pub unlinked_invoice_keys: i64,
}

pub fn list_unlinked_invoice_keys(
    conn: &mut PgConnection,
    limit: Option<i64>,
) -> StoreResult<Vec<InvoiceKey>> {
    let mut query = nfe_sap::table
        .left_join(nf_due_vinculo::table.on(nf_due_vinculo::invoice_key.eq(nfe_sap::invoice_key)))
        .filter(nf_due_vinculo::invoice_key.nullable().is_null())
        .select(nfe_sap::invoice_key)
        .order(nfe_sap::invoice_key.asc())
        .into_boxed();
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    let raw: Vec<String> = query.load(conn)?;
    Ok(raw
        .into_iter()
        .filter_map(|key| InvoiceKey::new(key).ok())
        .collect())
}

pub fn list_known_links(conn: &mut PgConnection) -> StoreResult<Vec<(InvoiceKey, DueNumber)>> {
    let rows: Vec<LinkRecord> = nf_due_vinculo::table
        .select(LinkRecord::as_select())
        .load(conn)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let key = InvoiceKey::new(row.invoice_key).ok()?;
            let due = DueNumber::new(row.due_number).ok()?;
            Some((key, due))
        })
        .collect())
}

pub fn get_link(conn: &mut PgConnection, invoice_key: &InvoiceKey) -> StoreResult<Option<DueNumber>> {
    let raw: Option<String> = nf_due_vinculo::table
        .filter(nf_due_vinculo::invoice_key.eq(invoice_key.as_str()))
        .select(nf_due_vinculo::due_number)
        .first(conn)
        .optional()?;
    Ok(raw.and_then(|s| DueNumber::new(s).ok()))
}

pub fn get_due_revision(conn: &mut PgConnection, due_number: &DueNumber) -> StoreResult<Option<DueRevision>> {
    let row: Option<DuePrincipalRecord> = due_principal::table
        .filter(due_principal::due_number.eq(due_number.as_str()))
        .select(DuePrincipalRecord::as_select())
        .first(conn)
        .optional()?;
    Ok(row.map(|r| DueRevision {
        situation: r.situation,
        remote_revision: r.remote_revision,
    }))
}

pub fn upsert_due_principal(conn: &mut PgConnection, row: &NewDuePrincipal) -> StoreResult<()> {
    diesel::insert_into(due_principal::table)
        .values(row)
        .on_conflict(due_principal::due_number)
        .do_update()
        .set(row)
        .execute(conn)?;
    Ok(())
}

pub fn replace_due_items(conn: &mut PgConnection, due_number: &DueNumber, rows: &[NewDueItem]) -> StoreResult<()> {
    diesel::delete(due_itens::table.filter(due_itens::due_number.eq(due_number.as_str()))).execute(conn)?;
    if !rows.is_empty() {
        diesel::insert_into(due_itens::table).values(rows).execute(conn)?;
    }
    Ok(())
}

pub fn replace_due_events(
    conn: &mut PgConnection,
    due_number: &DueNumber,
    rows: &[NewDueEvent],
) -> StoreResult<()> {
    diesel::delete(due_eventos_historico::table.filter(due_eventos_historico::due_number.eq(due_number.as_str())))
        .execute(conn)?;
    if !rows.is_empty() {
        diesel::insert_into(due_eventos_historico::table)
            .values(rows)
            .execute(conn)?;
    }
    Ok(())
}

/// Replaces one logical child table's worth of rows: delete-then-insert
/// scoped by due_number.
pub fn replace_child_table(
    conn: &mut PgConnection,
    due_number: &DueNumber,
    table_name: &str,
    rows: &[NewChildRow],
) -> StoreResult<()> {
    diesel::delete(
        due_child_rows::table
            .filter(due_child_rows::due_number.eq(due_number.as_str()))
            .filter(due_child_rows::table_name.eq(table_name)),
    )
    .execute(conn)?;
    if !rows.is_empty() {
        diesel::insert_into(due_child_rows::table).values(rows).execute(conn)?;
    }
    Ok(())
}

pub fn upsert_links(
    conn: &mut PgConnection,
    due_number: &DueNumber,
    invoice_keys: &[InvoiceKey],
    linked_at: DateTime<Utc>,
) -> StoreResult<()> {
    if invoice_keys.is_empty() {
        return Ok(());
    }
    let rows: Vec<NewLink> = invoice_keys
        .iter()
        .map(|key| NewLink {
            invoice_key: key.as_str().to_string(),
            due_number: due_number.as_str().to_string(),
            linked_at,
        })
        .collect();
    diesel::insert_into(nf_due_vinculo::table)
        .values(&rows)
        .on_conflict(nf_due_vinculo::invoice_key)
        .do_update()
        .set((
            nf_due_vinculo::due_number.eq(diesel::upsert::excluded(nf_due_vinculo::due_number)),
            nf_due_vinculo::linked_at.eq(diesel::upsert::excluded(nf_due_vinculo::linked_at)),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_synced(conn: &mut PgConnection, due_number: &DueNumber, now: DateTime<Utc>) -> StoreResult<()> {
    diesel::update(due_principal::table.filter(due_principal::due_number.eq(due_number.as_str())))
        .set(due_principal::last_synced.eq(now))
        .execute(conn)?;
    Ok(())
}

pub fn select_refresh_candidates(
    conn: &mut PgConnection,
    cancelled: &[String],
    pending: &[String],
    stale_before: DateTime<Utc>,
) -> StoreResult<Vec<RefreshCandidate>> {
    let rows: Vec<DuePrincipalRecord> = due_principal::table
        .filter(
            due_principal::situation
                .is_null()
                .or(due_principal::situation.ne_all(cancelled.to_vec())),
        )
        .filter(
            due_principal::situation
                .eq_any(pending.to_vec())
                .or(due_principal::last_synced.is_null())
                .or(due_principal::last_synced.lt(stale_before)),
        )
        .select(DuePrincipalRecord::as_select())
        .load(conn)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let due_number = DueNumber::new(row.due_number).ok()?;
            Some(RefreshCandidate {
                due_number,
                situation: row.situation,
                remote_revision: row.remote_revision,
                last_synced: row.last_synced,
            })
        })
        .collect())
}

pub fn counts(conn: &mut PgConnection) -> StoreResult<StoreCounts> {
    let due_principal_count: i64 = due_principal::table.select(count_star()).first(conn)?;
    let links_count: i64 = nf_due_vinculo::table.select(count_star()).first(conn)?;
    let unlinked_count: i64 = nfe_sap::table
        .left_join(nf_due_vinculo::table.on(nf_due_vinculo::invoice_key.eq(nfe_sap::invoice_key)))
        .filter(nf_due_vinculo::invoice_key.nullable().is_null())
        .select(count_star())
        .first(conn)?;
    Ok(StoreCounts {
        due_principal: due_principal_count,
        links: links_count,
        unlinked_invoice_keys: unlinked_count,
    })
}

/// Writes one fully-normalized DUE batch, the new link rows it resolves,
/// and the `last_synced` stamp, inside one transaction, so no partial DUE
/// is ever visible to a concurrent reader.
pub fn persist_due_batch(
    conn: &mut PgConnection,
    batch: &NormalizedBatch,
    invoice_keys: &[InvoiceKey],
    now: DateTime<Utc>,
) -> StoreResult<()> {
    conn.transaction(|conn| {
        let due_number = DueNumber::new(batch.due_number.clone())
            .map_err(|e| diesel::result::Error::QueryBuilderError(Box::new(e)))?;

        upsert_due_principal(conn, &NewDuePrincipal::from(&batch.principal))?;

        let items: Vec<NewDueItem> = batch.items.iter().map(NewDueItem::from).collect();
        replace_due_items(conn, &due_number, &items)?;

        let events: Vec<NewDueEvent> = batch.events.iter().map(NewDueEvent::from).collect();
        replace_due_events(conn, &due_number, &events)?;

        replace_child_table(
            conn,
            &due_number,
            "due_itens_atributos",
            &to_item_child_rows("due_itens_atributos", &batch.item_attributes),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_itens_importacoes_anteriores",
            &to_item_child_rows("due_itens_importacoes_anteriores", &batch.item_prior_imports),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_itens_transformacoes",
            &to_item_child_rows("due_itens_transformacoes", &batch.item_transformations),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_itens_enquadramentos_tributarios",
            &to_item_child_rows("due_itens_enquadramentos_tributarios", &batch.item_tax_brackets),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_itens_tratamentos_administrativos",
            &to_item_child_rows(
                "due_itens_tratamentos_administrativos",
                &batch.item_tax_treatments,
            ),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_itens_notas",
            &to_item_child_rows("due_itens_notas", &batch.item_notes),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_itens_destinacoes",
            &to_item_child_rows("due_itens_destinacoes", &batch.item_destinations),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_atos_concessorios_suspensao",
            &to_child_rows("due_atos_concessorios_suspensao", &batch.bonded_suspension_acts),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_atos_concessorios_isencao",
            &to_child_rows("due_atos_concessorios_isencao", &batch.bonded_exemption_acts),
        )?;
        replace_child_table(
            conn,
            &due_number,
            "due_exigencias_fiscais",
            &to_child_rows("due_exigencias_fiscais", &batch.fiscal_requirements),
        )?;

        upsert_links(conn, &due_number, invoice_keys, now)?;
        mark_synced(conn, &due_number, now)?;
        Ok(())
    })
}

/// Replaces only the bonded-suspension or bonded-exemption acts table for
/// one DUE, without touching the rest of the record.
pub fn replace_bonded_acts(
    conn: &mut PgConnection,
    due_number: &DueNumber,
    table_name: &str,
    rows: &[duesync_normalizer::ChildRow],
) -> StoreResult<()> {
    replace_child_table(conn, due_number, table_name, &to_child_rows(table_name, rows))
}

fn to_item_child_rows(table_name: &str, rows: &[duesync_normalizer::ItemChildRow]) -> Vec<NewChildRow> {
    rows.iter()
        .map(|row| NewChildRow::from_item_child(table_name, row))
        .collect()
}

fn to_child_rows(table_name: &str, rows: &[duesync_normalizer::ChildRow]) -> Vec<NewChildRow> {
    rows.iter().map(|row| NewChildRow::from_child(table_name, row)).collect()
}
