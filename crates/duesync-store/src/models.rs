use crate::schema::{due_child_rows, due_eventos_historico, due_itens, due_principal, nf_due_vinculo};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use duesync_normalizer::{ChildRow, DueEventRow, DueItemRow, DuePrincipalRow, ItemChildRow};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = due_principal)]
pub struct DuePrincipalRecord {
    pub due_number: String,
    pub situation: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub remote_revision: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = due_principal)]
pub struct NewDuePrincipal {
    pub due_number: String,
    pub situation: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub remote_revision: Option<DateTime<Utc>>,
}

impl From<&DuePrincipalRow> for NewDuePrincipal {
    fn from(row: &DuePrincipalRow) -> Self {
        Self {
            due_number: row.due_number.clone(),
            situation: row.situation.clone(),
            registered_at: row.registered_at,
            remote_revision: row.remote_revision,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = due_itens)]
pub struct NewDueItem {
    pub due_number: String,
    pub item_index: i32,
    pub ncm: Option<String>,
    pub description: Option<String>,
    pub declared_value: Option<BigDecimal>,
    pub exporter_document_type: Option<String>,
    pub exporter_document_number: Option<String>,
}

impl From<&DueItemRow> for NewDueItem {
    fn from(row: &DueItemRow) -> Self {
        Self {
            due_number: row.due_number.clone(),
            item_index: row.item_index,
            ncm: row.ncm.clone(),
            description: row.description.clone(),
            declared_value: row.declared_value.clone(),
            exporter_document_type: row.exporter_document_type.clone(),
            exporter_document_number: row.exporter_document_number.clone(),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = due_eventos_historico)]
pub struct NewDueEvent {
    pub due_number: String,
    pub event_index: i32,
    pub occurred_at: DateTime<Utc>,
    pub event: String,
    pub responsible: String,
    pub additional_info: Option<String>,
}

impl From<&DueEventRow> for NewDueEvent {
    fn from(row: &DueEventRow) -> Self {
        Self {
            due_number: row.due_number.clone(),
            event_index: row.event_index,
            occurred_at: row.occurred_at,
            event: row.event.clone(),
            responsible: row.responsible.clone(),
            additional_info: row.additional_info.clone(),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = due_child_rows)]
pub struct NewChildRow {
    pub due_number: String,
    pub table_name: String,
    pub row_index: i32,
    pub item_index: Option<i32>,
    pub data: serde_json::Value,
}

impl NewChildRow {
    pub fn from_child(table_name: &str, row: &ChildRow) -> Self {
        Self {
            due_number: row.due_number.clone(),
            table_name: table_name.to_string(),
            row_index: row.row_index,
            item_index: None,
            data: serde_json::Value::Object(row.fields.clone()),
        }
    }

    pub fn from_item_child(table_name: &str, row: &ItemChildRow) -> Self {
        Self {
            due_number: row.due_number.clone(),
            table_name: table_name.to_string(),
            row_index: row.row_index,
            item_index: Some(row.item_index),
            data: serde_json::Value::Object(row.fields.clone()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = nf_due_vinculo)]
pub struct LinkRecord {
    pub invoice_key: String,
    pub due_number: String,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = nf_due_vinculo)]
pub struct NewLink {
    pub invoice_key: String,
    pub due_number: String,
    pub linked_at: DateTime<Utc>,
}
