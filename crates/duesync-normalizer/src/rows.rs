//! Typed output rows, one struct per destination table.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuePrincipalRow {
    pub due_number: String,
    pub situation: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub remote_revision: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DueItemRow {
    pub due_number: String,
    pub item_index: i32,
    pub ncm: Option<String>,
    pub description: Option<String>,
    pub declared_value: Option<BigDecimal>,
    pub exporter_document_type: Option<String>,
    pub exporter_document_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DueEventRow {
    pub due_number: String,
    pub event_index: i32,
    pub occurred_at: DateTime<Utc>,
    pub event: String,
    pub responsible: String,
    pub additional_info: Option<String>,
}

/// A single untyped child row belonging to one of the pass-through child
/// tables (item sub-collections, bonded acts, fiscal requirements). Their
/// shape is entirely upstream-defined; normalization only attaches the
/// owning `due_number` and a stable ordinal and otherwise replaces the
/// record verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildRow {
    pub due_number: String,
    pub row_index: i32,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// A child row owned by one item rather than directly by the DUE (item
/// attributes, prior imports, transformations, tax treatments, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemChildRow {
    pub due_number: String,
    pub item_index: i32,
    pub row_index: i32,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

pub(crate) fn to_bigdecimal(value: &serde_json::Value) -> Option<BigDecimal> {
    match value {
        serde_json::Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => BigDecimal::from_str(s).ok(),
        _ => None,
    }
}
