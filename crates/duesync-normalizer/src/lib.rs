//! Pure JSON-to-relational normalization.
//!
//! `Normalizer::normalize` takes the principal DUE payload plus whatever
//! auxiliary documents were fetched alongside it and produces a
//! `NormalizedBatch` of typed rows, one collection per destination table.
//! The function performs no I/O and has no side effects: same input,
//! same output, every time — the pipeline crate is the only caller that
//! talks to the store or the wire.

mod rows;
mod wire;

pub use rows::{ChildRow, DueEventRow, DueItemRow, DuePrincipalRow, ItemChildRow};
pub use wire::RevisionProbeJson;

use chrono::{DateTime, Utc};
use duesync_core::DueNumber;
use rows::to_bigdecimal;
use serde_json::Value;
use wire::{AuxiliaryPayload, DuePrincipalJson};

#[derive(Debug, thiserror::Error)]
pub enum NormalizerError {
    #[error("principal payload is not valid: {0}")]
    MalformedPrincipal(#[source] serde_json::Error),
    #[error("auxiliary payload is not valid: {0}")]
    MalformedAuxiliary(#[source] serde_json::Error),
    #[error("principal payload's `number` ({found}) does not match the requested DUE ({expected})")]
    NumberMismatch { expected: String, found: String },
}

/// The full set of rows a single normalization pass produces, grouped by
/// destination table.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub due_number: String,
    pub principal: DuePrincipalRow,
    pub items: Vec<DueItemRow>,
    pub events: Vec<DueEventRow>,
    pub item_attributes: Vec<ItemChildRow>,
    pub item_prior_imports: Vec<ItemChildRow>,
    pub item_transformations: Vec<ItemChildRow>,
    pub item_tax_brackets: Vec<ItemChildRow>,
    pub item_tax_treatments: Vec<ItemChildRow>,
    pub item_notes: Vec<ItemChildRow>,
    pub item_destinations: Vec<ItemChildRow>,
    pub bonded_suspension_acts: Vec<ChildRow>,
    pub bonded_exemption_acts: Vec<ChildRow>,
    pub fiscal_requirements: Vec<ChildRow>,
}

impl NormalizedBatch {
    /// Maps each destination table name to its rows as JSON values, so a
    /// caller that only knows table names (the store's replace-children
    /// routine) can iterate without naming every field type.
    pub fn into_table_map(self) -> std::collections::BTreeMap<&'static str, Vec<Value>> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("due_principal", vec![serde_json::to_value(&self.principal).unwrap()]);
        map.insert("due_itens", to_values(self.items));
        map.insert("due_eventos_historico", to_values(self.events));
        map.insert("due_itens_atributos", to_values(self.item_attributes));
        map.insert("due_itens_importacoes_anteriores", to_values(self.item_prior_imports));
        map.insert("due_itens_transformacoes", to_values(self.item_transformations));
        map.insert(
            "due_itens_enquadramentos_tributarios",
            to_values(self.item_tax_brackets),
        );
        map.insert(
            "due_itens_tratamentos_administrativos",
            to_values(self.item_tax_treatments),
        );
        map.insert("due_itens_notas", to_values(self.item_notes));
        map.insert("due_itens_destinacoes", to_values(self.item_destinations));
        map.insert("due_atos_concessorios_suspensao", to_values(self.bonded_suspension_acts));
        map.insert("due_atos_concessorios_isencao", to_values(self.bonded_exemption_acts));
        map.insert("due_exigencias_fiscais", to_values(self.fiscal_requirements));
        map
    }
}

fn to_values<T: serde::Serialize>(rows: Vec<T>) -> Vec<Value> {
    rows.into_iter()
        .map(|row| serde_json::to_value(&row).expect("row types always serialize"))
        .collect()
}

pub struct Normalizer;

impl Normalizer {
    /// Normalizes one principal DUE payload plus whatever auxiliary
    /// documents the pipeline fetched alongside it (bonded
    /// suspension/exemption acts and fiscal requirements are each
    /// independently feature-flagged and may be absent).
    pub fn normalize(
        due_number: &DueNumber,
        principal_json: &Value,
        bonded_suspension: Option<&Value>,
        bonded_exemption: Option<&Value>,
        fiscal_requirements: Option<&Value>,
    ) -> Result<NormalizedBatch, NormalizerError> {
        let principal: DuePrincipalJson =
            serde_json::from_value(principal_json.clone()).map_err(NormalizerError::MalformedPrincipal)?;

        if principal.number != due_number.as_str() {
            return Err(NormalizerError::NumberMismatch {
                expected: due_number.as_str().to_string(),
                found: principal.number,
            });
        }

        let remote_revision = principal
            .data_ultima_atualizacao
            .or(principal.data_de_registro)
            .map(to_utc);

        let principal_row = DuePrincipalRow {
            due_number: due_number.as_str().to_string(),
            situation: principal.situacao,
            registered_at: principal.data_de_registro.map(to_utc),
            remote_revision,
        };

        let mut items = Vec::with_capacity(principal.itens.len());
        let mut item_attributes = Vec::new();
        let mut item_prior_imports = Vec::new();
        let mut item_transformations = Vec::new();
        let mut item_tax_brackets = Vec::new();
        let mut item_tax_treatments = Vec::new();
        let mut item_notes = Vec::new();
        let mut item_destinations = Vec::new();

        for (item_index, item) in principal.itens.into_iter().enumerate() {
            let item_index = item_index as i32;
            let declared_value = item.valor_declarado.as_ref().and_then(to_bigdecimal);
            let (exporter_document_type, exporter_document_number) = match item.exportador {
                Some(exporter) => (exporter.tipo_documento, exporter.numero_documento),
                None => (None, None),
            };

            items.push(DueItemRow {
                due_number: due_number.as_str().to_string(),
                item_index,
                ncm: item.ncm,
                description: item.descricao_mercadoria,
                declared_value,
                exporter_document_type,
                exporter_document_number,
            });

            extend_item_children(&mut item_attributes, due_number, item_index, item.atributos);
            extend_item_children(&mut item_prior_imports, due_number, item_index, item.importacoes);
            extend_item_children(&mut item_transformations, due_number, item_index, item.transformacoes);
            extend_item_children(
                &mut item_tax_brackets,
                due_number,
                item_index,
                item.enquadramentos_tributarios,
            );
            extend_item_children(&mut item_notes, due_number, item_index, item.notas);
            extend_item_children(&mut item_destinations, due_number, item_index, item.destinacoes);

            for (row_index, treatment) in item.tratamentos_administrativos.into_iter().enumerate() {
                let mut fields = treatment.fields;
                fields.insert(
                    "orgaos".to_string(),
                    Value::Array(treatment.orgaos.into_iter().map(Value::Object).collect()),
                );
                item_tax_treatments.push(ItemChildRow {
                    due_number: due_number.as_str().to_string(),
                    item_index,
                    row_index: row_index as i32,
                    fields,
                });
            }
        }

        let events = principal
            .event_history
            .into_iter()
            .enumerate()
            .map(|(event_index, event)| DueEventRow {
                due_number: due_number.as_str().to_string(),
                event_index: event_index as i32,
                occurred_at: to_utc(event.timestamp),
                event: event.event,
                responsible: event.responsible,
                additional_info: event.additional_info,
            })
            .collect();

        let bonded_suspension_acts = parse_auxiliary(due_number, bonded_suspension)?;
        let bonded_exemption_acts = parse_auxiliary(due_number, bonded_exemption)?;
        let fiscal_requirements = parse_auxiliary(due_number, fiscal_requirements)?;

        Ok(NormalizedBatch {
            due_number: due_number.as_str().to_string(),
            principal: principal_row,
            items,
            events,
            item_attributes,
            item_prior_imports,
            item_transformations,
            item_tax_brackets,
            item_tax_treatments,
            item_notes,
            item_destinations,
            bonded_suspension_acts,
            bonded_exemption_acts,
            fiscal_requirements,
        })
    }

    /// Extracts just the revision signal from a minimal probe payload,
    /// without normalizing the rest — used by the refresh pipeline to
    /// decide whether a full re-fetch is warranted.
    pub fn probe_revision(payload: &Value) -> Result<RevisionProbeJson, NormalizerError> {
        serde_json::from_value(payload.clone()).map_err(NormalizerError::MalformedPrincipal)
    }

    /// Normalizes a single auxiliary document (bonded acts or fiscal
    /// requirements) on its own, without a principal payload alongside it —
    /// used when only that subpayload is being refreshed.
    pub fn auxiliary_rows(due_number: &DueNumber, payload: &Value) -> Result<Vec<ChildRow>, NormalizerError> {
        parse_auxiliary(due_number, Some(payload))
    }
}

fn extend_item_children(
    target: &mut Vec<ItemChildRow>,
    due_number: &DueNumber,
    item_index: i32,
    raw: Vec<serde_json::Map<String, Value>>,
) {
    target.extend(raw.into_iter().enumerate().map(|(row_index, fields)| ItemChildRow {
        due_number: due_number.as_str().to_string(),
        item_index,
        row_index: row_index as i32,
        fields,
    }));
}

fn parse_auxiliary(due_number: &DueNumber, payload: Option<&Value>) -> Result<Vec<ChildRow>, NormalizerError> {
    let Some(payload) = payload else {
        return Ok(Vec::new());
    };
    let parsed: AuxiliaryPayload =
        serde_json::from_value(payload.clone()).map_err(NormalizerError::MalformedAuxiliary)?;
    Ok(parsed
        .atos
        .into_iter()
        .enumerate()
        .map(|(row_index, fields)| ChildRow {
            due_number: due_number.as_str().to_string(),
            row_index: row_index as i32,
            fields,
        })
        .collect())
}

fn to_utc(dt: DateTime<chrono::FixedOffset>) -> DateTime<Utc> {
    dt.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn due() -> DueNumber {
        DueNumber::new("24BR0000000001").unwrap()
    }

    #[test]
    fn normalizing_the_same_payload_twice_produces_identical_output() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "situacao": "REGISTRADA",
            "dataDeRegistro": "2024-03-01T10:00:00-03:00",
            "itens": [{"ncm": "1234.56.78", "valorDeclarado": "100.50"}],
        });

        let first = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        let second = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn minimal_payload_falls_back_to_registration_time_for_remote_revision() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "situacao": "REGISTRADA",
            "dataDeRegistro": "2024-03-01T10:00:00-03:00",
            "itens": [{"ncm": "1234.56.78"}],
            "eventHistory": [{
                "timestamp": "2024-03-01T10:00:00-03:00",
                "event": "REGISTRO",
                "responsible": "SISTEMA",
            }],
        });

        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();

        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        assert_eq!(batch.principal.remote_revision, Some(expected));
        assert_eq!(batch.principal.registered_at, Some(expected));
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].event, "REGISTRO");
    }

    #[test]
    fn data_ultima_atualizacao_takes_precedence_over_registration_time() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "dataDeRegistro": "2024-03-01T10:00:00-03:00",
            "dataUltimaAtualizacao": "2024-03-05T08:30:00-03:00",
        });

        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 11, 30, 0).unwrap();
        assert_eq!(batch.principal.remote_revision, Some(expected));
    }

    #[test]
    fn exporter_name_is_never_populated_even_if_the_upstream_sends_one() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "itens": [{
                "ncm": "1234.56.78",
                "exportador": {
                    "tipoDocumento": "CNPJ",
                    "numeroDocumento": "12345678000199",
                    "name": "Acme Exports Ltda",
                },
            }],
        });

        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        assert_eq!(batch.items[0].exporter_document_type.as_deref(), Some("CNPJ"));
        // `ExporterJson` has no `name` field, so it's dropped during
        // deserialization regardless of what the upstream sent.
        assert_eq!(
            serde_json::to_value(&batch.items[0]).unwrap().get("name"),
            None
        );
    }

    #[test]
    fn event_details_and_reason_are_never_populated() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "eventHistory": [{
                "timestamp": "2024-03-01T10:00:00-03:00",
                "event": "AVERBACAO",
                "responsible": "RFB",
                "details": "should be dropped",
                "reason": "should also be dropped",
            }],
        });

        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        let value = serde_json::to_value(&batch.events[0]).unwrap();
        assert_eq!(value.get("details"), None);
        assert_eq!(value.get("reason"), None);
    }

    #[test]
    fn missing_optional_scalars_normalize_to_null_and_missing_arrays_to_empty() {
        let payload = serde_json::json!({ "number": "24BR0000000001" });
        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();

        assert_eq!(batch.principal.situation, None);
        assert_eq!(batch.principal.registered_at, None);
        assert!(batch.items.is_empty());
        assert!(batch.events.is_empty());
    }

    #[test]
    fn declared_value_is_decimal_not_floating_point() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "itens": [{"valorDeclarado": "12345678901234.56"}],
        });

        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        let value = batch.items[0].declared_value.as_ref().unwrap();
        assert_eq!(value.to_string(), "12345678901234.56");
    }

    #[test]
    fn number_mismatch_is_rejected() {
        let payload = serde_json::json!({ "number": "24BR0000000002" });
        let err = Normalizer::normalize(&due(), &payload, None, None, None).unwrap_err();
        assert!(matches!(err, NormalizerError::NumberMismatch { .. }));
    }

    #[test]
    fn item_tax_brackets_are_normalized_into_their_own_child_rows() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "itens": [{
                "ncm": "1234.56.78",
                "enquadramentosTributarios": [
                    {"codigo": "IN-001", "valor": "10.00"},
                    {"codigo": "IN-002", "valor": "5.00"},
                ],
            }],
        });

        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        assert_eq!(batch.item_tax_brackets.len(), 2);
        assert_eq!(batch.item_tax_brackets[0].item_index, 0);
        assert_eq!(
            batch.item_tax_brackets[1].fields.get("codigo").and_then(|v| v.as_str()),
            Some("IN-002")
        );
        assert!(batch.into_table_map()["due_itens_enquadramentos_tributarios"].len() == 2);
    }

    #[test]
    fn auxiliary_payloads_are_attached_and_replaced_wholesale() {
        let payload = serde_json::json!({ "number": "24BR0000000001" });
        let suspension = serde_json::json!({ "atos": [{"numero": "AC-1"}, {"numero": "AC-2"}] });

        let batch =
            Normalizer::normalize(&due(), &payload, Some(&suspension), None, None).unwrap();
        assert_eq!(batch.bonded_suspension_acts.len(), 2);
        assert!(batch.bonded_exemption_acts.is_empty());
        assert!(batch.fiscal_requirements.is_empty());
    }

    #[test]
    fn into_table_map_names_every_destination_table() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "itens": [{"ncm": "1234.56.78"}],
        });
        let batch = Normalizer::normalize(&due(), &payload, None, None, None).unwrap();
        let map = batch.into_table_map();

        for table in [
            "due_principal",
            "due_itens",
            "due_eventos_historico",
            "due_itens_atributos",
            "due_itens_enquadramentos_tributarios",
            "due_atos_concessorios_suspensao",
            "due_exigencias_fiscais",
        ] {
            assert!(map.contains_key(table), "missing table {table}");
        }
        assert_eq!(map["due_principal"].len(), 1);
        assert_eq!(map["due_itens"].len(), 1);
    }

    #[test]
    fn probe_revision_reads_the_minimal_fields_only() {
        let payload = serde_json::json!({
            "number": "24BR0000000001",
            "situacao": "AVERBADA",
            "dataDeRegistro": "2024-03-01T10:00:00-03:00",
        });
        let probe = Normalizer::probe_revision(&payload).unwrap();
        assert_eq!(probe.number, "24BR0000000001");
        assert!(probe.remote_revision().is_some());
    }
}
