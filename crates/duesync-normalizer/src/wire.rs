//! Upstream JSON shapes, deserialized defensively: every field the upstream
//! documents but never populates (`event.details`, `event.reason`,
//! `item.exporter.name`) is simply absent from these structs, so serde
//! silently drops it rather than it leaking into normalized output.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DuePrincipalJson {
    pub number: String,
    #[serde(default)]
    pub situacao: Option<String>,
    #[serde(default, rename = "dataDeRegistro")]
    pub data_de_registro: Option<DateTime<FixedOffset>>,
    /// The upstream's sole reliable "something changed" signal. Not
    /// always populated by every payload the system has
    /// observed in practice, hence the fallback in `normalize`.
    #[serde(default, rename = "dataUltimaAtualizacao")]
    pub data_ultima_atualizacao: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub itens: Vec<ItemJson>,
    #[serde(default, rename = "eventHistory")]
    pub event_history: Vec<EventJson>,
}

#[derive(Debug, Deserialize)]
pub struct ItemJson {
    #[serde(default)]
    pub ncm: Option<String>,
    #[serde(default, rename = "descricaoMercadoria")]
    pub descricao_mercadoria: Option<String>,
    #[serde(default, rename = "valorDeclarado")]
    pub valor_declarado: Option<serde_json::Value>,
    #[serde(default)]
    pub exportador: Option<ExporterJson>,
    #[serde(default)]
    pub atributos: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub importacoes: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub transformacoes: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, rename = "enquadramentosTributarios")]
    pub enquadramentos_tributarios: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub notas: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub destinacoes: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, rename = "tratamentosAdministrativos")]
    pub tratamentos_administrativos: Vec<TreatmentJson>,
}

#[derive(Debug, Deserialize)]
pub struct TreatmentJson {
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub orgaos: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ExporterJson {
    #[serde(default, rename = "tipoDocumento")]
    pub tipo_documento: Option<String>,
    #[serde(default, rename = "numeroDocumento")]
    pub numero_documento: Option<String>,
    // Deliberately no `name` field: the upstream documents
    // `item.exporter.name` but never populates it, so it must never appear
    // in normalized output even if a payload somehow carried it.
}

#[derive(Debug, Deserialize)]
pub struct EventJson {
    pub timestamp: DateTime<FixedOffset>,
    pub event: String,
    pub responsible: String,
    #[serde(default, rename = "additionalInfo")]
    pub additional_info: Option<String>,
    // No `details`/`reason`: eventHistory rows carry only these four
    // fields.
}

/// A bonded concessionary act or fiscal requirement auxiliary payload.
/// These auxiliary documents share one shape: a list of free-form records
/// to be replaced wholesale for the DUE.
#[derive(Debug, Deserialize)]
pub struct AuxiliaryPayload {
    #[serde(default)]
    pub atos: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionProbeJson {
    pub number: String,
    #[serde(default)]
    pub situacao: Option<String>,
    #[serde(default, rename = "dataUltimaAtualizacao")]
    pub data_ultima_atualizacao: Option<DateTime<FixedOffset>>,
    #[serde(default, rename = "dataDeRegistro")]
    pub data_de_registro: Option<DateTime<FixedOffset>>,
}

impl RevisionProbeJson {
    pub fn remote_revision(&self) -> Option<DateTime<FixedOffset>> {
        self.data_ultima_atualizacao.or(self.data_de_registro)
    }
}
