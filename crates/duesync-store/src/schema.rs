//! Diesel table definitions.
//!
//! Only the tables this crate's typed queries actually touch are declared
//! here. DDL management lives outside this system; these `table!` blocks
//! assume the columns already exist with these names and types.

diesel::table! {
    /// External SAP mirror of invoice keys. Populated by a process this
    /// system does not own; read-only from here.
    nfe_sap (invoice_key) {
        invoice_key -> Text,
    }
}

diesel::table! {
    due_principal (due_number) {
        due_number -> Text,
        situation -> Nullable<Text>,
        registered_at -> Nullable<Timestamptz>,
        remote_revision -> Nullable<Timestamptz>,
        last_synced -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    due_itens (due_number, item_index) {
        due_number -> Text,
        item_index -> Int4,
        ncm -> Nullable<Text>,
        description -> Nullable<Text>,
        declared_value -> Nullable<Numeric>,
        exporter_document_type -> Nullable<Text>,
        exporter_document_number -> Nullable<Text>,
    }
}

diesel::table! {
    due_eventos_historico (due_number, event_index) {
        due_number -> Text,
        event_index -> Int4,
        occurred_at -> Timestamptz,
        event -> Text,
        responsible -> Text,
        additional_info -> Nullable<Text>,
    }
}

diesel::table! {
    /// Catch-all for the item-child and auxiliary-document tables whose
    /// exact shape is upstream-defined and not otherwise constrained by
    /// this system (item attributes, prior imports, transformations, tax
    /// treatments, notes, destinations, bonded acts, fiscal requirements).
    /// `table_name` distinguishes the logical table a row belongs to.
    due_child_rows (due_number, table_name, row_index) {
        due_number -> Text,
        table_name -> Text,
        row_index -> Int4,
        item_index -> Nullable<Int4>,
        data -> Jsonb,
    }
}

diesel::table! {
    nf_due_vinculo (invoice_key) {
        invoice_key -> Text,
        due_number -> Text,
        linked_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(nfe_sap, nf_due_vinculo, due_principal);
