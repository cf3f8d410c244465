//! # System Catalog Bootstrap
//!
//! The decoder cannot ask the server what a table looks like, and the
//! catalogs that would tell it are themselves heap files. The way out is
//! that three relations keep fixed OIDs as their file names on every
//! supported server version:
//!
//! ```text
//! global/1262            pg_database   (cluster-wide)
//! base/<db_oid>/1259     pg_class
//! base/<db_oid>/1249     pg_attribute
//! global/1260            pg_authid     (cluster-wide)
//! ```
//!
//! Their schemas are shipped here as hard-coded column vectors, so the
//! generic row decoder can read them without any self-description.
//!
//! ## pg_attribute Version Drift
//!
//! PostgreSQL 16 removed `attstattarget` from the fixed-width prefix of
//! `pg_attribute`. When no version hint is available the layout is probed:
//! the first five rows are decoded with the v16 schema, and if their
//! `attnum` values read back as the sequence 1..=5 the layout is accepted,
//! otherwise the v15 layout is used. No real catalog starts with anything
//! but its own leading attributes, so the probe is decisive in practice.

pub mod authid;
pub mod dropped;

pub use authid::{parse_pg_authid, AuthInfo, PG_AUTHID_OID};
pub use dropped::{
    dropped_column_schema, find_dropped_columns, parse_all_attributes, recover_dropped_column,
    scan_dropped_columns, DroppedColumnData, DroppedColumnInfo, DroppedColumnsReport,
};

use crate::heap::{read_rows, Column};
use crate::types::{self, Row};
use hashbrown::HashMap;
use serde::Serialize;

/// Relfilenode of `pg_database` under `global/`.
pub const PG_DATABASE_OID: u32 = 1262;
/// Relfilenode of `pg_class` under `base/<db_oid>/`.
pub const PG_CLASS_OID: u32 = 1259;
/// Relfilenode of `pg_attribute` under `base/<db_oid>/`.
pub const PG_ATTRIBUTE_OID: u32 = 1249;

/// A database known to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    pub oid: u32,
    pub name: String,
}

/// A relation from `pg_class`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub oid: u32,
    pub name: String,
    pub filenode: u32,
    pub kind: String,
}

/// A column from `pg_attribute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttrInfo {
    pub name: String,
    pub type_oid: u32,
    pub attnum: i32,
    pub len: i32,
    #[serde(skip)]
    pub align: u8,
}

pub(crate) fn col(name: &str, type_oid: u32, len: i32) -> Column {
    Column::new(name, type_oid, len)
}

pub(crate) fn pg_database_schema() -> Vec<Column> {
    vec![col("oid", types::OID_OID, 4), col("datname", types::OID_NAME, 64)]
}

pub(crate) fn pg_class_schema() -> Vec<Column> {
    vec![
        col("oid", types::OID_OID, 4),
        col("relname", types::OID_NAME, 64),
        col("relnamespace", types::OID_OID, 4),
        col("reltype", types::OID_OID, 4),
        col("reloftype", types::OID_OID, 4),
        col("relowner", types::OID_OID, 4),
        col("relam", types::OID_OID, 4),
        col("relfilenode", types::OID_OID, 4),
        col("reltablespace", types::OID_OID, 4),
        col("relpages", types::OID_INT4, 4),
        col("reltuples", types::OID_FLOAT4, 4),
        col("relallvisible", types::OID_INT4, 4),
        col("reltoastrelid", types::OID_OID, 4),
        col("relhasindex", types::OID_BOOL, 1),
        col("relisshared", types::OID_BOOL, 1),
        col("relpersistence", types::OID_CHAR, 1),
        col("relkind", types::OID_CHAR, 1),
    ]
}

pub(crate) fn pg_attribute_schema_v15() -> Vec<Column> {
    vec![
        col("attrelid", types::OID_OID, 4),
        col("attname", types::OID_NAME, 64),
        col("atttypid", types::OID_OID, 4),
        col("attstattarget", types::OID_INT4, 4),
        col("attlen", types::OID_INT2, 2),
        col("attnum", types::OID_INT2, 2),
    ]
}

pub(crate) fn pg_attribute_schema_v16() -> Vec<Column> {
    vec![
        col("attrelid", types::OID_OID, 4),
        col("attname", types::OID_NAME, 64),
        col("atttypid", types::OID_OID, 4),
        col("attlen", types::OID_INT2, 2),
        col("attnum", types::OID_INT2, 2),
    ]
}

/// Extracts the database list from a `pg_database` heap.
pub fn parse_pg_database(data: &[u8]) -> Vec<DatabaseInfo> {
    let schema = pg_database_schema();
    read_rows(data, &schema, true)
        .into_iter()
        .filter_map(|row| {
            let oid = row.get_u32("oid");
            let name = row.get_str("datname").to_string();
            (oid > 0 && !name.is_empty()).then_some(DatabaseInfo { oid, name })
        })
        .collect()
}

/// Extracts relations from a `pg_class` heap, keyed by relfilenode.
pub fn parse_pg_class(data: &[u8]) -> HashMap<u32, TableInfo> {
    let schema = pg_class_schema();
    let mut tables = HashMap::new();
    for row in read_rows(data, &schema, true) {
        let filenode = row.get_u32("relfilenode");
        if filenode == 0 {
            continue;
        }
        tables.insert(
            filenode,
            TableInfo {
                oid: row.get_u32("oid"),
                name: row.get_str("relname").to_string(),
                filenode,
                kind: row.get_str("relkind").to_string(),
            },
        );
    }
    tables
}

/// Extracts columns from a `pg_attribute` heap, keyed by owning relation
/// OID and sorted by attnum. `version_hint` of 0 probes the layout.
pub fn parse_pg_attribute(data: &[u8], version_hint: u32) -> HashMap<u32, Vec<AttrInfo>> {
    let schema = detect_attr_schema(data, version_hint);
    let mut result: HashMap<u32, Vec<AttrInfo>> = HashMap::new();

    for row in read_rows(data, &schema, true) {
        let relid = row.get_u32("attrelid");
        let attnum = row.get_i32("attnum");
        if relid == 0 || attnum <= 0 {
            continue;
        }
        result.entry(relid).or_default().push(AttrInfo {
            name: row.get_str("attname").to_string(),
            type_oid: row.get_u32("atttypid"),
            attnum,
            len: row.get_i32("attlen"),
            align: 0,
        });
    }

    for attrs in result.values_mut() {
        attrs.sort_by_key(|a| a.attnum);
    }
    result
}

fn detect_attr_schema(data: &[u8], version_hint: u32) -> Vec<Column> {
    if version_hint >= 16 {
        return pg_attribute_schema_v16();
    }
    if version_hint >= 12 {
        return pg_attribute_schema_v15();
    }

    let probe = pg_attribute_schema_v16();
    let rows = read_rows(data, &probe, true);
    if rows.len() >= 5 && attnum_sequence_ok(&rows) {
        return probe;
    }
    pg_attribute_schema_v15()
}

fn attnum_sequence_ok(rows: &[Row]) -> bool {
    rows.iter()
        .take(5)
        .enumerate()
        .all(|(i, row)| row.get_i32("attnum") == i as i32 + 1)
}

/// Converts catalog attributes into decoder columns for a table.
pub fn attrs_to_columns(attrs: &[AttrInfo]) -> Vec<Column> {
    attrs
        .iter()
        .map(|a| Column {
            name: a.name.clone(),
            type_oid: a.type_oid,
            len: a.len,
            attnum: a.attnum,
            align: a.align,
        })
        .collect()
}
