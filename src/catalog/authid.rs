//! # Credential Extraction (`pg_authid`)
//!
//! `global/1260` holds every role in the cluster together with its password
//! hash (`SCRAM-SHA-256$...` or `md5...`) and role flag bits. Like the other
//! bootstrap catalogs it is decoded with a hard-coded schema; the layout has
//! been stable across all supported versions.

use crate::catalog::col;
use crate::heap::{read_rows, Column};
use crate::types;
use serde::Serialize;

/// Relfilenode of `pg_authid` under `global/`.
pub const PG_AUTHID_OID: u32 = 1260;

/// One role with its credential material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthInfo {
    pub oid: u32,
    pub role_name: String,
    /// Password hash as stored; empty when the role has none.
    pub password: String,
    pub superuser: bool,
    pub can_login: bool,
    pub create_role: bool,
    pub create_db: bool,
    pub replication: bool,
    pub bypass_rls: bool,
    pub conn_limit: i32,
    pub valid_until: String,
}

fn pg_authid_schema() -> Vec<Column> {
    vec![
        col("oid", types::OID_OID, 4),
        col("rolname", types::OID_NAME, 64),
        col("rolsuper", types::OID_BOOL, 1),
        col("rolinherit", types::OID_BOOL, 1),
        col("rolcreaterole", types::OID_BOOL, 1),
        col("rolcreatedb", types::OID_BOOL, 1),
        col("rolcanlogin", types::OID_BOOL, 1),
        col("rolreplication", types::OID_BOOL, 1),
        col("rolbypassrls", types::OID_BOOL, 1),
        col("rolconnlimit", types::OID_INT4, 4),
        col("rolpassword", types::OID_TEXT, -1),
        col("rolvaliduntil", types::OID_TIMESTAMPTZ, 8),
    ]
}

/// Extracts all roles from a `pg_authid` heap.
pub fn parse_pg_authid(data: &[u8]) -> Vec<AuthInfo> {
    let schema = pg_authid_schema();
    read_rows(data, &schema, true)
        .into_iter()
        .filter_map(|row| {
            let name = row.get_str("rolname");
            if name.is_empty() {
                return None;
            }
            Some(AuthInfo {
                oid: row.get_u32("oid"),
                role_name: name.to_string(),
                password: row.get_str("rolpassword").to_string(),
                superuser: row.get_bool("rolsuper"),
                can_login: row.get_bool("rolcanlogin"),
                create_role: row.get_bool("rolcreaterole"),
                create_db: row.get_bool("rolcreatedb"),
                replication: row.get_bool("rolreplication"),
                bypass_rls: row.get_bool("rolbypassrls"),
                conn_limit: row.get_i32("rolconnlimit"),
                valid_until: row.get_str("rolvaliduntil").to_string(),
            })
        })
        .collect()
}
