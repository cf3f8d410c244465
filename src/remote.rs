//! # Remote Facade
//!
//! A stateless-looking client over any `path -> bytes` reader: a local
//! directory, an HTTP endpoint with directory traversal, an arbitrary
//! file-read primitive, a backup archive. Paths are relative to the data
//! directory root (`PG_VERSION`, `global/1262`, `base/16384/1259`, ...).
//!
//! The client memoizes the database list and each database's catalogs
//! after first use; entries are never invalidated during a run. The caches
//! sit behind `RwLock`s so a shared client stays consistent, but remote
//! reads themselves are not deduplicated across racing threads.

use crate::catalog::{
    attrs_to_columns, parse_pg_attribute, parse_pg_authid, parse_pg_class, parse_pg_database,
    AttrInfo, AuthInfo, DatabaseInfo, TableInfo, PG_ATTRIBUTE_OID, PG_AUTHID_OID, PG_CLASS_OID,
    PG_DATABASE_OID,
};
use crate::control::{parse_control_file, ControlFile};
use crate::dump::{ColumnInfo, DatabaseDump, DumpResult, TableDump};
use crate::heap::read_rows;
use crate::types::{type_name, Row};
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Reads one file of the data directory by relative path.
pub type RemoteReader = Box<dyn Fn(&str) -> Result<Vec<u8>> + Send + Sync>;

/// Row-query options: optional column projection and row cap.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub columns: Vec<String>,
    pub limit: usize,
}

/// Lightweight cluster overview.
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<String>,
    pub databases: BTreeMap<String, Vec<String>>,
}

#[derive(Default)]
struct CatalogCache {
    databases: Option<Vec<DatabaseInfo>>,
    tables: HashMap<u32, HashMap<u32, TableInfo>>,
    columns: HashMap<u32, HashMap<u32, Vec<AttrInfo>>>,
}

/// High-level client for exploring a cluster through a path reader.
pub struct RemoteClient {
    reader: RemoteReader,
    version: u32,
    cache: RwLock<CatalogCache>,
}

impl RemoteClient {
    pub fn new(reader: RemoteReader) -> Self {
        let version = reader("PG_VERSION")
            .ok()
            .and_then(|data| String::from_utf8(data).ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);

        Self {
            reader,
            version,
            cache: RwLock::new(CatalogCache::default()),
        }
    }

    /// Contents of `PG_VERSION`, trimmed.
    pub fn version(&self) -> String {
        (self.reader)("PG_VERSION")
            .ok()
            .map(|data| String::from_utf8_lossy(&data).trim().to_string())
            .unwrap_or_default()
    }

    /// Parsed `global/pg_control`, when readable.
    pub fn control(&self) -> Option<ControlFile> {
        let data = (self.reader)("global/pg_control").ok()?;
        parse_control_file(&data).ok()
    }

    /// All roles from `pg_authid`.
    pub fn credentials(&self) -> Vec<AuthInfo> {
        match (self.reader)(&format!("global/{PG_AUTHID_OID}")) {
            Ok(data) => parse_pg_authid(&data),
            Err(_) => Vec::new(),
        }
    }

    /// The cluster's databases (cached after the first read).
    pub fn databases(&self) -> Vec<DatabaseInfo> {
        if let Some(dbs) = &self.cache.read().databases {
            return dbs.clone();
        }
        let dbs = match (self.reader)(&format!("global/{PG_DATABASE_OID}")) {
            Ok(data) => parse_pg_database(&data),
            Err(_) => Vec::new(),
        };
        self.cache.write().databases = Some(dbs.clone());
        dbs
    }

    /// Finds a database by name (case-insensitive).
    pub fn database(&self, name: &str) -> Option<DatabaseInfo> {
        self.databases()
            .into_iter()
            .find(|db| db.name.eq_ignore_ascii_case(name))
    }

    fn load_catalog(&self, db_oid: u32) {
        if self.cache.read().tables.contains_key(&db_oid) {
            return;
        }

        let tables = (self.reader)(&format!("base/{db_oid}/{PG_CLASS_OID}"))
            .map(|data| parse_pg_class(&data))
            .unwrap_or_default();
        let columns = (self.reader)(&format!("base/{db_oid}/{PG_ATTRIBUTE_OID}"))
            .map(|data| parse_pg_attribute(&data, self.version))
            .unwrap_or_default();

        let mut cache = self.cache.write();
        cache.tables.insert(db_oid, tables);
        cache.columns.insert(db_oid, columns);
    }

    /// All tables of a database.
    pub fn tables(&self, db_oid: u32) -> Vec<TableInfo> {
        self.load_catalog(db_oid);
        self.cache
            .read()
            .tables
            .get(&db_oid)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Tables of a database found by name.
    pub fn tables_by_name(&self, db_name: &str) -> Vec<TableInfo> {
        match self.database(db_name) {
            Some(db) => self.tables(db.oid),
            None => Vec::new(),
        }
    }

    /// Finds a table by name (case-insensitive).
    pub fn table(&self, db_oid: u32, table_name: &str) -> Option<TableInfo> {
        self.tables(db_oid)
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(table_name))
    }

    /// Columns of a table, by relation OID.
    pub fn columns(&self, db_oid: u32, table_oid: u32) -> Vec<AttrInfo> {
        self.load_catalog(db_oid);
        self.cache
            .read()
            .columns
            .get(&db_oid)
            .and_then(|m| m.get(&table_oid))
            .cloned()
            .unwrap_or_default()
    }

    /// Decodes a table's rows with optional projection and limit.
    pub fn query(&self, db_oid: u32, table: &TableInfo, opts: &QueryOptions) -> Vec<Row> {
        if table.filenode == 0 {
            return Vec::new();
        }
        let Ok(data) = (self.reader)(&format!("base/{db_oid}/{}", table.filenode)) else {
            return Vec::new();
        };

        let attrs = self.columns(db_oid, table.oid);
        let columns = attrs_to_columns(&attrs);
        let mut rows = read_rows(&data, &columns, true);

        if !opts.columns.is_empty() {
            rows = rows
                .into_iter()
                .map(|row| {
                    let mut projected = Row::with_capacity(opts.columns.len());
                    for name in &opts.columns {
                        if let Some(value) = row.get(name) {
                            projected.push(name.clone(), value.clone());
                        }
                    }
                    projected
                })
                .collect();
        }
        if opts.limit > 0 && rows.len() > opts.limit {
            rows.truncate(opts.limit);
        }
        rows
    }

    /// Query by database and table name.
    pub fn query_by_name(&self, db_name: &str, table_name: &str, opts: &QueryOptions) -> Vec<Row> {
        let Some(db) = self.database(db_name) else {
            return Vec::new();
        };
        let Some(table) = self.table(db.oid, table_name) else {
            return Vec::new();
        };
        self.query(db.oid, &table, opts)
    }

    /// Full dump of one table.
    pub fn dump_table(&self, db_oid: u32, table: &TableInfo) -> TableDump {
        let rows = self.query(db_oid, table, &QueryOptions::default());
        let columns = self
            .columns(db_oid, table.oid)
            .iter()
            .map(|a| ColumnInfo {
                name: a.name.clone(),
                type_name: type_name(a.type_oid),
                type_oid: a.type_oid,
            })
            .collect();

        TableDump {
            oid: table.oid,
            name: table.name.clone(),
            filenode: table.filenode,
            kind: table.kind.clone(),
            columns,
            row_count: rows.len(),
            rows,
            ..TableDump::default()
        }
    }

    /// Dump of every user table in a database.
    pub fn dump_database(&self, db_oid: u32) -> Option<DatabaseDump> {
        let db = self.databases().into_iter().find(|db| db.oid == db_oid)?;

        let mut dump = DatabaseDump {
            oid: db_oid,
            name: db.name,
            tables: Vec::new(),
        };
        let mut tables = self.tables(db_oid);
        tables.sort_by_key(|t| t.filenode);
        for table in tables {
            if table.name.starts_with("pg_") || table.name.starts_with("sql_") {
                continue;
            }
            if table.kind != "r" && !table.kind.is_empty() {
                continue;
            }
            let td = self.dump_table(db_oid, &table);
            if !td.rows.is_empty() {
                dump.tables.push(td);
            }
        }
        Some(dump)
    }

    pub fn dump_database_by_name(&self, name: &str) -> Option<DatabaseDump> {
        let db = self.database(name)?;
        self.dump_database(db.oid)
    }

    /// Dump of every non-template database.
    pub fn dump_all(&self) -> DumpResult {
        let mut result = DumpResult::default();
        for db in self.databases() {
            if db.name.starts_with("template") {
                continue;
            }
            if let Some(dump) = self.dump_database(db.oid) {
                result.databases.push(dump);
            }
        }
        result
    }

    /// Version, credentials and table inventory at a glance.
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            version: self.version(),
            ..Summary::default()
        };

        for cred in self.credentials() {
            if !cred.password.is_empty() {
                summary
                    .credentials
                    .push(format!("{}:{}", cred.role_name, cred.password));
            }
        }

        for db in self.databases() {
            if db.name.starts_with("template") {
                continue;
            }
            let tables: Vec<String> = self
                .tables(db.oid)
                .into_iter()
                .filter(|t| !t.name.starts_with("pg_") && !t.name.starts_with("sql_"))
                .map(|t| t.name)
                .collect();
            summary.databases.insert(db.name, tables);
        }
        summary
    }

    /// String-command dispatcher for embedding in shells and exploit
    /// tooling: `summary`, `creds`, `dbs`, `control`, `version`,
    /// `tables <db>`, `columns <db> <table>`, `query <db> <table>`,
    /// `dump [db]`.
    pub fn exec(&self, args: &[&str]) -> serde_json::Value {
        match args {
            [] | ["summary", ..] => serde_json::to_value(self.summary()).unwrap_or_default(),
            ["creds" | "credentials", ..] => {
                serde_json::to_value(self.credentials()).unwrap_or_default()
            }
            ["dbs" | "databases", ..] => serde_json::to_value(self.databases()).unwrap_or_default(),
            ["control", ..] => serde_json::to_value(self.control()).unwrap_or_default(),
            ["version", ..] => serde_json::Value::String(self.version()),
            ["tables", db, ..] => serde_json::to_value(self.tables_by_name(db)).unwrap_or_default(),
            ["columns", db, table, ..] => {
                let Some(db) = self.database(db) else {
                    return serde_json::Value::Null;
                };
                let Some(table) = self.table(db.oid, table) else {
                    return serde_json::Value::Null;
                };
                serde_json::to_value(self.columns(db.oid, table.oid)).unwrap_or_default()
            }
            ["query", db, table, ..] => {
                serde_json::to_value(self.query_by_name(db, table, &QueryOptions::default()))
                    .unwrap_or_default()
            }
            ["dump", db, ..] => serde_json::to_value(self.dump_database_by_name(db))
                .unwrap_or_default(),
            ["dump"] => serde_json::to_value(self.dump_all()).unwrap_or_default(),
            _ => serde_json::Value::Null,
        }
    }
}
