//! # Output Rendering
//!
//! Three textual renditions of a dump:
//!
//! - **JSON** (default): straight serde_json of the result types
//! - **SQL**: `CREATE TABLE IF NOT EXISTS` plus one `INSERT` per row,
//!   with identifiers and literals quoted so the script replays cleanly
//! - **CSV**: header row plus RFC-4180-style escaped values, one table
//!   per block

use crate::dump::{DatabaseDump, DumpResult, TableDump};
use crate::types::{self, Value};
use eyre::Result;
use std::io::Write;

/// Pretty JSON of any serializable result.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

// Keywords that force identifier quoting. Enough for replayable output;
// exotic identifiers fall into the non-alphanumeric rule anyway.
const RESERVED: &[&str] = &[
    "all", "and", "any", "array", "as", "asc", "between", "case", "cast", "check", "column",
    "constraint", "create", "default", "desc", "distinct", "do", "else", "end", "except", "false",
    "for", "foreign", "from", "grant", "group", "having", "in", "index", "insert", "intersect",
    "into", "join", "key", "like", "limit", "not", "null", "offset", "on", "or", "order",
    "primary", "references", "select", "table", "then", "to", "true", "union", "unique", "update",
    "user", "using", "values", "when", "where", "with",
];

/// Quotes an identifier when it needs it (reserved word, upper case or
/// non-alphanumeric characters).
pub fn quote_ident(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !RESERVED.contains(&name);
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Single-quoted SQL string literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// SQL type name for a column's type OID.
pub fn pg_type_to_sql(type_oid: u32) -> &'static str {
    match type_oid {
        types::OID_BOOL => "BOOLEAN",
        types::OID_INT2 => "SMALLINT",
        types::OID_INT4 => "INTEGER",
        types::OID_INT8 => "BIGINT",
        types::OID_FLOAT4 => "REAL",
        types::OID_FLOAT8 => "DOUBLE PRECISION",
        types::OID_NUMERIC => "NUMERIC",
        types::OID_BYTEA => "BYTEA",
        types::OID_DATE => "DATE",
        types::OID_TIME => "TIME",
        types::OID_TIMETZ => "TIMETZ",
        types::OID_TIMESTAMP => "TIMESTAMP",
        types::OID_TIMESTAMPTZ => "TIMESTAMPTZ",
        types::OID_INTERVAL => "INTERVAL",
        types::OID_UUID => "UUID",
        types::OID_INET => "INET",
        types::OID_CIDR => "CIDR",
        types::OID_MACADDR => "MACADDR",
        types::OID_JSON => "JSON",
        types::OID_JSONB => "JSONB",
        types::OID_XML => "XML",
        types::OID_MONEY => "MONEY",
        _ => "TEXT",
    }
}

/// SQL literal for a decoded value.
pub fn format_sql_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(s) => quote_literal(s),
        Value::Bytes(b) => {
            let mut hex = String::with_capacity(b.len() * 2);
            for byte in b {
                hex.push_str(&format!("{byte:02x}"));
            }
            format!("'\\x{hex}'")
        }
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(format_sql_value).collect();
            format!("ARRAY[{}]", parts.join(", "))
        }
        Value::Map(_) => quote_literal(&serde_json::to_string(value).unwrap_or_default()),
    }
}

/// Writes one table as CREATE TABLE + INSERTs.
pub fn table_to_sql(table: &TableDump, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "CREATE TABLE IF NOT EXISTS {} (", quote_ident(&table.name))?;
    for (i, column) in table.columns.iter().enumerate() {
        let comma = if i + 1 < table.columns.len() { "," } else { "" };
        writeln!(
            out,
            "    {} {}{comma}",
            quote_ident(&column.name),
            pg_type_to_sql(column.type_oid)
        )?;
    }
    writeln!(out, ");")?;

    for row in &table.rows {
        let names: Vec<String> = row.iter().map(|(n, _)| quote_ident(n)).collect();
        let values: Vec<String> = row.iter().map(|(_, v)| format_sql_value(v)).collect();
        writeln!(
            out,
            "INSERT INTO {} ({}) VALUES ({});",
            quote_ident(&table.name),
            names.join(", "),
            values.join(", ")
        )?;
    }
    Ok(())
}

/// Writes all tables of one database.
pub fn database_to_sql(db: &DatabaseDump, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "-- Database: {}", db.name)?;
    writeln!(out, "\\connect {}", quote_ident(&db.name))?;
    writeln!(out)?;
    for table in &db.tables {
        table_to_sql(table, out)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Writes a whole dump as an SQL script.
pub fn dump_to_sql(dump: &DumpResult, out: &mut dyn Write) -> Result<()> {
    for db in &dump.databases {
        database_to_sql(db, out)?;
    }
    Ok(())
}

/// CSV field value: empty for NULL, raw rendering otherwise.
pub fn format_csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::List(_) | Value::Map(_) => serde_json::to_string(value).unwrap_or_default(),
        other => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Writes one table as CSV: header then rows, columns in physical order.
pub fn table_to_csv(table: &TableDump, out: &mut dyn Write) -> Result<()> {
    let header: Vec<String> = table
        .columns
        .iter()
        .map(|c| csv_escape(&c.name))
        .collect();
    writeln!(out, "{}", header.join(","))?;

    for row in &table.rows {
        let fields: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let value = row.get(&c.name).unwrap_or(&Value::Null);
                csv_escape(&format_csv_value(value))
            })
            .collect();
        writeln!(out, "{}", fields.join(","))?;
    }
    Ok(())
}

/// Writes a whole dump as CSV, one `# database.table` block per table.
pub fn dump_to_csv(dump: &DumpResult, out: &mut dyn Write) -> Result<()> {
    for db in &dump.databases {
        for table in &db.tables {
            writeln!(out, "# {}.{}", db.name, table.name)?;
            table_to_csv(table, out)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
