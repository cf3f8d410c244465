//! # Value Search
//!
//! Regex scan across every decoded value of a dump. The match walk recurses
//! into arrays and JSONB trees (keys included), so a credential buried in a
//! nested document is found the same way as one in a text column.

use crate::dump::{dump_data_dir, DumpResult, Options};
use crate::types::Value;
use eyre::{Result, WrapErr};
use regex::Regex;
use serde::Serialize;
use std::path::Path;

/// Search configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Regex pattern; compiled case-insensitively unless `case_sensitive`.
    pub pattern: String,
    pub case_sensitive: bool,
    /// Attach the full row to each match.
    pub include_row: bool,
    /// Stop after this many matches (0 = unlimited).
    pub max_results: usize,
}

/// One matching value.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub database: String,
    pub table: String,
    pub column: String,
    pub row_num: usize,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<crate::types::Row>,
}

fn compile(opts: &SearchOptions) -> Result<Regex> {
    let pattern = if opts.case_sensitive {
        opts.pattern.clone()
    } else {
        format!("(?i){}", opts.pattern)
    };
    Regex::new(&pattern).wrap_err("invalid search pattern")
}

/// Searches a data directory (dumps it first).
pub fn search_data_dir(data_dir: &Path, opts: &SearchOptions) -> Result<Vec<SearchMatch>> {
    let dump = dump_data_dir(data_dir, &Options::default())?;
    search_dump(&dump, opts)
}

/// Searches an already-loaded dump.
pub fn search_dump(dump: &DumpResult, opts: &SearchOptions) -> Result<Vec<SearchMatch>> {
    let re = compile(opts)?;
    let mut matches = Vec::new();

    'outer: for db in &dump.databases {
        for table in &db.tables {
            for (row_num, row) in table.rows.iter().enumerate() {
                for (column, value) in row.iter() {
                    if !value_matches(value, &re) {
                        continue;
                    }
                    matches.push(SearchMatch {
                        database: db.name.clone(),
                        table: table.name.clone(),
                        column: column.to_string(),
                        row_num,
                        value: value.clone(),
                        row: opts.include_row.then(|| row.clone()),
                    });
                    if opts.max_results > 0 && matches.len() >= opts.max_results {
                        break 'outer;
                    }
                }
            }
        }
    }
    Ok(matches)
}

/// Convenience wrapper: literal (non-regex) case-insensitive search.
pub fn quick_search(data_dir: &Path, needle: &str) -> Result<Vec<SearchMatch>> {
    search_data_dir(
        data_dir,
        &SearchOptions {
            pattern: regex::escape(needle),
            include_row: true,
            ..SearchOptions::default()
        },
    )
}

fn value_matches(value: &Value, re: &Regex) -> bool {
    match value {
        Value::Null => false,
        Value::Text(s) => re.is_match(s),
        Value::Bytes(b) => re.is_match(&String::from_utf8_lossy(b)),
        Value::List(items) => items.iter().any(|v| value_matches(v, re)),
        Value::Map(entries) => entries
            .iter()
            .any(|(k, v)| re.is_match(k) || value_matches(v, re)),
        other => re.is_match(&other.to_string()),
    }
}
