//! # pgcarve - Offline PostgreSQL Data Directory Decoder
//!
//! pgcarve reconstructs the contents of a PostgreSQL cluster (9.6 - 17)
//! straight from its on-disk files: no running server, no SQL, no
//! credentials. If you can read the files, you can dump the database.
//!
//! The trick is that three catalogs keep fixed file names on every
//! supported version:
//!
//! ```text
//! global/1262            pg_database  -> which databases exist
//! base/<db_oid>/1259     pg_class     -> which tables exist (by filenode)
//! base/<db_oid>/1249     pg_attribute -> what their columns look like
//! ```
//!
//! Everything else is decoding: heap pages into tuples, tuples into typed
//! values through the per-column alignment walk, varlena and TOAST forms,
//! JSONB trees and base-10000 numerics.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pgcarve::dump::{dump_data_dir, Options};
//!
//! let result = dump_data_dir("/var/lib/postgresql/data".as_ref(), &Options::default())?;
//! for db in &result.databases {
//!     for table in &db.tables {
//!         println!("{}.{}: {} rows", db.name, table.name, table.row_count);
//!     }
//! }
//! ```
//!
//! ## Remote / File-Read Scenarios
//!
//! The same decoding runs over any `path -> bytes` primitive (HTTP
//! traversal, backup archive, arbitrary-file-read bug):
//!
//! ```ignore
//! use pgcarve::remote::RemoteClient;
//!
//! let client = RemoteClient::new(Box::new(|path| fetch(path)));
//! let dump = client.dump_all();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------+
//! |  CLI / RemoteClient facade                       |
//! +--------------------------------------------------+
//! |  dump orchestrator   | forensics: control, wal,  |
//! |  (catalog -> tables) | checksum, index, dropped  |
//! +--------------------------------------------------+
//! |  catalog bootstrap (fixed schemas, version probe)|
//! +--------------------------------------------------+
//! |  heap: pages -> tuples -> rows    | toast        |
//! +--------------------------------------------------+
//! |  types: OID dispatch, jsonb, numeric, varlena    |
//! +--------------------------------------------------+
//! |  binary primitives (bounds-checked LE readers)   |
//! +--------------------------------------------------+
//! ```
//!
//! Decoders are pure functions from bytes to values and never panic on
//! hostile input; errors exist only at the reader boundary and the
//! orchestrator.
//!
//! ## Module Overview
//!
//! - [`binary`]: little-endian readers, alignment, cstrings
//! - [`heap`]: page layout, tuple headers, MVCC visibility, the row walk
//! - [`types`]: `Value`, `Row` and the ~40-type decoder
//! - [`catalog`]: bootstrap schemas, credentials, dropped columns
//! - [`dump`]: the database -> table -> row orchestrator
//! - [`control`], [`wal`], [`checksum`], [`index`]: forensic surfaces
//! - [`remote`]: the path-reader facade
//! - [`search`], [`detect`], [`output`]: scanning, discovery, rendering

#[macro_use]
mod macros;

pub mod binary;
pub mod catalog;
pub mod checksum;
pub mod control;
pub mod detect;
pub mod dump;
pub mod heap;
pub mod index;
pub mod output;
pub mod remote;
pub mod search;
pub mod types;
pub mod wal;

pub use catalog::{AuthInfo, DatabaseInfo, TableInfo};
pub use dump::{dump_data_dir, dump_database_from_files, DumpResult, Options};
pub use remote::RemoteClient;
pub use types::{Row, Value};

/// Crate version, as reported by `-version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
