//! # pgcarve CLI
//!
//! Dump PostgreSQL databases straight from their on-disk files.
//!
//! ```bash
//! # Auto-detect data directories and dump everything as JSON
//! pgcarve
//!
//! # Dump one database's tables matching a filter, as SQL
//! pgcarve -d /var/lib/postgresql/data -db appdb -t password -sql
//!
//! # Forensics
//! pgcarve -d ./data -control
//! pgcarve -d ./data -wal
//! pgcarve -d ./data -checksum
//! pgcarve -d ./data -dropped
//! pgcarve -d ./data -passwords all
//!
//! # Single files
//! pgcarve -f ./data/base/16384/1259          # pg_class
//! pgcarve -f ./data/base/16384/16397 -index  # index structure
//! ```

use eyre::{bail, eyre, Result};
use pgcarve::catalog::{parse_pg_attribute, parse_pg_class, parse_pg_database, parse_pg_authid};
use pgcarve::dump::{dump_data_dir, Options};
use pgcarve::types::type_name;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Default)]
struct Config {
    data_dir: Option<PathBuf>,
    single_file: Option<PathBuf>,
    database: String,
    table_filter: String,
    list_only: bool,
    list_databases: bool,
    detect_only: bool,
    output_sql: bool,
    output_csv: bool,
    passwords: Option<String>,
    search_pattern: Option<String>,
    include_deleted: bool,
    show_wal: bool,
    show_control: bool,
    verify_checksums: bool,
    show_dropped: bool,
    parse_as_index: bool,
    show_version: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cfg = parse_args(std::env::args().skip(1).collect())?;

    if cfg.show_version {
        println!("pgcarve {}", pgcarve::VERSION);
        return Ok(());
    }

    if cfg.detect_only {
        for dir in pgcarve::detect::detect_all_data_dirs() {
            println!("{}", dir.display());
        }
        return Ok(());
    }

    if let Some(file) = &cfg.single_file {
        return parse_single_file(file, &cfg);
    }

    let data_dir = match &cfg.data_dir {
        Some(dir) => dir.clone(),
        None => pgcarve::detect::detect_data_dir()
            .ok_or_else(|| eyre!("no data directory found; pass -d or set PGDATA"))?,
    };

    if cfg.list_databases {
        for db in pgcarve::detect::list_databases(&data_dir) {
            println!("{} (OID: {})", db.name, db.oid);
        }
        return Ok(());
    }
    if cfg.show_control {
        let cf = pgcarve::control::read_control_file(&data_dir)?;
        println!("{}", pgcarve::output::to_json(&cf)?);
        return Ok(());
    }
    if cfg.show_wal {
        let summary = pgcarve::wal::scan_wal(&data_dir)?;
        println!("{}", pgcarve::output::to_json(&summary)?);
        return Ok(());
    }
    if cfg.verify_checksums {
        let report = pgcarve::checksum::verify_data_dir_checksums(&data_dir)?;
        println!("{}", pgcarve::output::to_json(&report)?);
        return Ok(());
    }
    if cfg.show_dropped {
        let reports = pgcarve::catalog::scan_dropped_columns(&data_dir)?;
        println!("{}", pgcarve::output::to_json(&reports)?);
        return Ok(());
    }
    if let Some(mode) = &cfg.passwords {
        let data = std::fs::read(data_dir.join("global").join("1260"))?;
        let mut roles = parse_pg_authid(&data);
        if mode == "user" {
            roles.retain(|r| r.oid >= 16384);
        }
        println!("{}", pgcarve::output::to_json(&roles)?);
        return Ok(());
    }
    if let Some(pattern) = &cfg.search_pattern {
        let matches = pgcarve::search::search_data_dir(
            &data_dir,
            &pgcarve::search::SearchOptions {
                pattern: pattern.clone(),
                include_row: true,
                ..pgcarve::search::SearchOptions::default()
            },
        )?;
        println!("{}", pgcarve::output::to_json(&matches)?);
        return Ok(());
    }

    let opts = Options {
        database_filter: cfg.database.clone(),
        table_filter: cfg.table_filter.clone(),
        list_only: cfg.list_only,
        include_deleted: cfg.include_deleted,
        ..Options::default()
    };
    let result = dump_data_dir(&data_dir, &opts)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if cfg.output_sql {
        pgcarve::output::dump_to_sql(&result, &mut out)?;
    } else if cfg.output_csv {
        pgcarve::output::dump_to_csv(&result, &mut out)?;
    } else {
        println!("{}", pgcarve::output::to_json(&result)?);
    }
    Ok(())
}

fn parse_single_file(path: &PathBuf, cfg: &Config) -> Result<()> {
    let data = std::fs::read(path)?;
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if cfg.parse_as_index {
        let info = pgcarve::index::parse_index_file(&data)?;
        println!("{}", pgcarve::output::to_json(&info)?);
        return Ok(());
    }

    match basename {
        "1262" => {
            eprintln!("Detected: pg_database (global)");
            for db in parse_pg_database(&data) {
                println!("  Database: {} (OID: {})", db.name, db.oid);
            }
        }
        "1259" => {
            eprintln!("Detected: pg_class");
            let mut tables: Vec<_> = parse_pg_class(&data).into_values().collect();
            tables.sort_by_key(|t| t.filenode);
            for t in tables {
                println!(
                    "  Table: {} (OID: {}, filenode: {}, kind: {})",
                    t.name, t.oid, t.filenode, t.kind
                );
            }
        }
        "1249" => {
            eprintln!("Detected: pg_attribute");
            let mut rels: Vec<_> = parse_pg_attribute(&data, 0).into_iter().collect();
            rels.sort_by_key(|(oid, _)| *oid);
            for (relid, cols) in rels {
                println!("  Relation {relid}:");
                for c in cols {
                    println!("    {}: {} ({})", c.attnum, c.name, type_name(c.type_oid));
                }
            }
        }
        "pg_control" => {
            let cf = pgcarve::control::parse_control_file(&data)?;
            println!("{}", pgcarve::output::to_json(&cf)?);
        }
        _ => {
            eprintln!("Generic heap file - extracting tuples");
            let tuples = pgcarve::heap::read_tuples(&data, !cfg.include_deleted);
            println!("Found {} tuples", tuples.len());
            for (i, t) in tuples.iter().take(10).enumerate() {
                println!("Tuple {i}: {} bytes, {} attrs", t.tuple.data.len(), t.tuple.natts());
            }
            if tuples.len() > 10 {
                println!("... and {} more", tuples.len() - 10);
            }
        }
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Config> {
    let mut cfg = Config::default();
    let mut i = 0;

    let value = |args: &[String], i: usize, flag: &str| -> Result<String> {
        args.get(i + 1)
            .cloned()
            .ok_or_else(|| eyre!("{flag} requires a value"))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-version" | "--version" => cfg.show_version = true,
            "-d" => {
                cfg.data_dir = Some(PathBuf::from(value(&args, i, "-d")?));
                i += 1;
            }
            "-f" => {
                cfg.single_file = Some(PathBuf::from(value(&args, i, "-f")?));
                i += 1;
            }
            "-db" => {
                cfg.database = value(&args, i, "-db")?;
                i += 1;
            }
            "-t" => {
                cfg.table_filter = value(&args, i, "-t")?;
                i += 1;
            }
            "-passwords" => {
                let mode = value(&args, i, "-passwords")?;
                if mode != "all" && mode != "user" {
                    bail!("-passwords takes 'all' or 'user'");
                }
                cfg.passwords = Some(mode);
                i += 1;
            }
            "-search" => {
                cfg.search_pattern = Some(value(&args, i, "-search")?);
                i += 1;
            }
            "-list" => cfg.list_only = true,
            "-list-db" => cfg.list_databases = true,
            "-detect" => cfg.detect_only = true,
            "-sql" => cfg.output_sql = true,
            "-csv" => cfg.output_csv = true,
            "-deleted" => cfg.include_deleted = true,
            "-wal" => cfg.show_wal = true,
            "-control" => cfg.show_control = true,
            "-checksum" => cfg.verify_checksums = true,
            "-dropped" => cfg.show_dropped = true,
            "-index" => cfg.parse_as_index = true,
            other => bail!("unknown option: {other}"),
        }
        i += 1;
    }

    if cfg.parse_as_index && cfg.single_file.is_none() {
        bail!("-index requires -f <file>");
    }
    if cfg.output_sql && cfg.output_csv {
        bail!("-sql and -csv are mutually exclusive");
    }
    Ok(cfg)
}

fn print_usage() {
    println!("pgcarve - dump PostgreSQL data straight from its on-disk files");
    println!();
    println!("USAGE:");
    println!("    pgcarve [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -d <path>            Data directory (auto-detect if omitted)");
    println!("    -f <file>            Parse a single file (1262/1259/1249/pg_control/heap)");
    println!("    -db <name>           Filter by database name");
    println!("    -t <substr>          Filter tables containing substring");
    println!("    -list                Schema only, no row data");
    println!("    -list-db             List databases only");
    println!("    -detect              List detected data directories");
    println!("    -sql                 SQL output (JSON is default)");
    println!("    -csv                 CSV output");
    println!("    -passwords <all|user> Extract credentials from pg_authid");
    println!("    -search <regex>      Search decoded values");
    println!("    -deleted             Include deleted (invisible) rows");
    println!("    -wal                 Scan pg_wal segments");
    println!("    -control             Parse global/pg_control");
    println!("    -checksum            Verify page checksums");
    println!("    -dropped             Find dropped columns");
    println!("    -index               With -f: parse the file as an index");
    println!("    -version             Print version");
}
