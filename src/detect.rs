//! # Data Directory Discovery
//!
//! Finds PostgreSQL data directories without being told where they are.
//! `PGDATA` wins when set and valid; otherwise a platform-ordered candidate
//! list is probed. A directory qualifies iff `global/1262` (`pg_database`)
//! exists as a regular, non-empty file; that single file is enough for
//! everything else this crate does.

use crate::catalog::{parse_pg_database, DatabaseInfo};
use std::path::{Path, PathBuf};

/// Returns the first valid data directory, `PGDATA` first.
pub fn detect_data_dir() -> Option<PathBuf> {
    if let Ok(pgdata) = std::env::var("PGDATA") {
        let path = PathBuf::from(pgdata);
        if is_valid_data_dir(&path) {
            return Some(path);
        }
    }
    candidate_paths().into_iter().find(|p| is_valid_data_dir(p))
}

/// Returns every valid data directory on the system, deduplicated.
pub fn detect_all_data_dirs() -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();

    let mut consider = |path: PathBuf| {
        let resolved = path.canonicalize().unwrap_or(path);
        if seen.insert(resolved.clone()) && is_valid_data_dir(&resolved) {
            results.push(resolved);
        }
    };

    if let Ok(pgdata) = std::env::var("PGDATA") {
        consider(PathBuf::from(pgdata));
    }
    for path in candidate_paths() {
        consider(path);
    }
    results
}

/// `global/1262` must be a regular non-empty file.
pub fn is_valid_data_dir(path: &Path) -> bool {
    let pg_database = path.join("global").join("1262");
    match std::fs::metadata(&pg_database) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "macos") {
        darwin_paths()
    } else if cfg!(target_os = "windows") {
        windows_paths()
    } else {
        linux_paths()
    }
}

fn linux_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/var/lib/postgresql/data"),
        PathBuf::from("/var/lib/pgsql/data"),
    ];
    // Debian/Ubuntu versioned clusters
    for v in (10..=17).rev() {
        paths.push(PathBuf::from(format!("/var/lib/postgresql/{v}/main")));
    }
    // RHEL/CentOS versioned clusters
    for v in (10..=17).rev() {
        paths.push(PathBuf::from(format!("/var/lib/pgsql/{v}/data")));
    }
    paths.extend([
        PathBuf::from("/opt/postgresql/data"),
        PathBuf::from("/data/postgresql"),
        PathBuf::from("/pgdata"),
    ]);
    paths
}

fn darwin_paths() -> Vec<PathBuf> {
    let home = std::env::var("HOME").unwrap_or_default();
    let mut paths = vec![
        PathBuf::from("/usr/local/var/postgres"),
        PathBuf::from("/usr/local/var/postgresql"),
        PathBuf::from("/opt/homebrew/var/postgres"),
        PathBuf::from("/opt/homebrew/var/postgresql"),
    ];
    for v in (14..=17).rev() {
        paths.push(PathBuf::from(format!(
            "{home}/Library/Application Support/Postgres/var-{v}"
        )));
        paths.push(PathBuf::from(format!("/Library/PostgreSQL/{v}/data")));
    }
    for v in (12..=17).rev() {
        paths.push(PathBuf::from(format!("/usr/local/var/postgresql@{v}")));
        paths.push(PathBuf::from(format!("/opt/homebrew/var/postgresql@{v}")));
    }
    paths
}

fn windows_paths() -> Vec<PathBuf> {
    let prog_files =
        std::env::var("ProgramFiles").unwrap_or_else(|_| r"C:\Program Files".to_string());
    let prog_data = std::env::var("ProgramData").unwrap_or_else(|_| r"C:\ProgramData".to_string());

    let mut paths = Vec::new();
    for v in (10..=17).rev() {
        paths.push(PathBuf::from(&prog_files).join("PostgreSQL").join(v.to_string()).join("data"));
        paths.push(PathBuf::from(&prog_data).join("PostgreSQL").join(v.to_string()).join("data"));
    }
    paths.push(PathBuf::from(&prog_files).join("edb").join("as17").join("data"));
    paths.push(PathBuf::from(&prog_files).join("edb").join("as16").join("data"));
    paths
}

/// Quick database inventory of one data directory, templates sorted last.
pub fn list_databases(data_dir: &Path) -> Vec<DatabaseInfo> {
    let Ok(data) = std::fs::read(data_dir.join("global").join("1262")) else {
        return Vec::new();
    };
    let mut dbs = parse_pg_database(&data);
    dbs.sort_by(|a, b| {
        let a_tpl = a.name.starts_with("template");
        let b_tpl = b.name.starts_with("template");
        a_tpl.cmp(&b_tpl).then_with(|| a.name.cmp(&b.name))
    });
    dbs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_heaps::database_heap;
    use std::fs;
    use tempfile::TempDir;

    fn make_data_dir(dbs: &[(u32, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("global")).unwrap();
        fs::write(dir.path().join("global/1262"), database_heap(dbs)).unwrap();
        dir
    }

    #[test]
    fn validity_requires_pg_database() {
        let dir = make_data_dir(&[(1, "postgres")]);
        assert!(is_valid_data_dir(dir.path()));

        let empty = TempDir::new().unwrap();
        assert!(!is_valid_data_dir(empty.path()));

        // empty file does not qualify
        let hollow = TempDir::new().unwrap();
        fs::create_dir_all(hollow.path().join("global")).unwrap();
        fs::write(hollow.path().join("global/1262"), b"").unwrap();
        assert!(!is_valid_data_dir(hollow.path()));
    }

    #[test]
    fn candidates_are_nonempty_everywhere() {
        assert!(!candidate_paths().is_empty());
    }

    #[test]
    fn list_databases_sorts_templates_last() {
        let dir = make_data_dir(&[(1, "template1"), (16384, "zebra"), (16385, "appdb")]);
        let dbs = list_databases(dir.path());
        assert_eq!(dbs.len(), 3);
        assert_eq!(dbs[0].name, "appdb");
        assert_eq!(dbs[1].name, "zebra");
        assert_eq!(dbs[2].name, "template1");
        assert!(list_databases(Path::new("/nonexistent-pgcarve")).is_empty());
    }
}
