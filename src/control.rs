//! # Control File (`global/pg_control`)
//!
//! The control file is the cluster's passport: system identifier, catalog
//! and control-format versions, database state, last checkpoint and the
//! compile-time storage geometry, all protected by a trailing CRC-32C.
//!
//! Offsets of the leading fields are stable for v12+ layouts. The
//! configuration and storage sections shift between releases, so they are
//! located by signature instead of offset:
//!
//! - configuration: four plausible small ints in a row
//!   (`max_connections` 1..=10000, `max_worker_processes` 1..=1000,
//!   `max_wal_senders` 0..=1000)
//! - storage: the fixed `(max_align = 8, block_size = 8192,
//!   wal_block_size = 8192)` fingerprint
//!
//! The CRC is computed over the bytes preceding the stored word at offset
//! 288 (the v12+ position). On mismatch `crc_valid` stays `false` and the
//! raw stored value is surfaced; no alternative offsets are guessed.

use crate::binary::{i64_at, u32_at, u64_at};
use crate::wal::{format_lsn, wal_filename};
use chrono::DateTime;
use crc::{Crc, CRC_32_ISCSI};
use eyre::{bail, Result};
use serde::Serialize;
use std::path::Path;

/// Minimum bytes for the fixed portion plus CRC.
const MIN_CONTROL_SIZE: usize = 296;
/// v12+ position of the trailing CRC word.
const CRC_OFFSET: usize = 288;

const DEFAULT_WAL_SEGMENT_SIZE: u32 = 16 * 1024 * 1024;

/// Database cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DbState {
    Startup,
    Shutdowned,
    ShutdownedInRecovery,
    Shutdowning,
    InCrashRecovery,
    InArchiveRecovery,
    InProduction,
    Unknown,
}

impl DbState {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => DbState::Startup,
            1 => DbState::Shutdowned,
            2 => DbState::ShutdownedInRecovery,
            3 => DbState::Shutdowning,
            4 => DbState::InCrashRecovery,
            5 => DbState::InArchiveRecovery,
            6 => DbState::InProduction,
            _ => DbState::Unknown,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            DbState::Startup => "starting up",
            DbState::Shutdowned => "shut down",
            DbState::ShutdownedInRecovery => "shut down in recovery",
            DbState::Shutdowning => "shutting down",
            DbState::InCrashRecovery => "in crash recovery",
            DbState::InArchiveRecovery => "in archive recovery",
            DbState::InProduction => "in production",
            DbState::Unknown => "unknown",
        }
    }
}

const WAL_LEVEL_NAMES: [&str; 3] = ["minimal", "replica", "logical"];

/// Parsed control file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlFile {
    pub system_identifier: u64,
    pub pg_control_version: u32,
    pub catalog_version_no: u32,
    pub pg_version_major: u32,

    pub state: String,

    pub checkpoint_lsn: String,
    pub redo_lsn: String,
    pub redo_wal_file: String,
    pub timeline_id: u32,
    pub prev_timeline_id: u32,
    pub full_page_writes: bool,

    pub next_xid_epoch: u32,
    pub next_xid: u32,
    pub next_oid: u32,
    pub next_multi: u32,
    pub next_multi_offset: u32,
    pub oldest_xid: u32,
    pub oldest_xid_db: u32,
    pub oldest_active_xid: u32,
    pub oldest_multi: u32,
    pub oldest_multi_db: u32,
    pub oldest_commit_ts_xid: u32,
    pub newest_commit_ts_xid: u32,

    /// Checkpoint time as Unix epoch seconds plus a rendered form.
    pub checkpoint_time: i64,
    pub checkpoint_time_str: String,

    pub wal_level: String,
    pub wal_log_hints: bool,
    pub max_connections: i32,
    pub max_worker_processes: i32,
    pub max_wal_senders: i32,
    pub max_prepared_xacts: i32,
    pub max_locks_per_xact: i32,
    pub track_commit_timestamp: bool,

    pub max_align: u32,
    pub block_size: u32,
    pub blocks_per_segment: u32,
    pub wal_block_size: u32,
    pub wal_segment_size: u32,
    pub name_data_len: u32,
    pub index_max_keys: u32,
    pub toast_max_chunk_size: u32,
    pub large_object_chunk_size: u32,

    pub float_format_ok: bool,
    pub data_checksums_enabled: bool,

    pub crc: u32,
    pub crc_valid: bool,
}

/// Parses `pg_control` bytes (layout of v12 and later).
pub fn parse_control_file(data: &[u8]) -> Result<ControlFile> {
    if data.len() < MIN_CONTROL_SIZE {
        bail!("control file too small: {} bytes", data.len());
    }

    let mut cf = ControlFile {
        system_identifier: u64_at(data, 0),
        pg_control_version: u32_at(data, 8),
        catalog_version_no: u32_at(data, 12),
        ..ControlFile::default()
    };
    cf.pg_version_major = infer_pg_version(cf.pg_control_version, cf.catalog_version_no);
    cf.state = DbState::from_raw(u32_at(data, 16)).describe().to_string();

    cf.checkpoint_lsn = format_lsn(u64_at(data, 32));

    // The embedded CheckPoint struct starts at 40.
    let redo = u64_at(data, 40);
    cf.redo_lsn = format_lsn(redo);
    cf.timeline_id = u32_at(data, 48);
    cf.prev_timeline_id = u32_at(data, 52);
    cf.redo_wal_file = wal_filename(redo, cf.timeline_id.max(1), u64::from(DEFAULT_WAL_SEGMENT_SIZE));
    cf.full_page_writes = data[56] != 0;

    // nextXid is a FullTransactionId: low word xid, high word epoch.
    cf.next_xid = u32_at(data, 64);
    cf.next_xid_epoch = u32_at(data, 68);
    cf.next_oid = u32_at(data, 72);
    cf.next_multi = u32_at(data, 76);
    cf.next_multi_offset = u32_at(data, 80);
    cf.oldest_xid = u32_at(data, 84);
    cf.oldest_xid_db = u32_at(data, 88);
    cf.oldest_multi = u32_at(data, 92);
    cf.oldest_multi_db = u32_at(data, 96);

    // Checkpoint time is plain Unix epoch, not the 2000-01-01 epoch.
    cf.checkpoint_time = i64_at(data, 104);
    cf.checkpoint_time_str = DateTime::from_timestamp(cf.checkpoint_time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();

    cf.oldest_active_xid = u32_at(data, 112);
    cf.oldest_commit_ts_xid = u32_at(data, 116);
    cf.newest_commit_ts_xid = u32_at(data, 120);

    if let Some(off) = find_config_section(data, 180) {
        cf.max_connections = u32_at(data, off) as i32;
        cf.max_worker_processes = u32_at(data, off + 4) as i32;
        cf.max_wal_senders = u32_at(data, off + 8) as i32;
        cf.max_prepared_xacts = u32_at(data, off + 12) as i32;
        cf.max_locks_per_xact = u32_at(data, off + 16) as i32;

        // wal_level sits just before max_connections
        let wal_level = u32_at(data, off.saturating_sub(8)) as usize;
        if wal_level < WAL_LEVEL_NAMES.len() {
            cf.wal_level = WAL_LEVEL_NAMES[wal_level].to_string();
        }
        cf.wal_log_hints = data[off - 4] != 0;
        cf.track_commit_timestamp = data[off + 20] != 0;
    }

    if let Some(off) = find_storage_section(data, 220) {
        cf.max_align = u32_at(data, off);
        cf.block_size = u32_at(data, off + 8);
        cf.blocks_per_segment = u32_at(data, off + 12);
        cf.wal_block_size = u32_at(data, off + 16);
        cf.wal_segment_size = u32_at(data, off + 20);
        cf.name_data_len = u32_at(data, off + 24);
        cf.index_max_keys = u32_at(data, off + 28);
        cf.toast_max_chunk_size = u32_at(data, off + 32);
        cf.large_object_chunk_size = u32_at(data, off + 36);

        // The float-format canary must bit-decode to exactly 1234567.0.
        cf.float_format_ok = f64::from_bits(u64_at(data, off + 40)) == 1_234_567.0;
        cf.data_checksums_enabled = data[off + 48] != 0;
    }

    if cf.block_size == 0 {
        cf.block_size = 8192;
    }
    if cf.wal_block_size == 0 {
        cf.wal_block_size = 8192;
    }
    if cf.wal_segment_size == 0 {
        cf.wal_segment_size = DEFAULT_WAL_SEGMENT_SIZE;
    }

    cf.crc = u32_at(data, CRC_OFFSET);
    cf.crc_valid = verify_crc32c(&data[..CRC_OFFSET], cf.crc);

    Ok(cf)
}

/// Reads and parses `<data_dir>/global/pg_control`.
pub fn read_control_file(data_dir: &Path) -> Result<ControlFile> {
    let data = std::fs::read(data_dir.join("global").join("pg_control"))?;
    parse_control_file(&data)
}

/// Locates the run of configuration integers by plausibility.
fn find_config_section(data: &[u8], start: usize) -> Option<usize> {
    let mut off = start;
    while off + 24 <= data.len() && off < 280 {
        let max_connections = u32_at(data, off) as i32;
        let max_workers = u32_at(data, off + 4) as i32;
        let max_wal_senders = u32_at(data, off + 8) as i32;
        if (1..=10_000).contains(&max_connections)
            && (1..=1_000).contains(&max_workers)
            && (0..=1_000).contains(&max_wal_senders)
        {
            return Some(off);
        }
        off += 4;
    }
    None
}

/// Locates the storage geometry by its constant fingerprint.
fn find_storage_section(data: &[u8], start: usize) -> Option<usize> {
    let mut off = start;
    while off + 52 <= data.len() && off < 300 {
        if u32_at(data, off) == 8 && u32_at(data, off + 8) == 8192 && u32_at(data, off + 16) == 8192
        {
            return Some(off);
        }
        off += 4;
    }
    None
}

/// Major version from the control/catalog version pair.
fn infer_pg_version(control_version: u32, catalog_version: u32) -> u32 {
    match control_version {
        v if v >= 1300 => {
            if catalog_version >= 202307071 {
                16
            } else {
                15
            }
        }
        v if v >= 1201 => {
            if catalog_version >= 202107181 {
                14
            } else {
                13
            }
        }
        v if v >= 1100 => {
            if catalog_version >= 201909212 {
                12
            } else {
                11
            }
        }
        v if v >= 1002 => 10,
        _ => 9,
    }
}

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

fn verify_crc32c(data: &[u8], expected: u32) -> bool {
    CRC32C.checksum(data) == expected
}

#[cfg(test)]
pub(crate) mod test_control {
    use super::*;

    /// Builds a plausible v16 control file with a valid CRC.
    pub(crate) fn control_bytes() -> Vec<u8> {
        let mut data = vec![0u8; 8192];
        data[0..8].copy_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        data[8..12].copy_from_slice(&1300u32.to_le_bytes()); // control version
        data[12..16].copy_from_slice(&202307071u32.to_le_bytes()); // catalog version
        data[16..20].copy_from_slice(&6u32.to_le_bytes()); // in production
        data[32..40].copy_from_slice(&0x0000_0001_0000_0028u64.to_le_bytes()); // checkpoint
        data[40..48].copy_from_slice(&0x0000_0001_0000_0028u64.to_le_bytes()); // redo
        data[48..52].copy_from_slice(&1u32.to_le_bytes()); // timeline
        data[56] = 1; // full_page_writes
        data[64..68].copy_from_slice(&745u32.to_le_bytes()); // next xid
        data[72..76].copy_from_slice(&16500u32.to_le_bytes()); // next oid
        data[84..88].copy_from_slice(&3u32.to_le_bytes()); // oldest xid
        data[104..112].copy_from_slice(&1_700_000_000i64.to_le_bytes()); // checkpoint time

        // config section: wal_level=replica, hints, then the int run
        let cfg = 192usize;
        data[cfg - 8..cfg - 4].copy_from_slice(&1u32.to_le_bytes()); // replica
        data[cfg - 4] = 0; // wal_log_hints off
        data[cfg..cfg + 4].copy_from_slice(&100u32.to_le_bytes()); // max_connections
        data[cfg + 4..cfg + 8].copy_from_slice(&8u32.to_le_bytes()); // workers
        data[cfg + 8..cfg + 12].copy_from_slice(&10u32.to_le_bytes()); // wal senders
        data[cfg + 12..cfg + 16].copy_from_slice(&0u32.to_le_bytes()); // prepared
        data[cfg + 16..cfg + 20].copy_from_slice(&64u32.to_le_bytes()); // locks

        // storage section fingerprint
        let st = 224usize;
        data[st..st + 4].copy_from_slice(&8u32.to_le_bytes()); // max_align
        data[st + 8..st + 12].copy_from_slice(&8192u32.to_le_bytes()); // block size
        data[st + 12..st + 16].copy_from_slice(&131072u32.to_le_bytes()); // blocks/seg
        data[st + 16..st + 20].copy_from_slice(&8192u32.to_le_bytes()); // wal block
        data[st + 20..st + 24].copy_from_slice(&(16777216u32).to_le_bytes()); // wal seg
        data[st + 24..st + 28].copy_from_slice(&64u32.to_le_bytes()); // namedatalen
        data[st + 28..st + 32].copy_from_slice(&32u32.to_le_bytes()); // index keys
        data[st + 32..st + 36].copy_from_slice(&1996u32.to_le_bytes()); // toast chunk
        data[st + 36..st + 40].copy_from_slice(&2048u32.to_le_bytes()); // lo chunk
        data[st + 40..st + 48].copy_from_slice(&1_234_567.0f64.to_bits().to_le_bytes());
        data[st + 48] = 1; // data checksums on

        let crc = CRC32C.checksum(&data[..CRC_OFFSET]);
        data[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::test_control::control_bytes;
    use super::*;

    #[test]
    fn too_small_is_an_error() {
        assert!(parse_control_file(&[0u8; 100]).is_err());
    }

    #[test]
    fn full_parse() {
        let cf = parse_control_file(&control_bytes()).unwrap();
        assert_eq!(cf.system_identifier, 0x1122_3344_5566_7788);
        assert_eq!(cf.pg_control_version, 1300);
        assert_eq!(cf.pg_version_major, 16);
        assert_eq!(cf.state, "in production");
        assert_eq!(cf.checkpoint_lsn, "1/28");
        assert_eq!(cf.redo_lsn, "1/28");
        assert_eq!(cf.redo_wal_file, "000000010000000000000100");
        assert_eq!(cf.timeline_id, 1);
        assert!(cf.full_page_writes);
        assert_eq!(cf.next_xid, 745);
        assert_eq!(cf.next_oid, 16500);
        assert_eq!(cf.oldest_xid, 3);
        assert_eq!(cf.checkpoint_time, 1_700_000_000);
        assert_eq!(cf.checkpoint_time_str, "2023-11-14 22:13:20 UTC");

        assert_eq!(cf.wal_level, "replica");
        assert_eq!(cf.max_connections, 100);
        assert_eq!(cf.max_worker_processes, 8);
        assert_eq!(cf.max_wal_senders, 10);
        assert_eq!(cf.max_locks_per_xact, 64);

        assert_eq!(cf.max_align, 8);
        assert_eq!(cf.block_size, 8192);
        assert_eq!(cf.wal_block_size, 8192);
        assert_eq!(cf.wal_segment_size, 16 * 1024 * 1024);
        assert!(cf.float_format_ok);
        assert!(cf.data_checksums_enabled);

        assert!(cf.crc_valid);
    }

    #[test]
    fn corrupting_a_byte_invalidates_crc() {
        let mut data = control_bytes();
        data[20] ^= 0xFF;
        let cf = parse_control_file(&data).unwrap();
        assert!(!cf.crc_valid);
        // the stored CRC is still surfaced
        assert_ne!(cf.crc, 0);
    }

    #[test]
    fn version_inference_bands() {
        assert_eq!(infer_pg_version(1300, 202307071), 16);
        assert_eq!(infer_pg_version(1300, 202201241), 15);
        assert_eq!(infer_pg_version(1201, 202107181), 14);
        assert_eq!(infer_pg_version(1201, 202007201), 13);
        assert_eq!(infer_pg_version(1100, 201909212), 12);
        assert_eq!(infer_pg_version(1100, 201809051), 11);
        assert_eq!(infer_pg_version(1002, 0), 10);
        assert_eq!(infer_pg_version(960, 0), 9);
    }

    #[test]
    fn db_state_names() {
        assert_eq!(DbState::from_raw(0).describe(), "starting up");
        assert_eq!(DbState::from_raw(1).describe(), "shut down");
        assert_eq!(DbState::from_raw(6).describe(), "in production");
        assert_eq!(DbState::from_raw(99).describe(), "unknown");
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        // a minimal file with only the fixed fields
        let mut data = vec![0u8; 296];
        data[8..12].copy_from_slice(&1201u32.to_le_bytes());
        let cf = parse_control_file(&data).unwrap();
        assert_eq!(cf.block_size, 8192);
        assert_eq!(cf.wal_block_size, 8192);
        assert_eq!(cf.wal_segment_size, 16 * 1024 * 1024);
        assert_eq!(cf.wal_level, "");
        assert!(!cf.crc_valid);
    }
}
