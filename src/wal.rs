//! # WAL Segment Scanner
//!
//! Record-level scan of write-ahead log segments (16 MiB by default). Each
//! segment is a run of 8192-byte pages; the first page of a segment carries
//! a long header whose magic identifies the server major version:
//!
//! ```text
//! magic    version        page header
//! 0xD101   12             short: magic u16, info u16, tli u32,
//! 0xD106   13                    pageaddr u64, rem_len u32 (24 bytes)
//! 0xD10D   14             long:  + sysid u64, seg_size u32,
//! 0xD110   15                    blcksz u32 (40 bytes)
//! 0xD113   16
//! ```
//!
//! Records sit back to back at 8-byte alignment and may span page
//! boundaries (continuation pages carry short headers). A record starts
//! with a 24-byte header:
//!
//! ```text
//! xl_tot_len u32 | xl_xid u32 | xl_prev u64 | xl_info u8 | xl_rmid u8
//! | 2 pad | xl_crc u32
//! ```
//!
//! The scanner is forensic, not authoritative: a header that fails the
//! sanity gate makes it re-sync at the next 8-byte boundary, and an
//! all-zero length ends the segment's valid region.

use crate::binary::{u16_at, u32_at, u64_at};
use eyre::{bail, Result};
use hashbrown::HashMap;
use serde::Serialize;
use std::path::Path;

pub const WAL_MAGIC_12: u16 = 0xD101;
pub const WAL_MAGIC_13: u16 = 0xD106;
pub const WAL_MAGIC_14: u16 = 0xD10D;
pub const WAL_MAGIC_15: u16 = 0xD110;
pub const WAL_MAGIC_16: u16 = 0xD113;

pub const XLP_LONG_HEADER: u16 = 0x0002;

pub const WAL_PAGE_SIZE: usize = 8192;
pub const SHORT_PAGE_HEADER_SIZE: usize = 24;
pub const LONG_PAGE_HEADER_SIZE: usize = 40;
pub const RECORD_HEADER_SIZE: usize = 24;

// Resource manager ids.
pub const RM_XLOG_ID: u8 = 0;
pub const RM_XACT_ID: u8 = 1;
pub const RM_SMGR_ID: u8 = 2;
pub const RM_CLOG_ID: u8 = 3;
pub const RM_DBASE_ID: u8 = 4;
pub const RM_TBLSPC_ID: u8 = 5;
pub const RM_MULTIXACT_ID: u8 = 6;
pub const RM_RELMAP_ID: u8 = 7;
pub const RM_STANDBY_ID: u8 = 8;
pub const RM_HEAP2_ID: u8 = 9;
pub const RM_HEAP_ID: u8 = 10;
pub const RM_BTREE_ID: u8 = 11;
pub const RM_HASH_ID: u8 = 12;
pub const RM_GIN_ID: u8 = 13;
pub const RM_GIST_ID: u8 = 14;
pub const RM_SEQ_ID: u8 = 15;
pub const RM_SPGIST_ID: u8 = 16;
pub const RM_BRIN_ID: u8 = 17;
pub const RM_COMMIT_TS_ID: u8 = 18;
pub const RM_REPLORIGIN_ID: u8 = 19;
pub const RM_GENERIC_ID: u8 = 20;
pub const RM_LOGICALMSG_ID: u8 = 21;

const RMGR_NAMES: [&str; 22] = [
    "XLOG",
    "Transaction",
    "Storage",
    "CLOG",
    "Database",
    "Tablespace",
    "MultiXact",
    "RelMap",
    "Standby",
    "Heap2",
    "Heap",
    "BTree",
    "Hash",
    "Gin",
    "Gist",
    "Sequence",
    "SPGist",
    "BRIN",
    "CommitTs",
    "ReplicationOrigin",
    "Generic",
    "LogicalMessage",
];

/// Formats an LSN the way the server prints one: `HIGH/LOW` in hex.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", (lsn >> 32) as u32, lsn as u32)
}

/// WAL file name for an LSN: timeline, then the segment number split into
/// two 32-bit hex words.
pub fn wal_filename(lsn: u64, timeline: u32, segment_size: u64) -> String {
    let seg_no = lsn / segment_size;
    format!(
        "{:08X}{:08X}{:08X}",
        timeline,
        (seg_no >> 32) as u32,
        seg_no as u32
    )
}

pub fn rmgr_name(rmid: u8) -> String {
    match RMGR_NAMES.get(rmid as usize) {
        Some(name) => (*name).to_string(),
        None => format!("RM_{rmid}"),
    }
}

/// Operation tag from the high nibble of `xl_info`, per resource manager.
pub fn operation_name(rmid: u8, info: u8) -> String {
    let op = info & 0xF0;
    let known = match rmid {
        RM_HEAP_ID => match op {
            0x00 => Some("INSERT"),
            0x10 => Some("DELETE"),
            0x20 => Some("UPDATE"),
            0x30 => Some("HOT_UPDATE"),
            0x40 => Some("CONFIRM"),
            0x50 => Some("LOCK"),
            0x60 => Some("INPLACE"),
            _ => None,
        },
        RM_HEAP2_ID => match op {
            0x10 => Some("PRUNE"),
            0x20 => Some("VACUUM"),
            0x30 => Some("FREEZE_PAGE"),
            0x40 => Some("VISIBLE"),
            0x50 => Some("MULTI_INSERT"),
            0x60 => Some("LOCK_UPDATED"),
            _ => None,
        },
        RM_XACT_ID => match op {
            0x00 => Some("COMMIT"),
            0x10 => Some("PREPARE"),
            0x20 => Some("ABORT"),
            0x30 => Some("COMMIT_PREPARED"),
            0x40 => Some("ABORT_PREPARED"),
            0x50 => Some("ASSIGNMENT"),
            _ => None,
        },
        RM_BTREE_ID => match op {
            0x00 => Some("INSERT_LEAF"),
            0x10 => Some("INSERT_UPPER"),
            0x20 => Some("INSERT_META"),
            0x30 => Some("SPLIT_L"),
            0x40 => Some("SPLIT_R"),
            0xA0 => Some("DELETE"),
            _ => None,
        },
        RM_XLOG_ID => match op {
            0x00 => Some("CHECKPOINT_SHUTDOWN"),
            0x10 => Some("CHECKPOINT_ONLINE"),
            0x20 => Some("NOOP"),
            0x30 => Some("NEXTOID"),
            0x40 => Some("SWITCH"),
            0x50 => Some("BACKUP_END"),
            0x60 => Some("PARAMETER_CHANGE"),
            0x70 => Some("RESTORE_POINT"),
            0x80 => Some("FPW_CHANGE"),
            0x90 => Some("END_OF_RECOVERY"),
            0xB0 => Some("FPI"),
            _ => None,
        },
        _ => None,
    };
    match known {
        Some(name) => name.to_string(),
        None => format!("OP_{op:02X}"),
    }
}

/// A parsed WAL page header (common fields; the long form's extra fields
/// only matter for sizing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalPageHeader {
    pub magic: u16,
    pub info: u16,
    pub timeline_id: u32,
    pub page_addr: u64,
    pub rem_len: u32,
}

pub fn parse_page_header(data: &[u8]) -> WalPageHeader {
    WalPageHeader {
        magic: u16_at(data, 0),
        info: u16_at(data, 2),
        timeline_id: u32_at(data, 4),
        page_addr: u64_at(data, 8),
        rem_len: u32_at(data, 16),
    }
}

impl WalPageHeader {
    pub fn is_long(&self) -> bool {
        self.info & XLP_LONG_HEADER != 0
    }

    pub fn header_size(&self) -> usize {
        if self.is_long() {
            LONG_PAGE_HEADER_SIZE
        } else {
            SHORT_PAGE_HEADER_SIZE
        }
    }
}

pub fn is_valid_magic(magic: u16) -> bool {
    matches!(
        magic,
        WAL_MAGIC_12 | WAL_MAGIC_13 | WAL_MAGIC_14 | WAL_MAGIC_15 | WAL_MAGIC_16
    )
}

pub fn version_from_magic(magic: u16) -> &'static str {
    match magic {
        WAL_MAGIC_12 => "12",
        WAL_MAGIC_13 => "13",
        WAL_MAGIC_14 => "14",
        WAL_MAGIC_15 => "15",
        WAL_MAGIC_16 => "16",
        _ => "unknown",
    }
}

/// One scanned record.
#[derive(Debug, Clone, Serialize)]
pub struct WalRecord {
    /// Byte offset of the record header within the segment.
    pub offset: usize,
    pub total_len: u32,
    pub xid: u32,
    pub prev_lsn: String,
    pub rmid: u8,
    pub rmgr: String,
    pub info: u8,
    pub operation: String,
    pub crc: u32,
}

/// Block reference ids 0..=32 address data blocks; everything else is a
/// data marker or garbage and ends the walk.
pub const XLR_MAX_BLOCK_ID: u8 = 32;
pub const XLR_BLOCK_ID_END: u8 = 0xFF;

const BKPBLOCK_SAME_REL: u8 = 0x80;

/// A registered block reference inside a record.
#[derive(Debug, Clone, Serialize)]
pub struct BlockRef {
    pub id: u8,
    pub fork_flags: u8,
    pub data_length: u16,
    pub spc_oid: u32,
    pub db_oid: u32,
    pub rel_oid: u32,
    pub block: u32,
}

/// Walks the block references at the start of a record's payload. The walk
/// stops at the end marker, at registered-data markers and at anything that
/// is not a defined block id.
pub fn parse_block_refs(data: &[u8]) -> Vec<BlockRef> {
    let mut blocks = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let id = data[pos];
        if id == XLR_BLOCK_ID_END || id > XLR_MAX_BLOCK_ID {
            break;
        }
        if pos + 4 > data.len() {
            break;
        }
        let fork_flags = data[pos + 1];
        let data_length = u16_at(data, pos + 2);
        pos += 4;

        let (mut spc, mut db, mut rel) = (0u32, 0u32, 0u32);
        if fork_flags & BKPBLOCK_SAME_REL == 0 {
            if pos + 12 > data.len() {
                break;
            }
            spc = u32_at(data, pos);
            db = u32_at(data, pos + 4);
            rel = u32_at(data, pos + 8);
            pos += 12;
        }
        if pos + 4 > data.len() {
            break;
        }
        let block = u32_at(data, pos);
        pos += 4;

        blocks.push(BlockRef {
            id,
            fork_flags,
            data_length,
            spc_oid: spc,
            db_oid: db,
            rel_oid: rel,
            block,
        });
    }
    blocks
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn zero_slice(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

/// Target position after a record of `total_len` bytes starting at `pos`,
/// accounting for the short page header at every page boundary the record
/// crosses.
fn advance_past_record(mut pos: usize, total_len: usize) -> usize {
    let mut left = total_len;
    loop {
        let room = WAL_PAGE_SIZE - pos % WAL_PAGE_SIZE;
        if left <= room {
            return pos + left;
        }
        left -= room;
        pos += room + SHORT_PAGE_HEADER_SIZE;
    }
}

/// Scans one segment file into its record list.
pub fn parse_wal_file(data: &[u8]) -> Result<Vec<WalRecord>> {
    if data.len() < SHORT_PAGE_HEADER_SIZE {
        bail!("WAL segment too small: {} bytes", data.len());
    }
    let header = parse_page_header(data);
    if !is_valid_magic(header.magic) {
        bail!("not a WAL segment: magic {:#06X}", header.magic);
    }

    let mut pos = header.header_size();
    // A record spilling over from the previous segment occupies the start
    // of the first page.
    if header.rem_len > 0 {
        pos += align8(header.rem_len as usize);
    }

    let mut records = Vec::new();
    while pos + RECORD_HEADER_SIZE <= data.len() {
        // Step over continuation-page headers.
        if pos % WAL_PAGE_SIZE == 0 {
            let page = parse_page_header(&data[pos..]);
            if !is_valid_magic(page.magic) {
                break;
            }
            pos += page.header_size();
            continue;
        }

        let total_len = u32_at(data, pos);
        if total_len == 0 {
            // end of the written region (or padding to the next page)
            let next_page = (pos / WAL_PAGE_SIZE + 1) * WAL_PAGE_SIZE;
            if next_page + SHORT_PAGE_HEADER_SIZE > data.len()
                || !zero_slice(&data[pos..next_page.min(data.len())])
            {
                break;
            }
            pos = next_page;
            continue;
        }

        if !(RECORD_HEADER_SIZE as u32..=0x0100_0000).contains(&total_len) {
            // garbage: re-sync on the next 8-byte boundary
            pos = align8(pos + 1);
            continue;
        }

        let xid = u32_at(data, pos + 4);
        let prev = u64_at(data, pos + 8);
        let info = data[pos + 16];
        let rmid = data[pos + 17];
        let crc = u32_at(data, pos + 20);

        records.push(WalRecord {
            offset: pos,
            total_len,
            xid,
            prev_lsn: format_lsn(prev),
            rmid,
            rmgr: rmgr_name(rmid),
            info,
            operation: operation_name(rmid, info),
            crc,
        });

        pos = align8(advance_past_record(pos, total_len as usize));
    }
    Ok(records)
}

/// A transaction-control record surfaced in the summary sample.
#[derive(Debug, Clone, Serialize)]
pub struct WalTransaction {
    pub xid: u32,
    pub operation: String,
    pub segment: String,
    pub offset: usize,
}

/// Aggregate over one or more segment files.
#[derive(Debug, Default, Serialize)]
pub struct WalSummary {
    pub segment_count: usize,
    pub record_count: usize,
    /// Server major version inferred from the first segment's magic.
    pub version: String,
    pub operations: HashMap<String, usize>,
    pub transactions: Vec<WalTransaction>,
}

const TRANSACTION_SAMPLE_LIMIT: usize = 100;

impl WalSummary {
    fn absorb(&mut self, segment: &str, records: &[WalRecord]) {
        self.segment_count += 1;
        self.record_count += records.len();
        for record in records {
            let key = format!("{}:{}", record.rmgr, record.operation);
            *self.operations.entry(key).or_insert(0) += 1;

            if record.rmid == RM_XACT_ID && self.transactions.len() < TRANSACTION_SAMPLE_LIMIT {
                self.transactions.push(WalTransaction {
                    xid: record.xid,
                    operation: record.operation.clone(),
                    segment: segment.to_string(),
                    offset: record.offset,
                });
            }
        }
    }
}

/// Scans every segment in a `pg_wal` directory (24-hex-digit file names).
pub fn scan_wal_dir(wal_dir: &Path) -> Result<WalSummary> {
    let mut names: Vec<String> = std::fs::read_dir(wal_dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.len() == 24 && n.bytes().all(|b| b.is_ascii_hexdigit()))
        .collect();
    names.sort();

    let mut summary = WalSummary::default();
    for name in names {
        let Ok(data) = std::fs::read(wal_dir.join(&name)) else {
            continue;
        };
        if summary.version.is_empty() && data.len() >= 2 {
            summary.version = version_from_magic(u16_at(&data, 0)).to_string();
        }
        if let Ok(records) = parse_wal_file(&data) {
            summary.absorb(&name, &records);
        }
    }
    Ok(summary)
}

/// Scans `<data_dir>/pg_wal`.
pub fn scan_wal(data_dir: &Path) -> Result<WalSummary> {
    scan_wal_dir(&data_dir.join("pg_wal"))
}
