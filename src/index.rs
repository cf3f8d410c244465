//! # Index Page Classifier
//!
//! Index files reuse the heap page frame but hang access-method data off
//! the opaque `special` section at the end of each page. Classification
//! works from the back of the page forward:
//!
//! - Hash, GiST and SP-GiST stamp a page id in the last two bytes
//!   (`0xFF80`, `0xFF81`, `0xFF82`)
//! - B-tree keeps a vacuum cycle id there, which stays `<= 0xFF00`
//! - GIN is recognized by its flag bits in the special section
//!
//! The first page is re-read as a metapage when its META flag is set:
//! B-tree metapages carry the magic `0x053162` plus root/level pointers,
//! hash metapages the bucket geometry, GIN metapages pending-list stats.
//!
//! Only structure is reported (flags, links, levels, item counts, free
//! space); index tuples themselves are not decoded.

use crate::binary::{u16_at, u32_at, u64_at};
use crate::heap::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::wal::format_lsn;
use eyre::{bail, Result};
use serde::Serialize;
use smallvec::SmallVec;

/// Access method of an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Unknown,
    Btree,
    Hash,
    Gist,
    Gin,
    Spgist,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Btree => "btree",
            IndexType::Hash => "hash",
            IndexType::Gist => "gist",
            IndexType::Gin => "gin",
            IndexType::Spgist => "spgist",
            IndexType::Unknown => "unknown",
        }
    }
}

// B-tree special section.
pub const BT_MAX_CYCLE_ID: u16 = 0xFF00;
pub const BT_META_MAGIC: u32 = 0x0005_3162;
pub const BTP_LEAF: u16 = 1 << 0;
pub const BTP_ROOT: u16 = 1 << 1;
pub const BTP_DELETED: u16 = 1 << 2;
pub const BTP_META: u16 = 1 << 3;
pub const BTP_HALF_DEAD: u16 = 1 << 4;
pub const BTP_SPLIT_END: u16 = 1 << 5;
pub const BTP_HAS_GARBAGE: u16 = 1 << 6;
pub const BTP_INCOMPLETE_SPLIT: u16 = 1 << 7;

// Page-id sentinels in the last two bytes of the page.
pub const HASH_PAGE_ID: u16 = 0xFF80;
pub const GIST_PAGE_ID: u16 = 0xFF81;
pub const SPGIST_PAGE_ID: u16 = 0xFF82;

// Hash special flags.
pub const LH_OVERFLOW_PAGE: u16 = 1 << 0;
pub const LH_BUCKET_PAGE: u16 = 1 << 1;
pub const LH_BITMAP_PAGE: u16 = 1 << 2;
pub const LH_META_PAGE: u16 = 1 << 3;

// GiST special flags.
pub const F_LEAF: u16 = 1 << 0;
pub const F_DELETED: u16 = 1 << 1;
pub const F_TUPLES_DELETED: u16 = 1 << 2;
pub const F_FOLLOW_RIGHT: u16 = 1 << 3;
pub const F_HAS_GARBAGE: u16 = 1 << 4;

// GIN special flags.
pub const GIN_DATA: u16 = 1 << 0;
pub const GIN_LEAF: u16 = 1 << 1;
pub const GIN_DELETED: u16 = 1 << 2;
pub const GIN_META: u16 = 1 << 3;
pub const GIN_LIST: u16 = 1 << 4;
pub const GIN_LIST_FULLROW: u16 = 1 << 5;
pub const GIN_INCOMPLETE_SPLIT: u16 = 1 << 6;
pub const GIN_COMPRESSED: u16 = 1 << 7;

// SP-GiST special flags.
pub const SPGIST_META: u16 = 1 << 0;
pub const SPGIST_DELETED: u16 = 1 << 1;
pub const SPGIST_LEAF: u16 = 1 << 2;
pub const SPGIST_NULLS: u16 = 1 << 3;

/// Structure report for one index page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexPageInfo {
    pub page_number: u32,
    pub index_type: String,
    pub is_meta: bool,
    pub is_leaf: bool,
    pub is_root: bool,
    pub is_deleted: bool,
    pub flags: u16,
    pub flag_names: Vec<&'static str>,
    pub level: u32,
    pub prev_block: u32,
    pub next_block: u32,
    pub right_link: u32,
    pub item_count: usize,
    pub free_space: usize,
    pub lsn: String,
}

/// B-tree metapage.
#[derive(Debug, Clone, Serialize)]
pub struct BtreeMetaPage {
    pub magic: u32,
    pub version: u32,
    pub root: u32,
    pub level: u32,
    pub fast_root: u32,
    pub fast_level: u32,
}

/// Hash metapage geometry.
#[derive(Debug, Clone, Serialize)]
pub struct HashMetaPage {
    pub magic: u32,
    pub version: u32,
    pub max_bucket: u32,
    pub high_mask: u32,
    pub low_mask: u32,
    pub ffactor: u16,
}

/// GIN metapage pending-list stats.
#[derive(Debug, Clone, Serialize)]
pub struct GinMetaPage {
    pub version: u32,
    pub pending_head: u32,
    pub pending_tail: u32,
    pub tail_free_size: u32,
    pub n_pending_pages: u32,
    pub n_pending_heap_tuples: u64,
    pub n_total_pages: u32,
    pub n_entry_pages: u32,
    pub n_data_pages: u32,
    pub n_entries: u64,
}

/// Decoded metapage, when the first page carries one.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IndexMeta {
    Btree(BtreeMetaPage),
    Hash(HashMetaPage),
    Gin(GinMetaPage),
}

/// Whole-file report.
#[derive(Debug, Serialize)]
pub struct IndexInfo {
    #[serde(rename = "type")]
    pub index_type: String,
    pub total_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<IndexMeta>,
    pub root_page: u32,
    pub levels: u32,
    pub pages: Vec<IndexPageInfo>,
}

/// Parses an index file into its per-page structure report.
pub fn parse_index_file(data: &[u8]) -> Result<IndexInfo> {
    if data.len() < PAGE_SIZE {
        bail!("index file too small: {} bytes", data.len());
    }

    let index_type = detect_index_type(&data[..PAGE_SIZE]);
    let mut info = IndexInfo {
        index_type: index_type.as_str().to_string(),
        total_pages: data.len() / PAGE_SIZE,
        meta: None,
        root_page: 0,
        levels: 0,
        pages: Vec::new(),
    };

    match index_type {
        IndexType::Btree => {
            if let Some(meta) = parse_btree_meta(&data[..PAGE_SIZE]) {
                info.root_page = meta.root;
                info.levels = meta.level;
                info.meta = Some(IndexMeta::Btree(meta));
            }
        }
        IndexType::Hash => {
            info.meta = parse_hash_meta(&data[..PAGE_SIZE]).map(IndexMeta::Hash);
        }
        IndexType::Gin => {
            info.meta = parse_gin_meta(&data[..PAGE_SIZE]).map(IndexMeta::Gin);
        }
        _ => {}
    }

    for page_num in 0..info.total_pages {
        let page = &data[page_num * PAGE_SIZE..(page_num + 1) * PAGE_SIZE];
        info.pages
            .push(parse_index_page(page, page_num as u32, index_type));
    }
    Ok(info)
}

/// Classifies a page by sentinel, cycle id or flag pattern.
pub fn detect_index_type(page: &[u8]) -> IndexType {
    if page.len() < PAGE_SIZE {
        return IndexType::Unknown;
    }
    let special = u16_at(page, 16) as usize;
    if special == 0 || special >= PAGE_SIZE {
        return IndexType::Unknown;
    }
    let special_size = PAGE_SIZE - special;

    if special_size >= 2 {
        match u16_at(page, PAGE_SIZE - 2) {
            HASH_PAGE_ID => return IndexType::Hash,
            GIST_PAGE_ID => return IndexType::Gist,
            SPGIST_PAGE_ID => return IndexType::Spgist,
            _ => {}
        }
    }

    // B-tree opaque: prev u32, next u32, level u32, flags u16, cycle id u16.
    if special_size >= 16 {
        let cycle_id = u16_at(page, special + 14);
        let flags = u16_at(page, special + 12);
        if cycle_id <= BT_MAX_CYCLE_ID {
            if flags & BTP_META != 0 {
                if u32_at(page, PAGE_HEADER_SIZE) == BT_META_MAGIC {
                    return IndexType::Btree;
                }
            } else {
                return IndexType::Btree;
            }
        }
    }

    if special_size >= 8 {
        let flags = u16_at(page, special + 6);
        if flags & (GIN_META | GIN_DATA | GIN_LIST) != 0 {
            return IndexType::Gin;
        }
    }

    IndexType::Unknown
}

/// Structure report for one page of a known index type.
pub fn parse_index_page(page: &[u8], page_number: u32, index_type: IndexType) -> IndexPageInfo {
    let mut info = IndexPageInfo {
        page_number,
        index_type: index_type.as_str().to_string(),
        ..IndexPageInfo::default()
    };
    if page.len() < PAGE_SIZE {
        return info;
    }

    info.lsn = format_lsn(u64_at(page, 0));
    let lower = u16_at(page, 12) as usize;
    let upper = u16_at(page, 14) as usize;
    let special = u16_at(page, 16) as usize;

    info.free_space = upper.saturating_sub(lower);
    info.item_count = lower.saturating_sub(PAGE_HEADER_SIZE) / 4;

    if special >= PAGE_SIZE {
        return info;
    }
    let special_data = &page[special..];

    let mut names: SmallVec<[&'static str; 8]> = SmallVec::new();
    match index_type {
        IndexType::Btree => {
            info.prev_block = u32_at(special_data, 0);
            info.next_block = u32_at(special_data, 4);
            info.level = u32_at(special_data, 8);
            info.flags = u16_at(special_data, 12);

            info.is_leaf = info.flags & BTP_LEAF != 0;
            info.is_root = info.flags & BTP_ROOT != 0;
            info.is_meta = info.flags & BTP_META != 0;
            info.is_deleted = info.flags & BTP_DELETED != 0;

            for (bit, name) in [
                (BTP_LEAF, "LEAF"),
                (BTP_ROOT, "ROOT"),
                (BTP_DELETED, "DELETED"),
                (BTP_META, "META"),
                (BTP_HALF_DEAD, "HALF_DEAD"),
                (BTP_SPLIT_END, "SPLIT_END"),
                (BTP_HAS_GARBAGE, "HAS_GARBAGE"),
                (BTP_INCOMPLETE_SPLIT, "INCOMPLETE_SPLIT"),
            ] {
                if info.flags & bit != 0 {
                    names.push(name);
                }
            }
        }
        IndexType::Hash => {
            info.prev_block = u32_at(special_data, 0);
            info.next_block = u32_at(special_data, 4);
            let bucket = u32_at(special_data, 8);
            info.flags = u16_at(special_data, 12);

            info.is_meta = info.flags & LH_META_PAGE != 0;
            if info.flags & LH_BUCKET_PAGE != 0 {
                names.push("BUCKET");
                info.level = bucket;
            }
            if info.flags & LH_OVERFLOW_PAGE != 0 {
                names.push("OVERFLOW");
            }
            if info.flags & LH_BITMAP_PAGE != 0 {
                names.push("BITMAP");
            }
            if info.flags & LH_META_PAGE != 0 {
                names.push("META");
            }
        }
        IndexType::Gist => {
            // NSN u64, rightlink u32, flags u16
            info.right_link = u32_at(special_data, 8);
            info.flags = u16_at(special_data, 12);

            info.is_leaf = info.flags & F_LEAF != 0;
            info.is_deleted = info.flags & F_DELETED != 0;
            for (bit, name) in [
                (F_LEAF, "LEAF"),
                (F_DELETED, "DELETED"),
                (F_TUPLES_DELETED, "TUPLES_DELETED"),
                (F_FOLLOW_RIGHT, "FOLLOW_RIGHT"),
                (F_HAS_GARBAGE, "HAS_GARBAGE"),
            ] {
                if info.flags & bit != 0 {
                    names.push(name);
                }
            }
        }
        IndexType::Gin => {
            info.right_link = u32_at(special_data, 0);
            let max_off = u16_at(special_data, 4);
            info.flags = u16_at(special_data, 6);

            info.item_count = max_off as usize;
            info.is_leaf = info.flags & GIN_LEAF != 0;
            info.is_meta = info.flags & GIN_META != 0;
            info.is_deleted = info.flags & GIN_DELETED != 0;
            for (bit, name) in [
                (GIN_DATA, "DATA"),
                (GIN_LEAF, "LEAF"),
                (GIN_DELETED, "DELETED"),
                (GIN_META, "META"),
                (GIN_LIST, "LIST"),
                (GIN_LIST_FULLROW, "LIST_FULLROW"),
                (GIN_INCOMPLETE_SPLIT, "INCOMPLETE_SPLIT"),
                (GIN_COMPRESSED, "COMPRESSED"),
            ] {
                if info.flags & bit != 0 {
                    names.push(name);
                }
            }
        }
        IndexType::Spgist => {
            info.flags = u16_at(special_data, 0);
            info.is_leaf = info.flags & SPGIST_LEAF != 0;
            info.is_meta = info.flags & SPGIST_META != 0;
            info.is_deleted = info.flags & SPGIST_DELETED != 0;
            for (bit, name) in [
                (SPGIST_META, "META"),
                (SPGIST_DELETED, "DELETED"),
                (SPGIST_LEAF, "LEAF"),
                (SPGIST_NULLS, "NULLS"),
            ] {
                if info.flags & bit != 0 {
                    names.push(name);
                }
            }
        }
        IndexType::Unknown => {}
    }

    info.flag_names = names.into_vec();
    info
}

fn parse_btree_meta(page: &[u8]) -> Option<BtreeMetaPage> {
    let special = u16_at(page, 16) as usize;
    if special >= PAGE_SIZE {
        return None;
    }
    if u16_at(page, special + 12) & BTP_META == 0 {
        return None;
    }
    let data = &page[PAGE_HEADER_SIZE..];
    let magic = u32_at(data, 0);
    if magic != BT_META_MAGIC {
        return None;
    }
    Some(BtreeMetaPage {
        magic,
        version: u32_at(data, 4),
        root: u32_at(data, 8),
        level: u32_at(data, 12),
        fast_root: u32_at(data, 16),
        fast_level: u32_at(data, 20),
    })
}

fn parse_hash_meta(page: &[u8]) -> Option<HashMetaPage> {
    let special = u16_at(page, 16) as usize;
    if special >= PAGE_SIZE {
        return None;
    }
    if u16_at(page, special + 12) & LH_META_PAGE == 0 {
        return None;
    }
    let data = &page[PAGE_HEADER_SIZE..];
    Some(HashMetaPage {
        magic: u32_at(data, 0),
        version: u32_at(data, 4),
        max_bucket: u32_at(data, 8),
        high_mask: u32_at(data, 12),
        low_mask: u32_at(data, 20),
        ffactor: u16_at(data, 24),
    })
}

fn parse_gin_meta(page: &[u8]) -> Option<GinMetaPage> {
    let special = u16_at(page, 16) as usize;
    if special >= PAGE_SIZE || PAGE_SIZE - special < 8 {
        return None;
    }
    if u16_at(page, special + 6) & GIN_META == 0 {
        return None;
    }
    let data = &page[PAGE_HEADER_SIZE..];
    Some(GinMetaPage {
        version: u32_at(data, 0),
        pending_head: u32_at(data, 4),
        pending_tail: u32_at(data, 8),
        tail_free_size: u32_at(data, 12),
        n_pending_pages: u32_at(data, 16),
        n_pending_heap_tuples: u64_at(data, 24),
        n_total_pages: u32_at(data, 32),
        n_entry_pages: u32_at(data, 36),
        n_data_pages: u32_at(data, 40),
        n_entries: u64_at(data, 48),
    })
}
