//! # Heap Decoding
//!
//! Turns raw heap files into typed rows:
//!
//! 1. `page`: page header + line-pointer walk
//! 2. `tuple`: tuple headers, null bitmaps, MVCC visibility
//! 3. this module: the schema-driven attribute walk over a tuple's user data
//! 4. `toast`: out-of-line value plumbing
//!
//! ## Attribute Walk
//!
//! Columns are consumed in physical order. For each column the cursor first
//! advances to the column's alignment (the `attalign` character when the
//! catalog supplied one, a type-OID table otherwise), then the value is read:
//!
//! | `attlen` | Consumption |
//! |----------|-------------|
//! | `> 0` | exactly that many bytes |
//! | `-1` | varlena: header decides short/long/TOAST |
//! | `-2` | bytes through the next NUL |
//!
//! NULL columns consume nothing. Varlena columns are special-cased for
//! alignment: a short-form datum starts unaligned, so the cursor only rounds
//! up to 4 when it is sitting on a 0x00 pad byte (a value can never start
//! with one). Dropped columns stay in the walk so that rows written before
//! the drop keep their original layout.

pub mod page;
pub mod toast;
pub mod tuple;

pub use page::{parse_page, ItemId, PageHeader, TupleEntry, PAGE_HEADER_SIZE, PAGE_SIZE};
pub use tuple::{parse_heap_tuple, HeapTuple, HeapTupleHeader, TUPLE_HEADER_SIZE};

use crate::binary::{align_of_char, align_up};
use crate::types::{self, decode, read_varlena, safe_string, Row, Value};

/// A column as the row decoder needs it: the five facts that drive the
/// attribute walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_oid: u32,
    /// `> 0` fixed width, `-1` varlena, `-2` NUL-terminated.
    pub len: i32,
    /// 1-based physical position; 0 falls back to list position.
    pub attnum: i32,
    /// `attalign` character (`c`/`s`/`i`/`d`); 0 when unknown.
    pub align: u8,
}

impl Column {
    pub fn new(name: impl Into<String>, type_oid: u32, len: i32) -> Self {
        Self {
            name: name.into(),
            type_oid,
            len,
            attnum: 0,
            align: 0,
        }
    }
}

/// Extracts tuples from every valid page of a heap file.
pub fn read_tuples(data: &[u8], visible_only: bool) -> Vec<TupleEntry<'_>> {
    let mut entries = Vec::new();
    let mut off = 0;
    while off + PAGE_SIZE <= data.len() {
        for mut entry in parse_page(&data[off..off + PAGE_SIZE]) {
            if !visible_only || entry.tuple.is_visible() {
                entry.page_offset = off;
                entries.push(entry);
            }
        }
        off += PAGE_SIZE;
    }
    entries
}

/// Decodes every (optionally only visible) tuple of a heap file.
pub fn read_rows(data: &[u8], columns: &[Column], visible_only: bool) -> Vec<Row> {
    read_tuples(data, visible_only)
        .iter()
        .filter_map(|e| decode_tuple(&e.tuple, columns))
        .collect()
}

/// Decodes the whole file, splitting rows into (visible, deleted).
pub fn read_rows_with_deleted(data: &[u8], columns: &[Column]) -> (Vec<Row>, Vec<Row>) {
    let mut visible = Vec::new();
    let mut deleted = Vec::new();
    for entry in read_tuples(data, false) {
        if let Some(row) = decode_tuple(&entry.tuple, columns) {
            if entry.tuple.is_visible() {
                visible.push(row);
            } else {
                deleted.push(row);
            }
        }
    }
    (visible, deleted)
}

/// Rows that fail the visibility predicate: deleted or aborted versions that
/// still exist physically.
pub fn read_deleted_rows(data: &[u8], columns: &[Column]) -> Vec<Row> {
    read_rows_with_deleted(data, columns).1
}

/// Decodes one tuple against a column list. Returns `None` for tuples with
/// no user data.
pub fn decode_tuple(tuple: &HeapTuple<'_>, columns: &[Column]) -> Option<Row> {
    if tuple.data.is_empty() {
        return None;
    }

    let data = tuple.data;
    let mut row = Row::with_capacity(columns.len());
    let mut offset = 0usize;

    for (idx, col) in columns.iter().enumerate() {
        let attnum = if col.attnum > 0 {
            col.attnum
        } else {
            idx as i32 + 1
        };

        if col.len != -1 {
            offset = align_up(offset, fixed_align(col));
        }

        if tuple.is_null(attnum) {
            row.push(col.name.clone(), Value::Null);
            continue;
        }

        if col.len == -1 {
            offset = varlena_align(data, offset, col);
        }

        let (value, consumed) = read_value(data, offset, col);
        row.push(col.name.clone(), value);
        offset += consumed;
    }

    Some(row)
}

/// Alignment for fixed-width and cstring columns: catalog `attalign` when
/// present, else the type-OID table, else a width heuristic.
fn fixed_align(col: &Column) -> usize {
    let from_char = align_of_char(col.align);
    if from_char != 0 {
        return from_char;
    }
    type_align(col.type_oid, col.len)
}

pub(crate) fn type_align(type_oid: u32, len: i32) -> usize {
    match type_oid {
        types::OID_INT8 | types::OID_FLOAT8 | types::OID_TIMESTAMP | types::OID_TIMESTAMPTZ => 8,
        types::OID_INT4 | types::OID_OID | types::OID_FLOAT4 => 4,
        types::OID_INT2 => 2,
        _ => match len {
            4 => 4,
            2 => 2,
            _ => 1,
        },
    }
}

/// Varlena datums only carry padding before a 4-byte header; short-form
/// datums start unaligned. A 0x00 at the cursor can only be padding.
fn varlena_align(data: &[u8], offset: usize, col: &Column) -> usize {
    if data.get(offset).copied() != Some(0) {
        return offset;
    }
    let mut align = align_of_char(col.align);
    if align <= 1 {
        align = 4;
    }
    align_up(offset, align)
}

fn read_value(data: &[u8], offset: usize, col: &Column) -> (Value, usize) {
    if offset >= data.len() {
        return (Value::Null, 0);
    }
    let rest = &data[offset..];

    if col.len > 0 {
        let n = col.len as usize;
        if rest.len() < n {
            return (Value::Null, 0);
        }
        return (decode(&rest[..n], col.type_oid), n);
    }

    if col.len == -1 {
        return match read_varlena(rest) {
            (Some(payload), consumed) => (decode(payload, col.type_oid), consumed),
            (None, consumed) => (Value::Null, consumed.max(1)),
        };
    }

    // NUL-terminated
    match rest.iter().position(|&b| b == 0) {
        Some(i) => (Value::Text(safe_string(&rest[..i])), i + 1),
        None => (Value::Text(safe_string(rest)), rest.len()),
    }
}
