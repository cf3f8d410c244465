//! # TOAST Plumbing
//!
//! Oversized attributes live out-of-line in a companion table, addressed
//! from the owning row by an 18-byte pointer datum:
//!
//! ```text
//! [0x01][tag][va_rawsize: u32][va_extinfo: u32][va_valueid: u32][va_toastrelid: u32]
//! ```
//!
//! `va_extinfo` packs the external size in its low 30 bits and, on servers
//! that support it, the compression method in the top 2 (0 = pglz, 1 = lz4).
//! The chunk table itself is an ordinary heap of
//! `(chunk_id oid, chunk_seq int4, chunk_data bytea)` rows.
//!
//! Reassembly concatenates chunk payloads in sequence order. Compressed
//! values are returned exactly as stored together with their method tag;
//! decompression is the caller's business.

use crate::binary::u32_at;
use crate::heap::{read_tuples, Column};
use crate::types::{self, read_varlena};
use hashbrown::HashMap;

/// Compression method recorded in a TOAST pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastCompression {
    None,
    Pglz,
    Lz4,
}

/// Parsed `varatt_external` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastPointer {
    /// Original datum size, varlena header included.
    pub raw_size: u32,
    /// Bytes actually stored out of line.
    pub ext_size: u32,
    /// Chunk id inside the TOAST table.
    pub value_id: u32,
    /// OID of the TOAST table holding the chunks.
    pub toast_relid: u32,
    pub compression: ToastCompression,
}

const VA_EXTSIZE_MASK: u32 = 0x3FFF_FFFF;
const VA_METHOD_SHIFT: u32 = 30;

/// Whether a datum is an external TOAST reference.
pub fn is_toast_pointer(data: &[u8]) -> bool {
    data.len() >= 2 && (data[0] == 0x01 || data[0] == 0x02)
}

/// Parses the pointer datum (marker byte included).
pub fn parse_toast_pointer(data: &[u8]) -> Option<ToastPointer> {
    if !is_toast_pointer(data) || data.len() < 18 {
        return None;
    }
    let raw_size = u32_at(data, 2);
    let extinfo = u32_at(data, 6);
    let ext_size = extinfo & VA_EXTSIZE_MASK;

    // Stored smaller than raw means the external bytes are compressed.
    let compression = if ext_size < raw_size.saturating_sub(4) {
        match extinfo >> VA_METHOD_SHIFT {
            1 => ToastCompression::Lz4,
            _ => ToastCompression::Pglz,
        }
    } else {
        ToastCompression::None
    };

    Some(ToastPointer {
        raw_size,
        ext_size,
        value_id: u32_at(data, 10),
        toast_relid: u32_at(data, 14),
        compression,
    })
}

/// One row of a TOAST table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastChunk {
    pub chunk_id: u32,
    pub chunk_seq: i32,
    pub data: Vec<u8>,
}

/// Fixed layout of every TOAST table.
pub fn toast_table_columns() -> Vec<Column> {
    vec![
        Column::new("chunk_id", types::OID_OID, 4),
        Column::new("chunk_seq", types::OID_INT4, 4),
        Column::new("chunk_data", types::OID_BYTEA, -1),
    ]
}

/// Reads all chunks from a TOAST table heap. The payload is taken as raw
/// bytes straight from the varlena, skipping string conversion.
pub fn read_toast_table(data: &[u8]) -> Vec<ToastChunk> {
    let mut chunks = Vec::new();
    for entry in read_tuples(data, true) {
        let user = entry.tuple.data;
        if user.len() < 8 {
            continue;
        }
        let chunk_id = u32_at(user, 0);
        let chunk_seq = u32_at(user, 4) as i32;
        let (payload, _) = read_varlena(&user[8..]);
        if let Some(payload) = payload {
            chunks.push(ToastChunk {
                chunk_id,
                chunk_seq,
                data: payload.to_vec(),
            });
        }
    }
    chunks
}

/// Concatenates the chunks of one value in sequence order. For compressed
/// values the result is the stored (still compressed) byte stream, clamped
/// to `ext_size` when it is nonzero.
pub fn reassemble_toast(
    chunks: &[ToastChunk],
    value_id: u32,
    compressed: bool,
    ext_size: usize,
) -> Option<Vec<u8>> {
    let mut own: Vec<&ToastChunk> = chunks.iter().filter(|c| c.chunk_id == value_id).collect();
    if own.is_empty() {
        return None;
    }
    own.sort_by_key(|c| c.chunk_seq);

    let mut out = Vec::new();
    for chunk in own {
        out.extend_from_slice(&chunk.data);
    }
    if !compressed && ext_size > 0 && out.len() > ext_size {
        out.truncate(ext_size);
    }
    Some(out)
}

/// Chunk cache for resolving many pointers against the same TOAST tables.
#[derive(Debug, Default)]
pub struct ToastReader {
    chunks: HashMap<u32, Vec<ToastChunk>>,
}

impl ToastReader {
    pub fn new() -> Self {
        Self {
            chunks: HashMap::new(),
        }
    }

    /// Ingests a TOAST table heap, grouping its chunks by value id.
    pub fn add_table(&mut self, data: &[u8]) {
        for chunk in read_toast_table(data) {
            self.chunks.entry(chunk.chunk_id).or_default().push(chunk);
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }

    /// Resolves a pointer to its stored bytes (compressed or not).
    pub fn fetch(&self, ptr: &ToastPointer) -> Option<Vec<u8>> {
        let group = self.chunks.get(&ptr.value_id)?;
        reassemble_toast(
            group,
            ptr.value_id,
            ptr.compression != ToastCompression::None,
            ptr.ext_size as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer_bytes(raw_size: u32, extinfo: u32, value_id: u32, relid: u32) -> Vec<u8> {
        let mut p = vec![0x01u8, 18];
        p.extend_from_slice(&raw_size.to_le_bytes());
        p.extend_from_slice(&extinfo.to_le_bytes());
        p.extend_from_slice(&value_id.to_le_bytes());
        p.extend_from_slice(&relid.to_le_bytes());
        p
    }

    #[test]
    fn pointer_detection() {
        assert!(!is_toast_pointer(&[]));
        assert!(!is_toast_pointer(&[0x05]));
        assert!(is_toast_pointer(&[0x01, 0x00]));
        assert!(is_toast_pointer(&[0x02, 0x00]));
        assert!(!is_toast_pointer(&[0x05, b'h', b'i']));
    }

    #[test]
    fn pointer_too_short_is_none() {
        assert!(parse_toast_pointer(&[0x01]).is_none());
        assert!(parse_toast_pointer(&pointer_bytes(100, 96, 5, 9)[..10]).is_none());
    }

    #[test]
    fn pointer_fields_decode() {
        let ptr = parse_toast_pointer(&pointer_bytes(104, 100, 7, 2613)).unwrap();
        assert_eq!(ptr.raw_size, 104);
        assert_eq!(ptr.ext_size, 100);
        assert_eq!(ptr.value_id, 7);
        assert_eq!(ptr.toast_relid, 2613);
        assert_eq!(ptr.compression, ToastCompression::None);
    }

    #[test]
    fn compression_method_bits() {
        // stored much smaller than raw: compressed, method pglz
        let ptr = parse_toast_pointer(&pointer_bytes(10_000, 500, 1, 1)).unwrap();
        assert_eq!(ptr.compression, ToastCompression::Pglz);
        // method bit 1 => lz4
        let extinfo = 500 | (1 << VA_METHOD_SHIFT);
        let ptr = parse_toast_pointer(&pointer_bytes(10_000, extinfo, 1, 1)).unwrap();
        assert_eq!(ptr.compression, ToastCompression::Lz4);
        assert_eq!(ptr.ext_size, 500);
    }

    #[test]
    fn reassembly_orders_and_filters() {
        let chunks = vec![
            ToastChunk {
                chunk_id: 1,
                chunk_seq: 1,
                data: b" world".to_vec(),
            },
            ToastChunk {
                chunk_id: 1,
                chunk_seq: 0,
                data: b"hello".to_vec(),
            },
            ToastChunk {
                chunk_id: 2,
                chunk_seq: 0,
                data: b"other".to_vec(),
            },
        ];
        assert_eq!(
            reassemble_toast(&chunks, 1, false, 11).unwrap(),
            b"hello world"
        );
        assert_eq!(reassemble_toast(&chunks, 99, false, 0), None);
    }

    #[test]
    fn empty_table_reads_no_chunks() {
        assert!(read_toast_table(&[]).is_empty());
        let mut reader = ToastReader::new();
        reader.add_table(&[]);
        assert_eq!(reader.chunk_count(), 0);
    }
}
