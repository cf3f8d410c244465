//! # JSONB Binary Decoder
//!
//! On-disk JSONB is a tree of containers. Each container is:
//!
//! ```text
//! +-------------+---------------------+------------------+
//! | Header u32  | JEntry u32 x N      | payload bytes    |
//! +-------------+---------------------+------------------+
//!
//! Header:
//!   bits 0-27   count (object: key/value pairs, array: elements)
//!   bit 28      scalar pseudo-array flag
//!   bit 29      object
//!   bit 30      array
//!
//! JEntry:
//!   bits 0-27   length, or absolute end offset when bit 31 (HAS_OFF) is set
//!   bits 28-30  type: string 0x0, numeric 0x1, false 0x2, true 0x3,
//!               null 0x4, container 0x5
//! ```
//!
//! For objects the JEntry table holds all keys first, then all values; value
//! payloads start after the last key byte. An entry's `(start, length)` is
//! reconstructed by scanning backward to the nearest HAS_OFF entry and
//! summing lengths since then. Numeric and nested-container payloads are
//! 4-byte aligned, with the padding counted inside the entry length.
//!
//! Every offset is re-checked against the payload; a violation turns that
//! single entry into JSON null rather than failing the datum.

use crate::binary::{align_up, u32_at};
use crate::types::numeric::decode_numeric;
use crate::types::{safe_string, Value};
use std::collections::BTreeMap;

const JB_CMASK: u32 = 0x0FFF_FFFF;
const JB_FSCALAR: u32 = 0x1000_0000;
const JB_FOBJECT: u32 = 0x2000_0000;
const JB_FARRAY: u32 = 0x4000_0000;

const JENTRY_OFF_MASK: u32 = 0x0FFF_FFFF;
const JENTRY_HAS_OFF: u32 = 0x8000_0000;
const JENTRY_TYPE_MASK: u32 = 0x7000_0000;
const JENTRY_STRING: u32 = 0x0000_0000;
const JENTRY_NUMERIC: u32 = 0x1000_0000;
const JENTRY_BOOL_FALSE: u32 = 0x2000_0000;
const JENTRY_BOOL_TRUE: u32 = 0x3000_0000;
const JENTRY_NULL: u32 = 0x4000_0000;
const JENTRY_CONTAINER: u32 = 0x5000_0000;

// Anything past this is treated as a corrupt header rather than a container.
const MAX_ENTRIES: usize = 10_000;

/// Parses a JSONB container. Returns `None` when the header cannot describe
/// a container, letting the caller fall back to a sanitized string.
pub fn parse_jsonb(data: &[u8]) -> Option<Value> {
    if data.len() < 4 {
        return None;
    }

    let header = u32_at(data, 0);
    let count = (header & JB_CMASK) as usize;
    let is_object = header & JB_FOBJECT != 0;
    let is_array = header & JB_FARRAY != 0;

    if (!is_object && !is_array) || count == 0 || count > MAX_ENTRIES {
        return None;
    }

    let num_entries = if is_object { count * 2 } else { count };
    if 4 + num_entries * 4 > data.len() {
        return None;
    }

    let entries: Vec<u32> = (0..num_entries).map(|i| u32_at(data, 4 + i * 4)).collect();
    let data_start = 4 + num_entries * 4;

    let result = if is_object {
        parse_object(data, &entries, data_start, count)
    } else {
        parse_array(data, &entries, data_start, count)
    };

    // A scalar is stored as a one-element array with the scalar flag set.
    if header & JB_FSCALAR != 0 {
        if let Value::List(items) = &result {
            if items.len() == 1 {
                return Some(items[0].clone());
            }
        }
    }
    Some(result)
}

fn parse_object(data: &[u8], entries: &[u32], data_start: usize, count: usize) -> Value {
    let (keys, vals) = entries.split_at(count);
    let keys_len = total_len(keys);

    let mut result = BTreeMap::new();
    for i in 0..count {
        let (k_off, k_len) = entry_off_len(keys, i, 0);
        let key = match data.get(data_start + k_off..data_start + k_off + k_len) {
            Some(bytes) => safe_string(bytes),
            None => String::new(),
        };

        let (v_off, v_len) = entry_off_len(vals, i, keys_len);
        result.insert(key, decode_jentry(data, data_start + v_off, v_len, vals[i]));
    }
    Value::Map(result)
}

fn parse_array(data: &[u8], entries: &[u32], data_start: usize, count: usize) -> Value {
    let mut result = Vec::with_capacity(count);
    for i in 0..count {
        let (off, len) = entry_off_len(entries, i, 0);
        result.push(decode_jentry(data, data_start + off, len, entries[i]));
    }
    Value::List(result)
}

fn total_len(entries: &[u32]) -> usize {
    if entries.is_empty() {
        return 0;
    }
    end_offset(entries, entries.len() - 1)
}

/// Resolves entry `idx` to `(offset-from-base, length)`.
fn entry_off_len(entries: &[u32], idx: usize, base: usize) -> (usize, usize) {
    let je = entries[idx];
    let val = (je & JENTRY_OFF_MASK) as usize;
    let start = if idx > 0 { end_offset(entries, idx - 1) } else { 0 };
    if je & JENTRY_HAS_OFF != 0 {
        (base + start, val.saturating_sub(start))
    } else {
        (base + start, val)
    }
}

/// End offset of entry `idx`: nearest HAS_OFF entry at or before it plus the
/// lengths stored since.
fn end_offset(entries: &[u32], idx: usize) -> usize {
    for i in (0..=idx).rev() {
        if entries[i] & JENTRY_HAS_OFF != 0 {
            let mut base = (entries[i] & JENTRY_OFF_MASK) as usize;
            for entry in &entries[i + 1..=idx] {
                base += (entry & JENTRY_OFF_MASK) as usize;
            }
            return base;
        }
    }
    entries[..=idx]
        .iter()
        .map(|e| (e & JENTRY_OFF_MASK) as usize)
        .sum()
}

fn decode_jentry(data: &[u8], off: usize, length: usize, je: u32) -> Value {
    match je & JENTRY_TYPE_MASK {
        JENTRY_STRING => match data.get(off..off + length) {
            Some(bytes) => Value::Text(safe_string(bytes)),
            None => Value::Null,
        },
        JENTRY_NUMERIC => match aligned_payload(data, off, length) {
            Some(payload) => decode_jnumeric(payload),
            None => Value::Null,
        },
        JENTRY_CONTAINER => match aligned_payload(data, off, length) {
            Some(payload) => parse_jsonb(payload).unwrap_or(Value::Null),
            None => Value::Null,
        },
        JENTRY_NULL => Value::Null,
        JENTRY_BOOL_FALSE => Value::Bool(false),
        JENTRY_BOOL_TRUE => Value::Bool(true),
        _ => Value::Null,
    }
}

/// Aligns a numeric/container payload up to 4 bytes. The padding is part of
/// the entry length; the remainder is clamped to the datum so a fixture with
/// an oversized length degrades instead of vanishing.
fn aligned_payload(data: &[u8], off: usize, length: usize) -> Option<&[u8]> {
    let aligned = align_up(off, 4);
    let pad = aligned - off;
    if pad >= length || aligned >= data.len() {
        return None;
    }
    let end = (aligned + length - pad).min(data.len());
    Some(&data[aligned..end])
}

/// Numeric values inside JSONB carry their own varlena header.
fn decode_jnumeric(data: &[u8]) -> Value {
    if data.len() < 4 {
        return Value::Null;
    }
    let header = u32_at(data, 0);
    if header & 3 == 0 {
        let n = (header >> 2) as usize;
        if n > 4 && data.len() >= n {
            return decode_numeric(&data[4..n]);
        }
    } else {
        let n = ((header & 0xFF) >> 1) as usize;
        if n > 1 && data.len() >= n {
            return decode_numeric(&data[1..n]);
        }
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jsonb_string(s: &str) -> Vec<u8> {
        // scalar string: count=1 array with the scalar flag
        let mut data = Vec::new();
        data.extend_from_slice(&(1u32 | JB_FARRAY | JB_FSCALAR).to_le_bytes());
        data.extend_from_slice(&(JENTRY_STRING | s.len() as u32).to_le_bytes());
        data.extend_from_slice(s.as_bytes());
        data
    }

    #[test]
    fn scalar_string_unwraps() {
        let data = jsonb_string("hi");
        assert_eq!(parse_jsonb(&data), Some(Value::Text("hi".into())));
    }

    #[test]
    fn array_of_bools_and_null() {
        let mut data = Vec::new();
        data.extend_from_slice(&(3u32 | JB_FARRAY).to_le_bytes());
        data.extend_from_slice(&JENTRY_BOOL_TRUE.to_le_bytes());
        data.extend_from_slice(&JENTRY_BOOL_FALSE.to_le_bytes());
        data.extend_from_slice(&JENTRY_NULL.to_le_bytes());
        assert_eq!(
            parse_jsonb(&data),
            Some(Value::List(vec![
                Value::Bool(true),
                Value::Bool(false),
                Value::Null
            ]))
        );
    }

    #[test]
    fn object_with_string_value() {
        // {"k": "v"}
        let mut data = Vec::new();
        data.extend_from_slice(&(1u32 | JB_FOBJECT).to_le_bytes());
        data.extend_from_slice(&(JENTRY_STRING | 1).to_le_bytes()); // key "k"
        data.extend_from_slice(&(JENTRY_STRING | 1).to_le_bytes()); // value "v"
        data.extend_from_slice(b"kv");

        let mut expected = BTreeMap::new();
        expected.insert("k".to_string(), Value::Text("v".into()));
        assert_eq!(parse_jsonb(&data), Some(Value::Map(expected)));
    }

    #[test]
    fn object_with_numeric_value() {
        // {"a": 1}: numeric payload is 4-aligned after the 1-byte key, with
        // the padding counted in the entry length.
        let mut data = Vec::new();
        data.extend_from_slice(&(1u32 | JB_FOBJECT).to_le_bytes());
        data.extend_from_slice(&(JENTRY_STRING | 1).to_le_bytes());
        // value: 3 pad bytes + short varlena (0x0B => total 5) + numeric 1
        data.extend_from_slice(&(JENTRY_NUMERIC | 8).to_le_bytes());
        data.push(b'a');
        data.extend_from_slice(&[0, 0, 0]); // alignment padding
        data.extend_from_slice(&[0x0B, 0x00, 0x80, 0x01, 0x00]);

        let parsed = parse_jsonb(&data).unwrap();
        match parsed {
            Value::Map(map) => assert_eq!(map.get("a"), Some(&Value::Float(1.0))),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn spec_object_fixture_keeps_key() {
        // The distilled {"a": 1} fixture with an oversized numeric entry
        // length; the key must survive even if the value degrades.
        let data = [
            0x01, 0x00, 0x00, 0x20, // header: count=1, object
            0x01, 0x00, 0x00, 0x00, // key entry: string len=1
            0x0C, 0x00, 0x00, 0x10, // value entry: numeric len=12
            0x61, // "a"
            0x00, 0x00, 0x00, // padding
            0x05, 0x80, 0x01, 0x00, // numeric payload
        ];
        match parse_jsonb(&data).unwrap() {
            Value::Map(map) => assert!(map.contains_key("a")),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn nested_container() {
        // {"a": [true]}
        let mut inner = Vec::new();
        inner.extend_from_slice(&(1u32 | JB_FARRAY).to_le_bytes());
        inner.extend_from_slice(&JENTRY_BOOL_TRUE.to_le_bytes());

        let mut data = Vec::new();
        data.extend_from_slice(&(1u32 | JB_FOBJECT).to_le_bytes());
        data.extend_from_slice(&(JENTRY_STRING | 1).to_le_bytes());
        data.extend_from_slice(&(JENTRY_CONTAINER | (3 + inner.len()) as u32).to_le_bytes());
        data.push(b'a');
        data.extend_from_slice(&[0, 0, 0]);
        data.extend_from_slice(&inner);

        match parse_jsonb(&data).unwrap() {
            Value::Map(map) => {
                assert_eq!(map.get("a"), Some(&Value::List(vec![Value::Bool(true)])))
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn has_off_entries_resolve() {
        // ["ab", "cd"] where the second entry stores an absolute end offset.
        let mut data = Vec::new();
        data.extend_from_slice(&(2u32 | JB_FARRAY).to_le_bytes());
        data.extend_from_slice(&(JENTRY_STRING | 2).to_le_bytes());
        data.extend_from_slice(&(JENTRY_STRING | JENTRY_HAS_OFF | 4).to_le_bytes());
        data.extend_from_slice(b"abcd");
        assert_eq!(
            parse_jsonb(&data),
            Some(Value::List(vec![
                Value::Text("ab".into()),
                Value::Text("cd".into())
            ]))
        );
    }

    #[test]
    fn rejects_garbage_headers() {
        assert_eq!(parse_jsonb(&[]), None);
        assert_eq!(parse_jsonb(&[0x01, 0x02]), None);
        // neither object nor array flag
        assert_eq!(parse_jsonb(&[0x01, 0x00, 0x00, 0x00]), None);
        // entry count beyond the sanity cap
        assert_eq!(parse_jsonb(&[0xFF, 0xFF, 0xFF, 0x4F]), None);
        // count promises more entries than the datum holds
        assert_eq!(parse_jsonb(&[0x09, 0x00, 0x00, 0x40, 0x00]), None);
    }

    #[test]
    fn out_of_bounds_entry_degrades_to_null() {
        let mut data = Vec::new();
        data.extend_from_slice(&(1u32 | JB_FARRAY).to_le_bytes());
        data.extend_from_slice(&(JENTRY_STRING | 100).to_le_bytes()); // no payload
        assert_eq!(parse_jsonb(&data), Some(Value::List(vec![Value::Null])));
    }
}
