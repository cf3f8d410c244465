//! # Column Value Decoder
//!
//! OID-dispatched decoding of PostgreSQL binary column data into `Value`.
//! Covers the ~40 built-in scalar types plus arrays, ranges and geometric
//! types; `jsonb` and `numeric` live in their own modules.
//!
//! ## Varlena Recognition
//!
//! Variable-length data appears in three on-disk forms:
//!
//! ```text
//! short  [len<<1|1][payload]            total = first >> 1
//! long   [len<<2: u32][payload]         total = header >> 2
//! toast  [0x01][tag][varatt_external]   18 bytes, out-of-line reference
//! ```
//!
//! ## Failure Mode
//!
//! Nothing here returns an error. Truncated or hostile bytes produce `Null`
//! or a sanitized string; an unknown OID produces the UTF-8-sanitized bytes.

use crate::binary::{align_up, i32_at, i64_at, u16_at, u32_at, u64_at};
use crate::types::jsonb::parse_jsonb;
use crate::types::numeric::decode_numeric;
use crate::types::{self, Value, ARRAY_ELEM_TYPES, FIXED_LENGTHS};
use chrono::{Duration, NaiveDate};
use smallvec::SmallVec;

/// Days/microseconds in PostgreSQL datetime types count from 2000-01-01.
fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("static date")
}

/// A recognized varlena datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Varlena<'a> {
    /// 1-byte header; payload excludes the header.
    Short(&'a [u8]),
    /// 4-byte header; payload excludes the header.
    Long(&'a [u8]),
    /// Out-of-line TOAST pointer: the bytes after the 0x01 marker
    /// (tag byte plus `varatt_external`).
    Toast(&'a [u8]),
    /// Nothing parseable at this position.
    Invalid,
}

/// Total on-disk size of a TOAST pointer datum: 0x01 marker, tag byte and
/// the 16-byte `varatt_external` payload.
pub const TOAST_POINTER_SIZE: usize = 18;

/// Classifies the varlena at the start of `data`, returning the datum and
/// the number of bytes it occupies.
pub fn parse_varlena(data: &[u8]) -> (Varlena<'_>, usize) {
    if data.is_empty() {
        return (Varlena::Invalid, 0);
    }

    let first = data[0];

    if first & 1 == 1 && first != 1 {
        let total = (first >> 1) as usize;
        if total <= 1 || data.len() < total {
            return (Varlena::Invalid, 1);
        }
        return (Varlena::Short(&data[1..total]), total);
    }

    if first == 1 {
        if data.len() < TOAST_POINTER_SIZE {
            return (Varlena::Invalid, 1);
        }
        return (
            Varlena::Toast(&data[1..TOAST_POINTER_SIZE]),
            TOAST_POINTER_SIZE,
        );
    }

    if data.len() < 4 {
        return (Varlena::Invalid, 0);
    }
    let total = (u32_at(data, 0) >> 2) as usize;
    if total < 4 || data.len() < total {
        return (Varlena::Invalid, 4);
    }
    (Varlena::Long(&data[4..total]), total)
}

/// Reads a varlena payload the way the row walk consumes it: inline payload
/// bytes, or `None` (TOAST pointers and garbage) plus the bytes to skip.
pub fn read_varlena(data: &[u8]) -> (Option<&[u8]>, usize) {
    match parse_varlena(data) {
        (Varlena::Short(p), n) | (Varlena::Long(p), n) => (Some(p), n),
        (Varlena::Toast(_), n) => (None, n),
        (Varlena::Invalid, n) => (None, n),
    }
}

/// Lossy UTF-8: invalid sequences collapse to `.` so binary noise stays
/// printable and greppable.
pub fn safe_string(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let mut out = String::with_capacity(data.len());
            let mut rest = data;
            loop {
                match std::str::from_utf8(rest) {
                    Ok(s) => {
                        out.push_str(s);
                        break;
                    }
                    Err(e) => {
                        let valid = e.valid_up_to();
                        out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or(""));
                        out.push('.');
                        let skip = valid + e.error_len().unwrap_or(rest.len() - valid).max(1);
                        if skip >= rest.len() {
                            break;
                        }
                        rest = &rest[skip..];
                    }
                }
            }
            out
        }
    }
}

/// Decodes a column datum (varlena header already stripped for variable
/// types) into a `Value`.
pub fn decode(data: &[u8], oid: u32) -> Value {
    if data.is_empty() {
        return Value::Null;
    }
    if let Some(&elem_oid) = ARRAY_ELEM_TYPES.get(&oid) {
        return decode_array(data, elem_oid);
    }
    decode_scalar(data, oid)
}

fn decode_scalar(data: &[u8], oid: u32) -> Value {
    match oid {
        types::OID_BOOL => Value::Bool(data[0] != 0),

        types::OID_CHAR => Value::Text(safe_string(&data[..1])),
        types::OID_NAME => Value::Text(crate::binary::cstring(data, 64)),

        types::OID_INT2 => Value::Int(i64::from(u16_at(data, 0) as i16)),
        types::OID_INT4 => Value::Int(i64::from(i32_at(data, 0))),
        types::OID_INT8 => Value::Int(i64_at(data, 0)),
        types::OID_OID | types::OID_XID | types::OID_CID => {
            Value::UInt(u64::from(u32_at(data, 0)))
        }
        types::OID_TID => Value::Text(format!("({},{})", u32_at(data, 0), u16_at(data, 4))),

        types::OID_FLOAT4 => Value::Float(f64::from(f32::from_bits(u32_at(data, 0)))),
        types::OID_FLOAT8 => Value::Float(f64::from_bits(u64_at(data, 0))),

        types::OID_MONEY => Value::Text(format_money(i64_at(data, 0))),

        types::OID_TEXT
        | types::OID_VARCHAR
        | types::OID_BPCHAR
        | types::OID_JSON
        | types::OID_XML
        | types::OID_JSONPATH => Value::Text(safe_string(data)),
        types::OID_BYTEA => Value::Text(format_bytea(data)),

        types::OID_BIT | types::OID_VARBIT => Value::Text(decode_bit_string(data)),

        types::OID_DATE => decode_date(data),
        types::OID_TIME => Value::Text(format_time(i64_at(data, 0))),
        types::OID_TIMETZ => decode_timetz(data),
        types::OID_TIMESTAMP | types::OID_TIMESTAMPTZ => decode_timestamp(data),
        types::OID_INTERVAL => Value::Text(decode_interval(data)),

        types::OID_MACADDR => Value::Text(format_mac(data, 6)),
        types::OID_MACADDR8 => Value::Text(format_mac(data, 8)),
        types::OID_INET | types::OID_CIDR => Value::Text(decode_inet(data)),

        types::OID_UUID => decode_uuid(data),
        types::OID_PG_LSN => Value::Text(format!("{:X}/{:X}", u32_at(data, 0), u32_at(data, 4))),

        types::OID_POINT => Value::Text(decode_point(data)),
        types::OID_LSEG => Value::Text(format!(
            "[{},{}]",
            decode_point(&data[..16.min(data.len())]),
            decode_point(data.get(16..32).unwrap_or(&[]))
        )),
        types::OID_BOX => Value::Text(format!(
            "({}),({})",
            decode_point(&data[..16.min(data.len())]),
            decode_point(data.get(16..32).unwrap_or(&[]))
        )),
        types::OID_LINE => Value::Text(format!(
            "{{{},{},{}}}",
            f64::from_bits(u64_at(data, 0)),
            f64::from_bits(u64_at(data, 8)),
            f64::from_bits(u64_at(data, 16))
        )),
        types::OID_CIRCLE => Value::Text(format!(
            "<{},{}>",
            decode_point(&data[..16.min(data.len())]),
            f64::from_bits(u64_at(data, 16))
        )),
        types::OID_PATH | types::OID_POLYGON => Value::Text(decode_path_or_polygon(data, oid)),

        types::OID_NUMERIC => decode_numeric(data),

        types::OID_TSVECTOR | types::OID_TSQUERY => Value::Text(safe_string(data)),

        types::OID_JSONB => match parse_jsonb(data) {
            Some(v) => v,
            None => Value::Text(safe_string(data)),
        },

        types::OID_INT4RANGE
        | types::OID_INT8RANGE
        | types::OID_NUMRANGE
        | types::OID_TSRANGE
        | types::OID_TSTZRANGE
        | types::OID_DATERANGE => Value::Text(decode_range(data, oid)),

        _ => Value::Text(safe_string(data)),
    }
}

fn format_money(cents: i64) -> String {
    if cents < 0 {
        let abs = cents.unsigned_abs();
        format!("$-{}.{:02}", abs / 100, abs % 100)
    } else {
        format!("${}.{:02}", cents / 100, cents % 100)
    }
}

fn format_bytea(data: &[u8]) -> String {
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("\\x");
    for b in data {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn decode_bit_string(data: &[u8]) -> String {
    if data.len() < 4 {
        return String::new();
    }
    let bitlen = i32_at(data, 0);
    if bitlen <= 0 {
        return String::new();
    }
    let mut out = String::with_capacity(bitlen as usize);
    for i in 0..bitlen as usize {
        let byte_idx = 4 + i / 8;
        let bit_idx = 7 - (i % 8);
        let set = data
            .get(byte_idx)
            .is_some_and(|&b| b & (1u8 << bit_idx) != 0);
        out.push(if set { '1' } else { '0' });
    }
    out
}

fn decode_date(data: &[u8]) -> Value {
    let days = i64::from(i32_at(data, 0));
    match pg_epoch_date().checked_add_signed(Duration::days(days)) {
        Some(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
        None => Value::Text(format!("date:{days}")),
    }
}

fn decode_timestamp(data: &[u8]) -> Value {
    let micros = i64_at(data, 0);
    let epoch = pg_epoch_date().and_hms_opt(0, 0, 0).expect("static time");
    match epoch.checked_add_signed(Duration::microseconds(micros)) {
        Some(ts) => Value::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        None => Value::Text(format!("timestamp:{micros}")),
    }
}

fn format_time(micros: i64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        micros / 3_600_000_000,
        (micros / 60_000_000) % 60,
        (micros / 1_000_000) % 60
    )
}

fn decode_timetz(data: &[u8]) -> Value {
    if data.len() < 12 {
        return Value::Null;
    }
    let micros = i64_at(data, 0);
    // Zone displacement is stored in seconds west of UTC.
    let tz_secs = i32_at(data, 8);
    Value::Text(format!(
        "{}{:+03}",
        format_time(micros),
        -(tz_secs / 3600)
    ))
}

fn decode_interval(data: &[u8]) -> String {
    if data.len() < 16 {
        return "0".to_string();
    }
    let micros = i64_at(data, 0);
    let days = i32_at(data, 8);
    let months = i32_at(data, 12);

    let mut parts: SmallVec<[String; 6]> = SmallVec::new();
    if months / 12 > 0 {
        parts.push(format!("{}y", months / 12));
    }
    if months % 12 > 0 {
        parts.push(format!("{}mo", months % 12));
    }
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if micros / 3_600_000_000 > 0 {
        parts.push(format!("{}h", micros / 3_600_000_000));
    }
    if (micros / 60_000_000) % 60 > 0 {
        parts.push(format!("{}m", (micros / 60_000_000) % 60));
    }
    if (micros / 1_000_000) % 60 > 0 {
        parts.push(format!("{}s", (micros / 1_000_000) % 60));
    }
    if parts.is_empty() {
        return "0".to_string();
    }
    parts.join(" ")
}

fn format_mac(data: &[u8], len: usize) -> String {
    if data.len() < len {
        return String::new();
    }
    data[..len]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn decode_inet(data: &[u8]) -> String {
    if data.len() < 4 {
        return String::new();
    }
    let family = data[0];
    let bits = data[1];
    let addr_len = data[3];

    if family == 2 && addr_len == 4 && data.len() >= 8 {
        let addr = format!("{}.{}.{}.{}", data[4], data[5], data[6], data[7]);
        if bits != 32 {
            return format!("{addr}/{bits}");
        }
        return addr;
    }
    if family == 3 && addr_len == 16 && data.len() >= 20 {
        let groups: Vec<String> = (0..8)
            .map(|i| {
                let g = u16::from_be_bytes([data[4 + i * 2], data[5 + i * 2]]);
                format!("{g:x}")
            })
            .collect();
        let addr = groups.join(":");
        if bits != 128 {
            return format!("{addr}/{bits}");
        }
        return addr;
    }
    format!("inet:{}", &format_bytea(data)[2..])
}

fn decode_uuid(data: &[u8]) -> Value {
    if data.len() < 16 {
        return Value::Null;
    }
    // First three groups are little-endian on disk, the last two big-endian.
    Value::Text(format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{}",
        u32_at(data, 0),
        u16_at(data, 4),
        u16_at(data, 6),
        data[8],
        data[9],
        data[10..16]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    ))
}

fn decode_point(data: &[u8]) -> String {
    if data.len() < 16 {
        return "(?,?)".to_string();
    }
    format!(
        "({},{})",
        f64::from_bits(u64_at(data, 0)),
        f64::from_bits(u64_at(data, 8))
    )
}

fn decode_path_or_polygon(data: &[u8], oid: u32) -> String {
    if data.len() < 5 {
        return String::new();
    }
    let closed = data[0] != 0;
    let npts = i32_at(data, 1);
    if npts <= 0 || data.len() < 5 + npts as usize * 16 {
        return String::new();
    }

    let points: Vec<String> = (0..npts as usize)
        .map(|i| decode_point(&data[5 + i * 16..5 + (i + 1) * 16]))
        .collect();
    let joined = points.join(",");
    if oid == types::OID_POLYGON || closed {
        format!("({joined})")
    } else {
        format!("[{joined}]")
    }
}

// Range flag bits; the flags byte sits at the END of the datum.
const RANGE_EMPTY: u8 = 0x01;
const RANGE_LB_INC: u8 = 0x02;
const RANGE_UB_INC: u8 = 0x04;
const RANGE_LB_INF: u8 = 0x08;
const RANGE_UB_INF: u8 = 0x10;

fn decode_range(data: &[u8], oid: u32) -> String {
    // minimum: 4-byte range type OID plus the trailing flags byte
    if data.len() < 5 {
        return "empty".to_string();
    }

    let flags = data[data.len() - 1];
    if flags & RANGE_EMPTY != 0 {
        return "empty".to_string();
    }

    let lb_inc = flags & RANGE_LB_INC != 0;
    let ub_inc = flags & RANGE_UB_INC != 0;
    let lb_inf = flags & RANGE_LB_INF != 0;
    let ub_inf = flags & RANGE_UB_INF != 0;

    let (elem_oid, elem_size) = match oid {
        types::OID_INT4RANGE => (types::OID_INT4, 4),
        types::OID_INT8RANGE => (types::OID_INT8, 8),
        types::OID_DATERANGE => (types::OID_DATE, 4),
        types::OID_TSRANGE => (types::OID_TIMESTAMP, 8),
        types::OID_TSTZRANGE => (types::OID_TIMESTAMPTZ, 8),
        types::OID_NUMRANGE => return decode_numeric_range(flags),
        _ => return format!("range:{}", &format_bytea(data)[2..]),
    };

    let mut offset = 4; // skip the embedded range type OID
    let data_end = data.len() - 1;

    let mut lb = String::new();
    let mut ub = String::new();

    if !lb_inf {
        if offset + elem_size > data_end {
            return "[?,?]".to_string();
        }
        lb = decode(&data[offset..offset + elem_size], elem_oid).to_string();
        offset += elem_size;
    }
    if !ub_inf {
        if elem_size > 1 {
            offset = align_up(offset, elem_size);
        }
        if offset + elem_size > data_end {
            return "[?,?]".to_string();
        }
        ub = decode(&data[offset..offset + elem_size], elem_oid).to_string();
    }

    let mut out = String::new();
    out.push(if lb_inc { '[' } else { '(' });
    out.push_str(&lb);
    out.push(',');
    out.push_str(&ub);
    out.push(if ub_inc { ']' } else { ')' });
    out
}

/// Numeric range bounds are variable-length; only the shape is reported.
fn decode_numeric_range(flags: u8) -> String {
    let mut out = String::new();
    out.push(if flags & RANGE_LB_INC != 0 { '[' } else { '(' });
    if flags & RANGE_LB_INF == 0 {
        out.push('?');
    }
    out.push(',');
    if flags & RANGE_UB_INF == 0 {
        out.push('?');
    }
    out.push(if flags & RANGE_UB_INC != 0 { ']' } else { ')' });
    out
}

const MAX_ARRAY_ELEMS: i64 = 1_000_000;

fn decode_array(raw: &[u8], elem_oid: u32) -> Value {
    if raw.len() < 20 {
        return Value::Null;
    }
    let ndim = i32_at(raw, 0);
    if ndim <= 0 || ndim > 6 {
        return Value::Null;
    }

    let dataoff = i32_at(raw, 4);
    let mut total: i64 = 1;
    for i in 0..ndim {
        total *= i64::from(i32_at(raw, 12 + i as usize * 4));
        if total <= 0 || total > MAX_ARRAY_ELEMS {
            return Value::Null;
        }
    }
    let total = total as usize;

    let mut null_bitmap: Option<&[u8]> = None;
    let mut data_start = 12 + ndim as usize * 8;
    if dataoff > 0 {
        null_bitmap = raw.get(data_start..data_start + total.div_ceil(8));
        if null_bitmap.is_none() {
            return Value::Null;
        }
        data_start = dataoff as usize;
    }

    let fixed = FIXED_LENGTHS.get(&elem_oid).copied();
    Value::List(parse_array_elements(
        raw,
        data_start,
        total,
        elem_oid,
        fixed,
        null_bitmap,
    ))
}

fn parse_array_elements(
    raw: &[u8],
    mut off: usize,
    count: usize,
    elem_oid: u32,
    fixed: Option<usize>,
    nulls: Option<&[u8]>,
) -> Vec<Value> {
    let mut elems = Vec::with_capacity(count);
    for i in 0..count {
        if let Some(bitmap) = nulls {
            let present = bitmap
                .get(i / 8)
                .is_some_and(|&b| b & (1u8 << (i % 8)) != 0);
            if !present {
                elems.push(Value::Null);
                continue;
            }
        }
        match fixed {
            Some(elem_len) => {
                if off + elem_len > raw.len() {
                    break;
                }
                elems.push(decode(&raw[off..off + elem_len], elem_oid));
                off += elem_len;
            }
            None => {
                // Varlena elements after the first realign to 4 bytes.
                if i > 0 {
                    off = align_up(off, 4);
                }
                if off >= raw.len() {
                    break;
                }
                let (payload, consumed) = read_varlena(&raw[off..]);
                match payload {
                    Some(p) => elems.push(decode(p, elem_oid)),
                    None => elems.push(Value::Null),
                }
                if consumed == 0 {
                    break;
                }
                off += consumed;
            }
        }
    }
    elems
}
