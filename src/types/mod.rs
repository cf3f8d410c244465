//! # Type System
//!
//! This module is the boundary between PostgreSQL's binary column formats and
//! Rust values:
//!
//! - `Value`: the closed sum type every decoder produces
//! - `Row`: an ordered column-name -> `Value` association
//! - OID constants and static lookup tables for the ~40 built-in types
//! - `decode`: the OID-dispatched column decoder
//!
//! ## Decoded Value Domain
//!
//! | Variant | Produced by |
//! |---------|-------------|
//! | `Null` | SQL NULL, TOAST pointers, undecodable bounds |
//! | `Bool` | bool |
//! | `Int` | int2, int4, int8 |
//! | `UInt` | oid, xid, cid |
//! | `Float` | float4, float8, numeric |
//! | `Text` | text family, formatted types (uuid, inet, ranges, ...) |
//! | `Bytes` | raw payloads surfaced without interpretation |
//! | `List` | arrays, jsonb arrays |
//! | `Map` | jsonb objects |
//!
//! Decoders return values, never errors: hostile or truncated input degrades
//! to `Null` (or a sanitized string) so that one bad column can never abort a
//! row, a page or a dump.

pub mod decode;
pub mod jsonb;
pub mod numeric;

pub use decode::{decode, read_varlena, safe_string, Varlena};
pub use jsonb::parse_jsonb;
pub use numeric::decode_numeric;

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// Type OIDs from pg_type.dat, stable across all supported server versions.
pub const OID_BOOL: u32 = 16;
pub const OID_BYTEA: u32 = 17;
pub const OID_CHAR: u32 = 18;
pub const OID_NAME: u32 = 19;
pub const OID_INT8: u32 = 20;
pub const OID_INT2: u32 = 21;
pub const OID_INT4: u32 = 23;
pub const OID_TEXT: u32 = 25;
pub const OID_OID: u32 = 26;
pub const OID_TID: u32 = 27;
pub const OID_XID: u32 = 28;
pub const OID_CID: u32 = 29;
pub const OID_JSON: u32 = 114;
pub const OID_XML: u32 = 142;

pub const OID_POINT: u32 = 600;
pub const OID_LSEG: u32 = 601;
pub const OID_PATH: u32 = 602;
pub const OID_BOX: u32 = 603;
pub const OID_POLYGON: u32 = 604;
pub const OID_LINE: u32 = 628;
pub const OID_CIRCLE: u32 = 718;

pub const OID_CIDR: u32 = 650;
pub const OID_FLOAT4: u32 = 700;
pub const OID_FLOAT8: u32 = 701;
pub const OID_MACADDR8: u32 = 774;
pub const OID_MONEY: u32 = 790;
pub const OID_MACADDR: u32 = 829;
pub const OID_INET: u32 = 869;

pub const OID_BPCHAR: u32 = 1042;
pub const OID_VARCHAR: u32 = 1043;

pub const OID_DATE: u32 = 1082;
pub const OID_TIME: u32 = 1083;
pub const OID_TIMESTAMP: u32 = 1114;
pub const OID_TIMESTAMPTZ: u32 = 1184;
pub const OID_INTERVAL: u32 = 1186;
pub const OID_TIMETZ: u32 = 1266;

pub const OID_BIT: u32 = 1560;
pub const OID_VARBIT: u32 = 1562;

pub const OID_NUMERIC: u32 = 1700;
pub const OID_UUID: u32 = 2950;
pub const OID_PG_LSN: u32 = 3220;

pub const OID_TSVECTOR: u32 = 3614;
pub const OID_TSQUERY: u32 = 3615;

pub const OID_JSONB: u32 = 3802;
pub const OID_JSONPATH: u32 = 4072;

pub const OID_INT4RANGE: u32 = 3904;
pub const OID_NUMRANGE: u32 = 3906;
pub const OID_TSRANGE: u32 = 3908;
pub const OID_TSTZRANGE: u32 = 3910;
pub const OID_DATERANGE: u32 = 3912;
pub const OID_INT8RANGE: u32 = 3926;

/// OID -> human-readable type name.
pub static TYPE_NAMES: phf::Map<u32, &'static str> = phf::phf_map! {
    16u32 => "bool", 17u32 => "bytea", 18u32 => "char", 19u32 => "name",
    20u32 => "int8", 21u32 => "int2", 23u32 => "int4", 25u32 => "text",
    26u32 => "oid", 27u32 => "tid", 28u32 => "xid", 29u32 => "cid",
    114u32 => "json", 142u32 => "xml",
    600u32 => "point", 601u32 => "lseg", 602u32 => "path", 603u32 => "box",
    604u32 => "polygon", 628u32 => "line", 718u32 => "circle",
    650u32 => "cidr", 700u32 => "float4", 701u32 => "float8",
    774u32 => "macaddr8", 790u32 => "money", 829u32 => "macaddr", 869u32 => "inet",
    1042u32 => "bpchar", 1043u32 => "varchar",
    1082u32 => "date", 1083u32 => "time", 1114u32 => "timestamp",
    1184u32 => "timestamptz", 1186u32 => "interval", 1266u32 => "timetz",
    1560u32 => "bit", 1562u32 => "varbit",
    1700u32 => "numeric", 2950u32 => "uuid", 3220u32 => "pg_lsn",
    3614u32 => "tsvector", 3615u32 => "tsquery",
    3802u32 => "jsonb", 4072u32 => "jsonpath",
    3904u32 => "int4range", 3906u32 => "numrange", 3908u32 => "tsrange",
    3910u32 => "tstzrange", 3912u32 => "daterange", 3926u32 => "int8range",
};

/// Array type OID -> element type OID.
pub static ARRAY_ELEM_TYPES: phf::Map<u32, u32> = phf::phf_map! {
    1000u32 => 16u32, 1001u32 => 17u32, 1002u32 => 18u32, 1003u32 => 19u32,
    1005u32 => 21u32, 1006u32 => 21u32, 1007u32 => 23u32, 1008u32 => 26u32,
    1009u32 => 25u32, 1010u32 => 27u32, 1011u32 => 28u32, 1012u32 => 29u32,
    1014u32 => 1042u32, 1015u32 => 1043u32, 1016u32 => 20u32,
    1017u32 => 600u32, 1018u32 => 601u32, 1019u32 => 602u32, 1020u32 => 603u32,
    1021u32 => 700u32, 1022u32 => 701u32, 1027u32 => 604u32,
    1028u32 => 26u32, 1040u32 => 829u32, 1041u32 => 869u32,
    1115u32 => 1114u32, 1182u32 => 1082u32, 1183u32 => 1083u32,
    1185u32 => 1184u32, 1187u32 => 1186u32, 1231u32 => 1700u32,
    1270u32 => 1266u32, 1561u32 => 1560u32, 1563u32 => 1562u32,
    2951u32 => 2950u32, 3221u32 => 3220u32, 3643u32 => 3614u32, 3645u32 => 3615u32,
    3807u32 => 3802u32, 4073u32 => 4072u32,
    629u32 => 628u32, 651u32 => 650u32, 719u32 => 718u32, 775u32 => 774u32,
    791u32 => 790u32,
    3905u32 => 3904u32, 3907u32 => 3906u32, 3909u32 => 3908u32,
    3911u32 => 3910u32, 3913u32 => 3912u32, 3927u32 => 3926u32,
};

/// Fixed on-disk widths for pass-by-value and fixed-length types, used when
/// walking packed array elements.
pub static FIXED_LENGTHS: phf::Map<u32, usize> = phf::phf_map! {
    16u32 => 1, 18u32 => 1, 21u32 => 2, 23u32 => 4, 20u32 => 8, 26u32 => 4,
    700u32 => 4, 701u32 => 8, 1082u32 => 4, 1114u32 => 8, 1184u32 => 8,
    27u32 => 6, 28u32 => 4, 29u32 => 4, 790u32 => 8, 1083u32 => 8,
    829u32 => 6, 774u32 => 8, 2950u32 => 16, 3220u32 => 8,
    600u32 => 16, 601u32 => 32, 603u32 => 32, 628u32 => 24, 718u32 => 24,
    1266u32 => 12, 1186u32 => 16,
};

/// Returns the human-readable name for a type OID, or `oid:N` for types the
/// decoder does not know.
pub fn type_name(oid: u32) -> String {
    match TYPE_NAMES.get(&oid) {
        Some(name) => (*name).to_string(),
        None => format!("oid:{oid}"),
    }
}

/// A decoded column value.
///
/// The closed set from the data model: decoders map every on-disk datum into
/// one of these variants and nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt(v) => u32::try_from(*v).ok(),
            Value::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                write!(f, "\\x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::UInt(v) => serializer.serialize_u64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => {
                let mut hex = String::with_capacity(2 + b.len() * 2);
                hex.push_str("\\x");
                for byte in b {
                    hex.push_str(&format!("{byte:02x}"));
                }
                serializer.serialize_str(&hex)
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// A decoded row: column values in physical attribute order.
///
/// Lookups are by name; iteration preserves on-disk column order, which also
/// drives JSON/CSV/SQL output ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pairs: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.pairs.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn get_u32(&self, name: &str) -> u32 {
        self.get(name).and_then(Value::as_u32).unwrap_or(0)
    }

    pub fn get_i32(&self, name: &str) -> i32 {
        self.get(name)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(0)
    }

    pub fn get_str(&self, name: &str) -> &str {
        self.get(name).and_then(Value::as_str).unwrap_or("")
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.pairs.len()))?;
        for (name, value) in &self.pairs {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_known_and_unknown() {
        assert_eq!(type_name(OID_BOOL), "bool");
        assert_eq!(type_name(OID_JSONB), "jsonb");
        assert_eq!(type_name(99999), "oid:99999");
    }

    #[test]
    fn array_elem_lookup() {
        assert_eq!(ARRAY_ELEM_TYPES.get(&1007), Some(&OID_INT4));
        assert_eq!(ARRAY_ELEM_TYPES.get(&1009), Some(&OID_TEXT));
        assert_eq!(ARRAY_ELEM_TYPES.get(&OID_INT4), None);
    }

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(-7).as_i64(), Some(-7));
        assert_eq!(Value::UInt(16384).as_u32(), Some(16384));
        assert_eq!(Value::Int(-1).as_u32(), None);
        assert_eq!(Value::Text("x".into()).as_str(), Some("x"));
    }

    #[test]
    fn value_serializes_to_expected_json() {
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Value::Int(5)).unwrap(), "5");
        assert_eq!(
            serde_json::to_string(&Value::Bytes(vec![0xDE, 0xAD])).unwrap(),
            "\"\\\\xdead\""
        );
        let list = Value::List(vec![Value::Int(1), Value::Null]);
        assert_eq!(serde_json::to_string(&list).unwrap(), "[1,null]");
    }

    #[test]
    fn row_preserves_order_and_lookups() {
        let mut row = Row::new();
        row.push("b", Value::Int(2));
        row.push("a", Value::Int(1));
        let names: Vec<&str> = row.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(row.get_i32("a"), 1);
        assert_eq!(row.get("missing"), None);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":2,"a":1}"#);
    }
}
