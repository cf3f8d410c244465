//! Fixture builders for integration tests: tuples, pages, catalog heaps and
//! whole data directories laid out exactly the way the server writes them.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const PAGE_SIZE: usize = 8192;
pub const PAGE_HEADER_SIZE: usize = 24;
pub const TUPLE_HEADER_SIZE: usize = 23;

const HEAP_HASNULL: u16 = 0x0001;
const HEAP_XMIN_COMMITTED: u16 = 0x0100;
const HEAP_XMAX_COMMITTED: u16 = 0x0400;
const HEAP_XMAX_INVALID: u16 = 0x0800;

fn align_up(offset: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return offset;
    }
    (offset + alignment - 1) & !(alignment - 1)
}

/// Server-style tuple builder: aligned user data, null bitmap, header.
#[derive(Default)]
pub struct TupleBuilder {
    data: Vec<u8>,
    nulls: Vec<bool>,
    deleted: bool,
}

impl TupleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the tuple as deleted by a committed transaction.
    pub fn deleted(&mut self) -> &mut Self {
        self.deleted = true;
        self
    }

    fn align_to(&mut self, n: usize) {
        let target = align_up(self.data.len(), n);
        self.data.resize(target, 0);
    }

    pub fn add_bool(&mut self, v: bool) -> &mut Self {
        self.nulls.push(false);
        self.data.push(u8::from(v));
        self
    }

    pub fn add_char(&mut self, c: u8) -> &mut Self {
        self.nulls.push(false);
        self.data.push(c);
        self
    }

    pub fn add_i16(&mut self, v: i16) -> &mut Self {
        self.nulls.push(false);
        self.align_to(2);
        self.data.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn add_i32(&mut self, v: i32) -> &mut Self {
        self.nulls.push(false);
        self.align_to(4);
        self.data.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn add_u32(&mut self, v: u32) -> &mut Self {
        self.nulls.push(false);
        self.align_to(4);
        self.data.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn add_i64(&mut self, v: i64) -> &mut Self {
        self.nulls.push(false);
        self.align_to(8);
        self.data.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn add_f32(&mut self, v: f32) -> &mut Self {
        self.nulls.push(false);
        self.align_to(4);
        self.data.extend_from_slice(&v.to_bits().to_le_bytes());
        self
    }

    pub fn add_name(&mut self, s: &str) -> &mut Self {
        self.nulls.push(false);
        let mut field = [0u8; 64];
        let bytes = s.as_bytes();
        field[..bytes.len().min(63)].copy_from_slice(&bytes[..bytes.len().min(63)]);
        self.data.extend_from_slice(&field);
        self
    }

    /// Short-form varlena (1-byte header, unaligned).
    pub fn add_varlena_short(&mut self, payload: &[u8]) -> &mut Self {
        assert!(payload.len() < 127);
        self.nulls.push(false);
        self.data.push(((payload.len() as u8 + 1) << 1) | 1);
        self.data.extend_from_slice(payload);
        self
    }

    pub fn add_null(&mut self) -> &mut Self {
        self.nulls.push(true);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let natts = self.nulls.len() as u16;
        let has_null = self.nulls.iter().any(|&n| n);

        let mut infomask = HEAP_XMIN_COMMITTED;
        if self.deleted {
            infomask |= HEAP_XMAX_COMMITTED;
        } else {
            infomask |= HEAP_XMAX_INVALID;
        }
        let mut header_len = TUPLE_HEADER_SIZE;
        if has_null {
            infomask |= HEAP_HASNULL;
            header_len += self.nulls.len().div_ceil(8);
        }
        let hoff = align_up(header_len, 8);

        let mut t = vec![0u8; TUPLE_HEADER_SIZE];
        t[0..4].copy_from_slice(&2u32.to_le_bytes());
        t[18..20].copy_from_slice(&natts.to_le_bytes());
        t[20..22].copy_from_slice(&infomask.to_le_bytes());
        t[22] = hoff as u8;
        if has_null {
            let mut bitmap = vec![0u8; self.nulls.len().div_ceil(8)];
            for (i, &is_null) in self.nulls.iter().enumerate() {
                if !is_null {
                    bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            t.extend_from_slice(&bitmap);
        }
        t.resize(hoff, 0);
        t.extend_from_slice(&self.data);
        t
    }
}

/// Packs tuples into pages and pages into a heap file.
pub fn heap_file(tuples: &[Vec<u8>]) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    page[16..18].copy_from_slice(&(PAGE_SIZE as u16).to_le_bytes());
    page[18..20].copy_from_slice(&(PAGE_SIZE as u16 | 4).to_le_bytes());

    let mut upper = PAGE_SIZE;
    for (slot, t) in tuples.iter().enumerate() {
        upper = (upper - t.len()) & !7;
        page[upper..upper + t.len()].copy_from_slice(t);
        let raw = (upper as u32) | (1 << 15) | ((t.len() as u32) << 17);
        let off = PAGE_HEADER_SIZE + slot * 4;
        page[off..off + 4].copy_from_slice(&raw.to_le_bytes());
    }
    let lower = (PAGE_HEADER_SIZE + tuples.len() * 4) as u16;
    page[12..14].copy_from_slice(&lower.to_le_bytes());
    page[14..16].copy_from_slice(&(upper as u16).to_le_bytes());
    page
}

pub fn database_heap(entries: &[(u32, &str)]) -> Vec<u8> {
    let tuples: Vec<Vec<u8>> = entries
        .iter()
        .map(|&(oid, name)| {
            let mut t = TupleBuilder::new();
            t.add_u32(oid).add_name(name);
            t.build()
        })
        .collect();
    heap_file(&tuples)
}

pub fn class_heap(entries: &[(u32, &str, u32, char)]) -> Vec<u8> {
    let tuples: Vec<Vec<u8>> = entries
        .iter()
        .map(|&(oid, name, filenode, kind)| {
            let mut t = TupleBuilder::new();
            t.add_u32(oid)
                .add_name(name)
                .add_u32(2200)
                .add_u32(oid + 1)
                .add_u32(0)
                .add_u32(10)
                .add_u32(2)
                .add_u32(filenode)
                .add_u32(0)
                .add_i32(1)
                .add_f32(1.0)
                .add_i32(0)
                .add_u32(0)
                .add_bool(false)
                .add_bool(false)
                .add_char(b'p')
                .add_char(kind as u8);
            t.build()
        })
        .collect();
    heap_file(&tuples)
}

/// v16 layout: (attrelid, attname, atttypid, attlen, attnum).
pub fn attribute_heap(entries: &[(u32, &str, u32, i32, i32)]) -> Vec<u8> {
    let tuples: Vec<Vec<u8>> = entries
        .iter()
        .map(|&(relid, name, type_oid, len, attnum)| {
            let mut t = TupleBuilder::new();
            t.add_u32(relid)
                .add_name(name)
                .add_u32(type_oid)
                .add_i16(len as i16)
                .add_i16(attnum as i16);
            t.build()
        })
        .collect();
    heap_file(&tuples)
}

/// pg_authid rows: (oid, rolname, password hash, superuser, can_login).
pub fn authid_heap(roles: &[(u32, &str, Option<&str>, bool, bool)]) -> Vec<u8> {
    let tuples: Vec<Vec<u8>> = roles
        .iter()
        .map(|&(oid, name, password, superuser, login)| {
            let mut t = TupleBuilder::new();
            t.add_u32(oid)
                .add_name(name)
                .add_bool(superuser)
                .add_bool(true)
                .add_bool(false)
                .add_bool(false)
                .add_bool(login)
                .add_bool(false)
                .add_bool(false)
                .add_i32(-1);
            match password {
                Some(p) => t.add_varlena_short(p.as_bytes()),
                None => t.add_null(),
            };
            t.add_null();
            t.build()
        })
        .collect();
    heap_file(&tuples)
}

/// On-disk JSONB for `{"a": 1}`, varlena-wrapped for embedding in a tuple.
pub fn jsonb_a_equals_1() -> Vec<u8> {
    let mut container = Vec::new();
    container.extend_from_slice(&(1u32 | 0x2000_0000).to_le_bytes()); // count=1, object
    container.extend_from_slice(&1u32.to_le_bytes()); // key: string, len 1
    container.extend_from_slice(&(0x1000_0000u32 | 8).to_le_bytes()); // value: numeric, len 8
    container.push(b'a');
    container.extend_from_slice(&[0, 0, 0]); // align numeric to 4
    container.extend_from_slice(&[0x0B, 0x00, 0x80, 0x01, 0x00]); // varlena numeric 1

    let mut datum = vec![((container.len() as u8 + 1) << 1) | 1];
    datum.extend_from_slice(&container);
    datum
}

/// The standard fixture cluster: database `testdb` (OID 16384) with
/// `audit(a..e int4)` and `secrets(key text, value jsonb)` holding one
/// visible row `('x', {"a": 1})` and one deleted row `('old', {"a": 1})`.
pub struct FixtureCluster {
    pub dir: TempDir,
}

pub const TESTDB_OID: u32 = 16384;
pub const SECRETS_FILENODE: u32 = 16385;
pub const SECRETS_OID: u32 = 16385;
pub const AUDIT_OID: u32 = 16390;

impl FixtureCluster {
    pub fn build() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("global")).unwrap();
        fs::create_dir_all(root.join(format!("base/{TESTDB_OID}"))).unwrap();

        fs::write(root.join("PG_VERSION"), b"16\n").unwrap();
        fs::write(
            root.join("global/1262"),
            database_heap(&[(1, "template1"), (TESTDB_OID, "testdb")]),
        )
        .unwrap();
        fs::write(
            root.join("global/1260"),
            authid_heap(&[
                (10, "postgres", Some("SCRAM-SHA-256$4096:c2FsdA==$c3Q=:c2Vy"), true, true),
                (16399, "app", Some("md55f4dcc3b5aa765d61d8327deb882cf99"), false, true),
            ]),
        )
        .unwrap();

        let base = root.join(format!("base/{TESTDB_OID}"));
        fs::write(
            base.join("1259"),
            class_heap(&[
                (AUDIT_OID, "audit", AUDIT_OID, 'r'),
                (SECRETS_OID, "secrets", SECRETS_FILENODE, 'r'),
            ]),
        )
        .unwrap();

        // audit's five int columns come first so the pg_attribute layout
        // probe sees the attnum sequence 1..=5
        fs::write(
            base.join("1249"),
            attribute_heap(&[
                (AUDIT_OID, "a", 23, 4, 1),
                (AUDIT_OID, "b", 23, 4, 2),
                (AUDIT_OID, "c", 23, 4, 3),
                (AUDIT_OID, "d", 23, 4, 4),
                (AUDIT_OID, "e", 23, 4, 5),
                (SECRETS_OID, "key", 25, -1, 1),
                (SECRETS_OID, "value", 3802, -1, 2),
            ]),
        )
        .unwrap();

        let jsonb = jsonb_a_equals_1();
        let mut live = TupleBuilder::new();
        live.add_varlena_short(b"x");
        live.add_varlena_short_raw(&jsonb);
        let mut dead = TupleBuilder::new();
        dead.add_varlena_short(b"old");
        dead.add_varlena_short_raw(&jsonb);
        dead.deleted();
        fs::write(
            base.join(SECRETS_FILENODE.to_string()),
            heap_file(&[live.build(), dead.build()]),
        )
        .unwrap();

        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl TupleBuilder {
    /// Appends an already-encoded varlena datum (header included).
    pub fn add_varlena_short_raw(&mut self, datum: &[u8]) -> &mut Self {
        self.nulls.push(false);
        self.data.extend_from_slice(datum);
        self
    }
}

/// Extended v16 pg_attribute rows through `attisdropped`:
/// (relid, name, type_oid, len, attnum, attalign, dropped).
pub fn extended_attribute_heap(entries: &[(u32, &str, u32, i32, i32, u8, bool)]) -> Vec<u8> {
    let tuples: Vec<Vec<u8>> = entries
        .iter()
        .map(|&(relid, name, type_oid, len, attnum, attalign, dropped)| {
            let mut t = TupleBuilder::new();
            t.add_u32(relid)
                .add_name(name)
                .add_u32(type_oid)
                .add_i16(len as i16)
                .add_i16(attnum as i16)
                .add_i32(-1) // atttypmod
                .add_i16(0) // attndims
                .add_bool(len > 0 && len <= 8)
                .add_char(if len == -1 { b'x' } else { b'p' })
                .add_char(attalign)
                .add_bool(false)
                .add_bool(false)
                .add_bool(false)
                .add_char(0)
                .add_char(0)
                .add_bool(dropped);
            t.build()
        })
        .collect();
    heap_file(&tuples)
}

/// A plausible v16 `pg_control` with a correct trailing CRC-32C.
pub fn control_file_bytes(data_checksums: bool) -> Vec<u8> {
    let mut data = vec![0u8; 8192];
    data[0..8].copy_from_slice(&0x5CA1_AB1E_0000_0001u64.to_le_bytes());
    data[8..12].copy_from_slice(&1300u32.to_le_bytes());
    data[12..16].copy_from_slice(&202307071u32.to_le_bytes());
    data[16..20].copy_from_slice(&6u32.to_le_bytes()); // in production
    data[32..40].copy_from_slice(&0x0000_0001_0000_0028u64.to_le_bytes());
    data[40..48].copy_from_slice(&0x0000_0001_0000_0028u64.to_le_bytes());
    data[48..52].copy_from_slice(&1u32.to_le_bytes());
    data[56] = 1;
    data[64..68].copy_from_slice(&745u32.to_le_bytes());
    data[72..76].copy_from_slice(&16500u32.to_le_bytes());
    data[104..112].copy_from_slice(&1_700_000_000i64.to_le_bytes());

    let cfg = 192usize;
    data[cfg - 8..cfg - 4].copy_from_slice(&1u32.to_le_bytes());
    data[cfg..cfg + 4].copy_from_slice(&100u32.to_le_bytes());
    data[cfg + 4..cfg + 8].copy_from_slice(&8u32.to_le_bytes());
    data[cfg + 8..cfg + 12].copy_from_slice(&10u32.to_le_bytes());
    data[cfg + 16..cfg + 20].copy_from_slice(&64u32.to_le_bytes());

    let st = 224usize;
    data[st..st + 4].copy_from_slice(&8u32.to_le_bytes());
    data[st + 8..st + 12].copy_from_slice(&8192u32.to_le_bytes());
    data[st + 12..st + 16].copy_from_slice(&131072u32.to_le_bytes());
    data[st + 16..st + 20].copy_from_slice(&8192u32.to_le_bytes());
    data[st + 20..st + 24].copy_from_slice(&16777216u32.to_le_bytes());
    data[st + 24..st + 28].copy_from_slice(&64u32.to_le_bytes());
    data[st + 28..st + 32].copy_from_slice(&32u32.to_le_bytes());
    data[st + 40..st + 48].copy_from_slice(&1_234_567.0f64.to_bits().to_le_bytes());
    data[st + 48] = u8::from(data_checksums);

    let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI).checksum(&data[..288]);
    data[288..292].copy_from_slice(&crc.to_le_bytes());
    data
}

/// A two-page WAL segment with the given records: (xid, rmid, info,
/// payload_len).
pub fn wal_segment(records: &[(u32, u8, u8, u32)]) -> Vec<u8> {
    const LONG_HEADER: usize = 40;
    const RECORD_HEADER: usize = 24;
    let mut seg = vec![0u8; PAGE_SIZE * 2];
    seg[0..2].copy_from_slice(&0xD113u16.to_le_bytes()); // v16 magic
    seg[2..4].copy_from_slice(&0x0002u16.to_le_bytes()); // long header
    seg[4..8].copy_from_slice(&1u32.to_le_bytes());

    let mut pos = LONG_HEADER;
    for &(xid, rmid, info, payload) in records {
        let total = RECORD_HEADER as u32 + payload;
        seg[pos..pos + 4].copy_from_slice(&total.to_le_bytes());
        seg[pos + 4..pos + 8].copy_from_slice(&xid.to_le_bytes());
        seg[pos + 16] = info;
        seg[pos + 17] = rmid;
        pos = (pos + total as usize + 7) & !7;
    }
    seg
}
