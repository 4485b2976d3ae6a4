//! Unit #0: root table and file table.
//!
//! ```text
//! [0, 2 MiB)              root table, 65 536 x 32-byte roots, zero padded
//! [2 MiB, 2 MiB + 64)     header: "SLFT" | u16 version | u16 record size | u32 count
//! [2 MiB + 64, 8 MiB)     64-byte file records
//! ```
//!
//! All integers are little endian. A record is
//! `path[40] | u64 length_flags | u64 start | u64 timestamp`, where the length
//! occupies the low 56 bits of `length_flags`. A record whose first path byte
//! is zero is a tombstone describing free capacity at `start`.

use slabd_primitives::{
    Root,
    constants::{
        FILE_RECORD_SIZE, FILE_TABLE_HEADER_SIZE, FILE_TABLE_OFFSET, MAX_FILE_RECORDS,
        MAX_PATH_LEN, MAX_ROOTS, MDU_SIZE, ROOT_SIZE, ROOT_TABLE_BYTES, SCALAR_PAYLOAD,
        user_units_for_end,
    },
};

use crate::{SlabError, SlabResult};

/// File-table magic.
pub const FILE_TABLE_MAGIC: [u8; 4] = *b"SLFT";

/// File-table format version.
pub const FILE_TABLE_VERSION: u16 = 1;

const LENGTH_MASK: u64 = (1 << 56) - 1;
const RECORDS_OFFSET: usize = FILE_TABLE_OFFSET + FILE_TABLE_HEADER_SIZE;

/// Round `n` up to a multiple of the scalar payload size.
pub const fn round_to_scalar(n: u64) -> u64 {
    n.div_ceil(SCALAR_PAYLOAD as u64) * SCALAR_PAYLOAD as u64
}

/// One file-table record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File path. Empty for tombstones.
    pub path: String,
    /// Logical start offset in the user-data address space.
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    /// Flag bits.
    pub flags: u8,
    /// Unix seconds.
    pub timestamp: u64,
}

impl FileRecord {
    /// Whether this record marks free capacity.
    pub fn is_tombstone(&self) -> bool {
        self.path.is_empty()
    }

    /// First logical offset past the record.
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Scalar-aligned capacity the record occupies.
    pub fn capacity(&self) -> u64 {
        round_to_scalar(self.length)
    }

    fn tombstone(start: u64, length: u64) -> Self {
        Self { path: String::new(), start, length, flags: 0, timestamp: 0 }
    }

    fn encode(&self) -> [u8; FILE_RECORD_SIZE] {
        let mut out = [0u8; FILE_RECORD_SIZE];
        out[..self.path.len()].copy_from_slice(self.path.as_bytes());
        let length_flags = (u64::from(self.flags) << 56) | (self.length & LENGTH_MASK);
        out[40..48].copy_from_slice(&length_flags.to_le_bytes());
        out[48..56].copy_from_slice(&self.start.to_le_bytes());
        out[56..64].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    fn decode(raw: &[u8]) -> SlabResult<Self> {
        let path_bytes = &raw[..MAX_PATH_LEN];
        let path_len = path_bytes.iter().position(|b| *b == 0).unwrap_or(MAX_PATH_LEN);
        let path = std::str::from_utf8(&path_bytes[..path_len])
            .map_err(|_| SlabError::layout("file record path is not utf-8"))?
            .to_owned();

        let length_flags = read_u64(raw, 40);
        let record = Self {
            path,
            length: length_flags & LENGTH_MASK,
            flags: (length_flags >> 56) as u8,
            start: read_u64(raw, 48),
            timestamp: read_u64(raw, 56),
        };

        if record.start % SCALAR_PAYLOAD as u64 != 0 {
            return Err(SlabError::layout(format!(
                "record start {} is not scalar aligned",
                record.start
            )));
        }
        Ok(record)
    }
}

fn read_u64(raw: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn validate_path(path: &str) -> SlabResult<()> {
    if path.is_empty() || path.len() > MAX_PATH_LEN || path.as_bytes().contains(&0) {
        return Err(SlabError::InvalidRequest(format!(
            "path must be 1..={MAX_PATH_LEN} bytes without NUL: {path:?}"
        )));
    }
    Ok(())
}

/// Builder over the bytes of unit #0.
///
/// Edits to roots and records accumulate in memory; [`Unit0Builder::finalize`]
/// serializes them into the owned buffer in one step.
#[derive(Debug, Clone)]
pub struct Unit0Builder {
    buf: Vec<u8>,
    roots: Vec<Root>,
    records: Vec<FileRecord>,
}

impl Default for Unit0Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Unit0Builder {
    /// Empty unit #0.
    pub fn new() -> Self {
        Self { buf: vec![0u8; MDU_SIZE], roots: Vec::new(), records: Vec::new() }
    }

    /// Parse an existing unit #0.
    pub fn open(buf: Vec<u8>) -> SlabResult<Self> {
        if buf.len() != MDU_SIZE {
            return Err(SlabError::layout(format!(
                "unit #0 is {} bytes, expected {MDU_SIZE}",
                buf.len()
            )));
        }
        let roots = parse_roots(&buf)?;
        let records = parse_records(&buf)?;
        Ok(Self { buf, roots, records })
    }

    /// Root table entries.
    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Replace the root table (witness roots followed by user roots).
    pub fn set_roots(&mut self, roots: Vec<Root>) -> SlabResult<()> {
        if roots.len() > MAX_ROOTS {
            return Err(SlabError::InvalidRequest(format!(
                "{} roots exceed the root table capacity of {MAX_ROOTS}",
                roots.len()
            )));
        }
        if roots.iter().any(|r| r.is_zero()) {
            return Err(SlabError::InvalidRequest("zero root in root table".into()));
        }
        self.roots = roots;
        Ok(())
    }

    /// All records, tombstones included, in table order.
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Live records.
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(|r| !r.is_tombstone())
    }

    /// Live record for `path`.
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files().find(|r| r.path == path)
    }

    /// End of the highest record, live or tombstoned.
    pub fn max_end(&self) -> u64 {
        self.records.iter().map(FileRecord::end).max().unwrap_or(0)
    }

    /// User-data units needed to cover every record.
    pub fn user_unit_count(&self) -> u64 {
        user_units_for_end(self.max_end())
    }

    /// Add a file, replacing any live record with the same path.
    ///
    /// Placement prefers a tombstone of exactly the needed capacity, then the
    /// smallest larger one (its leftover becomes a new tombstone), and
    /// otherwise appends after the highest record.
    pub fn add_file(
        &mut self,
        path: &str,
        length: u64,
        flags: u8,
        timestamp: u64,
    ) -> SlabResult<FileRecord> {
        validate_path(path)?;
        if length > LENGTH_MASK {
            return Err(SlabError::InvalidRequest(format!("file length {length} too large")));
        }

        if let Some(existing) = self.records.iter_mut().find(|r| r.path == path) {
            existing.path.clear();
            existing.flags = 0;
            existing.timestamp = 0;
        }

        let needed = round_to_scalar(length);
        let reuse = if needed == 0 {
            None
        } else {
            self.records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_tombstone() && r.capacity() >= needed)
                .min_by_key(|(i, r)| (r.capacity(), *i))
                .map(|(i, _)| i)
        };

        let record = match reuse {
            Some(i) => {
                let free = self.records[i].clone();
                let record = FileRecord {
                    path: path.to_owned(),
                    start: free.start,
                    length,
                    flags,
                    timestamp,
                };
                self.records[i] = record.clone();
                let leftover = free.capacity() - needed;
                if leftover > 0 {
                    self.push(FileRecord::tombstone(free.start + needed, leftover))?;
                }
                record
            }
            None => {
                let record = FileRecord {
                    path: path.to_owned(),
                    start: round_to_scalar(self.max_end()),
                    length,
                    flags,
                    timestamp,
                };
                self.push(record.clone())?;
                record
            }
        };
        Ok(record)
    }

    /// Turn the live record for `path` into a tombstone.
    pub fn delete_file(&mut self, path: &str) -> SlabResult<FileRecord> {
        let record = self
            .records
            .iter_mut()
            .find(|r| !r.is_tombstone() && r.path == path)
            .ok_or_else(|| SlabError::NotFound(format!("file {path}")))?;
        let removed = record.clone();
        *record = FileRecord::tombstone(removed.start, removed.length);
        Ok(removed)
    }

    fn push(&mut self, record: FileRecord) -> SlabResult<()> {
        if self.records.len() >= MAX_FILE_RECORDS {
            return Err(SlabError::InvalidRequest("file table is full".into()));
        }
        self.records.push(record);
        Ok(())
    }

    /// Serialize roots and records and return the unit bytes.
    pub fn finalize(mut self) -> Vec<u8> {
        self.buf[..RECORDS_OFFSET].fill(0);
        for (i, root) in self.roots.iter().enumerate() {
            self.buf[i * ROOT_SIZE..(i + 1) * ROOT_SIZE].copy_from_slice(root.as_slice());
        }

        let header = &mut self.buf[FILE_TABLE_OFFSET..RECORDS_OFFSET];
        header[0..4].copy_from_slice(&FILE_TABLE_MAGIC);
        header[4..6].copy_from_slice(&FILE_TABLE_VERSION.to_le_bytes());
        header[6..8].copy_from_slice(&(FILE_RECORD_SIZE as u16).to_le_bytes());
        header[8..12].copy_from_slice(&(self.records.len() as u32).to_le_bytes());

        self.buf[RECORDS_OFFSET..].fill(0);
        for (i, record) in self.records.iter().enumerate() {
            let at = RECORDS_OFFSET + i * FILE_RECORD_SIZE;
            self.buf[at..at + FILE_RECORD_SIZE].copy_from_slice(&record.encode());
        }
        self.buf
    }
}

fn parse_roots(buf: &[u8]) -> SlabResult<Vec<Root>> {
    let mut roots = Vec::new();
    let mut ended = false;
    for slot in buf[..ROOT_TABLE_BYTES].chunks_exact(ROOT_SIZE) {
        let root = Root::from_slice(slot);
        match (root.is_zero(), ended) {
            (false, false) => roots.push(root),
            (true, _) => ended = true,
            (false, true) => {
                return Err(SlabError::layout(format!(
                    "root table has a gap after {} roots",
                    roots.len()
                )));
            }
        }
    }
    Ok(roots)
}

fn parse_records(buf: &[u8]) -> SlabResult<Vec<FileRecord>> {
    let header = &buf[FILE_TABLE_OFFSET..RECORDS_OFFSET];
    if header[0..4] != FILE_TABLE_MAGIC {
        return Err(SlabError::layout("missing file-table magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    let record_size = u16::from_le_bytes([header[6], header[7]]) as usize;
    let count = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;

    if version != FILE_TABLE_VERSION || record_size != FILE_RECORD_SIZE {
        return Err(SlabError::layout(format!(
            "unsupported file table version {version} / record size {record_size}"
        )));
    }
    if count > MAX_FILE_RECORDS {
        return Err(SlabError::layout(format!("file table truncated: {count} records")));
    }

    buf[RECORDS_OFFSET..RECORDS_OFFSET + count * FILE_RECORD_SIZE]
        .chunks_exact(FILE_RECORD_SIZE)
        .map(FileRecord::decode)
        .collect()
}
