//! Payload codec for user-data units.
//!
//! User data lives in a logical address space cut into units of
//! [`MDU_PAYLOAD_CAPACITY`] bytes. Every 31 logical bytes occupy one 32-byte
//! scalar. A scalar normally carries a zero pad byte followed by 31 payload
//! bytes; the final scalar of a file instead right-aligns its `r` remaining
//! bytes (pad = `32 - r`). Which scalar is final depends on the file, so every
//! mapping here is computed from the file's start and length, never from the
//! unit offset alone.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use slabd_primitives::constants::{
    BLOB_SIZE, MDU_PAYLOAD_CAPACITY, MDU_SIZE, SCALAR_PAYLOAD, SCALAR_SIZE, SCALARS_PER_BLOB,
    SCALARS_PER_MDU,
};

use crate::{SlabError, SlabResult, layout};

const PAYLOAD: u64 = SCALAR_PAYLOAD as u64;
const PER_UNIT: u64 = SCALARS_PER_MDU as u64;

/// Physical location of one logical byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// User-data unit ordinal (0 = first user unit).
    pub unit: u64,
    /// Byte offset inside the unit.
    pub byte: usize,
}

impl Position {
    /// Blob within the unit.
    pub fn blob(&self) -> usize {
        self.byte / BLOB_SIZE
    }
}

/// A file's placement in the logical address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    /// Logical start, a multiple of 31.
    pub start: u64,
    /// Length in bytes.
    pub len: u64,
}

impl FileSpan {
    /// Create a span.
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    fn first_scalar(&self) -> u64 {
        self.start / PAYLOAD
    }

    /// Number of scalars the file occupies.
    pub fn scalar_count(&self) -> u64 {
        self.len.div_ceil(PAYLOAD)
    }

    fn last_q(&self) -> u64 {
        self.scalar_count().saturating_sub(1)
    }

    /// Payload bytes carried by file scalar `q` and their offset in the scalar.
    fn scalar_payload(&self, q: u64) -> (usize, usize) {
        if q == self.last_q() {
            let r = (self.len - q * PAYLOAD) as usize;
            (SCALAR_SIZE - r, r)
        } else {
            (1, SCALAR_PAYLOAD)
        }
    }

    /// Physical position of byte `offset` of the file.
    pub fn position(&self, offset: u64) -> SlabResult<Position> {
        if offset >= self.len {
            return Err(SlabError::InvalidRequest(format!(
                "offset {offset} outside file of {} bytes",
                self.len
            )));
        }
        let q = offset / PAYLOAD;
        let j = (offset % PAYLOAD) as usize;
        let scalar = self.first_scalar() + q;
        let (pad, _) = self.scalar_payload(q);
        Ok(Position {
            unit: scalar / PER_UNIT,
            byte: (scalar % PER_UNIT) as usize * SCALAR_SIZE + pad + j,
        })
    }

    /// User-data units touched by the file.
    pub fn units(&self) -> std::ops::Range<u64> {
        if self.len == 0 {
            return 0..0;
        }
        let first = self.first_scalar() / PER_UNIT;
        let last = (self.first_scalar() + self.last_q()) / PER_UNIT;
        first..last + 1
    }

    /// Fail unless `[start, start + len)` maps into a single blob.
    pub fn check_single_blob(&self, start: u64, len: u64) -> SlabResult<()> {
        if len == 0 {
            return Ok(());
        }
        let first = self.position(start)?;
        let last = self.position(start + len - 1)?;
        if first.unit != last.unit || first.blob() != last.blob() {
            return Err(SlabError::RangeCrossesBoundary { start, len });
        }
        Ok(())
    }

    /// File scalars `[lo, hi)` that lie in user unit `unit`.
    fn scalars_in_unit(&self, unit: u64) -> std::ops::Range<u64> {
        let first = self.first_scalar();
        let unit_lo = unit * PER_UNIT;
        let unit_hi = unit_lo + PER_UNIT;
        let lo = first.max(unit_lo).saturating_sub(first);
        let hi = (first + self.scalar_count()).min(unit_hi).saturating_sub(first);
        lo..hi.max(lo)
    }
}

/// Copy the payload of file scalar `q` that overlaps logical `[lo, hi)` into `out`.
fn extract(span: &FileSpan, q: u64, scalar: &[u8], lo: u64, hi: u64, out: &mut Vec<u8>) {
    let (pad, count) = span.scalar_payload(q);
    let base = q * PAYLOAD;
    let from = lo.max(base);
    let to = hi.min(base + count as u64);
    if from < to {
        let a = pad + (from - base) as usize;
        let b = pad + (to - base) as usize;
        out.extend_from_slice(&scalar[a..b]);
    }
}

/// Encode `raw` as a single unit holding one file at logical offset 0.
pub fn encode(raw: &[u8]) -> SlabResult<Vec<u8>> {
    if raw.len() as u64 > MDU_PAYLOAD_CAPACITY {
        return Err(SlabError::InvalidRequest(format!(
            "{} bytes exceed unit capacity {MDU_PAYLOAD_CAPACITY}",
            raw.len()
        )));
    }
    let mut unit = vec![0u8; MDU_SIZE];
    encode_file_into(&mut unit, 0, 0, raw)?;
    Ok(unit)
}

/// Write the part of `file` (placed at `file_start`) that falls into user
/// unit `unit_index`. Scalars outside the file are left untouched.
pub fn encode_file_into(
    unit: &mut [u8],
    unit_index: u64,
    file_start: u64,
    file: &[u8],
) -> SlabResult<()> {
    if unit.len() != MDU_SIZE {
        return Err(SlabError::InvalidRequest(format!("unit buffer is {} bytes", unit.len())));
    }
    if file_start % PAYLOAD != 0 {
        return Err(SlabError::InvalidRequest(format!(
            "file start {file_start} is not scalar aligned"
        )));
    }

    let span = FileSpan::new(file_start, file.len() as u64);
    let unit_first = unit_index * PER_UNIT;
    for q in span.scalars_in_unit(unit_index) {
        let at = (span.first_scalar() + q - unit_first) as usize * SCALAR_SIZE;
        let scalar = &mut unit[at..at + SCALAR_SIZE];
        scalar.fill(0);

        let (pad, count) = span.scalar_payload(q);
        let from = (q * PAYLOAD) as usize;
        scalar[pad..pad + count].copy_from_slice(&file[from..from + count]);
    }
    Ok(())
}

/// Decode bytes `[range_start, range_start + range_len)` of a file from user
/// unit `unit_index`. The range must lie entirely inside that unit.
pub fn decode(
    unit: &[u8],
    unit_index: u64,
    span: FileSpan,
    range_start: u64,
    range_len: u64,
) -> SlabResult<Vec<u8>> {
    if unit.len() != MDU_SIZE {
        return Err(SlabError::InvalidRequest(format!("unit buffer is {} bytes", unit.len())));
    }
    let mut out = Vec::with_capacity(range_len as usize);
    if range_len == 0 {
        return Ok(out);
    }

    let first = span.position(range_start)?;
    let last = span.position(range_start + range_len - 1)?;
    if first.unit != unit_index || last.unit != unit_index {
        return Err(SlabError::InvalidRequest(format!(
            "range [{range_start}, +{range_len}) is not inside unit {unit_index}"
        )));
    }

    let lo = range_start;
    let hi = range_start + range_len;
    let unit_first = unit_index * PER_UNIT;
    for q in lo / PAYLOAD..=(hi - 1) / PAYLOAD {
        let at = (span.first_scalar() + q - unit_first) as usize * SCALAR_SIZE;
        extract(&span, q, &unit[at..at + SCALAR_SIZE], lo, hi, &mut out);
    }
    Ok(out)
}

/// Streaming reader over a file range spread across consecutive unit files.
///
/// Reads at most one blob of scalars from disk at a time, so arbitrary
/// sub-ranges never materialize a whole unit.
#[derive(Debug)]
pub struct PayloadReader {
    dir: PathBuf,
    first_unit_file: u64,
    span: FileSpan,
    pos: u64,
    end: u64,
    pending: Vec<u8>,
    pending_at: usize,
    open: Option<(u64, File)>,
}

impl PayloadReader {
    /// Reader over `[range_start, range_start + range_len)` of a file.
    ///
    /// User unit `u` is read from `mdu_<first_unit_file + u>.bin` in `dir`.
    pub fn new(
        dir: &Path,
        first_unit_file: u64,
        span: FileSpan,
        range_start: u64,
        range_len: u64,
    ) -> Self {
        let end = range_start.saturating_add(range_len).min(span.len);
        Self {
            dir: dir.to_path_buf(),
            first_unit_file,
            span,
            pos: range_start.min(end),
            end,
            pending: Vec::new(),
            pending_at: 0,
            open: None,
        }
    }

    /// Bytes not yet returned.
    pub fn remaining(&self) -> u64 {
        (self.end - self.pos) + (self.pending.len() - self.pending_at) as u64
    }

    fn fill(&mut self) -> io::Result<()> {
        let position = self
            .span
            .position(self.pos)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        // Scalars from the current one to the end of its blob or of the range.
        let q_first = self.pos / PAYLOAD;
        let q_last = (self.end - 1) / PAYLOAD;
        let scalar_in_unit = position.byte / SCALAR_SIZE;
        let to_blob_end = SCALARS_PER_BLOB - scalar_in_unit % SCALARS_PER_BLOB;
        let count = ((q_last - q_first + 1) as usize).min(to_blob_end);

        let file = self.unit_file(position.unit)?;
        let mut raw = vec![0u8; count * SCALAR_SIZE];
        file.seek(SeekFrom::Start((scalar_in_unit * SCALAR_SIZE) as u64))?;
        file.read_exact(&mut raw)?;

        self.pending.clear();
        self.pending_at = 0;
        let hi = self.end.min((q_first + count as u64) * PAYLOAD);
        for (i, scalar) in raw.chunks_exact(SCALAR_SIZE).enumerate() {
            extract(&self.span, q_first + i as u64, scalar, self.pos, hi, &mut self.pending);
        }
        self.pos = hi;
        Ok(())
    }

    fn unit_file(&mut self, unit: u64) -> io::Result<&mut File> {
        if self.open.as_ref().map(|(u, _)| *u) != Some(unit) {
            let path = layout::unit_path(&self.dir, self.first_unit_file + unit);
            self.open = Some((unit, File::open(path)?));
        }
        match &mut self.open {
            Some((_, file)) => Ok(file),
            None => Err(io::Error::other("unit file not open")),
        }
    }
}

impl Read for PayloadReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending_at == self.pending.len() {
            if self.pos >= self.end || buf.is_empty() {
                return Ok(0);
            }
            self.fill()?;
        }
        let available = &self.pending[self.pending_at..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_at += n;
        Ok(n)
    }
}
