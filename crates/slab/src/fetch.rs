//! Fetch resolver: (path, start, len) -> unit, offset, reader.
//!
//! The resolver only finds bytes. Whether a range may carry a proof (it must
//! stay inside one blob) is decided by the caller through
//! [`Segment::check_single_blob`].

use std::path::{Path, PathBuf};

use slabd_primitives::constants::BLOB_SIZE;

use crate::{
    SlabError, SlabResult,
    index::SlabIndex,
    layout,
    payload::{FileSpan, PayloadReader, Position},
};

/// A resolved byte range.
#[derive(Debug)]
pub struct Segment {
    /// Streaming reader over the served bytes.
    pub reader: PayloadReader,
    /// On-disk index of the unit holding the first byte.
    pub unit_index: u64,
    /// Path of that unit (`mdu_<unit_index>.bin`).
    pub unit_path: PathBuf,
    /// Logical offset of the first byte in the user-data address space.
    pub abs_offset: u64,
    /// Byte offset of the first byte inside its unit.
    pub unit_offset: usize,
    /// First byte, relative to the file.
    pub range_start: u64,
    /// Bytes that will be served.
    pub served_len: u64,
    /// Full file length.
    pub file_len: u64,
    span: FileSpan,
}

impl Segment {
    /// Physical positions of the first and last served bytes.
    pub fn blob_span(&self) -> SlabResult<(Position, Position)> {
        let first = self.span.position(self.range_start)?;
        let last = self.span.position(self.range_start + self.served_len.max(1) - 1)?;
        Ok((first, last))
    }

    /// Blob of the first served byte.
    pub fn blob_index(&self) -> usize {
        self.unit_offset / BLOB_SIZE
    }

    /// Fail with `RangeCrossesBoundary` unless the range fits in one blob.
    pub fn check_single_blob(&self) -> SlabResult<()> {
        self.span.check_single_blob(self.range_start, self.served_len)
    }
}

/// Resolve `[start, start + len)` of `path` in the slab at `dir`.
///
/// `len == 0` means "to end of file". The served length is clamped to the
/// file; `start >= file_len` is `NotFound`.
pub fn resolve_segment(
    dir: &Path,
    index: &SlabIndex,
    path: &str,
    start: u64,
    len: u64,
) -> SlabResult<Segment> {
    let entry = index.lookup(path)?;
    if start >= entry.length {
        return Err(SlabError::NotFound(format!(
            "offset {start} past end of {path} ({} bytes)",
            entry.length
        )));
    }

    let remaining = entry.length - start;
    let served_len = if len == 0 { remaining } else { len.min(remaining) };
    let span = entry.span();
    let first = span.position(start)?;
    let unit_index = index.unit_file_index(first.unit);

    Ok(Segment {
        reader: PayloadReader::new(dir, index.unit_file_index(0), span, start, served_len),
        unit_index,
        unit_path: layout::unit_path(dir, unit_index),
        abs_offset: entry.start + start,
        unit_offset: first.byte,
        range_start: start,
        served_len,
        file_len: entry.length,
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{payload, table::Unit0Builder};
    use assert_matches::assert_matches;
    use slabd_primitives::Root;
    use std::{fs, io::Read};
    use tempfile::tempdir;

    const HELLO: &[u8] = b"Hello World from Slab\n";

    fn hello_slab(dir: &Path) -> SlabIndex {
        let mut builder = Unit0Builder::new();
        builder.set_roots(vec![Root::repeat_byte(1), Root::repeat_byte(2)]).unwrap();
        builder.add_file("hello.txt", HELLO.len() as u64, 0, 0).unwrap();
        fs::write(layout::unit_path(dir, 0), builder.finalize()).unwrap();
        fs::write(layout::unit_path(dir, 2), payload::encode(HELLO).unwrap()).unwrap();
        SlabIndex::load(dir).unwrap()
    }

    fn read_all(mut segment: Segment) -> Vec<u8> {
        let mut out = Vec::new();
        segment.reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_resolve_full_and_sub_range() {
        let dir = tempdir().unwrap();
        let index = hello_slab(dir.path());

        let full = resolve_segment(dir.path(), &index, "hello.txt", 0, 0).unwrap();
        assert_eq!(full.unit_index, 2);
        assert_eq!(full.served_len, 22);
        assert_eq!(full.unit_path, dir.path().join("mdu_2.bin"));
        assert_eq!(read_all(full), HELLO);

        let world = resolve_segment(dir.path(), &index, "hello.txt", 6, 5).unwrap();
        world.check_single_blob().unwrap();
        assert_eq!(world.unit_offset, 10 + 6);
        assert_eq!(read_all(world), b"World");
    }

    #[test]
    fn test_resolve_clamps_and_rejects() {
        let dir = tempdir().unwrap();
        let index = hello_slab(dir.path());

        let tail = resolve_segment(dir.path(), &index, "hello.txt", 20, 100).unwrap();
        assert_eq!(tail.served_len, 2);

        assert_matches!(
            resolve_segment(dir.path(), &index, "hello.txt", 22, 1),
            Err(SlabError::NotFound(_))
        );
        assert_matches!(
            resolve_segment(dir.path(), &index, "nope", 0, 1),
            Err(SlabError::NotFound(_))
        );
    }

    #[test]
    fn test_cross_blob_range_detected() {
        let dir = tempdir().unwrap();
        let raw = vec![7u8; 200_000];
        let mut builder = Unit0Builder::new();
        builder.set_roots(vec![Root::repeat_byte(1), Root::repeat_byte(2)]).unwrap();
        builder.add_file("big", raw.len() as u64, 0, 0).unwrap();
        fs::write(layout::unit_path(dir.path(), 0), builder.finalize()).unwrap();
        let index = SlabIndex::load(dir.path()).unwrap();

        let boundary = (BLOB_SIZE / 32 * 31) as u64;
        let segment = resolve_segment(dir.path(), &index, "big", boundary - 4, 8).unwrap();
        let (first, last) = segment.blob_span().unwrap();
        assert_eq!((first.blob(), last.blob()), (0, 1));
        assert_matches!(
            segment.check_single_blob(),
            Err(SlabError::RangeCrossesBoundary { .. })
        );
    }
}
