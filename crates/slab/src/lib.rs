//! Slab data model.
//!
//! A slab is the on-disk form of one commitment: unit #0 (root table and file
//! table), witness units, and either plain user-data units or per-slot erasure
//! shards, plus the manifest blob.
//!
//! - [`dirs`] - canonical slab directories and legacy migration
//! - [`layout`] - file names inside a slab and atomic writes
//! - [`table`] - unit #0 builder: root table and file records
//! - [`index`] - parsed path -> location map with an mtime-keyed cache
//! - [`payload`] - scalar packing of user data and the streaming reader
//! - [`fetch`] - resolution of (path, range) to units and offsets
//! - [`inbox`] - provider-side upload receiver

pub mod dirs;
pub mod fetch;
pub mod inbox;
pub mod index;
pub mod layout;
pub mod payload;
pub mod table;

mod error;

pub use dirs::SlabDirs;
pub use error::{SlabError, SlabResult};
pub use fetch::{Segment, resolve_segment};
pub use inbox::ProviderInbox;
pub use index::{FileEntry, SlabIndex, SlabIndexCache};
pub use payload::{FileSpan, PayloadReader, Position};
pub use table::{FileRecord, Unit0Builder};
