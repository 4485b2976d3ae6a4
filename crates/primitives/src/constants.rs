//! Unit (MDU) geometry.
//!
//! A unit is a fixed 8 MiB block split into 64 blobs of 128 KiB. Each blob is a
//! sequence of 32-byte scalars carrying 31 payload bytes each.

/// Size of a unit in bytes.
pub const MDU_SIZE: usize = 8 * 1024 * 1024;

/// Size of a blob in bytes. A single proof covers exactly one blob.
pub const BLOB_SIZE: usize = 128 * 1024;

/// Number of blobs per unit.
pub const BLOBS_PER_MDU: usize = MDU_SIZE / BLOB_SIZE;

/// Size of a scalar in bytes.
pub const SCALAR_SIZE: usize = 32;

/// Usable payload bytes per scalar.
pub const SCALAR_PAYLOAD: usize = 31;

/// Number of scalars per blob.
pub const SCALARS_PER_BLOB: usize = BLOB_SIZE / SCALAR_SIZE;

/// Number of scalars per unit.
pub const SCALARS_PER_MDU: usize = MDU_SIZE / SCALAR_SIZE;

/// Payload bytes a single user-data unit can hold.
pub const MDU_PAYLOAD_CAPACITY: u64 = (SCALARS_PER_MDU * SCALAR_PAYLOAD) as u64;

/// Size of a compressed commitment (blob commitment or slab identifier).
pub const COMMITMENT_SIZE: usize = 48;

/// Size of a unit root.
pub const ROOT_SIZE: usize = 32;

/// Number of leading blobs of unit #0 reserved for the root table.
pub const ROOT_TABLE_BLOBS: usize = 16;

/// Byte length of the root table region.
pub const ROOT_TABLE_BYTES: usize = ROOT_TABLE_BLOBS * BLOB_SIZE;

/// Maximum number of roots unit #0 can hold.
pub const MAX_ROOTS: usize = ROOT_TABLE_BYTES / ROOT_SIZE;

/// Offset of the file-table header within unit #0.
pub const FILE_TABLE_OFFSET: usize = ROOT_TABLE_BYTES;

/// Size of the file-table header.
pub const FILE_TABLE_HEADER_SIZE: usize = 64;

/// Size of one file record.
pub const FILE_RECORD_SIZE: usize = 64;

/// Maximum length of a file path stored in a record.
pub const MAX_PATH_LEN: usize = 40;

/// Maximum number of records unit #0 can hold.
pub const MAX_FILE_RECORDS: usize =
    (MDU_SIZE - FILE_TABLE_OFFSET - FILE_TABLE_HEADER_SIZE) / FILE_RECORD_SIZE;

/// Number of plain-mode witness units needed for `user_units` user-data units.
pub const fn plain_witness_count(user_units: u64) -> u64 {
    witness_units_for_leaves(user_units, BLOBS_PER_MDU as u64)
}

/// Number of witness units holding `leaves_per_unit` commitments for each of
/// `user_units` user-data units.
pub const fn witness_units_for_leaves(user_units: u64, leaves_per_unit: u64) -> u64 {
    let bytes = user_units * leaves_per_unit * COMMITMENT_SIZE as u64;
    bytes.div_ceil(MDU_SIZE as u64)
}

/// Number of user-data units needed to cover logical offsets `[0, end)`.
pub const fn user_units_for_end(end: u64) -> u64 {
    end.div_ceil(MDU_PAYLOAD_CAPACITY)
}
