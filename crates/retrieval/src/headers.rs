//! Response metadata names of the retrieval wire contract.

/// Hex-encoded proof payload.
pub const PROOF: &str = "X-Slab-Proof";

/// Id of the single-use fetch ticket minted for the response.
pub const FETCH_SESSION: &str = "X-Slab-Fetch-Session";

/// Id of the download session the chunk was logged under.
pub const DOWNLOAD_SESSION: &str = "X-Slab-Download-Session";

/// First served byte, relative to the file.
pub const RANGE_START: &str = "X-Slab-Range-Start";

/// Served byte count.
pub const SERVED_LEN: &str = "X-Slab-Served-Len";

/// Total file length.
pub const FILE_LEN: &str = "X-Slab-File-Len";
