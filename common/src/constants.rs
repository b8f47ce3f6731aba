pub const MAX_KEY_LEN: usize = 2048;

pub const CHUNK_DIR_NAME: &str = "chunks";
pub const MANIFEST_DIR_NAME: &str = "manifests";
pub const TMP_DIR_NAME: &str = "tmp";

pub const MANIFEST_EXT: &str = "json";

pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Set on uploads pushed by the replication dispatcher; carries the source node id.
pub const REPLICATED_FROM_HEADER: &str = "x-replicated-from";
