//! Shared format constants (pool layout, stream envelope, haves message, dir engine payload).

// -------- Pool layout --------
pub const POOL_INDEX_FILE: &str = "pool.json";
pub const POOL_INDEX_VERSION: u32 = 1;
pub const LOCK_FILE: &str = "LOCK";
/// Engine namespace for the directory engine: <root>/engine
pub const DIR_ENGINE_SUBDIR: &str = "engine";

// -------- Stream envelope --------
// [magic8][ver u16][mode u8][codec u8][created_ms u64][src_len u16][src..][base_len u16][base..]?[crc32 u32]
pub const STREAM_MAGIC: &[u8; 8] = b"VSNAPST1";
pub const STREAM_VERSION: u16 = 1;
pub const STREAM_FIXED_HDR_SIZE: usize = 8 + 2 + 1 + 1 + 8;
pub const STREAM_MODE_FULL: u8 = 0;
pub const STREAM_MODE_INCREMENTAL: u8 = 1;
pub const STREAM_CODEC_NONE: u8 = 0;
pub const STREAM_CODEC_ZSTD: u8 = 1;
/// Upper bound for an id carried in the header.
pub const STREAM_MAX_ID_LEN: usize = 256;

// -------- Payload chunks --------
// [stored_len u32][raw_len u32][crc32 u32] + stored bytes; stored_len == 0 terminates.
pub const CHUNK_HDR_SIZE: usize = 4 + 4 + 4;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

// -------- Haves message --------
// [magic8][len u32][crc32 u32] + JSON body
pub const HAVES_MAGIC: &[u8; 8] = b"VSHAVES1";
pub const HAVES_HDR_SIZE: usize = 8 + 4 + 4;
pub const HAVES_MAX_BODY: usize = 16 * 1024 * 1024;

// -------- Directory engine payload --------
// [magic8][flags u8] then entries [kind u8][path_len u16][path][mode u32][data_len u64][data]
pub const DIR_PAYLOAD_MAGIC: &[u8; 8] = b"VSDIRPL1";
pub const DIR_PAYLOAD_FLAG_INCREMENTAL: u8 = 0x1;
pub const DIR_ENTRY_END: u8 = 0;
pub const DIR_ENTRY_DIR: u8 = 1;
pub const DIR_ENTRY_FILE: u8 = 2;
pub const DIR_ENTRY_SYMLINK: u8 = 3;
pub const DIR_ENTRY_DELETE: u8 = 4;
