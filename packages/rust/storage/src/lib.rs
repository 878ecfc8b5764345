//! Durable state of a legisync output tree.
//!
//! Everything is addressed through the [`Store`] key-value trait so the
//! reconciliation and extraction logic can run against [`MemoryStore`] in
//! tests and [`FsStore`] in production.
//!
//! - [`Layout`] names every key of the tree.
//! - [`WatermarkStore`] stages and atomically commits the incremental watermark.
//! - [`EntityRegistry`] maps bill identifiers to sessions.

pub mod kv;
pub mod layout;
pub mod registry;
pub mod watermark;

pub use kv::{FsStore, MemoryStore, Store, join_key, key_name, read_json, to_json_bytes, write_json};
pub use layout::{ExtractionErrorDir, Layout};
pub use registry::EntityRegistry;
pub use watermark::WatermarkStore;
