//! Storage layer of pagedb.
//!
//! Pages are fixed-size (4KB) blocks and the unit of all I/O. Key components:
//!
//! - **DiskManager**: owns the file, maps logical page ids onto physical pages
//!   and tracks free space with one bitmap page per extent
//! - **BufferPoolManager**: fixed set of in-memory frames with pin counting and
//!   pluggable LRU or clock eviction
//! - **page**: byte-layout views over raw page buffers (bitmap, disk meta,
//!   B+ tree nodes, index roots, catalog meta)

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
pub use disk::{DiskManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::PageId;
