//! Access layer: index structures built on the buffer pool.
//!
//! - **BPlusTree**: unique-key B+ tree whose nodes are buffer pool pages
//! - **IndexIterator**: ordered cursor over the tree's leaf level
//! - **KeyManager / GenericKey**: fixed-width key encoding with typed comparison
//! - **RowId**: address of the row an index entry points at
//! - **Value / DataType**: column values that keys are built from

pub mod btree;
pub mod tuple;
pub mod value;

pub use btree::{BPlusTree, GenericKey, IndexIterator, KeyManager};
pub use tuple::RowId;
pub use value::{DataType, Value};
