//! Wire protocol types for the strata column-store driver.
//!
//! Covers frame layout, request and response bodies, primitive wire types,
//! block compression, value types with their codec registry, and the buffer
//! pool used while building frames. Nothing here opens a socket.

pub mod frame;
pub mod memory_pool;
pub mod registry;
pub mod value;

pub use crate::frame::types::Consistency;
pub use crate::memory_pool::{MemoryPool, PoolLimits};
pub use crate::registry::TypeRegistry;
