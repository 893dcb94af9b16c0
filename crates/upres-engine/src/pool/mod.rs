//! Buffer pool and memory manager.
//!
//! All pixel-buffer allocation in the pipeline goes through here. Buffers
//! are pooled per usage class and size for reuse, accounted against a
//! safe-memory ceiling, and released under pressure.
//!
//! The pool state is owned by a single task: [`MemoryManager`] runs the
//! pool on its own thread and every mutation arrives as a message through
//! a [`PoolHandle`]. Callers never share the pool mutably; this is the
//! correctness contract that keeps the accounting single-writer.

mod handle;
mod state;

pub use handle::{BufferTicket, MemoryManager, PoolHandle, PooledBuffer};
pub use state::{
    BufferDescriptor, MemoryAccounting, PoolConfig, PoolStats, ScaleBucket, UsageClass,
};
