//! GPU buffer capability
//!
//! The scene core only needs four things from a graphics backend: create a
//! buffer, write a byte range into it, grow it, and release it. Backends
//! implement [`GpuBuffers`]; [`HeadlessGpu`] keeps everything in host memory
//! for tests and tools that run without a device.

use std::collections::HashMap;

use thiserror::Error;

/// Opaque GPU buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// GPU buffer errors
#[derive(Debug, Error)]
pub enum GpuError {
    /// The handle was never created or was already destroyed
    #[error("Unknown buffer handle: {0:?}")]
    UnknownBuffer(BufferHandle),

    /// Write past the end of the buffer
    #[error("Upload of {len} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    OutOfBounds {
        /// Write offset in bytes
        offset: usize,
        /// Write length in bytes
        len: usize,
        /// Buffer capacity in bytes
        capacity: usize,
    },

    /// The backend could not provide the memory
    #[error("Allocation failed: requested {requested} bytes, available {available} bytes")]
    AllocationFailed {
        /// Bytes requested
        requested: usize,
        /// Bytes left in the budget
        available: usize,
    },

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Buffer operations the instancing layer needs from a backend
pub trait GpuBuffers {
    /// Allocate a buffer of `capacity_bytes`
    fn create_buffer(&mut self, capacity_bytes: usize) -> Result<BufferHandle, GpuError>;

    /// Write `bytes` at `offset`
    fn upload_range(&mut self, handle: BufferHandle, offset: usize, bytes: &[u8]) -> Result<(), GpuError>;

    /// Grow or shrink a buffer; the common prefix is preserved
    fn resize(&mut self, handle: BufferHandle, new_capacity_bytes: usize) -> Result<(), GpuError>;

    /// Release a buffer
    fn destroy(&mut self, handle: BufferHandle) -> Result<(), GpuError>;
}

/// Counters kept by [`HeadlessGpu`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    /// Buffers created
    pub buffers_created: usize,
    /// Buffers resized
    pub resizes: usize,
    /// `upload_range` calls
    pub uploads: usize,
    /// Bytes written through `upload_range`
    pub bytes_uploaded: usize,
    /// Buffers destroyed
    pub buffers_destroyed: usize,
}

/// Host-memory implementation of [`GpuBuffers`]
#[derive(Debug, Default)]
pub struct HeadlessGpu {
    buffers: HashMap<BufferHandle, Vec<u8>>,
    next_handle: u64,
    budget: Option<usize>,
    stats: GpuStats,
}

impl HeadlessGpu {
    /// Unlimited memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail allocations once `budget` bytes are in use
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget: Some(budget),
            ..Self::default()
        }
    }

    /// Counters since creation
    pub const fn stats(&self) -> &GpuStats {
        &self.stats
    }

    /// Reset the counters
    pub fn reset_stats(&mut self) {
        self.stats = GpuStats::default();
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, handle: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&handle).map(Vec::as_slice)
    }

    /// Number of buffers alive
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Bytes held by all live buffers
    pub fn allocated_bytes(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }

    fn reserve(&self, additional: usize) -> Result<(), GpuError> {
        if let Some(budget) = self.budget {
            let available = budget.saturating_sub(self.allocated_bytes());
            if additional > available {
                return Err(GpuError::AllocationFailed { requested: additional, available });
            }
        }
        Ok(())
    }
}

impl GpuBuffers for HeadlessGpu {
    fn create_buffer(&mut self, capacity_bytes: usize) -> Result<BufferHandle, GpuError> {
        self.reserve(capacity_bytes)?;
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(handle, vec![0; capacity_bytes]);
        self.stats.buffers_created += 1;
        log::trace!("Created buffer {handle:?} ({capacity_bytes} bytes)");
        Ok(handle)
    }

    fn upload_range(&mut self, handle: BufferHandle, offset: usize, bytes: &[u8]) -> Result<(), GpuError> {
        let buffer = self.buffers.get_mut(&handle).ok_or(GpuError::UnknownBuffer(handle))?;
        let end = offset + bytes.len();
        if end > buffer.len() {
            return Err(GpuError::OutOfBounds { offset, len: bytes.len(), capacity: buffer.len() });
        }
        buffer[offset..end].copy_from_slice(bytes);
        self.stats.uploads += 1;
        self.stats.bytes_uploaded += bytes.len();
        Ok(())
    }

    fn resize(&mut self, handle: BufferHandle, new_capacity_bytes: usize) -> Result<(), GpuError> {
        let current = self.buffers.get(&handle).ok_or(GpuError::UnknownBuffer(handle))?.len();
        self.reserve(new_capacity_bytes.saturating_sub(current))?;
        if let Some(buffer) = self.buffers.get_mut(&handle) {
            buffer.resize(new_capacity_bytes, 0);
        }
        self.stats.resizes += 1;
        log::trace!("Resized buffer {handle:?}: {current} -> {new_capacity_bytes} bytes");
        Ok(())
    }

    fn destroy(&mut self, handle: BufferHandle) -> Result<(), GpuError> {
        self.buffers.remove(&handle).ok_or(GpuError::UnknownBuffer(handle))?;
        self.stats.buffers_destroyed += 1;
        Ok(())
    }
}
