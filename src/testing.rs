//! Testing utilities (§8, §4.A "Algorithmic details" override hook).
//!
//! [`MAX_CONTIG_ELEMENTS`](crate::types::MAX_CONTIG_ELEMENTS) is `2^31 - 1`;
//! exercising the two-chunk transport path honestly would need multi-
//! gigabyte buffers. [`set_chunk_override`] substitutes a small chunk size
//! for the duration of a test so the same chunking logic in
//! [`crate::types::ChunkPlan`] runs against tractable buffers while still
//! forcing the chunk-plus-remainder code path. Production code never calls
//! this; it exists for `tests/` and doctests.

use crate::types::set_chunk_override_raw;

/// RAII guard restoring the real chunk size (`2^31 - 1`) on drop.
///
/// ```
/// use onesided::testing::set_chunk_override;
///
/// let _guard = set_chunk_override(10);
/// // ... exercise the chunked path with buffers of ~20-30 elements ...
/// ```
pub struct ChunkOverrideGuard(());

impl Drop for ChunkOverrideGuard {
    fn drop(&mut self) {
        set_chunk_override_raw(None);
    }
}

/// Override the chunk size used by [`crate::types::ChunkPlan`] until the
/// returned guard is dropped. Tests that call this from multiple threads
/// within the same process (as `LocalTransport`-backed tests do) must only
/// ever use a single override value at a time -- the override is process-
/// wide, not per-thread.
pub fn set_chunk_override(chunk: u64) -> ChunkOverrideGuard {
    set_chunk_override_raw(Some(chunk));
    ChunkOverrideGuard(())
}
