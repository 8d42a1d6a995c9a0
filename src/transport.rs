//! The transport contract (§6 of `SPEC_FULL.md`).
//!
//! Everything above this module is written against the [`Transport`] trait,
//! never against a concrete message-passing library. A production binding
//! implements this trait over a real transport (an MPI-like library, a
//! GASNet-like active-message layer, ...); this crate ships exactly one
//! implementation, [`local::LocalTransport`], built on OS threads and
//! `Arc`-shared byte buffers, used by the test suite, doctests, and the
//! `demos/` programs.
//!
//! The trait operates on raw bytes: the RMA and collective layers are
//! responsible for computing byte ranges from `(DType, nelem)` and for
//! chunking large transfers into calls that respect [`crate::types::chunk_size`];
//! the transport itself only needs to move bytes and know how to reduce them
//! when given a [`ReduceOp`].

use crate::error::{Error, Result};
use crate::types::DType;

pub mod local;

/// Reduction/accumulate operator, shared by `accumulate`, `fetch_and_op`,
/// `reduce`, and `allreduce` (§4.E, §4.H).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
    Prod,
    Band,
    Bor,
    Bxor,
    Land,
    Lor,
    Lxor,
    Replace,
    NoOp,
}

/// Opaque handle to a process sub-group created by [`Transport::create_group`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupHandle(pub u64);

/// Opaque handle to a one-sided window created over a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Opaque handle to a single in-flight non-blocking transport request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReqId(pub u64);

/// The primitives the runtime requires of an underlying transport.
///
/// Every method that can fail returns [`Result`]; a `Transport`
/// implementation must never panic on a caller error it can instead reject
/// with [`Error::Invalid`] or [`Error::Transport`].
pub trait Transport: Send + Sync {
    /// Total number of units in the transport's world (e.g. `MPI_COMM_WORLD`
    /// size).
    fn num_units(&self) -> u16;

    /// This process's unit id in the world.
    fn this_unit(&self) -> u16;

    /// Create a sub-group (and its communicator) containing exactly
    /// `members`, in the given order. Collective over `members`.
    fn create_group(&self, members: &[u16]) -> Result<GroupHandle>;

    /// Release a group created by [`Transport::create_group`].
    fn free_group(&self, group: GroupHandle) -> Result<()>;

    /// Create a one-sided window of `bytes_per_unit` bytes on every member
    /// of `group`. Collective over the group.
    fn win_create(&self, group: GroupHandle, bytes_per_unit: u64) -> Result<WindowHandle>;

    /// Release a window created by [`Transport::win_create`].
    fn win_free(&self, win: WindowHandle) -> Result<()>;

    /// True if `rank` (a rank within the window's group) shares memory with
    /// the caller, per the transport's shared-memory co-location query.
    fn is_co_located(&self, win: WindowHandle, rank: u16) -> Result<bool>;

    /// Direct pointer-free access to a co-located peer's window bytes,
    /// starting at `byte_offset`, used by the shared-memory fast path. Only
    /// valid when [`Transport::is_co_located`] is true for `rank`.
    fn co_located_copy_out(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        buf: &mut [u8],
    ) -> Result<()>;

    /// The co-located counterpart of [`Transport::co_located_copy_out`] for
    /// writes.
    fn co_located_copy_in(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        buf: &[u8],
    ) -> Result<()>;

    /// Blocking one-sided read of `buf.len()` bytes from `rank`'s window at
    /// `byte_offset`.
    fn get(&self, win: WindowHandle, rank: u16, byte_offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Blocking one-sided write; returns once `buf` may be reused, not once
    /// remotely visible (see §4.E).
    fn put(&self, win: WindowHandle, rank: u16, byte_offset: u64, buf: &[u8]) -> Result<()>;

    /// Non-blocking counterpart of [`Transport::get`].
    fn rget(&self, win: WindowHandle, rank: u16, byte_offset: u64, buf: &mut [u8])
    -> Result<ReqId>;

    /// Non-blocking counterpart of [`Transport::put`].
    fn rput(&self, win: WindowHandle, rank: u16, byte_offset: u64, buf: &[u8]) -> Result<ReqId>;

    /// Element-wise accumulate of `buf` into `rank`'s window at
    /// `byte_offset`, interpreting both sides as `dtype`-typed arrays and
    /// combining with `op`.
    fn accumulate(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        buf: &[u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()>;

    /// Atomic single-element fetch-then-apply: `result` receives the
    /// pre-op value, then the remote element is combined with `value` via
    /// `op`.
    fn fetch_and_op(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        value: &[u8],
        result: &mut [u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()>;

    /// Atomic compare-and-swap on a single element: swaps in `new` iff the
    /// remote value equals `expected`, and `result` always receives the
    /// pre-swap value.
    fn compare_and_swap(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        new: &[u8],
        expected: &[u8],
        result: &mut [u8],
        dtype: DType,
    ) -> Result<()>;

    /// Force remote completion of prior one-sided writes at `rank`, then a
    /// memory-model sync.
    fn win_flush(&self, win: WindowHandle, rank: u16) -> Result<()>;

    /// As [`Transport::win_flush`], for every rank of the window's group.
    fn win_flush_all(&self, win: WindowHandle) -> Result<()>;

    /// Local-only completion: the source buffer of prior writes to `rank`
    /// may be reused, without a remote-visibility guarantee.
    fn win_flush_local(&self, win: WindowHandle, rank: u16) -> Result<()>;

    /// As [`Transport::win_flush_local`], for every rank.
    fn win_flush_local_all(&self, win: WindowHandle) -> Result<()>;

    /// Poke transport progress (the `Iprobe` nudge described in §4.G).
    fn iprobe(&self);

    /// Block until `req` completes.
    fn wait(&self, req: ReqId) -> Result<()>;

    /// Block until every request in `reqs` completes.
    fn waitall(&self, reqs: &[ReqId]) -> Result<()>;

    /// Non-blocking completion check.
    fn test(&self, req: ReqId) -> Result<bool>;

    /// Non-blocking completion check over every request in `reqs`.
    fn testall(&self, reqs: &[ReqId]) -> Result<bool>;

    /// Full barrier over `group`.
    fn barrier(&self, group: GroupHandle) -> Result<()>;

    /// Broadcast `buf` (sized for one element's worth of bytes) from `root`
    /// to every member of `group`.
    fn bcast(&self, group: GroupHandle, root: u16, buf: &mut [u8]) -> Result<()>;

    /// Scatter equal-sized shares of `send` (valid on `root` only) into
    /// `recv` on every member.
    fn scatter(&self, group: GroupHandle, root: u16, send: &[u8], recv: &mut [u8]) -> Result<()>;

    /// Gather equal-sized shares from every member into `recv` (valid on
    /// `root` only).
    fn gather(&self, group: GroupHandle, root: u16, send: &[u8], recv: &mut [u8]) -> Result<()>;

    /// Gather equal-sized shares from every member into `recv` on every
    /// member.
    fn allgather(&self, group: GroupHandle, send: &[u8], recv: &mut [u8]) -> Result<()>;

    /// Variable-sized gather: `counts[i]`/`displs[i]` are byte counts and
    /// byte displacements into `recv` for member `i`.
    fn allgatherv(
        &self,
        group: GroupHandle,
        send: &[u8],
        recv: &mut [u8],
        counts: &[u64],
        displs: &[u64],
    ) -> Result<()>;

    /// Reduce `send` into `recv` (valid on `root` only) using `op`.
    fn reduce(
        &self,
        group: GroupHandle,
        root: u16,
        send: &[u8],
        recv: &mut [u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()>;

    /// Reduce `send` into `recv` on every member using `op`.
    fn allreduce(
        &self,
        group: GroupHandle,
        send: &[u8],
        recv: &mut [u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()>;

    /// Blocking two-sided send to `dest`, tagged `tag`.
    fn send(&self, dest: u16, tag: i32, buf: &[u8]) -> Result<()>;

    /// Blocking two-sided receive from `src`, tagged `tag`.
    fn recv(&self, src: u16, tag: i32, buf: &mut [u8]) -> Result<()>;

    /// Combined send+receive, deadlock-safe with respect to a matching
    /// `sendrecv` on the peer.
    fn sendrecv(
        &self,
        dest: u16,
        send_buf: &[u8],
        src: u16,
        recv_buf: &mut [u8],
        tag: i32,
    ) -> Result<()>;
}

pub(crate) fn check_unit_in_range(unit: u16, num_units: u16) -> Result<()> {
    if unit >= num_units {
        return Err(Error::invalid(format!(
            "unit {unit} out of range for a world of {num_units} units"
        )));
    }
    Ok(())
}
