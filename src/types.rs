//! Type registry: maps runtime element-type tags onto transport-native
//! types and pre-builds the chunked aggregate type used by the RMA engine.
//!
//! The registry needs no generics beyond a small closed set of base element
//! types, so it is implemented as a tagged enum ([`DType`]) rather than a
//! compile-time type parameter -- see the REDESIGN FLAGS / DESIGN NOTES in
//! `SPEC_FULL.md` for why template-style dispatch was dropped in favor of
//! this. Initialized once per process by [`crate::init`]; there is nothing
//! to tear down beyond dropping the registry (the "native type handles" here
//! are just `DType` values, not external resources -- a real transport
//! binding would own `MPI_Datatype`-style handles here instead).

use std::sync::atomic::{AtomicU64, Ordering};

/// Recognized element types.
///
/// Closed by design: the runtime does not marshal arbitrary user-defined
/// structures (see Non-goals in `SPEC_FULL.md`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size in bytes of one element of this type.
    pub fn size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// True if this dtype is an integral type of at most 64 bits, the only
    /// family `compare_and_swap` accepts (§4.E).
    pub fn is_integral(self) -> bool {
        !matches!(self, DType::F32 | DType::F64)
    }
}

/// The transport's maximum contiguous element count per single call,
/// `2^31 - 1`. The chunk aggregate type packs exactly this many base
/// elements, so any transfer up to `CHUNK * CHUNK` elements completes in at
/// most two transport calls (§4.A, §4.E).
pub const MAX_CONTIG_ELEMENTS: u64 = (1u64 << 31) - 1;

// Tests and the in-process transport's integration tests would otherwise
// need multi-gigabyte buffers to exercise the two-chunk code path. This
// override lets `testing::set_chunk_override` substitute a small value so
// the same chunking logic runs against tractable buffer sizes; production
// code paths never touch it.
static CHUNK_OVERRIDE: AtomicU64 = AtomicU64::new(0);

/// The chunk size actually used by the RMA and collective engines:
/// [`MAX_CONTIG_ELEMENTS`] unless overridden for tests via
/// [`crate::testing::set_chunk_override`].
pub fn chunk_size() -> u64 {
    let v = CHUNK_OVERRIDE.load(Ordering::Relaxed);
    if v == 0 { MAX_CONTIG_ELEMENTS } else { v }
}

pub(crate) fn set_chunk_override_raw(v: Option<u64>) {
    CHUNK_OVERRIDE.store(v.unwrap_or(0), Ordering::Relaxed);
}

/// Splits `nelem` into a chunking plan: a number of full `chunk_size()`
/// chunks followed by an optional remainder, in address order (§4.E
/// "Algorithmic details").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk: u64,
    pub nchunks: u64,
    pub remainder: u64,
}

impl ChunkPlan {
    pub fn for_count(nelem: u64) -> Self {
        let chunk = chunk_size();
        Self {
            chunk,
            nchunks: nelem / chunk,
            remainder: nelem % chunk,
        }
    }

    /// Total number of transport calls this plan requires.
    pub fn num_calls(&self) -> u64 {
        self.nchunks + u64::from(self.remainder > 0)
    }

    /// Iterate over `(offset_in_elements, count_in_elements)` for each
    /// transport call, chunks first then the remainder.
    pub fn calls(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let chunk = self.chunk;
        (0..self.nchunks)
            .map(move |i| (i * chunk, chunk))
            .chain((self.remainder > 0).then(|| (self.nchunks * chunk, self.remainder)))
    }
}

/// Combine two same-length byte slices, interpreted as `count` elements of
/// `dtype`, element-wise with `op`. Shared by `accumulate`, `fetch_and_op`,
/// `reduce` and `allreduce` so every transport binding reduces identically
/// (§4.E, §4.H).
pub(crate) fn combine_elem(dtype: DType, op: crate::transport::ReduceOp, a: &[u8], b: &[u8]) -> Vec<u8> {
    let width = dtype.size();
    let mut out = Vec::with_capacity(a.len());
    for (ea, eb) in a.chunks_exact(width).zip(b.chunks_exact(width)) {
        out.extend_from_slice(&combine_one(dtype, op, ea, eb));
    }
    out
}

fn combine_one(dtype: DType, op: crate::transport::ReduceOp, a: &[u8], b: &[u8]) -> Vec<u8> {
    use crate::transport::ReduceOp::*;
    match dtype {
        DType::F32 => {
            let x = f32::from_le_bytes(a.try_into().unwrap());
            let y = f32::from_le_bytes(b.try_into().unwrap());
            let r = match op {
                Min => x.min(y),
                Max => x.max(y),
                Sum => x + y,
                Prod => x * y,
                Replace => y,
                NoOp => x,
                _ => x,
            };
            r.to_le_bytes().to_vec()
        }
        DType::F64 => {
            let x = f64::from_le_bytes(a.try_into().unwrap());
            let y = f64::from_le_bytes(b.try_into().unwrap());
            let r = match op {
                Min => x.min(y),
                Max => x.max(y),
                Sum => x + y,
                Prod => x * y,
                Replace => y,
                NoOp => x,
                _ => x,
            };
            r.to_le_bytes().to_vec()
        }
        DType::U8 => combine_int::<u8>(op, a, b),
        DType::U16 => combine_int::<u16>(op, a, b),
        DType::U32 => combine_int::<u32>(op, a, b),
        DType::U64 => combine_int::<u64>(op, a, b),
        DType::I8 => combine_int::<i8>(op, a, b),
        DType::I16 => combine_int::<i16>(op, a, b),
        DType::I32 => combine_int::<i32>(op, a, b),
        DType::I64 => combine_int::<i64>(op, a, b),
    }
}

trait IntElem:
    Copy
    + Ord
    + std::ops::Add<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::ops::BitAnd<Output = Self>
    + std::ops::BitOr<Output = Self>
    + std::ops::BitXor<Output = Self>
{
    fn from_le(buf: &[u8]) -> Self;
    fn to_le(self) -> Vec<u8>;
    fn zero_is_false(self) -> bool;
    fn truthy(a: bool, b: bool) -> Self;
}

macro_rules! impl_int_elem {
    ($ty:ty) => {
        impl IntElem for $ty {
            fn from_le(buf: &[u8]) -> Self {
                <$ty>::from_le_bytes(buf.try_into().unwrap())
            }
            fn to_le(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
            fn zero_is_false(self) -> bool {
                self != 0
            }
            fn truthy(a: bool, b: bool) -> Self {
                if a && b { 1 } else { 0 }
            }
        }
    };
}

impl_int_elem!(u8);
impl_int_elem!(u16);
impl_int_elem!(u32);
impl_int_elem!(u64);
impl_int_elem!(i8);
impl_int_elem!(i16);
impl_int_elem!(i32);
impl_int_elem!(i64);

fn combine_int<T: IntElem>(op: crate::transport::ReduceOp, a: &[u8], b: &[u8]) -> Vec<u8> {
    use crate::transport::ReduceOp::*;
    let x = T::from_le(a);
    let y = T::from_le(b);
    let r = match op {
        Min => x.min(y),
        Max => x.max(y),
        Sum => x + y,
        Prod => x * y,
        Band => x & y,
        Bor => x | y,
        Bxor => x ^ y,
        Land => T::truthy(x.zero_is_false(), y.zero_is_false()),
        Lor => T::truthy(x.zero_is_false() || y.zero_is_false(), true),
        Lxor => T::truthy(x.zero_is_false() ^ y.zero_is_false(), true),
        Replace => y,
        NoOp => x,
    };
    r.to_le()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_sizes() {
        assert_eq!(DType::U8.size(), 1);
        assert_eq!(DType::F64.size(), 8);
        assert_eq!(DType::I32.size(), 4);
    }

    #[test]
    fn cas_integral_only() {
        assert!(DType::U64.is_integral());
        assert!(!DType::F32.is_integral());
    }

    #[test]
    fn chunk_plan_splits_with_remainder() {
        set_chunk_override_raw(Some(10));
        let plan = ChunkPlan::for_count(25);
        assert_eq!(plan.nchunks, 2);
        assert_eq!(plan.remainder, 5);
        assert_eq!(plan.num_calls(), 3);
        let calls: Vec<_> = plan.calls().collect();
        assert_eq!(calls, vec![(0, 10), (10, 10), (20, 5)]);
        set_chunk_override_raw(None);
    }

    #[test]
    fn chunk_plan_exact_multiple_has_no_remainder_call() {
        set_chunk_override_raw(Some(10));
        let plan = ChunkPlan::for_count(20);
        assert_eq!(plan.num_calls(), 2);
        set_chunk_override_raw(None);
    }
}
