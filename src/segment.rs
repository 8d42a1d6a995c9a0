//! Segment table (§4.B): per-team bookkeeping for named memory regions
//! registered over a team's window.
//!
//! Segment id `0` is reserved: it names "this unit's local allocation
//! pool" and is never a key in the table, so [`SegmentTable::insert`]
//! rejects it outright. Every other segment id maps to a
//! [`SegmentRecord`] carrying, per member rank, the byte displacement of
//! that member's share of the region within the team's window and (when
//! the member is co-located) the local shared-memory base the RMA
//! engine's fast path can `memcpy` through directly.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Segment id reserved for a unit's private local pool; never stored in a
/// [`SegmentTable`].
pub const LOCAL_SEGMENT: i16 = crate::gptr::LOCAL_SEGMENT;

/// One registered region: per-rank displacement into the team's window,
/// and (for co-located ranks) the local base address usable for a
/// pointer-free `memcpy`.
#[derive(Clone, Debug)]
pub struct SegmentRecord {
    pub byte_size_per_unit: u64,
    per_member_disp: Vec<u64>,
    per_member_shmem_base: Vec<Option<u64>>,
}

impl SegmentRecord {
    pub fn new(
        byte_size_per_unit: u64,
        per_member_disp: Vec<u64>,
        per_member_shmem_base: Vec<Option<u64>>,
    ) -> Self {
        Self {
            byte_size_per_unit,
            per_member_disp,
            per_member_shmem_base,
        }
    }
}

/// A team's table of registered segments, keyed by segment id.
///
/// Guarded internally by a `Mutex` (as §4.B specifies: "guarded by the
/// team's registry lock") so a `Team` can hand out shared references to
/// its table without additionally synchronizing at the team level.
pub struct SegmentTable {
    records: Mutex<HashMap<i16, SegmentRecord>>,
}

impl SegmentTable {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Register `segid` with per-member displacement/shared-base arrays.
    /// Rejects [`LOCAL_SEGMENT`] and re-registration of an already-bound id.
    pub fn insert(&self, segid: i16, record: SegmentRecord) -> Result<()> {
        if segid == LOCAL_SEGMENT {
            return Err(Error::invalid("segment id 0 is reserved for the local pool"));
        }
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&segid) {
            return Err(Error::invalid(format!("segment {segid} already bound")));
        }
        records.insert(segid, record);
        Ok(())
    }

    /// Byte displacement of `rank`'s share of `segid` within the team's
    /// window.
    pub fn lookup_disp(&self, segid: i16, rank: u16) -> Result<u64> {
        let records = self.records.lock().unwrap();
        let record = records
            .get(&segid)
            .ok_or_else(|| Error::not_found(format!("segment {segid} not bound")))?;
        record
            .per_member_disp
            .get(rank as usize)
            .copied()
            .ok_or_else(|| Error::invalid(format!("rank {rank} out of range for segment {segid}")))
    }

    /// The local shared-memory base for `rank`'s share of `segid`, if that
    /// rank is co-located with the caller.
    pub fn lookup_shmem_base(&self, segid: i16, rank: u16) -> Result<Option<u64>> {
        let records = self.records.lock().unwrap();
        let record = records
            .get(&segid)
            .ok_or_else(|| Error::not_found(format!("segment {segid} not bound")))?;
        record
            .per_member_shmem_base
            .get(rank as usize)
            .copied()
            .ok_or_else(|| Error::invalid(format!("rank {rank} out of range for segment {segid}")))
    }

    pub fn byte_size_per_unit(&self, segid: i16) -> Result<u64> {
        let records = self.records.lock().unwrap();
        records
            .get(&segid)
            .map(|r| r.byte_size_per_unit)
            .ok_or_else(|| Error::not_found(format!("segment {segid} not bound")))
    }

    pub fn remove(&self, segid: i16) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .remove(&segid)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("segment {segid} not bound")))
    }
}

impl Default for SegmentTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_zero_is_rejected() {
        let table = SegmentTable::new();
        let err = table
            .insert(LOCAL_SEGMENT, SegmentRecord::new(8, vec![0], vec![None]))
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn insert_lookup_remove_round_trip() {
        let table = SegmentTable::new();
        table
            .insert(1, SegmentRecord::new(16, vec![0, 16], vec![Some(0), None]))
            .unwrap();
        assert_eq!(table.lookup_disp(1, 1).unwrap(), 16);
        assert_eq!(table.lookup_shmem_base(1, 0).unwrap(), Some(0));
        assert_eq!(table.lookup_shmem_base(1, 1).unwrap(), None);
        table.remove(1).unwrap();
        assert!(table.lookup_disp(1, 0).is_err());
    }

    #[test]
    fn double_insert_is_rejected() {
        let table = SegmentTable::new();
        table
            .insert(2, SegmentRecord::new(4, vec![0], vec![None]))
            .unwrap();
        assert!(table
            .insert(2, SegmentRecord::new(4, vec![0], vec![None]))
            .is_err());
    }
}
