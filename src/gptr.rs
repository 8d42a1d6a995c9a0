//! The global pointer: a 128-bit value naming one address in the PGAS.
//!
//! `GlobalPtr` is a pure value type -- `Copy`, comparable, and serializable
//! to the fixed wire layout in §6 of `SPEC_FULL.md`. It carries no
//! connection to a live team or segment table; resolving it (turning it into
//! a concrete remote address) is the RMA engine's job, not this type's.

use serde::{Deserialize, Serialize};

use crate::team::TeamId;

/// Segment id naming the per-unit local allocation pool (never a key in the
/// segment table; resolved specially by the RMA engine).
pub const LOCAL_SEGMENT: i16 = 0;

/// A 128-bit global pointer: `(unit, team, segment, flags, offset)`.
///
/// Null iff every field is zero (see [`GlobalPtr::is_null`]). Pointer
/// arithmetic ([`GlobalPtr::incr_addr`]) only ever touches `offset`, in
/// bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalPtr {
    unit_id: u16,
    team_id: u16,
    segment_id: i16,
    flags: u16,
    offset: u64,
}

impl GlobalPtr {
    /// Construct a pointer to element `offset` (in bytes) of `segment_id` on
    /// `unit_id` within `team_id`.
    pub fn new(unit_id: u16, team_id: TeamId, segment_id: i16, offset: u64) -> Self {
        Self {
            unit_id,
            team_id: team_id.raw(),
            segment_id,
            flags: 0,
            offset,
        }
    }

    /// The canonical null pointer: every field zero.
    pub const fn null() -> Self {
        Self {
            unit_id: 0,
            team_id: 0,
            segment_id: 0,
            flags: 0,
            offset: 0,
        }
    }

    /// True iff every field is zero.
    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    pub fn unit_id(&self) -> u16 {
        self.unit_id
    }

    pub fn team_id(&self) -> TeamId {
        TeamId::from_raw(self.team_id)
    }

    pub fn segment_id(&self) -> i16 {
        self.segment_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Return a pointer advanced by `bytes`, added to `offset` only.
    #[must_use]
    pub fn incr_addr(&self, bytes: u64) -> Self {
        let mut copy = *self;
        copy.offset = copy.offset.wrapping_add(bytes);
        copy
    }

    /// Return a pointer identical to `self` but addressed at a different
    /// unit within the same team and segment.
    #[must_use]
    pub fn set_unit(&self, new_unit: u16) -> Self {
        let mut copy = *self;
        copy.unit_id = new_unit;
        copy
    }

    /// Encode to the 128-bit little-endian wire format of §6:
    /// `unit_id(u16), team_id(u16), segment_id(i16), flags(u16), offset(u64)`.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..2].copy_from_slice(&self.unit_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.team_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.segment_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }

    /// Decode from the wire format produced by [`GlobalPtr::to_bytes`].
    pub fn from_bytes(buf: [u8; 16]) -> Self {
        Self {
            unit_id: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            team_id: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
            segment_id: i16::from_le_bytes(buf[4..6].try_into().unwrap()),
            flags: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

impl std::fmt::Display for GlobalPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}+{}",
            self.unit_id, self.team_id, self.segment_id, self.offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_all_zero() {
        assert!(GlobalPtr::null().is_null());
        let p = GlobalPtr::new(1, TeamId::from_raw(0), 0, 0);
        assert!(!p.is_null());
    }

    #[test]
    fn incr_addr_only_touches_offset() {
        let p = GlobalPtr::new(3, TeamId::from_raw(1), 2, 100);
        let q = p.incr_addr(50);
        assert_eq!(q.offset(), 150);
        assert_eq!(q.unit_id(), 3);
        assert_eq!(q.segment_id(), 2);
    }

    #[test]
    fn set_unit_preserves_other_fields() {
        let p = GlobalPtr::new(3, TeamId::from_raw(1), 2, 100);
        let q = p.set_unit(7);
        assert_eq!(q.unit_id(), 7);
        assert_eq!(q.team_id(), p.team_id());
        assert_eq!(q.offset(), p.offset());
    }

    #[test]
    fn wire_round_trip() {
        let p = GlobalPtr::new(0xAAAA, TeamId::from_raw(0xBBBB), -7, 0xCAFEBABEu64);
        let bytes = p.to_bytes();
        assert_eq!(GlobalPtr::from_bytes(bytes), p);
    }

    #[test]
    fn wire_field_order_is_little_endian() {
        let p = GlobalPtr::new(1, TeamId::from_raw(2), 3, 4);
        let bytes = p.to_bytes();
        assert_eq!(&bytes[0..2], &1u16.to_le_bytes());
        assert_eq!(&bytes[2..4], &2u16.to_le_bytes());
        assert_eq!(&bytes[4..6], &3i16.to_le_bytes());
        assert_eq!(&bytes[8..16], &4u64.to_le_bytes());
    }
}
