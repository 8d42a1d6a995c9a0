//! Team registry (§4.C): every unit's membership, rank, and segment table
//! within each process sub-group it has joined.
//!
//! Structured after the teacher repo's `Pipeline`/`PipelineInner` registry --
//! a cheap, cloneable handle (here, [`TeamRegistry`]) wrapping
//! `Arc<Mutex<_>>` shared mutable state, with a monotonic counter minting
//! opaque ids. The all-units team (`TeamId(0)`) is registered once by
//! [`crate::init`] and is never destroyed; every other team is created from
//! a parent by [`TeamRegistry::create_from`] and torn down by
//! [`TeamRegistry::destroy`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::segment::{SegmentRecord, SegmentTable};
use crate::transport::{GroupHandle, Transport, WindowHandle};

/// The permanent team containing every unit in the process's world.
pub const WORLD_TEAM: TeamId = TeamId(0);

/// Opaque identifier for a team, unique for the lifetime of the process.
///
/// Mirrors the teacher's `NodeId`: a thin `Copy`/`Hash` wrapper around a
/// `u64`, minted by the registry rather than constructed by callers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TeamId(u64);

impl TeamId {
    /// The sentinel "no team" value (§4.H): collective/P2P entry points
    /// reject it with `ERR_INVAL` before ever consulting the registry.
    pub const UNDEFINED: TeamId = TeamId(u64::MAX);

    pub(crate) fn new(v: u64) -> Self {
        Self(v)
    }

    /// The raw 16-bit wire value stored in a [`crate::gptr::GlobalPtr`].
    ///
    /// Team ids never exceed `u16::MAX` in practice (`Config::max_team_domains`
    /// bounds how many teams may exist concurrently, far below that), so the
    /// truncation here can't lose information for any team actually minted
    /// by [`TeamRegistry`].
    pub fn raw(&self) -> u16 {
        self.0 as u16
    }

    pub fn from_raw(v: u16) -> Self {
        Self(v as u64)
    }
}

/// One unit's view of a team: its membership, this unit's rank within it,
/// the transport's group/window handles backing it, and its segment table.
pub struct Team {
    pub team_id: TeamId,
    /// Member unit ids, in rank order.
    pub members: Vec<u16>,
    pub my_rank: u16,
    pub group: GroupHandle,
    pub window: WindowHandle,
    pub segments: SegmentTable,
    pub parent: Option<TeamId>,
    /// Per-rank co-location with the caller, queried once at team creation
    /// (§4.C) rather than on every RMA call. `true` at index `r` means
    /// member `r` shares memory with this unit.
    ///
    /// The spec's data model additionally records *which* local rank a
    /// co-located peer occupies within the shared-memory group; this
    /// runtime only ever uses the map to decide whether the RMA engine's
    /// memcpy fast path applies; the local rank itself is resolved by the
    /// transport's `co_located_copy_*` calls, so it is not duplicated here.
    pub shared_mem_map: Vec<bool>,
    /// Bump allocator for this unit's share of the team's window, advanced
    /// by every collective segment allocation (§4.B, §3 "Segment").
    next_local_offset: AtomicU64,
}

impl Team {
    pub fn size(&self) -> u16 {
        self.members.len() as u16
    }

    /// Translate a rank within this team to a global unit id.
    pub fn unit_at_rank(&self, rank: u16) -> Result<u16> {
        self.members
            .get(rank as usize)
            .copied()
            .ok_or_else(|| Error::invalid(format!("rank {rank} out of range for team")))
    }

    fn bump(&self, bytes: u64) -> u64 {
        self.next_local_offset.fetch_add(bytes, Ordering::SeqCst)
    }
}

fn query_shared_mem_map(transport: &dyn Transport, window: WindowHandle, size: u16) -> Vec<bool> {
    (0..size)
        .map(|r| transport.is_co_located(window, r).unwrap_or(false))
        .collect()
}

struct RegistryInner {
    next_id: u64,
    teams: HashMap<TeamId, Arc<Team>>,
}

/// Process-wide, thread-safe team registry.
///
/// Cheaply cloneable: every clone shares the same underlying map, exactly
/// like the teacher's `Pipeline` handle shares its `PipelineInner`.
#[derive(Clone)]
pub struct TeamRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 1,
                teams: HashMap::new(),
            })),
        }
    }

    /// Register the all-units team at a fixed id. Called once by
    /// [`crate::init`]; calling it a second time would silently overwrite
    /// world membership, so it is crate-private.
    pub(crate) fn install_world_team(
        &self,
        members: Vec<u16>,
        my_rank: u16,
        group: GroupHandle,
        window: WindowHandle,
        transport: &dyn Transport,
    ) {
        let shared_mem_map = query_shared_mem_map(transport, window, members.len() as u16);
        let team = Team {
            team_id: WORLD_TEAM,
            members,
            my_rank,
            group,
            window,
            segments: SegmentTable::new(),
            parent: None,
            shared_mem_map,
            next_local_offset: AtomicU64::new(0),
        };
        self.inner
            .lock()
            .unwrap()
            .teams
            .insert(WORLD_TEAM, Arc::new(team));
    }

    /// Create a new team from `members` (a subset of `parent`'s members,
    /// given as ranks within `parent`), collectively creating the
    /// underlying transport group and window.
    pub fn create_from(
        &self,
        parent: TeamId,
        member_ranks: &[u16],
        transport: &dyn Transport,
        bytes_per_unit: u64,
    ) -> Result<TeamId> {
        let parent_team = self.lookup(parent)?;

        let limit = crate::config::Config::current().max_team_domains as usize;
        if self.inner.lock().unwrap().teams.len() >= limit {
            return Err(Error::exhausted(format!(
                "team domain limit reached ({limit} concurrent team(s))"
            )));
        }

        let mut global_members = Vec::with_capacity(member_ranks.len());
        for &rank in member_ranks {
            global_members.push(parent_team.unit_at_rank(rank)?);
        }
        let my_unit = transport.this_unit();
        let my_rank = global_members
            .iter()
            .position(|&u| u == my_unit)
            .ok_or_else(|| Error::invalid("this unit is not a member of the new team"))?
            as u16;

        let group = transport.create_group(&global_members)?;
        let window = transport.win_create(group, bytes_per_unit)?;
        let shared_mem_map = query_shared_mem_map(transport, window, global_members.len() as u16);

        let mut inner = self.inner.lock().unwrap();
        let id = TeamId::new(inner.next_id);
        inner.next_id += 1;
        inner.teams.insert(
            id,
            Arc::new(Team {
                team_id: id,
                members: global_members,
                my_rank,
                group,
                window,
                segments: SegmentTable::new(),
                parent: Some(parent),
                shared_mem_map,
                next_local_offset: AtomicU64::new(0),
            }),
        );
        Ok(id)
    }

    /// Collectively register a new segment of `bytes_per_unit` bytes on
    /// every member of `team_id` (§4.B, §3 "Segment" lifecycle). Every
    /// member must call this for the same `segid`, in the same order
    /// relative to its other collective calls on this team -- exactly like
    /// any other collective (§5 "Ordering guarantees").
    ///
    /// Each member reserves its own share by bumping a local offset into
    /// its portion of the team's window, then the members exchange those
    /// offsets via `allgather` so every member's segment table ends up
    /// with an identical `per_member_disp` array (I2).
    pub fn alloc_segment(
        &self,
        team_id: TeamId,
        transport: &dyn Transport,
        segid: i16,
        bytes_per_unit: u64,
    ) -> Result<()> {
        let team = self.lookup(team_id)?;
        let my_disp = team.bump(bytes_per_unit);

        let mut recv = vec![0u8; 8 * team.members.len()];
        transport.allgather(team.group, &my_disp.to_le_bytes(), &mut recv)?;
        let per_member_disp: Vec<u64> = recv
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        // Only co-located members get a shared-memory base; the RMA engine's
        // memcpy fast path is otherwise unreachable for that rank (§3
        // "Segment", §4.E step 2).
        let per_member_shmem_base = per_member_disp
            .iter()
            .enumerate()
            .map(|(rank, &d)| {
                if team.shared_mem_map.get(rank).copied().unwrap_or(false) {
                    Some(d)
                } else {
                    None
                }
            })
            .collect();

        team.segments.insert(
            segid,
            SegmentRecord::new(bytes_per_unit, per_member_disp, per_member_shmem_base),
        )
    }

    /// Collectively tear down a segment created by [`TeamRegistry::alloc_segment`].
    /// A `barrier` precedes the local removal so no member can still be
    /// mid-RMA against the segment when it is dropped from the table.
    pub fn dealloc_segment(
        &self,
        team_id: TeamId,
        transport: &dyn Transport,
        segid: i16,
    ) -> Result<()> {
        let team = self.lookup(team_id)?;
        transport.barrier(team.group)?;
        team.segments.remove(segid)
    }

    /// Tear down a team, releasing its transport group and window.
    /// Destroying [`WORLD_TEAM`] is a caller error.
    pub fn destroy(&self, team_id: TeamId, transport: &dyn Transport) -> Result<()> {
        if team_id == WORLD_TEAM {
            return Err(Error::invalid("the all-units team cannot be destroyed"));
        }
        let team = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .teams
                .remove(&team_id)
                .ok_or_else(|| Error::not_found(format!("unknown team {}", team_id.0)))?
        };
        transport.win_free(team.window)?;
        transport.free_group(team.group)?;
        Ok(())
    }

    pub fn lookup(&self, team_id: TeamId) -> Result<Arc<Team>> {
        self.inner
            .lock()
            .unwrap()
            .teams
            .get(&team_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unknown team {}", team_id.0)))
    }

    pub fn size(&self, team_id: TeamId) -> Result<u16> {
        Ok(self.lookup(team_id)?.size())
    }

    pub fn my_rank(&self, team_id: TeamId) -> Result<u16> {
        Ok(self.lookup(team_id)?.my_rank)
    }
}

impl Default for TeamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::local::LocalTransport;

    #[test]
    fn world_team_is_never_destroyable() {
        let units = LocalTransport::new_world(1);
        let registry = TeamRegistry::new();
        let group = units[0].create_group(&[0]).unwrap();
        let window = units[0].win_create(group, 0).unwrap();
        registry.install_world_team(vec![0], 0, group, window, &units[0]);
        assert!(registry.destroy(WORLD_TEAM, &units[0]).is_err());
    }

    #[test]
    fn sub_team_create_and_destroy_round_trip() {
        let units = LocalTransport::new_world(2);
        std::thread::scope(|scope| {
            for unit in units {
                scope.spawn(move || {
                    let registry = TeamRegistry::new();
                    let group = unit.create_group(&[0, 1]).unwrap();
                    let window = unit.win_create(group, 0).unwrap();
                    registry.install_world_team(vec![0, 1], unit.this_unit(), group, window, &unit);

                    let sub = registry
                        .create_from(WORLD_TEAM, &[0, 1], &unit, 16)
                        .unwrap();
                    assert_eq!(registry.size(sub).unwrap(), 2);
                    registry.destroy(sub, &unit).unwrap();
                    assert!(registry.lookup(sub).is_err());
                });
            }
        });
    }
}
