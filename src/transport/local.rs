//! `LocalTransport`: an in-process, multi-threaded implementation of
//! [`Transport`] used by tests, doctests, and the `demos/` programs.
//!
//! Units are simulated by real OS threads sharing one [`World`]. Windows are
//! `Arc`-shared byte buffers, one per member per window; groups are
//! deduplicated by member list so that every simulated unit calling
//! `create_group`/`win_create` with the same logical arguments converges on
//! the same handle, mirroring how a real transport's sub-communicator and
//! window creation are collective operations. Collectives are implemented
//! with a generic two-phase rendezvous ([`World::exchange`]) built on
//! [`std::sync::Barrier`] plus a shared staging area, rather than on the
//! underlying OS's real network stack -- appropriate for a same-process
//! stand-in, not for a production transport binding.
//!
//! Because everything here executes synchronously inside the call that
//! issues it, the non-blocking `r*` operations complete before they return;
//! `wait`/`test` on their request ids are therefore always immediately
//! satisfied. This is a faithful *black-box* implementation of the
//! [`Transport`] contract (callers cannot observe the difference), just not
//! a realistic model of network latency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Barrier, Mutex};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{combine_elem, DType};

use super::{GroupHandle, ReduceOp, ReqId, Transport, WindowHandle};

struct GroupState {
    members: Vec<u16>,
    barrier: Barrier,
    staging: Mutex<Vec<Vec<u8>>>,
}

struct WindowState {
    group: GroupHandle,
    bytes_per_unit: u64,
    buffers: Vec<Mutex<Vec<u8>>>,
}

struct World {
    num_units: u16,
    shared_mem_group_of: HashMap<u16, u16>,
    groups_by_members: Mutex<HashMap<Vec<u16>, GroupHandle>>,
    groups: Mutex<HashMap<u64, Arc<GroupState>>>,
    next_group_id: AtomicU64,
    windows: Mutex<HashMap<u64, Arc<WindowState>>>,
    next_window_id: AtomicU64,
    next_req_id: AtomicU64,
    mailbox: Mutex<HashMap<(u16, u16, i32), std::collections::VecDeque<Vec<u8>>>>,
    mailbox_cv: std::sync::Condvar,
}

impl World {
    fn group_state(&self, group: GroupHandle) -> Result<Arc<GroupState>> {
        self.groups
            .lock()
            .unwrap()
            .get(&group.0)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("unknown group {}", group.0)))
    }

    fn window_state(&self, win: WindowHandle) -> Result<Arc<WindowState>> {
        self.windows
            .lock()
            .unwrap()
            .get(&win.0)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("unknown window {}", win.0)))
    }

    /// Two-phase rendezvous: every member of `gs` posts `payload` at its
    /// rank, all members observe the full set of payloads, then all
    /// members synchronize again before the staging area is reused by the
    /// next collective call on this group.
    fn exchange(&self, gs: &GroupState, rank: usize, payload: Vec<u8>) -> Vec<Vec<u8>> {
        {
            let mut staging = gs.staging.lock().unwrap();
            staging[rank] = payload;
        }
        gs.barrier.wait();
        let snapshot = gs.staging.lock().unwrap().clone();
        gs.barrier.wait();
        snapshot
    }
}

/// A handle bound to one simulated unit within a [`World`] shared by every
/// other unit in the same process.
pub struct LocalTransport {
    world: Arc<World>,
    unit: u16,
}

impl LocalTransport {
    /// Build `num_units` transports, one per simulated unit, with no two
    /// units considered co-located.
    pub fn new_world(num_units: u16) -> Vec<LocalTransport> {
        Self::new_world_with_colocation(num_units, (0..num_units).map(|u| vec![u]).collect())
    }

    /// Build `num_units` transports, partitioning them into shared-memory
    /// groups per `colocation_groups` (each inner `Vec<u16>` lists the unit
    /// ids that should report as mutually co-located).
    pub fn new_world_with_colocation(
        num_units: u16,
        colocation_groups: Vec<Vec<u16>>,
    ) -> Vec<LocalTransport> {
        let mut shared_mem_group_of = HashMap::new();
        for (gid, members) in colocation_groups.into_iter().enumerate() {
            for unit in members {
                shared_mem_group_of.insert(unit, gid as u16);
            }
        }
        let world = Arc::new(World {
            num_units,
            shared_mem_group_of,
            groups_by_members: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            next_group_id: AtomicU64::new(1),
            windows: Mutex::new(HashMap::new()),
            next_window_id: AtomicU64::new(1),
            next_req_id: AtomicU64::new(1),
            mailbox: Mutex::new(HashMap::new()),
            mailbox_cv: std::sync::Condvar::new(),
        });
        (0..num_units)
            .map(|unit| LocalTransport {
                world: Arc::clone(&world),
                unit,
            })
            .collect()
    }

    fn rank_in(&self, gs: &GroupState) -> Result<usize> {
        gs.members
            .iter()
            .position(|&u| u == self.unit)
            .ok_or_else(|| Error::invalid("this unit is not a member of the group"))
    }
}

impl Transport for LocalTransport {
    fn num_units(&self) -> u16 {
        self.world.num_units
    }

    fn this_unit(&self) -> u16 {
        self.unit
    }

    fn create_group(&self, members: &[u16]) -> Result<GroupHandle> {
        let key = members.to_vec();
        let mut by_members = self.world.groups_by_members.lock().unwrap();
        if let Some(handle) = by_members.get(&key) {
            return Ok(*handle);
        }
        let id = self.world.next_group_id.fetch_add(1, Ordering::Relaxed);
        let handle = GroupHandle(id);
        let state = Arc::new(GroupState {
            members: key.clone(),
            barrier: Barrier::new(key.len()),
            staging: Mutex::new(vec![Vec::new(); key.len()]),
        });
        self.world.groups.lock().unwrap().insert(id, state);
        by_members.insert(key, handle);
        Ok(handle)
    }

    fn free_group(&self, group: GroupHandle) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        gs.barrier.wait();
        if rank == 0 {
            self.world.groups.lock().unwrap().remove(&group.0);
            self.world
                .groups_by_members
                .lock()
                .unwrap()
                .retain(|_, h| *h != group);
        }
        gs.barrier.wait();
        Ok(())
    }

    fn win_create(&self, group: GroupHandle, bytes_per_unit: u64) -> Result<WindowHandle> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        let payload = if rank == 0 {
            let id = self.world.next_window_id.fetch_add(1, Ordering::Relaxed);
            let buffers = (0..gs.members.len())
                .map(|_| Mutex::new(vec![0u8; bytes_per_unit as usize]))
                .collect();
            self.world.windows.lock().unwrap().insert(
                id,
                Arc::new(WindowState {
                    group,
                    bytes_per_unit,
                    buffers,
                }),
            );
            id.to_le_bytes().to_vec()
        } else {
            Vec::new()
        };
        let snapshot = self.world.exchange(&gs, rank, payload);
        let id = u64::from_le_bytes(snapshot[0].clone().try_into().unwrap());
        Ok(WindowHandle(id))
    }

    fn win_free(&self, win: WindowHandle) -> Result<()> {
        let ws = self.world.window_state(win)?;
        let gs = self.world.group_state(ws.group)?;
        let rank = self.rank_in(&gs)?;
        gs.barrier.wait();
        if rank == 0 {
            self.world.windows.lock().unwrap().remove(&win.0);
        }
        gs.barrier.wait();
        Ok(())
    }

    fn is_co_located(&self, win: WindowHandle, rank: u16) -> Result<bool> {
        let ws = self.world.window_state(win)?;
        let gs = self.world.group_state(ws.group)?;
        let peer_unit = *gs
            .members
            .get(rank as usize)
            .ok_or_else(|| Error::invalid("rank out of range for window's group"))?;
        let mine = self.world.shared_mem_group_of.get(&self.unit);
        let theirs = self.world.shared_mem_group_of.get(&peer_unit);
        Ok(mine.is_some() && mine == theirs)
    }

    fn co_located_copy_out(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        self.get(win, rank, byte_offset, buf)
    }

    fn co_located_copy_in(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        buf: &[u8],
    ) -> Result<()> {
        self.put(win, rank, byte_offset, buf)
    }

    fn get(&self, win: WindowHandle, rank: u16, byte_offset: u64, buf: &mut [u8]) -> Result<()> {
        let ws = self.world.window_state(win)?;
        let slot = ws
            .buffers
            .get(rank as usize)
            .ok_or_else(|| Error::invalid("rank out of range for window's group"))?;
        let guard = slot.lock().unwrap();
        let start = byte_offset as usize;
        let end = start + buf.len();
        if end > guard.len() {
            return Err(Error::invalid("get out of window bounds"));
        }
        buf.copy_from_slice(&guard[start..end]);
        Ok(())
    }

    fn put(&self, win: WindowHandle, rank: u16, byte_offset: u64, buf: &[u8]) -> Result<()> {
        let ws = self.world.window_state(win)?;
        let slot = ws
            .buffers
            .get(rank as usize)
            .ok_or_else(|| Error::invalid("rank out of range for window's group"))?;
        let mut guard = slot.lock().unwrap();
        let start = byte_offset as usize;
        let end = start + buf.len();
        if end > guard.len() {
            return Err(Error::invalid("put out of window bounds"));
        }
        guard[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn rget(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        buf: &mut [u8],
    ) -> Result<ReqId> {
        self.get(win, rank, byte_offset, buf)?;
        Ok(ReqId(self.world.next_req_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn rput(&self, win: WindowHandle, rank: u16, byte_offset: u64, buf: &[u8]) -> Result<ReqId> {
        self.put(win, rank, byte_offset, buf)?;
        Ok(ReqId(self.world.next_req_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn accumulate(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        buf: &[u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        let ws = self.world.window_state(win)?;
        let slot = ws
            .buffers
            .get(rank as usize)
            .ok_or_else(|| Error::invalid("rank out of range for window's group"))?;
        let mut guard = slot.lock().unwrap();
        let start = byte_offset as usize;
        let end = start + buf.len();
        if end > guard.len() {
            return Err(Error::invalid("accumulate out of window bounds"));
        }
        let combined = combine_elem(dtype, op, &guard[start..end], buf);
        guard[start..end].copy_from_slice(&combined);
        Ok(())
    }

    fn fetch_and_op(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        value: &[u8],
        result: &mut [u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        let ws = self.world.window_state(win)?;
        let slot = ws
            .buffers
            .get(rank as usize)
            .ok_or_else(|| Error::invalid("rank out of range for window's group"))?;
        let mut guard = slot.lock().unwrap();
        let start = byte_offset as usize;
        let end = start + value.len();
        if end > guard.len() {
            return Err(Error::invalid("fetch_and_op out of window bounds"));
        }
        result.copy_from_slice(&guard[start..end]);
        let combined = combine_elem(dtype, op, &guard[start..end], value);
        guard[start..end].copy_from_slice(&combined);
        Ok(())
    }

    fn compare_and_swap(
        &self,
        win: WindowHandle,
        rank: u16,
        byte_offset: u64,
        new: &[u8],
        expected: &[u8],
        result: &mut [u8],
        _dtype: DType,
    ) -> Result<()> {
        let ws = self.world.window_state(win)?;
        let slot = ws
            .buffers
            .get(rank as usize)
            .ok_or_else(|| Error::invalid("rank out of range for window's group"))?;
        let mut guard = slot.lock().unwrap();
        let start = byte_offset as usize;
        let end = start + new.len();
        if end > guard.len() {
            return Err(Error::invalid("compare_and_swap out of window bounds"));
        }
        result.copy_from_slice(&guard[start..end]);
        if &guard[start..end] == expected {
            guard[start..end].copy_from_slice(new);
        }
        Ok(())
    }

    fn win_flush(&self, win: WindowHandle, rank: u16) -> Result<()> {
        self.world.window_state(win).map(|_| ())?;
        let _ = rank;
        Ok(())
    }

    fn win_flush_all(&self, win: WindowHandle) -> Result<()> {
        self.world.window_state(win).map(|_| ())
    }

    fn win_flush_local(&self, win: WindowHandle, rank: u16) -> Result<()> {
        self.win_flush(win, rank)
    }

    fn win_flush_local_all(&self, win: WindowHandle) -> Result<()> {
        self.win_flush_all(win)
    }

    fn iprobe(&self) {}

    fn wait(&self, _req: ReqId) -> Result<()> {
        Ok(())
    }

    fn waitall(&self, _reqs: &[ReqId]) -> Result<()> {
        Ok(())
    }

    fn test(&self, _req: ReqId) -> Result<bool> {
        Ok(true)
    }

    fn testall(&self, _reqs: &[ReqId]) -> Result<bool> {
        Ok(true)
    }

    fn barrier(&self, group: GroupHandle) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        self.world.exchange(&gs, rank, Vec::new());
        Ok(())
    }

    fn bcast(&self, group: GroupHandle, root: u16, buf: &mut [u8]) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        let root_rank = gs
            .members
            .iter()
            .position(|&u| u == root)
            .ok_or_else(|| Error::invalid("bcast root not in group"))?;
        let payload = if rank == root_rank { buf.to_vec() } else { Vec::new() };
        let snapshot = self.world.exchange(&gs, rank, payload);
        buf.copy_from_slice(&snapshot[root_rank]);
        Ok(())
    }

    fn scatter(&self, group: GroupHandle, root: u16, send: &[u8], recv: &mut [u8]) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        let root_rank = gs
            .members
            .iter()
            .position(|&u| u == root)
            .ok_or_else(|| Error::invalid("scatter root not in group"))?;
        let payload = if rank == root_rank { send.to_vec() } else { Vec::new() };
        let snapshot = self.world.exchange(&gs, rank, payload);
        let whole = &snapshot[root_rank];
        let share = recv.len();
        let start = rank * share;
        if start + share > whole.len() {
            return Err(Error::invalid("scatter share out of range"));
        }
        recv.copy_from_slice(&whole[start..start + share]);
        Ok(())
    }

    fn gather(&self, group: GroupHandle, root: u16, send: &[u8], recv: &mut [u8]) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        let root_rank = gs
            .members
            .iter()
            .position(|&u| u == root)
            .ok_or_else(|| Error::invalid("gather root not in group"))?;
        let snapshot = self.world.exchange(&gs, rank, send.to_vec());
        if rank == root_rank {
            let share = send.len();
            for (i, part) in snapshot.iter().enumerate() {
                recv[i * share..(i + 1) * share].copy_from_slice(part);
            }
        }
        Ok(())
    }

    fn allgather(&self, group: GroupHandle, send: &[u8], recv: &mut [u8]) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        let snapshot = self.world.exchange(&gs, rank, send.to_vec());
        let share = send.len();
        for (i, part) in snapshot.iter().enumerate() {
            recv[i * share..(i + 1) * share].copy_from_slice(part);
        }
        Ok(())
    }

    fn allgatherv(
        &self,
        group: GroupHandle,
        send: &[u8],
        recv: &mut [u8],
        counts: &[u64],
        displs: &[u64],
    ) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        for &c in counts {
            if c > crate::types::MAX_CONTIG_ELEMENTS {
                return Err(Error::invalid("allgatherv count exceeds per-peer limit"));
            }
        }
        let snapshot = self.world.exchange(&gs, rank, send.to_vec());
        for (i, part) in snapshot.iter().enumerate() {
            let off = displs[i] as usize;
            let len = counts[i] as usize;
            recv[off..off + len].copy_from_slice(&part[..len]);
        }
        Ok(())
    }

    fn reduce(
        &self,
        group: GroupHandle,
        root: u16,
        send: &[u8],
        recv: &mut [u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        let root_rank = gs
            .members
            .iter()
            .position(|&u| u == root)
            .ok_or_else(|| Error::invalid("reduce root not in group"))?;
        let snapshot = self.world.exchange(&gs, rank, send.to_vec());
        if rank == root_rank {
            let combined = fold_all(dtype, op, &snapshot);
            recv.copy_from_slice(&combined);
        }
        Ok(())
    }

    fn allreduce(
        &self,
        group: GroupHandle,
        send: &[u8],
        recv: &mut [u8],
        dtype: DType,
        op: ReduceOp,
    ) -> Result<()> {
        let gs = self.world.group_state(group)?;
        let rank = self.rank_in(&gs)?;
        let snapshot = self.world.exchange(&gs, rank, send.to_vec());
        let combined = fold_all(dtype, op, &snapshot);
        recv.copy_from_slice(&combined);
        Ok(())
    }

    fn send(&self, dest: u16, tag: i32, buf: &[u8]) -> Result<()> {
        let key = (dest, self.unit, tag);
        let mut mailbox = self.world.mailbox.lock().unwrap();
        mailbox.entry(key).or_default().push_back(buf.to_vec());
        self.world.mailbox_cv.notify_all();
        Ok(())
    }

    fn recv(&self, src: u16, tag: i32, buf: &mut [u8]) -> Result<()> {
        let key = (self.unit, src, tag);
        let mut mailbox = self.world.mailbox.lock().unwrap();
        loop {
            if let Some(queue) = mailbox.get_mut(&key) {
                if let Some(msg) = queue.pop_front() {
                    if msg.len() != buf.len() {
                        return Err(Error::invalid("recv message length mismatch"));
                    }
                    buf.copy_from_slice(&msg);
                    return Ok(());
                }
            }
            mailbox = self.world.mailbox_cv.wait(mailbox).unwrap();
        }
    }

    fn sendrecv(
        &self,
        dest: u16,
        send_buf: &[u8],
        src: u16,
        recv_buf: &mut [u8],
        tag: i32,
    ) -> Result<()> {
        self.send(dest, tag, send_buf)?;
        self.recv(src, tag, recv_buf)
    }
}

fn fold_all(dtype: DType, op: ReduceOp, arrays: &[Vec<u8>]) -> Vec<u8> {
    let mut acc = arrays[0].clone();
    for arr in &arrays[1..] {
        acc = combine_elem(dtype, op, &acc, arr);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `create_group`/`win_create` are collective: every member must call
    /// them for the rendezvous barrier to release, so tests run one thread
    /// per simulated unit.
    #[test]
    fn two_unit_put_get_round_trip() {
        let units = LocalTransport::new_world(2);
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for unit in units {
                handles.push(scope.spawn(move || {
                    let group = unit.create_group(&[0, 1]).unwrap();
                    let win = unit.win_create(group, 64).unwrap();
                    if unit.this_unit() == 0 {
                        unit.put(win, 1, 0, &[1, 2, 3, 4]).unwrap();
                    }
                    unit.barrier(group).unwrap();
                    if unit.this_unit() == 0 {
                        let mut out = [0u8; 4];
                        unit.get(win, 1, 0, &mut out).unwrap();
                        assert_eq!(out, [1, 2, 3, 4]);
                    }
                }));
            }
            for h in handles {
                h.join().unwrap();
            }
        });
    }

    #[test]
    fn send_recv_round_trip() {
        let units = LocalTransport::new_world(2);
        std::thread::scope(|scope| {
            let h = scope.spawn({
                let unit0 = &units[0];
                move || unit0.send(1, 7, b"hello").unwrap()
            });
            let mut buf = [0u8; 5];
            units[1].recv(0, 7, &mut buf).unwrap();
            h.join().unwrap();
            assert_eq!(&buf, b"hello");
        });
    }

    #[test]
    fn allreduce_sums_across_units() {
        let units = LocalTransport::new_world(3);
        std::thread::scope(|scope| {
            for (i, unit) in units.into_iter().enumerate() {
                scope.spawn(move || {
                    let group = unit.create_group(&[0, 1, 2]).unwrap();
                    let send = ((i + 1) as u32).to_le_bytes();
                    let mut recv = [0u8; 4];
                    unit.allreduce(group, &send, &mut recv, DType::U32, ReduceOp::Sum)
                        .unwrap();
                    assert_eq!(u32::from_le_bytes(recv), 6);
                });
            }
        });
    }

    #[test]
    fn colocation_reports_configured_groups() {
        let units = LocalTransport::new_world_with_colocation(2, vec![vec![0, 1]]);
        std::thread::scope(|scope| {
            for unit in units {
                scope.spawn(move || {
                    let group = unit.create_group(&[0, 1]).unwrap();
                    let win = unit.win_create(group, 8).unwrap();
                    assert!(unit.is_co_located(win, 1 - unit.this_unit()).unwrap());
                });
            }
        });
    }
}
