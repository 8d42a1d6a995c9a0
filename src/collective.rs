//! Collective and point-to-point operations (§4.H).
//!
//! Collectives are scoped to a team: `root` (where applicable) is a team
//! rank, translated to the transport's global unit id before the call.
//! `allreduce`/`reduce` are not chunked by design -- composing a reduction
//! operator across chunks would need extra buffers the spec chooses not to
//! introduce -- so both reject `nelem > chunk_size()` outright.
//! Point-to-point `send`/`recv`/`sendrecv` address units directly and need
//! no team lookup.

use crate::error::{Error, Result};
use crate::team::{TeamId, TeamRegistry};
use crate::transport::{ReduceOp, Transport};
use crate::types::{chunk_size, ChunkPlan, DType};

fn root_unit(team: &crate::team::Team, root: u16) -> Result<u16> {
    team.unit_at_rank(root)
}

fn check_team_id(team_id: TeamId) -> Result<()> {
    if team_id == TeamId::UNDEFINED {
        return Err(Error::invalid("teamid is UNDEFINED"));
    }
    Ok(())
}

fn check_buffer_len(buf_len: usize, nelem: u64, dtype: DType) -> Result<()> {
    let expected = nelem as usize * dtype.size();
    if buf_len != expected {
        return Err(Error::invalid(format!(
            "buffer length {buf_len} does not match nelem*dtype size {expected}"
        )));
    }
    Ok(())
}

pub fn barrier(transport: &dyn Transport, registry: &TeamRegistry, team_id: TeamId) -> Result<()> {
    check_team_id(team_id)?;
    let team = registry.lookup(team_id)?;
    log::debug!("barrier: team {:?}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Barrier);
    transport.barrier(team.group)
}

/// Broadcasts `nelem` `dtype`-typed elements from `root` to every member of
/// `team_id`, chunked the same way `rma::get`/`put` chunk (§4.H).
pub fn bcast(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    team_id: TeamId,
    root: u16,
    buf: &mut [u8],
    nelem: u64,
    dtype: DType,
) -> Result<()> {
    check_team_id(team_id)?;
    check_buffer_len(buf.len(), nelem, dtype)?;
    let team = registry.lookup(team_id)?;
    let root_unit = root_unit(&team, root)?;
    log::debug!("bcast: team {:?}, root rank {root}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Bcast);

    let elem_size = dtype.size();
    let plan = ChunkPlan::for_count(nelem);
    log::trace!("bcast: {} transport call(s)", plan.num_calls());
    for (off_elems, count_elems) in plan.calls() {
        let off_bytes = off_elems as usize * elem_size;
        let count_bytes = count_elems as usize * elem_size;
        transport
            .bcast(team.group, root_unit, &mut buf[off_bytes..off_bytes + count_bytes])
            .map_err(|e| {
                log::error!("bcast chunk failed: {e}");
                e
            })?;
    }
    Ok(())
}

/// Splits `send` (valid on `root` only, `group_size * nelem` elements) into
/// equal `nelem`-element shares, one per member, chunked the same way
/// `rma::get`/`put` chunk (§4.H).
pub fn scatter(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    team_id: TeamId,
    root: u16,
    send: &[u8],
    recv: &mut [u8],
    nelem: u64,
    dtype: DType,
) -> Result<()> {
    check_team_id(team_id)?;
    check_buffer_len(recv.len(), nelem, dtype)?;
    let team = registry.lookup(team_id)?;
    let root_unit = root_unit(&team, root)?;
    let is_root = transport.this_unit() == root_unit;
    let group_size = team.size() as usize;
    if is_root {
        check_buffer_len(send.len(), nelem * group_size as u64, dtype)?;
    }
    log::debug!("scatter: team {:?}, root rank {root}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Scatter);

    let elem_size = dtype.size();
    let full_share_bytes = nelem as usize * elem_size;
    let plan = ChunkPlan::for_count(nelem);
    log::trace!("scatter: {} transport call(s)", plan.num_calls());
    for (off_elems, count_elems) in plan.calls() {
        let off_bytes = off_elems as usize * elem_size;
        let count_bytes = count_elems as usize * elem_size;
        let chunk_send = if is_root {
            let mut tmp = vec![0u8; group_size * count_bytes];
            for r in 0..group_size {
                let src_start = r * full_share_bytes + off_bytes;
                tmp[r * count_bytes..(r + 1) * count_bytes]
                    .copy_from_slice(&send[src_start..src_start + count_bytes]);
            }
            tmp
        } else {
            Vec::new()
        };
        transport
            .scatter(team.group, root_unit, &chunk_send, &mut recv[off_bytes..off_bytes + count_bytes])
            .map_err(|e| {
                log::error!("scatter chunk failed: {e}");
                e
            })?;
    }
    Ok(())
}

/// Collects `nelem`-element shares from every member into `recv` (valid on
/// `root` only, `group_size * nelem` elements), chunked the same way
/// `rma::get`/`put` chunk (§4.H).
pub fn gather(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    team_id: TeamId,
    root: u16,
    send: &[u8],
    recv: &mut [u8],
    nelem: u64,
    dtype: DType,
) -> Result<()> {
    check_team_id(team_id)?;
    check_buffer_len(send.len(), nelem, dtype)?;
    let team = registry.lookup(team_id)?;
    let root_unit = root_unit(&team, root)?;
    let is_root = transport.this_unit() == root_unit;
    let group_size = team.size() as usize;
    if is_root {
        check_buffer_len(recv.len(), nelem * group_size as u64, dtype)?;
    }
    log::debug!("gather: team {:?}, root rank {root}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Gather);

    let elem_size = dtype.size();
    let full_share_bytes = nelem as usize * elem_size;
    let plan = ChunkPlan::for_count(nelem);
    log::trace!("gather: {} transport call(s)", plan.num_calls());
    for (off_elems, count_elems) in plan.calls() {
        let off_bytes = off_elems as usize * elem_size;
        let count_bytes = count_elems as usize * elem_size;
        let mut chunk_recv = if is_root { vec![0u8; group_size * count_bytes] } else { Vec::new() };
        transport
            .gather(team.group, root_unit, &send[off_bytes..off_bytes + count_bytes], &mut chunk_recv)
            .map_err(|e| {
                log::error!("gather chunk failed: {e}");
                e
            })?;
        if is_root {
            for r in 0..group_size {
                let dst_start = r * full_share_bytes + off_bytes;
                recv[dst_start..dst_start + count_bytes]
                    .copy_from_slice(&chunk_recv[r * count_bytes..(r + 1) * count_bytes]);
            }
        }
    }
    Ok(())
}

/// Every member contributes `nelem` elements; every member receives the
/// full `group_size * nelem`-element concatenation in `recv`, chunked the
/// same way `rma::get`/`put` chunk (§4.H).
pub fn allgather(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    team_id: TeamId,
    send: &[u8],
    recv: &mut [u8],
    nelem: u64,
    dtype: DType,
) -> Result<()> {
    check_team_id(team_id)?;
    check_buffer_len(send.len(), nelem, dtype)?;
    let team = registry.lookup(team_id)?;
    let group_size = team.size() as usize;
    check_buffer_len(recv.len(), nelem * group_size as u64, dtype)?;
    log::debug!("allgather: team {:?}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Allgather);

    let elem_size = dtype.size();
    let full_share_bytes = nelem as usize * elem_size;
    let plan = ChunkPlan::for_count(nelem);
    log::trace!("allgather: {} transport call(s)", plan.num_calls());
    for (off_elems, count_elems) in plan.calls() {
        let off_bytes = off_elems as usize * elem_size;
        let count_bytes = count_elems as usize * elem_size;
        let mut chunk_recv = vec![0u8; group_size * count_bytes];
        transport
            .allgather(team.group, &send[off_bytes..off_bytes + count_bytes], &mut chunk_recv)
            .map_err(|e| {
                log::error!("allgather chunk failed: {e}");
                e
            })?;
        for r in 0..group_size {
            let dst_start = r * full_share_bytes + off_bytes;
            recv[dst_start..dst_start + count_bytes]
                .copy_from_slice(&chunk_recv[r * count_bytes..(r + 1) * count_bytes]);
        }
    }
    Ok(())
}

/// Variable-sized gather: `counts[i]`/`displs[i]` are `dtype`-element counts
/// and displacements into `recv` for member `i`, each individually bounded
/// by [`crate::types::MAX_CONTIG_ELEMENTS`] rather than chunked (§4.H) --
/// composing a chunked loop per unequal-sized peer share would need the
/// same extra buffering `reduce`/`allreduce` opt out of. Scaled to the
/// transport's byte-based wire format before the call.
pub fn allgatherv(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    team_id: TeamId,
    send: &[u8],
    recv: &mut [u8],
    counts: &[u64],
    displs: &[u64],
    dtype: DType,
) -> Result<()> {
    check_team_id(team_id)?;
    let team = registry.lookup(team_id)?;
    for (&c, &d) in counts.iter().zip(displs.iter()) {
        if c > crate::types::MAX_CONTIG_ELEMENTS || d > crate::types::MAX_CONTIG_ELEMENTS {
            return Err(Error::invalid(
                "allgatherv count/displacement exceeds the per-peer limit",
            ));
        }
    }
    log::debug!("allgatherv: team {:?}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Allgatherv);

    let elem_size = dtype.size() as u64;
    let byte_counts: Vec<u64> = counts.iter().map(|&c| c * elem_size).collect();
    let byte_displs: Vec<u64> = displs.iter().map(|&d| d * elem_size).collect();
    transport.allgatherv(team.group, send, recv, &byte_counts, &byte_displs)
}

pub fn reduce(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    team_id: TeamId,
    root: u16,
    send: &[u8],
    recv: &mut [u8],
    dtype: DType,
    op: ReduceOp,
    nelem: u64,
) -> Result<()> {
    check_team_id(team_id)?;
    if nelem > chunk_size() {
        return Err(Error::invalid("reduce does not chunk; nelem exceeds the transport limit"));
    }
    let team = registry.lookup(team_id)?;
    let root_unit = root_unit(&team, root)?;
    log::debug!("reduce: team {:?}, root rank {root}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Reduce);
    transport.reduce(team.group, root_unit, send, recv, dtype, op)
}

pub fn allreduce(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    team_id: TeamId,
    send: &[u8],
    recv: &mut [u8],
    dtype: DType,
    op: ReduceOp,
    nelem: u64,
) -> Result<()> {
    check_team_id(team_id)?;
    if nelem > chunk_size() {
        return Err(Error::invalid(
            "allreduce does not chunk; nelem exceeds the transport limit",
        ));
    }
    let team = registry.lookup(team_id)?;
    log::debug!("allreduce: team {:?}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(team.team_id, crate::metrics::CollectiveOp::Allreduce);
    transport.allreduce(team.group, send, recv, dtype, op)
}

/// Point-to-point send on the ALL team's sub-communicator (§4.H); `tag` is
/// an opaque value passed through to the transport unmodified. Chunked the
/// same way `rma::get`/`put` chunk.
pub fn send(transport: &dyn Transport, dest: u16, tag: i32, buf: &[u8], nelem: u64, dtype: DType) -> Result<()> {
    check_buffer_len(buf.len(), nelem, dtype)?;
    log::trace!("send: dest {dest}, tag {tag}, {} bytes", buf.len());
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(crate::team::WORLD_TEAM, crate::metrics::CollectiveOp::Send);

    let elem_size = dtype.size();
    let plan = ChunkPlan::for_count(nelem);
    for (off_elems, count_elems) in plan.calls() {
        let off_bytes = off_elems as usize * elem_size;
        let count_bytes = count_elems as usize * elem_size;
        transport.send(dest, tag, &buf[off_bytes..off_bytes + count_bytes]).map_err(|e| {
            log::error!("send chunk to {dest} failed: {e}");
            e
        })?;
    }
    Ok(())
}

/// Chunked the same way `rma::get`/`put` chunk (§4.H).
pub fn recv(transport: &dyn Transport, src: u16, tag: i32, buf: &mut [u8], nelem: u64, dtype: DType) -> Result<()> {
    check_buffer_len(buf.len(), nelem, dtype)?;
    log::trace!("recv: src {src}, tag {tag}, {} bytes", buf.len());
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(crate::team::WORLD_TEAM, crate::metrics::CollectiveOp::Recv);

    let elem_size = dtype.size();
    let plan = ChunkPlan::for_count(nelem);
    for (off_elems, count_elems) in plan.calls() {
        let off_bytes = off_elems as usize * elem_size;
        let count_bytes = count_elems as usize * elem_size;
        transport.recv(src, tag, &mut buf[off_bytes..off_bytes + count_bytes]).map_err(|e| {
            log::error!("recv chunk from {src} failed: {e}");
            e
        })?;
    }
    Ok(())
}

/// Combined send+receive, deadlock-safe against a symmetric peer (§4.H).
/// `send_buf` and `recv_buf` share the same `(nelem, dtype)` -- this
/// runtime has no asymmetric-count sendrecv. Chunked the same way
/// `rma::get`/`put` chunk.
pub fn sendrecv(
    transport: &dyn Transport,
    dest: u16,
    send_buf: &[u8],
    src: u16,
    recv_buf: &mut [u8],
    tag: i32,
    nelem: u64,
    dtype: DType,
) -> Result<()> {
    check_buffer_len(send_buf.len(), nelem, dtype)?;
    check_buffer_len(recv_buf.len(), nelem, dtype)?;
    log::trace!("sendrecv: dest {dest}, src {src}, tag {tag}");
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_collective(crate::team::WORLD_TEAM, crate::metrics::CollectiveOp::Sendrecv);

    let elem_size = dtype.size();
    let plan = ChunkPlan::for_count(nelem);
    for (off_elems, count_elems) in plan.calls() {
        let off_bytes = off_elems as usize * elem_size;
        let count_bytes = count_elems as usize * elem_size;
        transport
            .sendrecv(
                dest,
                &send_buf[off_bytes..off_bytes + count_bytes],
                src,
                &mut recv_buf[off_bytes..off_bytes + count_bytes],
                tag,
            )
            .map_err(|e| {
                log::error!("sendrecv chunk with dest {dest}/src {src} failed: {e}");
                e
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::WORLD_TEAM;
    use crate::transport::local::LocalTransport;

    #[test]
    fn allgatherv_matches_the_scripted_scenario() {
        let units = LocalTransport::new_world(4);
        std::thread::scope(|scope| {
            for (rank, unit) in units.into_iter().enumerate() {
                scope.spawn(move || {
                    let registry = TeamRegistry::new();
                    let group = unit.create_group(&[0, 1, 2, 3]).unwrap();
                    let window = unit.win_create(group, 0).unwrap();
                    registry.install_world_team(vec![0, 1, 2, 3], rank as u16, group, window, &unit);

                    let send: Vec<u32> = (0..=rank as u32).map(|i| rank as u32 * 10 + i).collect();
                    let send_bytes: Vec<u8> = send.iter().flat_map(|v| v.to_le_bytes()).collect();
                    let counts = [1u64, 2, 3, 4];
                    let displs = [0u64, 1, 3, 6];
                    let mut recv = vec![0u8; 10 * 4];
                    allgatherv(
                        &unit,
                        &registry,
                        WORLD_TEAM,
                        &send_bytes,
                        &mut recv,
                        &counts,
                        &displs,
                        DType::U32,
                    )
                    .unwrap();
                    let got: Vec<u32> = recv
                        .chunks_exact(4)
                        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                        .collect();
                    assert_eq!(
                        got,
                        vec![0, 10, 11, 20, 21, 22, 30, 31, 32, 33]
                    );
                });
            }
        });
    }

    #[test]
    fn allreduce_rejects_counts_above_the_chunk_limit() {
        let units = LocalTransport::new_world(1);
        let registry = TeamRegistry::new();
        let group = units[0].create_group(&[0]).unwrap();
        let window = units[0].win_create(group, 0).unwrap();
        registry.install_world_team(vec![0], 0, group, window, &units[0]);

        let send = 1u32.to_le_bytes();
        let mut recv = [0u8; 4];
        let err = allreduce(
            &units[0],
            &registry,
            WORLD_TEAM,
            &send,
            &mut recv,
            DType::U32,
            ReduceOp::Sum,
            crate::types::MAX_CONTIG_ELEMENTS + 1,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn barrier_on_the_undefined_team_is_rejected() {
        let units = LocalTransport::new_world(1);
        let registry = TeamRegistry::new();
        let err = barrier(&units[0], &registry, TeamId::UNDEFINED).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }
}
