//! Synchronization operations (§4.G): the `flush` family.
//!
//! `flush`/`flush_all` force remote completion (and a window sync) at one
//! or every peer on the window implied by a pointer's team; the `_local`
//! variants only guarantee the local source buffer is reusable, making no
//! remote-visibility promise.

use crate::error::Result;
use crate::gptr::GlobalPtr;
use crate::team::TeamRegistry;
use crate::transport::Transport;

/// Force remote completion of prior writes at `gptr.unit_id()`, then a
/// window sync, then an `Iprobe` to poke transport progress.
pub fn flush(transport: &dyn Transport, registry: &TeamRegistry, gptr: GlobalPtr) -> Result<()> {
    let team = registry.lookup(gptr.team_id())?;
    let rank = gptr.unit_id();
    log::trace!("flush: rank {rank}");
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_flush(team.team_id);
    transport.win_flush(team.window, rank)?;
    transport.iprobe();
    Ok(())
}

/// As [`flush`], for every rank of the window's group.
pub fn flush_all(transport: &dyn Transport, registry: &TeamRegistry, gptr: GlobalPtr) -> Result<()> {
    let team = registry.lookup(gptr.team_id())?;
    log::trace!("flush_all: team {:?}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_flush(team.team_id);
    transport.win_flush_all(team.window)?;
    transport.iprobe();
    Ok(())
}

/// Local-only completion: the source buffer of prior writes to
/// `gptr.unit_id()` may be reused, without a remote-visibility guarantee.
pub fn flush_local(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    gptr: GlobalPtr,
) -> Result<()> {
    let team = registry.lookup(gptr.team_id())?;
    let rank = gptr.unit_id();
    log::trace!("flush_local: rank {rank}");
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_flush(team.team_id);
    transport.win_flush_local(team.window, rank)
}

/// As [`flush_local`], for every rank of the window's group.
pub fn flush_local_all(
    transport: &dyn Transport,
    registry: &TeamRegistry,
    gptr: GlobalPtr,
) -> Result<()> {
    let team = registry.lookup(gptr.team_id())?;
    log::trace!("flush_local_all: team {:?}", team.team_id);
    #[cfg(feature = "metrics")]
    crate::metrics::global().record_flush(team.team_id);
    transport.win_flush_local_all(team.window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gptr::LOCAL_SEGMENT;
    use crate::team::WORLD_TEAM;
    use crate::transport::local::LocalTransport;

    #[test]
    fn flush_family_succeeds_against_a_live_window() {
        let units = LocalTransport::new_world(1);
        let registry = TeamRegistry::new();
        let group = units[0].create_group(&[0]).unwrap();
        let window = units[0].win_create(group, 8).unwrap();
        registry.install_world_team(vec![0], 0, group, window, &units[0]);

        let gptr = GlobalPtr::new(0, WORLD_TEAM, LOCAL_SEGMENT, 0);
        flush(&units[0], &registry, gptr).unwrap();
        flush_all(&units[0], &registry, gptr).unwrap();
        flush_local(&units[0], &registry, gptr).unwrap();
        flush_local_all(&units[0], &registry, gptr).unwrap();
    }
}
