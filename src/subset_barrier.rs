//! Subset-barrier (§4.I): a two-phase rendezvous over an arbitrary subset
//! of the all-team's members, built from raw two-sided `send`/`recv`
//! rather than from a transport-level group barrier (a subset need not
//! correspond to any team the caller has created).
//!
//! Units not in the subset return immediately. The member with the
//! smallest unit id in the subset acts as root: every other member sends
//! it a one-byte message (phase 1), then root sends one back to each
//! (phase 2). A fixed tag, reserved for this use, keeps the rendezvous
//! messages from colliding with a caller's own two-sided traffic.

use crate::error::Result;
use crate::transport::Transport;

/// Reserved for subset-barrier rendezvous messages; never used by
/// [`crate::collective::send`]/[`crate::collective::recv`].
const SUBSET_BARRIER_TAG: i32 = i32::MIN;

/// Block `my_unit` until every member of `subset` has called this
/// function. Returns immediately if `my_unit` is not in `subset`.
pub fn subset_barrier(transport: &dyn Transport, my_unit: u16, subset: &[u16]) -> Result<()> {
    if !subset.contains(&my_unit) {
        return Ok(());
    }
    let root = *subset.iter().min().expect("subset_barrier: subset is non-empty when it contains my_unit");
    let others: Vec<u16> = subset.iter().copied().filter(|&u| u != root).collect();

    if my_unit == root {
        log::debug!("subset_barrier: root, waiting on {} peers", others.len());
        for &peer in &others {
            let mut buf = [0u8; 1];
            transport.recv(peer, SUBSET_BARRIER_TAG, &mut buf)?;
        }
        for &peer in &others {
            transport.send(peer, SUBSET_BARRIER_TAG, &[1])?;
        }
    } else {
        log::debug!("subset_barrier: sending to root {root}");
        transport.send(root, SUBSET_BARRIER_TAG, &[1])?;
        let mut buf = [0u8; 1];
        transport.recv(root, SUBSET_BARRIER_TAG, &mut buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::local::LocalTransport;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn only_subset_members_rendezvous() {
        let units = LocalTransport::new_world(4);
        let unit0_returned = AtomicBool::new(false);
        let unit2_returned = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for (id, unit) in units.into_iter().enumerate() {
                let id = id as u16;
                let unit0_returned = &unit0_returned;
                let unit2_returned = &unit2_returned;
                scope.spawn(move || {
                    subset_barrier(&unit, id, &[1, 3]).unwrap();
                    match id {
                        0 => unit0_returned.store(true, Ordering::SeqCst),
                        2 => unit2_returned.store(true, Ordering::SeqCst),
                        _ => {}
                    }
                });
            }
        });
        assert!(unit0_returned.load(Ordering::SeqCst));
        assert!(unit2_returned.load(Ordering::SeqCst));
    }
}
