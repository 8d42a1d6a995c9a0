//! Non-blocking operation handle lifecycle (§4.F).
//!
//! A [`Handle`] is opaque to callers and carries at most two transport
//! sub-request ids (one per chunk of a two-chunk transfer). `Handle::null()`
//! is the universal no-op value: every lifecycle method accepts it and
//! returns `Ok(())`/`Ok(true)` without touching the transport.

use crate::error::Result;
use crate::team::TeamId;
use crate::transport::{ReqId, Transport, WindowHandle};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Active,
    Flushed,
}

struct HandleInner {
    state: State,
    dest_rank: u16,
    window: WindowHandle,
    needs_flush: bool,
    reqs: Vec<ReqId>,
    team_id: TeamId,
}

/// A token for an in-flight non-blocking RMA operation (`get_handle`,
/// `put_handle`). `None` is the NULL handle.
pub struct Handle(Option<HandleInner>);

impl Handle {
    /// The NULL handle: every operation on it is a no-op.
    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn active(
        dest_rank: u16,
        window: WindowHandle,
        needs_flush: bool,
        reqs: Vec<ReqId>,
        team_id: TeamId,
    ) -> Self {
        Self(Some(HandleInner {
            state: State::Active,
            dest_rank,
            window,
            needs_flush,
            reqs,
            team_id,
        }))
    }

    /// Block until the handle's sub-requests (and, if `needs_flush`, a
    /// remote flush) complete, then free it, leaving `self` NULL.
    pub fn wait(&mut self, transport: &dyn Transport) -> Result<()> {
        let Some(inner) = self.0.take() else {
            return Ok(());
        };
        transport.waitall(&inner.reqs)?;
        if inner.needs_flush {
            transport.win_flush(inner.window, inner.dest_rank)?;
        }
        #[cfg(feature = "metrics")]
        {
            crate::metrics::global().record_wait(inner.team_id);
            crate::metrics::global().record_handle_closed(inner.team_id);
        }
        log::trace!("handle drained ({} sub-requests)", inner.reqs.len());
        Ok(())
    }

    /// Non-blocking local-completion check; does not free the handle and
    /// does not imply remote visibility even when it returns `true`.
    pub fn test_local(&mut self, transport: &dyn Transport) -> Result<bool> {
        let Some(inner) = &mut self.0 else {
            return Ok(true);
        };
        if inner.state == State::Flushed {
            return Ok(true);
        }
        let done = transport.testall(&inner.reqs)?;
        if done {
            inner.state = State::Flushed;
        }
        Ok(done)
    }
}

/// Block until every handle in `handles` completes, then set each to NULL.
pub fn waitall(handles: &mut [Handle], transport: &dyn Transport) -> Result<()> {
    for h in handles {
        h.wait(transport)?;
    }
    Ok(())
}

/// Non-blocking local-completion check over every handle in `handles`.
/// Returns `true` only if every handle is locally finished.
pub fn testall_local(handles: &mut [Handle], transport: &dyn Transport) -> Result<bool> {
    let mut all = true;
    for h in handles {
        if !h.test_local(transport)? {
            all = false;
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::local::LocalTransport;

    #[test]
    fn null_handle_is_always_a_no_op() {
        let units = LocalTransport::new_world(1);
        let mut h = Handle::null();
        assert!(h.is_null());
        assert!(h.test_local(&units[0]).unwrap());
        h.wait(&units[0]).unwrap();
        assert!(h.is_null());
    }

    #[test]
    fn wait_frees_and_nulls_the_handle() {
        let units = LocalTransport::new_world(1);
        let group = units[0].create_group(&[0]).unwrap();
        let win = units[0].win_create(group, 8).unwrap();
        let req = units[0].rput(win, 0, 0, &[1, 2, 3, 4]).unwrap();
        let mut h = Handle::active(0, win, true, vec![req], crate::team::WORLD_TEAM);
        assert!(!h.is_null());
        h.wait(&units[0]).unwrap();
        assert!(h.is_null());
    }
}
