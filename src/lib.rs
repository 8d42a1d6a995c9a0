//! # onesided
//!
//! A portable **one-sided communication runtime** for partitioned global
//! address space (PGAS) programs: typed RMA (`get`/`put`/`accumulate`/
//! `fetch_and_op`/`compare_and_swap`) against remote memory windows, team-
//! scoped collectives and point-to-point messaging, and a locality tree for
//! reasoning about hardware topology.
//!
//! ## Key concepts
//!
//! - [`gptr::GlobalPtr`] — a `(unit, team, segment, offset)` tuple
//!   identifying a byte range on some unit's window. The universal
//!   currency of every RMA and synchronization call.
//! - [`team::TeamRegistry`] — per-unit membership, rank, and segment table
//!   for every team a unit has joined. The all-units team
//!   ([`team::WORLD_TEAM`]) is installed once by [`init`] and is never
//!   destroyed; every other team is created from a parent by
//!   [`team::TeamRegistry::create_from`] and torn down by
//!   [`team::TeamRegistry::destroy`].
//! - [`transport::Transport`] — the trait the runtime is written against.
//!   Production deployments plug in a binding to a real message-passing
//!   library; this crate ships one concrete implementation,
//!   [`transport::local::LocalTransport`], built on OS threads and
//!   `Arc`-shared buffers, used by the test suite and the `demos/` programs.
//!
//! ## Quick start
//!
//! ```
//! use onesided::transport::local::LocalTransport;
//! use onesided::types::DType;
//! use onesided::gptr::{GlobalPtr, LOCAL_SEGMENT};
//! use onesided::team::WORLD_TEAM;
//!
//! let units = LocalTransport::new_world(2);
//! std::thread::scope(|scope| {
//!     for unit in units {
//!         scope.spawn(move || {
//!             let registry = onesided::init(&unit, 64).unwrap();
//!             if unit.this_unit() == 0 {
//!                 let dest = GlobalPtr::new(1, WORLD_TEAM, LOCAL_SEGMENT, 0);
//!                 onesided::rma::put_blocking(&unit, &registry, dest, &[7, 7, 7, 7], 4, DType::U8)
//!                     .unwrap();
//!             }
//!             onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
//!             onesided::finalize(&unit, &registry).unwrap();
//!         });
//!     }
//! });
//! ```
//!
//! ## Module overview
//!
//! - [`gptr`] — the global pointer value type and its wire format.
//! - [`transport`] — the transport contract and its `LocalTransport` binding.
//! - [`team`] — team registry, membership, and collective segment allocation.
//! - [`segment`] — per-team segment table (window displacements).
//! - [`rma`] — the chunked, fast-pathed RMA engine.
//! - [`handle`] — non-blocking operation handle lifecycle.
//! - [`sync_ops`] — the `flush`/`flush_all`/`flush_local`/`flush_local_all` family.
//! - [`collective`] — team-scoped collectives and point-to-point messaging.
//! - [`subset_barrier`] — ad hoc rendezvous over an arbitrary unit subset.
//! - [`locality`] — the arena-based locality tree and domain-tag walks.
//! - [`types`] — element types, chunk planning, and reduction combine logic.
//! - [`config`] — process-wide runtime configuration.
//! - [`error`] — the crate-wide error taxonomy.
//! - [`testing`] — chunk-size override hook for exercising the two-chunk path.
//! - [`metrics`] — per-team operation counters (feature: `metrics`).
//!
//! ## Configuration
//!
//! [`init`] reads [`config::Config`] from the process environment
//! (`PGAS_SHARED_WINDOWS`, `PGAS_LOG_LEVEL`, `PGAS_MAX_TEAM_DOMAINS`); tests
//! that want deterministic configuration regardless of the ambient
//! environment should call [`init_with_config`] instead. Neither function
//! installs a logger: wire up `env_logger` or any other `log`-compatible
//! subscriber in the host program. Both do call [`log::set_max_level`] with
//! `Config::log_level`, so the host logger still needs its own filter set
//! no higher than that level for this crate's events to surface.

pub mod collective;
pub mod config;
pub mod error;
pub mod gptr;
pub mod handle;
pub mod locality;
pub mod rma;
pub mod segment;
pub mod subset_barrier;
pub mod sync_ops;
pub mod team;
pub mod testing;
pub mod transport;
pub mod types;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use config::Config;
pub use error::{Error, Result};
pub use gptr::GlobalPtr;
pub use handle::Handle;
pub use team::{TeamId, TeamRegistry, WORLD_TEAM};
pub use transport::Transport;
pub use types::{ChunkPlan, DType};

/// Bring up the runtime against `transport`: install process-wide
/// configuration from the environment and register the all-units team.
/// `world_window_bytes` sizes the window backing [`WORLD_TEAM`] itself
/// (the region [`TeamRegistry::alloc_segment`] on `WORLD_TEAM` bumps into,
/// plus any direct [`LOCAL_SEGMENT`](crate::gptr::LOCAL_SEGMENT) traffic) --
/// pass `0` if the caller only ever creates segments on sub-teams.
///
/// Returns a [`TeamRegistry`] scoped to this call. The registry is not a
/// process-wide singleton (unlike [`Config`]): `LocalTransport`'s test
/// world represents each simulated unit as an OS thread within a single
/// process, so a single global registry would be shared, and mutated, by
/// every "unit" at once. Call [`init`] once per unit (per transport
/// instance) and thread the returned handle through that unit's calls,
/// exactly as the existing tests already do.
pub fn init(transport: &dyn Transport, world_window_bytes: u64) -> Result<TeamRegistry> {
    init_with_config(transport, config::Config::from_env(), world_window_bytes)
}

/// As [`init`], but installs `config` instead of reading it from the
/// process environment. Intended for tests that want deterministic
/// configuration regardless of the ambient environment.
pub fn init_with_config(
    transport: &dyn Transport,
    cfg: config::Config,
    world_window_bytes: u64,
) -> Result<TeamRegistry> {
    config::Config::install(cfg);
    log::set_max_level(config::Config::current().log_level);
    log::info!("runtime init: {} unit(s), this unit {}", transport.num_units(), transport.this_unit());

    let registry = TeamRegistry::new();
    let members: Vec<u16> = (0..transport.num_units()).collect();
    let group = transport.create_group(&members)?;
    let window = transport.win_create(group, world_window_bytes)?;
    registry.install_world_team(members, transport.this_unit(), group, window, transport);
    Ok(registry)
}

/// Tear down the runtime: release the all-units team's transport group and
/// window. Any team other than [`WORLD_TEAM`] still outstanding on
/// `registry` is the caller's responsibility to [`TeamRegistry::destroy`]
/// first -- `finalize` only releases what [`init`] itself allocated.
pub fn finalize(transport: &dyn Transport, registry: &TeamRegistry) -> Result<()> {
    let world = registry.lookup(team::WORLD_TEAM)?;
    log::info!("runtime finalize: team {:?}", world.team_id);
    transport.win_free(world.window)?;
    transport.free_group(world.group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::local::LocalTransport;

    #[test]
    fn init_installs_the_world_team_and_finalize_releases_it() {
        let units = LocalTransport::new_world(2);
        std::thread::scope(|scope| {
            for unit in units {
                scope.spawn(move || {
                    let registry = init(&unit, 64).unwrap();
                    assert_eq!(registry.size(WORLD_TEAM).unwrap(), 2);
                    collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
                    finalize(&unit, &registry).unwrap();
                });
            }
        });
    }

    #[test]
    fn init_with_config_bypasses_the_environment() {
        let units = LocalTransport::new_world(1);
        let cfg = config::Config {
            shared_windows: false,
            ..config::Config::default()
        };
        let registry = init_with_config(&units[0], cfg, 64).unwrap();
        assert_eq!(registry.my_rank(WORLD_TEAM).unwrap(), 0);
    }
}
