//! Demonstration of the locality tree and the metrics collector: build a
//! two-node tree over a four-unit world, split it by node, run an
//! `allreduce` across the world team, and print the collected counters.
//!
//! Run with:
//! ```bash
//! cargo run --example locality_and_metrics
//! ```

use onesided::locality::{LocalityTree, Scope};
use onesided::team::WORLD_TEAM;
use onesided::transport::local::LocalTransport;
use onesided::types::DType;

fn main() -> anyhow::Result<()> {
    println!("=== onesided locality and metrics demo ===\n");

    let units = LocalTransport::new_world(4);
    std::thread::scope(|scope| {
        for unit in units {
            scope.spawn(move || run_unit(unit).unwrap());
        }
    });

    Ok(())
}

fn run_unit(unit: LocalTransport) -> anyhow::Result<()> {
    let me = unit.this_unit();
    let registry = onesided::init(&unit, 0)?;

    let tree = LocalityTree::from_flat_nodes(WORLD_TEAM, vec![vec![0, 1], vec![2, 3]]);
    let parts = tree.split(Scope::Node, 2)?;
    if me == 0 {
        println!("locality split into {} groups: {:?}", parts.len(), parts);
    }

    let send = (me as u32 + 1).to_le_bytes();
    let mut recv = [0u8; 4];
    onesided::collective::allreduce(
        &unit,
        &registry,
        WORLD_TEAM,
        &send,
        &mut recv,
        DType::U32,
        onesided::transport::ReduceOp::Sum,
        1,
    )?;
    let sum = u32::from_le_bytes(recv);
    println!("unit {me}: allreduce sum = {sum} (expected 1+2+3+4 = 10)");

    onesided::collective::barrier(&unit, &registry, WORLD_TEAM)?;

    #[cfg(feature = "metrics")]
    if me == 0 {
        onesided::metrics::global().print();
    }

    onesided::finalize(&unit, &registry)?;
    Ok(())
}
