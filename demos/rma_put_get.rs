//! Demonstration of the basic RMA lifecycle: bring up a world of simulated
//! units, have one unit write into its peer's window, flush, and have every
//! unit barrier before tearing down.
//!
//! Run with:
//! ```bash
//! cargo run --example rma_put_get
//! ```

use onesided::gptr::{GlobalPtr, LOCAL_SEGMENT};
use onesided::team::WORLD_TEAM;
use onesided::transport::local::LocalTransport;
use onesided::types::DType;

fn main() -> anyhow::Result<()> {
    println!("=== onesided RMA put/get demo ===\n");

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
    let registry = onesided::init(&unit, 64)?;

    // Every unit writes its own id into the next unit's window, then reads
    // back what its predecessor wrote into its own window.
    let next = (me + 1) % unit.num_units();
    let dest = GlobalPtr::new(next, WORLD_TEAM, LOCAL_SEGMENT, 0);
    let payload = [me as u8; 4];
    onesided::rma::put(&unit, &registry, dest, &payload, 4, DType::U8)?;
    onesided::sync_ops::flush(&unit, &registry, dest)?;
    onesided::collective::barrier(&unit, &registry, WORLD_TEAM)?;

    let mut got = [0u8; 4];
    let src = GlobalPtr::new(me, WORLD_TEAM, LOCAL_SEGMENT, 0);
    onesided::rma::get(&unit, &registry, &mut got, src, 4, DType::U8)?;
    println!("unit {me}: received {:?} from its predecessor", got);

    onesided::collective::barrier(&unit, &registry, WORLD_TEAM)?;
    onesided::finalize(&unit, &registry)?;
    Ok(())
}
