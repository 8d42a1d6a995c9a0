//! Eight units race `compare_and_swap` against the same remote counter;
//! exactly one CAS per round should observe the expected value and
//! succeed, so after all rounds the counter equals the unit count.

use onesided::gptr::GlobalPtr;
use onesided::team::WORLD_TEAM;
use onesided::transport::local::LocalTransport;
use onesided::types::DType;

#[test]
fn compare_and_swap_increment_race_lands_on_exactly_one_winner_per_round() {
    const N: u16 = 8;
    let units = LocalTransport::new_world(N);
    std::thread::scope(|scope| {
        for unit in units {
            scope.spawn(move || {
                let registry = onesided::init(&unit, 8).unwrap();
                let my = unit.this_unit();

                if my == 0 {
                    let zero = 0u64.to_le_bytes();
                    let target = GlobalPtr::new(0, WORLD_TEAM, onesided::gptr::LOCAL_SEGMENT, 0);
                    onesided::rma::put_blocking(&unit, &registry, target, &zero, 1, DType::U64).unwrap();
                }
                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();

                let target = GlobalPtr::new(0, WORLD_TEAM, onesided::gptr::LOCAL_SEGMENT, 0);
                loop {
                    let mut current = [0u8; 8];
                    onesided::rma::get(&unit, &registry, &mut current, target, 1, DType::U64).unwrap();
                    let expected_val = u64::from_le_bytes(current);
                    let new_val = (expected_val + 1).to_le_bytes();
                    let mut result = [0u8; 8];
                    onesided::rma::compare_and_swap(
                        &unit,
                        &registry,
                        target,
                        &new_val,
                        &current,
                        &mut result,
                        DType::U64,
                    )
                    .unwrap();
                    if result == current {
                        break;
                    }
                }

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
                if my == 0 {
                    let mut final_val = [0u8; 8];
                    onesided::rma::get(&unit, &registry, &mut final_val, target, 1, DType::U64).unwrap();
                    assert_eq!(u64::from_le_bytes(final_val), N as u64);
                }

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
                onesided::finalize(&unit, &registry).unwrap();
            });
        }
    });
}
