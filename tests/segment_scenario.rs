//! Four units collectively allocate a segment on the all-units team, seed
//! their own slice with a per-unit pattern, then read a cross-unit slice
//! back and check it matches.

use onesided::gptr::GlobalPtr;
use onesided::team::WORLD_TEAM;
use onesided::transport::local::LocalTransport;
use onesided::types::DType;

#[test]
fn segment_strided_get_matches_seeded_pattern() {
    const PER_UNIT_ELEMS: u64 = 1000;
    let units = LocalTransport::new_world(4);
    std::thread::scope(|scope| {
        for unit in units {
            scope.spawn(move || {
                let registry = onesided::init(&unit, PER_UNIT_ELEMS * 4).unwrap();
                let my = unit.this_unit();

                registry
                    .alloc_segment(WORLD_TEAM, &unit, 1, PER_UNIT_ELEMS * 4)
                    .unwrap();

                let seed: Vec<u32> = (0..PER_UNIT_ELEMS as u32)
                    .map(|i| my as u32 * 1000 + i)
                    .collect();
                let seed_bytes: Vec<u8> = seed.iter().flat_map(|v| v.to_le_bytes()).collect();
                let gptr_self = GlobalPtr::new(my, WORLD_TEAM, 1, 0);
                onesided::rma::put_blocking(
                    &unit,
                    &registry,
                    gptr_self,
                    &seed_bytes,
                    PER_UNIT_ELEMS,
                    DType::U32,
                )
                .unwrap();

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();

                if my != 0 {
                    let target = 0u16;
                    let gptr = GlobalPtr::new(target, WORLD_TEAM, 1, 500 * 4);
                    let mut buf = vec![0u8; 100 * 4];
                    onesided::rma::get(&unit, &registry, &mut buf, gptr, 100, DType::U32).unwrap();
                    let got: Vec<u32> = buf
                        .chunks_exact(4)
                        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                        .collect();
                    let expected: Vec<u32> = (0..100u32).map(|i| target as u32 * 1000 + 500 + i).collect();
                    assert_eq!(got, expected);
                }

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
                registry.dealloc_segment(WORLD_TEAM, &unit, 1).unwrap();
                onesided::finalize(&unit, &registry).unwrap();
            });
        }
    });
}
