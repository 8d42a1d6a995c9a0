//! With the chunk size overridden down to a tractable value, a transfer
//! spanning more than one chunk still round-trips correctly -- the chunk
//! boundary is invisible to the caller (§4.A).

use onesided::gptr::GlobalPtr;
use onesided::team::WORLD_TEAM;
use onesided::testing::set_chunk_override;
use onesided::transport::local::LocalTransport;
use onesided::types::DType;

#[test]
fn put_then_get_spanning_two_chunks_round_trips() {
    let _guard = set_chunk_override(10);
    let units = LocalTransport::new_world(2);
    std::thread::scope(|scope| {
        for unit in units {
            scope.spawn(move || {
                let registry = onesided::init(&unit, 128).unwrap();
                let my = unit.this_unit();

                if my == 0 {
                    let values: Vec<u32> = (0..25u32).collect();
                    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                    let dest = GlobalPtr::new(1, WORLD_TEAM, onesided::gptr::LOCAL_SEGMENT, 0);
                    onesided::rma::put_blocking(&unit, &registry, dest, &bytes, 25, DType::U32).unwrap();
                }
                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();

                if my == 0 {
                    let src = GlobalPtr::new(1, WORLD_TEAM, onesided::gptr::LOCAL_SEGMENT, 0);
                    let mut buf = vec![0u8; 25 * 4];
                    onesided::rma::get(&unit, &registry, &mut buf, src, 25, DType::U32).unwrap();
                    let got: Vec<u32> = buf
                        .chunks_exact(4)
                        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                        .collect();
                    let expected: Vec<u32> = (0..25u32).collect();
                    assert_eq!(got, expected);
                }

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
                onesided::finalize(&unit, &registry).unwrap();
            });
        }
    });
}
