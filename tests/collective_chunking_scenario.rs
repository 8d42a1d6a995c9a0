//! With the chunk size overridden down to a tractable value, collectives
//! chunk the same way RMA does -- the chunk boundary is invisible to the
//! caller (§4.H).

use onesided::team::WORLD_TEAM;
use onesided::testing::set_chunk_override;
use onesided::transport::local::LocalTransport;
use onesided::types::DType;

#[test]
fn bcast_and_allgather_spanning_two_chunks_round_trip() {
    let _guard = set_chunk_override(5);
    let units = LocalTransport::new_world(2);
    std::thread::scope(|scope| {
        for unit in units {
            scope.spawn(move || {
                let registry = onesided::init(&unit, 0).unwrap();
                let my = unit.this_unit();

                let values: Vec<u32> = (0..12u32).collect();
                let mut buf: Vec<u8> = if my == 0 {
                    values.iter().flat_map(|v| v.to_le_bytes()).collect()
                } else {
                    vec![0u8; 12 * 4]
                };
                onesided::collective::bcast(&unit, &registry, WORLD_TEAM, 0, &mut buf, 12, DType::U32).unwrap();
                let got: Vec<u32> = buf
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                assert_eq!(got, values);

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();

                let my_share: Vec<u32> = (0..6u32).map(|i| my as u32 * 100 + i).collect();
                let send_bytes: Vec<u8> = my_share.iter().flat_map(|v| v.to_le_bytes()).collect();
                let mut recv = vec![0u8; 2 * 6 * 4];
                onesided::collective::allgather(&unit, &registry, WORLD_TEAM, &send_bytes, &mut recv, 6, DType::U32)
                    .unwrap();
                let got: Vec<u32> = recv
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                let expected: Vec<u32> = (0..2u32).flat_map(|r| (0..6u32).map(move |i| r * 100 + i)).collect();
                assert_eq!(got, expected);

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
                onesided::finalize(&unit, &registry).unwrap();
            });
        }
    });
}
