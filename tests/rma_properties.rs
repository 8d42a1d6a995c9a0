//! Property-based coverage for §8's P1 (put/flush/get round-trips) and P2
//! (chunking transparency): for any buffer length spanning zero, one, or
//! several chunks, a `put_blocking` followed by a `get` reproduces the
//! exact bytes written, regardless of where the chunk boundary falls.

use onesided::gptr::GlobalPtr;
use onesided::team::WORLD_TEAM;
use onesided::testing::set_chunk_override;
use onesided::transport::local::LocalTransport;
use onesided::types::DType;
use proptest::prelude::*;

fn round_trip_of_len(nelem: u64) {
    let _guard = set_chunk_override(4);
    let units = LocalTransport::new_world(2);
    let bytes: Vec<u8> = (0..nelem).map(|i| (i % 251) as u8).collect();
    std::thread::scope(|scope| {
        for unit in units {
            let bytes = bytes.clone();
            scope.spawn(move || {
                let registry = onesided::init(&unit, 4096).unwrap();
                let my = unit.this_unit();

                if my == 0 {
                    let dest = GlobalPtr::new(1, WORLD_TEAM, onesided::gptr::LOCAL_SEGMENT, 0);
                    onesided::rma::put_blocking(&unit, &registry, dest, &bytes, nelem, DType::U8)
                        .unwrap();
                }
                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();

                if my == 0 {
                    let src = GlobalPtr::new(1, WORLD_TEAM, onesided::gptr::LOCAL_SEGMENT, 0);
                    let mut out = vec![0u8; nelem as usize];
                    onesided::rma::get(&unit, &registry, &mut out, src, nelem, DType::U8).unwrap();
                    assert_eq!(out, bytes);
                }

                onesided::collective::barrier(&unit, &registry, WORLD_TEAM).unwrap();
                onesided::finalize(&unit, &registry).unwrap();
            });
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// P1/P2: any length from zero up to several multiples of the
    /// (overridden) chunk size round-trips byte-for-byte through
    /// `put_blocking`/`get`, regardless of whether it lands on a chunk
    /// boundary, inside a chunk, or in the remainder.
    #[test]
    fn put_then_get_round_trips_for_any_length(nelem in 0u64..40) {
        round_trip_of_len(nelem);
    }
}

#[test]
fn zero_length_transfer_is_a_no_op_round_trip() {
    round_trip_of_len(0);
}
