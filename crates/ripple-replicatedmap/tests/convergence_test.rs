// Property tests for convergence
// Random interleavings of writes on several members must end in identical maps

mod common;

use std::collections::BTreeMap;

use common::TestCluster;
use proptest::prelude::*;
use ripple_common::MemberId;
use ripple_replicatedmap::{Data, ReplicatedMap};

#[derive(Debug, Clone)]
enum Op {
    Put { member: usize, key: u8, value: u16 },
    Remove { member: usize, key: u8 },
    Settle,
}

fn op_strategy(members: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..members, 0u8..4, any::<u16>())
            .prop_map(|(member, key, value)| Op::Put { member, key, value }),
        2 => (0..members, 0u8..4).prop_map(|(member, key)| Op::Remove { member, key }),
        1 => Just(Op::Settle),
    ]
}

fn snapshot(map: &ReplicatedMap<u8, u16>) -> BTreeMap<u8, u16> {
    map.entries().unwrap().into_iter().collect()
}

fn run(ops: Vec<Op>) -> (Vec<BTreeMap<u8, u16>>, Vec<Vec<(MemberId, u64)>>, Vec<u64>) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let cluster = TestCluster::start(&["m1", "m2", "m3"]);
        let maps: Vec<ReplicatedMap<u8, u16>> = (0..3)
            .map(|i| cluster.member(i).create_distributed_object("prop").unwrap())
            .collect();
        let mut local_mutations = vec![BTreeMap::<u8, u64>::new(); 3];

        for op in ops {
            match op {
                Op::Put { member, key, value } => {
                    maps[member].put(&key, &value).unwrap();
                    *local_mutations[member].entry(key).or_default() += 1;
                }
                Op::Remove { member, key } => {
                    maps[member].remove(&key).unwrap();
                    *local_mutations[member].entry(key).or_default() += 1;
                }
                Op::Settle => cluster.settle().await,
            }
        }
        cluster.settle().await;

        let snapshots: Vec<BTreeMap<u8, u16>> = maps.iter().map(snapshot).collect();

        // Clock of key 0 on every member, and how often each member wrote it.
        let clocks: Vec<Vec<(MemberId, u64)>> = (0..3)
            .map(|i| {
                cluster
                    .member(i)
                    .get_record_store("prop")
                    .unwrap()
                    .unwrap()
                    .record(&Data::serialize(&0u8).unwrap())
                    .map(|r| r.vector_clock.iter().map(|(m, c)| (m.clone(), c)).collect::<Vec<_>>())
                    .unwrap_or_default()
            })
            .collect();
        let writes: Vec<u64> = local_mutations
            .iter()
            .map(|per_key| per_key.get(&0).copied().unwrap_or(0))
            .collect();

        cluster.shutdown();
        (snapshots, clocks, writes)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_members_converge(ops in prop::collection::vec(op_strategy(3), 1..40)) {
        let (snapshots, clocks, writes) = run(ops);

        prop_assert_eq!(&snapshots[0], &snapshots[1]);
        prop_assert_eq!(&snapshots[1], &snapshots[2]);
        prop_assert_eq!(&clocks[0], &clocks[1]);
        prop_assert_eq!(&clocks[1], &clocks[2]);

        // Each member's own counter counts exactly its local mutations.
        for (member, count) in writes.iter().enumerate() {
            let id = MemberId::from(format!("m{}", member + 1));
            let counter = clocks[0]
                .iter()
                .find(|(m, _)| *m == id)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            prop_assert_eq!(counter, *count);
        }
    }
}
