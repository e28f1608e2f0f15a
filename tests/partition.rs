mod common;

use common::*;
use demo_query::query::partition::{run_plan, PartitionPlan, PartitionRunner, Pooled, SingleThreaded};
use demo_query::types::DemoTick;
use demo_query::{TickQuery, TickTable};
use proptest::prelude::*;
use rstest::rstest;

fn single_pass(bytes: &[u8], query: &TickQuery) -> TickTable {
    demo_query::parse_ticks(bytes, query, None).unwrap()
}

fn partitioned(bytes: &[u8], query: &TickQuery, starts: &[DemoTick], runner: &dyn PartitionRunner) -> TickTable {
    let plan = PartitionPlan::from_starts(starts).with_checkpoints(bytes).unwrap();
    run_plan(bytes, query, &plan, runner).unwrap()
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(7)]
#[case(64)]
fn even_splits_match_a_single_pass(#[case] partitions: usize) {
    let bytes = &standard_demo().bytes;
    let query = TickQuery::new(["health", "origin", "ping"]);
    let expected = single_pass(bytes, &query);
    assert_eq!(
        demo_query::parse_ticks_partitioned(bytes, &query, &SingleThreaded, partitions).unwrap(),
        expected
    );
    assert_eq!(
        demo_query::parse_ticks_partitioned(bytes, &query, &Pooled::with_threads(3), partitions).unwrap(),
        expected
    );
}

#[test]
fn split_inside_a_gap_between_packets() {
    let bytes = &standard_demo().bytes;
    let query = TickQuery::new(["health"]).with_ticks([100, 101, 102, 103]);
    let expected = single_pass(bytes, &query);
    assert_eq!(expected.data.len(), 12);
    assert_eq!(partitioned(bytes, &query, &[0, 101, 102], &SingleThreaded), expected);
}

#[test]
fn diagnostics_are_reported_once() {
    let demo = build_demo(|builder, tick| {
        if tick == 10 {
            builder.sized(42, 10, &[0; 8]);
        }
    });
    let query = TickQuery::new(["health", "m_flNothing"]);
    let expected = single_pass(&demo.bytes, &query);
    assert_eq!(expected.diagnostics.len(), 2);
    assert_eq!(partitioned(&demo.bytes, &query, &[0, 5, 10, 11, 500], &Pooled::default()), expected);
}

#[test]
fn partitions_past_the_end_are_empty() {
    let bytes = &standard_demo().bytes;
    let query = TickQuery::new(["health"]);
    let expected = single_pass(bytes, &query);
    assert_eq!(partitioned(bytes, &query, &[0, 900, 5000], &SingleThreaded), expected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn split_points_do_not_change_the_result(
        starts in prop::collection::vec(0u32..1200, 0..6),
        ticks in prop::option::of(prop::collection::vec(0u32..1200, 1..16)),
        pooled in any::<bool>(),
    ) {
        let bytes = &standard_demo().bytes;
        let mut query = TickQuery::new(["health", "origin", "ping", "m_flNothing"]);
        query.wanted_ticks = ticks;
        let expected = single_pass(bytes, &query);

        let actual = if pooled {
            partitioned(bytes, &query, &starts, &Pooled::default())
        } else {
            partitioned(bytes, &query, &starts, &SingleThreaded)
        };
        prop_assert_eq!(actual, expected);
    }
}
