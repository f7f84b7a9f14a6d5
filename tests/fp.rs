use rtsim::*;
use serde_json::json;

#[macro_use]
mod common;

// Generic test suite applied to global fixed priority
scheduler_tests!("FP");

// ---------------------------------------------------------------------------
// FP specific tests
// ---------------------------------------------------------------------------

/// The `priority` field decides, not the period.
#[test]
fn test_priority_field_orders_jobs() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(1)
        .task(TaskDef::periodic(1, "A", 10.0, 3.0).with_data("priority", json!(1)))
        .task(TaskDef::periodic(2, "B", 20.0, 4.0).with_data("priority", json!(5)))
        .scheduler("FP")
        .duration_ms(20.0)
        .build()
        .unwrap();

    let result = simulate(&scenario).unwrap();
    result.trace.dump();

    let a = common::job(&result, "A_1");
    let b = common::job(&result, "B_1");
    assert_eq!((b.start_date, b.end_date), (Some(0), Some(4_000)));
    assert_eq!((a.start_date, a.end_date), (Some(4_000), Some(7_000)));
}

/// Tasks without a priority default to 0, below any positive priority.
#[test]
fn test_missing_priority_defaults_to_zero() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(1)
        .task(TaskDef::periodic(1, "Plain", 10.0, 3.0))
        .task(TaskDef::periodic(2, "Boosted", 10.0, 3.0).with_data("priority", json!(2)))
        .scheduler("FP")
        .duration_ms(10.0)
        .build()
        .unwrap();

    let result = simulate(&scenario).unwrap();

    assert_eq!(common::job(&result, "Boosted_1").end_date, Some(3_000));
    assert_eq!(common::job(&result, "Plain_1").end_date, Some(6_000));
}

/// A higher priority release preempts immediately.
#[test]
fn test_high_priority_preempts() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(1)
        .task(TaskDef::periodic(1, "Low", 30.0, 10.0).with_data("priority", json!(1)))
        .task(
            TaskDef::sporadic(2, "High", vec![2.0], 5.0, 1.0).with_data("priority", json!(9)),
        )
        .scheduler("FP")
        .duration_ms(30.0)
        .build()
        .unwrap();

    let result = simulate(&scenario).unwrap();

    let low = common::job(&result, "Low_1");
    let high = common::job(&result, "High_1");
    assert_eq!((high.start_date, high.end_date), (Some(2_000), Some(3_000)));
    assert_eq!(low.preemption_count, 1);
    assert_eq!(low.end_date, Some(11_000));
}
