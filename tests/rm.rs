use rtsim::*;

#[macro_use]
mod common;

// Generic test suite applied to global rate monotonic
scheduler_tests!("RM");

// ---------------------------------------------------------------------------
// RM specific tests
// ---------------------------------------------------------------------------

fn classic_set() -> Scenario {
    Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(1)
        .task(TaskDef::periodic(1, "T1", 7.0, 3.0))
        .task(TaskDef::periodic(2, "T2", 12.0, 3.0))
        .task(TaskDef::periodic(3, "T3", 20.0, 5.0))
        .scheduler("RM")
        .duration_ms(140.0)
        .build()
        .unwrap()
}

/// Utilization 0.93 but schedulable by response-time analysis.
#[test]
fn test_classic_set_meets_deadlines() {
    common::setup_test();
    let result = simulate(&classic_set()).unwrap();

    assert!(result.is_normal());
    assert_eq!(result.total_deadline_misses(), 0);
    assert_eq!(result.trace.deadline_miss_count(), 0);

    // Releases at 0, 7, ..., 140.
    assert_eq!(result.task("T1").unwrap().jobs, 21);
    for job in result.jobs.iter().filter(|j| j.end_date.is_some()) {
        assert!(!job.exceeded_deadline, "{} missed its deadline", job.name);
    }
}

/// The critical instant at t=0 gives the textbook schedule.
#[test]
fn test_critical_instant_schedule() {
    common::setup_test();
    let result = simulate(&classic_set()).unwrap();
    result.trace.dump();

    let t1 = common::job(&result, "T1_1");
    assert_eq!((t1.start_date, t1.end_date), (Some(0), Some(3_000)));

    let t2 = common::job(&result, "T2_1");
    assert_eq!((t2.start_date, t2.end_date), (Some(3_000), Some(6_000)));

    // T3 runs in the gaps left by T1 and T2 and completes right at its
    // deadline.
    let t3 = common::job(&result, "T3_1");
    assert_eq!(t3.start_date, Some(6_000));
    assert_eq!(t3.end_date, Some(20_000));
    assert!(!t3.exceeded_deadline);
    assert_eq!(t3.response_time_ms, Some(20.0));

    // T2_2 is preempted by T1_3 at 14ms.
    let t2_2 = common::job(&result, "T2_2");
    assert_eq!(t2_2.end_date, Some(18_000));
    assert_eq!(t2_2.preemption_count, 1);
}

/// The shorter period wins regardless of release order.
#[test]
fn test_shorter_period_preempts() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(1)
        .task(TaskDef::periodic(1, "Slow", 50.0, 12.0))
        .task(TaskDef::periodic(2, "Fast", 10.0, 2.0).with_activation_date(3.0))
        .scheduler("RM")
        .duration_ms(50.0)
        .build()
        .unwrap();

    let result = simulate(&scenario).unwrap();
    result.trace.dump();

    let slow = common::job(&result, "Slow_1");
    let fast = common::job(&result, "Fast_1");
    assert_eq!((fast.start_date, fast.end_date), (Some(3_000), Some(5_000)));
    // Slow also loses 2ms to Fast_2 at 13ms.
    assert_eq!(slow.end_date, Some(16_000));
    assert_eq!(slow.preemption_count, 2);
}
