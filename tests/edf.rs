use rtsim::*;

#[macro_use]
mod common;

// Generic test suite applied to global EDF
scheduler_tests!("EDF");

// ---------------------------------------------------------------------------
// Global EDF specific tests
// ---------------------------------------------------------------------------

fn two_cpu_scenario() -> Scenario {
    Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(2)
        .task(TaskDef::periodic(1, "T1", 10.0, 2.0))
        .task(TaskDef::periodic(2, "T2", 20.0, 6.0))
        .task(TaskDef::periodic(3, "T3", 5.0, 1.0))
        .scheduler("EDF")
        .duration_ms(20.0)
        .build()
        .unwrap()
}

/// Both processors idle at t=0: the earliest deadline goes to the processor
/// that ran the scheduler, the next one to the other idle processor in the
/// same call.
#[test]
fn test_initial_placement() {
    common::setup_test();
    let result = simulate(&two_cpu_scenario()).unwrap();
    result.trace.dump();

    let t3 = common::job(&result, "T3_1");
    let t1 = common::job(&result, "T1_1");
    let t2 = common::job(&result, "T2_1");
    assert_eq!(result.trace.execution_intervals(t3.job), vec![(ProcId(0), 0, 1_000)]);
    assert_eq!(result.trace.execution_intervals(t1.job), vec![(ProcId(1), 0, 2_000)]);

    // T2 waits for the first processor to free up.
    assert_eq!(t2.start_date, Some(1_000));
}

/// A new job prefers an idle processor over preempting a running one.
#[test]
fn test_idle_processor_preferred() {
    common::setup_test();
    let result = simulate(&two_cpu_scenario()).unwrap();

    // At 5ms T2_1 runs on P0 and P1 is idle: T3_2 goes to P1.
    let t3_2 = common::job(&result, "T3_2");
    assert_eq!(
        result.trace.execution_intervals(t3_2.job),
        vec![(ProcId(1), 5_000, 6_000)]
    );

    // T2_1 is interrupted by the activation event but resumes at once.
    let t2 = common::job(&result, "T2_1");
    assert_eq!(t2.end_date, Some(7_000));
    assert_eq!(t2.migration_count, 0);
    assert_eq!(result.total_deadline_misses(), 0);
}

/// An urgent job preempts the least urgent running job.
#[test]
fn test_preempts_latest_deadline() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(2)
        .task(TaskDef::periodic(1, "Long", 100.0, 20.0))
        .task(TaskDef::periodic(2, "Mid", 50.0, 20.0))
        .task(TaskDef::sporadic(3, "Urgent", vec![5.0], 4.0, 2.0))
        .scheduler("EDF")
        .duration_ms(40.0)
        .build()
        .unwrap();

    let result = simulate(&scenario).unwrap();
    result.trace.dump();

    let long = common::job(&result, "Long_1");
    let mid = common::job(&result, "Mid_1");
    let urgent = common::job(&result, "Urgent_1");

    // Mid (deadline 50) went to P0, Long (deadline 100) to P1.
    assert_eq!(result.trace.execution_intervals(mid.job)[0].0, ProcId(0));
    // Urgent displaces Long, the job with the latest deadline.
    assert_eq!(
        result.trace.execution_intervals(urgent.job),
        vec![(ProcId(1), 5_000, 7_000)]
    );
    assert_eq!(long.preemption_count, 1);
    assert_eq!(long.end_date, Some(22_000));
    assert_eq!(mid.end_date, Some(20_000));
}

/// Work conserving: with a feasible load on several processors nobody
/// misses and no processor stays idle while a job waits.
#[test]
fn test_global_feasible_load() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(4)
        .task(TaskDef::periodic(1, "T1", 10.0, 3.0))
        .task(TaskDef::periodic(2, "T2", 10.0, 3.0))
        .task(TaskDef::periodic(3, "T3", 20.0, 6.0))
        .task(TaskDef::periodic(4, "T4", 20.0, 6.0))
        .task(TaskDef::periodic(5, "T5", 40.0, 8.0))
        .scheduler("EDF")
        .duration_ms(200.0)
        .build()
        .unwrap();

    let result = simulate(&scenario).unwrap();

    assert!(result.is_normal());
    assert_eq!(result.total_deadline_misses(), 0);
    assert!(result.trace.verify_mutual_exclusion().is_ok());
    // Four processors, five jobs at t=0: T5 is the only one waiting.
    assert_eq!(common::job(&result, "T5_1").start_date, Some(3_000));
}

/// Between two processors running jobs with the same deadline, the one
/// that called `schedule` gives up its job.
#[test]
fn test_tie_goes_to_scheduling_processor() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(2)
        .task(TaskDef::periodic(1, "A", 20.0, 10.0))
        .task(TaskDef::sporadic(2, "U", vec![1.0, 5.0], 3.0, 1.0))
        .task(TaskDef::sporadic(3, "B", vec![3.0], 17.0, 10.0))
        .scheduler("EDF")
        .duration_ms(20.0)
        .build()
        .unwrap();

    let result = simulate(&scenario).unwrap();
    result.trace.dump();

    let a = common::job(&result, "A_1");
    let b = common::job(&result, "B_1");
    let u1 = common::job(&result, "U_1");
    let u2 = common::job(&result, "U_2");
    assert_eq!(a.absolute_deadline, 20_000);
    assert_eq!(b.absolute_deadline, 20_000);

    // U_1 took the idle P1 and left U pointing there, so U_2's release
    // schedules on P1 and P1's job loses the tie.
    assert_eq!(
        result.trace.execution_intervals(u1.job),
        vec![(ProcId(1), 1_000, 2_000)]
    );
    assert_eq!(
        result.trace.execution_intervals(u2.job),
        vec![(ProcId(1), 5_000, 6_000)]
    );
    assert_eq!(b.preemption_count, 1);
    assert_eq!(b.end_date, Some(14_000));
    assert_eq!(a.preemption_count, 0);
    assert_eq!(a.migration_count, 0);
    assert_eq!(a.end_date, Some(10_000));
}
