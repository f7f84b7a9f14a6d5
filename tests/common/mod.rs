use rtsim::{JobOutcome, SimFormat, SimulationResult};

/// Initialize tracing from `RUST_LOG`, stamping lines with virtual time.
///
/// `try_init()` is idempotent: first call in the process succeeds,
/// subsequent calls are silently ignored.
pub fn setup_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .event_format(SimFormat)
        .try_init();
}

/// Look up a job by name, failing the test if it was never released.
#[allow(dead_code)]
pub fn job<'a>(result: &'a SimulationResult, name: &str) -> &'a JobOutcome {
    result
        .job(name)
        .unwrap_or_else(|| panic!("job {name} was never released"))
}

/// Generate a suite of scheduler-generic tests.
///
/// `$name` is the registry name of the policy under test. Every test builds
/// a feasible task set so the policy is expected to meet all deadlines.
/// Multi-task sets carry rate-monotonic `priority` fields for policies that
/// read them.
///
/// Usage:
/// ```ignore
/// mod common;
/// common::scheduler_tests!("EDF");
/// ```
#[macro_export]
macro_rules! scheduler_tests {
    ($name:expr) => {
        /// Smoke test: single task on a single processor runs every job.
        #[test]
        fn test_single_task_single_cpu() {
            common::setup_test();
            let scenario = Scenario::builder()
                .cycles_per_ms(1_000)
                .processors(1)
                .task(TaskDef::periodic(1, "T1", 10.0, 4.0))
                .scheduler($name)
                .duration_ms(50.0)
                .build()
                .unwrap();

            let result = simulate(&scenario).unwrap();
            result.trace.dump();

            assert!(result.is_normal());
            for n in 1..=5 {
                let job = common::job(&result, &format!("T1_{n}"));
                let release = (n as u64 - 1) * 10_000;
                assert_eq!(job.start_date, Some(release));
                assert_eq!(job.end_date, Some(release + 4_000));
            }
            assert_eq!(result.total_deadline_misses(), 0);
        }

        /// Feasible set on one processor: nobody misses.
        #[test]
        fn test_feasible_set_single_cpu() {
            common::setup_test();
            let scenario = Scenario::builder()
                .cycles_per_ms(1_000)
                .processors(1)
                .task(
                    TaskDef::periodic(1, "T1", 10.0, 2.0)
                        .with_data("priority", serde_json::json!(3)),
                )
                .task(
                    TaskDef::periodic(2, "T2", 20.0, 5.0)
                        .with_data("priority", serde_json::json!(2)),
                )
                .task(
                    TaskDef::periodic(3, "T3", 40.0, 8.0)
                        .with_data("priority", serde_json::json!(1)),
                )
                .scheduler($name)
                .duration_ms(200.0)
                .build()
                .unwrap();

            let result = simulate(&scenario).unwrap();

            assert!(result.is_normal());
            assert_eq!(result.total_deadline_misses(), 0);
            assert_eq!(result.trace.deadline_miss_count(), 0);
            assert!(result.trace.verify_mutual_exclusion().is_ok());
        }

        /// Determinism: same scenario should produce identical traces.
        #[test]
        fn test_determinism() {
            common::setup_test();
            let make_scenario = || {
                Scenario::builder()
                    .cycles_per_ms(1_000)
                    .processor(ProcessorDef::new(1, "P1").with_overheads(50, 70, 0))
                    .task(TaskDef::periodic(1, "T1", 7.0, 2.0))
                    .task(TaskDef::periodic(2, "T2", 11.0, 3.0))
                    .scheduler_def(SchedulerDef::new($name).with_overheads(20, 10, 10))
                    .duration_ms(80.0)
                    .build()
                    .unwrap()
            };

            let r1 = simulate(&make_scenario()).unwrap();
            let r2 = simulate(&make_scenario()).unwrap();

            assert_eq!(
                r1.trace.events().len(),
                r2.trace.events().len(),
                "traces have different lengths"
            );
            for (i, (e1, e2)) in r1
                .trace
                .events()
                .iter()
                .zip(r2.trace.events())
                .enumerate()
            {
                assert_eq!(e1, e2, "event {i} differs");
            }
            assert_eq!(r1.jobs, r2.jobs);
        }

        /// Overheads delay jobs but never break mutual exclusion.
        #[test]
        fn test_overheads_keep_exclusion() {
            common::setup_test();
            let scenario = Scenario::builder()
                .cycles_per_ms(1_000)
                .processor(ProcessorDef::new(1, "P1").with_overheads(30, 40, 0))
                .task(TaskDef::periodic(1, "T1", 5.0, 1.0))
                .task(TaskDef::periodic(2, "T2", 8.0, 2.0))
                .scheduler_def(SchedulerDef::new($name).with_overheads(25, 15, 15))
                .duration_ms(100.0)
                .build()
                .unwrap();

            let result = simulate(&scenario).unwrap();

            assert!(result.is_normal());
            assert!(result.trace.verify_mutual_exclusion().is_ok());
            let first = common::job(&result, "T1_1");
            let end = first.end_date.expect("T1_1 never finished");
            assert!(end > 1_000, "overheads were not charged: T1_1 ended at {end}");
        }
    };
}
