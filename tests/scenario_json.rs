use std::fs;

use rtsim::*;

mod common;

const CACHE_SCENARIO: &str = r#"{
    "duration": 20000,
    "cycles_per_ms": 1000,
    "etm": "cache",
    "memory_access_time": 100,
    "caches": [{"id": 1, "name": "L2", "size": 1000, "access_time": 10}],
    "processors": [{"id": 1, "name": "P1", "caches": [1]}],
    "tasks": [{
        "id": 1,
        "name": "A",
        "period": 100,
        "deadline": 100,
        "wcet": 50,
        "n_instr": 1000,
        "mix": 0.5,
        "base_cpi": 1.0,
        "stack_file": "a.stack"
    }],
    "scheduler": {"name": "EDF"}
}"#;

/// A scenario file with a profile stored next to it.
#[test]
fn test_load_with_relative_stack_file() {
    common::setup_test();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.stack"), "600 1.0\n\n").unwrap();
    let path = dir.path().join("scenario.json");
    fs::write(&path, CACHE_SCENARIO).unwrap();

    let scenario = Scenario::from_json_file(&path).unwrap();
    assert_eq!(
        scenario.tasks[0].stack_file.as_deref(),
        Some(dir.path().join("a.stack").as_path())
    );
    assert_eq!(scenario.etm, EtmKind::Cache);
    assert_eq!(scenario.processors[0].speed, 1.0);

    let result = simulate(&scenario).unwrap();
    assert!(result.is_normal());
    assert_eq!(common::job(&result, "A_1").end_date, Some(6_000));
}

#[test]
fn test_missing_stack_file() {
    common::setup_test();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.json");
    fs::write(&path, CACHE_SCENARIO).unwrap();

    let scenario = Scenario::from_json_file(&path).unwrap();
    let err = simulate(&scenario).err().expect("model built without a profile");
    assert!(matches!(
        err,
        ModelError::Scenario(ScenarioError::Io { .. })
    ));
}

#[test]
fn test_missing_scenario_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Scenario::from_json_file(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ScenarioError::Io { .. }));
}

#[test]
fn test_malformed_json() {
    let err = Scenario::from_json_str("{\"tasks\": [").unwrap_err();
    assert!(matches!(err, ScenarioError::Json(_)));
}

/// Written out and read back, a scenario simulates the same way.
#[test]
fn test_json_roundtrip_simulates_identically() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(2)
        .task(TaskDef::periodic(1, "T1", 5.0, 2.0))
        .task(TaskDef::sporadic(2, "S", vec![1.0, 7.5], 3.0, 1.0))
        .scheduler("RM")
        .duration_ms(20.0)
        .build()
        .unwrap();

    let json = scenario.to_json_string().unwrap();
    let reloaded = Scenario::from_json_str(&json).unwrap();
    assert_eq!(reloaded, scenario);

    let a = simulate(&scenario).unwrap();
    let b = simulate(&reloaded).unwrap();
    assert_eq!(a.jobs, b.jobs);
    assert!(b.trace.verify_mutual_exclusion().is_ok());
}

#[test]
fn test_unknown_scheduler() {
    common::setup_test();
    let scenario = Scenario::builder()
        .processors(1)
        .task(TaskDef::periodic(1, "T1", 10.0, 1.0))
        .scheduler("LLF")
        .build()
        .unwrap();

    let err = simulate(&scenario).err().expect("unknown scheduler accepted");
    assert!(matches!(
        err,
        ModelError::Scheduler(SchedulerError::Unknown(ref name)) if name == "LLF"
    ));
}

#[test]
fn test_unknown_followed_by_rejected() {
    let json = r#"{
        "processors": [{"id": 1, "name": "P1"}],
        "tasks": [{"id": 1, "name": "A", "period": 10, "deadline": 10, "wcet": 1, "followed_by": 9}],
        "scheduler": {"name": "EDF"}
    }"#;
    let err = Scenario::from_json_str(json).unwrap_err();
    assert!(matches!(err, ScenarioError::InvalidValue(ref msg) if msg.contains("followed_by")));
}

#[test]
fn test_invalid_values_rejected() {
    let base = || {
        Scenario::builder()
            .processors(1)
            .task(TaskDef::periodic(1, "T1", 10.0, 1.0))
            .scheduler("EDF")
    };

    assert!(base().task(TaskDef::periodic(1, "T2", 10.0, 1.0)).build().is_err());
    assert!(base().task(TaskDef::periodic(2, "2bad", 10.0, 1.0)).build().is_err());
    assert!(base().task(TaskDef::periodic(2, "T2", 0.0, 1.0)).build().is_err());
    assert!(base()
        .processor(ProcessorDef::new(7, "Slow").with_speed(-1.0))
        .build()
        .is_err());
    assert!(base()
        .processor(ProcessorDef::new(7, "P").with_caches(vec![3]))
        .build()
        .is_err());
    assert!(base().cycles_per_ms(0).build().is_err());
    assert!(base().etm(EtmKind::Cache).build().is_err());
}

#[test]
fn test_etm_names() {
    assert_eq!("WCET".parse::<EtmKind>().unwrap(), EtmKind::Wcet);
    assert_eq!("fixedpenalty".parse::<EtmKind>().unwrap(), EtmKind::FixedPenalty);
    assert!(matches!(
        "lru".parse::<EtmKind>(),
        Err(ScenarioError::UnknownEtm(_))
    ));
}

#[test]
fn test_sub_cycle_period_rejected() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(1)
        .task(TaskDef::periodic(1, "T1", 0.0001, 0.0001))
        .scheduler("EDF")
        .duration_ms(1.0)
        .build()
        .unwrap();

    let err = simulate(&scenario).err().expect("sub-cycle period accepted");
    assert!(matches!(
        err,
        ModelError::Scenario(ScenarioError::InvalidValue(ref msg)) if msg.contains("shorter than a cycle")
    ));
}
