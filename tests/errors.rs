use rtsim::schedulers::EdfMono;
use rtsim::*;

mod common;

/// Runs its single job wherever `schedule` is called, stealing it from the
/// processor it already runs on without clearing that assignment.
#[derive(Default)]
struct Cloner {
    job: Option<JobId>,
}

impl Scheduler for Cloner {
    fn on_activate(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        self.job = Some(job);
        ctx.resched(ProcId(0));
        ctx.resched(ProcId(1));
    }

    fn on_terminated(&mut self, _ctx: &mut SchedContext<'_>, _job: JobId) {
        self.job = None;
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>, cpu: ProcId) -> Vec<Decision> {
        let Some(job) = self.job else {
            return Vec::new();
        };
        if ctx.running(cpu) == Some(job) {
            return Vec::new();
        }
        // Pointing the task here hides the other assignment from the
        // preemption of its home processor.
        let task = ctx.task_of(job).id;
        ctx.set_task_cpu(task, cpu);
        vec![Decision::run(job, cpu)]
    }
}

/// Uniprocessor EDF that also keeps handing out the last finished job.
#[derive(Default)]
struct Stale {
    inner: EdfMono,
    finished: Option<JobId>,
}

impl Scheduler for Stale {
    fn on_activate(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        self.inner.on_activate(ctx, job);
    }

    fn on_terminated(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        self.finished = Some(job);
        self.inner.on_terminated(ctx, job);
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>, cpu: ProcId) -> Vec<Decision> {
        let mut decisions: Vec<Decision> = self
            .finished
            .map(|job| Decision::run(job, cpu))
            .into_iter()
            .collect();
        decisions.extend(self.inner.schedule(ctx, cpu));
        decisions
    }
}

fn new_cloner(_def: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
    Ok(Box::new(Cloner::default()))
}

fn new_stale(_def: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
    Ok(Box::new(Stale::default()))
}

fn registry() -> SchedulerRegistry {
    let mut reg = SchedulerRegistry::new();
    reg.register(
        SchedulerInfo {
            name: "CLONER",
            display_name: "Double assignment",
            required_task_fields: Vec::new(),
        },
        new_cloner,
    );
    reg.register(
        SchedulerInfo {
            name: "STALE",
            display_name: "Stale decisions",
            required_task_fields: Vec::new(),
        },
        new_stale,
    );
    reg
}

/// A job left assigned to two processors stops the run.
#[test]
fn test_double_assignment_is_fatal() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(2)
        .task(TaskDef::periodic(1, "T1", 10.0, 4.0))
        .scheduler("CLONER")
        .duration_ms(20.0)
        .build()
        .unwrap();

    let result = Model::new(&scenario, &registry()).unwrap().run();
    result.trace.dump();

    assert_eq!(
        result.exit,
        ExitKind::Fatal(SimError::DoubleAssignment {
            job: JobId(0),
            cpus: vec![ProcId(0), ProcId(1)],
        })
    );
    assert!(!result.is_normal());
    let aborted: Vec<_> = result
        .trace
        .events()
        .iter()
        .filter(|e| matches!(e.kind, TraceKind::SimulationAborted { .. }))
        .collect();
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0].time, 0);
    assert_eq!(result.end_time, 0);
    // Nothing past the fatal instant was released.
    assert!(result.job("T1_2").is_none());
}

/// Decisions naming finished jobs are dropped and the run goes on.
#[test]
fn test_inactive_decisions_rejected() {
    common::setup_test();
    let scenario = Scenario::builder()
        .cycles_per_ms(1_000)
        .processors(1)
        .task(TaskDef::periodic(1, "T1", 10.0, 2.0))
        .task(TaskDef::periodic(2, "T2", 10.0, 3.0).with_activation_date(1.0))
        .scheduler("STALE")
        .duration_ms(50.0)
        .build()
        .unwrap();

    let result = Model::new(&scenario, &registry()).unwrap().run();

    assert!(result.is_normal());
    assert_eq!(result.total_deadline_misses(), 0);
    assert!(result.trace.verify_mutual_exclusion().is_ok());

    let rejected: Vec<(Cycles, JobId)> = result
        .trace
        .events()
        .iter()
        .filter_map(|e| match e.kind {
            TraceKind::DecisionRejected { job, .. } => Some((e.time, job)),
            _ => None,
        })
        .collect();
    assert!(!rejected.is_empty());
    for (time, job) in &rejected {
        let outcome = result.jobs.iter().find(|j| j.job == *job).unwrap();
        let end = outcome.end_date.expect("rejected job never finished");
        assert!(end <= *time, "{} rejected at {time} before it ended", outcome.name);
    }

    // Every job still runs to completion in its own window.
    for n in 1..=5 {
        let release = (n as u64 - 1) * 10_000;
        let t1 = common::job(&result, &format!("T1_{n}"));
        assert_eq!(t1.end_date, Some(release + 2_000));
        let t2 = common::job(&result, &format!("T2_{n}"));
        assert_eq!(t2.end_date, Some(release + 5_000));
    }
}
