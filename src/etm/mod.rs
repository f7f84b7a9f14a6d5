//! Execution time models.
//!
//! An execution time model decides how much work a job still has to do. The
//! engine notifies it of every life-cycle transition and asks it for the
//! remaining cycles each time a job starts or resumes executing.

pub mod acet;
pub mod cache_model;
pub mod fixed_penalty;
pub mod wcet;

use std::collections::HashMap;

pub use acet::Acet;
pub use cache_model::CacheModel;
pub use fixed_penalty::FixedPenalty;
pub use wcet::Wcet;

use crate::engine::World;
use crate::scenario::{EtmKind, Scenario};
use crate::types::{whole_cycles, CacheId, Cycles, JobId, TaskId};

pub trait ExecutionTimeModel {
    fn name(&self) -> &'static str;

    /// Called once, after tasks and processors exist.
    fn init(&mut self, _world: &World) {}

    fn on_activate(&mut self, world: &World, job: JobId);

    fn on_execute(&mut self, world: &World, job: JobId);

    fn on_preempted(&mut self, world: &World, job: JobId);

    fn on_terminated(&mut self, world: &World, job: JobId);

    fn on_abort(&mut self, world: &World, job: JobId);

    /// Cycles of work done so far, scaled by processor speed.
    fn get_executed(&self, world: &World, job: JobId) -> f64;

    /// Remaining cycles before `job` completes, as of `world.now`.
    fn get_ret(&self, world: &World, job: JobId) -> Cycles;

    /// Close any open accounting at the end of the run.
    fn update(&mut self, _world: &World) {}

    /// Whether a job's progress rate depends on the other executing jobs.
    /// The engine then re-queries every executing job whenever one starts
    /// or stops.
    fn progress_is_shared(&self) -> bool {
        false
    }

    /// Lines of `cache` currently held by `task`, for models that track
    /// occupancy.
    fn occupied_lines(&self, _cache: CacheId, _task: TaskId) -> Option<u64> {
        None
    }
}

/// Instantiate the model selected by the scenario.
pub fn build(kind: EtmKind, scenario: &Scenario) -> Box<dyn ExecutionTimeModel> {
    match kind {
        EtmKind::Wcet => Box::new(Wcet::new()),
        EtmKind::Acet => Box::new(Acet::new(scenario.resolved_seed())),
        EtmKind::FixedPenalty => Box::new(FixedPenalty::new(
            scenario.penalty_preemption,
            scenario.penalty_migration,
        )),
        EtmKind::Cache => Box::new(CacheModel::new()),
    }
}

/// Speed of the processor `job` last executed on.
pub(crate) fn speed_of(world: &World, job: JobId) -> f64 {
    match world.jobs[job.index()].last_cpu {
        Some(cpu) => world.procs[cpu.index()].speed,
        None => 1.0,
    }
}

/// Wall cycles needed to perform `work` speed-1 cycles on the processor
/// `job` last executed on. A stopped processor is treated as speed 1.
pub(crate) fn wall_cycles(world: &World, job: JobId, work: f64) -> Cycles {
    let speed = speed_of(world, job);
    if speed > 0.0 {
        whole_cycles(work / speed)
    } else {
        whole_cycles(work)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    executed: f64,
    /// Start of the open execution interval.
    since: Option<Cycles>,
}

/// Speed-scaled executed cycles of every job.
#[derive(Debug, Default)]
pub(crate) struct ProgressLedger {
    jobs: HashMap<JobId, Progress>,
}

impl ProgressLedger {
    pub(crate) fn activate(&mut self, job: JobId) {
        self.jobs.insert(job, Progress::default());
    }

    pub(crate) fn start(&mut self, world: &World, job: JobId) {
        self.jobs.entry(job).or_default().since = Some(world.now);
    }

    /// Close the open interval of `job`, if any.
    pub(crate) fn stop(&mut self, world: &World, job: JobId) {
        let speed = speed_of(world, job);
        let p = self.jobs.entry(job).or_default();
        if let Some(since) = p.since.take() {
            p.executed += (world.now - since) as f64 * speed;
        }
    }

    pub(crate) fn executed(&self, world: &World, job: JobId) -> f64 {
        let Some(p) = self.jobs.get(&job) else {
            return 0.0;
        };
        match p.since {
            Some(since) => p.executed + (world.now - since) as f64 * speed_of(world, job),
            None => p.executed,
        }
    }

    pub(crate) fn flush(&mut self, world: &World) {
        let open: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, p)| p.since.is_some())
            .map(|(j, _)| *j)
            .collect();
        for job in open {
            self.stop(world, job);
        }
    }
}
