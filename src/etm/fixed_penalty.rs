//! WCET plus a fixed cost per preemption and per migration.
//!
//! A job resuming on the processor it last ran on pays the preemption
//! penalty if another job ran there in between. A job resuming elsewhere
//! pays the migration penalty.

use std::collections::HashMap;

use super::{wall_cycles, ExecutionTimeModel, ProgressLedger};
use crate::engine::World;
use crate::types::{Cycles, JobId, ProcId};

pub struct FixedPenalty {
    penalty_preemption: Cycles,
    penalty_migration: Cycles,
    /// Last job started on each processor.
    last_on: HashMap<ProcId, JobId>,
    /// Processor each job last started on.
    was_on: HashMap<JobId, ProcId>,
    penalty: HashMap<JobId, Cycles>,
    progress: ProgressLedger,
}

impl FixedPenalty {
    pub fn new(penalty_preemption: Cycles, penalty_migration: Cycles) -> Self {
        FixedPenalty {
            penalty_preemption,
            penalty_migration,
            last_on: HashMap::new(),
            was_on: HashMap::new(),
            penalty: HashMap::new(),
            progress: ProgressLedger::default(),
        }
    }

    /// Penalty accrued by `job` so far.
    pub fn penalty(&self, job: JobId) -> Cycles {
        self.penalty.get(&job).copied().unwrap_or(0)
    }
}

impl ExecutionTimeModel for FixedPenalty {
    fn name(&self) -> &'static str {
        "fixedpenalty"
    }

    fn on_activate(&mut self, _world: &World, job: JobId) {
        self.progress.activate(job);
        self.penalty.insert(job, 0);
    }

    fn on_execute(&mut self, world: &World, job: JobId) {
        self.progress.start(world, job);
        let Some(cpu) = world.jobs[job.index()].last_cpu else {
            return;
        };
        if let Some(prev) = self.was_on.get(&job) {
            let extra = if *prev != cpu {
                self.penalty_migration
            } else if self.last_on.get(&cpu) != Some(&job) {
                self.penalty_preemption
            } else {
                0
            };
            *self.penalty.entry(job).or_default() += extra;
        }
        self.last_on.insert(cpu, job);
        self.was_on.insert(job, cpu);
    }

    fn on_preempted(&mut self, world: &World, job: JobId) {
        self.progress.stop(world, job);
    }

    fn on_terminated(&mut self, world: &World, job: JobId) {
        self.progress.stop(world, job);
    }

    fn on_abort(&mut self, world: &World, job: JobId) {
        self.progress.stop(world, job);
    }

    fn get_executed(&self, world: &World, job: JobId) -> f64 {
        self.progress.executed(world, job)
    }

    fn get_ret(&self, world: &World, job: JobId) -> Cycles {
        let task = world.jobs[job.index()].task;
        let wcet = world.tasks[task.index()].wcet_cycles as f64;
        wall_cycles(
            world,
            job,
            wcet + self.penalty(job) as f64 - self.get_executed(world, job),
        )
    }

    fn update(&mut self, world: &World) {
        self.progress.flush(world);
    }
}
