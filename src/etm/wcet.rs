//! Every job runs for exactly its task's WCET.

use super::{wall_cycles, ExecutionTimeModel, ProgressLedger};
use crate::engine::World;
use crate::types::{Cycles, JobId};

#[derive(Debug, Default)]
pub struct Wcet {
    progress: ProgressLedger,
}

impl Wcet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionTimeModel for Wcet {
    fn name(&self) -> &'static str {
        "wcet"
    }

    fn on_activate(&mut self, _world: &World, job: JobId) {
        self.progress.activate(job);
    }

    fn on_execute(&mut self, world: &World, job: JobId) {
        self.progress.start(world, job);
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
        wall_cycles(world, job, wcet - self.get_executed(world, job))
    }

    fn update(&mut self, world: &World) {
        self.progress.flush(world);
    }
}
