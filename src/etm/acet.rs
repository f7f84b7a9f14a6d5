//! Execution times drawn from a normal distribution around the ACET.
//!
//! Each job samples its execution time once, at activation, from
//! `N(acet, et_stddev)` capped at the WCET. The generator is seeded from the
//! scenario so that two runs of the same scenario see the same job sizes.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, warn};

use super::{wall_cycles, ExecutionTimeModel, ProgressLedger};
use crate::engine::World;
use crate::types::{Cycles, JobId};

pub struct Acet {
    rng: SmallRng,
    /// Sampled execution time of each job, in cycles.
    et: HashMap<JobId, f64>,
    progress: ProgressLedger,
}

impl Acet {
    pub fn new(seed: u64) -> Self {
        Acet {
            rng: SmallRng::seed_from_u64(seed),
            et: HashMap::new(),
            progress: ProgressLedger::default(),
        }
    }

    /// Draw from `N(mean, stddev)`, in milliseconds.
    fn sample(&mut self, mean: f64, stddev: f64) -> f64 {
        match Normal::new(mean, stddev) {
            Ok(normal) => normal.sample(&mut self.rng),
            Err(e) => {
                warn!(mean, stddev, %e, "bad execution time distribution, using the mean");
                mean
            }
        }
    }

    /// Sampled execution time of `job`, in cycles.
    pub fn execution_time(&self, job: JobId) -> Option<f64> {
        self.et.get(&job).copied()
    }
}

impl ExecutionTimeModel for Acet {
    fn name(&self) -> &'static str {
        "acet"
    }

    fn on_activate(&mut self, world: &World, job: JobId) {
        self.progress.activate(job);
        let task = &world.tasks[world.jobs[job.index()].task.index()];
        let sample = self.sample(task.def.acet, task.def.et_stddev);
        let ms = sample.min(task.def.wcet).max(0.0);
        let et = ms * world.cycles_per_ms as f64;
        debug!(job = %world.jobs[job.index()].name, et, "SAMPLED");
        self.et.insert(job, et);
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
        let et = self.et.get(&job).copied().unwrap_or(0.0);
        wall_cycles(world, job, et - self.get_executed(world, job))
    }

    fn update(&mut self, world: &World) {
        self.progress.flush(world);
    }
}
