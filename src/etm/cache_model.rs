//! Shared-cache interference model.
//!
//! A job's speed is expressed in instructions: its task executes `n_instr`
//! instructions at a CPI that depends on the miss rate of every cache level
//! it uses. Each shared cache is split between the jobs executing on the
//! processors attached to it, in proportion to `mix / cpi_alone`, their
//! memory intensity when running alone. A job's miss rate at a level is read
//! from its cumulative stack-distance profile at the capacity it receives.
//!
//! Instructions are integrated every time the set of executing jobs changes,
//! using the CPI that was valid over the elapsed interval.

use std::collections::HashMap;

use tracing::trace;

use super::{speed_of, ExecutionTimeModel, ProgressLedger};
use crate::cache::{capacity_miss_lru, LruOccupancy};
use crate::engine::World;
use crate::types::{whole_cycles, CacheId, Cycles, JobId, ProcId, TaskId};

/// CPI of an instruction mix given per-level miss rates.
///
/// `penalties[0]` is the processor's base memory-access penalty, paid by
/// every memory access. `penalties[i + 1]` is the extra cost of a miss at
/// level `i`, whose miss rate is `miss_rates[i]`.
pub fn calc_cpi(base_cpi: f64, mix: f64, miss_rates: &[f64], penalties: &[f64]) -> f64 {
    let Some((base, levels)) = penalties.split_first() else {
        return base_cpi;
    };
    let per_access = base
        + levels
            .iter()
            .zip(miss_rates)
            .map(|(p, mr)| p * mr)
            .sum::<f64>();
    base_cpi + mix * per_access
}

#[derive(Debug, Default)]
pub struct CacheModel {
    /// CPI of a task running alone on a processor, with every cache to
    /// itself.
    cpi_alone: HashMap<(TaskId, ProcId), f64>,
    /// Jobs executing right now.
    running: Vec<JobId>,
    instructions: HashMap<JobId, f64>,
    last_update: Cycles,
    /// Preemption costs accrued by each job.
    penalty: HashMap<JobId, Cycles>,
    /// Part of the accrued penalty not yet paid. An executing job pays it
    /// before executing instructions.
    stall: HashMap<JobId, Cycles>,
    last_on: HashMap<ProcId, JobId>,
    was_on: HashMap<JobId, ProcId>,
    occupancy: HashMap<CacheId, LruOccupancy>,
    progress: ProgressLedger,
}

impl CacheModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn penalties(world: &World, cpu: ProcId) -> Vec<f64> {
        let proc = &world.procs[cpu.index()];
        std::iter::once(proc.penalty)
            .chain(proc.caches.iter().map(|c| world.caches[c.index()].penalty))
            .collect()
    }

    fn miss_rate(world: &World, task: TaskId, size: f64) -> f64 {
        match &world.tasks[task.index()].csdp {
            Some(csdp) => capacity_miss_lru(csdp, size),
            None => 0.0,
        }
    }

    fn compute_cpi_alone(world: &World, task: TaskId, cpu: ProcId) -> f64 {
        let def = &world.tasks[task.index()].def;
        let proc = &world.procs[cpu.index()];
        let miss_rates: Vec<f64> = proc
            .caches
            .iter()
            .map(|c| Self::miss_rate(world, task, world.caches[c.index()].size as f64))
            .collect();
        calc_cpi(def.base_cpi, def.mix, &miss_rates, &Self::penalties(world, cpu))
    }

    /// CPI of `task` alone on `cpu`, as computed at init.
    pub fn cpi_alone(&self, task: TaskId, cpu: ProcId) -> Option<f64> {
        self.cpi_alone.get(&(task, cpu)).copied()
    }

    fn cpu_of(world: &World, job: JobId) -> ProcId {
        let j = &world.jobs[job.index()];
        j.executing_on()
            .or(j.last_cpu)
            .unwrap_or(world.tasks[j.task.index()].cpu)
    }

    /// Memory intensity of `job` on `cpu`.
    fn intensity(&self, world: &World, job: JobId, cpu: ProcId) -> f64 {
        let task = world.jobs[job.index()].task;
        let mix = world.tasks[task.index()].def.mix;
        match self.cpi_alone(task, cpu) {
            Some(cpi) if cpi > 0.0 => mix / cpi,
            _ => 0.0,
        }
    }

    /// Effective capacity of each cache of `cpu` for `job`, shared with the
    /// executing jobs.
    pub fn cache_sizes(&self, world: &World, job: JobId, cpu: ProcId) -> Vec<f64> {
        let own = self.intensity(world, job, cpu);
        world.procs[cpu.index()]
            .caches
            .iter()
            .map(|c| {
                let cache = &world.caches[c.index()];
                let mut total = 0.0;
                let mut counted_self = false;
                for other in &self.running {
                    let other_cpu = Self::cpu_of(world, *other);
                    if cache.shared_with.contains(&other_cpu) {
                        total += self.intensity(world, *other, other_cpu);
                        counted_self |= *other == job;
                    }
                }
                if !counted_self {
                    total += own;
                }
                if total > 0.0 {
                    cache.size as f64 * own / total
                } else {
                    cache.size as f64
                }
            })
            .collect()
    }

    /// CPI of `job` given the jobs executing right now.
    pub fn current_cpi(&self, world: &World, job: JobId) -> f64 {
        let cpu = Self::cpu_of(world, job);
        let task = world.jobs[job.index()].task;
        let def = &world.tasks[task.index()].def;
        let miss_rates: Vec<f64> = self
            .cache_sizes(world, job, cpu)
            .into_iter()
            .map(|size| Self::miss_rate(world, task, size))
            .collect();
        calc_cpi(def.base_cpi, def.mix, &miss_rates, &Self::penalties(world, cpu))
    }

    /// Cycles elapsed since the last integration, split into stall paid and
    /// cycles spent executing instructions.
    fn elapsed(&self, world: &World, job: JobId) -> (Cycles, Cycles) {
        if !self.running.contains(&job) {
            return (0, 0);
        }
        let elapsed = world.now - self.last_update;
        let stalled = self.stall.get(&job).copied().unwrap_or(0).min(elapsed);
        (stalled, elapsed - stalled)
    }

    /// Instructions `job` executed since the last integration.
    fn pending_instructions(&self, world: &World, job: JobId) -> f64 {
        let (_, busy) = self.elapsed(world, job);
        if busy == 0 {
            return 0.0;
        }
        let elapsed = busy as f64 * speed_of(world, job);
        let cpi = self.current_cpi(world, job);
        if cpi > 0.0 {
            elapsed / cpi
        } else {
            0.0
        }
    }

    /// Instructions executed by `job` so far.
    pub fn instructions(&self, world: &World, job: JobId) -> f64 {
        self.instructions.get(&job).copied().unwrap_or(0.0) + self.pending_instructions(world, job)
    }

    /// LRU occupancy of `cache`.
    pub fn occupancy(&self, cache: CacheId) -> Option<&LruOccupancy> {
        self.occupancy.get(&cache)
    }

    /// Penalty cycles `job` still has to pay.
    pub fn pending_stall(&self, world: &World, job: JobId) -> Cycles {
        let (stalled, _) = self.elapsed(world, job);
        self.stall.get(&job).copied().unwrap_or(0) - stalled
    }

    /// Total preemption penalty accrued by `job`.
    pub fn penalty(&self, job: JobId) -> Cycles {
        self.penalty.get(&job).copied().unwrap_or(0)
    }

    fn update_instructions(&mut self, world: &World) {
        let mut done = Vec::with_capacity(self.running.len());
        for job in &self.running {
            let (stalled, _) = self.elapsed(world, *job);
            done.push((*job, stalled, self.pending_instructions(world, *job)));
        }
        for (job, stalled, instr) in done {
            *self.instructions.entry(job).or_default() += instr;
            if let Some(stall) = self.stall.get_mut(&job) {
                *stall -= stalled;
            }
        }

        let mut sizes = Vec::new();
        for job in &self.running {
            let cpu = Self::cpu_of(world, *job);
            let task = world.jobs[job.index()].task;
            for (cache, size) in world.procs[cpu.index()]
                .caches
                .iter()
                .zip(self.cache_sizes(world, *job, cpu))
            {
                sizes.push((*cache, task, size));
            }
        }
        for (cache, task, size) in sizes {
            let capacity = world.caches[cache.index()].size;
            self.occupancy
                .entry(cache)
                .or_insert_with(|| LruOccupancy::new(capacity))
                .update(task, (size + 0.5) as u64);
        }
        self.last_update = world.now;
    }

    fn stop_job(&mut self, world: &World, job: JobId) {
        self.progress.stop(world, job);
        self.update_instructions(world);
        self.running.retain(|j| *j != job);
    }
}

impl ExecutionTimeModel for CacheModel {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn init(&mut self, world: &World) {
        self.last_update = world.now;
        for task in &world.tasks {
            for proc in &world.procs {
                let cpi = Self::compute_cpi_alone(world, task.id, proc.id);
                trace!(task = task.name(), cpu = proc.id.0, cpi, "CPI_ALONE");
                self.cpi_alone.insert((task.id, proc.id), cpi);
            }
        }
    }

    fn on_activate(&mut self, _world: &World, job: JobId) {
        self.progress.activate(job);
        self.penalty.insert(job, 0);
        self.stall.insert(job, 0);
        self.instructions.insert(job, 0.0);
    }

    fn on_execute(&mut self, world: &World, job: JobId) {
        self.progress.start(world, job);
        let task = world.jobs[job.index()].task;
        let cost = world.tasks[task.index()].def.preemption_cost;
        if let Some(cpu) = world.jobs[job.index()].last_cpu {
            if let Some(prev) = self.was_on.get(&job) {
                if *prev != cpu || self.last_on.get(&cpu) != Some(&job) {
                    *self.penalty.entry(job).or_default() += cost;
                    *self.stall.entry(job).or_default() += cost;
                }
            }
            self.last_on.insert(cpu, job);
            self.was_on.insert(job, cpu);
        }

        self.update_instructions(world);
        self.running.push(job);
    }

    fn on_preempted(&mut self, world: &World, job: JobId) {
        self.stop_job(world, job);
    }

    fn on_terminated(&mut self, world: &World, job: JobId) {
        self.stop_job(world, job);
    }

    fn on_abort(&mut self, world: &World, job: JobId) {
        self.stop_job(world, job);
    }

    fn get_executed(&self, world: &World, job: JobId) -> f64 {
        self.progress.executed(world, job)
    }

    fn get_ret(&self, world: &World, job: JobId) -> Cycles {
        let task = world.jobs[job.index()].task;
        let n_instr = world.tasks[task.index()].def.n_instr as f64;
        let remaining = n_instr - self.instructions(world, job);
        let mut cycles = remaining * self.current_cpi(world, job);
        let speed = speed_of(world, job);
        if speed > 0.0 {
            cycles /= speed;
        }
        whole_cycles(cycles) + self.pending_stall(world, job)
    }

    fn update(&mut self, world: &World) {
        self.update_instructions(world);
        self.progress.flush(world);
    }

    fn occupied_lines(&self, cache: CacheId, task: TaskId) -> Option<u64> {
        self.occupancy.get(&cache).map(|o| o.lines(task))
    }

    fn progress_is_shared(&self) -> bool {
        true
    }
}
