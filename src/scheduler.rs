//! Scheduler contract.
//!
//! A scheduling policy implements [`Scheduler`]. The engine calls it from a
//! processor's event loop: `on_activate` / `on_terminated` for job life-cycle
//! notifications, and `schedule` when the processor handles a `Resched`
//! event while holding the scheduler lock. Policies see and act on the
//! simulation only through [`SchedContext`].

use std::collections::BTreeMap;
use std::fmt;

use crate::engine::{SimError, World};
use crate::etm::ExecutionTimeModel;
use crate::job::Job;
use crate::processor::{ProcEvent, Processor};
use crate::scenario::{SchedulerDef, TaskDef};
use crate::task::Task;
use crate::timer::TimerSpec;
use crate::types::{Cycles, JobId, ProcId, TaskId, TimerId};

/// Errors raised while resolving or initializing a scheduler. The simulation
/// does not start.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// No scheduler registered under this name.
    Unknown(String),
    /// A task lacks a field the scheduler requires and that has no default.
    MissingField { task: String, field: String },
    /// A partitioned scheduler could not place a task on any processor.
    PackingFailed { task: String },
    /// A scheduler option has an unsupported value.
    InvalidOption { option: String, value: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Unknown(name) => write!(f, "unknown scheduler: {name:?}"),
            SchedulerError::MissingField { task, field } => {
                write!(f, "task {task:?} lacks required field {field:?}")
            }
            SchedulerError::PackingFailed { task } => {
                write!(f, "task {task:?} does not fit on any processor")
            }
            SchedulerError::InvalidOption { option, value } => {
                write!(f, "invalid value {value} for scheduler option {option:?}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Assign `job` to `cpu`, or clear `cpu` when `job` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub job: Option<JobId>,
    pub cpu: ProcId,
}

impl Decision {
    pub fn run(job: JobId, cpu: ProcId) -> Self {
        Decision { job: Some(job), cpu }
    }

    pub fn idle(cpu: ProcId) -> Self {
        Decision { job: None, cpu }
    }
}

/// Global lock serializing `schedule` calls across processors.
#[derive(Debug, Default)]
pub struct SchedLock {
    held: bool,
}

impl SchedLock {
    pub fn try_acquire(&mut self) -> bool {
        if self.held {
            return false;
        }
        self.held = true;
        true
    }

    pub fn release(&mut self) {
        self.held = false;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

/// A scheduling policy.
pub trait Scheduler {
    /// Called once all tasks and processors are registered, before the first
    /// event. An error prevents the simulation from starting.
    fn init(&mut self, _ctx: &mut SchedContext<'_>) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn add_task(&mut self, _task: TaskId) {}

    fn add_processor(&mut self, _cpu: ProcId) {}

    /// A job became ready. Must not block.
    fn on_activate(&mut self, ctx: &mut SchedContext<'_>, job: JobId);

    /// A job terminated or was aborted. Must not block.
    fn on_terminated(&mut self, ctx: &mut SchedContext<'_>, job: JobId);

    /// Produce the decisions to apply, on behalf of processor `cpu`.
    fn schedule(&mut self, ctx: &mut SchedContext<'_>, cpu: ProcId) -> Vec<Decision>;

    /// A timer created with [`TimerCallback::Scheduler`](crate::timer::TimerCallback::Scheduler)
    /// fired.
    fn on_timer(&mut self, _ctx: &mut SchedContext<'_>, _timer: TimerId, _cookie: u64) {}

    /// Try to take the scheduler lock. Returning false makes the processor
    /// wait until the lock is released.
    fn get_lock(&mut self, lock: &mut SchedLock) -> bool {
        lock.try_acquire()
    }

    fn release_lock(&mut self, lock: &mut SchedLock) {
        lock.release();
    }
}

/// The scheduler's view of the simulation.
pub struct SchedContext<'a> {
    world: &'a mut World,
    etm: &'a dyn ExecutionTimeModel,
}

impl<'a> SchedContext<'a> {
    pub(crate) fn new(world: &'a mut World, etm: &'a dyn ExecutionTimeModel) -> Self {
        SchedContext { world, etm }
    }

    pub fn now(&self) -> Cycles {
        self.world.now
    }

    pub fn now_ms(&self) -> f64 {
        self.world.now_ms()
    }

    pub fn cycles_per_ms(&self) -> u64 {
        self.world.cycles_per_ms
    }

    pub fn job(&self, job: JobId) -> &Job {
        &self.world.jobs[job.index()]
    }

    pub fn task(&self, task: TaskId) -> &Task {
        &self.world.tasks[task.index()]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.world.tasks
    }

    pub fn task_of(&self, job: JobId) -> &Task {
        self.task(self.job(job).task)
    }

    pub fn is_active(&self, job: JobId) -> bool {
        self.job(job).is_active()
    }

    pub fn processor(&self, cpu: ProcId) -> &Processor {
        &self.world.procs[cpu.index()]
    }

    pub fn processors(&self) -> &[Processor] {
        &self.world.procs
    }

    /// Job assigned to `cpu`.
    pub fn running(&self, cpu: ProcId) -> Option<JobId> {
        self.world.procs[cpu.index()].running
    }

    /// Queue a scheduling request on `cpu`. Repeated requests collapse.
    pub fn resched(&mut self, cpu: ProcId) {
        self.world.resched(cpu);
    }

    /// Attach `task` to `cpu`: its activations and terminations are
    /// notified there.
    pub fn set_task_cpu(&mut self, task: TaskId, cpu: ProcId) {
        self.world.tasks[task.index()].cpu = cpu;
    }

    pub fn create_timer(&mut self, spec: TimerSpec) -> Result<TimerId, SimError> {
        self.world.create_timer(spec)
    }

    pub fn start_timer(&mut self, timer: TimerId) {
        self.world.start_timer(timer);
    }

    pub fn stop_timer(&mut self, timer: TimerId) {
        self.world.stop_timer(timer);
    }

    /// Change the speed of `cpu`. Takes effect when the processor handles
    /// the request.
    pub fn set_speed(&mut self, cpu: ProcId, speed: f64) -> Result<(), SimError> {
        if !(speed >= 0.0) {
            return Err(SimError::InvalidSpeed { cpu, speed });
        }
        self.world.procs[cpu.index()]
            .events
            .push_back(ProcEvent::SetSpeed(speed));
        self.world.wake(cpu);
        Ok(())
    }

    /// Remaining execution of `job`, in cycles.
    pub fn ret(&self, job: JobId) -> Cycles {
        self.etm.get_ret(&*self.world, job)
    }

    /// Remaining execution of `job`, in milliseconds.
    pub fn ret_ms(&self, job: JobId) -> f64 {
        self.ret(job) as f64 / self.world.cycles_per_ms as f64
    }

    /// Cycles executed by `job` so far, scaled by processor speed.
    pub fn executed(&self, job: JobId) -> f64 {
        self.etm.get_executed(&*self.world, job)
    }
}

/// A task field a scheduler reads from [`TaskDef::data`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredField {
    pub name: &'static str,
    /// Value filled in for tasks that lack the field. `None` makes the field
    /// mandatory.
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub required_task_fields: Vec<RequiredField>,
}

pub type SchedulerFactory = fn(&SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError>;

/// Name-to-factory table of the schedulers a scenario may select.
#[derive(Default)]
pub struct SchedulerRegistry {
    entries: BTreeMap<&'static str, (SchedulerInfo, SchedulerFactory)>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in policies.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        crate::schedulers::register_builtin(&mut reg);
        reg
    }

    pub fn register(&mut self, info: SchedulerInfo, factory: SchedulerFactory) {
        self.entries.insert(info.name, (info, factory));
    }

    pub fn info(&self, name: &str) -> Option<&SchedulerInfo> {
        self.entries.get(name).map(|(info, _)| info)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn instantiate(&self, def: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
        let (_, factory) = self
            .entries
            .get(def.name.as_str())
            .ok_or_else(|| SchedulerError::Unknown(def.name.clone()))?;
        factory(def)
    }

    /// Fill in defaults for the task fields scheduler `name` requires.
    pub fn fill_task_fields(&self, name: &str, tasks: &mut [TaskDef]) -> Result<(), SchedulerError> {
        let info = self
            .info(name)
            .ok_or_else(|| SchedulerError::Unknown(name.to_string()))?;
        for task in tasks.iter_mut() {
            for field in &info.required_task_fields {
                if task.data.contains_key(field.name) {
                    continue;
                }
                let Some(default) = &field.default else {
                    return Err(SchedulerError::MissingField {
                        task: task.name.clone(),
                        field: field.name.to_string(),
                    });
                };
                task.data.insert(field.name.to_string(), default.clone());
            }
        }
        Ok(())
    }
}
