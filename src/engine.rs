//! Event-driven simulation engine.
//!
//! This is the core of the simulator. It owns every entity of a run in
//! arenas indexed by typed identifiers, keeps the virtual clock and the
//! event queue, and drives processors, jobs, tasks and timers through their
//! state machines. Entities never hold references to each other, only ids.
//!
//! Processors are advanced synchronously but never re-entered: anything
//! that may unblock a processor only marks it for a wakeup, and the marked
//! processors are stepped once the current event has been handled.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;

use tracing::{error, info};

use crate::cache::{Cache, Csdp};
use crate::etm::{self, ExecutionTimeModel};
use crate::fmt::{set_sim_clock, FmtN};
use crate::job::Job;
use crate::processor::{ProcEvent, Processor};
use crate::scenario::{Scenario, ScenarioError, TaskType};
use crate::scheduler::{SchedContext, SchedLock, Scheduler, SchedulerError, SchedulerRegistry};
use crate::task::Task;
use crate::timer::{Timer, TimerCallback, TimerSpec, TimerTable};
use crate::trace::{Trace, TraceKind};
use crate::types::{CacheId, Cycles, JobId, ProcId, TaskId, TimerId};

/// Fatal errors that stop a run.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// A scheduler left the same job assigned to several processors.
    DoubleAssignment { job: JobId, cpus: Vec<ProcId> },
    /// A timer was created with a negative delay or overhead.
    NegativeTimerDelay { delay: f64 },
    /// A periodic timer was created with a delay shorter than one cycle.
    ZeroTimerPeriod,
    /// A processor speed must be non-negative.
    InvalidSpeed { cpu: ProcId, speed: f64 },
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::DoubleAssignment { job, cpus } => {
                let cpus: Vec<String> = cpus.iter().map(ToString::to_string).collect();
                write!(f, "{job} assigned to several processors: {}", cpus.join(", "))
            }
            SimError::NegativeTimerDelay { delay } => {
                write!(f, "negative timer delay: {delay}")
            }
            SimError::ZeroTimerPeriod => write!(f, "periodic timer with a zero delay"),
            SimError::InvalidSpeed { cpu, speed } => {
                write!(f, "invalid speed {speed} for {cpu}")
            }
        }
    }
}

impl std::error::Error for SimError {}

/// Errors raised while building a model. The simulation does not start.
#[derive(Debug)]
pub enum ModelError {
    Scenario(ScenarioError),
    Scheduler(SchedulerError),
    /// `followed_by` names a task identifier that does not exist.
    UnknownFollowedBy { task: String, target: u32 },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Scenario(e) => write!(f, "scenario: {e}"),
            ModelError::Scheduler(e) => write!(f, "scheduler: {e}"),
            ModelError::UnknownFollowedBy { task, target } => {
                write!(f, "task {task:?} is followed by unknown task {target}")
            }
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Scenario(e) => Some(e),
            ModelError::Scheduler(e) => Some(e),
            ModelError::UnknownFollowedBy { .. } => None,
        }
    }
}

impl From<ScenarioError> for ModelError {
    fn from(e: ScenarioError) -> Self {
        ModelError::Scenario(e)
    }
}

impl From<SchedulerError> for ModelError {
    fn from(e: SchedulerError) -> Self {
        ModelError::Scheduler(e)
    }
}

/// A simulation event, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Event {
    time: Cycles,
    /// Tiebreaker for events at the same time (lower = earlier).
    seq: u64,
    kind: EventKind,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    /// A release instant of a task.
    TaskRelease { task: TaskId },
    /// An executing job may have completed. Stale if `token` no longer
    /// matches the job's.
    JobProgress { job: JobId, token: u64 },
    /// A processor finished paying an overhead.
    ProcResume { cpu: ProcId },
    /// A timer expired. Stale if `generation` no longer matches.
    TimerFire { timer: TimerId, generation: u64 },
}

/// Every entity of a run, plus the clock and the pending events.
pub struct World {
    pub(crate) now: Cycles,
    pub(crate) cycles_per_ms: u64,
    pub(crate) duration: Cycles,
    pub(crate) tasks: Vec<Task>,
    pub(crate) jobs: Vec<Job>,
    pub(crate) procs: Vec<Processor>,
    pub(crate) caches: Vec<Cache>,
    pub(crate) timers: TimerTable,
    pub(crate) trace: Trace,
    pub(crate) lock: SchedLock,
    events: BinaryHeap<Reverse<Event>>,
    seq: u64,
    /// Processors to step once the current event is handled.
    wakeups: VecDeque<ProcId>,
    pub(crate) fatal: Option<SimError>,
}

impl World {
    pub fn now(&self) -> Cycles {
        self.now
    }

    pub fn now_ms(&self) -> f64 {
        self.now as f64 / self.cycles_per_ms as f64
    }

    pub fn cycles_per_ms(&self) -> u64 {
        self.cycles_per_ms
    }

    pub fn duration(&self) -> Cycles {
        self.duration
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, task: TaskId) -> &Task {
        &self.tasks[task.index()]
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, job: JobId) -> &Job {
        &self.jobs[job.index()]
    }

    pub fn processors(&self) -> &[Processor] {
        &self.procs
    }

    pub fn processor(&self, cpu: ProcId) -> &Processor {
        &self.procs[cpu.index()]
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn timer(&self, timer: TimerId) -> &Timer {
        self.timers.get(timer)
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub(crate) fn push_event(&mut self, time: Cycles, kind: EventKind) {
        self.events.push(Reverse(Event {
            time,
            seq: self.seq,
            kind,
        }));
        self.seq += 1;
    }

    pub(crate) fn record(&mut self, kind: TraceKind) {
        self.trace.record(self.now, kind);
    }

    pub(crate) fn wake(&mut self, cpu: ProcId) {
        if !self.wakeups.contains(&cpu) {
            self.wakeups.push_back(cpu);
        }
    }

    fn post(&mut self, cpu: ProcId, event: ProcEvent) {
        self.procs[cpu.index()].events.push_back(event);
        self.wake(cpu);
    }

    pub(crate) fn activate(&mut self, cpu: ProcId, job: JobId) {
        self.post(cpu, ProcEvent::Activate(job));
    }

    /// Notify `cpu` that `job` ended. The processor drops it if it is still
    /// assigned there.
    pub(crate) fn terminate(&mut self, cpu: ProcId, job: JobId) {
        let proc = &mut self.procs[cpu.index()];
        if proc.running == Some(job) {
            proc.running = None;
        }
        self.post(cpu, ProcEvent::Terminate(job));
    }

    pub(crate) fn preempt(&mut self, cpu: ProcId) {
        self.procs[cpu.index()].running = None;
        self.post(cpu, ProcEvent::Preempt);
    }

    pub(crate) fn migrate(&mut self, cpu: ProcId, job: JobId) {
        self.procs[cpu.index()].running = Some(job);
        self.post(cpu, ProcEvent::Migrate(job));
    }

    /// Request a scheduling decision on `cpu`. A request already pending
    /// there absorbs this one.
    pub(crate) fn resched(&mut self, cpu: ProcId) {
        if self.procs[cpu.index()].has_resched() {
            self.wake(cpu);
            return;
        }
        self.post(cpu, ProcEvent::Resched);
    }

    pub(crate) fn wake_lock_waiters(&mut self) {
        let waiting: Vec<ProcId> = self
            .procs
            .iter()
            .filter(|p| p.waiting_for_lock())
            .map(|p| p.id)
            .collect();
        for cpu in waiting {
            self.wake(cpu);
        }
    }

    /// The context of `job` was saved; any processor waiting to load it may
    /// proceed.
    pub(crate) fn set_context_ok(&mut self, job: JobId) {
        self.jobs[job.index()].context_ok = true;
        let waiting: Vec<ProcId> = self
            .procs
            .iter()
            .filter(|p| p.waiting_for_context(job))
            .map(|p| p.id)
            .collect();
        for cpu in waiting {
            self.wake(cpu);
        }
    }

    /// Create a timer. A failure is fatal for the run.
    pub(crate) fn create_timer(&mut self, spec: TimerSpec) -> Result<TimerId, SimError> {
        let created = self.timers.create(spec, self.cycles_per_ms);
        if let Err(e) = &created {
            self.fail(e.clone());
        }
        created
    }

    /// Stop the run on a fatal error. Only the first error is kept.
    pub(crate) fn fail(&mut self, e: SimError) {
        if self.fatal.is_some() {
            return;
        }
        error!(%e, "simulation aborted");
        self.record(TraceKind::SimulationAborted {
            reason: e.to_string(),
        });
        self.fatal = Some(e);
    }

    pub(crate) fn start_timer(&mut self, timer: TimerId) {
        let (at, generation) = self.timers.arm(timer, self.now);
        self.push_event(at, EventKind::TimerFire { timer, generation });
    }

    pub(crate) fn stop_timer(&mut self, timer: TimerId) {
        self.timers.stop(timer);
    }
}

/// Overheads charged by the scheduler, in cycles.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Overheads {
    pub(crate) schedule: Cycles,
    pub(crate) activate: Cycles,
    pub(crate) terminate: Cycles,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitKind {
    /// The configured duration elapsed.
    Normal,
    /// A fatal error stopped the run early.
    Fatal(SimError),
}

/// Final state of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job: JobId,
    pub task: TaskId,
    pub name: String,
    pub activation_date: Cycles,
    pub absolute_deadline: Cycles,
    pub start_date: Option<Cycles>,
    pub end_date: Option<Cycles>,
    pub aborted: bool,
    pub exceeded_deadline: bool,
    /// Wall cycles spent executing.
    pub computation_time_cycles: Cycles,
    /// Cycles of work done, scaled by processor speed.
    pub actual_computation_time_cycles: f64,
    /// Remaining execution at the end of the run, in milliseconds.
    pub ret_ms: f64,
    pub response_time_ms: Option<f64>,
    pub preemption_count: u32,
    pub migration_count: u32,
}

/// Per-task counters at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task: TaskId,
    pub name: String,
    pub jobs: usize,
    pub deadline_misses: u32,
    pub abort_count: u32,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub exit: ExitKind,
    pub trace: Trace,
    pub end_time: Cycles,
    pub cycles_per_ms: u64,
    pub jobs: Vec<JobOutcome>,
    pub tasks: Vec<TaskOutcome>,
}

impl SimulationResult {
    pub fn is_normal(&self) -> bool {
        self.exit == ExitKind::Normal
    }

    /// Job by name, e.g. `"T1_3"` for the third job of task `T1`.
    pub fn job(&self, name: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn task(&self, name: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn total_deadline_misses(&self) -> u32 {
        self.tasks.iter().map(|t| t.deadline_misses).sum()
    }
}

/// One simulation run: the world, its scheduler and its execution time
/// model.
pub struct Model {
    pub(crate) world: World,
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) etm: Box<dyn ExecutionTimeModel>,
    pub(crate) overheads: Overheads,
}

impl Model {
    /// Build a model from a scenario. Errors leave nothing running.
    pub fn new(scenario: &Scenario, registry: &SchedulerRegistry) -> Result<Model, ModelError> {
        scenario.validate()?;
        let cycles_per_ms = scenario.cycles_per_ms;

        let mut task_defs = scenario.tasks.clone();
        registry.fill_task_fields(&scenario.scheduler.name, &mut task_defs)?;
        let mut scheduler = registry.instantiate(&scenario.scheduler)?;

        let penalties = scenario.cache_penalties();
        let mut caches: Vec<Cache> = scenario
            .caches
            .iter()
            .enumerate()
            .map(|(i, def)| Cache {
                id: CacheId(i as u32),
                ident: def.id,
                name: def.name.clone(),
                size: def.size,
                access_time: def.access_time,
                penalty: penalties.per_cache.get(&def.id).copied().unwrap_or(0.0),
                shared_with: Vec::new(),
            })
            .collect();

        let mut procs = Vec::with_capacity(scenario.processors.len());
        for (i, def) in scenario.processors.iter().enumerate() {
            let id = ProcId(i as u32);
            let mut proc = Processor::new(id, def);
            proc.penalty = penalties
                .per_proc
                .get(i)
                .copied()
                .unwrap_or(scenario.memory_access_time as f64);
            for ident in &def.caches {
                let cache = caches.iter_mut().find(|c| c.ident == *ident).ok_or_else(|| {
                    ScenarioError::InvalidValue(format!(
                        "processor {:?} uses unknown cache {ident}",
                        def.name
                    ))
                })?;
                cache.shared_with.push(id);
                proc.caches.push(cache.id);
            }
            procs.push(proc);
        }

        let mut tasks = Vec::with_capacity(task_defs.len());
        for (i, def) in task_defs.into_iter().enumerate() {
            if def.task_type == TaskType::Periodic && def.period * (cycles_per_ms as f64) < 1.0 {
                return Err(ScenarioError::InvalidValue(format!(
                    "period of task {:?} is shorter than a cycle",
                    def.name
                ))
                .into());
            }
            let csdp = def.stack_profile()?.map(|p| Csdp::new(&p));
            tasks.push(Task::new(TaskId(i as u32), def, cycles_per_ms, csdp));
        }
        for i in 0..tasks.len() {
            let Some(target) = tasks[i].def.followed_by else {
                continue;
            };
            let next = tasks
                .iter()
                .position(|t| t.def.id == target)
                .ok_or_else(|| ModelError::UnknownFollowedBy {
                    task: tasks[i].def.name.clone(),
                    target,
                })?;
            tasks[i].followed_by = Some(TaskId(next as u32));
        }

        let mut world = World {
            now: 0,
            cycles_per_ms,
            duration: scenario.duration,
            tasks,
            jobs: Vec::new(),
            procs,
            caches,
            timers: TimerTable::new(),
            trace: Trace::new(),
            lock: SchedLock::default(),
            events: BinaryHeap::new(),
            seq: 0,
            wakeups: VecDeque::new(),
            fatal: None,
        };
        set_sim_clock(0);

        let mut etm = etm::build(scenario.etm, scenario);
        for task in &world.tasks {
            scheduler.add_task(task.id);
        }
        for proc in &world.procs {
            scheduler.add_processor(proc.id);
        }
        {
            let mut ctx = SchedContext::new(&mut world, etm.as_ref());
            scheduler.init(&mut ctx)?;
        }
        etm.init(&world);

        info!(
            scheduler = %scenario.scheduler.name,
            etm = etm.name(),
            cpus = world.procs.len(),
            tasks = world.tasks.len(),
            duration = %FmtN(world.duration),
            "model ready"
        );

        let mut model = Model {
            world,
            scheduler,
            etm,
            overheads: Overheads {
                schedule: scenario.scheduler.overhead,
                activate: scenario.scheduler.overhead_activate,
                terminate: scenario.scheduler.overhead_terminate,
            },
        };
        for i in 0..model.world.procs.len() {
            model.step_processor(ProcId(i as u32));
        }
        model.drain_wakeups();
        model.seed_releases();
        Ok(model)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn now(&self) -> Cycles {
        self.world.now
    }

    pub fn trace(&self) -> &Trace {
        &self.world.trace
    }

    pub fn etm(&self) -> &dyn ExecutionTimeModel {
        self.etm.as_ref()
    }

    /// Remaining execution of `job`, in cycles.
    pub fn get_ret(&self, job: JobId) -> Cycles {
        self.etm.get_ret(&self.world, job)
    }

    /// The fatal error that stopped the run, if any.
    pub fn fatal(&self) -> Option<&SimError> {
        self.world.fatal.as_ref()
    }

    pub(crate) fn fail(&mut self, e: SimError) {
        self.world.fail(e);
    }

    /// Handle every event up to and including instant `until`, then advance
    /// the clock to `until`. Stops early on a fatal error, leaving the clock
    /// at the failing event.
    pub fn run_until(&mut self, until: Cycles) {
        let until = until.min(self.world.duration);
        loop {
            if self.world.fatal.is_some() {
                return;
            }
            let due = self
                .world
                .events
                .peek()
                .is_some_and(|Reverse(next)| next.time <= until);
            if !due {
                break;
            }
            let Some(Reverse(event)) = self.world.events.pop() else {
                break;
            };
            self.world.now = event.time;
            set_sim_clock(event.time);

            match event.kind {
                EventKind::TaskRelease { task } => self.release_task(task),
                EventKind::JobProgress { job, token } => self.job_progress(job, token),
                EventKind::ProcResume { cpu } => self.resume_processor(cpu),
                EventKind::TimerFire { timer, generation } => self.fire_timer(timer, generation),
            }
            self.drain_wakeups();
        }
        self.world.now = self.world.now.max(until);
        set_sim_clock(self.world.now);
    }

    /// Run to the configured duration and collect the results.
    pub fn run(mut self) -> SimulationResult {
        let duration = self.world.duration;
        self.run_until(duration);
        self.etm.update(&self.world);

        let exit = match self.world.fatal.clone() {
            Some(e) => ExitKind::Fatal(e),
            None => ExitKind::Normal,
        };
        info!(
            end = %FmtN(self.world.now),
            jobs = self.world.jobs.len(),
            events = self.world.trace.events().len(),
            "simulation finished"
        );

        let jobs = self
            .world
            .jobs
            .iter()
            .map(|j| JobOutcome {
                job: j.id,
                task: j.task,
                name: j.name.clone(),
                activation_date: j.activation_date,
                absolute_deadline: j.absolute_deadline,
                start_date: j.start_date,
                end_date: j.end_date,
                aborted: j.aborted(),
                exceeded_deadline: j.exceeded_deadline(),
                computation_time_cycles: j.computation_time_cycles(self.world.now),
                actual_computation_time_cycles: self.etm.get_executed(&self.world, j.id),
                ret_ms: if j.is_active() {
                    self.etm.get_ret(&self.world, j.id) as f64 / self.world.cycles_per_ms as f64
                } else {
                    0.0
                },
                response_time_ms: j.response_time_ms(),
                preemption_count: j.preemption_count,
                migration_count: j.migration_count,
            })
            .collect();
        let tasks = self
            .world
            .tasks
            .iter()
            .map(|t| TaskOutcome {
                task: t.id,
                name: t.name().to_string(),
                jobs: t.jobs().len(),
                deadline_misses: t.deadline_misses,
                abort_count: t.abort_count,
            })
            .collect();

        SimulationResult {
            exit,
            end_time: self.world.now,
            cycles_per_ms: self.world.cycles_per_ms,
            trace: std::mem::take(&mut self.world.trace),
            jobs,
            tasks,
        }
    }

    /// Step every processor marked for a wakeup.
    pub(crate) fn drain_wakeups(&mut self) {
        while let Some(cpu) = self.world.wakeups.pop_front() {
            if self.world.fatal.is_some() {
                self.world.wakeups.clear();
                return;
            }
            self.step_processor(cpu);
        }
    }

    fn fire_timer(&mut self, timer: TimerId, generation: u64) {
        if !self.world.timers.is_current(timer, generation) {
            return;
        }
        let t = self.world.timers.get(timer);
        let (one_shot, delay, cpu) = (t.one_shot, t.delay, t.cpu);
        if !one_shot {
            let at = self.world.now + delay;
            self.world
                .push_event(at, EventKind::TimerFire { timer, generation });
        }
        match cpu {
            Some(cpu) => self.world.post(cpu, ProcEvent::TimerFired(timer)),
            None => self.run_timer_callback(timer, None),
        }
    }

    /// Run the callback of a timer bound to `cpu`, after its overhead.
    pub(crate) fn handle_bound_timer(&mut self, timer: TimerId, cpu: ProcId) {
        self.run_timer_callback(timer, Some(cpu));
    }

    fn run_timer_callback(&mut self, timer: TimerId, cpu: Option<ProcId>) {
        if !self.world.timers.get(timer).running {
            return;
        }
        self.world.timers.mark_handled(timer);
        self.world.record(TraceKind::TimerHandled { timer, cpu });
        match self.world.timers.get(timer).callback {
            TimerCallback::JobDeadline(job) => self.check_job_deadline(job),
            TimerCallback::Scheduler { cookie } => {
                let mut ctx = SchedContext::new(&mut self.world, self.etm.as_ref());
                self.scheduler.on_timer(&mut ctx, timer, cookie);
            }
        }
    }
}

/// Build a model with the built-in schedulers and run it.
pub fn simulate(scenario: &Scenario) -> Result<SimulationResult, ModelError> {
    let model = Model::new(scenario, &SchedulerRegistry::builtin())?;
    Ok(model.run())
}
