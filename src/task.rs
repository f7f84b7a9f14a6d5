//! Tasks and their job streams.

use std::collections::VecDeque;

use tracing::debug;

use crate::cache::Csdp;
use crate::engine::{EventKind, Model};
use crate::job::{Job, JobState};
use crate::scenario::{TaskDef, TaskType};
use crate::timer::{TimerCallback, TimerDelay, TimerSpec};
use crate::trace::TraceKind;
use crate::types::{ms_to_cycles, Cycles, JobId, ProcId, TaskId};

/// When a task releases its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleasePattern {
    /// Every `period` cycles starting at `first`.
    Periodic { first: Cycles, period: Cycles },
    /// At each of the given instants, sorted.
    Sporadic { dates: Vec<Cycles> },
    /// Only when released by a predecessor.
    Triggered,
}

impl ReleasePattern {
    pub fn from_def(def: &TaskDef, cycles_per_ms: u64) -> Self {
        match def.task_type {
            TaskType::Periodic => ReleasePattern::Periodic {
                first: ms_to_cycles(def.activation_date, cycles_per_ms),
                period: ms_to_cycles(def.period, cycles_per_ms),
            },
            TaskType::Sporadic => {
                let mut dates: Vec<Cycles> = def
                    .list_activation_dates
                    .iter()
                    .map(|d| ms_to_cycles(*d, cycles_per_ms))
                    .collect();
                dates.sort_unstable();
                ReleasePattern::Sporadic { dates }
            }
            TaskType::APeriodic => ReleasePattern::Triggered,
        }
    }

    /// Instant of release number `n` (zero-based), if there is one.
    pub fn release(&self, n: usize) -> Option<Cycles> {
        match self {
            ReleasePattern::Periodic { first, period } => Some(first + period * n as Cycles),
            ReleasePattern::Sporadic { dates } => dates.get(n).copied(),
            ReleasePattern::Triggered => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub def: TaskDef,
    pub pattern: ReleasePattern,
    /// Processor the task's jobs are attached to. Schedulers move it.
    pub cpu: ProcId,
    pub followed_by: Option<TaskId>,
    pub wcet_cycles: Cycles,
    pub deadline_cycles: Cycles,
    pub csdp: Option<Csdp>,
    pub deadline_misses: u32,
    pub abort_count: u32,
    /// Unfinished jobs in activation order; the head is the only eligible one.
    fifo: VecDeque<JobId>,
    jobs: Vec<JobId>,
    releases: usize,
}

impl Task {
    pub(crate) fn new(id: TaskId, def: TaskDef, cycles_per_ms: u64, csdp: Option<Csdp>) -> Self {
        Task {
            id,
            pattern: ReleasePattern::from_def(&def, cycles_per_ms),
            cpu: ProcId(0),
            followed_by: None,
            wcet_cycles: ms_to_cycles(def.wcet, cycles_per_ms),
            deadline_cycles: ms_to_cycles(def.deadline, cycles_per_ms),
            csdp,
            deadline_misses: 0,
            abort_count: 0,
            fifo: VecDeque::new(),
            jobs: Vec::new(),
            releases: 0,
            def,
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Period in milliseconds.
    pub fn period(&self) -> f64 {
        self.def.period
    }

    /// WCET in milliseconds.
    pub fn wcet(&self) -> f64 {
        self.def.wcet
    }

    /// Relative deadline in milliseconds.
    pub fn deadline(&self) -> f64 {
        self.def.deadline
    }

    pub fn utilization(&self) -> f64 {
        self.def.utilization()
    }

    /// Scheduler-specific field from the task definition.
    pub fn data(&self, key: &str) -> Option<&serde_json::Value> {
        self.def.data.get(key)
    }

    /// Every job released so far.
    pub fn jobs(&self) -> &[JobId] {
        &self.jobs
    }

    /// The job currently eligible to run.
    pub fn head(&self) -> Option<JobId> {
        self.fifo.front().copied()
    }

    pub fn pending_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.fifo.iter().copied()
    }

    pub(crate) fn remove_queued(&mut self, job: JobId) {
        self.fifo.retain(|j| *j != job);
    }
}

impl Model {
    /// Schedule the first release of every task.
    pub(crate) fn seed_releases(&mut self) {
        for i in 0..self.world.tasks.len() {
            let task = TaskId(i as u32);
            if let Some(at) = self.world.tasks[i].pattern.release(0) {
                self.world.push_event(at, EventKind::TaskRelease { task });
            }
        }
    }

    /// A release instant of `task` was reached.
    pub(crate) fn release_task(&mut self, task: TaskId) {
        let now = self.world.now;
        let t = &mut self.world.tasks[task.index()];
        t.releases += 1;
        // The next release is queued before this job's deadline monitor so
        // that a release coinciding with a deadline is handled first.
        if let Some(next) = t.pattern.release(t.releases) {
            self.world
                .push_event(next.max(now), EventKind::TaskRelease { task });
        }
        self.create_job(task, None);
    }

    /// Release a new job of `task`. It queues behind any unfinished job.
    pub(crate) fn create_job(&mut self, task: TaskId, pred: Option<JobId>) {
        let now = self.world.now;
        let cycles_per_ms = self.world.cycles_per_ms;
        let id = JobId(self.world.jobs.len() as u32);

        let t = &mut self.world.tasks[task.index()];
        let name = format!("{}_{}", t.def.name, t.jobs.len() + 1);
        let deadline = t.deadline_cycles;
        t.jobs.push(id);
        self.world.jobs.push(Job::new(
            id,
            task,
            name,
            pred,
            now,
            deadline,
            cycles_per_ms,
        ));

        self.world.record(TraceKind::JobActivated {
            job: id,
            deadline: now + deadline,
        });
        debug!(job = %self.world.jobs[id.index()].name, "ACTIVATED");
        self.etm.on_activate(&self.world, id);

        let t = &mut self.world.tasks[task.index()];
        let is_head = t.fifo.is_empty();
        t.fifo.push_back(id);
        if is_head {
            self.activate_head(task, id);
        }

        let spec = TimerSpec::new(
            TimerDelay::Cycles(deadline as i64),
            TimerCallback::JobDeadline(id),
        );
        match self.world.create_timer(spec) {
            Ok(timer) => {
                self.world.jobs[id.index()].deadline_timer = Some(timer);
                self.world.start_timer(timer);
            }
            Err(e) => self.fail(e),
        }
    }

    /// Make `job` eligible and notify the scheduler through the task's
    /// processor.
    fn activate_head(&mut self, task: TaskId, job: JobId) {
        self.world.jobs[job.index()].state = JobState::Activated;
        let cpu = self.world.tasks[task.index()].cpu;
        self.world.activate(cpu, job);
    }

    /// Bookkeeping when the head job of `task` ends: release the successor
    /// task and promote the next queued job.
    pub(crate) fn end_job(&mut self, task: TaskId, job: JobId) {
        if let Some(next) = self.world.tasks[task.index()].followed_by {
            self.create_job(next, Some(job));
        }

        let t = &mut self.world.tasks[task.index()];
        if t.fifo.front() == Some(&job) {
            t.fifo.pop_front();
        } else {
            t.fifo.retain(|j| *j != job);
        }
        if let Some(head) = t.fifo.front().copied() {
            self.activate_head(task, head);
        }
    }

    /// Deadline monitor: abort the job if it is unfinished, has not used its
    /// whole WCET, and its task aborts on misses.
    pub(crate) fn check_job_deadline(&mut self, job: JobId) {
        let now = self.world.now;
        let j = &self.world.jobs[job.index()];
        let t = &self.world.tasks[j.task.index()];
        if j.end_date.is_none()
            && j.computation_time_cycles(now) < t.wcet_cycles
            && t.def.abort_on_miss
        {
            self.abort_job(job);
        }
    }
}
