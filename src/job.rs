//! Job lifecycle.
//!
//! A job is one instance of a task. It is created ready (`Activated`) when it
//! is the head of its task's FIFO, `Waiting` otherwise. A processor moves it
//! to `Executing` and back to `Preempted`; it ends `Terminated` when the
//! execution time model reports no remaining cycles, or `Aborted` by its
//! deadline monitor.

use tracing::{debug, info};

use crate::engine::{EventKind, Model};
use crate::fmt::FmtN;
use crate::trace::TraceKind;
use crate::types::{Cycles, JobId, ProcId, TaskId, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued behind an unfinished job of the same task.
    Waiting,
    /// Ready, never executed yet.
    Activated,
    Executing { cpu: ProcId },
    /// Ready, executed at least once.
    Preempted,
    Terminated,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub task: TaskId,
    pub name: String,
    /// Job of the predecessor task that released this one.
    pub pred: Option<JobId>,
    pub state: JobState,
    /// Release instant, in cycles.
    pub activation_date: Cycles,
    /// Activation date plus relative deadline, in cycles.
    pub absolute_deadline: Cycles,
    /// First instant the job executed.
    pub start_date: Option<Cycles>,
    pub end_date: Option<Cycles>,
    /// Whether the job's context may be loaded on a processor. Cleared while
    /// the job executes, set again once its context has been saved.
    pub context_ok: bool,
    /// Processor of the most recent execution interval.
    pub last_cpu: Option<ProcId>,
    pub preemption_count: u32,
    pub migration_count: u32,
    pub(crate) deadline_timer: Option<TimerId>,
    /// Bumped whenever a pending progress event must be discarded.
    pub(crate) token: u64,
    computation_time: Cycles,
    last_exec: Option<Cycles>,
    cycles_per_ms: u64,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        task: TaskId,
        name: String,
        pred: Option<JobId>,
        now: Cycles,
        relative_deadline: Cycles,
        cycles_per_ms: u64,
    ) -> Self {
        Job {
            id,
            task,
            name,
            pred,
            state: JobState::Waiting,
            activation_date: now,
            absolute_deadline: now + relative_deadline,
            start_date: None,
            end_date: None,
            context_ok: true,
            last_cpu: None,
            preemption_count: 0,
            migration_count: 0,
            deadline_timer: None,
            token: 0,
            computation_time: 0,
            last_exec: None,
            cycles_per_ms,
        }
    }

    /// True until the job terminates or is aborted.
    pub fn is_active(&self) -> bool {
        self.end_date.is_none()
    }

    /// Processor the job is executing on right now, if any.
    pub fn executing_on(&self) -> Option<ProcId> {
        match self.state {
            JobState::Executing { cpu } => Some(cpu),
            _ => None,
        }
    }

    pub fn aborted(&self) -> bool {
        self.state == JobState::Aborted
    }

    /// Ended after its absolute deadline, or aborted.
    pub fn exceeded_deadline(&self) -> bool {
        self.aborted() || self.end_date.is_some_and(|end| end > self.absolute_deadline)
    }

    /// Wall-clock cycles spent executing, including the open interval.
    pub fn computation_time_cycles(&self, now: Cycles) -> Cycles {
        match self.last_exec {
            Some(start) => self.computation_time + (now - start),
            None => self.computation_time,
        }
    }

    pub fn activation_date_ms(&self) -> f64 {
        self.activation_date as f64 / self.cycles_per_ms as f64
    }

    pub fn absolute_deadline_ms(&self) -> f64 {
        self.absolute_deadline as f64 / self.cycles_per_ms as f64
    }

    /// Time between activation and end, in milliseconds.
    pub fn response_time_ms(&self) -> Option<f64> {
        self.end_date
            .map(|end| (end - self.activation_date) as f64 / self.cycles_per_ms as f64)
    }

    fn begin_exec(&mut self, now: Cycles, cpu: ProcId) {
        if self.last_cpu.is_some_and(|prev| prev != cpu) {
            self.migration_count += 1;
        }
        self.state = JobState::Executing { cpu };
        self.last_exec = Some(now);
        self.last_cpu = Some(cpu);
        if self.start_date.is_none() {
            self.start_date = Some(now);
        }
    }

    /// Close the open execution interval, if any.
    fn stop_exec(&mut self, now: Cycles) {
        if let Some(start) = self.last_exec.take() {
            self.computation_time += now - start;
        }
        self.token += 1;
    }
}

impl Model {
    /// Start executing `job` on `cpu` and schedule its progress check.
    pub(crate) fn start_job(&mut self, job: JobId, cpu: ProcId) {
        let now = self.world.now;
        self.world.jobs[job.index()].begin_exec(now, cpu);
        self.world.procs[cpu.index()].was_running = Some(job);

        self.etm.on_execute(&self.world, job);
        self.world.record(TraceKind::JobExecuted { job, cpu });
        debug!(job = %self.world.jobs[job.index()].name, cpu = cpu.0, "EXECUTING");

        self.refresh_co_runners(job);
        self.schedule_progress(job);
    }

    /// Re-query the remaining time of every job executing besides `job`,
    /// when the execution time model makes their progress depend on each
    /// other. Pending progress events are superseded.
    fn refresh_co_runners(&mut self, job: JobId) {
        if !self.etm.progress_is_shared() {
            return;
        }
        let others: Vec<JobId> = self
            .world
            .procs
            .iter()
            .filter_map(|p| {
                let j = p.was_running?;
                (j != job && self.world.jobs[j.index()].executing_on() == Some(p.id)).then_some(j)
            })
            .collect();
        for other in others {
            let ret = self.etm.get_ret(&self.world, other);
            let j = &mut self.world.jobs[other.index()];
            j.token += 1;
            let token = j.token;
            let at = self.world.now.saturating_add(ret);
            self.world
                .push_event(at, EventKind::JobProgress { job: other, token });
        }
    }

    /// Ask the execution time model for the remaining cycles and either end
    /// the job or hold until they elapse.
    fn schedule_progress(&mut self, job: JobId) {
        let ret = self.etm.get_ret(&self.world, job);
        if ret == 0 {
            self.terminate_job(job);
            return;
        }
        let token = self.world.jobs[job.index()].token;
        let at = self.world.now.saturating_add(ret);
        self.world.push_event(at, EventKind::JobProgress { job, token });
    }

    /// A progress hold elapsed without interruption.
    pub(crate) fn job_progress(&mut self, job: JobId, token: u64) {
        let j = &self.world.jobs[job.index()];
        if j.token != token || j.executing_on().is_none() {
            return;
        }
        self.schedule_progress(job);
    }

    /// Stop `job` where it executes; it stays ready.
    pub(crate) fn interrupt_job(&mut self, job: JobId) {
        let now = self.world.now;
        let j = &mut self.world.jobs[job.index()];
        let Some(cpu) = j.executing_on() else {
            return;
        };
        j.stop_exec(now);
        j.state = JobState::Preempted;
        j.preemption_count += 1;

        self.etm.on_preempted(&self.world, job);
        self.refresh_co_runners(job);
        self.world.record(TraceKind::JobPreempted { job, cpu });
        debug!(
            job = %self.world.jobs[job.index()].name,
            cpu = cpu.0,
            executed = self.etm.get_executed(&self.world, job),
            "PREEMPTED"
        );
    }

    /// The job consumed all of its execution time.
    pub(crate) fn terminate_job(&mut self, job: JobId) {
        let now = self.world.now;
        let cpu = self.world.jobs[job.index()].executing_on();
        self.world.jobs[job.index()].stop_exec(now);
        self.etm.on_terminated(&self.world, job);
        self.refresh_co_runners(job);

        let j = &mut self.world.jobs[job.index()];
        j.end_date = Some(now);
        j.state = JobState::Terminated;
        let missed = j.exceeded_deadline();
        let timer = j.deadline_timer;
        let task = j.task;
        if let Some(timer) = timer {
            self.world.timers.stop(timer);
        }
        if missed {
            self.world.tasks[task.index()].deadline_misses += 1;
        }

        self.world.record(TraceKind::JobTerminated { job, cpu });
        debug!(
            job = %self.world.jobs[job.index()].name,
            missed,
            "TERMINATED"
        );

        self.end_job(task, job);
        let home = self.world.tasks[task.index()].cpu;
        self.world.terminate(home, job);
    }

    /// Abort a job that cannot meet its deadline.
    ///
    /// A job still queued behind its task's head is only removed from the
    /// queue: the scheduler never saw it.
    pub(crate) fn abort_job(&mut self, job: JobId) {
        let now = self.world.now;
        let task = self.world.jobs[job.index()].task;
        let queued = self.world.jobs[job.index()].state == JobState::Waiting;
        let cpu = self.world.jobs[job.index()].executing_on();

        self.world.jobs[job.index()].stop_exec(now);
        self.etm.on_abort(&self.world, job);
        self.refresh_co_runners(job);

        let j = &mut self.world.jobs[job.index()];
        j.end_date = Some(now);
        j.state = JobState::Aborted;
        if let Some(timer) = j.deadline_timer {
            self.world.timers.stop(timer);
        }
        let t = &mut self.world.tasks[task.index()];
        t.abort_count += 1;
        t.deadline_misses += 1;

        self.world.record(TraceKind::JobAborted { job, cpu });
        info!(
            job = %self.world.jobs[job.index()].name,
            deadline = %FmtN(self.world.jobs[job.index()].absolute_deadline),
            "ABORTED"
        );

        if queued {
            self.world.tasks[task.index()].remove_queued(job);
            return;
        }
        self.end_job(task, job);
        let home = self.world.tasks[task.index()].cpu;
        self.world.terminate(home, job);
    }
}
