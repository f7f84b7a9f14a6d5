//! Per-processor event queue and state machine.
//!
//! Each processor alternates between running its assigned job and draining
//! its event queue. Handling an event may cost overhead cycles, during which
//! the processor holds: it parks in [`ProcState::Holding`] and a resume event
//! is queued at `now + overhead`. A processor waiting on a condition (a job's
//! context, a non-empty queue, the scheduler lock) parks in the matching
//! state and is stepped again whenever that condition may have changed.
//!
//! The loop, for one processor:
//!
//! 1. With no pending event and a job assigned, wait for the job's context,
//!    pay the context-load overhead and start the job.
//! 2. Wait for an event.
//! 3. If a job was started in step 1, interrupt it and pay the context-save
//!    overhead.
//! 4. Handle one event, then go back to step 1.

use std::collections::VecDeque;

use tracing::{debug, error, warn};

use crate::engine::{EventKind, Model, SimError};
use crate::fmt::set_sim_cpu;
use crate::scheduler::{Decision, SchedContext};
use crate::trace::{OverheadKind, SchedOp, TraceKind};
use crate::types::{CacheId, Cycles, JobId, ProcId, TimerId};

/// Events accepted into a processor's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcEvent {
    /// Ask the scheduler for a decision. At most one is queued at a time.
    Resched,
    Activate(JobId),
    Terminate(JobId),
    TimerFired(TimerId),
    /// The job was assigned to this processor by a decision.
    Migrate(JobId),
    /// The assignment of this processor was cleared by a decision.
    Preempt,
    SetSpeed(f64),
}

/// What to do once a hold completes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AfterHold {
    ContextLoaded(JobId),
    ContextSaved(JobId),
    ActivateDone,
    TerminateDone,
    TimerDone(TimerId),
    /// Decisions still to apply, after the scheduling or a migration
    /// overhead.
    Decisions(VecDeque<Decision>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ProcState {
    /// Top of the loop.
    Top,
    /// Waiting for the assigned job's context to be ready.
    WaitContext(JobId),
    /// Waiting for an event; `job` was started before waiting.
    WaitEvents(Option<JobId>),
    /// About to pop and handle an event.
    Dispatch,
    /// Waiting for the scheduler lock.
    WaitLock,
    /// Paying an overhead.
    Holding(AfterHold),
    /// An overhead was paid; continue with the next step.
    Resuming(AfterHold),
}

#[derive(Debug, Clone)]
pub struct Processor {
    pub id: ProcId,
    /// User-facing identifier from the scenario.
    pub ident: u32,
    pub name: String,
    pub speed: f64,
    pub cs_overhead: Cycles,
    pub cl_overhead: Cycles,
    pub migration_overhead: Cycles,
    /// Attached caches, innermost level first.
    pub caches: Vec<CacheId>,
    /// Base memory-access penalty, in cycles.
    pub penalty: f64,
    /// Job assigned to this processor.
    pub(crate) running: Option<JobId>,
    /// Last job that executed here.
    pub(crate) was_running: Option<JobId>,
    pub(crate) events: VecDeque<ProcEvent>,
    pub(crate) state: ProcState,
}

impl Processor {
    pub(crate) fn new(id: ProcId, def: &crate::scenario::ProcessorDef) -> Self {
        Processor {
            id,
            ident: def.id,
            name: def.name.clone(),
            speed: def.speed,
            cs_overhead: def.cs_overhead,
            cl_overhead: def.cl_overhead,
            migration_overhead: def.migration_overhead,
            caches: Vec::new(),
            penalty: 0.0,
            running: None,
            was_running: None,
            events: VecDeque::new(),
            state: ProcState::Top,
        }
    }

    /// Job currently assigned to this processor.
    pub fn running(&self) -> Option<JobId> {
        self.running
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn was_running(&self) -> Option<JobId> {
        self.was_running
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn has_resched(&self) -> bool {
        self.events.iter().any(|e| *e == ProcEvent::Resched)
    }

    pub(crate) fn waiting_for_lock(&self) -> bool {
        self.state == ProcState::WaitLock
    }

    pub(crate) fn waiting_for_context(&self, job: JobId) -> bool {
        self.state == ProcState::WaitContext(job)
    }
}

impl Model {
    /// Advance a processor's state machine until it blocks.
    pub(crate) fn step_processor(&mut self, cpu: ProcId) {
        set_sim_cpu(Some(cpu));
        self.run_processor(cpu);
        set_sim_cpu(None);
    }

    /// A hold of `cpu` elapsed.
    pub(crate) fn resume_processor(&mut self, cpu: ProcId) {
        let proc = &mut self.world.procs[cpu.index()];
        let state = std::mem::replace(&mut proc.state, ProcState::Top);
        match state {
            ProcState::Holding(after) => {
                proc.state = ProcState::Resuming(after);
                self.step_processor(cpu);
            }
            other => proc.state = other,
        }
    }

    fn run_processor(&mut self, cpu: ProcId) {
        let i = cpu.index();
        loop {
            if self.world.fatal.is_some() {
                return;
            }
            let state = std::mem::replace(&mut self.world.procs[i].state, ProcState::Top);
            match state {
                ProcState::Top => {
                    let proc = &mut self.world.procs[i];
                    if !proc.events.is_empty() {
                        proc.state = ProcState::Dispatch;
                    } else if let Some(job) = proc.running {
                        proc.state = ProcState::WaitContext(job);
                    } else {
                        proc.state = ProcState::WaitEvents(None);
                        self.world.record(TraceKind::ProcIdle { cpu });
                        debug!(cpu = cpu.0, "IDLE");
                    }
                }
                ProcState::WaitContext(job) => {
                    if self.world.procs[i].running != Some(job) {
                        continue;
                    }
                    if !self.world.jobs[job.index()].context_ok {
                        self.world.procs[i].state = ProcState::WaitContext(job);
                        return;
                    }
                    self.world.record(TraceKind::ProcOverhead {
                        cpu,
                        kind: OverheadKind::ContextLoad,
                    });
                    let cl = self.world.procs[i].cl_overhead;
                    self.hold(cpu, cl, AfterHold::ContextLoaded(job));
                    return;
                }
                ProcState::WaitEvents(job) => {
                    if self.world.procs[i].events.is_empty() {
                        self.world.procs[i].state = ProcState::WaitEvents(job);
                        return;
                    }
                    let Some(job) = job else {
                        self.world.procs[i].state = ProcState::Dispatch;
                        continue;
                    };
                    if self.world.jobs[job.index()].executing_on() == Some(cpu) {
                        self.interrupt_job(job);
                    }
                    self.world.record(TraceKind::ProcOverhead {
                        cpu,
                        kind: OverheadKind::ContextSave,
                    });
                    let cs = self.world.procs[i].cs_overhead;
                    self.hold(cpu, cs, AfterHold::ContextSaved(job));
                    return;
                }
                ProcState::Dispatch => {
                    if self.dispatch_event(cpu) {
                        return;
                    }
                }
                ProcState::WaitLock => {
                    if !self.scheduler.get_lock(&mut self.world.lock) {
                        self.world.procs[i].state = ProcState::WaitLock;
                        return;
                    }
                    let decisions = {
                        let mut ctx = SchedContext::new(&mut self.world, self.etm.as_ref());
                        self.scheduler.schedule(&mut ctx, cpu)
                    };
                    let overhead = self.overheads.schedule;
                    self.hold(cpu, overhead, AfterHold::Decisions(decisions.into()));
                    return;
                }
                ProcState::Holding(after) => {
                    self.world.procs[i].state = ProcState::Holding(after);
                    return;
                }
                ProcState::Resuming(after) => {
                    if self.finish_hold(cpu, after) {
                        return;
                    }
                }
            }
        }
    }

    /// Park `cpu` for `cycles`, then continue with `after`.
    fn hold(&mut self, cpu: ProcId, cycles: Cycles, after: AfterHold) {
        self.world.procs[cpu.index()].state = ProcState::Holding(after);
        let at = self.world.now + cycles;
        self.world.push_event(at, EventKind::ProcResume { cpu });
    }

    /// Pop and handle one event. Returns true if the processor blocked.
    fn dispatch_event(&mut self, cpu: ProcId) -> bool {
        let i = cpu.index();
        let Some(event) = self.world.procs[i].events.pop_front() else {
            return false;
        };
        match event {
            ProcEvent::Resched => {
                let proc = &mut self.world.procs[i];
                if proc.events.iter().any(|e| *e != ProcEvent::Resched) {
                    proc.events.push_back(ProcEvent::Resched);
                    return false;
                }
                proc.state = ProcState::WaitLock;
                self.world.record(TraceKind::ProcOverhead {
                    cpu,
                    kind: OverheadKind::Scheduling,
                });
                self.world.record(TraceKind::SchedBegin {
                    cpu,
                    op: SchedOp::Schedule,
                });
                false
            }
            ProcEvent::Activate(job) => {
                {
                    let mut ctx = SchedContext::new(&mut self.world, self.etm.as_ref());
                    self.scheduler.on_activate(&mut ctx, job);
                }
                self.world.record(TraceKind::ProcOverhead {
                    cpu,
                    kind: OverheadKind::JobActivation,
                });
                self.world.record(TraceKind::SchedBegin {
                    cpu,
                    op: SchedOp::Activate,
                });
                let overhead = self.overheads.activate;
                self.hold(cpu, overhead, AfterHold::ActivateDone);
                true
            }
            ProcEvent::Terminate(job) => {
                {
                    let mut ctx = SchedContext::new(&mut self.world, self.etm.as_ref());
                    self.scheduler.on_terminated(&mut ctx, job);
                }
                self.world.record(TraceKind::ProcOverhead {
                    cpu,
                    kind: OverheadKind::JobTermination,
                });
                self.world.record(TraceKind::SchedBegin {
                    cpu,
                    op: SchedOp::Terminate,
                });
                let overhead = self.overheads.terminate;
                self.hold(cpu, overhead, AfterHold::TerminateDone);
                true
            }
            ProcEvent::TimerFired(timer) => {
                let overhead = self.world.timers.get(timer).overhead;
                if overhead > 0 {
                    self.world.record(TraceKind::ProcOverhead {
                        cpu,
                        kind: OverheadKind::Timer,
                    });
                    self.hold(cpu, overhead, AfterHold::TimerDone(timer));
                    return true;
                }
                self.handle_bound_timer(timer, cpu);
                false
            }
            ProcEvent::Migrate(job) => {
                self.world.procs[i].running = Some(job);
                false
            }
            ProcEvent::Preempt => false,
            ProcEvent::SetSpeed(speed) => {
                self.world.procs[i].speed = speed;
                debug!(cpu = cpu.0, speed, "SPEED");
                false
            }
        }
    }

    /// Continue after a hold. Returns true if the processor blocked again.
    fn finish_hold(&mut self, cpu: ProcId, after: AfterHold) -> bool {
        let i = cpu.index();
        match after {
            AfterHold::ContextLoaded(job) => {
                self.world.record(TraceKind::ProcOverheadDone {
                    cpu,
                    kind: OverheadKind::ContextLoad,
                });
                let j = &self.world.jobs[job.index()];
                let startable = j.is_active()
                    && j.executing_on().is_none()
                    && self.world.procs[i].running == Some(job);
                if !startable {
                    return false;
                }
                self.world.jobs[job.index()].context_ok = false;
                self.world.record(TraceKind::ProcRun { cpu, job });
                self.start_job(job, cpu);
                self.world.procs[i].state = ProcState::WaitEvents(Some(job));
                false
            }
            AfterHold::ContextSaved(job) => {
                self.world.record(TraceKind::ProcOverheadDone {
                    cpu,
                    kind: OverheadKind::ContextSave,
                });
                self.world.set_context_ok(job);
                self.world.procs[i].state = ProcState::Dispatch;
                false
            }
            AfterHold::ActivateDone => {
                self.world.record(TraceKind::SchedEnd {
                    cpu,
                    op: SchedOp::Activate,
                });
                false
            }
            AfterHold::TerminateDone => {
                self.world.record(TraceKind::SchedEnd {
                    cpu,
                    op: SchedOp::Terminate,
                });
                false
            }
            AfterHold::TimerDone(timer) => {
                self.handle_bound_timer(timer, cpu);
                false
            }
            AfterHold::Decisions(mut pending) => {
                while let Some(decision) = pending.pop_front() {
                    if !self.apply_decision(cpu, decision) {
                        continue;
                    }
                    self.world.record(TraceKind::ProcOverhead {
                        cpu,
                        kind: OverheadKind::Migration,
                    });
                    let overhead = self.world.procs[i].migration_overhead;
                    if overhead > 0 {
                        self.hold(cpu, overhead, AfterHold::Decisions(pending));
                        return true;
                    }
                }
                if let Err(e) = self.check_assignments() {
                    self.fail(e);
                    return true;
                }
                self.scheduler.release_lock(&mut self.world.lock);
                self.world.wake_lock_waiters();
                self.world.record(TraceKind::SchedEnd {
                    cpu,
                    op: SchedOp::Schedule,
                });
                false
            }
        }
    }

    /// Apply one decision taken on `cpu`. Returns true if the job moves to a
    /// different processor than the one it last executed on.
    fn apply_decision(&mut self, cpu: ProcId, decision: Decision) -> bool {
        let Decision { job, cpu: target } = decision;
        if self.world.procs[target.index()].running == job {
            return false;
        }

        let Some(job) = job else {
            self.world.preempt(target);
            return false;
        };

        if !self.world.jobs[job.index()].is_active() {
            warn!(
                job = %self.world.jobs[job.index()].name,
                cpu = cpu.0,
                "can't schedule a job that is no longer active"
            );
            self.world.record(TraceKind::DecisionRejected { cpu, job });
            return false;
        }

        let task = self.world.jobs[job.index()].task;
        let home = self.world.tasks[task.index()].cpu;
        if self.world.procs[home.index()].running == Some(job) {
            self.world.preempt(home);
        }
        self.world.migrate(target, job);
        self.world.tasks[task.index()].cpu = target;

        self.world.jobs[job.index()]
            .last_cpu
            .is_some_and(|prev| prev != target)
    }

    /// No job may be assigned to two processors.
    fn check_assignments(&self) -> Result<(), SimError> {
        let procs = &self.world.procs;
        for (a, pa) in procs.iter().enumerate() {
            let Some(job) = pa.running else {
                continue;
            };
            let cpus: Vec<ProcId> = procs[a..]
                .iter()
                .filter(|p| p.running == Some(job))
                .map(|p| p.id)
                .collect();
            if cpus.len() > 1 {
                error!(job = %self.world.jobs[job.index()].name, ?cpus, "job assigned twice");
                return Err(SimError::DoubleAssignment { job, cpus });
            }
        }
        Ok(())
    }
}
