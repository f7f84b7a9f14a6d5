//! Trace event recording for the simulator.
//!
//! Every job, processor and scheduler event is recorded as a `TraceEvent`
//! stamped with the virtual time at which it happened. The log is
//! append-only and monotonic in time; analysis tools consume it after the
//! run.

use std::collections::HashMap;

use crate::fmt::FmtTs;
use crate::types::{Cycles, JobId, ProcId, TimerId};

/// A single trace event produced by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Virtual time in cycles when this event occurred.
    pub time: Cycles,
    pub kind: TraceKind,
}

/// What a processor spends an overhead on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverheadKind {
    ContextSave,
    ContextLoad,
    Scheduling,
    Migration,
    JobActivation,
    JobTermination,
    Timer,
}

/// Scheduler entry point being traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedOp {
    Schedule,
    Activate,
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceKind {
    /// A job was released.
    JobActivated { job: JobId, deadline: Cycles },
    /// A job started or resumed execution.
    JobExecuted { job: JobId, cpu: ProcId },
    JobPreempted { job: JobId, cpu: ProcId },
    /// `cpu` is the processor the job was executing on, if any.
    JobTerminated { job: JobId, cpu: Option<ProcId> },
    JobAborted { job: JobId, cpu: Option<ProcId> },
    /// The processor has nothing to run.
    ProcIdle { cpu: ProcId },
    /// The processor hands over to a job after loading its context.
    ProcRun { cpu: ProcId, job: JobId },
    ProcOverhead { cpu: ProcId, kind: OverheadKind },
    /// End of a context save or load.
    ProcOverheadDone { cpu: ProcId, kind: OverheadKind },
    SchedBegin { cpu: ProcId, op: SchedOp },
    SchedEnd { cpu: ProcId, op: SchedOp },
    /// A scheduling decision named a job that is no longer active.
    DecisionRejected { cpu: ProcId, job: JobId },
    /// A timer callback ran, on `cpu` if the timer is bound.
    TimerHandled { timer: TimerId, cpu: Option<ProcId> },
    /// The run stopped on a fatal error.
    SimulationAborted { reason: String },
}

/// A complete simulation trace, containing all events in chronological order.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub(crate) fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub(crate) fn record(&mut self, time: Cycles, kind: TraceKind) {
        debug_assert!(self.events.last().map_or(true, |e| e.time <= time));
        self.events.push(TraceEvent { time, kind });
    }

    /// Get all events in chronological order.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Events that concern `job`.
    pub fn job_events(&self, job: JobId) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| event_job(&e.kind) == Some(job))
            .collect()
    }

    /// `(cpu, start, end)` of every execution interval of `job`. An interval
    /// still open at the end of the trace is not reported.
    pub fn execution_intervals(&self, job: JobId) -> Vec<(ProcId, Cycles, Cycles)> {
        let mut out = Vec::new();
        let mut open: Option<(ProcId, Cycles)> = None;
        for e in &self.events {
            match e.kind {
                TraceKind::JobExecuted { job: j, cpu } if j == job => {
                    open = Some((cpu, e.time));
                }
                TraceKind::JobPreempted { job: j, .. }
                | TraceKind::JobTerminated { job: j, .. }
                | TraceKind::JobAborted { job: j, .. }
                    if j == job =>
                {
                    if let Some((cpu, start)) = open.take() {
                        out.push((cpu, start, e.time));
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Total cycles `job` spent executing.
    pub fn total_runtime(&self, job: JobId) -> Cycles {
        self.execution_intervals(job)
            .iter()
            .map(|(_, start, end)| end - start)
            .sum()
    }

    /// Jobs that ended after their deadline or were aborted.
    pub fn deadline_miss_count(&self) -> usize {
        let mut deadlines: HashMap<JobId, Cycles> = HashMap::new();
        let mut misses = 0;
        for e in &self.events {
            match e.kind {
                TraceKind::JobActivated { job, deadline } => {
                    deadlines.insert(job, deadline);
                }
                TraceKind::JobTerminated { job, .. } => {
                    if deadlines.get(&job).is_some_and(|d| e.time > *d) {
                        misses += 1;
                    }
                }
                TraceKind::JobAborted { .. } => misses += 1,
                _ => {}
            }
        }
        misses
    }

    /// Number of times `job` was preempted.
    pub fn preemption_count(&self, job: JobId) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::JobPreempted { job: j, .. } if j == job))
            .count()
    }

    /// Count the number of times a processor went idle.
    pub fn idle_count(&self, cpu: ProcId) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::ProcIdle { cpu: c } if c == cpu))
            .count()
    }

    /// Count the `schedule` calls made on a processor.
    pub fn schedule_count(&self, cpu: ProcId) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    TraceKind::SchedBegin { cpu: c, op: SchedOp::Schedule } if c == cpu
                )
            })
            .count()
    }

    /// Check that no job ever executes on two processors at once and that no
    /// processor executes two jobs at once. Returns the first offending
    /// instant and job.
    pub fn verify_mutual_exclusion(&self) -> Result<(), (Cycles, JobId)> {
        let mut job_on: HashMap<JobId, ProcId> = HashMap::new();
        let mut cpu_runs: HashMap<ProcId, JobId> = HashMap::new();
        for e in &self.events {
            match e.kind {
                TraceKind::JobExecuted { job, cpu } => {
                    if job_on.contains_key(&job) {
                        return Err((e.time, job));
                    }
                    if cpu_runs.contains_key(&cpu) {
                        return Err((e.time, job));
                    }
                    job_on.insert(job, cpu);
                    cpu_runs.insert(cpu, job);
                }
                TraceKind::JobPreempted { job, .. }
                | TraceKind::JobTerminated { job, .. }
                | TraceKind::JobAborted { job, .. } => {
                    if let Some(cpu) = job_on.remove(&job) {
                        cpu_runs.remove(&cpu);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Pretty-print the trace for debugging.
    pub fn dump(&self) {
        for event in &self.events {
            let (cpu, desc) = match &event.kind {
                TraceKind::JobActivated { job, deadline } => {
                    (None, format!("ACTIVATE  {job} deadline={deadline}"))
                }
                TraceKind::JobExecuted { job, cpu } => (Some(*cpu), format!("EXECUTE   {job}")),
                TraceKind::JobPreempted { job, cpu } => (Some(*cpu), format!("PREEMPT   {job}")),
                TraceKind::JobTerminated { job, cpu } => (*cpu, format!("TERMINATE {job}")),
                TraceKind::JobAborted { job, cpu } => (*cpu, format!("ABORT     {job}")),
                TraceKind::ProcIdle { cpu } => (Some(*cpu), "IDLE".to_string()),
                TraceKind::ProcRun { cpu, job } => (Some(*cpu), format!("RUN       {job}")),
                TraceKind::ProcOverhead { cpu, kind } => {
                    (Some(*cpu), format!("OVERHEAD  {kind:?}"))
                }
                TraceKind::ProcOverheadDone { cpu, kind } => {
                    (Some(*cpu), format!("OVH-DONE  {kind:?}"))
                }
                TraceKind::SchedBegin { cpu, op } => (Some(*cpu), format!("BEGIN     {op:?}")),
                TraceKind::SchedEnd { cpu, op } => (Some(*cpu), format!("END       {op:?}")),
                TraceKind::DecisionRejected { cpu, job } => {
                    (Some(*cpu), format!("REJECT    {job}"))
                }
                TraceKind::TimerHandled { timer, cpu } => (*cpu, format!("TIMER     #{}", timer.0)),
                TraceKind::SimulationAborted { reason } => (None, format!("ABORTED   {reason}")),
            };
            eprintln!("[{}] {}", FmtTs::new(event.time, cpu, 1), desc);
        }
    }
}

fn event_job(kind: &TraceKind) -> Option<JobId> {
    match kind {
        TraceKind::JobActivated { job, .. }
        | TraceKind::JobExecuted { job, .. }
        | TraceKind::JobPreempted { job, .. }
        | TraceKind::JobTerminated { job, .. }
        | TraceKind::JobAborted { job, .. }
        | TraceKind::ProcRun { job, .. }
        | TraceKind::DecisionRejected { job, .. } => Some(*job),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trace {
        let mut t = Trace::new();
        t.record(0, TraceKind::JobActivated { job: JobId(0), deadline: 100 });
        t.record(0, TraceKind::JobExecuted { job: JobId(0), cpu: ProcId(0) });
        t.record(40, TraceKind::JobPreempted { job: JobId(0), cpu: ProcId(0) });
        t.record(50, TraceKind::JobExecuted { job: JobId(0), cpu: ProcId(1) });
        t.record(120, TraceKind::JobTerminated { job: JobId(0), cpu: Some(ProcId(1)) });
        t.record(130, TraceKind::ProcIdle { cpu: ProcId(1) });
        t
    }

    #[test]
    fn test_execution_intervals() {
        let t = sample();
        assert_eq!(
            t.execution_intervals(JobId(0)),
            vec![(ProcId(0), 0, 40), (ProcId(1), 50, 120)]
        );
        assert_eq!(t.total_runtime(JobId(0)), 110);
        assert_eq!(t.preemption_count(JobId(0)), 1);
        assert_eq!(t.job_events(JobId(0)).len(), 5);
        assert_eq!(t.idle_count(ProcId(1)), 1);
    }

    #[test]
    fn test_deadline_miss_count() {
        let t = sample();
        assert_eq!(t.deadline_miss_count(), 1);
    }

    #[test]
    fn test_mutual_exclusion_detects_double_run() {
        assert!(sample().verify_mutual_exclusion().is_ok());

        let mut t = Trace::new();
        t.record(0, TraceKind::JobExecuted { job: JobId(0), cpu: ProcId(0) });
        t.record(5, TraceKind::JobExecuted { job: JobId(0), cpu: ProcId(1) });
        assert_eq!(t.verify_mutual_exclusion(), Err((5, JobId(0))));
    }
}
