//! Global job-level fixed-priority schedulers: EDF, RM and FP.
//!
//! All three keep one ready list shared by every processor and differ only
//! in how two jobs compare. On each `schedule` call the most urgent ready job
//! is given to the least urgent processor (an idle one first) as long as
//! that improves on what the processor runs. The displaced job goes back to
//! the ready list and may land on another processor in the same call.

use std::cmp::Reverse;
use std::marker::PhantomData;

use crate::scheduler::{Decision, SchedContext, Scheduler};
use crate::types::{ms_to_cycles, Cycles, JobId, ProcId};

/// Orders jobs for a global policy. Smaller keys are more urgent.
pub trait JobPriority {
    type Key: Ord + Copy;

    fn key(ctx: &SchedContext<'_>, job: JobId) -> Self::Key;
}

/// Earliest absolute deadline first.
pub struct Edf;

impl JobPriority for Edf {
    type Key = Cycles;

    fn key(ctx: &SchedContext<'_>, job: JobId) -> Cycles {
        ctx.job(job).absolute_deadline
    }
}

/// Shortest period first.
pub struct RateMonotonic;

impl JobPriority for RateMonotonic {
    type Key = Cycles;

    fn key(ctx: &SchedContext<'_>, job: JobId) -> Cycles {
        ms_to_cycles(ctx.task_of(job).period(), ctx.cycles_per_ms())
    }
}

/// Largest `priority` task field first.
pub struct FixedPriority;

impl FixedPriority {
    pub fn priority_of(value: Option<&serde_json::Value>) -> i64 {
        match value {
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

impl JobPriority for FixedPriority {
    type Key = Reverse<i64>;

    fn key(ctx: &SchedContext<'_>, job: JobId) -> Reverse<i64> {
        Reverse(Self::priority_of(ctx.task_of(job).data("priority")))
    }
}

pub struct GlobalScheduler<P> {
    ready: Vec<JobId>,
    _policy: PhantomData<P>,
}

impl<P: JobPriority> GlobalScheduler<P> {
    pub fn new() -> Self {
        GlobalScheduler {
            ready: Vec::new(),
            _policy: PhantomData,
        }
    }

    pub fn ready(&self) -> &[JobId] {
        &self.ready
    }
}

impl<P: JobPriority> Default for GlobalScheduler<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Processor to give the next job to: an idle one first, then the one
/// running the least urgent job. Among equals `cpu` wins, then the lowest
/// index.
pub(crate) fn pick_victim<K: Ord + Copy>(assigned: &[Option<K>], cpu: usize) -> Option<usize> {
    // Larger rank is a better victim.
    let rank = |i: usize| {
        let prefer = i == cpu;
        match assigned[i] {
            None => (1u8, None, prefer),
            Some(k) => (0u8, Some(k), prefer),
        }
    };
    let mut best: Option<usize> = None;
    for i in 0..assigned.len() {
        if best.map_or(true, |b| rank(i) > rank(b)) {
            best = Some(i);
        }
    }
    best
}

impl<P: JobPriority> Scheduler for GlobalScheduler<P> {
    fn on_activate(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        self.ready.push(job);
        let cpu = ctx.task_of(job).cpu;
        ctx.resched(cpu);
    }

    fn on_terminated(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        if let Some(pos) = self.ready.iter().position(|j| *j == job) {
            self.ready.remove(pos);
        } else {
            let cpu = ctx.task_of(job).cpu;
            ctx.resched(cpu);
        }
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>, cpu: ProcId) -> Vec<Decision> {
        self.ready.retain(|j| ctx.is_active(*j));

        let mut running: Vec<Option<JobId>> =
            ctx.processors().iter().map(|p| p.running()).collect();
        let mut keys: Vec<Option<P::Key>> = running
            .iter()
            .map(|r| r.map(|j| P::key(ctx, j)))
            .collect();
        let mut decisions = Vec::new();

        loop {
            let Some((pos, key)) = self
                .ready
                .iter()
                .enumerate()
                .map(|(i, j)| (i, P::key(ctx, *j)))
                .min_by_key(|(_, k)| *k)
            else {
                break;
            };
            let Some(victim) = pick_victim(&keys, cpu.index()) else {
                break;
            };
            if keys[victim].is_some_and(|k| k <= key) {
                break;
            }

            let job = self.ready.remove(pos);
            if let Some(displaced) = running[victim] {
                self.ready.push(displaced);
            }
            running[victim] = Some(job);
            keys[victim] = Some(key);
            decisions.push(Decision::run(job, ProcId(victim as u32)));
        }
        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_processor_first() {
        assert_eq!(pick_victim::<u64>(&[Some(50), None, None], 0), Some(1));
        assert_eq!(pick_victim::<u64>(&[Some(50), None, None], 2), Some(2));
    }

    #[test]
    fn test_least_urgent_processor() {
        assert_eq!(pick_victim(&[Some(10u64), Some(30), Some(20)], 0), Some(1));
    }

    #[test]
    fn test_tie_goes_to_scheduling_processor() {
        assert_eq!(pick_victim(&[Some(30u64), Some(30)], 1), Some(1));
        assert_eq!(pick_victim(&[Some(30u64), Some(30)], 0), Some(0));
        assert_eq!(pick_victim::<u64>(&[None, None], 1), Some(1));
    }

    #[test]
    fn test_priority_field_parsing() {
        use serde_json::json;
        assert_eq!(FixedPriority::priority_of(Some(&json!(7))), 7);
        assert_eq!(FixedPriority::priority_of(Some(&json!(2.0))), 2);
        assert_eq!(FixedPriority::priority_of(Some(&json!("3"))), 3);
        assert_eq!(FixedPriority::priority_of(None), 0);
    }
}
