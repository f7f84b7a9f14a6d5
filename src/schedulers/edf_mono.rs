//! Uniprocessor EDF.
//!
//! Every call hands the processor the ready job with the earliest absolute
//! deadline. Running jobs stay in the ready list until they terminate.
//! Mostly used as the per-processor policy of a partitioned scheduler.

use crate::scheduler::{Decision, SchedContext, Scheduler};
use crate::types::{JobId, ProcId};

#[derive(Debug, Default)]
pub struct EdfMono {
    ready: Vec<JobId>,
}

impl EdfMono {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for EdfMono {
    fn on_activate(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        self.ready.push(job);
        let cpu = ctx.task_of(job).cpu;
        ctx.resched(cpu);
    }

    fn on_terminated(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        self.ready.retain(|j| *j != job);
        let cpu = ctx.task_of(job).cpu;
        ctx.resched(cpu);
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>, cpu: ProcId) -> Vec<Decision> {
        let job = self
            .ready
            .iter()
            .copied()
            .filter(|j| ctx.is_active(*j))
            .min_by_key(|j| ctx.job(*j).absolute_deadline);
        vec![Decision { job, cpu }]
    }
}
