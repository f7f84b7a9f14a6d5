//! Partitioned scheduling.
//!
//! Tasks are packed onto processors once, at init. Each processor then runs
//! its own uniprocessor scheduler over the tasks it received, so no lock is
//! needed between processors.

use std::collections::HashMap;

use tracing::info;

use crate::scenario::SchedulerDef;
use crate::scheduler::{Decision, SchedContext, SchedLock, Scheduler, SchedulerError};
use crate::types::{JobId, ProcId, TaskId};

/// A task as seen by the bin-packing heuristics, times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackItem {
    pub task: TaskId,
    pub period: f64,
    pub wcet: f64,
}

impl PackItem {
    pub fn utilization(&self) -> f64 {
        self.wcet / self.period
    }

    /// Whether the item fits on a processor already loaded with `load`.
    fn fits(&self, load: f64) -> bool {
        load * self.period + self.wcet <= self.period
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingHeuristic {
    FirstFit,
    NextFit,
    BestFit,
    WorstFit,
    DecreasingFirstFit,
    DecreasingNextFit,
    DecreasingBestFit,
    DecreasingWorstFit,
}

impl PackingHeuristic {
    /// Read the `packing` scheduler field. Defaults to decreasing first fit.
    pub fn from_def(def: &SchedulerDef) -> Result<Self, SchedulerError> {
        let Some(value) = def.data.get("packing") else {
            return Ok(PackingHeuristic::DecreasingFirstFit);
        };
        let name = value.as_str().unwrap_or_default();
        match name {
            "first_fit" => Ok(PackingHeuristic::FirstFit),
            "next_fit" => Ok(PackingHeuristic::NextFit),
            "best_fit" => Ok(PackingHeuristic::BestFit),
            "worst_fit" => Ok(PackingHeuristic::WorstFit),
            "decreasing_first_fit" => Ok(PackingHeuristic::DecreasingFirstFit),
            "decreasing_next_fit" => Ok(PackingHeuristic::DecreasingNextFit),
            "decreasing_best_fit" => Ok(PackingHeuristic::DecreasingBestFit),
            "decreasing_worst_fit" => Ok(PackingHeuristic::DecreasingWorstFit),
            _ => Err(SchedulerError::InvalidOption {
                option: "packing".into(),
                value: value.to_string(),
            }),
        }
    }

    /// Assign each item to one of `bins` processors. Returns the bin of every
    /// item, in input order, or the first task that does not fit.
    pub fn pack(self, items: &[PackItem], bins: usize) -> Result<Vec<usize>, TaskId> {
        let decreasing = matches!(
            self,
            PackingHeuristic::DecreasingFirstFit
                | PackingHeuristic::DecreasingNextFit
                | PackingHeuristic::DecreasingBestFit
                | PackingHeuristic::DecreasingWorstFit
        );
        let mut order: Vec<usize> = (0..items.len()).collect();
        if decreasing {
            // Stable: equal utilizations keep their input order.
            order.sort_by(|a, b| items[*b].utilization().total_cmp(&items[*a].utilization()));
        }

        let mut load = vec![0.0f64; bins];
        let mut out = vec![0usize; items.len()];
        // Bins in the order they are tried.
        let mut tried: Vec<usize> = (0..bins).collect();
        let mut next = 0usize;

        for idx in order {
            let item = items[idx];
            let bin = match self {
                PackingHeuristic::NextFit | PackingHeuristic::DecreasingNextFit => {
                    let found = (0..bins)
                        .map(|k| (next + k) % bins)
                        .find(|b| item.fits(load[*b]));
                    if let Some(b) = found {
                        next = b;
                    }
                    found
                }
                _ => tried.iter().copied().find(|b| item.fits(load[*b])),
            };
            let Some(bin) = bin else {
                return Err(item.task);
            };
            load[bin] += item.utilization();
            out[idx] = bin;

            match self {
                PackingHeuristic::BestFit | PackingHeuristic::DecreasingBestFit => {
                    tried.sort_by(|a, b| load[*b].total_cmp(&load[*a]));
                }
                PackingHeuristic::WorstFit | PackingHeuristic::DecreasingWorstFit => {
                    tried.sort_by(|a, b| load[*a].total_cmp(&load[*b]));
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Builds the per-processor scheduler.
pub type SubSchedulerFactory = fn() -> Box<dyn Scheduler>;

pub struct Partitioned {
    heuristic: PackingHeuristic,
    factory: SubSchedulerFactory,
    tasks: Vec<TaskId>,
    procs: Vec<ProcId>,
    /// One scheduler per processor, indexed like `procs`.
    subs: Vec<Box<dyn Scheduler>>,
    sub_of_task: HashMap<TaskId, usize>,
    sub_of_cpu: HashMap<ProcId, usize>,
}

impl Partitioned {
    pub fn new(heuristic: PackingHeuristic, factory: SubSchedulerFactory) -> Self {
        Partitioned {
            heuristic,
            factory,
            tasks: Vec::new(),
            procs: Vec::new(),
            subs: Vec::new(),
            sub_of_task: HashMap::new(),
            sub_of_cpu: HashMap::new(),
        }
    }

    /// Processor `task` was packed on.
    pub fn processor_of(&self, task: TaskId) -> Option<ProcId> {
        self.sub_of_task.get(&task).map(|i| self.procs[*i])
    }
}

impl Scheduler for Partitioned {
    fn init(&mut self, ctx: &mut SchedContext<'_>) -> Result<(), SchedulerError> {
        for (i, cpu) in self.procs.iter().enumerate() {
            let mut sub = (self.factory)();
            sub.add_processor(*cpu);
            self.subs.push(sub);
            self.sub_of_cpu.insert(*cpu, i);
        }

        let items: Vec<PackItem> = self
            .tasks
            .iter()
            .map(|t| {
                let task = ctx.task(*t);
                // Tasks without a period are packed by their deadline.
                let period = if task.period() > 0.0 {
                    task.period()
                } else {
                    task.deadline()
                };
                PackItem {
                    task: *t,
                    period,
                    wcet: task.wcet(),
                }
            })
            .collect();
        let bins = self
            .heuristic
            .pack(&items, self.procs.len())
            .map_err(|task| SchedulerError::PackingFailed {
                task: ctx.task(task).name().to_string(),
            })?;

        for (item, bin) in items.iter().zip(bins) {
            self.subs[bin].add_task(item.task);
            self.sub_of_task.insert(item.task, bin);
            ctx.set_task_cpu(item.task, self.procs[bin]);
            info!(
                task = ctx.task(item.task).name(),
                cpu = self.procs[bin].0,
                "PACKED"
            );
        }

        for sub in &mut self.subs {
            sub.init(ctx)?;
        }
        Ok(())
    }

    fn add_task(&mut self, task: TaskId) {
        self.tasks.push(task);
    }

    fn add_processor(&mut self, cpu: ProcId) {
        self.procs.push(cpu);
    }

    fn on_activate(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        let task = ctx.job(job).task;
        if let Some(i) = self.sub_of_task.get(&task) {
            self.subs[*i].on_activate(ctx, job);
        }
    }

    fn on_terminated(&mut self, ctx: &mut SchedContext<'_>, job: JobId) {
        let task = ctx.job(job).task;
        if let Some(i) = self.sub_of_task.get(&task) {
            self.subs[*i].on_terminated(ctx, job);
        }
    }

    fn schedule(&mut self, ctx: &mut SchedContext<'_>, cpu: ProcId) -> Vec<Decision> {
        match self.sub_of_cpu.get(&cpu) {
            Some(i) => self.subs[*i].schedule(ctx, cpu),
            None => Vec::new(),
        }
    }

    fn get_lock(&mut self, _lock: &mut SchedLock) -> bool {
        true
    }

    fn release_lock(&mut self, _lock: &mut SchedLock) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(task: u32, period: f64, wcet: f64) -> PackItem {
        PackItem {
            task: TaskId(task),
            period,
            wcet,
        }
    }

    #[test]
    fn test_first_fit() {
        let items = [item(0, 10.0, 6.0), item(1, 10.0, 5.0), item(2, 10.0, 3.5)];
        assert_eq!(PackingHeuristic::FirstFit.pack(&items, 2), Ok(vec![0, 1, 0]));
    }

    #[test]
    fn test_decreasing_first_fit_sorts_by_utilization() {
        let items = [item(0, 10.0, 2.5), item(1, 10.0, 8.0), item(2, 10.0, 7.0)];
        // Packed as 1, 2, 0: task 1 on bin 0, task 2 on bin 1, task 0 fits
        // next to task 2.
        assert_eq!(
            PackingHeuristic::DecreasingFirstFit.pack(&items, 2),
            Ok(vec![1, 0, 1])
        );
    }

    #[test]
    fn test_best_and_worst_fit() {
        let items = [item(0, 10.0, 5.0), item(1, 10.0, 2.0), item(2, 10.0, 1.0)];
        assert_eq!(PackingHeuristic::BestFit.pack(&items, 2), Ok(vec![0, 0, 0]));
        assert_eq!(PackingHeuristic::WorstFit.pack(&items, 2), Ok(vec![0, 1, 1]));
    }

    #[test]
    fn test_next_fit_does_not_look_back() {
        let items = [item(0, 10.0, 6.0), item(1, 10.0, 6.0), item(2, 10.0, 1.0)];
        assert_eq!(PackingHeuristic::NextFit.pack(&items, 2), Ok(vec![0, 1, 1]));
    }

    #[test]
    fn test_packing_failure_names_task() {
        let items = [item(0, 10.0, 8.0), item(1, 10.0, 8.0), item(2, 10.0, 8.0)];
        assert_eq!(PackingHeuristic::FirstFit.pack(&items, 2), Err(TaskId(2)));
    }

    #[test]
    fn test_heuristic_from_def() {
        let mut def = SchedulerDef::new("P_EDF");
        assert_eq!(
            PackingHeuristic::from_def(&def),
            Ok(PackingHeuristic::DecreasingFirstFit)
        );
        def.data.insert("packing".into(), "worst_fit".into());
        assert_eq!(PackingHeuristic::from_def(&def), Ok(PackingHeuristic::WorstFit));
        def.data.insert("packing".into(), "random".into());
        assert!(PackingHeuristic::from_def(&def).is_err());
    }
}
