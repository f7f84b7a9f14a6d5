//! Built-in scheduling policies.

pub mod edf_mono;
pub mod global;
pub mod partitioned;

pub use edf_mono::EdfMono;
pub use global::{Edf, FixedPriority, GlobalScheduler, JobPriority, RateMonotonic};
pub use partitioned::{PackItem, PackingHeuristic, Partitioned};

use crate::scenario::SchedulerDef;
use crate::scheduler::{RequiredField, Scheduler, SchedulerError, SchedulerInfo, SchedulerRegistry};

pub(crate) fn register_builtin(reg: &mut SchedulerRegistry) {
    reg.register(
        SchedulerInfo {
            name: "EDF",
            display_name: "Global Earliest Deadline First",
            required_task_fields: Vec::new(),
        },
        new_edf,
    );
    reg.register(
        SchedulerInfo {
            name: "EDF_mono",
            display_name: "Earliest Deadline First (uniprocessor)",
            required_task_fields: Vec::new(),
        },
        new_edf_mono,
    );
    reg.register(
        SchedulerInfo {
            name: "RM",
            display_name: "Global Rate Monotonic",
            required_task_fields: Vec::new(),
        },
        new_rm,
    );
    reg.register(
        SchedulerInfo {
            name: "FP",
            display_name: "Global Fixed Priority",
            required_task_fields: vec![RequiredField {
                name: "priority",
                default: Some(serde_json::json!(0)),
            }],
        },
        new_fp,
    );
    reg.register(
        SchedulerInfo {
            name: "P_EDF",
            display_name: "Partitioned Earliest Deadline First",
            required_task_fields: Vec::new(),
        },
        new_p_edf,
    );
}

fn new_edf(_: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
    Ok(Box::new(GlobalScheduler::<Edf>::new()))
}

fn new_edf_mono(_: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
    Ok(Box::new(EdfMono::new()))
}

fn new_rm(_: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
    Ok(Box::new(GlobalScheduler::<RateMonotonic>::new()))
}

fn new_fp(_: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
    Ok(Box::new(GlobalScheduler::<FixedPriority>::new()))
}

fn new_p_edf(def: &SchedulerDef) -> Result<Box<dyn Scheduler>, SchedulerError> {
    let heuristic = PackingHeuristic::from_def(def)?;
    Ok(Box::new(Partitioned::new(heuristic, edf_mono)))
}

fn edf_mono() -> Box<dyn Scheduler> {
    Box::new(EdfMono::new())
}
