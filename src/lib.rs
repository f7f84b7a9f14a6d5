//! rtsim - Deterministic discrete-event simulator for multiprocessor
//! real-time schedulers.
//!
//! A scenario describes processors, an optional cache hierarchy and a set of
//! periodic, sporadic or aperiodic tasks. The simulator releases their jobs,
//! lets a scheduling policy decide which job runs where, charges the
//! configured overheads and records everything into a trace.
//!
//! # Architecture
//!
//! - **Engine**: Event queue in virtual cycles and the `World` arena holding
//!   every entity of a run
//! - **Processors**: Per-processor event queue and state machine that pays
//!   context-switch, scheduling and migration overheads
//! - **Tasks / Jobs**: Release patterns, per-task job FIFOs and deadline
//!   monitors
//! - **Schedulers**: The `Scheduler` trait, a name-based registry and the
//!   built-in global and partitioned policies
//! - **ETM**: Execution time models deciding how fast jobs progress (WCET,
//!   sampled ACET, fixed penalties, shared caches)
//!
//! # Usage
//!
//! ```rust,no_run
//! use rtsim::*;
//!
//! let scenario = Scenario::builder()
//!     .cycles_per_ms(1_000)
//!     .processors(2)
//!     .task(TaskDef::periodic(1, "T1", 10.0, 4.0))
//!     .task(TaskDef::periodic(2, "T2", 20.0, 8.0))
//!     .scheduler("EDF")
//!     .duration_ms(100.0)
//!     .build()
//!     .unwrap();
//!
//! let result = simulate(&scenario).unwrap();
//! result.trace.dump();
//! println!("deadline misses: {}", result.total_deadline_misses());
//! ```

pub mod cache;
pub mod engine;
pub mod etm;
pub mod fmt;
pub mod job;
pub mod processor;
pub mod scenario;
pub mod scheduler;
pub mod schedulers;
pub mod task;
pub mod timer;
pub mod trace;
pub mod types;

// Re-export the main public types for convenience.
pub use engine::{
    simulate, ExitKind, JobOutcome, Model, ModelError, SimError, SimulationResult, TaskOutcome,
    World,
};
pub use etm::ExecutionTimeModel;
pub use fmt::SimFormat;
pub use scenario::{
    CacheDef, EtmKind, ProcessorDef, Scenario, ScenarioError, SchedulerDef, TaskDef, TaskType,
};
pub use scheduler::{
    Decision, SchedContext, Scheduler, SchedulerError, SchedulerInfo, SchedulerRegistry,
};
pub use timer::{TimerCallback, TimerDelay, TimerSpec};
pub use trace::{Trace, TraceEvent, TraceKind};
pub use types::{CacheId, Cycles, JobId, ProcId, TaskId, TimerId};
