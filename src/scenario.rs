//! Scenario definition, JSON loading and builder API.
//!
//! A [`Scenario`] is the complete input of one simulation run: processors,
//! caches, tasks, the scheduler to instantiate and the execution time model.
//! Task timing parameters are expressed in milliseconds and converted to
//! cycles with `cycles_per_ms`; processor and scheduler overheads are given
//! directly in cycles.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::StackProfile;
use crate::types::{ms_to_cycles, Cycles};

/// Default simulation length in cycles (100ms at the default frequency).
pub const DEFAULT_DURATION: Cycles = 100_000_000;

/// Default conversion factor between milliseconds and cycles.
pub const DEFAULT_CYCLES_PER_MS: u64 = 1_000_000;

/// Default main-memory access time, in cycles.
pub const DEFAULT_MEMORY_ACCESS_TIME: u64 = 100;

/// Default PRNG seed used by the ACET model when none is specified.
pub const DEFAULT_SEED: u64 = 42;

/// Errors produced while loading or validating a scenario.
#[derive(Debug)]
pub enum ScenarioError {
    /// JSON parse error.
    Json(serde_json::Error),
    /// I/O error while reading a scenario or a stack profile.
    Io { path: PathBuf, source: std::io::Error },
    /// A value failed validation.
    InvalidValue(String),
    /// Unknown execution time model name.
    UnknownEtm(String),
    /// Malformed stack-distance profile line.
    StackProfile { line: usize, msg: String },
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Json(e) => write!(f, "JSON parse error: {e}"),
            ScenarioError::Io { path, source } => {
                write!(f, "cannot read {}: {source}", path.display())
            }
            ScenarioError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            ScenarioError::UnknownEtm(name) => {
                write!(f, "unknown execution time model: {name:?}")
            }
            ScenarioError::StackProfile { line, msg } => {
                write!(f, "stack profile line {line}: {msg}")
            }
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScenarioError::Json(e) => Some(e),
            ScenarioError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ScenarioError {
    fn from(e: serde_json::Error) -> Self {
        ScenarioError::Json(e)
    }
}

/// Which execution time model drives job progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtmKind {
    #[default]
    Wcet,
    Acet,
    Cache,
    FixedPenalty,
}

impl EtmKind {
    pub fn name(self) -> &'static str {
        match self {
            EtmKind::Wcet => "wcet",
            EtmKind::Acet => "acet",
            EtmKind::Cache => "cache",
            EtmKind::FixedPenalty => "fixedpenalty",
        }
    }
}

impl std::str::FromStr for EtmKind {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wcet" => Ok(EtmKind::Wcet),
            "acet" => Ok(EtmKind::Acet),
            "cache" => Ok(EtmKind::Cache),
            "fixedpenalty" => Ok(EtmKind::FixedPenalty),
            _ => Err(ScenarioError::UnknownEtm(s.to_string())),
        }
    }
}

/// How a task releases its jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskType {
    /// One job every `period` starting at `activation_date`.
    #[default]
    Periodic,
    /// A single job released externally, typically by a predecessor's
    /// `followed_by` link.
    APeriodic,
    /// One job at each date of `list_activation_dates`.
    Sporadic,
}

fn default_speed() -> f64 {
    1.0
}

fn default_mix() -> f64 {
    0.5
}

fn default_base_cpi() -> f64 {
    1.0
}

fn default_associativity() -> u32 {
    1
}

fn default_duration() -> Cycles {
    DEFAULT_DURATION
}

fn default_cycles_per_ms() -> u64 {
    DEFAULT_CYCLES_PER_MS
}

fn default_memory_access_time() -> u64 {
    DEFAULT_MEMORY_ACCESS_TIME
}

/// Definition of a simulated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    /// Period in milliseconds.
    #[serde(default)]
    pub period: f64,
    /// Relative deadline in milliseconds.
    pub deadline: f64,
    /// First release date in milliseconds (periodic tasks).
    #[serde(default)]
    pub activation_date: f64,
    /// Release dates in milliseconds (sporadic tasks).
    #[serde(default)]
    pub list_activation_dates: Vec<f64>,
    /// Worst-case execution time in milliseconds.
    pub wcet: f64,
    #[serde(default)]
    pub acet: f64,
    #[serde(default)]
    pub et_stddev: f64,
    #[serde(default)]
    pub abort_on_miss: bool,
    /// Identifier of the task released when a job of this one ends.
    #[serde(default)]
    pub followed_by: Option<u32>,
    /// Instruction count of one job (cache model).
    #[serde(default)]
    pub n_instr: u64,
    /// Fraction of memory-accessing instructions (cache model).
    #[serde(default = "default_mix")]
    pub mix: f64,
    #[serde(default = "default_base_cpi")]
    pub base_cpi: f64,
    /// Cycles added to a job resumed after being displaced (cache model).
    #[serde(default)]
    pub preemption_cost: u64,
    /// Path of a stack-distance profile file.
    #[serde(default)]
    pub stack_file: Option<PathBuf>,
    /// Inline stack-distance profile, `distance -> frequency`.
    #[serde(default)]
    pub stack: Option<BTreeMap<u64, f64>>,
    /// Scheduler-specific fields such as `priority`.
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl TaskDef {
    /// A periodic task with an implicit deadline.
    pub fn periodic(id: u32, name: &str, period: f64, wcet: f64) -> Self {
        TaskDef {
            id,
            name: name.to_string(),
            task_type: TaskType::Periodic,
            period,
            deadline: period,
            activation_date: 0.0,
            list_activation_dates: Vec::new(),
            wcet,
            acet: wcet,
            et_stddev: 0.0,
            abort_on_miss: false,
            followed_by: None,
            n_instr: 0,
            mix: default_mix(),
            base_cpi: default_base_cpi(),
            preemption_cost: 0,
            stack_file: None,
            stack: None,
            data: BTreeMap::new(),
        }
    }

    /// A sporadic task released at each of `dates` (milliseconds).
    pub fn sporadic(id: u32, name: &str, dates: Vec<f64>, deadline: f64, wcet: f64) -> Self {
        TaskDef {
            task_type: TaskType::Sporadic,
            period: 0.0,
            deadline,
            list_activation_dates: dates,
            ..TaskDef::periodic(id, name, 0.0, wcet)
        }
    }

    /// A task whose only job is released by a predecessor.
    pub fn aperiodic(id: u32, name: &str, deadline: f64, wcet: f64) -> Self {
        TaskDef {
            task_type: TaskType::APeriodic,
            period: 0.0,
            deadline,
            ..TaskDef::periodic(id, name, 0.0, wcet)
        }
    }

    pub fn with_deadline(mut self, deadline: f64) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_activation_date(mut self, date: f64) -> Self {
        self.activation_date = date;
        self
    }

    pub fn with_abort_on_miss(mut self, abort: bool) -> Self {
        self.abort_on_miss = abort;
        self
    }

    pub fn with_followed_by(mut self, id: u32) -> Self {
        self.followed_by = Some(id);
        self
    }

    pub fn with_acet(mut self, acet: f64, stddev: f64) -> Self {
        self.acet = acet;
        self.et_stddev = stddev;
        self
    }

    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Configure the cache-model parameters of this task.
    pub fn with_cache_profile(
        mut self,
        n_instr: u64,
        mix: f64,
        base_cpi: f64,
        stack: BTreeMap<u64, f64>,
    ) -> Self {
        self.n_instr = n_instr;
        self.mix = mix;
        self.base_cpi = base_cpi;
        self.stack = Some(stack);
        self
    }

    /// Resolve the stack-distance profile, reading `stack_file` if no inline
    /// profile is given.
    pub fn stack_profile(&self) -> Result<Option<StackProfile>, ScenarioError> {
        if let Some(stack) = &self.stack {
            return Ok(Some(StackProfile::from_map(stack.clone())));
        }
        match &self.stack_file {
            Some(path) => StackProfile::from_file(path).map(Some),
            None => Ok(None),
        }
    }

    /// Utilization `wcet / period`, zero for tasks without a period.
    pub fn utilization(&self) -> f64 {
        if self.period > 0.0 {
            self.wcet / self.period
        } else {
            0.0
        }
    }
}

/// Definition of a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorDef {
    pub id: u32,
    pub name: String,
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Context-save overhead, in cycles.
    #[serde(default)]
    pub cs_overhead: Cycles,
    /// Context-load overhead, in cycles.
    #[serde(default)]
    pub cl_overhead: Cycles,
    #[serde(default)]
    pub migration_overhead: Cycles,
    /// Attached cache identifiers, innermost level first.
    #[serde(default)]
    pub caches: Vec<u32>,
}

impl ProcessorDef {
    pub fn new(id: u32, name: &str) -> Self {
        ProcessorDef {
            id,
            name: name.to_string(),
            speed: default_speed(),
            cs_overhead: 0,
            cl_overhead: 0,
            migration_overhead: 0,
            caches: Vec::new(),
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_overheads(mut self, cs: Cycles, cl: Cycles, migration: Cycles) -> Self {
        self.cs_overhead = cs;
        self.cl_overhead = cl;
        self.migration_overhead = migration;
        self
    }

    pub fn with_caches(mut self, caches: Vec<u32>) -> Self {
        self.caches = caches;
        self
    }
}

/// Definition of a cache level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDef {
    pub id: u32,
    pub name: String,
    /// Capacity, in cache lines.
    pub size: u64,
    /// Access time, in cycles.
    pub access_time: u64,
    #[serde(default = "default_associativity")]
    pub associativity: u32,
}

impl CacheDef {
    pub fn new(id: u32, name: &str, size: u64, access_time: u64) -> Self {
        CacheDef {
            id,
            name: name.to_string(),
            size,
            access_time,
            associativity: default_associativity(),
        }
    }
}

/// Which scheduler to instantiate and its overheads (in cycles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerDef {
    /// Registry name, e.g. `"EDF"` or `"P_EDF"`.
    pub name: String,
    #[serde(default)]
    pub overhead: Cycles,
    #[serde(default)]
    pub overhead_activate: Cycles,
    #[serde(default)]
    pub overhead_terminate: Cycles,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl SchedulerDef {
    pub fn new(name: &str) -> Self {
        SchedulerDef {
            name: name.to_string(),
            overhead: 0,
            overhead_activate: 0,
            overhead_terminate: 0,
            data: BTreeMap::new(),
        }
    }

    pub fn with_overheads(mut self, schedule: Cycles, activate: Cycles, terminate: Cycles) -> Self {
        self.overhead = schedule;
        self.overhead_activate = activate;
        self.overhead_terminate = terminate;
        self
    }
}

/// A complete simulation scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Simulation length, in cycles.
    #[serde(default = "default_duration")]
    pub duration: Cycles,
    #[serde(default = "default_cycles_per_ms")]
    pub cycles_per_ms: u64,
    #[serde(default)]
    pub etm: EtmKind,
    /// Penalty added on resumption after preemption (fixed-penalty model).
    #[serde(default)]
    pub penalty_preemption: Cycles,
    /// Penalty added on resumption on another processor (fixed-penalty model).
    #[serde(default)]
    pub penalty_migration: Cycles,
    #[serde(default = "default_memory_access_time")]
    pub memory_access_time: u64,
    /// ACET sampling seed. Falls back to `SIM_SEED`, then [`DEFAULT_SEED`].
    #[serde(default)]
    pub seed: Option<u64>,
    pub processors: Vec<ProcessorDef>,
    #[serde(default)]
    pub caches: Vec<CacheDef>,
    pub tasks: Vec<TaskDef>,
    pub scheduler: SchedulerDef,
}

/// Builder for constructing scenarios.
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl Scenario {
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder {
            scenario: Scenario {
                duration: DEFAULT_DURATION,
                cycles_per_ms: DEFAULT_CYCLES_PER_MS,
                etm: EtmKind::Wcet,
                penalty_preemption: 0,
                penalty_migration: 0,
                memory_access_time: DEFAULT_MEMORY_ACCESS_TIME,
                seed: None,
                processors: Vec::new(),
                caches: Vec::new(),
                tasks: Vec::new(),
                scheduler: SchedulerDef::new("EDF"),
            },
        }
    }

    /// Parse a scenario from a JSON string and validate it.
    pub fn from_json_str(json: &str) -> Result<Scenario, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario from a JSON file. Relative `stack_file` paths are
    /// resolved against the directory holding the scenario.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Scenario, ScenarioError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut scenario: Scenario = serde_json::from_str(&text)?;
        if let Some(dir) = path.parent() {
            for task in &mut scenario.tasks {
                if let Some(file) = &task.stack_file {
                    if file.is_relative() {
                        task.stack_file = Some(dir.join(file));
                    }
                }
            }
        }
        scenario.validate()?;
        info!(
            path = %path.display(),
            tasks = scenario.tasks.len(),
            processors = scenario.processors.len(),
            "loaded scenario"
        );
        Ok(scenario)
    }

    pub fn to_json_string(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration as f64 / self.cycles_per_ms as f64
    }

    pub fn ms_to_cycles(&self, ms: f64) -> Cycles {
        ms_to_cycles(ms, self.cycles_per_ms)
    }

    /// Seed for stochastic execution time models.
    pub fn resolved_seed(&self) -> u64 {
        self.seed.unwrap_or_else(seed_from_env)
    }

    /// Least common multiple of the task periods, in milliseconds.
    ///
    /// Periods are compared at microsecond granularity. Tasks without a
    /// period are ignored; `None` if no task is periodic or if the
    /// hyperperiod does not fit in a `u64` of microseconds.
    pub fn hyperperiod_ms(&self) -> Option<f64> {
        let mut acc: Option<u64> = None;
        for task in &self.tasks {
            if task.task_type != TaskType::Periodic || task.period <= 0.0 {
                continue;
            }
            let us = (task.period * 1000.0).round() as u64;
            if us == 0 {
                continue;
            }
            acc = Some(match acc {
                None => us,
                Some(a) => lcm(a, us)?,
            });
        }
        acc.map(|us| us as f64 / 1000.0)
    }

    /// Sum of task utilizations.
    pub fn total_utilization(&self) -> f64 {
        self.tasks.iter().map(TaskDef::utilization).sum()
    }

    /// Derive the miss penalties of every cache level from access times.
    ///
    /// Walking a processor's caches from the outermost level inward, a
    /// cache's penalty is the access time of the level above it minus its
    /// own; the processor's base penalty is the innermost access time, or the
    /// memory access time without caches.
    pub fn cache_penalties(&self) -> CachePenalties {
        let mut per_proc = Vec::with_capacity(self.processors.len());
        let mut per_cache = BTreeMap::new();
        for proc in &self.processors {
            let mut access_time = self.memory_access_time as f64;
            for cache_id in proc.caches.iter().rev() {
                let Some(cache) = self.caches.iter().find(|c| c.id == *cache_id) else {
                    continue;
                };
                per_cache.insert(cache.id, access_time - cache.access_time as f64);
                access_time = cache.access_time as f64;
            }
            per_proc.push(access_time);
        }
        CachePenalties { per_proc, per_cache }
    }

    /// Check the scenario for inconsistencies without simulating it.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        self.check_general()?;
        self.check_scheduler()?;
        self.check_processors()?;
        self.check_tasks()?;
        self.check_caches()?;
        Ok(())
    }

    fn check_general(&self) -> Result<(), ScenarioError> {
        if self.cycles_per_ms == 0 {
            return Err(invalid("cycles_per_ms must be a positive number"));
        }
        Ok(())
    }

    fn check_scheduler(&self) -> Result<(), ScenarioError> {
        if self.scheduler.name.is_empty() {
            return Err(invalid("a scheduler is needed"));
        }
        Ok(())
    }

    fn check_processors(&self) -> Result<(), ScenarioError> {
        if self.processors.is_empty() {
            return Err(invalid("at least one processor is needed"));
        }

        // Every cache must have the same outer level on every processor.
        let mut succ: BTreeMap<u32, Option<u32>> = BTreeMap::new();
        for proc in &self.processors {
            let mut cur = None;
            for &cache in proc.caches.iter().rev() {
                if let Some(prev) = succ.get(&cache) {
                    if *prev != cur {
                        return Err(invalid("caches must be inclusive"));
                    }
                }
                succ.insert(cache, cur);
                cur = Some(cache);
            }
        }

        let mut ids = BTreeSet::new();
        for proc in &self.processors {
            if !valid_name(&proc.name, true) {
                return Err(invalid(format!(
                    "processor name {:?} must begin with a letter and contain no special character",
                    proc.name
                )));
            }
            if !ids.insert(proc.id) {
                return Err(invalid(format!("duplicate processor id {}", proc.id)));
            }
            if !(proc.speed >= 0.0) {
                return Err(invalid(format!("processor {} speed must be >= 0", proc.name)));
            }
            for cache in &proc.caches {
                if !self.caches.iter().any(|c| c.id == *cache) {
                    return Err(invalid(format!(
                        "processor {} references unknown cache {cache}",
                        proc.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_tasks(&self) -> Result<(), ScenarioError> {
        if self.tasks.is_empty() {
            return Err(invalid("at least one task is needed"));
        }
        let mut ids = BTreeSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id) {
                return Err(invalid(format!("duplicate task id {}", task.id)));
            }
            if !valid_name(&task.name, true) {
                return Err(invalid(format!(
                    "task name {:?} must begin with a letter and contain no special character",
                    task.name
                )));
            }
            let non_negative = [
                ("activation date", task.activation_date),
                ("period", task.period),
                ("deadline", task.deadline),
                ("wcet", task.wcet),
                ("acet", task.acet),
                ("et_stddev", task.et_stddev),
            ];
            for (what, value) in non_negative {
                if !(value >= 0.0) {
                    return Err(invalid(format!("task {}: {what} must be >= 0", task.name)));
                }
            }
            if task.task_type == TaskType::Periodic && task.period <= 0.0 {
                return Err(invalid(format!(
                    "task {}: periodic tasks need a positive period",
                    task.name
                )));
            }
            if task.list_activation_dates.iter().any(|d| !(*d >= 0.0)) {
                return Err(invalid(format!(
                    "task {}: activation dates must be >= 0",
                    task.name
                )));
            }
            if !(0.0..=2.0).contains(&task.mix) {
                return Err(invalid(format!(
                    "task {}: mix must be within [0, 2]",
                    task.name
                )));
            }
            if let Some(next) = task.followed_by {
                if !self.tasks.iter().any(|t| t.id == next) {
                    return Err(invalid(format!(
                        "task {}: followed_by references unknown task {next}",
                        task.name
                    )));
                }
            }
            if self.etm == EtmKind::Cache {
                if task.stack.is_none() && task.stack_file.is_none() {
                    return Err(invalid(format!(
                        "task {} needs a stack profile",
                        task.name
                    )));
                }
                if let Some(stack) = &task.stack {
                    if stack.is_empty() {
                        return Err(invalid(format!(
                            "task {}: stack profile is empty",
                            task.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_caches(&self) -> Result<(), ScenarioError> {
        let mut ids = BTreeSet::new();
        for cache in &self.caches {
            if !ids.insert(cache.id) {
                return Err(invalid(format!("duplicate cache id {}", cache.id)));
            }
            if !valid_name(&cache.name, false) {
                return Err(invalid(format!(
                    "cache name {:?} must begin with a letter and contain no special character nor space",
                    cache.name
                )));
            }
        }
        Ok(())
    }
}

/// Miss penalties derived by [`Scenario::cache_penalties`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachePenalties {
    /// Base memory-access penalty per processor, in scenario order.
    pub per_proc: Vec<f64>,
    /// Penalty per cache identifier.
    pub per_cache: BTreeMap<u32, f64>,
}

impl ScenarioBuilder {
    /// Add `n` identical processors named `CPU 1`, `CPU 2`, ...
    pub fn processors(mut self, n: u32) -> Self {
        let base = self.scenario.processors.len() as u32;
        for i in 0..n {
            let id = base + i + 1;
            self.scenario
                .processors
                .push(ProcessorDef::new(id, &format!("CPU {id}")));
        }
        self
    }

    pub fn processor(mut self, def: ProcessorDef) -> Self {
        self.scenario.processors.push(def);
        self
    }

    pub fn cache(mut self, def: CacheDef) -> Self {
        self.scenario.caches.push(def);
        self
    }

    pub fn task(mut self, def: TaskDef) -> Self {
        self.scenario.tasks.push(def);
        self
    }

    /// Select a scheduler by registry name, with no overhead.
    pub fn scheduler(mut self, name: &str) -> Self {
        self.scenario.scheduler = SchedulerDef::new(name);
        self
    }

    pub fn scheduler_def(mut self, def: SchedulerDef) -> Self {
        self.scenario.scheduler = def;
        self
    }

    pub fn etm(mut self, etm: EtmKind) -> Self {
        self.scenario.etm = etm;
        self
    }

    pub fn cycles_per_ms(mut self, cycles: u64) -> Self {
        self.scenario.cycles_per_ms = cycles;
        self
    }

    /// Set the simulation duration in cycles.
    pub fn duration(mut self, cycles: Cycles) -> Self {
        self.scenario.duration = cycles;
        self
    }

    /// Set the simulation duration in milliseconds, using the current
    /// `cycles_per_ms`.
    pub fn duration_ms(mut self, ms: f64) -> Self {
        self.scenario.duration = ms_to_cycles(ms, self.scenario.cycles_per_ms);
        self
    }

    pub fn penalties(mut self, preemption: Cycles, migration: Cycles) -> Self {
        self.scenario.penalty_preemption = preemption;
        self.scenario.penalty_migration = migration;
        self
    }

    pub fn memory_access_time(mut self, cycles: u64) -> Self {
        self.scenario.memory_access_time = cycles;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.scenario.seed = Some(seed);
        self
    }

    /// Build and validate the scenario.
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        self.scenario.validate()?;
        Ok(self.scenario)
    }
}

/// Parse a seed string: a `u64` integer.
///
/// Returns [`DEFAULT_SEED`] for `None`, empty or unparsable strings.
pub fn parse_seed(s: Option<&str>) -> u64 {
    match s.map(str::trim) {
        None | Some("") => DEFAULT_SEED,
        Some(s) => s.parse().unwrap_or(DEFAULT_SEED),
    }
}

/// Resolve the PRNG seed from the `SIM_SEED` environment variable.
pub fn seed_from_env() -> u64 {
    parse_seed(std::env::var("SIM_SEED").ok().as_deref())
}

fn invalid(msg: impl Into<String>) -> ScenarioError {
    ScenarioError::InvalidValue(msg.into())
}

/// Names start with an ASCII letter followed by letters, digits, `_`, `-`
/// and optionally spaces.
fn valid_name(name: &str, allow_space: bool) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || (allow_space && c == ' '))
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: u64, b: u64) -> Option<u64> {
    (a / gcd(a, b)).checked_mul(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rm_scenario() -> Scenario {
        Scenario::builder()
            .processors(1)
            .task(TaskDef::periodic(1, "T1", 7.0, 3.0))
            .task(TaskDef::periodic(2, "T2", 12.0, 3.0))
            .task(TaskDef::periodic(3, "T3", 20.0, 5.0))
            .scheduler("RM")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let s = rm_scenario();
        assert_eq!(s.duration, DEFAULT_DURATION);
        assert_eq!(s.cycles_per_ms, DEFAULT_CYCLES_PER_MS);
        assert_eq!(s.etm, EtmKind::Wcet);
        assert_eq!(s.memory_access_time, 100);
        assert_eq!(s.processors[0].name, "CPU 1");
    }

    #[test]
    fn test_hyperperiod_and_utilization() {
        let s = rm_scenario();
        assert_eq!(s.hyperperiod_ms(), Some(420.0));
        let u = s.total_utilization();
        assert!((u - (3.0 / 7.0 + 3.0 / 12.0 + 5.0 / 20.0)).abs() < 1e-12);
    }

    #[test]
    fn test_hyperperiod_overflow_is_none() {
        let mut b = Scenario::builder().processors(1);
        for (i, period) in [10.007, 10.009, 10.037, 10.039, 10.061].into_iter().enumerate() {
            b = b.task(TaskDef::periodic(i as u32 + 1, &format!("T{i}"), period, 1.0));
        }
        assert_eq!(b.build().unwrap().hyperperiod_ms(), None);
    }

    #[test]
    fn test_validate_rejects_bad_names_and_ids() {
        let err = Scenario::builder()
            .processors(1)
            .task(TaskDef::periodic(1, "1bad", 10.0, 1.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidValue(_)));

        let err = Scenario::builder()
            .processors(1)
            .task(TaskDef::periodic(1, "A", 10.0, 1.0))
            .task(TaskDef::periodic(1, "B", 10.0, 1.0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate task id"));
    }

    #[test]
    fn test_validate_requires_processor_and_task() {
        let err = Scenario::builder()
            .task(TaskDef::periodic(1, "A", 10.0, 1.0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("processor"));

        let err = Scenario::builder().processors(1).build().unwrap_err();
        assert!(err.to_string().contains("task"));
    }

    #[test]
    fn test_validate_mix_range() {
        let mut task = TaskDef::periodic(1, "A", 10.0, 1.0);
        task.mix = 2.5;
        let err = Scenario::builder()
            .processors(1)
            .task(task)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mix"));
    }

    #[test]
    fn test_validate_cache_etm_needs_stack() {
        let err = Scenario::builder()
            .processors(1)
            .etm(EtmKind::Cache)
            .task(TaskDef::periodic(1, "A", 10.0, 1.0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("stack profile"));
    }

    #[test]
    fn test_validate_inclusive_caches() {
        // cpu1: L1a -> L2, cpu2: L1a -> L3 (L1a has two different outer levels)
        let err = Scenario::builder()
            .processor(ProcessorDef::new(1, "P1").with_caches(vec![1, 2]))
            .processor(ProcessorDef::new(2, "P2").with_caches(vec![1, 3]))
            .cache(CacheDef::new(1, "L1a", 32, 1))
            .cache(CacheDef::new(2, "L2", 256, 10))
            .cache(CacheDef::new(3, "L3", 1024, 30))
            .task(TaskDef::periodic(1, "A", 10.0, 1.0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("inclusive"));
    }

    #[test]
    fn test_cache_penalties() {
        let s = Scenario::builder()
            .processor(ProcessorDef::new(1, "P1").with_caches(vec![1, 2]))
            .processor(ProcessorDef::new(2, "P2"))
            .cache(CacheDef::new(1, "L1", 32, 2))
            .cache(CacheDef::new(2, "L2", 256, 10))
            .task(TaskDef::periodic(1, "A", 10.0, 1.0))
            .build()
            .unwrap();
        let p = s.cache_penalties();
        assert_eq!(p.per_proc, vec![2.0, 100.0]);
        assert_eq!(p.per_cache[&2], 90.0);
        assert_eq!(p.per_cache[&1], 8.0);
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let json = r#"{
            "processors": [{"id": 1, "name": "CPU 1"}],
            "tasks": [{"id": 1, "name": "T1", "period": 10, "deadline": 10, "wcet": 2}],
            "scheduler": {"name": "EDF"},
            "etm": "fixedpenalty"
        }"#;
        let s = Scenario::from_json_str(json).unwrap();
        assert_eq!(s.etm, EtmKind::FixedPenalty);
        assert_eq!(s.processors[0].speed, 1.0);
        assert_eq!(s.tasks[0].task_type, TaskType::Periodic);
        assert_eq!(s.tasks[0].mix, 0.5);
        let again = Scenario::from_json_str(&s.to_json_string().unwrap()).unwrap();
        assert_eq!(again, s);
    }

    #[test]
    fn test_json_errors() {
        assert!(matches!(
            Scenario::from_json_str("{"),
            Err(ScenarioError::Json(_))
        ));
        assert!(matches!(
            "bogus".parse::<EtmKind>(),
            Err(ScenarioError::UnknownEtm(_))
        ));
        assert_eq!("ACET".parse::<EtmKind>().unwrap(), EtmKind::Acet);
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed(None), DEFAULT_SEED);
        assert_eq!(parse_seed(Some("")), DEFAULT_SEED);
        assert_eq!(parse_seed(Some("7")), 7);
        assert_eq!(parse_seed(Some("nope")), DEFAULT_SEED);
    }
}
