//! Virtual-time timers.
//!
//! A timer fires its callback `delay` cycles after being started, once or
//! periodically. A timer bound to a processor does not run its callback at
//! the firing instant: it posts a `TimerFired` event to that processor, so
//! the callback goes through the processor's normal event handling.
//!
//! Stopping a timer bumps its generation. Any firing already queued for an
//! older generation is discarded when it comes up.

use crate::engine::SimError;
use crate::types::{Cycles, JobId, ProcId, TimerId};

/// What to do when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCallback {
    /// Deadline monitor of a job: abort it if it cannot finish in time.
    JobDeadline(JobId),
    /// Forwarded to [`Scheduler::on_timer`](crate::scheduler::Scheduler::on_timer)
    /// with the scheduler-chosen cookie.
    Scheduler { cookie: u64 },
}

/// A delay, either in milliseconds or directly in cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerDelay {
    Ms(f64),
    Cycles(i64),
}

impl TimerDelay {
    /// Convert to cycles, rejecting negative values.
    fn to_cycles(self, cycles_per_ms: u64) -> Result<Cycles, SimError> {
        match self {
            TimerDelay::Ms(ms) => {
                if !(ms >= 0.0) {
                    return Err(SimError::NegativeTimerDelay { delay: ms });
                }
                Ok((ms * cycles_per_ms as f64) as Cycles)
            }
            TimerDelay::Cycles(c) => {
                if c < 0 {
                    return Err(SimError::NegativeTimerDelay { delay: c as f64 });
                }
                Ok(c as Cycles)
            }
        }
    }
}

/// Parameters of a timer to create.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerSpec {
    pub delay: TimerDelay,
    pub one_shot: bool,
    pub cpu: Option<ProcId>,
    pub overhead: TimerDelay,
    pub callback: TimerCallback,
}

impl TimerSpec {
    /// A one-shot, unbound timer with no overhead.
    pub fn new(delay: TimerDelay, callback: TimerCallback) -> Self {
        TimerSpec {
            delay,
            one_shot: true,
            cpu: None,
            overhead: TimerDelay::Cycles(0),
            callback,
        }
    }

    /// Re-arm after every firing. A periodic timer needs a delay of at
    /// least one cycle.
    pub fn periodic(mut self) -> Self {
        self.one_shot = false;
        self
    }

    pub fn on_cpu(mut self, cpu: ProcId) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn with_overhead(mut self, overhead: TimerDelay) -> Self {
        self.overhead = overhead;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Timer {
    pub id: TimerId,
    pub delay: Cycles,
    pub one_shot: bool,
    pub cpu: Option<ProcId>,
    pub overhead: Cycles,
    pub callback: TimerCallback,
    /// Set by `start`, cleared by `stop` and after a one-shot handler ran.
    pub running: bool,
    generation: u64,
    /// Number of times the callback actually ran.
    pub handled: u64,
}

impl Timer {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// All timers of one simulation run.
#[derive(Debug, Default)]
pub struct TimerTable {
    timers: Vec<Timer>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, spec: TimerSpec, cycles_per_ms: u64) -> Result<TimerId, SimError> {
        let delay = spec.delay.to_cycles(cycles_per_ms)?;
        if !spec.one_shot && delay == 0 {
            return Err(SimError::ZeroTimerPeriod);
        }
        let overhead = spec.overhead.to_cycles(cycles_per_ms)?;
        let id = TimerId(self.timers.len() as u32);
        self.timers.push(Timer {
            id,
            delay,
            one_shot: spec.one_shot,
            cpu: spec.cpu,
            overhead,
            callback: spec.callback,
            running: false,
            generation: 0,
            handled: 0,
        });
        Ok(id)
    }

    pub fn get(&self, id: TimerId) -> &Timer {
        &self.timers[id.index()]
    }

    /// Start (or restart) a timer. Returns the firing instant and the
    /// generation the firing event must carry.
    pub fn arm(&mut self, id: TimerId, now: Cycles) -> (Cycles, u64) {
        let timer = &mut self.timers[id.index()];
        timer.generation += 1;
        timer.running = true;
        (now + timer.delay, timer.generation)
    }

    /// Cancel any pending firing. Stopping twice is harmless.
    pub fn stop(&mut self, id: TimerId) {
        let timer = &mut self.timers[id.index()];
        if timer.running {
            timer.generation += 1;
        }
        timer.running = false;
    }

    /// Whether a firing event of `generation` is still current.
    pub fn is_current(&self, id: TimerId, generation: u64) -> bool {
        let timer = &self.timers[id.index()];
        timer.running && timer.generation == generation
    }

    /// Record that the handler ran. One-shot timers stop here.
    pub(crate) fn mark_handled(&mut self, id: TimerId) {
        let timer = &mut self.timers[id.index()];
        timer.handled += 1;
        if timer.one_shot {
            timer.running = false;
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
