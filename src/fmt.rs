//! Compact formatting helpers for trace and log output.

use std::cell::Cell;
use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::types::{Cycles, ProcId};

thread_local! {
    static SIM_CLOCK: Cell<Cycles> = const { Cell::new(0) };
    static SIM_CPU: Cell<Option<ProcId>> = const { Cell::new(None) };
}

/// Virtual time of the simulation currently running on this thread.
pub fn sim_clock() -> Cycles {
    SIM_CLOCK.with(|c| c.get())
}

/// Processor whose event is being handled, if any.
pub fn sim_cpu() -> Option<ProcId> {
    SIM_CPU.with(|c| c.get())
}

/// Update the thread-local clock. Called by the engine before logging so
/// [`SimFormat`] can stamp lines with virtual time.
pub fn set_sim_clock(now: Cycles) {
    SIM_CLOCK.with(|c| c.set(now));
}

pub fn set_sim_cpu(cpu: Option<ProcId>) {
    SIM_CPU.with(|c| c.set(cpu));
}

/// Wrapper that displays large round numbers compactly.
///
/// Exact multiples of powers of 1000 are shortened:
/// - `1_000` → `1K`
/// - `20_000_000` → `20M`
/// - `3_000_000_000` → `3B`
///
/// Non-round numbers pass through unchanged: `12345` → `12345`.
pub struct FmtN(pub u64);

impl fmt::Display for FmtN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        const SUFFIXES: &[(u64, &str)] = &[
            (1_000_000_000_000, "T"),
            (1_000_000_000, "B"),
            (1_000_000, "M"),
            (1_000, "K"),
        ];
        for &(divisor, suffix) in SUFFIXES {
            if v >= divisor && v % divisor == 0 {
                return write!(f, "{}{}", v / divisor, suffix);
            }
        }
        write!(f, "{v}")
    }
}

/// Timestamp formatter with underscore-grouped digits.
///
/// When a processor is known the suffix carries its zero-padded index:
/// - `[        988_779:P1]`: processor 1
/// - `[        988_779:P]`: no processor context (task releases, timers)
pub struct FmtTs {
    pub cycles: Cycles,
    pub cpu: Option<ProcId>,
    pub width: u8,
}

impl FmtTs {
    pub fn new(cycles: Cycles, cpu: Option<ProcId>, width: u8) -> Self {
        Self { cycles, cpu, width }
    }
}

/// Format a u64 with underscore grouping (groups of 3 from the right).
pub(crate) fn fmt_grouped(v: u64) -> String {
    let digits = v.to_string();
    let len = digits.len();
    if len <= 3 {
        return digits;
    }
    let mut result = String::with_capacity(len + (len - 1) / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push('_');
        }
        result.push(ch);
    }
    result
}

impl fmt::Display for FmtTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grouped = fmt_grouped(self.cycles);
        match self.cpu {
            Some(cpu) => {
                let w = self.width as usize;
                write!(f, "{:>15}:P{:0>w$}", grouped, cpu.0, w = w)
            }
            None => write!(f, "{:>15}:P", grouped),
        }
    }
}

/// Custom event formatter that shows simulator virtual time instead of
/// wall-clock time and uses plain colored text.
pub struct SimFormat;

impl<S, N> FormatEvent<S, N> for SimFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "[{}] ", FmtTs::new(sim_clock(), sim_cpu(), 1))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::ERROR => "\x1b[31m",
                Level::WARN => "\x1b[33m",
                Level::INFO => "\x1b[32m",
                Level::DEBUG => "\x1b[34m",
                Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{color}{level:>5}\x1b[0m ")?;
        } else {
            write!(writer, "{level:>5} ")?;
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        write!(writer, "{}", visitor.message)?;
        for (key, value) in &visitor.fields {
            write!(writer, " {key}={value}")?;
        }

        writeln!(writer)
    }
}

/// Visitor that collects the message and key-value fields from a tracing event.
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_n() {
        assert_eq!(FmtN(0).to_string(), "0");
        assert_eq!(FmtN(999).to_string(), "999");
        assert_eq!(FmtN(1_000).to_string(), "1K");
        assert_eq!(FmtN(1_500).to_string(), "1500");
        assert_eq!(FmtN(7_000_000).to_string(), "7M");
        assert_eq!(FmtN(3_000_000_000).to_string(), "3B");
    }

    #[test]
    fn test_fmt_grouped() {
        assert_eq!(fmt_grouped(0), "0");
        assert_eq!(fmt_grouped(999), "999");
        assert_eq!(fmt_grouped(1_000), "1_000");
        assert_eq!(fmt_grouped(1_234_567), "1_234_567");
    }

    #[test]
    fn test_fmt_ts() {
        assert_eq!(FmtTs::new(0, None, 1).to_string(), "              0:P");
        assert_eq!(
            FmtTs::new(10_000, Some(ProcId(3)), 1).to_string(),
            "         10_000:P3"
        );
        assert_eq!(
            FmtTs::new(20_000_000, Some(ProcId(1)), 2).to_string(),
            "     20_000_000:P01"
        );
    }

    #[test]
    fn test_sim_clock_thread_local() {
        set_sim_clock(42);
        set_sim_cpu(Some(ProcId(2)));
        assert_eq!(sim_clock(), 42);
        assert_eq!(sim_cpu(), Some(ProcId(2)));
        set_sim_cpu(None);
        assert_eq!(sim_cpu(), None);
    }
}
