//! Cache hierarchy state and stack-distance profiles.

use std::collections::BTreeMap;
use std::path::Path;

use crate::scenario::ScenarioError;
use crate::types::{CacheId, ProcId, TaskId};

/// Stack-distance profile: frequency of each reuse distance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackProfile {
    entries: BTreeMap<u64, f64>,
}

impl StackProfile {
    pub fn from_map(entries: BTreeMap<u64, f64>) -> Self {
        StackProfile { entries }
    }

    /// Parse the text format: one `distance value` pair per line. Blank
    /// lines are ignored.
    pub fn parse(text: &str) -> Result<Self, ScenarioError> {
        let mut entries = BTreeMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let mut fields = line.split_whitespace();
            let Some(dist) = fields.next() else {
                continue;
            };
            let value = fields.next().ok_or_else(|| ScenarioError::StackProfile {
                line: line_no,
                msg: "expected `distance value`".into(),
            })?;
            if fields.next().is_some() {
                return Err(ScenarioError::StackProfile {
                    line: line_no,
                    msg: "trailing fields".into(),
                });
            }
            let dist: u64 = dist.parse().map_err(|_| ScenarioError::StackProfile {
                line: line_no,
                msg: format!("bad distance {dist:?}"),
            })?;
            let value: f64 = value.parse().map_err(|_| ScenarioError::StackProfile {
                line: line_no,
                msg: format!("bad value {value:?}"),
            })?;
            entries.insert(dist, value);
        }
        Ok(StackProfile { entries })
    }

    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<u64, f64> {
        &self.entries
    }
}

/// Cumulative stack-distance profile.
///
/// `get(d)` is the sum of the frequencies of all distances strictly below
/// `d`, so `1 - get(size)` is the miss rate of an LRU cache of `size` lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Csdp {
    table: Vec<f64>,
}

impl Csdp {
    pub fn new(profile: &StackProfile) -> Self {
        let mut table = vec![0.0];
        let mut c = 0u64;
        let mut s = 0.0;
        for (&dist, &value) in profile.entries() {
            while c < dist {
                table.push(s);
                c += 1;
            }
            s += value;
        }
        table.push(s);
        Csdp { table }
    }

    pub fn get(&self, dist: u64) -> f64 {
        let idx = dist as usize;
        match self.table.get(idx) {
            Some(v) => *v,
            None => self.table.last().copied().unwrap_or(0.0),
        }
    }

    /// Cumulative frequency over the whole profile.
    pub fn total(&self) -> f64 {
        self.table.last().copied().unwrap_or(0.0)
    }
}

/// Capacity miss rate of an LRU cache holding `cache_size` lines.
pub fn capacity_miss_lru(csdp: &Csdp, cache_size: f64) -> f64 {
    let lines = if cache_size <= 0.0 {
        0
    } else {
        (cache_size + 0.5) as u64
    };
    1.0 - csdp.get(lines)
}

/// Runtime state of one cache level.
#[derive(Debug, Clone)]
pub struct Cache {
    pub id: CacheId,
    /// User-facing identifier from the scenario.
    pub ident: u32,
    pub name: String,
    /// Capacity, in lines.
    pub size: u64,
    pub access_time: u64,
    /// Extra cycles paid by a miss at this level.
    pub penalty: f64,
    /// Processors attached to this cache.
    pub shared_with: Vec<ProcId>,
}

/// LRU ordering of the lines each task occupies in a cache.
///
/// Groups are kept from least to most recently used. Updating a task moves
/// its group to the MRU end; lines are then reclaimed from the LRU end until
/// the total fits the capacity.
#[derive(Debug, Clone, Default)]
pub struct LruOccupancy {
    capacity: u64,
    groups: Vec<(TaskId, u64)>,
}

impl LruOccupancy {
    pub fn new(capacity: u64) -> Self {
        LruOccupancy {
            capacity,
            groups: Vec::new(),
        }
    }

    pub fn update(&mut self, task: TaskId, lines: u64) {
        self.groups.retain(|(t, _)| *t != task);
        self.groups.push((task, lines));

        let mut used: u64 = self.groups.iter().map(|(_, l)| l).sum();
        while used > self.capacity {
            let excess = used - self.capacity;
            let Some(first) = self.groups.first_mut() else {
                break;
            };
            if first.1 <= excess {
                used -= first.1;
                self.groups.remove(0);
            } else {
                first.1 -= excess;
                used = self.capacity;
            }
        }
    }

    /// Lines currently held by `task`.
    pub fn lines(&self, task: TaskId) -> u64 {
        self.groups
            .iter()
            .find(|(t, _)| *t == task)
            .map_or(0, |(_, l)| *l)
    }

    pub fn used(&self) -> u64 {
        self.groups.iter().map(|(_, l)| l).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stack_profile() {
        let p = StackProfile::parse("0 0.25\n\n3 0.5\n10 0.25\n").unwrap();
        assert_eq!(p.entries().len(), 3);
        assert_eq!(p.entries()[&3], 0.5);

        let err = StackProfile::parse("1 0.5\n2\n").unwrap_err();
        assert!(matches!(err, ScenarioError::StackProfile { line: 2, .. }));
        assert!(StackProfile::parse("x 0.5").is_err());
    }

    #[test]
    fn test_csdp_cumulates_below_distance() {
        let p = StackProfile::parse("0 0.25\n3 0.5\n10 0.25\n").unwrap();
        let csdp = Csdp::new(&p);
        assert_eq!(csdp.get(0), 0.0);
        assert_eq!(csdp.get(1), 0.25);
        assert_eq!(csdp.get(3), 0.25);
        assert_eq!(csdp.get(4), 0.75);
        assert_eq!(csdp.get(10), 0.75);
        assert_eq!(csdp.get(11), 1.0);
        assert_eq!(csdp.get(10_000), 1.0);
        assert_eq!(csdp.total(), 1.0);
    }

    #[test]
    fn test_capacity_miss_lru_step() {
        let mut m = BTreeMap::new();
        m.insert(600, 1.0);
        let csdp = Csdp::new(&StackProfile::from_map(m));
        assert_eq!(capacity_miss_lru(&csdp, 500.0), 1.0);
        assert_eq!(capacity_miss_lru(&csdp, 600.4), 1.0);
        assert_eq!(capacity_miss_lru(&csdp, 1000.0), 0.0);
        assert_eq!(capacity_miss_lru(&csdp, 0.0), 1.0);
    }

    #[test]
    fn test_lru_occupancy_evicts_oldest() {
        let mut lru = LruOccupancy::new(100);
        lru.update(TaskId(0), 60);
        lru.update(TaskId(1), 30);
        assert_eq!(lru.used(), 90);

        // T2 needs 50: T0 loses 40 lines.
        lru.update(TaskId(2), 50);
        assert_eq!(lru.lines(TaskId(0)), 20);
        assert_eq!(lru.lines(TaskId(1)), 30);
        assert_eq!(lru.lines(TaskId(2)), 50);

        // Refreshing T0 makes T1 the oldest group, which gets fully evicted.
        lru.update(TaskId(0), 80);
        assert_eq!(lru.lines(TaskId(1)), 0);
        assert_eq!(lru.lines(TaskId(2)), 20);
        assert_eq!(lru.used(), 100);
    }
}
