//! Splitting sized work items into groups for the worker pool.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::Weighted;

/// How items are split across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Longest-processing-time-first bin packing into exactly `k` groups.
    /// Minimises the makespan but does not keep the input order.
    Balanced,
    /// Consecutive runs bounded by the largest single item. Keeps the input
    /// order; `k` is ignored.
    Chunked,
}

/// One unit of work for a single thread.
#[derive(Debug, Clone)]
pub struct WorkGroup<T> {
    pub items: Vec<T>,
    pub aggregate_size: u64,
}

impl<T> WorkGroup<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            aggregate_size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Weighted> WorkGroup<T> {
    fn push(&mut self, item: T) {
        self.aggregate_size += item.weight();
        self.items.push(item);
    }
}

impl<T: Weighted> fmt::Display for WorkGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{size:{}, items:[", self.aggregate_size)?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", item.weight())?;
        }
        write!(f, "]}}")
    }
}

pub type PartitionPlan<T> = Vec<WorkGroup<T>>;

/// Pairs an arbitrary payload with the weight it should be scheduled by.
#[derive(Debug, Clone)]
pub struct Weighed<T> {
    pub item: T,
    pub weight: u64,
}

impl<T> Weighted for Weighed<T> {
    fn weight(&self) -> u64 {
        self.weight
    }
}

/// Worker count for a machine with `cpus` hardware threads.
///
/// Extraction is I/O heavy, so small machines are oversubscribed.
pub fn desired_parallelism(cpus: usize) -> usize {
    match cpus {
        0 | 1 => 3,
        2 => 4,
        c => c + 1,
    }
}

/// Group count for `item_count` items: never more groups than items.
pub fn group_count(desired: usize, item_count: usize) -> usize {
    desired.min(item_count)
}

/// Everything in one group, input order kept. Used for the serial paths.
pub fn single<T: Weighted>(items: Vec<T>) -> PartitionPlan<T> {
    if items.is_empty() {
        return Vec::new();
    }
    let mut group = WorkGroup::new();
    for item in items {
        group.push(item);
    }
    vec![group]
}

pub fn partition<T: Weighted>(policy: Policy, items: Vec<T>, k: usize) -> PartitionPlan<T> {
    match policy {
        Policy::Balanced => balanced(items, k),
        Policy::Chunked => chunked(items),
    }
}

/// LPT bin packing. Returns an empty plan when `k` is zero or exceeds the
/// item count; callers fall back to a single group.
pub fn balanced<T: Weighted>(items: Vec<T>, k: usize) -> PartitionPlan<T> {
    if k == 0 || k > items.len() {
        return Vec::new();
    }

    let mut groups: Vec<WorkGroup<T>> = (0..k).map(|_| WorkGroup::new()).collect();

    if k == items.len() {
        for (group, item) in groups.iter_mut().zip(items) {
            group.push(item);
        }
    } else {
        let mut sorted = items;
        // Stable: equal sizes keep their input order.
        sorted.sort_by(|a, b| b.weight().cmp(&a.weight()));

        let mut rest = sorted.into_iter();
        for group in groups.iter_mut() {
            if let Some(item) = rest.next() {
                group.push(item);
            }
        }
        for item in rest {
            let target = lightest(&groups);
            groups[target].push(item);
        }
    }

    // Heaviest group first so the longest job starts earliest.
    groups.sort_by(|a, b| b.aggregate_size.cmp(&a.aggregate_size));
    groups
}

/// Index of the group with the smallest aggregate; ties go to the lowest index.
fn lightest<T>(groups: &[WorkGroup<T>]) -> usize {
    let mut best = 0;
    let mut best_size = u64::MAX;
    for (i, g) in groups.iter().enumerate() {
        if g.aggregate_size < best_size {
            best_size = g.aggregate_size;
            best = i;
        }
    }
    best
}

/// Order-preserving chunks whose running total never exceeds the largest item,
/// except for a group holding that item alone.
pub fn chunked<T: Weighted>(items: Vec<T>) -> PartitionPlan<T> {
    let max_item = match items.iter().map(Weighted::weight).max() {
        Some(m) => m,
        None => return Vec::new(),
    };

    let mut groups = Vec::new();
    let mut current = WorkGroup::new();
    for item in items {
        let w = item.weight();
        if !current.is_empty() && current.aggregate_size.saturating_add(w) > max_item {
            groups.push(std::mem::replace(&mut current, WorkGroup::new()));
        }
        current.push(item);
    }
    groups.push(current);
    groups
}
