// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Counter unit. Time- and rate-valued counters average across instances
/// when merged; everything else sums.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CounterUnit {
    Unit,
    Bytes,
    Rows,
    TimeNs,
    BytesPerSecond,
    RowsPerSecond,
}

impl CounterUnit {
    fn averages_on_merge(self) -> bool {
        matches!(
            self,
            CounterUnit::TimeNs | CounterUnit::BytesPerSecond | CounterUnit::RowsPerSecond
        )
    }
}

#[derive(Clone, Debug)]
struct CounterSnapshot {
    name: String,
    unit: CounterUnit,
    value: i64,
    min_value: Option<i64>,
    max_value: Option<i64>,
}

/// Hierarchical runtime profile. Cheap to clone (shared interior) and safe
/// to update concurrently with readers taking snapshots.
#[derive(Clone, Debug)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

#[derive(Debug)]
struct RuntimeProfileInner {
    name: RwLock<String>,
    metadata: AtomicI64,
    counters: Mutex<HashMap<String, CounterRef>>,
    info_strings: Mutex<BTreeMap<String, String>>,
    children: Mutex<Vec<RuntimeProfile>>,
    child_map: Mutex<HashMap<String, RuntimeProfile>>,
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: RwLock::new(name.into()),
                metadata: AtomicI64::new(-1),
                counters: Mutex::new(HashMap::new()),
                info_strings: Mutex::new(BTreeMap::new()),
                children: Mutex::new(Vec::new()),
                child_map: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .name
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let mut guard = self.inner.name.write().unwrap_or_else(|e| e.into_inner());
        *guard = name.into();
    }

    pub fn metadata(&self) -> i64 {
        self.inner.metadata.load(Ordering::Relaxed)
    }

    /// Metadata carries the plan node id for operator-level profiles, -1
    /// otherwise.
    pub fn set_metadata(&self, md: i64) {
        self.inner.metadata.store(md, Ordering::Relaxed);
    }

    pub fn get_child(&self, name: &str) -> Option<RuntimeProfile> {
        self.inner
            .child_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn add_child(&self, child: RuntimeProfile) {
        let child_name = child.name();
        {
            let mut map = self
                .inner
                .child_map
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if map.contains_key(&child_name) {
                return;
            }
            map.insert(child_name.clone(), child.clone());
        }
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        children.push(child);
    }

    /// Existing child with this name, or a fresh one attached to `self`.
    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        let name = name.into();
        if let Some(existing) = self
            .inner
            .child_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name)
            .cloned()
        {
            return existing;
        }
        let child = RuntimeProfile::new(name);
        self.add_child(child.clone());
        child
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut guard = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.insert(key.into(), value.into());
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn add_counter(&self, name: impl Into<String>, unit: CounterUnit) -> CounterRef {
        let name = name.into();
        let mut guard = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = guard.get(&name) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::new(name.clone(), unit));
        guard.insert(name, Arc::clone(&counter));
        counter
    }

    pub fn counter(&self, name: &str) -> Option<CounterRef> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn counter_value(&self, name: &str) -> Option<i64> {
        self.counter(name).map(|c| c.value())
    }

    pub fn counter_add(&self, name: &str, unit: CounterUnit, delta: i64) {
        let c = self.add_counter(name.to_string(), unit);
        c.add(delta);
    }

    pub fn counter_set(&self, name: &str, unit: CounterUnit, value: i64) {
        let c = self.add_counter(name.to_string(), unit);
        c.set(value);
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, CounterUnit::TimeNs)
    }

    pub fn scoped_timer(&self, name: impl Into<String>) -> ScopedTimer {
        let counter = self.add_timer(name);
        ScopedTimer::new(counter)
    }

    /// Flattened snapshot, pre-order. This is the shape reports carry.
    pub fn to_tree(&self) -> ProfileTree {
        let mut nodes = Vec::new();
        self.to_tree_nodes(&mut nodes);
        ProfileTree { nodes }
    }

    /// Rebuild a live profile from a report snapshot.
    pub fn from_tree(tree: &ProfileTree) -> RuntimeProfile {
        let profile = RuntimeProfile::new(
            tree.nodes
                .first()
                .map(|n| n.name.clone())
                .unwrap_or_default(),
        );
        profile.update_from_tree(tree);
        profile
    }

    /// Apply a snapshot onto this profile: counters are set to the reported
    /// values (senders report cumulative numbers), info strings replaced,
    /// missing children created. Structure is only ever added, never
    /// removed, so aggregation keeps working while reports stream in.
    pub fn update_from_tree(&self, tree: &ProfileTree) {
        if tree.nodes.is_empty() {
            return;
        }
        let mut idx = 0;
        self.update_from_nodes(&tree.nodes, &mut idx);
    }

    fn update_from_nodes(&self, nodes: &[ProfileNode], idx: &mut usize) {
        let Some(node) = nodes.get(*idx) else {
            return;
        };
        *idx += 1;
        self.set_metadata(node.metadata);
        for counter in &node.counters {
            let c = self.add_counter(counter.name.clone(), counter.unit);
            c.set(counter.value);
            if let Some(min) = counter.min_value {
                c.set_min(min);
            }
            if let Some(max) = counter.max_value {
                c.set_max(max);
            }
        }
        for (k, v) in &node.info_strings {
            self.add_info_string(k.clone(), v.clone());
        }
        for _ in 0..node.num_children {
            let Some(child_node) = nodes.get(*idx) else {
                return;
            };
            let child = self.child(child_node.name.clone());
            child.update_from_nodes(nodes, idx);
        }
    }

    fn to_tree_nodes(&self, out: &mut Vec<ProfileNode>) {
        let info_strings = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|c| c.to_tree_counter())
            .collect::<Vec<_>>();
        counters.sort_by(|a, b| a.name.cmp(&b.name));

        let children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        out.push(ProfileNode {
            name: self.name(),
            num_children: children.len() as i32,
            metadata: self.metadata(),
            counters,
            info_strings,
        });

        for child in children {
            child.to_tree_nodes(out);
        }
    }

    /// Merge profiles with identical structure into one: time-valued
    /// counters average, others sum, min/max always kept. Children present
    /// in every input merge recursively; partial children are skipped.
    pub fn merge_isomorphic_profiles(profiles: &[RuntimeProfile]) -> Option<RuntimeProfile> {
        let first = profiles.first()?;

        let merged = RuntimeProfile::new(first.name());
        merged.set_metadata(first.metadata());
        {
            let snapshot = first
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for (k, v) in snapshot {
                merged.add_info_string(k, v);
            }
        }

        let all_counter_names: BTreeSet<String> = profiles
            .iter()
            .flat_map(|p| {
                p.inner
                    .counters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        for name in all_counter_names {
            let snapshots: Vec<CounterSnapshot> = profiles
                .iter()
                .filter_map(|p| p.counter_snapshot(&name))
                .collect();
            if snapshots.is_empty() {
                continue;
            }
            let unit = snapshots[0].unit;
            let values: Vec<i64> = snapshots.iter().map(|s| s.value).collect();
            let min_value = values.iter().copied().min().unwrap_or(0);
            let max_value = values.iter().copied().max().unwrap_or(0);
            let sum = values
                .iter()
                .copied()
                .fold(0i64, |acc, v| acc.saturating_add(v));
            let value = if unit.averages_on_merge() {
                sum / values.len() as i64
            } else {
                sum
            };
            let c = merged.add_counter(name, unit);
            c.set(value);
            c.set_min(min_value);
            c.set_max(max_value);
        }

        for child in first.children() {
            let child_name = child.name();
            let mut child_profiles = Vec::with_capacity(profiles.len());
            for p in profiles {
                if let Some(c) = p.get_child(&child_name) {
                    child_profiles.push(c);
                }
            }
            if child_profiles.len() != profiles.len() {
                continue;
            }
            if let Some(merged_child) = RuntimeProfile::merge_isomorphic_profiles(&child_profiles) {
                merged.add_child(merged_child);
            }
        }

        Some(merged)
    }

    /// Indented human-readable rendering, for query summaries in the log.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, 0);
        out
    }

    fn pretty_print_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{}{}:", indent, self.name());
        {
            let info = self
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for (k, v) in info {
                let _ = writeln!(out, "{}   {}: {}", indent, k, v);
            }
        }
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect::<Vec<_>>();
        counters.sort_by(|a, b| a.name().cmp(b.name()));
        for c in counters {
            let _ = writeln!(
                out,
                "{}   - {}: {} ({:?})",
                indent,
                c.name(),
                c.value(),
                c.unit()
            );
        }
        for child in self.children() {
            child.pretty_print_into(out, depth + 1);
        }
    }

    fn counter_snapshot(&self, name: &str) -> Option<CounterSnapshot> {
        let guard = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let c = guard.get(name)?;
        Some(CounterSnapshot {
            name: c.name.clone(),
            unit: c.unit,
            value: c.value(),
            min_value: c.min(),
            max_value: c.max(),
        })
    }
}

pub type CounterRef = Arc<Counter>;

#[derive(Debug)]
pub struct Counter {
    name: String,
    unit: CounterUnit,
    value: AtomicI64,
    min_value: Mutex<Option<i64>>,
    max_value: Mutex<Option<i64>>,
}

impl Counter {
    pub fn new(name: impl Into<String>, unit: CounterUnit) -> Self {
        Self {
            name: name.into(),
            unit,
            value: AtomicI64::new(0),
            min_value: Mutex::new(None),
            max_value: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> CounterUnit {
        self.unit
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set_min(&self, min: i64) {
        let mut guard = self.min_value.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(min);
    }

    pub fn set_max(&self, max: i64) {
        let mut guard = self.max_value.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(max);
    }

    pub fn min(&self) -> Option<i64> {
        *self.min_value.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn max(&self) -> Option<i64> {
        *self.max_value.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn to_tree_counter(&self) -> ProfileCounter {
        ProfileCounter {
            name: self.name.clone(),
            unit: self.unit,
            value: self.value(),
            min_value: self.min(),
            max_value: self.max(),
        }
    }
}

pub struct ScopedTimer {
    counter: CounterRef,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self {
            counter,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed_ns = self.start.elapsed().as_nanos();
        let elapsed_ns = i64::try_from(elapsed_ns).unwrap_or(i64::MAX);
        self.counter.add(elapsed_ns);
    }
}

/// Serializable profile snapshot: flattened pre-order node list, the shape
/// carried inside `ReportExecStatusParams`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProfileTree {
    pub nodes: Vec<ProfileNode>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileNode {
    pub name: String,
    pub num_children: i32,
    pub metadata: i64,
    pub counters: Vec<ProfileCounter>,
    pub info_strings: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileCounter {
    pub name: String,
    pub unit: CounterUnit,
    pub value: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
}

/// Running min/max/mean/variance over a stream of samples (Welford).
#[derive(Clone, Debug, Default)]
pub struct SummaryStats {
    count: u64,
    min: i64,
    max: i64,
    mean: f64,
    m2: f64,
}

impl SummaryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: i64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value as f64 - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value as f64 - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; 0 for fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / self.count as f64
    }

    pub fn summary_string(&self) -> String {
        format!(
            "count={} min={} max={} mean={:.2} stddev={:.2}",
            self.count,
            self.min,
            self.max,
            self.mean,
            self.variance().sqrt()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_round_trip_preserves_structure() {
        let root = RuntimeProfile::new("Fragment F01");
        root.counter_set("RowsProduced", CounterUnit::Rows, 100);
        let child = root.child("OLAP_SCAN (plan_node_id=0)");
        child.set_metadata(0);
        child.counter_set("ScanRangesComplete", CounterUnit::Unit, 3);
        child.add_info_string("Table", "lineorder");

        let tree = root.to_tree();
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].num_children, 1);

        let rebuilt = RuntimeProfile::from_tree(&tree);
        assert_eq!(rebuilt.name(), "Fragment F01");
        assert_eq!(rebuilt.counter_value("RowsProduced"), Some(100));
        let rebuilt_child = rebuilt
            .get_child("OLAP_SCAN (plan_node_id=0)")
            .expect("child");
        assert_eq!(rebuilt_child.counter_value("ScanRangesComplete"), Some(3));
        assert_eq!(
            rebuilt_child.get_info_string("Table").as_deref(),
            Some("lineorder")
        );
    }

    #[test]
    fn update_from_tree_overwrites_cumulative_counters() {
        let profile = RuntimeProfile::new("inst");
        let mut tree = ProfileTree {
            nodes: vec![ProfileNode {
                name: "inst".to_string(),
                num_children: 0,
                metadata: -1,
                counters: vec![ProfileCounter {
                    name: "BytesRead".to_string(),
                    unit: CounterUnit::Bytes,
                    value: 10,
                    min_value: None,
                    max_value: None,
                }],
                info_strings: BTreeMap::new(),
            }],
        };
        profile.update_from_tree(&tree);
        assert_eq!(profile.counter_value("BytesRead"), Some(10));
        tree.nodes[0].counters[0].value = 25;
        profile.update_from_tree(&tree);
        assert_eq!(profile.counter_value("BytesRead"), Some(25));
    }

    #[test]
    fn merge_averages_time_and_sums_bytes() {
        let mut instances = Vec::new();
        for (time_ns, bytes) in [(100, 10), (300, 30)] {
            let p = RuntimeProfile::new("inst");
            p.counter_set("ExecTime", CounterUnit::TimeNs, time_ns);
            p.counter_set("BytesRead", CounterUnit::Bytes, bytes);
            instances.push(p);
        }
        let merged = RuntimeProfile::merge_isomorphic_profiles(&instances).expect("merged");
        assert_eq!(merged.counter_value("ExecTime"), Some(200));
        assert_eq!(merged.counter_value("BytesRead"), Some(40));
        let c = merged.counter("ExecTime").expect("counter");
        assert_eq!(c.min(), Some(100));
        assert_eq!(c.max(), Some(300));
    }

    #[test]
    fn merge_skips_children_missing_from_some_instance() {
        let a = RuntimeProfile::new("inst");
        a.child("common");
        a.child("only_in_a");
        let b = RuntimeProfile::new("inst");
        b.child("common");
        let merged = RuntimeProfile::merge_isomorphic_profiles(&[a, b]).expect("merged");
        assert!(merged.get_child("common").is_some());
        assert!(merged.get_child("only_in_a").is_none());
    }

    #[test]
    fn summary_stats_mean_and_variance() {
        let mut stats = SummaryStats::new();
        for v in [2, 4, 4, 4, 5, 5, 7, 9] {
            stats.update(v);
        }
        assert_eq!(stats.count(), 8);
        assert_eq!(stats.min(), 2);
        assert_eq!(stats.max(), 9);
        assert!((stats.mean() - 5.0).abs() < 1e-9);
        assert!((stats.variance() - 4.0).abs() < 1e-9);
    }
}
