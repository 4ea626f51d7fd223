//! Lock-wait cascade.
//!
//! Per node, lock waits that overlap in time are merged into series; the
//! series with the widest span is kept, together with the lock holds that
//! were already active when it began. Those holds are the likely blockers.

use crate::session_info::{IdSet, SessionTxnInfo};
use crate::{AnalysisError, TimeWindow};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vops_core::config::AnalysisConfig;
use vops_core::events::{LockAttempt, LockRelease};
use vops_core::CoreError;
use vops_core::timefmt::{duration_secs_f64, format_wire_time, parse_duration, parse_wire_time};

/// A lock event of either kind, carried through the interval pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum LockEvent {
    Attempt(LockAttempt),
    Release(LockRelease),
}

/// A lock event with its interval resolved.
#[derive(Debug, Clone)]
struct Interval {
    event: LockEvent,
    duration: Duration,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl Interval {
    fn from_attempt(a: &LockAttempt) -> Result<Self, AnalysisError> {
        let start = parse_wire_time(&a.start_time).map_err(AnalysisError::record("start_time"))?;
        let duration = parse_duration(&a.duration).map_err(AnalysisError::record("duration"))?;
        let end = start.checked_add_signed(duration).ok_or_else(|| AnalysisError::Record {
            field: "duration",
            source: CoreError::Duration(format!("'{}' overflows from {}", a.duration, a.start_time)),
        })?;
        Ok(Self {
            event: LockEvent::Attempt(a.clone()),
            duration,
            start,
            end,
        })
    }

    fn from_release(r: &LockRelease) -> Result<Self, AnalysisError> {
        Ok(Self {
            event: LockEvent::Release(r.clone()),
            duration: parse_duration(&r.duration).map_err(AnalysisError::record("duration"))?,
            start: parse_wire_time(&r.grant_time).map_err(AnalysisError::record("grant_time"))?,
            end: parse_wire_time(&r.time).map_err(AnalysisError::record("time"))?,
        })
    }

    /// Start or end strictly inside the series, or the series strictly
    /// inside the event.
    fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        (self.start > start && self.start < end)
            || (self.end > start && self.end < end)
            || (self.start < start && self.end > end)
    }
}

/// Widest merged wait series on one node.
#[derive(Debug, Clone)]
struct WaitSeries {
    events: Vec<Interval>,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl WaitSeries {
    fn span(&self) -> Duration {
        self.end - self.start
    }
}

/// Lock-wait analysis result for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeLockEvents {
    pub node_name: String,
    /// Span of the wait series in seconds, four decimals.
    pub max_duration: String,
    pub wait_start_time: String,
    pub wait_end_time: String,
    /// Events in the series before truncation.
    pub total_wait_events: usize,
    /// Longest waits of the series, ordered by start time.
    pub wait_locks: Vec<LockAttempt>,
    /// Holds active when the series began, ordered by release time.
    pub hold_locks: Vec<LockRelease>,
}

impl NodeLockEvents {
    /// Session and transaction ids referenced by the waits and holds.
    pub fn collect_ids(&self, ids: &mut IdSet, internal_session: &str) {
        for w in &self.wait_locks {
            ids.add(w, internal_session);
        }
        for h in &self.hold_locks {
            ids.add(h, internal_session);
        }
    }

    pub fn attach(&mut self, info: &SessionTxnInfo) {
        for w in &mut self.wait_locks {
            info.attach(w);
        }
        for h in &mut self.hold_locks {
            info.attach(h);
        }
    }
}

/// Build the per-node lock-wait cascade for `window`. `attempts` and
/// `releases` should already cover the lookback before `window.start`.
/// Nodes are returned in name order.
pub fn build_lock_cascade(
    attempts: &[LockAttempt],
    releases: &[LockRelease],
    window: &TimeWindow,
    config: &AnalysisConfig,
) -> Result<Vec<NodeLockEvents>, AnalysisError> {
    let waits = group_attempts(attempts)?;
    let mut holds = group_releases(releases)?;
    let min_span = config.min_lock_wait_series();

    let mut cascade = Vec::new();
    for (node, node_waits) in waits {
        let Some(series) = find_wait_series(&node_waits, window) else {
            continue;
        };
        let span = series.span();
        if span <= min_span {
            tracing::debug!(
                "skipping node {node}: wait series of {:.4}s is within the {}s threshold",
                duration_secs_f64(&span),
                config.min_lock_wait_series_secs
            );
            continue;
        }

        let node_holds = holds.remove(&node).unwrap_or_default();
        let blockers = find_hold_events(&node_holds, series.start, config.max_lock_hold_events);
        let entry = node_entry(&node, series, blockers, config.max_lock_wait_events);
        tracing::info!(
            "adding node {node}, max duration {}, lock wait events {}, lock hold events {}",
            entry.max_duration,
            entry.wait_locks.len(),
            entry.hold_locks.len()
        );
        cascade.push(entry);
    }
    Ok(cascade)
}

fn group_attempts(attempts: &[LockAttempt]) -> Result<BTreeMap<String, Vec<Interval>>, AnalysisError> {
    let mut grouped: BTreeMap<String, Vec<Interval>> = BTreeMap::new();
    for a in attempts {
        grouped
            .entry(a.node_name.clone())
            .or_default()
            .push(Interval::from_attempt(a)?);
    }
    Ok(grouped)
}

/// Releases per node, longest hold first.
fn group_releases(releases: &[LockRelease]) -> Result<BTreeMap<String, Vec<Interval>>, AnalysisError> {
    let mut grouped: BTreeMap<String, Vec<Interval>> = BTreeMap::new();
    for r in releases {
        grouped
            .entry(r.node_name.clone())
            .or_default()
            .push(Interval::from_release(r)?);
    }
    for events in grouped.values_mut() {
        events.sort_by(|a, b| b.duration.cmp(&a.duration));
    }
    Ok(grouped)
}

/// Merge overlapping waits into series, seeding each series from a wait
/// that ended inside `window`, and return the widest one.
fn find_wait_series(events: &[Interval], window: &TimeWindow) -> Option<WaitSeries> {
    let mut processed = vec![false; events.len()];
    let mut widest: Option<WaitSeries> = None;

    loop {
        let Some(seed) = (0..events.len()).find(|&i| !processed[i] && window.contains(&events[i].end)) else {
            break;
        };
        processed[seed] = true;
        let mut series = WaitSeries {
            events: vec![events[seed].clone()],
            start: events[seed].start,
            end: events[seed].end,
        };

        loop {
            let mut grew = false;
            for (i, e) in events.iter().enumerate() {
                if processed[i] || !e.overlaps(series.start, series.end) {
                    continue;
                }
                processed[i] = true;
                grew = true;
                series.start = series.start.min(e.start);
                series.end = series.end.max(e.end);
                series.events.push(e.clone());
            }
            if !grew {
                break;
            }
        }

        if widest.as_ref().map_or(true, |w| series.span() > w.span()) {
            widest = Some(series);
        }
    }
    widest
}

/// Holds granted before `series_start` and released after it.
fn find_hold_events(releases: &[Interval], series_start: NaiveDateTime, max: usize) -> Vec<LockRelease> {
    releases
        .iter()
        .filter(|e| e.end > series_start && e.start < series_start)
        .take(max)
        .filter_map(|e| match &e.event {
            LockEvent::Release(r) => Some(r.clone()),
            LockEvent::Attempt(_) => None,
        })
        .collect()
}

fn node_entry(node: &str, mut series: WaitSeries, mut holds: Vec<LockRelease>, max_waits: usize) -> NodeLockEvents {
    let total = series.events.len();
    series.events.sort_by(|a, b| b.duration.cmp(&a.duration));
    series.events.truncate(max_waits);
    series.events.sort_by_key(|e| e.start);

    let wait_locks = series
        .events
        .into_iter()
        .filter_map(|e| match e.event {
            LockEvent::Attempt(a) => Some(a),
            LockEvent::Release(_) => None,
        })
        .collect();
    holds.sort_by(|a, b| a.time.cmp(&b.time));

    NodeLockEvents {
        node_name: node.to_string(),
        max_duration: format!("{:.4}", duration_secs_f64(&(series.end - series.start))),
        wait_start_time: format_wire_time(&series.start),
        wait_end_time: format_wire_time(&series.end),
        total_wait_events: total,
        wait_locks,
        hold_locks: holds,
    }
}
