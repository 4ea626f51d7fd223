//! Slow-event causality tree.
//!
//! The slowest event of the window is the root. An event names the threads
//! it waited on in its phase breakdown; the earlier slow events of those
//! threads become its children, recursively. Each event joins the tree at
//! most once.

use crate::session_info::{IdSet, SessionTxnInfo};
use crate::thread_id::parse_thread_ids;
use crate::{AnalysisError, TimeWindow};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vops_core::config::AnalysisConfig;
use vops_core::events::SlowEvent;
use vops_core::timefmt::parse_wire_time;
use vops_core::CoreError;

/// Marker in a phase breakdown for time spent holding a lock.
const HOLD_MARKER: &str = "hold";

/// One entry of the flattened tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlowEventNode {
    pub depth: usize,
    #[serde(rename = "slow_event")]
    pub event: SlowEvent,
    /// Lock holds recorded while a leaf event was running.
    pub prior_hold_events: Vec<SlowEvent>,
    pub leaf: bool,
}

/// Tree in pre-order, plus the ids it references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlowCascade {
    pub nodes: Vec<SlowEventNode>,
    pub ids: IdSet,
}

impl SlowCascade {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&SlowEventNode> {
        self.nodes.first()
    }

    pub fn attach(&mut self, info: &SessionTxnInfo) {
        for node in &mut self.nodes {
            info.attach(&mut node.event);
            for h in &mut node.prior_hold_events {
                info.attach(h);
            }
        }
    }
}

struct TreeNode {
    depth: usize,
    event: usize,
    children: Vec<usize>,
}

struct TreeBuilder<'a> {
    events: &'a [SlowEvent],
    times: &'a [NaiveDateTime],
    by_thread: HashMap<&'a str, Vec<usize>>,
    visited: Vec<bool>,
    arena: Vec<TreeNode>,
    max_depth: usize,
}

impl<'a> TreeBuilder<'a> {
    fn new(events: &'a [SlowEvent], times: &'a [NaiveDateTime], max_depth: usize) -> Self {
        let mut by_thread: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, e) in events.iter().enumerate() {
            if !e.thread_id.is_empty() {
                by_thread.entry(e.thread_id.as_str()).or_default().push(i);
            }
        }
        Self {
            events,
            times,
            by_thread,
            visited: vec![false; events.len()],
            arena: Vec::new(),
            max_depth,
        }
    }

    /// Add `event` at `depth` with its subtree. Returns the arena slot, or
    /// `None` once past the depth bound.
    fn build(&mut self, event: usize, depth: usize) -> Option<usize> {
        if depth > self.max_depth {
            return None;
        }
        let slot = self.arena.len();
        self.arena.push(TreeNode {
            depth,
            event,
            children: Vec::new(),
        });

        let parent_time = self.times[event];
        let mut children = Vec::new();
        for thread in parse_thread_ids(&self.events[event].phases_duration_us) {
            let candidates = self.by_thread.get(thread.as_str()).cloned().unwrap_or_default();
            for c in candidates {
                if self.visited[c] || self.times[c] >= parent_time {
                    continue;
                }
                self.visited[c] = true;
                if let Some(child) = self.build(c, depth + 1) {
                    children.push(child);
                }
            }
        }
        self.arena[slot].children = children;
        Some(slot)
    }

    fn flatten(&self, slot: usize, out: &mut Vec<(usize, usize, bool)>) {
        let node = &self.arena[slot];
        out.push((node.depth, node.event, node.children.is_empty()));
        for &child in &node.children {
            self.flatten(child, out);
        }
    }
}

/// Build the causality tree for the slowest event of `window`. `events`
/// should already cover the lookback before `window.start`. Returns an
/// empty cascade when no event falls inside the window.
pub fn build_slow_cascade(
    events: &[SlowEvent],
    window: &TimeWindow,
    config: &AnalysisConfig,
) -> Result<SlowCascade, AnalysisError> {
    let internal = config.internal_session_id.as_str();
    let events: Vec<SlowEvent> = events
        .iter()
        .filter(|e| e.session_id != internal)
        .cloned()
        .collect();
    let times = events
        .iter()
        .map(|e| parse_wire_time(&e.timestamp).map_err(AnalysisError::record("timestamp")))
        .collect::<Result<Vec<_>, _>>()?;

    let mut root: Option<usize> = None;
    for (i, e) in events.iter().enumerate() {
        if !window.contains(&times[i]) {
            continue;
        }
        if root.map_or(true, |r| e.duration_us > events[r].duration_us) {
            root = Some(i);
        }
    }
    let Some(root) = root else {
        tracing::info!("no slow events found in the specified time range");
        return Ok(SlowCascade::default());
    };
    tracing::info!(
        "slowest event found: {} node: {} with duration {} us",
        events[root].timestamp,
        events[root].node_name,
        events[root].duration_us
    );

    let mut builder = TreeBuilder::new(&events, &times, config.max_cascade_depth);
    let mut order = Vec::new();
    if let Some(slot) = builder.build(root, 0) {
        builder.flatten(slot, &mut order);
    }

    let mut cascade = SlowCascade::default();
    for (depth, idx, leaf) in order {
        let event = events[idx].clone();
        let prior_hold_events = if leaf {
            prior_holds(&events, &times, idx, config.max_prior_hold_events)?
        } else {
            Vec::new()
        };
        cascade.ids.add(&event, internal);
        for h in &prior_hold_events {
            cascade.ids.add(h, internal);
        }
        cascade.nodes.push(SlowEventNode {
            depth,
            event,
            prior_hold_events,
            leaf,
        });
    }
    Ok(cascade)
}

/// Hold events recorded strictly inside the run of the leaf at `leaf`.
fn prior_holds(
    events: &[SlowEvent],
    times: &[NaiveDateTime],
    leaf: usize,
    max: usize,
) -> Result<Vec<SlowEvent>, AnalysisError> {
    let end = times[leaf];
    let start = end
        .checked_sub_signed(Duration::microseconds(events[leaf].duration_us))
        .ok_or_else(|| AnalysisError::Record {
            field: "duration_us",
            source: CoreError::Duration(format!(
                "{} us overflows from {}",
                events[leaf].duration_us, events[leaf].timestamp
            )),
        })?;
    let holds: Vec<SlowEvent> = events
        .iter()
        .zip(times)
        .filter(|(e, t)| **t > start && **t < end && e.phases_duration_us.contains(HOLD_MARKER))
        .take(max)
        .map(|(e, _)| e.clone())
        .collect();
    tracing::debug!("found {} hold event(s) for leaf at {}", holds.len(), events[leaf].timestamp);
    Ok(holds)
}
