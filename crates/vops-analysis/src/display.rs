//! Indented text rendering of both cascades.

use crate::lock_cascade::NodeLockEvents;
use crate::slow_cascade::SlowCascade;
use std::fmt::Write;
use vops_core::events::{LockAttempt, LockRelease, SlowEvent};

pub fn render_lock_cascade(cascade: &[NodeLockEvents]) -> String {
    let mut out = String::new();
    for node in cascade {
        let _ = writeln!(
            out,
            "{} ({} wait event(s) from {} to {}, {}s)",
            node.node_name, node.total_wait_events, node.wait_start_time, node.wait_end_time, node.max_duration
        );
        let _ = writeln!(out, "  Wait locks:");
        for w in &node.wait_locks {
            let _ = writeln!(out, "    {}", wait_line(w));
        }
        let _ = writeln!(out, "  Hold locks related to the earliest wait lock:");
        for h in &node.hold_locks {
            let _ = writeln!(out, "    {}", hold_line(h));
        }
        let _ = writeln!(out, "---");
    }
    out
}

pub fn render_slow_cascade(cascade: &SlowCascade) -> String {
    let mut out = String::new();
    for node in &cascade.nodes {
        let indent = " ".repeat(node.depth);
        let prefix = if node.depth > 0 { "|-" } else { "" };
        if node.leaf {
            let _ = writeln!(
                out,
                "{indent}{prefix} slow_event: {} hold_events: {} #",
                slow_line(&node.event),
                node.prior_hold_events.len()
            );
        } else {
            let _ = writeln!(out, "{indent}{prefix} slow_event: {}", slow_line(&node.event));
        }
    }
    out
}

fn wait_line(w: &LockAttempt) -> String {
    let mut line = format!(
        "start={} duration={} mode={} object={} session={} txn={}",
        w.start_time, w.duration, w.mode, w.object_name, w.session_id, w.transaction_id
    );
    if let Some(s) = &w.session_info {
        let _ = write!(line, " user={} client={}", s.user_name, s.client_hostname);
    }
    line
}

fn hold_line(h: &LockRelease) -> String {
    let mut line = format!(
        "granted={} released={} duration={} object={} session={} txn={} user={}",
        h.grant_time, h.time, h.duration, h.object_name, h.session_id, h.transaction_id, h.user_name
    );
    if let Some(s) = &h.session_info {
        let _ = write!(line, " client={}", s.client_hostname);
    }
    line
}

fn slow_line(e: &SlowEvent) -> String {
    let mut line = format!(
        "time={} node={} thread={} duration_us={} session={} txn={} phases={:?}",
        e.timestamp, e.node_name, e.thread_id, e.duration_us, e.session_id, e.txn_id, e.phases_duration_us
    );
    if !e.event_description.is_empty() {
        let _ = write!(line, " desc={:?}", e.event_description);
    }
    if let Some(t) = &e.transaction_info {
        let _ = write!(line, " txn_start={} isolation={}", t.start_timestamp, t.isolation);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slow_cascade::SlowEventNode;

    #[test]
    fn slow_cascade_is_indented_by_depth() {
        let node = |depth, thread: &str, leaf| SlowEventNode {
            depth,
            event: SlowEvent {
                thread_id: thread.into(),
                ..Default::default()
            },
            prior_hold_events: Vec::new(),
            leaf,
        };
        let cascade = SlowCascade {
            nodes: vec![node(0, "1", false), node(1, "2", false), node(2, "3", true)],
            ..Default::default()
        };
        let text = render_slow_cascade(&cascade);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(" slow_event: time="));
        assert!(lines[1].starts_with(" |- slow_event:"));
        assert!(lines[2].starts_with("  |- slow_event:"));
        assert!(lines[2].ends_with("hold_events: 0 #"));
        assert!(!lines[1].contains("hold_events"));
    }

    #[test]
    fn lock_cascade_lists_waits_and_holds() {
        let cascade = vec![NodeLockEvents {
            node_name: "v_db_node0001".into(),
            max_duration: "60.0000".into(),
            wait_start_time: "2024-03-01 10:00:00".into(),
            wait_end_time: "2024-03-01 10:01:00".into(),
            total_wait_events: 1,
            wait_locks: vec![LockAttempt {
                session_id: "s1".into(),
                ..Default::default()
            }],
            hold_locks: vec![LockRelease {
                session_id: "s0".into(),
                ..Default::default()
            }],
        }];
        let text = render_lock_cascade(&cascade);
        assert!(text.starts_with("v_db_node0001 (1 wait event(s)"));
        assert!(text.contains("    start= duration= mode= object= session=s1"));
        assert!(text.contains("session=s0"));
        assert!(text.ends_with("---\n"));
    }
}
