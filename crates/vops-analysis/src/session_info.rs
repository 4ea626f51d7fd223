//! Resolve the session and transaction ids carried by diagnostic records
//! into their start records.

use std::collections::{BTreeSet, HashMap};
use vops_core::events::{SessionStart, SessionTxnRef, TransactionStart};

/// Distinct ids gathered from the records of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet {
    pub sessions: BTreeSet<String>,
    pub transactions: BTreeSet<String>,
}

impl IdSet {
    /// Record the ids of `record`, ignoring blanks and `internal_session`.
    pub fn add(&mut self, record: &impl SessionTxnRef, internal_session: &str) {
        let session = record.session_id();
        if !session.is_empty() && session != internal_session {
            self.sessions.insert(session.to_string());
        }
        let txn = record.txn_id();
        if !txn.is_empty() {
            self.transactions.insert(txn.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.transactions.is_empty()
    }

    /// Comma-separated session ids, the form the lookup endpoints expect.
    pub fn session_list(&self) -> String {
        join(&self.sessions)
    }

    pub fn transaction_list(&self) -> String {
        join(&self.transactions)
    }
}

fn join(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Start records keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SessionTxnInfo {
    pub sessions: HashMap<String, SessionStart>,
    pub transactions: HashMap<String, TransactionStart>,
}

impl SessionTxnInfo {
    pub fn new(sessions: Vec<SessionStart>, transactions: Vec<TransactionStart>) -> Self {
        Self {
            sessions: sessions
                .into_iter()
                .map(|s| (s.session_id.clone(), s))
                .collect(),
            transactions: transactions
                .into_iter()
                .map(|t| (t.txn_id.clone(), t))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.transactions.is_empty()
    }

    pub fn attach(&self, record: &mut impl SessionTxnRef) {
        let session = self.sessions.get(record.session_id()).cloned();
        let txn = self.transactions.get(record.txn_id()).cloned();
        record.attach(session.as_ref(), txn.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vops_core::events::SlowEvent;

    fn event(session: &str, txn: &str) -> SlowEvent {
        SlowEvent {
            session_id: session.into(),
            txn_id: txn.into(),
            ..Default::default()
        }
    }

    #[test]
    fn internal_and_blank_ids_are_skipped() {
        let mut ids = IdSet::default();
        ids.add(&event("NO NODE:0x1", "1"), "NO NODE:0x1");
        ids.add(&event("", ""), "NO NODE:0x1");
        ids.add(&event("s2", "2"), "NO NODE:0x1");
        ids.add(&event("s1", "1"), "NO NODE:0x1");

        assert_eq!(ids.session_list(), "s1,s2");
        assert_eq!(ids.transaction_list(), "1,2");
    }

    #[test]
    fn attach_only_matches_known_ids() {
        let info = SessionTxnInfo::new(
            vec![SessionStart {
                session_id: "s1".into(),
                client_hostname: "etl-01".into(),
                ..Default::default()
            }],
            vec![],
        );
        let mut known = event("s1", "9");
        info.attach(&mut known);
        assert_eq!(known.session_info.unwrap().client_hostname, "etl-01");
        assert!(known.transaction_info.is_none());

        let mut unknown = event("s5", "9");
        info.attach(&mut unknown);
        assert!(unknown.session_info.is_none());
    }
}
