//! vops-ops: Concrete cluster operations and the commands built from them.

pub mod commands;
pub mod diagnostics;
pub mod download_file;
pub mod get_up_nodes;
pub mod load_remote_catalog;
pub mod poll_cert_health;
pub mod poll_node_state;
pub mod stop_db;
pub mod stop_node;

pub use commands::{fetch_up_nodes, stop_database, wait_for_nodes_up, ClusterTopology, DatabaseOptions, StopDbOptions};
pub use diagnostics::{
    DiagnosticFetchOp, DiagnosticQuery, HttpsSessionStartsOp, HttpsSlowEventsOp, HttpsTransactionStartsOp,
    LockAttemptsQuery, LockReleasesQuery, NmaLockAttemptsOp, NmaLockReleasesOp, SessionStartsQuery,
    SlowEventsQuery, TransactionStartsQuery,
};
pub use download_file::NmaDownloadFileOp;
pub use get_up_nodes::HttpsGetUpNodesOp;
pub use load_remote_catalog::{NmaLoadRemoteCatalogOp, RestorePoint, ReviveNode};
pub use poll_cert_health::HttpsPollCertificateHealthOp;
pub use poll_node_state::HttpsPollNodeStateOp;
pub use stop_db::HttpsStopDbOp;
pub use stop_node::HttpsStopNodeOp;
