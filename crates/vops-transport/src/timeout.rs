//! Per-request timeout wrapper.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use vops_core::result::HostResult;

/// Wrap one host request with a timeout. An elapsed timeout becomes a
/// timeout result for `host`; the in-flight request is dropped.
pub async fn with_timeout<F>(host: &str, timeout_secs: u64, fut: F) -> HostResult
where
    F: Future<Output = HostResult>,
{
    match timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(result) => result,
        Err(_) => HostResult::timeout(host, timeout_secs),
    }
}
