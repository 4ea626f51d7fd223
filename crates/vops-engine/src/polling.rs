//! Polling sub-loop for operations that wait for the cluster to converge.

use crate::context::ExecContext;
use crate::operation::ClusterOp;
use crate::OpError;
use std::time::Duration;
use tokio::time::Instant;

pub trait PollingOp: ClusterOp {
    /// Zero means poll until the stop condition holds.
    fn polling_timeout(&self) -> Duration;

    /// Evaluate the latest results. `Ok(true)` ends polling, `Err` aborts it.
    fn should_stop_polling(&mut self) -> Result<bool, OpError>;

    /// Hosts that have not reached the wanted state yet, named in the
    /// timeout error.
    fn outstanding_hosts(&self) -> Vec<String> {
        self.base().hosts.clone()
    }
}

/// Evaluate the results already collected by `execute`, then re-send and
/// re-evaluate every polling interval until the operation is satisfied, it
/// reports a terminal error, or the timeout elapses.
pub async fn poll_state<P>(op: &mut P, ctx: &mut ExecContext) -> Result<(), OpError>
where
    P: PollingOp + ?Sized,
{
    let timeout = op.polling_timeout();
    let interval = ctx.config.polling_interval();
    let started = Instant::now();
    let mut rounds = 0u32;

    loop {
        if op.should_stop_polling()? {
            tracing::debug!("[{}] polling finished after {rounds} round(s)", op.name());
            return Ok(());
        }

        if !timeout.is_zero() && started.elapsed() >= timeout {
            let hosts = op.outstanding_hosts();
            tracing::error!(
                "[{}] reached polling timeout of {} seconds, outstanding hosts: {hosts:?}",
                op.name(),
                timeout.as_secs()
            );
            return Err(OpError::PollTimeout {
                timeout_secs: timeout.as_secs(),
                hosts,
                detail: format!("reached polling timeout of {} seconds", timeout.as_secs()),
            });
        }

        tokio::time::sleep(interval).await;
        op.base_mut().run_execute(ctx).await?;
        rounds += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpBase;
    use async_trait::async_trait;
    use std::sync::Arc;
    use vops_core::config::EngineConfig;
    use vops_transport::ScriptedTransport;

    struct CountDown {
        base: OpBase,
        remaining: u32,
        timeout: Duration,
        evaluations: u32,
        abort_at: Option<u32>,
    }

    impl CountDown {
        fn new(remaining: u32, timeout: Duration) -> Self {
            Self {
                base: OpBase::new("CountDown", "count down", vec!["h1".into()]),
                remaining,
                timeout,
                evaluations: 0,
                abort_at: None,
            }
        }
    }

    #[async_trait]
    impl ClusterOp for CountDown {
        fn base(&self) -> &OpBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut OpBase {
            &mut self.base
        }
        async fn prepare(&mut self, _ctx: &mut ExecContext) -> Result<(), OpError> {
            Ok(())
        }
        async fn process_result(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
            poll_state(self, ctx).await
        }
    }

    impl PollingOp for CountDown {
        fn polling_timeout(&self) -> Duration {
            self.timeout
        }
        fn should_stop_polling(&mut self) -> Result<bool, OpError> {
            self.evaluations += 1;
            if self.abort_at == Some(self.evaluations) {
                return Err(OpError::Failed("terminal".into()));
            }
            if self.remaining == 0 {
                return Ok(true);
            }
            self.remaining -= 1;
            Ok(false)
        }
    }

    fn ctx() -> ExecContext {
        let config = EngineConfig {
            polling_interval_ms: 10,
            ..Default::default()
        };
        ExecContext::new(Arc::new(ScriptedTransport::new()), config)
    }

    #[tokio::test]
    async fn first_evaluation_needs_no_resend() {
        let mut ctx = ctx();
        let mut op = CountDown::new(0, Duration::from_secs(1));
        poll_state(&mut op, &mut ctx).await.unwrap();
        assert_eq!(op.evaluations, 1);
    }

    #[tokio::test]
    async fn polls_until_condition_holds() {
        let mut ctx = ctx();
        let mut op = CountDown::new(3, Duration::from_secs(5));
        poll_state(&mut op, &mut ctx).await.unwrap();
        assert_eq!(op.evaluations, 4);
    }

    #[tokio::test]
    async fn zero_timeout_means_unbounded() {
        let mut ctx = ctx();
        let mut op = CountDown::new(5, Duration::ZERO);
        poll_state(&mut op, &mut ctx).await.unwrap();
        assert_eq!(op.evaluations, 6);
    }

    #[tokio::test]
    async fn timeout_names_outstanding_hosts() {
        let mut ctx = ctx();
        let mut op = CountDown::new(u32::MAX, Duration::from_millis(50));
        let err = poll_state(&mut op, &mut ctx).await.unwrap_err();
        match err {
            OpError::PollTimeout { hosts, .. } => assert_eq!(hosts, vec!["h1".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn terminal_error_aborts_polling() {
        let mut ctx = ctx();
        let mut op = CountDown::new(10, Duration::from_secs(5));
        op.abort_at = Some(2);
        let err = poll_state(&mut op, &mut ctx).await.unwrap_err();
        assert!(matches!(err, OpError::Failed(_)));
        assert_eq!(op.evaluations, 2);
    }
}
