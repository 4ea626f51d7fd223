//! Run operations in order against one execution context.

use crate::context::ExecContext;
use crate::operation::ClusterOp;
use crate::{EngineError, OpError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use vops_core::config::EngineConfig;
use vops_transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Summary of one `run()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_ops: u32,
    pub completed_ops: u32,
    pub skipped_ops: u32,
    pub soft_failed_ops: u32,
    /// Name of the operation that stopped the run.
    pub failed_op: Option<String>,
}

struct Instruction {
    op: Box<dyn ClusterOp>,
    soft_fail: bool,
}

pub struct ClusterOpEngine {
    instructions: Vec<Instruction>,
    ctx: ExecContext,
    last_record: Option<EngineRunRecord>,
}

impl ClusterOpEngine {
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self::with_context(ExecContext::new(transport, config))
    }

    /// Start from an existing context, e.g. one populated by a previous run.
    pub fn with_context(ctx: ExecContext) -> Self {
        Self {
            instructions: Vec::new(),
            ctx,
            last_record: None,
        }
    }

    pub fn push(&mut self, op: impl ClusterOp + 'static) -> &mut Self {
        self.push_boxed(Box::new(op))
    }

    pub fn push_boxed(&mut self, op: Box<dyn ClusterOp>) -> &mut Self {
        self.instructions.push(Instruction {
            op,
            soft_fail: false,
        });
        self
    }

    /// Queue an operation whose failure is logged and does not stop the run.
    pub fn push_soft_fail(&mut self, op: impl ClusterOp + 'static) -> &mut Self {
        self.instructions.push(Instruction {
            op: Box::new(op),
            soft_fail: true,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ExecContext {
        &mut self.ctx
    }

    pub fn into_context(self) -> ExecContext {
        self.ctx
    }

    pub fn last_record(&self) -> Option<&EngineRunRecord> {
        self.last_record.as_ref()
    }

    /// Run every queued operation in order. The first hard failure stops the
    /// run; later operations are never prepared. The queue is drained, so a
    /// second call only runs operations pushed after the first.
    pub async fn run(&mut self) -> Result<EngineRunRecord, EngineError> {
        let mut instructions = std::mem::take(&mut self.instructions);
        let mut record = EngineRunRecord {
            run_id: self.ctx.run_id,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Completed,
            total_ops: instructions.len() as u32,
            completed_ops: 0,
            skipped_ops: 0,
            soft_failed_ops: 0,
            failed_op: None,
        };
        tracing::info!(
            "[Engine] run {} started with {} operation(s)",
            record.run_id,
            record.total_ops
        );

        let mut failure = None;
        for instruction in &mut instructions {
            let name = instruction.op.name().to_string();
            match run_one(instruction.op.as_mut(), &mut self.ctx).await {
                Ok(skipped) => {
                    record.completed_ops += 1;
                    if skipped {
                        record.skipped_ops += 1;
                    }
                }
                Err(e) if instruction.soft_fail => {
                    tracing::warn!("[Engine] {name} failed, continuing: {e}");
                    record.soft_failed_ops += 1;
                }
                Err(e) => {
                    tracing::error!("[Engine] {name} failed: {e}");
                    record.status = RunStatus::Failed;
                    record.failed_op = Some(name.clone());
                    failure = Some(EngineError::Operation {
                        op: name,
                        source: e,
                    });
                    break;
                }
            }
        }

        record.completed_at = Some(Utc::now());
        tracing::info!(
            "[Engine] run {} finished: {:?}, {}/{} operation(s) completed",
            record.run_id,
            record.status,
            record.completed_ops,
            record.total_ops
        );
        self.last_record = Some(record.clone());

        match failure {
            Some(e) => Err(e),
            None => Ok(record),
        }
    }
}

/// Drive one operation through its phases. Returns whether execution was
/// skipped.
async fn run_one(op: &mut dyn ClusterOp, ctx: &mut ExecContext) -> Result<bool, OpError> {
    let interactive = ctx.config.interactive;
    {
        let base = op.base_mut();
        base.filter_unreachable_hosts(ctx);
        base.setup_basic_info();
        base.setup_spinner(interactive);
        base.log_prepare();
    }

    op.prepare(ctx).await?;

    let skipped = op.base().skip_execute;
    if skipped {
        tracing::info!("[{}] skipping execution", op.name());
    } else {
        op.base().start_spinner();
        op.base().log_execute();
        let outcome = match op.execute(ctx).await {
            Ok(()) => op.process_result(ctx).await,
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(()) => op.base().stop_spinner("done"),
            Err(e) => op.base().stop_fail_spinner(e.to_string()),
        }
        outcome?;
    }

    op.base().log_finalize();
    op.finalize(ctx).await?;
    Ok(skipped)
}
