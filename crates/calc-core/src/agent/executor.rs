//! The `Executor` trait -- the adapter interface for performing one
//! arithmetic operation.
//!
//! The only implementation shipped here, [`LocalExecutor`], computes the
//! result in-process after an emulated delay. The trait exists so that a
//! future remote-worker refactor could swap in a different implementation
//! (e.g. one that dispatches to an out-of-process compute service) without
//! touching the pool or dispatcher.
//!
//! # Object Safety
//!
//! Every method returns a concrete, non-generic type, so `Box<dyn Executor>`
//! is usable directly.

use std::time::Duration;

use async_trait::async_trait;
use calc_db::models::OperationKind;

use crate::error::OrchestratorError;

/// Per-kind emulated processing latency.
#[derive(Debug, Clone, Copy)]
pub struct LatencyTable {
    pub add: Duration,
    pub sub: Duration,
    pub mul: Duration,
    pub div: Duration,
}

impl Default for LatencyTable {
    fn default() -> Self {
        Self {
            add: Duration::from_secs(1),
            sub: Duration::from_secs(1),
            mul: Duration::from_secs(2),
            div: Duration::from_secs(2),
        }
    }
}

impl LatencyTable {
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Add => self.add,
            OperationKind::Sub => self.sub,
            OperationKind::Mul => self.mul,
            OperationKind::Div => self.div,
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Compute `operand1 <kind> operand2`, sleeping for the configured
    /// per-kind latency first. Operands have already been resolved from any
    /// `ref:` references by the caller.
    async fn execute(
        &self,
        kind: OperationKind,
        operand1: &str,
        operand2: &str,
    ) -> Result<String, OrchestratorError>;
}

// Compile-time assertion: Executor must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Executor) {}
};

/// In-process arithmetic executor. Performs the computation directly after
/// an emulated delay -- no subprocess, no network call.
pub struct LocalExecutor {
    latency: LatencyTable,
}

impl LocalExecutor {
    pub fn new(latency: LatencyTable) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(
        &self,
        kind: OperationKind,
        operand1: &str,
        operand2: &str,
    ) -> Result<String, OrchestratorError> {
        let a: f64 = operand1
            .parse()
            .map_err(|_| OrchestratorError::InvalidOperand(operand1.to_owned()))?;
        let b: f64 = operand2
            .parse()
            .map_err(|_| OrchestratorError::InvalidOperand(operand2.to_owned()))?;

        tokio::time::sleep(self.latency.for_kind(kind)).await;

        let value = match kind {
            OperationKind::Add => a + b,
            OperationKind::Sub => a - b,
            OperationKind::Mul => a * b,
            OperationKind::Div => {
                if b == 0.0 {
                    return Err(OrchestratorError::DivisionByZero);
                }
                a / b
            }
        };

        Ok(format_result(value))
    }
}

/// Format a computed value: integral values print with no decimal point,
/// everything else uses the shortest round-trip decimal representation.
fn format_result(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
