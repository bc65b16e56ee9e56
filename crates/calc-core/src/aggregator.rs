//! The Status Aggregator: a pure function deriving a calculation's overall
//! status from the statuses of its operations.

use calc_db::models::{CalculationStatus, Operation, OperationStatus};

const MAX_ERROR_MESSAGE_LEN: usize = 500;
const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// The aggregated outcome: the calculation's new status, its result (only
/// set when every operation completed), and an error message (only set on
/// failure).
pub struct Aggregate {
    pub status: CalculationStatus,
    pub result: String,
    pub error_message: String,
}

impl Aggregate {
    fn new(
        status: CalculationStatus,
        result: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            result: result.into(),
            error_message: error_message.into(),
        }
    }
}

/// Derive the calculation-level outcome from its operations.
///
/// The "result of the last completed operation" rule relies on the parser's
/// guarantee that the root operator is always the last operation emitted:
/// in a fully-completed calculation, that is the final result.
pub fn aggregate(operations: &[Operation]) -> Aggregate {
    if operations.is_empty() {
        return Aggregate::new(CalculationStatus::Error, "", "No operations found");
    }

    if operations
        .iter()
        .all(|op| op.status == OperationStatus::Completed)
    {
        let result = operations
            .last()
            .map(|op| op.result.clone())
            .unwrap_or_default();
        return Aggregate::new(CalculationStatus::Completed, result, "");
    }

    if operations.iter().any(|op| {
        matches!(
            op.status,
            OperationStatus::Pending | OperationStatus::InProgress
        )
    }) {
        return Aggregate::new(CalculationStatus::InProgress, "", "");
    }

    if operations
        .iter()
        .any(|op| op.status == OperationStatus::Error)
    {
        let messages: Vec<&str> = operations
            .iter()
            .filter(|op| op.status == OperationStatus::Error && !op.error_message.is_empty())
            .map(|op| op.error_message.as_str())
            .collect();

        let joined = if messages.is_empty() {
            "Calculation failed due to operation errors".to_owned()
        } else {
            truncate(&messages.join("; "))
        };
        return Aggregate::new(CalculationStatus::Error, "", joined);
    }

    Aggregate::new(CalculationStatus::Error, "", "Unknown calculation state")
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_owned();
    }
    let cut = floor_char_boundary(message, MAX_ERROR_MESSAGE_LEN - TRUNCATION_SUFFIX.len());
    format!("{}{}", &message[..cut], TRUNCATION_SUFFIX)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn op(status: OperationStatus, result: &str, error_message: &str) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            calculation_id: Uuid::new_v4(),
            operation_type: calc_db::models::OperationKind::Add,
            operand1: "1".into(),
            operand2: "2".into(),
            result: result.into(),
            status,
            error_message: error_message.into(),
            processing_time_ms: 0,
            agent_id: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_operations_is_error() {
        let agg = aggregate(&[]);
        assert_eq!(agg.status, CalculationStatus::Error);
        assert_eq!(agg.error_message, "No operations found");
    }

    #[test]
    fn all_completed_uses_last_result() {
        let ops = vec![
            op(OperationStatus::Completed, "5", ""),
            op(OperationStatus::Completed, "20", ""),
        ];
        let agg = aggregate(&ops);
        assert_eq!(agg.status, CalculationStatus::Completed);
        assert_eq!(agg.result, "20");
    }

    #[test]
    fn any_pending_is_in_progress() {
        let ops = vec![
            op(OperationStatus::Completed, "5", ""),
            op(OperationStatus::Pending, "", ""),
        ];
        let agg = aggregate(&ops);
        assert_eq!(agg.status, CalculationStatus::InProgress);
    }

    #[test]
    fn any_in_progress_is_in_progress() {
        let ops = vec![op(OperationStatus::InProgress, "", "")];
        let agg = aggregate(&ops);
        assert_eq!(agg.status, CalculationStatus::InProgress);
    }

    #[test]
    fn errors_without_pending_joins_messages() {
        let ops = vec![
            op(OperationStatus::Error, "", "division by zero"),
            op(OperationStatus::Completed, "5", ""),
            op(OperationStatus::Error, "", "invalid operand"),
        ];
        let agg = aggregate(&ops);
        assert_eq!(agg.status, CalculationStatus::Error);
        assert_eq!(agg.error_message, "division by zero; invalid operand");
    }

    #[test]
    fn errors_with_no_messages_uses_fallback() {
        let ops = vec![op(OperationStatus::Error, "", "")];
        let agg = aggregate(&ops);
        assert_eq!(
            agg.error_message,
            "Calculation failed due to operation errors"
        );
    }

    #[test]
    fn long_error_message_is_truncated() {
        let long = "x".repeat(600);
        let ops = vec![op(OperationStatus::Error, "", &long)];
        let agg = aggregate(&ops);
        assert_eq!(agg.error_message.len(), MAX_ERROR_MESSAGE_LEN);
        assert!(agg.error_message.ends_with(TRUNCATION_SUFFIX));
    }
}
