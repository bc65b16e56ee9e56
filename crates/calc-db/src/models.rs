use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CalculationStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for CalculationStatus {
    type Err = CalculationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(CalculationStatusParseError(other.to_owned())),
        }
    }
}

impl CalculationStatus {
    /// A terminal status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Error returned when parsing an invalid [`CalculationStatus`] string.
#[derive(Debug, Clone)]
pub struct CalculationStatusParseError(pub String);

impl fmt::Display for CalculationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid calculation status: {:?}", self.0)
    }
}

impl std::error::Error for CalculationStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for OperationStatus {
    type Err = OperationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(OperationStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`OperationStatus`] string.
#[derive(Debug, Clone)]
pub struct OperationStatusParseError(pub String);

impl fmt::Display for OperationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operation status: {:?}", self.0)
    }
}

impl std::error::Error for OperationStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "int4")]
#[repr(i32)]
pub enum OperationKind {
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
        };
        f.write_str(s)
    }
}

impl FromStr for OperationKind {
    type Err = OperationKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "sub" => Ok(Self::Sub),
            "mul" => Ok(Self::Mul),
            "div" => Ok(Self::Div),
            other => Err(OperationKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`OperationKind`] string.
#[derive(Debug, Clone)]
pub struct OperationKindParseError(pub String);

impl fmt::Display for OperationKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operation kind: {:?}", self.0)
    }
}

impl std::error::Error for OperationKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A calculation -- the top-level unit of work submitted by a user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Calculation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expression: String,
    pub result: String,
    pub status: CalculationStatus,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single binary operation within a calculation's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Operation {
    pub id: Uuid,
    pub calculation_id: Uuid,
    pub operation_type: OperationKind,
    pub operand1: String,
    pub operand2: String,
    pub result: String,
    pub status: OperationStatus,
    pub error_message: String,
    pub processing_time_ms: i64,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    /// Prefix used for operand references pointing at another operation's
    /// result within the same calculation.
    pub const REF_PREFIX: &str = "ref:";

    /// Build the reference operand string for this operation's result.
    pub fn as_ref_operand(&self) -> String {
        format!("{}{}", Self::REF_PREFIX, self.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculation_status_display_roundtrip() {
        let variants = [
            CalculationStatus::Pending,
            CalculationStatus::InProgress,
            CalculationStatus::Completed,
            CalculationStatus::Error,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: CalculationStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn calculation_status_invalid() {
        assert!("bogus".parse::<CalculationStatus>().is_err());
    }

    #[test]
    fn calculation_status_terminal() {
        assert!(CalculationStatus::Completed.is_terminal());
        assert!(CalculationStatus::Error.is_terminal());
        assert!(!CalculationStatus::Pending.is_terminal());
        assert!(!CalculationStatus::InProgress.is_terminal());
    }

    #[test]
    fn operation_status_display_roundtrip() {
        let variants = [
            OperationStatus::Pending,
            OperationStatus::InProgress,
            OperationStatus::Completed,
            OperationStatus::Error,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: OperationStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn operation_status_invalid() {
        assert!("nope".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn operation_kind_display_roundtrip() {
        let variants = [
            OperationKind::Add,
            OperationKind::Sub,
            OperationKind::Mul,
            OperationKind::Div,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: OperationKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn operation_kind_invalid() {
        assert!("pow".parse::<OperationKind>().is_err());
    }

    #[test]
    fn ref_operand_format() {
        let id = Uuid::new_v4();
        let op = Operation {
            id,
            calculation_id: Uuid::new_v4(),
            operation_type: OperationKind::Add,
            operand1: "1".into(),
            operand2: "2".into(),
            result: String::new(),
            status: OperationStatus::Pending,
            error_message: String::new(),
            processing_time_ms: 0,
            agent_id: String::new(),
            created_at: Utc::now(),
        };
        assert_eq!(op.as_ref_operand(), format!("ref:{id}"));
    }
}
