//! Validation and shunting-yard parsing of infix arithmetic expressions.

use calc_db::models::{Operation, OperationKind, OperationStatus};
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::tokenizer::{Token, tokenize};

/// Errors that can occur while validating or parsing an expression.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("expression is empty")]
    Empty,

    #[error("unrecognized character {0:?}")]
    UnrecognizedChar(char),

    #[error("unmatched parentheses")]
    UnmatchedParens,

    #[error("two consecutive operators")]
    ConsecutiveOperators,

    #[error("expression ends with an operator")]
    TrailingOperator,

    #[error("expression contains an empty subexpression")]
    EmptyGroup,

    #[error("malformed number literal {0:?}")]
    MalformedNumber(String),

    #[error("malformed expression")]
    Malformed,
}

/// Validate that `input` is a well-formed infix expression. Does not build
/// the operation list -- see [`parse`].
pub fn validate(input: &str) -> Result<(), ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let tokens = tokenize(trimmed).map_err(ParseError::UnrecognizedChar)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut depth: i32 = 0;
    let mut prev: Option<&Token> = None;

    for tok in &tokens {
        match tok {
            Token::LParen => {
                if matches!(prev, Some(t) if matches!(t, Token::Number(_) | Token::RParen)) {
                    // e.g. "2(3+1)" -- not a supported implicit-multiply form.
                    return Err(ParseError::Malformed);
                }
                depth += 1;
            }
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(ParseError::UnmatchedParens);
                }
                if matches!(prev, Some(Token::LParen)) {
                    return Err(ParseError::EmptyGroup);
                }
                if matches!(prev, Some(t) if t.is_operator()) {
                    return Err(ParseError::TrailingOperator);
                }
            }
            t if t.is_operator() => {
                if prev.is_none() || matches!(prev, Some(Token::LParen)) {
                    return Err(ParseError::Malformed);
                }
                if matches!(prev, Some(p) if p.is_operator()) {
                    return Err(ParseError::ConsecutiveOperators);
                }
            }
            Token::Number(n) => {
                if matches!(prev, Some(Token::RParen)) {
                    return Err(ParseError::Malformed);
                }
                if n.parse::<f64>().is_err() {
                    return Err(ParseError::MalformedNumber(n.clone()));
                }
            }
            _ => unreachable!("operator arm above is exhaustive over Plus/Minus/Star/Slash"),
        }
        prev = Some(tok);
    }

    if depth != 0 {
        return Err(ParseError::UnmatchedParens);
    }
    if matches!(prev, Some(t) if t.is_operator()) {
        return Err(ParseError::TrailingOperator);
    }

    Ok(())
}

/// Parse a validated expression into a topologically-ordered list of
/// operations. The final operation in the returned list is always the root
/// of the expression tree (the aggregator relies on this).
pub fn parse(input: &str) -> Result<Vec<Operation>, ParseError> {
    validate(input)?;

    let tokens = tokenize(input.trim()).map_err(ParseError::UnrecognizedChar)?;

    // Shunting-yard: infix tokens -> postfix token stream.
    let mut output: Vec<Token> = Vec::new();
    let mut op_stack: Vec<Token> = Vec::new();

    for tok in tokens {
        match &tok {
            Token::Number(_) => output.push(tok),
            Token::LParen => op_stack.push(tok),
            Token::RParen => {
                while let Some(top) = op_stack.last() {
                    if matches!(top, Token::LParen) {
                        break;
                    }
                    output.push(op_stack.pop().expect("checked non-empty"));
                }
                op_stack.pop(); // discard the matching LParen
            }
            t if t.is_operator() => {
                while let Some(top) = op_stack.last() {
                    if top.is_operator() && top.precedence() >= t.precedence() {
                        output.push(op_stack.pop().expect("checked non-empty"));
                    } else {
                        break;
                    }
                }
                op_stack.push(tok);
            }
            _ => unreachable!("tokenizer only emits numbers, operators, and parens"),
        }
    }
    while let Some(tok) = op_stack.pop() {
        output.push(tok);
    }

    // Walk the postfix stream with an operand stack, emitting one Operation
    // per operator.
    let mut operand_stack: Vec<String> = Vec::new();
    let mut ops: Vec<Operation> = Vec::new();

    for tok in output {
        match tok {
            Token::Number(n) => operand_stack.push(n),
            t if t.is_operator() => {
                let operand2 = operand_stack.pop().ok_or(ParseError::Malformed)?;
                let operand1 = operand_stack.pop().ok_or(ParseError::Malformed)?;

                let kind = match t {
                    Token::Plus => OperationKind::Add,
                    Token::Minus => OperationKind::Sub,
                    Token::Star => OperationKind::Mul,
                    Token::Slash => OperationKind::Div,
                    _ => unreachable!(),
                };

                let op = Operation {
                    id: Uuid::new_v4(),
                    calculation_id: Uuid::nil(),
                    operation_type: kind,
                    operand1,
                    operand2,
                    result: String::new(),
                    status: OperationStatus::Pending,
                    error_message: String::new(),
                    processing_time_ms: 0,
                    agent_id: String::new(),
                    created_at: Utc::now(),
                };

                operand_stack.push(op.as_ref_operand());
                ops.push(op);
            }
            _ => unreachable!(),
        }
    }

    if operand_stack.len() != 1 || ops.is_empty() {
        return Err(ParseError::Malformed);
    }

    Ok(ops)
}

/// Stamp every operation with its owning calculation's id before
/// persistence.
pub fn set_calculation_id(ops: &mut [Operation], calculation_id: Uuid) {
    for op in ops {
        op.calculation_id = calculation_id;
    }
}
