//! The computations a compute node can run.
//!
//! These are pure functions of an [`Operation`]. They carry no knowledge of
//! the pool that runs them or the protocol that requested them.

use crate::{
    Error, Result,
    message::{ArithmeticOp, DIVISION_BY_ZERO, INVALID_OPERATION, Operation, Outcome},
};

/// Largest Fibonacci index whose value fits in a `u64`.
pub const MAX_FIB_INDEX: i64 = 93;

/// Evaluates `operation`.
///
/// Division by zero and unknown tags are results, not errors.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for a negative or too-large Fibonacci
/// index, and for arithmetic that does not produce a finite number.
pub fn evaluate(operation: &Operation) -> Result<Outcome> {
    match operation {
        Operation::Arithmetic { op, a, b } => arithmetic(*op, *a, *b),
        Operation::Fibonacci { n } => fibonacci(*n).map(Outcome::Integer),
        Operation::Unrecognized { .. } => Ok(Outcome::Text(INVALID_OPERATION.to_owned())),
    }
}

/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the result is NaN or infinite.
pub fn arithmetic(op: ArithmeticOp, a: f64, b: f64) -> Result<Outcome> {
    let value = match op {
        ArithmeticOp::Soma => a + b,
        ArithmeticOp::Subtracao => a - b,
        ArithmeticOp::Multiplicacao => a * b,
        ArithmeticOp::Divisao if b == 0.0 => {
            return Ok(Outcome::Text(DIVISION_BY_ZERO.to_owned()));
        }
        ArithmeticOp::Divisao => a / b,
    };

    // JSON has no representation for NaN or infinity.
    if !value.is_finite() {
        return Err(Error::invalid_argument(format!(
            "{} of {a} and {b} is not a finite number",
            op.tag()
        )));
    }
    Ok(Outcome::Number(value))
}

/// Iterative Fibonacci: `fib(0) = 0`, `fib(1) = 1`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `n` is negative or greater than
/// [`MAX_FIB_INDEX`].
pub fn fibonacci(n: i64) -> Result<u64> {
    if n < 0 {
        return Err(Error::invalid_argument(format!("n must be >= 0, got {n}")));
    }
    if n > MAX_FIB_INDEX {
        return Err(Error::invalid_argument(format!(
            "n must be <= {MAX_FIB_INDEX}, got {n}"
        )));
    }

    if n == 0 {
        return Ok(0);
    }

    let (mut previous, mut current) = (0_u64, 1_u64);
    for _ in 1..n {
        let sum = previous
            .checked_add(current)
            .ok_or_else(|| Error::invalid_argument(format!("fib({n}) overflows u64")))?;
        previous = current;
        current = sum;
    }
    Ok(current)
}
