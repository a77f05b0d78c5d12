//! # Numeric Operations
//!
//! Handlers for the implemented slice of the i32/i64 operator groups and
//! the two conversions. Each handler pops its operands (right operand
//! first, then left), checks their kinds, and pushes a single result.
//!
//! Integer arithmetic wraps on overflow, matching two's-complement
//! machine behavior. Comparisons push `1` or `0` as an i32 regardless of
//! the operand width. Signed interpretation is a property of the opcode;
//! the values themselves are plain machine integers.

use super::pop;
use crate::error::{Error, RuntimeTrap, TypeError};
use crate::value::Value;

/// Pop two i32 operands as `(left, right)`.
fn pop_i32_pair(stack: &mut Vec<Value>, op: &'static str) -> Result<(i32, i32), Error> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (a, b) {
        (Value::I32(a), Value::I32(b)) => Ok((a, b)),
        _ => Err(TypeError::OperandKind(op).into()),
    }
}

/// Pop two i64 operands as `(left, right)`.
fn pop_i64_pair(stack: &mut Vec<Value>, op: &'static str) -> Result<(i64, i64), Error> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    match (a, b) {
        (Value::I64(a), Value::I64(b)) => Ok((a, b)),
        _ => Err(TypeError::OperandKind(op).into()),
    }
}

pub(super) fn i32_add(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i32_pair(stack, "i32.add")?;
    stack.push(Value::I32(a.wrapping_add(b)));
    Ok(())
}

pub(super) fn i32_sub(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i32_pair(stack, "i32.sub")?;
    stack.push(Value::I32(a.wrapping_sub(b)));
    Ok(())
}

pub(super) fn i32_mul(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i32_pair(stack, "i32.mul")?;
    stack.push(Value::I32(a.wrapping_mul(b)));
    Ok(())
}

pub(super) fn i32_eq(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i32_pair(stack, "i32.eq")?;
    stack.push(Value::I32((a == b) as i32));
    Ok(())
}

pub(super) fn i32_ne(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i32_pair(stack, "i32.ne")?;
    stack.push(Value::I32((a != b) as i32));
    Ok(())
}

pub(super) fn i32_lt_s(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i32_pair(stack, "i32.lt_s")?;
    stack.push(Value::I32((a < b) as i32));
    Ok(())
}

pub(super) fn i64_add(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i64_pair(stack, "i64.add")?;
    stack.push(Value::I64(a.wrapping_add(b)));
    Ok(())
}

pub(super) fn i64_sub(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i64_pair(stack, "i64.sub")?;
    stack.push(Value::I64(a.wrapping_sub(b)));
    Ok(())
}

pub(super) fn i64_mul(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i64_pair(stack, "i64.mul")?;
    stack.push(Value::I64(a.wrapping_mul(b)));
    Ok(())
}

/// Signed division; a zero divisor traps. `i64::MIN / -1` wraps rather
/// than overflowing.
pub(super) fn i64_div_s(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i64_pair(stack, "i64.div_s")?;
    if b == 0 {
        return Err(RuntimeTrap::DivideByZero.into());
    }
    stack.push(Value::I64(a.wrapping_div(b)));
    Ok(())
}

/// Signed comparison; the result is an i32 like every comparison.
pub(super) fn i64_gt_s(stack: &mut Vec<Value>) -> Result<(), Error> {
    let (a, b) = pop_i64_pair(stack, "i64.gt_s")?;
    stack.push(Value::I32((a > b) as i32));
    Ok(())
}

pub(super) fn i64_extend_s_i32(stack: &mut Vec<Value>) -> Result<(), Error> {
    match pop(stack)? {
        Value::I32(a) => {
            stack.push(Value::I64(i64::from(a)));
            Ok(())
        }
        _ => Err(TypeError::OperandKind("i64.extend_s/i32").into()),
    }
}

pub(super) fn f64_convert_s_i64(stack: &mut Vec<Value>) -> Result<(), Error> {
    match pop(stack)? {
        Value::I64(a) => {
            stack.push(Value::F64(a as f64));
            Ok(())
        }
        _ => Err(TypeError::OperandKind("f64.convert_s/i64").into()),
    }
}
