//! The evaluation context stack.
//!
//! Each result evaluation owns a fresh context whose bottom element is the
//! spatio-temporal canvas. A processing chain pushes its subject, verbs
//! replace the top in place, and leaving the chain pops its value. The top
//! of the stack is the active object that `self` blocks resolve to.

use crate::error::Error;
use crate::value::Value;

pub struct EvalContext {
    stack: Vec<Value>,
}

impl EvalContext {
    /// A context holding only the canvas.
    pub fn new(canvas: Value) -> Self {
        EvalContext {
            stack: vec![canvas],
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::unexpected_error("Evaluation stack underflow"))
    }

    /// The active object.
    pub fn peek(&self) -> Result<&Value, Error> {
        self.stack
            .last()
            .ok_or_else(|| Error::unexpected_error("Evaluation stack is empty"))
    }

    pub fn replace_top(&mut self, value: Value) -> Result<(), Error> {
        match self.stack.last_mut() {
            Some(top) => {
                *top = value;
                Ok(())
            }
            None => Err(Error::unexpected_error("Evaluation stack is empty")),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Cell, DataArray};

    fn scalar(n: i64) -> Value {
        Value::Array(DataArray::scalar(Cell::Int(n)))
    }

    #[test]
    fn stack_discipline() -> Result<(), Error> {
        let mut ctx = EvalContext::new(scalar(0));
        assert_eq!(ctx.depth(), 1);
        ctx.push(scalar(1));
        ctx.replace_top(scalar(2))?;
        assert_eq!(ctx.peek()?, &scalar(2));
        assert_eq!(ctx.pop()?, scalar(2));
        // The canvas is back on top after the chain completes.
        assert_eq!(ctx.peek()?, &scalar(0));
        Ok(())
    }

    #[test]
    fn underflow_is_an_error() {
        let mut ctx = EvalContext::new(scalar(0));
        ctx.pop().unwrap();
        assert!(ctx.pop().is_err());
        assert!(ctx.peek().is_err());
    }
}
