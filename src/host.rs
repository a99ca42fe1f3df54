//! Host collaborator interface.
//!
//! The core owns the score-language runtime, the bus graph, and the tempo
//! map; everything else (instrument schedulers, sound-file utilities,
//! table handles) lives on the host side of this trait. The interpreter
//! dispatches unresolved function names and all handle arithmetic here.

use crate::error::{Error, Result};
use crate::lang::value::{BinOp, Handle, Value};

/// Outcome of asking the host to run a function.
pub enum HostCall {
    /// The host handled the call and produced a return value.
    Handled(Value),
    /// The host does not know this function.
    NotFound,
}

/// Functions the host provides to scores.
///
/// All methods have defaults so a host only implements what it supports.
pub trait HostInterface {
    /// Dispatch a function call that is not a core builtin and not a
    /// user-defined score function.
    fn call_function(&mut self, _name: &str, _args: &[Value]) -> Result<HostCall> {
        Ok(HostCall::NotFound)
    }

    /// `handle OP float` arithmetic.
    fn handle_op_float(&mut self, _handle: &Handle, _value: f64, op: BinOp) -> Result<Handle> {
        Err(Error::System(format!(
            "host provides no handle arithmetic (operator {})",
            op.symbol()
        )))
    }

    /// `float OP handle` arithmetic.
    fn float_op_handle(&mut self, _value: f64, _handle: &Handle, op: BinOp) -> Result<Handle> {
        Err(Error::System(format!(
            "host provides no handle arithmetic (operator {})",
            op.symbol()
        )))
    }

    /// `handle OP handle` arithmetic.
    fn handle_op_handle(&mut self, _lhs: &Handle, _rhs: &Handle, op: BinOp) -> Result<Handle> {
        Err(Error::System(format!(
            "host provides no handle arithmetic (operator {})",
            op.symbol()
        )))
    }
}

/// Host that provides nothing. Unresolved calls become fatal
/// [`Error::FunctionNotFound`] at the call site.
pub struct NoHost;

impl HostInterface for NoHost {}
