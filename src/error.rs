//! Error types for the engine core.

use thiserror::Error;

/// Error type covering the engine's public surface.
///
/// Recoverable conditions (bad operands, clamped indices, shadowing) never
/// show up here; they are logged and evaluation continues with a safe value.
/// An `Error` aborts the current score pass.
#[derive(Error, Debug)]
pub enum Error {
    /// A `bus_config` call would create a cycle in the aux bus graph.
    #[error("bus loop: configuration not allowed")]
    BusLoop,

    /// An unparseable bus specifier such as `"sideways3"`.
    #[error("invalid bus specifier: '{0}'")]
    InvalidBus(String),

    /// A bus specifier with a channel range outside `0..bus_count`,
    /// or a reversed range.
    #[error("invalid bus channel in specifier: '{0}'")]
    InvalidBusChannel(String),

    /// A call resolved neither by the builtin table nor by the host.
    #[error("function not found: {0}()")]
    FunctionNotFound(String),

    /// Wrong argument count or an out-of-range parameter value.
    #[error("{0}")]
    Param(String),

    /// An allocation limit was exceeded (list or stack caps).
    #[error("out of memory: {0}")]
    Memory(String),

    /// An internal inconsistency that the engine cannot recover from.
    #[error("system error: {0}")]
    System(String),

    /// A fatal error raised during score evaluation.
    #[error("{0}")]
    Script(String),

    #[error("unknown error")]
    Unknown,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::BusLoop.to_string(), "bus loop: configuration not allowed");
        assert_eq!(
            Error::FunctionNotFound("wavetable".into()).to_string(),
            "function not found: wavetable()"
        );
        assert_eq!(Error::Script("oops".into()).to_string(), "oops");
    }
}
