//! Realtime score-driven audio engine core.
//!
//! Three tightly coupled subsystems:
//!
//! - **Score-language runtime** ([`lang`]): a tree-walking interpreter
//!   over a typed AST with lexical scoping, user-defined functions and
//!   methods, structs, lists, and maps, plus builtin dispatch into the
//!   host.
//! - **Bus routing graph** ([`bus`]): numbered audio buses classified as
//!   input, output, and auxiliary, with cycle detection and a derived
//!   playback order that sequences per-bus summation each render block.
//! - **Tempo map** ([`transport`]): a piecewise constant-acceleration
//!   mapping between score time and beats.
//!
//! # Primary API
//!
//! - [`OstinatoEngine`] / [`OstinatoEngineBuilder`]: main entry point
//! - [`Interpreter`](lang::interp::Interpreter): evaluate score ASTs
//! - [`HostInterface`]: instrument schedulers and handle arithmetic
//!
//! # Example
//!
//! ```ignore
//! use ostinato::{OstinatoEngine, NoHost};
//!
//! let engine = OstinatoEngine::builder().channels(2).build()?;
//! engine.mark_audio_configured();
//! engine.bus_config("WAVETABLE", &["in0", "out0-1"])?;
//!
//! let mut host = NoHost;
//! let mut interp = engine.interpreter(&mut host);
//! interp.eval_root(&score_root)?;
//! ```

// Error types
pub mod error;
pub use error::{Error, Result};

// Main entry point
mod engine;
pub use engine::{OstinatoEngine, OstinatoEngineBuilder};

// Run-time options
pub mod options;
pub use options::{Options, PrintLevel};

// Score language
pub mod lang;
pub use lang::interp::Interpreter;
pub use lang::value::{Handle, Value, ValueType};

// Bus routing and mixing
pub mod bus;
pub use bus::{parse_bus_name, BusGraph, BusRange, BusSlot, BusType, Mixer, TargetBus};

// Tempo map
pub mod transport;
pub use transport::{TempoMap, TempoSnapshot};

// Host collaborator seam
pub mod host;
pub use host::{HostCall, HostInterface, NoHost};
