//! Bus routing: the directed graph of numbered audio buses and the
//! per-block mixer that sums instrument output along its derived play
//! order.

mod graph;
mod mixer;

pub use graph::{parse_bus_name, BusGraph, BusRange, BusSlot, BusType, DEFAULT_BUS_COUNT};
pub use mixer::{MixData, Mixer, TargetBus};
