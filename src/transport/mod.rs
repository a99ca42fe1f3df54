//! Score-time transport: the tempo map.

mod tempo_map;

pub use tempo_map::{TempoMap, TempoSnapshot, DEFAULT_BEAT_BASIS, MAX_TEMPO_POINTS};
