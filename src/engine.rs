//! The engine: owns every subsystem and replaces the original's
//! process-wide singletons with one value.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::bus::{BusGraph, BusSlot, Mixer, TargetBus, DEFAULT_BUS_COUNT};
use crate::error::{Error, Result};
use crate::host::HostInterface;
use crate::lang::interp::Interpreter;
use crate::options::Options;
use crate::transport::TempoMap;

/// Configuration-file name looked up under `$HOME`.
const RC_FILENAME: &str = ".ostinatorc";

/// A complete engine: options, bus graph, mixer, and tempo map behind
/// their own locks.
///
/// Score evaluation happens between render blocks through an
/// [`Interpreter`] built by [`interpreter`](Self::interpreter);
/// instruments mix into the bus buffers through the `*_to_bus` surface;
/// the host drains the output buses once per block.
pub struct OstinatoEngine {
    options: RwLock<Options>,
    graph: Mutex<BusGraph>,
    mixer: Mutex<Mixer>,
    tempo: Mutex<TempoMap>,
    audio_configured: AtomicBool,
    channels: usize,
    bus_count: usize,
}

impl OstinatoEngine {
    /// Create a new engine builder.
    pub fn builder() -> OstinatoEngineBuilder {
        OstinatoEngineBuilder::default()
    }

    /// Output channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Engine-wide bus count.
    pub fn bus_count(&self) -> usize {
        self.bus_count
    }

    /// Frames per render block.
    pub fn bufsamps(&self) -> usize {
        self.options.read().buffer_frames
    }

    /// Read options under the lock.
    pub fn with_options<R>(&self, f: impl FnOnce(&Options) -> R) -> R {
        f(&self.options.read())
    }

    /// Mark the audio device as configured. Record and full-duplex
    /// options reject changes after this point, and `bus_config` requires
    /// it.
    pub fn mark_audio_configured(&self) {
        self.audio_configured.store(true, Ordering::Release);
    }

    pub fn audio_configured(&self) -> bool {
        self.audio_configured.load(Ordering::Acquire)
    }

    /// Apply a `set_option` directive from a score.
    pub fn set_option(&self, directive: &str) -> Result<()> {
        self.options
            .write()
            .set_option(directive, self.audio_configured())
    }

    /// Fold the user's `$HOME/.ostinatorc` into the options.
    pub fn load_user_config(&self) -> Result<()> {
        let Some(home) = std::env::var_os("HOME") else {
            return Ok(());
        };
        let path = PathBuf::from(home).join(RC_FILENAME);
        self.options.write().read_config_file(&path)
    }

    // ------------------------------------------------------- bus graph --

    /// Configure an instrument's bus routing and allocate the aux buffers
    /// the new slot references.
    pub fn bus_config(&self, inst_name: &str, bus_names: &[&str]) -> Result<()> {
        if !self.audio_configured() {
            return Err(Error::Param(
                "bus_config: you need to start the audio device before doing this".into(),
            ));
        }
        let slot = self.graph.lock().bus_config(inst_name, bus_names)?;
        self.allocate_slot_buffers(&slot);
        Ok(())
    }

    /// The routing slot an instrument should use: its most recent
    /// `bus_config`, or the synthesized default on first use.
    pub fn get_bus_config(&self, inst_name: &str) -> BusSlot {
        let mut graph = self.graph.lock();
        if let Some(slot) = graph.current_slot(inst_name) {
            return slot.clone();
        }
        let slot = graph.default_config(inst_name);
        drop(graph);
        self.allocate_slot_buffers(&slot);
        slot
    }

    fn allocate_slot_buffers(&self, slot: &BusSlot) {
        let frames = self.bufsamps();
        let mut mixer = self.mixer.lock();
        for &bus in slot.aux_inputs.iter().chain(slot.aux_outputs.iter()) {
            mixer.allocate_aux_buffer(bus as usize, frames);
        }
    }

    /// Inspect the bus graph under its lock.
    pub fn with_bus_graph<R>(&self, f: impl FnOnce(&BusGraph) -> R) -> R {
        f(&self.graph.lock())
    }

    /// Tear down all routing state.
    pub fn free_bus_config(&self) {
        self.graph.lock().clear();
    }

    // ------------------------------------------------------------ mixer --

    /// Zero the bus buffers at the start of a render block.
    pub fn begin_block(&self) {
        self.mixer.lock().clear_block();
    }

    /// Sum an instrument's interleaved output directly into a bus
    /// (single-threaded regime).
    pub fn add_to_bus(
        &self,
        dest: TargetBus,
        src: &[f32],
        offset: usize,
        end_frame: usize,
        chans: usize,
    ) -> Result<()> {
        self.mixer.lock().add_to_bus(dest, src, offset, end_frame, chans)
    }

    /// Queue a mix request from a worker thread (threaded regime).
    pub fn queue_to_bus(
        &self,
        worker: usize,
        dest: TargetBus,
        src: Vec<f32>,
        offset: usize,
        end_frame: usize,
        chans: usize,
    ) -> Result<()> {
        self.mixer
            .lock()
            .queue_to_bus(worker, dest, src, offset, end_frame, chans)
    }

    /// Allocate (or grow) an aux bus buffer.
    pub fn allocate_aux_buffer(&self, bus: usize, frames: usize) {
        self.mixer.lock().allocate_aux_buffer(bus, frames);
    }

    /// Finish a render block: apply queued worker contributions, sum the
    /// aux chains in play order, and interleave the output buses into
    /// `interleaved`.
    pub fn render_block(&self, interleaved: &mut [f32]) -> Result<()> {
        let graph = self.graph.lock();
        let mut mixer = self.mixer.lock();
        mixer.mix_queued()?;
        mixer.mix_aux_chains(&graph);
        drop(graph);
        let check_peaks = self.options.read().check_peaks;
        mixer.drain_output(interleaved, check_peaks)
    }

    /// Peak levels per output channel, when peak checking is on.
    pub fn peaks(&self) -> Vec<f32> {
        self.mixer.lock().peaks().to_vec()
    }

    /// Report clipping at the end of a run, honoring the option.
    pub fn report_clipping(&self) {
        if self.options.read().report_clipping {
            self.mixer.lock().report_clipping();
        }
    }

    // ------------------------------------------------------------ tempo --

    /// Set the reference beat for subsequent `tempo` calls.
    pub fn tbase(&self, basis: f64) -> Result<()> {
        self.tempo.lock().set_basis(basis)
    }

    /// Install (or, with an empty slice, clear) the tempo map.
    pub fn tempo(&self, points: &[(f64, f64)]) -> Result<()> {
        self.tempo.lock().set_points(points)
    }

    /// Beats at `time` seconds of score time.
    pub fn time_to_beat(&self, time: f64) -> f64 {
        self.tempo.lock().time_to_beat(time)
    }

    /// Seconds of score time at `beat`.
    pub fn beat_to_time(&self, beat: f64) -> f64 {
        self.tempo.lock().beat_to_time(beat)
    }

    // ------------------------------------------------------ interpreter --

    /// Build an interpreter for one score pass, wired to the current
    /// print options.
    pub fn interpreter<'h>(&self, host: &'h mut dyn HostInterface) -> Interpreter<'h> {
        let options = self.options.read();
        let mut interp = Interpreter::new(host);
        interp.set_print_level(options.print_level);
        interp.set_print_list_limit(options.print_list_limit);
        interp
    }
}

/// Builder for [`OstinatoEngine`].
pub struct OstinatoEngineBuilder {
    channels: usize,
    input_channels: usize,
    bus_count: usize,
    worker_threads: usize,
    options: Options,
    load_user_config: bool,
}

impl Default for OstinatoEngineBuilder {
    fn default() -> Self {
        Self {
            channels: 2,
            input_channels: 0,
            bus_count: DEFAULT_BUS_COUNT,
            worker_threads: 0,
            options: Options::default(),
            load_user_config: false,
        }
    }
}

impl OstinatoEngineBuilder {
    /// Set output channel count (default: 2).
    pub fn channels(mut self, count: usize) -> Self {
        self.channels = count;
        self
    }

    /// Set active input channel count (default: 0).
    pub fn input_channels(mut self, count: usize) -> Self {
        self.input_channels = count;
        self
    }

    /// Set the engine-wide bus count.
    pub fn bus_count(mut self, count: usize) -> Self {
        self.bus_count = count;
        self
    }

    /// Set frames per render block.
    pub fn buffer_frames(mut self, frames: usize) -> Self {
        self.options.buffer_frames = frames;
        self
    }

    /// Worker threads for the queued mixing regime. Zero (the default)
    /// selects the single-threaded regime where `add_to_bus` mixes
    /// directly.
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Start from the given options instead of the defaults.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Read `$HOME/.ostinatorc` during build.
    pub fn load_user_config(mut self) -> Self {
        self.load_user_config = true;
        self
    }

    pub fn build(self) -> Result<OstinatoEngine> {
        if self.channels == 0 {
            return Err(Error::Param("engine needs at least one output channel".into()));
        }
        if self.bus_count < self.channels {
            return Err(Error::Param(format!(
                "bus count {} is smaller than the channel count {}",
                self.bus_count, self.channels
            )));
        }
        let mut options = self.options;
        if self.load_user_config {
            if let Some(home) = std::env::var_os("HOME") {
                options.read_config_file(&PathBuf::from(home).join(RC_FILENAME))?;
            }
        }
        if options.buffer_frames == 0 {
            return Err(Error::Param("buffer_frames must be nonzero".into()));
        }
        let frames = options.buffer_frames;
        info!(
            "engine: {} channels, {} buses, {} frames per block",
            self.channels, self.bus_count, frames
        );
        Ok(OstinatoEngine {
            graph: Mutex::new(BusGraph::new(self.bus_count, self.channels, self.input_channels)),
            mixer: Mutex::new(Mixer::new(self.channels, self.bus_count, frames, self.worker_threads)),
            tempo: Mutex::new(TempoMap::new()),
            options: RwLock::new(options),
            audio_configured: AtomicBool::new(false),
            channels: self.channels,
            bus_count: self.bus_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> OstinatoEngine {
        let engine = OstinatoEngine::builder()
            .channels(2)
            .input_channels(2)
            .bus_count(16)
            .buffer_frames(8)
            .build()
            .unwrap();
        engine.mark_audio_configured();
        engine
    }

    #[test]
    fn test_builder_validation() {
        assert!(OstinatoEngine::builder().channels(0).build().is_err());
        assert!(OstinatoEngine::builder().channels(4).bus_count(2).build().is_err());
        assert!(OstinatoEngine::builder().buffer_frames(0).build().is_err());
    }

    #[test]
    fn test_bus_config_requires_audio() {
        let engine = OstinatoEngine::builder().build().unwrap();
        assert!(engine.bus_config("I", &["out0"]).is_err());
        engine.mark_audio_configured();
        assert!(engine.bus_config("I", &["out0"]).is_ok());
    }

    #[test]
    fn test_bus_config_allocates_aux_buffers() {
        let engine = engine();
        engine.bus_config("FX", &["aux0in", "aux1out"]).unwrap();
        engine
            .add_to_bus(TargetBus::AuxOut(1), &[0.5; 8], 0, 8, 1)
            .unwrap();
        engine
            .add_to_bus(TargetBus::AuxOut(0), &[0.5; 8], 0, 8, 1)
            .unwrap();
    }

    #[test]
    fn test_default_binding_on_first_use() {
        let engine = engine();
        let slot = engine.get_bus_config("WAVETABLE");
        assert_eq!(slot.inputs, vec![0, 1]);
        assert_eq!(slot.outputs, vec![0, 1]);
        // Second lookup returns the cached binding, not a new default.
        let again = engine.get_bus_config("WAVETABLE");
        assert_eq!(again.outputs, slot.outputs);
    }

    #[test]
    fn test_render_block_flow() {
        let engine = engine();
        engine.bus_config("SRC", &["aux0out"]).unwrap();
        engine.bus_config("FX", &["aux0in", "out0-1"]).unwrap();

        engine.begin_block();
        engine
            .add_to_bus(TargetBus::AuxOut(0), &[0.25; 8], 0, 8, 1)
            .unwrap();
        engine.add_to_bus(TargetBus::Out(0), &[0.5; 8], 0, 8, 1).unwrap();

        let mut block = vec![0.0f32; 16];
        engine.render_block(&mut block).unwrap();
        assert_eq!(block[0], 0.5); // chan 0, frame 0
        assert_eq!(block[1], 0.0); // chan 1 silent
        assert_eq!(engine.peaks()[0], 0.5);
    }

    #[test]
    fn test_set_option_respects_configured_audio() {
        let engine = OstinatoEngine::builder().build().unwrap();
        engine.set_option("RECORD_ON").unwrap();
        engine.mark_audio_configured();
        assert!(engine.set_option("RECORD_ON").is_err());
        engine.set_option("CHECK_PEAKS_OFF").unwrap();
        assert!(!engine.with_options(|o| o.check_peaks));
    }

    #[test]
    fn test_worker_threads_queue_concurrently() {
        let engine = OstinatoEngine::builder()
            .channels(1)
            .bus_count(8)
            .buffer_frames(4)
            .worker_threads(2)
            .build()
            .unwrap();
        engine.mark_audio_configured();

        std::thread::scope(|s| {
            for worker in 0..2 {
                let engine = &engine;
                s.spawn(move || {
                    engine
                        .queue_to_bus(worker, TargetBus::Out(0), vec![1.0; 4], 0, 4, 1)
                        .unwrap();
                });
            }
        });

        let mut block = vec![0.0f32; 4];
        engine.render_block(&mut block).unwrap();
        assert_eq!(block, vec![2.0; 4]);
    }

    #[test]
    fn test_tempo_surface() {
        let engine = engine();
        assert_eq!(engine.time_to_beat(3.14), 3.14);
        engine.tbase(60.0).unwrap();
        engine.tempo(&[(0.0, 60.0), (4.0, 120.0)]).unwrap();
        let b = engine.time_to_beat(4.0);
        assert!((engine.beat_to_time(b) - 4.0).abs() < 1e-6);
        engine.tempo(&[]).unwrap();
        assert_eq!(engine.time_to_beat(5.0), 5.0);
    }
}
