//! Per-block mixing into bus buffers.
//!
//! Instruments produce interleaved sample runs; the mixer sums them into
//! de-interleaved per-bus buffers. In the threaded regime each worker
//! appends [`MixData`] records to its own queue during the parallel DSP
//! phase and the main thread applies every queue afterwards, so no two
//! threads ever write one buffer concurrently.

use parking_lot::Mutex;
use tracing::warn;

use super::graph::BusGraph;
use crate::error::{Error, Result};

/// Destination of a mix operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetBus {
    /// An output bus, drained to the device each block.
    Out(usize),
    /// An aux bus.
    AuxOut(usize),
}

/// A deferred mix request from a worker thread.
#[derive(Debug)]
pub struct MixData {
    dest: TargetBus,
    offset: usize,
    frames: usize,
    channels: usize,
    src: Vec<f32>,
}

/// Bus buffers plus the per-worker mix queues.
pub struct Mixer {
    frames: usize,
    out: Vec<Vec<f32>>,
    aux: Vec<Option<Vec<f32>>>,
    queues: Vec<Mutex<Vec<MixData>>>,
    peaks: Vec<f32>,
    clip_count: u64,
}

impl Mixer {
    /// `channels` output buffers and `bus_count` aux buffer slots (aux
    /// buffers are allocated lazily as `bus_config` touches them).
    pub fn new(channels: usize, bus_count: usize, frames: usize, workers: usize) -> Mixer {
        Mixer {
            frames,
            out: vec![vec![0.0; frames]; channels],
            aux: (0..bus_count).map(|_| None).collect(),
            queues: (0..workers).map(|_| Mutex::new(Vec::new())).collect(),
            peaks: vec![0.0; channels],
            clip_count: 0,
        }
    }

    /// Frames per block.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Ensure an aux buffer exists with capacity for at least `frames`.
    pub fn allocate_aux_buffer(&mut self, bus: usize, frames: usize) {
        match &mut self.aux[bus] {
            Some(buffer) => {
                if buffer.len() < frames {
                    buffer.resize(frames, 0.0);
                }
            }
            None => self.aux[bus] = Some(vec![0.0; frames]),
        }
    }

    pub fn aux_buffer(&self, bus: usize) -> Option<&[f32]> {
        self.aux[bus].as_deref()
    }

    pub fn out_buffer(&self, chan: usize) -> &[f32] {
        &self.out[chan]
    }

    /// Zero every buffer at the start of a render block.
    pub fn clear_block(&mut self) {
        for buffer in &mut self.out {
            buffer.fill(0.0);
        }
        for buffer in self.aux.iter_mut().flatten() {
            buffer.fill(0.0);
        }
    }

    /// Sum one instrument's interleaved output into a bus buffer:
    /// `src[0], src[chans], src[2*chans]…` accumulate into
    /// `dest[offset..end_frame]`.
    pub fn add_to_bus(
        &mut self,
        dest: TargetBus,
        src: &[f32],
        offset: usize,
        end_frame: usize,
        chans: usize,
    ) -> Result<()> {
        let frames = end_frame.saturating_sub(offset);
        let buffer = self.dest_buffer(dest, end_frame)?;
        for (n, sample) in src.iter().step_by(chans.max(1)).take(frames).enumerate() {
            buffer[offset + n] += sample;
        }
        Ok(())
    }

    fn dest_buffer(&mut self, dest: TargetBus, end_frame: usize) -> Result<&mut [f32]> {
        let buffer = match dest {
            TargetBus::Out(chan) => self
                .out
                .get_mut(chan)
                .ok_or_else(|| Error::Param(format!("no output buffer {chan}")))?,
            TargetBus::AuxOut(bus) => self
                .aux
                .get_mut(bus)
                .and_then(|b| b.as_mut())
                .ok_or_else(|| Error::Param(format!("aux buffer {bus} was never allocated")))?,
        };
        if end_frame > buffer.len() {
            return Err(Error::Param(format!(
                "mix request past end of block ({end_frame} > {})",
                buffer.len()
            )));
        }
        Ok(buffer)
    }

    /// Append a mix request to a worker's queue (threaded regime). The
    /// source samples move into the record; the accumulation happens on
    /// the main thread in [`mix_queued`](Self::mix_queued).
    pub fn queue_to_bus(
        &self,
        worker: usize,
        dest: TargetBus,
        src: Vec<f32>,
        offset: usize,
        end_frame: usize,
        chans: usize,
    ) -> Result<()> {
        let queue = self
            .queues
            .get(worker)
            .ok_or_else(|| Error::Param(format!("no mix queue for worker {worker}")))?;
        queue.lock().push(MixData {
            dest,
            offset,
            frames: end_frame.saturating_sub(offset),
            channels: chans.max(1),
            src,
        });
        Ok(())
    }

    /// Drain every worker's queue into the bus buffers, workers in index
    /// order, records in append order within each worker.
    pub fn mix_queued(&mut self) -> Result<()> {
        for i in 0..self.queues.len() {
            let drained: Vec<MixData> = std::mem::take(&mut *self.queues[i].lock());
            for m in drained {
                let buffer = self.dest_buffer(m.dest, m.offset + m.frames)?;
                for (n, sample) in m.src.iter().step_by(m.channels).take(m.frames).enumerate() {
                    buffer[m.offset + n] += sample;
                }
            }
        }
        Ok(())
    }

    /// Walk the aux->aux play order, adding each bus's parent buffers into
    /// it. Parents appear earlier in the order, so by the time a bus is
    /// summed its sources are complete.
    pub fn mix_aux_chains(&mut self, graph: &BusGraph) {
        for &bus in graph.aux_to_aux_play_list() {
            let bus = bus as usize;
            for &src in graph.sources(bus) {
                let src = src as usize;
                if src == bus {
                    continue;
                }
                let Some((parent, child)) = aux_pair(&mut self.aux, src, bus) else {
                    warn!("aux {bus} or its parent {src} has no buffer");
                    continue;
                };
                for (dst, add) in child.iter_mut().zip(parent.iter()) {
                    *dst += add;
                }
            }
        }
    }

    /// Interleave the output buses into `interleaved` (channel-major
    /// frames, `frames * channels` samples), tracking peaks and clipping.
    pub fn drain_output(&mut self, interleaved: &mut [f32], check_peaks: bool) -> Result<()> {
        let channels = self.out.len();
        if interleaved.len() < self.frames * channels {
            return Err(Error::Param(format!(
                "output slice too small: {} < {}",
                interleaved.len(),
                self.frames * channels
            )));
        }
        for frame in 0..self.frames {
            for (chan, buffer) in self.out.iter().enumerate() {
                let sample = buffer[frame];
                interleaved[frame * channels + chan] = sample;
                if check_peaks {
                    let level = sample.abs();
                    if level > self.peaks[chan] {
                        self.peaks[chan] = level;
                    }
                    if level > 1.0 {
                        self.clip_count += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Peak absolute sample value seen on each output channel.
    pub fn peaks(&self) -> &[f32] {
        &self.peaks
    }

    /// Samples over full scale seen so far.
    pub fn clipped_samples(&self) -> u64 {
        self.clip_count
    }

    /// Log and reset the clipping count at the end of a run.
    pub fn report_clipping(&mut self) {
        if self.clip_count > 0 {
            warn!("clipping: {} samples out of range", self.clip_count);
        }
        self.clip_count = 0;
    }
}

/// Disjoint borrows of a parent (read) and child (write) aux buffer.
/// Callers guarantee `parent != child`.
fn aux_pair(
    aux: &mut [Option<Vec<f32>>],
    parent: usize,
    child: usize,
) -> Option<(&[f32], &mut [f32])> {
    if parent < child {
        let (head, tail) = aux.split_at_mut(child);
        Some((head[parent].as_deref()?, tail[0].as_deref_mut()?))
    } else {
        let (head, tail) = aux.split_at_mut(parent);
        Some((tail[0].as_deref()?, head[child].as_deref_mut()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_to_bus_deinterleaves() {
        let mut mixer = Mixer::new(2, 4, 8, 0);
        // Stereo source: left ramp, right constant.
        let src: Vec<f32> = (0..8).flat_map(|i| [i as f32, 0.5]).collect();
        mixer.add_to_bus(TargetBus::Out(0), &src, 0, 8, 2).unwrap();
        mixer.add_to_bus(TargetBus::Out(1), &src[1..], 0, 8, 2).unwrap();
        assert_eq!(mixer.out_buffer(0)[3], 3.0);
        assert_eq!(mixer.out_buffer(1)[3], 0.5);
    }

    #[test]
    fn test_add_to_bus_accumulates() {
        let mut mixer = Mixer::new(1, 4, 4, 0);
        let src = [1.0f32; 4];
        mixer.add_to_bus(TargetBus::Out(0), &src, 0, 4, 1).unwrap();
        mixer.add_to_bus(TargetBus::Out(0), &src, 0, 4, 1).unwrap();
        assert_eq!(mixer.out_buffer(0), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_add_to_bus_offset_window() {
        let mut mixer = Mixer::new(1, 4, 8, 0);
        let src = [1.0f32; 8];
        mixer.add_to_bus(TargetBus::Out(0), &src, 2, 5, 1).unwrap();
        assert_eq!(mixer.out_buffer(0), &[0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unallocated_aux_rejected() {
        let mut mixer = Mixer::new(1, 4, 4, 0);
        let src = [1.0f32; 4];
        assert!(mixer.add_to_bus(TargetBus::AuxOut(2), &src, 0, 4, 1).is_err());
        mixer.allocate_aux_buffer(2, 4);
        assert!(mixer.add_to_bus(TargetBus::AuxOut(2), &src, 0, 4, 1).is_ok());
    }

    #[test]
    fn test_queued_mix_applies_in_worker_order() {
        let mut mixer = Mixer::new(1, 4, 4, 2);
        mixer
            .queue_to_bus(1, TargetBus::Out(0), vec![10.0; 4], 0, 4, 1)
            .unwrap();
        mixer
            .queue_to_bus(0, TargetBus::Out(0), vec![1.0; 4], 0, 4, 1)
            .unwrap();
        mixer.mix_queued().unwrap();
        // Addition commutes; both contributions land exactly once.
        assert_eq!(mixer.out_buffer(0), &[11.0, 11.0, 11.0, 11.0]);
        // Queues drained.
        mixer.mix_queued().unwrap();
        assert_eq!(mixer.out_buffer(0), &[11.0, 11.0, 11.0, 11.0]);
    }

    #[test]
    fn test_aux_chain_summation() {
        use crate::bus::graph::BusGraph;

        let mut graph = BusGraph::new(8, 2, 0);
        graph.bus_config("SRC", &["aux0out"]).unwrap();
        graph.bus_config("FOLD", &["aux0in", "aux1out"]).unwrap();
        graph.bus_config("OUT", &["aux1in", "out0"]).unwrap();

        let mut mixer = Mixer::new(2, 8, 4, 0);
        mixer.allocate_aux_buffer(0, 4);
        mixer.allocate_aux_buffer(1, 4);
        let src = [0.25f32; 4];
        mixer.add_to_bus(TargetBus::AuxOut(0), &src, 0, 4, 1).unwrap();
        mixer.mix_aux_chains(&graph);
        // Aux 0 flowed into aux 1 along the play order.
        assert_eq!(mixer.aux_buffer(1).unwrap(), &[0.25, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_drain_interleaves_and_tracks_peaks() {
        let mut mixer = Mixer::new(2, 4, 4, 0);
        let left = [0.5f32, -1.5, 0.0, 0.25];
        let right = [0.1f32; 4];
        mixer.add_to_bus(TargetBus::Out(0), &left, 0, 4, 1).unwrap();
        mixer.add_to_bus(TargetBus::Out(1), &right, 0, 4, 1).unwrap();

        let mut block = vec![0.0f32; 8];
        mixer.drain_output(&mut block, true).unwrap();
        assert_eq!(block[0], 0.5);
        assert_eq!(block[1], 0.1);
        assert_eq!(block[2], -1.5);
        assert_eq!(mixer.peaks()[0], 1.5);
        assert_eq!(mixer.clipped_samples(), 1);
    }

    #[test]
    fn test_clear_block_zeroes_everything() {
        let mut mixer = Mixer::new(1, 2, 4, 0);
        mixer.allocate_aux_buffer(0, 4);
        let src = [1.0f32; 4];
        mixer.add_to_bus(TargetBus::Out(0), &src, 0, 4, 1).unwrap();
        mixer.add_to_bus(TargetBus::AuxOut(0), &src, 0, 4, 1).unwrap();
        mixer.clear_block();
        assert_eq!(mixer.out_buffer(0), &[0.0; 4]);
        assert_eq!(mixer.aux_buffer(0).unwrap(), &[0.0; 4]);
    }
}
