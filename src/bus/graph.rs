//! The bus graph: flags, parent lists, instrument bindings, play order.

use std::collections::VecDeque;
use std::fmt;

use tracing::info;

use crate::error::{Error, Result};

/// Default engine-wide bus count.
pub const DEFAULT_BUS_COUNT: usize = 44;

/// Bus classes named by the `bus_config` grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    In,
    Out,
    AuxIn,
    AuxOut,
    /// Chained input: counted for instrument validation, not routed.
    ChainIn,
    /// Chained output: counted for instrument validation, not routed.
    ChainOut,
}

/// A parsed bus specifier: a type plus an inclusive channel range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRange {
    pub ty: BusType,
    pub start: usize,
    pub end: usize,
}

/// Parse a bus name: `in<n>`, `in<a>-<b>`, `out<…>`, `aux<…>in`,
/// `aux<…>out`, `chain<…>in`, `chain<…>out`. Whitespace is ignored, so
/// `"aux 0 in"` works. Range endpoints must satisfy `a <= b < max_bus`.
pub fn parse_bus_name(name: &str, max_bus: usize) -> Result<BusRange> {
    let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    let invalid = || Error::InvalidBus(name.to_string());
    let (ty, digits) = if let Some(rest) = compact.strip_prefix("aux") {
        if let Some(digits) = rest.strip_suffix("in") {
            (BusType::AuxIn, digits)
        } else if let Some(digits) = rest.strip_suffix("out") {
            (BusType::AuxOut, digits)
        } else {
            return Err(invalid());
        }
    } else if let Some(rest) = compact.strip_prefix("chain") {
        if let Some(digits) = rest.strip_suffix("in") {
            (BusType::ChainIn, digits)
        } else if let Some(digits) = rest.strip_suffix("out") {
            (BusType::ChainOut, digits)
        } else {
            return Err(invalid());
        }
    } else if let Some(digits) = compact.strip_prefix("in") {
        (BusType::In, digits)
    } else if let Some(digits) = compact.strip_prefix("out") {
        (BusType::Out, digits)
    } else {
        return Err(invalid());
    };

    let chan_err = || Error::InvalidBusChannel(name.to_string());
    let (start, end) = match digits.split_once('-') {
        Some((a, b)) => (
            a.parse::<usize>().map_err(|_| chan_err())?,
            b.parse::<usize>().map_err(|_| chan_err())?,
        ),
        None => {
            let n = digits.parse::<usize>().map_err(|_| chan_err())?;
            (n, n)
        }
    };
    if end < start || end >= max_bus {
        return Err(chan_err());
    }
    Ok(BusRange { ty, start, end })
}

/// The per-instrument routing record: four bus-index arrays plus chain
/// counts that pass validation without contributing to routing.
#[derive(Debug, Clone, Default)]
pub struct BusSlot {
    pub inputs: Vec<u16>,
    pub outputs: Vec<u16>,
    pub aux_inputs: Vec<u16>,
    pub aux_outputs: Vec<u16>,
    pub chain_inputs: usize,
    pub chain_outputs: usize,
}

impl BusSlot {
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Aux input count as instruments see it (chain inputs included).
    pub fn aux_input_count(&self) -> usize {
        self.aux_inputs.len() + self.chain_inputs
    }

    /// Output count as instruments see it (chain outputs included).
    pub fn output_count(&self) -> usize {
        self.outputs.len() + self.chain_outputs
    }

    pub fn aux_output_count(&self) -> usize {
        self.aux_outputs.len()
    }
}

#[derive(Debug, Clone, Default)]
struct BusState {
    out_in_use: bool,
    aux_in_use: bool,
    aux_out_in_use: bool,
    has_parent: bool,
    has_child: bool,
    /// Aux buses feeding this one.
    sources: Vec<u16>,
}

/// The bus graph: per-bus flags and parent lists, per-instrument slot
/// chains, and the three play lists derived from them.
pub struct BusGraph {
    bus_count: usize,
    /// Output device channels; `out` buses must fit under this.
    channels: usize,
    /// Active input channels, used by the synthesized default binding.
    input_channels: usize,
    buses: Vec<BusState>,
    to_out: Vec<u16>,
    to_aux: Vec<u16>,
    aux_to_aux: Vec<u16>,
    /// Instrument name -> slot chain, most recent config first.
    bindings: Vec<(String, Vec<BusSlot>)>,
}

impl BusGraph {
    pub fn new(bus_count: usize, channels: usize, input_channels: usize) -> BusGraph {
        BusGraph {
            bus_count,
            channels,
            input_channels,
            buses: vec![BusState::default(); bus_count],
            to_out: Vec::new(),
            to_aux: Vec::new(),
            aux_to_aux: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn bus_count(&self) -> usize {
        self.bus_count
    }

    /// Buses summed to the output device, ascending.
    pub fn to_out_play_list(&self) -> &[u16] {
        &self.to_out
    }

    /// Buses receiving instrument aux output, ascending.
    pub fn to_aux_play_list(&self) -> &[u16] {
        &self.to_aux
    }

    /// Aux->aux summation order: sources before sinks.
    pub fn aux_to_aux_play_list(&self) -> &[u16] {
        &self.aux_to_aux
    }

    /// Aux buses feeding `bus`.
    pub fn sources(&self, bus: usize) -> &[u16] {
        &self.buses[bus].sources
    }

    pub fn aux_in_use(&self, bus: usize) -> bool {
        self.buses[bus].aux_in_use
    }

    pub fn out_in_use(&self, bus: usize) -> bool {
        self.buses[bus].out_in_use
    }

    /// The current (most recent) slot for an instrument, if any.
    pub fn current_slot(&self, inst_name: &str) -> Option<&BusSlot> {
        self.bindings
            .iter()
            .find(|(name, _)| name == inst_name)
            .and_then(|(_, chain)| chain.first())
    }

    /// Configure an instrument's bus routing.
    ///
    /// Parses the specifiers, rejects conflicting classes and aux cycles,
    /// then commits: flags, parent-list edges, the instrument's slot chain
    /// head, and a rebuilt play order. A rejected call leaves the graph
    /// unchanged. The committed slot is returned so the caller can
    /// allocate aux buffers for it.
    pub fn bus_config(&mut self, inst_name: &str, bus_names: &[&str]) -> Result<BusSlot> {
        if bus_names.is_empty() {
            return Err(Error::Param("bus_config: wrong number of args".into()));
        }
        let mut slot = BusSlot::default();
        let mut in_names: Vec<&str> = Vec::new();
        let mut out_names: Vec<&str> = Vec::new();
        for &name in bus_names {
            let range = parse_bus_name(name, self.bus_count)?;
            let chans = range.end - range.start + 1;
            match range.ty {
                BusType::In => {
                    if !slot.aux_inputs.is_empty() {
                        return Err(Error::Param(
                            "bus_config: can't have 'in' and 'aux-in' buses in same bus_config".into(),
                        ));
                    }
                    if slot.chain_inputs > 0 {
                        return Err(Error::Param(
                            "bus_config: can't have 'in' and 'chain-in' buses in same bus_config".into(),
                        ));
                    }
                    if range.end >= self.channels {
                        return Err(Error::Param(format!(
                            "bus_config: the engine has {} channels but this bus_config requires {}",
                            self.channels,
                            range.end + 1
                        )));
                    }
                    in_names.push(name);
                    slot.inputs.extend((range.start..=range.end).map(|k| k as u16));
                }
                BusType::Out => {
                    if !slot.aux_outputs.is_empty() {
                        return Err(Error::Param(
                            "bus_config: can't have 'out' and 'aux-out' buses in same bus_config".into(),
                        ));
                    }
                    if slot.chain_outputs > 0 {
                        return Err(Error::Param(
                            "bus_config: can't have 'out' and 'chain-out' buses in same bus_config".into(),
                        ));
                    }
                    if range.end >= self.channels {
                        return Err(Error::Param(format!(
                            "bus_config: the engine has {} output channels but this bus_config requires {}",
                            self.channels,
                            range.end + 1
                        )));
                    }
                    out_names.push(name);
                    slot.outputs.extend((range.start..=range.end).map(|k| k as u16));
                }
                BusType::AuxIn => {
                    if !slot.inputs.is_empty() {
                        return Err(Error::Param(
                            "bus_config: can't have 'in' and 'aux-in' buses in same bus_config".into(),
                        ));
                    }
                    if slot.chain_inputs > 0 {
                        return Err(Error::Param(
                            "bus_config: can't have 'chain-in' and 'aux-in' buses in same bus_config".into(),
                        ));
                    }
                    in_names.push(name);
                    slot.aux_inputs.extend((range.start..=range.end).map(|k| k as u16));
                }
                BusType::AuxOut => {
                    if !slot.outputs.is_empty() {
                        return Err(Error::Param(
                            "bus_config: can't have 'out' and 'aux-out' buses in same bus_config".into(),
                        ));
                    }
                    if slot.chain_outputs > 0 {
                        return Err(Error::Param(
                            "bus_config: can't have 'aux-out' and 'chain-out' buses in same bus_config".into(),
                        ));
                    }
                    out_names.push(name);
                    slot.aux_outputs.extend((range.start..=range.end).map(|k| k as u16));
                }
                BusType::ChainIn => {
                    if !slot.inputs.is_empty() || !slot.aux_inputs.is_empty() {
                        return Err(Error::Param(
                            "bus_config: can't have 'chain-in' combined with any other in type in same bus_config".into(),
                        ));
                    }
                    in_names.push(name);
                    slot.chain_inputs += chans;
                }
                BusType::ChainOut => {
                    if !slot.outputs.is_empty() || !slot.aux_outputs.is_empty() {
                        return Err(Error::Param(
                            "bus_config: can't have 'chain-out' combined with any other out type in same bus_config".into(),
                        ));
                    }
                    out_names.push(name);
                    slot.chain_outputs = chans;
                }
            }
        }

        self.check_config(&slot)?;
        self.commit(inst_name, slot.clone());

        info!(
            "bus_config: ({}) => {} => ({})",
            in_names.join(", "),
            inst_name,
            out_names.join(", ")
        );
        Ok(slot)
    }

    /// Breadth-first cycle check: walk upstream from the slot's aux inputs
    /// through the existing parent lists; reaching any of the slot's aux
    /// outputs means the new edges would close a loop.
    fn check_config(&self, slot: &BusSlot) -> Result<()> {
        let mut visited = vec![false; self.bus_count];
        let mut queue: VecDeque<u16> = slot.aux_inputs.iter().copied().collect();
        while let Some(bus) = queue.pop_front() {
            if slot.aux_outputs.contains(&bus) {
                return Err(Error::BusLoop);
            }
            if visited[bus as usize] {
                continue;
            }
            visited[bus as usize] = true;
            for &src in &self.buses[bus as usize].sources {
                if !visited[src as usize] {
                    queue.push_back(src);
                }
            }
        }
        Ok(())
    }

    /// Apply a checked slot: flags, edges, binding chain, play lists.
    fn commit(&mut self, inst_name: &str, slot: BusSlot) {
        for &k in &slot.outputs {
            self.buses[k as usize].out_in_use = true;
        }
        for &out in &slot.aux_outputs {
            let out = out as usize;
            self.buses[out].aux_out_in_use = true;
            self.buses[out].aux_in_use = true;
            for &input in &slot.aux_inputs {
                self.buses[out].has_parent = true;
                if !self.buses[out].sources.contains(&input) {
                    self.buses[out].sources.push(input);
                }
                self.buses[input as usize].has_child = true;
                self.buses[input as usize].aux_in_use = true;
            }
        }

        match self.bindings.iter_mut().find(|(name, _)| name == inst_name) {
            Some((_, chain)) => chain.insert(0, slot),
            None => self.bindings.push((inst_name.to_string(), vec![slot])),
        }

        self.rebuild_io_play_lists();
        self.create_play_order();
    }

    /// Synthesize the default binding for an instrument that never called
    /// `bus_config`: all active input channels in, all output channels out.
    pub fn default_config(&mut self, inst_name: &str) -> BusSlot {
        info!("no bus_config defined, setting default (in/out)");
        let slot = BusSlot {
            inputs: (0..self.input_channels).map(|k| k as u16).collect(),
            outputs: (0..self.channels).map(|k| k as u16).collect(),
            ..Default::default()
        };
        // No aux edges, so the cycle check cannot fail.
        self.commit(inst_name, slot.clone());

        let ins = match slot.inputs.len() {
            0 => "()".to_string(),
            1 => "(in 0)".to_string(),
            n => format!("(in 0-{})", n - 1),
        };
        let outs = match slot.outputs.len() {
            1 => "(out 0)".to_string(),
            n => format!("(out 0-{})", n.saturating_sub(1)),
        };
        info!("default: {ins} => {inst_name} => {outs}");
        slot
    }

    fn rebuild_io_play_lists(&mut self) {
        self.to_out.clear();
        self.to_aux.clear();
        for i in 0..self.bus_count {
            if self.buses[i].out_in_use {
                self.to_out.push(i as u16);
            }
            if self.buses[i].aux_out_in_use {
                self.to_aux.push(i as u16);
            }
        }
    }

    /// Derive the aux->aux summation order: roots (aux buses without
    /// parents) first, then for each leaf (aux bus without children) the
    /// reverse of a breadth-first upstream traversal. Buses already
    /// placed by an earlier leaf's traversal are not repeated.
    fn create_play_order(&mut self) {
        self.aux_to_aux.clear();
        for i in 0..self.bus_count {
            if self.buses[i].aux_in_use && !self.buses[i].has_parent {
                self.aux_to_aux.push(i as u16);
            }
        }
        let mut placed = vec![false; self.bus_count];
        for leaf in 0..self.bus_count {
            if self.buses[leaf].aux_in_use && !self.buses[leaf].has_child {
                let rev_play = self.traverse_upstream(leaf, &mut placed);
                for &bus in rev_play.iter().rev() {
                    self.aux_to_aux.push(bus);
                }
            }
        }
    }

    /// Breadth-first walk from `seed` through parent lists, recording
    /// every newly visited bus that has a parent, in discovery order.
    fn traverse_upstream(&self, seed: usize, placed: &mut [bool]) -> Vec<u16> {
        let mut rev_play = Vec::new();
        let mut queue = VecDeque::from([seed as u16]);
        while let Some(bus) = queue.pop_front() {
            let b = bus as usize;
            if self.buses[b].sources.is_empty() || placed[b] {
                continue;
            }
            placed[b] = true;
            if self.buses[b].has_parent {
                rev_play.push(bus);
            }
            for &src in &self.buses[b].sources {
                queue.push_back(src);
            }
        }
        rev_play
    }

    /// Tear the graph down to its initial state.
    pub fn clear(&mut self) {
        self.buses = vec![BusState::default(); self.bus_count];
        self.to_out.clear();
        self.to_aux.clear();
        self.aux_to_aux.clear();
        self.bindings.clear();
    }
}

impl fmt::Display for BusGraph {
    /// Configuration dump: per-instrument slots, aux parents/children,
    /// and the aux playback order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, chain) in &self.bindings {
            writeln!(f, "{name}")?;
            for slot in chain {
                writeln!(
                    f,
                    "   in: {:?}  out: {:?}  auxin: {:?}  auxout: {:?}",
                    slot.inputs, slot.outputs, slot.aux_inputs, slot.aux_outputs
                )?;
            }
        }
        let parents: Vec<usize> = (0..self.bus_count)
            .filter(|&i| self.buses[i].aux_in_use && !self.buses[i].has_parent)
            .collect();
        let children: Vec<usize> = (0..self.bus_count)
            .filter(|&i| self.buses[i].aux_in_use && !self.buses[i].has_child)
            .collect();
        writeln!(f, "aux buses w/o aux inputs: {parents:?}")?;
        writeln!(f, "aux buses w/o aux outputs: {children:?}")?;
        writeln!(f, "output buffer playback order: {:?}", self.aux_to_aux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> BusGraph {
        BusGraph::new(16, 2, 2)
    }

    #[test]
    fn test_parse_bus_names() {
        let r = parse_bus_name("in0", 16).unwrap();
        assert_eq!(r, BusRange { ty: BusType::In, start: 0, end: 0 });
        let r = parse_bus_name("out0-1", 16).unwrap();
        assert_eq!(r, BusRange { ty: BusType::Out, start: 0, end: 1 });
        let r = parse_bus_name("aux2in", 16).unwrap();
        assert_eq!(r, BusRange { ty: BusType::AuxIn, start: 2, end: 2 });
        let r = parse_bus_name("aux 0-3 out", 16).unwrap();
        assert_eq!(r, BusRange { ty: BusType::AuxOut, start: 0, end: 3 });
        let r = parse_bus_name("chain 1 in", 16).unwrap();
        assert_eq!(r, BusRange { ty: BusType::ChainIn, start: 1, end: 1 });
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_bus_name("sideways3", 16), Err(Error::InvalidBus(_))));
        assert!(matches!(parse_bus_name("aux3", 16), Err(Error::InvalidBus(_))));
        assert!(matches!(parse_bus_name("inX", 16), Err(Error::InvalidBusChannel(_))));
        // Reversed and out-of-range channel ranges.
        assert!(matches!(parse_bus_name("in3-1", 16), Err(Error::InvalidBusChannel(_))));
        assert!(matches!(parse_bus_name("aux99in", 16), Err(Error::InvalidBusChannel(_))));
    }

    #[test]
    fn test_simple_config_sets_flags_and_lists() {
        let mut g = graph();
        g.bus_config("WAVETABLE", &["in0", "out0-1"]).unwrap();
        assert!(g.out_in_use(0));
        assert!(g.out_in_use(1));
        assert_eq!(g.to_out_play_list(), &[0, 1]);
        let slot = g.current_slot("WAVETABLE").unwrap();
        assert_eq!(slot.inputs, vec![0]);
        assert_eq!(slot.outputs, vec![0, 1]);
    }

    #[test]
    fn test_conflicting_bus_classes_rejected() {
        let mut g = graph();
        assert!(g.bus_config("I", &["in0", "aux0in", "out0"]).is_err());
        assert!(g.bus_config("I", &["aux0out", "out0"]).is_err());
        assert!(g.bus_config("I", &["chain0in", "in0", "out0"]).is_err());
        assert!(g.bus_config("I", &["in0"]).is_ok());
    }

    #[test]
    fn test_out_channels_bounded_by_device() {
        let mut g = graph(); // 2 channels
        assert!(g.bus_config("I", &["out0-3"]).is_err());
        assert!(g.bus_config("I", &["in0", "out5"]).is_err());
    }

    #[test]
    fn test_reconfig_prepends_slot() {
        let mut g = graph();
        g.bus_config("I", &["out0"]).unwrap();
        g.bus_config("I", &["out0-1"]).unwrap();
        let slot = g.current_slot("I").unwrap();
        assert_eq!(slot.outputs, vec![0, 1]);
    }

    #[test]
    fn test_aux_chain_play_order() {
        let mut g = graph();
        // Instruments feed aux 0 and aux 1; a submix folds both into aux 2;
        // a final effect reads aux 2 to the output.
        g.bus_config("SRC_A", &["aux0out"]).unwrap();
        g.bus_config("SRC_B", &["aux1out"]).unwrap();
        g.bus_config("SUBMIX_A", &["aux0in", "aux2out"]).unwrap();
        g.bus_config("SUBMIX_B", &["aux1in", "aux2out"]).unwrap();
        g.bus_config("FX", &["aux2in", "out0-1"]).unwrap();

        let order = g.aux_to_aux_play_list();
        let pos = |bus: u16| order.iter().position(|&b| b == bus).unwrap();
        // Every parent precedes its child.
        for bus in 0..g.bus_count() {
            for &parent in g.sources(bus) {
                assert!(
                    pos(parent) < pos(bus as u16),
                    "parent {parent} must precede child {bus} in {order:?}"
                );
            }
        }
        assert_eq!(order.len(), 3); // aux 0, 1, 2 each appear once
    }

    #[test]
    fn test_deep_chain_topological_order() {
        let mut g = graph();
        g.bus_config("A", &["aux0out"]).unwrap();
        g.bus_config("B", &["aux0in", "aux1out"]).unwrap();
        g.bus_config("C", &["aux1in", "aux2out"]).unwrap();
        g.bus_config("D", &["aux2in", "out0"]).unwrap();
        assert_eq!(g.aux_to_aux_play_list(), &[0, 1, 2]);
    }

    #[test]
    fn test_self_loop_rejected_graph_unchanged() {
        let mut g = graph();
        g.bus_config("A", &["aux0in", "aux1out"]).unwrap();
        let before = g.aux_to_aux_play_list().to_vec();
        let err = g.bus_config("C", &["aux0in", "aux0out"]).unwrap_err();
        assert!(matches!(err, Error::BusLoop));
        assert_eq!(g.aux_to_aux_play_list(), &before[..]);
        assert!(g.current_slot("C").is_none());
        // The earlier config still stands.
        assert_eq!(g.current_slot("A").unwrap().aux_inputs, vec![0]);
    }

    #[test]
    fn test_two_step_cycle_rejected() {
        let mut g = graph();
        g.bus_config("A", &["aux0in", "aux1out"]).unwrap();
        let err = g.bus_config("B", &["aux1in", "aux0out"]).unwrap_err();
        assert!(matches!(err, Error::BusLoop));
        // A's routing survives the rejected call.
        assert_eq!(g.sources(1), &[0]);
        assert!(g.current_slot("B").is_none());
    }

    #[test]
    fn test_long_cycle_rejected() {
        let mut g = graph();
        g.bus_config("A", &["aux0in", "aux1out"]).unwrap();
        g.bus_config("B", &["aux1in", "aux2out"]).unwrap();
        g.bus_config("C", &["aux2in", "aux3out"]).unwrap();
        let err = g.bus_config("D", &["aux3in", "aux0out"]).unwrap_err();
        assert!(matches!(err, Error::BusLoop));
    }

    #[test]
    fn test_default_config() {
        let mut g = graph();
        let slot = g.default_config("STRUM");
        assert_eq!(slot.inputs, vec![0, 1]);
        assert_eq!(slot.outputs, vec![0, 1]);
        assert!(g.out_in_use(0) && g.out_in_use(1));
        assert_eq!(g.to_out_play_list(), &[0, 1]);
        assert!(g.current_slot("STRUM").is_some());
    }

    #[test]
    fn test_chain_counts_validate_without_routing() {
        let mut g = graph();
        let slot = g.bus_config("GRANULATE", &["chain0-1in", "chain0out"]).unwrap();
        assert_eq!(slot.aux_input_count(), 2);
        assert_eq!(slot.output_count(), 1);
        assert!(slot.aux_inputs.is_empty());
        assert!(slot.outputs.is_empty());
        // Nothing landed in the play lists.
        assert!(g.to_out_play_list().is_empty());
        assert!(g.aux_to_aux_play_list().is_empty());
    }

    #[test]
    fn test_parent_lists_grow_without_wrapping() {
        let mut g = BusGraph::new(4, 2, 0);
        // Feed aux 3 from every other aux bus; the parent list must hold
        // all of them even when it reaches the engine bus count.
        g.bus_config("A", &["aux0in", "aux3out"]).unwrap();
        g.bus_config("B", &["aux1in", "aux3out"]).unwrap();
        g.bus_config("C", &["aux2in", "aux3out"]).unwrap();
        let mut sources = g.sources(3).to_vec();
        sources.sort_unstable();
        assert_eq!(sources, vec![0, 1, 2]);
    }

    #[test]
    fn test_random_cycle_configs_always_rejected() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x0511);
        for _ in 0..200 {
            let mut g = BusGraph::new(8, 2, 0);
            // Random acyclic prefix: edges always flow low -> high.
            for _ in 0..rng.gen_range(0..6) {
                let a = rng.gen_range(0..7usize);
                let b = rng.gen_range(a + 1..8usize);
                let name = format!("I{a}_{b}");
                let (ain, bout) = (format!("aux{a}in"), format!("aux{b}out"));
                g.bus_config(&name, &[ain.as_str(), bout.as_str()]).unwrap();
            }
            let before: Vec<Vec<u16>> = (0..8).map(|i| g.sources(i).to_vec()).collect();
            // A closing edge high -> low creates a cycle whenever a path
            // low -> high already exists; it must never be accepted when
            // it does.
            let lo = rng.gen_range(0..7usize);
            let hi = rng.gen_range(lo..8usize);
            let (hin, lout) = (format!("aux{hi}in"), format!("aux{lo}out"));
            let result = g.bus_config("CYCLE", &[hin.as_str(), lout.as_str()]);
            if reachable(&g, lo, hi) || lo == hi {
                assert!(matches!(result, Err(Error::BusLoop)));
                // Rejection left the graph untouched.
                let after: Vec<Vec<u16>> = (0..8).map(|i| g.sources(i).to_vec()).collect();
                assert_eq!(before, after);
            } else {
                assert!(result.is_ok());
            }
            // Whatever happened, no bus is in its own transitive parent set.
            for bus in 0..8 {
                assert!(!reachable_strict(&g, bus, bus));
            }
        }
    }

    /// Is `to` reachable from `from` along parent -> child edges
    /// (including the trivial path)?
    fn reachable(g: &BusGraph, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        reachable_strict(g, from, to)
    }

    /// Is there a nonempty path `from` -> ... -> `to`?
    fn reachable_strict(g: &BusGraph, from: usize, to: usize) -> bool {
        let mut stack: Vec<usize> = (0..g.bus_count())
            .filter(|&b| g.sources(b).contains(&(from as u16)))
            .collect();
        let mut seen = vec![false; g.bus_count()];
        while let Some(b) = stack.pop() {
            if b == to {
                return true;
            }
            if seen[b] {
                continue;
            }
            seen[b] = true;
            for next in 0..g.bus_count() {
                if g.sources(next).contains(&(b as u16)) {
                    stack.push(next);
                }
            }
        }
        false
    }
}
