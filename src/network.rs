//! Ordered chains of layers
//!
//! A [`Network`] owns either layers or sub-networks, never a mix. Neighbours
//! are addressed by position: the back neighbour of component `i` is `i - 1`,
//! its front neighbour `i + 1`. Forward passes walk the chain head to tail,
//! backward passes tail to head, each component reading its neighbour's
//! output or gradient directly.
//!
//! # Example
//!
//! ```
//! use neural_stacks::layers::{DenseLayer, Init};
//! use neural_stacks::network::{Composition, Network};
//! use neural_stacks::optimizers::Sgd;
//! use neural_stacks::utils::{Mse, Sigmoid, SimpleRng};
//!
//! let mut rng = SimpleRng::new(7);
//! let mut net = Network::new(Composition::Layers);
//! net.attach(DenseLayer::<2, 3, Sigmoid, Sgd, Mse>::new(Init::default(), &mut rng)).unwrap();
//! net.attach(DenseLayer::<3, 1, Sigmoid, Sgd, Mse>::new(Init::default(), &mut rng)).unwrap();
//! net.connect().unwrap();
//!
//! net.reset();
//! net.exe(&[1.0, 0.0]).unwrap();
//! net.fit(&[1.0]).unwrap();
//! net.apply(0.5, 0);
//! assert_eq!(net.out().len(), 1);
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::layers::{Layer, Signal};
use crate::persist::{read_f64, read_u32, read_u64, write_f64, write_u32, write_u64, INFO_MAGIC};

/// What a network holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    Layers,
    Networks,
}

impl Composition {
    fn name(self) -> &'static str {
        match self {
            Composition::Layers => "layers",
            Composition::Networks => "networks",
        }
    }
}

/// One component of a chain.
pub enum Node {
    Layer(Box<dyn Layer>),
    Network(Network),
}

impl Node {
    pub fn input_size(&self) -> usize {
        match self {
            Node::Layer(layer) => layer.input_size(),
            Node::Network(net) => net.input_size(),
        }
    }

    pub fn output_size(&self) -> usize {
        match self {
            Node::Layer(layer) => layer.output_size(),
            Node::Network(net) => net.output_size(),
        }
    }

    pub fn output(&self) -> &[f32] {
        match self {
            Node::Layer(layer) => layer.output(),
            Node::Network(net) => net.out(),
        }
    }

    pub fn gradient(&self) -> &[f32] {
        match self {
            Node::Layer(layer) => layer.gradient(),
            Node::Network(net) => net.gradient(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Node::Layer(layer) => layer.describe(),
            Node::Network(net) => format!("[{}]", net.describe()),
        }
    }

    fn parameter_count(&self) -> usize {
        match self {
            Node::Layer(layer) => layer.parameter_count(),
            Node::Network(net) => net.parameter_count(),
        }
    }

    fn execute(&mut self, input: &[f32]) {
        match self {
            Node::Layer(layer) => layer.execute(input),
            Node::Network(net) => forward(&mut net.nodes, input),
        }
    }

    fn fit(&mut self, input: &[f32], signal: Signal<'_>) {
        match self {
            Node::Layer(layer) => layer.fit(input, signal),
            Node::Network(net) => backward(&mut net.nodes, input, signal),
        }
    }

    fn error(&self, target: &[f32]) -> f32 {
        match self {
            Node::Layer(layer) => layer.error(target),
            Node::Network(net) => net.nodes.last().map_or(0.0, |tail| tail.error(target)),
        }
    }

    fn reset(&mut self) {
        match self {
            Node::Layer(layer) => layer.reset(),
            Node::Network(net) => net.reset(),
        }
    }

    fn apply(&mut self, rate: f32) {
        match self {
            Node::Layer(layer) => layer.apply(rate),
            Node::Network(net) => net.nodes.iter_mut().for_each(|n| n.apply(rate)),
        }
    }

    fn set_locked(&mut self, locked: bool) {
        match (self, locked) {
            (Node::Layer(layer), true) => layer.lock(),
            (Node::Layer(layer), false) => layer.unlock(),
            (Node::Network(net), true) => net.lock(),
            (Node::Network(net), false) => net.unlock(),
        }
    }

    fn is_locked(&self) -> bool {
        match self {
            Node::Layer(layer) => layer.is_locked(),
            Node::Network(net) => net.is_locked(),
        }
    }

    fn store(&self, w: &mut dyn Write) -> Result<()> {
        match self {
            Node::Layer(layer) => layer.store(w),
            Node::Network(net) => net.nodes.iter().try_for_each(|n| n.store(w)),
        }
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        match self {
            Node::Layer(layer) => layer.load(r),
            Node::Network(net) => net.nodes.iter_mut().try_for_each(|n| n.load(r)),
        }
    }

    fn exchange(&mut self, master: &mut Node) -> Result<()> {
        match (self, master) {
            (Node::Layer(mine), Node::Layer(theirs)) => mine.exchange(theirs.as_mut()),
            (Node::Network(mine), Node::Network(theirs)) => mine.exchange(theirs),
            (Node::Layer(_), Node::Network(_)) => Err(Error::WrongComposition {
                mode: "a layer",
                attempted: "a network",
            }),
            (Node::Network(_), Node::Layer(_)) => Err(Error::WrongComposition {
                mode: "a network",
                attempted: "a layer",
            }),
        }
    }
}

/// Run `execute` from the head to the tail.
fn forward(nodes: &mut [Node], input: &[f32]) {
    let Some((head, rest)) = nodes.split_first_mut() else {
        return;
    };
    head.execute(input);
    let mut back: &Node = head;
    for node in rest {
        node.execute(back.output());
        back = node;
    }
}

/// Run `fit` from the tail to the head.
///
/// `input` is what the head consumed in the matching [`forward`]; `signal`
/// feeds the tail.
fn backward(nodes: &mut [Node], input: &[f32], signal: Signal<'_>) {
    for i in (0..nodes.len()).rev() {
        let (before, rest) = nodes.split_at_mut(i);
        let Some((current, after)) = rest.split_first_mut() else {
            continue;
        };
        let layer_input = before.last().map_or(input, Node::output);
        let layer_signal = after
            .first()
            .map_or(signal, |front| Signal::Downstream(front.gradient()));
        current.fit(layer_input, layer_signal);
    }
}

/// Training metadata stored ahead of a network's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkInfo {
    /// Crate version that wrote the file.
    pub version: (u32, u32, u32),
    pub epochs: u64,
    pub train_time_secs: u64,
    pub unique_samples: u64,
    pub err_min: f64,
    pub err_max: f64,
    pub err_avg: f64,
}

impl Default for NetworkInfo {
    fn default() -> Self {
        Self {
            version: crate_version(),
            epochs: 0,
            train_time_secs: 0,
            unique_samples: 0,
            err_min: 0.0,
            err_max: 0.0,
            err_avg: 0.0,
        }
    }
}

fn crate_version() -> (u32, u32, u32) {
    let part = |s: &str| s.parse().unwrap_or(0);
    (
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}

impl NetworkInfo {
    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        write_u32(w, INFO_MAGIC)?;
        write_u32(w, self.version.0)?;
        write_u32(w, self.version.1)?;
        write_u32(w, self.version.2)?;
        write_u64(w, self.epochs)?;
        write_u64(w, self.train_time_secs)?;
        write_u64(w, self.unique_samples)?;
        write_f64(w, self.err_min)?;
        write_f64(w, self.err_max)?;
        write_f64(w, self.err_avg)?;
        Ok(())
    }

    pub fn read_from(r: &mut dyn Read) -> Result<Self> {
        let magic = read_u32(r)?;
        if magic != INFO_MAGIC {
            return Err(Error::LoadMismatch {
                component: "network",
                field: "info magic",
                expected: INFO_MAGIC as u64,
                got: magic as u64,
            });
        }
        Ok(Self {
            version: (read_u32(r)?, read_u32(r)?, read_u32(r)?),
            epochs: read_u64(r)?,
            train_time_secs: read_u64(r)?,
            unique_samples: read_u64(r)?,
            err_min: read_f64(r)?,
            err_max: read_f64(r)?,
            err_avg: read_f64(r)?,
        })
    }
}

/// An ordered, owned chain of layers or of sub-networks.
pub struct Network {
    mode: Composition,
    nodes: Vec<Node>,
    input: Vec<f32>,
    connected: bool,
}

impl Network {
    pub fn new(mode: Composition) -> Self {
        Self {
            mode,
            nodes: Vec::new(),
            input: Vec::new(),
            connected: false,
        }
    }

    pub fn composition(&self) -> Composition {
        self.mode
    }

    /// Append a layer. Fails on a network of sub-networks.
    pub fn attach<L: Layer>(&mut self, layer: L) -> Result<()> {
        self.attach_boxed(Box::new(layer))
    }

    pub fn attach_boxed(&mut self, layer: Box<dyn Layer>) -> Result<()> {
        if self.mode != Composition::Layers {
            return Err(Error::WrongComposition {
                mode: self.mode.name(),
                attempted: "a layer",
            });
        }
        self.nodes.push(Node::Layer(layer));
        self.connected = false;
        Ok(())
    }

    /// Append a sub-network. Fails on a network of layers.
    pub fn attach_network(&mut self, network: Network) -> Result<()> {
        if self.mode != Composition::Networks {
            return Err(Error::WrongComposition {
                mode: self.mode.name(),
                attempted: "a network",
            });
        }
        self.nodes.push(Node::Network(network));
        self.connected = false;
        Ok(())
    }

    /// Validate the chain and size the input buffer.
    ///
    /// Safe to call any number of times. Every output size must equal the
    /// next component's input size.
    pub fn connect(&mut self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::EmptyNetwork);
        }
        for node in &mut self.nodes {
            if let Node::Network(net) = node {
                net.connect()?;
            }
        }
        for (i, pair) in self.nodes.windows(2).enumerate() {
            let expected = pair[0].output_size();
            let got = pair[1].input_size();
            if expected != got {
                return Err(Error::ShapeMismatch {
                    at: i + 1,
                    expected,
                    got,
                });
            }
        }
        self.input.resize(self.nodes[0].input_size(), 0.0);
        self.connected = true;
        debug!(
            "connected {} {} ({} -> {}, {} parameters): {}",
            self.nodes.len(),
            self.mode.name(),
            self.input_size(),
            self.output_size(),
            self.parameter_count(),
            self.describe()
        );
        Ok(())
    }

    /// Components in chain order, sub-networks in brackets.
    pub fn describe(&self) -> String {
        self.nodes
            .iter()
            .map(Node::describe)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// True when this network and every sub-network below it are connected.
    pub fn is_connected(&self) -> bool {
        self.connected
            && self.nodes.iter().all(|node| match node {
                Node::Network(net) => net.is_connected(),
                Node::Layer(_) => true,
            })
    }

    // Edits through `network_mut` only dirty the sub-network, so check the whole tree.
    fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            self.connect()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn input_size(&self) -> usize {
        self.nodes.first().map_or(0, Node::input_size)
    }

    pub fn output_size(&self) -> usize {
        self.nodes.last().map_or(0, Node::output_size)
    }

    pub fn parameter_count(&self) -> usize {
        self.nodes.iter().map(Node::parameter_count).sum()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Layer at `index`, if that component is a layer.
    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        match self.nodes.get(index)? {
            Node::Layer(layer) => Some(layer.as_ref()),
            Node::Network(_) => None,
        }
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut dyn Layer> {
        match self.nodes.get_mut(index)? {
            Node::Layer(layer) => Some(layer.as_mut()),
            Node::Network(_) => None,
        }
    }

    /// Layer at `index` as its concrete type.
    pub fn layer_as<L: Layer>(&self, index: usize) -> Option<&L> {
        self.layer(index)?.as_any().downcast_ref::<L>()
    }

    pub fn network(&self, index: usize) -> Option<&Network> {
        match self.nodes.get(index)? {
            Node::Network(net) => Some(net),
            Node::Layer(_) => None,
        }
    }

    pub fn network_mut(&mut self, index: usize) -> Option<&mut Network> {
        match self.nodes.get_mut(index)? {
            Node::Network(net) => Some(net),
            Node::Layer(_) => None,
        }
    }

    /// Give up ownership of the components instead of dropping them.
    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Forward pass over the whole chain.
    pub fn exe(&mut self, input: &[f32]) -> Result<()> {
        self.ensure_connected()?;
        if input.len() != self.input.len() {
            return Err(Error::InputSize {
                expected: self.input.len(),
                got: input.len(),
            });
        }
        self.input.copy_from_slice(input);
        forward(&mut self.nodes, &self.input);
        Ok(())
    }

    /// Output of the tail after the last [`exe`](Network::exe).
    pub fn out(&self) -> &[f32] {
        self.nodes.last().map_or(&[][..], Node::output)
    }

    /// Error derivative with respect to the head's input after the last [`fit`](Network::fit).
    pub fn gradient(&self) -> &[f32] {
        self.nodes.first().map_or(&[][..], Node::gradient)
    }

    /// Error of the current output against `target`.
    pub fn err(&mut self, target: &[f32]) -> Result<f32> {
        self.ensure_connected()?;
        self.check_target(target)?;
        Ok(self.nodes.last().map_or(0.0, |tail| tail.error(target)))
    }

    /// Backward pass from the tail, accumulating parameter deltas.
    ///
    /// Must follow an [`exe`](Network::exe) on the sample `target` belongs to.
    pub fn fit(&mut self, target: &[f32]) -> Result<()> {
        self.ensure_connected()?;
        self.check_target(target)?;
        backward(&mut self.nodes, &self.input, Signal::Target(target));
        Ok(())
    }

    fn check_target(&self, target: &[f32]) -> Result<()> {
        let expected = self.output_size();
        if target.len() != expected {
            return Err(Error::TargetSize {
                expected,
                got: target.len(),
            });
        }
        Ok(())
    }

    /// Zero every unlocked layer's deltas.
    pub fn reset(&mut self) {
        self.nodes.iter_mut().for_each(Node::reset);
    }

    /// Apply one optimizer step to every unlocked layer.
    ///
    /// `iteration` is only reported in logs.
    pub fn apply(&mut self, rate: f32, iteration: u64) {
        trace!("apply rate={} iteration={}", rate, iteration);
        self.nodes.iter_mut().for_each(|node| node.apply(rate));
    }

    pub fn lock(&mut self) {
        self.nodes.iter_mut().for_each(|node| node.set_locked(true));
    }

    pub fn unlock(&mut self) {
        self.nodes.iter_mut().for_each(|node| node.set_locked(false));
    }

    /// True when every component is locked.
    pub fn is_locked(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(Node::is_locked)
    }

    /// Write every layer's parameters in chain order.
    pub fn store(&mut self, w: &mut dyn Write) -> Result<()> {
        self.ensure_connected()?;
        self.nodes.iter().try_for_each(|node| node.store(w))
    }

    /// Read parameters written by [`store`](Network::store) on an identically built network.
    pub fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        self.ensure_connected()?;
        self.nodes.iter_mut().try_for_each(|node| node.load(r))
    }

    pub fn store_to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.store(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        self.load(&mut reader)
    }

    /// Like [`store_to_file`](Network::store_to_file), preceded by `info`.
    pub fn store_with_info(&mut self, path: impl AsRef<Path>, info: &NetworkInfo) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        info.write_to(&mut writer)?;
        self.store(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_with_info(&mut self, path: impl AsRef<Path>) -> Result<NetworkInfo> {
        let mut reader = BufReader::new(File::open(path)?);
        let info = NetworkInfo::read_from(&mut reader)?;
        self.load(&mut reader)?;
        Ok(info)
    }

    /// Merge with an identically built master replica.
    ///
    /// Each layer pushes its deltas into the master's layer and takes the
    /// master's parameters. The caller must have exclusive access to both.
    pub fn exchange(&mut self, master: &mut Network) -> Result<()> {
        if self.nodes.len() != master.nodes.len() {
            return Err(Error::TopologyMismatch {
                expected: master.nodes.len(),
                got: self.nodes.len(),
            });
        }
        self.nodes
            .iter_mut()
            .zip(master.nodes.iter_mut())
            .try_for_each(|(mine, theirs)| mine.exchange(theirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{DenseLayer, Downscale2Layer, FilterLayer, Init, Max};
    use crate::optimizers::Sgd;
    use crate::utils::{Linear, Mse, Relu, SimpleRng};

    fn dense<const IN: usize, const OUT: usize>(w: f32, b: f32) -> DenseLayer<IN, OUT, Linear, Sgd, Mse> {
        match DenseLayer::from_parts(vec![w; IN * OUT], vec![b; OUT]) {
            Ok(layer) => layer,
            Err(e) => panic!("{}", e),
        }
    }

    #[test]
    fn test_attach_checks_mode() {
        let mut layers = Network::new(Composition::Layers);
        let mut networks = Network::new(Composition::Networks);

        assert!(matches!(
            layers.attach_network(Network::new(Composition::Layers)),
            Err(Error::WrongComposition { .. })
        ));
        assert!(matches!(
            networks.attach(dense::<1, 1>(1.0, 0.0)),
            Err(Error::WrongComposition { .. })
        ));
    }

    #[test]
    fn test_connect_rejects_empty_and_mismatched() {
        let mut net = Network::new(Composition::Layers);
        assert!(matches!(net.connect(), Err(Error::EmptyNetwork)));

        net.attach(dense::<2, 3>(1.0, 0.0)).unwrap();
        net.attach(dense::<4, 1>(1.0, 0.0)).unwrap();
        assert!(matches!(
            net.connect(),
            Err(Error::ShapeMismatch { at: 1, expected: 3, got: 4 })
        ));
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut net = Network::new(Composition::Layers);
        net.attach(dense::<2, 2>(1.0, 0.0)).unwrap();
        net.connect().unwrap();
        net.connect().unwrap();
        assert_eq!(net.input_size(), 2);
    }

    #[test]
    fn test_exe_chains_outputs() {
        let mut net = Network::new(Composition::Layers);
        net.attach(dense::<2, 2>(1.0, 1.0)).unwrap();
        net.attach(dense::<2, 1>(2.0, 0.0)).unwrap();

        net.exe(&[1.0, 2.0]).unwrap();
        // hidden = [4, 4], out = 2 * 8
        assert_eq!(net.out(), &[16.0]);
    }

    #[test]
    fn test_exe_and_fit_check_sizes() {
        let mut net = Network::new(Composition::Layers);
        net.attach(dense::<2, 1>(1.0, 0.0)).unwrap();
        assert!(matches!(
            net.exe(&[1.0]),
            Err(Error::InputSize { expected: 2, got: 1 })
        ));
        net.exe(&[1.0, 1.0]).unwrap();
        assert!(matches!(
            net.fit(&[1.0, 2.0]),
            Err(Error::TargetSize { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_fit_propagates_gradient_to_head() {
        let mut net = Network::new(Composition::Layers);
        net.attach(dense::<1, 1>(2.0, 0.0)).unwrap();
        net.attach(dense::<1, 1>(3.0, 0.0)).unwrap();

        net.exe(&[1.0]).unwrap();
        assert_eq!(net.out(), &[6.0]);
        net.fit(&[5.0]).unwrap();

        // Tail delta 1, head delta 3, head gradient 3 * 2
        assert_eq!(net.gradient(), &[6.0]);
        let head = net.layer_as::<DenseLayer<1, 1, Linear, Sgd, Mse>>(0).unwrap();
        assert_eq!(head.weights().deltas(), &[3.0]);
        let tail = net.layer_as::<DenseLayer<1, 1, Linear, Sgd, Mse>>(1).unwrap();
        assert_eq!(tail.weights().deltas(), &[2.0]);
    }

    #[test]
    fn test_sub_networks_chain() {
        let mut rng = SimpleRng::new(11);
        let mut front = Network::new(Composition::Layers);
        front.attach(dense::<4, 4>(0.5, 0.0)).unwrap();
        front.attach(FilterLayer::<4, Relu, Mse>::new()).unwrap();

        let mut back = Network::new(Composition::Layers);
        back.attach(Downscale2Layer::<2, 2, 1, Max, Mse>::new()).unwrap();
        back.attach(DenseLayer::<1, 1, Linear, Sgd, Mse>::new(Init::default(), &mut rng))
            .unwrap();

        let mut net = Network::new(Composition::Networks);
        net.attach_network(front).unwrap();
        net.attach_network(back).unwrap();
        net.connect().unwrap();

        assert_eq!(net.input_size(), 4);
        assert_eq!(net.output_size(), 1);

        net.exe(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        net.fit(&[0.0]).unwrap();
        assert_eq!(net.gradient().len(), 4);
        assert!(net.network(0).is_some());
        assert!(net.layer(0).is_none());
    }

    #[test]
    fn test_lock_recurses() {
        let mut inner = Network::new(Composition::Layers);
        inner.attach(dense::<1, 1>(1.0, 0.0)).unwrap();
        let mut net = Network::new(Composition::Networks);
        net.attach_network(inner).unwrap();

        net.lock();
        assert!(net.is_locked());
        net.unlock();
        assert!(!net.is_locked());
    }

    #[test]
    fn test_info_block_round_trip() {
        let info = NetworkInfo {
            epochs: 12,
            train_time_secs: 3,
            unique_samples: 4,
            err_min: 0.1,
            err_max: 0.4,
            err_avg: 0.2,
            ..NetworkInfo::default()
        };
        let mut buf = Vec::new();
        info.write_to(&mut buf).unwrap();
        let back = NetworkInfo::read_from(&mut std::io::Cursor::new(buf)).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.version.0, 0);
    }
}
