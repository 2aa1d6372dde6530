use hashbrown::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::plasticity::PlasticityState;
use crate::prng::Prng;

/// Position of a node inside its genome. Position doubles as the topological index.
pub type NodeIdx = usize;

pub type GenomeId = u64;

/// Type alias for connection weights.
pub type Weight = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeRole {
    Input,
    Hidden,
    Output,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Activation {
    Identity,
    #[default]
    Logistic,
    Tanh,
    Relu,
    Step,
    Softsign,
    Sinusoid,
    Gaussian,
}

impl Activation {
    pub const ALL: [Activation; 8] = [
        Activation::Identity,
        Activation::Logistic,
        Activation::Tanh,
        Activation::Relu,
        Activation::Step,
        Activation::Softsign,
        Activation::Sinusoid,
        Activation::Gaussian,
    ];

    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Logistic => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
            Activation::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Softsign => x / (1.0 + x.abs()),
            Activation::Sinusoid => x.sin(),
            Activation::Gaussian => (-x * x).exp(),
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    pub role: NodeRole,
    pub bias: f64,
    pub activation: Activation,

    // Last activation value; runtime only.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub state: f64,
}

impl Node {
    pub fn new(role: NodeRole, activation: Activation) -> Self {
        Self {
            role,
            bias: 0.0,
            activation,
            state: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Connection {
    pub from: NodeIdx,
    pub to: NodeIdx,
    pub weight: Weight,
    pub enabled: bool,
    pub gater: Option<NodeIdx>,

    /// Gradient-proxy accumulators left behind by the trainer. Only read as a
    /// saliency estimate by SNIP ranking.
    pub total_delta_weight: f64,
    pub previous_delta_weight: f64,
}

impl Connection {
    pub fn new(from: NodeIdx, to: NodeIdx, weight: Weight) -> Self {
        Self {
            from,
            to,
            weight,
            enabled: true,
            gater: None,
            total_delta_weight: 0.0,
            previous_delta_weight: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Lineage {
    pub parents: Vec<GenomeId>,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenomeError {
    #[error("node index {0} out of range")]
    NodeOutOfRange(NodeIdx),
    #[error("self-loop on node {0}")]
    SelfLoop(NodeIdx),
    #[error("duplicate edge {0} -> {1}")]
    DuplicateEdge(NodeIdx, NodeIdx),
    #[error("edge {from} -> {to} violates topological order")]
    BackEdge { from: NodeIdx, to: NodeIdx },
    #[error("node {0} is an input and cannot receive connections")]
    InputTarget(NodeIdx),
}

/// Structural mutation operators understood by [`Genome::mutate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MutationOp {
    AddConnection,
    SubConnection,
    AddNode,
    ModWeight,
    ModBias,
    ModActivation,
    ToggleConnection,
}

impl MutationOp {
    pub const ALL: [MutationOp; 7] = [
        MutationOp::AddConnection,
        MutationOp::SubConnection,
        MutationOp::AddNode,
        MutationOp::ModWeight,
        MutationOp::ModBias,
        MutationOp::ModActivation,
        MutationOp::ToggleConnection,
    ];
}

/// Cached evaluation plan: activation order plus, per node, the indices of its
/// enabled incoming connections. Dropped whenever topology changes.
#[derive(Debug, Clone, Default)]
struct ActivationPlan {
    order: Vec<NodeIdx>,
    incoming: Vec<Vec<usize>>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Genome {
    pub id: GenomeId,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    pub score: Option<f64>,
    pub species: Option<u32>,
    pub lineage: Lineage,

    /// When set, every enabled connection must satisfy `from < to`.
    pub enforce_acyclic: bool,

    pub plasticity: PlasticityState,

    #[cfg_attr(feature = "serde", serde(skip))]
    plan: Option<ActivationPlan>,
}

impl Genome {
    /// A genome with `inputs` input nodes followed by `outputs` output nodes and no connections.
    pub fn new(id: GenomeId, inputs: usize, outputs: usize) -> Self {
        let mut nodes = Vec::with_capacity(inputs + outputs);
        for _ in 0..inputs {
            nodes.push(Node::new(NodeRole::Input, Activation::Identity));
        }
        for _ in 0..outputs {
            nodes.push(Node::new(NodeRole::Output, Activation::Logistic));
        }
        Self {
            id,
            nodes,
            connections: Vec::new(),
            score: None,
            species: None,
            lineage: Lineage::default(),
            enforce_acyclic: true,
            plasticity: PlasticityState::default(),
            plan: None,
        }
    }

    /// Fully connect every input to every output with weights in `[-amplitude, amplitude)`.
    pub fn dense(id: GenomeId, inputs: usize, outputs: usize, amplitude: f64, rng: &mut Prng) -> Self {
        let mut g = Self::new(id, inputs, outputs);
        for i in 0..inputs {
            for o in 0..outputs {
                let w = rng.symmetric(amplitude);
                g.connections.push(Connection::new(i, inputs + o, w));
            }
        }
        g
    }

    pub fn input_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.role == NodeRole::Input).count()
    }

    pub fn output_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.role == NodeRole::Output).count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.connections.iter().filter(|c| c.enabled).count()
    }

    pub fn is_output(&self, idx: NodeIdx) -> bool {
        self.nodes.get(idx).is_some_and(|n| n.role == NodeRole::Output)
    }

    pub fn has_edge(&self, from: NodeIdx, to: NodeIdx) -> bool {
        self.connections.iter().any(|c| c.from == from && c.to == to)
    }

    /// Invalidate the cached activation plan.
    pub fn mark_dirty(&mut self) {
        self.plan = None;
    }

    pub fn is_dirty(&self) -> bool {
        self.plan.is_none()
    }

    /// Check whether `from -> to` would be an admissible new edge.
    pub fn check_edge(&self, from: NodeIdx, to: NodeIdx) -> Result<(), GenomeError> {
        let n = self.nodes.len();
        if from >= n {
            return Err(GenomeError::NodeOutOfRange(from));
        }
        if to >= n {
            return Err(GenomeError::NodeOutOfRange(to));
        }
        if from == to {
            return Err(GenomeError::SelfLoop(from));
        }
        if self.nodes[to].role == NodeRole::Input {
            return Err(GenomeError::InputTarget(to));
        }
        if self.enforce_acyclic && from > to {
            return Err(GenomeError::BackEdge { from, to });
        }
        if self.has_edge(from, to) {
            return Err(GenomeError::DuplicateEdge(from, to));
        }
        Ok(())
    }

    /// Add an enabled connection, returning its index.
    pub fn connect(&mut self, from: NodeIdx, to: NodeIdx, weight: Weight) -> Result<usize, GenomeError> {
        self.check_edge(from, to)?;
        self.connections.push(Connection::new(from, to, weight));
        self.mark_dirty();
        Ok(self.connections.len() - 1)
    }

    pub fn disconnect(&mut self, from: NodeIdx, to: NodeIdx) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| !(c.from == from && c.to == to));
        let removed = self.connections.len() != before;
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// Remove the connections at the given indices. `doomed` is sorted and deduplicated
    /// in place. Returns how many were removed.
    pub fn remove_connections(&mut self, doomed: &mut Vec<usize>) -> usize {
        doomed.sort_unstable();
        doomed.dedup();
        doomed.retain(|&i| i < self.connections.len());
        if doomed.is_empty() {
            return 0;
        }

        let mut cursor = 0;
        let mut idx = 0;
        self.connections.retain(|_| {
            let remove = cursor < doomed.len() && doomed[cursor] == idx;
            if remove {
                cursor += 1;
            }
            idx += 1;
            !remove
        });
        self.mark_dirty();
        doomed.len()
    }

    /// Insert a hidden node at `position` (clamped between the inputs and the outputs),
    /// shifting every reference at or after it.
    pub fn insert_hidden(&mut self, position: NodeIdx, activation: Activation) -> NodeIdx {
        let lo = self.input_count();
        let hi = self.nodes.len() - self.output_count();
        let pos = position.clamp(lo, hi.max(lo));

        self.nodes.insert(pos, Node::new(NodeRole::Hidden, activation));
        for c in &mut self.connections {
            if c.from >= pos {
                c.from += 1;
            }
            if c.to >= pos {
                c.to += 1;
            }
            if let Some(g) = c.gater.as_mut() {
                if *g >= pos {
                    *g += 1;
                }
            }
        }
        self.mark_dirty();
        pos
    }

    /// Deep copy with a fresh identity. Score and species are reset; lineage records the parent.
    pub fn clone_with_id(&self, id: GenomeId) -> Genome {
        let mut g = self.clone();
        g.id = id;
        g.score = None;
        g.species = None;
        g.lineage = Lineage {
            parents: vec![self.id],
            depth: self.lineage.depth.saturating_add(1),
        };
        g.mark_dirty();
        g
    }

    pub fn validate(&self) -> Result<(), GenomeError> {
        let n = self.nodes.len();
        let mut seen: HashSet<(NodeIdx, NodeIdx)> = HashSet::with_capacity(self.connections.len());
        for c in &self.connections {
            if c.from >= n {
                return Err(GenomeError::NodeOutOfRange(c.from));
            }
            if c.to >= n {
                return Err(GenomeError::NodeOutOfRange(c.to));
            }
            if let Some(g) = c.gater {
                if g >= n {
                    return Err(GenomeError::NodeOutOfRange(g));
                }
            }
            if !seen.insert((c.from, c.to)) {
                return Err(GenomeError::DuplicateEdge(c.from, c.to));
            }
            if self.enforce_acyclic && c.enabled {
                if c.from == c.to {
                    return Err(GenomeError::SelfLoop(c.from));
                }
                if c.from > c.to {
                    return Err(GenomeError::BackEdge {
                        from: c.from,
                        to: c.to,
                    });
                }
            }
        }
        Ok(())
    }

    fn build_plan(&self) -> ActivationPlan {
        let n = self.nodes.len();
        let mut incoming = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (ci, c) in self.connections.iter().enumerate() {
            if !c.enabled {
                continue;
            }
            incoming[c.to].push(ci);
            if c.from != c.to {
                indegree[c.to] += 1;
            }
        }

        // Kahn over forward structure; nodes left on cycles fall back to positional order.
        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; n];
        let mut ready: Vec<NodeIdx> = (0..n).rev().filter(|&i| indegree[i] == 0).collect();
        let mut outgoing = vec![Vec::new(); n];
        for c in self.connections.iter().filter(|c| c.enabled && c.from != c.to) {
            outgoing[c.from].push(c.to);
        }
        while let Some(i) = ready.pop() {
            placed[i] = true;
            order.push(i);
            for &t in &outgoing[i] {
                indegree[t] -= 1;
                if indegree[t] == 0 {
                    ready.push(t);
                }
            }
        }
        for (i, done) in placed.iter().enumerate() {
            if !done {
                order.push(i);
            }
        }

        ActivationPlan { order, incoming }
    }

    /// Forward pass. Recurrent edges read the source node's previous activation.
    pub fn activate(&mut self, input: &[f64]) -> Vec<f64> {
        let plan = match self.plan.take() {
            Some(p) => p,
            None => self.build_plan(),
        };

        let mut inputs = input.iter();
        for node in self.nodes.iter_mut().filter(|n| n.role == NodeRole::Input) {
            node.state = inputs.next().copied().unwrap_or(0.0);
        }

        for &i in &plan.order {
            if self.nodes[i].role == NodeRole::Input {
                continue;
            }
            let mut sum = self.nodes[i].bias;
            for &ci in &plan.incoming[i] {
                let c = &self.connections[ci];
                let gain = c.gater.map_or(1.0, |g| self.nodes[g].state);
                sum += c.weight * self.nodes[c.from].state * gain;
            }
            let out = self.nodes[i].activation.apply(sum);
            self.nodes[i].state = if out.is_finite() { out } else { 0.0 };
        }

        self.plan = Some(plan);
        self.nodes
            .iter()
            .filter(|n| n.role == NodeRole::Output)
            .map(|n| n.state)
            .collect()
    }

    /// Apply one mutation operator. Returns whether the genome changed.
    pub fn mutate(&mut self, op: MutationOp, amount: f64, rng: &mut Prng) -> bool {
        match op {
            MutationOp::AddConnection => {
                for _ in 0..16 {
                    let Some((a, b)) = rng.distinct_pair(self.nodes.len()) else {
                        return false;
                    };
                    let (from, to) = if self.enforce_acyclic { (a.min(b), a.max(b)) } else { (a, b) };
                    if self.connect(from, to, rng.symmetric(1.0)).is_ok() {
                        return true;
                    }
                }
                false
            }
            MutationOp::SubConnection => {
                if self.connections.len() <= 1 {
                    return false;
                }
                let idx = rng.gen_range_usize(0, self.connections.len());
                self.remove_connections(&mut vec![idx]) == 1
            }
            MutationOp::AddNode => {
                if self.connections.is_empty() {
                    return false;
                }
                let ci = rng.gen_range_usize(0, self.connections.len());
                let Connection { from, to, weight, .. } = self.connections[ci].clone();
                let hi = self.nodes.len() - self.output_count();
                let pos = to.min(hi);
                if self.enforce_acyclic && pos <= from {
                    return false;
                }
                let activation = Activation::ALL[rng.gen_range_usize(0, Activation::ALL.len())];
                let saved = (self.nodes.clone(), self.connections.clone());
                self.remove_connections(&mut vec![ci]);
                let new_idx = self.insert_hidden(pos, activation);
                let shift = |x: NodeIdx| if x >= new_idx { x + 1 } else { x };
                let (from, to) = (shift(from), shift(to));
                let split = self
                    .connect(from, new_idx, 1.0)
                    .and_then(|_| self.connect(new_idx, to, weight));
                if split.is_err() {
                    (self.nodes, self.connections) = saved;
                    self.mark_dirty();
                    return false;
                }
                true
            }
            MutationOp::ModWeight => {
                if self.connections.is_empty() {
                    return false;
                }
                let ci = rng.gen_range_usize(0, self.connections.len());
                self.connections[ci].weight += rng.symmetric(amount);
                true
            }
            MutationOp::ModBias => {
                let first = self.input_count();
                if first >= self.nodes.len() {
                    return false;
                }
                let ni = rng.gen_range_usize(first, self.nodes.len());
                self.nodes[ni].bias += rng.symmetric(amount);
                true
            }
            MutationOp::ModActivation => {
                let first = self.input_count();
                if first >= self.nodes.len() {
                    return false;
                }
                let ni = rng.gen_range_usize(first, self.nodes.len());
                self.nodes[ni].activation =
                    Activation::ALL[rng.gen_range_usize(0, Activation::ALL.len())];
                true
            }
            MutationOp::ToggleConnection => {
                if self.connections.is_empty() {
                    return false;
                }
                let ci = rng.gen_range_usize(0, self.connections.len());
                if self.connections[ci].enabled && self.enabled_count() <= 1 {
                    return false;
                }
                let c = &mut self.connections[ci];
                c.enabled = !c.enabled;
                self.mark_dirty();
                true
            }
        }
    }
}
