//! Layered computation structure produced by neighbor sampling.
//!
//! A [`Flow`] holds `depth + 1` node layers. Layer 0 holds the target (seed)
//! nodes and layer `depth` the most distant sampled nodes. Block `i` connects
//! layer `i` to layer `i + 1`: for every node of layer `i` it lists the
//! positions in layer `i + 1` of the nodes whose embeddings feed into it.
//!
//! ```text
//! layer 0:  [u1]                 <- targets
//!              \ block 0: u1 <- {m1, m2, u1}
//! layer 1:  [m1, m2, u1]
//!              \ block 1: m1 <- {u1, u2, m1}, ...
//! layer 2:  [...]
//! ```
//!
//! Every layer-`i` node must also be present in layer `i + 1`, so its own
//! previous embedding is available when it is updated.

use crate::node::NodeId;
use crate::{Error, Result};
use std::collections::HashMap;

/// Edges between two consecutive layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    /// `rows[dst]` = positions in the deeper layer feeding layer position `dst`.
    rows: Vec<Vec<usize>>,
}

impl Block {
    /// Create a block from per-destination rows of source positions.
    pub fn new(rows: Vec<Vec<usize>>) -> Self {
        Self { rows }
    }

    /// Source positions feeding destination position `dst`.
    pub fn row(&self, dst: usize) -> &[usize] {
        self.rows.get(dst).map_or(&[][..], Vec::as_slice)
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.rows
    }

    /// Number of destination nodes.
    pub fn num_dst(&self) -> usize {
        self.rows.len()
    }

    /// Total number of edges in the block.
    pub fn num_edges(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Message-carrying edges, leaving out each destination's own entry.
    ///
    /// `self_pos[dst]` is the position of destination `dst` in the deeper
    /// layer. Its degree counts only the remaining entries, so a node whose
    /// row holds nothing but itself has degree 0.
    pub fn message_edges(&self, self_pos: &[usize]) -> MessageEdges {
        let mut edges = MessageEdges {
            dst: Vec::with_capacity(self.num_edges()),
            src: Vec::with_capacity(self.num_edges()),
            degrees: vec![0; self.rows.len()],
        };
        for (d, row) in self.rows.iter().enumerate() {
            let own = self_pos.get(d).copied();
            for &s in row.iter().filter(|&&s| Some(s) != own) {
                edges.dst.push(d as u32);
                edges.src.push(s as u32);
                edges.degrees[d] += 1;
            }
        }
        edges
    }
}

/// Edge list of a block as parallel `(dst, src)` position vectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEdges {
    pub dst: Vec<u32>,
    pub src: Vec<u32>,
    /// Number of edges ending at each destination.
    pub degrees: Vec<usize>,
}

impl MessageEdges {
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub fn len(&self) -> usize {
        self.src.len()
    }
}

/// Sampled layered subgraph sufficient to embed a set of target nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    layers: Vec<Vec<NodeId>>,
    positions: Vec<HashMap<NodeId, usize>>,
    blocks: Vec<Block>,
}

impl Flow {
    /// Build a flow from explicit layers and blocks, validating it.
    ///
    /// Use this when a flow crosses a component boundary; flows produced by
    /// [`crate::algo::sampling::NeighborSampler`] are already well formed.
    pub fn from_parts(layers: Vec<Vec<NodeId>>, blocks: Vec<Block>) -> Result<Self> {
        let flow = Self::assemble(layers, blocks);
        flow.validate()?;
        Ok(flow)
    }

    pub(crate) fn assemble(layers: Vec<Vec<NodeId>>, blocks: Vec<Block>) -> Self {
        let positions = layers
            .iter()
            .map(|layer| layer.iter().enumerate().map(|(p, &n)| (n, p)).collect())
            .collect();
        Self {
            layers,
            positions,
            blocks,
        }
    }

    /// Check structural consistency between layers and blocks.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedFlow`] if the flow has no layers, the block count is
    /// not `layers - 1`, a layer repeats a node, a block row count differs
    /// from its layer size, a row references a position outside the deeper
    /// layer, or a node is missing from the next deeper layer.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::MalformedFlow("flow has no layers".into()));
        }
        if self.blocks.len() + 1 != self.layers.len() {
            return Err(Error::MalformedFlow(format!(
                "{} layers need {} blocks, found {}",
                self.layers.len(),
                self.layers.len() - 1,
                self.blocks.len()
            )));
        }
        for (i, (layer, positions)) in self.layers.iter().zip(&self.positions).enumerate() {
            if positions.len() != layer.len() {
                return Err(Error::MalformedFlow(format!(
                    "layer {i} contains duplicate nodes"
                )));
            }
        }
        for (i, block) in self.blocks.iter().enumerate() {
            let dst_layer = &self.layers[i];
            let src_len = self.layers[i + 1].len();
            if block.num_dst() != dst_layer.len() {
                return Err(Error::MalformedFlow(format!(
                    "block {i} has {} rows but layer {i} has {} nodes",
                    block.num_dst(),
                    dst_layer.len()
                )));
            }
            for (dst, row) in block.rows().iter().enumerate() {
                if let Some(&bad) = row.iter().find(|&&s| s >= src_len) {
                    return Err(Error::MalformedFlow(format!(
                        "block {i} row {dst} references position {bad}, layer {} has {src_len} nodes",
                        i + 1
                    )));
                }
            }
            if let Some(missing) = dst_layer
                .iter()
                .find(|&&n| !self.positions[i + 1].contains_key(&n))
            {
                return Err(Error::MalformedFlow(format!(
                    "node {missing} of layer {i} is absent from layer {}",
                    i + 1
                )));
            }
        }
        Ok(())
    }

    /// Number of aggregation layers (blocks).
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Number of node layers (`depth + 1`).
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Nodes of layer `i`.
    pub fn layer(&self, i: usize) -> &[NodeId] {
        self.layers.get(i).map_or(&[][..], Vec::as_slice)
    }

    pub fn layers(&self) -> &[Vec<NodeId>] {
        &self.layers
    }

    /// Block between layer `i` and layer `i + 1`.
    pub fn block(&self, i: usize) -> Option<&Block> {
        self.blocks.get(i)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Target nodes (layer 0).
    pub fn seeds(&self) -> &[NodeId] {
        self.layer(0)
    }

    /// Deepest layer, where initial embeddings are assigned.
    pub fn base(&self) -> &[NodeId] {
        self.layer(self.depth())
    }

    /// Position of `node` within layer `i`.
    pub fn position(&self, i: usize, node: NodeId) -> Option<usize> {
        self.positions.get(i)?.get(&node).copied()
    }

    /// Position in layer `i + 1` of every node of layer `i`, in layer order.
    ///
    /// `None` if either layer is missing or a node is not carried deeper.
    pub fn self_positions(&self, i: usize) -> Option<Vec<usize>> {
        let deeper = self.positions.get(i + 1)?;
        self.layers
            .get(i)?
            .iter()
            .map(|n| deeper.get(n).copied())
            .collect()
    }

    /// Node ids feeding `node` of layer `i`, taken from layer `i + 1`.
    pub fn in_neighbors(&self, i: usize, node: NodeId) -> Option<Vec<NodeId>> {
        let dst = self.position(i, node)?;
        let src_layer = self.layers.get(i + 1)?;
        let row = self.blocks.get(i)?.row(dst);
        Some(row.iter().map(|&s| src_layer[s]).collect())
    }

    /// Total nodes over all layers, counting repeats.
    pub fn total_nodes(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }
}
