//! Neighbor sampling for GraphSAGE-style minibatch training.
//!
//! Builds a [`Flow`]: the layered subgraph needed to embed a set of target
//! nodes `depth` hops deep without touching the rest of the graph.
//!
//! # Key Types
//!
//! - [`sample_neighbors`] - Sample up to k neighbors of one node (single hop)
//! - [`NeighborSampler`] - Multi-hop sampler producing a [`Flow`]
//! - [`SamplerConfig`] - Fan-out and depth
//!
//! # Sampling Rule
//!
//! For every node `v` of layer `i`, `min(K, deg(v))` neighbors are drawn
//! uniformly without replacement from `v`'s *full* neighborhood in the graph.
//! Each layer resamples independently; nothing sampled at layer `i` restricts
//! what layer `i + 1` may draw. Layer `i + 1` is the deduplicated union of the
//! draws plus every layer-`i` node itself (self-loop), and block `i` records
//! the draws plus the self-loop for each node.
//!
//! ```text
//! block row for v  =  sample(N(v), K)  ∪  {v}        (at most K + 1 entries)
//! ```

use crate::flow::{Block, Flow};
use crate::graph::RatingGraph;
use crate::node::NodeId;
use crate::{Error, Result};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Fan-out and depth of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Maximum neighbors sampled per node per layer (K).
    pub fanout: usize,
    /// Number of aggregation layers (L).
    pub depth: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            fanout: 10,
            depth: 2,
        }
    }
}

impl SamplerConfig {
    pub fn new(fanout: usize, depth: usize) -> Self {
        Self { fanout, depth }
    }
}

/// Sample up to `k` distinct neighbors of `node`, uniformly without replacement.
///
/// Returns every neighbor when the degree is at most `k`.
///
/// # Complexity
/// O(deg(node))
pub fn sample_neighbors<R: Rng + ?Sized>(
    graph: &RatingGraph,
    node: NodeId,
    k: usize,
    rng: &mut R,
) -> Result<Vec<NodeId>> {
    let all_neighbors = graph.neighbors(node)?;
    if all_neighbors.len() <= k {
        Ok(all_neighbors)
    } else {
        Ok(all_neighbors.choose_multiple(rng, k).copied().collect())
    }
}

/// Multi-hop neighbor sampler.
///
/// The random source is injected at construction, so a fixed seed gives a
/// reproducible flow.
///
/// # Example
///
/// ```rust
/// use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
/// use sagerec_core::{ItemAttrs, RatingGraph, UserAttrs};
///
/// let mut graph = RatingGraph::new();
/// let attrs = UserAttrs { age: 0, gender: 0, occupation: 0, zip: 0 };
/// let u = graph.add_user(attrs).unwrap();
/// let m1 = graph.add_item(ItemAttrs { year: 0, genres: vec![1.0] }).unwrap();
/// let m2 = graph.add_item(ItemAttrs { year: 1, genres: vec![0.0] }).unwrap();
/// graph.add_interaction(u, m1, 5.0, 0, false).unwrap();
/// graph.add_interaction(u, m2, 3.0, 0, false).unwrap();
///
/// let mut sampler = NeighborSampler::seeded(&graph, SamplerConfig::new(2, 1), 42);
/// let flow = sampler.build_flow(&[u]).unwrap();
///
/// let mut fed_by = flow.in_neighbors(0, u).unwrap();
/// fed_by.sort();
/// assert_eq!(fed_by, vec![u, m1, m2]);
/// ```
pub struct NeighborSampler<'g, R = XorShiftRng> {
    graph: &'g RatingGraph,
    config: SamplerConfig,
    rng: R,
}

impl<'g> NeighborSampler<'g, XorShiftRng> {
    /// Create a sampler with an `XorShiftRng` seeded from `seed`.
    pub fn seeded(graph: &'g RatingGraph, config: SamplerConfig, seed: u64) -> Self {
        Self::new(graph, config, XorShiftRng::seed_from_u64(seed))
    }
}

impl<'g, R: Rng> NeighborSampler<'g, R> {
    /// Create a sampler drawing from `rng`.
    pub fn new(graph: &'g RatingGraph, config: SamplerConfig, rng: R) -> Self {
        Self { graph, config, rng }
    }

    pub fn config(&self) -> SamplerConfig {
        self.config
    }

    pub fn graph(&self) -> &'g RatingGraph {
        self.graph
    }

    /// Build a flow for `seeds`, sampling sequentially from the injected source.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `seeds` is empty or names a node outside
    /// the graph.
    pub fn build_flow(&mut self, seeds: &[NodeId]) -> Result<Flow> {
        let targets = self.targets(seeds)?;
        let graph = self.graph;
        let k = self.config.fanout;

        let mut layers = vec![targets];
        let mut blocks = Vec::with_capacity(self.config.depth);

        for _ in 0..self.config.depth {
            let current = layers.last().map_or(&[][..], Vec::as_slice);
            let sampled = current
                .iter()
                .map(|&v| sample_neighbors(graph, v, k, &mut self.rng))
                .collect::<Result<Vec<_>>>()?;
            let (next, block) = assemble_layer(current, &sampled);
            layers.push(next);
            blocks.push(block);
        }

        tracing::trace!(
            seeds = seeds.len(),
            nodes = layers.iter().map(Vec::len).sum::<usize>(),
            "sampled flow"
        );
        Ok(Flow::assemble(layers, blocks))
    }

    /// Build a flow for `seeds`, sampling the nodes of each layer in parallel.
    ///
    /// One base seed per layer is drawn from the injected source; each node
    /// then samples with its own `XorShiftRng` derived from that base seed and
    /// its id. The flow therefore does not depend on how rayon schedules the
    /// work, and is reproducible for a fixed source. It satisfies the same
    /// invariants as [`Self::build_flow`] but is not draw-for-draw identical
    /// to it.
    pub fn build_flow_par(&mut self, seeds: &[NodeId]) -> Result<Flow> {
        let targets = self.targets(seeds)?;
        let graph = self.graph;
        let k = self.config.fanout;

        let mut layers = vec![targets];
        let mut blocks = Vec::with_capacity(self.config.depth);

        for _ in 0..self.config.depth {
            let base: u64 = self.rng.random();
            let current = layers.last().map_or(&[][..], Vec::as_slice);
            let sampled = current
                .par_iter()
                .map(|&v| {
                    let mut rng = XorShiftRng::seed_from_u64(node_seed(base, v));
                    sample_neighbors(graph, v, k, &mut rng)
                })
                .collect::<Result<Vec<_>>>()?;
            let (next, block) = assemble_layer(current, &sampled);
            layers.push(next);
            blocks.push(block);
        }

        Ok(Flow::assemble(layers, blocks))
    }

    /// Deduplicate seeds (first occurrence wins) and check they exist.
    fn targets(&self, seeds: &[NodeId]) -> Result<Vec<NodeId>> {
        if seeds.is_empty() {
            return Err(Error::InvalidArgument("seed set is empty".into()));
        }
        let mut seen = HashSet::with_capacity(seeds.len());
        let mut targets = Vec::with_capacity(seeds.len());
        for &node in seeds {
            if node >= self.graph.num_nodes() {
                return Err(Error::InvalidArgument(format!(
                    "seed node {node} out of range (graph has {} nodes)",
                    self.graph.num_nodes()
                )));
            }
            if seen.insert(node) {
                targets.push(node);
            }
        }
        Ok(targets)
    }
}

/// Per-node seed: splitmix64 finalizer over the layer base seed and node id.
fn node_seed(base: u64, node: NodeId) -> u64 {
    let mut z = base ^ (node as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Union the draws (plus self-loops) into the next layer and record the block.
///
/// Next-layer order follows `current`, each node's draws before the node itself.
fn assemble_layer(current: &[NodeId], sampled: &[Vec<NodeId>]) -> (Vec<NodeId>, Block) {
    let mut next = Vec::new();
    let mut next_pos: HashMap<NodeId, usize> = HashMap::new();
    let mut rows = Vec::with_capacity(current.len());

    for (&v, draws) in current.iter().zip(sampled) {
        let mut row = Vec::with_capacity(draws.len() + 1);
        for &u in draws.iter().chain(std::iter::once(&v)) {
            let pos = *next_pos.entry(u).or_insert_with(|| {
                next.push(u);
                next.len() - 1
            });
            row.push(pos);
        }
        rows.push(row);
    }

    (next, Block::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ItemAttrs, UserAttrs};

    fn user() -> UserAttrs {
        UserAttrs {
            age: 0,
            gender: 0,
            occupation: 0,
            zip: 0,
        }
    }

    fn item() -> ItemAttrs {
        ItemAttrs {
            year: 0,
            genres: vec![0.0, 1.0],
        }
    }

    /// 3 users, 4 items; u0 rated every item, u1 rated two, u2 rated nothing.
    fn graph() -> RatingGraph {
        let mut g = RatingGraph::new();
        for _ in 0..3 {
            g.add_user(user()).unwrap();
        }
        for _ in 0..4 {
            g.add_item(item()).unwrap();
        }
        for m in 3..7 {
            g.add_interaction(0, m, 4.0, 0, false).unwrap();
        }
        g.add_interaction(1, 3, 2.0, 0, false).unwrap();
        g.add_interaction(1, 4, 5.0, 0, false).unwrap();
        g
    }

    #[test]
    fn test_sample_neighbors_caps_at_k() {
        let g = graph();
        let mut rng = XorShiftRng::seed_from_u64(7);
        let sampled = sample_neighbors(&g, 0, 2, &mut rng).unwrap();
        assert_eq!(sampled.len(), 2);
        assert_ne!(sampled[0], sampled[1]);
        for s in sampled {
            assert!((3..7).contains(&s));
        }
    }

    #[test]
    fn test_sample_neighbors_all_when_degree_small() {
        let g = graph();
        let mut rng = XorShiftRng::seed_from_u64(7);
        assert_eq!(sample_neighbors(&g, 1, 10, &mut rng).unwrap(), vec![3, 4]);
        assert!(sample_neighbors(&g, 2, 10, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn test_seeds_deduplicated_in_order() {
        let g = graph();
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(2, 1), 1);
        let flow = sampler.build_flow(&[4, 0, 4, 0]).unwrap();
        assert_eq!(flow.seeds(), &[4, 0]);
    }

    #[test]
    fn test_invalid_seeds() {
        let g = graph();
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(2, 1), 1);
        assert!(matches!(sampler.build_flow(&[]), Err(Error::InvalidArgument(_))));
        assert!(matches!(sampler.build_flow(&[0, 99]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            sampler.build_flow_par(&[99]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_block_rows_hold_draws_and_self() {
        let g = graph();
        let k = 2;
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(k, 2), 42);
        let flow = sampler.build_flow(&[0, 1, 2]).unwrap();
        flow.validate().unwrap();

        for i in 0..flow.depth() {
            for &v in flow.layer(i) {
                let fed_by = flow.in_neighbors(i, v).unwrap();
                assert!(fed_by.len() <= k + 1);
                assert_eq!(fed_by.last(), Some(&v));
                let truth = g.neighbors(v).unwrap();
                for u in &fed_by[..fed_by.len() - 1] {
                    assert!(truth.contains(u));
                }
                assert_eq!(fed_by.len() - 1, truth.len().min(k));
            }
        }
    }

    #[test]
    fn test_isolated_node_only_feeds_itself() {
        let g = graph();
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(3, 2), 3);
        let flow = sampler.build_flow(&[2]).unwrap();
        assert_eq!(flow.layers(), &[vec![2], vec![2], vec![2]]);
        assert_eq!(flow.in_neighbors(1, 2), Some(vec![2]));
    }

    #[test]
    fn test_zero_fanout_gives_self_loops_only() {
        let g = graph();
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(0, 2), 3);
        let flow = sampler.build_flow(&[0, 3]).unwrap();
        assert_eq!(flow.layer(2), &[0, 3]);
    }

    #[test]
    fn test_depth_zero() {
        let g = graph();
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(3, 0), 3);
        let flow = sampler.build_flow(&[0]).unwrap();
        assert_eq!(flow.depth(), 0);
        assert_eq!(flow.base(), &[0]);
    }

    #[test]
    fn test_reproducible_with_fixed_seed() {
        let g = graph();
        let a = NeighborSampler::seeded(&g, SamplerConfig::new(2, 2), 99)
            .build_flow(&[0, 1])
            .unwrap();
        let b = NeighborSampler::seeded(&g, SamplerConfig::new(2, 2), 99)
            .build_flow(&[0, 1])
            .unwrap();
        assert_eq!(a, b);

        let c = NeighborSampler::seeded(&g, SamplerConfig::new(2, 2), 99)
            .build_flow_par(&[0, 1])
            .unwrap();
        let d = NeighborSampler::seeded(&g, SamplerConfig::new(2, 2), 99)
            .build_flow_par(&[0, 1])
            .unwrap();
        assert_eq!(c, d);
        c.validate().unwrap();
    }

    #[test]
    fn test_layers_resample_from_full_graph() {
        // u1 is not adjacent to the target; it can only appear at layer 2,
        // drawn from m3's or m4's full neighborhood.
        let g = graph();
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(10, 2), 5);
        let flow = sampler.build_flow(&[0]).unwrap();
        assert!(flow.layer(2).contains(&1));
    }
}
