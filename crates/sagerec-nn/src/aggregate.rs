//! Layered GraphSAGE aggregation over a sampled [`Flow`].
//!
//! Embeddings are computed from the deepest layer towards the targets:
//!
//! ```text
//! h_L[v]  = initial(v)
//! h_i[v]  = norm(update_i,type(v)(CONCAT(h_{i+1}[v], sum(h_{i+1}[nbr(v)]) / max(|nbr(v)|, eps))))
//! ```
//!
//! where `nbr(v)` is v's block row without v's own entry and
//! `norm(x) = x / max(||x||, eps)`. A node with no sampled neighbors gets a
//! zero message. The sum over all rows of a block is one
//! `index_add` per layer, so a whole layer is updated with a handful of
//! batched tensor ops and gradients flow back to every parameter used.

use crate::conv::l2_normalize;
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use sagerec_core::{Flow, NodeId, NodeType, RatingGraph};
use std::collections::HashMap;

/// Assigns every node of the deepest flow layer its starting vector.
pub trait InitialEmbedding {
    /// Width of the produced vectors.
    fn dim(&self) -> usize;

    /// One row per entry of `nodes`, in the same order.
    fn initial(&self, graph: &RatingGraph, nodes: &[NodeId]) -> Result<Tensor>;
}

/// Per-layer, per-node-type update applied before normalization.
pub trait TypedUpdate {
    /// Number of layers this update has parameters for.
    fn depth(&self) -> usize;

    /// Map `CONCAT(self, mean)` rows of nodes of `node_type` at flow layer
    /// `layer` to their new (unnormalized) embeddings.
    fn update(&self, layer: usize, node_type: NodeType, input: &Tensor) -> Result<Tensor>;
}

/// Embeddings of a flow's target nodes.
#[derive(Debug, Clone)]
pub struct NodeEmbeddings {
    nodes: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    tensor: Tensor,
}

impl NodeEmbeddings {
    /// Pair `nodes` with the rows of `tensor`.
    pub fn new(nodes: Vec<NodeId>, tensor: Tensor) -> Result<Self> {
        let rows = tensor.dim(0)?;
        if rows != nodes.len() {
            return Err(Error::DimensionMismatch {
                expected: nodes.len(),
                got: rows,
            });
        }
        let index = nodes.iter().enumerate().map(|(p, &n)| (n, p)).collect();
        Ok(Self {
            nodes,
            index,
            tensor,
        })
    }

    /// Node ids, in row order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// `(nodes, dim)` embedding matrix.
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Row of `node`, if it is one of the embedded nodes.
    pub fn row(&self, node: NodeId) -> Option<usize> {
        self.index.get(&node).copied()
    }

    /// Embedding of a single node.
    pub fn get(&self, node: NodeId) -> Result<Option<Vec<f32>>> {
        match self.row(node) {
            Some(row) => Ok(Some(self.tensor.get(row)?.to_vec1::<f32>()?)),
            None => Ok(None),
        }
    }

    /// Gather rows for `nodes` into a `(nodes.len(), dim)` tensor.
    pub fn rows(&self, nodes: &[NodeId]) -> Result<Tensor> {
        let idx = nodes
            .iter()
            .map(|&n| {
                self.row(n).map(|r| r as u32).ok_or_else(|| {
                    sagerec_core::Error::InvalidArgument(format!("node {n} has no embedding"))
                })
            })
            .collect::<std::result::Result<Vec<u32>, _>>()?;
        let idx = Tensor::from_vec(idx, nodes.len(), self.tensor.device())?;
        Ok(self.tensor.index_select(&idx, 0)?)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Runs the layer-by-layer aggregation of a flow.
#[derive(Debug, Clone, Copy)]
pub struct LayeredAggregator {
    epsilon: f64,
}

impl Default for LayeredAggregator {
    fn default() -> Self {
        Self { epsilon: 1e-6 }
    }
}

impl LayeredAggregator {
    /// `epsilon` floors both the degree divisor and the norm divisor.
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Compute embeddings for the targets (layer 0) of `flow`.
    ///
    /// # Errors
    ///
    /// - [`sagerec_core::Error::MalformedFlow`] if the flow fails validation.
    /// - [`Error::DimensionMismatch`] if `update` has parameters for a
    ///   different number of layers than the flow has, or `initial` returns
    ///   the wrong number of rows.
    pub fn compute_embeddings<I, U>(
        &self,
        flow: &Flow,
        graph: &RatingGraph,
        initial: &I,
        update: &U,
    ) -> Result<NodeEmbeddings>
    where
        I: InitialEmbedding + ?Sized,
        U: TypedUpdate + ?Sized,
    {
        flow.validate()?;
        if update.depth() != flow.depth() {
            return Err(Error::DimensionMismatch {
                expected: update.depth(),
                got: flow.depth(),
            });
        }

        let base = flow.base();
        let mut h = initial.initial(graph, base)?;
        let rows = h.dim(0)?;
        if rows != base.len() {
            return Err(Error::DimensionMismatch {
                expected: base.len(),
                got: rows,
            });
        }

        for i in (0..flow.depth()).rev() {
            h = self.step(flow, graph, i, &h, update)?;
            tracing::trace!(layer = i, nodes = flow.layer(i).len(), "aggregated layer");
        }

        NodeEmbeddings::new(flow.seeds().to_vec(), h)
    }

    /// Update layer `i` from the embeddings `h` of layer `i + 1`.
    fn step<U: TypedUpdate + ?Sized>(
        &self,
        flow: &Flow,
        graph: &RatingGraph,
        i: usize,
        h: &Tensor,
        update: &U,
    ) -> Result<Tensor> {
        let block = flow
            .block(i)
            .ok_or_else(|| sagerec_core::Error::MalformedFlow(format!("missing block {i}")))?;
        let dst_layer = flow.layer(i);
        let n_dst = dst_layer.len();
        let dim = h.dim(1)?;
        let device = h.device();
        let dtype = h.dtype();

        let self_pos = flow.self_positions(i).ok_or_else(|| {
            sagerec_core::Error::MalformedFlow(format!(
                "layer {i} is not fully carried into layer {}",
                i + 1
            ))
        })?;
        let edges = block.message_edges(&self_pos);

        let summed = if edges.is_empty() {
            Tensor::zeros((n_dst, dim), dtype, device)?
        } else {
            let n_edges = edges.len();
            let dst_idx = Tensor::from_vec(edges.dst, n_edges, device)?;
            let src_idx = Tensor::from_vec(edges.src, n_edges, device)?;
            let messages = h.index_select(&src_idx, 0)?;
            Tensor::zeros((n_dst, dim), dtype, device)?
                .index_add(&dst_idx, &messages, 0)?
        };

        let degrees: Vec<f32> = edges
            .degrees
            .into_iter()
            .map(|d| (d as f32).max(self.epsilon as f32))
            .collect();
        let degrees = Tensor::from_vec(degrees, (n_dst, 1), device)?.to_dtype(dtype)?;
        let mean = summed.broadcast_div(&degrees)?;

        let self_pos: Vec<u32> = self_pos.into_iter().map(|p| p as u32).collect();
        let h_self = h.index_select(&Tensor::from_vec(self_pos, n_dst, device)?, 0)?;
        let input = Tensor::cat(&[&h_self, &mean], 1)?;

        let types = dst_layer
            .iter()
            .map(|&v| graph.node_type(v))
            .collect::<sagerec_core::Result<Vec<_>>>()?;
        let mut parts = Vec::with_capacity(NodeType::ALL.len());
        for node_type in NodeType::ALL {
            let positions: Vec<usize> = (0..n_dst).filter(|&p| types[p] == node_type).collect();
            if positions.is_empty() {
                continue;
            }
            let idx: Vec<u32> = positions.iter().map(|&p| p as u32).collect();
            let rows = input.index_select(&Tensor::from_vec(idx, positions.len(), device)?, 0)?;
            parts.push((positions, update.update(i, node_type, &rows)?));
        }

        let out_dim = match parts.first() {
            Some((_, t)) => t.dim(1)?,
            None => dim,
        };
        let h_new = merge_rows(parts, n_dst, out_dim, dtype, device)?;
        Ok(l2_normalize(&h_new, self.epsilon)?)
    }
}

/// Reassemble row groups into one `(n, dim)` tensor.
///
/// Each part is `(positions, rows)`: row `j` of `rows` belongs at
/// `positions[j]`. The positions of all parts together must cover `0..n`
/// exactly once.
pub(crate) fn merge_rows(
    parts: Vec<(Vec<usize>, Tensor)>,
    n: usize,
    dim: usize,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    if n == 0 || parts.is_empty() {
        return Ok(Tensor::zeros((n, dim), dtype, device)?);
    }
    let mut inverse = vec![0u32; n];
    let mut offset = 0usize;
    let mut tensors = Vec::with_capacity(parts.len());
    for (positions, rows) in parts {
        for (j, &p) in positions.iter().enumerate() {
            inverse[p] = (offset + j) as u32;
        }
        offset += positions.len();
        tensors.push(rows);
    }
    if offset != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            got: offset,
        });
    }
    let stacked = Tensor::cat(&tensors, 0)?;
    Ok(stacked.index_select(&Tensor::from_vec(inverse, n, device)?, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
    use sagerec_core::flow::Block;
    use sagerec_core::{ItemAttrs, UserAttrs};
    use std::cell::RefCell;

    /// Initial embedding that is just the node id (plus one) repeated.
    struct IdEmbedding {
        dim: usize,
    }

    impl InitialEmbedding for IdEmbedding {
        fn dim(&self) -> usize {
            self.dim
        }

        fn initial(&self, _graph: &RatingGraph, nodes: &[NodeId]) -> Result<Tensor> {
            let flat: Vec<f32> = nodes
                .iter()
                .flat_map(|&n| std::iter::repeat(n as f32 + 1.0).take(self.dim))
                .collect();
            Ok(Tensor::from_vec(flat, (nodes.len(), self.dim), &Device::Cpu)?)
        }
    }

    /// Update that returns the mean half of its input, recording each call.
    struct MeanHalf {
        depth: usize,
        calls: RefCell<Vec<(usize, NodeType, usize)>>,
        inputs: RefCell<Vec<Vec<Vec<f32>>>>,
    }

    impl TypedUpdate for MeanHalf {
        fn depth(&self) -> usize {
            self.depth
        }

        fn update(&self, layer: usize, node_type: NodeType, input: &Tensor) -> Result<Tensor> {
            let (rows, width) = input.dims2()?;
            self.calls.borrow_mut().push((layer, node_type, rows));
            self.inputs.borrow_mut().push(input.to_vec2::<f32>()?);
            Ok(input.narrow(1, width / 2, width / 2)?)
        }
    }

    fn graph() -> RatingGraph {
        // users 0, 1, 2; items 3, 4
        let mut g = RatingGraph::new();
        for _ in 0..3 {
            g.add_user(UserAttrs {
                age: 0,
                gender: 0,
                occupation: 0,
                zip: 0,
            })
            .unwrap();
        }
        for _ in 0..2 {
            g.add_item(ItemAttrs {
                year: 0,
                genres: vec![1.0],
            })
            .unwrap();
        }
        g.add_interaction(0, 3, 5.0, 0, false).unwrap();
        g.add_interaction(0, 4, 3.0, 0, false).unwrap();
        g.add_interaction(1, 3, 4.0, 0, false).unwrap();
        g
    }

    fn mean_half(depth: usize) -> MeanHalf {
        MeanHalf {
            depth,
            calls: RefCell::new(Vec::new()),
            inputs: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_mean_leaves_out_own_entry() {
        let g = graph();
        // user 0 <- {3, 4, 0}; initial rows are 4, 5, 1 in every coordinate
        let flow = Flow::from_parts(
            vec![vec![0], vec![3, 4, 0]],
            vec![Block::new(vec![vec![0, 1, 2]])],
        )
        .unwrap();
        let update = mean_half(1);
        let out = LayeredAggregator::default()
            .compute_embeddings(&flow, &g, &IdEmbedding { dim: 2 }, &update)
            .unwrap();

        // self half is h(0) = 1, mean half is (4 + 5) / 2
        assert_eq!(update.inputs.borrow()[0], vec![vec![1.0, 1.0, 4.5, 4.5]]);
        assert_eq!(update.calls.borrow().as_slice(), &[(0, NodeType::User, 1)]);

        assert_eq!(out.nodes(), &[0]);
        for x in out.get(0).unwrap().unwrap() {
            assert!((x - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        }
    }

    #[test]
    fn test_outputs_unit_norm_and_seed_order() {
        let g = graph();
        let flow = Flow::from_parts(
            vec![vec![3, 1], vec![0, 1, 3], vec![3, 4, 0, 1]],
            vec![
                Block::new(vec![vec![0, 1, 2], vec![2, 1]]),
                Block::new(vec![vec![0, 1, 2], vec![0, 3], vec![2, 3, 0]]),
            ],
        )
        .unwrap();
        let update = mean_half(2);
        let out = LayeredAggregator::default()
            .compute_embeddings(&flow, &g, &IdEmbedding { dim: 3 }, &update)
            .unwrap();

        assert_eq!(out.nodes(), &[3, 1]);
        let rows = out.tensor().to_vec2::<f32>().unwrap();
        for row in rows {
            let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }

        // deeper layer first, both types dispatched separately
        let calls = update.calls.borrow();
        assert_eq!(calls[0], (1, NodeType::User, 2));
        assert_eq!(calls[1], (1, NodeType::Item, 1));
        assert_eq!(calls[2], (0, NodeType::User, 1));
        assert_eq!(calls[3], (0, NodeType::Item, 1));
    }

    #[test]
    fn test_isolated_node_gets_zero_message() {
        let g = graph();
        // user 2 has no ratings, so its sampled row holds only itself
        let mut sampler = NeighborSampler::seeded(&g, SamplerConfig::new(2, 1), 1);
        let flow = sampler.build_flow(&[2, 0]).unwrap();
        assert_eq!(flow.in_neighbors(0, 2), Some(vec![2]));

        let update = mean_half(1);
        let out = LayeredAggregator::default()
            .compute_embeddings(&flow, &g, &IdEmbedding { dim: 2 }, &update)
            .unwrap();

        // both seeds are users: one call, rows in layer order
        let inputs = update.inputs.borrow();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0][0], vec![3.0, 3.0, 0.0, 0.0]);
        // user 0 still averages its two items, 4 and 5
        assert_eq!(inputs[0][1], vec![1.0, 1.0, 4.5, 4.5]);

        let row = out.get(2).unwrap().unwrap();
        assert!(row.iter().all(|x| x.is_finite()));
        assert_eq!(row, vec![0.0, 0.0]);
    }

    #[test]
    fn test_empty_row_is_finite() {
        let g = graph();
        let flow = Flow::from_parts(vec![vec![2], vec![2]], vec![Block::new(vec![vec![]])])
            .unwrap();
        let out = LayeredAggregator::default()
            .compute_embeddings(&flow, &g, &IdEmbedding { dim: 2 }, &mean_half(1))
            .unwrap();
        assert_eq!(out.get(2).unwrap().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_depth_zero_returns_initial() {
        let g = graph();
        let flow = Flow::from_parts(vec![vec![4, 0]], vec![]).unwrap();
        let out = LayeredAggregator::default()
            .compute_embeddings(&flow, &g, &IdEmbedding { dim: 2 }, &mean_half(0))
            .unwrap();
        assert_eq!(
            out.tensor().to_vec2::<f32>().unwrap(),
            vec![vec![5.0, 5.0], vec![1.0, 1.0]]
        );
    }

    #[test]
    fn test_depth_mismatch_rejected() {
        let g = graph();
        let flow = Flow::from_parts(vec![vec![0], vec![0]], vec![Block::new(vec![vec![0]])])
            .unwrap();
        let result = LayeredAggregator::default().compute_embeddings(
            &flow,
            &g,
            &IdEmbedding { dim: 2 },
            &mean_half(2),
        );
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_rows_lookup() {
        let device = Device::Cpu;
        let t = Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], &device).unwrap();
        let emb = NodeEmbeddings::new(vec![7, 9], t).unwrap();
        let picked = emb.rows(&[9, 7, 9]).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(picked, vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(emb.rows(&[8]).is_err());
        assert_eq!(emb.get(8).unwrap(), None);
    }

    #[test]
    fn test_merge_rows_restores_order() {
        let device = Device::Cpu;
        let a = Tensor::new(&[[10f32], [30.0]], &device).unwrap();
        let b = Tensor::new(&[[20f32]], &device).unwrap();
        let parts = vec![(vec![0, 2], a), (vec![1], b)];
        let merged = merge_rows(parts, 3, 1, DType::F32, &device).unwrap();
        assert_eq!(
            merged.to_vec2::<f32>().unwrap(),
            vec![vec![10.0], vec![20.0], vec![30.0]]
        );
    }

    #[test]
    fn test_merge_rows_empty_keeps_dtype() {
        let merged = merge_rows(Vec::new(), 0, 3, DType::F64, &Device::Cpu).unwrap();
        assert_eq!(merged.dims(), &[0, 3]);
        assert_eq!(merged.dtype(), DType::F64);
    }
}
