//! Rating prediction from a pair of embeddings.
//!
//! ```text
//! score(u, m) = <h_u, h_m> + b[u] + b[m]
//! ```
//!
//! `b` is one learned scalar per node, shared by users and items since node
//! ids are global. It starts at zero.

use crate::error::{Error, Result};
use candle_core::Tensor;
use candle_nn::{Embedding, Init, VarBuilder};
use sagerec_core::NodeId;

/// Dot-product scorer with per-node bias.
pub struct Scorer {
    bias: Embedding,
    num_nodes: usize,
}

impl Scorer {
    /// Create a zero-initialised bias table for `num_nodes` nodes.
    pub fn new(num_nodes: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let weight = vb.get_with_hints((num_nodes.max(1), 1), "bias", Init::Const(0.0))?;
        Ok(Self {
            bias: Embedding::new(weight, 1),
            num_nodes,
        })
    }

    fn bias_rows(&self, nodes: &[NodeId]) -> Result<Tensor> {
        let ids = nodes
            .iter()
            .map(|&n| self.check(n).map(|()| n as u32))
            .collect::<Result<Vec<u32>>>()?;
        let table = self.bias.embeddings();
        let ids = Tensor::from_vec(ids, nodes.len(), table.device())?;
        Ok(table.index_select(&ids, 0)?.squeeze(1)?)
    }

    fn check(&self, node: NodeId) -> Result<()> {
        if node < self.num_nodes {
            Ok(())
        } else {
            Err(sagerec_core::Error::InvalidArgument(format!(
                "node {node} has no bias (table has {} entries)",
                self.num_nodes
            ))
            .into())
        }
    }

    /// Batched scores: row `j` scores `(src[j], dst[j])` from row `j` of
    /// `h_src` and `h_dst`.
    pub fn score(
        &self,
        h_src: &Tensor,
        h_dst: &Tensor,
        src: &[NodeId],
        dst: &[NodeId],
    ) -> Result<Tensor> {
        let (rows, _) = h_src.dims2()?;
        for len in [h_dst.dim(0)?, src.len(), dst.len()] {
            if len != rows {
                return Err(Error::DimensionMismatch {
                    expected: rows,
                    got: len,
                });
            }
        }
        let dot = (h_src * h_dst)?.sum(1)?;
        let scores = ((dot + self.bias_rows(src)?)? + self.bias_rows(dst)?)?;
        Ok(scores)
    }

    /// Score one pair from plain vectors.
    pub fn score_one(&self, h_src: &[f32], h_dst: &[f32], src: NodeId, dst: NodeId) -> Result<f32> {
        if h_src.len() != h_dst.len() {
            return Err(Error::DimensionMismatch {
                expected: h_src.len(),
                got: h_dst.len(),
            });
        }
        let dot: f32 = h_src.iter().zip(h_dst).map(|(a, b)| a * b).sum();
        Ok(dot + self.bias(src)? + self.bias(dst)?)
    }

    /// Current bias of `node`.
    pub fn bias(&self, node: NodeId) -> Result<f32> {
        self.check(node)?;
        Ok(self.bias.embeddings().get(node)?.get(0)?.to_scalar::<f32>()?)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
}
