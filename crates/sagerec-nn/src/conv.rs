//! Type-dispatched GraphSAGE update layers.
//!
//! Each layer owns one dense map per node type. For a node `v` of type `t`:
//!
//! ```text
//! h_v' = LeakyReLU(W_t · CONCAT(h_v, mean({h_u : u in row(v)})))
//! ```
//!
//! The mean and the concatenation are built by the aggregator; this module
//! only holds the weights and applies the activation. Output normalization
//! is [`l2_normalize`].
//!
//! # Reference
//!
//! Hamilton et al., "Inductive Representation Learning on Large Graphs",
//! NeurIPS 2017.

use crate::aggregate::TypedUpdate;
use crate::error::{Error, Result};
use candle_core::Tensor;
use candle_nn::{linear, ops, Linear, Module, VarBuilder};
use sagerec_core::NodeType;

/// One GraphSAGE layer with separate user and item weights.
pub struct TypedSageLayer {
    user: Linear,
    item: Linear,
}

impl TypedSageLayer {
    /// Create a layer mapping `CONCAT(self, mean)` of width `2 * in_features`
    /// to `out_features`.
    pub fn new(
        in_features: usize,
        out_features: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let user = linear(2 * in_features, out_features, vb.pp("user"))?;
        let item = linear(2 * in_features, out_features, vb.pp("item"))?;
        Ok(Self { user, item })
    }

    /// Weights applied to nodes of `node_type`.
    pub fn weights(&self, node_type: NodeType) -> &Linear {
        match node_type {
            NodeType::User => &self.user,
            NodeType::Item => &self.item,
        }
    }
}

/// Stack of [`TypedSageLayer`]s followed by a leaky rectifier.
///
/// Layer `i` updates the nodes of flow layer `i`, so layer 0 produces the
/// final target embeddings.
pub struct SageUpdate {
    layers: Vec<TypedSageLayer>,
    negative_slope: f64,
}

impl SageUpdate {
    /// Create `depth` layers of width `dim`.
    pub fn new(
        depth: usize,
        dim: usize,
        negative_slope: f64,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let layers = (0..depth)
            .map(|i| TypedSageLayer::new(dim, dim, vb.pp(format!("layer{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            negative_slope,
        })
    }

    pub fn layers(&self) -> &[TypedSageLayer] {
        &self.layers
    }

    pub fn negative_slope(&self) -> f64 {
        self.negative_slope
    }
}

impl TypedUpdate for SageUpdate {
    fn depth(&self) -> usize {
        self.layers.len()
    }

    fn update(&self, layer: usize, node_type: NodeType, input: &Tensor) -> Result<Tensor> {
        let sage = self.layers.get(layer).ok_or(Error::DimensionMismatch {
            expected: self.layers.len(),
            got: layer + 1,
        })?;
        let h = sage.weights(node_type).forward(input)?;
        Ok(ops::leaky_relu(&h, self.negative_slope)?)
    }
}

/// Divide every row by its L2 norm, with the norm floored at `epsilon`.
pub fn l2_normalize(x: &Tensor, epsilon: f64) -> candle_core::Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm = norm.maximum(epsilon)?;
    x.broadcast_div(&norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_update_shape_per_type() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let update = SageUpdate::new(2, 8, 0.01, vb).unwrap();
        assert_eq!(update.depth(), 2);

        let x = Tensor::randn(0f32, 1f32, (5, 16), &device).unwrap();
        let users = update.update(0, NodeType::User, &x).unwrap();
        let items = update.update(1, NodeType::Item, &x).unwrap();
        assert_eq!(users.dims(), &[5, 8]);
        assert_eq!(items.dims(), &[5, 8]);

        // 2 layers x 2 types x (weight + bias)
        assert_eq!(varmap.all_vars().len(), 8);
    }

    #[test]
    fn test_update_layer_out_of_range() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let update = SageUpdate::new(1, 4, 0.01, vb).unwrap();
        let x = Tensor::zeros((1, 8), DType::F32, &device).unwrap();
        assert!(matches!(
            update.update(3, NodeType::User, &x),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_leaky_slope_applied() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[-2f32, 3.0]], &device).unwrap();
        let y = ops::leaky_relu(&x, 0.01).unwrap().to_vec2::<f32>().unwrap();
        assert!((y[0][0] + 0.02).abs() < 1e-6);
        assert!((y[0][1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_rows_and_zero_row() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[3f32, 4.0], [0.0, 0.0]], &device).unwrap();
        let y = l2_normalize(&x, 1e-6).unwrap().to_vec2::<f32>().unwrap();
        assert!((y[0][0] - 0.6).abs() < 1e-6);
        assert!((y[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(y[1], vec![0.0, 0.0]);
    }
}
