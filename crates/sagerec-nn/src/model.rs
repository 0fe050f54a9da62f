//! GraphSAGE encoder: input embeddings plus typed update layers.

use crate::aggregate::{LayeredAggregator, NodeEmbeddings};
use crate::conv::SageUpdate;
use crate::embed::InputEmbedding;
use crate::error::{Error, Result};
use candle_nn::VarBuilder;
use sagerec_core::{Flow, RatingGraph};
use serde::{Deserialize, Serialize};

/// Shape and numerics of a [`SageEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Embedding width at every layer.
    pub hidden_dim: usize,
    /// Number of aggregation layers; flows must have the same depth.
    pub depth: usize,
    /// Slope of the leaky rectifier for negative inputs.
    pub negative_slope: f64,
    /// Floor for degree and norm divisors.
    pub epsilon: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 32,
            depth: 2,
            negative_slope: 0.01,
            epsilon: 1e-6,
        }
    }
}

/// Owns the learned input tables and update weights and runs the
/// [`LayeredAggregator`] with them.
pub struct SageEncoder {
    input: InputEmbedding,
    update: SageUpdate,
    aggregator: LayeredAggregator,
    config: EncoderConfig,
}

impl SageEncoder {
    /// Create parameters sized for `graph`'s nodes and attribute vocabulary.
    pub fn new(graph: &RatingGraph, config: EncoderConfig, vb: VarBuilder) -> Result<Self> {
        if config.hidden_dim == 0 {
            return Err(Error::InvalidConfig("hidden_dim must be positive".into()));
        }
        if config.epsilon <= 0.0 {
            return Err(Error::InvalidConfig("epsilon must be positive".into()));
        }
        let input = InputEmbedding::new(
            graph.num_nodes(),
            graph.vocabulary(),
            config.hidden_dim,
            vb.pp("input"),
        )?;
        let update = SageUpdate::new(
            config.depth,
            config.hidden_dim,
            config.negative_slope,
            vb.pp("sage"),
        )?;
        Ok(Self {
            input,
            update,
            aggregator: LayeredAggregator::new(config.epsilon),
            config,
        })
    }

    /// Embed the targets of `flow`.
    pub fn encode(&self, flow: &Flow, graph: &RatingGraph) -> Result<NodeEmbeddings> {
        self.aggregator
            .compute_embeddings(flow, graph, &self.input, &self.update)
    }

    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    pub fn input(&self) -> &InputEmbedding {
        &self.input
    }

    pub fn update(&self) -> &SageUpdate {
        &self.update
    }
}
