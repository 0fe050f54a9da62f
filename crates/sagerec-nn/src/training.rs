//! Minibatch training of the encoder and scorer on observed ratings.
//!
//! Every epoch builds a fresh [`EdgeBatches`] over the training interactions,
//! so edges are reshuffled and neighborhoods resampled each time. For each
//! batch:
//!
//! 1. Sample one flow covering the batch's users and items
//! 2. Encode the flow's targets with the [`SageEncoder`]
//! 3. Score every pair and take the mean squared error against the ratings
//! 4. Take an AdamW step on all parameters
//!
//! # Example
//!
//! ```rust,ignore
//! use sagerec_nn::training::{Trainer, TrainingConfig};
//!
//! let config = TrainingConfig::default()
//!     .with_hidden_dim(16)
//!     .with_epochs(5);
//!
//! let mut trainer = Trainer::new(&graph, config)?;
//! let report = trainer.fit()?;
//! println!("final test RMSE: {:?}", report.final_test_rmse());
//! ```

use crate::aggregate::NodeEmbeddings;
use crate::error::{Error, Result};
use crate::model::{EncoderConfig, SageEncoder};
use crate::scoring::Scorer;
use candle_core::{DType, Device, Tensor};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
use sagerec_core::batch::{EdgeBatch, EdgeBatches};
use sagerec_core::{Interaction, NodeId, NodeType, RatingGraph};
use serde::{Deserialize, Serialize};

/// Training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Embedding width (default: 32).
    pub hidden_dim: usize,
    /// Neighbors sampled per node per layer (default: 10).
    pub fanout: usize,
    /// Aggregation layers (default: 2).
    pub depth: usize,
    /// Ratings per minibatch (default: 256).
    pub batch_size: usize,
    /// Number of training epochs (default: 10).
    pub epochs: usize,
    /// AdamW learning rate (default: 0.001).
    pub learning_rate: f64,
    /// AdamW decoupled weight decay (default: 0.0001).
    pub weight_decay: f64,
    /// Leaky rectifier slope (default: 0.01).
    pub negative_slope: f64,
    /// Degree and norm floor (default: 1e-6).
    pub epsilon: f64,
    /// Seed for shuffling and sampling (default: 42).
    pub seed: u64,
    /// Sample each batch's flow across threads (default: false).
    pub parallel_sampling: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 32,
            fanout: 10,
            depth: 2,
            batch_size: 256,
            epochs: 10,
            learning_rate: 0.001,
            weight_decay: 0.0001,
            negative_slope: 0.01,
            epsilon: 1e-6,
            seed: 42,
            parallel_sampling: false,
        }
    }
}

impl TrainingConfig {
    pub fn with_hidden_dim(mut self, dim: usize) -> Self {
        self.hidden_dim = dim;
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallel_sampling(mut self, parallel: bool) -> Self {
        self.parallel_sampling = parallel;
        self
    }

    /// Reject values no training run can use.
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 {
            return Err(Error::InvalidConfig("hidden_dim must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.epsilon > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            hidden_dim: self.hidden_dim,
            depth: self.depth,
            negative_slope: self.negative_slope,
            epsilon: self.epsilon,
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig::new(self.fanout, self.depth)
    }
}

/// Losses recorded after one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean of the per-batch training MSE.
    pub train_mse: f32,
    /// RMSE over the test interactions, if there are any.
    pub test_rmse: Option<f32>,
}

/// Per-epoch history of a [`Trainer::fit`] run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingReport {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn final_train_mse(&self) -> Option<f32> {
        self.last().map(|m| m.train_mse)
    }

    pub fn final_test_rmse(&self) -> Option<f32> {
        self.last().and_then(|m| m.test_rmse)
    }
}

/// Owns the parameters, optimizer and random state of a training run.
pub struct Trainer<'g> {
    graph: &'g RatingGraph,
    config: TrainingConfig,
    device: Device,
    varmap: VarMap,
    encoder: SageEncoder,
    scorer: Scorer,
    optimizer: AdamW,
    sampler: NeighborSampler<'g>,
    shuffle_rng: XorShiftRng,
}

impl<'g> Trainer<'g> {
    /// Build fresh parameters for `graph` on the CPU.
    pub fn new(graph: &'g RatingGraph, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let encoder = SageEncoder::new(graph, config.encoder_config(), vb.pp("encoder"))?;
        let scorer = Scorer::new(graph.num_nodes(), vb.pp("scorer"))?;
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;

        let sampler = NeighborSampler::seeded(graph, config.sampler_config(), config.seed);
        let shuffle_rng = XorShiftRng::seed_from_u64(config.seed.wrapping_add(1));

        Ok(Self {
            graph,
            config,
            device,
            varmap,
            encoder,
            scorer,
            optimizer,
            sampler,
            shuffle_rng,
        })
    }

    /// One pass over the training interactions. Returns the mean batch MSE.
    pub fn train_epoch(&mut self) -> Result<f32> {
        let edges: Vec<Interaction> = self.graph.train_interactions().copied().collect();
        if edges.is_empty() {
            return Err(Error::InvalidConfig("graph has no training interactions".into()));
        }

        let batches = EdgeBatches::new(
            edges,
            self.config.batch_size,
            &mut self.shuffle_rng,
            &mut self.sampler,
        )?
        .with_parallel_sampling(self.config.parallel_sampling);

        let mut total = 0.0f32;
        let mut count = 0usize;
        for batch in batches {
            let batch = batch?;
            let predictions = predict_batch(&self.encoder, &self.scorer, self.graph, &batch)?;
            let targets = Tensor::from_vec(batch.ratings.clone(), batch.len(), &self.device)?;
            let mse = loss::mse(&predictions, &targets)?;
            self.optimizer.backward_step(&mse)?;

            let value = mse.to_scalar::<f32>()?;
            tracing::debug!(batch = count, size = batch.len(), mse = value, "train step");
            total += value;
            count += 1;
        }
        Ok(total / count.max(1) as f32)
    }

    /// Root mean squared error over `interactions`, without updating parameters.
    pub fn evaluate(&mut self, interactions: &[Interaction]) -> Result<f32> {
        if interactions.is_empty() {
            return Err(Error::InvalidConfig("nothing to evaluate".into()));
        }

        let batches = EdgeBatches::new(
            interactions.to_vec(),
            self.config.batch_size,
            &mut self.shuffle_rng,
            &mut self.sampler,
        )?
        .with_parallel_sampling(self.config.parallel_sampling);

        let mut squared = 0.0f64;
        for batch in batches {
            let batch = batch?;
            let predictions = predict_batch(&self.encoder, &self.scorer, self.graph, &batch)?;
            let targets = Tensor::from_vec(batch.ratings.clone(), batch.len(), &self.device)?;
            let sse = (predictions - targets)?.sqr()?.sum_all()?.to_scalar::<f32>()?;
            squared += f64::from(sse);
        }
        Ok((squared / interactions.len() as f64).sqrt() as f32)
    }

    /// Train for `config.epochs` epochs.
    pub fn fit(&mut self) -> Result<TrainingReport> {
        self.fit_with(|_| {})
    }

    /// Train for `config.epochs` epochs, calling `on_epoch` after each one.
    pub fn fit_with<F>(&mut self, mut on_epoch: F) -> Result<TrainingReport>
    where
        F: FnMut(&EpochMetrics),
    {
        let test: Vec<Interaction> = self.graph.test_interactions().copied().collect();
        let mut report = TrainingReport::default();

        for epoch in 1..=self.config.epochs {
            let train_mse = self.train_epoch()?;
            let test_rmse = if test.is_empty() {
                None
            } else {
                Some(self.evaluate(&test)?)
            };
            let metrics = EpochMetrics {
                epoch,
                train_mse,
                test_rmse,
            };
            tracing::info!(epoch, train_mse, test_rmse = ?test_rmse, "epoch finished");
            on_epoch(&metrics);
            report.epochs.push(metrics);
        }
        Ok(report)
    }

    /// Predicted rating of `item` by `user`, from freshly sampled neighborhoods.
    pub fn predict(&mut self, user: NodeId, item: NodeId) -> Result<f32> {
        let user_type = self.graph.node_type(user)?;
        let item_type = self.graph.node_type(item)?;
        if user_type != NodeType::User || item_type != NodeType::Item {
            return Err(sagerec_core::Error::InvalidArgument(format!(
                "expected a user and an item, got {user} ({user_type}) and {item} ({item_type})"
            ))
            .into());
        }
        let flow = self.sampler.build_flow(&[user, item])?;
        let embeddings = self.encoder.encode(&flow, self.graph)?;
        score_pairs(&self.scorer, &embeddings, &[user], &[item])?
            .get(0)?
            .to_scalar::<f32>()
            .map_err(Error::from)
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn encoder(&self) -> &SageEncoder {
        &self.encoder
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn graph(&self) -> &'g RatingGraph {
        self.graph
    }
}

fn predict_batch(
    encoder: &SageEncoder,
    scorer: &Scorer,
    graph: &RatingGraph,
    batch: &EdgeBatch,
) -> Result<Tensor> {
    let embeddings = encoder.encode(&batch.flow, graph)?;
    // embedding rows follow layer 0 of the flow
    let (users, items) = batch.positions()?;
    let h = embeddings.tensor();
    let n = batch.len();
    let h_users = h.index_select(&Tensor::from_vec(users, n, h.device())?, 0)?;
    let h_items = h.index_select(&Tensor::from_vec(items, n, h.device())?, 0)?;
    scorer.score(&h_users, &h_items, &batch.users, &batch.items)
}

fn score_pairs(
    scorer: &Scorer,
    embeddings: &NodeEmbeddings,
    users: &[NodeId],
    items: &[NodeId],
) -> Result<Tensor> {
    let h_users = embeddings.rows(users)?;
    let h_items = embeddings.rows(items)?;
    scorer.score(&h_users, &h_items, users, items)
}
