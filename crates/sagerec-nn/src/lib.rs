// Allow minor clippy style warnings at crate level
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::neg_cmp_op_on_partial_ord)]

//! GraphSAGE encoder, scorer and training loop.
//!
//! `sagerec-nn` turns the flows sampled by `sagerec-core` into node
//! embeddings and rating predictions, using `candle` for tensors and
//! autograd.
//!
//! # Modules
//!
//! - [`aggregate`]: Layer-by-layer aggregation over a flow
//! - [`embed`]: Per-node and per-attribute input embeddings
//! - [`conv`]: Typed GraphSAGE update layers
//! - [`model`]: [`SageEncoder`], the parameters plus the aggregator
//! - [`scoring`]: Dot product plus per-node bias
//! - [`training`]: AdamW minibatch training on MSE
//!
//! # Example: Encode a Flow
//!
//! ```rust
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
//! use sagerec_core::{ItemAttrs, RatingGraph, UserAttrs};
//! use sagerec_nn::{EncoderConfig, SageEncoder};
//!
//! let mut graph = RatingGraph::new();
//! let u = graph.add_user(UserAttrs { age: 3, gender: 0, occupation: 2, zip: 1 }).unwrap();
//! let m = graph.add_item(ItemAttrs { year: 0, genres: vec![0.0, 1.0] }).unwrap();
//! graph.add_interaction(u, m, 4.0, 0, false).unwrap();
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let config = EncoderConfig { hidden_dim: 8, depth: 1, ..Default::default() };
//! let encoder = SageEncoder::new(&graph, config, vb).unwrap();
//!
//! let mut sampler = NeighborSampler::seeded(&graph, SamplerConfig::new(4, 1), 0);
//! let flow = sampler.build_flow(&[u, m]).unwrap();
//! let embeddings = encoder.encode(&flow, &graph).unwrap();
//! assert_eq!(embeddings.tensor().dims(), &[2, 8]);
//! ```

pub mod aggregate;
pub mod conv;
pub mod embed;
pub mod error;
pub mod model;
pub mod scoring;
pub mod training;

pub use aggregate::{InitialEmbedding, LayeredAggregator, NodeEmbeddings, TypedUpdate};
pub use conv::{SageUpdate, TypedSageLayer};
pub use embed::InputEmbedding;
pub use error::{Error, Result};
pub use model::{EncoderConfig, SageEncoder};
pub use scoring::Scorer;
pub use training::{EpochMetrics, Trainer, TrainingConfig, TrainingReport};
