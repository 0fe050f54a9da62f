//! GraphSAGE recommendation for Rust: sampled neighborhoods, typed
//! aggregation and rating prediction.
//!
//! `sagerec` bundles the two library crates:
//!
//! - Build a bipartite user/item rating graph, or load MovieLens-100K
//! - Sample fixed-fanout multi-hop neighborhoods into layered flows
//! - Embed flow targets with per-type GraphSAGE layers
//! - Score user/item pairs and train everything with AdamW
//!
//! # Crate Structure
//!
//! - [`sagerec_core`] - Rating graph, flows, neighbor sampling, edge batches
//! - [`sagerec_nn`] - Input embeddings, aggregator, scorer, trainer
//!
//! # Example
//!
//! ```rust
//! use sagerec::{ItemAttrs, RatingGraph, UserAttrs};
//! use sagerec::nn::{Trainer, TrainingConfig};
//!
//! let mut graph = RatingGraph::new();
//! let alice = graph.add_user(UserAttrs { age: 2, gender: 1, occupation: 0, zip: 0 }).unwrap();
//! let bob = graph.add_user(UserAttrs { age: 4, gender: 0, occupation: 1, zip: 0 }).unwrap();
//! let film = graph.add_item(ItemAttrs { year: 0, genres: vec![1.0, 0.0] }).unwrap();
//! graph.add_interaction(alice, film, 5.0, 0, false).unwrap();
//! graph.add_interaction(bob, film, 2.0, 1, false).unwrap();
//!
//! let config = TrainingConfig::default()
//!     .with_hidden_dim(4)
//!     .with_depth(1)
//!     .with_epochs(2);
//! let mut trainer = Trainer::new(&graph, config).unwrap();
//! let report = trainer.fit().unwrap();
//! assert_eq!(report.epochs.len(), 2);
//!
//! let stats = graph.stats();
//! println!("users: {}, items: {}", stats.num_users, stats.num_items);
//! ```
//!
//! # MovieLens
//!
//! ```rust,ignore
//! let graph = sagerec::load_movielens("data/ml-100k")?;
//! let mut trainer = sagerec::nn::Trainer::new(&graph, Default::default())?;
//! trainer.fit()?;
//! ```

// Re-export core types
pub use sagerec_core::{
    Block, DirectedEdge, Error as CoreError, Flow, Interaction, ItemAttrs, NodeId, NodeRecord,
    NodeType, Rating, RatingGraph, RatingGraphStats, Result as CoreResult, UserAttrs, Vocabulary,
};

// Re-export petgraph for advanced graph operations
pub use sagerec_core::petgraph;

/// Dataset loaders.
pub mod formats {
    pub use sagerec_core::formats::*;
}

/// Neighbor sampling.
pub mod algo {
    pub use sagerec_core::algo::*;
}

/// Edge minibatches.
pub mod batch {
    pub use sagerec_core::batch::*;
}

/// Encoder, scorer and training loop.
pub mod nn {
    pub use sagerec_nn::*;
}

/// Load a MovieLens-100K directory with the default 10% test split.
///
/// # Example
///
/// ```rust,ignore
/// let graph = sagerec::load_movielens("data/ml-100k")?;
/// ```
pub fn load_movielens(dir: impl AsRef<std::path::Path>) -> CoreResult<RatingGraph> {
    formats::MovieLens::load_dir(dir, formats::TestSplit::default())
}
