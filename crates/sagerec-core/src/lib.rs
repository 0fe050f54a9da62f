// Allow minor clippy style warnings at crate level
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]

//! Core types for sampled GraphSAGE recommendation.
//!
//! This crate provides the graph side of the recommender:
//!
//! - [`RatingGraph`] - A bipartite user/item graph with typed attribute records
//! - [`Flow`] / [`Block`] - Layered subgraphs that tell an aggregator which
//!   embeddings feed which
//! - [`algo::sampling`] - Fixed-fanout neighbor sampling that builds flows
//! - [`batch::EdgeBatches`] - Shuffled edge minibatches with one flow each
//!
//! # Data Formats
//!
//! - [`formats::movielens`] - MovieLens-100K directory layout
//!
//! # Example
//!
//! ```rust
//! use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
//! use sagerec_core::{ItemAttrs, RatingGraph, UserAttrs};
//!
//! let mut graph = RatingGraph::new();
//! let alice = graph.add_user(UserAttrs { age: 2, gender: 0, occupation: 1, zip: 0 }).unwrap();
//! let heat = graph.add_item(ItemAttrs { year: 0, genres: vec![1.0, 0.0] }).unwrap();
//! graph.add_interaction(alice, heat, 5.0, 0, false).unwrap();
//!
//! let mut sampler = NeighborSampler::seeded(&graph, SamplerConfig::new(5, 2), 7);
//! let flow = sampler.build_flow(&[alice]).unwrap();
//! assert_eq!(flow.depth(), 2);
//! assert_eq!(flow.in_neighbors(0, alice), Some(vec![heat, alice]));
//! ```

pub mod algo;
pub mod batch;
mod error;
pub mod flow;
pub mod formats;
mod graph;
mod node;

pub use error::{Error, Result};
pub use flow::{Block, Flow, MessageEdges};
pub use graph::{DirectedEdge, Interaction, Rating, RatingGraph, RatingGraphStats};
pub use node::{ItemAttrs, NodeId, NodeRecord, NodeType, UserAttrs, Vocabulary};

// Re-export petgraph for callers working with the underlying graph
pub use petgraph;
