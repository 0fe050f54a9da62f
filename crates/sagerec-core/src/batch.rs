//! Shuffled edge minibatches paired with sampled flows.
//!
//! [`EdgeBatches`] shuffles the labeled interactions once when it is built,
//! then yields contiguous chunks of `batch_size`. Every batch carries a single
//! [`Flow`] covering the union of its endpoints, shared by all pairs in the
//! batch. The iterator makes one pass; build a new one (and so reshuffle) for
//! every epoch.

use crate::algo::sampling::NeighborSampler;
use crate::flow::Flow;
use crate::graph::Interaction;
use crate::node::NodeId;
use crate::{Error, Result};
use rand::prelude::*;

/// One minibatch of rated pairs and the flow needed to embed their endpoints.
#[derive(Debug, Clone)]
pub struct EdgeBatch {
    pub users: Vec<NodeId>,
    pub items: Vec<NodeId>,
    pub ratings: Vec<f32>,
    pub flow: Flow,
}

impl EdgeBatch {
    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// `(user, item)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.users.iter().copied().zip(self.items.iter().copied())
    }

    /// Layer-0 positions of every user and every item in the flow.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedFlow`] if an endpoint is not a target of the flow.
    pub fn positions(&self) -> Result<(Vec<u32>, Vec<u32>)> {
        let lookup = |nodes: &[NodeId]| {
            nodes
                .iter()
                .map(|&n| {
                    self.flow.position(0, n).map(|p| p as u32).ok_or_else(|| {
                        Error::MalformedFlow(format!("endpoint {n} is not a target of the flow"))
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        Ok((lookup(&self.users)?, lookup(&self.items)?))
    }
}

/// One-pass iterator over shuffled edge batches.
///
/// # Example
///
/// ```rust
/// use rand::SeedableRng;
/// use rand_xorshift::XorShiftRng;
/// use sagerec_core::algo::sampling::{NeighborSampler, SamplerConfig};
/// use sagerec_core::batch::EdgeBatches;
/// use sagerec_core::{ItemAttrs, RatingGraph, UserAttrs};
///
/// let mut graph = RatingGraph::new();
/// let u = graph.add_user(UserAttrs { age: 0, gender: 0, occupation: 0, zip: 0 }).unwrap();
/// for year in 0..5 {
///     let m = graph.add_item(ItemAttrs { year, genres: vec![1.0] }).unwrap();
///     graph.add_interaction(u, m, 4.0, 0, false).unwrap();
/// }
///
/// let mut sampler = NeighborSampler::seeded(&graph, SamplerConfig::new(2, 1), 0);
/// let mut rng = XorShiftRng::seed_from_u64(0);
/// let edges = graph.interactions().to_vec();
/// let sizes: Vec<usize> = EdgeBatches::new(edges, 2, &mut rng, &mut sampler)
///     .unwrap()
///     .map(|b| b.unwrap().len())
///     .collect();
/// assert_eq!(sizes, vec![2, 2, 1]);
/// ```
pub struct EdgeBatches<'s, 'g, R> {
    interactions: Vec<Interaction>,
    batch_size: usize,
    cursor: usize,
    parallel: bool,
    sampler: &'s mut NeighborSampler<'g, R>,
}

impl<'s, 'g, R: Rng> EdgeBatches<'s, 'g, R> {
    /// Shuffle `interactions` with `shuffle_rng` and prepare to batch them.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `batch_size` is zero.
    pub fn new<S: Rng + ?Sized>(
        mut interactions: Vec<Interaction>,
        batch_size: usize,
        shuffle_rng: &mut S,
        sampler: &'s mut NeighborSampler<'g, R>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".into()));
        }
        interactions.shuffle(shuffle_rng);
        Ok(Self {
            interactions,
            batch_size,
            cursor: 0,
            parallel: false,
            sampler,
        })
    }

    /// Sample each batch's flow with [`NeighborSampler::build_flow_par`].
    pub fn with_parallel_sampling(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Total number of batches this iterator yields from the start.
    pub fn num_batches(&self) -> usize {
        self.interactions.len().div_ceil(self.batch_size)
    }

    fn next_batch(&mut self) -> Option<Result<EdgeBatch>> {
        if self.cursor >= self.interactions.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.interactions.len());
        let chunk = &self.interactions[self.cursor..end];
        self.cursor = end;

        let users: Vec<NodeId> = chunk.iter().map(|i| i.user).collect();
        let items: Vec<NodeId> = chunk.iter().map(|i| i.item).collect();
        let ratings: Vec<f32> = chunk.iter().map(|i| i.rating).collect();

        let mut endpoints = Vec::with_capacity(users.len() + items.len());
        endpoints.extend_from_slice(&users);
        endpoints.extend_from_slice(&items);

        let flow = if self.parallel {
            self.sampler.build_flow_par(&endpoints)
        } else {
            self.sampler.build_flow(&endpoints)
        };

        Some(flow.map(|flow| EdgeBatch {
            users,
            items,
            ratings,
            flow,
        }))
    }
}

impl<R: Rng> Iterator for EdgeBatches<'_, '_, R> {
    type Item = Result<EdgeBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.interactions.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl<R: Rng> ExactSizeIterator for EdgeBatches<'_, '_, R> {}
