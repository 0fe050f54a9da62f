//! Graph algorithms used to build minibatches.

/// Neighbor sampling for layered (GraphSAGE-style) computation.
pub mod sampling;
