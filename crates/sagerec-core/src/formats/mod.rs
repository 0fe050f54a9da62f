//! Dataset loaders.
//!
//! - [`movielens`]: MovieLens-100K (`u.user`, `u.item`, `u.data`)

pub mod movielens;

pub use movielens::{MovieLens, TestSplit};
