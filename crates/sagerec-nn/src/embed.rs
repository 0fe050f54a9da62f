//! Input embeddings assigned at the deepest flow layer.
//!
//! ```text
//! user:  E_node[v] + E_age[a] + E_gender[g] + E_occupation[o] + E_zip[z]
//! item:  E_node[v] + E_year[y] + P · genres
//! ```
//!
//! `P` is a bias-free projection of the dense genre vector. These vectors are
//! not normalized.

use crate::aggregate::{merge_rows, InitialEmbedding};
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{embedding, linear_no_bias, Embedding, Linear, Module, VarBuilder};
use sagerec_core::{ItemAttrs, NodeId, NodeRecord, RatingGraph, UserAttrs, Vocabulary};

/// Learned per-node and per-attribute embedding tables.
pub struct InputEmbedding {
    node: Embedding,
    age: Embedding,
    gender: Embedding,
    occupation: Embedding,
    zip: Embedding,
    year: Embedding,
    genre: Option<Linear>,
    num_nodes: usize,
    dim: usize,
    dtype: DType,
    device: Device,
}

impl InputEmbedding {
    /// Create tables sized for `num_nodes` nodes and the given vocabulary.
    pub fn new(
        num_nodes: usize,
        vocab: &Vocabulary,
        dim: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let table = |size: usize, name: &str| embedding(size.max(1), dim, vb.pp(name));
        let genre = if vocab.genre_dim > 0 {
            Some(linear_no_bias(vocab.genre_dim, dim, vb.pp("genre"))?)
        } else {
            None
        };
        Ok(Self {
            node: table(num_nodes, "node")?,
            age: table(vocab.age, "age")?,
            gender: table(vocab.gender, "gender")?,
            occupation: table(vocab.occupation, "occupation")?,
            zip: table(vocab.zip, "zip")?,
            year: table(vocab.year, "year")?,
            genre,
            num_nodes,
            dim,
            dtype: vb.dtype(),
            device: vb.device().clone(),
        })
    }

    fn ids(&self, values: Vec<u32>) -> candle_core::Result<Tensor> {
        let n = values.len();
        Tensor::from_vec(values, n, &self.device)
    }

    fn users(&self, nodes: &[NodeId], attrs: &[&UserAttrs]) -> Result<Tensor> {
        let node_ids = self.ids(nodes.iter().map(|&n| n as u32).collect())?;
        let mut h = self.node.forward(&node_ids)?;
        let tables: [(&Embedding, fn(&UserAttrs) -> u32); 4] = [
            (&self.age, |a| a.age),
            (&self.gender, |a| a.gender),
            (&self.occupation, |a| a.occupation),
            (&self.zip, |a| a.zip),
        ];
        for (table, code) in tables {
            let codes = self.ids(attrs.iter().map(|&a| code(a)).collect())?;
            h = (h + table.forward(&codes)?)?;
        }
        Ok(h)
    }

    fn items(&self, nodes: &[NodeId], attrs: &[&ItemAttrs]) -> Result<Tensor> {
        let node_ids = self.ids(nodes.iter().map(|&n| n as u32).collect())?;
        let h = self.node.forward(&node_ids)?;
        let years = self.ids(attrs.iter().map(|a| a.year).collect())?;
        let mut h = (h + self.year.forward(&years)?)?;
        if let Some(genre) = &self.genre {
            let dim = attrs.first().map_or(0, |a| a.genres.len());
            let flat: Vec<f32> = attrs
                .iter()
                .flat_map(|a| a.genres.iter().copied())
                .collect();
            let genres = Tensor::from_vec(flat, (attrs.len(), dim), &self.device)?
                .to_dtype(self.dtype)?;
            h = (h + genre.forward(&genres)?)?;
        }
        Ok(h)
    }
}

impl InitialEmbedding for InputEmbedding {
    fn dim(&self) -> usize {
        self.dim
    }

    fn initial(&self, graph: &RatingGraph, nodes: &[NodeId]) -> Result<Tensor> {
        let mut user_pos = Vec::new();
        let mut user_ids = Vec::new();
        let mut user_attrs = Vec::new();
        let mut item_pos = Vec::new();
        let mut item_ids = Vec::new();
        let mut item_attrs = Vec::new();

        for (pos, &node) in nodes.iter().enumerate() {
            if node >= self.num_nodes {
                return Err(Error::DimensionMismatch {
                    expected: self.num_nodes,
                    got: node + 1,
                });
            }
            match graph.attributes(node)? {
                NodeRecord::User(attrs) => {
                    user_pos.push(pos);
                    user_ids.push(node);
                    user_attrs.push(attrs);
                }
                NodeRecord::Item(attrs) => {
                    item_pos.push(pos);
                    item_ids.push(node);
                    item_attrs.push(attrs);
                }
            }
        }

        let mut parts = Vec::with_capacity(2);
        if !user_ids.is_empty() {
            parts.push((user_pos, self.users(&user_ids, &user_attrs)?));
        }
        if !item_ids.is_empty() {
            parts.push((item_pos, self.items(&item_ids, &item_attrs)?));
        }
        merge_rows(parts, nodes.len(), self.dim, self.dtype, &self.device)
    }
}
