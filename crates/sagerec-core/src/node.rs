//! Node identifiers, types and attribute records.
//!
//! Users and items share one id space: a [`NodeId`] names exactly one node,
//! and the node's [`NodeRecord`] says which side of the bipartite graph it
//! lives on and carries that side's attributes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Global node identifier. Unique across users and items.
pub type NodeId = usize;

/// Which side of the bipartite graph a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    /// A rater.
    User,
    /// A rated movie.
    Item,
}

impl NodeType {
    /// Both node types, in id order (users first).
    pub const ALL: [NodeType; 2] = [NodeType::User, NodeType::Item];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Item => "item",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorical attributes of a user. Every field is a dense category code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserAttrs {
    pub age: u32,
    pub gender: u32,
    pub occupation: u32,
    pub zip: u32,
}

/// Attributes of an item: a categorical release year and a dense genre vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAttrs {
    pub year: u32,
    pub genres: Vec<f32>,
}

/// Type-tagged attribute record. Exactly one side's attributes are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRecord {
    User(UserAttrs),
    Item(ItemAttrs),
}

impl NodeRecord {
    /// The node type this record belongs to.
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::User(_) => NodeType::User,
            Self::Item(_) => NodeType::Item,
        }
    }

    pub fn as_user(&self) -> Option<&UserAttrs> {
        match self {
            Self::User(attrs) => Some(attrs),
            Self::Item(_) => None,
        }
    }

    pub fn as_item(&self) -> Option<&ItemAttrs> {
        match self {
            Self::Item(attrs) => Some(attrs),
            Self::User(_) => None,
        }
    }
}

/// Cardinality of every categorical attribute, plus the genre vector length.
///
/// Sizes are `max code + 1` over the nodes seen so far, which is what an
/// embedding table indexed by those codes needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub age: usize,
    pub gender: usize,
    pub occupation: usize,
    pub zip: usize,
    pub year: usize,
    pub genre_dim: usize,
}

impl Vocabulary {
    pub(crate) fn observe_user(&mut self, attrs: &UserAttrs) {
        self.age = self.age.max(attrs.age as usize + 1);
        self.gender = self.gender.max(attrs.gender as usize + 1);
        self.occupation = self.occupation.max(attrs.occupation as usize + 1);
        self.zip = self.zip.max(attrs.zip as usize + 1);
    }

    pub(crate) fn observe_item(&mut self, attrs: &ItemAttrs) {
        self.year = self.year.max(attrs.year as usize + 1);
        self.genre_dim = attrs.genres.len();
    }
}
