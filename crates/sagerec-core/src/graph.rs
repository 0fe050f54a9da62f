use crate::node::{ItemAttrs, NodeId, NodeRecord, NodeType, UserAttrs, Vocabulary};
use crate::{Error, Result};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

/// Weight carried by every directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub value: f32,
    pub is_test: bool,
}

/// One user–item rating, stored in the graph as a pair of directed edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user: NodeId,
    pub item: NodeId,
    pub rating: f32,
    pub timestamp: i64,
    pub is_test: bool,
}

/// A directed edge as returned by [`RatingGraph::all_edges`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectedEdge {
    pub src: NodeId,
    pub dst: NodeId,
    pub rating: f32,
    pub is_test: bool,
}

/// Bipartite user–item rating graph.
///
/// Uses petgraph's directed graph internally; a node's petgraph index is its
/// [`NodeId`]. Users are added first and occupy `0..num_users`, items follow.
/// Every rating is stored twice (user→item and item→user) so that
/// neighborhoods are symmetric.
///
/// The store is built once and only read afterwards; it is `Send + Sync`, so
/// samplers on several threads can share one reference.
///
/// # Example
///
/// ```rust
/// use sagerec_core::{ItemAttrs, RatingGraph, UserAttrs};
///
/// let mut graph = RatingGraph::new();
/// let alice = graph.add_user(UserAttrs { age: 2, gender: 1, occupation: 0, zip: 3 }).unwrap();
/// let movie = graph.add_item(ItemAttrs { year: 0, genres: vec![1.0, 0.0] }).unwrap();
/// graph.add_interaction(alice, movie, 4.0, 0, false).unwrap();
///
/// assert_eq!(graph.neighbors(alice).unwrap(), vec![movie]);
/// assert_eq!(graph.num_edges(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RatingGraph {
    graph: DiGraph<NodeRecord, Rating>,
    interactions: Vec<Interaction>,
    num_users: usize,
    vocabulary: Vocabulary,
}

impl RatingGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with estimated capacity.
    pub fn with_capacity(nodes: usize, interactions: usize) -> Self {
        Self {
            graph: DiGraph::with_capacity(nodes, interactions * 2),
            interactions: Vec::with_capacity(interactions),
            num_users: 0,
            vocabulary: Vocabulary::default(),
        }
    }

    /// Add a user. Fails once any item has been added, since user ids must
    /// stay contiguous.
    pub fn add_user(&mut self, attrs: UserAttrs) -> Result<NodeId> {
        if self.num_items() > 0 {
            return Err(Error::InvalidArgument(
                "users must be added before any item".into(),
            ));
        }
        self.vocabulary.observe_user(&attrs);
        let idx = self.graph.add_node(NodeRecord::User(attrs));
        self.num_users += 1;
        Ok(idx.index())
    }

    /// Add an item. All items must carry genre vectors of the same length.
    pub fn add_item(&mut self, attrs: ItemAttrs) -> Result<NodeId> {
        if self.num_items() > 0 && attrs.genres.len() != self.vocabulary.genre_dim {
            return Err(Error::InvalidArgument(format!(
                "genre vector has length {}, expected {}",
                attrs.genres.len(),
                self.vocabulary.genre_dim
            )));
        }
        self.vocabulary.observe_item(&attrs);
        let idx = self.graph.add_node(NodeRecord::Item(attrs));
        Ok(idx.index())
    }

    /// Record a rating between a user and an item, as two directed edges.
    pub fn add_interaction(
        &mut self,
        user: NodeId,
        item: NodeId,
        rating: f32,
        timestamp: i64,
        is_test: bool,
    ) -> Result<()> {
        let user_type = self.node_type(user)?;
        let item_type = self.node_type(item)?;
        if user_type != NodeType::User || item_type != NodeType::Item {
            return Err(Error::InvalidArgument(format!(
                "interaction must join a user and an item, got {user} ({user_type}) and {item} ({item_type})"
            )));
        }

        let weight = Rating {
            value: rating,
            is_test,
        };
        let (u, i) = (NodeIndex::new(user), NodeIndex::new(item));
        self.graph.add_edge(u, i, weight);
        self.graph.add_edge(i, u, weight);
        self.interactions.push(Interaction {
            user,
            item,
            rating,
            timestamp,
            is_test,
        });
        Ok(())
    }

    fn index(&self, node: NodeId) -> Result<NodeIndex> {
        if node < self.graph.node_count() {
            Ok(NodeIndex::new(node))
        } else {
            Err(Error::InvalidArgument(format!(
                "node id {node} out of range (graph has {} nodes)",
                self.graph.node_count()
            )))
        }
    }

    /// Distinct neighbors of a node, ascending.
    ///
    /// A user who rated the same item twice still sees it once.
    pub fn neighbors(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let idx = self.index(node)?;
        let mut out: Vec<NodeId> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| n.index())
            .collect();
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// Attribute record of a node.
    pub fn attributes(&self, node: NodeId) -> Result<&NodeRecord> {
        let idx = self.index(node)?;
        Ok(&self.graph[idx])
    }

    /// Type of a node.
    pub fn node_type(&self, node: NodeId) -> Result<NodeType> {
        Ok(self.attributes(node)?.node_type())
    }

    /// Endpoints `(src, dst)` of a directed edge.
    pub fn edge_endpoints(&self, edge: usize) -> Result<(NodeId, NodeId)> {
        self.graph
            .edge_endpoints(EdgeIndex::new(edge))
            .map(|(s, d)| (s.index(), d.index()))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "edge id {edge} out of range (graph has {} edges)",
                    self.graph.edge_count()
                ))
            })
    }

    /// All directed edges, in edge id order.
    pub fn all_edges(&self) -> impl Iterator<Item = DirectedEdge> + '_ {
        self.graph.edge_references().map(|e| DirectedEdge {
            src: e.source().index(),
            dst: e.target().index(),
            rating: e.weight().value,
            is_test: e.weight().is_test,
        })
    }

    /// All interactions in insertion order.
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Interactions not flagged as test.
    pub fn train_interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter().filter(|i| !i.is_test)
    }

    /// Interactions flagged as test.
    pub fn test_interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter().filter(|i| i.is_test)
    }

    /// Total number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.graph.node_count() - self.num_users
    }

    /// Number of directed edges (twice the number of interactions).
    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// User ids.
    pub fn users(&self) -> std::ops::Range<NodeId> {
        0..self.num_users
    }

    /// Item ids.
    pub fn items(&self) -> std::ops::Range<NodeId> {
        self.num_users..self.graph.node_count()
    }

    /// Categorical cardinalities observed so far.
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Access the underlying petgraph.
    pub fn as_petgraph(&self) -> &DiGraph<NodeRecord, Rating> {
        &self.graph
    }
}

/// Statistics about a rating graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingGraphStats {
    pub num_users: usize,
    pub num_items: usize,
    pub num_interactions: usize,
    pub num_test: usize,
    pub mean_rating: f64,
    /// Average number of ratings per user.
    pub avg_user_degree: f64,
}

impl RatingGraph {
    /// Compute statistics about the graph.
    pub fn stats(&self) -> RatingGraphStats {
        let num_interactions = self.interactions.len();
        let num_test = self.test_interactions().count();
        let mean_rating = if num_interactions > 0 {
            self.interactions
                .iter()
                .map(|i| f64::from(i.rating))
                .sum::<f64>()
                / num_interactions as f64
        } else {
            0.0
        };
        let avg_user_degree = if self.num_users > 0 {
            num_interactions as f64 / self.num_users as f64
        } else {
            0.0
        };

        RatingGraphStats {
            num_users: self.num_users,
            num_items: self.num_items(),
            num_interactions,
            num_test,
            mean_rating,
            avg_user_degree,
        }
    }
}
