//! # Connected Subgraph Enumeration
//!
//! Enumerates every pair of disjoint, connected node subsets `(S1, S2)` such that some
//! hyperedge connects them (a csg-cmp pair), in an order where both halves have been
//! reported before their union. This is the DPhyp algorithm of Moerkotte and Neumann,
//! generalized to hyperedges.
//!
//! Seeds are visited in descending index order. Starting from a seed, a subgraph grows
//! only through its *neighborhood*: nodes reachable through a simple edge, plus the
//! lowest node of the far side of each hyperedge whose near side is already inside the
//! subgraph. Nodes with a lower index than the seed are forbidden, so each connected
//! subgraph is produced from exactly one seed.
//!
//! The enumerator owns no plans; it reports what it finds to a [`SubgraphReceiver`],
//! which decides what "seen" means and may abort the enumeration at any point.

use crate::bitset::{
    bits_set_in, find_lowest_bit_set, is_single_bit_set, is_subset, isolate_lowest_bit,
    nonzero_subsets_of, overlaps, table_bitmap, tables_between, NodeMap,
};
use crate::graph::JoinGraph;

/// Callbacks from the enumerator. Each `found_*` method returns `true` to abort.
pub trait SubgraphReceiver {
    /// Whether `subgraph` was reported before and is therefore connected.
    fn has_seen(&self, subgraph: NodeMap) -> bool;
    fn found_single_node(&mut self, node_idx: usize) -> bool;
    /// `left` and `right` are disjoint and connected by join edge `edge_idx`.
    fn found_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, edge_idx: usize) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hyperedge {
    pub left: NodeMap,
    pub right: NodeMap,
}

#[derive(Debug, Clone, Default)]
struct HypergraphNode {
    /// Nodes reachable through simple (one node to one node) edges.
    simple_neighborhood: NodeMap,
    simple_edges: Vec<usize>,
    complex_edges: Vec<usize>,
}

/// Each join edge is stored twice, once per direction: hyperedge `2i` is
/// `left -> right` of join edge `i` and `2i + 1` is the reverse.
#[derive(Debug, Clone, Default)]
pub struct Hypergraph {
    nodes: Vec<HypergraphNode>,
    edges: Vec<Hyperedge>,
}

impl Hypergraph {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            nodes: vec![HypergraphNode::default(); num_nodes],
            edges: Vec::new(),
        }
    }

    pub fn from_join_graph(graph: &JoinGraph) -> Self {
        let mut hypergraph = Self::new(graph.nodes.len());
        for edge in &graph.edges {
            hypergraph.add_edge(edge.left, edge.right);
        }
        hypergraph
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_edge(&mut self, left: NodeMap, right: NodeMap) {
        for (from, to) in [(left, right), (right, left)] {
            let edge_idx = self.edges.len();
            self.edges.push(Hyperedge {
                left: from,
                right: to,
            });
            if is_single_bit_set(from) && is_single_bit_set(to) {
                let node = &mut self.nodes[find_lowest_bit_set(from)];
                node.simple_neighborhood |= to;
                node.simple_edges.push(edge_idx);
            } else {
                for node_idx in bits_set_in(from) {
                    self.nodes[node_idx].complex_edges.push(edge_idx);
                }
            }
        }
    }

    /// Nodes that `subgraph` can grow by, excluding `forbidden` and the subgraph itself.
    fn neighborhood(&self, subgraph: NodeMap, forbidden: NodeMap) -> NodeMap {
        let excluded = forbidden | subgraph;
        let mut neighborhood = 0;
        for node_idx in bits_set_in(subgraph) {
            let node = &self.nodes[node_idx];
            neighborhood |= node.simple_neighborhood;
            for &edge_idx in &node.complex_edges {
                let edge = self.edges[edge_idx];
                if is_subset(edge.left, subgraph) && !overlaps(edge.right, excluded) {
                    neighborhood |= isolate_lowest_bit(edge.right);
                }
            }
        }
        neighborhood & !excluded
    }
}

/// Counts connected subgraphs, single nodes included, giving up as soon as the count
/// passes `limit`. Only defined when every edge is simple: with a hyperedge, growing
/// through the neighborhood also reaches sets that are not connected, and `None` is
/// returned.
///
/// This visits each connected subgraph once and never enumerates complements, so it
/// is far cheaper than a full run that ends up over the same limit.
pub fn count_connected_subgraphs(graph: &Hypergraph, limit: usize) -> Option<usize> {
    if graph.nodes.iter().any(|node| !node.complex_edges.is_empty()) {
        return None;
    }
    let mut count = 0;
    for seed_idx in (0..graph.num_nodes()).rev() {
        count += 1;
        if count > limit {
            break;
        }
        let seed = table_bitmap(seed_idx);
        let forbidden = tables_between(0, seed_idx) | seed;
        let neighborhood = graph.neighborhood(seed, forbidden);
        if count_grown_subgraphs(graph, seed, neighborhood, forbidden, limit, &mut count) {
            break;
        }
    }
    Some(count)
}

/// Returns `true` once `count` has passed `limit`.
fn count_grown_subgraphs(
    graph: &Hypergraph,
    subgraph: NodeMap,
    neighborhood: NodeMap,
    forbidden: NodeMap,
    limit: usize,
    count: &mut usize,
) -> bool {
    if neighborhood == 0 {
        return false;
    }
    *count += (1usize << neighborhood.count_ones()) - 1;
    if *count > limit {
        return true;
    }
    let new_forbidden = forbidden | neighborhood;
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown = subgraph | grow_by;
        let new_neighborhood = graph.neighborhood(grown, new_forbidden);
        if count_grown_subgraphs(graph, grown, new_neighborhood, new_forbidden, limit, count) {
            return true;
        }
    }
    false
}

/// Runs the enumeration; returns `true` if the receiver aborted it.
pub fn enumerate_all_connected_partitions(graph: &Hypergraph, receiver: &mut impl SubgraphReceiver) -> bool {
    for seed_idx in (0..graph.num_nodes()).rev() {
        if receiver.found_single_node(seed_idx) {
            return true;
        }
        let seed = table_bitmap(seed_idx);
        let forbidden = tables_between(0, seed_idx);
        let neighborhood = graph.neighborhood(seed, forbidden);
        if enumerate_complements_to(graph, seed_idx, seed, neighborhood, receiver) {
            return true;
        }
        if expand_subgraph(graph, seed_idx, seed, neighborhood, forbidden | seed, receiver) {
            return true;
        }
    }
    false
}

fn expand_subgraph(
    graph: &Hypergraph,
    lowest_node_idx: usize,
    subgraph: NodeMap,
    neighborhood: NodeMap,
    forbidden: NodeMap,
    receiver: &mut impl SubgraphReceiver,
) -> bool {
    // Every grown subgraph that is connected gets its complements.
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown = subgraph | grow_by;
        if receiver.has_seen(grown) {
            let new_neighborhood = graph.neighborhood(grown, forbidden | grown);
            if enumerate_complements_to(graph, lowest_node_idx, grown, new_neighborhood, receiver) {
                return true;
            }
        }
    }

    // Then grow further. Connectivity may only come with more nodes (hyperedges),
    // so unseen subgraphs are expanded too.
    let new_forbidden = forbidden | subgraph | neighborhood;
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown = subgraph | grow_by;
        let new_neighborhood = graph.neighborhood(grown, new_forbidden);
        if expand_subgraph(graph, lowest_node_idx, grown, new_neighborhood, new_forbidden, receiver) {
            return true;
        }
    }
    false
}

fn enumerate_complements_to(
    graph: &Hypergraph,
    lowest_node_idx: usize,
    subgraph: NodeMap,
    neighborhood: NodeMap,
    receiver: &mut impl SubgraphReceiver,
) -> bool {
    let forbidden = tables_between(0, lowest_node_idx);
    let neighborhood = neighborhood & !subgraph;

    for seed_idx in bits_set_in(neighborhood).rev() {
        let seed = table_bitmap(seed_idx);
        if try_connecting(graph, subgraph, seed, receiver) {
            return true;
        }
        let new_forbidden = forbidden | subgraph | (neighborhood & tables_between(0, seed_idx));
        let new_neighborhood = graph.neighborhood(seed, new_forbidden);
        if expand_complement(graph, subgraph, seed, new_neighborhood, new_forbidden, receiver) {
            return true;
        }
    }
    false
}

fn expand_complement(
    graph: &Hypergraph,
    subgraph: NodeMap,
    complement: NodeMap,
    neighborhood: NodeMap,
    forbidden: NodeMap,
    receiver: &mut impl SubgraphReceiver,
) -> bool {
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown = complement | grow_by;
        if receiver.has_seen(grown) && try_connecting(graph, subgraph, grown, receiver) {
            return true;
        }
    }

    let new_forbidden = forbidden | neighborhood;
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown = complement | grow_by;
        let new_neighborhood = graph.neighborhood(grown, new_forbidden | grown);
        if expand_complement(graph, subgraph, grown, new_neighborhood, new_forbidden, receiver) {
            return true;
        }
    }
    false
}

/// Reports `(subgraph, complement)` once for every edge that connects them.
fn try_connecting(
    graph: &Hypergraph,
    subgraph: NodeMap,
    complement: NodeMap,
    receiver: &mut impl SubgraphReceiver,
) -> bool {
    for node_idx in bits_set_in(complement) {
        let node = &graph.nodes[node_idx];
        if overlaps(node.simple_neighborhood, subgraph) {
            for &edge_idx in &node.simple_edges {
                let edge = graph.edges[edge_idx];
                if overlaps(edge.right, subgraph)
                    && receiver.found_subgraph_pair(subgraph, complement, edge_idx / 2)
                {
                    return true;
                }
            }
        }
        let node_bit = table_bitmap(node_idx);
        for &edge_idx in &node.complex_edges {
            let edge = graph.edges[edge_idx];
            // Complex edges are listed under every node of their near side; report once.
            if isolate_lowest_bit(edge.left) == node_bit
                && is_subset(edge.left, complement)
                && is_subset(edge.right, subgraph)
                && receiver.found_subgraph_pair(subgraph, complement, edge_idx / 2)
            {
                return true;
            }
        }
    }
    false
}
