//! Dependency ordering for the sorted section.
//!
//! Intermediate variables form a directed graph where an edge `a -> b` means
//! `b`'s computation reads `a`. A valid evaluation order computes every
//! variable after all of its inputs. The order is computed once per model
//! definition and reused for every evaluation.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::errors::{RcsimError, RcsimResult};

/// Topologically order the intermediate variables of a model.
///
/// `names` lists the intermediates in declaration order and `reads[i]` the
/// free variables of the `i`-th assignment. Reads that are not themselves
/// intermediates (constants, state variables, time) carry no ordering
/// constraint and are ignored here.
///
/// Kahn's algorithm with a declaration-order tie-break keeps the output
/// deterministic for independent variables. A cycle is a modelling error and
/// fails with the participating variable names.
pub fn sort_dependencies(names: &[String], reads: &[Vec<String>]) -> RcsimResult<Vec<usize>> {
    debug_assert_eq!(names.len(), reads.len());

    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..names.len()).map(|i| graph.add_node(i)).collect();
    let position: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    for (i, read_names) in reads.iter().enumerate() {
        let mut seen: HashSet<usize> = HashSet::new();
        for read in read_names {
            if let Some(&j) = position.get(read.as_str()) {
                // Repeated reads of the same variable add a single edge so
                // in-degrees stay consistent with the neighbour walk below.
                if seen.insert(j) {
                    graph.add_edge(nodes[j], nodes[i], ());
                }
            }
        }
    }

    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(names.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for neighbour in graph.neighbors_directed(nodes[next], Direction::Outgoing) {
            let i = graph[neighbour];
            in_degree[i] -= 1;
            if in_degree[i] == 0 {
                ready.insert(i);
            }
        }
    }

    if order.len() < names.len() {
        let sorted: HashSet<usize> = order.into_iter().collect();
        let variables = names
            .iter()
            .enumerate()
            .filter(|(i, _)| !sorted.contains(i))
            .map(|(_, name)| name.clone())
            .collect();
        return Err(RcsimError::Dependency { variables });
    }

    Ok(order)
}
