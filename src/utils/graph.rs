//! Adjacency-graph utilities used by the interface analysis: breadth-first
//! connected components, k-layer neighbourhoods and the compressed graph
//! format users can supply instead of the matrix pattern.

use crate::error::KError;
use std::collections::VecDeque;

/// Graph in compressed (xadj, adjncy) form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrGraph {
    pub xadj: Vec<usize>,
    pub adjncy: Vec<usize>,
}

impl CsrGraph {
    pub fn new(xadj: Vec<usize>, adjncy: Vec<usize>) -> Result<Self, KError> {
        if xadj.is_empty() || xadj[0] != 0 || xadj[xadj.len() - 1] != adjncy.len() {
            return Err(KError::config("graph offsets must start at 0 and end at the edge count"));
        }
        if xadj.windows(2).any(|w| w[0] > w[1]) {
            return Err(KError::config("graph offsets must be non-decreasing"));
        }
        let n = xadj.len() - 1;
        if let Some(&v) = adjncy.iter().find(|&&v| v >= n) {
            return Err(KError::DimensionMismatch { what: "graph vertex", expected: n, found: v });
        }
        Ok(Self { xadj, adjncy })
    }

    pub fn n_vertices(&self) -> usize {
        self.xadj.len() - 1
    }

    /// Symmetrised adjacency lists without self loops.
    pub fn to_adjacency(&self) -> Vec<Vec<usize>> {
        let n = self.n_vertices();
        let mut adj = vec![Vec::new(); n];
        for i in 0..n {
            for &j in &self.adjncy[self.xadj[i]..self.xadj[i + 1]] {
                if i != j {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }
        for nbrs in adj.iter_mut() {
            nbrs.sort_unstable();
            nbrs.dedup();
        }
        adj
    }
}

/// Connected components of the subgraph induced by `nodes`.
///
/// Components come out sorted internally and ordered by their smallest node.
pub fn components_within(adj: &[Vec<usize>], nodes: &[usize]) -> Vec<Vec<usize>> {
    let mut in_set = vec![false; adj.len()];
    for &v in nodes {
        in_set[v] = true;
    }
    let mut seen = vec![false; adj.len()];
    let mut sorted = nodes.to_vec();
    sorted.sort_unstable();
    let mut comps = Vec::new();
    let mut queue = VecDeque::new();
    for &start in &sorted {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let mut comp = Vec::new();
        while let Some(v) = queue.pop_front() {
            comp.push(v);
            for &w in &adj[v] {
                if in_set[w] && !seen[w] {
                    seen[w] = true;
                    queue.push_back(w);
                }
            }
        }
        comp.sort_unstable();
        comps.push(comp);
    }
    comps
}

/// Connected components of the whole graph.
pub fn connected_components(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let all: Vec<usize> = (0..adj.len()).collect();
    components_within(adj, &all)
}

/// Component label of every node, numbered in the order of
/// `connected_components`.
pub fn component_labels(adj: &[Vec<usize>]) -> (usize, Vec<usize>) {
    let comps = connected_components(adj);
    let mut label = vec![0; adj.len()];
    for (c, comp) in comps.iter().enumerate() {
        for &v in comp {
            label[v] = c;
        }
    }
    (comps.len(), label)
}

/// Nodes of `allowed` reachable from `seeds` in at most `layers` steps while
/// only walking through `allowed`. Seeds are not part of the result.
pub fn layer_neighbourhood(adj: &[Vec<usize>], seeds: &[usize], allowed: &[bool], layers: usize) -> Vec<usize> {
    let mut dist = vec![usize::MAX; adj.len()];
    let mut queue = VecDeque::new();
    for &s in seeds {
        dist[s] = 0;
        queue.push_back(s);
    }
    let mut out = Vec::new();
    while let Some(v) = queue.pop_front() {
        if dist[v] == layers {
            continue;
        }
        for &w in &adj[v] {
            if allowed[w] && dist[w] == usize::MAX {
                dist[w] = dist[v] + 1;
                out.push(w);
                queue.push_back(w);
            }
        }
    }
    out.sort_unstable();
    out
}

/// Groups node indices by label: blocks[l] = nodes with label l.
pub fn blocks_from_labels(labels: &[usize]) -> Vec<Vec<usize>> {
    let n_blocks = labels.iter().copied().max().map(|c| c + 1).unwrap_or(0);
    let mut blocks = vec![Vec::new(); n_blocks];
    for (i, &c) in labels.iter().enumerate() {
        blocks[c].push(i);
    }
    blocks
}
