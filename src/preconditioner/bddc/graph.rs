//! Interface analysis: sharing sets, connected components and their
//! vertex/edge/face classification.
//!
//! Every subdomain first splits its own interface dofs into components,
//! grouping dofs with the same sharing set, field and Neumann flag and
//! walking its local adjacency inside each group. The local views are then
//! reconciled: for every group the view of the lowest-ranked sharing
//! subdomain is canonical and the others adopt it. Disagreement between
//! views is expected (each rank only sees its own adjacency) and is never
//! an error.

use crate::utils::graph::components_within;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentClass {
    Vertex,
    Edge,
    Face,
}

impl fmt::Display for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentClass::Vertex => "vertex",
            ComponentClass::Edge => "edge",
            ComponentClass::Face => "face",
        };
        f.write_str(s)
    }
}

/// Classification of one local dof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DofTag {
    Interior,
    Dirichlet,
    /// Neumann boundary dof owned by this subdomain alone
    Neumann,
    Vertex,
    Edge,
    Face,
    /// Shared, but in no component (multiplicity above the graph cap)
    Unconstrained,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub class: ComponentClass,
    /// Sorted ranks of the subdomains sharing every dof of the component
    pub sharing: Vec<usize>,
    /// Sorted global dofs
    pub dofs: Vec<usize>,
    pub field: usize,
}

/// What the analysis needs to know about the decomposition.
pub struct GraphInput<'a> {
    pub n_global: usize,
    pub l2g: Vec<&'a [usize]>,
    /// Local adjacency per subdomain; `None` makes every sharing group a
    /// single component.
    pub adjacency: Option<Vec<Vec<Vec<usize>>>>,
    /// Field of every global dof
    pub fields: &'a [usize],
    pub dirichlet: &'a [usize],
    pub neumann: &'a [usize],
    pub primal_vertices: &'a [usize],
    pub vertex_size: usize,
    pub graph_max_count: usize,
}

#[derive(Clone, Debug)]
pub struct InterfaceGraph {
    pub n_global: usize,
    pub multiplicity: Vec<usize>,
    /// Sorted sharing ranks of every global dof
    pub sharing: Vec<Vec<usize>>,
    pub dirichlet: Vec<usize>,
    pub neumann: Vec<usize>,
    pub components: Vec<Component>,
    /// Component of every global dof
    pub comp_of: Vec<Option<usize>>,
    /// No component larger than a vertex is shared by more than two subdomains
    pub twodim: bool,
    /// Local components that differed from the canonical split
    pub disagreements: usize,
}

type GroupKey = (Vec<usize>, usize, bool);

impl InterfaceGraph {
    pub fn analyze(input: &GraphInput<'_>) -> Self {
        let n = input.n_global;
        let mut sharing = vec![Vec::new(); n];
        for (rank, l2g) in input.l2g.iter().enumerate() {
            for &g in l2g.iter() {
                sharing[g].push(rank);
            }
        }
        // ranks were pushed in increasing order
        let multiplicity: Vec<usize> = sharing.iter().map(|s| s.len()).collect();

        let mut is_dirichlet = vec![false; n];
        for &g in input.dirichlet {
            is_dirichlet[g] = true;
        }
        let mut is_neumann = vec![false; n];
        for &g in input.neumann {
            is_neumann[g] = true;
        }
        let mut is_user_vertex = vec![false; n];
        for &g in input.primal_vertices {
            if is_dirichlet[g] {
                continue;
            }
            if multiplicity[g] < 2 {
                warn!(dof = g, "primal vertex is not on the interface; ignored");
                continue;
            }
            is_user_vertex[g] = true;
        }

        // local views: (group key, global dofs) per rank
        let mut views: Vec<Vec<(GroupKey, Vec<usize>)>> = Vec::with_capacity(input.l2g.len());
        for (rank, l2g) in input.l2g.iter().enumerate() {
            let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
            for (l, &g) in l2g.iter().enumerate() {
                let m = multiplicity[g];
                if m < 2 || m > input.graph_max_count || is_dirichlet[g] || is_user_vertex[g] {
                    continue;
                }
                groups
                    .entry((sharing[g].clone(), input.fields[g], is_neumann[g]))
                    .or_default()
                    .push(l);
            }
            let mut local = Vec::new();
            for (key, nodes) in groups {
                let pieces = match &input.adjacency {
                    Some(adj) => components_within(&adj[rank], &nodes),
                    None => vec![nodes],
                };
                for piece in pieces {
                    let mut dofs: Vec<usize> = piece.iter().map(|&l| l2g[l]).collect();
                    dofs.sort_unstable();
                    local.push((key.clone(), dofs));
                }
            }
            views.push(local);
        }

        // lowest rank wins
        let mut components = Vec::new();
        let mut disagreements = 0;
        for (rank, view) in views.iter().enumerate() {
            for (key, dofs) in view {
                if key.0[0] == rank {
                    components.push(Component {
                        class: ComponentClass::Face,
                        sharing: key.0.clone(),
                        dofs: dofs.clone(),
                        field: key.1,
                    });
                }
            }
        }
        for (rank, view) in views.iter().enumerate() {
            for (key, dofs) in view {
                if key.0[0] != rank && !components.iter().any(|c| &c.dofs == dofs) {
                    disagreements += 1;
                }
            }
        }
        if disagreements > 0 {
            debug!(disagreements, "local interface splits overridden by the lowest sharing rank");
        }
        let n_split = components.len();
        for g in (0..n).filter(|&g| is_user_vertex[g]) {
            components.push(Component {
                class: ComponentClass::Vertex,
                sharing: sharing[g].clone(),
                dofs: vec![g],
                field: input.fields[g],
            });
        }
        let mut user_flag: Vec<bool> = (0..components.len()).map(|i| i >= n_split).collect();
        let mut order: Vec<usize> = (0..components.len()).collect();
        order.sort_by_key(|&i| components[i].dofs[0]);
        components = order.iter().map(|&i| components[i].clone()).collect();
        user_flag = order.iter().map(|&i| user_flag[i]).collect();

        let twodim = components
            .iter()
            .zip(&user_flag)
            .all(|(c, &user)| user || c.dofs.len() <= input.vertex_size || c.sharing.len() <= 2);
        for (c, &user) in components.iter_mut().zip(&user_flag) {
            c.class = if user || c.dofs.len() <= input.vertex_size {
                ComponentClass::Vertex
            } else if c.sharing.len() == 2 {
                if twodim { ComponentClass::Edge } else { ComponentClass::Face }
            } else {
                ComponentClass::Edge
            };
        }

        let mut comp_of = vec![None; n];
        for (ci, c) in components.iter().enumerate() {
            for &g in &c.dofs {
                comp_of[g] = Some(ci);
            }
        }
        let mut dirichlet: Vec<usize> = input.dirichlet.to_vec();
        dirichlet.sort_unstable();
        dirichlet.dedup();
        let mut neumann: Vec<usize> = input.neumann.to_vec();
        neumann.sort_unstable();
        neumann.dedup();

        let graph = Self {
            n_global: n,
            multiplicity,
            sharing,
            dirichlet,
            neumann,
            components,
            comp_of,
            twodim,
            disagreements,
        };
        debug!(
            vertices = graph.count(ComponentClass::Vertex),
            edges = graph.count(ComponentClass::Edge),
            faces = graph.count(ComponentClass::Face),
            twodim,
            "interface analysed"
        );
        graph
    }

    pub fn count(&self, class: ComponentClass) -> usize {
        self.components.iter().filter(|c| c.class == class).count()
    }

    /// Per-dof tags in the local numbering of one subdomain.
    pub fn local_tags(&self, l2g: &[usize]) -> Vec<DofTag> {
        let dir = self.global_mask(&self.dirichlet);
        let neu = self.global_mask(&self.neumann);
        l2g.iter()
            .map(|&g| {
                if dir[g] {
                    DofTag::Dirichlet
                } else if let Some(c) = self.comp_of[g] {
                    match self.components[c].class {
                        ComponentClass::Vertex => DofTag::Vertex,
                        ComponentClass::Edge => DofTag::Edge,
                        ComponentClass::Face => DofTag::Face,
                    }
                } else if self.multiplicity[g] > 1 {
                    DofTag::Unconstrained
                } else if neu[g] {
                    DofTag::Neumann
                } else {
                    DofTag::Interior
                }
            })
            .collect()
    }

    fn global_mask(&self, set: &[usize]) -> Vec<bool> {
        let mut mask = vec![false; self.n_global];
        for &g in set {
            mask[g] = true;
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_adj(n: usize) -> Vec<Vec<usize>> {
        (0..n)
            .map(|i| {
                let mut v = Vec::new();
                if i > 0 {
                    v.push(i - 1);
                }
                if i + 1 < n {
                    v.push(i + 1);
                }
                v
            })
            .collect()
    }

    #[test]
    fn chain_has_one_shared_vertex() {
        let (a, b) = (vec![0, 1, 2], vec![2, 3, 4]);
        let fields = vec![0; 5];
        let input = GraphInput {
            n_global: 5,
            l2g: vec![&a, &b],
            adjacency: Some(vec![path_adj(3), path_adj(3)]),
            fields: &fields,
            dirichlet: &[],
            neumann: &[],
            primal_vertices: &[],
            vertex_size: 1,
            graph_max_count: usize::MAX,
        };
        let g = InterfaceGraph::analyze(&input);
        assert_eq!(g.components.len(), 1);
        assert_eq!(g.components[0].class, ComponentClass::Vertex);
        assert_eq!(g.components[0].sharing, vec![0, 1]);
        assert_eq!(g.local_tags(&a), vec![DofTag::Interior, DofTag::Interior, DofTag::Vertex]);
        assert!(g.twodim);
    }

    #[test]
    fn lowest_rank_split_wins() {
        // dofs 0..3 shared by both ranks; rank 0 sees them connected, rank 1
        // sees a gap between 1 and 2
        let (a, b) = (vec![0, 1, 2, 3], vec![0, 1, 2, 3]);
        let fields = vec![0; 4];
        let mut gap = path_adj(4);
        gap[1].retain(|&j| j != 2);
        gap[2].retain(|&j| j != 1);
        let input = GraphInput {
            n_global: 4,
            l2g: vec![&a, &b],
            adjacency: Some(vec![path_adj(4), gap]),
            fields: &fields,
            dirichlet: &[],
            neumann: &[],
            primal_vertices: &[],
            vertex_size: 1,
            graph_max_count: usize::MAX,
        };
        let g = InterfaceGraph::analyze(&input);
        assert_eq!(g.components.len(), 1);
        assert_eq!(g.components[0].dofs, vec![0, 1, 2, 3]);
        assert_eq!(g.components[0].class, ComponentClass::Edge);
        assert_eq!(g.disagreements, 2);
    }

    #[test]
    fn dirichlet_and_user_vertices() {
        let (a, b) = (vec![0, 1, 2, 3], vec![1, 2, 3, 4]);
        let fields = vec![0; 5];
        let input = GraphInput {
            n_global: 5,
            l2g: vec![&a, &b],
            adjacency: None,
            fields: &fields,
            dirichlet: &[1],
            neumann: &[],
            primal_vertices: &[3, 0],
            vertex_size: 1,
            graph_max_count: usize::MAX,
        };
        let g = InterfaceGraph::analyze(&input);
        let dofs: Vec<_> = g.components.iter().map(|c| (c.dofs.clone(), c.class)).collect();
        assert_eq!(dofs, vec![(vec![2], ComponentClass::Vertex), (vec![3], ComponentClass::Vertex)]);
        assert_eq!(g.local_tags(&a)[1], DofTag::Dirichlet);
    }
}
