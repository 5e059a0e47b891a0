//! Primal space: constraint rows per interface component and their global
//! (coarse) numbering.

use crate::config::BddcConfig;
use crate::error::KError;
use crate::matrix::dense::{numerical_rank, orthonormal_completion, orthonormal_rows};
use crate::preconditioner::bddc::change::DenseBlock;
use crate::preconditioner::bddc::graph::{ComponentClass, InterfaceGraph};
use faer::Mat;
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimalOrigin {
    Component(usize),
    /// Benign pressure piece
    Benign(usize),
}

#[derive(Clone, Debug)]
pub struct PrimalBlock {
    pub origin: PrimalOrigin,
    pub dofs: Vec<usize>,
    /// k × dofs.len(); one row per primal unknown
    pub rows: Mat<f64>,
    pub first_primal: usize,
    /// Every row is a unit vector on its own dof
    pub unit: bool,
}

impl PrimalBlock {
    pub fn n_rows(&self) -> usize {
        self.rows.nrows()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PrimalSpace {
    pub blocks: Vec<PrimalBlock>,
    pub n_primal: usize,
    pub n_vertices: usize,
    pub n_edges: usize,
    pub n_faces: usize,
    pub n_benign: usize,
}

/// Extra rows computed by the adaptive selection, per component.
pub type AdaptiveRows = Vec<Option<Mat<f64>>>;

impl PrimalSpace {
    /// `nnsp` must already be expressed in the basis the constraints act on.
    pub fn build(
        graph: &InterfaceGraph,
        cfg: &BddcConfig,
        nnsp: Option<&[Vec<f64>]>,
        adaptive: Option<&AdaptiveRows>,
        benign_dofs: &[usize],
    ) -> Result<Self, KError> {
        let opts = &cfg.opts;
        let mut space = PrimalSpace::default();
        let mut next = 0usize;
        for (ci, comp) in graph.components.iter().enumerate() {
            let m = comp.dofs.len();
            let wanted = match comp.class {
                ComponentClass::Vertex => opts.use_vertices,
                ComponentClass::Edge => opts.use_edges,
                ComponentClass::Face => cfg.use_faces,
            };
            if !wanted {
                continue;
            }
            let (rows, unit) = if comp.class == ComponentClass::Vertex {
                (Mat::<f64>::identity(m, m), true)
            } else {
                let raw = match adaptive.and_then(|a| a[ci].as_ref()) {
                    Some(sel) if opts.adaptive_userdefined => stack(sel, &nnsp_rows(&comp.dofs, nnsp)),
                    Some(sel) => sel.clone(),
                    None => nnsp_rows(&comp.dofs, nnsp),
                };
                (reduce_rows(raw, opts.use_qr_single, opts.use_nnsp_true, opts.svd_tolerance)?, false)
            };
            let k = rows.nrows();
            if k == 0 {
                continue;
            }
            match comp.class {
                ComponentClass::Vertex => space.n_vertices += k,
                ComponentClass::Edge => space.n_edges += k,
                ComponentClass::Face => space.n_faces += k,
            }
            space.blocks.push(PrimalBlock {
                origin: PrimalOrigin::Component(ci),
                dofs: comp.dofs.clone(),
                rows,
                first_primal: next,
                unit,
            });
            next += k;
        }
        for (piece, &g) in benign_dofs.iter().enumerate() {
            space.blocks.push(PrimalBlock {
                origin: PrimalOrigin::Benign(piece),
                dofs: vec![g],
                rows: Mat::<f64>::identity(1, 1),
                first_primal: next,
                unit: true,
            });
            next += 1;
        }
        space.n_benign = benign_dofs.len();
        space.n_primal = next;
        debug!(
            n_primal = space.n_primal,
            vertices = space.n_vertices,
            edges = space.n_edges,
            faces = space.n_faces,
            benign = space.n_benign,
            "primal space"
        );
        Ok(space)
    }

    /// Replaces every eligible multi-row component by an orthogonal change
    /// of basis making its constraints single dofs. Returns the blocks of
    /// the change.
    pub fn make_unit(&mut self, graph: &InterfaceGraph, cfg: &BddcConfig) -> Result<Vec<DenseBlock>, KError> {
        let mut changes = Vec::new();
        for block in self.blocks.iter_mut() {
            let ci = match block.origin {
                PrimalOrigin::Component(ci) => ci,
                PrimalOrigin::Benign(_) => continue,
            };
            let eligible = match graph.components[ci].class {
                ComponentClass::Edge => true,
                ComponentClass::Face => cfg.use_change_on_faces,
                ComponentClass::Vertex => false,
            };
            let m = block.dofs.len();
            if !eligible || block.unit || m < 2 {
                continue;
            }
            let ortho = orthonormal_rows(block.rows.as_ref(), cfg.opts.svd_tolerance)?;
            let k = ortho.nrows();
            if k == 0 {
                continue;
            }
            let q = orthonormal_completion(ortho.as_ref().transpose())?;
            block.rows = Mat::from_fn(k, m, |i, j| if i == j { 1.0 } else { 0.0 });
            block.unit = true;
            changes.push(DenseBlock { dofs: block.dofs.clone(), q });
        }
        Ok(changes)
    }

    /// Constraint matrix (n_c × n_local) of one subdomain and the global
    /// primal index of each of its rows.
    pub fn local_constraints(&self, l2g: &[usize]) -> (Mat<f64>, Vec<usize>) {
        let g2l: HashMap<usize, usize> = l2g.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        let mine: Vec<&PrimalBlock> = self.blocks.iter().filter(|b| g2l.contains_key(&b.dofs[0])).collect();
        let n_c: usize = mine.iter().map(|b| b.n_rows()).sum();
        let mut c = Mat::<f64>::zeros(n_c, l2g.len());
        let mut primal_l2g = Vec::with_capacity(n_c);
        let mut r = 0;
        for b in mine {
            for i in 0..b.n_rows() {
                for (j, g) in b.dofs.iter().enumerate() {
                    if let Some(&l) = g2l.get(g) {
                        c[(r, l)] = b.rows[(i, j)];
                    }
                }
                primal_l2g.push(b.first_primal + i);
                r += 1;
            }
        }
        (c, primal_l2g)
    }

    /// Primal values of global vectors: v_c[p] = row_p · v[dofs].
    pub fn primal_values(&self, vectors: &[Vec<f64>]) -> Vec<Vec<f64>> {
        vectors
            .iter()
            .map(|v| {
                let mut vc = vec![0.0; self.n_primal];
                for b in &self.blocks {
                    for i in 0..b.n_rows() {
                        vc[b.first_primal + i] = b.dofs.iter().enumerate().map(|(j, &g)| b.rows[(i, j)] * v[g]).sum();
                    }
                }
                vc
            })
            .collect()
    }

    /// Primal index of each benign piece.
    pub fn benign_primals(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .filter(|b| matches!(b.origin, PrimalOrigin::Benign(_)))
            .map(|b| b.first_primal)
            .collect()
    }
}

/// Near-null-space vectors restricted to `dofs`, or the constant when none
/// is attached.
fn nnsp_rows(dofs: &[usize], nnsp: Option<&[Vec<f64>]>) -> Mat<f64> {
    match nnsp {
        Some(vs) if !vs.is_empty() => Mat::from_fn(vs.len(), dofs.len(), |i, j| vs[i][dofs[j]]),
        _ => Mat::from_fn(1, dofs.len(), |_, _| 1.0),
    }
}

fn stack(a: &Mat<f64>, b: &Mat<f64>) -> Mat<f64> {
    let (ka, m) = (a.nrows(), a.ncols());
    Mat::from_fn(ka + b.nrows(), m, |i, j| if i < ka { a[(i, j)] } else { b[(i - ka, j)] })
}

fn reduce_rows(raw: Mat<f64>, qr_single: bool, keep_raw: bool, tol: f64) -> Result<Mat<f64>, KError> {
    let m = raw.ncols();
    if raw.nrows() == 1 && !qr_single {
        let norm = (0..m).map(|j| raw[(0, j)] * raw[(0, j)]).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Ok(Mat::zeros(0, m));
        }
        return Ok(Mat::from_fn(1, m, |_, j| raw[(0, j)] / norm));
    }
    if keep_raw {
        // greedily keep the rows that raise the rank
        let mut kept: Vec<usize> = Vec::new();
        let mut rank = 0;
        for i in 0..raw.nrows() {
            let mut trial = kept.clone();
            trial.push(i);
            let sub = Mat::from_fn(trial.len(), m, |r, j| raw[(trial[r], j)]);
            let r = numerical_rank(sub.as_ref(), tol)?;
            if r > rank {
                rank = r;
                kept = trial;
            }
        }
        return Ok(Mat::from_fn(kept.len(), m, |r, j| raw[(kept[r], j)]));
    }
    orthonormal_rows(raw.as_ref(), tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BddcOptions;
    use crate::preconditioner::bddc::graph::GraphInput;

    // two subdomains sharing the edge {2, 3, 4} and nothing else
    fn edge_graph() -> InterfaceGraph {
        let a: Vec<usize> = vec![0, 1, 2, 3, 4];
        let b: Vec<usize> = vec![2, 3, 4, 5, 6];
        let fields = vec![0; 7];
        InterfaceGraph::analyze(&GraphInput {
            n_global: 7,
            l2g: vec![&a, &b],
            adjacency: None,
            fields: &fields,
            dirichlet: &[],
            neumann: &[],
            primal_vertices: &[],
            vertex_size: 1,
            graph_max_count: usize::MAX,
        })
    }

    #[test]
    fn constant_constraint_without_nnsp() {
        let g = edge_graph();
        let cfg = BddcConfig::from_options(&BddcOptions::default(), 0).unwrap();
        let p = PrimalSpace::build(&g, &cfg, None, None, &[]).unwrap();
        assert_eq!(p.n_primal, 1);
        assert_eq!(p.n_edges, 1);
        let (c, l2g) = p.local_constraints(&[2, 3, 4, 5, 6]);
        assert_eq!(l2g, vec![0]);
        let s = 1.0 / 3.0f64.sqrt();
        for j in 0..3 {
            approx::assert_abs_diff_eq!(c[(0, j)], s, epsilon = 1e-14);
        }
        assert_eq!(c[(0, 3)], 0.0);
    }

    #[test]
    fn dependent_nnsp_rows_are_dropped_and_made_unit() {
        let g = edge_graph();
        let mut opts = BddcOptions::default();
        opts.use_change_of_basis = true;
        let cfg = BddcConfig::from_options(&opts, 0).unwrap();
        let ones = vec![1.0; 7];
        let twos = vec![2.0; 7];
        let lin: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let nnsp = vec![ones, twos, lin];
        let mut p = PrimalSpace::build(&g, &cfg, Some(&nnsp), None, &[0]).unwrap();
        assert_eq!(p.n_edges, 2);
        assert_eq!(p.n_primal, 3);
        assert_eq!(p.benign_primals(), vec![2]);
        let changes = p.make_unit(&g, &cfg).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(p.blocks[0].unit);
        assert_eq!(p.blocks[0].rows[(1, 1)], 1.0);
        let vc = p.primal_values(&[vec![1.0; 7]]);
        assert_eq!(vc[0], vec![1.0, 1.0, 1.0]);
    }
}
