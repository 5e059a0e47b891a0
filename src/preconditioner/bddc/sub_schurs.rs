//! Local Schur-complement minors on interface groups, and the adaptive
//! constraint selection built on them.
//!
//! For a group F of interface dofs of a subdomain the minor is
//! `S = A_FF − A_FI A_II⁻¹ A_IF`, where I is either every interior dof or
//! only the interior dofs within a number of graph layers around F.

use crate::core::traits::SubmatrixExtract;
use crate::error::KError;
use crate::matrix::dense::max_abs;
use crate::preconditioner::bddc::graph::{ComponentClass, InterfaceGraph};
use crate::solver::LuSolver;
use crate::utils::graph::layer_neighbourhood;
use faer::Mat;
use std::collections::HashMap;

/// Interface dofs whose Schur minors are computed together.
#[derive(Clone, Debug, PartialEq)]
pub struct SchurGroup {
    /// Sorted global dofs
    pub dofs: Vec<usize>,
    pub sharing: Vec<usize>,
    /// Components merged into this group
    pub components: Vec<usize>,
}

/// One subdomain's minor on one group.
#[derive(Clone, Debug)]
pub struct LocalSchur {
    pub group: usize,
    /// Local positions of the group dofs, in group order
    pub positions: Vec<usize>,
    pub s: Mat<f64>,
}

/// Groups over the edge and face components. With `merge` every sharing set
/// forms one group.
pub fn schur_groups(graph: &InterfaceGraph, merge: bool) -> Vec<SchurGroup> {
    let mut groups: Vec<SchurGroup> = Vec::new();
    for (ci, c) in graph.components.iter().enumerate() {
        if c.class == ComponentClass::Vertex {
            continue;
        }
        if merge {
            if let Some(g) = groups.iter_mut().find(|g| g.sharing == c.sharing) {
                g.dofs.extend_from_slice(&c.dofs);
                g.dofs.sort_unstable();
                g.components.push(ci);
                continue;
            }
        }
        groups.push(SchurGroup { dofs: c.dofs.clone(), sharing: c.sharing.clone(), components: vec![ci] });
    }
    groups
}

/// Minors of one subdomain on every group it takes part in.
///
/// `interior` lists the local positions eliminated; `layers < 0` eliminates
/// all of them.
pub fn local_schur_minors(
    a: &Mat<f64>,
    l2g: &[usize],
    sub: usize,
    groups: &[SchurGroup],
    interior: &[usize],
    adjacency: &[Vec<usize>],
    layers: i64,
) -> Result<Vec<LocalSchur>, KError> {
    let g2l: HashMap<usize, usize> = l2g.iter().enumerate().map(|(l, &g)| (g, l)).collect();
    let full = if layers < 0 && !interior.is_empty() {
        Some(LuSolver::factor(sub_block(a, interior, interior).as_ref(), "interior block of a Schur minor")?)
    } else {
        None
    };
    let mut allowed = vec![false; l2g.len()];
    for &i in interior {
        allowed[i] = true;
    }
    let mut out = Vec::new();
    for (gi, group) in groups.iter().enumerate() {
        if group.sharing.binary_search(&sub).is_err() {
            continue;
        }
        let positions: Vec<usize> = group
            .dofs
            .iter()
            .map(|g| g2l.get(g).copied().ok_or_else(|| KError::config("Schur group dof missing from a sharing subdomain")))
            .collect::<Result<_, _>>()?;
        let mut s = sub_block(a, &positions, &positions);
        let elim: Vec<usize> = if layers < 0 {
            interior.to_vec()
        } else {
            layer_neighbourhood(adjacency, &positions, &allowed, layers as usize)
        };
        let local_lu = if full.is_none() && !elim.is_empty() {
            Some(LuSolver::factor(sub_block(a, &elim, &elim).as_ref(), "interior block of a Schur minor")?)
        } else {
            None
        };
        if let Some(solver) = full.as_ref().or(local_lu.as_ref()) {
            let mut x = sub_block(a, &elim, &positions);
            solver.solve_mat_in_place(&mut x, false)?;
            let a_fi = sub_block(a, &positions, &elim);
            let corr = a_fi.as_ref() * x.as_ref();
            s = Mat::from_fn(s.nrows(), s.ncols(), |i, j| s[(i, j)] - corr[(i, j)]);
        }
        out.push(LocalSchur { group: gi, positions, s });
    }
    Ok(out)
}

/// Σ_s S_s per group.
pub fn sum_minors(groups: &[SchurGroup], per_sub: &[Vec<LocalSchur>]) -> Vec<Mat<f64>> {
    let mut sums: Vec<Mat<f64>> = groups.iter().map(|g| Mat::zeros(g.dofs.len(), g.dofs.len())).collect();
    for minors in per_sub {
        for m in minors {
            add_into(&mut sums[m.group], &m.s);
        }
    }
    sums
}

pub(crate) fn sub_block(a: &Mat<f64>, rows: &[usize], cols: &[usize]) -> Mat<f64> {
    a.extract_submatrix(rows, cols)
}

fn add_into(acc: &mut Mat<f64>, m: &Mat<f64>) {
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            acc[(i, j)] += m[(i, j)];
        }
    }
}

/// Spectral functions of a symmetric positive semi-definite matrix: returns
/// `B^{1/2}` and the pseudo-inverse of `B^{1/2}`, dropping singular values
/// below `rtol · σ_max`.
fn sqrt_pair(b: &Mat<f64>, rtol: f64) -> Result<(Mat<f64>, Mat<f64>), KError> {
    let n = b.nrows();
    let svd = b.svd().map_err(|_| KError::SolveError("SVD did not converge".into()))?;
    let sigma = svd.S().column_vector();
    let u = svd.U();
    let smax = sigma.iter().copied().fold(0.0f64, f64::max);
    let root: Vec<f64> = sigma.iter().map(|&s| s.max(0.0).sqrt()).collect();
    let inv_root: Vec<f64> = sigma
        .iter()
        .map(|&s| if smax > 0.0 && s > rtol * smax { 1.0 / s.sqrt() } else { 0.0 })
        .collect();
    let half = Mat::from_fn(n, n, |i, j| (0..n).map(|k| u[(i, k)] * root[k] * u[(j, k)]).sum());
    let inv_half = Mat::from_fn(n, n, |i, j| (0..n).map(|k| u[(i, k)] * inv_root[k] * u[(j, k)]).sum());
    Ok((half, inv_half))
}

fn pseudo_inverse(b: &Mat<f64>, rtol: f64) -> Result<Mat<f64>, KError> {
    let (_, inv_half) = sqrt_pair(b, rtol)?;
    Ok(inv_half.as_ref() * inv_half.as_ref())
}

/// Settings of the generalized eigenproblem.
#[derive(Clone, Copy, Debug)]
pub struct AdaptiveParams {
    pub threshold: f64,
    pub nmin: usize,
    pub nmax: usize,
    pub deluxe: bool,
    pub rtol: f64,
}

/// Constraint rows for one group from the generalized eigenproblem
/// `Σ_k (I − D_k)ᵀ S_k (I − D_k) w = λ (S_1 : S_2 : ⋯) w`, where `:` is the
/// parallel sum. Eigenvectors with λ above the threshold (clamped to the
/// requested count range) give the rows `(B w)ᵀ`.
///
/// `minors` are the sharing subdomains' minors in group order.
pub fn adaptive_rows(minors: &[&Mat<f64>], params: &AdaptiveParams) -> Result<Mat<f64>, KError> {
    let m = minors.first().map_or(0, |s| s.nrows());
    if m == 0 {
        return Ok(Mat::zeros(0, 0));
    }
    let mut sum = Mat::<f64>::zeros(m, m);
    let mut inv_sum = Mat::<f64>::zeros(m, m);
    for s in minors {
        add_into(&mut sum, s);
        add_into(&mut inv_sum, &pseudo_inverse(s, params.rtol)?);
    }
    let parallel = pseudo_inverse(&inv_sum, params.rtol)?;
    let weights: Vec<Mat<f64>> = if params.deluxe {
        let lu = LuSolver::factor(sum.as_ref(), "sum of Schur minors")?;
        minors
            .iter()
            .map(|s| {
                let mut d = (*s).clone();
                lu.solve_mat_in_place(&mut d, false)?;
                Ok(d)
            })
            .collect::<Result<_, KError>>()?
    } else {
        let w = 1.0 / minors.len() as f64;
        minors.iter().map(|_| Mat::from_fn(m, m, |i, j| if i == j { w } else { 0.0 })).collect()
    };
    let mut lhs = Mat::<f64>::zeros(m, m);
    for (s, d) in minors.iter().zip(&weights) {
        let e = Mat::from_fn(m, m, |i, j| if i == j { 1.0 } else { 0.0 } - d[(i, j)]);
        let se = s.as_ref() * e.as_ref();
        add_into(&mut lhs, &(e.as_ref().transpose() * se.as_ref()));
    }
    let (half, inv_half) = sqrt_pair(&parallel, params.rtol)?;
    let reduced = inv_half.as_ref() * (lhs.as_ref() * inv_half.as_ref());
    let reduced = Mat::from_fn(m, m, |i, j| 0.5 * (reduced[(i, j)] + reduced[(j, i)]));
    if max_abs(reduced.as_ref()) == 0.0 && params.nmin == 0 {
        return Ok(Mat::zeros(0, m));
    }
    let svd = reduced.svd().map_err(|_| KError::SolveError("SVD did not converge".into()))?;
    let lambda = svd.S().column_vector();
    let w = svd.U();
    let mut k = lambda.iter().filter(|&&l| l > params.threshold).count();
    k = k.max(params.nmin);
    if params.nmax > 0 {
        k = k.min(params.nmax);
    }
    k = k.min(m);
    let dirs = half.as_ref() * w.subcols(0, k);
    Ok(Mat::from_fn(k, m, |i, j| dirs[(j, i)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn laplacian(n: usize) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                2.0
            } else if i.abs_diff(j) == 1 {
                -1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn minor_matches_schur_complement() {
        // eliminate 0 and 1 from a 3-node Laplacian: S = 2 - [0 -1] A_II⁻¹ [0 -1]ᵀ = 4/3
        let a = laplacian(3);
        let groups = vec![SchurGroup { dofs: vec![12], sharing: vec![0, 1], components: vec![0] }];
        let adj = vec![vec![1], vec![0, 2], vec![1]];
        let m = local_schur_minors(&a, &[10, 11, 12], 0, &groups, &[0, 1], &adj, -1).unwrap();
        assert_eq!(m.len(), 1);
        assert_abs_diff_eq!(m[0].s[(0, 0)], 4.0 / 3.0, epsilon = 1e-12);
        // one layer only sees node 1: S = 2 - 1/2
        let m1 = local_schur_minors(&a, &[10, 11, 12], 0, &groups, &[0, 1], &adj, 1).unwrap();
        assert_abs_diff_eq!(m1[0].s[(0, 0)], 1.5, epsilon = 1e-12);
        // a subdomain outside the sharing set has no minor
        assert!(local_schur_minors(&a, &[10, 11, 12], 2, &groups, &[0, 1], &adj, -1).unwrap().is_empty());
    }

    #[test]
    fn adaptive_selection_catches_mismatched_stiffness() {
        // one side is soft in the first direction only
        let s1 = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        let s2 = Mat::from_fn(2, 2, |i, j| match (i, j) {
            (0, 0) => 1e-4,
            (1, 1) => 1.0,
            _ => 0.0,
        });
        // λ ≈ 2500 along the soft direction, λ = 1 along the matched one
        let params = AdaptiveParams { threshold: 2.0, nmin: 0, nmax: 0, deluxe: false, rtol: 1e-12 };
        let rows = adaptive_rows(&[&s1, &s2], &params).unwrap();
        assert_eq!(rows.nrows(), 1);
        assert!(rows[(0, 0)].abs() > 1e3 * rows[(0, 1)].abs());
        let capped = AdaptiveParams { nmin: 2, ..params };
        assert_eq!(adaptive_rows(&[&s1, &s2], &capped).unwrap().nrows(), 2);
    }
}
