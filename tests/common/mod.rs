//! Subassembled model problems shared by the integration tests.
//!
//! Every generator assembles element matrices subdomain by subdomain, so the
//! local blocks are the true Neumann matrices of the subdomains.

#![allow(dead_code)]

use faer::Mat;
use kryst_bddc::matrix::{CsrMatrix, IsMatrix, LocalBlock};
use kryst_bddc::solver::LuSolver;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Element matrix acting on global dofs; `None` marks an eliminated
/// (Dirichlet) dof.
pub struct Element {
    pub dofs: Vec<Option<usize>>,
    pub k: Vec<Vec<f64>>,
}

/// Sums the elements of every subdomain into its local block.
pub fn subassemble(n_global: usize, subs: Vec<Vec<Element>>) -> IsMatrix {
    let blocks = subs
        .into_iter()
        .map(|elems| {
            let mut l2g: Vec<usize> = elems.iter().flat_map(|e| e.dofs.iter().flatten().copied()).collect();
            l2g.sort_unstable();
            l2g.dedup();
            let local = |g: usize| l2g.binary_search(&g).unwrap();
            let mut trips = Vec::new();
            for e in &elems {
                for (a, ga) in e.dofs.iter().enumerate() {
                    for (b, gb) in e.dofs.iter().enumerate() {
                        if let (Some(ga), Some(gb)) = (ga, gb) {
                            trips.push((local(*ga), local(*gb), e.k[a][b]));
                        }
                    }
                }
            }
            let mat = CsrMatrix::from_triplets(l2g.len(), l2g.len(), &trips).unwrap();
            LocalBlock::new(l2g, mat)
        })
        .collect();
    IsMatrix::new(n_global, blocks).unwrap()
}

/// -u'' = f on (0, 1) with homogeneous Dirichlet ends, linear elements,
/// `n_sub` subdomains of `per_sub` elements each.
pub fn chain(n_sub: usize, per_sub: usize) -> IsMatrix {
    let n_el = n_sub * per_sub;
    let dof = |node: usize| (node > 0 && node < n_el).then(|| node - 1);
    let k = vec![vec![1.0, -1.0], vec![-1.0, 1.0]];
    let subs = (0..n_sub)
        .map(|s| {
            (s * per_sub..(s + 1) * per_sub)
                .map(|e| Element { dofs: vec![dof(e), dof(e + 1)], k: k.clone() })
                .collect()
        })
        .collect();
    let mut a = subassemble(n_el - 1, subs);
    a.set_symmetric(true);
    a
}

/// -u'' + c u' on (0, 1), central differences for the convection term, so
/// the local blocks are not symmetric.
pub fn convection_chain(n_sub: usize, per_sub: usize, c: f64) -> IsMatrix {
    let n_el = n_sub * per_sub;
    let dof = |node: usize| (node > 0 && node < n_el).then(|| node - 1);
    let k = vec![vec![1.0 - 0.5 * c, -1.0 + 0.5 * c], vec![-1.0 - 0.5 * c, 1.0 + 0.5 * c]];
    let subs = (0..n_sub)
        .map(|s| {
            (s * per_sub..(s + 1) * per_sub)
                .map(|e| Element { dofs: vec![dof(e), dof(e + 1)], k: k.clone() })
                .collect()
        })
        .collect();
    let mut a = subassemble(n_el - 1, subs);
    a.set_symmetric(false);
    a
}

/// Bilinear Laplacian on the unit square, boundary nodes eliminated, split
/// into `sx × sy` subdomains of `h × h` elements. `coef(sub)` scales the
/// stiffness of every element of a subdomain.
pub fn poisson_2d_with(sx: usize, sy: usize, h: usize, coef: impl Fn(usize) -> f64) -> IsMatrix {
    let (nx, ny) = (sx * h, sy * h);
    let dof = |i: usize, j: usize| (i > 0 && i < nx && j > 0 && j < ny).then(|| (j - 1) * (nx - 1) + (i - 1));
    let ke = [
        [4.0, -1.0, -2.0, -1.0],
        [-1.0, 4.0, -1.0, -2.0],
        [-2.0, -1.0, 4.0, -1.0],
        [-1.0, -2.0, -1.0, 4.0],
    ];
    let mut subs: Vec<Vec<Element>> = (0..sx * sy).map(|_| Vec::new()).collect();
    for ey in 0..ny {
        for ex in 0..nx {
            let s = (ey / h) * sx + ex / h;
            let c = coef(s) / 6.0;
            subs[s].push(Element {
                dofs: vec![dof(ex, ey), dof(ex + 1, ey), dof(ex + 1, ey + 1), dof(ex, ey + 1)],
                k: ke.iter().map(|row| row.iter().map(|v| c * v).collect()).collect(),
            });
        }
    }
    let mut a = subassemble((nx - 1) * (ny - 1), subs);
    a.set_symmetric(true);
    a
}

pub fn poisson_2d(sx: usize, sy: usize, h: usize) -> IsMatrix {
    poisson_2d_with(sx, sy, h, |_| 1.0)
}

/// Planar spring lattice: unit springs along the sides and diagonals of
/// every cell, two displacement dofs per node, nodes on `x = 0` clamped.
/// Carries the three rigid body modes as near-null space.
pub fn springs_2d(sx: usize, sy: usize, h: usize) -> IsMatrix {
    let (nx, ny) = (sx * h, sy * h);
    let node = |i: usize, j: usize| (i > 0).then(|| j * nx + (i - 1));
    let n_nodes = nx * (ny + 1);
    let mut subs: Vec<Vec<Element>> = (0..sx * sy).map(|_| Vec::new()).collect();
    for ey in 0..ny {
        for ex in 0..nx {
            let s = (ey / h) * sx + ex / h;
            let corners = [(ex, ey), (ex + 1, ey), (ex + 1, ey + 1), (ex, ey + 1)];
            for (a, b) in [(0, 1), (1, 2), (2, 3), (3, 0), (0, 2), (1, 3)] {
                let (pa, pb) = (corners[a], corners[b]);
                let (dx, dy) = (pb.0 as f64 - pa.0 as f64, pb.1 as f64 - pa.1 as f64);
                let len = (dx * dx + dy * dy).sqrt();
                let e = [dx / len, dy / len];
                let mut k = vec![vec![0.0; 4]; 4];
                for p in 0..2 {
                    for q in 0..2 {
                        let v = e[p] * e[q];
                        k[p][q] = v;
                        k[p + 2][q + 2] = v;
                        k[p][q + 2] = -v;
                        k[p + 2][q] = -v;
                    }
                }
                let dofs_of = |(i, j): (usize, usize)| {
                    let n = node(i, j);
                    [n.map(|n| 2 * n), n.map(|n| 2 * n + 1)]
                };
                let [a0, a1] = dofs_of(pa);
                let [b0, b1] = dofs_of(pb);
                subs[s].push(Element { dofs: vec![a0, a1, b0, b1], k });
            }
        }
    }
    let mut a = subassemble(2 * n_nodes, subs);
    a.set_symmetric(true);
    let mut modes = vec![vec![0.0; 2 * n_nodes]; 3];
    for j in 0..=ny {
        for i in 1..=nx {
            let Some(n) = node(i, j) else { continue };
            modes[0][2 * n] = 1.0;
            modes[1][2 * n + 1] = 1.0;
            modes[2][2 * n] = -(j as f64);
            modes[2][2 * n + 1] = i as f64;
        }
    }
    a.set_near_null_space(modes).unwrap();
    a
}

/// Stokes-like chain: `chain(n_sub, per_sub)` velocities plus one pressure
/// per subdomain (global dofs after the velocities) coupled to the mean
/// velocity of every element of the subdomain. The pressure block is zero.
pub fn stokes_chain(n_sub: usize, per_sub: usize) -> IsMatrix {
    let n_el = n_sub * per_sub;
    let n_vel = n_el - 1;
    let dof = |node: usize| (node > 0 && node < n_el).then(|| node - 1);
    let subs = (0..n_sub)
        .map(|s| {
            let p = Some(n_vel + s);
            (s * per_sub..(s + 1) * per_sub)
                .map(|e| {
                    // [u_e, u_e+1, p] with b = [1/2, 1/2] per element
                    Element {
                        dofs: vec![dof(e), dof(e + 1), p],
                        k: vec![vec![1.0, -1.0, 0.5], vec![-1.0, 1.0, 0.5], vec![0.5, 0.5, 0.0]],
                    }
                })
                .collect()
        })
        .collect();
    let mut a = subassemble(n_vel + n_sub, subs);
    a.set_symmetric(true);
    a
}

pub fn random_vec(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

pub fn norm(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

/// ‖x − y‖ / ‖y‖
pub fn rel_diff(x: &[f64], y: &[f64]) -> f64 {
    let d: f64 = x.iter().zip(y).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
    d / norm(y).max(f64::MIN_POSITIVE)
}

/// Dense reference solve of the assembled operator.
pub fn dense_solve(a: &IsMatrix, b: &[f64]) -> Vec<f64> {
    let dense: Mat<f64> = a.to_dense();
    let lu = LuSolver::factor(dense.as_ref(), "reference operator").unwrap();
    let mut x = b.to_vec();
    lu.solve_in_place(&mut x).unwrap();
    x
}

pub fn unit(n: usize, i: usize) -> Vec<f64> {
    let mut e = vec![0.0; n];
    e[i] = 1.0;
    e
}
