//! Small BDDC scenarios with closed-form or exact answers.
//!
//! When every interface dof is a primal unknown the constrained space is the
//! assembled space, so one application of the preconditioner is an exact
//! solve; several tests below use that to compare against a dense solve.

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use kryst_bddc::matrix::{CsrMatrix, IsMatrix, LocalBlock};
use kryst_bddc::preconditioner::{Bddc, Preconditioner};
use kryst_bddc::BddcOptions;

fn set_up(a: &IsMatrix, opts: BddcOptions) -> Bddc {
    let mut pc = Bddc::new(opts);
    pc.setup(a).unwrap();
    pc
}

/// Two subdomains of three elements; dof 2 is the only shared dof.
#[test]
fn chain_vertex_gives_two_point_average() {
    let a = chain(2, 3);
    let mut pc = set_up(&a, BddcOptions::default());
    assert_eq!(pc.n_primal(), 1);
    assert_eq!(pc.coarse().unwrap().n_primal(), 1);
    for s in 0..2 {
        let lp = pc.local_problem(s).unwrap();
        assert_eq!(lp.n_b(), 1);
        assert_eq!(lp.scaling.weights(), &[0.5]);
    }

    let mut z = vec![0.0; 5];
    pc.apply(&unit(5, 2), &mut z).unwrap();
    for (zi, ei) in z.iter().zip([0.5, 1.0, 1.5, 1.0, 0.5]) {
        assert_abs_diff_eq!(*zi, ei, epsilon = 1e-12);
    }
}

#[test]
fn chain_with_many_subdomains_is_exact() {
    let a = chain(5, 4);
    let mut pc = set_up(&a, BddcOptions::default());
    assert_eq!(pc.n_primal(), 4);
    let r = random_vec(a.n_global(), 11);
    let mut z = vec![0.0; r.len()];
    pc.apply(&r, &mut z).unwrap();
    assert!(rel_diff(&z, &dense_solve(&a, &r)) < 1e-10);
}

/// Subdomain 0 owns a single, shared dof and has no interior.
#[test]
fn subdomain_without_interior() {
    let mut full = Vec::new();
    for i in 0..5 {
        full.push((i, i, if i == 2 { 1.0 } else { 2.0 }));
        if i + 1 < 5 {
            full.push((i, i + 1, -1.0));
            full.push((i + 1, i, -1.0));
        }
    }
    let a = IsMatrix::new(
        5,
        vec![
            LocalBlock::new(vec![2], CsrMatrix::from_triplets(1, 1, &[(0, 0, 1.0)]).unwrap()),
            LocalBlock::new(vec![0, 1, 2, 3, 4], CsrMatrix::from_triplets(5, 5, &full).unwrap()),
        ],
    )
    .unwrap();
    let mut pc = set_up(&a, BddcOptions::default());
    let lp = pc.local_problem(0).unwrap();
    assert_eq!(lp.n_d(), 0);
    assert_eq!(lp.dirichlet.n_blocks(), 0);

    let r = random_vec(5, 3);
    let mut z = vec![0.0; 5];
    pc.apply(&r, &mut z).unwrap();
    assert!(rel_diff(&z, &dense_solve(&a, &r)) < 1e-12);
    let mut zt = vec![0.0; 5];
    pc.apply_transpose(&r, &mut zt).unwrap();
    assert!(rel_diff(&zt, &z) < 1e-12);
}

#[test]
fn zero_in_zero_out() {
    let a = poisson_2d(2, 2, 3);
    let mut pc = set_up(&a, BddcOptions::default());
    let n = a.n_global();
    let mut z = vec![1.0; n];
    pc.apply(&vec![0.0; n], &mut z).unwrap();
    assert!(z.iter().all(|&v| v == 0.0));
    z.iter_mut().for_each(|v| *v = 1.0);
    pc.apply_transpose(&vec![0.0; n], &mut z).unwrap();
    assert!(z.iter().all(|&v| v == 0.0));
}

#[test]
fn apply_is_self_adjoint_on_symmetric_operator() {
    let a = poisson_2d(3, 2, 3);
    let mut pc = set_up(&a, BddcOptions::default());
    let n = a.n_global();
    let (x, y) = (random_vec(n, 1), random_vec(n, 2));
    let (mut mx, mut my, mut mtx) = (vec![0.0; n], vec![0.0; n], vec![0.0; n]);
    pc.apply(&x, &mut mx).unwrap();
    pc.apply(&y, &mut my).unwrap();
    pc.apply_transpose(&x, &mut mtx).unwrap();
    let (xy, yx) = (dot(&mx, &y), dot(&x, &my));
    assert!((xy - yx).abs() <= 1e-10 * xy.abs().max(1.0));
    assert!(rel_diff(&mtx, &mx) < 1e-10);
    // positive definite
    assert!(dot(&mx, &x) > 0.0);
}

#[test]
fn transpose_is_the_adjoint_on_a_nonsymmetric_operator() {
    let a = convection_chain(3, 4, 0.8);
    assert!(!a.is_symmetric());
    let n = a.n_global();
    let (x, y) = (random_vec(n, 21), random_vec(n, 22));
    let variants: [fn(&mut BddcOptions); 3] = [
        |_| {},
        |o| o.use_deluxe_scaling = true,
        |o| o.switch_static = true,
    ];
    for tweak in variants {
        let mut opts = BddcOptions::default();
        tweak(&mut opts);
        let mut pc = set_up(&a, opts);
        let (mut mx, mut mty) = (vec![0.0; n], vec![0.0; n]);
        pc.apply(&x, &mut mx).unwrap();
        pc.apply_transpose(&y, &mut mty).unwrap();
        let (lhs, rhs) = (dot(&mx, &y), dot(&x, &mty));
        assert!((lhs - rhs).abs() <= 1e-10 * lhs.abs().max(1.0), "<Mx,y> = {lhs}, <x,Mᵀy> = {rhs}");
        // the transpose really differs from the forward operator here
        let mut mtx = vec![0.0; n];
        pc.apply_transpose(&x, &mut mtx).unwrap();
        assert!(rel_diff(&mtx, &mx) > 1e-6);
    }
}

#[test]
fn apply_stays_finite_on_larger_subdomains() {
    // local blocks of 20 and more rows
    let a = poisson_2d(3, 3, 4);
    let mut pc = set_up(&a, BddcOptions::default());
    let n = a.n_global();
    let r = random_vec(n, 8);
    let mut z = vec![0.0; n];
    pc.apply(&r, &mut z).unwrap();
    assert!(z.iter().all(|v| v.is_finite()));
    assert!(dot(&z, &r) > 0.0);
}

#[test]
fn switch_static_on_exact_chain() {
    let a = chain(3, 4);
    let mut opts = BddcOptions::default();
    opts.switch_static = true;
    let mut pc = set_up(&a, opts);
    let r = random_vec(a.n_global(), 5);
    let mut z = vec![0.0; r.len()];
    pc.apply(&r, &mut z).unwrap();
    assert!(rel_diff(&z, &dense_solve(&a, &r)) < 1e-10);
}

#[test]
fn benign_pressures_are_primal_and_p0_is_reset() {
    let a = stokes_chain(3, 3);
    let n = a.n_global();
    let mut opts = BddcOptions::default();
    opts.benign_saddle_point = true;
    let mut pc = set_up(&a, opts);
    assert_eq!(pc.primal_space().n_benign, 3);
    assert_eq!(pc.benign_p0().len(), 3);

    let r = random_vec(n, 17);
    let mut z = vec![0.0; n];
    pc.apply(&r, &mut z).unwrap();
    assert!(pc.benign_p0().iter().all(|&p| p == 0.0));
    // shared velocities and pressures are all primal: the application is exact
    assert!(rel_diff(&z, &dense_solve(&a, &r)) < 1e-10);

    pc.set_p0_persistent(true);
    pc.apply(&r, &mut z).unwrap();
    assert_eq!(pc.benign_p0().len(), 3);
    for (p, &g) in pc.benign_p0().iter().zip(&[n - 3, n - 2, n - 1]) {
        assert_abs_diff_eq!(*p, z[g], epsilon = 1e-12);
    }
}

#[test]
fn benign_detection_follows_disconnected_pieces() {
    // two subdomains of a chain, each with its own pressure on either half
    let a = stokes_chain(2, 4);
    let mut opts = BddcOptions::default();
    opts.benign_saddle_point = true;
    opts.detect_disconnected = true;
    let pc = set_up(&a, opts);
    assert_eq!(pc.benign_p0().len(), 2);
    for s in 0..2 {
        assert_eq!(pc.local_problem(s).unwrap().benign.len(), 1);
    }
}

#[test]
fn apply_before_setup_fails() {
    let mut pc = Bddc::default();
    let mut z = vec![0.0; 3];
    let err = pc.apply(&vec![1.0; 3], &mut z).unwrap_err();
    assert_eq!(err, kryst_bddc::KError::NotSetUp);
}

#[test]
fn wrong_vector_length_is_a_dimension_mismatch() {
    let a = chain(2, 3);
    let mut pc = set_up(&a, BddcOptions::default());
    let mut z = vec![0.0; 5];
    assert!(matches!(
        pc.apply(&vec![1.0; 4], &mut z),
        Err(kryst_bddc::KError::DimensionMismatch { expected: 5, found: 4, .. })
    ));
}
