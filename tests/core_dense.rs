//! Dense building blocks: trait products on Faer matrices, the LU wrapper
//! used for local and coarse solves, and the rank-revealing helpers.

use approx::assert_abs_diff_eq;
use faer::Mat;
use kryst_bddc::core::traits::{InnerProduct, MatTransVec, MatVec, SubmatrixExtract};
use kryst_bddc::matrix::dense::{numerical_rank, orthonormal_completion, orthonormal_rows};
use kryst_bddc::solver::LuSolver;
use kryst_bddc::KError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_mat(n: usize, m: usize, rng: &mut StdRng) -> Mat<f64> {
    let vals: Vec<f64> = (0..n * m).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Mat::from_fn(n, m, |i, j| vals[j * n + i])
}

#[test]
fn lu_solve_inverts_matvec() {
    let n = 6;
    let mut rng = StdRng::seed_from_u64(7);
    let mut a = random_mat(n, n, &mut rng);
    for i in 0..n {
        a[(i, i)] += n as f64;
    }
    let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut b = vec![0.0; n];
    a.matvec(&x, &mut b);
    let lu = LuSolver::factor(a.as_ref(), "test matrix").unwrap();
    let mut y = b.clone();
    lu.solve_in_place(&mut y).unwrap();
    for (yi, xi) in y.iter().zip(&x) {
        assert_abs_diff_eq!(*yi, *xi, epsilon = 1e-12);
    }

    // Aᵀ through the same factorization
    a.mattransvec(&x, &mut b);
    lu.solve_transpose_in_place(&mut b).unwrap();
    for (bi, xi) in b.iter().zip(&x) {
        assert_abs_diff_eq!(*bi, *xi, epsilon = 1e-12);
    }
}

#[test]
fn singular_block_is_rejected() {
    let a = Mat::from_fn(3, 3, |i, j| if i == 2 || j == 2 { 0.0 } else if i == j { 1.0 } else { 0.5 });
    assert!(matches!(
        LuSolver::factor(a.as_ref(), "singular test block"),
        Err(KError::SingularFactorization { context: "singular test block", .. })
    ));
}

#[test]
fn dependent_rows_drop_out_of_the_orthonormal_basis() {
    // third row = first + second
    let rows = Mat::from_fn(3, 4, |i, j| match i {
        0 => 1.0,
        1 => j as f64,
        _ => 1.0 + j as f64,
    });
    assert_eq!(numerical_rank(rows.as_ref(), 1e-10).unwrap(), 2);
    let q = orthonormal_rows(rows.as_ref(), 1e-10).unwrap();
    assert_eq!(q.nrows(), 2);
    let ip = ();
    for r in 0..2 {
        let qr: Vec<f64> = (0..4).map(|j| q[(r, j)]).collect();
        assert_abs_diff_eq!(ip.norm(&qr), 1.0, epsilon = 1e-12);
    }

    // completing the basis gives an orthogonal matrix
    let full = orthonormal_completion(q.as_ref().transpose()).unwrap();
    assert_eq!((full.nrows(), full.ncols()), (4, 4));
    let qtq = full.as_ref().transpose() * full.as_ref();
    for i in 0..4 {
        for j in 0..4 {
            assert_abs_diff_eq!(qtq[(i, j)], if i == j { 1.0 } else { 0.0 }, epsilon = 1e-12);
        }
    }
}

#[test]
fn submatrix_follows_index_order() {
    let a = Mat::from_fn(3, 3, |i, j| (10 * i + j) as f64);
    let s = a.extract_submatrix(&[2, 0], &[1, 2]);
    assert_eq!(s[(0, 0)], 21.0);
    assert_eq!(s[(1, 1)], 2.0);
}
