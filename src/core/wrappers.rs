//! Core trait implementations for Faer dense matrices and `Vec<T>`.
//!
//! Dense blocks (coarse matrices, Schur complements, test operators) go
//! through the same `MatVec`/`MatTransVec` interface as the subassembled
//! operator. Inner products run on rayon when the `rayon` feature is on.

use crate::core::traits::{InnerProduct, MatTransVec, MatVec};
use crate::matrix::dense::{gemv, gemv_transpose};
use faer::{Mat, MatRef};
use num_traits::Float;

fn dense_matvec<T: Float>(a: MatRef<'_, T>, x: &[T], y: &mut [T]) {
    assert_eq!(a.nrows(), y.len(), "matvec: output length");
    assert_eq!(a.ncols(), x.len(), "matvec: input length");
    gemv(a, x, y);
}

fn dense_mattransvec<T: Float>(a: MatRef<'_, T>, x: &[T], y: &mut [T]) {
    assert_eq!(a.ncols(), y.len(), "mattransvec: output length");
    assert_eq!(a.nrows(), x.len(), "mattransvec: input length");
    gemv_transpose(a, x, y);
}

impl<T: Float> MatVec<Vec<T>> for Mat<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        dense_matvec(self.as_ref(), x, y);
    }
}

impl<T: Float> MatVec<Vec<T>> for MatRef<'_, T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        dense_matvec(*self, x, y);
    }
}

impl<T: Float> MatTransVec<Vec<T>> for Mat<T> {
    fn mattransvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        dense_mattransvec(self.as_ref(), x, y);
    }
}

impl<T: Float> MatTransVec<Vec<T>> for MatRef<'_, T> {
    fn mattransvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        dense_mattransvec(*self, x, y);
    }
}

#[cfg(feature = "rayon")]
fn sum_of<T: Float + Send + Sync>(x: &[T], y: &[T]) -> T {
    use rayon::prelude::*;
    x.par_iter().zip(y.par_iter()).map(|(&a, &b)| a * b).reduce(T::zero, |acc, v| acc + v)
}

#[cfg(not(feature = "rayon"))]
fn sum_of<T: Float>(x: &[T], y: &[T]) -> T {
    x.iter().zip(y).fold(T::zero(), |acc, (&a, &b)| acc + a * b)
}

/// Euclidean inner product on global vectors.
impl<T: Float + From<f64> + Send + Sync> InnerProduct<Vec<T>> for () {
    type Scalar = T;

    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> T {
        assert_eq!(x.len(), y.len(), "dot: vector lengths differ");
        sum_of(x, y)
    }

    fn norm(&self, x: &Vec<T>) -> T {
        sum_of(x, x).sqrt()
    }
}
