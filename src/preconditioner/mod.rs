//! Preconditioners for linear solvers.
//!
//! This module defines the `Preconditioner` trait, the Krylov-facing hooks
//! around it, and the implementations: Jacobi and the BDDC domain
//! decomposition preconditioner.

use crate::error::KError;

/// What the Krylov driver tells a preconditioner before and after a solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KrylovInfo {
    /// The driving method is conjugate gradients.
    pub is_cg: bool,
    /// `x` holds an initial guess on entry; pre-solve hooks may flip this
    /// after computing a guess of their own.
    pub initial_guess_nonzero: bool,
}

impl KrylovInfo {
    pub fn cg() -> Self {
        Self { is_cg: true, initial_guess_nonzero: false }
    }
}

/// A preconditioner M ≈ A⁻¹.
///
/// Applications take `&mut self`: implementations keep workspace between
/// calls, so one instance must not be applied concurrently.
pub trait Preconditioner<M, V> {
    /// Setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), KError> {
        Ok(())
    }
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&mut self, r: &V, z: &mut V) -> Result<(), KError>;
    /// Apply M⁻ᵀ to r
    fn apply_transpose(&mut self, _r: &V, _z: &mut V) -> Result<(), KError> {
        Err(KError::Unsupported("transpose application"))
    }
    /// Called by the driver before iterating; may rewrite `b` and `x`.
    fn pre_solve(&mut self, _a: &M, _b: &mut V, _x: &mut V, _info: &mut KrylovInfo) -> Result<(), KError> {
        Ok(())
    }
    /// Undoes whatever `pre_solve` did to `b` and completes `x`.
    fn post_solve(&mut self, _a: &M, _b: &mut V, _x: &mut V, _info: &mut KrylovInfo) -> Result<(), KError> {
        Ok(())
    }
    /// Drops everything built by `setup`.
    fn reset(&mut self) {}
}

pub mod bddc;
pub mod jacobi;

pub use bddc::Bddc;
pub use jacobi::Jacobi;
