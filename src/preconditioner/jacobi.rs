// Jacobi preconditioner implementation

use crate::core::traits::Diagonal;
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use num_traits::Float;

/// Jacobi preconditioner: M⁻¹ = D⁻¹
#[derive(Clone, Debug)]
pub struct Jacobi<T> {
    pub(crate) inv_diag: Vec<T>,
}

impl<T: Float> Jacobi<T> {
    /// new with empty state; user must call `setup`.
    pub fn new() -> Self {
        Self { inv_diag: Vec::new() }
    }
}

impl<T: num_traits::Float> Default for Jacobi<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, V, T> Preconditioner<M, V> for Jacobi<T>
where
    M: Diagonal<T>,
    V: AsRef<[T]> + AsMut<[T]>,
    T: Float,
{
    fn setup(&mut self, a: &M) -> Result<(), KError> {
        // zero diagonal entries pass the residual through unscaled
        self.inv_diag = a
            .assembled_diagonal()
            .into_iter()
            .map(|d| if d != T::zero() { T::one() / d } else { T::one() })
            .collect();
        Ok(())
    }

    fn apply(&mut self, x: &V, y: &mut V) -> Result<(), KError> {
        let x_ref = x.as_ref();
        if x_ref.len() != self.inv_diag.len() {
            return Err(KError::DimensionMismatch {
                what: "Jacobi input",
                expected: self.inv_diag.len(),
                found: x_ref.len(),
            });
        }
        for ((yi, &xi), &di) in y.as_mut().iter_mut().zip(x_ref).zip(&self.inv_diag) {
            *yi = di * xi;
        }
        Ok(())
    }

    fn apply_transpose(&mut self, x: &V, y: &mut V) -> Result<(), KError> {
        <Self as Preconditioner<M, V>>::apply(self, x, y)
    }

    fn reset(&mut self) {
        self.inv_diag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn scales_by_inverse_diagonal() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 * (i + 1) as f64 } else { 1.0 });
        let mut pc = Jacobi::<f64>::new();
        <Jacobi<f64> as Preconditioner<Mat<f64>, Vec<f64>>>::setup(&mut pc, &a).unwrap();
        let mut z = vec![0.0; 2];
        <Jacobi<f64> as Preconditioner<Mat<f64>, Vec<f64>>>::apply(&mut pc, &vec![2.0, 2.0], &mut z).unwrap();
        assert_eq!(z, vec![1.0, 0.5]);
    }
}
