//! Core linear-algebra traits for kryst-bddc.

/// Matrix–vector product: y ← A x.
pub trait MatVec<V> {
    /// Compute y = A · x.
    fn matvec(&self, x: &V, y: &mut V);
}

/// Transposed matrix–vector product: y ← Aᵀ x.
pub trait MatTransVec<V> {
    /// Compute y = Aᵀ · x.
    fn mattransvec(&self, x: &V, y: &mut V);
}

/// Inner products & norms.
pub trait InnerProduct<V> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd + From<f64>;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}

/// Shape of a (possibly rectangular) operator.
pub trait MatShape {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
}

/// Principal submatrix extraction by an index set.
pub trait SubmatrixExtract {
    type Output;
    /// Returns A[rows, cols].
    fn extract_submatrix(&self, rows: &[usize], cols: &[usize]) -> Self::Output;
}

/// Assembled diagonal of an operator.
pub trait Diagonal<T> {
    fn assembled_diagonal(&self) -> Vec<T>;
}
