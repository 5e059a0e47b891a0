//! Matrix module: dense kernels, CSR storage and the subassembled operator.

pub mod dense;
pub mod sparse;
pub use sparse::{CsrMatrix, SparseMatrix};
pub mod is;
pub use is::{IsMatrix, LocalBlock, NearNullSpace, ObjectState};
