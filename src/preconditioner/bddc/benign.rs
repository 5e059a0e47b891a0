//! Benign subspace detection for saddle-point operators with discontinuous
//! pressures.
//!
//! Pressure dofs are recognised by a zero assembled diagonal and must belong
//! to one subdomain only. They are grouped in pieces (a subdomain, or one of
//! its disconnected parts) and every piece gets an orthogonal change of basis
//! whose first column is the normalised constant: the first dof of the piece
//! then carries the piece-wise constant pressure and becomes a primal unknown.

use crate::core::traits::Diagonal;
use crate::error::KError;
use crate::matrix::dense::orthonormal_completion;
use crate::matrix::is::IsMatrix;
use crate::preconditioner::bddc::change::DenseBlock;
use crate::utils::graph::component_labels;
use faer::Mat;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct BenignPiece {
    pub sub: usize,
    /// Sorted global pressure dofs; the first one carries the constant mode
    pub dofs: Vec<usize>,
}

impl BenignPiece {
    pub fn benign_dof(&self) -> usize {
        self.dofs[0]
    }
}

#[derive(Clone, Debug, Default)]
pub struct BenignSpace {
    pub pieces: Vec<BenignPiece>,
}

impl BenignSpace {
    pub fn detect(a: &IsMatrix, multiplicity: &[usize], detect_disconnected: bool) -> Self {
        let diag = a.assembled_diagonal();
        let scale = diag.iter().fold(0.0f64, |m, d| m.max(d.abs()));
        let is_zero = |g: usize| diag[g].abs() <= 1e-14 * scale;

        let mut pieces = Vec::new();
        let skipped = (0..diag.len()).filter(|&g| is_zero(g) && multiplicity[g] > 1).count();
        for (sub, block) in a.subdomains().iter().enumerate() {
            let labels = if detect_disconnected {
                Some(component_labels(&block.mat.adjacency()).1)
            } else {
                None
            };
            let mut by_label: Vec<Vec<usize>> = Vec::new();
            for (l, &g) in block.l2g.iter().enumerate() {
                if !is_zero(g) {
                    continue;
                }
                if multiplicity[g] > 1 {
                    continue;
                }
                let label = labels.as_ref().map_or(0, |lab| lab[l]);
                if by_label.len() <= label {
                    by_label.resize(label + 1, Vec::new());
                }
                by_label[label].push(g);
            }
            for mut dofs in by_label.into_iter().filter(|d| !d.is_empty()) {
                dofs.sort_unstable();
                pieces.push(BenignPiece { sub, dofs });
            }
        }
        if skipped > 0 {
            warn!(skipped, "zero-diagonal dofs on the interface are not treated as benign pressures");
        }
        debug!(pieces = pieces.len(), "benign subspace detection");
        Self { pieces }
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn benign_dofs(&self) -> Vec<usize> {
        self.pieces.iter().map(BenignPiece::benign_dof).collect()
    }

    /// Orthogonal per-piece changes; pieces with a single dof need none.
    pub fn change_blocks(&self) -> Result<Vec<DenseBlock>, KError> {
        let mut blocks = Vec::new();
        for piece in self.pieces.iter().filter(|p| p.dofs.len() > 1) {
            let m = piece.dofs.len();
            let c = 1.0 / (m as f64).sqrt();
            let q = orthonormal_completion(Mat::from_fn(m, 1, |_, _| c).as_ref())?;
            blocks.push(DenseBlock { dofs: piece.dofs.clone(), q });
        }
        Ok(blocks)
    }
}
