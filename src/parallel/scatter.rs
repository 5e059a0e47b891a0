//! Vector scatters between a global index space and per-subdomain local
//! spaces.
//!
//! An exchange is split in two halves: `begin` packs the outgoing message
//! from the source and `end` unpacks it into the destination, so local work
//! can be interleaved between the two. A message remembers the direction it
//! was packed for; finishing it in the other direction is a communication
//! error.

use crate::error::KError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Add,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScatterMode {
    /// global → local
    Forward,
    /// local → global
    Reverse,
}

/// Packed, in-flight scatter data.
#[derive(Debug)]
pub struct ScatterMessage {
    scatter: &'static str,
    direction: ScatterMode,
    payload: Vec<Vec<f64>>,
}

impl ScatterMessage {
    pub fn direction(&self) -> ScatterMode {
        self.direction
    }
}

/// Index maps from each subdomain's local slots into one global space.
#[derive(Clone, Debug)]
pub struct VecScatter {
    name: &'static str,
    n_global: usize,
    maps: Vec<Vec<usize>>,
}

impl VecScatter {
    pub fn new(name: &'static str, n_global: usize, maps: Vec<Vec<usize>>) -> Result<Self, KError> {
        for map in &maps {
            if let Some(&g) = map.iter().find(|&&g| g >= n_global) {
                return Err(KError::DimensionMismatch { what: "scatter index", expected: n_global, found: g });
            }
        }
        Ok(Self { name, n_global, maps })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn n_global(&self) -> usize {
        self.n_global
    }

    pub fn n_subdomains(&self) -> usize {
        self.maps.len()
    }

    pub fn local_size(&self, sub: usize) -> usize {
        self.maps[sub].len()
    }

    pub fn map(&self, sub: usize) -> &[usize] {
        &self.maps[sub]
    }

    /// Packs `global` for every subdomain.
    pub fn begin_forward(&self, global: &[f64]) -> Result<ScatterMessage, KError> {
        KError::check_dim("scatter source", self.n_global, global.len())?;
        let payload = self.maps.iter().map(|m| m.iter().map(|&g| global[g]).collect()).collect();
        Ok(ScatterMessage { scatter: self.name, direction: ScatterMode::Forward, payload })
    }

    /// Unpacks a forward message into the local vectors.
    pub fn end_forward(&self, msg: ScatterMessage, locals: &mut [Vec<f64>], mode: InsertMode) -> Result<(), KError> {
        self.check_message(&msg, ScatterMode::Forward)?;
        KError::check_dim("scatter destination count", self.maps.len(), locals.len())?;
        for (sub, (dst, src)) in locals.iter_mut().zip(msg.payload).enumerate() {
            KError::check_dim("scatter destination", self.maps[sub].len(), dst.len())?;
            match mode {
                InsertMode::Insert => dst.copy_from_slice(&src),
                InsertMode::Add => dst.iter_mut().zip(src).for_each(|(d, s)| *d += s),
            }
        }
        Ok(())
    }

    /// Packs the local vectors for the trip back to the global space.
    pub fn begin_reverse<L: AsRef<[f64]>>(&self, locals: &[L]) -> Result<ScatterMessage, KError> {
        KError::check_dim("scatter source count", self.maps.len(), locals.len())?;
        let mut payload = Vec::with_capacity(locals.len());
        for (sub, l) in locals.iter().enumerate() {
            KError::check_dim("scatter source", self.maps[sub].len(), l.as_ref().len())?;
            payload.push(l.as_ref().to_vec());
        }
        Ok(ScatterMessage { scatter: self.name, direction: ScatterMode::Reverse, payload })
    }

    /// Unpacks a reverse message. With `Insert` the last writer wins, which
    /// is only meaningful for slots owned by one subdomain or already
    /// consistent ones.
    pub fn end_reverse(&self, msg: ScatterMessage, global: &mut [f64], mode: InsertMode) -> Result<(), KError> {
        self.check_message(&msg, ScatterMode::Reverse)?;
        KError::check_dim("scatter destination", self.n_global, global.len())?;
        for (map, src) in self.maps.iter().zip(msg.payload) {
            for (&g, v) in map.iter().zip(src) {
                match mode {
                    InsertMode::Insert => global[g] = v,
                    InsertMode::Add => global[g] += v,
                }
            }
        }
        Ok(())
    }

    /// `begin_forward` immediately followed by `end_forward`.
    pub fn forward(&self, global: &[f64], locals: &mut [Vec<f64>], mode: InsertMode) -> Result<(), KError> {
        let msg = self.begin_forward(global)?;
        self.end_forward(msg, locals, mode)
    }

    /// `begin_reverse` immediately followed by `end_reverse`.
    pub fn reverse<L: AsRef<[f64]>>(&self, locals: &[L], global: &mut [f64], mode: InsertMode) -> Result<(), KError> {
        let msg = self.begin_reverse(locals)?;
        self.end_reverse(msg, global, mode)
    }

    fn check_message(&self, msg: &ScatterMessage, expected: ScatterMode) -> Result<(), KError> {
        if msg.scatter != self.name {
            return Err(KError::CommunicationError(format!(
                "message packed by scatter '{}' finished on '{}'",
                msg.scatter, self.name
            )));
        }
        if msg.direction != expected {
            return Err(KError::CommunicationError(format!(
                "scatter '{}': {:?} message finished as {:?}",
                self.name, msg.direction, expected
            )));
        }
        KError::check_dim("scatter message", self.maps.len(), msg.payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_middle() -> VecScatter {
        VecScatter::new("global_to_n", 3, vec![vec![0, 1], vec![1, 2]]).unwrap()
    }

    #[test]
    fn forward_then_reverse_add_counts_sharing() {
        let sc = shared_middle();
        let mut locals = vec![vec![0.0; 2], vec![0.0; 2]];
        sc.forward(&[1.0, 2.0, 3.0], &mut locals, InsertMode::Insert).unwrap();
        assert_eq!(locals, vec![vec![1.0, 2.0], vec![2.0, 3.0]]);
        let mut g = vec![0.0; 3];
        sc.reverse(&locals, &mut g, InsertMode::Add).unwrap();
        assert_eq!(g, vec![1.0, 4.0, 3.0]);
    }

    #[test]
    fn local_work_between_begin_and_end() {
        let sc = shared_middle();
        let msg = sc.begin_reverse(&[vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let mut g = vec![10.0; 3];
        g[0] = 0.0;
        sc.end_reverse(msg, &mut g, InsertMode::Add).unwrap();
        assert_eq!(g, vec![1.0, 12.0, 11.0]);
    }

    #[test]
    fn wrong_direction_is_a_communication_error() {
        let sc = shared_middle();
        let msg = sc.begin_forward(&[0.0; 3]).unwrap();
        let mut g = vec![0.0; 3];
        let err = sc.end_reverse(msg, &mut g, InsertMode::Insert).unwrap_err();
        assert!(matches!(err, KError::CommunicationError(_)));

        let other = VecScatter::new("global_to_b", 3, vec![vec![1], vec![1]]).unwrap();
        let msg = other.begin_forward(&[0.0; 3]).unwrap();
        let mut locals = vec![vec![0.0; 2], vec![0.0; 2]];
        assert!(sc.end_forward(msg, &mut locals, InsertMode::Insert).is_err());
    }
}
