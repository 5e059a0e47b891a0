//! Subdomain-parallel execution and inter-subdomain data movement.
//!
//! Subdomains are processed by a rayon pool when the `rayon` feature is
//! enabled and sequentially otherwise; all exchanges between them go through
//! [`VecScatter`].

pub mod scatter;
pub use scatter::{InsertMode, ScatterMessage, ScatterMode, VecScatter};

use crate::error::KError;

/// Maps every subdomain to a result, keeping subdomain order.
pub fn map_subdomains<S, R, F>(items: &[S], f: F) -> Result<Vec<R>, KError>
where
    S: Sync,
    R: Send,
    F: Fn(usize, &S) -> Result<R, KError> + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        items.par_iter().enumerate().map(|(i, s)| f(i, s)).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        items.iter().enumerate().map(|(i, s)| f(i, s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_keep_order_and_propagate_errors() {
        let v = vec![1, 3, 5];
        let doubled = map_subdomains(&v, |_, x| Ok(2 * x)).unwrap();
        assert_eq!(doubled, vec![2, 6, 10]);
        let err = map_subdomains(&v, |i, _| if i == 1 { Err(KError::NotSetUp) } else { Ok(0) });
        assert_eq!(err, Err(KError::NotSetUp));
    }
}
