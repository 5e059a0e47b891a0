//! Command-line or API options for the BDDC preconditioner.
//!
//! `BddcOptions` is the mutable, flat option set a user edits field by field
//! or through `set_option` with the familiar `-pc_bddc_*` names. At setup it
//! is validated and frozen into a `BddcConfig`, which also carries the
//! derived switches the apply path branches on.

use crate::error::KError;

/// BDDC tunables. Defaults follow the reference preconditioner.
#[derive(Debug, Clone, PartialEq)]
pub struct BddcOptions {
    /// Use corner dofs as primal unknowns
    pub use_vertices: bool,
    /// Use edge constraints in the coarse space
    pub use_edges: bool,
    /// Use face constraints in the coarse space
    pub use_faces: bool,
    /// Connected components of at most this many dofs are treated as vertices
    pub vertex_size: usize,
    /// Dofs shared by more subdomains than this belong to no component
    pub graph_max_count: usize,
    /// Split interface components along the local matrix adjacency
    pub use_local_adjacency: bool,
    /// Build an explicit change of basis on edges
    pub use_change_of_basis: bool,
    /// Extend the change of basis to faces
    pub use_change_on_faces: bool,
    /// Static condensation around the interface preconditioner (M₃ variant)
    pub switch_static: bool,
    /// Fine subdomains aggregated into one coarse subdomain
    pub coarsening_ratio: usize,
    /// Maximum number of nested BDDC levels below this one
    pub max_levels: usize,
    /// Coarse equations per coarse subdomain at the coarsest level
    pub coarse_eqs_per_proc: usize,
    /// Schur-complement based interface averaging
    pub use_deluxe_scaling: bool,
    /// Layers of interior dofs kept around a component for its Schur minor; -1 keeps all
    pub sub_schurs_layers: i64,
    /// Merge components with the same sharing set before computing Schur minors
    pub sub_schurs_rebuild: bool,
    /// Eigenvalue threshold for adaptive constraints; zero disables adaptivity
    pub adaptive_threshold: f64,
    /// Minimum adaptive constraints per component
    pub adaptive_nmin: usize,
    /// Maximum adaptive constraints per component; zero means unbounded
    pub adaptive_nmax: usize,
    /// Keep near-null-space constraints next to the adaptive ones
    pub adaptive_userdefined: bool,
    /// Reuse the primal basis for the transpose (Ψ = Φ) on symmetric operators
    pub symmetric_primal: bool,
    /// Benign subspace trick for discontinuous pressures
    pub benign_saddle_point: bool,
    /// Remove the benign component of the rhs during pre-solve
    pub benign_compute_correction: bool,
    /// Treat disconnected pieces of a subdomain independently
    pub detect_disconnected: bool,
    /// Impose Dirichlet values during pre-solve
    pub eliminate_dirichlet: bool,
    /// Exact interior initial guess when driven by CG
    pub use_exact_dirichlet_trick: bool,
    /// Dirichlet problems are solved inexactly, with a null-space correction
    pub dirichlet_approximate: bool,
    /// Orthonormalise single constraints too
    pub use_qr_single: bool,
    /// Use the near-null space as given, without per-component orthonormalisation
    pub use_nnsp_true: bool,
    /// Relative singular value cut-off for constraint rank truncation
    pub svd_tolerance: f64,
}

impl Default for BddcOptions {
    fn default() -> Self {
        Self {
            use_vertices: true,
            use_edges: true,
            use_faces: false,
            vertex_size: 1,
            graph_max_count: usize::MAX,
            use_local_adjacency: true,
            use_change_of_basis: false,
            use_change_on_faces: false,
            switch_static: false,
            coarsening_ratio: 8,
            max_levels: 0,
            coarse_eqs_per_proc: 1,
            use_deluxe_scaling: false,
            sub_schurs_layers: -1,
            sub_schurs_rebuild: false,
            adaptive_threshold: 0.0,
            adaptive_nmin: 0,
            adaptive_nmax: 0,
            adaptive_userdefined: false,
            symmetric_primal: true,
            benign_saddle_point: false,
            benign_compute_correction: true,
            detect_disconnected: false,
            eliminate_dirichlet: false,
            use_exact_dirichlet_trick: true,
            dirichlet_approximate: false,
            use_qr_single: false,
            use_nnsp_true: false,
            svd_tolerance: 1e-8,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, KError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(KError::config(format!("option '{key}': '{value}' is not a boolean"))),
    }
}

fn parse_num<N: std::str::FromStr>(key: &str, value: &str) -> Result<N, KError> {
    value
        .trim()
        .parse()
        .map_err(|_| KError::config(format!("option '{key}': cannot parse '{value}'")))
}

impl BddcOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one option by name. The `-pc_bddc_` prefix is optional and the
    /// names of the reference option database are accepted next to the
    /// field names.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<(), KError> {
        let name = key.trim_start_matches('-');
        let name = name.strip_prefix("pc_bddc_").unwrap_or(name);
        match name {
            "use_vertices" => self.use_vertices = parse_bool(key, value)?,
            "use_edges" => self.use_edges = parse_bool(key, value)?,
            "use_faces" => self.use_faces = parse_bool(key, value)?,
            "vertex_size" => self.vertex_size = parse_num(key, value)?,
            "graph_maxcount" | "graph_max_count" => self.graph_max_count = parse_num(key, value)?,
            "use_local_mat_graph" | "use_local_adjacency" => self.use_local_adjacency = parse_bool(key, value)?,
            "use_change_of_basis" => self.use_change_of_basis = parse_bool(key, value)?,
            "use_change_on_faces" => self.use_change_on_faces = parse_bool(key, value)?,
            "switch_static" => self.switch_static = parse_bool(key, value)?,
            "coarsening_ratio" => self.coarsening_ratio = parse_num(key, value)?,
            "levels" | "max_levels" => self.max_levels = parse_num(key, value)?,
            "coarse_eqs_per_proc" => self.coarse_eqs_per_proc = parse_num(key, value)?,
            "use_deluxe_scaling" => self.use_deluxe_scaling = parse_bool(key, value)?,
            "schur_layers" | "sub_schurs_layers" => self.sub_schurs_layers = parse_num(key, value)?,
            "schur_rebuild" | "sub_schurs_rebuild" => self.sub_schurs_rebuild = parse_bool(key, value)?,
            "adaptive_threshold" => self.adaptive_threshold = parse_num(key, value)?,
            "adaptive_nmin" => self.adaptive_nmin = parse_num(key, value)?,
            "adaptive_nmax" => self.adaptive_nmax = parse_num(key, value)?,
            "adaptive_userdefined" => self.adaptive_userdefined = parse_bool(key, value)?,
            "symmetric" | "symmetric_primal" => self.symmetric_primal = parse_bool(key, value)?,
            "benign_trick" | "benign_saddle_point" => self.benign_saddle_point = parse_bool(key, value)?,
            "benign_compute_correction" => self.benign_compute_correction = parse_bool(key, value)?,
            "detect_disconnected" => self.detect_disconnected = parse_bool(key, value)?,
            "eliminate_dirichlet" => self.eliminate_dirichlet = parse_bool(key, value)?,
            "use_exact_dirichlet" | "use_exact_dirichlet_trick" => {
                self.use_exact_dirichlet_trick = parse_bool(key, value)?
            }
            "dirichlet_approximate" => self.dirichlet_approximate = parse_bool(key, value)?,
            "use_qr_single" => self.use_qr_single = parse_bool(key, value)?,
            "use_true_nnsp" | "use_nnsp_true" => self.use_nnsp_true = parse_bool(key, value)?,
            "svd_tolerance" => self.svd_tolerance = parse_num(key, value)?,
            _ => return Err(KError::config(format!("unknown BDDC option '{key}'"))),
        }
        Ok(())
    }

    /// Applies `(key, value)` pairs in order, stopping at the first bad one.
    pub fn set_options<'a, I>(&mut self, pairs: I) -> Result<(), KError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs.into_iter().try_for_each(|(k, v)| self.set_option(k, v))
    }
}

/// Validated, immutable snapshot of `BddcOptions` for one level.
#[derive(Debug, Clone, PartialEq)]
pub struct BddcConfig {
    pub opts: BddcOptions,
    /// Level of this instance in the multilevel tree (0 is the finest)
    pub level: usize,
    pub adaptive_selection: bool,
    /// Schur minors of the final local matrices are built during setup
    /// (deluxe scaling); adaptivity forms its own before the change of basis
    pub compute_sub_schurs: bool,
    pub use_faces: bool,
    pub use_change_on_faces: bool,
    /// The coarse problem may be handed to a nested instance
    pub allow_nested_coarse: bool,
}

impl BddcConfig {
    pub fn from_options(opts: &BddcOptions, level: usize) -> Result<Self, KError> {
        if opts.max_levels > 99 {
            return Err(KError::config(format!("max_levels = {} exceeds 99", opts.max_levels)));
        }
        if opts.coarsening_ratio < 2 {
            return Err(KError::config("coarsening_ratio must be at least 2"));
        }
        if opts.vertex_size == 0 {
            return Err(KError::config("vertex_size must be positive"));
        }
        if opts.coarse_eqs_per_proc == 0 {
            return Err(KError::config("coarse_eqs_per_proc must be positive"));
        }
        if opts.sub_schurs_layers < -1 {
            return Err(KError::config("sub_schurs_layers must be -1 or non-negative"));
        }
        if !(opts.svd_tolerance > 0.0 && opts.svd_tolerance < 1.0) {
            return Err(KError::config("svd_tolerance must lie in (0, 1)"));
        }
        if opts.adaptive_threshold < 0.0 {
            return Err(KError::config("adaptive_threshold must be non-negative"));
        }
        if opts.adaptive_nmax > 0 && opts.adaptive_nmax < opts.adaptive_nmin {
            return Err(KError::config("adaptive_nmax is smaller than adaptive_nmin"));
        }
        let adaptive_selection = opts.adaptive_threshold > 0.0;
        if adaptive_selection && opts.dirichlet_approximate {
            return Err(KError::Unsupported("adaptive selection with approximate Dirichlet solvers"));
        }
        Ok(Self {
            opts: opts.clone(),
            level,
            adaptive_selection,
            compute_sub_schurs: opts.use_deluxe_scaling,
            use_faces: opts.use_faces || adaptive_selection,
            use_change_on_faces: opts.use_change_of_basis && opts.use_change_on_faces,
            allow_nested_coarse: level < opts.max_levels,
        })
    }

    /// Options handed to the nested coarse instance.
    pub fn coarse_options(&self) -> BddcOptions {
        let mut o = self.opts.clone();
        // coarse operators carry no benign structure and no user overrides
        o.benign_saddle_point = false;
        o.eliminate_dirichlet = false;
        o.adaptive_threshold = 0.0;
        o.use_deluxe_scaling = false;
        o.dirichlet_approximate = false;
        o
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_and_plain_names_are_accepted() {
        let mut o = BddcOptions::default();
        o.set_option("-pc_bddc_use_faces", "true").unwrap();
        o.set_option("levels", "2").unwrap();
        o.set_option("pc_bddc_schur_layers", "-1").unwrap();
        o.set_option("-pc_bddc_benign_trick", "").unwrap();
        assert!(o.use_faces && o.benign_saddle_point);
        assert_eq!(o.max_levels, 2);
        assert!(o.set_option("-pc_bddc_no_such_thing", "1").is_err());
        assert!(o.set_option("vertex_size", "many").is_err());
    }

    #[test]
    fn config_derives_switches() {
        let mut o = BddcOptions::default();
        o.adaptive_threshold = 2.0;
        o.use_change_on_faces = true;
        let c = BddcConfig::from_options(&o, 0).unwrap();
        assert!(c.adaptive_selection && c.use_faces);
        assert!(!c.compute_sub_schurs);
        assert!(!c.use_change_on_faces);
        assert!(!c.allow_nested_coarse);
    }

    #[test]
    fn bad_combinations_are_rejected() {
        let mut o = BddcOptions::default();
        o.max_levels = 100;
        assert!(matches!(BddcConfig::from_options(&o, 0), Err(KError::ConfigurationError(_))));
        let mut o = BddcOptions::default();
        o.adaptive_threshold = 1.5;
        o.dirichlet_approximate = true;
        assert!(matches!(BddcConfig::from_options(&o, 0), Err(KError::Unsupported(_))));
    }
}
