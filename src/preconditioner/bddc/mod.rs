//! Balancing Domain Decomposition by Constraints.
//!
//! `Bddc` preconditions a subassembled operator (`IsMatrix`) with a
//! two-level method: independent interior and constrained Neumann solves on
//! every subdomain, glued by a coarse problem on primal unknowns (vertex
//! values and edge/face averages of the near-null space).
//!
//! Setup runs as a state machine. Each call to `setup` compares the
//! operator's state tokens, the attached near-null space, the validated
//! configuration and the user inputs with the previous call and resumes
//! from the first stage whose inputs changed; with nothing changed it is a
//! no-op.

mod apply;
pub mod benign;
pub mod change;
pub mod coarse;
pub mod constraints;
pub mod graph;
pub mod local;
pub mod scaling;
pub mod sub_schurs;

use crate::config::{BddcConfig, BddcOptions};
use crate::error::KError;
use crate::matrix::is::{IsMatrix, ObjectState};
use crate::matrix::sparse::CsrMatrix;
use crate::parallel::{map_subdomains, InsertMode, VecScatter};
use crate::preconditioner::{KrylovInfo, Preconditioner};
use crate::utils::graph::{components_within, CsrGraph};
use apply::{ApplyWork, PreSolveState};
use benign::BenignSpace;
use change::{transform_local, ChangeOfBasis, ChangeStage};
use coarse::{CoarseContribution, CoarseProblem, CoarseSolver};
use constraints::{AdaptiveRows, PrimalSpace};
use faer::Mat;
use graph::{ComponentClass, DofTag, GraphInput, InterfaceGraph};
use local::{LocalInput, LocalProblem};
use scaling::LocalScaling;
use std::fmt;
use sub_schurs::{adaptive_rows, local_schur_minors, schur_groups, sum_minors, AdaptiveParams, LocalSchur};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SetupStage {
    Uninitialized,
    TopologyKnown,
    ConstraintsKnown,
    CoarseAssembled,
    Ready,
}

/// How many times each setup stage actually ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetupCounters {
    pub topology: usize,
    pub constraints: usize,
    pub local_factorizations: usize,
    pub coarse: usize,
}

/// Dofs given globally, or per subdomain in local numbering.
#[derive(Clone, Debug, PartialEq)]
pub enum DofSet {
    Global(Vec<usize>),
    Local(Vec<Vec<usize>>),
}

impl DofSet {
    fn normalized(self) -> Self {
        match self {
            DofSet::Global(mut v) => {
                v.sort_unstable();
                v.dedup();
                DofSet::Global(v)
            }
            local => local,
        }
    }

    fn to_global(&self, a: &IsMatrix) -> Result<Vec<usize>, KError> {
        let mut out = match self {
            DofSet::Global(v) => {
                if let Some(&g) = v.iter().find(|&&g| g >= a.n_global()) {
                    return Err(KError::DimensionMismatch { what: "global dof index", expected: a.n_global(), found: g });
                }
                v.clone()
            }
            DofSet::Local(per_sub) => {
                KError::check_dim("local index sets", a.n_subdomains(), per_sub.len())?;
                let mut out = Vec::new();
                for (s, locals) in per_sub.iter().enumerate() {
                    let l2g = a.local_to_global(s);
                    for &l in locals {
                        let g = l2g
                            .get(l)
                            .ok_or(KError::DimensionMismatch { what: "local dof index", expected: l2g.len(), found: l })?;
                        out.push(*g);
                    }
                }
                out
            }
        };
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }
}

/// Dofs of every field, globally or per subdomain in local numbering.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldSplit {
    Global(Vec<Vec<usize>>),
    Local(Vec<Vec<Vec<usize>>>),
}

impl FieldSplit {
    /// Field of every global dof.
    fn labels(&self, a: &IsMatrix) -> Result<Vec<usize>, KError> {
        let n = a.n_global();
        let mut label: Vec<Option<usize>> = vec![None; n];
        let mut assign = |g: usize, field: usize| -> Result<(), KError> {
            if g >= n {
                return Err(KError::DimensionMismatch { what: "dofs splitting index", expected: n, found: g });
            }
            match label[g] {
                Some(f) if f != field => Err(KError::config(format!("dof {g} belongs to fields {f} and {field}"))),
                _ => {
                    label[g] = Some(field);
                    Ok(())
                }
            }
        };
        match self {
            FieldSplit::Global(fields) => {
                for (field, dofs) in fields.iter().enumerate() {
                    for &g in dofs {
                        assign(g, field)?;
                    }
                }
            }
            FieldSplit::Local(per_sub) => {
                KError::check_dim("local dofs splittings", a.n_subdomains(), per_sub.len())?;
                for (s, fields) in per_sub.iter().enumerate() {
                    let l2g = a.local_to_global(s);
                    for (field, dofs) in fields.iter().enumerate() {
                        for &l in dofs {
                            let g = *l2g
                                .get(l)
                                .ok_or(KError::DimensionMismatch { what: "local dof index", expected: l2g.len(), found: l })?;
                            assign(g, field)?;
                        }
                    }
                }
            }
        }
        label
            .into_iter()
            .enumerate()
            .map(|(g, f)| f.ok_or_else(|| KError::config(format!("dofs splitting does not cover dof {g}"))))
            .collect()
    }
}

#[derive(Clone, Debug)]
struct UserChange {
    matrix: CsrMatrix<f64>,
    /// The change also acts on interior dofs
    interior: bool,
}

#[derive(Clone, Debug, Default)]
struct UserInputs {
    dirichlet: Option<DofSet>,
    neumann: Option<DofSet>,
    fields: Option<FieldSplit>,
    primal_vertices: Option<DofSet>,
    adjacency: Option<Vec<CsrGraph>>,
    change: Option<UserChange>,
}

fn set_input<T: PartialEq>(slot: &mut Option<T>, value: T, dirty: &mut bool) {
    if slot.as_ref() != Some(&value) {
        *slot = Some(value);
        *dirty = true;
    }
}

/// What the last successful setup was computed from.
#[derive(Clone, Debug)]
struct Snapshot {
    config: BddcConfig,
    pattern: ObjectState,
    values: ObjectState,
    nnsp: Option<ObjectState>,
    n_global: usize,
    n_subdomains: usize,
}

pub(crate) struct Topology {
    pub graph: InterfaceGraph,
    pub benign: BenignSpace,
    pub benign_dofs: Vec<usize>,
    /// Local adjacency of every subdomain
    pub adjacency: Vec<Vec<Vec<usize>>>,
    pub is_b: Vec<Vec<bool>>,
    pub global_to_n: VecScatter,
    pub global_to_d: VecScatter,
    pub global_to_b: VecScatter,
    /// User and benign stages of the change of basis
    pub pre_change: ChangeOfBasis,
}

pub struct Bddc {
    opts: BddcOptions,
    level: usize,
    user: UserInputs,
    user_dirty: bool,
    stage: SetupStage,
    snapshot: Option<Snapshot>,
    cfg: Option<BddcConfig>,
    topo: Option<Topology>,
    primal: PrimalSpace,
    benign_primals: Vec<usize>,
    change: ChangeOfBasis,
    /// Near-null space in the final basis
    nnsp_final: Option<Vec<Vec<f64>>>,
    locals: Vec<LocalProblem>,
    coarse: Option<CoarseProblem>,
    work: ApplyWork,
    p0: Vec<f64>,
    p0_persistent: bool,
    coarse_only: bool,
    presolve: PreSolveState,
    counters: SetupCounters,
}

impl Default for Bddc {
    fn default() -> Self {
        Self::new(BddcOptions::default())
    }
}

impl Bddc {
    pub fn new(opts: BddcOptions) -> Self {
        Self::with_level(opts, 0)
    }

    pub(crate) fn with_level(opts: BddcOptions, level: usize) -> Self {
        Self {
            opts,
            level,
            user: UserInputs::default(),
            user_dirty: false,
            stage: SetupStage::Uninitialized,
            snapshot: None,
            cfg: None,
            topo: None,
            primal: PrimalSpace::default(),
            benign_primals: Vec::new(),
            change: ChangeOfBasis::new(0),
            nnsp_final: None,
            locals: Vec::new(),
            coarse: None,
            work: ApplyWork::default(),
            p0: Vec::new(),
            p0_persistent: false,
            coarse_only: false,
            presolve: PreSolveState::default(),
            counters: SetupCounters::default(),
        }
    }

    pub fn options(&self) -> &BddcOptions {
        &self.opts
    }

    /// Option edits take effect at the next `setup`.
    pub fn options_mut(&mut self) -> &mut BddcOptions {
        &mut self.opts
    }

    pub fn set_option(&mut self, key: &str, value: &str) -> Result<(), KError> {
        self.opts.set_option(key, value)
    }

    pub fn set_coarsening_ratio(&mut self, ratio: usize) {
        self.opts.coarsening_ratio = ratio;
    }

    pub fn set_levels(&mut self, levels: usize) {
        self.opts.max_levels = levels;
    }

    pub fn set_use_exact_dirichlet(&mut self, flag: bool) {
        self.opts.use_exact_dirichlet_trick = flag;
    }

    /// Level of this instance; nested coarse instances sit below 0.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn stage(&self) -> SetupStage {
        self.stage
    }

    pub fn counters(&self) -> SetupCounters {
        self.counters
    }

    pub fn set_dirichlet_boundaries(&mut self, dofs: Vec<usize>) {
        set_input(&mut self.user.dirichlet, DofSet::Global(dofs).normalized(), &mut self.user_dirty);
    }

    pub fn set_dirichlet_boundaries_local(&mut self, dofs: Vec<Vec<usize>>) {
        set_input(&mut self.user.dirichlet, DofSet::Local(dofs), &mut self.user_dirty);
    }

    pub fn set_neumann_boundaries(&mut self, dofs: Vec<usize>) {
        set_input(&mut self.user.neumann, DofSet::Global(dofs).normalized(), &mut self.user_dirty);
    }

    pub fn set_neumann_boundaries_local(&mut self, dofs: Vec<Vec<usize>>) {
        set_input(&mut self.user.neumann, DofSet::Local(dofs), &mut self.user_dirty);
    }

    pub fn set_primal_vertices(&mut self, dofs: Vec<usize>) {
        set_input(&mut self.user.primal_vertices, DofSet::Global(dofs).normalized(), &mut self.user_dirty);
    }

    pub fn set_primal_vertices_local(&mut self, dofs: Vec<Vec<usize>>) {
        set_input(&mut self.user.primal_vertices, DofSet::Local(dofs), &mut self.user_dirty);
    }

    pub fn set_dofs_splitting(&mut self, fields: Vec<Vec<usize>>) {
        set_input(&mut self.user.fields, FieldSplit::Global(fields), &mut self.user_dirty);
    }

    pub fn set_dofs_splitting_local(&mut self, fields: Vec<Vec<Vec<usize>>>) {
        set_input(&mut self.user.fields, FieldSplit::Local(fields), &mut self.user_dirty);
    }

    /// Overrides the local matrix graphs used to split the interface.
    pub fn set_local_adjacency_graph(&mut self, graphs: Vec<CsrGraph>) {
        set_input(&mut self.user.adjacency, graphs, &mut self.user_dirty);
    }

    /// User change of basis `x = T x̂`; with `interior == false` only its
    /// interface-to-interface part is used. Disables the internal change.
    pub fn set_change_of_basis(&mut self, t: CsrMatrix<f64>, interior: bool) {
        self.user.change = Some(UserChange { matrix: t, interior });
        self.user_dirty = true;
    }

    /// Dirichlet dofs after setup (global numbering).
    pub fn dirichlet_boundaries(&self) -> Option<&[usize]> {
        self.topo.as_ref().map(|t| t.graph.dirichlet.as_slice())
    }

    pub fn dirichlet_boundaries_local(&self, sub: usize) -> Option<Vec<usize>> {
        self.local_positions(sub, |t| &t.graph.dirichlet)
    }

    pub fn neumann_boundaries(&self) -> Option<&[usize]> {
        self.topo.as_ref().map(|t| t.graph.neumann.as_slice())
    }

    pub fn neumann_boundaries_local(&self, sub: usize) -> Option<Vec<usize>> {
        self.local_positions(sub, |t| &t.graph.neumann)
    }

    fn local_positions(&self, sub: usize, set: impl Fn(&Topology) -> &Vec<usize>) -> Option<Vec<usize>> {
        let topo = self.topo.as_ref()?;
        if sub >= topo.global_to_n.n_subdomains() {
            return None;
        }
        let set = set(topo);
        Some(
            topo.global_to_n
                .map(sub)
                .iter()
                .enumerate()
                .filter(|(_, g)| set.binary_search(g).is_ok())
                .map(|(l, _)| l)
                .collect(),
        )
    }

    pub fn interface_graph(&self) -> Option<&InterfaceGraph> {
        self.topo.as_ref().map(|t| &t.graph)
    }

    pub fn primal_space(&self) -> &PrimalSpace {
        &self.primal
    }

    pub fn n_primal(&self) -> usize {
        self.primal.n_primal
    }

    pub fn change_of_basis(&self) -> &ChangeOfBasis {
        &self.change
    }

    pub fn local_problem(&self, sub: usize) -> Option<&LocalProblem> {
        self.locals.get(sub)
    }

    pub fn coarse(&self) -> Option<&CoarseProblem> {
        self.coarse.as_ref()
    }

    /// Benign pressure values of the last application, one per piece.
    pub fn benign_p0(&self) -> &[f64] {
        &self.p0
    }

    /// Keep `p0` after an application instead of zeroing it.
    pub fn set_p0_persistent(&mut self, flag: bool) {
        self.p0_persistent = flag;
    }

    fn restart_stage(&self, a: &IsMatrix, cfg: &BddcConfig) -> SetupStage {
        let Some(snap) = &self.snapshot else {
            return SetupStage::Uninitialized;
        };
        if self.user_dirty
            || snap.config != *cfg
            || snap.pattern != a.pattern_state()
            || snap.n_global != a.n_global()
            || snap.n_subdomains != a.n_subdomains()
        {
            return SetupStage::Uninitialized;
        }
        let mut stage = self.stage;
        if a.near_null_space().map(|s| s.state()) != snap.nnsp {
            stage = stage.min(SetupStage::TopologyKnown);
        }
        if a.value_state() != snap.values {
            // zero diagonals and adaptive constraints depend on the values
            let restart = if cfg.opts.benign_saddle_point {
                SetupStage::Uninitialized
            } else if cfg.adaptive_selection {
                SetupStage::TopologyKnown
            } else {
                SetupStage::ConstraintsKnown
            };
            stage = stage.min(restart);
        }
        stage
    }

    fn run_setup(&mut self, a: &IsMatrix) -> Result<(), KError> {
        let cfg = BddcConfig::from_options(&self.opts, self.level)?;
        let restart = self.restart_stage(a, &cfg);
        if restart == SetupStage::Ready {
            debug!(level = self.level, "setup: nothing changed");
            return Ok(());
        }
        self.stage = restart;
        if self.stage < SetupStage::TopologyKnown {
            self.build_topology(a, &cfg)?;
            self.counters.topology += 1;
            self.stage = SetupStage::TopologyKnown;
        }
        if self.stage < SetupStage::ConstraintsKnown {
            self.build_constraints(a, &cfg)?;
            self.counters.constraints += 1;
            self.stage = SetupStage::ConstraintsKnown;
        }
        if self.stage < SetupStage::CoarseAssembled {
            self.build_locals(a, &cfg)?;
            self.counters.local_factorizations += 1;
            self.stage = SetupStage::CoarseAssembled;
        }
        self.build_coarse(a, &cfg)?;
        self.counters.coarse += 1;
        self.stage = SetupStage::Ready;

        self.work = ApplyWork::default();
        self.p0 = vec![0.0; self.benign_primals.len()];
        self.presolve = PreSolveState::default();
        self.snapshot = Some(Snapshot {
            config: cfg.clone(),
            pattern: a.pattern_state(),
            values: a.value_state(),
            nnsp: a.near_null_space().map(|s| s.state()),
            n_global: a.n_global(),
            n_subdomains: a.n_subdomains(),
        });
        self.cfg = Some(cfg);
        self.user_dirty = false;
        info!(
            level = self.level,
            subdomains = a.n_subdomains(),
            n_primal = self.primal.n_primal,
            "BDDC set up"
        );
        Ok(())
    }

    fn build_topology(&mut self, a: &IsMatrix, cfg: &BddcConfig) -> Result<(), KError> {
        let n = a.n_global();
        let n_sub = a.n_subdomains();
        let to_global = |set: &Option<DofSet>| set.as_ref().map(|s| s.to_global(a)).transpose().map(Option::unwrap_or_default);
        let dirichlet = to_global(&self.user.dirichlet)?;
        let neumann = to_global(&self.user.neumann)?;
        let primal_vertices = to_global(&self.user.primal_vertices)?;
        let fields = match &self.user.fields {
            Some(split) => split.labels(a)?,
            None => vec![0; n],
        };
        let adjacency: Vec<Vec<Vec<usize>>> = match &self.user.adjacency {
            Some(graphs) => {
                KError::check_dim("local adjacency graphs", n_sub, graphs.len())?;
                graphs
                    .iter()
                    .enumerate()
                    .map(|(s, g)| {
                        KError::check_dim("local adjacency graph", a.local_to_global(s).len(), g.n_vertices())?;
                        Ok(g.to_adjacency())
                    })
                    .collect::<Result<_, KError>>()?
            }
            None => a.subdomains().iter().map(|b| b.mat.adjacency()).collect(),
        };
        let use_adjacency = self.user.adjacency.is_some() || cfg.opts.use_local_adjacency;
        let graph = InterfaceGraph::analyze(&GraphInput {
            n_global: n,
            l2g: (0..n_sub).map(|s| a.local_to_global(s)).collect(),
            adjacency: use_adjacency.then(|| adjacency.clone()),
            fields: &fields,
            dirichlet: &dirichlet,
            neumann: &neumann,
            primal_vertices: &primal_vertices,
            vertex_size: cfg.opts.vertex_size,
            graph_max_count: cfg.opts.graph_max_count,
        });

        if cfg.adaptive_selection {
            if !a.is_symmetric() {
                return Err(KError::config("adaptive constraint selection needs a symmetric operator"));
            }
            if !cfg.opts.use_deluxe_scaling
                && graph.components.iter().any(|c| c.class != ComponentClass::Vertex && c.sharing.len() > 2)
            {
                return Err(KError::config(
                    "adaptive selection on components shared by more than two subdomains needs deluxe scaling",
                ));
            }
        }

        let mult = &graph.multiplicity;
        let benign = if cfg.opts.benign_saddle_point {
            BenignSpace::detect(a, mult, cfg.opts.detect_disconnected)
        } else {
            BenignSpace::default()
        };
        let benign_dofs = benign.benign_dofs();
        let mut is_benign = vec![false; n];
        for &g in &benign_dofs {
            is_benign[g] = true;
        }

        let mut pre_change = ChangeOfBasis::new(n);
        if let Some(user) = &self.user.change {
            let t = if user.interior { user.matrix.clone() } else { interface_part(&user.matrix, mult)? };
            pre_change.push(ChangeStage::Matrix(t))?;
        }
        pre_change.push(ChangeStage::Blocks(benign.change_blocks()?))?;

        let mut is_b = Vec::with_capacity(n_sub);
        let (mut maps_n, mut maps_d, mut maps_b) = (Vec::new(), Vec::new(), Vec::new());
        for s in 0..n_sub {
            let l2g = a.local_to_global(s);
            let flags: Vec<bool> = l2g.iter().map(|&g| mult[g] > 1 || is_benign[g]).collect();
            maps_d.push(l2g.iter().zip(&flags).filter(|(_, b)| !**b).map(|(&g, _)| g).collect());
            maps_b.push(l2g.iter().zip(&flags).filter(|(_, b)| **b).map(|(&g, _)| g).collect());
            maps_n.push(l2g.to_vec());
            is_b.push(flags);
        }
        debug!(
            benign_pieces = benign.len(),
            change_stages = pre_change.n_stages(),
            "topology"
        );
        self.topo = Some(Topology {
            graph,
            benign,
            benign_dofs,
            adjacency,
            is_b,
            global_to_n: VecScatter::new("global_to_n", n, maps_n)?,
            global_to_d: VecScatter::new("global_to_d", n, maps_d)?,
            global_to_b: VecScatter::new("global_to_b", n, maps_b)?,
            pre_change,
        });
        Ok(())
    }

    fn build_constraints(&mut self, a: &IsMatrix, cfg: &BddcConfig) -> Result<(), KError> {
        let topo = self.topo.as_ref().ok_or(KError::NotSetUp)?;
        let n = a.n_global();
        let nnsp: Option<&[Vec<f64>]> = a.near_null_space().filter(|s| !s.is_empty()).map(|s| s.vectors());
        let transported = |t: &ChangeOfBasis, vs: &[Vec<f64>]| -> Vec<Vec<f64>> {
            vs.iter()
                .map(|v| {
                    let mut h = vec![0.0; n];
                    t.apply_transpose(v, &mut h);
                    h
                })
                .collect()
        };
        let nnsp_hat = nnsp.map(|vs| transported(&topo.pre_change, vs));

        let adaptive = if cfg.adaptive_selection { Some(adaptive_selection(a, cfg, topo)?) } else { None };
        let mut primal = PrimalSpace::build(&topo.graph, cfg, nnsp_hat.as_deref(), adaptive.as_ref(), &topo.benign_dofs)?;
        let mut change = topo.pre_change.clone();
        if cfg.opts.use_change_of_basis && self.user.change.is_none() {
            let blocks = primal.make_unit(&topo.graph, cfg)?;
            debug!(blocks = blocks.len(), "change of basis on interface components");
            change.push(ChangeStage::Blocks(blocks))?;
        }
        self.nnsp_final = nnsp.map(|vs| transported(&change, vs));
        self.benign_primals = primal.benign_primals();
        self.primal = primal;
        self.change = change;
        Ok(())
    }

    fn build_locals(&mut self, a: &IsMatrix, cfg: &BddcConfig) -> Result<(), KError> {
        let topo = self.topo.as_ref().ok_or(KError::NotSetUp)?;
        let opts = &cfg.opts;
        let mult = &topo.graph.multiplicity;
        let nnsp_local = match (&self.nnsp_final, opts.dirichlet_approximate) {
            (Some(vs), true) => Some(
                vs.iter()
                    .map(|v| {
                        let mut locals: Vec<Vec<f64>> =
                            (0..a.n_subdomains()).map(|s| vec![0.0; topo.global_to_n.local_size(s)]).collect();
                        topo.global_to_n.forward(v, &mut locals, InsertMode::Insert)?;
                        Ok(locals)
                    })
                    .collect::<Result<Vec<_>, KError>>()?,
            ),
            (None, true) => return Err(KError::config("approximate interior solves need a near-null space")),
            _ => None,
        };

        let mut inputs = Vec::with_capacity(a.n_subdomains());
        for (s, block) in a.subdomains().iter().enumerate() {
            let l2g = block.l2g.clone();
            let t = self.change.local_matrix(&l2g)?;
            let a_hat = if self.change.is_empty() { block.mat.to_dense() } else { transform_local(&block.mat.to_dense(), &t) };
            let is_b = topo.is_b[s].clone();
            let idx_d: Vec<usize> = (0..l2g.len()).filter(|&i| !is_b[i]).collect();
            let d_blocks = opts.detect_disconnected.then(|| {
                let mut d_pos = vec![usize::MAX; l2g.len()];
                for (k, &i) in idx_d.iter().enumerate() {
                    d_pos[i] = k;
                }
                components_within(&topo.adjacency[s], &idx_d)
                    .into_iter()
                    .map(|c| c.into_iter().map(|i| d_pos[i]).collect())
                    .collect::<Vec<Vec<usize>>>()
            });
            let null_rows = nnsp_local
                .as_ref()
                .map(|vs| Mat::from_fn(vs.len(), idx_d.len(), |k, j| vs[k][s][idx_d[j]]));
            let (constraints, primal_l2g) = self.primal.local_constraints(&l2g);
            let benign = topo
                .benign
                .pieces
                .iter()
                .enumerate()
                .filter(|(_, p)| p.sub == s)
                .filter_map(|(i, p)| l2g.iter().position(|&g| g == p.benign_dof()).map(|l| (i, l)))
                .collect();
            inputs.push(LocalInput {
                sub: s,
                multiplicity: l2g.iter().map(|&g| mult[g]).collect(),
                l2g,
                a: a_hat,
                is_b,
                constraints,
                primal_l2g,
                symmetric_primal: opts.symmetric_primal && a.is_symmetric(),
                d_blocks,
                null_rows,
                benign,
            });
        }
        let mut locals = map_subdomains(&inputs, |_, input| LocalProblem::build(input.clone()))?;

        if cfg.compute_sub_schurs {
            let groups = schur_groups(&topo.graph, opts.sub_schurs_rebuild);
            let minors: Vec<Vec<LocalSchur>> = map_subdomains(&locals, |s, lp| {
                local_schur_minors(&lp.a, &lp.l2g, s, &groups, &lp.idx_d, &topo.adjacency[s], opts.sub_schurs_layers)
            })?;
            let sums = sum_minors(&groups, &minors);
            for (lp, mine) in locals.iter_mut().zip(&minors) {
                let mut b_pos = vec![usize::MAX; lp.n()];
                for (k, &i) in lp.idx_b.iter().enumerate() {
                    b_pos[i] = k;
                }
                let blocks: Vec<(Vec<usize>, &Mat<f64>, &Mat<f64>)> = mine
                    .iter()
                    .map(|m| (m.positions.iter().map(|&i| b_pos[i]).collect(), &m.s, &sums[m.group]))
                    .collect();
                let b_mult: Vec<usize> = lp.idx_b.iter().map(|&i| mult[lp.l2g[i]]).collect();
                lp.scaling = LocalScaling::deluxe(&b_mult, &blocks)?;
            }
            debug!(groups = groups.len(), "deluxe scaling");
        }
        let n_d: usize = locals.iter().map(LocalProblem::n_d).sum();
        let n_b: usize = locals.iter().map(LocalProblem::n_b).sum();
        let pieces: usize = locals.iter().map(|lp| lp.dirichlet.n_blocks()).sum();
        debug!(n_d, n_b, interior_pieces = pieces, "local solvers");
        self.locals = locals;
        Ok(())
    }

    fn build_coarse(&mut self, a: &IsMatrix, cfg: &BddcConfig) -> Result<(), KError> {
        let parts: Vec<CoarseContribution<'_>> = self
            .locals
            .iter()
            .map(|lp| CoarseContribution { primal_l2g: &lp.primal_l2g, matrix: &lp.coarse_local })
            .collect();
        let nnsp = self.nnsp_final.as_ref().map(|vs| self.primal.primal_values(vs));
        let symmetric = a.is_symmetric() && cfg.opts.symmetric_primal;
        let coarse = CoarseProblem::build(self.primal.n_primal, &parts, cfg, nnsp, symmetric)?;
        self.coarse = Some(coarse);
        Ok(())
    }

    fn clear_built(&mut self) {
        self.stage = SetupStage::Uninitialized;
        self.snapshot = None;
        self.cfg = None;
        self.topo = None;
        self.primal = PrimalSpace::default();
        self.benign_primals.clear();
        self.change = ChangeOfBasis::new(0);
        self.nnsp_final = None;
        self.locals.clear();
        self.coarse = None;
        self.work = ApplyWork::default();
        self.p0.clear();
        self.coarse_only = false;
        self.presolve = PreSolveState::default();
    }
}

/// Interface-to-interface entries of a user change, identity elsewhere.
fn interface_part(t: &CsrMatrix<f64>, mult: &[usize]) -> Result<CsrMatrix<f64>, KError> {
    let n = mult.len();
    KError::check_dim("change of basis rows", n, t.nrows())?;
    KError::check_dim("change of basis columns", n, t.ncols())?;
    let mut trips = Vec::new();
    for i in 0..n {
        if mult[i] < 2 {
            trips.push((i, i, 1.0));
            continue;
        }
        let (cols, vals) = t.row(i);
        trips.extend(cols.iter().zip(vals).filter(|(j, _)| mult[**j] > 1).map(|(&j, &v)| (i, j, v)));
    }
    CsrMatrix::from_triplets(n, n, &trips)
}

/// Adaptive constraint rows for every edge and face, from the Schur minors
/// of the sharing subdomains in the basis of the user and benign changes.
fn adaptive_selection(a: &IsMatrix, cfg: &BddcConfig, topo: &Topology) -> Result<AdaptiveRows, KError> {
    let groups = schur_groups(&topo.graph, false);
    let blocks = a.subdomains();
    let minors: Vec<Vec<LocalSchur>> = map_subdomains(blocks, |s, block| {
        let dense = block.mat.to_dense();
        let a_hat = if topo.pre_change.is_empty() {
            dense
        } else {
            transform_local(&dense, &topo.pre_change.local_matrix(&block.l2g)?)
        };
        let interior: Vec<usize> = (0..block.l2g.len()).filter(|&i| !topo.is_b[s][i]).collect();
        local_schur_minors(&a_hat, &block.l2g, s, &groups, &interior, &topo.adjacency[s], cfg.opts.sub_schurs_layers)
    })?;
    let params = AdaptiveParams {
        threshold: cfg.opts.adaptive_threshold,
        nmin: cfg.opts.adaptive_nmin,
        nmax: cfg.opts.adaptive_nmax,
        deluxe: cfg.opts.use_deluxe_scaling,
        rtol: cfg.opts.svd_tolerance,
    };
    let mut rows: AdaptiveRows = vec![None; topo.graph.components.len()];
    let mut selected = 0;
    for (gi, group) in groups.iter().enumerate() {
        let mats: Vec<&Mat<f64>> = minors.iter().flatten().filter(|m| m.group == gi).map(|m| &m.s).collect();
        let sel = adaptive_rows(&mats, &params)?;
        selected += sel.nrows();
        rows[group.components[0]] = Some(sel);
    }
    debug!(groups = groups.len(), selected, "adaptive constraints");
    Ok(rows)
}

impl Preconditioner<IsMatrix, Vec<f64>> for Bddc {
    fn setup(&mut self, a: &IsMatrix) -> Result<(), KError> {
        let res = self.run_setup(a);
        if res.is_err() {
            self.clear_built();
        }
        res
    }

    fn apply(&mut self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
        self.apply_core(r, z, false)
    }

    fn apply_transpose(&mut self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), KError> {
        self.apply_core(r, z, true)
    }

    fn pre_solve(&mut self, a: &IsMatrix, b: &mut Vec<f64>, x: &mut Vec<f64>, info: &mut KrylovInfo) -> Result<(), KError> {
        self.pre_solve_core(a, b, x, info)
    }

    fn post_solve(&mut self, _a: &IsMatrix, b: &mut Vec<f64>, x: &mut Vec<f64>, info: &mut KrylovInfo) -> Result<(), KError> {
        self.post_solve_core(b, x, info)
    }

    fn reset(&mut self) {
        self.clear_built();
    }
}

impl fmt::Display for Bddc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "  ".repeat(self.level);
        writeln!(f, "{indent}BDDC preconditioner, level {}", self.level)?;
        let (Some(topo), Some(cfg), Some(coarse)) = (&self.topo, &self.cfg, &self.coarse) else {
            return writeln!(f, "{indent}  not set up");
        };
        let p = &self.primal;
        writeln!(f, "{indent}  subdomains: {}", self.locals.len())?;
        writeln!(
            f,
            "{indent}  interface components: {} vertices, {} edges, {} faces",
            topo.graph.count(ComponentClass::Vertex),
            topo.graph.count(ComponentClass::Edge),
            topo.graph.count(ComponentClass::Face)
        )?;
        let (mut n_dir, mut n_neu) = (0, 0);
        for lp in &self.locals {
            for tag in topo.graph.local_tags(&lp.l2g) {
                match tag {
                    DofTag::Dirichlet => n_dir += 1,
                    DofTag::Neumann => n_neu += 1,
                    _ => {}
                }
            }
        }
        writeln!(f, "{indent}  local boundary dofs: {n_dir} dirichlet, {n_neu} neumann")?;
        writeln!(
            f,
            "{indent}  primal unknowns: {} ({} vertex, {} edge, {} face, {} benign)",
            p.n_primal, p.n_vertices, p.n_edges, p.n_faces, p.n_benign
        )?;
        writeln!(f, "{indent}  change of basis stages: {}", self.change.n_stages())?;
        let scaling = if self.locals.iter().any(|lp| lp.scaling.is_deluxe()) { "deluxe" } else { "multiplicity" };
        writeln!(f, "{indent}  scaling: {scaling}")?;
        let approx = self.locals.iter().any(|lp| lp.dirichlet.is_approximate());
        writeln!(f, "{indent}  interior solver: {}", if approx { "approximate" } else { "exact" })?;
        writeln!(f, "{indent}  switch static: {}", cfg.opts.switch_static)?;
        match coarse.solver() {
            CoarseSolver::Empty => writeln!(f, "{indent}  coarse solver: none"),
            CoarseSolver::Direct(_) => writeln!(f, "{indent}  coarse solver: direct LU"),
            CoarseSolver::Nested { pc, .. } => {
                writeln!(f, "{indent}  coarse solver: nested BDDC ({} levels below)", coarse.depth())?;
                write!(f, "{pc}")
            }
        }
    }
}
