use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::linesearch::LineSearch;
use crate::system::ExprSystem;
use crate::targets::{ReturnConvention, TargetList};
use log::{debug, info};
use nalgebra::{DVector, DVectorView};
use serde::{Deserialize, Serialize};
use skoll_expr::{Assignment, Evaluator, Expr, PointSet, Tensor};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    /// The residual norm dropped below the tolerance.
    Converged,
    /// The iteration cap was reached without convergence.
    MaxiterExceeded,
    /// The residual norm became non-finite or stopped making progress.
    Diverged,
    /// An external abort was requested between iterations.
    Aborted,
}

/// Summary of a completed or failed solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveInfo {
    /// Number of accepted iterations. Never exceeds the configured
    /// iteration cap.
    pub niter: usize,
    /// Residual norm at termination.
    pub resnorm: f64,
    pub status: SolverStatus,
}

/// A converged solution, handed back in the form dictated by the target
/// specification's return convention.
#[derive(Debug, Clone)]
pub enum Solution {
    Bare(Tensor),
    Tuple(Vec<Tensor>),
    Named(BTreeMap<String, Tensor>),
}

impl Solution {
    pub fn as_bare(&self) -> Option<&Tensor> {
        match self {
            Solution::Bare(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Tensor]> {
        match self {
            Solution::Tuple(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_named(&self) -> Option<&BTreeMap<String, Tensor>> {
        match self {
            Solution::Named(values) => Some(values),
            _ => None,
        }
    }

    /// Looks a target up by name in a name-keyed solution.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.as_named().and_then(|values| values.get(name))
    }
}

/// Cooperative cancellation signal, checked by the solver between
/// iterations only. Aborting leaves the last completed assignment intact
/// in the resulting error.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Settings shared by all solver drivers.
struct DriverCommon {
    initial: Assignment,
    maxiter: Option<usize>,
    linesearch: Option<Box<dyn LineSearch>>,
    config: SolverConfig,
    abort: AbortHandle,
    divergence_window: usize,
}

impl Default for DriverCommon {
    fn default() -> Self {
        DriverCommon {
            initial: Assignment::new(),
            maxiter: None,
            linesearch: None,
            config: SolverConfig::default(),
            abort: AbortHandle::new(),
            divergence_window: 5,
        }
    }
}

macro_rules! impl_driver_builders {
    ($driver:ident) => {
        impl $driver {
            /// Caps the number of accepted iterations. A cap of `n`
            /// permits exactly `n` completed iterations; reaching it
            /// without convergence is reported as an error, never as
            /// success.
            pub fn with_maxiter(mut self, maxiter: usize) -> Self {
                self.common.maxiter = Some(maxiter);
                self
            }

            /// Sets the step-damping strategy. `None` always takes the
            /// full Newton step.
            pub fn with_linesearch(mut self, linesearch: Option<Box<dyn LineSearch>>) -> Self {
                self.common.linesearch = linesearch;
                self
            }

            /// Sets the initial argument assignment. Target arguments
            /// absent from it start from zero tensors of their registered
            /// shapes; all other arguments of the residual expressions
            /// must be bound here.
            pub fn with_initial(mut self, initial: Assignment) -> Self {
                self.common.initial = initial;
                self
            }

            pub fn with_config(mut self, config: SolverConfig) -> Self {
                self.common.config = config;
                self
            }

            /// Number of consecutive iterations without improvement of the
            /// best residual norm after which the solve is declared
            /// diverged.
            pub fn with_divergence_window(mut self, window: usize) -> Self {
                assert!(window > 0, "divergence window must be at least 1");
                self.common.divergence_window = window;
                self
            }

            /// A handle that cancels the solve from another thread. The
            /// signal is honored between iterations, never mid-evaluation.
            pub fn abort_handle(&self) -> AbortHandle {
                self.common.abort.clone()
            }

            /// Runs the solve to convergence. The tolerance is mandatory
            /// and must be finite and positive.
            pub fn solve(&self, tol: f64) -> Result<Solution, SolverError> {
                self.solve_withinfo(tol).map(|(solution, _)| solution)
            }
        }
    };
}

/// Newton iteration on one residual expression per target.
///
/// Each iteration evaluates the residual vector and its symbolically
/// derived Jacobian at the current assignment, solves for the Newton
/// direction through the configured linear-algebra backend, and applies a
/// possibly damped step.
pub struct Newton {
    system: ExprSystem,
    common: DriverCommon,
}

impl Newton {
    pub fn new(targets: &str, residuals: &[Expr], points: PointSet) -> Result<Self, SolverError> {
        let targets = TargetList::parse(targets)?;
        let system = ExprSystem::new(targets, residuals.to_vec(), points)?;
        Ok(Newton {
            system,
            common: DriverCommon::default(),
        })
    }

    /// Functional-residual mode: a scalar integrand plus colon-paired
    /// `trial:test` targets. The integrand is differentiated against each
    /// test argument to obtain the residuals before iteration begins.
    pub fn functional(targets: &str, integrand: &Expr, points: PointSet) -> Result<Self, SolverError> {
        let targets = TargetList::parse(targets)?;
        let system = ExprSystem::from_functional(targets, integrand, points)?;
        Ok(Newton {
            system,
            common: DriverCommon::default(),
        })
    }

    pub fn solve_withinfo(&self, tol: f64) -> Result<(Solution, SolveInfo), SolverError> {
        run(&self.system, &self.common, tol, Strategy::Newton)
    }
}

/// Minimization of a scalar functional via Newton iteration on its
/// gradient.
///
/// The residual is the symbolic gradient of the objective with respect to
/// the targets and the linear solve uses its Hessian. In addition to the
/// residual-norm rules shared with [`Newton`], an accepted step must not
/// increase the objective's value.
pub struct Minimize {
    system: ExprSystem,
    objective: Expr,
    common: DriverCommon,
}

impl Minimize {
    pub fn new(targets: &str, objective: &Expr, points: PointSet) -> Result<Self, SolverError> {
        let targets = TargetList::parse(targets)?;
        let system = ExprSystem::from_objective(targets, objective, points)?;
        Ok(Minimize {
            system,
            objective: objective.clone(),
            common: DriverCommon::default(),
        })
    }

    pub fn solve_withinfo(&self, tol: f64) -> Result<(Solution, SolveInfo), SolverError> {
        run(
            &self.system,
            &self.common,
            tol,
            Strategy::Minimize {
                objective: &self.objective,
            },
        )
    }
}

/// Newton iteration with pseudo-time continuation.
///
/// The Jacobian is augmented with an inertia term `1/dt` on the diagonal,
/// where the timestep grows from its initial value by the ratio of the
/// initial to the current residual norm. The continuation regularizes
/// singular or stiff Jacobians far from the solution and degenerates to
/// plain Newton as the residual vanishes.
pub struct Pseudotime {
    system: ExprSystem,
    timestep: f64,
    common: DriverCommon,
}

impl Pseudotime {
    pub fn new(targets: &str, residuals: &[Expr], points: PointSet, timestep: f64) -> Result<Self, SolverError> {
        if !(timestep.is_finite() && timestep > 0.0) {
            return Err(SolverError::Configuration(format!(
                "pseudo-time step must be finite and positive, got {}",
                timestep
            )));
        }
        let targets = TargetList::parse(targets)?;
        let system = ExprSystem::new(targets, residuals.to_vec(), points)?;
        Ok(Pseudotime {
            system,
            timestep,
            common: DriverCommon::default(),
        })
    }

    pub fn solve_withinfo(&self, tol: f64) -> Result<(Solution, SolveInfo), SolverError> {
        run(
            &self.system,
            &self.common,
            tol,
            Strategy::Pseudotime {
                timestep: self.timestep,
            },
        )
    }
}

impl_driver_builders!(Newton);
impl_driver_builders!(Minimize);
impl_driver_builders!(Pseudotime);

#[derive(Clone, Copy)]
enum Strategy<'a> {
    Newton,
    Minimize { objective: &'a Expr },
    Pseudotime { timestep: f64 },
}

fn run(
    system: &ExprSystem,
    common: &DriverCommon,
    tol: f64,
    strategy: Strategy,
) -> Result<(Solution, SolveInfo), SolverError> {
    if !(tol.is_finite() && tol > 0.0) {
        return Err(SolverError::Configuration(format!(
            "tolerance must be finite and positive, got {}",
            tol
        )));
    }
    let evaluator = Evaluator::new(&common.config.eval).map_err(|err| {
        SolverError::Configuration(format!("failed to build evaluation worker pool: {}", err))
    })?;
    let backend = common.config.backend.solver();
    let objective = match strategy {
        Strategy::Minimize { objective } => Some(objective),
        _ => None,
    };

    let mut args = common.initial.clone();
    system.seed_targets(&mut args);

    let mut residual = system.residual_vector(&evaluator, &args)?;
    let mut norm = residual.norm();
    let norm0 = norm;

    let mut niter = 0;
    let mut best = norm;
    let mut stalled = 0;

    loop {
        if norm < tol {
            info!("solver converged after {} iterations (residual norm {:.3e})", niter, norm);
            let info = SolveInfo {
                niter,
                resnorm: norm,
                status: SolverStatus::Converged,
            };
            return Ok((extract_solution(system, &args), info));
        }
        if !norm.is_finite() {
            return Err(failure(SolverStatus::Diverged, niter, norm, args));
        }
        if common.abort.is_aborted() {
            return Err(failure(SolverStatus::Aborted, niter, norm, args));
        }
        if common.maxiter == Some(niter) {
            return Err(failure(SolverStatus::MaxiterExceeded, niter, norm, args));
        }

        let mut jacobian = system.jacobian_matrix(&evaluator, &args)?;
        if let Strategy::Pseudotime { timestep } = strategy {
            // 1/dt_k = |r_k| / (dt_0 |r_0|), so the inertia vanishes as
            // the residual does.
            let inertia = norm / (timestep * norm0);
            for i in 0..jacobian.nrows() {
                jacobian[(i, i)] += inertia;
            }
        }
        let direction = backend
            .solve(&jacobian, &(-&residual))
            .map_err(SolverError::Linear)?;
        let x0 = system.gather(&args);

        let step = probe_steps(
            system,
            &evaluator,
            common.linesearch.as_deref(),
            objective,
            &args,
            &x0,
            &direction,
            norm,
        )?;
        let (scale, new_args, new_residual, new_norm) = match step {
            Some(step) => step,
            // No step satisfied the descent requirement.
            None => return Err(failure(SolverStatus::Diverged, niter, norm, args)),
        };
        debug!(
            "iteration {}: step scale {}, residual norm {:.3e} -> {:.3e}",
            niter, scale, norm, new_norm
        );

        args = new_args;
        residual = new_residual;
        norm = new_norm;
        niter += 1;

        if norm < best {
            best = norm;
            stalled = 0;
        } else {
            stalled += 1;
            if stalled >= common.divergence_window {
                return Err(failure(SolverStatus::Diverged, niter, norm, args));
            }
        }
    }
}

type Step = (f64, Assignment, DVector<f64>, f64);

/// Probes trial step scales and returns the first acceptable step, or the
/// fallback step at the strategy's maximum scale when every proposal is
/// refused. Returns `None` only when a descent guarantee is in force and
/// no probed step satisfies it.
#[allow(clippy::too_many_arguments)]
fn probe_steps(
    system: &ExprSystem,
    evaluator: &Evaluator,
    linesearch: Option<&dyn LineSearch>,
    objective: Option<&Expr>,
    args: &Assignment,
    x0: &DVector<f64>,
    direction: &DVector<f64>,
    norm: f64,
) -> Result<Option<Step>, SolverError> {
    let linesearch = match linesearch {
        Some(linesearch) => linesearch,
        None => {
            let (trial_args, trial_residual, trial_norm) =
                try_step(system, evaluator, args, x0, direction, 1.0)?;
            return Ok(Some((1.0, trial_args, trial_residual, trial_norm)));
        }
    };

    let objective0 = match objective {
        Some(objective) => Some(system.scalar(evaluator, args, objective)?),
        None => None,
    };
    // The best non-increasing candidate seen so far, used when the descent
    // guarantee refuses every scale the norm rule would accept.
    let mut best_descent: Option<(Step, f64)> = None;

    for scale in linesearch.propose_scales() {
        let (trial_args, trial_residual, trial_norm) =
            try_step(system, evaluator, args, x0, direction, scale)?;

        let trial_objective = match objective {
            Some(objective) => Some(system.scalar(evaluator, &trial_args, objective)?),
            None => None,
        };
        let descent_ok = match (objective0, trial_objective) {
            (Some(before), Some(after)) => after.is_finite() && after <= before,
            _ => true,
        };

        if descent_ok && linesearch.accept(norm, trial_norm, scale) {
            return Ok(Some((scale, trial_args, trial_residual, trial_norm)));
        }
        if descent_ok {
            if let Some(after) = trial_objective {
                let improves = best_descent
                    .as_ref()
                    .map(|(_, best)| after < *best)
                    .unwrap_or(true);
                if improves {
                    best_descent = Some(((scale, trial_args, trial_residual, trial_norm), after));
                }
            }
        }
    }

    if objective.is_some() {
        return Ok(best_descent.map(|(step, _)| step));
    }

    let scale = linesearch.max_scale();
    debug!("line search exhausted all proposals, falling back to scale {}", scale);
    let (trial_args, trial_residual, trial_norm) = try_step(system, evaluator, args, x0, direction, scale)?;
    Ok(Some((scale, trial_args, trial_residual, trial_norm)))
}

fn try_step(
    system: &ExprSystem,
    evaluator: &Evaluator,
    args: &Assignment,
    x0: &DVector<f64>,
    direction: &DVector<f64>,
    scale: f64,
) -> Result<(Assignment, DVector<f64>, f64), SolverError> {
    let x = x0 + direction * scale;
    let mut trial_args = args.clone();
    system.scatter(&DVectorView::from(&x), &mut trial_args);
    let residual = system.residual_vector(evaluator, &trial_args)?;
    let norm = residual.norm();
    Ok((trial_args, residual, norm))
}

fn failure(status: SolverStatus, niter: usize, resnorm: f64, assignment: Assignment) -> SolverError {
    SolverError::Failed {
        info: SolveInfo {
            niter,
            resnorm,
            status,
        },
        assignment,
    }
}

fn extract_solution(system: &ExprSystem, args: &Assignment) -> Solution {
    let targets = system.targets();
    let value_of = |name: &str| {
        args.get(name)
            .cloned()
            .expect("target arguments are seeded before iteration")
    };
    match targets.convention() {
        ReturnConvention::Bare => Solution::Bare(value_of(&targets.entries()[0].trial)),
        ReturnConvention::Tuple => {
            Solution::Tuple(targets.iter().map(|entry| value_of(&entry.trial)).collect())
        }
        ReturnConvention::Named => Solution::Named(
            targets
                .iter()
                .map(|entry| (entry.trial.clone(), value_of(&entry.trial)))
                .collect(),
        ),
    }
}
