use itertools::iterate;

/// A step-damping policy consulted after each trial Newton step.
///
/// The solver probes the scales yielded by [`propose_scales`], applies each
/// to the Newton direction and asks [`accept`] whether the resulting
/// residual norm is satisfactory. If every proposal is refused, the solver
/// falls back to a single step of [`max_scale`].
///
/// Passing `None` for the line search is equivalent to a strategy that
/// always accepts scale 1 unconditionally.
///
/// [`propose_scales`]: LineSearch::propose_scales
/// [`accept`]: LineSearch::accept
/// [`max_scale`]: LineSearch::max_scale
pub trait LineSearch {
    /// A lazy sequence of candidate step scales, probed in order.
    fn propose_scales(&self) -> Box<dyn Iterator<Item = f64> + '_>;

    /// Whether a trial step of the given scale is acceptable.
    fn accept(&self, norm_before: f64, norm_after: f64, scale: f64) -> bool;

    /// The scale cap used when every proposed scale is refused.
    fn max_scale(&self) -> f64;
}

/// Trivial strategy: a single, full Newton step, accepted unconditionally.
#[derive(Debug, Clone)]
pub struct FullStep;

impl LineSearch for FullStep {
    fn propose_scales(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        Box::new(std::iter::once(1.0))
    }

    fn accept(&self, _norm_before: f64, norm_after: f64, _scale: f64) -> bool {
        norm_after.is_finite()
    }

    fn max_scale(&self) -> f64 {
        1.0
    }
}

/// Backtracking strategy parameterized by three scale bounds.
///
/// Starts from the full Newton step and backs off gently before switching
/// to aggressive quartering, refusing to shrink below `min_scale`. Any
/// improving step at or above `accept_scale` is accepted outright; below
/// it a step must additionally satisfy a sufficient-decrease condition.
/// `max_scale` caps the fallback step taken when all proposals are refused.
///
/// See Nocedal & Wright (2006), Numerical Optimization, Chapter 3.1.
#[derive(Debug, Clone, PartialEq)]
pub struct NormBased {
    pub min_scale: f64,
    pub accept_scale: f64,
    pub max_scale: f64,
}

impl Default for NormBased {
    fn default() -> Self {
        NormBased {
            min_scale: 1e-2,
            accept_scale: 2.0 / 3.0,
            max_scale: 2.0,
        }
    }
}

impl NormBased {
    pub fn new(min_scale: f64, accept_scale: f64, max_scale: f64) -> Self {
        assert!(min_scale > 0.0, "minimum scale must be positive");
        assert!(
            min_scale <= accept_scale && accept_scale <= max_scale,
            "scale bounds must be ordered: min <= accept <= max"
        );
        NormBased {
            min_scale,
            accept_scale,
            max_scale,
        }
    }
}

impl LineSearch for NormBased {
    fn propose_scales(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        let min_scale = self.min_scale;
        Box::new(
            [1.0, 0.75, 0.5]
                .into_iter()
                .chain(iterate(0.25, |scale| 0.25 * scale))
                .take_while(move |&scale| scale >= min_scale),
        )
    }

    fn accept(&self, norm_before: f64, norm_after: f64, scale: f64) -> bool {
        if !norm_after.is_finite() {
            return false;
        }
        if scale >= self.accept_scale {
            norm_after < norm_before
        } else {
            // Sufficient-decrease condition for strongly damped steps.
            let c = 1e-4;
            norm_after <= (1.0 - c * scale) * norm_before
        }
    }

    fn max_scale(&self) -> f64 {
        self.max_scale
    }
}
