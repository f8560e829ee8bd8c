//! Adaptive Gauss-Kronrod quadrature used when a model has no analytic integral.
//!
//! Panels live in a max-heap keyed on their G7-K15 error estimate. The worst
//! panel is popped and halved until the summed error falls under
//! `atol + rtol * |integral|` or `limit` bisections have been spent.
//! [`quad_energy`] moves wide energy bins to `ln E` first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during numerical integration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuadratureError {
    #[error("Invalid integration interval [{a}, {b}]")]
    InvalidInterval { a: f64, b: f64 },

    #[error("Invalid quadrature option {option}: {message}")]
    InvalidOption { option: String, message: String },
}

/// Tolerances and subdivision limit for adaptive quadrature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadOptions {
    /// Absolute tolerance
    pub atol: f64,
    /// Relative tolerance
    pub rtol: f64,
    /// Maximum number of bisections
    pub limit: usize,
}

impl QuadOptions {
    /// Tolerances used for photon-flux integrals (abs 0.01, rel 1e-4).
    pub const fn photon_flux() -> Self {
        Self {
            atol: 0.01,
            rtol: 1e-4,
            limit: 50,
        }
    }

    /// Tolerances used for energy-flux integrals (abs 0, rel 1e-3).
    pub const fn energy_flux() -> Self {
        Self {
            atol: 0.0,
            rtol: 1e-3,
            limit: 50,
        }
    }
}

impl Default for QuadOptions {
    fn default() -> Self {
        Self {
            atol: 1e-8,
            rtol: 1e-8,
            limit: 50,
        }
    }
}

/// Result of adaptive quadrature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadResult {
    /// Computed integral value
    pub integral: f64,
    /// Estimated absolute error
    pub error: f64,
    /// Number of function evaluations
    pub neval: usize,
    /// Whether the tolerance was met within the subdivision limit
    pub converged: bool,
}

/// Bins spanning more than this ratio are integrated in `ln E`.
const LOG_SPAN_RATIO: f64 = 10.0;

/// Number of integrand evaluations per panel.
const POINTS_PER_PANEL: usize = 15;

/// Positive Kronrod abscissae on [-1, 1], outermost first; the last is the centre.
const NODES: [f64; 8] = [
    0.991_455_371_120_812_6,
    0.949_107_912_342_758_5,
    0.864_864_423_359_769_1,
    0.741_531_185_599_394_4,
    0.586_087_235_467_691_1,
    0.405_845_151_377_397_2,
    0.207_784_955_007_898_5,
    0.0,
];

/// Kronrod weights matching `NODES`.
const KRONROD_WEIGHTS: [f64; 8] = [
    0.022_935_322_010_529_224,
    0.063_092_092_629_978_56,
    0.104_790_010_322_250_18,
    0.140_653_259_715_525_92,
    0.169_004_726_639_267_9,
    0.190_350_578_064_785_4,
    0.204_432_940_075_298_89,
    0.209_482_141_084_727_82,
];

/// Gauss weights for the odd entries of `NODES` (1, 3, 5 and the centre).
const GAUSS_WEIGHTS: [f64; 4] = [
    0.129_484_966_168_869_7,
    0.279_705_391_489_276_64,
    0.381_830_050_505_118_9,
    0.417_959_183_673_469_4,
];

impl QuadOptions {
    fn tolerance_for(&self, integral: f64) -> f64 {
        self.atol + self.rtol * integral.abs()
    }

    fn check(&self) -> Result<(), QuadratureError> {
        if self.limit == 0 {
            return Err(QuadratureError::InvalidOption {
                option: "limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.atol < 0.0 || self.rtol < 0.0 {
            return Err(QuadratureError::InvalidOption {
                option: "atol/rtol".to_string(),
                message: "tolerances must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

/// One sub-interval with its Kronrod estimate.
///
/// Ordered by error so the heap hands back the worst panel first.
#[derive(Debug, Clone, Copy)]
struct Panel {
    lo: f64,
    hi: f64,
    integral: f64,
    error: f64,
}

impl Panel {
    /// Apply the G7-K15 pair on `[lo, hi]`.
    fn evaluate<F>(f: &F, lo: f64, hi: f64) -> Self
    where
        F: Fn(f64) -> f64,
    {
        let centre = 0.5 * (lo + hi);
        let half_width = 0.5 * (hi - lo);

        let f_centre = f(centre);
        let mut kronrod = KRONROD_WEIGHTS[7] * f_centre;
        let mut gauss = GAUSS_WEIGHTS[3] * f_centre;

        for (j, node) in NODES[..7].iter().enumerate() {
            let dx = half_width * node;
            let pair = f(centre - dx) + f(centre + dx);
            kronrod += KRONROD_WEIGHTS[j] * pair;
            if j % 2 == 1 {
                gauss += GAUSS_WEIGHTS[j / 2] * pair;
            }
        }

        Panel {
            lo,
            hi,
            integral: kronrod * half_width,
            error: ((kronrod - gauss) * half_width).abs(),
        }
    }

    fn split<F>(&self, f: &F) -> (Self, Self)
    where
        F: Fn(f64) -> f64,
    {
        let mid = 0.5 * (self.lo + self.hi);
        (Panel::evaluate(f, self.lo, mid), Panel::evaluate(f, mid, self.hi))
    }
}

impl PartialEq for Panel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Panel {}

impl PartialOrd for Panel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Panel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.error.total_cmp(&other.error)
    }
}

/// Integrate `f` over `[a, b]` with adaptive G7-K15 quadrature.
///
/// A zero-width interval integrates to exactly zero without evaluating `f`.
///
/// # Errors
/// Returns [`QuadratureError::InvalidInterval`] for reversed or non-finite
/// bounds and [`QuadratureError::InvalidOption`] for a zero subdivision
/// limit or negative tolerances.
pub fn quad<F>(f: F, a: f64, b: f64, options: &QuadOptions) -> Result<QuadResult, QuadratureError>
where
    F: Fn(f64) -> f64,
{
    if !a.is_finite() || !b.is_finite() || a > b {
        return Err(QuadratureError::InvalidInterval { a, b });
    }
    options.check()?;

    if a == b {
        return Ok(QuadResult {
            integral: 0.0,
            error: 0.0,
            neval: 0,
            converged: true,
        });
    }

    let whole = Panel::evaluate(&f, a, b);
    let mut integral = whole.integral;
    let mut error = whole.error;
    let mut neval = POINTS_PER_PANEL;

    let mut panels = BinaryHeap::new();
    panels.push(whole);

    let mut bisections = 0;
    while bisections < options.limit && error > options.tolerance_for(integral) {
        let Some(worst) = panels.pop() else {
            break;
        };
        let (left, right) = worst.split(&f);
        neval += 2 * POINTS_PER_PANEL;
        bisections += 1;

        integral += left.integral + right.integral - worst.integral;
        error += left.error + right.error - worst.error;
        panels.push(left);
        panels.push(right);
    }

    // Re-sum from the panels left in the heap
    let integral: f64 = panels.iter().map(|p| p.integral).sum();
    let error: f64 = panels.iter().map(|p| p.error).sum();

    Ok(QuadResult {
        integral,
        error,
        neval,
        converged: error <= options.tolerance_for(integral),
    })
}

/// Integrate a spectrum `f(E)` over the energy bin `[e1, e2]`.
///
/// Bins with `e1 > 0` spanning more than a decade are integrated in `ln E`,
/// where power-law-like spectra are smooth; narrower bins go straight to
/// [`quad`].
pub fn quad_energy<F>(
    f: F,
    e1: f64,
    e2: f64,
    options: &QuadOptions,
) -> Result<QuadResult, QuadratureError>
where
    F: Fn(f64) -> f64,
{
    if e1 > 0.0 && e2.is_finite() && e2 > LOG_SPAN_RATIO * e1 {
        let in_log = |u: f64| {
            let energy = u.exp();
            f(energy) * energy
        };
        return quad(in_log, e1.ln(), e2.ln(), options);
    }
    quad(f, e1, e2, options)
}
