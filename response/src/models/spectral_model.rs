//! The photon-flux model capability consumed by the convolution.
//!
//! A model is any type implementing [`SpectralModel`]: it has a name, a
//! formula, an explicit parameter map, a point evaluation and an integral
//! over an energy bin. Models with a closed-form integral override
//! [`SpectralModel::integral`]; everything else falls back to adaptive
//! quadrature with the photon-flux tolerances.

use log::warn;

use super::quadrature::{quad_energy, QuadOptions};
use super::{ModelError, ParameterMap};

/// keV to erg conversion factor.
pub const KEV_TO_ERG: f64 = 1.602_176_57e-9;

/// Differential photon spectrum `f(E)` in photons cm⁻² s⁻¹ keV⁻¹ with E in keV.
pub trait SpectralModel: Send + Sync {
    fn name(&self) -> String;

    fn formula(&self) -> String;

    fn parameters(&self) -> &ParameterMap;

    /// Set a parameter value by name, respecting its bounds.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), ModelError>;

    /// Differential photon flux at `energy`.
    fn evaluate(&self, energy: f64) -> f64;

    /// Photon fluence between `e1` and `e2`.
    ///
    /// Defaults to numerical quadrature of [`SpectralModel::evaluate`].
    fn integral(&self, e1: f64, e2: f64) -> f64 {
        integrate_photon_flux(self, e1, e2, &QuadOptions::photon_flux())
    }

    /// Energy flux between `e1` and `e2` in erg cm⁻² s⁻¹.
    fn energy_flux(&self, e1: f64, e2: f64) -> f64 {
        integrate_energy_flux(self, e1, e2, &QuadOptions::energy_flux())
    }
}

/// Numerically integrate the photon flux of `model` over `[e1, e2]`.
pub fn integrate_photon_flux<M>(model: &M, e1: f64, e2: f64, options: &QuadOptions) -> f64
where
    M: SpectralModel + ?Sized,
{
    integrate_with_fallback(|e| model.evaluate(e), e1, e2, options, &model.name())
}

/// Numerically integrate `E * f(E)` over `[e1, e2]`, converted to erg.
pub fn integrate_energy_flux<M>(model: &M, e1: f64, e2: f64, options: &QuadOptions) -> f64
where
    M: SpectralModel + ?Sized,
{
    let kev_flux = integrate_with_fallback(
        |e| e * model.evaluate(e),
        e1,
        e2,
        options,
        &model.name(),
    );
    kev_flux * KEV_TO_ERG
}

/// Quadrature that always returns a number.
///
/// Reversed bounds flip the sign, unconverged results are returned with a
/// warning and invalid bounds produce NaN.
pub(crate) fn integrate_with_fallback<F>(
    f: F,
    e1: f64,
    e2: f64,
    options: &QuadOptions,
    label: &str,
) -> f64
where
    F: Fn(f64) -> f64,
{
    if e2 < e1 {
        return -integrate_with_fallback(f, e2, e1, options, label);
    }

    match quad_energy(f, e1, e2, options) {
        Ok(result) => {
            if !result.converged {
                warn!(
                    "Integral of {label} over [{e1}, {e2}] did not converge (error estimate {:.3e})",
                    result.error
                );
            }
            result.integral
        }
        Err(e) => {
            warn!("Cannot integrate {label} over [{e1}, {e2}]: {e}");
            f64::NAN
        }
    }
}
