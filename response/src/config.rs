//! Tunable tolerances, stored as JSON.
//!
//! ```rust
//! use response::config::CoreConfig;
//!
//! let config = CoreConfig::default();
//! assert!(config.response_set.check_binning);
//! assert_eq!(config.photon_flux.rtol, 1e-4);
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument_response::InstrumentResponse;
use crate::models::{integrate_energy_flux, integrate_photon_flux, QuadOptions, SpectralModel};
use crate::response_set::ResponseSetConfig;

/// Errors that can occur when loading or saving a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by the response set and model integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub response_set: ResponseSetConfig,

    /// Quadrature used for photon-flux integrals of models without an
    /// analytic integral
    pub photon_flux: QuadOptions,

    /// Quadrature used for energy-flux integrals
    pub energy_flux: QuadOptions,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            response_set: ResponseSetConfig::default(),
            photon_flux: QuadOptions::photon_flux(),
            energy_flux: QuadOptions::energy_flux(),
        }
    }
}

impl CoreConfig {
    /// Check tolerances are finite and non-negative and limits are positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.response_set.interval_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "interval_tolerance must be finite and non-negative, got {tolerance}"
            )));
        }

        for (label, options) in [
            ("photon_flux", &self.photon_flux),
            ("energy_flux", &self.energy_flux),
        ] {
            if !(options.atol >= 0.0 && options.rtol >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{label} tolerances must be non-negative, got atol={} rtol={}",
                    options.atol, options.rtol
                )));
            }
            if options.limit == 0 {
                return Err(ConfigError::Invalid(format!("{label} limit must be positive")));
            }
        }

        Ok(())
    }

    /// Photon fluence of `model` over `[e1, e2]` with the configured tolerances.
    pub fn photon_fluence<M>(&self, model: &M, e1: f64, e2: f64) -> f64
    where
        M: SpectralModel + ?Sized,
    {
        integrate_photon_flux(model, e1, e2, &self.photon_flux)
    }

    /// Energy flux of `model` over `[e1, e2]` in erg cm⁻² s⁻¹.
    pub fn energy_fluence<M>(&self, model: &M, e1: f64, e2: f64) -> f64
    where
        M: SpectralModel + ?Sized,
    {
        integrate_energy_flux(model, e1, e2, &self.energy_flux)
    }

    /// Attach `model` to `response` for numerical convolution.
    pub fn set_model_numerical<M>(&self, response: &mut InstrumentResponse, model: Arc<M>)
    where
        M: SpectralModel + ?Sized + 'static,
    {
        response.set_model_numerical(model, self.photon_flux);
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
