//! Spectral models: parameters, the model capability, composition and quadrature

pub mod composite;
pub mod parameter;
pub mod powerlaw;
pub mod quadrature;
pub mod spectral_model;

use thiserror::Error;

pub use composite::{CompositeModel, Operand, Operator};
pub use parameter::{merge_parameter_name, Parameter, ParameterMap};
pub use powerlaw::Powerlaw;
pub use quadrature::{quad, quad_energy, QuadOptions, QuadResult, QuadratureError};
pub use spectral_model::{integrate_energy_flux, integrate_photon_flux, SpectralModel, KEV_TO_ERG};

/// Errors raised by model construction and parameter handling
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Value {value} for parameter {name} is outside bounds [{min:?}, {max:?}]")]
    ParameterOutOfBounds {
        name: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("Cannot find a free name for parameter {0}")]
    NameCollision(String),

    #[error("Cannot execute operation with operand: {0}")]
    UnsupportedOperand(String),
}
