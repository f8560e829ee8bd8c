//! Instrument response matrices and their convolution with photon spectra.
//!
//! - [`InstrumentResponse`]: a redistribution matrix with channel and Monte
//!   Carlo energy edges, convolved with an integral function or a
//!   [`SpectralModel`] to predict counts per channel
//! - [`InstrumentResponseSet`]: time-resolved responses merged into one
//!   effective response, weighted by exposure or counts
//! - [`models`]: the spectral model capability, power law, composition
//!   and adaptive quadrature
//! - [`io`]: OGIP-style FITS files and rsp2 containers

pub mod config;
pub mod instrument_response;
pub mod io;
pub mod models;
pub mod response_set;
pub mod time_interval;

pub use config::{ConfigError, CoreConfig};
pub use instrument_response::{InstrumentResponse, IntegralFunction, ResponseError};
pub use io::{FitsError, Rsp2Contents};
pub use models::{CompositeModel, ModelError, Operand, Operator, Powerlaw, SpectralModel};
pub use response_set::{
    InstrumentResponseSet, ResponseSetConfig, ResponseSetError, TimeFunction,
};
pub use time_interval::{TimeInterval, TimeIntervalError};
