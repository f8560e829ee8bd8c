//! Power-law photon spectrum with a closed-form integral.

use super::{ModelError, Parameter, ParameterMap, SpectralModel};

/// Index values closer than this to -1 use the logarithmic integral.
const LOG_INTEGRAL_THRESHOLD: f64 = 1e-12;

/// `f(E) = K (E / piv)^index`
///
/// The pivot energy is a fixed parameter; `K` and `index` are free.
#[derive(Debug, Clone)]
pub struct Powerlaw {
    parameters: ParameterMap,
}

impl Powerlaw {
    pub fn new(k: f64, index: f64, piv: f64) -> Result<Self, ModelError> {
        let mut parameters = ParameterMap::new();
        parameters.insert(
            "K",
            Parameter::new("K", 1.0)
                .with_bounds(Some(0.0), None)
                .with_unit("1 / (cm2 keV s)"),
        );
        parameters.insert(
            "index",
            Parameter::new("index", -2.0).with_bounds(Some(-10.0), Some(10.0)),
        );
        parameters.insert(
            "piv",
            Parameter::new("piv", 1.0)
                .with_bounds(Some(f64::MIN_POSITIVE), None)
                .with_unit("keV")
                .fixed(),
        );

        let mut powerlaw = Self { parameters };
        powerlaw.set_parameter("K", k)?;
        powerlaw.set_parameter("index", index)?;
        powerlaw.set_parameter("piv", piv)?;
        Ok(powerlaw)
    }

    fn values(&self) -> (f64, f64, f64) {
        let get = |name: &str| self.parameters.get(name).map_or(f64::NAN, Parameter::value);
        (get("K"), get("index"), get("piv"))
    }
}

impl SpectralModel for Powerlaw {
    fn name(&self) -> String {
        "powerlaw".to_string()
    }

    fn formula(&self) -> String {
        "K (E / piv)^index".to_string()
    }

    fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        self.parameters.set_value(name, value)
    }

    fn evaluate(&self, energy: f64) -> f64 {
        let (k, index, piv) = self.values();
        k * (energy / piv).powf(index)
    }

    fn integral(&self, e1: f64, e2: f64) -> f64 {
        let (k, index, piv) = self.values();
        let exponent = index + 1.0;

        if exponent.abs() < LOG_INTEGRAL_THRESHOLD {
            return k * piv * (e2 / e1).ln();
        }

        k * piv / exponent * ((e2 / piv).powf(exponent) - (e1 / piv).powf(exponent))
    }
}
