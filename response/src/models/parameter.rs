//! Named model parameters and the ordered map that holds them.
//!
//! Models expose their parameters through an explicit [`ParameterMap`]
//! instead of binding them as attributes. Composite models merge the maps
//! of their operands with [`merge_parameter_name`], which renames colliding
//! names with an increasing numeric suffix.

use serde::{Deserialize, Serialize};

use super::ModelError;

/// Upper bound on the numeric suffix tried when resolving a name collision.
const MAX_SUFFIX: u32 = 1000;

/// A single free or fixed model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    value: f64,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Initial step size used by optimizers
    pub delta: f64,
    pub free: bool,
    pub unit: String,
}

impl Parameter {
    /// Create a free, unbounded parameter.
    ///
    /// The step size defaults to 10% of the initial value, or 0.1 for a zero
    /// initial value.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        let delta = if value != 0.0 { (value * 0.1).abs() } else { 0.1 };
        Self {
            name: name.into(),
            value,
            min_value: None,
            max_value: None,
            delta,
            free: true,
            unit: String::new(),
        }
    }

    pub fn with_bounds(mut self, min_value: Option<f64>, max_value: Option<f64>) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn fixed(mut self) -> Self {
        self.free = false;
        self
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value, rejecting non-finite values and values outside the bounds.
    pub fn set_value(&mut self, value: f64) -> Result<(), ModelError> {
        let below = self.min_value.is_some_and(|min| value < min);
        let above = self.max_value.is_some_and(|max| value > max);
        if !value.is_finite() || below || above {
            return Err(ModelError::ParameterOutOfBounds {
                name: self.name.clone(),
                value,
                min: self.min_value,
                max: self.max_value,
            });
        }
        self.value = value;
        Ok(())
    }
}

/// Insertion-ordered mapping from parameter name to [`Parameter`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterMap {
    entries: Vec<(String, Parameter)>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, p)| p)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, p)| p)
    }

    /// Current value of a parameter.
    pub fn value(&self, name: &str) -> Result<f64, ModelError> {
        self.get(name)
            .map(Parameter::value)
            .ok_or_else(|| ModelError::UnknownParameter(name.to_string()))
    }

    /// Insert or replace the parameter stored under `key`.
    ///
    /// Replacing keeps the original position in the ordering.
    pub fn insert(&mut self, key: impl Into<String>, parameter: Parameter) {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = parameter,
            None => self.entries.push((key, parameter)),
        }
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        self.get_mut(name)
            .ok_or_else(|| ModelError::UnknownParameter(name.to_string()))?
            .set_value(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.entries.iter().map(|(key, p)| (key.as_str(), p))
    }
}

impl FromIterator<Parameter> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        let mut map = ParameterMap::new();
        for parameter in iter {
            map.insert(parameter.name.clone(), parameter);
        }
        map
    }
}

/// Choose the key under which `name` enters a map that already holds `existing`.
///
/// A free name is kept as is. On collision, a plain `name` becomes
/// `name_1`; a name already ending in a numeric suffix `base_n` is retried
/// as `base_n`, `base_{n+1}`, ... The first candidate not present wins.
///
/// # Errors
/// Returns [`ModelError::NameCollision`] if every suffix up to the limit is taken.
pub fn merge_parameter_name(existing: &ParameterMap, name: &str) -> Result<String, ModelError> {
    if !existing.contains(name) {
        return Ok(name.to_string());
    }

    let (base, first_suffix) = match name.rsplit_once('_') {
        Some((base, suffix)) if !base.is_empty() => match suffix.parse::<u32>() {
            Ok(n) => (base, n),
            Err(_) => (name, 1),
        },
        _ => (name, 1),
    };

    (first_suffix..MAX_SUFFIX)
        .map(|i| format!("{base}_{i}"))
        .find(|candidate| !existing.contains(candidate))
        .ok_or_else(|| ModelError::NameCollision(name.to_string()))
}
