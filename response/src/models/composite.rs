//! Arithmetic composition of spectral models as an explicit expression node.
//!
//! A [`CompositeModel`] holds two operands and an operator. Each operand is
//! either a finite constant or a boxed model; composites nest, so arbitrary
//! expression trees can be built bottom-up. The composite exposes the
//! union of its operands' parameters, renamed on collision, and routes
//! `set_parameter` calls back to the operand that owns the parameter.

use std::fmt;

use super::spectral_model::integrate_with_fallback;
use super::quadrature::QuadOptions;
use super::{merge_parameter_name, ModelError, ParameterMap, SpectralModel};

/// Binary operator joining two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
            Operator::Div => a / b,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

/// One side of a composite expression.
pub enum Operand {
    Constant(f64),
    Model(Box<dyn SpectralModel>),
}

impl Operand {
    pub fn model(model: impl SpectralModel + 'static) -> Self {
        Operand::Model(Box::new(model))
    }

    fn evaluate(&self, energy: f64) -> f64 {
        match self {
            Operand::Constant(c) => *c,
            Operand::Model(m) => m.evaluate(energy),
        }
    }

    fn integral(&self, e1: f64, e2: f64) -> f64 {
        match self {
            Operand::Constant(c) => c * (e2 - e1),
            Operand::Model(m) => m.integral(e1, e2),
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(c) => write!(f, "Constant({c})"),
            Operand::Model(m) => write!(f, "Model({})", m.name()),
        }
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Constant(value)
    }
}

impl From<Box<dyn SpectralModel>> for Operand {
    fn from(model: Box<dyn SpectralModel>) -> Self {
        Operand::Model(model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Where a merged parameter name points to.
#[derive(Debug, Clone)]
struct ParameterRoute {
    merged: String,
    side: Side,
    original: String,
}

/// `lhs <op> rhs` over two spectral operands.
#[derive(Debug)]
pub struct CompositeModel {
    lhs: Operand,
    rhs: Operand,
    op: Operator,
    parameters: ParameterMap,
    routes: Vec<ParameterRoute>,
    quad_options: QuadOptions,
}

impl CompositeModel {
    /// Build the expression node and merge the operands' parameter maps.
    ///
    /// # Errors
    /// [`ModelError::UnsupportedOperand`] for a non-finite constant and
    /// [`ModelError::NameCollision`] if no free name can be found for a
    /// parameter.
    pub fn new(
        lhs: impl Into<Operand>,
        op: Operator,
        rhs: impl Into<Operand>,
    ) -> Result<Self, ModelError> {
        let lhs = lhs.into();
        let rhs = rhs.into();

        let mut parameters = ParameterMap::new();
        let mut routes = Vec::new();

        for (side, operand) in [(Side::Left, &lhs), (Side::Right, &rhs)] {
            match operand {
                Operand::Constant(c) if !c.is_finite() => {
                    return Err(ModelError::UnsupportedOperand(format!(
                        "non-finite constant {c}"
                    )));
                }
                Operand::Constant(_) => {}
                Operand::Model(model) => {
                    for (name, parameter) in model.parameters().iter() {
                        let merged = merge_parameter_name(&parameters, name)?;
                        parameters.insert(merged.clone(), parameter.clone());
                        routes.push(ParameterRoute {
                            merged,
                            side,
                            original: name.to_string(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            lhs,
            rhs,
            op,
            parameters,
            routes,
            quad_options: QuadOptions::photon_flux(),
        })
    }

    /// Tolerances for the numerical integral of products and ratios.
    pub fn with_quad_options(mut self, options: QuadOptions) -> Self {
        self.quad_options = options;
        self
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    fn operand_mut(&mut self, side: Side) -> &mut Operand {
        match side {
            Side::Left => &mut self.lhs,
            Side::Right => &mut self.rhs,
        }
    }
}

impl SpectralModel for CompositeModel {
    /// Constants are listed before models, e.g. `( 2 * powerlaw )`.
    fn name(&self) -> String {
        let mut names: Vec<String> = Vec::new();
        for operand in [&self.lhs, &self.rhs] {
            match operand {
                Operand::Constant(c) => names.insert(0, c.to_string()),
                Operand::Model(m) => names.push(m.name()),
            }
        }
        format!("( {} )", names.join(&format!(" {} ", self.op.symbol())))
    }

    fn formula(&self) -> String {
        let describe = |operand: &Operand| match operand {
            Operand::Constant(c) => c.to_string(),
            Operand::Model(m) => format!("[{}]", m.formula()),
        };
        format!(
            "{} {} {}",
            describe(&self.lhs),
            self.op.symbol(),
            describe(&self.rhs)
        )
    }

    fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), ModelError> {
        let route = self
            .routes
            .iter()
            .find(|r| r.merged == name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownParameter(name.to_string()))?;

        if let Operand::Model(model) = self.operand_mut(route.side) {
            model.set_parameter(&route.original, value)?;
        }
        self.parameters.set_value(&route.merged, value)
    }

    fn evaluate(&self, energy: f64) -> f64 {
        self.op
            .apply(self.lhs.evaluate(energy), self.rhs.evaluate(energy))
    }

    /// Sums and differences combine the operands' own integrals; products
    /// and ratios are integrated numerically.
    fn integral(&self, e1: f64, e2: f64) -> f64 {
        match self.op {
            Operator::Add => self.lhs.integral(e1, e2) + self.rhs.integral(e1, e2),
            Operator::Sub => self.lhs.integral(e1, e2) - self.rhs.integral(e1, e2),
            Operator::Mul | Operator::Div => integrate_with_fallback(
                |e| self.evaluate(e),
                e1,
                e2,
                &self.quad_options,
                &self.name(),
            ),
        }
    }
}
