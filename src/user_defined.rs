use std::sync::Arc;

use evalexpr::*;
use nalgebra::DVector;

use crate::dynamical_systems::{State, SystemDefinition, SystemKind};
use crate::error::{ChaosError, ChaosResult};

/// Rewrite `|expr|` as `abs(expr)`.
///
/// The tightest non-empty pair of bars is replaced first, so nested absolute
/// values such as `||x| - |y||` unwind from the inside out.
pub fn preprocess_abs(input: &str) -> String {
    let mut s = input.to_string();
    loop {
        let bars: Vec<usize> = s.match_indices('|').map(|(i, _)| i).collect();
        let innermost = bars
            .windows(2)
            .map(|w| (w[0], w[1]))
            .filter(|&(open, close)| close > open + 1)
            .min_by_key(|&(open, close)| close - open);

        match innermost {
            Some((open, close)) => {
                s = format!("{}abs({}){}", &s[..open], &s[open + 1..close], &s[close + 1..]);
            }
            None => return s,
        }
    }
}

/// Unary functions callable from component expressions.
pub const MATH_FUNCTIONS: &[(&str, fn(f64) -> f64)] = &[
    ("sin", f64::sin),
    ("cos", f64::cos),
    ("tan", f64::tan),
    ("atan", f64::atan),
    ("sinh", f64::sinh),
    ("cosh", f64::cosh),
    ("tanh", f64::tanh),
    ("abs", f64::abs),
    ("sign", f64::signum),
    ("sqrt", f64::sqrt),
    ("exp", f64::exp),
    ("ln", f64::ln),
];

fn math_context() -> ChaosResult<HashMapContext> {
    let mut context = HashMapContext::new();
    for &(name, apply) in MATH_FUNCTIONS {
        let function = Function::new(move |argument| Ok(Value::Float(apply(argument.as_number()?))));
        context
            .set_function(name.into(), function)
            .map_err(|e| ChaosError::invalid(format!("cannot register '{}': {}", name, e)))?;
    }
    Ok(context)
}

fn check_identifier(name: &str) -> ChaosResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ChaosError::invalid(format!("'{}' is not a valid identifier", name)))
    }
}

/// A map or flow whose components are expression strings.
///
/// ```text
/// Hénon:  x' = 1 - a * x^2 + y,  y' = b * x
/// Lorenz: x' = sigma * (y - x), y' = x * (rho - z) - y, z' = x * y - beta * z
/// ```
///
/// Components may call any of [`MATH_FUNCTIONS`] and write `|expr|` for
/// `abs(expr)`. Free names resolve to the state variables, to parameters
/// bound with [`ExpressionSystem::with_parameter`], and for flows to the
/// time `t`.
#[derive(Debug, Clone)]
pub struct ExpressionSystem {
    kind: SystemKind,
    variables: Vec<String>,
    sources: Vec<String>,
    nodes: Vec<Node>,
    context: HashMapContext,
}

impl ExpressionSystem {
    /// One expression per state variable, in the same order. An empty
    /// expression means the component is identically zero.
    pub fn new(kind: SystemKind, variables: &[&str], expressions: &[&str]) -> ChaosResult<Self> {
        if variables.is_empty() {
            return Err(ChaosError::invalid("at least one state variable is required"));
        }
        if variables.len() != expressions.len() {
            return Err(ChaosError::DimensionMismatch {
                expected: variables.len(),
                found: expressions.len(),
            });
        }
        for (i, name) in variables.iter().enumerate() {
            check_identifier(name)?;
            if variables[..i].contains(name) {
                return Err(ChaosError::invalid(format!("variable '{}' is declared twice", name)));
            }
            if kind == SystemKind::Flow && *name == "t" {
                return Err(ChaosError::invalid("'t' is reserved for time in a flow"));
            }
        }

        let mut sources = Vec::with_capacity(expressions.len());
        let mut nodes = Vec::with_capacity(expressions.len());
        for (name, expr) in variables.iter().zip(expressions) {
            let expr = if expr.trim().is_empty() { "0" } else { expr };
            let source = preprocess_abs(expr);
            let node = build_operator_tree(&source)
                .map_err(|e| ChaosError::invalid(format!("expression for '{}': {}", name, e)))?;
            sources.push(source);
            nodes.push(node);
        }

        Ok(Self {
            kind,
            variables: variables.iter().map(|v| v.to_string()).collect(),
            sources,
            nodes,
            context: math_context()?,
        })
    }

    pub fn map(variables: &[&str], expressions: &[&str]) -> ChaosResult<Self> {
        Self::new(SystemKind::Map, variables, expressions)
    }

    pub fn flow(variables: &[&str], expressions: &[&str]) -> ChaosResult<Self> {
        Self::new(SystemKind::Flow, variables, expressions)
    }

    /// Bind a named constant. Setting the same name again overwrites it.
    pub fn with_parameter(mut self, name: &str, value: f64) -> ChaosResult<Self> {
        check_identifier(name)?;
        if self.variables.iter().any(|v| v == name) {
            return Err(ChaosError::invalid(format!("'{}' is already a state variable", name)));
        }
        if self.kind == SystemKind::Flow && name == "t" {
            return Err(ChaosError::invalid("'t' is reserved for time in a flow"));
        }
        if !value.is_finite() {
            return Err(ChaosError::invalid(format!("parameter '{}' must be finite", name)));
        }
        self.context
            .set_value(name.into(), Value::Float(value))
            .map_err(|e| ChaosError::invalid(e.to_string()))?;
        Ok(self)
    }

    pub fn kind(&self) -> SystemKind {
        self.kind
    }

    pub fn dim(&self) -> usize {
        self.variables.len()
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Expressions after `|x|` rewriting.
    pub fn expressions(&self) -> &[String] {
        &self.sources
    }

    /// Evaluate every component at `(t, x)`. `t` is ignored by maps.
    pub fn evaluate(&self, t: f64, x: &State) -> Result<State, String> {
        if x.len() != self.variables.len() {
            return Err(format!(
                "expected a state of dimension {}, got {}",
                self.variables.len(),
                x.len()
            ));
        }

        let mut context = self.context.clone();
        for (name, &value) in self.variables.iter().zip(x.iter()) {
            context
                .set_value(name.clone(), Value::Float(value))
                .map_err(|e| e.to_string())?;
        }
        if self.kind == SystemKind::Flow {
            context
                .set_value("t".into(), Value::Float(t))
                .map_err(|e| e.to_string())?;
        }

        let values = self
            .nodes
            .iter()
            .zip(&self.variables)
            .map(|(node, name)| {
                node.eval_number_with_context(&context)
                    .map_err(|e| format!("component '{}': {}", name, e))
            })
            .collect::<Result<Vec<f64>, String>>()?;
        Ok(DVector::from_vec(values))
    }

    pub fn into_system(self) -> SystemDefinition {
        let shared = Arc::new(self);
        match shared.kind {
            SystemKind::Map => SystemDefinition::try_map(move |x: &State| shared.evaluate(0.0, x)),
            SystemKind::Flow => SystemDefinition::try_flow(move |t, x: &State| shared.evaluate(t, x)),
        }
    }
}
