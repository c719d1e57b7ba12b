use serde::Serialize;

use crate::core::error::Result;
use crate::core::expr::{Expression, ParamBinding, ParamTable};

/// Declaration-level kind of a graph parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamKind {
    /// Compile-time integer from a closed-form expression.
    Static,
    /// Set at runtime by a config actor output; initial value is 0.
    Dynamic,
    /// Mirrors a parameter of the parent graph, identified by its index
    /// in the parent's parameter list.
    Inherited,
    /// Static-form expression over at least one dynamic input; resolved
    /// once those inputs are set.
    DynamicDependent,
}

/// A parameter as declared on a graph.
///
/// Per-firing state (the late-bound value of dynamic and inherited
/// parameters) lives on the firing, not here; the declaration only carries
/// what is shared by every firing of the graph.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    /// Resolved value for `Static`; 0 otherwise.
    pub value: i64,
    /// Evaluation expression for `DynamicDependent`.
    pub expr: Option<Expression>,
    /// Index of the mirrored parameter in the parent graph (`Inherited`).
    pub parent_ix: Option<usize>,
}

impl Param {
    pub fn fixed(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Static,
            value,
            expr: None,
            parent_ix: None,
        }
    }

    /// Static parameter from an expression over previously declared
    /// parameters; evaluated eagerly.
    pub fn derived(name: impl Into<String>, expr: &Expression, scope: &dyn ParamTable) -> Result<Self> {
        Ok(Self::fixed(name, expr.evaluate(scope)?))
    }

    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Dynamic,
            value: 0,
            expr: None,
            parent_ix: None,
        }
    }

    pub fn inherited(name: impl Into<String>, parent_ix: usize) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Inherited,
            value: 0,
            expr: None,
            parent_ix: Some(parent_ix),
        }
    }

    pub fn dynamic_dependent(name: impl Into<String>, expr: Expression) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::DynamicDependent,
            value: 0,
            expr: Some(expr),
            parent_ix: None,
        }
    }

    /// Anything that is not plain-static has a firing-dependent value and
    /// must survive expression folding.
    pub fn is_dynamic(&self) -> bool {
        self.kind != ParamKind::Static
    }
}

/// A parameter declaration list acts as the compile-time lookup scope.
#[derive(Debug, Clone, Copy)]
pub struct DeclScope<'a>(pub &'a [Param]);

impl ParamTable for DeclScope<'_> {
    fn get(&self, name: &str) -> Option<ParamBinding> {
        self.0.iter().find(|p| p.name == name).map(|p| ParamBinding {
            value: p.value,
            dynamic: p.is_dynamic(),
        })
    }
}
