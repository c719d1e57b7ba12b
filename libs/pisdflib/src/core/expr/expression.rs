use crate::core::error::{PisdfError, Result};
use crate::core::expr::rpn::{extract_postfix, RpnToken};

/// Resolved view of one parameter during expression compilation/evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ParamBinding {
    pub value: i64,
    /// Dynamic parameters (and anything derived from them) cannot be folded
    /// at compile time.
    pub dynamic: bool,
}

/// Name-based parameter lookup used by [`Expression`].
pub trait ParamTable {
    fn get(&self, name: &str) -> Option<ParamBinding>;
}

/// Empty table for expressions that must not reference parameters.
pub struct NoParams;

impl ParamTable for NoParams {
    fn get(&self, _name: &str) -> Option<ParamBinding> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Repr {
    /// Fully static expression folded to its value at compile time.
    Value(f64),
    /// Postfix stack with at least one parameter reference left.
    Stack(Vec<RpnToken>),
}

/// A compiled rate/timing expression.
///
/// Compilation folds every maximal all-static subtree into a single value
/// token, so fully static expressions carry no stack at all. Evaluation is
/// done in `f64`; [`Expression::evaluate`] floors the result toward negative
/// infinity on the way to `i64`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    repr: Repr,
}

impl Expression {
    pub fn constant(value: i64) -> Self {
        Self {
            repr: Repr::Value(value as f64),
        }
    }

    /// Compile an infix expression, folding static sub-expressions.
    ///
    /// Static parameters are substituted by their value immediately; a
    /// reference to an unknown name is an error at compile time already.
    pub fn compile(text: &str, params: &dyn ParamTable) -> Result<Self> {
        let postfix = extract_postfix(text)?;
        let mut tokens: Vec<RpnToken> = Vec::with_capacity(postfix.len());
        // One entry per operand produced so far: its folded value when the
        // whole subtree is static.
        let mut statics: Vec<Option<f64>> = Vec::new();
        for token in postfix {
            match token {
                RpnToken::Value(v) => {
                    tokens.push(RpnToken::Value(v));
                    statics.push(Some(v));
                }
                RpnToken::Param(name) => {
                    let binding =
                        params
                            .get(&name)
                            .ok_or_else(|| PisdfError::RateExprBadParam {
                                name: name.clone(),
                            })?;
                    if binding.dynamic {
                        tokens.push(RpnToken::Param(name));
                        statics.push(None);
                    } else {
                        tokens.push(RpnToken::Value(binding.value as f64));
                        statics.push(Some(binding.value as f64));
                    }
                }
                RpnToken::Op(op) => {
                    let argc = op.arg_count();
                    if statics.len() < argc {
                        return Err(PisdfError::RateExprArity {
                            token: op.token().to_string(),
                            expected: argc,
                            got: statics.len(),
                        });
                    }
                    let foldable = statics[statics.len() - argc..].iter().all(Option::is_some);
                    if foldable {
                        // Each static operand is a single folded value token.
                        let mut eval: Vec<f64> = statics
                            .drain(statics.len() - argc..)
                            .map(|v| v.expect("checked above"))
                            .collect();
                        tokens.truncate(tokens.len() - argc);
                        op.apply(&mut eval)?;
                        let value = eval[0];
                        tokens.push(RpnToken::Value(value));
                        statics.push(Some(value));
                    } else {
                        statics.truncate(statics.len() - argc);
                        statics.push(None);
                        tokens.push(RpnToken::Op(op));
                    }
                }
            }
        }
        if statics.len() > 1 {
            return Err(PisdfError::RateExprSyntax {
                expression: text.to_string(),
                detail: format!("{} dangling operand(s)", statics.len() - 1),
            });
        }
        let repr = match statics.first() {
            None => Repr::Value(0.0),
            Some(Some(value)) => Repr::Value(*value),
            Some(None) => Repr::Stack(tokens),
        };
        Ok(Self { repr })
    }

    /// True iff the folded stack still references at least one parameter.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.repr, Repr::Stack(_))
    }

    pub fn evaluate_f64(&self, params: &dyn ParamTable) -> Result<f64> {
        match &self.repr {
            Repr::Value(v) => Ok(*v),
            Repr::Stack(tokens) => {
                let mut stack: Vec<f64> = Vec::with_capacity(4);
                for token in tokens {
                    match token {
                        RpnToken::Value(v) => stack.push(*v),
                        RpnToken::Param(name) => {
                            let binding = params.get(name).ok_or_else(|| {
                                PisdfError::RateExprBadParam { name: name.clone() }
                            })?;
                            stack.push(binding.value as f64);
                        }
                        RpnToken::Op(op) => op.apply(&mut stack)?,
                    }
                }
                Ok(stack.pop().unwrap_or(0.0))
            }
        }
    }

    /// Evaluate and floor toward negative infinity.
    pub fn evaluate(&self, params: &dyn ParamTable) -> Result<i64> {
        Ok(self.evaluate_f64(params)?.floor() as i64)
    }
}

impl Default for Expression {
    fn default() -> Self {
        Self::constant(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Table(Vec<(&'static str, i64, bool)>);

    impl ParamTable for Table {
        fn get(&self, name: &str) -> Option<ParamBinding> {
            self.0
                .iter()
                .find(|(n, _, _)| *n == name)
                .map(|&(_, value, dynamic)| ParamBinding { value, dynamic })
        }
    }

    #[test]
    fn static_expression_folds_to_value() {
        let expr = Expression::compile("(4 + 2) * 8", &NoParams).unwrap();
        assert!(!expr.is_dynamic());
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 48);
    }

    #[test]
    fn static_params_fold() {
        let table = Table(vec![("width", 8, false)]);
        let expr = Expression::compile("width * 2", &table).unwrap();
        assert!(!expr.is_dynamic());
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 16);
    }

    #[test]
    fn dynamic_params_survive_folding() {
        let table = Table(vec![("n", 0, true), ("base", 3, false)]);
        let expr = Expression::compile("n * base + 1", &table).unwrap();
        assert!(expr.is_dynamic());
        // base folded to 3, n read at evaluation time.
        let resolved = Table(vec![("n", 5, true)]);
        assert_eq!(expr.evaluate(&resolved).unwrap(), 16);
    }

    #[test]
    fn partial_folding_inside_dynamic_tree() {
        let table = Table(vec![("n", 0, true)]);
        let expr = Expression::compile("n + 2 * 3", &table).unwrap();
        let resolved = Table(vec![("n", 4, true)]);
        assert_eq!(expr.evaluate(&resolved).unwrap(), 10);
    }

    #[test]
    fn missing_param_fails_at_compile() {
        let err = Expression::compile("ghost + 1", &NoParams).unwrap_err();
        assert!(matches!(err, PisdfError::RateExprBadParam { .. }));
    }

    #[test]
    fn missing_param_fails_at_evaluation() {
        let table = Table(vec![("n", 0, true)]);
        let expr = Expression::compile("n + 1", &table).unwrap();
        let err = expr.evaluate(&NoParams).unwrap_err();
        assert!(matches!(err, PisdfError::RateExprBadParam { .. }));
    }

    #[test]
    fn evaluation_floors_toward_negative_infinity() {
        let expr = Expression::compile("7 / 2", &NoParams).unwrap();
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 3);
        let expr = Expression::compile("(0 - 7) / 2", &NoParams).unwrap();
        assert_eq!(expr.evaluate(&NoParams).unwrap(), -4);
    }

    #[test]
    fn division_by_zero_quirk() {
        let expr = Expression::compile("4 / 0", &NoParams).unwrap();
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 0);
    }

    #[test]
    fn functions_evaluate() {
        let expr = Expression::compile("max(3, min(10, 7))", &NoParams).unwrap();
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 7);
        let expr = Expression::compile("ceil(sqrt(2))", &NoParams).unwrap();
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 2);
    }

    #[test]
    fn arity_error_reported() {
        let err = Expression::compile("1 +", &NoParams).unwrap_err();
        assert!(matches!(err, PisdfError::RateExprArity { .. }));
    }

    #[test]
    fn empty_expression_is_zero() {
        let expr = Expression::compile("", &NoParams).unwrap();
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 0);
    }

    #[test]
    fn constant_round_trip() {
        let expr = Expression::constant(12);
        assert!(!expr.is_dynamic());
        assert_eq!(expr.evaluate(&NoParams).unwrap(), 12);
    }
}
