//! Infix to postfix conversion for rate and timing expressions.
//!
//! The converter produces a flat token stream in reverse polish notation.
//! Operator precedence follows standard infix rules, `^` is
//! right-associative and unary minus binds tighter than `^`.

use crate::core::error::{PisdfError, Result};

/// Binary/unary operators and named functions usable in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Cos,
    Sin,
    Tan,
    Cosh,
    Sinh,
    Tanh,
    Exp,
    Log,
    Log2,
    Ceil,
    Floor,
    Abs,
    Sqrt,
    Max,
    Min,
}

impl Operator {
    pub fn arg_count(self) -> usize {
        match self {
            Operator::Neg
            | Operator::Cos
            | Operator::Sin
            | Operator::Tan
            | Operator::Cosh
            | Operator::Sinh
            | Operator::Tanh
            | Operator::Exp
            | Operator::Log
            | Operator::Log2
            | Operator::Ceil
            | Operator::Floor
            | Operator::Abs
            | Operator::Sqrt => 1,
            _ => 2,
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Operator::Add | Operator::Sub => 2,
            Operator::Mul | Operator::Div | Operator::Mod => 3,
            Operator::Pow => 4,
            Operator::Neg => 5,
            _ => 6,
        }
    }

    fn right_associative(self) -> bool {
        matches!(self, Operator::Pow | Operator::Neg)
    }

    pub fn token(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Pow => "^",
            Operator::Neg => "-",
            Operator::Cos => "cos",
            Operator::Sin => "sin",
            Operator::Tan => "tan",
            Operator::Cosh => "cosh",
            Operator::Sinh => "sinh",
            Operator::Tanh => "tanh",
            Operator::Exp => "exp",
            Operator::Log => "log",
            Operator::Log2 => "log2",
            Operator::Ceil => "ceil",
            Operator::Floor => "floor",
            Operator::Abs => "abs",
            Operator::Sqrt => "sqrt",
            Operator::Max => "max",
            Operator::Min => "min",
        }
    }

    fn function_from_name(name: &str) -> Option<Operator> {
        Some(match name {
            "cos" => Operator::Cos,
            "sin" => Operator::Sin,
            "tan" => Operator::Tan,
            "cosh" => Operator::Cosh,
            "sinh" => Operator::Sinh,
            "tanh" => Operator::Tanh,
            "exp" => Operator::Exp,
            "log" => Operator::Log,
            "log2" => Operator::Log2,
            "ceil" => Operator::Ceil,
            "floor" => Operator::Floor,
            "abs" => Operator::Abs,
            "sqrt" => Operator::Sqrt,
            "max" => Operator::Max,
            "min" => Operator::Min,
            _ => return None,
        })
    }

    /// Apply the operator to the top of an evaluation stack.
    ///
    /// Division by zero evaluates to 0 and modulo keeps the sign of the
    /// dividend; both quirks are part of the expression contract.
    pub fn apply(self, stack: &mut Vec<f64>) -> Result<()> {
        let argc = self.arg_count();
        if stack.len() < argc {
            return Err(PisdfError::RateExprArity {
                token: self.token().to_string(),
                expected: argc,
                got: stack.len(),
            });
        }
        let result = if argc == 1 {
            let a = stack.pop().expect("checked above");
            match self {
                Operator::Neg => -a,
                Operator::Cos => a.cos(),
                Operator::Sin => a.sin(),
                Operator::Tan => a.tan(),
                Operator::Cosh => a.cosh(),
                Operator::Sinh => a.sinh(),
                Operator::Tanh => a.tanh(),
                Operator::Exp => a.exp(),
                Operator::Log => a.ln(),
                Operator::Log2 => a.log2(),
                Operator::Ceil => a.ceil(),
                Operator::Floor => a.floor(),
                Operator::Abs => a.abs(),
                Operator::Sqrt => a.sqrt(),
                _ => unreachable!("unary dispatch"),
            }
        } else {
            let b = stack.pop().expect("checked above");
            let a = stack.pop().expect("checked above");
            match self {
                Operator::Add => a + b,
                Operator::Sub => a - b,
                Operator::Mul => a * b,
                Operator::Div => {
                    if b == 0.0 {
                        0.0
                    } else {
                        a / b
                    }
                }
                Operator::Mod => {
                    if b == 0.0 {
                        0.0
                    } else {
                        a % b
                    }
                }
                Operator::Pow => a.powf(b),
                Operator::Max => a.max(b),
                Operator::Min => a.min(b),
                _ => unreachable!("binary dispatch"),
            }
        };
        stack.push(result);
        Ok(())
    }
}

/// One element of a postfix token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RpnToken {
    Value(f64),
    Param(String),
    Op(Operator),
}

#[derive(Debug, Clone, PartialEq)]
enum InfixToken {
    Value(f64),
    Name(String),
    Op(Operator),
    LeftPar,
    RightPar,
    Comma,
}

fn syntax_error(expression: &str, detail: impl Into<String>) -> PisdfError {
    PisdfError::RateExprSyntax {
        expression: expression.to_string(),
        detail: detail.into(),
    }
}

fn tokenize(expression: &str) -> Result<Vec<InfixToken>> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(InfixToken::LeftPar);
            }
            ')' => {
                chars.next();
                tokens.push(InfixToken::RightPar);
            }
            ',' => {
                chars.next();
                tokens.push(InfixToken::Comma);
            }
            '+' | '*' | '/' | '%' | '^' => {
                chars.next();
                tokens.push(InfixToken::Op(match c {
                    '+' => Operator::Add,
                    '*' => Operator::Mul,
                    '/' => Operator::Div,
                    '%' => Operator::Mod,
                    _ => Operator::Pow,
                }));
            }
            '-' => {
                chars.next();
                // Unary when at start of (sub)expression or after an
                // operator or separator.
                let unary = match tokens.last() {
                    None | Some(InfixToken::Op(_)) | Some(InfixToken::LeftPar)
                    | Some(InfixToken::Comma) => true,
                    _ => false,
                };
                tokens.push(InfixToken::Op(if unary {
                    Operator::Neg
                } else {
                    Operator::Sub
                }));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(ix, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = ix + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &expression[start..end];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| syntax_error(expression, format!("bad number [{text}]")))?;
                tokens.push(InfixToken::Value(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(ix, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        end = ix + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(InfixToken::Name(expression[start..end].to_string()));
            }
            other => {
                return Err(syntax_error(expression, format!("unexpected character [{other}]")));
            }
        }
    }
    Ok(tokens)
}

/// Convert an infix expression string to a postfix token stream.
pub fn extract_postfix(expression: &str) -> Result<Vec<RpnToken>> {
    enum StackElt {
        Op(Operator),
        Function(Operator),
        LeftPar,
    }

    let infix = tokenize(expression)?;
    let mut output = Vec::with_capacity(infix.len());
    let mut stack: Vec<StackElt> = Vec::new();

    let pop_op = |stack: &mut Vec<StackElt>, output: &mut Vec<RpnToken>| {
        if let Some(StackElt::Op(op)) | Some(StackElt::Function(op)) = stack.pop() {
            output.push(RpnToken::Op(op));
        }
    };

    for token in infix {
        match token {
            InfixToken::Value(v) => output.push(RpnToken::Value(v)),
            InfixToken::Name(name) => {
                if let Some(function) = Operator::function_from_name(&name) {
                    stack.push(StackElt::Function(function));
                } else {
                    output.push(RpnToken::Param(name));
                }
            }
            InfixToken::Op(op) => {
                while let Some(top) = stack.last() {
                    let pop = match top {
                        StackElt::Op(other) => {
                            other.precedence() > op.precedence()
                                || (other.precedence() == op.precedence()
                                    && !op.right_associative())
                        }
                        StackElt::Function(_) => true,
                        StackElt::LeftPar => false,
                    };
                    if !pop {
                        break;
                    }
                    pop_op(&mut stack, &mut output);
                }
                stack.push(StackElt::Op(op));
            }
            InfixToken::LeftPar => stack.push(StackElt::LeftPar),
            InfixToken::Comma => {
                loop {
                    match stack.last() {
                        Some(StackElt::LeftPar) => break,
                        Some(_) => pop_op(&mut stack, &mut output),
                        None => {
                            return Err(syntax_error(expression, "comma outside function call"))
                        }
                    }
                }
            }
            InfixToken::RightPar => {
                loop {
                    match stack.last() {
                        Some(StackElt::LeftPar) => {
                            stack.pop();
                            break;
                        }
                        Some(_) => pop_op(&mut stack, &mut output),
                        None => return Err(syntax_error(expression, "unbalanced parenthesis")),
                    }
                }
                if let Some(StackElt::Function(_)) = stack.last() {
                    pop_op(&mut stack, &mut output);
                }
            }
        }
    }
    while let Some(top) = stack.last() {
        if matches!(top, StackElt::LeftPar) {
            return Err(syntax_error(expression, "unbalanced parenthesis"));
        }
        pop_op(&mut stack, &mut output);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postfix_string(tokens: &[RpnToken]) -> String {
        tokens
            .iter()
            .map(|t| match t {
                RpnToken::Value(v) => format!("{v}"),
                RpnToken::Param(p) => p.clone(),
                RpnToken::Op(op) => op.token().to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn converts_simple_precedence() {
        let tokens = extract_postfix("1 + 2 * 3").unwrap();
        assert_eq!(postfix_string(&tokens), "1 2 3 * +");
    }

    #[test]
    fn converts_parenthesis() {
        let tokens = extract_postfix("(1 + 2) * 3").unwrap();
        assert_eq!(postfix_string(&tokens), "1 2 + 3 *");
    }

    #[test]
    fn power_is_right_associative() {
        let tokens = extract_postfix("2 ^ 3 ^ 2").unwrap();
        assert_eq!(postfix_string(&tokens), "2 3 2 ^ ^");
    }

    #[test]
    fn unary_minus_binds_tight() {
        let tokens = extract_postfix("-2 ^ 2").unwrap();
        // (-2) ^ 2, not -(2 ^ 2)
        assert_eq!(postfix_string(&tokens), "2 - 2 ^");
    }

    #[test]
    fn functions_and_commas() {
        let tokens = extract_postfix("max(width, 4 * height)").unwrap();
        assert_eq!(postfix_string(&tokens), "width 4 height * max");
    }

    #[test]
    fn nested_function_calls() {
        let tokens = extract_postfix("floor(sqrt(n))").unwrap();
        assert_eq!(postfix_string(&tokens), "n sqrt floor");
    }

    #[test]
    fn rejects_unbalanced_parenthesis() {
        assert!(extract_postfix("(1 + 2").is_err());
        assert!(extract_postfix("1 + 2)").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(extract_postfix("4 $ 2").is_err());
    }

    #[test]
    fn division_by_zero_yields_zero() {
        let mut stack = vec![4.0, 0.0];
        Operator::Div.apply(&mut stack).unwrap();
        assert_eq!(stack, vec![0.0]);
    }

    #[test]
    fn modulo_keeps_dividend_sign() {
        let mut stack = vec![-7.0, 3.0];
        Operator::Mod.apply(&mut stack).unwrap();
        assert_eq!(stack, vec![-1.0]);
    }
}
