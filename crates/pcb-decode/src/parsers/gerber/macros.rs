use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{DecodeError, Location};

/// Expression node for macro parameter evaluation.
/// Supports: literals, variable references ($1, $2, ...), and arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable(u32), // $1 = Variable(1)
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate the expression against the current variable bindings.
    pub fn eval(&self, env: &Variables) -> f64 {
        match self {
            Expr::Literal(v) => *v,
            Expr::Variable(n) => env.get(*n),
            Expr::Neg(a) => -a.eval(env),
            Expr::Add(a, b) => a.eval(env) + b.eval(env),
            Expr::Sub(a, b) => a.eval(env) - b.eval(env),
            Expr::Mul(a, b) => a.eval(env) * b.eval(env),
            Expr::Div(a, b) => a.eval(env) / b.eval(env),
        }
    }
}

/// `$n` bindings for one macro resolution.
///
/// Seeded from the aperture definition's parameters (`$1` is the first) and
/// updated in order by `$n=expr` statements.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<u32, f64>,
}

impl Variables {
    pub fn from_params(params: &[f64]) -> Self {
        Self {
            values: params
                .iter()
                .enumerate()
                .map(|(k, v)| (k as u32 + 1, *v))
                .collect(),
        }
    }

    /// Unbound variables read as zero.
    pub fn get(&self, n: u32) -> f64 {
        match self.values.get(&n) {
            Some(v) => *v,
            None => {
                debug!("Gerber: macro variable ${n} is unbound, using 0");
                0.0
            }
        }
    }

    pub fn set(&mut self, n: u32, value: f64) {
        self.values.insert(n, value);
    }
}

/// A single primitive within an aperture macro definition.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroPrimitive {
    /// Code 1: Circle
    Circle {
        exposure: Expr,
        diameter: Expr,
        center_x: Expr,
        center_y: Expr,
        rotation: Option<Expr>,
    },
    /// Code 20 (or 2): Vector line
    VectorLine {
        exposure: Expr,
        width: Expr,
        start_x: Expr,
        start_y: Expr,
        end_x: Expr,
        end_y: Expr,
        rotation: Expr,
    },
    /// Code 21: Center line (rectangle by center)
    CenterLine {
        exposure: Expr,
        width: Expr,
        height: Expr,
        center_x: Expr,
        center_y: Expr,
        rotation: Expr,
    },
    /// Code 4: Outline. `values` holds the x/y pairs followed by the rotation;
    /// the vertex count is only known once `num_points` is evaluated.
    Outline {
        exposure: Expr,
        num_points: Expr,
        values: Vec<Expr>,
    },
    /// Code 5: Regular polygon
    Polygon {
        exposure: Expr,
        num_vertices: Expr,
        center_x: Expr,
        center_y: Expr,
        diameter: Expr,
        rotation: Expr,
    },
    /// Code 7: Thermal (ring with gaps)
    Thermal {
        center_x: Expr,
        center_y: Expr,
        outer_diameter: Expr,
        inner_diameter: Expr,
        gap_thickness: Expr,
        rotation: Expr,
    },
}

/// One statement of an aperture macro body.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroStatement {
    /// Code 0
    Comment(String),
    /// `$n=expr`
    Assign { variable: u32, value: Expr },
    Primitive(MacroPrimitive),
}

// ─── Expression Parser ──────────────────────────────────────────────

/// Parse a Gerber macro expression string into an Expr tree.
/// Gerber uses 'x' or 'X' for multiplication (not '*' which is the statement terminator).
pub fn parse_expr(s: &str) -> Result<Expr, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Expr::Literal(0.0));
    }
    let tokens = tokenize_expr(s)?;
    let (expr, rest) = parse_add_sub(&tokens)?;
    if !rest.is_empty() {
        return Err(format!("unexpected tokens after expression: {s}"));
    }
    Ok(expr)
}

#[derive(Debug, Clone)]
enum ExprToken {
    Num(f64),
    Var(u32),
    Plus,
    Minus,
    Mul,
    Div,
    LParen,
    RParen,
}

fn tokenize_expr(s: &str) -> Result<Vec<ExprToken>, String> {
    let mut tokens = Vec::new();
    let mut chars = s.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(ExprToken::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(ExprToken::Minus);
            }
            'x' | 'X' => {
                chars.next();
                tokens.push(ExprToken::Mul);
            }
            '/' => {
                chars.next();
                tokens.push(ExprToken::Div);
            }
            '(' => {
                chars.next();
                tokens.push(ExprToken::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(ExprToken::RParen);
            }
            '$' => {
                chars.next();
                let digits = take_while(&mut chars, s, |c| c.is_ascii_digit());
                let n: u32 = digits
                    .parse()
                    .map_err(|_| format!("bad variable: ${digits}"))?;
                tokens.push(ExprToken::Var(n));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let digits = take_while(&mut chars, s, |c| c.is_ascii_digit() || c == '.');
                let val: f64 = digits
                    .parse()
                    .map_err(|_| format!("bad number: {digits}"))?;
                tokens.push(ExprToken::Num(val));
            }
            _ => {
                return Err(format!("unexpected char '{ch}' at {start} in: {s}"));
            }
        }
    }

    Ok(tokens)
}

fn take_while<'a>(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'a>>,
    s: &'a str,
    pred: impl Fn(char) -> bool,
) -> &'a str {
    let start = chars.peek().map(|&(i, _)| i).unwrap_or(s.len());
    let mut end = start;
    while let Some(&(i, c)) = chars.peek() {
        if !pred(c) {
            break;
        }
        end = i + c.len_utf8();
        chars.next();
    }
    &s[start..end]
}

// Recursive descent: add/sub -> mul/div -> unary -> atom
fn parse_add_sub(tokens: &[ExprToken]) -> Result<(Expr, &[ExprToken]), String> {
    let (mut left, mut rest) = parse_mul_div(tokens)?;
    loop {
        match rest.first() {
            Some(ExprToken::Plus) => {
                let (right, r) = parse_mul_div(&rest[1..])?;
                left = Expr::Add(Box::new(left), Box::new(right));
                rest = r;
            }
            Some(ExprToken::Minus) => {
                let (right, r) = parse_mul_div(&rest[1..])?;
                left = Expr::Sub(Box::new(left), Box::new(right));
                rest = r;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_mul_div(tokens: &[ExprToken]) -> Result<(Expr, &[ExprToken]), String> {
    let (mut left, mut rest) = parse_unary(tokens)?;
    loop {
        match rest.first() {
            Some(ExprToken::Mul) => {
                let (right, r) = parse_unary(&rest[1..])?;
                left = Expr::Mul(Box::new(left), Box::new(right));
                rest = r;
            }
            Some(ExprToken::Div) => {
                let (right, r) = parse_unary(&rest[1..])?;
                left = Expr::Div(Box::new(left), Box::new(right));
                rest = r;
            }
            _ => break,
        }
    }
    Ok((left, rest))
}

fn parse_unary(tokens: &[ExprToken]) -> Result<(Expr, &[ExprToken]), String> {
    match tokens.first() {
        Some(ExprToken::Minus) => {
            let (expr, rest) = parse_unary(&tokens[1..])?;
            // Fold negative literals so "-1.5" stays a plain literal.
            match expr {
                Expr::Literal(v) => Ok((Expr::Literal(-v), rest)),
                other => Ok((Expr::Neg(Box::new(other)), rest)),
            }
        }
        Some(ExprToken::Plus) => parse_unary(&tokens[1..]),
        _ => parse_atom(tokens),
    }
}

fn parse_atom(tokens: &[ExprToken]) -> Result<(Expr, &[ExprToken]), String> {
    match tokens.first() {
        Some(ExprToken::Num(v)) => Ok((Expr::Literal(*v), &tokens[1..])),
        Some(ExprToken::Var(n)) => Ok((Expr::Variable(*n), &tokens[1..])),
        Some(ExprToken::LParen) => {
            let (expr, rest) = parse_add_sub(&tokens[1..])?;
            match rest.first() {
                Some(ExprToken::RParen) => Ok((expr, &rest[1..])),
                _ => Err("missing closing paren".into()),
            }
        }
        Some(other) => Err(format!("unexpected {other:?} in expression")),
        None => Err("unexpected end of expression".into()),
    }
}

// ─── Macro Body Parser ──────────────────────────────────────────────

/// Parse the body statements of an aperture macro.
/// Each primitive is a comma-separated list like "5,1,8,0,0,1.08239X$1,22.5".
pub fn parse_macro_body(
    statements: &[(Location, String)],
) -> Result<Vec<MacroStatement>, DecodeError> {
    let mut body = Vec::new();

    for (location, text) in statements {
        let location = *location;
        let syntax = |message: String| DecodeError::syntax(location, format!("AM: {message}"));

        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Comment statements start with "0 "
        if trimmed == "0" || trimmed.starts_with("0 ") {
            body.push(MacroStatement::Comment(trimmed[1..].trim().to_string()));
            continue;
        }

        if let Some(assignment) = trimmed.strip_prefix('$') {
            let (variable, value) = assignment
                .split_once('=')
                .ok_or_else(|| syntax(format!("bad assignment: {trimmed}")))?;
            let variable: u32 = variable
                .trim()
                .parse()
                .map_err(|_| syntax(format!("bad variable: ${variable}")))?;
            let value = parse_expr(value).map_err(syntax)?;
            body.push(MacroStatement::Assign { variable, value });
            continue;
        }

        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        let parts: Vec<&str> = compact.split(',').collect();
        let code: u32 = parts[0]
            .parse()
            .map_err(|_| syntax(format!("bad primitive code: {}", parts[0])))?;

        let exprs: Vec<Expr> = parts[1..]
            .iter()
            .map(|p| parse_expr(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(syntax)?;

        let need = |n: usize, what: &str| {
            if exprs.len() < n {
                Err(syntax(format!("{what} needs {n} parameters, got {}", exprs.len())))
            } else {
                Ok(())
            }
        };

        let prim = match code {
            1 => {
                // Circle: exposure, diameter, center_x, center_y [, rotation]
                need(4, "circle")?;
                MacroPrimitive::Circle {
                    exposure: exprs[0].clone(),
                    diameter: exprs[1].clone(),
                    center_x: exprs[2].clone(),
                    center_y: exprs[3].clone(),
                    rotation: exprs.get(4).cloned(),
                }
            }
            2 | 20 => {
                // Vector line: exposure, width, start_x, start_y, end_x, end_y, rotation
                need(7, "vector line")?;
                MacroPrimitive::VectorLine {
                    exposure: exprs[0].clone(),
                    width: exprs[1].clone(),
                    start_x: exprs[2].clone(),
                    start_y: exprs[3].clone(),
                    end_x: exprs[4].clone(),
                    end_y: exprs[5].clone(),
                    rotation: exprs[6].clone(),
                }
            }
            21 => {
                // Center line: exposure, width, height, center_x, center_y, rotation
                need(6, "center line")?;
                MacroPrimitive::CenterLine {
                    exposure: exprs[0].clone(),
                    width: exprs[1].clone(),
                    height: exprs[2].clone(),
                    center_x: exprs[3].clone(),
                    center_y: exprs[4].clone(),
                    rotation: exprs[5].clone(),
                }
            }
            4 => {
                // Outline: exposure, n, x0, y0, ..., xn, yn, rotation
                need(2, "outline")?;
                MacroPrimitive::Outline {
                    exposure: exprs[0].clone(),
                    num_points: exprs[1].clone(),
                    values: exprs[2..].to_vec(),
                }
            }
            5 => {
                // Polygon: exposure, n_vertices, center_x, center_y, diameter, rotation
                need(6, "polygon")?;
                MacroPrimitive::Polygon {
                    exposure: exprs[0].clone(),
                    num_vertices: exprs[1].clone(),
                    center_x: exprs[2].clone(),
                    center_y: exprs[3].clone(),
                    diameter: exprs[4].clone(),
                    rotation: exprs[5].clone(),
                }
            }
            7 => {
                // Thermal: center_x, center_y, outer_d, inner_d, gap, rotation
                need(6, "thermal")?;
                MacroPrimitive::Thermal {
                    center_x: exprs[0].clone(),
                    center_y: exprs[1].clone(),
                    outer_diameter: exprs[2].clone(),
                    inner_diameter: exprs[3].clone(),
                    gap_thickness: exprs[4].clone(),
                    rotation: exprs[5].clone(),
                }
            }
            _ => {
                warn!("Gerber: skipping unknown macro primitive code {code} at {location}");
                continue;
            }
        };

        body.push(MacroStatement::Primitive(prim));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn eval(s: &str, params: &[f64]) -> f64 {
        parse_expr(s).unwrap().eval(&Variables::from_params(params))
    }

    fn body(lines: &[&str]) -> Vec<MacroStatement> {
        let statements: Vec<(Location, String)> = lines
            .iter()
            .enumerate()
            .map(|(k, s)| (Location::new(k + 1, 1), s.to_string()))
            .collect();
        parse_macro_body(&statements).unwrap()
    }

    #[test]
    fn test_expr_literal_and_variable() {
        assert_abs_diff_eq!(eval("42.5", &[]), 42.5);
        assert_abs_diff_eq!(eval("$1", &[3.0]), 3.0);
    }

    #[test]
    fn test_expr_multiply() {
        assert_abs_diff_eq!(eval("1.08239X$1", &[0.1]), 0.108239, epsilon = 1e-12);
        assert_abs_diff_eq!(eval("2x3", &[]), 6.0);
    }

    #[test]
    fn test_expr_add_sub() {
        assert_abs_diff_eq!(eval("$1+$2-1.0", &[3.0, 5.0]), 7.0);
    }

    #[test]
    fn test_expr_precedence() {
        // 2 + 3 * 4 = 14, not 20
        assert_abs_diff_eq!(eval("2+3x4", &[]), 14.0);
        assert_abs_diff_eq!(eval("(2+3)x4", &[]), 20.0);
        assert_abs_diff_eq!(eval("8/2/2", &[]), 2.0);
    }

    #[test]
    fn test_expr_unary() {
        assert_eq!(parse_expr("-1.5").unwrap(), Expr::Literal(-1.5));
        assert_abs_diff_eq!(eval("-$1", &[2.0]), -2.0);
        assert_abs_diff_eq!(eval("3x-$1", &[2.0]), -6.0);
        assert_abs_diff_eq!(eval("+4--1", &[]), 5.0);
    }

    #[test]
    fn test_unbound_variable_is_zero() {
        assert_abs_diff_eq!(eval("$7+1", &[1.0]), 1.0);
    }

    #[test]
    fn test_expr_errors() {
        assert!(parse_expr("(1+2").is_err());
        assert!(parse_expr("1+").is_err());
        assert!(parse_expr("1#2").is_err());
        assert!(parse_expr("$").is_err());
    }

    #[test]
    fn test_variables_set_overrides() {
        let mut env = Variables::from_params(&[1.0, 2.0]);
        env.set(2, 5.0);
        env.set(3, 7.0);
        assert_abs_diff_eq!(env.get(1), 1.0);
        assert_abs_diff_eq!(env.get(2), 5.0);
        assert_abs_diff_eq!(env.get(3), 7.0);
    }

    #[test]
    fn test_parse_primitives() {
        let stmts = body(&[
            "0 octagon pad",
            "5,1,8,0,0,1.08239X$1,22.5",
            "1,1,0.5,0,0",
            "21,1,0.5,0.3,0,0,0",
            "20,1,0.1,0,0,1,0,0",
            "2,1,0.1,0,0,1,0,0",
            "7,0,0,2,1,0.2,0",
        ]);
        assert_eq!(stmts.len(), 7);
        assert_eq!(stmts[0], MacroStatement::Comment("octagon pad".into()));
        assert!(matches!(
            stmts[1],
            MacroStatement::Primitive(MacroPrimitive::Polygon { .. })
        ));
        assert!(matches!(
            stmts[2],
            MacroStatement::Primitive(MacroPrimitive::Circle { rotation: None, .. })
        ));
        assert!(matches!(
            stmts[3],
            MacroStatement::Primitive(MacroPrimitive::CenterLine { .. })
        ));
        assert!(matches!(
            stmts[4],
            MacroStatement::Primitive(MacroPrimitive::VectorLine { .. })
        ));
        assert_eq!(stmts[4], stmts[5]);
        assert!(matches!(
            stmts[6],
            MacroStatement::Primitive(MacroPrimitive::Thermal { .. })
        ));
    }

    #[test]
    fn test_parse_outline() {
        let stmts = body(&["4,1,3,\n0,0,\n1,0,\n1,1,\n0,0,\n0"]);
        match &stmts[0] {
            MacroStatement::Primitive(MacroPrimitive::Outline { values, .. }) => {
                assert_eq!(values.len(), 9);
            }
            other => panic!("expected outline, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_assignment() {
        let stmts = body(&["$3=$1x0.75"]);
        match &stmts[0] {
            MacroStatement::Assign { variable, value } => {
                assert_eq!(*variable, 3);
                assert_abs_diff_eq!(value.eval(&Variables::from_params(&[2.0])), 1.5);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_primitive_skipped() {
        assert!(body(&["99,1,2,3"]).is_empty());
    }

    #[test]
    fn test_short_primitive_is_error() {
        let statements = vec![(Location::new(4, 2), "1,1,0.5".to_string())];
        let err = parse_macro_body(&statements).unwrap_err();
        assert_eq!(err.location(), Some(Location::new(4, 2)));
    }
}
