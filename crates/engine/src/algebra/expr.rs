//! Restricted raster-algebra expression evaluator
//!
//! Formulas reference named grids and combine them with `+ - * /`,
//! parentheses, unary minus and numeric constants. Nothing else is in
//! the grammar: no function calls, no variables beyond the supplied grid
//! names, no general-purpose evaluation.
//!
//! Example formulas:
//! - `"(NIR - Red) / (NIR + Red)"` → NDVI
//! - `"2.5 * (NIR - Red) / (NIR + 6 * Red - 7.5 * Blue + 1)"` → EVI

use std::collections::HashMap;

use rayon::prelude::*;
use verdelta_core::raster::Grid;
use verdelta_core::{Error, Result};

use super::{build_output, check_dimensions};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char), // +, -, *, /
    LParen,
    RParen,
}

/// Expression AST. Grid references are resolved to slots into the band
/// list at parse time, so per-pixel evaluation indexes a plain slice.
#[derive(Debug, Clone)]
enum Expr {
    Num(f64),
    Band(usize),
    BinOp {
        op: char,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
}

fn tokenize(formula: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = formula.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(chars[i]));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidExpression(format!("invalid number: {}", text)))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => {
                return Err(Error::InvalidExpression(format!(
                    "unexpected character '{}'",
                    c
                )));
            }
        }
    }

    Ok(tokens)
}

/// Recursive descent parser over the tokenized formula
struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    /// Known grid names; identifiers must resolve to one of these
    names: &'a [String],
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, names: &'a [String]) -> Self {
        Self {
            tokens,
            pos: 0,
            names,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse(mut self) -> Result<Expr> {
        let expr = self.parse_expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(t) => Err(Error::InvalidExpression(format!(
                "trailing input at token {:?}",
                t
            ))),
        }
    }

    /// expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = *op;
            self.advance();
            let right = self.parse_term()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// term = factor (('*' | '/') factor)*
    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;

        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let op = *op;
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// factor = number | ident | '(' expr ')' | '-' factor | '+' factor
    fn parse_factor(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Num(n))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                let slot = self
                    .names
                    .iter()
                    .position(|n| *n == name)
                    .ok_or_else(|| {
                        Error::InvalidExpression(format!(
                            "unknown grid '{}', available: {:?}",
                            name, self.names
                        ))
                    })?;
                Ok(Expr::Band(slot))
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(Error::InvalidExpression(
                        "expected closing parenthesis".into(),
                    )),
                }
            }
            Some(Token::Op('-')) => {
                self.advance();
                let factor = self.parse_factor()?;
                Ok(Expr::Neg(Box::new(factor)))
            }
            Some(Token::Op('+')) => {
                self.advance();
                self.parse_factor()
            }
            other => Err(Error::InvalidExpression(format!(
                "unexpected token: {:?}",
                other
            ))),
        }
    }
}

/// Evaluate an expression with band values indexed by slot
fn eval(expr: &Expr, values: &[f64]) -> f64 {
    match expr {
        Expr::Num(n) => *n,
        Expr::Band(slot) => values[*slot],
        Expr::BinOp { op, left, right } => {
            let l = eval(left, values);
            let r = eval(right, values);
            match op {
                '+' => l + r,
                '-' => l - r,
                '*' => l * r,
                '/' => {
                    if r == 0.0 {
                        f64::NAN
                    } else {
                        l / r
                    }
                }
                _ => f64::NAN,
            }
        }
        Expr::Neg(inner) => -eval(inner, values),
    }
}

/// Evaluate an arithmetic formula pixel-wise over named grids.
///
/// All grids must share dimensions. Nodata in any referenced grid makes
/// the output pixel NaN, as does division by zero (the canonical
/// normalized-difference path has its own zero-denominator convention;
/// the generic evaluator does not).
///
/// # Errors
/// - [`Error::InvalidExpression`] for a malformed formula or a reference
///   to a grid not in the map
/// - [`Error::InvalidParameter`] when no grids are supplied
/// - [`Error::SizeMismatch`] when grid dimensions disagree
pub fn grid_calc(formula: &str, grids: &HashMap<&str, &Grid<f64>>) -> Result<Grid<f64>> {
    if grids.is_empty() {
        return Err(Error::InvalidParameter {
            name: "grids",
            value: "{}".into(),
            reason: "at least one input grid is required".into(),
        });
    }

    // Sorted name order keeps slot assignment deterministic
    let mut names: Vec<String> = grids.keys().map(|s| s.to_string()).collect();
    names.sort();
    let bands: Vec<&Grid<f64>> = names
        .iter()
        .map(|name| grids[name.as_str()])
        .collect();

    let expr = Parser::new(tokenize(formula)?, &names).parse()?;

    let template = bands[0];
    for band in &bands[1..] {
        check_dimensions(template, band)?;
    }

    let (rows, cols) = template.shape();
    let nodata: Vec<Option<f64>> = bands.iter().map(|b| b.nodata()).collect();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            let mut values = vec![0.0; bands.len()];

            'pixel: for (col, out) in row_data.iter_mut().enumerate() {
                for (slot, band) in bands.iter().enumerate() {
                    let v = unsafe { band.get_unchecked(row, col) };
                    if super::is_nodata_f64(v, nodata[slot]) {
                        continue 'pixel;
                    }
                    values[slot] = v;
                }
                *out = eval(&expr, &values);
            }

            row_data
        })
        .collect();

    build_output(template, rows, cols, data)
}
