//! Reference evaluator for JSON style expressions.
//!
//! Supports the subset circle and heatmap layers use in practice:
//! - Lookup: `get`, `has`, `feature-state`, `id`, `geometry-type`, `zoom`
//! - Comparison: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - Logic: `all`, `any`, `!`
//! - Math: `+`, `-`, `*`, `/`
//! - Control: `coalesce`, `case`, `match`
//! - Conversion: `literal`, `to-number`
//! - Spatial: `within` against a tile-coordinate bbox (needs geometry)
//!
//! Expressions are compiled once by [`JsonExpression::parse`]; evaluation
//! never re-inspects the JSON.

use crate::error::ExpressionError;
use crate::evaluation::{
    EvaluationFeature, EvaluationParameters, FeatureFilter, FeatureState, StyleExpression,
};
use crate::tile_id::CanonicalTileId;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Get(String),
    Has(String),
    FeatureState(String),
    Id,
    GeometryType,
    Zoom,
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Not(Box<Expr>),
    Arith(ArithOp, Vec<Expr>),
    Coalesce(Vec<Expr>),
    Case(Vec<(Expr, Expr)>, Box<Expr>),
    Match(Box<Expr>, Vec<(Vec<Value>, Expr)>, Box<Expr>),
    ToNumber(Vec<Expr>),
    Within([f64; 4]),
}

/// A compiled JSON expression; usable as paint value, sort key or filter.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonExpression {
    root: Expr,
    state_dependent: bool,
    needs_geometry: bool,
}

impl JsonExpression {
    pub fn parse(json: &Value) -> Result<Self, ExpressionError> {
        let root = compile(json)?;
        Ok(Self {
            state_dependent: root.any(&|e| matches!(e, Expr::FeatureState(_))),
            needs_geometry: root.any(&|e| matches!(e, Expr::Within(_))),
            root,
        })
    }

    /// True when the expression is a plain literal.
    pub fn is_constant(&self) -> bool {
        matches!(self.root, Expr::Literal(_))
    }
}

impl StyleExpression for JsonExpression {
    fn evaluate(
        &self,
        globals: &EvaluationParameters,
        feature: &EvaluationFeature<'_>,
        feature_state: Option<&FeatureState>,
        _canonical: &CanonicalTileId,
    ) -> Result<Value, ExpressionError> {
        let ctx = Ctx {
            globals,
            feature,
            state: feature_state,
        };
        ctx.eval(&self.root)
    }

    fn is_state_dependent(&self) -> bool {
        self.state_dependent
    }

    fn needs_geometry(&self) -> bool {
        self.needs_geometry
    }
}

impl FeatureFilter for JsonExpression {
    fn needs_geometry(&self) -> bool {
        self.needs_geometry
    }

    fn filter(
        &self,
        params: &EvaluationParameters,
        feature: &EvaluationFeature<'_>,
        canonical: &CanonicalTileId,
    ) -> Result<bool, ExpressionError> {
        Ok(matches!(self.evaluate(params, feature, None, canonical)?, Value::Bool(true)))
    }
}

impl Expr {
    fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Expr::Compare(_, a, b) => a.any(pred) || b.any(pred),
            Expr::Not(a) => a.any(pred),
            Expr::All(xs) | Expr::Any(xs) | Expr::Arith(_, xs) | Expr::Coalesce(xs) | Expr::ToNumber(xs) => {
                xs.iter().any(|x| x.any(pred))
            }
            Expr::Case(branches, fallback) => {
                branches.iter().any(|(c, v)| c.any(pred) || v.any(pred)) || fallback.any(pred)
            }
            Expr::Match(input, arms, fallback) => {
                input.any(pred) || arms.iter().any(|(_, v)| v.any(pred)) || fallback.any(pred)
            }
            _ => false,
        }
    }
}

fn type_name(v: &Value) -> String {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

fn arity(op: &str, args: &[Value], expected: &'static str, ok: bool) -> Result<(), ExpressionError> {
    if ok {
        Ok(())
    } else {
        Err(ExpressionError::Arity {
            op: op.to_string(),
            expected,
            got: args.len(),
        })
    }
}

fn string_arg(op: &str, v: &Value) -> Result<String, ExpressionError> {
    v.as_str().map(str::to_string).ok_or_else(|| ExpressionError::Type {
        op: op.to_string(),
        expected: "string literal",
        found: type_name(v),
    })
}

fn compile_all(args: &[Value]) -> Result<Vec<Expr>, ExpressionError> {
    args.iter().map(compile).collect()
}

fn compile(json: &Value) -> Result<Expr, ExpressionError> {
    let arr = match json {
        Value::Array(arr) => arr,
        other => return Ok(Expr::Literal(other.clone())),
    };
    let (head, args) = arr.split_first().ok_or(ExpressionError::Empty)?;
    // Arrays without an operator head are plain data (e.g. `[r, g, b, a]`).
    let Some(op) = head.as_str() else {
        return Ok(Expr::Literal(json.clone()));
    };

    let expr = match op {
        "literal" => {
            arity(op, args, "1", args.len() == 1)?;
            Expr::Literal(args[0].clone())
        }
        "get" | "has" | "feature-state" => {
            arity(op, args, "1", args.len() == 1)?;
            let key = string_arg(op, &args[0])?;
            match op {
                "get" => Expr::Get(key),
                "has" => Expr::Has(key),
                _ => Expr::FeatureState(key),
            }
        }
        "id" | "geometry-type" | "zoom" => {
            arity(op, args, "0", args.is_empty())?;
            match op {
                "id" => Expr::Id,
                "geometry-type" => Expr::GeometryType,
                _ => Expr::Zoom,
            }
        }
        "==" | "!=" | "<" | "<=" | ">" | ">=" => {
            arity(op, args, "2", args.len() == 2)?;
            let cmp = match op {
                "==" => CompareOp::Eq,
                "!=" => CompareOp::Ne,
                "<" => CompareOp::Lt,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                _ => CompareOp::Ge,
            };
            Expr::Compare(cmp, Box::new(compile(&args[0])?), Box::new(compile(&args[1])?))
        }
        "all" => Expr::All(compile_all(args)?),
        "any" => Expr::Any(compile_all(args)?),
        "!" => {
            arity(op, args, "1", args.len() == 1)?;
            Expr::Not(Box::new(compile(&args[0])?))
        }
        "+" | "*" => {
            arity(op, args, "at least 1", !args.is_empty())?;
            let a = if op == "+" { ArithOp::Add } else { ArithOp::Mul };
            Expr::Arith(a, compile_all(args)?)
        }
        "-" => {
            arity(op, args, "1 or 2", matches!(args.len(), 1 | 2))?;
            Expr::Arith(ArithOp::Sub, compile_all(args)?)
        }
        "/" => {
            arity(op, args, "2", args.len() == 2)?;
            Expr::Arith(ArithOp::Div, compile_all(args)?)
        }
        "coalesce" => {
            arity(op, args, "at least 1", !args.is_empty())?;
            Expr::Coalesce(compile_all(args)?)
        }
        "to-number" => {
            arity(op, args, "at least 1", !args.is_empty())?;
            Expr::ToNumber(compile_all(args)?)
        }
        "case" => {
            arity(op, args, "an odd number >= 3", args.len() >= 3 && args.len() % 2 == 1)?;
            let (pairs, fallback) = args.split_at(args.len() - 1);
            let branches = pairs
                .chunks_exact(2)
                .map(|p| Ok((compile(&p[0])?, compile(&p[1])?)))
                .collect::<Result<Vec<_>, ExpressionError>>()?;
            Expr::Case(branches, Box::new(compile(&fallback[0])?))
        }
        "match" => {
            arity(op, args, "an even number >= 4", args.len() >= 4 && args.len() % 2 == 0)?;
            let input = compile(&args[0])?;
            let (pairs, fallback) = args[1..].split_at(args.len() - 2);
            let arms = pairs
                .chunks_exact(2)
                .map(|p| {
                    let labels = match &p[0] {
                        Value::Array(ls) => ls.clone(),
                        l => vec![l.clone()],
                    };
                    Ok((labels, compile(&p[1])?))
                })
                .collect::<Result<Vec<_>, ExpressionError>>()?;
            Expr::Match(Box::new(input), arms, Box::new(compile(&fallback[0])?))
        }
        "within" => {
            arity(op, args, "1", args.len() == 1)?;
            let bbox = args[0]
                .as_array()
                .filter(|b| b.len() == 4)
                .and_then(|b| {
                    let v: Option<Vec<f64>> = b.iter().map(Value::as_f64).collect();
                    v
                })
                .ok_or_else(|| ExpressionError::Type {
                    op: op.to_string(),
                    expected: "[min_x, min_y, max_x, max_y]",
                    found: type_name(&args[0]),
                })?;
            Expr::Within([bbox[0], bbox[1], bbox[2], bbox[3]])
        }
        other => return Err(ExpressionError::UnknownOperator(other.to_string())),
    };
    Ok(expr)
}

struct Ctx<'a, 'f> {
    globals: &'a EvaluationParameters,
    feature: &'a EvaluationFeature<'f>,
    state: Option<&'a FeatureState>,
}

fn number(v: f64) -> Value {
    Value::from(v)
}

fn expect_num(op: &str, v: &Value) -> Result<f64, ExpressionError> {
    v.as_f64().ok_or_else(|| ExpressionError::Type {
        op: op.to_string(),
        expected: "number",
        found: type_name(v),
    })
}

fn expect_bool(op: &str, v: &Value) -> Result<bool, ExpressionError> {
    v.as_bool().ok_or_else(|| ExpressionError::Type {
        op: op.to_string(),
        expected: "boolean",
        found: type_name(v),
    })
}

/// Equality that treats `1` and `1.0` as the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

impl Ctx<'_, '_> {
    fn eval(&self, e: &Expr) -> Result<Value, ExpressionError> {
        Ok(match e {
            Expr::Literal(v) => v.clone(),
            Expr::Get(k) => self.feature.properties.get(k).cloned().unwrap_or(Value::Null),
            Expr::Has(k) => Value::Bool(self.feature.properties.contains_key(k)),
            Expr::FeatureState(k) => self
                .state
                .and_then(|s| s.get(k))
                .cloned()
                .unwrap_or(Value::Null),
            Expr::Id => self.feature.id.map(Value::from).unwrap_or(Value::Null),
            Expr::GeometryType => Value::from(self.feature.geometry_type.as_str()),
            Expr::Zoom => number(self.globals.zoom),
            Expr::Compare(op, a, b) => Value::Bool(self.compare(*op, a, b)?),
            Expr::All(xs) => {
                for x in xs {
                    if !expect_bool("all", &self.eval(x)?)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Value::Bool(true)
            }
            Expr::Any(xs) => {
                for x in xs {
                    if expect_bool("any", &self.eval(x)?)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            Expr::Not(x) => Value::Bool(!expect_bool("!", &self.eval(x)?)?),
            Expr::Arith(op, xs) => number(self.arith(*op, xs)?),
            Expr::Coalesce(xs) => {
                for x in xs {
                    let v = self.eval(x)?;
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Value::Null
            }
            Expr::Case(branches, fallback) => {
                // Only `true` selects a branch; null state lookups fall through.
                for (cond, value) in branches {
                    if matches!(self.eval(cond)?, Value::Bool(true)) {
                        return self.eval(value);
                    }
                }
                self.eval(fallback)?
            }
            Expr::Match(input, arms, fallback) => {
                let v = self.eval(input)?;
                for (labels, value) in arms {
                    if labels.iter().any(|l| values_equal(l, &v)) {
                        return self.eval(value);
                    }
                }
                self.eval(fallback)?
            }
            Expr::ToNumber(xs) => number(self.to_number(xs)?),
            Expr::Within(bbox) => Value::Bool(self.within(bbox)),
        })
    }

    fn compare(&self, op: CompareOp, a: &Expr, b: &Expr) -> Result<bool, ExpressionError> {
        let (a, b) = (self.eval(a)?, self.eval(b)?);
        match op {
            CompareOp::Eq => return Ok(values_equal(&a, &b)),
            CompareOp::Ne => return Ok(!values_equal(&a, &b)),
            _ => {}
        }
        let ord = match (&a, &b) {
            (Value::String(x), Value::String(y)) => x.partial_cmp(y),
            _ => expect_num("compare", &a)?.partial_cmp(&expect_num("compare", &b)?),
        };
        let Some(ord) = ord else {
            return Ok(false);
        };
        Ok(match op {
            CompareOp::Lt => ord.is_lt(),
            CompareOp::Le => ord.is_le(),
            CompareOp::Gt => ord.is_gt(),
            _ => ord.is_ge(),
        })
    }

    fn arith(&self, op: ArithOp, xs: &[Expr]) -> Result<f64, ExpressionError> {
        let name = match op {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        let vals = xs
            .iter()
            .map(|x| expect_num(name, &self.eval(x)?))
            .collect::<Result<Vec<f64>, ExpressionError>>()?;
        Ok(match (op, vals.as_slice()) {
            (ArithOp::Add, vs) => vs.iter().sum(),
            (ArithOp::Mul, vs) => vs.iter().product(),
            (ArithOp::Sub, [a]) => -a,
            (ArithOp::Sub, [a, b]) => a - b,
            (ArithOp::Div, [a, b]) => a / b,
            _ => f64::NAN,
        })
    }

    fn to_number(&self, xs: &[Expr]) -> Result<f64, ExpressionError> {
        let mut last = Value::Null;
        for x in xs {
            let v = self.eval(x)?;
            let n = match &v {
                Value::Null => Some(0.0),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            if let Some(n) = n {
                return Ok(n);
            }
            last = v;
        }
        Err(ExpressionError::Type {
            op: "to-number".to_string(),
            expected: "value convertible to number",
            found: type_name(&last),
        })
    }

    fn within(&self, [min_x, min_y, max_x, max_y]: &[f64; 4]) -> bool {
        let Some(geometry) = self.feature.geometry.as_ref() else {
            return false;
        };
        let mut points = geometry.iter().flatten().peekable();
        points.peek().is_some()
            && points.all(|p| {
                let (x, y) = (p.x as f64, p.y as f64);
                x >= *min_x && x <= *max_x && y >= *min_y && y <= *max_y
            })
    }
}
