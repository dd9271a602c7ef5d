//! The calc interpreter behind the [`Engine`] trait.

use std::collections::BTreeMap;

use tracing::{debug, instrument, trace};

use knitwork_core::{Engine, EvalHost, EvalRequest};
use knitwork_shared::{KnitError, Result, ResultItem};

use crate::syntax::{BinOp, Expr, statements};
use crate::value::Value;

/// Calls whose value is not printed at top level.
const INVISIBLE: &[&str] = &[
    "print",
    "cat",
    "asis",
    "warning",
    "message",
    "stop",
    "plot",
    "meta",
    "knit_child",
    "knit_exit",
    "opts_chunk",
];

/// Longest vector a sequence may produce.
pub(crate) const MAX_LENGTH: f64 = 10_000_000.0;

/// Why evaluating an expression stopped.
#[derive(Debug)]
pub(crate) enum Fault {
    /// Failure inside a builtin; the call text is attached by the caller.
    Call(String),
    /// A complete user-level error.
    User {
        call: Option<String>,
        message: String,
    },
    /// A pipeline failure that aborts the whole evaluation.
    Host(KnitError),
}

impl From<KnitError> for Fault {
    fn from(err: KnitError) -> Self {
        Self::Host(err)
    }
}

/// Per-evaluation context threaded through the interpreter.
pub(crate) struct Ctx<'h> {
    pub host: &'h mut dyn EvalHost,
    pub items: Vec<ResultItem>,
    /// Set when a statement reads something that changes between runs.
    pub volatile: bool,
}

/// A small vector calculator with persistent variables.
#[derive(Debug, Default)]
pub struct CalcEngine {
    vars: BTreeMap<String, Value>,
}

impl CalcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub(crate) fn eval(
        &mut self,
        expr: &Expr,
        ctx: &mut Ctx<'_>,
    ) -> std::result::Result<Value, Fault> {
        match expr {
            Expr::Num(n) => Ok(Value::num(*n)),
            Expr::Str(s) => Ok(Value::str(s.clone())),
            Expr::Bool(b) => Ok(Value::bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Var(name) => self.vars.get(name).cloned().ok_or_else(|| Fault::User {
                call: None,
                message: format!("object '{name}' not found"),
            }),
            Expr::Neg(inner) => {
                let value = self.eval(inner, ctx)?;
                let nums = value.as_nums().map_err(|_| Fault::User {
                    call: Some(expr.to_string()),
                    message: "invalid argument to unary operator".into(),
                })?;
                Ok(Value::Num(nums.into_iter().map(|n| -n).collect()))
            }
            Expr::Not(inner) => {
                let value = self.eval(inner, ctx)?;
                let bools = value.as_bools().map_err(|message| Fault::User {
                    call: Some(expr.to_string()),
                    message,
                })?;
                Ok(Value::Bool(bools.into_iter().map(|b| !b).collect()))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, ctx)?;
                let rhs = self.eval(rhs, ctx)?;
                binary(*op, &lhs, &rhs).map_err(|message| Fault::User {
                    call: Some(expr.to_string()),
                    message,
                })
            }
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push((arg.name.clone(), self.eval(&arg.value, ctx)?));
                }
                let call = expr.to_string();
                trace!(%call, "calling builtin");
                self.call(name, &call, values, ctx).map_err(|fault| match fault {
                    Fault::Call(message) => Fault::User {
                        call: Some(call.clone()),
                        message,
                    },
                    other => other,
                })
            }
            Expr::Assign { name, value } => {
                let value = self.eval(value, ctx)?;
                self.vars.insert(name.clone(), value.clone());
                Ok(value)
            }
        }
    }
}

fn is_visible(expr: &Expr) -> bool {
    match expr {
        Expr::Assign { .. } => false,
        other => !other.call_name().is_some_and(|name| INVISIBLE.contains(&name)),
    }
}

impl Engine for CalcEngine {
    fn languages(&self) -> &[&'static str] {
        &["calc"]
    }

    fn script_extension(&self) -> &'static str {
        "calc"
    }

    #[instrument(skip_all, fields(label = request.label, inline = request.inline))]
    fn evaluate(
        &mut self,
        request: &EvalRequest<'_>,
        host: &mut dyn EvalHost,
    ) -> Result<Vec<ResultItem>> {
        let statements = match statements(request.code) {
            Ok(statements) => statements,
            Err(message) => {
                debug!(%message, "chunk does not lex");
                return Ok(vec![ResultItem::Error {
                    call: None,
                    message,
                }]);
            }
        };

        let mut ctx = Ctx {
            host,
            items: Vec::new(),
            volatile: false,
        };
        let mut inline_value = None;

        for statement in statements {
            if !request.inline {
                ctx.items.push(ResultItem::source(statement.source));
            }
            let expr = match statement.parsed {
                None => continue,
                Some(Ok(expr)) => expr,
                Some(Err(message)) => {
                    ctx.items.push(ResultItem::Error {
                        call: None,
                        message,
                    });
                    continue;
                }
            };

            let first_item = ctx.items.len();
            ctx.volatile = false;
            match self.eval(&expr, &mut ctx) {
                Ok(value) if is_visible(&expr) => {
                    if request.inline {
                        inline_value = Some(value.inline());
                    } else {
                        ctx.items.push(ResultItem::text(value.print()));
                    }
                }
                Ok(_) => {}
                Err(Fault::Host(err)) => return Err(err),
                Err(Fault::User { call, message }) => {
                    ctx.items.push(ResultItem::Error { call, message })
                }
                Err(Fault::Call(message)) => ctx.items.push(ResultItem::Error {
                    call: None,
                    message,
                }),
            }
            if ctx.volatile {
                for item in &mut ctx.items[first_item..] {
                    if let ResultItem::Text { cacheable, .. } = item {
                        *cacheable = false;
                    }
                }
            }
        }

        let mut items = ctx.items;
        if let Some(value) = inline_value {
            items.push(ResultItem::text(value));
        }
        Ok(items)
    }

    fn capture_state(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.vars).ok()
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> Result<()> {
        let vars: BTreeMap<String, Value> = serde_json::from_value(state.clone())
            .map_err(|e| KnitError::Engine(format!("cannot restore calc variables: {e}")))?;
        self.vars.extend(vars);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> std::result::Result<Value, String> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow | BinOp::Mod => {
            let (a, b) = numeric_operands(lhs, rhs)?;
            Ok(Value::Num(recycle(&a, &b, |x, y| arith(op, x, y))))
        }
        BinOp::Range => range(lhs, rhs),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                let (a, b) = (lhs.as_strings(), rhs.as_strings());
                Ok(Value::Bool(recycle(&a, &b, |x, y| compare(op, x.cmp(&y)))))
            } else {
                let (a, b) = numeric_operands(lhs, rhs)?;
                Ok(Value::Bool(recycle(&a, &b, |x, y| match x.partial_cmp(&y) {
                    Some(ordering) => compare(op, ordering),
                    None => op == BinOp::Ne,
                })))
            }
        }
        BinOp::And | BinOp::Or => {
            let a = lhs.as_bools()?;
            let b = rhs.as_bools()?;
            Ok(Value::Bool(recycle(&a, &b, |x, y| {
                if op == BinOp::And { x && y } else { x || y }
            })))
        }
    }
}

fn numeric_operands(
    lhs: &Value,
    rhs: &Value,
) -> std::result::Result<(Vec<f64>, Vec<f64>), String> {
    let non_numeric = |_| "non-numeric argument to binary operator".to_string();
    Ok((
        lhs.as_nums().map_err(non_numeric)?,
        rhs.as_nums().map_err(non_numeric)?,
    ))
}

fn arith(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Pow => x.powf(y),
        // Result takes the sign of the divisor.
        BinOp::Mod => x - y * (x / y).floor(),
        _ => f64::NAN,
    }
}

fn compare(op: BinOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinOp::Eq => ordering == Equal,
        BinOp::Ne => ordering != Equal,
        BinOp::Lt => ordering == Less,
        BinOp::Gt => ordering == Greater,
        BinOp::Le => ordering != Greater,
        BinOp::Ge => ordering != Less,
        _ => false,
    }
}

/// Element-wise over the longer operand, cycling the shorter one.
fn recycle<T: Clone, V>(a: &[T], b: &[T], f: impl Fn(T, T) -> V) -> Vec<V> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| f(a[i % a.len()].clone(), b[i % b.len()].clone()))
        .collect()
}

fn range(lhs: &Value, rhs: &Value) -> std::result::Result<Value, String> {
    let from = lhs.as_nums()?.first().copied();
    let to = rhs.as_nums()?.first().copied();
    let (Some(from), Some(to)) = (from, to) else {
        return Err("argument of length 0".into());
    };
    if !from.is_finite() || !to.is_finite() {
        return Err("NA/NaN argument".into());
    }
    if (to - from).abs() >= MAX_LENGTH {
        return Err("result would be too long a vector".into());
    }
    let step = if to >= from { 1.0 } else { -1.0 };
    let count = ((to - from) * step).floor() as usize + 1;
    Ok(Value::Num((0..count).map(|i| from + step * i as f64).collect()))
}
