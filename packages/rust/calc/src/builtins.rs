//! Builtin functions.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use knitwork_core::ChildSource;
use knitwork_shared::{OptionLayer, RecordedPlot, ResultItem};

use crate::engine::{CalcEngine, Ctx, Fault, MAX_LENGTH};
use crate::value::Value;

type Outcome = Result<Value, Fault>;

/// Evaluated call arguments, matched by name first and then by position.
struct Args {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl Args {
    fn new(args: Vec<(Option<String>, Value)>) -> Self {
        let mut positional = Vec::new();
        let mut named = BTreeMap::new();
        for (name, value) in args {
            match name {
                Some(name) => {
                    named.insert(name, value);
                }
                None => positional.push(value),
            }
        }
        Self { positional, named }
    }

    fn take(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.named.remove(name) {
            return Some(value);
        }
        if self.positional.is_empty() {
            None
        } else {
            Some(self.positional.remove(0))
        }
    }

    fn take_named(&mut self, name: &str) -> Option<Value> {
        self.named.remove(name)
    }

    fn required(&mut self, name: &str) -> Outcome {
        self.take(name)
            .ok_or_else(|| Fault::Call(format!("argument \"{name}\" is missing, with no default")))
    }

    /// A named string argument with a default.
    fn string(&mut self, name: &str, default: &str) -> Result<String, Fault> {
        match self.take_named(name) {
            None => Ok(default.to_string()),
            Some(value) => value
                .as_scalar_str()
                .map(str::to_string)
                .ok_or_else(|| Fault::Call(format!("invalid '{name}' argument"))),
        }
    }

    fn nums(&mut self, name: &str) -> Result<Vec<f64>, Fault> {
        let value = self.required(name)?;
        value.as_nums().map_err(|_| {
            Fault::Call(format!(
                "non-numeric argument to mathematical function ({})",
                value.type_name()
            ))
        })
    }

    /// Every remaining positional value, flattened to strings.
    fn strings(&mut self) -> Vec<String> {
        self.positional
            .drain(..)
            .flat_map(|value| value.as_strings())
            .collect()
    }
}

impl CalcEngine {
    pub(crate) fn call(
        &mut self,
        name: &str,
        call: &str,
        args: Vec<(Option<String>, Value)>,
        ctx: &mut Ctx<'_>,
    ) -> Outcome {
        let mut args = Args::new(args);
        match name {
            "print" => {
                let value = args.take("x").unwrap_or(Value::Null);
                ctx.items.push(ResultItem::text(value.print()));
                Ok(value)
            }
            "cat" => {
                let sep = args.string("sep", " ")?;
                let text = args.strings().join(&sep);
                ctx.items.push(ResultItem::text(text));
                Ok(Value::Null)
            }
            "asis" => {
                let sep = args.string("sep", "")?;
                let text = args.strings().join(&sep);
                ctx.items.push(ResultItem::asis(text));
                Ok(Value::Null)
            }
            "paste" => paste(args),
            "c" => Ok(combine(
                args.positional.into_iter().chain(args.named.into_values()),
            )),
            "sum" => {
                let mut total = 0.0;
                for value in &args.positional {
                    total += value
                        .as_nums()
                        .map_err(|_| {
                            Fault::Call(format!(
                                "invalid 'type' ({}) of argument",
                                value.type_name()
                            ))
                        })?
                        .iter()
                        .sum::<f64>();
                }
                Ok(Value::num(total))
            }
            "mean" => {
                let nums = args.nums("x")?;
                let mean = if nums.is_empty() {
                    f64::NAN
                } else {
                    nums.iter().sum::<f64>() / nums.len() as f64
                };
                Ok(Value::num(mean))
            }
            "length" => {
                let value = args.take("x").unwrap_or(Value::Null);
                Ok(Value::num(value.len() as f64))
            }
            "sqrt" => {
                let nums = args.nums("x")?;
                if nums.iter().any(|&n| n < 0.0) {
                    ctx.items.push(ResultItem::Warning {
                        call: Some(call.to_string()),
                        message: "NaNs produced".into(),
                    });
                }
                Ok(Value::Num(nums.into_iter().map(f64::sqrt).collect()))
            }
            "seq" => seq(args),
            "warning" => {
                let message = args.strings().concat();
                ctx.items.push(ResultItem::Warning {
                    call: None,
                    message: message.clone(),
                });
                Ok(Value::str(message))
            }
            "message" => {
                let message = args.strings().concat();
                ctx.items.push(ResultItem::Message { message });
                Ok(Value::Null)
            }
            "stop" => Err(Fault::User {
                call: None,
                message: args.strings().concat(),
            }),
            "plot" => {
                let plot = plot(args)?;
                ctx.items.push(ResultItem::Plot(plot));
                Ok(Value::Null)
            }
            "meta" => {
                let value = meta(args)?;
                ctx.items.push(ResultItem::Text {
                    text: String::new(),
                    asis: true,
                    cacheable: true,
                    metadata: vec![value],
                });
                Ok(Value::Null)
            }
            "now" => {
                ctx.volatile = true;
                Ok(Value::str(Utc::now().to_rfc3339()))
            }
            "chunk_label" => Ok(ctx
                .host
                .options()
                .map_or(Value::Null, |options| Value::str(options.label.clone()))),
            "knit_child" => {
                let source = match (args.take_named("text"), args.take("input")) {
                    (Some(text), _) => text.as_scalar_str().map(|t| ChildSource::Text(t.into())),
                    (None, Some(path)) => path.as_scalar_str().map(|p| ChildSource::Path(p.into())),
                    (None, None) => None,
                }
                .ok_or_else(|| Fault::Call("a child path or text= is required".into()))?;
                let overrides = option_layer(args)?;
                debug!(?source, "knitting child from code");
                let out = ctx.host.knit_child(self, source, overrides)?;
                ctx.items.push(ResultItem::asis(out));
                Ok(Value::Null)
            }
            "knit_exit" => {
                let closing = args.take("append").map(|v| v.as_strings().concat());
                ctx.host.exit(closing);
                Ok(Value::Null)
            }
            "opts_chunk" => {
                let layer = option_layer(args)?;
                ctx.host.set_chunk_defaults(layer);
                Ok(Value::Null)
            }
            _ => Err(Fault::User {
                call: None,
                message: format!("could not find function \"{name}\""),
            }),
        }
    }
}

fn paste(mut args: Args) -> Outcome {
    let sep = args.string("sep", " ")?;
    let collapse = match args.take_named("collapse") {
        None => None,
        Some(value) => Some(
            value
                .as_scalar_str()
                .map(str::to_string)
                .ok_or_else(|| Fault::Call("invalid 'collapse' argument".into()))?,
        ),
    };

    let columns: Vec<Vec<String>> = args
        .positional
        .iter()
        .map(Value::as_strings)
        .filter(|column| !column.is_empty())
        .collect();
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    let pasted: Vec<String> = (0..rows)
        .map(|i| {
            columns
                .iter()
                .map(|column| column[i % column.len()].as_str())
                .collect::<Vec<_>>()
                .join(&sep)
        })
        .collect();

    Ok(match collapse {
        Some(collapse) => Value::str(pasted.join(&collapse)),
        None => Value::Str(pasted),
    })
}

/// Concatenate values, promoting logical → numeric → character.
fn combine(values: impl Iterator<Item = Value>) -> Value {
    let values: Vec<Value> = values.filter(|v| !matches!(v, Value::Null)).collect();
    if values.is_empty() {
        return Value::Null;
    }
    if values.iter().any(|v| matches!(v, Value::Str(_))) {
        return Value::Str(values.iter().flat_map(Value::as_strings).collect());
    }
    if values.iter().all(|v| matches!(v, Value::Bool(_))) {
        return Value::Bool(
            values
                .iter()
                .flat_map(|v| v.as_bools().unwrap_or_default())
                .collect(),
        );
    }
    Value::Num(
        values
            .iter()
            .flat_map(|v| v.as_nums().unwrap_or_default())
            .collect(),
    )
}

fn seq(mut args: Args) -> Outcome {
    let scalar = |value: Value, name: &str| -> Result<f64, Fault> {
        value
            .as_nums()
            .ok()
            .and_then(|nums| nums.first().copied())
            .filter(|n| n.is_finite())
            .ok_or_else(|| Fault::Call(format!("'{name}' must be a finite number")))
    };

    let first = scalar(args.required("from")?, "from")?;
    let (from, to) = match args.take("to") {
        Some(to) => (first, scalar(to, "to")?),
        None => (1.0, first),
    };
    let by = match args.take("by") {
        Some(by) => scalar(by, "by")?,
        None if to >= from => 1.0,
        None => -1.0,
    };

    if by == 0.0 {
        return if from == to {
            Ok(Value::num(from))
        } else {
            Err(Fault::Call("invalid '(to - from)/by'".into()))
        };
    }
    if (to - from) * by < 0.0 {
        return Err(Fault::Call("wrong sign in 'by' argument".into()));
    }
    if (to - from) / by >= MAX_LENGTH {
        return Err(Fault::Call("'by' argument is much too small".into()));
    }
    let count = ((to - from) / by + 1e-10).floor() as usize + 1;
    Ok(Value::Num((0..count).map(|i| from + by * i as f64).collect()))
}

fn plot(mut args: Args) -> Result<RecordedPlot, Fault> {
    let title = match args.take_named("main") {
        None => None,
        Some(main) => Some(main.as_strings().concat()),
    };
    let first = args.nums("x")?;
    let points = match args.take("y") {
        Some(y) => {
            let y = y
                .as_nums()
                .map_err(|_| Fault::Call("'y' must be numeric".into()))?;
            if y.len() != first.len() {
                return Err(Fault::Call("'x' and 'y' lengths differ".into()));
            }
            first.into_iter().zip(y).collect()
        }
        None => first
            .into_iter()
            .enumerate()
            .map(|(i, y)| ((i + 1) as f64, y))
            .collect(),
    };
    Ok(RecordedPlot { title, points })
}

fn meta(mut args: Args) -> Result<serde_json::Value, Fault> {
    if args.named.is_empty() {
        return match args.positional.len() {
            1 => Ok(args.positional.remove(0).to_json()),
            _ => Err(Fault::Call("meta takes one value or named values".into())),
        };
    }
    if !args.positional.is_empty() {
        return Err(Fault::Call("meta values must all be named".into()));
    }
    Ok(serde_json::Value::Object(
        args.named
            .into_iter()
            .map(|(name, value)| (name, value.to_json()))
            .collect(),
    ))
}

fn option_layer(args: Args) -> Result<OptionLayer, Fault> {
    if !args.positional.is_empty() {
        return Err(Fault::Call("chunk options must be named".into()));
    }
    Ok(args
        .named
        .into_iter()
        .map(|(name, value)| (name, value.to_option()))
        .collect())
}
