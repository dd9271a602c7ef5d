//! Runtime values: every value is a (possibly empty) vector.

use serde::{Deserialize, Serialize};

use knitwork_shared::OptionValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Value {
    Null,
    Num(#[serde(with = "finite")] Vec<f64>),
    Str(Vec<String>),
    Bool(Vec<bool>),
}

impl Value {
    pub fn num(n: f64) -> Self {
        Self::Num(vec![n])
    }

    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(vec![s.into()])
    }

    pub fn bool(b: bool) -> Self {
        Self::Bool(vec![b])
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Num(v) => v.len(),
            Self::Str(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Num(_) => "numeric",
            Self::Str(_) => "character",
            Self::Bool(_) => "logical",
        }
    }

    /// Numeric view; logicals count as 0/1.
    pub fn as_nums(&self) -> Result<Vec<f64>, String> {
        match self {
            Self::Null => Ok(Vec::new()),
            Self::Num(v) => Ok(v.clone()),
            Self::Bool(v) => Ok(v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()),
            Self::Str(_) => Err("non-numeric argument".into()),
        }
    }

    pub fn as_bools(&self) -> Result<Vec<bool>, String> {
        match self {
            Self::Null => Ok(Vec::new()),
            Self::Num(v) => Ok(v.iter().map(|&n| n != 0.0).collect()),
            Self::Bool(v) => Ok(v.clone()),
            Self::Str(_) => Err("invalid argument type".into()),
        }
    }

    /// Elements as unquoted text, as `cat` and `paste` see them.
    pub fn as_strings(&self) -> Vec<String> {
        match self {
            Self::Null => Vec::new(),
            Self::Num(v) => v.iter().map(|&n| format_num(n)).collect(),
            Self::Str(v) => v.clone(),
            Self::Bool(v) => v.iter().map(|&b| format_bool(b).to_string()).collect(),
        }
    }

    /// First element as a string, if the value is a non-empty character vector.
    pub fn as_scalar_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => v.first().map(String::as_str),
            _ => None,
        }
    }

    /// Autoprint form: `[1] 1 2 3`, strings quoted.
    pub fn print(&self) -> String {
        let items: Vec<String> = match self {
            Self::Null => return "NULL".into(),
            Self::Num(v) if v.is_empty() => return "numeric(0)".into(),
            Self::Str(v) if v.is_empty() => return "character(0)".into(),
            Self::Bool(v) if v.is_empty() => return "logical(0)".into(),
            Self::Str(v) => v.iter().map(|s| format!("{s:?}")).collect(),
            other => other.as_strings(),
        };
        format!("[1] {}", items.join(" "))
    }

    /// Inline form: elements separated by commas, no index or quotes.
    pub fn inline(&self) -> String {
        self.as_strings().join(", ")
    }

    /// Chunk option literal for `opts_chunk` and `knit_child`.
    pub fn to_option(&self) -> OptionValue {
        let scalars: Vec<OptionValue> = match self {
            Self::Null => return OptionValue::Null,
            Self::Num(v) => v.iter().map(|&n| OptionValue::Number(n)).collect(),
            Self::Str(v) => v.iter().cloned().map(OptionValue::Str).collect(),
            Self::Bool(v) => v.iter().map(|&b| OptionValue::Bool(b)).collect(),
        };
        match <[OptionValue; 1]>::try_from(scalars) {
            Ok([single]) => single,
            Err(many) => OptionValue::List(many),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let items: Vec<serde_json::Value> = match self {
            Self::Null => return serde_json::Value::Null,
            Self::Num(v) => v.iter().map(|&n| serde_json::json!(n)).collect(),
            Self::Str(v) => v.iter().map(|s| serde_json::json!(s)).collect(),
            Self::Bool(v) => v.iter().map(|&b| serde_json::json!(b)).collect(),
        };
        match <[serde_json::Value; 1]>::try_from(items) {
            Ok([single]) => single,
            Err(many) => serde_json::Value::Array(many),
        }
    }
}

fn format_bool(b: bool) -> &'static str {
    if b { "TRUE" } else { "FALSE" }
}

/// Seven significant digits, trailing zeros dropped.
pub fn format_num(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Inf".into() } else { "-Inf".into() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{n:.0}");
    }
    let magnitude = n.abs().log10().floor() as i32 + 1;
    let decimals = (7 - magnitude).clamp(0, 15) as usize;
    let text = format!("{n:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// JSON has no NaN or infinities; store those as strings.
mod finite {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(String),
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let reprs: Vec<Repr> = values
            .iter()
            .map(|&n| {
                if n.is_finite() {
                    Repr::Finite(n)
                } else {
                    Repr::Special(super::format_num(n))
                }
            })
            .collect();
        reprs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let reprs = Vec::<Repr>::deserialize(deserializer)?;
        reprs
            .into_iter()
            .map(|repr| match repr {
                Repr::Finite(n) => Ok(n),
                Repr::Special(s) => match s.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "Inf" => Ok(f64::INFINITY),
                    "-Inf" => Ok(f64::NEG_INFINITY),
                    other => Err(serde::de::Error::custom(format!("not a number: {other}"))),
                },
            })
            .collect()
    }
}
