//! Parameter coder: request form fields to typed values and engine flags.
//!
//! Parsing never rejects a value. A number that fails to parse is carried as
//! NaN and handed to the engine, which then fails the run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a raw string value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Integer,
    Float,
    /// Lower-cased string.
    LowercaseString,
    /// Verbatim string (identifiers, URIs).
    Text,
    /// Exactly `"true"` is true.
    Bool,
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// `None` when the input was not a valid integer.
    Integer(Option<i64>),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(Some(n)) => write!(f, "{n}"),
            ParamValue::Integer(None) => f.write_str("NaN"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Optional rule applied after kind parsing.
pub type PostProcess = fn(ParamValue) -> ParamValue;

/// Definition of one recognised option.
#[derive(Debug, Clone, Copy)]
pub struct Parameter {
    flag: Option<&'static str>,
    kind: ParamKind,
    post: Option<PostProcess>,
}

impl Parameter {
    /// Option forwarded to the engine as `-<flag> <value>`.
    pub const fn flagged(flag: &'static str, kind: ParamKind) -> Self {
        Parameter {
            flag: Some(flag),
            kind,
            post: None,
        }
    }

    /// Option consumed by simbridge itself, never forwarded.
    pub const fn internal(kind: ParamKind) -> Self {
        Parameter {
            flag: None,
            kind,
            post: None,
        }
    }

    pub const fn with_post(self, post: PostProcess) -> Self {
        Parameter {
            post: Some(post),
            ..self
        }
    }

    pub fn flag(&self) -> Option<&'static str> {
        self.flag
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// Parse a raw value according to this parameter's kind and post rule.
    pub fn process(&self, raw: &str) -> ParamValue {
        let value = match self.kind {
            ParamKind::Integer => ParamValue::Integer(raw.trim().parse().ok()),
            ParamKind::Float => ParamValue::Float(raw.trim().parse().unwrap_or(f64::NAN)),
            ParamKind::LowercaseString => ParamValue::Text(raw.to_lowercase()),
            ParamKind::Text => ParamValue::Text(raw.to_string()),
            ParamKind::Bool => ParamValue::Bool(raw == "true"),
        };

        match self.post {
            Some(post) => post(value),
            None => value,
        }
    }
}

/// Typed values keyed by external option name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet(BTreeMap<String, ParamValue>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Boolean option, `false` when absent.
    pub fn flag_enabled(&self, name: &str) -> bool {
        self.get(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Fixed registry from external option names to parameter definitions.
#[derive(Debug, Clone, Copy)]
pub struct ParameterMap {
    entries: &'static [(&'static str, Parameter)],
}

impl ParameterMap {
    pub const fn new(entries: &'static [(&'static str, Parameter)]) -> Self {
        ParameterMap { entries }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| p)
    }

    fn by_flag(&self, flag: &str) -> Option<(&'static str, &Parameter)> {
        self.entries
            .iter()
            .find(|(_, p)| p.flag == Some(flag))
            .map(|(n, p)| (*n, p))
    }

    /// Keep recognised fields, typed. Unknown names are dropped silently.
    pub fn process<I, K, V>(&self, fields: I) -> ParameterSet
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = ParameterSet::new();
        for (name, raw) in fields {
            if let Some(param) = self.get(name.as_ref()) {
                set.insert(name.as_ref(), param.process(raw.as_ref()));
            }
        }
        set
    }

    /// `-<flag> <value>` pairs for every flagged entry of `set`.
    pub fn encode_args(&self, set: &ParameterSet) -> Vec<String> {
        set.iter()
            .filter_map(|(name, value)| {
                self.get(name)
                    .and_then(Parameter::flag)
                    .map(|flag| [format!("-{flag}"), value.to_string()])
            })
            .flatten()
            .collect()
    }

    /// Command-line fragment as a single string.
    pub fn encode(&self, set: &ParameterSet) -> String {
        self.encode_args(set).join(" ")
    }

    /// Inverse of [`encode_args`](Self::encode_args): map known flags back to names.
    ///
    /// Tokens that are not a known flag followed by a value are skipped.
    pub fn decode_args<S: AsRef<str>>(&self, args: &[S]) -> ParameterSet {
        let mut set = ParameterSet::new();
        let mut i = 0;
        while i < args.len() {
            let token = args[i].as_ref();
            let known = token
                .strip_prefix('-')
                .and_then(|flag| self.by_flag(flag));

            match (known, args.get(i + 1)) {
                (Some((name, param)), Some(value)) => {
                    set.insert(name, param.process(value.as_ref()));
                    i += 2;
                }
                _ => i += 1,
            }
        }
        set
    }
}

fn strip_xml_extension(value: ParamValue) -> ParamValue {
    match value {
        ParamValue::Text(s) => match s.strip_suffix(".xml") {
            Some(stem) => ParamValue::Text(stem.to_string()),
            None => ParamValue::Text(s),
        },
        other => other,
    }
}

/// Option names shared with callers.
pub const OUTPUT_ALL: &str = "outputAll";
pub const TOP_MODEL_ID: &str = "topModelId";
pub const URI_PREFIX: &str = "uriPrefix";
pub const REPOSITORY: &str = "repository";

static ANALYSIS_ENTRIES: [(&str, Parameter); 12] = [
    ("initialTime", Parameter::flagged("ti", ParamKind::Integer)),
    ("stopTime", Parameter::flagged("tl", ParamKind::Integer)),
    ("outputTime", Parameter::flagged("ot", ParamKind::Integer)),
    ("printInterval", Parameter::flagged("pi", ParamKind::Integer)),
    ("minTimeStep", Parameter::flagged("m0", ParamKind::Integer)),
    ("maxTimeStep", Parameter::flagged("m1", ParamKind::Integer)),
    ("absoluteError", Parameter::flagged("aErr", ParamKind::Float)),
    ("relativeError", Parameter::flagged("sErr", ParamKind::Float)),
    ("seed", Parameter::flagged("sd", ParamKind::Integer)),
    ("runs", Parameter::flagged("r", ParamKind::Integer)),
    ("simulationType", Parameter::flagged("sim", ParamKind::LowercaseString)),
    (OUTPUT_ALL, Parameter::internal(ParamKind::Bool)),
];

/// Options understood by the analysis engine.
pub static ANALYSIS_PARAMETERS: ParameterMap = ParameterMap::new(&ANALYSIS_ENTRIES);

static CONVERSION_ENTRIES: [(&str, Parameter); 4] = [
    (
        TOP_MODEL_ID,
        Parameter::internal(ParamKind::Text).with_post(strip_xml_extension),
    ),
    (URI_PREFIX, Parameter::flagged("p", ParamKind::Text)),
    (REPOSITORY, Parameter::flagged("r", ParamKind::Text)),
    ("sbolVersion", Parameter::flagged("v", ParamKind::Text)),
];

/// Options understood by the conversion engine.
pub static CONVERSION_PARAMETERS: ParameterMap = ParameterMap::new(&CONVERSION_ENTRIES);
