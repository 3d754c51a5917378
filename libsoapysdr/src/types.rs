//! Host value types for the records exchanged with the driver layer.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ffi::{SOAPY_SDR_RX, SOAPY_SDR_TX};

/// Stream direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    pub(crate) fn raw(self) -> libc::c_int {
        match self {
            Direction::Tx => SOAPY_SDR_TX,
            Direction::Rx => SOAPY_SDR_RX,
        }
    }

    pub(crate) fn from_raw(raw: libc::c_int) -> Option<Direction> {
        match raw {
            SOAPY_SDR_TX => Some(Direction::Tx),
            SOAPY_SDR_RX => Some(Direction::Rx),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Tx => write!(f, "TX"),
            Direction::Rx => write!(f, "RX"),
        }
    }
}

/// A numeric interval. A `step` of zero means the range is continuous.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Range {
    pub minimum: f64,
    pub maximum: f64,
    pub step: f64,
}

impl Range {
    pub fn new(minimum: f64, maximum: f64, step: f64) -> Self {
        Range {
            minimum,
            maximum,
            step,
        }
    }

    pub fn is_continuous(&self) -> bool {
        self.step == 0.0
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.minimum && value <= self.maximum
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}", self.minimum, self.maximum)?;
        if !self.is_continuous() {
            write!(f, ", step {}", self.step)?;
        }
        write!(f, "]")
    }
}

/// An ordered set of key/value string pairs with unique keys.
///
/// This is the carrier for device construction arguments, stream arguments
/// and the information maps returned by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Kwargs {
    pairs: Vec<(String, String)>,
}

impl Kwargs {
    pub fn new() -> Self {
        Kwargs::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a pair. Returns the previous value of `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                self.pairs.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.pairs.iter().position(|(k, _)| k == key)?;
        Some(self.pairs.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    /// Parse the markup form `"keyA=valA, keyB=valB"`.
    ///
    /// Whitespace around keys and values is trimmed, empty entries are
    /// skipped and a bare key maps to an empty value.
    pub fn from_markup(markup: &str) -> Self {
        let mut out = Kwargs::new();
        for entry in markup.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match entry.split_once('=') {
                Some((k, v)) => out.insert(k.trim(), v.trim()),
                None => out.insert(entry, ""),
            };
        }
        out
    }
}

impl fmt::Display for Kwargs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl FromStr for Kwargs {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Kwargs::from_markup(s))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Kwargs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut out = Kwargs::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl<'a> IntoIterator for &'a Kwargs {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Value type of a described argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ArgType {
    Bool,
    Int,
    Float,
    String,
}

/// An argument value parsed according to its [`ArgType`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Description of a configurable parameter (setting, sensor, stream arg).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArgInfo {
    pub key: String,
    /// Default value, as a string.
    pub value: String,
    pub name: String,
    pub description: String,
    pub units: String,
    pub arg_type: ArgType,
    /// Meaningful for `Int` and `Float` arguments.
    pub range: Range,
    /// Allowed values; `option_names` has the same length.
    pub options: Vec<String>,
    pub option_names: Vec<String>,
}

impl ArgInfo {
    /// Parse `value` according to `arg_type`.
    pub fn parse(&self, value: &str) -> Option<ArgValue> {
        let value = value.trim();
        match self.arg_type {
            ArgType::Bool => match value {
                "true" => Some(ArgValue::Bool(true)),
                "false" => Some(ArgValue::Bool(false)),
                _ => None,
            },
            ArgType::Int => value.parse().ok().map(ArgValue::Int),
            ArgType::Float => value.parse().ok().map(ArgValue::Float),
            ArgType::String => Some(ArgValue::String(value.to_string())),
        }
    }

    /// The default value parsed according to `arg_type`.
    pub fn default_value(&self) -> Option<ArgValue> {
        self.parse(&self.value)
    }

    /// Pairs of (option, display name).
    pub fn choices(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .zip(&self.option_names)
            .map(|(o, n)| (o.as_str(), n.as_str()))
    }
}

impl fmt::Display for ArgInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}) = {}", self.key, self.arg_type, self.value)?;
        if !self.units.is_empty() {
            write!(f, " {}", self.units)?;
        }
        match self.arg_type {
            ArgType::Int | ArgType::Float => write!(f, " {}", self.range),
            _ if !self.options.is_empty() => write!(f, " {:?}", self.options),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kwargs_keys_stay_unique() {
        let mut args = Kwargs::new().with("driver", "mock").with("serial", "1");
        assert_eq!(args.insert("driver", "other"), Some("mock".to_string()));
        assert_eq!(args.len(), 2);
        assert_eq!(args.get("driver"), Some("other"));
        assert_eq!(args.keys().collect::<Vec<_>>(), vec!["driver", "serial"]);
    }

    #[test]
    fn markup_round_trip() {
        let args = Kwargs::from_markup(" driver = mock ,serial=00ff, flag ,");
        assert_eq!(args.get("driver"), Some("mock"));
        assert_eq!(args.get("serial"), Some("00ff"));
        assert_eq!(args.get("flag"), Some(""));
        assert_eq!(args.to_string(), "driver=mock, serial=00ff, flag=");
        assert_eq!(args.to_string().parse::<Kwargs>().unwrap(), args);
    }

    #[test]
    fn empty_markup() {
        assert!(Kwargs::from_markup("").is_empty());
        assert!(Kwargs::from_markup(" , ,").is_empty());
    }

    #[test]
    fn range_display_and_contains() {
        let r = Range::new(0.0, 73.0, 1.0);
        assert_eq!(r.to_string(), "[0, 73, step 1]");
        assert!(r.contains(10.0));
        assert!(!r.contains(74.0));
        assert!(Range::new(1e6, 6e9, 0.0).is_continuous());
    }

    #[test]
    fn arg_info_parses_by_type() {
        let mut info = ArgInfo {
            key: "gain".into(),
            value: "12".into(),
            name: "Gain".into(),
            description: String::new(),
            units: "dB".into(),
            arg_type: ArgType::Int,
            range: Range::new(0.0, 40.0, 1.0),
            options: vec![],
            option_names: vec![],
        };
        assert_eq!(info.default_value(), Some(ArgValue::Int(12)));
        assert_eq!(info.parse("x"), None);
        info.arg_type = ArgType::Bool;
        assert_eq!(info.parse("true"), Some(ArgValue::Bool(true)));
        info.arg_type = ArgType::Float;
        assert_eq!(info.parse("1.5"), Some(ArgValue::Float(1.5)));
    }

    #[test]
    fn direction_codes() {
        assert_eq!(Direction::from_raw(Direction::Rx.raw()), Some(Direction::Rx));
        assert_eq!(Direction::from_raw(Direction::Tx.raw()), Some(Direction::Tx));
        assert_eq!(Direction::from_raw(7), None);
    }
}
