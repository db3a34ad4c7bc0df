//! Pass option registry.
//!
//! Options form a flat `{pass}.{option}` namespace. Each pass declares its
//! options with a static default and a validity domain; user-supplied values
//! are checked against those declarations before any tree is mutated.

use crate::error::{ShroudError, ShroudResult};
use rustc_hash::FxHashMap;
use std::fmt;

/// Name of the option every pass carries implicitly.
pub const ENABLED: &str = "enabled";

// =============================================================================
// Values
// =============================================================================

/// A scalar or list option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// String value.
    Str(String),
    /// List of strings.
    List(Vec<String>),
}

impl OptionValue {
    /// Human-readable name of the value's type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::List(_) => "list",
        }
    }

    /// Parse `raw` as a value of the same type as `self`.
    pub fn parse_like(&self, raw: &str) -> Result<OptionValue, String> {
        let raw = raw.trim();
        match self {
            Self::Bool(_) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Self::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Self::Bool(false)),
                _ => Err(format!("expected a boolean, got '{raw}'")),
            },
            Self::Int(_) => raw
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| format!("expected an integer, got '{raw}'")),
            Self::Str(_) => Ok(Self::Str(raw.to_string())),
            Self::List(_) => Ok(Self::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )),
        }
    }

    fn same_type(&self, other: &OptionValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

// =============================================================================
// Declarations
// =============================================================================

/// The set of values a pass accepts for one option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionDomain {
    /// Any value of the declared type.
    Any,
    /// One of a fixed set of strings.
    OneOf(&'static [&'static str]),
    /// An integer in `[min, max]`.
    Range(i64, i64),
    /// A list drawn from a fixed set of strings.
    SubsetOf(&'static [&'static str]),
}

/// A declared option: name, description, default and validity domain.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    /// Option name, without the pass prefix.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Value used when the user supplies none.
    pub default: OptionValue,
    /// Accepted values.
    pub domain: OptionDomain,
}

impl OptionSpec {
    /// Declare an option accepting any value of its default's type.
    #[must_use]
    pub fn new(name: &'static str, description: &'static str, default: impl Into<OptionValue>) -> Self {
        Self {
            name,
            description,
            default: default.into(),
            domain: OptionDomain::Any,
        }
    }

    /// Restrict the option to a domain.
    #[must_use]
    pub fn with_domain(mut self, domain: OptionDomain) -> Self {
        self.domain = domain;
        self
    }

    /// Check `value` against this declaration.
    pub fn check(&self, key: &str, value: &OptionValue) -> ShroudResult<()> {
        if !self.default.same_type(value) {
            return Err(ShroudError::invalid_option(
                key,
                format!(
                    "expected {}, got {}",
                    self.default.type_name(),
                    value.type_name()
                ),
            ));
        }
        match (self.domain, value) {
            (OptionDomain::OneOf(allowed), OptionValue::Str(s)) if !allowed.contains(&s.as_str()) => {
                Err(ShroudError::invalid_option(
                    key,
                    format!("'{s}' is not one of {}", allowed.join(", ")),
                ))
            }
            (OptionDomain::Range(lo, hi), OptionValue::Int(i)) if *i < lo || *i > hi => Err(
                ShroudError::invalid_option(key, format!("{i} is outside [{lo}, {hi}]")),
            ),
            (OptionDomain::SubsetOf(allowed), OptionValue::List(items)) => {
                match items.iter().find(|item| !allowed.contains(&item.as_str())) {
                    Some(item) => Err(ShroudError::invalid_option(
                        key,
                        format!("'{item}' is not one of {}", allowed.join(", ")),
                    )),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// User configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Typed(OptionValue),
    Raw(String),
}

/// User-supplied option values, keyed by `{pass}.{option}`.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: FxHashMap<String, Entry>,
}

impl Config {
    /// An empty configuration: every option takes its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a typed value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> &mut Self {
        self.values.insert(key.into(), Entry::Typed(value.into()));
        self
    }

    /// Set a textual value, parsed against the declaration when resolved.
    pub fn set_raw(&mut self, key: impl Into<String>, raw: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), Entry::Raw(raw.into()));
        self
    }

    /// Enable a pass by name.
    pub fn enable(&mut self, pass: &str) -> &mut Self {
        self.set(format!("{pass}.{ENABLED}"), true)
    }

    /// Parse a `pass.option=value` assignment into the configuration.
    pub fn apply_assignment(&mut self, assignment: &str) -> ShroudResult<()> {
        let (key, raw) = assignment.split_once('=').ok_or_else(|| {
            ShroudError::invalid_option(assignment, "expected 'pass.option=value'")
        })?;
        let key = key.trim();
        if !key.contains('.') {
            return Err(ShroudError::unknown_option(key));
        }
        self.set_raw(key, raw);
        Ok(())
    }

    /// Resolve and validate the options of one pass.
    pub fn resolve(&self, pass: &str, specs: &[OptionSpec]) -> ShroudResult<PassOptions> {
        let mut values = FxHashMap::default();
        let enabled_spec = OptionSpec::new(ENABLED, "Enables this pass", false);
        for spec in std::iter::once(&enabled_spec).chain(specs) {
            let key = format!("{pass}.{}", spec.name);
            let value = match self.values.get(&key) {
                None => spec.default.clone(),
                Some(Entry::Typed(v)) => v.clone(),
                Some(Entry::Raw(raw)) => spec
                    .default
                    .parse_like(raw)
                    .map_err(|msg| ShroudError::invalid_option(&key, msg))?,
            };
            spec.check(&key, &value)?;
            values.insert(spec.name, value);
        }
        Ok(PassOptions {
            pass: pass.to_string(),
            values,
        })
    }

    /// Fail on any key that does not name a declared option.
    pub fn reject_unknown<'a>(
        &self,
        declared: impl IntoIterator<Item = (&'a str, &'a [OptionSpec])>,
    ) -> ShroudResult<()> {
        let declared: Vec<(&str, &[OptionSpec])> = declared.into_iter().collect();
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        for key in keys {
            let known = key.split_once('.').is_some_and(|(pass, option)| {
                declared.iter().any(|(name, specs)| {
                    *name == pass
                        && (option == ENABLED || specs.iter().any(|s| s.name == option))
                })
            });
            if !known {
                return Err(ShroudError::unknown_option(key.clone()));
            }
        }
        Ok(())
    }
}

/// The validated options of one pass.
#[derive(Debug, Clone)]
pub struct PassOptions {
    pass: String,
    values: FxHashMap<&'static str, OptionValue>,
}

impl PassOptions {
    /// Whether the pass is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        matches!(self.values.get(ENABLED), Some(OptionValue::Bool(true)))
    }

    fn get(&self, name: &str) -> ShroudResult<&OptionValue> {
        self.values
            .get(name)
            .ok_or_else(|| ShroudError::unknown_option(format!("{}.{name}", self.pass)))
    }

    fn mismatch(&self, name: &str, wanted: &str) -> ShroudError {
        ShroudError::internal(format!("option {}.{name} is not a {wanted}", self.pass))
    }

    /// Read a boolean option.
    pub fn bool(&self, name: &str) -> ShroudResult<bool> {
        match self.get(name)? {
            OptionValue::Bool(b) => Ok(*b),
            _ => Err(self.mismatch(name, "bool")),
        }
    }

    /// Read an integer option.
    pub fn int(&self, name: &str) -> ShroudResult<i64> {
        match self.get(name)? {
            OptionValue::Int(i) => Ok(*i),
            _ => Err(self.mismatch(name, "int")),
        }
    }

    /// Read a string option.
    pub fn str(&self, name: &str) -> ShroudResult<&str> {
        match self.get(name)? {
            OptionValue::Str(s) => Ok(s),
            _ => Err(self.mismatch(name, "str")),
        }
    }

    /// Read a list option.
    pub fn list(&self, name: &str) -> ShroudResult<&[String]> {
        match self.get(name)? {
            OptionValue::List(items) => Ok(items),
            _ => Err(self.mismatch(name, "list")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MODES: &[&str] = &["bits", "decode"];

    fn specs() -> Vec<OptionSpec> {
        vec![
            OptionSpec::new("mode", "How to encode", "bits").with_domain(OptionDomain::OneOf(MODES)),
            OptionSpec::new("depth", "Recursion depth", 2i64).with_domain(OptionDomain::Range(0, 8)),
            OptionSpec::new("kinds", "Literal kinds", OptionValue::List(vec!["int".into()]))
                .with_domain(OptionDomain::SubsetOf(&["int", "float"])),
        ]
    }

    #[test]
    fn test_defaults_apply() {
        let opts = Config::new().resolve("numeric", &specs()).unwrap();
        assert!(!opts.enabled());
        assert_eq!(opts.str("mode").unwrap(), "bits");
        assert_eq!(opts.int("depth").unwrap(), 2);
    }

    #[test]
    fn test_enable_pass() {
        let mut cfg = Config::new();
        cfg.enable("numeric");
        assert!(cfg.resolve("numeric", &specs()).unwrap().enabled());
    }

    #[rstest]
    #[case("numeric.mode=decode", true)]
    #[case("numeric.mode=hex", false)]
    #[case("numeric.depth=8", true)]
    #[case("numeric.depth=9", false)]
    #[case("numeric.depth=deep", false)]
    #[case("numeric.enabled=yes", true)]
    #[case("numeric.kinds=float, int", true)]
    #[case("numeric.kinds=int,str", false)]
    fn test_raw_values_are_validated(#[case] assignment: &str, #[case] ok: bool) {
        let mut cfg = Config::new();
        cfg.apply_assignment(assignment).unwrap();
        let res = cfg.resolve("numeric", &specs());
        assert_eq!(res.is_ok(), ok, "{assignment}: {res:?}");
        if let Err(e) = res {
            assert!(matches!(e, ShroudError::InvalidOption { .. }));
        }
    }

    #[test]
    fn test_type_mismatch_is_invalid() {
        let mut cfg = Config::new();
        cfg.set("numeric.mode", 3i64);
        let err = cfg.resolve("numeric", &specs()).unwrap_err();
        assert!(err.to_string().contains("expected str"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let specs = specs();
        let mut cfg = Config::new();
        cfg.set("numeric.mode", "bits").set("numeric.colour", "red");
        let err = cfg.reject_unknown([("numeric", specs.as_slice())]).unwrap_err();
        assert_eq!(err, ShroudError::unknown_option("numeric.colour"));
    }

    #[test]
    fn test_enabled_is_always_known() {
        let mut cfg = Config::new();
        cfg.enable("renamer");
        assert!(cfg.reject_unknown([("renamer", &[][..])]).is_ok());
    }

    #[test]
    fn test_assignment_without_equals() {
        let mut cfg = Config::new();
        assert!(cfg.apply_assignment("numeric.mode").is_err());
        assert!(cfg.apply_assignment("mode=bits").is_err());
    }

    #[test]
    fn test_list_parsing() {
        let v = OptionValue::List(vec![]).parse_like("a, b,,c").unwrap();
        assert_eq!(v, OptionValue::List(vec!["a".into(), "b".into(), "c".into()]));
    }
}
