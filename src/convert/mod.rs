//! Value converters: turn raw scraped strings into typed JSON values.
//!
//! A converter is looked up by tag (`"int"`, `"float"`, ...). Two suffixes
//! relax failures:
//!
//! - `<tag>_or_none`: a failed conversion yields `null`
//! - `<tag>_or_noneD`: same, and the error chain is logged at `warn`
//!
//! A name registered verbatim always wins over suffix stripping, so a
//! converter explicitly registered as `"float_or_none"` is called as is.
//!
//! The process-wide registry is meant to be extended once at start-up,
//! before any scraper runs.

use crate::error::{Result, ScrapeError};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};
use tracing::warn;

pub const OR_NONE: &str = "_or_none";
pub const OR_NONE_DEBUG: &str = "_or_noneD";

/// Conversion callback: raw string plus the caller's extra arguments.
pub type ConverterFn = Arc<dyn Fn(&str, &[&str]) -> anyhow::Result<Value> + Send + Sync>;

// ── Built-ins ─────────────────────────────────────────────────────────────────

fn to_str(s: &str, _args: &[&str]) -> anyhow::Result<Value> {
    Ok(Value::String(s.trim().to_string()))
}

/// Grouping separators are dropped: "1,234" → 1234 | "1.234" → 1234
fn to_int(s: &str, _args: &[&str]) -> anyhow::Result<Value> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',' && *c != '.').collect();
    let n: i64 = cleaned.parse()?;
    Ok(Value::from(n))
}

/// Decimal comma becomes a decimal point: "1234,56" → 1234.56
fn to_float(s: &str, _args: &[&str]) -> anyhow::Result<Value> {
    let n: f64 = s.trim().replace(',', ".").parse()?;
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| anyhow::anyhow!("{} is not a finite number", n))
}

fn to_bool(s: &str, _args: &[&str]) -> anyhow::Result<Value> {
    Ok(Value::Bool(!s.trim().is_empty()))
}

/// Parses with the chrono format in `args[0]`; date-only formats give midnight.
fn to_datetime(s: &str, args: &[&str]) -> anyhow::Result<Value> {
    let fmt = args.first().ok_or(ScrapeError::MissingArgument {
        tag: "datetime".to_string(),
        index: 0,
    })?;
    let s = s.trim();

    let dt = match NaiveDateTime::parse_from_str(s, fmt) {
        Ok(dt) => dt,
        Err(e) => match NaiveDate::parse_from_str(s, fmt) {
            Ok(d) => d.and_hms_opt(0, 0, 0).unwrap_or_default(),
            Err(_) => return Err(e.into()),
        },
    };
    Ok(Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()))
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Tag → converter table.
#[derive(Clone)]
pub struct ConverterRegistry {
    table: HashMap<String, ConverterFn>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut reg = Self { table: HashMap::new() };
        reg.register("str", to_str);
        reg.register("int", to_int);
        reg.register("float", to_float);
        reg.register("bool", to_bool);
        reg.register("datetime", to_datetime);
        reg
    }
}

impl ConverterRegistry {
    /// Add or replace a converter. The last registration for a name wins.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&str, &[&str]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.table.insert(name.into(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort();
        names
    }

    /// Split a tag into (converter name, soft-fail, log-on-failure).
    fn resolve<'t>(&self, tag: &'t str) -> (&'t str, bool, bool) {
        if self.table.contains_key(tag) {
            return (tag, false, false);
        }
        if let Some(base) = tag.strip_suffix(OR_NONE_DEBUG) {
            return (base, true, true);
        }
        if let Some(base) = tag.strip_suffix(OR_NONE) {
            return (base, true, false);
        }
        (tag, false, false)
    }

    pub fn convert(&self, raw: &str, tag: &str, args: &[&str]) -> Result<Value> {
        let (name, soft, debug) = self.resolve(tag);
        let f = self
            .table
            .get(name)
            .ok_or_else(|| ScrapeError::UnknownConverter(tag.to_string()))?;

        match f(raw, args) {
            Ok(v) => Ok(v),
            Err(e) if soft => {
                if debug {
                    warn!("'{}' failed on {:?}: {:#}", tag, raw, e);
                }
                Ok(Value::Null)
            }
            Err(e) => Err(match e.downcast::<ScrapeError>() {
                Ok(se) => se,
                Err(e) => ScrapeError::Conversion {
                    tag: tag.to_string(),
                    value: raw.to_string(),
                    reason: format!("{:#}", e),
                },
            }),
        }
    }
}

// ── Process-wide registry ─────────────────────────────────────────────────────

static REGISTRY: LazyLock<RwLock<ConverterRegistry>> =
    LazyLock::new(|| RwLock::new(ConverterRegistry::default()));

/// Register a converter in the process-wide table. Call during start-up only.
pub fn register<F>(name: impl Into<String>, f: F)
where
    F: Fn(&str, &[&str]) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    match REGISTRY.write() {
        Ok(mut reg) => reg.register(name, f),
        Err(poisoned) => poisoned.into_inner().register(name, f),
    }
}

/// Convert through the process-wide table.
pub fn convert(raw: &str, tag: &str, args: &[&str]) -> Result<Value> {
    match REGISTRY.read() {
        Ok(reg) => reg.convert(raw, tag, args),
        Err(poisoned) => poisoned.into_inner().convert(raw, tag, args),
    }
}

/// Like [`convert`], but an absent raw value stays `null`.
pub fn convert_opt(raw: Option<&str>, tag: &str, args: &[&str]) -> Result<Value> {
    match raw {
        Some(s) => convert(s, tag, args),
        None => Ok(Value::Null),
    }
}

pub fn registered_names() -> Vec<String> {
    match REGISTRY.read() {
        Ok(reg) => reg.names(),
        Err(poisoned) => poisoned.into_inner().names(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::CapturedLogs;
    use serde_json::json;

    #[test]
    fn test_float_decimal_comma() {
        let reg = ConverterRegistry::default();
        assert_eq!(reg.convert("1234,56", "float", &[]).unwrap(), json!(1234.56));
        assert_eq!(reg.convert(" 7.5 ", "float", &[]).unwrap(), json!(7.5));
    }

    #[test]
    fn test_int_strips_grouping() {
        let reg = ConverterRegistry::default();
        assert_eq!(reg.convert("1,234,567", "int", &[]).unwrap(), json!(1234567));
        assert_eq!(reg.convert("1.234", "int", &[]).unwrap(), json!(1234));
    }

    #[test]
    fn test_bad_int_errors_unless_soft() {
        let reg = ConverterRegistry::default();
        assert!(matches!(
            reg.convert("abc", "int", &[]),
            Err(ScrapeError::Conversion { .. })
        ));
        assert_eq!(reg.convert("abc", "int_or_none", &[]).unwrap(), Value::Null);
        assert_eq!(reg.convert("abc", "int_or_noneD", &[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_only_the_d_suffix_logs_failures() {
        let reg = ConverterRegistry::default();

        let quiet = CapturedLogs::start(tracing::Level::WARN);
        assert_eq!(reg.convert("abc", "int_or_none", &[]).unwrap(), Value::Null);
        assert!(quiet.output().is_empty(), "unexpected log output: {}", quiet.output());
        drop(quiet);

        let logs = CapturedLogs::start(tracing::Level::WARN);
        assert_eq!(reg.convert("abc", "int_or_noneD", &[]).unwrap(), Value::Null);
        let loud = logs.output();
        assert!(loud.contains("WARN"));
        assert!(loud.contains("'int_or_noneD' failed on \"abc\""));
    }

    #[test]
    fn test_soft_fail_matches_strict_on_success() {
        let reg = ConverterRegistry::default();
        for (raw, tag) in [("12", "int"), ("3,5", "float"), ("x", "bool"), ("", "str")] {
            let strict = reg.convert(raw, tag, &[]).unwrap();
            let soft = reg.convert(raw, &format!("{tag}{OR_NONE}"), &[]).unwrap();
            assert_eq!(strict, soft);
        }
    }

    #[test]
    fn test_bool_truthiness() {
        let reg = ConverterRegistry::default();
        assert_eq!(reg.convert("no", "bool", &[]).unwrap(), json!(true));
        assert_eq!(reg.convert("", "bool", &[]).unwrap(), json!(false));
    }

    #[test]
    fn test_datetime_with_format() {
        let reg = ConverterRegistry::default();
        assert_eq!(
            reg.convert("Feb 20, 2024", "datetime", &["%b %d, %Y"]).unwrap(),
            json!("2024-02-20T00:00:00")
        );
        assert_eq!(
            reg.convert("2024-02-20 13:05", "datetime", &["%Y-%m-%d %H:%M"]).unwrap(),
            json!("2024-02-20T13:05:00")
        );
        assert!(matches!(
            reg.convert("2024-02-20", "datetime", &[]),
            Err(ScrapeError::MissingArgument { index: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_converter() {
        let reg = ConverterRegistry::default();
        assert!(matches!(
            reg.convert("1", "decimal", &[]),
            Err(ScrapeError::UnknownConverter(t)) if t == "decimal"
        ));
        assert!(matches!(
            reg.convert("1", "decimal_or_none", &[]),
            Err(ScrapeError::UnknownConverter(_))
        ));
    }

    #[test]
    fn test_explicit_suffixed_name_wins() {
        let mut reg = ConverterRegistry::default();
        reg.register("float_or_none", |_s: &str, _a: &[&str]| Ok(json!(-1.0)));
        assert_eq!(reg.convert("2,5", "float_or_none", &[]).unwrap(), json!(-1.0));
        // the base converter is untouched
        assert_eq!(reg.convert("2,5", "float", &[]).unwrap(), json!(2.5));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut reg = ConverterRegistry::default();
        reg.register("pct", |s: &str, _a: &[&str]| Ok(json!(s.len())));
        reg.register("pct", |s: &str, _a: &[&str]| {
            let n: f64 = s.trim().trim_end_matches('%').parse()?;
            Ok(json!(n))
        });
        assert_eq!(reg.convert("4.5%", "pct", &[]).unwrap(), json!(4.5));
        assert!(reg.names().contains(&"pct".to_string()));
    }

    #[test]
    fn test_global_registry() {
        register("upper", |s: &str, _a: &[&str]| Ok(json!(s.to_uppercase())));
        assert_eq!(convert("ngx", "upper", &[]).unwrap(), json!("NGX"));
        assert_eq!(convert_opt(None, "int", &[]).unwrap(), Value::Null);
        assert!(registered_names().contains(&"upper".to_string()));
    }
}
