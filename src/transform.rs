//! Value transformation pipeline.
//!
//! Pure functions from a raw sample plus its descriptor (and, for rates,
//! the previous sample and timestamps) to the final displayed value. No
//! clock reads happen here; the caller passes `now` explicitly, so every
//! function is deterministic and independently testable.
//!
//! The pipeline runs in three stages: calculation (direct or rate), an
//! optional single-variable formula, and an optional value map. Formula
//! evaluation is fail-soft: a formula that does not parse or evaluate
//! leaves the value unchanged.

use std::sync::OnceLock;

use regex::Regex;

use crate::profile::{Calc, MapTokens, ValueMap, VariableDescriptor};
use crate::util::round2;

/// Previous-generation context for rate calculations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformContext<'a> {
    /// Previous raw sample for the same key, if any
    pub previous: Option<&'a str>,
    /// Timestamp of the previous sample, seconds
    pub previous_timestamp: f64,
    /// Current cycle timestamp, seconds
    pub now: f64,
}

/// Run the full pipeline: calculation, formula, then value map.
///
/// `None` means "no value": a rate with no usable history or a counter
/// that went backwards.
pub fn transform(
    raw: &str,
    descriptor: &VariableDescriptor,
    ctx: &TransformContext<'_>,
) -> Option<String> {
    let mut result = match descriptor.calc {
        Calc::Direct => raw.to_string(),
        Calc::Rate => rate(raw, ctx)?,
    };

    if let Some(formula) = &descriptor.formula {
        result = apply_formula(formula, &result);
    }

    if let Some(vmap) = &descriptor.vmap {
        result = apply_value_map(&result, vmap);
    }

    Some(result)
}

/// Per-second rate from two consecutive counter samples, rounded to two
/// decimal places.
///
/// Returns `None` when there is no previous sample, either sample is not
/// numeric, no time has elapsed, or the counter went backwards (reset or
/// wrap). A negative rate is never produced.
pub fn rate(raw: &str, ctx: &TransformContext<'_>) -> Option<String> {
    let previous = ctx.previous?;

    let elapsed = ctx.now - ctx.previous_timestamp;
    if elapsed <= 0.0 {
        return None;
    }

    let current: f64 = raw.trim().parse().ok()?;
    let previous: f64 = previous.trim().parse().ok()?;

    if current < previous {
        return None;
    }

    Some(format_number(round2((current - previous) / elapsed)))
}

/// Evaluate a single-variable arithmetic formula against a value.
///
/// The placeholder variable is `x`. Implicit multiplication such as
/// `100x` or `2(x+1)` is normalized before evaluation. On any failure the
/// input value is returned unchanged.
pub fn apply_formula(formula: &str, value: &str) -> String {
    let x: f64 = match value.trim().parse() {
        Ok(x) => x,
        Err(_) => return value.to_string(),
    };

    match eval_formula(formula, x) {
        Some(result) => format_number(result),
        None => {
            tracing::debug!(%formula, %value, "formula evaluation failed, keeping value");
            value.to_string()
        }
    }
}

fn eval_formula(formula: &str, x: f64) -> Option<f64> {
    use evalexpr::{ContextWithMutableVariables, HashMapContext, Value};

    let normalized = normalize_implicit_multiplication(formula);

    let mut context = HashMapContext::new();
    context.set_value("x".to_string(), Value::Float(x)).ok()?;

    let result = evalexpr::eval_number_with_context(&normalized, &context).ok()?;
    result.is_finite().then_some(result)
}

/// Rewrite `2(x+1)`, `(x+1)2`, `100x`, `x(3)` into explicit multiplication.
fn normalize_implicit_multiplication(formula: &str) -> String {
    struct Rules {
        close_digit: Regex,
        digit_open: Regex,
        close_letter: Regex,
        letter_open: Regex,
        digit_letter: Regex,
    }

    static RULES: OnceLock<Rules> = OnceLock::new();
    let rules = RULES.get_or_init(|| Rules {
        close_digit: Regex::new(r"\)(\d)").unwrap(),
        digit_open: Regex::new(r"(\d)\(").unwrap(),
        close_letter: Regex::new(r"\)([a-zA-Z])").unwrap(),
        letter_open: Regex::new(r"([a-zA-Z])\(").unwrap(),
        digit_letter: Regex::new(r"(\d)([a-zA-Z])").unwrap(),
    });

    let s = rules.close_digit.replace_all(formula, ")*$1");
    let s = rules.digit_open.replace_all(&s, "$1*(");
    let s = rules.close_letter.replace_all(&s, ")*$1");
    let s = rules.letter_open.replace_all(&s, "$1*(");
    let s = rules.digit_letter.replace_all(&s, "$1*$2");
    s.into_owned()
}

/// Integer-valued floats render without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Map a value through a numeric/label map, first match in declaration
/// order wins.
///
/// Comparison keys (`<n`, `>n`) match numerically and are skipped for
/// non-numeric inputs; other keys match by string equality. With no match
/// the value passes through unchanged.
pub fn apply_value_map(value: &str, vmap: &ValueMap) -> String {
    for (key, tokens) in vmap.entries() {
        if let Some(tail) = key.strip_prefix(['<', '>']) {
            let (Ok(v), Ok(threshold)) = (value.trim().parse::<f64>(), tail.parse::<f64>()) else {
                continue;
            };
            let matched = if key.starts_with('>') {
                v > threshold
            } else {
                v < threshold
            };
            if matched {
                if let Some(label) = tokens.as_single() {
                    return label.to_string();
                }
            }
        } else if value == key {
            if let Some(label) = tokens.as_single() {
                return label.to_string();
            }
        }
    }

    value.to_string()
}

/// Map a value to a boolean for binary-sensor consumers.
///
/// The `on`/`off` entries hold a literal or a list of literals and
/// comparison tokens; first matching `on` token wins, then `off`. Legacy
/// `1`/`0` keys map their label through truthiness. Without any match the
/// fallback truthiness set `{"1", "on", "true"}` decides.
pub fn apply_bool_map(value: &str, vmap: Option<&ValueMap>) -> bool {
    let Some(vmap) = vmap.filter(|m| !m.is_empty()) else {
        return fallback_truthy(value);
    };

    if let Some(tokens) = vmap.get("on") {
        if tokens.iter().any(|token| token_matches(token, value)) {
            return true;
        }
    }
    if let Some(tokens) = vmap.get("off") {
        if tokens.iter().any(|token| token_matches(token, value)) {
            return false;
        }
    }

    // Legacy {1: "...", 0: "..."} maps label the raw values directly
    if value == "1" {
        if let Some(label) = vmap.get("1").and_then(MapTokens::as_single) {
            return matches!(label.to_ascii_lowercase().as_str(), "on" | "true" | "1");
        }
    }
    if value == "0" {
        if let Some(label) = vmap.get("0").and_then(MapTokens::as_single) {
            return !matches!(label.to_ascii_lowercase().as_str(), "off" | "false" | "0");
        }
    }

    fallback_truthy(value)
}

fn fallback_truthy(value: &str) -> bool {
    ["1", "on", "true"]
        .iter()
        .any(|t| value.eq_ignore_ascii_case(t))
}

fn token_matches(token: &str, value: &str) -> bool {
    if token == value {
        return true;
    }
    if let Some(tail) = token.strip_prefix('>') {
        if let (Ok(v), Ok(threshold)) = (value.parse::<f64>(), tail.parse::<f64>()) {
            return v > threshold;
        }
        return false;
    }
    if let Some(tail) = token.strip_prefix('<') {
        if let (Ok(v), Ok(threshold)) = (value.parse::<f64>(), tail.parse::<f64>()) {
            return v < threshold;
        }
        return false;
    }
    false
}

/// Translate a desired switch state to its wire token.
///
/// Requires both `on` and `off` to be present as plain strings; anything
/// else makes the descriptor unusable for writes.
pub fn to_wire_bool(state: bool, vmap: &ValueMap) -> Option<String> {
    let (on, off) = vmap.switch_tokens()?;
    Some(if state { on } else { off }.to_string())
}
