use crate::models::signal::ExtractedSignal;
use anyhow::Result;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

fn default_max_len() -> usize {
    8
}

/// A labelled value template, e.g. `"CORE RATE: " <value> "%"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorTemplate {
    /// Indicator name used by policy rules (e.g. `coreRate`).
    pub name: String,
    /// Literal label before the value. Case-sensitive.
    pub prefix: String,
    /// Literal label after the value. Case-sensitive.
    pub suffix: String,
    /// Longest value span considered, in characters.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl IndicatorTemplate {
    pub fn new(name: &str, prefix: &str, suffix: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            max_len: default_max_len(),
        }
    }

    fn compile(&self) -> Result<Regex> {
        anyhow::ensure!(!self.name.is_empty(), "indicator template needs a name");
        anyhow::ensure!(!self.prefix.is_empty(), "template {} has an empty prefix", self.name);
        anyhow::ensure!(!self.suffix.is_empty(), "template {} has an empty suffix", self.name);
        anyhow::ensure!(
            (1..=64).contains(&self.max_len),
            "template {} max_len must be 1..=64, got {}",
            self.name,
            self.max_len
        );

        let pattern = format!(
            "{}(.{{1,{}}}?){}",
            regex::escape(&self.prefix),
            self.max_len,
            regex::escape(&self.suffix)
        );
        Ok(Regex::new(&pattern)?)
    }
}

/// Pulls named decimal indicators out of free text.
///
/// Each template is matched independently; the first occurrence of the prefix that
/// is followed by the suffix within `max_len` characters is the candidate. A
/// candidate that is not a plain signed base-10 number leaves the indicator absent.
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    patterns: Vec<(String, Regex)>,
}

impl SignalExtractor {
    pub fn new(templates: &[IndicatorTemplate]) -> Result<Self> {
        let patterns = templates
            .iter()
            .map(|t| Ok((t.name.clone(), t.compile()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn extract(&self, text: &str) -> ExtractedSignal {
        let mut signal = ExtractedSignal::new();
        for (name, re) in &self.patterns {
            let value = re
                .captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|span| parse_decimal(span.as_str()));
            if let Some(v) = value {
                signal.insert(name.clone(), v);
            }
        }
        signal
    }
}

/// Parse `[+-]digits[.digits]`, surrounding whitespace allowed.
///
/// Shorthand such as `3.9k`, exponents and digit separators are rejected.
pub fn parse_decimal(span: &str) -> Option<Decimal> {
    let s = span.trim();
    let (negative, body) = match s.as_bytes().first()? {
        b'+' => (false, &s[1..]),
        b'-' => (true, &s[1..]),
        _ => (false, s),
    };

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(f) = frac_part {
        if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    let value = Decimal::from_str(body).ok()?;
    Some(if negative { -value } else { value })
}
