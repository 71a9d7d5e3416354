//! Prometheus text exposition rendering for scraped samples.
//!
//! The scrape endpoint serves a fresh document per request, built from the
//! samples of exactly one scrape; nothing is cached between polls.

use std::collections::BTreeMap;
use std::io::Write;

use thiserror::Error;

use modsight_engine::def::MetricKind;
use modsight_engine::scrape::Sample;

/// The sink refused a sample instead of exposing a nonsensical series.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sample '{name}' rejected: counter value {value} is negative")]
    Rejected { name: String, value: f64 },
}

/// Render samples in the Prometheus text exposition format.
///
/// Series are grouped and sorted by metric name, each group preceded by its
/// HELP and TYPE comments. A negative value on a counter-kind sample is
/// rejected with an ordinary error; the scrape path never panics over sink
/// input.
pub fn render(samples: &[Sample]) -> Result<String, SinkError> {
    let mut by_name: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        if sample.kind == MetricKind::Counter && sample.value < 0.0 {
            return Err(SinkError::Rejected {
                name: sample.name.clone(),
                value: sample.value,
            });
        }
        by_name.entry(&sample.name).or_default().push(sample);
    }

    let mut output = Vec::with_capacity(samples.len() * 100);
    for (name, series) in by_name {
        if let Some(first) = series.first() {
            if !first.help.is_empty() {
                writeln!(output, "# HELP {} {}", name, escape_help(&first.help)).ok();
            }
            writeln!(output, "# TYPE {} {}", name, first.kind.as_str()).ok();
        }
        for sample in series {
            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(&sample.labels),
                format_value(sample.value)
            )
            .ok();
        }
    }

    Ok(String::from_utf8(output).unwrap_or_default())
}

/// Format labels for the exposition format, sorted by key.
fn format_labels(labels: &std::collections::HashMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<_> = labels.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let parts: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape line breaks in help text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
