use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Deserialize;
use serde_json::Value;

use super::json::quote_non_finite;
use crate::error::{StreamError, StreamResult};

/// One stream offered by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverviewEntry {
    pub short_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub compression_ratio: Value,
    #[serde(default)]
    pub ssim: Value,
    #[serde(default)]
    pub mre: Value,
}

/// Available streams grouped by program subset.
#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub subsets: BTreeMap<String, Vec<OverviewEntry>>,
}

const HEADERS: [&str; 6] = [
    "variable",
    "title",
    "period",
    "compression rate",
    "SSIM",
    "mean relative error",
];

fn cell(v: &Value) -> String {
    match v {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Overview {
    pub fn from_json(body: &str) -> StreamResult<Self> {
        let body = quote_non_finite(body);
        let subsets = serde_json::from_str(&body)
            .map_err(|e| StreamError::InvalidMetadata(format!("overview: {e}")))?;
        Ok(Self { subsets })
    }

    /// Plain-text table, one block per program subset.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        for (subset, entries) in &self.subsets {
            let rows: Vec<[String; 6]> = entries
                .iter()
                .map(|e| {
                    [
                        e.short_name.clone(),
                        e.title.clone(),
                        e.period.clone(),
                        cell(&e.compression_ratio),
                        cell(&e.ssim),
                        cell(&e.mre),
                    ]
                })
                .collect();

            let mut widths = HEADERS.map(str::len);
            for row in &rows {
                for (w, c) in widths.iter_mut().zip(row) {
                    *w = (*w).max(c.chars().count());
                }
            }

            let _ = writeln!(out, "Program subset: {subset}");
            let header = HEADERS.map(String::from);
            for row in std::iter::once(&header).chain(rows.iter()) {
                let line: Vec<String> = row
                    .iter()
                    .zip(widths)
                    .map(|(c, w)| format!("{c:<w$}"))
                    .collect();
                let _ = writeln!(out, "  {}", line.join("  ").trim_end());
            }
            out.push('\n');
        }
        out
    }
}
