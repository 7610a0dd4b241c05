//! Routes script console output into tracing, tagged with the script name.
use crate::engine::{Diagnostic, DiagnosticLevel};
use once_cell::sync::Lazy;
use regex::Regex;

/// Tracing target for everything a script prints.
pub const SCRIPT_TARGET: &str = "aps::script";

const AUTOSENS_SCRIPT: &str = "autosens.js";

// autosens prints one progress glyph per bucket plus hour markers
static AUTOSENS_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+=x!]|u\(|\)|\d{1,2}h$").expect("static regex"));

/// Splits, trims and cleans one diagnostic message into loggable lines.
pub fn clean_lines(script: &str, message: &str) -> Vec<String> {
    message
        .split('\n')
        .map(|line| {
            if script == AUTOSENS_SCRIPT {
                AUTOSENS_NOISE.replace_all(line, "").into_owned()
            } else {
                line.to_string()
            }
        })
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

pub fn route(script: &str, diagnostics: Vec<Diagnostic>) {
    for diagnostic in diagnostics {
        for line in clean_lines(script, &diagnostic.message) {
            match diagnostic.level {
                DiagnosticLevel::Debug => {
                    tracing::debug!(target: SCRIPT_TARGET, script, "{}", line)
                }
                DiagnosticLevel::Warn => {
                    tracing::warn!(target: SCRIPT_TARGET, script, "{}", line)
                }
                DiagnosticLevel::Error => {
                    tracing::error!(target: SCRIPT_TARGET, script, "{}", line)
                }
            }
        }
    }
}
