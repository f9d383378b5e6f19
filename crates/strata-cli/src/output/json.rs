//! Machine-readable output.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_core::Error as CoreError;

/// Global JSON output mode
static JSON_OUTPUT: AtomicBool = AtomicBool::new(false);

/// Enable JSON output mode.
pub fn enable() {
    JSON_OUTPUT.store(true, Ordering::Relaxed);
}

/// Check if JSON output is enabled.
pub fn is_enabled() -> bool {
    JSON_OUTPUT.load(Ordering::Relaxed)
}

/// JSON-serializable error structure.
#[derive(Debug, Serialize)]
pub struct JsonError {
    /// Error code (e.g., "S0202")
    pub code: String,
    /// Error code title
    pub title: String,
    /// Detailed error message
    pub message: String,
    /// Suggestions for fixing the error
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl JsonError {
    /// Create a `JsonError` from an anyhow error.
    #[must_use]
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(core) = err.downcast_ref::<CoreError>() {
            let code = core.code();
            return Self {
                code: code.as_str().to_string(),
                title: code.title().to_string(),
                message: core.to_string(),
                suggestions: core.suggestions(),
            };
        }
        Self {
            code: "S0000".to_string(),
            title: "Unknown error".to_string(),
            message: format!("{err:#}"),
            suggestions: Vec::new(),
        }
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", sonic_rs::to_string_pretty(value)?);
    Ok(())
}

/// Report a failed command on stderr, as JSON or text depending on the mode.
pub fn print_error(err: &anyhow::Error) {
    let json = JsonError::from_anyhow(err);
    if is_enabled() {
        if let Ok(text) = sonic_rs::to_string_pretty(&json) {
            eprintln!("{text}");
        }
        return;
    }
    eprintln!("{} {err:#}", console::style("Error:").red().bold());
    for suggestion in &json.suggestions {
        eprintln!("  {} {suggestion}", console::style("hint:").dim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_keeps_code() {
        let err = anyhow::Error::new(CoreError::config("warm_ttl_secs", "must be positive"));
        let json = JsonError::from_anyhow(&err);
        assert_eq!(json.code, "S0401");
        assert!(!json.suggestions.is_empty());
    }

    #[test]
    fn test_other_error() {
        let json = JsonError::from_anyhow(&anyhow::anyhow!("boom"));
        assert_eq!(json.code, "S0000");
        assert_eq!(json.message, "boom");
    }
}
