//! Terminal output helpers.

pub mod json;
pub mod table;

use console::style;

/// Print a section heading.
pub fn heading(text: &str) {
    if !json::is_enabled() {
        println!("{} {}", style("strata").cyan().bold(), style(text).dim());
    }
}

/// Print a success line.
pub fn success(text: &str) {
    if !json::is_enabled() {
        println!("{} {text}", style("Success:").green().bold());
    }
}

/// Print a warning line.
pub fn warning(text: &str) {
    if !json::is_enabled() {
        println!("{} {text}", style("Warning:").yellow().bold());
    }
}

/// Format a duration for display.
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 0.001 {
        format!("{:.0}us", secs * 1_000_000.0)
    } else if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.2}s")
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250us");
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }
}
