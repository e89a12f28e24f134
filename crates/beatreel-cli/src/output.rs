//! Output formatting for CLI

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Process exit status for an error: pipeline errors carry their own code
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<beatreel_core::Error>()
        .map(|e| e.exit_code())
        .unwrap_or(1)
}

/// Report a failed command
pub fn print_error(err: &anyhow::Error, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let code = err
                .downcast_ref::<beatreel_core::Error>()
                .map(|e| e.error_code())
                .unwrap_or("ERROR");
            let body = serde_json::json!({
                "status": "error",
                "code": code,
                "message": format!("{:#}", err),
            });
            println!("{}", body);
        }
        OutputFormat::Text => {
            eprintln!("{} {:#}", style("error:").red().bold(), err);
        }
    }
}

/// Spinner on stderr while a long stage runs; hidden for JSON output or
/// when stderr is not a terminal
pub fn spinner(message: impl Into<String>, format: OutputFormat) -> ProgressBar {
    if format == OutputFormat::Json || !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
        bar.set_style(template);
    }
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("text"), OutputFormat::Text);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Text);
    }

    #[test]
    fn test_exit_codes() {
        let preflight = anyhow::Error::new(beatreel_core::Error::PreflightFailed {
            missing: vec!["a.png".into()],
        });
        assert_eq!(exit_code(&preflight), 2);

        let engine = anyhow::Error::new(beatreel_core::Error::EngineNotFound {
            program: "ffmpeg".to_string(),
        });
        assert_eq!(exit_code(&engine), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("plain failure")), 1);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
