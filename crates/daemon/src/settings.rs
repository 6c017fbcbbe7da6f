//! Worker process settings (collaborators, not queue behavior)

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_STORAGE_DIR: &str = "./storage";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://fakturace.db";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Root for relative storage locations
    pub storage_dir: PathBuf,
    /// Application database (notifications)
    pub database_url: String,
    pub ocr_command: Option<String>,
    pub pdf_command: Option<String>,
    pub pohoda_command: Option<String>,
    pub isdoc_command: Option<String>,
    pub command_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            ocr_command: None,
            pdf_command: None,
            pohoda_command: None,
            isdoc_command: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let command_timeout = match text("FAKTURACE_COMMAND_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(value = %raw, "Invalid FAKTURACE_COMMAND_TIMEOUT_SECS, using default");
                    defaults.command_timeout
                }
            },
            None => defaults.command_timeout,
        };

        Self {
            storage_dir: text("FAKTURACE_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            database_url: text("FAKTURACE_DATABASE_URL").unwrap_or(defaults.database_url),
            ocr_command: text("FAKTURACE_OCR_COMMAND"),
            pdf_command: text("FAKTURACE_PDF_COMMAND"),
            pohoda_command: text("FAKTURACE_POHODA_COMMAND"),
            isdoc_command: text("FAKTURACE_ISDOC_COMMAND"),
            command_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> WorkerSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(settings(&[]), WorkerSettings::default());
    }

    #[test]
    fn test_reads_commands_and_timeout() {
        let s = settings(&[
            ("FAKTURACE_PDF_COMMAND", "render-pdf --a4"),
            ("FAKTURACE_OCR_COMMAND", "  "),
            ("FAKTURACE_COMMAND_TIMEOUT_SECS", "30"),
            ("FAKTURACE_STORAGE_DIR", "/srv/fakturace"),
        ]);
        assert_eq!(s.pdf_command.as_deref(), Some("render-pdf --a4"));
        assert_eq!(s.ocr_command, None);
        assert_eq!(s.command_timeout, Duration::from_secs(30));
        assert_eq!(s.storage_dir, PathBuf::from("/srv/fakturace"));
    }

    #[test]
    fn test_bad_timeout_falls_back() {
        let s = settings(&[("FAKTURACE_COMMAND_TIMEOUT_SECS", "0")]);
        assert_eq!(s.command_timeout, DEFAULT_COMMAND_TIMEOUT);
    }
}
