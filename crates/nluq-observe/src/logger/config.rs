use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::logger::object::{LoggerFormat, LoggerLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` expression, e.g. `"nluq_core=debug,info"`.
    pub level: LoggerLevel,
    /// Print the module path of each record.
    pub with_targets: bool,
    /// Colored text output; ignored when stdout is not a terminal.
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: LoggerLevel::default(),
            with_targets: true,
            use_color: true,
        }
    }
}

impl LoggerConfig {
    pub(crate) fn ansi(&self) -> bool {
        self.use_color && self.format == LoggerFormat::Text && std::io::stdout().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = LoggerConfig::default();
        assert_eq!(cfg.format, LoggerFormat::Text);
        assert_eq!(cfg.level.as_str(), "info");
        assert!(cfg.with_targets);
        assert!(cfg.use_color);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: LoggerConfig =
            serde_json::from_str(r#"{"format":"json","level":"nluq_core=debug,info"}"#).unwrap();
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level.as_str(), "nluq_core=debug,info");
        assert!(cfg.with_targets);
    }

    #[test]
    fn json_output_is_never_colored() {
        let cfg = LoggerConfig {
            format: LoggerFormat::Json,
            use_color: true,
            ..Default::default()
        };
        assert!(!cfg.ansi());
    }

    #[test]
    fn invalid_level_fails_deserialization() {
        let res = serde_json::from_str::<LoggerConfig>(r#"{"level":"core=shout"}"#);
        assert!(res.is_err());
    }
}
