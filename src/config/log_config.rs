use log::LevelFilter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Default level, e.g. "info" or "debug". `RUST_LOG` still wins.
    pub level: String,

    /// Prefix each line with a local RFC 3339 timestamp
    pub show_timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            show_timestamps: true,
        }
    }
}

impl LogConfig {
    /// Parsed level; unknown names fall back to `Info`.
    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_parse_case_insensitively() {
        let config = LogConfig {
            level: "DEBUG".into(),
            ..LogConfig::default()
        };
        assert_eq!(config.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn unknown_level_is_info() {
        let config = LogConfig {
            level: "chatty".into(),
            ..LogConfig::default()
        };
        assert_eq!(config.level_filter(), LevelFilter::Info);
    }
}
