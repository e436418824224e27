use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use crate::names::DEFAULT_CACHE_TTL;

/// Settings shared by every subcommand; each falls back to an environment variable.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Postgres connection string for the student records database
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// JSON file holding the flag rules
    #[arg(
        long = "rules",
        env = "FLAG_RULES_PATH",
        default_value = "flag_rules.json",
        global = true
    )]
    pub rules_path: PathBuf,

    /// Seconds before the student name cache is reloaded
    #[arg(long, env = "NAME_CACHE_TTL_SECS", default_value_t = DEFAULT_CACHE_TTL.as_secs(), global = true)]
    pub cache_ttl_secs: u64,
}

impl Config {
    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        config: Config,
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let harness = Harness::try_parse_from([
            "student-flags",
            "--database-url",
            "postgres://localhost/records",
            "--rules",
            "/tmp/rules.json",
            "--cache-ttl-secs",
            "30",
        ])
        .expect("parse");

        assert_eq!(
            harness.config.database_url().expect("url"),
            "postgres://localhost/records"
        );
        assert_eq!(harness.config.rules_path, PathBuf::from("/tmp/rules.json"));
        assert_eq!(harness.config.cache_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn blank_database_url_is_rejected() {
        let config = Config {
            database_url: Some("  ".to_string()),
            rules_path: PathBuf::from("flag_rules.json"),
            cache_ttl_secs: 300,
        };
        assert!(config.database_url().is_err());
    }
}
