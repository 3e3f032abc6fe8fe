// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// JSON structured logging for log aggregation (ELK, Loki).
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "key-keeper",
    version,
    about = "Keeps certificates, keys and secrets issued by OpenBao/Vault up to date on disk"
)]
pub struct Args {
    /// Directory scanned for configuration files.
    #[arg(long, default_value = "/etc/key-keeper")]
    pub config_dir: PathBuf,

    /// Regular expression selecting configuration file names in --config-dir.
    #[arg(long, default_value = r".+\.ya?ml$")]
    pub config_regexp: String,

    /// Seconds between configuration discovery passes.
    #[arg(long, default_value_t = 30)]
    pub discovery_interval_secs: u64,

    /// Seconds between full reconciliation passes.
    #[arg(long, default_value_t = 3600)]
    pub reconcile_interval_secs: u64,

    /// Maximum resources reconciled at once per issuer.
    #[arg(long, default_value_t = 32)]
    pub max_concurrency: usize,

    /// Log output format: text or json.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Log filter directive (e.g., info, debug, key_keeper_resource=trace). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Listen address for HTTP health checks and Prometheus metrics (e.g., 127.0.0.1:8080).
    #[arg(long)]
    pub listen_http: Option<SocketAddr>,
}

impl Args {
    /// Reject settings the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.discovery_interval_secs == 0 {
            bail!("--discovery-interval-secs must be greater than zero");
        }
        if self.reconcile_interval_secs == 0 {
            bail!("--reconcile-interval-secs must be greater than zero");
        }
        if self.max_concurrency == 0 {
            bail!("--max-concurrency must be greater than zero");
        }
        self.config_pattern()?;
        Ok(())
    }

    pub fn config_pattern(&self) -> Result<Regex> {
        Regex::new(&self.config_regexp)
            .with_context(|| format!("invalid --config-regexp {:?}", self.config_regexp))
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_defaults() {
        let args = Args::try_parse_from(["key-keeper"]).unwrap();

        assert_eq!(args.config_dir, PathBuf::from("/etc/key-keeper"));
        assert_eq!(args.discovery_interval(), Duration::from_secs(30));
        assert_eq!(args.reconcile_interval(), Duration::from_secs(3600));
        assert_eq!(args.max_concurrency, 32);
        assert_eq!(args.log_format, LogFormat::Text);
        assert_eq!(args.log_level, "info");
        assert!(args.listen_http.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn args_default_pattern_matches_yaml() {
        let args = Args::try_parse_from(["key-keeper"]).unwrap();
        let pattern = args.config_pattern().unwrap();

        assert!(pattern.is_match("issuers.yaml"));
        assert!(pattern.is_match("certs.yml"));
        assert!(!pattern.is_match("README.md"));
    }

    #[test]
    fn args_overrides() {
        let args = Args::try_parse_from([
            "key-keeper",
            "--config-dir",
            "/tmp/conf",
            "--config-regexp",
            "^keeper-.*$",
            "--reconcile-interval-secs",
            "60",
            "--log-format",
            "json",
            "--listen-http",
            "127.0.0.1:8080",
        ])
        .unwrap();

        assert_eq!(args.config_dir, PathBuf::from("/tmp/conf"));
        assert_eq!(args.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(args.log_format, LogFormat::Json);
        assert_eq!(args.listen_http, Some("127.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn args_invalid_regexp_rejected() {
        let args = Args::try_parse_from(["key-keeper", "--config-regexp", "("]).unwrap();
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("--config-regexp"));
    }

    #[test]
    fn args_zero_interval_rejected() {
        let args = Args::try_parse_from(["key-keeper", "--discovery-interval-secs", "0"]).unwrap();
        assert!(args.validate().is_err());
    }
}
