//! Configuration for the engagement core

use chrono::Duration;
use clap::Args;

/// Tunables consumed by the components. Independent of how they were loaded.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Share of a content item a non-entitled reader may see.
    pub preview_cap_percent: u8,
    /// Reported elapsed time must exceed this for a completion to count.
    pub min_pace_seconds: i64,
    /// Credit granted by the application layer for an awarded completion.
    pub completion_credit: i64,
    pub code_percent_off: i32,
    pub code_ttl: Duration,
    pub secret_ttl: Duration,
    pub secret_sends_per_hour: i32,
    /// Wrong guesses allowed before a secret is burned.
    pub secret_max_attempts: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preview_cap_percent: 8,
            min_pace_seconds: 10,
            completion_credit: 10,
            code_percent_off: 15,
            code_ttl: Duration::days(30),
            secret_ttl: Duration::minutes(15),
            secret_sends_per_hour: 3,
            secret_max_attempts: 5,
        }
    }
}

/// Command-line / environment configuration
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "ENGAGEMENT_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Lock wait budget for a single row-locked operation
    #[arg(long, env = "ENGAGEMENT_LOCK_TIMEOUT_MS", default_value_t = 5000)]
    pub lock_timeout_ms: u64,

    #[arg(long, env = "ENGAGEMENT_PREVIEW_CAP_PERCENT", default_value_t = 8,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    pub preview_cap_percent: u8,

    #[arg(long, env = "ENGAGEMENT_MIN_PACE_SECONDS", default_value_t = 10)]
    pub min_pace_seconds: i64,

    #[arg(long, env = "ENGAGEMENT_COMPLETION_CREDIT", default_value_t = 10)]
    pub completion_credit: i64,

    #[arg(long, env = "ENGAGEMENT_CODE_PERCENT_OFF", default_value_t = 15,
          value_parser = clap::value_parser!(i32).range(1..=100))]
    pub code_percent_off: i32,

    #[arg(long, env = "ENGAGEMENT_CODE_TTL_DAYS", default_value_t = 30,
          value_parser = clap::value_parser!(i64).range(1..=3650))]
    pub code_ttl_days: i64,

    #[arg(long, env = "ENGAGEMENT_SECRET_TTL_MINUTES", default_value_t = 15,
          value_parser = clap::value_parser!(i64).range(1..=1440))]
    pub secret_ttl_minutes: i64,

    /// Approximate resend limit; see `OneTimeSecrets::issue`
    #[arg(long, env = "ENGAGEMENT_SECRET_SENDS_PER_HOUR", default_value_t = 3)]
    pub secret_sends_per_hour: i32,

    /// Wrong guesses before a secret is burned
    #[arg(long, env = "ENGAGEMENT_SECRET_MAX_ATTEMPTS", default_value_t = 5,
          value_parser = clap::value_parser!(i32).range(1..=100))]
    pub secret_max_attempts: i32,
}

impl Config {
    pub fn settings(&self) -> Settings {
        Settings {
            preview_cap_percent: self.preview_cap_percent,
            min_pace_seconds: self.min_pace_seconds,
            completion_credit: self.completion_credit,
            code_percent_off: self.code_percent_off,
            code_ttl: Duration::days(self.code_ttl_days),
            secret_ttl: Duration::minutes(self.secret_ttl_minutes),
            secret_sends_per_hour: self.secret_sends_per_hour,
            secret_max_attempts: self.secret_max_attempts,
        }
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
    fn defaults_match_library_settings() {
        let harness = Harness::parse_from(["engagement", "--database-url", "postgres://localhost/test"]);
        let settings = harness.config.settings();
        let defaults = Settings::default();
        assert_eq!(settings.preview_cap_percent, defaults.preview_cap_percent);
        assert_eq!(settings.min_pace_seconds, defaults.min_pace_seconds);
        assert_eq!(settings.code_ttl, defaults.code_ttl);
        assert_eq!(settings.secret_sends_per_hour, defaults.secret_sends_per_hour);
        assert_eq!(settings.secret_max_attempts, defaults.secret_max_attempts);
    }

    #[test]
    fn rejects_unbounded_lifetimes() {
        for (flag, value) in [
            ("--code-ttl-days", "100000000"),
            ("--code-ttl-days", "0"),
            ("--code-ttl-days", "-5"),
            ("--secret-ttl-minutes", "-1"),
        ] {
            let parsed = Harness::try_parse_from([
                "engagement",
                "--database-url",
                "postgres://localhost/test",
                flag,
                value,
            ]);
            assert!(parsed.is_err(), "{flag} {value} should be rejected");
        }
    }

    #[test]
    fn rejects_out_of_range_cap() {
        let parsed = Harness::try_parse_from([
            "engagement",
            "--database-url",
            "postgres://localhost/test",
            "--preview-cap-percent",
            "120",
        ]);
        assert!(parsed.is_err());
    }
}
