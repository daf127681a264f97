//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Triage loop configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Time between polling cycles.
    pub poll_interval: Duration,
    /// Each cycle lists unread messages newer than `now - lookback`.
    pub lookback: Duration,
    /// Fixed destination for urgent and meeting notifications.
    pub notify_recipient: String,
    /// Compose as usual but perform no notify, reply or trash.
    pub dry_run: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            lookback: Duration::from_secs(600), // 10 minutes
            notify_recipient: String::new(),
            dry_run: false,
        }
    }
}

impl TriageConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = match lookup("TRIAGE_POLL_INTERVAL_SECS") {
            Some(value) => Duration::from_secs(parse_secs("TRIAGE_POLL_INTERVAL_SECS", &value)?),
            None => defaults.poll_interval,
        };

        let lookback = match lookup("TRIAGE_LOOKBACK_SECS") {
            Some(value) => Duration::from_secs(parse_secs("TRIAGE_LOOKBACK_SECS", &value)?),
            None => defaults.lookback,
        };

        let notify_recipient = lookup("TRIAGE_NOTIFY_RECIPIENT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "TRIAGE_NOTIFY_RECIPIENT".into(),
                hint: "Set it to the chat id that receives urgent and meeting notifications.".into(),
            })?;

        let dry_run = lookup("TRIAGE_DRY_RUN")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.dry_run);

        Ok(Self {
            poll_interval,
            lookback,
            notify_recipient,
            dry_run,
        })
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: "must be greater than zero".into(),
        }),
        Ok(secs) => Ok(secs),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{value}' is not a number of seconds: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config =
            TriageConfig::from_lookup(lookup(&[("TRIAGE_NOTIFY_RECIPIENT", "42")])).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.lookback, Duration::from_secs(600));
        assert_eq!(config.notify_recipient, "42");
        assert!(!config.dry_run);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = TriageConfig::from_lookup(lookup(&[
            ("TRIAGE_NOTIFY_RECIPIENT", "42"),
            ("TRIAGE_POLL_INTERVAL_SECS", "30"),
            ("TRIAGE_LOOKBACK_SECS", " 900 "),
            ("TRIAGE_DRY_RUN", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.lookback, Duration::from_secs(900));
        assert!(config.dry_run);
    }

    #[test]
    fn missing_recipient_is_an_error() {
        let err = TriageConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn bad_interval_is_an_error() {
        for bad in ["0", "soon", "-5"] {
            let err = TriageConfig::from_lookup(lookup(&[
                ("TRIAGE_NOTIFY_RECIPIENT", "42"),
                ("TRIAGE_POLL_INTERVAL_SECS", bad),
            ]))
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{bad}");
        }
    }
}
