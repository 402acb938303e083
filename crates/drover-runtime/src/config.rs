//! Orchestrator tuning knobs, loaded from the environment.

use std::collections::HashMap;
use std::time::Duration;

/// Tuning knobs for leases, streaming, and turn safety limits.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Minimum quiet period before the stream sends a heartbeat record.
    pub heartbeat_interval: Duration,
    /// Lifetime of an unrefreshed turn lease.
    pub lease_ttl: Duration,
    /// Refresh period; must be strictly less than the TTL.
    pub lease_refresh_interval: Duration,
    /// Backstop lifetime for a cancel flag whose owner never cleans up.
    pub cancel_ttl: Duration,
    /// Store poll period for the stream's catch-up/timeout path.
    pub stream_poll_interval: Duration,
    /// Hard cap on tool calls per turn.
    pub max_tool_calls: usize,
    /// Tool-call count at which the midpoint progress message is emitted.
    pub progress_tool_threshold: usize,
    /// Character budget for derived agent prompts.
    pub planning_char_budget: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(15_000),
            lease_ttl: Duration::from_millis(60_000),
            lease_refresh_interval: Duration::from_millis(20_000),
            cancel_ttl: Duration::from_millis(600_000),
            stream_poll_interval: Duration::from_millis(1_000),
            max_tool_calls: 30,
            progress_tool_threshold: 10,
            planning_char_budget: 2_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, String> {
        let mut envs = HashMap::new();
        for key in [
            "DROVER_HEARTBEAT_MS",
            "DROVER_LEASE_TTL_MS",
            "DROVER_LEASE_REFRESH_MS",
            "DROVER_CANCEL_TTL_MS",
            "DROVER_STREAM_POLL_MS",
            "DROVER_MAX_TOOL_CALLS",
            "DROVER_PROGRESS_TOOL_THRESHOLD",
            "DROVER_PLANNING_CHAR_BUDGET",
        ] {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    pub fn from_env_map(envs: &HashMap<String, String>) -> Result<Self, String> {
        let defaults = Self::default();
        let config = Self {
            heartbeat_interval: parse_ms(envs, "DROVER_HEARTBEAT_MS", defaults.heartbeat_interval)?,
            lease_ttl: parse_ms(envs, "DROVER_LEASE_TTL_MS", defaults.lease_ttl)?,
            lease_refresh_interval: parse_ms(
                envs,
                "DROVER_LEASE_REFRESH_MS",
                defaults.lease_refresh_interval,
            )?,
            cancel_ttl: parse_ms(envs, "DROVER_CANCEL_TTL_MS", defaults.cancel_ttl)?,
            stream_poll_interval: parse_ms(
                envs,
                "DROVER_STREAM_POLL_MS",
                defaults.stream_poll_interval,
            )?,
            max_tool_calls: parse_count(envs, "DROVER_MAX_TOOL_CALLS", defaults.max_tool_calls)?,
            progress_tool_threshold: parse_count(
                envs,
                "DROVER_PROGRESS_TOOL_THRESHOLD",
                defaults.progress_tool_threshold,
            )?,
            planning_char_budget: parse_count(
                envs,
                "DROVER_PLANNING_CHAR_BUDGET",
                defaults.planning_char_budget,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.lease_refresh_interval >= self.lease_ttl {
            return Err(format!(
                "DROVER_LEASE_REFRESH_MS ({}ms) must be strictly less than DROVER_LEASE_TTL_MS ({}ms)",
                self.lease_refresh_interval.as_millis(),
                self.lease_ttl.as_millis()
            ));
        }
        if self.max_tool_calls == 0 {
            return Err("DROVER_MAX_TOOL_CALLS must be at least 1".to_string());
        }
        Ok(())
    }
}

fn parse_ms(
    envs: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, String> {
    match envs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("invalid {}='{}'. expected milliseconds", key, raw)),
        None => Ok(default),
    }
}

fn parse_count(
    envs: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, String> {
    match envs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("invalid {}='{}'. expected a non-negative integer", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = OrchestratorConfig::from_env_map(&HashMap::new()).expect("defaults");
        assert_eq!(config.max_tool_calls, 30);
        assert!(config.lease_refresh_interval < config.lease_ttl);
    }

    #[test]
    fn refresh_interval_must_be_below_ttl() {
        let envs = HashMap::from([
            ("DROVER_LEASE_TTL_MS".to_string(), "10000".to_string()),
            ("DROVER_LEASE_REFRESH_MS".to_string(), "10000".to_string()),
        ]);
        let err = OrchestratorConfig::from_env_map(&envs).expect_err("equal must fail");
        assert!(err.contains("DROVER_LEASE_REFRESH_MS"));
    }

    #[test]
    fn invalid_number_names_the_variable() {
        let envs = HashMap::from([("DROVER_MAX_TOOL_CALLS".to_string(), "lots".to_string())]);
        let err = OrchestratorConfig::from_env_map(&envs).expect_err("invalid must fail");
        assert!(err.contains("DROVER_MAX_TOOL_CALLS"));
    }

    #[test]
    fn overrides_are_applied() {
        let envs = HashMap::from([
            ("DROVER_HEARTBEAT_MS".to_string(), "250".to_string()),
            ("DROVER_MAX_TOOL_CALLS".to_string(), "3".to_string()),
        ]);
        let config = OrchestratorConfig::from_env_map(&envs).expect("parse");
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.max_tool_calls, 3);
    }
}
