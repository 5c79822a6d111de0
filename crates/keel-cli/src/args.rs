//! Command-line flags. Every flag can also come from a `KEEL_*` variable.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use keel_core::app::{ControllerConfig, LeaderElectionConfig};
use keel_core::domain::HolderIdentity;

#[derive(Debug, Clone, Parser)]
#[command(name = "keel", version, about = "Level-triggered reconciliation controller")]
pub struct Args {
    /// Number of concurrent reconcile workers.
    #[arg(long, env = "KEEL_WORKER_COUNT", default_value_t = 1)]
    pub worker_count: usize,

    /// Elect a single active replica through the lease store. This binary
    /// only ships an in-process store, so replicas do not see each other.
    #[arg(long, env = "KEEL_LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    #[arg(long, env = "KEEL_LEASE_DURATION", default_value = "15s", value_parser = parse_duration)]
    pub lease_duration: Duration,

    #[arg(long, env = "KEEL_RENEW_DEADLINE", default_value = "10s", value_parser = parse_duration)]
    pub renew_deadline: Duration,

    #[arg(long, env = "KEEL_RETRY_PERIOD", default_value = "2s", value_parser = parse_duration)]
    pub retry_period: Duration,

    /// Interval offered to reconcilers for periodic re-checks.
    #[arg(long, env = "KEEL_REQUEUE_PERIOD", default_value = "60s", value_parser = parse_duration)]
    pub requeue_period: Duration,

    #[arg(long, env = "KEEL_RECONCILE_TIMEOUT", default_value = "5m", value_parser = parse_duration)]
    pub reconcile_timeout: Duration,

    #[arg(long, env = "KEEL_SHUTDOWN_GRACE_PERIOD", default_value = "30s", value_parser = parse_duration)]
    pub shutdown_grace_period: Duration,

    /// Name of the lease object.
    #[arg(long, env = "KEEL_LEADER_ELECTION_ID", default_value = "keel-controller-leader")]
    pub leader_election_id: String,

    /// Holder identity; generated when absent.
    #[arg(long, env = "KEEL_IDENTITY")]
    pub identity: Option<String>,

    #[arg(long, env = "KEEL_HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,

    /// Emit logs as JSON lines.
    #[arg(long, env = "KEEL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Keys served by the built-in in-memory change source.
    #[arg(long = "key", env = "KEEL_KEYS", value_delimiter = ',')]
    pub keys: Vec<String>,
}

impl Args {
    pub fn controller_config(&self) -> ControllerConfig {
        let identity = match &self.identity {
            Some(id) => HolderIdentity::new(id.clone()),
            None => HolderIdentity::generate("keel"),
        };
        ControllerConfig {
            worker_count: self.worker_count,
            leader_election: LeaderElectionConfig {
                enabled: self.leader_elect,
                lease_name: self.leader_election_id.clone(),
                identity,
                lease_duration: self.lease_duration,
                renew_deadline: self.renew_deadline,
                retry_period: self.retry_period,
            },
            requeue_period: self.requeue_period,
            reconcile_timeout: self.reconcile_timeout,
            shutdown_grace_period: self.shutdown_grace_period,
            ..ControllerConfig::default()
        }
    }
}

/// `500ms`, `15s`, `2m`, `1h`, or bare seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {input:?}"))?;
    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => return Err(format!("unknown duration unit {other:?} in {input:?}")),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("500ms", Duration::from_millis(500))]
    #[case("15s", Duration::from_secs(15))]
    #[case("2m", Duration::from_secs(120))]
    #[case("1h", Duration::from_secs(3600))]
    #[case("42", Duration::from_secs(42))]
    #[case(" 7s ", Duration::from_secs(7))]
    fn parses_durations(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("s")]
    #[case("10d")]
    #[case("-5s")]
    #[case("1.5s")]
    fn rejects_bad_durations(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[test]
    fn defaults_match_controller_defaults() {
        let args = Args::try_parse_from(["keel"]).unwrap();
        let config = args.controller_config();
        let defaults = ControllerConfig::default();
        assert_eq!(config.worker_count, defaults.worker_count);
        assert_eq!(config.requeue_period, defaults.requeue_period);
        assert_eq!(config.reconcile_timeout, defaults.reconcile_timeout);
        assert!(!config.leader_election.enabled);
        assert_eq!(args.health_probe_bind_address.port(), 8081);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_override_election_settings() {
        let args = Args::try_parse_from([
            "keel",
            "--leader-elect",
            "--identity",
            "pod-a",
            "--lease-duration",
            "30s",
            "--renew-deadline",
            "20s",
            "--worker-count",
            "4",
            "--key",
            "ns/a,ns/b",
        ])
        .unwrap();
        let config = args.controller_config();
        assert!(config.leader_election.enabled);
        assert_eq!(config.leader_election.identity.as_str(), "pod-a");
        assert_eq!(config.leader_election.lease_duration, Duration::from_secs(30));
        assert_eq!(config.worker_count, 4);
        assert_eq!(args.keys, vec!["ns/a".to_string(), "ns/b".to_string()]);
    }

    #[test]
    fn leader_elect_help_mentions_private_store() {
        use clap::CommandFactory;

        let command = Args::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == "leader_elect")
            .unwrap();
        let help = arg.get_help().unwrap().to_string();
        assert!(help.contains("in-process store"), "{help}");
    }

    #[test]
    fn oversized_reconcile_timeout_fails_validation() {
        let args = Args::try_parse_from(["keel", "--reconcile-timeout", "1000h"]).unwrap();
        assert!(args.controller_config().validate().is_err());
    }
}
