//! `airgap-doctor` — loads a [`StoreOptions`]/`NetworkConfiguration` TOML
//! file and reports what the decision engine would do for a list of
//! `host:port` arguments. `SPEC_FULL.md` §10: the test tooling this core
//! would ship alongside itself, useful for debugging why a test's
//! allow-list isn't matching without spinning up a JVM at all.

use std::path::PathBuf;
use std::process::ExitCode;

use airgap_agent::config::{CallerTag, LoopbackPolicy, NetworkConfigurationBuilder};
use airgap_agent::store::{ConfigurationStore, StoreOptions};
use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "airgap-doctor", about = "Explain a network-isolation decision offline")]
struct Cli {
    /// Path to a TOML file describing the configuration and store options
    /// to evaluate against.
    #[arg(long)]
    config: PathBuf,

    /// One or more `host:port` pairs to evaluate. Port may be omitted
    /// (defaults to `-1`, the DNS-only shape).
    #[arg(required = true)]
    targets: Vec<String>,

    /// Emit verbose diagnostics via `tracing`.
    #[arg(long)]
    debug: bool,
}

/// On-disk shape for `--config`. Mirrors [`StoreOptions`] and
/// [`airgap_agent::config::NetworkConfiguration`] but as plain,
/// `serde`-friendly data — never used on the agent's production load path
/// (`spec.md` §6: no runtime configuration surface there), only here and
/// in tests.
#[derive(Debug, Deserialize)]
struct DoctorConfig {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    block: Vec<String>,
    #[serde(default)]
    require_explicit_loopback_allow: bool,
    #[serde(default)]
    infra_exemptions: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    airgap_agent::telemetry::init(airgap_agent::telemetry::AgentOptions { debug: cli.debug });

    let raw = match std::fs::read_to_string(&cli.config) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to read {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    let doctor_config: DoctorConfig = match toml::from_str(&raw) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to parse {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let mut builder = NetworkConfigurationBuilder::default();
    for pattern in &doctor_config.allow {
        builder = match builder.try_allow(pattern) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("invalid allow pattern: {e}");
                return ExitCode::FAILURE;
            }
        };
    }
    for pattern in &doctor_config.block {
        builder = match builder.try_block(pattern) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("invalid block pattern: {e}");
                return ExitCode::FAILURE;
            }
        };
    }

    let store = ConfigurationStore::new(StoreOptions {
        loopback_policy: if doctor_config.require_explicit_loopback_allow {
            LoopbackPolicy::RequireExplicitAllow
        } else {
            LoopbackPolicy::PermissiveByDefault
        },
        infra_exemptions: doctor_config.infra_exemptions,
    });
    store.set_configuration(builder.build());

    let mut any_blocked = false;
    for target in &cli.targets {
        let (host, port) = parse_target(target);
        match store.check_connection(host, port, CallerTag::Unknown, &[]) {
            Ok(()) => println!("ALLOW  {target}"),
            Err(info) => {
                any_blocked = true;
                println!("BLOCK  {target}  ({info})");
            }
        }
    }

    if any_blocked {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

/// Splits a `host:port` argument. `host` alone is treated as the DNS-only
/// shape (`port == -1`), matching `spec.md` §4.3's DNS wrapper.
fn parse_target(target: &str) -> (&str, i32) {
    match target.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (target, -1),
        },
        None => (target, -1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_splits_host_and_port() {
        assert_eq!(parse_target("example.com:443"), ("example.com", 443));
    }

    #[test]
    fn parse_target_without_port_is_dns_shape() {
        assert_eq!(parse_target("example.com"), ("example.com", -1));
    }

    #[test]
    fn parse_target_with_unparseable_port_falls_back_to_dns_shape() {
        assert_eq!(parse_target("example.com:notaport"), ("example.com:notaport", -1));
    }
}
