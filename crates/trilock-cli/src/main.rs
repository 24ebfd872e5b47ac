//! TriLock driver: loads configuration, sets up logging and runs a scripted
//! verification session against the mock proximity link.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use trilock_core::{JournalCounts, LockState, Phase, TriLockConfig};
use trilock_engine::LockEngine;
use trilock_hardware::{SupervisorConfig, TransportError};
use trilock_hardware::mock::{MockProximityLink, UnlockResponse};

mod logging;

use logging::LogFormat;

/// Extra wait on top of the configured settle delay before giving up.
const SETTLE_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "trilock",
    version,
    about = "Drive the TriLock multi-factor lock engine."
)]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "TRILOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted verification session and print the audit trail.
    Simulate(SimulateArgs),

    /// Validate the configuration and print a summary.
    CheckConfig,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Phases to trigger, in order.
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = vec![Phase::Proximity, Phase::Fingerprint, Phase::Vein]
    )]
    steps: Vec<Phase>,

    /// Bring this Bluetooth device into range before the first step.
    #[arg(long)]
    beacon: Option<String>,

    /// How the relay answers the unlock command.
    #[arg(long, value_enum, default_value_t = RelayScript::Ok)]
    relay: RelayScript,

    /// Stay until the auto-lock period relocks the enclosure.
    #[arg(long)]
    wait_auto_lock: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RelayScript {
    Ok,
    Unacknowledged,
    Fail,
}

impl From<RelayScript> for UnlockResponse {
    fn from(script: RelayScript) -> Self {
        match script {
            RelayScript::Ok => UnlockResponse::Acknowledged,
            RelayScript::Unacknowledged => UnlockResponse::Unacknowledged,
            RelayScript::Fail => {
                UnlockResponse::Fail(TransportError::write_failed("scripted relay failure"))
            }
        }
    }
}

#[derive(Debug)]
struct SimulationReport {
    state: LockState,
    unlock_commands: usize,
    counts: JournalCounts,
    digest: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TriLockConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => TriLockConfig::default(),
    };

    logging::init_logging(cli.log_format, &config.logging.level);

    match &cli.command {
        Commands::Simulate(args) => {
            let report = simulate(&config, args).await?;
            print_report(&report);
        }
        Commands::CheckConfig => check_config(&config)?,
    }

    Ok(())
}

async fn simulate(config: &TriLockConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    let registry = config.build_registry()?;
    let (link, radio, events) = MockProximityLink::new();
    radio.set_default_response(args.relay.into());

    let engine = LockEngine::spawn(&config.engine, registry, link, events);
    let mut updates = engine.subscribe();

    if let Some(device_id) = &args.beacon {
        // The authorization list is pushed before the engine answers anything.
        engine.registry().await?;
        if !radio.enter(device_id).await? {
            warn!(device = %device_id, "Beacon is not a registered Bluetooth device");
        }
    }

    for phase in &args.steps {
        let state = engine
            .trigger(*phase)
            .await
            .with_context(|| format!("cannot trigger {phase}"))?;
        info!(
            phase = %phase,
            current = %state.current_phase,
            verified = state.verified_phases.len(),
            "Step applied"
        );
    }

    let settle = config.engine.settle_delay() + SETTLE_GRACE;
    match tokio::time::timeout(settle, updates.wait_for(LockState::is_unlocked)).await {
        Ok(Ok(_)) => info!("Lock disengaged"),
        Ok(Err(_)) => bail!("engine stopped before the session finished"),
        Err(_) => info!("Lock still engaged after the settle delay"),
    }

    if args.wait_auto_lock && engine.snapshot().is_unlocked() {
        let period = Duration::from_secs(u64::from(config.engine.auto_lock_secs)) + SETTLE_GRACE;
        tokio::time::timeout(period, updates.wait_for(|s| s.is_locked))
            .await
            .context("auto-lock did not fire")?
            .context("engine stopped before auto-lock")?;
        info!("Auto-lock relocked the enclosure");
    }

    let report = SimulationReport {
        state: engine.snapshot(),
        unlock_commands: radio.unlock_calls(),
        counts: engine.journal_counts().await?,
        digest: engine.audit_digest().await?,
    };
    engine.shutdown().await;
    Ok(report)
}

fn print_report(report: &SimulationReport) {
    let state = &report.state;
    let verified: Vec<&str> = state.verified_phases.iter().map(Phase::label).collect();

    println!("mode:      {}", state.connection_mode);
    println!("phase:     {}", state.current_phase);
    println!("locked:    {}", state.is_locked);
    println!("verified:  [{}]", verified.join(", "));
    if !state.active_alarms.is_empty() {
        println!("alarms:    {}", state.active_alarms.join("; "));
    }
    println!("relay cmd: {}", report.unlock_commands);
    println!(
        "journal:   {} success, {} failure, {} pending",
        report.counts.success, report.counts.failure, report.counts.pending
    );
    println!();
    println!("{}", report.digest);
}

fn check_config(config: &TriLockConfig) -> Result<()> {
    config.validate()?;
    let registry = config.build_registry()?;

    println!("configuration OK");
    println!("  settle delay:     {} ms", config.engine.settle_delay_ms);
    println!("  auto-lock:        {} s", config.engine.auto_lock_secs);
    println!("  journal capacity: {}", config.engine.journal_capacity);
    println!("  initial mode:     {}", config.engine.initial_mode);
    println!("  mode switch:      {:?}", config.engine.mode_switch_policy);
    let link = SupervisorConfig::from(&config.link);
    println!("  rssi threshold:   {} dBm", link.rssi_threshold_dbm);
    println!(
        "  reconnect:        {:?} .. {:?}",
        link.reconnect_initial, link.reconnect_max
    );
    println!("  write timeout:    {:?}", link.write_timeout);
    println!(
        "  registry:         {} keys, {} devices",
        registry.keys().len(),
        registry.devices().len()
    );
    for key in registry.low_battery_keys() {
        println!("  low battery:      {} ({}%)", key.id, key.battery_level);
    }
    let beacons = registry.bluetooth_ids();
    if beacons.is_empty() {
        println!("  proximity:        no Bluetooth devices authorized");
    } else {
        println!("  proximity:        {}", beacons.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEACON: &str = "AA:BB:CC:DD:EE:FF";

    fn config_with_devices() -> TriLockConfig {
        TriLockConfig::from_toml_str(&format!(
            r#"
            [[registry.devices]]
            id = "{BEACON}"
            name = "Pocket beacon"
            kind = "bluetooth"

            [[registry.devices]]
            id = "PHONE-1"
            name = "Pixel"
            kind = "phone"
            "#
        ))
        .unwrap()
    }

    fn simulate_args(argv: &[&str]) -> SimulateArgs {
        let mut full = vec!["trilock", "simulate"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Simulate(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["trilock", "check-config"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Plain);
        assert!(matches!(cli.command, Commands::CheckConfig));

        let args = simulate_args(&[]);
        assert_eq!(
            args.steps,
            vec![Phase::Proximity, Phase::Fingerprint, Phase::Vein]
        );
        assert_eq!(args.relay, RelayScript::Ok);
        assert!(!args.wait_auto_lock);
    }

    #[test]
    fn test_cli_parses_steps_and_flags() {
        let cli = Cli::try_parse_from([
            "trilock",
            "--log-format",
            "json",
            "simulate",
            "--steps",
            "vein,PROXIMITY",
            "--relay",
            "fail",
            "--beacon",
            BEACON,
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.steps, vec![Phase::Vein, Phase::Proximity]);
        assert_eq!(args.relay, RelayScript::Fail);
        assert_eq!(args.beacon.as_deref(), Some(BEACON));
    }

    #[test]
    fn test_cli_rejects_unknown_phase() {
        assert!(Cli::try_parse_from(["trilock", "simulate", "--steps", "retina"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_full_session_with_beacon() {
        let config = config_with_devices();
        let args = simulate_args(&["--steps", "fingerprint,vein", "--beacon", BEACON]);

        let report = simulate(&config, &args).await.unwrap();
        assert!(!report.state.is_locked);
        assert_eq!(report.state.current_phase, Phase::Unlocked);
        assert_eq!(report.unlock_commands, 1);
        assert!(
            report
                .digest
                .contains("Relay triggered, system fully disengaged.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_without_devices_stays_locked() {
        let report = simulate(&TriLockConfig::default(), &simulate_args(&[]))
            .await
            .unwrap();
        assert!(report.state.is_locked);
        assert_eq!(report.state.verified_phases.as_slice(), &[Phase::Vein]);
        assert_eq!(report.unlock_commands, 0);
        assert_eq!(report.counts.failure, 2);
        assert_eq!(report.counts.success, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_waits_for_auto_lock() {
        let config = config_with_devices();
        let args = simulate_args(&["--wait-auto-lock"]);

        let report = simulate(&config, &args).await.unwrap();
        assert!(report.state.is_locked);
        assert!(report.state.last_unlock_time.is_some());
        assert!(report.digest.contains("auto-lock protocol initiated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_rejects_idle_step() {
        let result = simulate(&TriLockConfig::default(), &simulate_args(&["--steps", "idle"])).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_check_config_accepts_defaults() {
        assert!(check_config(&config_with_devices()).is_ok());
    }

    #[test]
    fn test_check_config_rejects_blank_device_name() {
        let mut config = config_with_devices();
        config.registry.devices[1].name = String::new();
        assert!(check_config(&config).is_err());
    }
}
