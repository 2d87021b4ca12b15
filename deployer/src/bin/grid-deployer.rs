// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable that reserves testbed nodes and deploys an image onto them

use anyhow::Context;
use anyhow::anyhow;
use camino::Utf8PathBuf;
use clap::Parser;
use grid_deployer::cancel::cancel_pair;
use grid_deployer::config::Config;
use grid_deployer::keys;
use grid_deployer::logging::LogLevel;
use grid_deployer::orchestrator::Orchestrator;
use grid_deployer::orchestrator::RunOutcome;
use grid_deployer::orchestrator::RunReport;
use grid_deployer::presets;
use grid_deployer::probe::SshProbe;
use grid_deployer::supervise::supervise;
use grid_deployer::testbed::Testbed;
use grid_deployer::tracker::Tracker;
use signal_hook::consts::signal::SIGINT;
use signal_hook::consts::signal::SIGTERM;
use signal_hook_tokio::Signals;
use slog::{info, o, warn};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "GRID_DEPLOYER_CONFIG", default_value = "config.toml")]
    config: Utf8PathBuf,

    /// Run a built-in preset instead of the `[run]` section of the file
    #[arg(long)]
    preset: Option<String>,

    /// Override the log level of the configuration file
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Skip the SSH reachability check even if the run asks for it
    #[arg(long)]
    no_probe: bool,

    /// Print the built-in presets and exit
    #[arg(long)]
    list_presets: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match do_run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

async fn do_run(args: Args) -> anyhow::Result<()> {
    if args.list_presets {
        for (name, summary) in presets::list() {
            println!("{name:<14} {summary}");
        }
        return Ok(());
    }

    let Config { testbed: testbed_config, ssh, log: log_config, run } =
        Config::from_file(&args.config)?;
    let mut run = match (&args.preset, run) {
        (Some(name), _) => presets::by_name(name)
            .ok_or_else(|| anyhow!("unknown preset {name:?}"))?,
        (None, Some(run)) => run,
        (None, None) => presets::by_name(presets::DEFAULT_PRESET)
            .ok_or_else(|| anyhow!("default preset is missing"))?,
    };
    if args.no_probe {
        run.probe = false;
    }

    let log_config = match args.log_level {
        Some(level) => log_config.with_level(level),
        None => log_config,
    };
    let log = log_config
        .to_logger("grid-deployer")
        .context("initializing logger")?;

    let key_dir = ssh.expanded_key_dir();
    let key_pair = keys::discover(&key_dir)
        .with_context(|| format!("locating SSH key pair in \"{key_dir}\""))?;
    info!(log, "using SSH key pair";
        "public" => %key_pair.public_path,
        "private" => %key_pair.private_path,
    );

    let client = testbed_client::Client::new(
        &testbed_config.url,
        testbed_config.credentials(),
        log.new(o!("component" => "TestbedClient")),
    )
    .context("building testbed client")?;
    let testbed: Arc<dyn Testbed> = Arc::new(client);
    let tracker = Tracker::new();
    let (trigger, cancel) = cancel_pair();

    let probe = run.probe;
    let mut orchestrator = Orchestrator::new(
        &log,
        Arc::clone(&testbed),
        tracker.clone(),
        run,
        key_pair.public_key.clone(),
        cancel,
    );
    if probe {
        match &ssh.gateway {
            Some(gateway) => {
                let gateway_user = ssh
                    .gateway_user
                    .clone()
                    .or_else(|| testbed_config.username.clone())
                    .ok_or_else(|| {
                        anyhow!("no user configured for the SSH gateway")
                    })?;
                let probe = SshProbe::new(
                    gateway.clone(),
                    gateway_user,
                    ssh.node_user.clone(),
                    ssh.probe_command.clone(),
                    &key_pair.private_path,
                )
                .context("setting up reachability check")?;
                orchestrator = orchestrator.with_probe(Arc::new(probe));
            }
            None => {
                warn!(log, "no SSH gateway configured, \
                            skipping reachability check");
            }
        }
    }

    let signals = Signals::new([SIGINT, SIGTERM])
        .context("failed to install signal handlers")?;
    let signals_handle = signals.handle();

    let task = tokio::spawn(orchestrator.run());
    let result = supervise(
        &log,
        task,
        signals,
        trigger,
        &tracker,
        testbed.as_ref(),
    )
    .await;
    signals_handle.close();

    let report = result?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    match report.outcome {
        RunOutcome::Completed => {}
        RunOutcome::NoJobs => println!("no jobs could be reserved"),
        RunOutcome::NoDeployments => println!("no deployments were accepted"),
    }
    for wave in &report.waves {
        println!("{wave}");
    }
    if !report.waves.is_empty() {
        println!(
            "{} of {} recorded nodes deployed successfully",
            report.results.succeeded(),
            report.results.recorded(),
        );
    }
}
