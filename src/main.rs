use clap::{Arg, Command};
use guardspire::bridge::{BridgeNotifier, BridgeServer};
use guardspire::config::Config;
use guardspire::credentials;
use guardspire::event::LifecycleState;
use guardspire::extract::extract;
use guardspire::pipeline::Pipeline;
use guardspire::platform::LogNotifier;
use guardspire::poller::{MissedEventPoller, SpoolSource};
use guardspire::popup::PopupCallback;
use guardspire::verdict::ScanVerdict;
use log::LevelFilter;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    let matches = Command::new("guardspire")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scans device notifications for scams and raises in-app or platform alerts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/guardspire.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("extract")
                .long("extract")
                .value_name("TEXT")
                .help("Print the text and links that would be sent for a notification body")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .value_name("TEXT")
                .help("Run a synthetic notification through the full pipeline")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("title")
                .long("title")
                .value_name("TITLE")
                .help("Title for --simulate (default: Test App)")
                .requires("simulate")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("background")
                .long("background")
                .help("Simulate with the app in the background")
                .requires("simulate")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        init_logging(verbose, None);
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/guardspire.yaml");
    let (config, found) = match load_config(config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    init_logging(verbose, config.logging.as_ref().map(|l| l.level.as_str()));
    if !found {
        log::warn!("Configuration file '{config_path}' not found, using default configuration");
    }

    if let Some(text) = matches.get_one::<String>("extract") {
        let content = extract(Some(text));
        match serde_json::to_string_pretty(&content) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error encoding extracted content: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        match config.validate() {
            Ok(()) => {
                println!("✅ Configuration is valid");
                println!("   Scanner: {}", config.scanner.base_url);
                println!("   Bridge socket: {}", config.bridge.socket_path);
                println!(
                    "   Guard: {}s cooldown ({:?}), {}s retention",
                    config.guard.cooldown_seconds,
                    config.guard.cooldown_scope,
                    config.guard.retention_seconds
                );
                println!("   Identity: {}", config.identity());
            }
            Err(e) => {
                println!("❌ Configuration error: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        process::exit(1);
    }

    if let Some(text) = matches.get_one::<String>("simulate") {
        let title = matches.get_one::<String>("title").map(String::as_str);
        let state = if matches.get_flag("background") {
            LifecycleState::Background
        } else {
            LifecycleState::Foreground
        };
        if let Err(e) = simulate(&config, text, title, state).await {
            eprintln!("Simulation failed: {e}");
            process::exit(1);
        }
        return;
    }

    log::info!("Starting GuardSpire notification scanner...");
    if let Err(e) = run(config).await {
        log::error!("Bridge error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool, configured: Option<&str>) {
    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        configured
            .and_then(|level| level.parse().ok())
            .unwrap_or(LevelFilter::Info)
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();
}

fn load_config(path: &str) -> anyhow::Result<(Config, bool)> {
    if std::path::Path::new(path).exists() {
        Ok((Config::from_file(path)?, true))
    } else {
        Ok((Config::default(), false))
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let (outbound, _) = broadcast::channel(64);
    let pipeline = Pipeline::new(
        &config,
        credentials::from_config(&config.credentials),
        Arc::new(BridgeNotifier::new(outbound.clone())),
    )?;
    pipeline.start().await;

    let poller = match (&config.bridge.spool_dir, config.poller.enabled) {
        (Some(dir), true) => MissedEventPoller::new(
            pipeline.clone(),
            Arc::new(SpoolSource::new(dir)),
            Duration::from_secs(config.poller.interval_seconds),
        )
        .spawn(),
        _ => None,
    };

    let server = BridgeServer::new(pipeline.clone(), outbound);
    server
        .run(&config.bridge.socket_path, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {e}");
                return;
            }
            log::info!("Received shutdown signal, cleaning up...");
        })
        .await?;

    if let Some(handle) = poller {
        handle.abort();
    }
    pipeline.log_summary();
    Ok(())
}

async fn simulate(
    config: &Config,
    text: &str,
    title: Option<&str>,
    state: LifecycleState,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(
        config,
        credentials::from_config(&config.credentials),
        Arc::new(LogNotifier),
    )?;
    pipeline.start().await;
    pipeline.set_lifecycle(state);

    let popup: PopupCallback = Arc::new(|verdict: ScanVerdict| -> Result<(), ScanVerdict> {
        println!("🚨 {} detected", verdict.category().headline());
        println!("   {}", verdict.description());
        println!(
            "   Threat level: {} ({} severity)",
            verdict.score_label(),
            verdict.category().severity()
        );
        if let Some(scan_id) = verdict.scan_id.as_deref() {
            println!("   Scan id: {scan_id}");
        }
        Ok(())
    });
    pipeline.register_popup(Some(popup));
    pipeline.enable_test_mode();

    println!("🧪 Simulating notification ({state})...");
    match pipeline.simulate(text, title).await {
        Some(outcome) => println!("Outcome: {outcome:?}"),
        None => anyhow::bail!("test mode refused the simulation"),
    }
    Ok(())
}
