use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{LevelFilter, error, info, warn};

use skyq_remote_bridge::config::{
    CANDIDATE_REST_PORTS, ConfigManager, DeviceConfig, parse_host_input, probe_rest_port,
};
use skyq_remote_bridge::device_control::{AckMode, HttpStatusReader};
use skyq_remote_bridge::entity::{CommandHandler, MediaPlayerEntity, RemoteEntity, media_player_name};
use skyq_remote_bridge::error::ConfigError;
use skyq_remote_bridge::session::{DeviceSession, SessionRegistry};

#[derive(Parser)]
#[command(name = "skyq-bridge")]
#[command(about = "Control Sky Q boxes over their remote-control and REST ports")]
struct Cli {
    /// Directory holding config.json (defaults to $UC_CONFIG_HOME, then .)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Treat a silent remote-control port as an acknowledgement
    #[arg(long, global = true)]
    lenient: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect every enabled device and poll until Ctrl-C
    Run,
    /// Probe a box and add it to the configuration
    Add {
        /// host or host:port of the REST interface
        host: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a device from the configuration
    Remove { device_id: String },
    /// List configured devices
    List,
    /// Send one command, or several as a sequence
    Send {
        device_id: String,
        #[arg(required = true)]
        commands: Vec<String>,
        /// Delay between sequence commands
        #[arg(long, default_value = "500")]
        delay_ms: u64,
    },
    /// Dial a channel number
    Channel { device_id: String, number: String },
    /// Print the device status as JSON
    Status { device_id: String },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    // Logging is up before the config is read so load errors are visible.
    // Without RUST_LOG the backend lets everything through and the global
    // max level carries the configured threshold.
    let rust_log_set = std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some();
    let _ = env_logger::try_init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "trace"),
    );
    if !rust_log_set {
        log::set_max_level(LevelFilter::Info);
    }

    let mut manager = ConfigManager::new(cli.config_dir.as_deref())?;
    if !rust_log_set {
        log::set_max_level(manager.config().log_filter());
    }

    let ack_mode = if cli.lenient {
        AckMode::Lenient
    } else {
        AckMode::Strict
    };

    match cli.command {
        Commands::Run => run(&manager, ack_mode).await,
        Commands::Add { host, name } => add(&mut manager, &host, name).await,
        Commands::Remove { device_id } => {
            let removed = manager.remove_device(&device_id)?;
            println!("Removed {} ({})", removed.name, removed.device_id);
            Ok(())
        }
        Commands::List => {
            list(&manager);
            Ok(())
        }
        Commands::Send {
            device_id,
            commands,
            delay_ms,
        } => {
            let session = open_session(&manager, &device_id, ack_mode).await?;
            let delivered = if commands.len() == 1 {
                session.send(&commands[0]).await
            } else {
                session
                    .send_sequence(commands.as_slice(), Duration::from_millis(delay_ms))
                    .await
            };
            report(delivered, &commands.join(" "))
        }
        Commands::Channel { device_id, number } => {
            let session = open_session(&manager, &device_id, ack_mode).await?;
            let delivered = session.change_channel(&number).await;
            report(delivered, &format!("channel {}", number))
        }
        Commands::Status { device_id } => {
            let session = open_session(&manager, &device_id, ack_mode).await?;
            let status = session.refresh(true).await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn run(manager: &ConfigManager, ack_mode: AckMode) -> CliResult {
    let devices = manager.enabled_devices();
    if devices.is_empty() {
        warn!(
            "No enabled devices in {}, nothing to do",
            manager.config_file().display()
        );
        return Ok(());
    }

    let registry = SessionRegistry::new(ack_mode);
    let connected = registry.connect_all(&devices).await;
    info!("{}/{} devices connected", connected.len(), devices.len());

    let mut entities: Vec<Box<dyn CommandHandler>> = Vec::new();
    for device_id in &connected {
        let Some(session) = registry.get(device_id).await else {
            continue;
        };
        let device_info = session.device_info().await;
        entities.push(Box::new(MediaPlayerEntity::new(
            session.clone(),
            device_info.as_ref(),
        )));
        entities.push(Box::new(RemoteEntity::new(session, device_info.as_ref())));
    }
    for entity in &entities {
        info!("Registered entity {} ({})", entity.name(), entity.entity_id());
    }

    registry.start_polling_all().await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for Ctrl-C: {}", e);
    }
    info!("Shutting down");
    registry.shutdown().await;
    Ok(())
}

async fn add(manager: &mut ConfigManager, input: &str, name: Option<String>) -> CliResult {
    let host_input = parse_host_input(input)?;
    let candidates: Vec<u16> = match host_input.rest_port {
        Some(port) => vec![port],
        None => CANDIDATE_REST_PORTS.to_vec(),
    };

    let http = HttpStatusReader::new();
    let Some((rest_port, device_info)) =
        probe_rest_port(&host_input.host, &candidates, &http).await
    else {
        return Err(format!(
            "no Sky Q box answered at {} (ports {:?})",
            host_input.host, candidates
        )
        .into());
    };

    let mut device = DeviceConfig::new(&host_input.host, rest_port, "");
    device.name = match name {
        Some(name) => name,
        None => media_player_name(&device, Some(&device_info)),
    };

    let session = DeviceSession::new(device.clone(), AckMode::Strict);
    if !session.transport().test_connection().await {
        warn!(
            "{}: remote-control port {} did not answer, commands may fail",
            device.host, device.remote_port
        );
    }

    manager.add_device(device.clone())?;
    println!(
        "Added {} ({}) rest port {}, remote port {}",
        device.name, device.device_id, device.rest_port, device.remote_port
    );
    Ok(())
}

fn list(manager: &ConfigManager) {
    let devices = &manager.config().devices;
    if devices.is_empty() {
        println!("No devices configured");
        return;
    }
    for device in devices {
        println!(
            "{:<32} {:<20} {}:{} remote {}{}",
            device.device_id,
            device.name,
            device.host,
            device.rest_port,
            device.remote_port,
            if device.enabled { "" } else { " (disabled)" }
        );
    }
}

async fn open_session(
    manager: &ConfigManager,
    device_id: &str,
    ack_mode: AckMode,
) -> Result<Arc<DeviceSession>, Box<dyn std::error::Error>> {
    let config = manager
        .config()
        .device(device_id)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownDevice(device_id.to_string()))?;

    let session = Arc::new(DeviceSession::new(config, ack_mode));
    let state = session.connect().await;
    info!("{}: transport {}", session.name(), state);
    Ok(session)
}

fn report(delivered: bool, what: &str) -> CliResult {
    if delivered {
        println!("Sent {}", what);
        Ok(())
    } else {
        Err(format!("{} not delivered", what).into())
    }
}
