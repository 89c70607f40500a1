//! `remap-enginectl`: issues §6 messages against a running [`Device`].
//!
//! The wire transport that would carry these commands to a remote
//! `io-engine`-style process is explicitly out of scope for this crate
//! (spec.md §1), so this binary talks to an in-process [`Device`] instead
//! of re-specifying one — the same relationship the teacher's
//! `io-engine-client` has to a running `io-engine` instance, minus the
//! gRPC hop.

use std::sync::Arc;

use clap::Parser;
use remap_engine::{
    core::{BackingDevice, FileBackend, MemBackend, OpenError},
    device::{
        messages::{self, Command},
        status::DeviceMode,
        ConstructParams, Device, DeviceError,
    },
    RemapEngineConfig,
};
use snafu::Snafu;

/// Top-level CLI error: either a backing-device open failure or a device
/// lifecycle/operation failure, matching the teacher's `io-engine-client`
/// convention of a thin per-binary `snafu` enum over the library's own
/// error types rather than a catch-all error crate.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
enum CliError {
    #[snafu(display("{source}"))]
    Open { source: OpenError },
    #[snafu(display("{source}"))]
    Device { source: DeviceError },
    #[snafu(display("failed to render status as JSON: {source}"))]
    Render { source: serde_json::Error },
}

impl From<OpenError> for CliError {
    fn from(source: OpenError) -> Self {
        CliError::Open { source }
    }
}

impl From<DeviceError> for CliError {
    fn from(source: DeviceError) -> Self {
        CliError::Device { source }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(source: serde_json::Error) -> Self {
        CliError::Render { source }
    }
}

type Result<T, E = CliError> = std::result::Result<T, E>;

#[derive(Debug, Parser)]
#[command(name = "remap-enginectl", version, about = "Block-device remapping engine control tool")]
struct Cli {
    /// Run against an in-memory demo device instead of opening real paths
    /// (spec.md §6 field 31, device mode `demo`).
    #[arg(long)]
    demo: bool,

    /// Main (failing) backing device path. Ignored in `--demo` mode.
    #[arg(long, default_value = "main.img")]
    main: String,

    /// Spare (healthy) backing device path. Ignored in `--demo` mode.
    #[arg(long, default_value = "spare.img")]
    spare: String,

    /// Demo-mode capacities, in sectors.
    #[arg(long, default_value_t = 1_048_576)]
    demo_main_sectors: u64,
    #[arg(long, default_value_t = 1_200_000)]
    demo_spare_sectors: u64,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    remap_engine::logging::init();
    let cli = Cli::parse();

    let (main, spare, mode) = if cli.demo {
        let main: Arc<dyn BackingDevice> =
            Arc::new(MemBackend::new("main-demo", cli.demo_main_sectors, 512));
        let spare: Arc<dyn BackingDevice> =
            Arc::new(MemBackend::new("spare-demo", cli.demo_spare_sectors, 512));
        (main, spare, DeviceMode::Demo)
    } else {
        let main: Arc<dyn BackingDevice> = Arc::new(FileBackend::open(&cli.main, 512)?);
        let spare: Arc<dyn BackingDevice> = Arc::new(FileBackend::open(&cli.spare, 512)?);
        (main, spare, DeviceMode::Real)
    };

    let params = ConstructParams {
        start_sector: 0,
        length_sectors: main.capacity(),
        target_type_name: "remap".to_string(),
        main_device_path: cli.main.clone(),
        spare_device_path: cli.spare.clone(),
        main_device_id: None,
    };

    let device = Device::construct(main, spare, params, RemapEngineConfig::default(), mode).await?;

    let reply = messages::dispatch(&device, cli.command).await?;
    match reply {
        messages::Reply::Ok => println!("ok"),
        messages::Reply::Status(status) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        messages::Reply::MetadataStatus { version_counter } => {
            println!("version_counter={version_counter}");
        }
        messages::Reply::Help(commands) => {
            for c in commands {
                println!("{c}");
            }
        }
    }

    device.destruct().await;
    Ok(())
}
