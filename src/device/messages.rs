//! Runtime messages (spec.md §4.6 "Runtime messages", §6 "Messages").
//!
//! Only the semantic effect of each message is in scope; the transport
//! that would carry these to a remote process is the host management
//! surface spec.md puts out of scope (§1). `Command` is parsed with
//! `clap`'s `Subcommand` derive the way the teacher's `io-engine-client`
//! CLI builds its subcommand tree (`io-engine/src/bin/io-engine-client/
//! v0/device_cli.rs`), even though here `dispatch` calls straight into an
//! in-process [`Device`] instead of issuing a gRPC call.

use clap::Subcommand;

use crate::device::{status::StatusReport, Device, DeviceError};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates a remap for `main_sector` pointing at `spare_sector`,
    /// covering `length` sectors.
    AddRemap {
        main_sector: u64,
        spare_sector: u64,
        length: u32,
    },
    /// Removes the remap covering `main_sector`, if any.
    RemoveRemap { main_sector: u64 },
    /// Drops every remap and forces a persist of the now-empty index.
    ClearAll,
    /// Forces an out-of-band metadata persist.
    Save,
    /// Reports on-spare metadata health (version counter, valid copies).
    MetadataStatus,
    /// The full positional status report (spec.md §6).
    Status,
    /// Alias for `status`, kept for parity with spec.md §6's message list.
    Stats,
    /// Enumerates the recognized command set.
    Help,
    /// Registers an additional spare device path (accounting only; this
    /// core does not multiplex across multiple spares).
    SpareAdd { path: String },
    /// Unregisters a spare device path.
    SpareRemove { path: String },
}

/// The result of dispatching a [`Command`] against a [`Device`].
#[derive(Debug)]
pub enum Reply {
    Ok,
    Status(Box<StatusReport>),
    MetadataStatus { version_counter: u64 },
    Help(&'static [&'static str]),
}

pub const RECOGNIZED_COMMANDS: &[&str] = &[
    "add_remap",
    "remove_remap",
    "clear_all",
    "save",
    "metadata_status",
    "status",
    "stats",
    "help",
    "spare_add",
    "spare_remove",
];

/// Applies `command`'s semantic effect to `device`, mutating the same
/// state the programmatic API exposes under the same invariants (spec.md
/// §4.6: "Their only required behavior is to mutate the same state
/// exposed by the programmatic API under the same invariants").
pub async fn dispatch(device: &Device, command: Command) -> Result<Reply, DeviceError> {
    match command {
        Command::AddRemap {
            main_sector,
            spare_sector,
            length,
        } => {
            device.add_remap(main_sector, spare_sector, length).await?;
            Ok(Reply::Ok)
        }
        Command::RemoveRemap { main_sector } => {
            device.remove_remap(main_sector).await?;
            Ok(Reply::Ok)
        }
        Command::ClearAll => {
            device.clear_all().await?;
            Ok(Reply::Ok)
        }
        Command::Save => {
            device.force_save().await?;
            Ok(Reply::Ok)
        }
        Command::MetadataStatus => Ok(Reply::MetadataStatus {
            version_counter: device.metadata_version(),
        }),
        Command::Status | Command::Stats => Ok(Reply::Status(Box::new(device.status()))),
        Command::Help => Ok(Reply::Help(RECOGNIZED_COMMANDS)),
        Command::SpareAdd { path } => {
            device.spare_add(path);
            Ok(Reply::Ok)
        }
        Command::SpareRemove { path } => {
            device.spare_remove(&path);
            Ok(Reply::Ok)
        }
    }
}
