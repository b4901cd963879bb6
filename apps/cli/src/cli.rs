//! Command-line interface for the condo WhatsApp tools using Clap v4.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// condo - manage a building's WhatsApp instance
#[derive(Parser, Debug)]
#[command(name = "condo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Building id (overrides CONDO_BUILDING_ID)
    #[arg(short, long, global = true)]
    pub building: Option<String>,

    /// Building name used in the instance name (overrides CONDO_BUILDING_NAME)
    #[arg(long, global = true)]
    pub building_name: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store the API access token
    Login {
        /// Bearer token issued by the building API
        #[arg(long, env = "CONDO_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Remove the stored access token
    Logout,

    /// Show the instance and its live connection status
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create the building's WhatsApp instance
    Create,

    /// Request a QR code to link a device
    Connect {
        /// Where to write the QR image
        #[arg(short, long, default_value = "whatsapp-qr.png")]
        qr_out: PathBuf,

        /// Keep polling until the device is linked or the QR expires
        #[arg(short, long)]
        wait: bool,
    },

    /// Log the linked device out
    Disconnect,

    /// Delete the instance at the provider and on the server
    Delete {
        /// Skip the confirmation check
        #[arg(short, long)]
        yes: bool,
    },

    /// Follow the instance until interrupted
    Watch,
}
