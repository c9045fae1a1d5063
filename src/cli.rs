use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parceldesk: hostel parcel desk with signed QR pickup codes
#[derive(Parser)]
#[command(name = "parceldesk", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to PARCELDESK_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Register, inspect and confirm parcels
    Parcel {
        #[command(subcommand)]
        command: ParcelCommands,
    },

    /// Issue or check pickup tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Write a parcel's pickup QR code to a PNG file
    Qr {
        #[arg(long)]
        parcel_id: i64,
        #[arg(short, long, default_value = "pickup.png")]
        out: PathBuf,
    },

    /// Print a fresh random signing key (hex)
    Keygen,
}

#[derive(Subcommand)]
pub enum ParcelCommands {
    /// Log a newly arrived parcel
    Register {
        #[arg(long)]
        resident_id: i64,
        #[arg(long)]
        description: Option<String>,
        /// Courier or service name (max 100 characters)
        #[arg(long)]
        service: Option<String>,
    },
    /// Show one parcel by id or tracking id
    Show { id: String },
    /// List parcels, newest first
    List {
        /// PENDING or PICKED_UP
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        resident_id: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Mark a parcel as picked up without a scan
    Confirm { id: i64 },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Sign a pickup token for a pending parcel
    Issue {
        #[arg(long)]
        parcel_id: i64,
    },
    /// Check a token's signature and age without touching any parcel
    Verify { token: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_parcel_list() {
        let cli = Cli::parse_from([
            "parceldesk", "parcel", "list", "--status", "pending", "--limit", "10",
        ]);
        match cli.command {
            Some(Commands::Parcel {
                command: ParcelCommands::List { status, limit, .. },
            }) => {
                assert_eq!(status.as_deref(), Some("pending"));
                assert_eq!(limit, Some(10));
            }
            _ => panic!("expected parcel list"),
        }
    }

    #[test]
    fn test_parse_qr_default_output() {
        let cli = Cli::parse_from(["parceldesk", "qr", "--parcel-id", "7"]);
        match cli.command {
            Some(Commands::Qr { parcel_id, out }) => {
                assert_eq!(parcel_id, 7);
                assert_eq!(out, PathBuf::from("pickup.png"));
            }
            _ => panic!("expected qr"),
        }
    }
}
