use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::capture::{Protocol, DEFAULT_CAPTURE_WIDTH};

#[derive(Parser)]
#[command(name = "gatelink")]
#[command(about = "🎴 Battle Chip Gate and Campho camera companion", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the chips of a gate with their wire codes
    Chips {
        /// Gate type: bcg, pcg or blg
        #[arg(short, long, default_value = "bcg")]
        gate: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a single chip and wait for the answer
    Chip {
        /// Gate type: bcg, pcg or blg
        #[arg(short, long, default_value = "bcg")]
        gate: String,

        /// Emulator address (host:port)
        #[arg(short, long, default_value = "localhost:8000")]
        addr: String,

        /// Wire code of the chip
        #[arg(short, long, conflicts_with = "name", required_unless_present = "name")]
        code: Option<u32>,

        /// Chip name (case-insensitive)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Interactive chip selector
    Gate {
        /// Gate type: bcg, pcg or blg
        #[arg(short, long, default_value = "bcg")]
        gate: String,

        /// Emulator address (host:port)
        #[arg(short, long, default_value = "localhost:8000")]
        addr: String,
    },

    /// Stream camera frames to the emulator
    Camera {
        /// Emulator address (host:port)
        #[arg(short, long, default_value = "localhost:8000")]
        addr: String,

        /// Protocol version: ws15 (174x144 15-bit over WebSocket) or http24 (176x144 24-bit over HTTP)
        #[arg(short, long, value_enum, default_value = "ws15")]
        protocol: Protocol,

        /// Frame source: screen, pattern or image:PATH
        #[arg(short, long, default_value = "screen")]
        source: String,

        /// Width the source is scaled to before cropping
        #[arg(long, default_value_t = DEFAULT_CAPTURE_WIDTH)]
        capture_width: u32,

        /// Start streaming as soon as the camera is up
        #[arg(long)]
        autostart: bool,

        /// Give up on an HTTP send after this many milliseconds (default: wait forever)
        #[arg(long)]
        send_timeout_ms: Option<u64>,
    },

    /// Run a local receiver that logs what the other commands send
    Sink {
        /// Address for HTTP POST bodies (default 127.0.0.1:8000 when neither listener is given)
        #[arg(long)]
        http: Option<String>,

        /// Address for WebSocket frames (default 127.0.0.1:8001 when neither listener is given)
        #[arg(long)]
        ws: Option<String>,

        /// Write every received frame as a PNG into this directory
        #[arg(short, long)]
        dump: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
