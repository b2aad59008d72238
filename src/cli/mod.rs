use clap::{Args, Parser, Subcommand};

use crate::config::{BackoffPolicy, Geometry, SessionConfig};

#[derive(Parser)]
#[command(name = "taada")]
#[command(about = "📱 Low-latency phone screen mirroring receiver", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the phone and mirror its screen
    Connect {
        /// Host running the phone relay
        #[arg(long, default_value = "taada.top")]
        host: String,

        /// Socket port announced by the phone
        #[arg(short, long)]
        port: u16,

        /// Phone app build number
        #[arg(long, default_value_t = crate::protocol::MIN_APP_VERSION)]
        app_version: u32,

        /// Force the software decoder
        #[arg(long)]
        broadway: bool,

        /// Split buffers that carry several NAL units
        #[arg(long)]
        split_units: bool,

        /// Malformed messages in a row that end direct stream mode
        #[arg(long, default_value_t = 3)]
        direct_unlatch_after: u32,

        /// Exponential backoff with jitter that gives up after --max-retries
        #[arg(long)]
        jittered_backoff: bool,

        /// Reconnection attempts before giving up (with --jittered-backoff)
        #[arg(long, default_value_t = 15)]
        max_retries: u32,

        /// Start in night mode
        #[arg(long)]
        night: bool,

        #[command(flatten)]
        display: DisplayArgs,
    },

    /// Play a recorded Annex-B H.264 file through the pipeline
    Replay {
        /// Path to the .h264 file
        file: String,

        /// Pictures per second
        #[arg(long, default_value_t = 30)]
        fps: u32,

        #[command(flatten)]
        display: DisplayArgs,
    },
}

#[derive(Args, Clone)]
pub struct DisplayArgs {
    /// Stream width
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Stream height
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// JSON-lines commands on stdin and events on stdout instead of the viewer
    #[arg(long)]
    pub headless: bool,

    /// Terminal graphics protocol: sixel, kitty, iterm2 or halfblocks
    #[arg(short, long)]
    pub graphics: Option<String>,

    /// Log file used while the viewer owns the terminal
    #[arg(long, default_value = "~/.taada/receiver.log")]
    pub log_file: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Commands {
    pub fn display(&self) -> &DisplayArgs {
        match self {
            Commands::Connect { display, .. } | Commands::Replay { display, .. } => display,
        }
    }

    /// Session tunables for this invocation
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let display = self.display();
        let geometry = Geometry::new(display.width, display.height);

        match self {
            Commands::Connect {
                host,
                port,
                app_version,
                broadway,
                split_units,
                direct_unlatch_after,
                jittered_backoff,
                max_retries,
                night,
                ..
            } => SessionConfig {
                host: host.clone(),
                port: *port,
                geometry,
                app_version: *app_version,
                force_software: *broadway,
                night: *night,
                unlatch_after: *direct_unlatch_after,
                split_concatenated_units: *split_units,
                backoff: if *jittered_backoff {
                    BackoffPolicy::jittered(*max_retries)
                } else {
                    BackoffPolicy::default()
                },
                ..defaults
            },
            Commands::Replay { .. } => SessionConfig {
                geometry,
                force_software: true,
                split_concatenated_units: true,
                ..defaults
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_args() {
        let cli = Cli::try_parse_from([
            "taada",
            "connect",
            "--port",
            "9000",
            "--width",
            "800",
            "--height",
            "480",
            "--jittered-backoff",
            "--max-retries",
            "4",
        ])
        .unwrap();

        let config = cli.command.session_config();
        assert_eq!(config.url(), "wss://taada.top:9000");
        assert_eq!(config.geometry, Geometry::new(800, 480));
        assert_eq!(config.backoff, BackoffPolicy::jittered(4));
        assert!(!config.split_concatenated_units);
    }

    #[test]
    fn test_replay_enables_splitting() {
        let cli = Cli::try_parse_from(["taada", "replay", "capture.h264", "--headless"]).unwrap();
        assert!(cli.command.display().headless);
        let config = cli.command.session_config();
        assert!(config.split_concatenated_units);
        assert!(config.force_software);
    }

    #[test]
    fn test_port_is_required() {
        assert!(Cli::try_parse_from(["taada", "connect"]).is_err());
    }
}
