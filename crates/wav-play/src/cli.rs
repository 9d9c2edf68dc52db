//! Command-line interface definitions.
//!
//! Only the `clap` surface lives here; playback logic stays in `wav-engine`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "wav-play", version)]
pub struct Args {
    /// Path to a PCM WAVE file
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Output device: "default" or a substring of a device name
    #[arg(long, default_value = "default")]
    pub device: String,

    /// Feeder poll period in milliseconds (also sizes the device buffer)
    #[arg(long, default_value_t = 10)]
    pub poll_ms: u32,
}
