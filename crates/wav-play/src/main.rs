//! wav-play: drive a `wav-engine` from the terminal.
//!
//! Loads a WAVE file into memory, starts playback and reads transport commands from stdin
//! (type `h` for the list).

mod cli;
mod commands;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wav_engine::{Engine, EngineConfig};

use commands::{HELP, UserCommand};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,wav_play=info,wav_engine=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for (i, name) in wav_engine::device::list_output_devices(&host)?
            .iter()
            .enumerate()
        {
            println!("#{i}: {name}");
        }
        return Ok(());
    }

    let Some(path) = args.path.as_ref() else {
        bail!("missing WAVE file path");
    };
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "loaded file");

    let config = EngineConfig::new(bytes)
        .with_device_name(args.device.clone())
        .with_poll_period_ms(args.poll_ms);
    let engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(kind = %e.kind(), "engine setup failed: {e}");
            return Err(e).context("initialize engine");
        }
    };

    let err = engine.last_error();
    if err.is_error() {
        bail!("{err}");
    }

    println!(
        "Total duration: {:.2} seconds",
        engine.total_duration_ms() as f32 / 1000.0
    );
    run_command_loop(&engine)
}

fn run_command_loop(engine: &Engine) -> Result<()> {
    let sync = Arc::new(std::sync::Barrier::new(1));
    engine.play(Some(sync.clone()));
    println!("Playing\nEnter 'q' to quit, 'h' for help");

    for line in std::io::stdin().lock().lines() {
        let line = line.context("read stdin")?;
        match commands::parse_line(&line) {
            Ok(UserCommand::Help) => println!("{HELP}"),
            Ok(UserCommand::Pause) => {
                if engine.pause(Some(sync.clone())) {
                    println!("Paused");
                }
            }
            Ok(UserCommand::Resume) => {
                if engine.play(Some(sync.clone())) {
                    println!("Play/Resumed");
                }
            }
            Ok(UserCommand::Stop) => {
                engine.stop(Some(sync.clone()));
                println!("Stopped");
            }
            Ok(UserCommand::Jump(ms)) => {
                engine.jump(Some(sync.clone()), ms);
                println!("Jumped to {ms} milliseconds");
            }
            Ok(UserCommand::Time) => {
                println!(
                    "Current time: {:.2} seconds",
                    engine.current_time_ms() as f32 / 1000.0
                );
            }
            Ok(UserCommand::Volume) => println!("Volume control is not supported"),
            Ok(UserCommand::Quit) => {
                println!("Quitting");
                return Ok(());
            }
            Err(msg) => println!("{msg}"),
        }

        let err = engine.last_error();
        if err.is_warning() {
            eprintln!("Warning: {err}");
            engine.reset_error();
        }
    }
    Ok(())
}
