// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! visord - hosts the vision engine on a camera + serial setup.
//!
//! Parses the video mapping table, builds the drivers named in the config,
//! wires up the terminal as a command channel, and runs the engine main
//! loop until `quit` or Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use visor::core::sinks::{FileOutput, NullOutput};
use visor::core::sources::PatternInput;
use visor::{Engine, EngineConfig, MappingTable, StdioChannel, VideoInput, VideoOutput};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "visord")]
#[command(author, version, about = "visor engine daemon", long_about = None)]
struct Args {
    /// Engine config file (visor.yaml); defaults are used when absent
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Video mapping table file
    #[arg(long = "videomappings", value_name = "PATH", default_value = "videomappings.cfg")]
    videomappings: PathBuf,

    /// Camera device selector (overrides the config)
    #[arg(long, value_name = "DEV")]
    camera: Option<String>,

    /// Output device selector (overrides the config)
    #[arg(long, value_name = "DEV")]
    gadget: Option<String>,

    /// Startup command script (overrides the config)
    #[arg(long, value_name = "PATH")]
    initscript: Option<PathBuf>,

    /// Initial parameter overrides (can be specified multiple times)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,
}

// ---------------------------------------------------------------------------
// Driver construction from config selectors
// ---------------------------------------------------------------------------

fn nbufs(configured: u32) -> usize {
    if configured == 0 {
        4
    } else {
        configured as usize
    }
}

fn build_camera(selector: &str, buffers: u32) -> Result<Box<dyn VideoInput>> {
    match selector {
        "pattern:" => Ok(Box::new(PatternInput::new(nbufs(buffers)))),
        other => bail!(
            "Camera selector '{other}' is not available in this build \
             (only 'pattern:' is compiled in)"
        ),
    }
}

fn build_gadget(selector: &str, buffers: u32) -> Result<Option<Box<dyn VideoOutput>>> {
    if selector.is_empty() {
        return Ok(None);
    }
    if selector == "null:" {
        return Ok(Some(Box::new(NullOutput::new(nbufs(buffers)))));
    }
    if let Some(stem) = selector.strip_prefix("file:") {
        if stem.is_empty() {
            bail!("'file:' selector needs a file stem, e.g. file:/tmp/visor-out");
        }
        return Ok(Some(Box::new(FileOutput::new(stem, nbufs(buffers)))));
    }
    bail!(
        "Output selector '{selector}' is not available in this build \
         (use 'null:', 'file:<stem>' or leave it empty)"
    )
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(&std::env::current_dir()?),
    };
    if let Some(camera) = args.camera {
        config.cameradev = camera;
    }
    if let Some(gadget) = args.gadget {
        config.gadgetdev = gadget;
    }
    if let Some(script) = args.initscript {
        config.initscript = Some(script);
    }

    // A malformed mapping table aborts startup; there is no sensible
    // degraded mode without one.
    let mappings = MappingTable::load(&args.videomappings)
        .with_context(|| format!("loading {}", args.videomappings.display()))?;

    let camera = build_camera(&config.cameradev, config.cameranbuf)?;
    let gadget = build_gadget(&config.gadgetdev, config.gadgetnbuf)?;

    let engine = Arc::new(Engine::new(&config, mappings, camera, gadget)?);

    match config.serialdev.as_str() {
        "stdio" => engine
            .register_channel(Box::new(StdioChannel::new()))
            .context("registering the stdio channel")?,
        "" => tracing::info!("No serial channel configured"),
        other => tracing::warn!(
            "Hardware serial device '{other}' is not available in this build, \
             running without it"
        ),
    }
    if !config.usbserialdev.is_empty() {
        tracing::warn!(
            "USB serial device '{}' is not available in this build, running without it",
            config.usbserialdev
        );
    }

    for pair in &args.set {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("--set '{pair}' is not NAME=VALUE"))?;
        engine
            .set_param(name, value)
            .with_context(|| format!("applying --set {pair}"))?;
    }

    let initial = if config.videomapping < 0 {
        engine.mappings().default_index()
    } else {
        config.videomapping as usize
    };
    engine.set_format(initial)?;

    if let Some(script) = &config.initscript {
        engine.run_script(script, false)?;
    }

    // Ctrl+C / SIGTERM requests a cooperative stop; the loop finishes its
    // current iteration first.
    let handler_engine = Arc::clone(&engine);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        handler_engine.stop();
    })
    .context("installing the shutdown signal handler")?;

    engine.stream_on()?;
    engine.send_serial(&format!("INF visor {} ready", env!("CARGO_PKG_VERSION")), true)?;
    engine.main_loop()?;
    tracing::info!("visord exiting");
    Ok(())
}
