// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The engine: frame acquisition, module dispatch, command handling.
//!
//! One [`Engine`] owns the capture and output drivers, the mapping table,
//! the module slot and every registered text channel. Its main loop runs on
//! a single dedicated thread and is the only context that ever invokes a
//! module or reconfigures a driver, so module authors never see concurrent
//! re-entry. Everything command-triggered is serialized through one
//! exclusion lock; the three liveness flags (`running`, `streaming`,
//! `stop_main_loop`) are lock-independent atomics so a shutdown request or
//! status probe never queues behind a slow format switch.
//!
//! Format/module switches requested over a command channel are queued (at
//! most one outstanding, newest wins) and applied at the top of the next
//! iteration, before any module invocation - a module's `process` never
//! observes the mapping changing underneath it.

use crate::core::config::EngineConfig;
use crate::core::error::{Result, VisorError};
use crate::core::frame::{InputFrame, OutputFrame};
use crate::core::mapping::{MappingTable, PixelFormat, VideoMapping};
use crate::core::module::{LoadedModule, ModuleContext, ModuleLoader};
use crate::core::params::{ParamOwner, ParamSet};
use crate::core::serial::{fan_out, SerPort, TextChannel};
use crate::core::video::{VideoInput, VideoOutput};
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How long an external caller waits for the exclusion lock before giving
/// up with `Busy`. The loop thread itself always waits unboundedly.
const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Idle pause when nothing is streaming, to keep the loop cooperative
/// without spinning.
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// A queued format-change request. `origin` is the index of the channel
/// that asked, so the acknowledgement lands there once the switch resolves.
struct PendingSwitch {
    target: VideoMapping,
    origin: Option<usize>,
}

/// Dispatcher verdict for one command line.
enum Dispatch {
    /// Executed; the caller acknowledges with `OK`.
    Handled,
    /// Queued; the acknowledgement is sent when the request resolves.
    Deferred,
    /// Not an engine command; offer it to the module.
    NotMine,
}

struct EngineInner {
    current_mapping: VideoMapping,
    camera: Box<dyn VideoInput>,
    gadget: Option<Box<dyn VideoOutput>>,
    module: Option<LoadedModule>,
    channels: Vec<Box<dyn TextChannel>>,
    params: ParamSet,
    pending: Option<PendingSwitch>,
}

/// The orchestration core of the appliance.
pub struct Engine {
    mappings: MappingTable,
    running: AtomicBool,
    streaming: AtomicBool,
    stop_main_loop: AtomicBool,
    inner: Mutex<EngineInner>,
}

impl Engine {
    /// Build an engine over a parsed mapping table and a pair of drivers.
    ///
    /// `gadget` may be `None` when the appliance streams nothing out (all
    /// mappings serial-only). Initial `serlog` / `serout` values come from
    /// the config; both stay adjustable at runtime via `setpar`.
    pub fn new(
        config: &EngineConfig,
        mappings: MappingTable,
        camera: Box<dyn VideoInput>,
        gadget: Option<Box<dyn VideoOutput>>,
    ) -> Result<Self> {
        let mut params = ParamSet::new();
        params.register_with_callback(
            "serlog",
            &config.serlog,
            "Send log and debug messages to the selected serial port(s)",
            ParamOwner::Engine,
            Some(Box::new(|_, _, new| new.parse::<SerPort>().map(|_| ()))),
        )?;
        params.register_with_callback(
            "serout",
            &config.serout,
            "Send module result messages to the selected serial port(s)",
            ParamOwner::Engine,
            Some(Box::new(|_, _, new| new.parse::<SerPort>().map(|_| ()))),
        )?;
        // Reject a config that seeds an invalid selector.
        params.get_parsed::<SerPort>("serlog")?;
        params.get_parsed::<SerPort>("serout")?;

        let current_mapping = mappings.default_mapping().clone();
        Ok(Self {
            mappings,
            running: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            stop_main_loop: AtomicBool::new(false),
            inner: Mutex::new(EngineInner {
                current_mapping,
                camera,
                gadget,
                module: None,
                channels: Vec::new(),
                params,
                pending: None,
            }),
        })
    }

    // -----------------------------------------------------------------
    // State probes (safe from any thread, never touch the lock)
    // -----------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Ask the main loop to wind down at the next iteration boundary. Safe
    /// to call from signal handlers and background tasks.
    pub fn stop(&self) {
        self.stop_main_loop.store(true, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------
    // Externally callable configuration (bounded-wait on the lock)
    // -----------------------------------------------------------------

    fn lock_bounded(&self) -> Result<MutexGuard<'_, EngineInner>> {
        self.inner.try_lock_for(LOCK_TIMEOUT).ok_or_else(|| {
            VisorError::Busy("Engine lock not acquired within the bounded wait".to_string())
        })
    }

    /// Register one more command/response channel. Channels live for the
    /// rest of the engine's life and are polled every loop iteration.
    pub fn register_channel(&self, chan: Box<dyn TextChannel>) -> Result<()> {
        self.lock_bounded()?.channels.push(chan);
        Ok(())
    }

    /// Set a parameter from outside the command protocol (CLI overrides).
    pub fn set_param(&self, name: &str, value: &str) -> Result<()> {
        self.lock_bounded()?.params.set(name, value)
    }

    pub fn get_param(&self, name: &str) -> Result<String> {
        self.lock_bounded()?.params.get(name).map(str::to_string)
    }

    /// Copy of the active mapping (which need not appear in the table when
    /// it was injected ad hoc).
    pub fn current_mapping(&self) -> Result<VideoMapping> {
        Ok(self.lock_bounded()?.current_mapping.clone())
    }

    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    /// Switch to the mapping at `idx`: the only path that changes the
    /// active mapping/module. Blocks (bounded) until no module invocation
    /// is in flight.
    pub fn set_format(&self, idx: usize) -> Result<()> {
        let target = self.mappings.get(idx)?.clone();
        let mut inner = self.lock_bounded()?;
        self.set_format_locked(&mut inner, &target)
    }

    /// Switch to a free-standing mapping that need not appear in the table.
    pub fn set_format_mapping(&self, target: &VideoMapping) -> Result<()> {
        let mut inner = self.lock_bounded()?;
        self.set_format_locked(&mut inner, target)
    }

    pub fn stream_on(&self) -> Result<()> {
        let mut inner = self.lock_bounded()?;
        self.stream_on_locked(&mut inner)
    }

    pub fn stream_off(&self) -> Result<()> {
        let mut inner = self.lock_bounded()?;
        self.stream_off_locked(&mut inner)
    }

    /// Deliver `text` to the channels selected by `serlog` (when `islog`)
    /// or `serout`. Best effort per channel.
    pub fn send_serial(&self, text: &str, islog: bool) -> Result<()> {
        let mut inner = self.lock_bounded()?;
        self.send_serial_locked(&mut inner, text, islog);
        Ok(())
    }

    /// Run a command script, one engine command per line. Replies go to the
    /// log fan-out. With `strict` a missing file is an error; the startup
    /// path passes `false` so an absent init script is just a debug line.
    pub fn run_script(&self, path: &Path, strict: bool) -> Result<()> {
        let mut inner = self.lock_bounded()?;
        self.run_script_locked(&mut inner, path, None, strict)
    }

    // -----------------------------------------------------------------
    // The main loop
    // -----------------------------------------------------------------

    /// Steady-state driver; call from the dedicated loop thread. Returns
    /// when `stop()` was observed, after stopping streaming and unloading
    /// the module.
    pub fn main_loop(&self) -> Result<()> {
        self.stop_main_loop.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Engine main loop starting");

        while !self.stop_main_loop.load(Ordering::SeqCst) {
            let mut inner = self.inner.lock();

            // Apply at most one queued format change before any module
            // invocation of this iteration.
            if let Some(req) = inner.pending.take() {
                let outcome = self.set_format_locked(&mut inner, &req.target);
                match &outcome {
                    Ok(()) => self.reply(&mut inner, req.origin, "OK"),
                    Err(e) => {
                        let msg = format!("ERR {e}");
                        self.reply(&mut inner, req.origin, &msg);
                        self.send_serial_locked(&mut inner, &msg, true);
                    }
                }
            }

            let mut idle = true;
            if self.streaming.load(Ordering::SeqCst) && inner.module.is_some() {
                idle = false;
                self.run_module_once(&mut inner);
            }

            self.poll_channels(&mut inner);
            drop(inner);

            if idle {
                std::thread::sleep(IDLE_WAIT);
            }
        }

        tracing::info!("Engine main loop winding down");
        let mut inner = self.inner.lock();
        if let Err(e) = self.stream_off_locked(&mut inner) {
            tracing::warn!("Stream-off during shutdown failed: {e}");
        }
        self.unload_module_locked(&mut inner);
        drop(inner);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// One module invocation: acquire the frame handle(s) and hand them to
    /// the module. Failures are confined to this iteration.
    fn run_module_once(&self, inner: &mut EngineInner) {
        let serlog = engine_serlog(&inner.params);
        let serout = engine_serout(&inner.params);

        let EngineInner {
            current_mapping,
            camera,
            gadget,
            module,
            channels,
            params,
            ..
        } = inner;
        let Some(loaded) = module.as_mut() else {
            return;
        };
        let module_name = loaded.name();

        let result = invoke_module(
            current_mapping,
            camera.as_mut(),
            gadget,
            loaded,
            channels,
            params,
            serout,
        );

        match result {
            Ok(()) => {}
            Err(VisorError::NoBufferAvailable(msg)) => {
                // Transient: the driver queue has nothing for us this time
                // around; skip the iteration.
                tracing::debug!("Frame skipped: {msg}");
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => {
                let line = format!("ERR Module {module_name} failed: {e}");
                tracing::warn!("{line}");
                fan_out(channels, serlog, &line);
            }
        }
    }

    /// Poll every channel for one complete line and dispatch it.
    fn poll_channels(&self, inner: &mut EngineInner) {
        for idx in 0..inner.channels.len() {
            let Some(line) = inner.channels[idx].try_read_line() else {
                continue;
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            self.dispatch_line(inner, &line, Some(idx));
        }
    }

    /// Route one command line: engine dispatcher first, then the module's
    /// own command hook, then the error reply.
    fn dispatch_line(&self, inner: &mut EngineInner, line: &str, origin: Option<usize>) {
        match self.parse_command(inner, line, origin) {
            Ok(Dispatch::Handled) => self.reply(inner, origin, "OK"),
            Ok(Dispatch::Deferred) => {}
            Ok(Dispatch::NotMine) => {
                let EngineInner {
                    module, channels, ..
                } = inner;
                let outcome = match (module.as_mut(), origin) {
                    (Some(loaded), Some(idx)) => {
                        loaded.module().parse_serial(line, channels[idx].as_mut())
                    }
                    (Some(_), None) => Err(VisorError::UnknownCommand(line.to_string())),
                    (None, _) => Err(VisorError::UnknownCommand(line.to_string())),
                };
                match outcome {
                    Ok(()) => self.reply(inner, origin, "OK"),
                    Err(e) => self.reply(inner, origin, &format!("ERR {e}")),
                }
            }
            Err(e) => self.reply(inner, origin, &format!("ERR {e}")),
        }
    }

    /// Engine-level command grammar. `Ok(NotMine)` hands the line onward.
    fn parse_command(
        &self,
        inner: &mut EngineInner,
        line: &str,
        origin: Option<usize>,
    ) -> Result<Dispatch> {
        let toks: Vec<&str> = line.split_whitespace().collect();
        match toks.as_slice() {
            ["help"] => {
                self.write_help(inner, origin);
                Ok(Dispatch::Handled)
            }
            ["info"] => {
                self.reply(inner, origin, &format!("INFO: visor {}", env!("CARGO_PKG_VERSION")));
                let mapping_line = format!("INFO: mapping: {}", inner.current_mapping);
                self.reply(inner, origin, &mapping_line);
                let module_line = match &inner.module {
                    Some(m) => format!("INFO: module: {} - {}", m.name(), m.description()),
                    None => "INFO: module: none loaded".to_string(),
                };
                self.reply(inner, origin, &module_line);
                Ok(Dispatch::Handled)
            }
            ["setpar", name, value] => {
                inner.params.set(name, value)?;
                Ok(Dispatch::Handled)
            }
            ["getpar", name] => {
                let value = inner.params.get(name)?.to_string();
                self.reply(inner, origin, &format!("{name} {value}"));
                Ok(Dispatch::Handled)
            }
            ["listmappings"] => {
                self.write_mappings(inner, origin);
                Ok(Dispatch::Handled)
            }
            ["setmapping", idx] => {
                let idx: usize = idx.parse().map_err(|_| {
                    VisorError::InvalidValue(format!("'{idx}' is not a mapping index"))
                })?;
                let target = self.mappings.get(idx)?.clone();
                self.queue_switch(inner, target, origin);
                Ok(Dispatch::Deferred)
            }
            ["setmapping2", fmt, w, h, fps] => {
                let ofmt = PixelFormat::from_token(fmt)
                    .map_err(|_| VisorError::InvalidValue(format!("Bad pixel format '{fmt}'")))?;
                let ow: u32 = w
                    .parse()
                    .map_err(|_| VisorError::InvalidValue(format!("Bad width '{w}'")))?;
                let oh: u32 = h
                    .parse()
                    .map_err(|_| VisorError::InvalidValue(format!("Bad height '{h}'")))?;
                let ofps: f32 = fps
                    .parse()
                    .map_err(|_| VisorError::InvalidValue(format!("Bad frame rate '{fps}'")))?;
                let target = self.mappings.find(ofmt, ow, oh, ofps)?.clone();
                self.queue_switch(inner, target, origin);
                Ok(Dispatch::Deferred)
            }
            ["reload"] => {
                self.reload_module_locked(inner)?;
                Ok(Dispatch::Handled)
            }
            ["streamon"] => {
                self.stream_on_locked(inner)?;
                Ok(Dispatch::Handled)
            }
            ["streamoff"] => {
                self.stream_off_locked(inner)?;
                Ok(Dispatch::Handled)
            }
            ["runscript", path] => {
                let path = Path::new(path).to_path_buf();
                self.run_script_locked(inner, &path, origin, true)?;
                Ok(Dispatch::Handled)
            }
            ["ping"] => {
                self.reply(inner, origin, "ALIVE");
                Ok(Dispatch::Handled)
            }
            ["quit"] => {
                self.stop();
                Ok(Dispatch::Handled)
            }
            ["restart"] => {
                // No platform reboot path on host hardware; degrade to quit
                // after telling the requester.
                self.reply(inner, origin, "NOTICE restart unavailable on host, quitting");
                self.stop();
                Ok(Dispatch::Handled)
            }
            ["setpar", ..] => Err(VisorError::InvalidValue(
                "setpar needs <name> <value>".to_string(),
            )),
            ["getpar", ..] => Err(VisorError::InvalidValue("getpar needs <name>".to_string())),
            ["setmapping", ..] => Err(VisorError::InvalidValue(
                "setmapping needs <idx>".to_string(),
            )),
            ["setmapping2", ..] => Err(VisorError::InvalidValue(
                "setmapping2 needs <outfmt> <w> <h> <fps>".to_string(),
            )),
            ["runscript", ..] => Err(VisorError::InvalidValue(
                "runscript needs <file>".to_string(),
            )),
            _ => Ok(Dispatch::NotMine),
        }
    }

    /// Queue a format change; at most one is outstanding and the newest
    /// wins. The superseded requester is told, not silently dropped.
    fn queue_switch(&self, inner: &mut EngineInner, target: VideoMapping, origin: Option<usize>) {
        if let Some(old) = inner.pending.take() {
            self.reply(inner, old.origin, "ERR superseded by a newer format request");
        }
        tracing::debug!("Queued format change to {target}");
        inner.pending = Some(PendingSwitch { target, origin });
    }

    // -----------------------------------------------------------------
    // The switch state machine (all callers hold the lock)
    // -----------------------------------------------------------------

    /// Stop streaming, swap the module if the identifier changed,
    /// reconfigure the drivers, adopt the mapping, resume streaming if it
    /// was active. A module load failure leaves the engine stopped with no
    /// module loaded - never a stale one.
    fn set_format_locked(&self, inner: &mut EngineInner, target: &VideoMapping) -> Result<()> {
        tracing::info!("Switching to mapping: {target}");
        let was_streaming = self.streaming.load(Ordering::SeqCst);
        if was_streaming {
            self.stream_off_locked(inner)?;
        }

        let need_swap = match &inner.module {
            Some(loaded) => loaded.name() != target.module,
            None => true,
        };
        if need_swap {
            self.unload_module_locked(inner);
            self.load_module_locked(inner, &target.module)?;
        }

        inner.camera.reconfigure(target)?;
        if target.has_streamed_output() {
            let out = inner.gadget.as_mut().ok_or_else(|| {
                VisorError::Driver(
                    "Mapping streams output but no output driver is attached".to_string(),
                )
            })?;
            out.reconfigure(target)?;
        }

        inner.current_mapping = target.clone();

        if was_streaming {
            self.stream_on_locked(inner)?;
        }
        Ok(())
    }

    /// Idempotent: already streaming is a no-op.
    fn stream_on_locked(&self, inner: &mut EngineInner) -> Result<()> {
        if self.streaming.load(Ordering::SeqCst) {
            tracing::debug!("Stream is already on");
            return Ok(());
        }
        inner.camera.stream_on()?;
        if inner.current_mapping.has_streamed_output() {
            if let Some(out) = inner.gadget.as_mut() {
                out.stream_on()?;
            }
        }
        self.streaming.store(true, Ordering::SeqCst);
        tracing::info!("Streaming on");
        Ok(())
    }

    /// Idempotent: already stopped is a no-op.
    fn stream_off_locked(&self, inner: &mut EngineInner) -> Result<()> {
        if !self.streaming.load(Ordering::SeqCst) {
            tracing::debug!("Stream is already off");
            return Ok(());
        }
        inner.camera.stream_off()?;
        if let Some(out) = inner.gadget.as_mut() {
            out.stream_off()?;
        }
        self.streaming.store(false, Ordering::SeqCst);
        tracing::info!("Streaming off");
        Ok(())
    }

    /// Tear down the module slot: deinit, drop module parameters, destroy
    /// the instance (and with it the factory handle, in that order).
    fn unload_module_locked(&self, inner: &mut EngineInner) {
        if let Some(mut loaded) = inner.module.take() {
            tracing::info!("Unloading module {}", loaded.name());
            loaded.module().deinit();
            inner.params.clear_module_params();
        }
    }

    /// Construct and initialize the module named by a mapping. On an init
    /// failure nothing half-built stays behind: the instance is torn down
    /// and its parameters dropped before the error propagates.
    fn load_module_locked(&self, inner: &mut EngineInner, name: &str) -> Result<()> {
        let mut loaded = ModuleLoader::load(name)?;
        if let Err(e) = loaded.module().init(&mut inner.params) {
            loaded.module().deinit();
            inner.params.clear_module_params();
            return Err(VisorError::ModuleLoad(format!(
                "Module {name} failed to initialize: {e}"
            )));
        }
        inner.module = Some(loaded);
        Ok(())
    }

    /// Re-instantiate the current module in place (the `reload` command).
    fn reload_module_locked(&self, inner: &mut EngineInner) -> Result<()> {
        let target = inner.current_mapping.clone();
        let was_streaming = self.streaming.load(Ordering::SeqCst);
        if was_streaming {
            self.stream_off_locked(inner)?;
        }
        self.unload_module_locked(inner);
        self.load_module_locked(inner, &target.module)?;
        if was_streaming {
            self.stream_on_locked(inner)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Replies, fan-out, scripts
    // -----------------------------------------------------------------

    /// One response line to the issuing channel, or to the log when the
    /// command came from startup code instead of a channel.
    fn reply(&self, inner: &mut EngineInner, origin: Option<usize>, text: &str) {
        match origin {
            Some(idx) => {
                if let Some(chan) = inner.channels.get_mut(idx) {
                    if let Err(e) = chan.write_line(text) {
                        tracing::warn!("Dropped reply on {:?} channel: {e}", chan.kind());
                    }
                }
            }
            None => tracing::info!("{text}"),
        }
    }

    fn send_serial_locked(&self, inner: &mut EngineInner, text: &str, islog: bool) {
        let port = if islog {
            engine_serlog(&inner.params)
        } else {
            engine_serout(&inner.params)
        };
        fan_out(&mut inner.channels, port, text);
    }

    fn run_script_locked(
        &self,
        inner: &mut EngineInner,
        path: &Path,
        origin: Option<usize>,
        strict: bool,
    ) -> Result<()> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if !strict => {
                tracing::debug!("No script at {}: {e}", path.display());
                return Ok(());
            }
            Err(e) => {
                return Err(VisorError::NotFound(format!(
                    "Script {}: {e}",
                    path.display()
                )))
            }
        };
        tracing::info!("Running script {}", path.display());
        for raw in contents.lines() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            self.dispatch_line(inner, line, origin);
        }
        Ok(())
    }

    fn write_help(&self, inner: &mut EngineInner, origin: Option<usize>) {
        const GENERAL: &[&str] = &[
            "GENERAL COMMANDS:",
            "help - print this help message",
            "info - show engine version, current mapping and module",
            "setpar <name> <value> - set a parameter",
            "getpar <name> - get a parameter value",
            "listmappings - list all available video mappings",
            "setmapping <idx> - select a mapping by index (applied between frames)",
            "setmapping2 <outfmt> <w> <h> <fps> - select a mapping by output specs",
            "reload - tear down and reload the current module",
            "streamon - start video streaming",
            "streamoff - stop video streaming",
            "runscript <file> - run commands from a file",
            "ping - check engine liveness",
            "quit - stop the main loop and exit",
            "restart - request a platform restart",
        ];
        for line in GENERAL {
            self.reply(inner, origin, line);
        }
        self.reply(inner, origin, "PARAMETERS:");
        let param_lines: Vec<String> = inner
            .params
            .iter()
            .map(|(name, value, descr)| format!("{name} = {value}  ({descr})"))
            .collect();
        for line in &param_lines {
            self.reply(inner, origin, line);
        }
        let module_help = inner
            .module
            .as_ref()
            .and_then(|m| m.module_ref().supported_commands());
        if let Some(help) = module_help {
            self.reply(inner, origin, "MODULE COMMANDS:");
            self.reply(inner, origin, help);
        }
    }

    fn write_mappings(&self, inner: &mut EngineInner, origin: Option<usize>) {
        let count_line = format!("AVAILABLE VIDEO MAPPINGS ({}):", self.mappings.len());
        self.reply(inner, origin, &count_line);
        let lines: Vec<String> = self
            .mappings
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let marker = if *m == inner.current_mapping {
                    " [current]"
                } else if i == self.mappings.default_index() {
                    " [default]"
                } else {
                    ""
                };
                format!("{i:4} - {m}{marker}")
            })
            .collect();
        for line in &lines {
            self.reply(inner, origin, line);
        }
    }
}

/// Acquire the frame handle(s) the mapping calls for and run the module's
/// matching entry point. Frame handles release their buffers on every exit
/// path out of this function.
fn invoke_module(
    current_mapping: &VideoMapping,
    camera: &mut dyn VideoInput,
    gadget: &mut Option<Box<dyn VideoOutput>>,
    loaded: &mut LoadedModule,
    channels: &mut [Box<dyn TextChannel>],
    params: &mut ParamSet,
    serout: SerPort,
) -> Result<()> {
    let inframe = InputFrame::reserve(camera)?;
    let mut ctx = ModuleContext::new(channels, serout, params);
    if current_mapping.has_streamed_output() {
        let out = gadget.as_mut().ok_or_else(|| {
            VisorError::Driver("Mapping streams output but no output driver is attached".to_string())
        })?;
        let outframe = OutputFrame::reserve(out.as_mut())?;
        loaded.module().process(inframe, outframe, &mut ctx)
    } else {
        loaded.module().process_no_usb(inframe, &mut ctx)
    }
}

/// `serlog` is validated at registration and on every set, so a parse here
/// cannot fail in practice; fall back to `None` rather than propagate.
fn engine_serlog(params: &ParamSet) -> SerPort {
    params.get_parsed("serlog").unwrap_or(SerPort::None)
}

fn engine_serout(params: &ParamSet) -> SerPort {
    params.get_parsed("serout").unwrap_or(SerPort::None)
}
