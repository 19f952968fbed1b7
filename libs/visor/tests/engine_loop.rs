// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end engine tests over scripted mock drivers and channels.

mod common;

use common::{MockChannel, MockInput, MockOutput};
use std::sync::atomic::{AtomicUsize, Ordering};
use visor::{
    register_module, ChannelKind, Engine, EngineConfig, InputFrame, MappingTable, ModuleContext,
    OutputFrame, Result, VisionModule, VisorError,
};

// ---------------------------------------------------------------------------
// Test modules
// ---------------------------------------------------------------------------

/// Live-instance counter for the module-slot exclusivity tests.
static COUNTED_ACTIVE: AtomicUsize = AtomicUsize::new(0);

pub struct Counted {
    _priv: (),
}

impl Default for Counted {
    fn default() -> Self {
        COUNTED_ACTIVE.fetch_add(1, Ordering::SeqCst);
        Self { _priv: () }
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        COUNTED_ACTIVE.fetch_sub(1, Ordering::SeqCst);
    }
}

impl VisionModule for Counted {
    fn process(
        &mut self,
        _inframe: InputFrame<'_>,
        _outframe: OutputFrame<'_>,
        _ctx: &mut ModuleContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn process_no_usb(
        &mut self,
        _inframe: InputFrame<'_>,
        _ctx: &mut ModuleContext<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

register_module!("CountedA", "slot-exclusivity probe A", Counted);
register_module!("CountedB", "slot-exclusivity probe B", Counted);

/// Module whose init always fails, for the load-failure fallback test.
#[derive(Default)]
pub struct FailInit;

impl VisionModule for FailInit {
    fn init(&mut self, _params: &mut visor::ParamSet) -> Result<()> {
        Err(VisorError::Other(anyhow::anyhow!("refusing to initialize")))
    }
}

register_module!("FailInit", "always fails to initialize", FailInit);

/// Module that errors on every second invocation.
static FLAKY_INVOCATIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
pub struct Flaky;

impl VisionModule for Flaky {
    fn process(
        &mut self,
        mut inframe: InputFrame<'_>,
        _outframe: OutputFrame<'_>,
        _ctx: &mut ModuleContext<'_>,
    ) -> Result<()> {
        let n = FLAKY_INVOCATIONS.fetch_add(1, Ordering::SeqCst);
        inframe.get()?;
        if n % 2 == 1 {
            return Err(VisorError::Other(anyhow::anyhow!("intermittent fault")));
        }
        Ok(())
    }
}

register_module!("Flaky", "fails every second frame", Flaky);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const AB_TABLE: &str = "\
YUYV 640 480 30.0 YUYV 640 480 30.0 PassThrough
NONE 0 0 0.0 YUYV 320 240 15.0 FrameStats *
";

fn config_with(serlog: &str, serout: &str) -> EngineConfig {
    EngineConfig {
        serlog: serlog.to_string(),
        serout: serout.to_string(),
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn command_scenario_switches_mapping_and_rejects_out_of_range() {
    let table = MappingTable::parse(AB_TABLE).unwrap();
    let (camera, cam_log) = MockInput::new(4);
    let (gadget, out_log) = MockOutput::new(4);
    let (chan, script) = MockChannel::new(
        ChannelKind::Stdio,
        &[
            "setmapping2 YUYV 640 480 30.0",
            "listmappings",
            "setmapping 99",
            "quit",
        ],
    );

    let engine = Engine::new(
        &config_with("None", "None"),
        table,
        Box::new(camera),
        Some(Box::new(gadget)),
    )
    .unwrap();
    engine.register_channel(Box::new(chan)).unwrap();

    // Starting state: the default (serial-only) mapping A, streaming.
    let default_idx = engine.mappings().default_index();
    engine.set_format(default_idx).unwrap();
    assert_eq!(engine.current_mapping().unwrap().module, "FrameStats");
    engine.stream_on().unwrap();

    engine.main_loop().unwrap();

    let out = script.lock().unwrap().outgoing.clone();
    // The deferred setmapping2 resolved with a positive acknowledgement.
    assert!(out.iter().any(|l| l == "OK"), "no OK ack in {out:?}");
    // listmappings (issued after the switch) shows B as current.
    let current_line = out
        .iter()
        .find(|l| l.ends_with("[current]"))
        .expect("listmappings must mark the current mapping");
    assert!(current_line.contains("YUYV 640 480 30"), "{current_line}");
    assert!(current_line.contains("PassThrough"), "{current_line}");
    // The out-of-range setmapping failed with NotFound and left B active.
    assert!(
        out.iter().any(|l| l.starts_with("ERR Not found")),
        "no NotFound reply in {out:?}"
    );
    assert_eq!(engine.current_mapping().unwrap().module, "PassThrough");

    // Streaming survived the switch and frames flowed through to the
    // output until quit stopped everything.
    assert!(out_log.lock().unwrap().released >= 1);
    assert!(!engine.is_streaming());
    assert!(!engine.is_running());
    // Every reserved buffer went back to its driver.
    let cam = cam_log.lock().unwrap();
    assert_eq!(cam.reserved, cam.released);
}

#[test]
fn module_slot_never_holds_two_instances() {
    let table = MappingTable::parse(
        "YUYV 640 480 30.0 YUYV 640 480 30.0 CountedA\n\
         YUYV 320 240 30.0 YUYV 320 240 30.0 CountedB\n\
         GREY 640 480 15.0 YUYV 640 480 15.0 FailInit\n",
    )
    .unwrap();
    let (camera, _cam_log) = MockInput::new(4);
    let (gadget, _out_log) = MockOutput::new(4);
    let engine = Engine::new(
        &config_with("None", "None"),
        table,
        Box::new(camera),
        Some(Box::new(gadget)),
    )
    .unwrap();

    for &(idx, name) in &[(0usize, "CountedA"), (1, "CountedB"), (0, "CountedA")] {
        engine.set_format(idx).unwrap();
        assert_eq!(COUNTED_ACTIVE.load(Ordering::SeqCst), 1);
        assert_eq!(engine.current_mapping().unwrap().module, name);
    }

    // A failing load leaves the slot empty, not stale.
    let err = engine.set_format(2).unwrap_err();
    assert!(matches!(err, VisorError::ModuleLoad(_)));
    assert_eq!(COUNTED_ACTIVE.load(Ordering::SeqCst), 0);

    // And the engine recovers on the next valid switch.
    engine.set_format(1).unwrap();
    assert_eq!(COUNTED_ACTIVE.load(Ordering::SeqCst), 1);
    assert_eq!(engine.current_mapping().unwrap().module, "CountedB");
}

#[test]
fn stream_transitions_are_idempotent() {
    let table = MappingTable::parse(AB_TABLE).unwrap();
    let (camera, cam_log) = MockInput::new(4);
    let (gadget, _out_log) = MockOutput::new(4);
    let engine = Engine::new(
        &config_with("None", "None"),
        table,
        Box::new(camera),
        Some(Box::new(gadget)),
    )
    .unwrap();
    engine.set_format(0).unwrap();

    // streamoff before any streamon is a no-op at the driver.
    engine.stream_off().unwrap();
    assert_eq!(cam_log.lock().unwrap().stream_off_calls, 0);

    engine.stream_on().unwrap();
    engine.stream_on().unwrap();
    assert!(engine.is_streaming());
    assert_eq!(cam_log.lock().unwrap().stream_on_calls, 1);

    engine.stream_off().unwrap();
    engine.stream_off().unwrap();
    assert!(!engine.is_streaming());
    assert_eq!(cam_log.lock().unwrap().stream_off_calls, 1);
}

#[test]
fn set_format_while_streaming_resumes_with_new_configuration() {
    let table = MappingTable::parse(
        "YUYV 640 480 30.0 YUYV 640 480 30.0 PassThrough\n\
         YUYV 320 240 30.0 YUYV 320 240 30.0 PassThrough\n",
    )
    .unwrap();
    let (camera, cam_log) = MockInput::new(4);
    let (gadget, out_log) = MockOutput::new(4);
    let engine = Engine::new(
        &config_with("None", "None"),
        table,
        Box::new(camera),
        Some(Box::new(gadget)),
    )
    .unwrap();

    engine.set_format(0).unwrap();
    engine.stream_on().unwrap();
    engine.set_format(1).unwrap();

    assert!(engine.is_streaming());
    let cam = cam_log.lock().unwrap();
    assert_eq!(cam.stream_off_calls, 1);
    assert_eq!(cam.stream_on_calls, 2);
    // The drivers were reconfigured to the new mapping's geometry.
    assert!(cam.reconfigures.last().unwrap().contains("320 240"));
    assert!(out_log
        .lock()
        .unwrap()
        .reconfigures
        .last()
        .unwrap()
        .contains("320 240"));
}

#[test]
fn setpar_roundtrip_over_a_channel() {
    let table = MappingTable::parse(AB_TABLE).unwrap();
    let (camera, _cam_log) = MockInput::new(4);
    let (gadget, _out_log) = MockOutput::new(4);
    let (chan, script) = MockChannel::new(
        ChannelKind::Stdio,
        &[
            "setpar serout All",
            "getpar serout",
            "setpar serout sideways",
            "getpar nosuchpar",
            "quit",
        ],
    );
    let engine = Engine::new(
        &config_with("None", "None"),
        table,
        Box::new(camera),
        Some(Box::new(gadget)),
    )
    .unwrap();
    engine.register_channel(Box::new(chan)).unwrap();
    engine.main_loop().unwrap();

    let out = script.lock().unwrap().outgoing.clone();
    assert_eq!(out[0], "OK");
    assert_eq!(out[1], "serout All");
    assert_eq!(out[2], "OK");
    assert!(out[3].starts_with("ERR Invalid value"), "{}", out[3]);
    assert!(out[4].starts_with("ERR Unknown parameter"), "{}", out[4]);
    assert_eq!(out[5], "OK"); // quit
}

#[test]
fn module_failure_is_confined_to_its_iteration() {
    let table =
        MappingTable::parse("YUYV 64 48 30.0 YUYV 64 48 30.0 Flaky\n").unwrap();
    let (camera, cam_log) = MockInput::new(4);
    let (gadget, _out_log) = MockOutput::new(4);
    // Six pings keep the loop alive for six iterations before quit.
    let (chan, script) = MockChannel::new(
        ChannelKind::Stdio,
        &["ping", "ping", "ping", "ping", "ping", "ping", "quit"],
    );
    let engine = Engine::new(
        &config_with("All", "None"),
        table,
        Box::new(camera),
        Some(Box::new(gadget)),
    )
    .unwrap();
    engine.register_channel(Box::new(chan)).unwrap();
    engine.set_format(0).unwrap();
    engine.stream_on().unwrap();

    let before = FLAKY_INVOCATIONS.load(Ordering::SeqCst);
    engine.main_loop().unwrap();
    let invocations = FLAKY_INVOCATIONS.load(Ordering::SeqCst) - before;

    // The module kept being invoked after each failure.
    assert!(invocations >= 6, "only {invocations} invocations");
    let out = script.lock().unwrap().outgoing.clone();
    let failures = out.iter().filter(|l| l.starts_with("ERR Module")).count();
    assert!(failures >= 2, "expected failure reports, got {out:?}");
    // No buffer leaked across the failing iterations.
    let cam = cam_log.lock().unwrap();
    assert_eq!(cam.reserved, cam.released);
}

#[test]
fn startup_script_runs_before_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("initscript.cfg");
    std::fs::write(&script_path, "# boot config\nsetpar serout All\nstreamon\n").unwrap();

    let table = MappingTable::parse(AB_TABLE).unwrap();
    let (camera, cam_log) = MockInput::new(4);
    let (gadget, _out_log) = MockOutput::new(4);
    let engine = Engine::new(
        &config_with("None", "None"),
        table,
        Box::new(camera),
        Some(Box::new(gadget)),
    )
    .unwrap();
    engine.set_format(0).unwrap();

    engine.run_script(&script_path, false).unwrap();
    assert_eq!(engine.get_param("serout").unwrap(), "All");
    assert!(engine.is_streaming());
    assert_eq!(cam_log.lock().unwrap().stream_on_calls, 1);

    // Missing script: forgiving by default, an error in strict mode.
    let missing = dir.path().join("absent.cfg");
    engine.run_script(&missing, false).unwrap();
    assert!(matches!(
        engine.run_script(&missing, true),
        Err(VisorError::NotFound(_))
    ));
}
