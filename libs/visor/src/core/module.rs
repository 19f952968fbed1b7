// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The swappable vision-processing unit and its registry.
//!
//! Modules are selected by the identifier carried in a video mapping.
//! Registration is compile-time via [`inventory`]: a crate registers its
//! module with [`register_module!`] and the loader resolves identifiers
//! against the collected factories. Exactly one module instance is live at a
//! time, owned by the engine's module slot as a [`LoadedModule`] that pairs
//! the instance with the factory that produced it.

use crate::core::error::{Result, VisorError};
use crate::core::frame::{InputFrame, OutputFrame};
use crate::core::params::ParamSet;
use crate::core::serial::{fan_out, SerPort, TextChannel};

/// Per-invocation services the engine lends to the module: the serial
/// fan-out for result messages and the parameter set.
pub struct ModuleContext<'a> {
    channels: &'a mut [Box<dyn TextChannel>],
    serout: SerPort,
    params: &'a mut ParamSet,
}

impl<'a> ModuleContext<'a> {
    pub fn new(
        channels: &'a mut [Box<dyn TextChannel>],
        serout: SerPort,
        params: &'a mut ParamSet,
    ) -> Self {
        Self {
            channels,
            serout,
            params,
        }
    }

    /// Emit one module result line over the channels selected by `serout`.
    pub fn send_serial(&mut self, text: &str) {
        fan_out(self.channels, self.serout, text);
    }

    pub fn params(&mut self) -> &mut ParamSet {
        self.params
    }
}

/// The unit of vision-processing logic invoked once per main-loop iteration.
///
/// Implement `process` for mappings that stream video out, `process_no_usb`
/// for serial-only mappings; a module servicing both kinds of mapping
/// implements both. The engine guarantees no concurrent re-entry and no
/// format change while either entry point is running.
pub trait VisionModule: Send {
    /// Called once after construction, before the first invocation. Module
    /// parameters registered here live until the module is unloaded.
    fn init(&mut self, _params: &mut ParamSet) -> Result<()> {
        Ok(())
    }

    /// Called before destruction, after the last invocation.
    fn deinit(&mut self) {}

    /// Process one captured frame and paint one output frame.
    fn process(
        &mut self,
        _inframe: InputFrame<'_>,
        _outframe: OutputFrame<'_>,
        _ctx: &mut ModuleContext<'_>,
    ) -> Result<()> {
        Err(VisorError::Other(anyhow::anyhow!(
            "Module has no video-output entry point"
        )))
    }

    /// Process one captured frame with no streamed output.
    fn process_no_usb(
        &mut self,
        _inframe: InputFrame<'_>,
        _ctx: &mut ModuleContext<'_>,
    ) -> Result<()> {
        Err(VisorError::Other(anyhow::anyhow!(
            "Module has no serial-only entry point"
        )))
    }

    /// Offered every command line the engine did not recognize. Write any
    /// reply payload to `chan`; return `UnknownCommand` to let the engine
    /// report the line as unhandled.
    fn parse_serial(&mut self, line: &str, _chan: &mut dyn TextChannel) -> Result<()> {
        Err(VisorError::UnknownCommand(line.to_string()))
    }

    /// One-line-per-command synopsis for `help`, or `None`.
    fn supported_commands(&self) -> Option<&'static str> {
        None
    }
}

/// Factory record collected by `inventory`.
pub struct ModuleFactory {
    pub name: &'static str,
    pub description: &'static str,
    pub create: fn() -> Box<dyn VisionModule>,
}

inventory::collect!(ModuleFactory);

/// Register a module type (must implement `Default`) under an identifier
/// usable in video mappings.
#[macro_export]
macro_rules! register_module {
    ($name:literal, $descr:literal, $ty:ty) => {
        $crate::inventory::submit! {
            $crate::core::module::ModuleFactory {
                name: $name,
                description: $descr,
                create: || Box::new(<$ty as Default>::default()),
            }
        }
    };
}

/// A live module instance paired with the factory that produced it.
///
/// Field order matters: the instance is destroyed before the factory handle
/// is let go, mirroring the rule that the loader must outlive what it
/// loaded.
pub struct LoadedModule {
    instance: Box<dyn VisionModule>,
    factory: &'static ModuleFactory,
}

impl LoadedModule {
    pub fn name(&self) -> &'static str {
        self.factory.name
    }

    pub fn description(&self) -> &'static str {
        self.factory.description
    }

    pub fn module(&mut self) -> &mut dyn VisionModule {
        self.instance.as_mut()
    }

    pub fn module_ref(&self) -> &dyn VisionModule {
        self.instance.as_ref()
    }
}

/// Resolves module identifiers against the compile-time registry.
pub struct ModuleLoader;

impl ModuleLoader {
    pub fn find(name: &str) -> Option<&'static ModuleFactory> {
        inventory::iter::<ModuleFactory>
            .into_iter()
            .find(|f| f.name == name)
    }

    /// Construct the module registered under `name`. Initialization is the
    /// caller's job (the engine runs `init` under its exclusion lock).
    pub fn load(name: &str) -> Result<LoadedModule> {
        let factory = Self::find(name).ok_or_else(|| {
            VisorError::ModuleLoad(format!("No module registered under '{name}'"))
        })?;
        tracing::info!("Loading module {name}");
        Ok(LoadedModule {
            instance: (factory.create)(),
            factory,
        })
    }

    pub fn list() -> Vec<&'static ModuleFactory> {
        inventory::iter::<ModuleFactory>.into_iter().collect()
    }
}
