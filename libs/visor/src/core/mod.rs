// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod mapping;
pub mod module;
pub mod modules;
pub mod params;
pub mod serial;
pub mod sinks;
pub mod sources;
pub mod video;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Result, VisorError};
pub use frame::{InputFrame, OutputFrame};
pub use mapping::{MappingTable, PixelFormat, VideoMapping};
pub use module::{LoadedModule, ModuleContext, ModuleFactory, ModuleLoader, VisionModule};
pub use params::{ParamOwner, ParamSet};
pub use serial::{ChannelKind, SerPort, StdioChannel, TextChannel};
pub use video::{BufferToken, RawImage, VideoInput, VideoOutput};
