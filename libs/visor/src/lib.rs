// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! visor - embedded machine-vision engine.
//!
//! Gets frames from a camera driver, hands them to the user-selected vision
//! module, and sends results out as a video stream and/or text over serial
//! channels, while servicing runtime commands that can swap the module,
//! change the video format, or adjust parameters without stopping the
//! device. See [`core::engine::Engine`] for the orchestration core.

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::too_many_arguments)] // Driver/module plumbing passes many disjoint borrows
#![allow(clippy::collapsible_match)] // Nested matches are clearer in some cases

// Re-export inventory for the register_module! macro
pub use inventory;

pub mod core;

pub use core::{
    BufferToken,
    ChannelKind,
    Engine,
    EngineConfig,
    InputFrame,
    LoadedModule,
    MappingTable,
    ModuleContext,
    ModuleFactory,
    ModuleLoader,
    OutputFrame,
    ParamOwner,
    ParamSet,
    PixelFormat,
    RawImage,
    Result,
    SerPort,
    StdioChannel,
    TextChannel,
    VideoInput,
    VideoMapping,
    VideoOutput,
    VisionModule,
    VisorError,
};
