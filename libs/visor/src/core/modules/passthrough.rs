// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::error::{Result, VisorError};
use crate::core::frame::{InputFrame, OutputFrame};
use crate::core::module::{ModuleContext, VisionModule};
use crate::register_module;

/// Copies camera frames to the output untouched. The simplest possible
/// streamed module, and the one every mapping file ships with.
#[derive(Default)]
pub struct PassThrough;

impl VisionModule for PassThrough {
    fn process(
        &mut self,
        mut inframe: InputFrame<'_>,
        mut outframe: OutputFrame<'_>,
        _ctx: &mut ModuleContext<'_>,
    ) -> Result<()> {
        let src = inframe.get()?;
        let seq = src.seq;
        let timestamp_us = src.timestamp_us;

        let dst = outframe.get()?;
        if dst.fmt != src.fmt || dst.width != src.width || dst.height != src.height {
            return Err(VisorError::Other(anyhow::anyhow!(
                "PassThrough needs matching capture and output geometry, got {} {}x{} -> {} {}x{}",
                src.fmt,
                src.width,
                src.height,
                dst.fmt,
                dst.width,
                dst.height
            )));
        }
        dst.pixels.copy_from_slice(&src.pixels);
        dst.seq = seq;
        dst.timestamp_us = timestamp_us;
        Ok(())
    }
}

register_module!(
    "PassThrough",
    "Pass the camera frame through to the output unchanged",
    PassThrough
);
