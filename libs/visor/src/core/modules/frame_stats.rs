// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::error::{Result, VisorError};
use crate::core::frame::InputFrame;
use crate::core::module::{ModuleContext, VisionModule};
use crate::core::params::{ParamOwner, ParamSet};
use crate::core::serial::TextChannel;
use crate::register_module;

/// Serial-only module that reports per-frame statistics.
///
/// Useful on mappings with no streamed output (e.g. an Arduino hanging off
/// the hardware serial port): every `statsinterval`-th frame produces one
/// `STATS seq=<n> mean=<v>` line over the serout fan-out.
#[derive(Default)]
pub struct FrameStats {
    frames_seen: u64,
}

impl FrameStats {
    const INTERVAL_PARAM: &'static str = "statsinterval";
}

impl VisionModule for FrameStats {
    fn init(&mut self, params: &mut ParamSet) -> Result<()> {
        params.register_with_callback(
            Self::INTERVAL_PARAM,
            "30",
            "Emit a STATS line every N frames",
            ParamOwner::Module,
            Some(Box::new(|_name, _old, new| {
                match new.parse::<u64>() {
                    Ok(n) if n > 0 => Ok(()),
                    _ => Err(VisorError::InvalidValue(format!(
                        "'{new}' is not a positive frame count"
                    ))),
                }
            })),
        )
    }

    fn process_no_usb(
        &mut self,
        mut inframe: InputFrame<'_>,
        ctx: &mut ModuleContext<'_>,
    ) -> Result<()> {
        let interval: u64 = ctx.params().get_parsed(Self::INTERVAL_PARAM)?;

        let img = inframe.get()?;
        self.frames_seen += 1;
        if self.frames_seen % interval != 0 {
            return Ok(());
        }

        // Subsampled mean is plenty for a health line.
        let step = (img.pixels.len() / 1024).max(1);
        let mut sum = 0u64;
        let mut n = 0u64;
        let mut i = 0;
        while i < img.pixels.len() {
            sum += img.pixels[i] as u64;
            n += 1;
            i += step;
        }
        let mean = if n == 0 { 0 } else { sum / n };
        let line = format!("STATS seq={} mean={mean}", img.seq);
        // Recycle the capture buffer before talking to the serial ports.
        inframe.done()?;
        ctx.send_serial(&line);
        Ok(())
    }

    fn parse_serial(&mut self, line: &str, chan: &mut dyn TextChannel) -> Result<()> {
        match line {
            "statsreset" => {
                self.frames_seen = 0;
                chan.write_line("frame counter zeroed")?;
                Ok(())
            }
            _ => Err(VisorError::UnknownCommand(line.to_string())),
        }
    }

    fn supported_commands(&self) -> Option<&'static str> {
        Some("statsreset - zero the running frame counter")
    }
}

register_module!(
    "FrameStats",
    "Report per-frame pixel statistics over serial",
    FrameStats
);
