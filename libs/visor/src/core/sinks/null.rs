// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::error::{Result, VisorError};
use crate::core::mapping::{PixelFormat, VideoMapping};
use crate::core::video::{BufferToken, RawImage, VideoOutput};
use std::collections::VecDeque;

/// Output driver that throws every frame away.
pub struct NullOutput {
    nbufs: usize,
    fmt: PixelFormat,
    width: u32,
    height: u32,
    fps: f32,
    slots: Vec<Option<Vec<u8>>>,
    free: VecDeque<usize>,
    submitted: u64,
}

impl NullOutput {
    pub fn new(nbufs: usize) -> Self {
        Self {
            nbufs: nbufs.max(1),
            fmt: PixelFormat::None,
            width: 0,
            height: 0,
            fps: 0.0,
            slots: Vec::new(),
            free: VecDeque::new(),
            submitted: 0,
        }
    }

    /// Frames accepted since the last reconfigure.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl VideoOutput for NullOutput {
    fn reconfigure(&mut self, mapping: &VideoMapping) -> Result<()> {
        self.fmt = mapping.ofmt;
        self.width = mapping.ow;
        self.height = mapping.oh;
        self.fps = mapping.ofps;
        let size = mapping.osize();
        self.slots = (0..self.nbufs).map(|_| Some(vec![0u8; size])).collect();
        self.free = (0..self.nbufs).collect();
        self.submitted = 0;
        Ok(())
    }

    fn reserve(&mut self) -> Result<BufferToken> {
        let idx = self.free.pop_front().ok_or_else(|| {
            VisorError::NoBufferAvailable("All output slots are in flight".to_string())
        })?;
        Ok(BufferToken::new(idx))
    }

    fn wait_ready(&mut self, token: &BufferToken) -> Result<RawImage> {
        // Nothing transmits, so a slot is writable the moment it is free.
        let pixels = self.slots[token.index()].take().ok_or_else(|| {
            VisorError::Driver(format!("Output slot {} already handed out", token.index()))
        })?;
        Ok(RawImage {
            fmt: self.fmt,
            width: self.width,
            height: self.height,
            fps: self.fps,
            seq: 0,
            timestamp_us: 0,
            pixels,
        })
    }

    fn submit(&mut self, token: BufferToken, image: Option<RawImage>) -> Result<()> {
        let idx = token.index();
        if idx >= self.slots.len() {
            return Err(VisorError::Driver(format!("No output slot {idx}")));
        }
        if self.slots[idx].is_none() {
            self.slots[idx] = Some(match image {
                Some(img) => img.pixels,
                None => vec![0u8; self.fmt.bytes_per_pixel() * (self.width * self.height) as usize],
            });
        }
        self.free.push_back(idx);
        self.submitted += 1;
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        Ok(())
    }
}
