// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Synthetic test-pattern capture driver.

use crate::core::error::{Result, VisorError};
use crate::core::mapping::{PixelFormat, VideoMapping};
use crate::core::video::{BufferToken, RawImage, VideoInput};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Generates a scrolling gradient at the mapping's capture rate.
///
/// The buffer queue mimics a mmap'd capture driver: a fixed ring of slots,
/// `reserve` takes the next free one, `wait_ready` blocks until the frame
/// deadline (the synthetic stand-in for capture completion) and fills the
/// slot, `recycle` returns the slot to the ring.
pub struct PatternInput {
    nbufs: usize,
    fmt: PixelFormat,
    width: u32,
    height: u32,
    fps: f32,
    streaming: bool,
    slots: Vec<Option<Vec<u8>>>,
    free: VecDeque<usize>,
    seq: u64,
    epoch: Instant,
    next_deadline: Instant,
}

impl PatternInput {
    pub fn new(nbufs: usize) -> Self {
        let now = Instant::now();
        Self {
            nbufs: nbufs.max(1),
            fmt: PixelFormat::None,
            width: 0,
            height: 0,
            fps: 0.0,
            streaming: false,
            slots: Vec::new(),
            free: VecDeque::new(),
            seq: 0,
            epoch: now,
            next_deadline: now,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps as f64)
        } else {
            Duration::from_millis(33)
        }
    }

    fn paint(&self, pixels: &mut [u8], seq: u64) {
        let shift = (seq % 256) as usize;
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i + shift) % 256) as u8;
        }
    }
}

impl VideoInput for PatternInput {
    fn reconfigure(&mut self, mapping: &VideoMapping) -> Result<()> {
        self.fmt = mapping.cfmt;
        self.width = mapping.cw;
        self.height = mapping.ch;
        self.fps = mapping.cfps;
        let size = mapping.csize();
        self.slots = (0..self.nbufs).map(|_| Some(vec![0u8; size])).collect();
        self.free = (0..self.nbufs).collect();
        self.seq = 0;
        tracing::debug!(
            "Pattern input configured: {} {}x{} @ {} fps, {} buffers",
            self.fmt,
            self.width,
            self.height,
            self.fps,
            self.nbufs
        );
        Ok(())
    }

    fn reserve(&mut self) -> Result<BufferToken> {
        if !self.streaming {
            return Err(VisorError::NoBufferAvailable(
                "Pattern input is not streaming".to_string(),
            ));
        }
        let idx = self.free.pop_front().ok_or_else(|| {
            VisorError::NoBufferAvailable("All capture slots are in flight".to_string())
        })?;
        Ok(BufferToken::new(idx))
    }

    fn wait_ready(&mut self, token: &BufferToken) -> Result<RawImage> {
        // Pace to the configured frame rate: this is the capture-completion
        // wait of a real sensor.
        let now = Instant::now();
        if self.next_deadline > now {
            std::thread::sleep(self.next_deadline - now);
        }
        self.next_deadline = Instant::now() + self.frame_interval();

        let mut pixels = self.slots[token.index()].take().ok_or_else(|| {
            VisorError::Driver(format!("Capture slot {} already handed out", token.index()))
        })?;
        self.seq += 1;
        self.paint(&mut pixels, self.seq);

        Ok(RawImage {
            fmt: self.fmt,
            width: self.width,
            height: self.height,
            fps: self.fps,
            seq: self.seq,
            timestamp_us: self.epoch.elapsed().as_micros() as u64,
            pixels,
        })
    }

    fn recycle(&mut self, token: BufferToken, image: Option<RawImage>) -> Result<()> {
        let idx = token.index();
        if idx >= self.slots.len() {
            return Err(VisorError::Driver(format!("No capture slot {idx}")));
        }
        if self.slots[idx].is_none() {
            self.slots[idx] = Some(match image {
                Some(img) => img.pixels,
                None => vec![0u8; self.fmt.bytes_per_pixel() * (self.width * self.height) as usize],
            });
        }
        self.free.push_back(idx);
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.streaming = true;
        self.next_deadline = Instant::now();
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.streaming = false;
        Ok(())
    }
}
