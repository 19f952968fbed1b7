// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::error::{Result, VisorError};
use crate::core::mapping::{PixelFormat, VideoMapping};
use crate::core::video::{BufferToken, RawImage, VideoOutput};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Output driver that appends raw frames to a per-session file.
///
/// Each stream-on opens `<stem><n>.raw` with the next free session number;
/// every submitted frame's pixels are appended verbatim. Geometry and format
/// come from the mapping, so the file is trivially replayable.
pub struct FileOutput {
    stem: PathBuf,
    nbufs: usize,
    fmt: PixelFormat,
    width: u32,
    height: u32,
    fps: f32,
    slots: Vec<Option<Vec<u8>>>,
    free: VecDeque<usize>,
    writer: Option<BufWriter<File>>,
    session: u32,
}

impl FileOutput {
    pub fn new(stem: impl Into<PathBuf>, nbufs: usize) -> Self {
        Self {
            stem: stem.into(),
            nbufs: nbufs.max(1),
            fmt: PixelFormat::None,
            width: 0,
            height: 0,
            fps: 0.0,
            slots: Vec::new(),
            free: VecDeque::new(),
            writer: None,
            session: 0,
        }
    }

    fn session_path(&self) -> PathBuf {
        let mut name = self.stem.as_os_str().to_os_string();
        name.push(format!("{}.raw", self.session));
        PathBuf::from(name)
    }
}

impl VideoOutput for FileOutput {
    fn reconfigure(&mut self, mapping: &VideoMapping) -> Result<()> {
        self.fmt = mapping.ofmt;
        self.width = mapping.ow;
        self.height = mapping.oh;
        self.fps = mapping.ofps;
        let size = mapping.osize();
        self.slots = (0..self.nbufs).map(|_| Some(vec![0u8; size])).collect();
        self.free = (0..self.nbufs).collect();
        Ok(())
    }

    fn reserve(&mut self) -> Result<BufferToken> {
        let idx = self.free.pop_front().ok_or_else(|| {
            VisorError::NoBufferAvailable("All output slots are in flight".to_string())
        })?;
        Ok(BufferToken::new(idx))
    }

    fn wait_ready(&mut self, token: &BufferToken) -> Result<RawImage> {
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
        let pixels = match image {
            Some(img) => img.pixels,
            None => vec![0u8; self.fmt.bytes_per_pixel() * (self.width * self.height) as usize],
        };
        if let Some(w) = self.writer.as_mut() {
            w.write_all(&pixels)?;
        }
        if self.slots[idx].is_none() {
            self.slots[idx] = Some(pixels);
        }
        self.free.push_back(idx);
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.session += 1;
        let path = self.session_path();
        let file = File::create(&path)?;
        tracing::info!("Recording output frames to {}", path.display());
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
        }
        Ok(())
    }
}
