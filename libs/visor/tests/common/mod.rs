// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Scripted mock drivers and channels shared by the engine integration
//! tests. Observation happens through `Arc<Mutex<..>>` logs because the
//! engine takes ownership of its drivers and channels.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use visor::{
    BufferToken, ChannelKind, PixelFormat, RawImage, Result, TextChannel, VideoInput, VideoMapping,
    VideoOutput, VisorError,
};

/// What a mock driver has been asked to do so far.
#[derive(Debug, Default)]
pub struct DriverLog {
    pub reconfigures: Vec<String>,
    pub stream_on_calls: usize,
    pub stream_off_calls: usize,
    pub reserved: usize,
    pub released: usize,
}

/// Instant-frame capture driver.
pub struct MockInput {
    log: Arc<Mutex<DriverLog>>,
    nbufs: usize,
    inflight: usize,
    streaming: bool,
    fmt: PixelFormat,
    width: u32,
    height: u32,
    fps: f32,
    seq: u64,
}

impl MockInput {
    pub fn new(nbufs: usize) -> (Self, Arc<Mutex<DriverLog>>) {
        let log = Arc::new(Mutex::new(DriverLog::default()));
        (
            Self {
                log: Arc::clone(&log),
                nbufs,
                inflight: 0,
                streaming: false,
                fmt: PixelFormat::None,
                width: 0,
                height: 0,
                fps: 0.0,
                seq: 0,
            },
            log,
        )
    }
}

impl VideoInput for MockInput {
    fn reconfigure(&mut self, mapping: &VideoMapping) -> Result<()> {
        self.fmt = mapping.cfmt;
        self.width = mapping.cw;
        self.height = mapping.ch;
        self.fps = mapping.cfps;
        self.log.lock().unwrap().reconfigures.push(mapping.to_string());
        Ok(())
    }

    fn reserve(&mut self) -> Result<BufferToken> {
        if !self.streaming || self.inflight >= self.nbufs {
            return Err(VisorError::NoBufferAvailable("mock input".to_string()));
        }
        self.inflight += 1;
        self.log.lock().unwrap().reserved += 1;
        Ok(BufferToken::new(self.inflight))
    }

    fn wait_ready(&mut self, _token: &BufferToken) -> Result<RawImage> {
        self.seq += 1;
        let mut img = RawImage::new(self.fmt, self.width, self.height, self.fps);
        img.seq = self.seq;
        Ok(img)
    }

    fn recycle(&mut self, _token: BufferToken, _image: Option<RawImage>) -> Result<()> {
        self.inflight -= 1;
        self.log.lock().unwrap().released += 1;
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.streaming = true;
        self.log.lock().unwrap().stream_on_calls += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.streaming = false;
        self.log.lock().unwrap().stream_off_calls += 1;
        Ok(())
    }
}

/// Instant-slot output driver.
pub struct MockOutput {
    log: Arc<Mutex<DriverLog>>,
    nbufs: usize,
    inflight: usize,
    fmt: PixelFormat,
    width: u32,
    height: u32,
    fps: f32,
}

impl MockOutput {
    pub fn new(nbufs: usize) -> (Self, Arc<Mutex<DriverLog>>) {
        let log = Arc::new(Mutex::new(DriverLog::default()));
        (
            Self {
                log: Arc::clone(&log),
                nbufs,
                inflight: 0,
                fmt: PixelFormat::None,
                width: 0,
                height: 0,
                fps: 0.0,
            },
            log,
        )
    }
}

impl VideoOutput for MockOutput {
    fn reconfigure(&mut self, mapping: &VideoMapping) -> Result<()> {
        self.fmt = mapping.ofmt;
        self.width = mapping.ow;
        self.height = mapping.oh;
        self.fps = mapping.ofps;
        self.log.lock().unwrap().reconfigures.push(mapping.to_string());
        Ok(())
    }

    fn reserve(&mut self) -> Result<BufferToken> {
        if self.inflight >= self.nbufs {
            return Err(VisorError::NoBufferAvailable("mock output".to_string()));
        }
        self.inflight += 1;
        self.log.lock().unwrap().reserved += 1;
        Ok(BufferToken::new(self.inflight))
    }

    fn wait_ready(&mut self, _token: &BufferToken) -> Result<RawImage> {
        Ok(RawImage::new(self.fmt, self.width, self.height, self.fps))
    }

    fn submit(&mut self, _token: BufferToken, _image: Option<RawImage>) -> Result<()> {
        self.inflight -= 1;
        self.log.lock().unwrap().released += 1;
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.log.lock().unwrap().stream_on_calls += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.log.lock().unwrap().stream_off_calls += 1;
        Ok(())
    }
}

/// Pre-scripted command channel: feed `incoming` before the loop starts,
/// read `outgoing` after it exits.
#[derive(Debug, Default)]
pub struct ChannelScript {
    pub incoming: VecDeque<String>,
    pub outgoing: Vec<String>,
}

pub struct MockChannel {
    kind: ChannelKind,
    script: Arc<Mutex<ChannelScript>>,
}

impl MockChannel {
    pub fn new(kind: ChannelKind, lines: &[&str]) -> (Self, Arc<Mutex<ChannelScript>>) {
        let script = Arc::new(Mutex::new(ChannelScript {
            incoming: lines.iter().map(|s| s.to_string()).collect(),
            outgoing: Vec::new(),
        }));
        (
            Self {
                kind,
                script: Arc::clone(&script),
            },
            script,
        )
    }
}

impl TextChannel for MockChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn try_read_line(&mut self) -> Option<String> {
        self.script.lock().unwrap().incoming.pop_front()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.script.lock().unwrap().outgoing.push(line.to_string());
        Ok(())
    }
}
