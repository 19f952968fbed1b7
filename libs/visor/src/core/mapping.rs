// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Video mapping table parsed from `videomappings.cfg`.
//!
//! A mapping pairs one camera capture format with one streamed output format
//! and names the module that services it. The table is parsed once at engine
//! construction and is immutable afterwards; every malformed record is fatal
//! at that point rather than degraded around.

use crate::core::error::{Result, VisorError};
use std::fmt;
use std::path::Path;

/// Pixel formats understood by the capture and output drivers.
///
/// `None` is only legal on the output side and marks a mapping with no
/// streamed video output (module results go out over serial instead).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Yuyv,
    Bayer,
    Rgb565,
    Mjpg,
    Grey,
    #[default]
    None,
}

impl PixelFormat {
    /// Parse a mapping-file token.
    pub fn from_token(tok: &str) -> Result<Self> {
        match tok {
            "YUYV" => Ok(Self::Yuyv),
            "BAYER" => Ok(Self::Bayer),
            "RGB565" => Ok(Self::Rgb565),
            "MJPG" => Ok(Self::Mjpg),
            "GREY" => Ok(Self::Grey),
            "NONE" => Ok(Self::None),
            _ => Err(VisorError::ConfigParse(format!(
                "Unknown pixel format '{tok}'"
            ))),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Yuyv => "YUYV",
            Self::Bayer => "BAYER",
            Self::Rgb565 => "RGB565",
            Self::Mjpg => "MJPG",
            Self::Grey => "GREY",
            Self::None => "NONE",
        }
    }

    /// Bytes per pixel in a driver buffer. MJPG buffers are sized for the
    /// worst case of the compressor, which the drivers bound at 2 bytes/pix.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Yuyv | Self::Rgb565 | Self::Mjpg => 2,
            Self::Bayer | Self::Grey => 1,
            Self::None => 0,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Convert a frame rate to a UVC frame interval (100 ns units).
pub fn fps_to_uvc_interval(fps: f32) -> u32 {
    if fps <= 0.0 {
        0
    } else {
        (10_000_000.0 / fps) as u32
    }
}

/// Convert a UVC frame interval (100 ns units) back to a frame rate.
pub fn uvc_interval_to_fps(interval: u32) -> f32 {
    if interval == 0 {
        0.0
    } else {
        10_000_000.0 / interval as f32
    }
}

/// One capture/output/module pairing.
///
/// Uniquely identified outward by its (output format, width, height, fps)
/// tuple and inward by UVC (format index, frame index, interval) as reported
/// by the output driver's capability enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMapping {
    pub ofmt: PixelFormat,
    pub ow: u32,
    pub oh: u32,
    pub ofps: f32,
    pub cfmt: PixelFormat,
    pub cw: u32,
    pub ch: u32,
    pub cfps: f32,
    pub module: String,
}

impl VideoMapping {
    /// True when this mapping streams video frames out (vs. serial-only).
    pub fn has_streamed_output(&self) -> bool {
        self.ofmt != PixelFormat::None && self.ofps > 0.0
    }

    /// Output buffer size in bytes.
    pub fn osize(&self) -> usize {
        self.ofmt.bytes_per_pixel() * (self.ow as usize) * (self.oh as usize)
    }

    /// Capture buffer size in bytes.
    pub fn csize(&self) -> usize {
        self.cfmt.bytes_per_pixel() * (self.cw as usize) * (self.ch as usize)
    }

    /// UVC frame interval of the output side, in 100 ns units.
    pub fn uvc_interval(&self) -> u32 {
        fps_to_uvc_interval(self.ofps)
    }

    fn matches_output(&self, ofmt: PixelFormat, ow: u32, oh: u32, ofps: f32) -> bool {
        self.ofmt == ofmt && self.ow == ow && self.oh == oh && (self.ofps - ofps).abs() < 0.1
    }
}

impl fmt::Display for VideoMapping {
    /// Renders the mapping-file line form (without the default marker).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.ofmt, self.ow, self.oh, self.ofps, self.cfmt, self.cw, self.ch, self.cfps,
            self.module
        )
    }
}

/// The full, immutable mapping table plus its designated default entry.
#[derive(Debug)]
pub struct MappingTable {
    mappings: Vec<VideoMapping>,
    default_idx: usize,
}

impl MappingTable {
    /// Parse a mapping table from file contents.
    ///
    /// Record form, one per line:
    /// `OUTFMT OW OH OFPS CAMFMT CW CH CFPS ModuleName [*]`
    /// `#` starts a comment. A trailing `*` flags the default mapping.
    ///
    /// The table is sorted the way the output driver enumerates it: grouped
    /// by output format in first-appearance order, resolution descending,
    /// then fps descending, with serial-only (NONE) mappings last.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut mappings = Vec::new();
        let mut default_flagged: Option<usize> = None;

        for (lineno, raw) in contents.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let mut toks = line.split_whitespace().collect::<Vec<_>>();
            let is_default = toks.last() == Some(&"*");
            if is_default {
                toks.pop();
            }
            if toks.len() != 9 {
                return Err(VisorError::ConfigParse(format!(
                    "Line {}: expected 9 fields, got {}",
                    lineno + 1,
                    toks.len()
                )));
            }

            let parse_dim = |tok: &str, what: &str| -> Result<u32> {
                tok.parse().map_err(|_| {
                    VisorError::ConfigParse(format!("Line {}: bad {what} '{tok}'", lineno + 1))
                })
            };
            let parse_fps = |tok: &str, what: &str| -> Result<f32> {
                tok.parse().map_err(|_| {
                    VisorError::ConfigParse(format!("Line {}: bad {what} '{tok}'", lineno + 1))
                })
            };

            let m = VideoMapping {
                ofmt: PixelFormat::from_token(toks[0])?,
                ow: parse_dim(toks[1], "output width")?,
                oh: parse_dim(toks[2], "output height")?,
                ofps: parse_fps(toks[3], "output fps")?,
                cfmt: PixelFormat::from_token(toks[4])?,
                cw: parse_dim(toks[5], "capture width")?,
                ch: parse_dim(toks[6], "capture height")?,
                cfps: parse_fps(toks[7], "capture fps")?,
                module: toks[8].to_string(),
            };
            if m.cfmt == PixelFormat::None {
                return Err(VisorError::ConfigParse(format!(
                    "Line {}: capture format cannot be NONE",
                    lineno + 1
                )));
            }

            if is_default {
                default_flagged = default_flagged.or(Some(mappings.len()));
            }
            mappings.push(m);
        }

        if mappings.is_empty() {
            return Err(VisorError::ConfigParse(
                "No video mappings defined".to_string(),
            ));
        }

        Self::sort_with_default(mappings, default_flagged)
    }

    fn sort_with_default(
        mut mappings: Vec<VideoMapping>,
        default_flagged: Option<usize>,
    ) -> Result<Self> {
        // Remember which entry was flagged across the sort.
        let flagged = default_flagged.map(|i| mappings[i].clone());

        let format_rank = |fmt: PixelFormat, table: &[VideoMapping]| -> usize {
            table
                .iter()
                .position(|m| m.ofmt == fmt)
                .unwrap_or(usize::MAX)
        };
        let original = mappings.clone();
        mappings.sort_by(|a, b| {
            let a_none = !a.has_streamed_output();
            let b_none = !b.has_streamed_output();
            a_none
                .cmp(&b_none)
                .then_with(|| format_rank(a.ofmt, &original).cmp(&format_rank(b.ofmt, &original)))
                .then_with(|| (b.ow * b.oh).cmp(&(a.ow * a.oh)))
                .then_with(|| b.ofps.partial_cmp(&a.ofps).unwrap_or(std::cmp::Ordering::Equal))
        });

        // Duplicate output tuples would make host-side format selection
        // ambiguous, so they are fatal.
        for (i, m) in mappings.iter().enumerate() {
            if !m.has_streamed_output() {
                continue;
            }
            if mappings[i + 1..]
                .iter()
                .any(|o| o.matches_output(m.ofmt, m.ow, m.oh, m.ofps))
            {
                return Err(VisorError::ConfigParse(format!(
                    "Duplicate output tuple in mappings: {m}"
                )));
            }
        }

        let default_idx = match flagged {
            Some(target) => mappings.iter().position(|m| *m == target).unwrap_or(0),
            None => mappings
                .iter()
                .position(|m| m.has_streamed_output())
                .unwrap_or(0),
        };

        tracing::info!(
            "Loaded {} video mappings (default: {})",
            mappings.len(),
            mappings[default_idx]
        );
        Ok(Self {
            mappings,
            default_idx,
        })
    }

    /// Parse the table from a file. A missing or unreadable file is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VisorError::ConfigParse(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn get(&self, idx: usize) -> Result<&VideoMapping> {
        self.mappings
            .get(idx)
            .ok_or_else(|| VisorError::NotFound(format!("No video mapping with index {idx}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VideoMapping> {
        self.mappings.iter()
    }

    pub fn default_index(&self) -> usize {
        self.default_idx
    }

    pub fn default_mapping(&self) -> &VideoMapping {
        &self.mappings[self.default_idx]
    }

    /// Find the mapping with the given output specs (host-side request).
    pub fn find(&self, ofmt: PixelFormat, ow: u32, oh: u32, ofps: f32) -> Result<&VideoMapping> {
        self.mappings
            .iter()
            .find(|m| m.has_streamed_output() && m.matches_output(ofmt, ow, oh, ofps))
            .ok_or_else(|| {
                VisorError::NotFound(format!(
                    "No video mapping with output {ofmt} {ow}x{oh} @ {ofps} fps"
                ))
            })
    }

    /// Reverse lookup by the identifiers the output driver reports when it
    /// enumerates capabilities: 1-based format index, 1-based frame-size
    /// index within that format, and frame interval in 100 ns units.
    pub fn index_for_uvc(&self, format_index: u32, frame_index: u32, interval: u32) -> Result<usize> {
        let fps = uvc_interval_to_fps(interval);

        let mut formats: Vec<PixelFormat> = Vec::new();
        for m in self.mappings.iter().filter(|m| m.has_streamed_output()) {
            if !formats.contains(&m.ofmt) {
                formats.push(m.ofmt);
            }
        }
        let fmt = *formats
            .get(format_index.wrapping_sub(1) as usize)
            .ok_or_else(|| {
                VisorError::NotFound(format!("No output format with UVC index {format_index}"))
            })?;

        let mut sizes: Vec<(u32, u32)> = Vec::new();
        for m in self.mappings.iter().filter(|m| m.ofmt == fmt) {
            if !sizes.contains(&(m.ow, m.oh)) {
                sizes.push((m.ow, m.oh));
            }
        }
        let (w, h) = *sizes
            .get(frame_index.wrapping_sub(1) as usize)
            .ok_or_else(|| {
                VisorError::NotFound(format!(
                    "No frame size with UVC index {frame_index} for format {fmt}"
                ))
            })?;

        self.mappings
            .iter()
            .position(|m| m.matches_output(fmt, w, h, fps))
            .ok_or_else(|| {
                VisorError::NotFound(format!(
                    "No video mapping for {fmt} {w}x{h} with interval {interval}"
                ))
            })
    }
}
