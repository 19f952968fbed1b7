// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Scoped frame handles over driver buffers.
//!
//! [`InputFrame`] and [`OutputFrame`] are future-like reservation tickets:
//! construction reserves a buffer slot without blocking, the first `get()`
//! blocks until the hardware is done with the slot, and drop gives the slot
//! back to the driver on every exit path. A module that errors out halfway
//! through processing can never leak a buffer or return one twice - the
//! handles are single-owner and non-clonable, and release happens in `Drop`.

use crate::core::error::{Result, VisorError};
use crate::core::video::{BufferToken, RawImage, VideoInput, VideoOutput};

/// Scoped access to the next captured camera frame.
pub struct InputFrame<'a> {
    input: &'a mut dyn VideoInput,
    token: Option<BufferToken>,
    image: Option<RawImage>,
}

impl<'a> InputFrame<'a> {
    /// Reserve the next capture slot. Does not block; fails with
    /// `NoBufferAvailable` when the driver has no slot queued at all.
    pub fn reserve(input: &'a mut dyn VideoInput) -> Result<Self> {
        let token = input.reserve()?;
        Ok(Self {
            input,
            token: Some(token),
            image: None,
        })
    }

    /// Wait for the reserved frame to be captured and return its pixels.
    /// The first call blocks; subsequent calls return the cached image.
    pub fn get(&mut self) -> Result<&RawImage> {
        if self.image.is_none() {
            let token = self
                .token
                .as_ref()
                .ok_or_else(|| VisorError::Driver("Input frame already released".to_string()))?;
            self.image = Some(self.input.wait_ready(token)?);
        }
        Ok(self.image.as_ref().expect("image cached by wait_ready"))
    }

    /// Recycle the buffer ahead of scope exit, e.g. when a module is done
    /// with the pixels but still has output to paint.
    pub fn done(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => self.input.recycle(token, self.image.take()),
            None => Ok(()),
        }
    }
}

impl Drop for InputFrame<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to recycle capture buffer: {e}");
        }
    }
}

/// Scoped access to the next free output frame.
pub struct OutputFrame<'a> {
    output: &'a mut dyn VideoOutput,
    token: Option<BufferToken>,
    image: Option<RawImage>,
}

impl<'a> OutputFrame<'a> {
    /// Reserve the next free output slot. Does not block; fails with
    /// `NoBufferAvailable` when every slot is in flight.
    pub fn reserve(output: &'a mut dyn VideoOutput) -> Result<Self> {
        let token = output.reserve()?;
        Ok(Self {
            output,
            token: Some(token),
            image: None,
        })
    }

    /// Wait for the reserved slot to become writable and return its blank
    /// image for painting. The first call blocks; subsequent calls return
    /// the cached image.
    pub fn get(&mut self) -> Result<&mut RawImage> {
        if self.image.is_none() {
            let token = self
                .token
                .as_ref()
                .ok_or_else(|| VisorError::Driver("Output frame already sent".to_string()))?;
            self.image = Some(self.output.wait_ready(token)?);
        }
        Ok(self.image.as_mut().expect("image cached by wait_ready"))
    }

    /// Submit the frame ahead of scope exit, so the host sees it before the
    /// module runs any post-processing.
    pub fn send(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => self.output.submit(token, self.image.take()),
            None => Ok(()),
        }
    }
}

impl Drop for OutputFrame<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to submit output buffer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mapping::{PixelFormat, VideoMapping};

    /// Input driver that counts reservations and releases.
    struct CountingInput {
        queued: usize,
        reserved: usize,
        recycled: usize,
        recycled_with_image: usize,
    }

    impl CountingInput {
        fn new(queued: usize) -> Self {
            Self {
                queued,
                reserved: 0,
                recycled: 0,
                recycled_with_image: 0,
            }
        }
    }

    impl VideoInput for CountingInput {
        fn reconfigure(&mut self, _mapping: &VideoMapping) -> Result<()> {
            Ok(())
        }

        fn reserve(&mut self) -> Result<BufferToken> {
            if self.reserved - self.recycled >= self.queued {
                return Err(VisorError::NoBufferAvailable("queue empty".to_string()));
            }
            self.reserved += 1;
            Ok(BufferToken::new(self.reserved))
        }

        fn wait_ready(&mut self, _token: &BufferToken) -> Result<RawImage> {
            let mut img = RawImage::new(PixelFormat::Yuyv, 4, 2, 30.0);
            img.seq = self.reserved as u64;
            Ok(img)
        }

        fn recycle(&mut self, _token: BufferToken, image: Option<RawImage>) -> Result<()> {
            self.recycled += 1;
            if image.is_some() {
                self.recycled_with_image += 1;
            }
            assert!(
                self.recycled <= self.reserved,
                "recycled a buffer that was never reserved"
            );
            Ok(())
        }

        fn stream_on(&mut self) -> Result<()> {
            Ok(())
        }

        fn stream_off(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn consume(frame: &mut InputFrame<'_>, fail: bool) -> Result<u64> {
        let img = frame.get()?;
        let seq = img.seq;
        if fail {
            return Err(VisorError::Other(anyhow::anyhow!("module blew up")));
        }
        Ok(seq)
    }

    #[test]
    fn released_exactly_once_on_success_and_failure_paths() {
        let mut input = CountingInput::new(2);
        for i in 0..10_000u32 {
            let mut frame = InputFrame::reserve(&mut input).unwrap();
            // Every third iteration the consumer errors after get(); the
            // buffer must still go back exactly once.
            let _ = consume(&mut frame, i % 3 == 0);
            drop(frame);
        }
        assert_eq!(input.reserved, 10_000);
        assert_eq!(input.recycled, 10_000);
        assert_eq!(input.recycled_with_image, 10_000);
    }

    #[test]
    fn reserve_without_get_recycles_unredeemed_slot() {
        let mut input = CountingInput::new(1);
        let frame = InputFrame::reserve(&mut input).unwrap();
        drop(frame);
        assert_eq!(input.recycled, 1);
        assert_eq!(input.recycled_with_image, 0);
    }

    #[test]
    fn get_caches_image_after_first_call() {
        let mut input = CountingInput::new(1);
        let mut frame = InputFrame::reserve(&mut input).unwrap();
        let seq1 = frame.get().unwrap().seq;
        let seq2 = frame.get().unwrap().seq;
        assert_eq!(seq1, seq2);
    }

    #[test]
    fn done_consumes_the_handle_and_drop_does_not_double_release() {
        let mut input = CountingInput::new(1);
        let mut frame = InputFrame::reserve(&mut input).unwrap();
        frame.get().unwrap();
        frame.done().unwrap();
        assert_eq!(input.recycled, 1);
    }

    #[test]
    fn reserve_fails_when_queue_is_structurally_empty() {
        let mut input = CountingInput::new(0);
        assert!(matches!(
            InputFrame::reserve(&mut input),
            Err(VisorError::NoBufferAvailable(_))
        ));
    }
}
