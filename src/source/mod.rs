//! Video sources feeding the capture loop

pub mod ffmpeg;

use crate::error::Result;
use crate::frame::Frame;

pub use ffmpeg::FfmpegSource;

/// A decoded video stream.
///
/// `read_frame` returning `Ok(None)` is the normal end of stream.
pub trait VideoSource: Send {
    /// Native frame rate; may be zero or NaN when the container does not say
    fn fps(&self) -> f64;

    /// Output frame size (width, height)
    fn dimensions(&self) -> (u32, u32);

    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Free the underlying handle. Safe to call more than once.
    fn release(&mut self);
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
