//! Frame Codec Library for Exam Proctoring
//!
//! Turns client-submitted image payloads into RGB frames and back:
//! - Base64 / data-URL payload unwrapping
//! - JPEG/PNG decoding into packed RGB24 frames
//! - Luminance statistics for lighting checks
//! - Compact JPEG re-encoding for evidence snapshots

pub mod codec;
pub mod frame;

pub use codec::{decode, decode_base64, encode_jpeg, strip_data_url};
pub use frame::VideoFrame;

use thiserror::Error;

/// Frame decoding errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid base64 payload: {0}")]
    Base64(String),

    #[error("Invalid image data: {0}")]
    Image(String),

    #[error("Empty frame payload")]
    Empty,

    #[error("Frame buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },
}

/// Evidence encoding errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("JPEG encoding failed: {0}")]
    Jpeg(String),

    #[error("Frame buffer does not match its dimensions")]
    InvalidBuffer,
}
