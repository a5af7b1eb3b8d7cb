//! Payload decoding and evidence encoding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use crate::{DecodeError, EncodeError, VideoFrame};

/// Strip a `data:<mime>;base64,` prefix if present
pub fn strip_data_url(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    }
}

/// Decode an encoded image buffer (JPEG, PNG, ...) into an RGB frame
pub fn decode(bytes: &[u8]) -> Result<VideoFrame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let img = image::load_from_memory(bytes).map_err(|e| DecodeError::Image(e.to_string()))?;
    let frame = VideoFrame::from(img.to_rgb8());
    debug!("Decoded {}x{} frame ({} bytes)", frame.width, frame.height, bytes.len());
    Ok(frame)
}

/// Decode a base64 (optionally data-URL wrapped) image payload
pub fn decode_base64(payload: &str) -> Result<VideoFrame, DecodeError> {
    let body = strip_data_url(payload.trim());
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    decode(&bytes)
}

/// Re-encode a frame as JPEG at the given quality (1-100)
pub fn encode_jpeg(frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let img = frame.as_image().ok_or(EncodeError::InvalidBuffer)?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(&img)
        .map_err(|e| EncodeError::Jpeg(e.to_string()))?;
    Ok(out)
}
