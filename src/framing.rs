//! ProBluetooth multi-frame transport codec (spec §4.3, component C3).
//!
//! Splits an arbitrary payload into a sequence of frames of at most 20 bytes
//! (1 header byte + up to 19 payload bytes) and reassembles them on the
//! receive side. The header's high nibble is the 1-based frame index; the
//! low nibble is the total frame count — both in `1..=15`, except the
//! empty-payload sentinel `0x10` (low nibble 0, read back as "1 frame").

use crate::error::PumpError;

pub const MAX_PER_FRAME: usize = 19;
pub const MAX_FRAMES: usize = 15;
pub const MAX_PAYLOAD: usize = MAX_PER_FRAME * MAX_FRAMES;

/// Split `payload` into ProBluetooth frames. `payload.len()` must be at most
/// [`MAX_PAYLOAD`] (285 bytes) — true for every command in this protocol.
pub fn chunk(payload: &[u8]) -> Result<Vec<Vec<u8>>, PumpError> {
    if payload.is_empty() {
        return Ok(vec![vec![0x10]]);
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(PumpError::Framing(format!(
            "payload of {} bytes exceeds the {} byte limit ({} frames of {MAX_PER_FRAME})",
            payload.len(),
            MAX_PAYLOAD,
            MAX_FRAMES
        )));
    }

    let n = payload.len().div_ceil(MAX_PER_FRAME).max(1);
    let mut frames = Vec::with_capacity(n);
    for i in 0..n {
        let start = i * MAX_PER_FRAME;
        let end = (start + MAX_PER_FRAME).min(payload.len());
        let header = (((i + 1) << 4) | (n & 0x0F)) as u8;
        let mut frame = Vec::with_capacity(1 + (end - start));
        frame.push(header);
        frame.extend_from_slice(&payload[start..end]);
        frames.push(frame);
    }
    Ok(frames)
}

/// Reassemble a sequence of frames into the original payload by stripping
/// each frame's header byte and concatenating the remainders. Frames of
/// length <= 1 (i.e. the empty-payload sentinel) contribute nothing.
pub fn assemble(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in frames {
        if frame.len() > 1 {
            out.extend_from_slice(&frame[1..]);
        }
    }
    out
}

/// Extract the total frame count from a first-frame header byte. A low
/// nibble of 0 (the empty-payload sentinel) is read back as 1.
pub fn total_frames(first_byte: u8) -> usize {
    let low = (first_byte & 0x0F) as usize;
    low.max(1)
}
