//! G.711 µ-law codec and fixed-ratio resampling.
//!
//! Telephone legs carry 8 kHz µ-law; the realtime AI consumes 16 kHz PCM and
//! produces 24 kHz PCM. Everything here is a pure function over 16-bit signed
//! little-endian samples, so the conversions can run inline on the hot path
//! without any per-call state.
//!
//! # Pipelines
//!
//! - Caller → AI: [`mulaw_to_pcm16k`] (decode, then 8 kHz → 16 kHz)
//! - AI → caller: [`pcm24k_to_mulaw`] (24 kHz → 8 kHz, then encode)

use thiserror::Error;

/// µ-law code for digital silence.
pub const MULAW_SILENCE: u8 = 0x7F;

/// The other zero code; what [`encode_mulaw`] produces for a zero sample.
pub const MULAW_POSITIVE_ZERO: u8 = 0xFF;

/// Telephone-leg sample rate.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Sample rate the AI expects for caller audio.
pub const AI_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of AI-generated audio.
pub const AI_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Bytes in one 20 ms µ-law frame at 8 kHz.
pub const MULAW_FRAME_BYTES: usize = 160;

/// Duration of one µ-law frame in milliseconds.
pub const MULAW_FRAME_MS: u64 = 20;

const MULAW_CLIP: i32 = 32635;
const MULAW_BIAS: i32 = 0x84;

/// Errors raised when a payload cannot be converted for the telephone leg.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// PCM arrived at a rate with no integer decimation path to 8 kHz
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Payload declared a MIME type this codec does not understand
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

// =============================================================================
// Tables
// =============================================================================

/// Canonical G.711 µ-law to linear PCM expansion table.
static MULAW_DECODE_TABLE: [i16; 256] = [
    -32124, -31100, -30076, -29052, -28028, -27004, -25980, -24956,
    -23932, -22908, -21884, -20860, -19836, -18812, -17788, -16764,
    -15996, -15484, -14972, -14460, -13948, -13436, -12924, -12412,
    -11900, -11388, -10876, -10364, -9852, -9340, -8828, -8316,
    -7932, -7676, -7420, -7164, -6908, -6652, -6396, -6140,
    -5884, -5628, -5372, -5116, -4860, -4604, -4348, -4092,
    -3900, -3772, -3644, -3516, -3388, -3260, -3132, -3004,
    -2876, -2748, -2620, -2492, -2364, -2236, -2108, -1980,
    -1884, -1820, -1756, -1692, -1628, -1564, -1500, -1436,
    -1372, -1308, -1244, -1180, -1116, -1052, -988, -924,
    -876, -844, -812, -780, -748, -716, -684, -652,
    -620, -588, -556, -524, -492, -460, -428, -396,
    -372, -356, -340, -324, -308, -292, -276, -260,
    -244, -228, -212, -196, -180, -164, -148, -132,
    -120, -112, -104, -96, -88, -80, -72, -64,
    -56, -48, -40, -32, -24, -16, -8, 0,
    32124, 31100, 30076, 29052, 28028, 27004, 25980, 24956,
    23932, 22908, 21884, 20860, 19836, 18812, 17788, 16764,
    15996, 15484, 14972, 14460, 13948, 13436, 12924, 12412,
    11900, 11388, 10876, 10364, 9852, 9340, 8828, 8316,
    7932, 7676, 7420, 7164, 6908, 6652, 6396, 6140,
    5884, 5628, 5372, 5116, 4860, 4604, 4348, 4092,
    3900, 3772, 3644, 3516, 3388, 3260, 3132, 3004,
    2876, 2748, 2620, 2492, 2364, 2236, 2108, 1980,
    1884, 1820, 1756, 1692, 1628, 1564, 1500, 1436,
    1372, 1308, 1244, 1180, 1116, 1052, 988, 924,
    876, 844, 812, 780, 748, 716, 684, 652,
    620, 588, 556, 524, 492, 460, 428, 396,
    372, 356, 340, 324, 308, 292, 276, 260,
    244, 228, 212, 196, 180, 164, 148, 132,
    120, 112, 104, 96, 88, 80, 72, 64,
    56, 48, 40, 32, 24, 16, 8, 0,
];

/// Segment (exponent) lookup indexed by `(magnitude >> 7) & 0xFF`.
static MULAW_EXPONENT_TABLE: [u8; 256] = [
    0, 0, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 3, 3,
    4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
];

// =============================================================================
// Sample codec
// =============================================================================

/// Expand one µ-law byte to a linear 16-bit sample.
#[inline]
pub fn decode_mulaw(byte: u8) -> i16 {
    MULAW_DECODE_TABLE[byte as usize]
}

/// Compress one linear 16-bit sample to µ-law.
#[inline]
pub fn encode_mulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = (magnitude >> 8) & 0x80;
    if sign != 0 {
        magnitude = -magnitude;
    }
    magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let exponent = MULAW_EXPONENT_TABLE[((magnitude >> 7) & 0xFF) as usize] as i32;
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    (!(sign | (exponent << 4) | mantissa) & 0xFF) as u8
}

/// Decode a µ-law buffer to linear samples.
pub fn decode_mulaw_buffer(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode_mulaw(b)).collect()
}

/// Encode linear samples to a µ-law buffer.
pub fn encode_mulaw_buffer(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_mulaw(s)).collect()
}

/// True when the buffer is non-empty and every byte decodes to zero.
pub fn is_mulaw_silence(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes
            .iter()
            .all(|&b| b == MULAW_SILENCE || b == MULAW_POSITIVE_ZERO)
}

/// A run of µ-law silence covering at least `duration_ms`, rounded up to whole frames.
pub fn mulaw_silence(duration_ms: u64) -> Vec<u8> {
    let frames = duration_ms.div_ceil(MULAW_FRAME_MS) as usize;
    vec![MULAW_SILENCE; frames * MULAW_FRAME_BYTES]
}

// =============================================================================
// Resampling
// =============================================================================

/// Double the sample rate by linear interpolation.
///
/// Even output slots copy the input sample; odd slots hold the average of the
/// sample and its successor. The final odd slot repeats the last sample.
pub fn resample_up_8k_to_16k(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for (i, &current) in samples.iter().enumerate() {
        let next = samples.get(i + 1).copied().unwrap_or(current);
        out.push(current);
        out.push(((current as i32 + next as i32) / 2) as i16);
    }
    out
}

/// Divide the sample rate by three, averaging each complete group.
///
/// A trailing partial group is dropped.
pub fn resample_down_24k_to_8k(samples: &[i16]) -> Vec<i16> {
    decimate(samples, 3)
}

/// Integer-truncated mean of every complete group of `factor` samples.
pub fn decimate(samples: &[i16], factor: usize) -> Vec<i16> {
    if factor <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(factor)
        .map(|group| {
            let sum: i32 = group.iter().map(|&s| s as i32).sum();
            (sum / factor as i32) as i16
        })
        .collect()
}

// =============================================================================
// Byte <-> sample helpers
// =============================================================================

/// Interpret little-endian bytes as 16-bit samples. A trailing odd byte is ignored.
pub fn pcm16le_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize 16-bit samples as little-endian bytes.
pub fn samples_to_pcm16le(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

// =============================================================================
// Pipelines
// =============================================================================

/// Caller audio: 8 kHz µ-law to 16 kHz PCM16LE bytes.
pub fn mulaw_to_pcm16k(mulaw: &[u8]) -> Vec<u8> {
    let samples = decode_mulaw_buffer(mulaw);
    samples_to_pcm16le(&resample_up_8k_to_16k(&samples))
}

/// AI audio: 24 kHz PCM16LE bytes to 8 kHz µ-law.
pub fn pcm24k_to_mulaw(pcm: &[u8]) -> Vec<u8> {
    let samples = pcm16le_to_samples(pcm);
    encode_mulaw_buffer(&resample_down_24k_to_8k(&samples))
}

/// PCM16LE at `sample_rate` to 8 kHz µ-law.
///
/// Only rates that are an integer multiple of 8 kHz are accepted.
pub fn pcm_to_mulaw(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, CodecError> {
    if sample_rate == 0 || sample_rate % TELEPHONY_SAMPLE_RATE != 0 {
        return Err(CodecError::UnsupportedSampleRate(sample_rate));
    }
    let factor = (sample_rate / TELEPHONY_SAMPLE_RATE) as usize;
    let samples = pcm16le_to_samples(pcm);
    Ok(encode_mulaw_buffer(&decimate(&samples, factor)))
}
