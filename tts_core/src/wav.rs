use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::stream::ChunkSink;

const NUM_CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Size placeholder for a stream whose length is unknown up front.
const UNKNOWN_SIZE: u32 = u32::MAX;

/// 44-byte RIFF/WAVE header for mono 16-bit PCM of unknown length.
pub fn streaming_header(sample_rate: u32) -> Bytes {
    let byte_rate: u32 = sample_rate * NUM_CHANNELS as u32 * (BITS_PER_SAMPLE as u32 / 8);
    let block_align: u16 = NUM_CHANNELS * (BITS_PER_SAMPLE / 8);

    let mut out = BytesMut::with_capacity(44);

    // RIFF header
    out.put_slice(b"RIFF");
    out.put_u32_le(UNKNOWN_SIZE);
    out.put_slice(b"WAVE");

    // fmt chunk
    out.put_slice(b"fmt ");
    out.put_u32_le(16); // fmt chunk size
    out.put_u16_le(1); // PCM
    out.put_u16_le(NUM_CHANNELS);
    out.put_u32_le(sample_rate);
    out.put_u32_le(byte_rate);
    out.put_u16_le(block_align);
    out.put_u16_le(BITS_PER_SAMPLE);

    // data chunk
    out.put_slice(b"data");
    out.put_u32_le(UNKNOWN_SIZE);

    out.freeze()
}

/// Convert f32 [-1.0, 1.0] samples to little-endian 16-bit PCM.
pub fn pcm16_le(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        out.put_i16_le((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
    }
    out.freeze()
}

/// Write a header, then each chunk as PCM, into `sink`. A consumer that hangs
/// up ends the stream quietly; an engine error is returned to the caller.
pub fn stream_wav<I>(sink: &mut ChunkSink, sample_rate: u32, chunks: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = anyhow::Result<Vec<f32>>>,
{
    if sink.push(streaming_header(sample_rate)).is_err() {
        debug!("Client disconnected before the WAV header was sent");
        return Ok(());
    }

    let mut total_samples = 0usize;
    for (index, chunk) in chunks.into_iter().enumerate() {
        let samples = chunk.with_context(|| format!("audio chunk {index}"))?;
        total_samples += samples.len();
        if sink.push(pcm16_le(&samples)).is_err() {
            debug!(total_samples, "Client disconnected, stopping generation");
            return Ok(());
        }
    }

    debug!(
        total_samples,
        seconds = total_samples as f64 / sample_rate as f64,
        "Finished streaming audio"
    );
    Ok(())
}
