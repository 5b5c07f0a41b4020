// Stateless conversion of synthesized PCM into a playable WAV clip:
// downmix to mono, normalize to 16-bit, resample, wrap in a WAV container.

use anyhow::{bail, Context, Result};
use rubato::{FftFixedIn, Resampler};
use std::io::Cursor;

use super::backend::AudioFormat;

const RESAMPLE_CHUNK: usize = 1024;

/// Decode interleaved PCM of any supported width into mono 16-bit samples.
///
/// Channels are averaged. Wider samples keep their most significant 16 bits,
/// 8-bit samples are treated as signed. Trailing partial frames are dropped.
pub fn to_mono_i16(pcm: &[u8], format: AudioFormat) -> Result<Vec<i16>> {
    let width = usize::from(format.width);
    let channels = usize::from(format.channels);

    if !(1..=4).contains(&width) {
        bail!("unsupported sample width: {} bytes", width);
    }
    if channels == 0 {
        bail!("audio has zero channels");
    }

    let mono = pcm
        .chunks_exact(width * channels)
        .map(|frame| {
            let sum: i32 = frame
                .chunks_exact(width)
                .map(|sample| i32::from(sample_to_i16(sample)))
                .sum();
            (sum / channels as i32) as i16
        })
        .collect();

    Ok(mono)
}

fn sample_to_i16(sample: &[u8]) -> i16 {
    match sample.len() {
        1 => i16::from(sample[0] as i8) << 8,
        2 => i16::from_le_bytes([sample[0], sample[1]]),
        // 24/32-bit little endian: the top two bytes are the 16-bit value
        n => i16::from_le_bytes([sample[n - 2], sample[n - 1]]),
    }
}

/// Resample mono 16-bit audio. Output length is `ceil(len * to / from)`.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    if from_rate == 0 || to_rate == 0 {
        bail!("invalid resample rates: {} -> {}", from_rate, to_rate);
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .context("Failed to create resampler")?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s) / 32768.0).collect();
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;

    let mut output: Vec<f64> = Vec::with_capacity(expected + delay);

    let mut chunks = input.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let out = resampler
            .process(&[chunk][..], None)
            .context("Resample failed")?;
        output.extend_from_slice(&out[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let out = resampler
            .process_partial(Some(&[tail][..]), None)
            .context("Resample failed")?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the resampler delay line
    while output.len() < expected + delay {
        let out = resampler
            .process_partial(None::<&[&[f64]]>, None)
            .context("Resample flush failed")?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| (s * 32768.0).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16)
        .collect())
}

/// Wrap mono 16-bit samples in a WAV container
pub fn encode_wav(samples: &[i16], rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to start WAV container")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}

/// Full playback transform for synthesized audio
pub fn to_playback_wav(pcm: &[u8], format: AudioFormat, output_rate: u32) -> Result<Vec<u8>> {
    let mono = to_mono_i16(pcm, format)?;
    let resampled = resample(&mono, format.rate, output_rate)?;
    encode_wav(&resampled, output_rate)
}
