//! Reference track decoding via Symphonia

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded planar samples, one `Vec<f32>` per channel.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    pub samples: Vec<Vec<f32>>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl ChannelBuffer {
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![Vec::new(); channels],
            sample_rate,
            channels,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }
}

/// Decode a file into planar f32 samples.
pub fn read_audio_file(path: &Path) -> Result<ChannelBuffer> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .context("failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("no decodable audio track")?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params.sample_rate.unwrap_or(44100);
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

    let decoder_opts = DecoderOptions::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &decoder_opts)
        .context("failed to create decoder")?;

    let mut buffer = ChannelBuffer::new(channels, sample_rate);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        append_samples(&mut buffer, decoded)?;
    }

    Ok(buffer)
}

fn append_samples(buffer: &mut ChannelBuffer, decoded: AudioBufferRef) -> Result<()> {
    match decoded {
        AudioBufferRef::F32(buf) => {
            for ch in 0..buffer.channels.min(buf.spec().channels.count()) {
                buffer.samples[ch].extend_from_slice(buf.chan(ch));
            }
        }
        AudioBufferRef::F64(buf) => {
            for ch in 0..buffer.channels.min(buf.spec().channels.count()) {
                buffer.samples[ch].extend(buf.chan(ch).iter().map(|&s| s as f32));
            }
        }
        AudioBufferRef::S16(buf) => {
            for ch in 0..buffer.channels.min(buf.spec().channels.count()) {
                buffer.samples[ch].extend(buf.chan(ch).iter().map(|&s| s as f32 / 32768.0));
            }
        }
        AudioBufferRef::S32(buf) => {
            for ch in 0..buffer.channels.min(buf.spec().channels.count()) {
                buffer.samples[ch]
                    .extend(buf.chan(ch).iter().map(|&s| s as f32 / 2147483648.0));
            }
        }
        AudioBufferRef::U8(buf) => {
            for ch in 0..buffer.channels.min(buf.spec().channels.count()) {
                buffer.samples[ch]
                    .extend(buf.chan(ch).iter().map(|&s| (s as f32 - 128.0) / 128.0));
            }
        }
        _ => anyhow::bail!("unsupported sample format"),
    }
    Ok(())
}
