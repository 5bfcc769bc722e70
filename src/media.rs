//! Loading and saving carriers
//!
//! Images go through the `image` crate. WAV files are handled by a small RIFF
//! chunk walker: every byte outside the `data` chunk is kept verbatim and
//! written back unchanged, so only PCM bytes can differ after embedding.

use crate::carrier::{AudioCarrier, ImageCarrier};
use crate::error::{Result, StegoError};
use image::{ColorType, ImageFormat, ImageReader};
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

/// Decode an image file into a carrier.
///
/// Images whose color type has alpha become 4-channel (ARGB) carriers,
/// everything else is converted to RGB8. 16-bit and float images are
/// reduced to 8 bits per channel, with a warning.
pub fn load_image(path: &Path) -> Result<ImageCarrier> {
    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| StegoError::UnsupportedCarrierFormat(format!("{}: {}", path.display(), e)))?;
    let (width, height) = (image.width(), image.height());
    debug!(path = %path.display(), width, height, color = ?image.color(), "image loaded");
    if is_wide(image.color()) {
        warn!(path = %path.display(), color = ?image.color(), "image has more than 8 bits per channel; saving will reduce it to 8");
    }
    if image.color().has_alpha() {
        ImageCarrier::from_rgba(width, height, image.to_rgba8().into_raw())
    } else {
        ImageCarrier::from_rgb(width, height, image.to_rgb8().into_raw())
    }
}

/// More than one byte per channel; such images lose precision as carriers.
fn is_wide(color: ColorType) -> bool {
    color.bytes_per_pixel() > color.channel_count()
}

/// Reject output formats that would destroy the hidden bits.
pub fn validate_lossless_format(path: &Path) -> Result<ImageFormat> {
    let format = ImageFormat::from_path(path)
        .map_err(|_| StegoError::UnsupportedCarrierFormat(format!("unknown image format: {}", path.display())))?;
    match format {
        ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Tiff => Ok(format),
        ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Avif => Err(StegoError::UnsupportedCarrierFormat(
            format!("{:?} is lossy and would destroy hidden data; use PNG, BMP or TIFF", format),
        )),
        other => {
            warn!(format = ?other, "format not known to be lossless");
            Ok(other)
        }
    }
}

pub fn save_image(carrier: ImageCarrier, path: &Path) -> Result<()> {
    let format = validate_lossless_format(path)?;
    let (width, height) = (carrier.width(), carrier.height());
    let color = if carrier.has_alpha() { ColorType::Rgba8 } else { ColorType::Rgb8 };
    let raw = carrier.into_raw();
    image::save_buffer_with_format(path, &raw, width, height, color, format)?;
    debug!(path = %path.display(), width, height, "image saved");
    Ok(())
}

/// Everything in a WAV file except the PCM samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavContainer {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

struct WavFormat {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn unsupported(reason: &str) -> StegoError {
    StegoError::UnsupportedCarrierFormat(format!("WAV: {}", reason))
}

/// Find the `fmt ` description and the `data` chunk body.
fn scan_wav(bytes: &[u8]) -> Result<(WavFormat, Range<usize>)> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(unsupported("missing RIFF/WAVE header"));
    }
    let mut format = None;
    let mut data = None;
    let mut at = 12;
    while at + 8 <= bytes.len() {
        let id = &bytes[at..at + 4];
        let size = read_u32(bytes, at + 4) as usize;
        let body = at + 8;
        let end = body.checked_add(size).filter(|&end| end <= bytes.len()).ok_or_else(|| unsupported("truncated chunk"))?;
        match id {
            b"fmt " => {
                if size < 16 {
                    return Err(unsupported("fmt chunk too short"));
                }
                let tag = read_u16(bytes, body);
                if tag != WAVE_FORMAT_PCM && tag != WAVE_FORMAT_EXTENSIBLE {
                    return Err(unsupported("only integer PCM is supported"));
                }
                format = Some(WavFormat {
                    channels: read_u16(bytes, body + 2),
                    sample_rate: read_u32(bytes, body + 4),
                    bits_per_sample: read_u16(bytes, body + 14),
                });
            }
            b"data" => data = Some(body..end),
            _ => {}
        }
        if format.is_some() && data.is_some() {
            break;
        }
        // chunks are word aligned
        at = end + (size & 1);
    }
    let format = format.ok_or_else(|| unsupported("no fmt chunk"))?;
    let data = data.ok_or_else(|| unsupported("no data chunk"))?;
    if format.bits_per_sample != 8 && format.bits_per_sample != 16 {
        return Err(unsupported("only 8 and 16 bit samples are supported"));
    }
    Ok((format, data))
}

/// Split WAV bytes into a carrier over the PCM data plus the surrounding container.
pub fn parse_wav(bytes: Vec<u8>) -> Result<(AudioCarrier, WavContainer)> {
    let (format, data) = scan_wav(&bytes)?;
    let mut prefix = bytes;
    let suffix = prefix.split_off(data.end);
    let pcm = prefix.split_off(data.start);
    let carrier = AudioCarrier::new(pcm, format.channels, format.sample_rate, format.bits_per_sample);
    Ok((carrier, WavContainer { prefix, suffix }))
}

pub fn load_wav(path: &Path) -> Result<(AudioCarrier, WavContainer)> {
    let (carrier, container) = parse_wav(fs::read(path)?)?;
    debug!(
        path = %path.display(),
        channels = carrier.pcm_channels(),
        rate = carrier.sample_rate(),
        bits = carrier.bits_per_sample(),
        "wav loaded"
    );
    Ok((carrier, container))
}

/// Reassemble the WAV bytes around the (possibly modified) PCM data.
pub fn render_wav(carrier: AudioCarrier, container: &WavContainer) -> Vec<u8> {
    let pcm = carrier.into_raw();
    let mut out = Vec::with_capacity(container.prefix.len() + pcm.len() + container.suffix.len());
    out.extend_from_slice(&container.prefix);
    out.extend_from_slice(&pcm);
    out.extend_from_slice(&container.suffix);
    out
}

pub fn save_wav(carrier: AudioCarrier, container: &WavContainer, path: &Path) -> Result<()> {
    fs::write(path, render_wav(carrier, container))?;
    debug!(path = %path.display(), "wav saved");
    Ok(())
}

/// True if the path has a `.wav` extension
pub fn is_wav(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}
