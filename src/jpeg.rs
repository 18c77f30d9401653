// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Writing decoded frames out as image files.

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::{Error, Result};

/// Destination for a decoded raster frame.
pub trait ImageSink {
    /// Store `pixels` (`width * height * channels` bytes, row-major) at `path`.
    fn write_rgb(&mut self, path: &Path, width: u64, height: u64, channels: u8, pixels: &[u8]) -> Result<()>;
}

/// Encodes frames as baseline JPEG files.
#[derive(Debug, Clone, Copy)]
pub struct JpegFile {
    quality: u8,
}

impl Default for JpegFile {
    fn default() -> Self {
        Self { quality: 50 }
    }
}

impl JpegFile {
    /// Quality is clamped to 1..=100.
    pub fn with_quality(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

fn color_type(channels: u8) -> Result<ExtendedColorType> {
    match channels {
        1 => Ok(ExtendedColorType::L8),
        3 => Ok(ExtendedColorType::Rgb8),
        _ => Err(Error::EncodeFailed(format!("unsupported channel count {channels}"))),
    }
}

fn dimension(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::EncodeFailed(format!("{what} {value} too large for JPEG")))
}

impl ImageSink for JpegFile {
    fn write_rgb(&mut self, path: &Path, width: u64, height: u64, channels: u8, pixels: &[u8]) -> Result<()> {
        let color = color_type(channels)?;
        let width = dimension(width, "width")?;
        let height = dimension(height, "height")?;

        let file = File::create(path).map_err(|err| Error::EncodeFailed(format!("{}: {err}", path.display())))?;
        let mut out = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(pixels, width, height, color)
            .map_err(|err| Error::EncodeFailed(err.to_string()))?;
        out.flush()
            .map_err(|err| Error::EncodeFailed(format!("{}: {err}", path.display())))?;

        debug!("wrote {}x{} jpeg to {}", width, height, path.display());
        Ok(())
    }
}

#[cfg(test)]
fn scratch_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("caff-parse-{}-{name}", std::process::id()))
}

#[test]
fn writes_jpeg_file() {
    let path = scratch_path("gradient.jpg");
    let pixels: std::vec::Vec<u8> = (0..4 * 4 * 3).map(|i| (i * 5) as u8).collect();
    JpegFile::default().write_rgb(&path, 4, 4, 3, &pixels).unwrap();
    let written = std::fs::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    // SOI marker
    assert_eq!(&written[..2], &[0xff, 0xd8]);
}

#[test]
fn rejects_oversized_dimensions() {
    let path = scratch_path("huge.jpg");
    let res = JpegFile::default().write_rgb(&path, u64::from(u32::MAX) + 1, 1, 3, &[0; 3]);
    assert!(matches!(res, Err(Error::EncodeFailed(_))));
    assert!(!path.exists());
}

#[test]
fn quality_is_clamped() {
    assert_eq!(JpegFile::with_quality(0).quality(), 1);
    assert_eq!(JpegFile::with_quality(250).quality(), 100);
    assert_eq!(JpegFile::default().quality(), 50);
}
