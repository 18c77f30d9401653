// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CIFF image blocks.
//!
//! A CIFF image is a fixed 36-byte header, a variable header tail holding
//! a newline-terminated caption followed by null-terminated tags, and then
//! `width * height` RGB pixels stored row by row.

use log::{debug, warn};
use std::fmt;
use std::io::{Read, Seek};
use std::path::PathBuf;

use crate::jpeg::ImageSink;
use crate::reader::BoundedReader;
use crate::{DecodeConfig, Error, Result, ToU64, TryString, TryVec};

/// magic(4) + header_size(8) + content_size(8) + width(8) + height(8)
pub(crate) const CIFF_FIXED_HEADER_SIZE: u64 = 36;

/// Pixels are always 8-bit RGB.
pub const CHANNELS: u8 = 3;

const CIFF_MAGIC: [u8; 4] = *b"CIFF";

/// A fully validated CIFF image.
#[derive(Debug)]
pub struct CiffImage {
    pub header_size: u64,
    pub content_size: u64,
    pub width: u64,
    pub height: u64,
    /// Caption including its terminating `\n`.
    pub caption: TryString,
    /// Tags in file order, each including its terminating `\0`.
    pub tags: TryVec<TryString>,
    /// `content_size` bytes of row-major RGB.
    pub pixels: TryVec<u8>,
}

impl CiffImage {
    /// Name of the JPEG written for an input whose base name is `stem`.
    pub fn output_path(stem: &str) -> PathBuf {
        PathBuf::from(format!("{stem}.jpg"))
    }

    /// Caption without its trailing newline.
    pub fn caption_lossy(&self) -> std::borrow::Cow<'_, str> {
        let text = self.caption.strip_suffix(b"\n").unwrap_or(&self.caption);
        String::from_utf8_lossy(text)
    }

    /// Tags without their trailing null.
    pub fn tags_lossy(&self) -> impl Iterator<Item = std::borrow::Cow<'_, str>> {
        self.tags
            .iter()
            .map(|tag| String::from_utf8_lossy(tag.strip_suffix(b"\0").unwrap_or(tag)))
    }

    /// Hand the pixels to `sink`, to be stored at `path`.
    pub fn write_to(&self, sink: &mut dyn ImageSink, path: &std::path::Path) -> Result<()> {
        sink.write_rgb(path, self.width, self.height, CHANNELS, &self.pixels)
    }
}

impl fmt::Display for CiffImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CIFF size: {} x {}", self.width, self.height)?;
        writeln!(f, "Caption: {}", self.caption_lossy())?;
        f.write_str("Tags:")?;
        for tag in self.tags_lossy() {
            write!(f, " {tag}")?;
        }
        Ok(())
    }
}

/// Parse one CIFF image starting at the reader's cursor.
///
/// Every field is validated before the next variable-length region is
/// touched; in particular no pixel byte is read until the dimensions and
/// content size agree.
pub(crate) fn read_ciff_image<T: Read + Seek>(
    src: &mut BoundedReader<'_, T>,
    config: &DecodeConfig,
) -> Result<CiffImage> {
    src.ensure(CIFF_FIXED_HEADER_SIZE)?;
    let magic = src.read_array::<4>()?;
    let header_size = src.read_u64()?;
    let content_size = src.read_u64()?;
    let width = src.read_u64()?;
    let height = src.read_u64()?;

    if magic != CIFF_MAGIC {
        return Err(Error::BadMagic { expected: CIFF_MAGIC, found: magic });
    }
    if header_size <= CIFF_FIXED_HEADER_SIZE {
        return Err(Error::BadHeaderSize(header_size));
    }
    let pixel_bytes = width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(u64::from(CHANNELS)));
    if pixel_bytes != Some(content_size) {
        return Err(Error::ContentSizeMismatch { content_size, width, height });
    }
    if content_size == 0 {
        return Err(Error::EmptyContent);
    }

    // Room for at least an empty caption's '\n' and one tag terminator.
    let remaining = header_size - CIFF_FIXED_HEADER_SIZE;
    if remaining < 2 {
        return Err(Error::HeaderTooSmall(header_size));
    }
    src.ensure(remaining)?;

    let caption = read_caption(src, remaining)?;
    let tag_region = src.read_bytes(remaining - caption.len().to_u64())?;
    if tag_region.contains(&b'\n') {
        return Err(Error::TagsContainNewline);
    }
    let tags = split_tags(&tag_region)?;

    config.validate_content_size(content_size)?;
    let pixels = src.read_bytes(content_size)?;

    debug!(
        "ciff {width}x{height}, caption {} bytes, {} tags, ends at {}",
        caption.len(),
        tags.len(),
        src.offset()
    );
    Ok(CiffImage {
        header_size,
        content_size,
        width,
        height,
        caption,
        tags,
        pixels,
    })
}

/// Consume bytes one at a time up to and including the first `\n`,
/// reading no more than `limit` bytes.
fn read_caption<T: Read + Seek>(src: &mut BoundedReader<'_, T>, limit: u64) -> Result<TryString> {
    let mut caption = TryVec::new();
    for _ in 0..limit {
        let byte = src.read_u8()?;
        caption.push(byte)?;
        if byte == b'\n' {
            return Ok(caption);
        }
    }
    Err(Error::UnterminatedCaption)
}

/// Split a tag region into null-terminated tags.
///
/// Each tag keeps its `\0`. Bytes after the last null do not form a tag and
/// are dropped.
pub fn split_tags(region: &[u8]) -> Result<TryVec<TryString>> {
    let mut tags = TryVec::new();
    for tag in region.split_inclusive(|&b| b == 0) {
        if tag.last() != Some(&0) {
            warn!("dropping {} unterminated tag bytes", tag.len());
            continue;
        }
        let mut owned = TryVec::with_capacity(tag.len())?;
        owned.extend_from_slice(tag)?;
        tags.push(owned)?;
    }
    Ok(tags)
}

#[cfg(test)]
fn ciff_bytes(header_size: u64, content_size: u64, width: u64, height: u64, tail: &[u8]) -> std::vec::Vec<u8> {
    let mut out = std::vec::Vec::new();
    out.extend_from_slice(b"CIFF");
    for field in [header_size, content_size, width, height] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(tail);
    out
}

#[cfg(test)]
fn parse(bytes: std::vec::Vec<u8>) -> (Result<CiffImage>, u64) {
    let mut src = std::io::Cursor::new(bytes);
    let mut r = BoundedReader::new(&mut src).unwrap();
    let res = read_ciff_image(&mut r, &DecodeConfig::default());
    (res, r.offset())
}

#[test]
fn split_tags_keeps_terminators() {
    let tags = split_tags(b"tag1\0tag2\0").unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(&tags[0][..], b"tag1\0");
    assert_eq!(&tags[1][..], b"tag2\0");
}

#[test]
fn split_tags_single_null() {
    let tags = split_tags(b"\0").unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(&tags[0][..], b"\0");
}

#[test]
fn split_tags_empty_and_unterminated() {
    assert!(split_tags(b"").unwrap().is_empty());
    let tags = split_tags(b"a\0\0tail").unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(&tags[1][..], b"\0");
}

#[test]
fn caption_then_tags() {
    let mut tail = b"Hi\nx\0".to_vec();
    tail.extend_from_slice(&[1, 2, 3]);
    let (img, offset) = parse(ciff_bytes(41, 3, 1, 1, &tail));
    let img = img.unwrap();
    assert_eq!(img.caption, b"Hi\n".as_ref());
    assert_eq!(img.tags.len(), 1);
    assert_eq!(&img.tags[0][..], b"x\0");
    assert_eq!(img.pixels, [1u8, 2, 3].as_ref());
    assert_eq!(offset, 44);
}

#[test]
fn caption_may_fill_header_tail() {
    let (img, _) = parse(ciff_bytes(38, 3, 1, 1, b"a\n\x10\x20\x30"));
    let img = img.unwrap();
    assert_eq!(img.caption, b"a\n".as_ref());
    assert!(img.tags.is_empty());
}

#[test]
fn caption_without_newline() {
    let (res, offset) = parse(ciff_bytes(40, 3, 1, 1, b"abcd\n\0\0\0"));
    assert!(matches!(res, Err(Error::UnterminatedCaption)));
    // The scan stops at the header boundary.
    assert_eq!(offset, 40);
}

#[test]
fn newline_in_tags() {
    let (res, _) = parse(ciff_bytes(42, 3, 1, 1, b"c\nab\n\0\0\0\0"));
    assert!(matches!(res, Err(Error::TagsContainNewline)));
}

#[test]
fn content_size_checked_before_pixels() {
    let (res, offset) = parse(ciff_bytes(40, 10, 2, 2, b"x\n\0\0"));
    match res {
        Err(Error::ContentSizeMismatch { content_size, width, height }) => {
            assert_eq!((content_size, width, height), (10, 2, 2));
        },
        other => panic!("expected mismatch, got {other:?}"),
    }
    assert_eq!(offset, CIFF_FIXED_HEADER_SIZE);
}

#[test]
fn content_size_overflow_is_mismatch() {
    let (res, _) = parse(ciff_bytes(40, 3, u64::MAX, 2, b"x\n\0\0"));
    assert!(matches!(res, Err(Error::ContentSizeMismatch { .. })));
    let (res, _) = parse(ciff_bytes(40, 0, 1 << 63, 2, b"x\n\0\0"));
    assert!(matches!(res, Err(Error::ContentSizeMismatch { .. })));
}

#[test]
fn header_checks() {
    let mut bad_magic = ciff_bytes(40, 3, 1, 1, b"x\n\0\0abc");
    bad_magic[..4].copy_from_slice(b"CAFF");
    assert!(matches!(parse(bad_magic).0, Err(Error::BadMagic { .. })));
    assert!(matches!(parse(ciff_bytes(36, 3, 1, 1, b"abc")).0, Err(Error::BadHeaderSize(36))));
    assert!(matches!(parse(ciff_bytes(37, 3, 1, 1, b"\nabc")).0, Err(Error::HeaderTooSmall(37))));
    assert!(matches!(parse(ciff_bytes(40, 0, 0, 5, b"x\n\0\0")).0, Err(Error::EmptyContent)));
}

#[test]
fn truncated_pixels() {
    let (res, _) = parse(ciff_bytes(40, 12, 2, 2, b"x\n\0\0short"));
    assert!(matches!(res, Err(Error::Truncated { needed: 12, available: 5, .. })));
}

#[test]
fn content_size_limit() {
    let mut src = std::io::Cursor::new(ciff_bytes(40, 12, 2, 2, b"x\n\0\0"));
    let mut r = BoundedReader::new(&mut src).unwrap();
    let config = DecodeConfig::default().with_max_content_size(11);
    assert!(matches!(read_ciff_image(&mut r, &config), Err(Error::ResourceLimitExceeded(_))));
}

#[test]
fn report_strips_terminators() {
    let mut tail = b"A caption\nfoo\0bar\0".to_vec();
    tail.extend_from_slice(&[0; 6]);
    let (img, _) = parse(ciff_bytes(36 + 18, 6, 2, 1, &tail));
    let img = img.unwrap();
    assert_eq!(img.to_string(), "CIFF size: 2 x 1\nCaption: A caption\nTags: foo bar");
    assert_eq!(CiffImage::output_path("frame"), PathBuf::from("frame.jpg"));
}
