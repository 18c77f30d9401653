#![deny(unsafe_code)]
//! Module for parsing CAFF animation containers and the CIFF images they carry.
//!
//! A CAFF file is a sequence of typed, length-prefixed blocks: exactly one
//! header block, any number of credits blocks, and animation blocks each
//! holding a duration and one CIFF image. Parsing stops at the first
//! animation block; its image is the frame this crate extracts.
//!
//! Every field is bounds-checked against the bytes actually available before
//! it is read, and every structural invariant is enforced. The first
//! violation aborts the parse.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryReserveError;
use log::debug;
use std::io::{Read, Seek};

mod ciff;
mod credits;
pub mod jpeg;
mod reader;

pub use crate::ciff::{CHANNELS, CiffImage, split_tags};
pub use crate::credits::{CreationDate, CreditsBlock};
pub use crate::jpeg::{ImageSink, JpegFile};
pub use crate::reader::BoundedReader;

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        u64::try_from(self).unwrap_or(u64::MAX)
    }
}

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;
/// Raw bytes from the file; captions, tags and creators are not required to be UTF-8.
pub type TryString = fallible_collections::TryVec<u8>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct String;

/// Describes parser failures.
///
/// Each structural rule of the CAFF and CIFF formats has its own variant so
/// callers can tell exactly which invariant a file broke.
#[derive(Debug)]
pub enum Error {
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// A field or declared length runs past the end of the input.
    Truncated { offset: u64, needed: u64, available: u64 },
    /// Unknown block id, or a length outside the bound for its type.
    InvalidBlock { id: u8, length: u64 },
    /// The first block is not a header block.
    MissingHeader,
    /// A second header block follows the first.
    DuplicateHeader,
    /// The CAFF header announces zero animations.
    NoAnimations,
    /// Magic bytes do not identify the expected structure.
    BadMagic { expected: [u8; 4], found: [u8; 4] },
    /// Header size field has an impossible value.
    BadHeaderSize(u64),
    /// `content_size` differs from `width * height * 3`, or that product overflows.
    ContentSizeMismatch { content_size: u64, width: u64, height: u64 },
    /// The image has no pixels.
    EmptyContent,
    /// CIFF header leaves no room for the caption and tag terminators.
    HeaderTooSmall(u64),
    /// No `\n` ends the caption within the header.
    UnterminatedCaption,
    /// The tag region contains a `\n`.
    TagsContainNewline,
    /// Credits creator length does not account for the rest of the block.
    LengthMismatch { declared: u64, expected: u64 },
    /// A credits date field is outside its accepted range.
    DateOutOfRange { field: &'static str, value: u16 },
    /// The image sink could not produce its output.
    EncodeFailed(std::string::String),
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Truncated { offset, needed, available } => write!(
                f,
                "truncated input: {needed} bytes needed at offset {offset}, {available} available"
            ),
            Self::InvalidBlock { id, length } => write!(f, "invalid block: id {id:#04x}, length {length}"),
            Self::MissingHeader => f.write_str("first block is not a header block"),
            Self::DuplicateHeader => f.write_str("multiple header blocks"),
            Self::NoAnimations => f.write_str("no animations to convert"),
            Self::BadMagic { expected, found } => write!(
                f,
                "bad magic: expected \"{}\", found \"{}\"",
                expected.escape_ascii(),
                found.escape_ascii()
            ),
            Self::BadHeaderSize(size) => write!(f, "bad header size {size}"),
            Self::ContentSizeMismatch { content_size, width, height } => {
                write!(f, "content size {content_size} != {width} * {height} * 3")
            },
            Self::EmptyContent => f.write_str("image has no pixels"),
            Self::HeaderTooSmall(size) => write!(f, "header size {size} leaves no room for caption and tags"),
            Self::UnterminatedCaption => f.write_str("no closing '\\n' in caption"),
            Self::TagsContainNewline => f.write_str("tags contain '\\n'"),
            Self::LengthMismatch { declared, expected } => {
                write!(f, "creator length is {declared}, block leaves {expected}")
            },
            Self::DateOutOfRange { field, value } => write!(f, "{field} out of range: {value}"),
            Self::EncodeFailed(why) => write!(f, "failed to encode image: {why}"),
            Self::OutOfMemory => f.write_str("OOM"),
            Self::ResourceLimitExceeded(why) => f.write_str(why),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::Io(io_err) => return io_err,
            Error::Truncated { .. } => std::io::ErrorKind::UnexpectedEof,
            Error::OutOfMemory => std::io::ErrorKind::OutOfMemory,
            Error::EncodeFailed(_) => std::io::ErrorKind::Other,
            _ => std::io::ErrorKind::InvalidData,
        };
        Self::new(kind, err)
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Resource limits applied while parsing.
///
/// Limits are checked **before** allocations occur, so a file that declares
/// an enormous pixel buffer is rejected without reserving memory for it.
///
/// # Examples
///
/// ```rust
/// use caff_parse::DecodeConfig;
///
/// // Default limits (suitable for most apps)
/// let config = DecodeConfig::default();
///
/// // Strict limits for untrusted input
/// let config = DecodeConfig::default()
///     .with_max_content_size(64_000_000)
///     .with_max_credits_blocks(16);
///
/// // No limits
/// let config = DecodeConfig::unlimited();
/// ```
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Largest accepted pixel buffer in bytes.
    /// Default: 1GB (1,000,000,000 bytes)
    pub max_content_size: Option<u64>,

    /// Largest number of credits blocks before the animation block.
    /// Default: 10,000
    pub max_credits_blocks: Option<u32>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_content_size: Some(1_000_000_000),
            max_credits_blocks: Some(10_000),
        }
    }
}

impl DecodeConfig {
    /// Create a configuration with no resource limits.
    pub fn unlimited() -> Self {
        Self {
            max_content_size: None,
            max_credits_blocks: None,
        }
    }

    /// Set the pixel buffer limit in bytes
    pub fn with_max_content_size(mut self, bytes: u64) -> Self {
        self.max_content_size = Some(bytes);
        self
    }

    /// Set the maximum number of credits blocks
    pub fn with_max_credits_blocks(mut self, count: u32) -> Self {
        self.max_credits_blocks = Some(count);
        self
    }

    pub(crate) fn validate_content_size(&self, bytes: u64) -> Result<()> {
        match self.max_content_size {
            Some(limit) if bytes > limit => Err(Error::ResourceLimitExceeded("pixel buffer limit exceeded")),
            _ => Ok(()),
        }
    }

    fn validate_credits_blocks(&self, count: usize) -> Result<()> {
        match self.max_credits_blocks {
            Some(limit) if count.to_u64() > u64::from(limit) => {
                Err(Error::ResourceLimitExceeded("credits block count limit exceeded"))
            },
            _ => Ok(()),
        }
    }
}

/// CAFF block types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Header,
    Credits,
    Animation,
}

impl BlockType {
    fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::Header),
            0x02 => Some(Self::Credits),
            0x03 => Some(Self::Animation),
            _ => None,
        }
    }

    /// Whether a body of `length` bytes is acceptable for this block type.
    fn accepts_length(self, length: u64) -> bool {
        match self {
            // magic(4) + header_size(8) + num_anim(8)
            Self::Header => length == CAFF_HEADER_SIZE,
            Self::Credits => length >= credits::CREDITS_FIXED_SIZE,
            Self::Animation => length >= ANIMATION_MIN_SIZE,
        }
    }
}

/// A CAFF block header whose length already satisfies its type's bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: BlockType,
    /// Size of the block body in bytes.
    pub length: u64,
}

impl BlockHeader {
    /// id(1) + length(8)
    const SIZE: u64 = 9;
}

const CAFF_HEADER_SIZE: u64 = 20;
const ANIMATION_MIN_SIZE: u64 = 42;
const CAFF_MAGIC: [u8; 4] = *b"CAFF";

/// Animation block: a playback duration and one image.
#[derive(Debug)]
pub struct AnimationBlock {
    /// Decoded but not interpreted.
    pub duration: u64,
    pub image: CiffImage,
}

/// Everything a CAFF parse keeps: the announced animation count, the
/// credits blocks seen before the first animation, and that animation.
#[derive(Debug)]
pub struct CaffFile {
    pub animation_count: u64,
    pub credits: TryVec<CreditsBlock>,
    pub animation: AnimationBlock,
}

impl CaffFile {
    /// The extracted frame.
    pub fn image(&self) -> &CiffImage {
        &self.animation.image
    }

    pub fn into_image(self) -> CiffImage {
        self.animation.image
    }
}

/// Read and validate a block header.
///
/// Only the 9 header bytes are consumed; on failure the block body is left
/// untouched.
pub fn read_block_header<T: Read + Seek>(src: &mut BoundedReader<'_, T>) -> Result<BlockHeader> {
    src.ensure(BlockHeader::SIZE)?;
    let id = src.read_u8()?;
    let length = src.read_u64()?;
    match BlockType::from_id(id) {
        Some(block_type) if block_type.accepts_length(length) => {
            debug!("{block_type:?} block, {length} bytes, body at {}", src.offset());
            Ok(BlockHeader { block_type, length })
        },
        _ => Err(Error::InvalidBlock { id, length }),
    }
}

/// Parse a header block body, returning the announced animation count.
fn read_caff_header<T: Read + Seek>(src: &mut BoundedReader<'_, T>) -> Result<u64> {
    src.ensure(CAFF_HEADER_SIZE)?;
    let magic = src.read_array::<4>()?;
    let header_size = src.read_u64()?;
    let animation_count = src.read_u64()?;

    if magic != CAFF_MAGIC {
        return Err(Error::BadMagic { expected: CAFF_MAGIC, found: magic });
    }
    if header_size != CAFF_HEADER_SIZE {
        return Err(Error::BadHeaderSize(header_size));
    }
    if animation_count < 1 {
        return Err(Error::NoAnimations);
    }
    Ok(animation_count)
}

fn read_animation<T: Read + Seek>(
    src: &mut BoundedReader<'_, T>,
    length: u64,
    config: &DecodeConfig,
) -> Result<AnimationBlock> {
    src.ensure(length)?;
    let duration = src.read_u64()?;
    let image = ciff::read_ciff_image(src, config)?;
    Ok(AnimationBlock { duration, image })
}

/// Container parse progress.
enum ParseState {
    Start,
    ExpectingHeader,
    Scanning {
        animation_count: u64,
        credits: TryVec<CreditsBlock>,
    },
    Done(CaffFile),
}

/// Read a CAFF file with the default resource limits.
pub fn read_caff<T: Read + Seek>(f: &mut T) -> Result<CaffFile> {
    read_caff_with_config(f, &DecodeConfig::default())
}

/// Read a CAFF file.
///
/// Exactly one header block must come first. Credits blocks are collected
/// until the first animation block, whose image is decoded; anything after
/// that block is never read.
pub fn read_caff_with_config<T: Read + Seek>(f: &mut T, config: &DecodeConfig) -> Result<CaffFile> {
    let mut src = BoundedReader::new(f)?;
    let mut state = ParseState::Start;
    loop {
        state = match state {
            ParseState::Start => ParseState::ExpectingHeader,
            ParseState::ExpectingHeader => {
                let header = read_block_header(&mut src)?;
                if header.block_type != BlockType::Header {
                    return Err(Error::MissingHeader);
                }
                let animation_count = read_caff_header(&mut src)?;
                debug!("caff header: {animation_count} animations");
                ParseState::Scanning { animation_count, credits: TryVec::new() }
            },
            ParseState::Scanning { animation_count, mut credits } => {
                let header = read_block_header(&mut src)?;
                match header.block_type {
                    BlockType::Header => return Err(Error::DuplicateHeader),
                    BlockType::Credits => {
                        config.validate_credits_blocks(credits.len() + 1)?;
                        credits.push(credits::read_credits(&mut src, header.length)?)?;
                        ParseState::Scanning { animation_count, credits }
                    },
                    BlockType::Animation => {
                        let animation = read_animation(&mut src, header.length, config)?;
                        ParseState::Done(CaffFile { animation_count, credits, animation })
                    },
                }
            },
            ParseState::Done(file) => return Ok(file),
        };
    }
}

/// Read a standalone CIFF file with the default resource limits.
pub fn read_ciff<T: Read + Seek>(f: &mut T) -> Result<CiffImage> {
    read_ciff_with_config(f, &DecodeConfig::default())
}

/// Read a standalone CIFF file.
pub fn read_ciff_with_config<T: Read + Seek>(f: &mut T, config: &DecodeConfig) -> Result<CiffImage> {
    let mut src = BoundedReader::new(f)?;
    ciff::read_ciff_image(&mut src, config)
}

#[cfg(test)]
fn header_bytes(id: u8, length: u64) -> std::io::Cursor<std::vec::Vec<u8>> {
    let mut out = std::vec![id];
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&[0; 64]);
    std::io::Cursor::new(out)
}

#[test]
fn block_header_length_bounds() {
    let cases = [
        (0x01, 20, true),
        (0x01, 19, false),
        (0x01, 21, false),
        (0x02, 14, true),
        (0x02, 13, false),
        (0x03, 42, true),
        (0x03, 41, false),
        (0x03, u64::MAX, true),
    ];
    for (id, length, ok) in cases {
        let mut src = header_bytes(id, length);
        let mut r = BoundedReader::new(&mut src).unwrap();
        let res = read_block_header(&mut r);
        assert_eq!(res.is_ok(), ok, "id {id} length {length}: {res:?}");
        if !ok {
            assert!(matches!(res, Err(Error::InvalidBlock { .. })));
        }
    }
}

#[test]
fn unknown_block_id_consumes_only_header() {
    let mut src = header_bytes(0x09, 20);
    let mut r = BoundedReader::new(&mut src).unwrap();
    match read_block_header(&mut r) {
        Err(Error::InvalidBlock { id, length }) => assert_eq!((id, length), (0x09, 20)),
        other => panic!("expected invalid block, got {other:?}"),
    }
    assert_eq!(r.offset(), BlockHeader::SIZE);
}

#[test]
fn block_header_needs_nine_bytes() {
    let mut src = std::io::Cursor::new(std::vec![0x01u8, 20, 0, 0, 0, 0, 0, 0]);
    let mut r = BoundedReader::new(&mut src).unwrap();
    assert!(matches!(read_block_header(&mut r), Err(Error::Truncated { needed: 9, available: 8, .. })));
    assert_eq!(r.offset(), 0);
}

#[test]
fn caff_header_body_checks() {
    fn body(magic: &[u8; 4], header_size: u64, count: u64) -> std::io::Cursor<std::vec::Vec<u8>> {
        let mut out = magic.to_vec();
        out.extend_from_slice(&header_size.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        std::io::Cursor::new(out)
    }
    let parse = |mut src: std::io::Cursor<std::vec::Vec<u8>>| {
        let mut r = BoundedReader::new(&mut src).unwrap();
        read_caff_header(&mut r)
    };
    assert_eq!(parse(body(b"CAFF", 20, 3)).unwrap(), 3);
    assert!(matches!(parse(body(b"CIFF", 20, 1)), Err(Error::BadMagic { .. })));
    assert!(matches!(parse(body(b"CAFF", 21, 1)), Err(Error::BadHeaderSize(21))));
    assert!(matches!(parse(body(b"CAFF", 20, 0)), Err(Error::NoAnimations)));
}

#[test]
fn error_display() {
    let err = Error::BadMagic { expected: *b"CAFF", found: *b"CA\0F" };
    assert_eq!(err.to_string(), "bad magic: expected \"CAFF\", found \"CA\\x00F\"");
    let err = Error::InvalidBlock { id: 9, length: 20 };
    assert_eq!(err.to_string(), "invalid block: id 0x09, length 20");
    let io: std::io::Error = Error::Truncated { offset: 0, needed: 9, available: 0 }.into();
    assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
}
