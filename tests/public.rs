// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use caff_parse::{DecodeConfig, Error, ImageSink};
use test_assembler::Section;

static CAFF_WITH_CREDITS: &str = "tests/fixtures/sunset.caff";
static CAFF_NO_CREDITS: &str = "tests/fixtures/no_credits.caff";
static CAFF_TRAILING_GARBAGE: &str = "tests/fixtures/trailing_garbage.caff";
static CIFF_STANDALONE: &str = "tests/fixtures/sunset.ciff";
static FIXTURES: &str = "tests/fixtures";
static CORRUPT_FIXTURES: &str = "tests/fixtures/corrupt";

// ============================================================================
// Stream builders
// ============================================================================

fn block(id: u8, body: Section) -> Section {
    let body = body.get_contents().expect("block body");
    Section::new()
        .L8(id)
        .L64(body.len() as u64)
        .append_bytes(&body)
}

fn caff_header(animation_count: u64) -> Section {
    block(0x01, Section::new().append_bytes(b"CAFF").L64(20u64).L64(animation_count))
}

fn credits(year: u16, month: u8, day: u8, creator: &[u8]) -> Section {
    block(
        0x02,
        Section::new()
            .L16(year)
            .L8(month)
            .L8(day)
            .L8(12u8)
            .L8(30u8)
            .L64(creator.len() as u64)
            .append_bytes(creator),
    )
}

fn ciff(width: u64, height: u64, caption: &[u8], tags: &[u8]) -> Section {
    let content_size = width * height * 3;
    Section::new()
        .append_bytes(b"CIFF")
        .L64(36 + (caption.len() + tags.len()) as u64)
        .L64(content_size)
        .L64(width)
        .L64(height)
        .append_bytes(caption)
        .append_bytes(tags)
        .append_repeated(0x7f, content_size as usize)
}

fn animation(image: Section) -> Section {
    block(0x03, Section::new().L64(40u64).append_section(image))
}

fn stream(section: Section) -> Cursor<Vec<u8>> {
    Cursor::new(section.get_contents().expect("stream contents"))
}

fn minimal_caff() -> Section {
    caff_header(1).append_section(animation(ciff(2, 2, b"Hi\n", b"x\0")))
}

// ============================================================================
// Container structure
// ============================================================================

#[test]
fn minimal_file_yields_pixels() {
    let caff = caff_parse::read_caff(&mut stream(minimal_caff())).expect("read_caff failed");
    assert_eq!(caff.animation_count, 1);
    assert!(caff.credits.is_empty());
    assert_eq!(caff.animation.duration, 40);
    let image = caff.image();
    assert_eq!((image.width, image.height), (2, 2));
    assert_eq!(image.pixels.len(), 12);
    assert_eq!(image.caption, b"Hi\n".as_ref());
    assert_eq!(image.tags.len(), 1);
    assert_eq!(&image.tags[0][..], b"x\0");
}

#[test]
fn credits_blocks_are_collected_in_order() {
    let file = caff_header(1)
        .append_section(credits(2020, 7, 2, b"first"))
        .append_section(credits(2021, 1, 1, b""))
        .append_section(animation(ciff(1, 1, b"\n", b"\0")));
    let caff = caff_parse::read_caff(&mut stream(file)).expect("read_caff failed");
    assert_eq!(caff.credits.len(), 2);
    assert_eq!(caff.credits[0].creator, b"first".as_ref());
    assert_eq!(caff.credits[0].created.year, 2020);
    assert_eq!(caff.credits[1].created.year, 2021);
    assert!(caff.credits[1].creator.is_empty());
}

#[test]
fn parsing_stops_at_first_animation() {
    let file = caff_header(3)
        .append_section(animation(ciff(1, 1, b"first\n", b"\0")))
        .append_bytes(b"\xffthis is never looked at");
    let mut input = stream(file);
    let caff = caff_parse::read_caff(&mut input).expect("read_caff failed");
    assert_eq!(caff.animation_count, 3);
    assert_eq!(caff.image().caption, b"first\n".as_ref());
}

#[test]
fn duplicate_header_after_credits() {
    let file = caff_header(1)
        .append_section(credits(2020, 1, 1, b"someone"))
        .append_section(caff_header(1))
        .append_section(animation(ciff(1, 1, b"\n", b"\0")));
    assert!(matches!(caff_parse::read_caff(&mut stream(file)), Err(Error::DuplicateHeader)));
}

#[test]
fn first_block_must_be_header() {
    let file = credits(2020, 1, 1, b"").append_section(minimal_caff());
    assert!(matches!(caff_parse::read_caff(&mut stream(file)), Err(Error::MissingHeader)));
}

#[test]
fn unknown_block_is_fatal() {
    let file = caff_header(1)
        .append_section(block(0x09, Section::new().append_repeated(0, 20)))
        .append_section(animation(ciff(1, 1, b"\n", b"\0")));
    match caff_parse::read_caff(&mut stream(file)) {
        Err(Error::InvalidBlock { id, length }) => assert_eq!((id, length), (0x09, 20)),
        other => panic!("expected invalid block, got {other:?}"),
    }
}

#[test]
fn header_block_with_wrong_length() {
    let file = block(0x01, Section::new().append_bytes(b"CAFF").L64(20u64).L64(1u64).L8(0u8));
    assert!(matches!(caff_parse::read_caff(&mut stream(file)), Err(Error::InvalidBlock { id: 1, length: 21 })));
}

#[test]
fn zero_animations_rejected() {
    let file = caff_header(0).append_section(animation(ciff(1, 1, b"\n", b"\0")));
    assert!(matches!(caff_parse::read_caff(&mut stream(file)), Err(Error::NoAnimations)));
}

#[test]
fn credits_length_mismatch() {
    // Declared block length 20, creator length field 5: 20 - 14 != 5.
    let body = Section::new()
        .L16(2020u16)
        .L8(1u8)
        .L8(1u8)
        .L8(0u8)
        .L8(0u8)
        .L64(5u64)
        .append_bytes(b"sixsix");
    let file = caff_header(1)
        .append_section(block(0x02, body))
        .append_section(animation(ciff(1, 1, b"\n", b"\0")));
    match caff_parse::read_caff(&mut stream(file)) {
        Err(Error::LengthMismatch { declared, expected }) => assert_eq!((declared, expected), (5, 6)),
        other => panic!("expected length mismatch, got {other:?}"),
    }
}

#[test]
fn credits_block_limit() {
    let file = caff_header(1)
        .append_section(credits(2020, 1, 1, b"a"))
        .append_section(credits(2020, 1, 2, b"b"))
        .append_section(animation(ciff(1, 1, b"\n", b"\0")));
    let config = DecodeConfig::default().with_max_credits_blocks(1);
    assert!(matches!(
        caff_parse::read_caff_with_config(&mut stream(file), &config),
        Err(Error::ResourceLimitExceeded(_))
    ));
}

#[test]
fn every_truncation_is_reported_as_truncated() {
    let full = minimal_caff().get_contents().expect("contents");
    for len in 0..full.len() {
        let mut input = Cursor::new(full[..len].to_vec());
        match caff_parse::read_caff(&mut input) {
            Err(Error::Truncated { offset, needed, available }) => {
                assert!(offset <= len as u64, "offset {offset} beyond input {len}");
                assert!(available < needed);
            },
            other => panic!("prefix of {len} bytes: expected truncation, got {other:?}"),
        }
    }
    assert!(caff_parse::read_caff(&mut Cursor::new(full)).is_ok());
}

#[test]
fn content_size_mismatch_before_pixels() {
    let image = Section::new()
        .append_bytes(b"CIFF")
        .L64(40u64)
        .L64(10u64)
        .L64(2u64)
        .L64(2u64)
        .append_bytes(b"x\n\0\0");
    let file = caff_header(1).append_section(animation(image));
    assert!(matches!(
        caff_parse::read_caff(&mut stream(file)),
        Err(Error::ContentSizeMismatch { content_size: 10, width: 2, height: 2 })
    ));
}

// ============================================================================
// Standalone CIFF and encoding
// ============================================================================

#[test]
fn standalone_ciff() {
    let image = caff_parse::read_ciff(&mut stream(ciff(3, 1, b"caption\n", b"a\0b\0")))
        .expect("read_ciff failed");
    assert_eq!(image.content_size, 9);
    assert_eq!(image.tags.len(), 2);
    assert_eq!(image.to_string(), "CIFF size: 3 x 1\nCaption: caption\nTags: a b");
}

#[derive(Default)]
struct RecordingSink {
    calls: Vec<(std::path::PathBuf, u64, u64, u8, usize)>,
    fail: bool,
}

impl ImageSink for RecordingSink {
    fn write_rgb(&mut self, path: &Path, width: u64, height: u64, channels: u8, pixels: &[u8]) -> caff_parse::Result<()> {
        self.calls.push((path.to_path_buf(), width, height, channels, pixels.len()));
        if self.fail {
            return Err(Error::EncodeFailed("sink refused".into()));
        }
        Ok(())
    }
}

#[test]
fn image_is_handed_to_sink() {
    let caff = caff_parse::read_caff(&mut stream(minimal_caff())).expect("read_caff failed");
    let mut sink = RecordingSink::default();
    let output = caff_parse::CiffImage::output_path("minimal");
    caff.image().write_to(&mut sink, &output).expect("write_to failed");
    assert_eq!(sink.calls, vec![(output, 2, 2, 3, 12)]);
}

#[test]
fn sink_failure_is_encode_failed() {
    let caff = caff_parse::read_caff(&mut stream(minimal_caff())).expect("read_caff failed");
    let mut sink = RecordingSink { fail: true, ..Default::default() };
    let res = caff.image().write_to(&mut sink, Path::new("unused.jpg"));
    assert!(matches!(res, Err(Error::EncodeFailed(_))));
}

// ============================================================================
// Sample files
// ============================================================================

#[test]
fn sample_caff_with_credits() {
    let input = &mut File::open(CAFF_WITH_CREDITS).expect("Unknown file");
    let caff = caff_parse::read_caff(input).expect("read_caff failed");
    assert_eq!(caff.animation_count, 2);
    assert_eq!(caff.credits.len(), 1);
    assert_eq!(caff.credits[0].creator_lossy(), "Test Creator");
    assert_eq!(caff.credits[0].to_string(), "CAFF Creator: Test Creator\nCreation date: 2020.7.2. 14:50");

    let image = caff.into_image();
    assert_eq!((image.width, image.height), (4, 3));
    assert_eq!(image.pixels.len(), 36);
    let tags: Vec<_> = image.tags_lossy().collect();
    assert_eq!(tags, ["landscape", "sunset", "mountains"]);
}

#[test]
fn sample_caff_without_credits() {
    let input = &mut File::open(CAFF_NO_CREDITS).expect("Unknown file");
    let caff = caff_parse::read_caff(input).expect("read_caff failed");
    assert!(caff.credits.is_empty());
    assert_eq!(caff.image().caption, b"\n".as_ref());
}

#[test]
fn sample_trailing_garbage_is_never_read() {
    let input = &mut File::open(CAFF_TRAILING_GARBAGE).expect("Unknown file");
    assert!(caff_parse::read_caff(input).is_ok());
}

#[test]
fn sample_ciff_matches_embedded_frame() {
    let ciff = caff_parse::read_ciff(&mut File::open(CIFF_STANDALONE).expect("Unknown file"))
        .expect("read_ciff failed");
    let caff = caff_parse::read_caff(&mut File::open(CAFF_WITH_CREDITS).expect("Unknown file"))
        .expect("read_caff failed");
    assert_eq!(&ciff.pixels[..], &caff.image().pixels[..]);
    assert_eq!(&ciff.caption[..], &caff.image().caption[..]);
}

#[test]
fn sample_converts_to_jpeg() {
    let image = caff_parse::read_caff(&mut File::open(CAFF_WITH_CREDITS).expect("Unknown file"))
        .expect("read_caff failed")
        .into_image();
    let output = std::env::temp_dir().join(format!("caff-parse-sample-{}.jpg", std::process::id()));
    image
        .write_to(&mut caff_parse::JpegFile::default(), &output)
        .expect("jpeg encode failed");
    let written = std::fs::read(&output).expect("jpeg not written");
    std::fs::remove_file(&output).expect("cleanup");
    assert_eq!(&written[..2], &[0xff, 0xd8]);
}

fn parse_file(path: &Path) -> caff_parse::Result<()> {
    let input = &mut File::open(path).expect("bad file");
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("caff") => caff_parse::read_caff(input).map(drop),
        _ => caff_parse::read_ciff(input).map(drop),
    }
}

fn sample_files(dir: &str) -> impl Iterator<Item = std::path::PathBuf> {
    walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .map(|entry| entry.expect("sample entry").into_path())
        .filter(|path| {
            path.is_file() && matches!(path.extension().and_then(|ext| ext.to_str()), Some("caff" | "ciff"))
        })
}

#[test]
fn all_valid_samples_parse() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
    let mut errors = 0;
    let mut seen = 0;
    for path in sample_files(FIXTURES) {
        log::debug!("parsing {:?}", path.display());
        seen += 1;
        if let Err(err) = parse_file(&path) {
            log::error!("{:?}: {err}", path.display());
            errors += 1;
        }
    }
    assert!(seen > 0);
    assert_eq!(0, errors);
}

#[test]
fn all_corrupt_samples_fail() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
    let mut seen = 0;
    for path in sample_files(CORRUPT_FIXTURES) {
        seen += 1;
        match parse_file(&path) {
            Ok(()) => panic!("{:?} should not parse", path.display()),
            Err(err) => log::debug!("{:?}: {err}", path.display()),
        }
    }
    assert!(seen > 0);
}
