// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Convert the first frame of a CAFF animation, or a CIFF image, to JPEG.

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use caff_parse::{CiffImage, DecodeConfig, JpegFile, TryVec};
use clap::Parser;

const MODE_LEN: usize = 5;
const MIN_PATH_LEN: usize = 6;
const MAX_PATH_LEN: usize = 260;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// -caff or -ciff
    #[arg(allow_hyphen_values = true)]
    mode: String,
    /// Input file; its extension must match the mode
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Caff,
    Ciff,
}

impl Mode {
    fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "-caff" => Some(Self::Caff),
            "-ciff" => Some(Self::Ciff),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Caff => ".caff",
            Self::Ciff => ".ciff",
        }
    }
}

/// Check the arguments and return the mode and the output base name.
fn validate(cli: &Cli) -> Result<(Mode, String), String> {
    let path_len = cli.path.as_os_str().len();
    if cli.mode.len() != MODE_LEN || !(MIN_PATH_LEN..=MAX_PATH_LEN).contains(&path_len) {
        return Err("invalid parameters".into());
    }
    if !cli.path.is_file() {
        return Err(format!("incorrect file path: {}", cli.path.display()));
    }
    let mode = Mode::from_flag(&cli.mode).ok_or("invalid parameters")?;
    let file_name = cli
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or("invalid parameters")?;
    let stem = file_name
        .strip_suffix(mode.extension())
        .ok_or_else(|| format!("{file_name} does not end in {}", mode.extension()))?;
    Ok((mode, stem.to_owned()))
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let (mode, stem) = validate(cli)?;
    let config = DecodeConfig::default();
    let mut input = BufReader::new(File::open(&cli.path)?);

    let (credits, image) = match mode {
        Mode::Caff => {
            let caff = caff_parse::read_caff_with_config(&mut input, &config)?;
            log::info!("{} animations announced, using the first", caff.animation_count);
            (caff.credits, caff.animation.image)
        },
        Mode::Ciff => (TryVec::new(), caff_parse::read_ciff_with_config(&mut input, &config)?),
    };

    let output = CiffImage::output_path(&stem);
    image.write_to(&mut JpegFile::default(), &output)?;

    for block in credits.iter() {
        println!("{block}");
    }
    println!("{image}");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        },
    }
}

#[test]
fn mode_flags() {
    assert_eq!(Mode::from_flag("-caff"), Some(Mode::Caff));
    assert_eq!(Mode::from_flag("-ciff"), Some(Mode::Ciff));
    assert_eq!(Mode::from_flag("-jpeg"), None);
    assert_eq!(Mode::Caff.extension(), ".caff");
}

#[test]
fn rejects_bad_arguments() {
    let cli = |mode: &str, path: &str| Cli { mode: mode.into(), path: path.into() };
    assert!(validate(&cli("-caf", "some.caff")).is_err());
    assert!(validate(&cli("-caff", "a.caf")).is_err());
    assert!(validate(&cli("-caff", &"x".repeat(261))).is_err());
    assert!(validate(&cli("-caff", "/nonexistent/file.caff")).is_err());
}

#[test]
fn extension_must_match_mode() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("caff2jpeg-{}.caff", std::process::id()));
    std::fs::write(&path, b"").unwrap();
    let caff = Cli { mode: "-caff".into(), path: path.clone() };
    let ciff = Cli { mode: "-ciff".into(), path: path.clone() };
    let stem = validate(&caff).map(|(_, stem)| stem);
    let mismatch = validate(&ciff);
    std::fs::remove_file(&path).unwrap();
    assert_eq!(stem.unwrap(), format!("caff2jpeg-{}", std::process::id()));
    assert!(mismatch.is_err());
}

#[test]
fn cli_accepts_hyphenated_mode() {
    let cli = Cli::try_parse_from(["caff2jpeg", "-caff", "input.caff"]).unwrap();
    assert_eq!(cli.mode, "-caff");
    assert_eq!(cli.path, PathBuf::from("input.caff"));
    assert!(Cli::try_parse_from(["caff2jpeg", "-caff"]).is_err());
}
