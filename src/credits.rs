// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;
use std::fmt;
use std::io::{Read, Seek};

use crate::reader::BoundedReader;
use crate::{Error, Result, TryString, TryVec};

/// Date(6) + creator length(8).
pub(crate) const CREDITS_FIXED_SIZE: u64 = 14;

/// When the animation was created.
///
/// The bounds are the ones the format has always accepted: hour 24 and
/// minute 60 pass, and year 0 is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl CreationDate {
    fn validate(&self) -> Result<()> {
        let out_of_range = |field, value| Err(Error::DateOutOfRange { field, value });
        if self.year > 9999 {
            return out_of_range("year", self.year);
        }
        if !(1..=12).contains(&self.month) {
            return out_of_range("month", self.month.into());
        }
        if !(1..=31).contains(&self.day) {
            return out_of_range("day", self.day.into());
        }
        if self.hour > 24 {
            return out_of_range("hour", self.hour.into());
        }
        if self.minute > 60 {
            return out_of_range("minute", self.minute.into());
        }
        Ok(())
    }
}

impl fmt::Display for CreationDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}. {}:{}", self.year, self.month, self.day, self.hour, self.minute)
    }
}

/// CAFF credits block: creation date and creator.
#[derive(Debug)]
pub struct CreditsBlock {
    pub created: CreationDate,
    /// Raw creator bytes; not guaranteed to be UTF-8.
    pub creator: TryString,
}

impl CreditsBlock {
    /// Creator name, with invalid UTF-8 replaced.
    pub fn creator_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.creator)
    }
}

impl fmt::Display for CreditsBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.creator.is_empty() {
            writeln!(f, "CAFF Creator: {}", self.creator_lossy())?;
        }
        write!(f, "Creation date: {}", self.created)
    }
}

/// Parse the body of a credits block whose header declared `length` bytes.
pub(crate) fn read_credits<T: Read + Seek>(src: &mut BoundedReader<'_, T>, length: u64) -> Result<CreditsBlock> {
    src.ensure(length)?;

    let created = CreationDate {
        year: src.read_u16()?,
        month: src.read_u8()?,
        day: src.read_u8()?,
        hour: src.read_u8()?,
        minute: src.read_u8()?,
    };
    let creator_length = src.read_u64()?;

    created.validate()?;

    let expected = length
        .checked_sub(CREDITS_FIXED_SIZE)
        .ok_or(Error::LengthMismatch { declared: creator_length, expected: 0 })?;
    if creator_length != expected {
        return Err(Error::LengthMismatch { declared: creator_length, expected });
    }

    let creator = if creator_length > 0 {
        src.read_bytes(creator_length)?
    } else {
        TryVec::new()
    };

    debug!("credits: {created}, creator {creator_length} bytes");
    Ok(CreditsBlock { created, creator })
}

#[cfg(test)]
fn credits_body(year: u16, date: [u8; 4], creator_length: u64, creator: &[u8]) -> std::io::Cursor<std::vec::Vec<u8>> {
    let mut body = std::vec::Vec::new();
    body.extend_from_slice(&year.to_le_bytes());
    body.extend_from_slice(&date);
    body.extend_from_slice(&creator_length.to_le_bytes());
    body.extend_from_slice(creator);
    std::io::Cursor::new(body)
}

#[test]
fn credits_with_creator() {
    let mut src = credits_body(2020, [7, 4, 13, 37], 8, b"Test Guy");
    let mut r = BoundedReader::new(&mut src).unwrap();
    let credits = read_credits(&mut r, 22).unwrap();
    assert_eq!(credits.created, CreationDate { year: 2020, month: 7, day: 4, hour: 13, minute: 37 });
    assert_eq!(credits.creator, b"Test Guy".as_ref());
    assert_eq!(r.remaining(), 0);
    assert_eq!(credits.to_string(), "CAFF Creator: Test Guy\nCreation date: 2020.7.4. 13:37");
}

#[test]
fn credits_without_creator() {
    let mut src = credits_body(1999, [12, 31, 0, 0], 0, b"");
    let mut r = BoundedReader::new(&mut src).unwrap();
    let credits = read_credits(&mut r, 14).unwrap();
    assert!(credits.creator.is_empty());
    assert_eq!(credits.to_string(), "Creation date: 1999.12.31. 0:0");
}

#[test]
fn creator_length_must_fill_block() {
    let mut src = credits_body(2021, [1, 1, 0, 0], 5, b"abcdef");
    let mut r = BoundedReader::new(&mut src).unwrap();
    match read_credits(&mut r, 20) {
        Err(Error::LengthMismatch { declared, expected }) => assert_eq!((declared, expected), (5, 6)),
        other => panic!("expected length mismatch, got {other:?}"),
    }
}

#[test]
fn permissive_time_bounds() {
    let mut src = credits_body(0, [1, 1, 24, 60], 0, b"");
    let mut r = BoundedReader::new(&mut src).unwrap();
    assert!(read_credits(&mut r, 14).is_ok());
}

#[test]
fn date_fields_out_of_range() {
    let cases: [(u16, [u8; 4], &str); 6] = [
        (10000, [1, 1, 0, 0], "year"),
        (2000, [0, 1, 0, 0], "month"),
        (2000, [13, 1, 0, 0], "month"),
        (2000, [1, 32, 0, 0], "day"),
        (2000, [1, 1, 25, 0], "hour"),
        (2000, [1, 1, 0, 61], "minute"),
    ];
    for (year, date, which) in cases {
        let mut src = credits_body(year, date, 0, b"");
        let mut r = BoundedReader::new(&mut src).unwrap();
        match read_credits(&mut r, 14) {
            Err(Error::DateOutOfRange { field, .. }) => assert_eq!(field, which),
            other => panic!("{which}: expected date error, got {other:?}"),
        }
    }
}

#[test]
fn credits_block_longer_than_input() {
    let mut src = credits_body(2000, [1, 1, 0, 0], 10, b"short");
    let mut r = BoundedReader::new(&mut src).unwrap();
    assert!(matches!(read_credits(&mut r, 24), Err(Error::Truncated { .. })));
    assert_eq!(r.offset(), 0);
}
