//! Conversions between the date-time representations of the value union.
//!
//! The wire format stores timestamps as FILETIME ticks; the other
//! representations exist so callers can re-tag raw integers recovered from
//! property bytes and normalize everything to POSIX seconds.

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_POSIX_DELTA: i64 = 11_644_473_600;

/// Seconds between 1904-01-01 and 1970-01-01.
const HFS_POSIX_DELTA: i64 = 2_082_844_800;

/// Julian day number of 1970-01-01.
const POSIX_JULIAN_DAY: i64 = 2_440_588;

/// 100-nanosecond ticks since 1601-01-01 UTC.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Filetime(pub u64);

impl Filetime {
    pub fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub fn to_posix_seconds(self) -> i64 {
        (self.0 / 10_000_000) as i64 - FILETIME_POSIX_DELTA
    }

    pub fn subsecond_nanoseconds(self) -> u32 {
        ((self.0 % 10_000_000) * 100) as u32
    }
}

/// Seconds since 1970-01-01 UTC.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct PosixTime(pub i64);

impl PosixTime {
    pub fn to_filetime(self) -> Filetime {
        Filetime(((self.0 + FILETIME_POSIX_DELTA) * 10_000_000) as u64)
    }
}

/// Seconds since 1904-01-01 UTC, as used by HFS volumes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct HfsTime(pub u32);

impl HfsTime {
    pub fn to_posix_seconds(self) -> i64 {
        i64::from(self.0) - HFS_POSIX_DELTA
    }
}

/// MS-DOS packed date and time: a 16-bit date word and a 16-bit time word
/// with two-second resolution, local time.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct FatDateTime {
    pub date: u16,
    pub time: u16,
}

impl FatDateTime {
    pub fn from_raw(value: u32) -> Self {
        Self {
            date: (value >> 16) as u16,
            time: value as u16,
        }
    }

    pub fn year(self) -> u16 {
        1980 + (self.date >> 9)
    }

    pub fn month(self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub fn day(self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hours(self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minutes(self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    pub fn seconds(self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }
}

/// Notes storage facility timestamp: a Julian day number and hundredths of a
/// second since midnight.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct NsfTime {
    pub julian_day: u32,
    pub hundredths: u32,
}

impl NsfTime {
    pub fn from_raw(value: u64) -> Self {
        Self {
            julian_day: ((value >> 32) & 0x00FF_FFFF) as u32,
            hundredths: value as u32,
        }
    }

    pub fn to_posix_seconds(self) -> i64 {
        (i64::from(self.julian_day) - POSIX_JULIAN_DAY) * 86_400
            + i64::from(self.hundredths / 100)
    }
}
