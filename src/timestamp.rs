use std::{
    fs::{File, Metadata},
    io::{self, BufReader},
    path::Path,
};

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use exif::{In, Reader, Tag, Value};
use serde::Deserialize;

/// Which clock decides whether a file is new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampKind {
    #[default]
    Modified,
    Exif,
}

pub trait TimestampExtractor {
    fn timestamp(&self, path: &Path, metadata: &Metadata) -> io::Result<DateTime<Utc>>;
}

/// Filesystem modification time.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModifiedTime;

impl TimestampExtractor for ModifiedTime {
    fn timestamp(&self, _path: &Path, metadata: &Metadata) -> io::Result<DateTime<Utc>> {
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }
}

/// EXIF `DateTimeOriginal`, falling back to the modification time for files
/// without one (videos, screenshots, unreadable containers).
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifDateTimeOriginal;

impl TimestampExtractor for ExifDateTimeOriginal {
    fn timestamp(&self, path: &Path, metadata: &Metadata) -> io::Result<DateTime<Utc>> {
        match read_date_time_original(path)? {
            Some(create_time) => Ok(create_time),
            None => ModifiedTime.timestamp(path, metadata),
        }
    }
}

pub fn extractor_for(kind: TimestampKind) -> Box<dyn TimestampExtractor> {
    match kind {
        TimestampKind::Modified => Box::new(ModifiedTime),
        TimestampKind::Exif => Box::new(ExifDateTimeOriginal),
    }
}

/// Only an unopenable file is an error; missing or garbled EXIF is `None`.
fn read_date_time_original(path: &Path) -> io::Result<Option<DateTime<Utc>>> {
    let file = File::open(path)?;
    let mut buf_reader = BufReader::new(file);
    let exif = match Reader::new().read_from_container(&mut buf_reader) {
        Ok(exif) => exif,
        Err(e) => {
            log::debug!("no exif in {:?}: {}", path, e);
            return Ok(None);
        }
    };
    let field = match exif.get_field(Tag::DateTimeOriginal, In::PRIMARY) {
        Some(field) => field,
        None => {
            log::debug!("DateTimeOriginal not exist in {:?}", path);
            return Ok(None);
        }
    };
    let ascii = match field.value {
        Value::Ascii(ref vec) if !vec.is_empty() => &vec[0],
        _ => {
            log::warn!("DateTimeOriginal in {:?} is not ascii", path);
            return Ok(None);
        }
    };
    // 2022:01:23 12:42:12
    let date_time = match exif::DateTime::from_ascii(ascii) {
        Ok(date_time) => date_time,
        Err(e) => {
            log::warn!("bad DateTimeOriginal in {:?}: {}", path, e);
            return Ok(None);
        }
    };
    let naive = NaiveDate::from_ymd_opt(
        date_time.year.into(),
        date_time.month.into(),
        date_time.day.into(),
    )
    .and_then(|date| {
        date.and_hms_nano_opt(
            date_time.hour.into(),
            date_time.minute.into(),
            date_time.second.into(),
            date_time.nanosecond.unwrap_or(0),
        )
    });
    let naive = match naive {
        Some(naive) => naive,
        None => {
            log::warn!("DateTimeOriginal out of range in {:?}", path);
            return Ok(None);
        }
    };
    let create_time = match date_time.offset {
        Some(minutes) => FixedOffset::east_opt(i32::from(minutes) * 60)
            .and_then(|offset| offset.from_local_datetime(&naive).single())
            .map(|t| t.with_timezone(&Utc)),
        None => local_to_utc(&naive),
    };
    if create_time.is_none() {
        log::warn!("DateTimeOriginal {} has no local time in {:?}", naive, path);
    }
    Ok(create_time)
}

/// Ambiguous local times (DST fold) resolve to the earlier instant.
fn local_to_utc(naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// Parses a user-supplied time: RFC 3339, or a local `YYYY-MM-DD[( |T)HH:MM:SS]`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return local_to_utc(&naive).ok_or_else(|| format!("{} is not a valid local time", value));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return local_to_utc(&naive)
                .ok_or_else(|| format!("{} is not a valid local time", value));
        }
    }
    Err(format!(
        "invalid time {:?}, expected RFC 3339, YYYY-MM-DD HH:MM:SS or YYYY-MM-DD",
        value
    ))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{Local, NaiveDate, TimeZone, Utc};
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    use super::{extractor_for, parse_timestamp, TimestampKind};

    /// A JPEG carrying only an APP1 segment with DateTimeOriginal "2022:01:23 12:42:12".
    fn jpeg_with_date_time_original() -> Vec<u8> {
        let mut tiff: Vec<u8> = Vec::new();
        // big-endian header, IFD0 at offset 8
        tiff.extend_from_slice(&[0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08]);
        // IFD0: one entry, ExifIFDPointer -> 26
        tiff.extend_from_slice(&[0x00, 0x01]);
        tiff.extend_from_slice(&[0x87, 0x69, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x1A]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        // Exif IFD: one entry, DateTimeOriginal ASCII[20] at 44
        tiff.extend_from_slice(&[0x00, 0x01]);
        tiff.extend_from_slice(&[0x90, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0x14]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x2C]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        tiff.extend_from_slice(b"2022:01:23 12:42:12\0");
        assert_eq!(tiff.len(), 64);

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&tiff);
        let len = (app1.len() + 2) as u16;

        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
        jpeg.extend_from_slice(&len.to_be_bytes());
        jpeg.extend_from_slice(&app1);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn test_modified_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 500)).unwrap();

        let metadata = fs::metadata(&path).unwrap();
        let t = extractor_for(TimestampKind::Modified)
            .timestamp(&path, &metadata)
            .unwrap();
        assert_eq!(t, Utc.timestamp_opt(1_600_000_000, 500).unwrap());
    }

    #[test]
    fn test_exif_date_time_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("IMG_2075.JPG");
        fs::write(&path, jpeg_with_date_time_original()).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(100, 0)).unwrap();

        let metadata = fs::metadata(&path).unwrap();
        let t = extractor_for(TimestampKind::Exif)
            .timestamp(&path, &metadata)
            .unwrap();
        let expected = Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2022, 1, 23)
                    .unwrap()
                    .and_hms_opt(12, 42, 12)
                    .unwrap(),
            )
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(t, expected);
    }

    #[test]
    fn test_exif_falls_back_to_modified_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"\0\0\0\x18ftypmp42").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(200, 0)).unwrap();

        let metadata = fs::metadata(&path).unwrap();
        let t = extractor_for(TimestampKind::Exif)
            .timestamp(&path, &metadata)
            .unwrap();
        assert_eq!(t, Utc.timestamp_opt(200, 0).unwrap());
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp("2023-05-01T10:00:00Z").unwrap(),
            Utc.with_ymd_and_hms(2023, 5, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("2023-05-01T12:00:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2023, 5, 1, 10, 0, 0).unwrap()
        );
        let local = Local
            .with_ymd_and_hms(2023, 5, 1, 10, 30, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp("2023-05-01 10:30:00").unwrap(), local);
        assert_eq!(parse_timestamp("2023-05-01T10:30:00").unwrap(), local);
        let midnight = Local
            .with_ymd_and_hms(2023, 5, 1, 0, 0, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp("2023-05-01").unwrap(), midnight);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
