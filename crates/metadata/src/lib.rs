use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use common::{file_name_string, slash_path};
use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

const WAV_BYTE_RATE_OFFSET: u64 = 28;
const WAV_HEADER_LEN: u64 = 44;

/// The fixed tag shape handed to the library: title, artist, album, track,
/// length, year, genre, path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<u32>,
    pub length: String,
    pub year: Option<i32>,
    pub genre: Option<String>,
    /// The path as the reader saw it. The library keys its rows by its own
    /// normalized form of the requested path and does not store this value.
    pub path: String,
}

impl TagRecord {
    /// A record carrying nothing but the file name as title.
    pub fn untagged(path: &Path, length: String) -> Self {
        Self {
            title: file_name_string(path),
            artist: None,
            album: None,
            track: None,
            length,
            year: None,
            genre: None,
            path: slash_path(path),
        }
    }
}

pub trait TagSource {
    fn read(&self, path: &Path) -> Result<TagRecord, MetadataError>;
}

/// Reads tags from disk: WAV files get a header-derived length only, every
/// other format goes through lofty.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTagReader;

impl TagSource for FileTagReader {
    fn read(&self, path: &Path) -> Result<TagRecord, MetadataError> {
        if is_wav(path) {
            read_wav_tags(path)
        } else {
            read_tags(path)
        }
    }
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    PathNotFound(String),
    InvalidWav(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::PathNotFound(path) => write!(f, "file doesn't exist: {}", path),
            MetadataError::InvalidWav(path) => write!(f, "truncated wav header: {}", path),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TagRecord, MetadataError> {
    ensure_exists(path)?;
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut record = TagRecord::untagged(path, format_length(properties.duration().as_secs()));

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        if let Some(title) = tag.get_string(&ItemKey::TrackTitle).and_then(non_blank) {
            record.title = title;
        }
        record.artist = tag.get_string(&ItemKey::TrackArtist).and_then(non_blank);
        record.album = tag.get_string(&ItemKey::AlbumTitle).and_then(non_blank);
        record.track = tag.get_string(&ItemKey::TrackNumber).and_then(parse_track);
        record.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        record.genre = tag.get_string(&ItemKey::Genre).and_then(non_blank);
    }

    Ok(record)
}

/// WAV has no tag format worth trusting, so only the length is derived, from
/// the byte rate stored in the header.
pub fn read_wav_tags(path: &Path) -> Result<TagRecord, MetadataError> {
    ensure_exists(path)?;
    let seconds = wav_length_secs(path)?;
    Ok(TagRecord::untagged(path, format_length(seconds)))
}

pub fn wav_length_secs(path: &Path) -> Result<u64, MetadataError> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    if file_size < WAV_BYTE_RATE_OFFSET + 4 {
        return Err(MetadataError::InvalidWav(path.to_string_lossy().to_string()));
    }

    file.seek(SeekFrom::Start(WAV_BYTE_RATE_OFFSET))?;
    let mut raw = [0u8; 4];
    file.read_exact(&mut raw)?;
    let byte_rate = u32::from_le_bytes(raw);

    if byte_rate == 0 {
        return Ok(0);
    }
    Ok(file_size.saturating_sub(WAV_HEADER_LEN) / u64::from(byte_rate))
}

/// `M:SS`, minutes unbounded.
pub fn format_length(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub fn is_wav(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

fn ensure_exists(path: &Path) -> Result<(), MetadataError> {
    if path.exists() {
        Ok(())
    } else {
        Err(MetadataError::PathNotFound(path.to_string_lossy().to_string()))
    }
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_track(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn wav_bytes(byte_rate: u32, data_len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; WAV_HEADER_LEN as usize];
        bytes[..4].copy_from_slice(b"RIFF");
        bytes[8..12].copy_from_slice(b"WAVE");
        bytes[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        bytes.extend(std::iter::repeat(0u8).take(data_len));
        bytes
    }

    #[test]
    fn formats_lengths() {
        assert_eq!(format_length(0), "0:00");
        assert_eq!(format_length(7), "0:07");
        assert_eq!(format_length(65), "1:05");
        assert_eq!(format_length(3725), "62:05");
    }

    #[test]
    fn parses_track_numbers() {
        assert_eq!(parse_track("3"), Some(3));
        assert_eq!(parse_track("03/12"), Some(3));
        assert_eq!(parse_track("A1"), None);
    }

    #[test]
    fn parses_years() {
        assert_eq!(parse_year("1997"), Some(1997));
        assert_eq!(parse_year("2004-05-01"), Some(2004));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn wav_length_comes_from_byte_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Take Five.WAV");
        fs::write(&path, wav_bytes(1000, 125_000)).unwrap();

        let record = FileTagReader.read(&path).unwrap();
        assert_eq!(record.title, "Take Five.WAV");
        assert_eq!(record.length, "2:05");
        assert_eq!(record.artist, None);
        assert_eq!(record.album, None);
        assert_eq!(record.track, None);
        assert_eq!(record.year, None);
        assert_eq!(record.genre, None);
    }

    #[test]
    fn zero_byte_rate_is_zero_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        fs::write(&path, wav_bytes(0, 500)).unwrap();

        assert_eq!(read_wav_tags(&path).unwrap().length, "0:00");
    }

    #[test]
    fn truncated_wav_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        fs::write(&path, b"RIFF").unwrap();

        assert!(matches!(read_wav_tags(&path), Err(MetadataError::InvalidWav(_))));
    }

    #[test]
    fn missing_files_are_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.mp3");

        assert!(matches!(
            FileTagReader.read(&path),
            Err(MetadataError::PathNotFound(_))
        ));
    }

    const FLAC_SAMPLE_RATE: u32 = 44_100;

    fn flac_block(ty: u8, last: bool, content: &[u8]) -> Vec<u8> {
        let mut block = vec![if last { ty | 0x80 } else { ty }];
        block.extend_from_slice(&(content.len() as u32).to_be_bytes()[1..]);
        block.extend_from_slice(content);
        block
    }

    /// A metadata-only FLAC stream: STREAMINFO for `seconds` of 16-bit stereo
    /// audio plus an optional Vorbis comment block.
    fn flac_bytes(seconds: u32, comments: &[&str]) -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(&4096u16.to_be_bytes());
        info.extend_from_slice(&4096u16.to_be_bytes());
        info.extend_from_slice(&[0u8; 6]);
        let packed = (FLAC_SAMPLE_RATE << 12) | (1 << 9) | (15 << 4);
        info.extend_from_slice(&packed.to_be_bytes());
        info.extend_from_slice(&(FLAC_SAMPLE_RATE * seconds).to_be_bytes());
        info.extend_from_slice(&[0u8; 16]);

        let mut bytes = b"fLaC".to_vec();
        bytes.extend(flac_block(0, comments.is_empty(), &info));
        if !comments.is_empty() {
            let vendor = b"libsync tests";
            let mut body = Vec::new();
            body.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
            body.extend_from_slice(vendor);
            body.extend_from_slice(&(comments.len() as u32).to_le_bytes());
            for comment in comments {
                body.extend_from_slice(&(comment.len() as u32).to_le_bytes());
                body.extend_from_slice(comment.as_bytes());
            }
            bytes.extend(flac_block(4, true, &body));
        }
        bytes
    }

    #[test]
    fn flac_tags_are_read_through_lofty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        fs::write(
            &path,
            flac_bytes(
                65,
                &[
                    "TITLE=So What",
                    "ARTIST= ",
                    "ALBUM=Kind of Blue",
                    "TRACKNUMBER=03/12",
                    "DATE=2004-05-01",
                    "GENRE=Jazz",
                ],
            ),
        )
        .unwrap();

        let record = FileTagReader.read(&path).unwrap();
        assert_eq!(record.title, "So What");
        assert_eq!(record.artist, None);
        assert_eq!(record.album.as_deref(), Some("Kind of Blue"));
        assert_eq!(record.track, Some(3));
        assert_eq!(record.year, Some(2004));
        assert_eq!(record.genre.as_deref(), Some("Jazz"));
        assert_eq!(record.length, "1:05");
    }

    #[test]
    fn untagged_flac_is_titled_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Untitled 7.flac");
        fs::write(&path, flac_bytes(7, &[])).unwrap();

        let record = read_tags(&path).unwrap();
        assert_eq!(record.title, "Untitled 7.flac");
        assert_eq!(record.length, "0:07");
        assert_eq!(record.artist, None);
        assert_eq!(record.track, None);
    }

    #[test]
    fn undecodable_audio_is_a_tag_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.flac");
        fs::write(&path, b"this is not a flac stream").unwrap();

        assert!(matches!(
            FileTagReader.read(&path),
            Err(MetadataError::Lofty(_))
        ));
    }
}
