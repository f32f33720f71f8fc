//! # Kept Audio Files
//!
//! Every analyzed recording is written to the uploads directory as a
//! 16-bit mono WAV named `{record id}.wav`, and served back through
//! `GET /api/v1/uploads/{file}`.
//!
//! Only canonical `{uuid}.wav` names are ever opened, so a request cannot
//! reach outside the directory.

use crate::analysis::AnalysisError;
use crate::audio::AudioClip;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Route prefix the kept files are served under.
pub const UPLOADS_ROUTE: &str = "/api/v1/uploads";

/// Public URL of a kept file.
pub fn file_url(file_name: &str) -> String {
    format!("{}/{}", UPLOADS_ROUTE, file_name)
}

/// Whether `name` is a file name the archive could have written.
pub fn is_archive_name(name: &str) -> bool {
    name.strip_suffix(".wav")
        .and_then(|stem| Uuid::parse_str(stem).ok().map(|id| id.to_string() == stem))
        .unwrap_or(false)
}

/// Directory of kept recordings.
#[derive(Debug, Clone)]
pub struct AudioArchive {
    dir: PathBuf,
}

impl AudioArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `clip` as `{id}.wav` and return the file name.
    ///
    /// Samples are clamped to [-1.0, 1.0] and stored as 16-bit PCM at the
    /// clip's own rate. The directory is created on first use.
    pub fn write_clip(&self, id: Uuid, clip: &AudioClip) -> Result<String, AnalysisError> {
        let file_name = format!("{}.wav", id);
        let path = self.dir.join(&file_name);

        fs::create_dir_all(&self.dir).map_err(|e| write_error(&self.dir, e))?;

        let pcm: Vec<i16> = clip
            .samples()
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, clip.sample_rate(), 16);

        let file = fs::File::create(&path).map_err(|e| write_error(&path, e))?;
        let mut writer = BufWriter::new(file);
        wav::write(header, &wav::BitDepth::Sixteen(pcm), &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| write_error(&path, e))?;

        tracing::debug!("Kept {:.1}s of audio as {}", clip.duration_seconds(), path.display());
        Ok(file_name)
    }

    /// Bytes of a kept file; `None` when the name is not one the archive
    /// writes or the file does not exist.
    pub fn read(&self, file_name: &str) -> Result<Option<Vec<u8>>, AnalysisError> {
        if !is_archive_name(file_name) {
            return Ok(None);
        }
        let path = self.dir.join(file_name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AnalysisError::Persistence(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Delete a kept file, e.g. after its record failed to save.
    pub fn remove(&self, file_name: &str) {
        if !is_archive_name(file_name) {
            return;
        }
        if let Err(e) = fs::remove_file(self.dir.join(file_name)) {
            tracing::warn!("Could not remove kept audio {}: {}", file_name, e);
        }
    }
}

fn write_error(path: &Path, e: io::Error) -> AnalysisError {
    AnalysisError::Persistence(format!("cannot write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_archive_names() {
        let id = Uuid::new_v4();
        assert!(is_archive_name(&format!("{}.wav", id)));

        assert!(!is_archive_name(&id.to_string()));
        assert!(!is_archive_name(&format!("{}.mp3", id)));
        assert!(!is_archive_name(&format!("{}.wav", id.simple())));
        assert!(!is_archive_name("../config.toml"));
        assert!(!is_archive_name("..%2Fsecret.wav"));
        assert!(!is_archive_name(&format!("../{}.wav", id)));
        assert!(!is_archive_name(""));
    }

    #[test]
    fn test_clip_round_trips_through_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AudioArchive::new(dir.path().join("nested"));
        let id = Uuid::new_v4();
        let clip = AudioClip::new(vec![0.0, 0.5, -0.5, 2.0], 16_000);

        let name = archive.write_clip(id, &clip).unwrap();
        assert_eq!(name, format!("{}.wav", id));
        assert_eq!(file_url(&name), format!("/api/v1/uploads/{}.wav", id));

        let bytes = archive.read(&name).unwrap().unwrap();
        let (header, data) = wav::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.sampling_rate, 16_000);
        assert_eq!(header.channel_count, 1);
        assert_eq!(
            data.as_sixteen().unwrap(),
            &[0, i16::MAX / 2, -(i16::MAX / 2), i16::MAX][..]
        );

        archive.remove(&name);
        assert!(archive.read(&name).unwrap().is_none());
    }

    #[test]
    fn test_unknown_and_foreign_names_read_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.wav"), b"RIFF").unwrap();
        let archive = AudioArchive::new(dir.path());

        assert!(archive.read("notes.wav").unwrap().is_none());
        assert!(archive.read(&format!("{}.wav", Uuid::new_v4())).unwrap().is_none());
    }
}
