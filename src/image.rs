//! Storage image provisioning.
//!
//! The sdcard image is checked in gzip-compressed (`sdcard.img.gz`) and
//! materialized next to it (`sdcard.img`) on first use. Once the image
//! exists it is never re-derived, and the archive is only ever read.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::{debug, info, warn};

use crate::cache;
use crate::config::Workspace;
use crate::error::{Error, IoContext, Result};
use crate::rebuild::StampStore;

/// Stamp key under which the archive digest is recorded.
pub const ARCHIVE_STAMP: &str = "storage-archive";

#[derive(Debug, Clone)]
pub struct StorageImage {
    /// Immutable compressed input.
    pub archive: PathBuf,
    /// Derived raw image.
    pub image: PathBuf,
}

impl StorageImage {
    pub fn from_workspace(ws: &Workspace) -> Self {
        Self {
            archive: ws.image_archive(),
            image: ws.image(),
        }
    }
}

/// What [`ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provision {
    /// The image already existed.
    Skipped,
    Decompressed { bytes: u64 },
}

/// Make sure the decompressed image exists.
///
/// If it already exists this is a no-op. If the archive changed since the
/// image was derived, that is logged as a warning and the image is still
/// left alone.
pub fn ensure(image: &StorageImage, stamps: &StampStore) -> Result<Provision> {
    if image.image.exists() {
        if archive_changed(image, stamps) {
            warn!(
                "{} changed since {} was derived; delete the image to re-provision",
                image.archive.display(),
                image.image.display()
            );
        }
        info!(image = %image.image.display(), "[SKIP] storage image present");
        return Ok(Provision::Skipped);
    }

    let bytes = decompress(&image.archive, &image.image)?;
    info!(
        archive = %image.archive.display(),
        image = %image.image.display(),
        bytes,
        "storage image decompressed"
    );

    match cache::hash_file(&image.archive) {
        Ok(digest) => {
            if let Err(e) = stamps.record(ARCHIVE_STAMP, &digest) {
                warn!("could not record archive digest: {}", e);
            }
        }
        Err(e) => warn!("could not hash {}: {}", image.archive.display(), e),
    }

    Ok(Provision::Decompressed { bytes })
}

/// Decode a gzip archive to `dest` through a `.work` file. Returns the
/// decompressed size.
pub fn decompress(archive: &Path, dest: &Path) -> Result<u64> {
    let failure = |source: io::Error| Error::DecompressionFailure {
        archive: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(failure)?;
    let len = file.metadata().map_err(failure)?.len();
    if len == 0 {
        return Err(failure(io::Error::new(
            io::ErrorKind::InvalidData,
            "archive is empty",
        )));
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_io_context(|| format!("creating {}", parent.display()))?;
    }
    let work = work_path(dest);
    let _ = fs::remove_file(&work);
    let out = File::create(&work).with_io_context(|| format!("creating {}", work.display()))?;

    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let mut writer = BufWriter::new(out);
    let copied = io::copy(&mut decoder, &mut writer).and_then(|n| {
        writer.flush()?;
        Ok(n)
    });

    let bytes = match copied {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&work);
            return Err(failure(e));
        }
    };

    fs::rename(&work, dest).with_io_context(|| format!("renaming {}", work.display()))?;
    Ok(bytes)
}

/// Whether the archive differs from the one the image was derived from.
/// False when there is no record to compare against.
pub fn archive_changed(image: &StorageImage, stamps: &StampStore) -> bool {
    let Some(recorded) = stamps.recorded(ARCHIVE_STAMP) else {
        return false;
    };
    let Ok(current) = cache::hash_file(&image.archive) else {
        return false;
    };
    debug!(recorded, current, "archive digest");
    current != recorded
}

fn work_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".work");
    dest.with_file_name(name)
}

#[cfg(test)]
pub(crate) fn write_gz(path: &Path, data: &[u8]) {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(root: &Path) -> (StorageImage, StampStore) {
        let image = StorageImage {
            archive: root.join("sdcard.img.gz"),
            image: root.join("sdcard.img"),
        };
        (image, StampStore::new(&root.join(".chaos")))
    }

    #[test]
    fn test_decompresses_when_absent() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        write_gz(&image.archive, b"FAT32 image bytes");

        let result = ensure(&image, &stamps).unwrap();
        assert_eq!(result, Provision::Decompressed { bytes: 17 });
        assert_eq!(fs::read(&image.image).unwrap(), b"FAT32 image bytes");
        assert!(stamps.recorded(ARCHIVE_STAMP).is_some());
    }

    #[test]
    fn test_second_call_is_noop_and_archive_untouched() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        write_gz(&image.archive, b"disk");
        let archive_before = fs::read(&image.archive).unwrap();

        ensure(&image, &stamps).unwrap();
        let image_first = fs::read(&image.image).unwrap();

        assert_eq!(ensure(&image, &stamps).unwrap(), Provision::Skipped);
        assert_eq!(fs::read(&image.image).unwrap(), image_first);
        assert_eq!(fs::read(&image.archive).unwrap(), archive_before);
    }

    #[test]
    fn test_existing_image_not_rederived() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        write_gz(&image.archive, b"from archive");
        fs::write(&image.image, b"modified by guest").unwrap();

        assert_eq!(ensure(&image, &stamps).unwrap(), Provision::Skipped);
        assert_eq!(fs::read(&image.image).unwrap(), b"modified by guest");
    }

    #[test]
    fn test_skip_without_archive() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        fs::write(&image.image, b"already here").unwrap();
        assert_eq!(ensure(&image, &stamps).unwrap(), Provision::Skipped);
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        let err = ensure(&image, &stamps).unwrap_err();
        assert!(matches!(err, Error::DecompressionFailure { .. }));
        assert!(!image.image.exists());
    }

    #[test]
    fn test_corrupt_archive_leaves_nothing() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        fs::write(&image.archive, b"this is not gzip data at all").unwrap();

        let err = ensure(&image, &stamps).unwrap_err();
        assert!(matches!(err, Error::DecompressionFailure { .. }));
        assert!(!image.image.exists());
        assert!(!work_path(&image.image).exists());
    }

    #[test]
    fn test_empty_archive() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        fs::write(&image.archive, b"").unwrap();
        assert!(matches!(
            ensure(&image, &stamps),
            Err(Error::DecompressionFailure { .. })
        ));
    }

    #[test]
    fn test_changed_archive_detected_but_image_kept() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        write_gz(&image.archive, b"first image");
        ensure(&image, &stamps).unwrap();
        assert!(!archive_changed(&image, &stamps));

        write_gz(&image.archive, b"second image");
        assert!(archive_changed(&image, &stamps));
        assert_eq!(ensure(&image, &stamps).unwrap(), Provision::Skipped);
        assert_eq!(fs::read(&image.image).unwrap(), b"first image");
    }

    #[test]
    fn test_no_record_is_not_a_change() {
        let dir = tempdir().unwrap();
        let (image, stamps) = setup(dir.path());
        write_gz(&image.archive, b"data");
        fs::write(&image.image, b"hand-made").unwrap();
        assert!(!archive_changed(&image, &stamps));
    }
}
