use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use filetime::{set_file_mtime, FileTime};

use crate::error::CopyError;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Shared flag checked between copy chunks. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CopyLimits {
    /// Upper bound for a single file.
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied { bytes: u64 },
    /// Something already sits at the destination name; it was left alone.
    Collision,
}

/// Destination path for `src` inside `dst_dir`, keeping the file name.
pub fn destination_for(src: &Path, dst_dir: &Path) -> Option<PathBuf> {
    src.file_name().map(|name| dst_dir.join(name))
}

/// Removes the temporary file on drop unless it was renamed into place.
struct PartialFile {
    path: PathBuf,
    renamed: bool,
}

impl PartialFile {
    /// Moves the finished copy to `dst` without replacing anything there.
    /// Returns false when `dst` was taken.
    ///
    /// A hard link fails when `dst` exists, even if it appeared after the
    /// copy started. Filesystems without hard links fall back to a checked
    /// rename.
    fn publish(&mut self, dst: &Path) -> io::Result<bool> {
        match fs::hard_link(&self.path, dst) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                log::debug!("cannot link {:?} ({}), renaming instead", dst, e);
                if dst.symlink_metadata().is_ok() {
                    return Ok(false);
                }
                fs::rename(&self.path, dst)?;
                self.renamed = true;
            }
        }
        Ok(true)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.renamed {
            if let Err(e) = fs::remove_file(&self.path) {
                log::warn!("failed to remove partial file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Copies `src` into `dst_dir` under its own name, never overwriting.
///
/// Data goes to a hidden `.<name>.part` file first and is linked into place
/// once complete, so an interrupted copy never shows up under the real name.
/// The copy keeps the source modification time.
pub fn copy_file(src: &Path, dst_dir: &Path, limits: &CopyLimits) -> Result<CopyOutcome, CopyError> {
    let file_name = match src.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => {
            return Err(CopyError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "source has no file name",
            )))
        }
    };
    let dst = dst_dir.join(&file_name);
    if dst.symlink_metadata().is_ok() {
        return Ok(CopyOutcome::Collision);
    }
    if limits.cancel.is_cancelled() {
        return Err(CopyError::Cancelled);
    }
    if !dst_dir.exists() {
        fs::create_dir_all(dst_dir)?;
    }

    let started = Instant::now();
    let mut input = File::open(src)?;
    let metadata = input.metadata()?;
    let mut partial = PartialFile {
        path: dst_dir.join(format!(".{}.part", file_name)),
        renamed: false,
    };
    let mut output = File::create(&partial.path)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        if limits.cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        if let Some(timeout) = limits.timeout {
            if started.elapsed() >= timeout {
                return Err(CopyError::TimedOut(timeout));
            }
        }
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n])?;
        bytes += n as u64;
    }
    output.sync_all()?;
    drop(output);
    set_file_mtime(
        &partial.path,
        FileTime::from_last_modification_time(&metadata),
    )?;

    if !partial.publish(&dst)? {
        log::warn!("{:?} appeared while copying, leaving it alone", dst);
        return Ok(CopyOutcome::Collision);
    }
    Ok(CopyOutcome::Copied { bytes })
}
