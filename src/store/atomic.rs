use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);
pub(crate) const TEMP_PREFIX: &str = ".invoice-desk.tmp.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// Replace whatever sits at the target (exports, downloads, config).
    Replace,
    /// Fail with `AlreadyExists` instead of touching an existing target.
    /// Blob keys are never reused.
    CreateNew,
}

/// Writes `bytes` to `path` through a synced temp file, so a reader sees
/// either the previous content or the complete new content.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_with(path, bytes, Publish::Replace)
}

pub fn write_with(path: &Path, bytes: &[u8], publish: Publish) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("`{}` has no parent directory", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let staged = stage_temp(parent, path, bytes)?;
    let published = match publish {
        Publish::Replace => replace(&staged, path),
        // hard_link refuses an existing target, unlike rename.
        Publish::CreateNew => fs::hard_link(&staged, path).and_then(|()| fs::remove_file(&staged)),
    }
    .and_then(|()| sync_dir(parent));

    if published.is_err() {
        let _ = fs::remove_file(&staged);
    }
    published
}

fn stage_temp(parent: &Path, target: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let staged = temp_name(parent, target)?;
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&staged)?;
    let written = file
        .write_all(bytes)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&staged);
        return Err(err);
    }
    Ok(staged)
}

fn replace(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(_) if to.exists() => {
            fs::remove_file(to)?;
            fs::rename(from, to)
        }
        result => result,
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn temp_name(parent: &Path, target: &Path) -> io::Result<PathBuf> {
    let file_name = target
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target filename"))?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| io::Error::other(err.to_string()))?
        .as_nanos();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(parent.join(format!(
        "{TEMP_PREFIX}{file_name}.{nanos}.{}.{seq}",
        std::process::id()
    )))
}
