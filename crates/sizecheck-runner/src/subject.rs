use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A private copy of the subject binary, removed with its directory on drop.
#[derive(Debug)]
pub struct ScopedSubject {
    dir: PathBuf,
    path: PathBuf,
}

impl ScopedSubject {
    /// Copies `source` into a fresh directory under `temp_root`.
    pub fn stage(source: &Path, temp_root: &Path) -> std::io::Result<Self> {
        if !source.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("subject binary not found: {}", source.display()),
            ));
        }
        std::fs::create_dir_all(temp_root)?;
        let dir = unique_dir(temp_root, "sizecheck")?;
        let path = dir.join(format!("subject-{}{}", unique_suffix(), std::env::consts::EXE_SUFFIX));

        let staged = std::fs::copy(source, &path).and_then(|_| make_executable(&path));
        if let Err(err) = staged {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(err);
        }
        log::debug!("staged subject {} -> {}", source.display(), path.display());
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps a copy of the subject next to the results for later inspection.
    pub fn publish_copy(&self, dest_dir: &Path, name: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX));
        std::fs::copy(&self.path, &dest)?;
        Ok(dest)
    }
}

impl Drop for ScopedSubject {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos ^ (std::process::id() << 8) ^ (n as u32))
}

fn unique_dir(base: &Path, prefix: &str) -> std::io::Result<PathBuf> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let pid = std::process::id();
    for _ in 0..10_000 {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = base.join(format!("{prefix}_{pid}_{n}"));
        match std::fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("failed to create unique temp dir under {}", base.display()),
    ))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
