use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use flate2::read::GzDecoder;
use sizecheck_contracts::{AUTH_HOSTS, ENV_FORCE_REFRESH, ENV_GITHUB_TOKEN};
use url::Url;

use crate::catalog::{ArtifactKind, ArtifactRecord, Target};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("download {url}: {message}")]
    Download { url: String, message: String },
    #[error("file {0} not found in archive")]
    ArchiveMemberNotFound(String),
    #[error("read {kind} archive from {url}: {message}")]
    Archive {
        url: String,
        kind: ArtifactKind,
        message: String,
    },
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Base for relative target destinations.
    pub bins_dir: PathBuf,
    pub force_refresh: bool,
    pub auth_token: Option<String>,
}

impl FetcherConfig {
    pub fn from_env(bins_dir: impl Into<PathBuf>) -> Self {
        Self {
            bins_dir: bins_dir.into(),
            force_refresh: std::env::var_os(ENV_FORCE_REFRESH).is_some(),
            auth_token: std::env::var(ENV_GITHUB_TOKEN)
                .ok()
                .filter(|t| !t.trim().is_empty()),
        }
    }
}

/// Downloads artifacts and materializes their targets.
///
/// Each call to [`ArtifactFetcher::ensure_exist`] owns its download buffer and
/// target data, so one fetcher can serve many threads at once.
#[derive(Debug)]
pub struct ArtifactFetcher {
    config: FetcherConfig,
    requests: AtomicUsize,
}

impl ArtifactFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Number of HTTP requests issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn destination(&self, target: &Target) -> PathBuf {
        if target.destination.is_absolute() {
            target.destination.clone()
        } else {
            self.config.bins_dir.join(&target.destination)
        }
    }

    /// True iff every target of `record` is on disk.
    pub fn is_present(&self, record: &ArtifactRecord) -> bool {
        record
            .targets
            .iter()
            .all(|t| self.destination(t).exists())
    }

    pub fn ensure_exist(&self, record: &ArtifactRecord) -> Result<(), FetchError> {
        if !self.config.force_refresh && self.is_present(record) {
            log::debug!("{} already exists", record.name);
            return Ok(());
        }

        log::info!("Downloading {record}...");
        let body = self.http_get(&record.url, true)?;
        let data = extract_targets(record, &body)?;
        drop(body);

        let items = record
            .targets
            .iter()
            .map(|t| self.destination(t))
            .zip(data);
        write_targets(items)?;
        log::info!("Downloaded {}", record.name);
        Ok(())
    }

    /// Fetches every record on up to `jobs` threads. Stops handing out work
    /// after the first failure and returns it.
    pub fn ensure_all(&self, records: &[ArtifactRecord], jobs: usize) -> Result<(), FetchError> {
        let next = AtomicUsize::new(0);
        let first_err: Mutex<Option<FetchError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            let jobs = jobs.max(1).min(records.len().max(1));
            for _ in 0..jobs {
                scope.spawn(|| loop {
                    if let Ok(guard) = first_err.lock() {
                        if guard.is_some() {
                            return;
                        }
                    }
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(record) = records.get(idx) else {
                        return;
                    };
                    if let Err(err) = self.ensure_exist(record) {
                        if let Ok(mut guard) = first_err.lock() {
                            if guard.is_none() {
                                *guard = Some(err);
                            }
                        }
                        return;
                    }
                });
            }
        });

        match first_err.into_inner().unwrap_or_else(|e| e.into_inner()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// GET `url` into memory. The configured token is attached only for
    /// code-hosting hosts.
    pub(crate) fn http_get(&self, url: &str, report_progress: bool) -> Result<Vec<u8>, FetchError> {
        let download_err = |message: String| FetchError::Download {
            url: url.to_string(),
            message,
        };

        let mut req = ureq::get(url).config().http_status_as_error(false).build();
        if let Some(token) = self.token_for(url) {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
        let resp = req.call().map_err(|e| download_err(e.to_string()))?;

        let status = resp.status();
        let total: Option<u64> = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let mut reader = resp.into_body().into_reader();

        if !status.is_success() {
            let mut body = Vec::new();
            let _ = reader.read_to_end(&mut body);
            let snippet = String::from_utf8_lossy(&body);
            let snippet = snippet.trim();
            return Err(download_err(if snippet.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                format!("HTTP {}: {snippet}", status.as_u16())
            }));
        }

        let mut buf = Vec::with_capacity(initial_capacity(total));
        let mut chunk = [0u8; 64 * 1024];
        let mut next_report = 10u64;
        loop {
            let n = reader
                .read(&mut chunk)
                .map_err(|e| download_err(format!("read response: {e}")))?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let (true, Some(total)) = (report_progress, total.filter(|t| *t > 0)) {
                let pct = (buf.len() as u64).saturating_mul(100) / total;
                if pct >= next_report {
                    log::debug!("{url}: {pct}% ({} / {total} bytes)", buf.len());
                    next_report = (pct / 10 + 1) * 10;
                }
            }
        }
        Ok(buf)
    }

    fn token_for(&self, url: &str) -> Option<&str> {
        let token = self.config.auth_token.as_deref()?;
        let host = Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
        AUTH_HOSTS.contains(&host.as_str()).then_some(token)
    }
}

/// Returns one buffer per target, in target order, or fails without any
/// partial result.
fn extract_targets(record: &ArtifactRecord, body: &[u8]) -> Result<Vec<Vec<u8>>, FetchError> {
    let mut slots: Vec<Option<Vec<u8>>> = vec![None; record.targets.len()];
    let archive_err = |message: String| FetchError::Archive {
        url: record.url.clone(),
        kind: record.kind,
        message,
    };

    match record.kind {
        ArtifactKind::Raw => {
            if let Some(slot) = slots.first_mut() {
                *slot = Some(body.to_vec());
            }
        }
        ArtifactKind::Tar => {
            collect_tar_members(body, &record.targets, &mut slots).map_err(archive_err)?
        }
        ArtifactKind::Zip => {
            collect_zip_members(body, &record.targets, &mut slots).map_err(archive_err)?
        }
    }

    let mut out = Vec::with_capacity(slots.len());
    for (target, slot) in record.targets.iter().zip(slots) {
        match slot {
            Some(bytes) => out.push(bytes),
            None => return Err(FetchError::ArchiveMemberNotFound(target.display_name())),
        }
    }
    Ok(out)
}

fn tar_reader(body: &[u8]) -> Box<dyn Read + '_> {
    if body.starts_with(GZIP_MAGIC) {
        Box::new(GzDecoder::new(body))
    } else if body.starts_with(XZ_MAGIC) {
        Box::new(xz2::read::XzDecoder::new(body))
    } else {
        Box::new(body)
    }
}

fn collect_tar_members(
    body: &[u8],
    targets: &[Target],
    slots: &mut [Option<Vec<u8>>],
) -> Result<(), String> {
    let mut ar = tar::Archive::new(tar_reader(body));
    for entry in ar.entries().map_err(|e| format!("read tar entries: {e}"))? {
        let mut entry = entry.map_err(|e| format!("read tar entry: {e}"))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| format!("read tar entry path: {e}"))?
            .into_owned();
        let Some(base) = base_name(&path.to_string_lossy()) else {
            continue;
        };
        let hits = matching_targets(targets, &base);
        if hits.is_empty() {
            continue;
        }
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| format!("read tar member {}: {e}", path.display()))?;
        for idx in hits {
            slots[idx] = Some(bytes.clone());
        }
    }
    Ok(())
}

fn collect_zip_members(
    body: &[u8],
    targets: &[Target],
    slots: &mut [Option<Vec<u8>>],
) -> Result<(), String> {
    let mut z = zip::ZipArchive::new(Cursor::new(body)).map_err(|e| format!("open zip: {e}"))?;
    for i in 0..z.len() {
        let mut file = z.by_index(i).map_err(|e| format!("zip entry {i}: {e}"))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let Some(base) = base_name(&name) else {
            continue;
        };
        let hits = matching_targets(targets, &base);
        if hits.is_empty() {
            continue;
        }
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| format!("read zip member {name}: {e}"))?;
        for idx in hits {
            slots[idx] = Some(bytes.clone());
        }
    }
    Ok(())
}

fn base_name(member_path: &str) -> Option<String> {
    member_path
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn matching_targets(targets: &[Target], base: &str) -> Vec<usize> {
    targets
        .iter()
        .enumerate()
        .filter(|(_, t)| t.member.as_deref() == Some(base))
        .map(|(i, _)| i)
        .collect()
}

/// Largest up-front reservation for a response body. The advertised length
/// is only a hint; the body grows past this as it arrives.
const PREALLOC_LIMIT: u64 = 1 << 20;

fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(0).min(PREALLOC_LIMIT) as usize
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> FetchError {
    let path = path.to_path_buf();
    move |source| FetchError::Io {
        action,
        path,
        source,
    }
}

/// A target written to a temp sibling of its destination.
struct Staged {
    tmp: PathBuf,
    dest: PathBuf,
}

impl Staged {
    fn write(dest: PathBuf, bytes: &[u8]) -> Result<Self, FetchError> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err("create dir", parent))?;
        }
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dest.with_file_name(format!(".{file_name}.download.tmp"));
        let staged = Self { tmp, dest };
        if let Err(err) = staged.fill(bytes) {
            let _ = std::fs::remove_file(&staged.tmp);
            return Err(err);
        }
        Ok(staged)
    }

    fn fill(&self, bytes: &[u8]) -> Result<(), FetchError> {
        std::fs::write(&self.tmp, bytes).map_err(io_err("write", &self.tmp))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let perm = std::fs::Permissions::from_mode(0o755);
            std::fs::set_permissions(&self.tmp, perm).map_err(io_err("chmod", &self.tmp))?;
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), FetchError> {
        #[cfg(windows)]
        {
            if self.dest.exists() {
                std::fs::remove_file(&self.dest).map_err(io_err("remove", &self.dest))?;
            }
        }
        std::fs::rename(&self.tmp, &self.dest).map_err(io_err("rename", &self.dest))
    }
}

/// Writes every target or none of them. All temp files are written before
/// the first rename; on failure the temps and any renamed targets are removed.
fn write_targets(items: impl IntoIterator<Item = (PathBuf, Vec<u8>)>) -> Result<(), FetchError> {
    let mut staged = Vec::new();
    for (dest, bytes) in items {
        match Staged::write(dest, &bytes) {
            Ok(s) => staged.push(s),
            Err(err) => {
                for s in &staged {
                    let _ = std::fs::remove_file(&s.tmp);
                }
                return Err(err);
            }
        }
    }

    for (i, s) in staged.iter().enumerate() {
        if let Err(err) = s.commit() {
            for done in &staged[..i] {
                let _ = std::fs::remove_file(&done.dest);
            }
            for pending in &staged[i..] {
                let _ = std::fs::remove_file(&pending.tmp);
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(token: Option<&str>) -> ArtifactFetcher {
        ArtifactFetcher::new(FetcherConfig {
            bins_dir: PathBuf::from("bins"),
            force_refresh: false,
            auth_token: token.map(str::to_string),
        })
    }

    #[test]
    fn token_only_goes_to_code_hosting_hosts() {
        let f = fetcher(Some("secret"));
        assert_eq!(
            f.token_for("https://github.com/o/r/releases/download/latest/bin"),
            Some("secret")
        );
        assert_eq!(
            f.token_for("https://api.github.com/repos/o/r/releases/tags/latest"),
            Some("secret")
        );
        assert_eq!(f.token_for("https://binaries.example.com/x.tgz"), None);
        assert_eq!(f.token_for("not a url"), None);
        assert_eq!(fetcher(None).token_for("https://github.com/x"), None);
    }

    #[test]
    fn advertised_length_caps_the_reservation() {
        assert_eq!(initial_capacity(None), 0);
        assert_eq!(initial_capacity(Some(4096)), 4096);
        assert_eq!(initial_capacity(Some(u64::MAX)), 1 << 20);
    }

    #[test]
    fn failed_target_leaves_no_partial_set() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("blocker"), b"file").expect("write blocker");
        let first = tmp.path().join("ok").join("first");
        let second = tmp.path().join("blocker").join("second");

        let err = write_targets(vec![
            (first.clone(), b"1".to_vec()),
            (second.clone(), b"2".to_vec()),
        ])
        .unwrap_err();
        assert!(
            matches!(err, FetchError::Io { action: "create dir", .. }),
            "{err:?}"
        );
        assert!(!first.exists());
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("ok"))
            .expect("read dir")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn all_targets_land_together() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let a = tmp.path().join("a");
        let b = tmp.path().join("nested").join("b");
        write_targets(vec![(a.clone(), b"A".to_vec()), (b.clone(), b"B".to_vec())])
            .expect("write targets");
        assert_eq!(std::fs::read(&a).expect("a"), b"A");
        assert_eq!(std::fs::read(&b).expect("b"), b"B");
        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".download.tmp")), "{names:?}");
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("a/b/cockroach").as_deref(), Some("cockroach"));
        assert_eq!(base_name("dir\\x.exe").as_deref(), Some("x.exe"));
        assert_eq!(base_name("dir/"), None);
    }

    #[test]
    fn relative_destinations_resolve_under_bins_dir() {
        let f = fetcher(None);
        assert_eq!(f.destination(&Target::raw("x")), PathBuf::from("bins/x"));
    }
}
