use anyhow::{Context, Result, anyhow};
use futures_util::future::{BoxFuture, FutureExt};
use platform::{
    Clipboard, Console, Document, DrawingContext, FetchRequest, FetchResponse, FileInfo, Files,
    LogLevel, Net, Platform, ResponseKind, Storage, Time,
};
use platform_headless::{HeadlessCanvas, HeadlessDocument};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// Real OS capabilities: stdout console, file-backed storage and a reqwest
/// network stack. The document and canvas stay in memory.
pub struct NativePlatform {
    console: NativeConsole,
    time: NativeTime,
    storage: FileStorage,
    clipboard: NativeClipboard,
    net: ReqwestNet,
    document: HeadlessDocument,
    canvas: HeadlessCanvas,
    files: DirFiles,
}

impl NativePlatform {
    pub fn new(storage_path: impl Into<PathBuf>, files_dir: impl Into<PathBuf>) -> Self {
        Self {
            console: NativeConsole,
            time: NativeTime::default(),
            storage: FileStorage::new(storage_path),
            clipboard: NativeClipboard::default(),
            net: ReqwestNet::default(),
            document: HeadlessDocument::default(),
            canvas: HeadlessCanvas::default(),
            files: DirFiles::new(files_dir),
        }
    }
}

impl Platform for NativePlatform {
    fn console(&self) -> &dyn Console {
        &self.console
    }

    fn time(&self) -> &dyn Time {
        &self.time
    }

    fn storage(&self) -> &dyn Storage {
        &self.storage
    }

    fn clipboard(&self) -> &dyn Clipboard {
        &self.clipboard
    }

    fn net(&self) -> &dyn Net {
        &self.net
    }

    fn document(&self) -> &dyn Document {
        &self.document
    }

    fn canvas(&self) -> &dyn DrawingContext {
        &self.canvas
    }

    fn files(&self) -> &dyn Files {
        &self.files
    }
}

/// Info and debug go to stdout, warnings and errors to stderr.
pub struct NativeConsole;

impl Console for NativeConsole {
    fn log(&self, level: LogLevel, message: &str) {
        let written = match level {
            LogLevel::Debug | LogLevel::Info => {
                let mut out = std::io::stdout();
                writeln!(out, "{message}").and_then(|_| out.flush())
            }
            LogLevel::Warn | LogLevel::Error => {
                let mut err = std::io::stderr();
                writeln!(err, "{message}").and_then(|_| err.flush())
            }
        };
        if let Err(err) = written {
            tracing::warn!("console write failed: {err}");
        }
    }
}

pub struct NativeTime {
    origin: Instant,
}

impl Default for NativeTime {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Time for NativeTime {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn unix_ms(&self) -> f64 {
        let now = std::time::SystemTime::now();
        now.duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

/// Key/value storage persisted as a flat JSON object. The file is read on
/// first access and rewritten after every change.
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: Mutex::new(None),
        }
    }

    fn with_items<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> Result<T>) -> Result<T> {
        let mut guard = self
            .items
            .lock()
            .map_err(|_| anyhow!("failed to lock file storage"))?;
        if guard.is_none() {
            *guard = Some(load_items(&self.path)?);
        }
        let items = guard
            .as_mut()
            .ok_or_else(|| anyhow!("file storage failed to initialize"))?;
        f(items)
    }

    /// Apply `change` to a copy, write the copy, and only then replace the
    /// cached map. A failed write leaves the cache as it was.
    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        self.with_items(|items| {
            let mut next = items.clone();
            if !change(&mut next) {
                return Ok(());
            }
            self.persist(&next)?;
            *items = next;
            Ok(())
        })
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_vec_pretty(items)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

fn load_items(path: &Path) -> Result<BTreeMap<String, String>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse storage file {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.with_items(|items| Ok(items.get(key).cloned()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.update(|items| {
            items.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.update(|items| items.remove(key).is_some())
    }
}

/// Process-local clipboard; the CLI has no windowing system to talk to.
#[derive(Default)]
pub struct NativeClipboard {
    text: Mutex<String>,
}

impl Clipboard for NativeClipboard {
    fn read_text(&self) -> Result<String> {
        self.text
            .lock()
            .map(|text| text.clone())
            .map_err(|_| anyhow!("failed to lock clipboard"))
    }

    fn write_text(&self, text: &str) -> Result<()> {
        let mut current = self
            .text
            .lock()
            .map_err(|_| anyhow!("failed to lock clipboard"))?;
        *current = text.to_string();
        Ok(())
    }
}

#[derive(Default)]
pub struct ReqwestNet {
    client: reqwest::Client,
}

impl Net for ReqwestNet {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse>> {
        let client = self.client.clone();
        async move {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .with_context(|| format!("invalid method {}", request.method))?;
            let mut builder = client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            let response = builder
                .send()
                .await
                .with_context(|| format!("TypeError: failed to fetch {}", request.url))?;

            let status = response.status();
            let url = response.url().to_string();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();
            let body = response
                .bytes()
                .await
                .with_context(|| format!("failed to read body of {url}"))?;
            tracing::debug!("fetched {url}: {status} ({} bytes)", body.len());

            Ok(FetchResponse {
                url,
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                headers,
                kind: ResponseKind::Basic,
                body: body.to_vec(),
            })
        }
        .boxed()
    }
}

/// Exposes the regular files of one directory as user-provided files.
pub struct DirFiles {
    root: PathBuf,
}

impl DirFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Files for DirFiles {
    fn list(&self) -> Vec<FileInfo> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!("cannot list {}: {err}", self.root.display());
                return Vec::new();
            }
        };
        let mut files: Vec<FileInfo> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                let last_modified_ms = metadata
                    .modified()
                    .ok()
                    .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs_f64() * 1000.0)
                    .unwrap_or(0.0);
                Some(FileInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: metadata.len(),
                    last_modified_ms,
                })
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    fn read(&self, name: &str) -> BoxFuture<'static, Result<Vec<u8>>> {
        let path = self.root.join(name);
        let escapes = Path::new(name)
            .components()
            .any(|part| !matches!(part, std::path::Component::Normal(_)));
        async move {
            if escapes {
                return Err(anyhow!("NotFoundError: invalid file name {}", path.display()));
            }
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_round_trips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("storage.json");

        let storage = FileStorage::new(&path);
        storage.set_item("volume", "0.8").unwrap();
        storage.set_item("level", "3").unwrap();
        storage.remove_item("level").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get_item("volume").unwrap().as_deref(), Some("0.8"));
        assert_eq!(reopened.get_item("level").unwrap(), None);
    }

    #[test]
    fn corrupt_storage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(FileStorage::new(&path).get_item("x").is_err());
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let storage = FileStorage::new(&path);
        storage.set_item("volume", "0.8").unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(storage.set_item("volume", "1.0").is_err());
        assert!(storage.remove_item("volume").is_err());
        assert_eq!(storage.get_item("volume").unwrap().as_deref(), Some("0.8"));
    }

    #[test]
    fn clipboard_keeps_last_write() {
        let clipboard = NativeClipboard::default();
        clipboard.write_text("one").unwrap();
        clipboard.write_text("two").unwrap();
        assert_eq!(clipboard.read_text().unwrap(), "two");
    }

    #[tokio::test]
    async fn dir_files_lists_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bee").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = DirFiles::new(dir.path());
        let names: Vec<_> = files.list().into_iter().map(|info| info.name).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(files.read("b.txt").await.unwrap(), b"bee");
        assert!(files.read("../b.txt").await.is_err());
    }
}
