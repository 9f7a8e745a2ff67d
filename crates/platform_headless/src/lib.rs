use anyhow::{Result, anyhow};
use futures_util::future::{BoxFuture, FutureExt};
use platform::{
    Clipboard, Console, Document, DrawingContext, FetchRequest, FetchResponse, FileInfo, Files,
    LogLevel, Net, Platform, Storage, Time,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;

mod canvas;
mod dom;

pub use canvas::HeadlessCanvas;
pub use dom::HeadlessDocument;

/// Every capability backed by in-process state. Nothing touches the OS
/// except the clocks.
#[derive(Default)]
pub struct HeadlessPlatform {
    console: HeadlessConsole,
    time: HeadlessTime,
    storage: HeadlessStorage,
    clipboard: HeadlessClipboard,
    net: HeadlessNet,
    document: HeadlessDocument,
    canvas: HeadlessCanvas,
    files: HeadlessFiles,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for every fetch of `url`.
    pub fn route(&self, url: impl Into<String>, response: FetchResponse) {
        self.net.route(url, response);
    }

    pub fn add_file(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.add(name, bytes);
    }

    pub fn set_storage_quota(&self, bytes: Option<usize>) {
        if let Ok(mut quota) = self.storage.quota.lock() {
            *quota = bytes;
        }
    }

    pub fn set_clipboard_allowed(&self, allowed: bool) {
        if let Ok(mut state) = self.clipboard.state.lock() {
            state.allowed = allowed;
        }
    }

    pub fn console_entries(&self) -> Vec<(LogLevel, String)> {
        self.console.entries()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.net.requests()
    }

    pub fn headless_document(&self) -> &HeadlessDocument {
        &self.document
    }

    pub fn headless_canvas(&self) -> &HeadlessCanvas {
        &self.canvas
    }
}

impl Platform for HeadlessPlatform {
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

/// Buffers every line and mirrors it into `tracing`.
#[derive(Default)]
pub struct HeadlessConsole {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl HeadlessConsole {
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl Console for HeadlessConsole {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "guest", "{message}"),
            LogLevel::Info => tracing::info!(target: "guest", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "guest", "{message}"),
            LogLevel::Error => tracing::error!(target: "guest", "{message}"),
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

pub struct HeadlessTime {
    origin: Instant,
}

impl Default for HeadlessTime {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Time for HeadlessTime {
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

#[derive(Default)]
pub struct HeadlessStorage {
    items: Mutex<BTreeMap<String, String>>,
    quota: Mutex<Option<usize>>,
}

impl Storage for HeadlessStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self
            .items
            .lock()
            .map_err(|_| anyhow!("failed to lock headless storage"))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("failed to lock headless storage"))?;
        let quota = self.quota.lock().map(|quota| *quota).unwrap_or(None);
        if let Some(limit) = quota {
            let used: usize = items
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > limit {
                return Err(anyhow!(
                    "QuotaExceededError: setting '{key}' exceeds the {limit} byte quota"
                ));
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("failed to lock headless storage"))?;
        items.remove(key);
        Ok(())
    }
}

struct ClipboardState {
    text: String,
    allowed: bool,
}

pub struct HeadlessClipboard {
    state: Mutex<ClipboardState>,
}

impl Default for HeadlessClipboard {
    fn default() -> Self {
        Self {
            state: Mutex::new(ClipboardState {
                text: String::new(),
                allowed: true,
            }),
        }
    }
}

impl Clipboard for HeadlessClipboard {
    fn read_text(&self) -> Result<String> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("failed to lock headless clipboard"))?;
        if !state.allowed {
            return Err(anyhow!("NotAllowedError: clipboard read denied"));
        }
        Ok(state.text.clone())
    }

    fn write_text(&self, text: &str) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("failed to lock headless clipboard"))?;
        if !state.allowed {
            return Err(anyhow!("NotAllowedError: clipboard write denied"));
        }
        state.text = text.to_string();
        Ok(())
    }
}

/// Route table standing in for the network. Unrouted URLs fail the way a
/// blocked request does.
#[derive(Default)]
pub struct HeadlessNet {
    routes: Mutex<HashMap<String, FetchResponse>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl HeadlessNet {
    pub fn route(&self, url: impl Into<String>, response: FetchResponse) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.into(), response);
        }
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Net for HeadlessNet {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse>> {
        let routed = self
            .routes
            .lock()
            .map_err(|_| anyhow!("failed to lock headless routes"))
            .map(|routes| routes.get(&request.url).cloned());
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        async move {
            match routed? {
                Some(mut response) => {
                    if response.url.is_empty() {
                        response.url = request.url;
                    }
                    Ok(response)
                }
                None => Err(anyhow!("TypeError: NetworkError when attempting to fetch {}", request.url)),
            }
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct HeadlessFiles {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl HeadlessFiles {
    pub fn add(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(name.into(), bytes.into());
        }
    }
}

impl Files for HeadlessFiles {
    fn list(&self) -> Vec<FileInfo> {
        self.files
            .lock()
            .map(|files| {
                files
                    .iter()
                    .map(|(name, bytes)| FileInfo {
                        name: name.clone(),
                        size: bytes.len() as u64,
                        last_modified_ms: 0.0,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self, name: &str) -> BoxFuture<'static, Result<Vec<u8>>> {
        let bytes = self
            .files
            .lock()
            .map_err(|_| anyhow!("failed to lock headless files"))
            .and_then(|files| {
                files
                    .get(name)
                    .cloned()
                    .ok_or_else(|| anyhow!("NotFoundError: file not found: {name}"))
            });
        async move { bytes }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_enforces_quota() {
        let platform = HeadlessPlatform::new();
        platform.set_storage_quota(Some(10));
        platform.storage().set_item("k", "12345").unwrap();
        let err = platform.storage().set_item("other", "12345").unwrap_err();
        assert!(err.to_string().starts_with("QuotaExceededError"));
        platform.storage().set_item("k", "123456789").unwrap();
        assert_eq!(
            platform.storage().get_item("k").unwrap().as_deref(),
            Some("123456789")
        );
    }

    #[test]
    fn clipboard_respects_permission() {
        let platform = HeadlessPlatform::new();
        platform.clipboard().write_text("copied").unwrap();
        assert_eq!(platform.clipboard().read_text().unwrap(), "copied");
        platform.set_clipboard_allowed(false);
        assert!(platform.clipboard().read_text().is_err());
    }

    #[test]
    fn console_records_levels() {
        let platform = HeadlessPlatform::new();
        platform.console().log(LogLevel::Warn, "careful");
        assert_eq!(
            platform.console_entries(),
            vec![(LogLevel::Warn, "careful".to_string())]
        );
    }

    #[tokio::test]
    async fn fetch_serves_routes_and_records_requests() {
        let platform = HeadlessPlatform::new();
        platform.route(
            "https://app.test/data.json",
            FetchResponse::new("", 200, b"{}".to_vec()),
        );

        let response = platform
            .net()
            .fetch(FetchRequest::get("https://app.test/data.json"))
            .await
            .unwrap();
        assert_eq!(response.url, "https://app.test/data.json");
        assert_eq!(response.body, b"{}");

        let missing = platform
            .net()
            .fetch(FetchRequest::get("https://app.test/missing"))
            .await;
        assert!(missing.is_err());
        assert_eq!(platform.requests().len(), 2);
    }

    #[tokio::test]
    async fn files_are_listed_and_read() {
        let platform = HeadlessPlatform::new();
        platform.add_file("atlas.png", vec![1, 2, 3]);
        let listed = platform.files().list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 3);
        assert_eq!(platform.files().read("atlas.png").await.unwrap(), vec![1, 2, 3]);
        assert!(platform.files().read("nope").await.is_err());
    }
}
