use anyhow::Result;
use futures_util::future::BoxFuture;

pub mod fetch;

pub use fetch::{FetchRequest, FetchResponse, RequestMode, ResponseKind, WASM_CONTENT_TYPE};

/// Every host API surface the guest can reach, one capability per accessor.
pub trait Platform: Send + Sync {
    fn console(&self) -> &dyn Console;
    fn time(&self) -> &dyn Time;
    fn storage(&self) -> &dyn Storage;
    fn clipboard(&self) -> &dyn Clipboard;
    fn net(&self) -> &dyn Net;
    fn document(&self) -> &dyn Document;
    fn canvas(&self) -> &dyn DrawingContext;
    fn files(&self) -> &dyn Files;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Guest ABI encoding; anything unknown logs at `Info`.
    pub fn from_abi(raw: i32) -> Self {
        match raw {
            0 => LogLevel::Debug,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

pub trait Console: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

pub trait Time: Send + Sync {
    /// Monotonic milliseconds since the platform was created.
    fn now_ms(&self) -> f64;
    fn unix_ms(&self) -> f64;
}

/// Origin-scoped key/value store.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

pub trait Clipboard: Send + Sync {
    fn read_text(&self) -> Result<String>;
    fn write_text(&self, text: &str) -> Result<()>;
}

pub trait Net: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

/// The slice of the DOM the guest drives: a tree of tagged elements with
/// attributes, text and a layout size.
pub trait Document: Send + Sync {
    fn body(&self) -> ElementId;
    fn create_element(&self, tag: &str) -> Result<ElementId>;
    fn element_by_id(&self, id: &str) -> Option<ElementId>;
    fn tag_name(&self, element: ElementId) -> Result<String>;
    fn set_attribute(&self, element: ElementId, name: &str, value: &str) -> Result<()>;
    fn attribute(&self, element: ElementId, name: &str) -> Result<Option<String>>;
    fn append_child(&self, parent: ElementId, child: ElementId) -> Result<()>;
    fn remove_child(&self, parent: ElementId, child: ElementId) -> Result<()>;
    fn set_inner_text(&self, element: ElementId, text: &str) -> Result<()>;
    /// Layout size in CSS pixels.
    fn size(&self, element: ElementId) -> Result<(f64, f64)>;
    fn set_size(&self, element: ElementId, width: f64, height: f64) -> Result<()>;
}

/// Drawing surface with the handful of operations the guest uses: an RGBA8
/// framebuffer that can be cleared, filled, blitted and read back.
pub trait DrawingContext: Send + Sync {
    fn size(&self) -> (u32, u32);
    fn resize(&self, width: u32, height: u32) -> Result<()>;
    fn clear(&self, rgba: [f32; 4]);
    fn fill_rect(&self, x: i32, y: i32, width: u32, height: u32, rgba: [u8; 4]) -> Result<()>;
    fn put_image(&self, x: i32, y: i32, width: u32, height: u32, pixels: &[u8]) -> Result<()>;
    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub last_modified_ms: f64,
}

/// Files the user handed to the page (picker or drop).
pub trait Files: Send + Sync {
    fn list(&self) -> Vec<FileInfo>;
    fn read(&self, name: &str) -> BoxFuture<'static, Result<Vec<u8>>>;
}
