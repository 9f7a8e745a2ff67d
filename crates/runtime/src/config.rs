use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_MODULE_URL: &str = "app_bg.wasm";
pub const DEFAULT_STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Loader and boundary settings, read from `bridge.toml` or the `bridge`
/// key of `bridge.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Fetched when `Loader::init` is called without a source.
    pub module_url: String,
    pub streaming: bool,
    pub stream_chunk_bytes: usize,
    /// Cumulative decoded bytes after which the string decoder is replaced.
    pub decoder_reset_bytes: Option<u64>,
    pub max_memory_bytes: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module_url: DEFAULT_MODULE_URL.to_string(),
            streaming: true,
            stream_chunk_bytes: DEFAULT_STREAM_CHUNK_BYTES,
            decoder_reset_bytes: None,
            max_memory_bytes: None,
        }
    }
}

impl BridgeConfig {
    pub fn load(directory: &Path) -> Self {
        if let Some(config) = load_from_toml(&directory.join("bridge.toml")) {
            return config;
        }
        load_from_json(&directory.join("bridge.json")).unwrap_or_default()
    }

    pub(crate) fn chunk_bytes(&self) -> usize {
        self.stream_chunk_bytes.max(1)
    }
}

fn load_from_toml(path: &Path) -> Option<BridgeConfig> {
    if !path.exists() {
        return None;
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!("Failed to read {}: {}", path.display(), err);
            return None;
        }
    };

    match toml::from_str::<BridgeConfig>(&contents) {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), err);
            None
        }
    }
}

fn load_from_json(path: &Path) -> Option<BridgeConfig> {
    if !path.exists() {
        return None;
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!("Failed to read {}: {}", path.display(), err);
            return None;
        }
    };

    let root: serde_json::Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), err);
            return None;
        }
    };

    let section = root.get("bridge").cloned().unwrap_or(root);
    match serde_json::from_value::<BridgeConfig>(section) {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::warn!("Failed to parse {}.bridge: {}", path.display(), err);
            None
        }
    }
}
