use thiserror::Error;

/// Why a module never reached `Running`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module is already running")]
    AlreadyRunning,
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("fetching {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to compile module: {0}")]
    Compile(#[source] anyhow::Error),
    #[error("module imports functions the host does not provide: {}", .0.join(", "))]
    UnknownImports(Vec<String>),
    #[error("module does not export `{0}`")]
    MissingExport(&'static str),
    #[error("failed to instantiate module: {0}")]
    Instantiate(#[source] anyhow::Error),
    #[error("start function failed: {0}")]
    Start(#[source] anyhow::Error),
}
