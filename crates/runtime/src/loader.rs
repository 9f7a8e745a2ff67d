//! Fetch, compile and instantiate a guest module.
//!
//! The streaming path validates the response body incrementally when it is
//! served as `application/wasm`. A readable `ok` response with any other
//! content type falls back to a buffered compile with a warning; every
//! other failure ends the load.

use anyhow::{Result, anyhow};
use platform::{FetchRequest, FetchResponse, Platform};
use std::sync::Arc;
use wasmtime::{Engine, Linker, Module, Store, TypedFunc, WasmParams, WasmResults};

use crate::config::BridgeConfig;
use crate::error::LoadError;
use crate::imports;
use crate::instance::Instance;
use crate::state::{GuestExports, HostState};
use crate::streaming::StreamingCompiler;

pub const MEMORY_EXPORT: &str = "memory";
pub const MALLOC_EXPORT: &str = "bridge_malloc";
pub const REALLOC_EXPORT: &str = "bridge_realloc";
pub const FREE_EXPORT: &str = "bridge_free";
pub const TABLE_EXPORT: &str = "__indirect_function_table";
pub const START_EXPORT: &str = "bridge_start";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Uninitialized,
    Fetching,
    Instantiating,
    Running,
    Failed,
}

/// Where the module comes from.
pub enum ModuleSource {
    Url(String),
    Request(FetchRequest),
    Response(FetchResponse),
    Bytes(Vec<u8>),
    Module(Module),
}

impl From<&str> for ModuleSource {
    fn from(url: &str) -> Self {
        ModuleSource::Url(url.to_string())
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        ModuleSource::Bytes(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilePath {
    Streaming,
    Buffered,
    Precompiled,
}

/// Brings up one instance. A second `init` on the same loader fails with
/// [`LoadError::AlreadyRunning`]; use another loader for another instance.
pub struct Loader {
    config: BridgeConfig,
    platform: Arc<dyn Platform>,
    engine: Engine,
    state: LoaderState,
    compile_path: Option<CompilePath>,
}

impl Loader {
    pub fn new(config: BridgeConfig, platform: Arc<dyn Platform>) -> Self {
        Self::with_engine(Engine::default(), config, platform)
    }

    pub fn with_engine(engine: Engine, config: BridgeConfig, platform: Arc<dyn Platform>) -> Self {
        Self {
            config,
            platform,
            engine,
            state: LoaderState::Uninitialized,
            compile_path: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn last_compile_path(&self) -> Option<CompilePath> {
        self.compile_path
    }

    /// Instantiate an already compiled module.
    pub fn init_sync(&mut self, module: &Module) -> Result<Instance, LoadError> {
        self.begin()?;
        self.compile_path = Some(CompilePath::Precompiled);
        let outcome = self.instantiate(module);
        self.settle(outcome)
    }

    /// Load from `source`, or from the configured `module_url` when `None`.
    pub async fn init(&mut self, source: Option<ModuleSource>) -> Result<Instance, LoadError> {
        self.begin()?;
        let source = source.unwrap_or_else(|| ModuleSource::Url(self.config.module_url.clone()));
        let outcome = self.load(source).await;
        self.settle(outcome)
    }

    fn begin(&mut self) -> Result<(), LoadError> {
        if self.state != LoaderState::Uninitialized {
            return Err(LoadError::AlreadyRunning);
        }
        Ok(())
    }

    fn settle(&mut self, outcome: Result<Instance, LoadError>) -> Result<Instance, LoadError> {
        self.state = match &outcome {
            Ok(_) => LoaderState::Running,
            Err(err) => {
                tracing::error!("module load failed: {err}");
                LoaderState::Failed
            }
        };
        outcome
    }

    fn transition(&mut self, state: LoaderState) {
        tracing::debug!(from = ?self.state, to = ?state, "loader state");
        self.state = state;
    }

    async fn load(&mut self, source: ModuleSource) -> Result<Instance, LoadError> {
        let module = match source {
            ModuleSource::Module(module) => {
                self.compile_path = Some(CompilePath::Precompiled);
                module
            }
            ModuleSource::Bytes(bytes) => self.compile_buffered(&bytes)?,
            ModuleSource::Url(url) => {
                let response = self.fetch(FetchRequest::get(url)).await?;
                self.compile_response(response)?
            }
            ModuleSource::Request(request) => {
                let response = self.fetch(request).await?;
                self.compile_response(response)?
            }
            ModuleSource::Response(response) => self.compile_response(response)?,
        };
        self.instantiate(&module)
    }

    async fn fetch(&mut self, request: FetchRequest) -> Result<FetchResponse, LoadError> {
        self.transition(LoaderState::Fetching);
        let url = request.url.clone();
        tracing::info!("fetching module from {url}");
        self.platform
            .net()
            .fetch(request)
            .await
            .map_err(|source| LoadError::Fetch { url, source })
    }

    fn compile_response(&mut self, response: FetchResponse) -> Result<Module, LoadError> {
        if !response.ok() {
            return Err(LoadError::Status {
                url: response.url,
                status: response.status,
            });
        }
        if !self.config.streaming {
            return self.compile_buffered(&response.body);
        }

        match self.compile_streaming(&response) {
            Ok(module) => {
                self.compile_path = Some(CompilePath::Streaming);
                Ok(module)
            }
            Err(err) if response.kind.is_transparent() && !response.is_wasm() => {
                tracing::warn!(
                    "`{}` is not served as `application/wasm`, falling back to a slower buffered compile: {err:#}",
                    response.url
                );
                self.compile_buffered(&response.body)
            }
            Err(err) => Err(LoadError::Compile(err)),
        }
    }

    fn compile_streaming(&mut self, response: &FetchResponse) -> Result<Module> {
        if !response.is_wasm() {
            return Err(anyhow!(
                "TypeError: incorrect response MIME type {:?}, expected \"application/wasm\"",
                response.content_type().unwrap_or_default()
            ));
        }
        if !response.kind.is_transparent() {
            return Err(anyhow!(
                "TypeError: response of kind {:?} cannot be compiled",
                response.kind
            ));
        }
        let mut compiler = StreamingCompiler::new();
        for chunk in response.body.chunks(self.config.chunk_bytes()) {
            compiler.feed(chunk)?;
        }
        compiler.finish(&self.engine)
    }

    fn compile_buffered(&mut self, bytes: &[u8]) -> Result<Module, LoadError> {
        self.compile_path = Some(CompilePath::Buffered);
        Module::from_binary(&self.engine, bytes).map_err(LoadError::Compile)
    }

    fn instantiate(&mut self, module: &Module) -> Result<Instance, LoadError> {
        self.transition(LoaderState::Instantiating);
        let missing = imports::unsatisfied(module);
        if !missing.is_empty() {
            return Err(LoadError::UnknownImports(missing));
        }

        let mut linker = Linker::new(&self.engine);
        imports::register(&mut linker).map_err(LoadError::Instantiate)?;
        let mut store = Store::new(
            &self.engine,
            HostState::new(self.platform.clone(), &self.config),
        );
        store.limiter(|state| &mut state.limits);

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(LoadError::Instantiate)?;
        let exports = resolve_exports(&mut store, &instance)?;
        let start = exports.start.clone();
        store.data_mut().bind(exports);

        if let Some(start) = start {
            start.call(&mut store, ()).map_err(LoadError::Start)?;
        }
        tracing::debug!("module instantiated");
        Ok(Instance::new(store, instance))
    }
}

fn resolve_exports(
    store: &mut Store<HostState>,
    instance: &wasmtime::Instance,
) -> Result<GuestExports, LoadError> {
    let memory = instance
        .get_memory(&mut *store, MEMORY_EXPORT)
        .ok_or(LoadError::MissingExport(MEMORY_EXPORT))?;
    let malloc = typed_export(store, instance, MALLOC_EXPORT)?
        .ok_or(LoadError::MissingExport(MALLOC_EXPORT))?;
    let realloc = typed_export(store, instance, REALLOC_EXPORT)?
        .ok_or(LoadError::MissingExport(REALLOC_EXPORT))?;
    Ok(GuestExports {
        memory,
        malloc,
        realloc,
        free: typed_export(store, instance, FREE_EXPORT)?,
        table: instance.get_table(&mut *store, TABLE_EXPORT),
        start: typed_export(store, instance, START_EXPORT)?,
    })
}

/// `None` when the export is absent; an export with the wrong signature is
/// an instantiation error.
fn typed_export<P, R>(
    store: &mut Store<HostState>,
    instance: &wasmtime::Instance,
    name: &'static str,
) -> Result<Option<TypedFunc<P, R>>, LoadError>
where
    P: WasmParams,
    R: WasmResults,
{
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    func.typed::<P, R>(&*store)
        .map(Some)
        .map_err(|err| LoadError::Instantiate(err.context(format!("export `{name}` has the wrong signature"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_headless::HeadlessPlatform;

    const MINIMAL: &str = r#"(module
        (memory (export "memory") 1)
        (global $next (mut i32) (i32.const 1024))
        (func (export "bridge_malloc") (param i32 i32) (result i32)
            (local $ptr i32)
            global.get $next
            local.set $ptr
            global.get $next
            local.get 0
            i32.add
            global.set $next
            local.get $ptr)
        (func (export "bridge_realloc") (param i32 i32 i32 i32) (result i32)
            unreachable))"#;

    fn loader() -> Loader {
        Loader::new(BridgeConfig::default(), Arc::new(HeadlessPlatform::new()))
    }

    #[test]
    fn init_sync_runs_once() {
        let mut loader = loader();
        let module = Module::new(loader.engine(), MINIMAL).unwrap();
        loader.init_sync(&module).unwrap();
        assert_eq!(loader.state(), LoaderState::Running);
        assert_eq!(loader.last_compile_path(), Some(CompilePath::Precompiled));
        assert!(matches!(loader.init_sync(&module), Err(LoadError::AlreadyRunning)));
    }

    #[test]
    fn missing_allocator_fails_the_load() {
        let mut loader = loader();
        let module = Module::new(loader.engine(), r#"(module (memory (export "memory") 1))"#).unwrap();
        let err = loader.init_sync(&module).err().unwrap();
        assert!(matches!(err, LoadError::MissingExport(MALLOC_EXPORT)));
        assert_eq!(loader.state(), LoaderState::Failed);
    }

    #[test]
    fn mistyped_export_is_an_instantiation_error() {
        let mut loader = loader();
        let module = Module::new(
            loader.engine(),
            r#"(module
                (memory (export "memory") 1)
                (func (export "bridge_malloc") (param i32) (result i32) i32.const 0)
                (func (export "bridge_realloc") (param i32 i32 i32 i32) (result i32) i32.const 0))"#,
        )
        .unwrap();
        assert!(matches!(loader.init_sync(&module), Err(LoadError::Instantiate(_))));
    }
}
