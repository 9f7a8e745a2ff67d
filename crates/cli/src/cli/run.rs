use anyhow::{Context, Result, bail};
use clap::Args;
use platform::Platform;
use platform_headless::HeadlessPlatform;
use platform_native::NativePlatform;
use runtime::{BridgeConfig, Loader, ModuleSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Args)]
pub struct RunArgs {
    /// Module path, or an http(s) url with --native
    #[arg(name = "MODULE")]
    module: String,

    /// Directory holding bridge.toml or bridge.json
    #[arg(long, value_name = "DIR")]
    config: Option<PathBuf>,

    /// Use the real network, clipboard and filesystem
    #[arg(long)]
    native: bool,

    /// Storage file for --native (default: <config>/.bridge/storage.json)
    #[arg(long, value_name = "FILE")]
    storage: Option<PathBuf>,

    /// Directory exposed to the guest as its file list
    #[arg(long, value_name = "DIR")]
    files: Option<PathBuf>,

    /// Animation frames to run after start
    #[arg(long, default_value_t = 0)]
    frames: u32,

    /// Always compile from a fully buffered body
    #[arg(long)]
    no_streaming: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config_dir = args.config.clone().unwrap_or_else(|| PathBuf::from("."));
    let mut config = BridgeConfig::load(&config_dir);
    if args.no_streaming {
        config.streaming = false;
    }

    let platform = build_platform(&args, &config_dir)?;
    let source = module_source(&args.module, args.native).await?;

    let mut loader = Loader::new(config, platform.clone());
    let mut instance = loader.init(Some(source)).await?;
    tracing::info!(
        "{} running ({:?} compile)",
        args.module,
        loader.last_compile_path()
    );

    let ran = instance.run_until_idle().await?;
    tracing::debug!(callbacks = ran, "start settled");

    for frame in 0..args.frames {
        let timestamp = platform.time().now_ms();
        let mut ran = instance.tick_frame(timestamp)?;
        ran += instance.run_until_idle().await?;
        tracing::debug!(frame, callbacks = ran, "frame done");
    }

    let destroyed = instance.shutdown()?;
    tracing::info!(closures = destroyed, "instance shut down");
    Ok(())
}

fn build_platform(args: &RunArgs, config_dir: &Path) -> Result<Arc<dyn Platform>> {
    if args.native {
        let storage = args
            .storage
            .clone()
            .unwrap_or_else(|| config_dir.join(".bridge").join("storage.json"));
        let files = args.files.clone().unwrap_or_else(|| config_dir.to_path_buf());
        return Ok(Arc::new(NativePlatform::new(storage, files)));
    }

    let headless = HeadlessPlatform::new();
    if let Some(dir) = &args.files {
        load_files(&headless, dir)?;
    }
    Ok(Arc::new(headless))
}

/// Copy the regular files of `dir` into the headless file list.
fn load_files(platform: &HeadlessPlatform, dir: &Path) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let bytes =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        platform.add_file(entry.file_name().to_string_lossy(), bytes);
    }
    Ok(())
}

async fn module_source(module: &str, native: bool) -> Result<ModuleSource> {
    if module.starts_with("http://") || module.starts_with("https://") {
        if !native {
            bail!("loading {module} needs --native");
        }
        return Ok(ModuleSource::Url(module.to_string()));
    }
    let bytes = tokio::fs::read(module)
        .await
        .with_context(|| format!("failed to read {module}"))?;
    Ok(ModuleSource::Bytes(bytes))
}
