use anyhow::{Context, Result};
use runtime::imports::{self, MODULE};
use runtime::{MALLOC_EXPORT, MEMORY_EXPORT, REALLOC_EXPORT};
use serde_json::json;
use std::path::Path;
use wasmtime::{Engine, ExternType, Module};

const REQUIRED_EXPORTS: &[&str] = &[MEMORY_EXPORT, MALLOC_EXPORT, REALLOC_EXPORT];

struct Report {
    imports: Vec<String>,
    unsatisfied: Vec<String>,
    exports: Vec<(String, &'static str)>,
    missing_exports: Vec<&'static str>,
}

fn report(module: &Module) -> Report {
    let imports = module
        .imports()
        .map(|import| format!("{}.{}", import.module(), import.name()))
        .collect();
    let exports: Vec<(String, &'static str)> = module
        .exports()
        .map(|export| {
            let kind = match export.ty() {
                ExternType::Func(_) => "func",
                ExternType::Memory(_) => "memory",
                ExternType::Table(_) => "table",
                ExternType::Global(_) => "global",
                _ => "other",
            };
            (export.name().to_string(), kind)
        })
        .collect();
    let missing_exports = REQUIRED_EXPORTS
        .iter()
        .copied()
        .filter(|required| !exports.iter().any(|(name, _)| name == required))
        .collect();
    Report {
        imports,
        unsatisfied: imports::unsatisfied(module),
        exports,
        missing_exports,
    }
}

pub fn inspect(path: &Path, as_json: bool) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let engine = Engine::default();
    let module = Module::from_binary(&engine, &bytes)
        .with_context(|| format!("failed to compile {}", path.display()))?;
    let report = report(&module);

    if as_json {
        let value = json!({
            "imports": report.imports,
            "unsatisfied": report.unsatisfied,
            "exports": report
                .exports
                .iter()
                .map(|(name, kind)| json!({ "name": name, "kind": kind }))
                .collect::<Vec<_>>(),
            "missing_exports": report.missing_exports,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("imports ({})", report.imports.len());
    for import in &report.imports {
        let status = if report.unsatisfied.contains(import) {
            "missing"
        } else {
            "ok"
        };
        println!("  {status:<8}{import}");
    }
    println!("exports ({})", report.exports.len());
    for (name, kind) in &report.exports {
        println!("  {kind:<8}{name}");
    }
    if !report.unsatisfied.is_empty() {
        println!(
            "{} import(s) outside the `{MODULE}` table",
            report.unsatisfied.len()
        );
    }
    for name in &report.missing_exports {
        println!("missing required export `{name}`");
    }
    Ok(())
}
