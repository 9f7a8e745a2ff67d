//! The import table: every host function a guest may bind to.
//!
//! `IMPORTS` is the declarative half (names and wasm signatures), `register`
//! wires the shims into a linker. A test keeps the two in agreement.

use anyhow::Result;
use std::fmt;
use wasmtime::{FuncType, Linker, ValType};

use crate::shims;
use crate::state::HostState;

/// Import module name the guest binds against.
pub const MODULE: &str = "bridge";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    I32,
    F32,
    F64,
}

impl Abi {
    fn matches(self, ty: &ValType) -> bool {
        match self {
            Abi::I32 => matches!(ty, ValType::I32),
            Abi::F32 => matches!(ty, ValType::F32),
            Abi::F64 => matches!(ty, ValType::F64),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Abi::I32 => "i32",
            Abi::F32 => "f32",
            Abi::F64 => "f64",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Import {
    pub group: &'static str,
    pub name: &'static str,
    pub params: &'static [Abi],
    pub results: &'static [Abi],
}

impl Import {
    pub fn matches(&self, ty: &FuncType) -> bool {
        let params: Vec<ValType> = ty.params().collect();
        let results: Vec<ValType> = ty.results().collect();
        params.len() == self.params.len()
            && results.len() == self.results.len()
            && self.params.iter().zip(&params).all(|(abi, ty)| abi.matches(ty))
            && self.results.iter().zip(&results).all(|(abi, ty)| abi.matches(ty))
    }
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self.params.iter().map(|abi| abi.name()).collect();
        write!(f, "{}.{}({})", MODULE, self.name, params.join(", "))?;
        match self.results {
            [] => Ok(()),
            results => {
                let results: Vec<_> = results.iter().map(|abi| abi.name()).collect();
                write!(f, " -> {}", results.join(", "))
            }
        }
    }
}

const fn import(
    group: &'static str,
    name: &'static str,
    params: &'static [Abi],
    results: &'static [Abi],
) -> Import {
    Import {
        group,
        name,
        params,
        results,
    }
}

use Abi::{F32, F64, I32};

/// Handles, pointers and lengths are `i32`. Fallible imports take a trailing
/// result-slot pointer; string results go to a trailing `(ptr, len)` out slot.
pub const IMPORTS: &[Import] = &[
    import("core", "object_drop_ref", &[I32], &[]),
    import("core", "object_clone_ref", &[I32], &[I32]),
    import("core", "is_undefined", &[I32], &[I32]),
    import("core", "is_null", &[I32], &[I32]),
    import("core", "is_function", &[I32], &[I32]),
    import("core", "is_object", &[I32], &[I32]),
    import("core", "string_new", &[I32, I32], &[I32]),
    import("core", "string_get", &[I32, I32], &[I32]),
    import("core", "number_new", &[F64], &[I32]),
    import("core", "number_get", &[I32, I32], &[]),
    import("core", "boolean_get", &[I32], &[I32]),
    import("core", "bytes_new", &[I32, I32], &[I32]),
    import("core", "bytes_len", &[I32], &[I32]),
    import("core", "bytes_copy_to", &[I32, I32, I32], &[I32]),
    import("core", "array_new", &[], &[I32]),
    import("core", "array_push", &[I32, I32], &[]),
    import("core", "array_len", &[I32], &[I32]),
    import("core", "array_get", &[I32, I32], &[I32]),
    import("core", "object_new", &[], &[I32]),
    import("core", "object_set", &[I32, I32, I32, I32], &[]),
    import("core", "object_get", &[I32, I32, I32], &[I32]),
    import("core", "object_has", &[I32, I32, I32], &[I32]),
    import("core", "error_new", &[I32, I32], &[I32]),
    import("core", "debug_string", &[I32, I32], &[]),
    import("core", "throw", &[I32, I32], &[]),
    import("closures", "closure_new", &[I32, I32, I32, I32], &[I32]),
    import("closures", "closure_drop", &[I32], &[I32]),
    import("closures", "closure_call", &[I32, I32, I32], &[]),
    import("console", "console_log", &[I32, I32, I32], &[]),
    import("time", "performance_now", &[], &[F64]),
    import("time", "date_now", &[], &[F64]),
    import("storage", "storage_get", &[I32, I32, I32], &[]),
    import("storage", "storage_set", &[I32, I32, I32, I32, I32], &[]),
    import("storage", "storage_remove", &[I32, I32, I32], &[]),
    import("clipboard", "clipboard_read", &[I32], &[]),
    import("clipboard", "clipboard_write", &[I32, I32, I32], &[]),
    import("dom", "document_body", &[], &[I32]),
    import("dom", "create_element", &[I32, I32, I32], &[]),
    import("dom", "get_element_by_id", &[I32, I32], &[I32]),
    import("dom", "set_attribute", &[I32, I32, I32, I32, I32, I32], &[]),
    import("dom", "get_attribute", &[I32, I32, I32, I32], &[]),
    import("dom", "append_child", &[I32, I32, I32], &[]),
    import("dom", "remove_child", &[I32, I32, I32], &[]),
    import("dom", "set_inner_text", &[I32, I32, I32, I32], &[]),
    import("dom", "element_width", &[I32, I32], &[]),
    import("dom", "element_height", &[I32, I32], &[]),
    import("dom", "request_animation_frame", &[I32], &[I32]),
    import("dom", "cancel_animation_frame", &[I32], &[]),
    import("dom", "queue_microtask", &[I32], &[]),
    import("canvas", "canvas_size", &[I32], &[]),
    import("canvas", "canvas_resize", &[I32, I32, I32], &[]),
    import("canvas", "canvas_clear", &[F32, F32, F32, F32], &[]),
    import("canvas", "canvas_fill_rect", &[I32, I32, I32, I32, I32, I32], &[]),
    import("canvas", "canvas_put_image", &[I32, I32, I32, I32, I32, I32, I32], &[]),
    import("canvas", "canvas_read_pixels", &[I32, I32, I32, I32, I32], &[]),
    import("fetch", "request_new", &[I32, I32, I32, I32, I32], &[]),
    import("fetch", "request_set_header", &[I32, I32, I32, I32, I32], &[]),
    import("fetch", "request_set_body", &[I32, I32], &[]),
    import("fetch", "fetch", &[I32], &[I32]),
    import("fetch", "response_status", &[I32], &[I32]),
    import("fetch", "response_ok", &[I32], &[I32]),
    import("fetch", "response_header", &[I32, I32, I32, I32], &[I32]),
    import("fetch", "response_bytes", &[I32], &[I32]),
    import("fetch", "promise_then", &[I32, I32, I32], &[]),
    import("files", "file_list", &[], &[I32]),
    import("files", "file_name", &[I32, I32], &[]),
    import("files", "file_size", &[I32], &[F64]),
    import("files", "file_read", &[I32], &[I32]),
    import("resize", "resize_observer_new", &[I32], &[I32]),
    import("resize", "resize_observer_observe", &[I32, I32], &[]),
    import("resize", "resize_observer_disconnect", &[I32], &[]),
];

pub fn find(name: &str) -> Option<&'static Import> {
    IMPORTS.iter().find(|import| import.name == name)
}

/// Define every import on `linker`.
pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    shims::register(linker)
}

/// Imports of `module` the table cannot satisfy, as `module.name` strings.
pub fn unsatisfied(module: &wasmtime::Module) -> Vec<String> {
    module
        .imports()
        .filter_map(|import| {
            let known = import.module() == MODULE
                && match (find(import.name()), import.ty()) {
                    (Some(expected), wasmtime::ExternType::Func(ty)) => expected.matches(&ty),
                    _ => false,
                };
            (!known).then(|| format!("{}.{}", import.module(), import.name()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use platform_headless::HeadlessPlatform;
    use std::collections::HashSet;
    use std::sync::Arc;
    use wasmtime::{Engine, Extern, Store};

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = IMPORTS.iter().map(|import| import.name).collect();
        assert_eq!(names.len(), IMPORTS.len());
    }

    #[test]
    fn linker_matches_the_table() {
        let engine = Engine::default();
        let mut linker = Linker::new(&engine);
        register(&mut linker).unwrap();
        let state = HostState::new(Arc::new(HeadlessPlatform::new()), &BridgeConfig::default());
        let mut store = Store::new(&engine, state);

        let defined: Vec<_> = linker
            .iter(&mut store)
            .filter(|(module, _, _)| *module == MODULE)
            .map(|(_, name, item)| (name.to_string(), item))
            .collect();
        assert_eq!(defined.len(), IMPORTS.len());

        for (name, item) in defined {
            let import = find(&name).unwrap_or_else(|| panic!("{name} is not in IMPORTS"));
            let Extern::Func(func) = item else {
                panic!("{name} is not a function");
            };
            assert!(import.matches(&func.ty(&store)), "signature mismatch for {import}");
        }
    }

    #[test]
    fn display_shows_signature() {
        let import = find("storage_get").unwrap();
        assert_eq!(import.to_string(), "bridge.storage_get(i32, i32, i32)");
        let import = find("performance_now").unwrap();
        assert_eq!(import.to_string(), "bridge.performance_now() -> f64");
    }

    #[test]
    fn unknown_and_mistyped_imports_are_reported() {
        let engine = Engine::default();
        let wasm = wat::parse_str(
            r#"(module
                (import "bridge" "console_log" (func (param i32 i32 i32)))
                (import "bridge" "date_now" (func (result i32)))
                (import "bridge" "window_alert" (func (param i32 i32)))
                (import "env" "abort" (func)))"#,
        )
        .unwrap();
        let module = wasmtime::Module::new(&engine, &wasm).unwrap();
        assert_eq!(
            unsatisfied(&module),
            vec!["bridge.date_now", "bridge.window_alert", "env.abort"]
        );
    }
}
