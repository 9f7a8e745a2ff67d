//! Incremental compile path: validate a module section by section while its
//! bytes arrive, then hand the complete binary to the engine.

use anyhow::{Result, bail};
use wasmparser::{Chunk, Parser, Payload, ValidPayload, Validator};
use wasmtime::{Engine, Module};

pub struct StreamingCompiler {
    parser: Parser,
    validator: Validator,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already parsed and validated.
    offset: usize,
    functions: u32,
    finished: bool,
}

impl Default for StreamingCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingCompiler {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(0),
            validator: Validator::new(),
            buffer: Vec::new(),
            offset: 0,
            functions: 0,
            finished: false,
        }
    }

    /// Append `chunk` and validate everything that is now complete. Errors
    /// surface as soon as the offending section has arrived.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        if self.finished && !chunk.is_empty() {
            bail!("bytes received after the end of the module");
        }
        self.buffer.extend_from_slice(chunk);
        self.advance(false)
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    pub fn validated(&self) -> usize {
        self.offset
    }

    pub fn functions_validated(&self) -> u32 {
        self.functions
    }

    /// Signal end of input and compile.
    pub fn finish(mut self, engine: &Engine) -> Result<Module> {
        self.advance(true)?;
        if !self.finished {
            bail!("module ended after {} bytes", self.buffer.len());
        }
        tracing::debug!(
            bytes = self.buffer.len(),
            functions = self.functions,
            "streamed module validated"
        );
        Module::from_binary(engine, &self.buffer)
    }

    fn advance(&mut self, eof: bool) -> Result<()> {
        while !self.finished {
            let (consumed, end) = match self.parser.parse(&self.buffer[self.offset..], eof)? {
                Chunk::NeedMoreData(_) => return Ok(()),
                Chunk::Parsed { consumed, payload } => {
                    let end = matches!(payload, Payload::End(_));
                    match self.validator.payload(&payload)? {
                        ValidPayload::Ok | ValidPayload::End(_) => {}
                        ValidPayload::Func(func, body) => {
                            let mut func = func.into_validator(Default::default());
                            func.validate(&body)?;
                            self.functions += 1;
                        }
                        ValidPayload::Parser(_) => bail!("nested modules are not supported"),
                    }
                    (consumed, end)
                }
            };
            self.offset += consumed;
            self.finished = end;
        }
        if self.offset < self.buffer.len() {
            bail!(
                "{} trailing bytes after the end of the module",
                self.buffer.len() - self.offset
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        wat::parse_str(
            r#"(module
                (memory (export "memory") 1)
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add)
                (func (export "twice") (param i32) (result i32)
                    local.get 0
                    local.get 0
                    call 0))"#,
        )
        .unwrap()
    }

    #[test]
    fn byte_at_a_time_matches_buffered_compile() {
        let wasm = sample();
        let mut compiler = StreamingCompiler::new();
        for byte in &wasm {
            compiler.feed(std::slice::from_ref(byte)).unwrap();
        }
        assert_eq!(compiler.received(), wasm.len());
        assert_eq!(compiler.functions_validated(), 2);

        let module = compiler.finish(&Engine::default()).unwrap();
        let exports: Vec<_> = module.exports().map(|export| export.name().to_string()).collect();
        assert_eq!(exports, ["memory", "add", "twice"]);
    }

    #[test]
    fn invalid_body_fails_before_the_end() {
        let wasm = wat::parse_str(
            r#"(module
                (func (result i32) i64.const 1)
                (func))"#,
        )
        .unwrap();
        let mut compiler = StreamingCompiler::new();
        let err = wasm
            .chunks(4)
            .map(|chunk| compiler.feed(chunk))
            .find_map(Result::err)
            .expect("type mismatch is reported while streaming");
        assert!(err.to_string().contains("type mismatch"), "{err}");
    }

    #[test]
    fn truncated_module_fails_at_finish() {
        let wasm = sample();
        let mut compiler = StreamingCompiler::new();
        compiler.feed(&wasm[..wasm.len() - 3]).unwrap();
        assert!(compiler.finish(&Engine::default()).is_err());
    }

    #[test]
    fn not_wasm_is_rejected_early() {
        let mut compiler = StreamingCompiler::new();
        assert!(compiler.feed(b"<!doctype html>").is_err());
    }
}
