//! wasm2kt — WebAssembly to Kotlin source translator.
//!
//! This crate converts a validated WebAssembly binary into a single Kotlin
//! source file whose generated class runs against the `wasm_rt_impl` runtime
//! package, preserving Wasm trap, arithmetic and memory semantics.

pub mod codegen;
pub mod ir;
pub mod parser;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
use codegen::KotlinWriter;
use ir::builder::build_module;
use parser::parse_wasm;

/// Wasm feature toggles accepted by the translator.
///
/// Saturating truncation, sign extension and mutable globals are always
/// enabled; the lowering for them is total. Everything else defaults off and
/// is switched on by the corresponding `--enable-*` flag.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    /// Exception handling (`try`/`catch`/`delegate`/`throw`/`rethrow`).
    pub exceptions: bool,
    /// Bulk memory operations and passive segments.
    pub bulk_memory: bool,
    /// Multi-value blocks and function results.
    pub multi_value: bool,
    /// Tail calls. Accepted by the reader but `return_call*` stays fatal.
    pub tail_call: bool,
    /// More than one linear memory.
    pub multi_memory: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            exceptions: false,
            bulk_memory: false,
            multi_value: true,
            tail_call: false,
            multi_memory: false,
        }
    }
}

/// Configuration options for one translation.
#[derive(Debug, Clone)]
pub struct TranspileOptions {
    /// Name of the generated Kotlin class.
    pub class_name: String,
    /// Optional `package` declaration for the generated file.
    pub package_name: Option<String>,
    /// Whether to honor the Wasm debug-name custom section.
    pub read_debug_names: bool,
    /// Enabled Wasm features.
    pub features: Features,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            class_name: "Wasm".to_string(),
            package_name: None,
            read_debug_names: true,
            features: Features::default(),
        }
    }
}

/// Translate a WebAssembly module to Kotlin source code.
///
/// This is the main entry point for the translation pipeline. It takes raw
/// Wasm bytes and returns the generated Kotlin file as a String.
///
/// # Example
/// ```no_run
/// use wasm2kt::{transpile, TranspileOptions};
///
/// let wasm_bytes = std::fs::read("input.wasm").unwrap();
/// let kotlin = transpile(&wasm_bytes, &TranspileOptions::default()).unwrap();
/// std::fs::write("Output.kt", kotlin).unwrap();
/// ```
pub fn transpile(wasm_bytes: &[u8], options: &TranspileOptions) -> Result<String> {
    let parsed = parse_wasm(wasm_bytes, &options.features)
        .context("failed to read WebAssembly module")?;

    let module = build_module(&parsed, options).context("failed to build module IR")?;

    let kotlin = KotlinWriter::new(&module, options)
        .write_module()
        .context("failed to generate Kotlin source")?;

    Ok(kotlin)
}
