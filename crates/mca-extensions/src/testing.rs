//! Test fixtures (`test-support` feature): a WASM module builder and a
//! recording runtime that instantiates nothing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use wasm_encoder::{
    CodeSection, CustomSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, ImportSection, Instruction, Module, TypeSection, ValType,
};

use crate::error::{CallError, LoadError, LoadResult};
use crate::manifest::ExtensionManifest;
use crate::runtime::{DEFAULT_ENTRY_POINT, ExtensionInstance, ExtensionRuntime};
use crate::scanner::{MANIFEST_SECTION, inspect};

/// Output returned by [`RecordingRuntime`] instances without a configured one.
pub const EMPTY_OUTPUT: &str = r#"{"findings":[],"events":[]}"#;

const EXTISM_ENV: &str = "extism:host/env";

// Type indices.
const TY_ENTRY: u32 = 0;
const TY_ALLOC: u32 = 1;
const TY_STORE_U8: u32 = 2;
const TY_OUTPUT_SET: u32 = 3;

/// Builds small core WASM modules.
///
/// By default the module exports `mca_analyze: () -> i32` returning 0.
#[derive(Debug, Clone)]
#[must_use]
pub struct WasmModuleBuilder {
    imports: Vec<(String, String)>,
    entry_point: Option<String>,
    output: Option<Vec<u8>>,
    custom: Vec<(String, Vec<u8>)>,
}

impl Default for WasmModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WasmModuleBuilder {
    /// Module exporting the default entry point.
    pub fn new() -> Self {
        Self {
            imports: Vec::new(),
            entry_point: Some(DEFAULT_ENTRY_POINT.to_string()),
            output: None,
            custom: Vec::new(),
        }
    }

    /// Import function `name` (`() -> i32`) from `module`.
    pub fn import(mut self, module: &str, name: &str) -> Self {
        self.imports.push((module.to_string(), name.to_string()));
        self
    }

    /// Export the entry function under `name`.
    pub fn entry_point(mut self, name: &str) -> Self {
        self.entry_point = Some(name.to_string());
        self
    }

    /// Export no functions at all.
    pub fn without_entry_point(mut self) -> Self {
        self.entry_point = None;
        self
    }

    /// Embed a manifest section.
    pub fn manifest(self, json: &str) -> Self {
        self.custom_section(MANIFEST_SECTION, json.as_bytes())
    }

    /// Append an arbitrary custom section.
    pub fn custom_section(mut self, name: &str, data: &[u8]) -> Self {
        self.custom.push((name.to_string(), data.to_vec()));
        self
    }

    /// Make the entry point write `output` through the Extism kernel
    /// (`alloc`, `store_u8`, `output_set` from `extism:host/env`).
    pub fn extism_output(mut self, output: &str) -> Self {
        self.output = Some(output.as_bytes().to_vec());
        self
    }

    /// Encode the module.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut module = Module::new();

        let mut types = TypeSection::new();
        types.ty().function([], [ValType::I32]);
        types.ty().function([ValType::I64], [ValType::I64]);
        types.ty().function([ValType::I64, ValType::I32], []);
        types.ty().function([ValType::I64, ValType::I64], []);
        module.section(&types);

        let mut imports = ImportSection::new();
        let mut imported: u32 = 0;
        if self.output.is_some() {
            imports.import(EXTISM_ENV, "alloc", EntityType::Function(TY_ALLOC));
            imports.import(EXTISM_ENV, "store_u8", EntityType::Function(TY_STORE_U8));
            imports.import(EXTISM_ENV, "output_set", EntityType::Function(TY_OUTPUT_SET));
            imported = 3;
        }
        for (m, n) in &self.imports {
            imports.import(m, n, EntityType::Function(TY_ENTRY));
            imported = imported.saturating_add(1);
        }
        if imported > 0 {
            module.section(&imports);
        }

        let mut functions = FunctionSection::new();
        functions.function(TY_ENTRY);
        module.section(&functions);

        if let Some(entry) = &self.entry_point {
            let mut exports = ExportSection::new();
            exports.export(entry, ExportKind::Func, imported);
            module.section(&exports);
        }

        let mut code = CodeSection::new();
        code.function(&self.entry_body());
        module.section(&code);

        for (name, data) in &self.custom {
            module.section(&CustomSection {
                name: name.as_str().into(),
                data: data.as_slice().into(),
            });
        }

        module.finish()
    }

    fn entry_body(&self) -> Function {
        let Some(output) = &self.output else {
            let mut f = Function::new([]);
            f.instruction(&Instruction::I32Const(0));
            f.instruction(&Instruction::End);
            return f;
        };

        // Function indices of the kernel imports.
        let (alloc, store_u8, output_set) = (0, 1, 2);
        let len = i64::try_from(output.len()).unwrap_or(i64::MAX);

        let mut f = Function::new([(1, ValType::I64)]);
        f.instruction(&Instruction::I64Const(len));
        f.instruction(&Instruction::Call(alloc));
        f.instruction(&Instruction::LocalSet(0));
        for (offset, byte) in output.iter().enumerate() {
            f.instruction(&Instruction::LocalGet(0));
            f.instruction(&Instruction::I64Const(i64::try_from(offset).unwrap_or(i64::MAX)));
            f.instruction(&Instruction::I64Add);
            f.instruction(&Instruction::I32Const(i32::from(*byte)));
            f.instruction(&Instruction::Call(store_u8));
        }
        f.instruction(&Instruction::LocalGet(0));
        f.instruction(&Instruction::I64Const(len));
        f.instruction(&Instruction::Call(output_set));
        f.instruction(&Instruction::I32Const(0));
        f.instruction(&Instruction::End);
        f
    }
}

#[derive(Default)]
struct Recorder {
    instantiated: Vec<String>,
    calls: Vec<(String, String)>,
    outputs: HashMap<String, String>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
}

/// Runtime that records what it is asked to instantiate and call.
///
/// Instances report the module's real function exports and answer calls
/// with a configured JSON document.
#[derive(Clone, Default)]
pub struct RecordingRuntime {
    recorder: Arc<Mutex<Recorder>>,
}

impl std::fmt::Debug for RecordingRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRuntime").finish_non_exhaustive()
    }
}

impl RecordingRuntime {
    /// Runtime that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls to `extension` with `output`.
    #[must_use]
    pub fn with_output(self, extension: &str, output: &str) -> Self {
        self.lock()
            .outputs
            .insert(extension.to_string(), output.to_string());
        self
    }

    /// Refuse to instantiate `extension`.
    #[must_use]
    pub fn failing(self, extension: &str) -> Self {
        self.lock().failing.insert(extension.to_string());
        self
    }

    /// Panic while instantiating `extension`.
    #[must_use]
    pub fn panicking(self, extension: &str) -> Self {
        self.lock().panicking.insert(extension.to_string());
        self
    }

    /// Names passed to `instantiate`, in order.
    #[must_use]
    pub fn instantiated(&self) -> Vec<String> {
        self.lock().instantiated.clone()
    }

    /// `(extension, input)` for every call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExtensionRuntime for RecordingRuntime {
    fn instantiate(
        &self,
        manifest: &ExtensionManifest,
        bytes: &[u8],
    ) -> LoadResult<Box<dyn ExtensionInstance>> {
        let (fail, panic) = {
            let mut recorder = self.lock();
            recorder.instantiated.push(manifest.name.clone());
            (
                recorder.failing.contains(&manifest.name),
                recorder.panicking.contains(&manifest.name),
            )
        };
        assert!(!panic, "instantiation of {} panicked", manifest.name);
        if fail {
            return Err(LoadError::Instantiate(format!(
                "{} refused by recording runtime",
                manifest.name
            )));
        }

        Ok(Box::new(RecordedInstance {
            name: manifest.name.clone(),
            exports: inspect(bytes).function_exports().to_vec(),
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct RecordedInstance {
    name: String,
    exports: Vec<String>,
    recorder: Arc<Mutex<Recorder>>,
}

impl ExtensionInstance for RecordedInstance {
    fn has_entry_point(&mut self, entry: &str) -> bool {
        self.exports.iter().any(|e| e == entry)
    }

    fn call(&mut self, entry: &str, input: &str) -> Result<String, CallError> {
        if !self.has_entry_point(entry) {
            return Err(CallError(format!("no export {entry}")));
        }
        let mut recorder = self.recorder.lock().unwrap_or_else(PoisonError::into_inner);
        recorder.calls.push((self.name.clone(), input.to_string()));
        Ok(recorder
            .outputs
            .get(&self.name)
            .cloned()
            .unwrap_or_else(|| EMPTY_OUTPUT.to_string()))
    }
}
