//! Wasmtime backend for [`ForeignModule`].

use anyhow::{Context, Result};
use emu_contracts::{EXPORT_FREE, EXPORT_MALLOC, EXPORT_MEMORY, IMPORT_DEBUG_LOG, IMPORT_MODULE};
use tracing::{debug, warn};
use wasmtime::{
    Caller, Engine, Instance, Linker, Memory, Module, ResourceLimiter, Store, TypedFunc, Val,
    ValType,
};

use crate::config::{module_digest, HostConfig};
use crate::foreign::{DebugLog, ForeignModule};

struct HostState {
    memory_limit_bytes: usize,
    /// Lines printed during the current call, moved into the caller's
    /// [`DebugLog`] once it returns.
    pending_logs: Vec<String>,
}

impl ResourceLimiter for HostState {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> Result<bool> {
        if desired > self.memory_limit_bytes {
            warn!(
                current_bytes = current,
                desired_bytes = desired,
                limit_bytes = self.memory_limit_bytes,
                "emulator memory grow rejected: exceeds limit"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> Result<bool> {
        const MAX_TABLE_ELEMENTS: usize = 1 << 20;
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}

/// An instantiated emulator module.
pub struct WasmtimeModule {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    digest: String,
}

impl WasmtimeModule {
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        let bytes = config.load_module_bytes()?;
        Self::from_bytes(&bytes, config.max_memory_bytes)
            .with_context(|| format!("load emulator module {}", config.wasm_path.display()))
    }

    /// Compiles and instantiates `bytes`, which may be a binary module or
    /// WAT text.
    pub fn from_bytes(bytes: &[u8], max_memory_bytes: usize) -> Result<Self> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes).context("compile emulator module")?;

        let mut linker: Linker<HostState> = Linker::new(&engine);
        linker
            .func_wrap(IMPORT_MODULE, IMPORT_DEBUG_LOG, debug_log_sink)
            .context("register debug log sink")?;
        linker
            .define_unknown_imports_as_traps(&module)
            .context("stub unknown imports")?;

        let mut store = Store::new(
            &engine,
            HostState {
                memory_limit_bytes: max_memory_bytes,
                pending_logs: Vec::new(),
            },
        );
        store.limiter(|state| state);

        let instance = linker
            .instantiate(&mut store, &module)
            .context("instantiate emulator module")?;
        let memory = instance
            .get_memory(&mut store, EXPORT_MEMORY)
            .with_context(|| format!("module does not export `{EXPORT_MEMORY}`"))?;
        let malloc = instance
            .get_typed_func::<i32, i32>(&mut store, EXPORT_MALLOC)
            .with_context(|| format!("module export `{EXPORT_MALLOC}`"))?;
        let free = instance
            .get_typed_func::<i32, ()>(&mut store, EXPORT_FREE)
            .with_context(|| format!("module export `{EXPORT_FREE}`"))?;

        let digest = module_digest(bytes);
        debug!(%digest, "emulator module instantiated");
        Ok(Self {
            store,
            instance,
            memory,
            malloc,
            free,
            digest,
        })
    }

    /// `sha256:<hex>` of the module bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    fn drain_logs(&mut self, log: &mut DebugLog) {
        for line in self.store.data_mut().pending_logs.drain(..) {
            log.push(line);
        }
    }
}

fn debug_log_sink(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<()> {
    let memory = caller
        .get_export(EXPORT_MEMORY)
        .and_then(|e| e.into_memory())
        .with_context(|| format!("module does not export `{EXPORT_MEMORY}`"))?;
    let start = ptr as u32 as usize;
    let end = start
        .checked_add(len as u32 as usize)
        .context("debug log range overflows")?;
    let bytes = memory
        .data(&caller)
        .get(start..end)
        .with_context(|| format!("debug log range {start}..{end} out of bounds"))?;
    let line = String::from_utf8_lossy(bytes)
        .trim_end_matches('\n')
        .to_string();
    caller.data_mut().pending_logs.push(line);
    Ok(())
}

fn to_i32(export: &str, index: usize, arg: i64) -> Result<i32> {
    // Addresses above 2 GiB arrive as u32 and wrap into the i32 parameter.
    i32::try_from(arg)
        .or_else(|_| u32::try_from(arg).map(|v| v as i32))
        .map_err(|_| anyhow::anyhow!("`{export}` argument {index} does not fit in i32: {arg}"))
}

impl ForeignModule for WasmtimeModule {
    fn malloc(&mut self, size: u32) -> Result<u32> {
        let size = i32::try_from(size).with_context(|| format!("allocation of {size} bytes"))?;
        let addr = self
            .malloc
            .call(&mut self.store, size)
            .context("foreign malloc")?;
        Ok(addr as u32)
    }

    fn free(&mut self, addr: u32) -> Result<()> {
        self.free
            .call(&mut self.store, addr as i32)
            .context("foreign free")
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.memory
            .write(&mut self.store, addr as usize, bytes)
            .with_context(|| format!("write {} bytes at {addr:#x}", bytes.len()))
    }

    fn read_c_string(&mut self, addr: u32) -> Result<Vec<u8>> {
        let data = self.memory.data(&self.store);
        let tail = data
            .get(addr as usize..)
            .with_context(|| format!("address {addr:#x} out of bounds"))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .with_context(|| format!("unterminated string at {addr:#x}"))?;
        Ok(tail[..len].to_vec())
    }

    fn call(&mut self, export: &str, args: &[i64], log: &mut DebugLog) -> Result<i64> {
        let func = self
            .instance
            .get_func(&mut self.store, export)
            .with_context(|| format!("module does not export `{export}`"))?;
        let ty = func.ty(&self.store);
        if ty.params().len() != args.len() {
            anyhow::bail!(
                "`{export}` takes {} arguments, got {}",
                ty.params().len(),
                args.len()
            );
        }

        let mut params = Vec::with_capacity(args.len());
        for (index, (param, &arg)) in ty.params().zip(args).enumerate() {
            let val = match param {
                ValType::I32 => Val::I32(to_i32(export, index, arg)?),
                ValType::I64 => Val::I64(arg),
                other => anyhow::bail!("`{export}` parameter {index} has unsupported type {other}"),
            };
            params.push(val);
        }
        let mut results = vec![Val::I32(0); ty.results().len()];

        let called = func.call(&mut self.store, &params, &mut results);
        self.drain_logs(log);
        called.with_context(|| format!("`{export}` trapped"))?;

        match results.first() {
            None => Ok(0),
            Some(Val::I32(v)) => Ok(i64::from(*v as u32)),
            Some(Val::I64(v)) => Ok(*v),
            Some(other) => anyhow::bail!("`{export}` returned unsupported value {other:?}"),
        }
    }
}
