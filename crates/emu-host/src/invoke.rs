use anyhow::{Context, Result};

use crate::arena::StringArena;
use crate::foreign::{DebugLog, ForeignModule};
use crate::handle::{EmulatorHandle, ForeignPtr, SessionHandle};

/// One positional argument of a foreign call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Number(i64),
    Text(String),
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Number(v)
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::Number(i64::from(v))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Text(v)
    }
}

impl From<ForeignPtr> for Arg {
    fn from(v: ForeignPtr) -> Self {
        Arg::from(v.addr())
    }
}

impl From<EmulatorHandle> for Arg {
    fn from(v: EmulatorHandle) -> Self {
        Arg::from(v.ptr())
    }
}

impl From<SessionHandle> for Arg {
    fn from(v: SessionHandle) -> Self {
        Arg::from(v.ptr())
    }
}

/// Separates numbers from strings. Each slot is `Some(n)` for a number and
/// `None` where a string address goes; the strings come back in order.
pub(crate) fn split_args(args: &[Arg]) -> (Vec<Option<i64>>, Vec<&str>) {
    let mut slots = Vec::with_capacity(args.len());
    let mut texts = Vec::new();
    for arg in args {
        match arg {
            Arg::Number(n) => slots.push(Some(*n)),
            Arg::Text(s) => {
                slots.push(None);
                texts.push(s.as_str());
            }
        }
    }
    (slots, texts)
}

/// Fills the string slots left by [`split_args`] with foreign addresses.
pub(crate) fn join_args(slots: &[Option<i64>], addrs: &[ForeignPtr]) -> Result<Vec<i64>> {
    let mut addrs = addrs.iter();
    let mut out = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Some(n) => out.push(*n),
            None => {
                let ptr = addrs
                    .next()
                    .context("internal error: fewer string addresses than string arguments")?;
                out.push(i64::from(ptr.addr()));
            }
        }
    }
    if addrs.next().is_some() {
        anyhow::bail!("internal error: more string addresses than string arguments");
    }
    Ok(out)
}

/// Everything that shares the foreign linear memory: the module, the string
/// arena placed in it, and the debug lines it prints.
///
/// Holding `&mut HostContext` is what makes a foreign call exclusive.
pub struct HostContext<M: ForeignModule> {
    module: M,
    arena: StringArena,
    debug_log: DebugLog,
}

impl<M: ForeignModule> HostContext<M> {
    pub fn new(module: M) -> Self {
        Self {
            module,
            arena: StringArena::new(),
            debug_log: DebugLog::new(),
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    pub fn arena(&self) -> &StringArena {
        &self.arena
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.debug_log
    }

    /// Starts a top-level call: debug lines from earlier calls are dropped.
    pub fn begin_call(&mut self) {
        self.debug_log.clear();
    }

    pub fn take_debug_logs(&mut self) -> String {
        self.debug_log.take_joined()
    }

    /// Calls `export`, placing every string argument in the arena first.
    ///
    /// All strings of one call are placed as a single batch, and the pool is
    /// released only after the foreign call has returned.
    pub fn invoke(&mut self, export: &str, args: &[Arg]) -> Result<i64> {
        let (slots, texts) = split_args(args);
        let Self {
            module,
            arena,
            debug_log,
        } = self;
        arena.with_strings(module, &texts, |module, addrs| {
            let raw = join_args(&slots, addrs)?;
            module
                .call(export, &raw, debug_log)
                .with_context(|| format!("foreign call `{export}`"))
        })
    }

    /// Reads the NUL-terminated string at `ptr`, then frees it with the
    /// module's own allocator. The free is attempted even when the read
    /// fails; the read error wins.
    pub fn extract_string(&mut self, ptr: ForeignPtr) -> Result<String> {
        let read = self
            .module
            .read_c_string(ptr.addr())
            .with_context(|| format!("read foreign string at {ptr}"));
        let freed = self
            .module
            .free(ptr.addr())
            .with_context(|| format!("free foreign string at {ptr}"));
        let bytes = read?;
        freed?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// [`Self::invoke`] for exports that return a pointer to a result string.
    pub fn invoke_for_string(&mut self, export: &str, args: &[Arg]) -> Result<String> {
        let raw = self.invoke(export, args)?;
        let ptr = ForeignPtr::from_result(export, raw)?;
        if ptr.is_null() {
            anyhow::bail!("`{export}` returned a null string pointer");
        }
        self.extract_string(ptr)
    }

    /// Frees every arena buffer still held in foreign memory.
    pub fn release_arena(&mut self) -> Result<()> {
        self.arena.release_all(&mut self.module)
    }

    pub fn into_module(self) -> M {
        self.module
    }
}
