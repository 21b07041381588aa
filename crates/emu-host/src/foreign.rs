use anyhow::Result;

/// Raw entry points of the foreign emulator module.
///
/// Every method takes `&mut self`: the module runs in one linear memory with
/// no internal synchronization, so at most one operation may touch it at a
/// time. Addresses here are plain integers; the typed wrappers live in
/// [`crate::handle`].
pub trait ForeignModule {
    fn malloc(&mut self, size: u32) -> Result<u32>;

    fn free(&mut self, addr: u32) -> Result<()>;

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()>;

    /// Bytes at `addr` up to, not including, the first NUL.
    fn read_c_string(&mut self, addr: u32) -> Result<Vec<u8>>;

    /// Calls `export` with already marshaled numeric arguments. Lines the
    /// module prints through its debug sink during the call land in `log`.
    fn call(&mut self, export: &str, args: &[i64], log: &mut DebugLog) -> Result<i64>;
}

impl<M: ForeignModule + ?Sized> ForeignModule for Box<M> {
    fn malloc(&mut self, size: u32) -> Result<u32> {
        (**self).malloc(size)
    }

    fn free(&mut self, addr: u32) -> Result<()> {
        (**self).free(addr)
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(addr, bytes)
    }

    fn read_c_string(&mut self, addr: u32) -> Result<Vec<u8>> {
        (**self).read_c_string(addr)
    }

    fn call(&mut self, export: &str, args: &[i64], log: &mut DebugLog) -> Result<i64> {
        (**self).call(export, args, log)
    }
}

/// Debug lines emitted by the foreign module during one top-level call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugLog {
    lines: Vec<String>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::trace!(target: "emu_host::foreign", "{line}");
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Joins the buffered lines with `\n` and empties the buffer.
    pub fn take_joined(&mut self) -> String {
        let out = self.lines.join("\n");
        self.lines.clear();
        out
    }
}
