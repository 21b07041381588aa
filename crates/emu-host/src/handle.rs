use std::fmt;

use anyhow::Result;

/// Address inside the foreign module's linear memory.
///
/// Values come only from the foreign allocator or from foreign call results;
/// code outside this crate can read the address but cannot mint one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignPtr(u32);

impl ForeignPtr {
    pub(crate) const NULL: ForeignPtr = ForeignPtr(0);

    pub(crate) fn from_raw(raw: u32) -> Self {
        ForeignPtr(raw)
    }

    /// Interprets the numeric result of a foreign call as an address.
    pub(crate) fn from_result(export: &str, raw: i64) -> Result<Self> {
        match u32::try_from(raw) {
            Ok(v) => Ok(ForeignPtr(v)),
            Err(_) => anyhow::bail!("`{export}` returned {raw}, which is not a 32-bit address"),
        }
    }

    pub fn addr(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ForeignPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A live emulator instance inside the foreign module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmulatorHandle(ForeignPtr);

impl EmulatorHandle {
    pub(crate) fn new(ptr: ForeignPtr) -> Self {
        EmulatorHandle(ptr)
    }

    pub fn ptr(self) -> ForeignPtr {
        self.0
    }

    /// A null handle means the foreign constructor rejected its configuration.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Display for EmulatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "emulator@{}", self.0)
    }
}

/// A stepwise debugging session inside the foreign module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(ForeignPtr);

impl SessionHandle {
    pub(crate) fn new(ptr: ForeignPtr) -> Self {
        SessionHandle(ptr)
    }

    pub fn ptr(self) -> ForeignPtr {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session@{}", self.0)
    }
}
