//! Host-side bridge to the TON emulator compiled to WebAssembly.
//!
//! Strings cross into the module's linear memory through a reusable arena,
//! results come back as NUL-terminated JSON the module allocated, and one
//! emulator instance is kept alive per `(config, verbosity)`.

use anyhow::Result;

mod arena;
mod config;
mod emulator;
mod executor;
mod foreign;
mod handle;
mod invoke;
mod outcome;
mod params;
mod session;
mod wasm;
mod worker;

pub use arena::{ArenaStats, StringArena};
pub use config::{
    module_digest, verify_module_digest, HostConfig, DEFAULT_MAX_MEMORY_BYTES,
    ENV_MAX_MEMORY_BYTES, ENV_WASM_PATH, ENV_WASM_SHA256,
};
pub use emu_verbosity::{Verbosity, VerbosityParseError};
pub use emulator::EmulatorCache;
pub use executor::Executor;
pub use foreign::{DebugLog, ForeignModule};
pub use handle::{EmulatorHandle, ForeignPtr, SessionHandle};
pub use invoke::{Arg, HostContext};
pub use outcome::{
    CallOutput, EmulationError, EmulatorVersion, GetMethodFailure, GetMethodOutcome,
    GetMethodSuccess, TransactionFailure, TransactionOutcome, TransactionSuccess,
};
pub use params::{
    EmulationArgs, GetMethodArgs, GetMethodParams, TickTock, TickTockArgs, TransactionArgs,
    TransactionParams,
};
pub use session::{
    CodePosition, CodePositionParseError, Created, Done, GetMethodSession, SbsSession,
    SessionError, SessionKind, SessionState, StackSnapshot, StepOutcome, Stepping,
    TransactionSession,
};
pub use wasm::WasmtimeModule;
pub use worker::ExecutorWorker;

/// Loads the module named by the `EMU_HOST_*` environment variables.
pub fn executor_from_env() -> Result<Executor<WasmtimeModule>> {
    Executor::from_config(&HostConfig::from_env()?)
}
