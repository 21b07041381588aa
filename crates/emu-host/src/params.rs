//! Parameter blobs passed to the emulator as JSON strings.
//!
//! Field names are part of the wire contract with the foreign module.

use emu_verbosity::Verbosity;
use serde::Serialize;

use crate::invoke::Arg;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetMethodParams {
    /// Base64 BOC of the contract code cell.
    pub code: String,
    /// Base64 BOC of the contract data cell.
    pub data: String,
    pub verbosity: Verbosity,
    /// Base64 BOC of the library dictionary, or empty.
    pub libs: String,
    pub address: String,
    pub unixtime: u32,
    /// Decimal nanotons.
    pub balance: String,
    /// Hex-encoded 32-byte seed.
    pub rand_seed: String,
    /// Decimal gas units.
    pub gas_limit: String,
    pub method_id: i64,
    pub debug_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMethodArgs {
    pub params: GetMethodParams,
    /// Base64 BOC of the serialized input stack.
    pub stack: String,
    /// Base64 BOC of the blockchain configuration.
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionParams {
    pub utime: u32,
    pub lt: String,
    pub rand_seed: String,
    pub ignore_chksig: bool,
    pub debug_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_tick_tock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_tock: Option<bool>,
}

/// Inputs shared by ordinary and tick-tock transaction emulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulationArgs {
    pub config: String,
    pub verbosity: Verbosity,
    pub libs: Option<String>,
    /// Base64 BOC of the shard account.
    pub shard_account: String,
    pub utime: u32,
    pub lt: u64,
    pub rand_seed: String,
    pub ignore_chksig: bool,
    pub debug_enabled: bool,
}

impl EmulationArgs {
    pub(crate) fn params(&self, tick_tock: Option<TickTock>) -> TransactionParams {
        TransactionParams {
            utime: self.utime,
            lt: self.lt.to_string(),
            rand_seed: self.rand_seed.clone(),
            ignore_chksig: self.ignore_chksig,
            debug_enabled: self.debug_enabled,
            is_tick_tock: tick_tock.map(|_| true),
            is_tock: tick_tock.map(|t| t == TickTock::Tock),
        }
    }

    /// The library dictionary, or a null pointer when there is none.
    pub(crate) fn libs_arg(&self) -> Arg {
        match &self.libs {
            Some(libs) => Arg::from(libs.as_str()),
            None => Arg::Number(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionArgs {
    pub emulation: EmulationArgs,
    /// Base64 BOC of the inbound message.
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTock {
    Tick,
    Tock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickTockArgs {
    pub emulation: EmulationArgs,
    pub which: TickTock,
}
