//! Stepwise debugging sessions.
//!
//! A session is a foreign resource that runs one get-method or one transaction
//! a step at a time. The states are types: [`Created`] can only be stepped,
//! [`Stepping`] can be stepped and inspected, [`Done`] can be inspected and
//! asked for its result, and `destroy` consumes any of them. [`SbsSession`]
//! wraps the same states in one value with runtime checks, for callers that
//! keep a session in a table between requests.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use anyhow::{Context, Result};
use base64::Engine as _;
use emu_contracts::{
    EXPORT_SBS_GET_METHOD_CODE_POS, EXPORT_SBS_GET_METHOD_DESTROY, EXPORT_SBS_GET_METHOD_RESULT,
    EXPORT_SBS_GET_METHOD_STACK, EXPORT_SBS_GET_METHOD_STEP, EXPORT_SBS_TRANSACTION_CODE_POS,
    EXPORT_SBS_TRANSACTION_RESULT, EXPORT_SBS_TRANSACTION_STACK, EXPORT_SBS_TRANSACTION_STEP,
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::emulator::destroy_emulator;
use crate::executor::Executor;
use crate::foreign::ForeignModule;
use crate::handle::{EmulatorHandle, ForeignPtr, SessionHandle};
use crate::invoke::{Arg, HostContext};
use crate::outcome::{decode_envelope, CallOutput, GetMethodOutcome, TransactionOutcome};

/// Export table and teardown of one session flavor.
pub trait SessionKind: Sized {
    const NAME: &'static str;
    const STEP: &'static str;
    const STACK: &'static str;
    const CODE_POS: &'static str;
    const RESULT: &'static str;

    type Outcome: DeserializeOwned;

    fn destroy<M: ForeignModule>(ctx: &mut HostContext<M>, handle: SessionHandle) -> Result<()>;
}

/// Runs a single get-method.
#[derive(Debug, Clone, Copy)]
pub struct GetMethodSession;

impl SessionKind for GetMethodSession {
    const NAME: &'static str = "get-method";
    const STEP: &'static str = EXPORT_SBS_GET_METHOD_STEP;
    const STACK: &'static str = EXPORT_SBS_GET_METHOD_STACK;
    const CODE_POS: &'static str = EXPORT_SBS_GET_METHOD_CODE_POS;
    const RESULT: &'static str = EXPORT_SBS_GET_METHOD_RESULT;

    type Outcome = GetMethodOutcome;

    fn destroy<M: ForeignModule>(ctx: &mut HostContext<M>, handle: SessionHandle) -> Result<()> {
        ctx.invoke(EXPORT_SBS_GET_METHOD_DESTROY, &[Arg::from(handle)])?;
        Ok(())
    }
}

/// Runs a whole transaction. The session handle is a private emulator
/// instance, never the cached one.
#[derive(Debug, Clone, Copy)]
pub struct TransactionSession;

impl SessionKind for TransactionSession {
    const NAME: &'static str = "transaction";
    const STEP: &'static str = EXPORT_SBS_TRANSACTION_STEP;
    const STACK: &'static str = EXPORT_SBS_TRANSACTION_STACK;
    const CODE_POS: &'static str = EXPORT_SBS_TRANSACTION_CODE_POS;
    const RESULT: &'static str = EXPORT_SBS_TRANSACTION_RESULT;

    type Outcome = TransactionOutcome;

    fn destroy<M: ForeignModule>(ctx: &mut HostContext<M>, handle: SessionHandle) -> Result<()> {
        destroy_emulator(ctx, EmulatorHandle::new(handle.ptr()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Stepping,
    Done,
    Destroyed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Stepping => "stepping",
            SessionState::Done => "done",
            SessionState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    SetupRejected {
        kind: &'static str,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidState { op, state } => {
                write!(f, "`{op}` is not valid for a session in state {state}")
            }
            SessionError::SetupRejected { kind } => {
                write!(f, "emulator rejected {kind} session setup")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Position of the next instruction: code cell hash and bit offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodePosition {
    pub hash: String,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct CodePositionParseError {
    value: String,
}

impl fmt::Display for CodePositionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid code position {:?} (expected \"<hash>:<offset>\")",
            self.value
        )
    }
}

impl std::error::Error for CodePositionParseError {}

impl FromStr for CodePosition {
    type Err = CodePositionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CodePositionParseError {
            value: s.to_string(),
        };
        let (hash, offset) = s.trim().rsplit_once(':').ok_or_else(err)?;
        if hash.is_empty() {
            return Err(err());
        }
        let offset = offset.parse::<u32>().map_err(|_| err())?;
        Ok(CodePosition {
            hash: hash.to_string(),
            offset,
        })
    }
}

impl fmt::Display for CodePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.offset)
    }
}

/// Operand stack as serialized by the emulator (base64 BOC of a tuple).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    boc_base64: String,
}

impl StackSnapshot {
    pub fn as_str(&self) -> &str {
        &self.boc_base64
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.boc_base64.trim())
            .context("decode stack snapshot base64")
    }

    pub fn into_string(self) -> String {
        self.boc_base64
    }
}

struct SessionCore<K: SessionKind> {
    handle: SessionHandle,
    released: bool,
    _kind: PhantomData<K>,
}

impl<K: SessionKind> SessionCore<K> {
    fn new(ptr: ForeignPtr) -> Self {
        Self {
            handle: SessionHandle::new(ptr),
            released: false,
            _kind: PhantomData,
        }
    }

    fn step<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<bool> {
        let ctx = exec.begin_call();
        let raw = ctx.invoke(K::STEP, &[Arg::from(self.handle)])?;
        Ok(raw != 0)
    }

    fn stack<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<StackSnapshot> {
        let ctx = exec.begin_call();
        let boc_base64 = ctx.invoke_for_string(K::STACK, &[Arg::from(self.handle)])?;
        Ok(StackSnapshot { boc_base64 })
    }

    fn code_position<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<CodePosition> {
        let ctx = exec.begin_call();
        let raw = ctx.invoke_for_string(K::CODE_POS, &[Arg::from(self.handle)])?;
        Ok(raw.parse::<CodePosition>()?)
    }

    fn result<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<CallOutput<K::Outcome>> {
        let ctx = exec.begin_call();
        let raw = ctx.invoke_for_string(K::RESULT, &[Arg::from(self.handle)])?;
        let debug_logs = ctx.take_debug_logs();
        decode_envelope(K::RESULT, &raw, debug_logs)
    }

    fn destroy<M: ForeignModule>(mut self, exec: &mut Executor<M>) -> Result<()> {
        self.released = true;
        let ctx = exec.begin_call();
        K::destroy(ctx, self.handle)
            .with_context(|| format!("destroy {} {}", K::NAME, self.handle))
    }
}

impl<K: SessionKind> Drop for SessionCore<K> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                kind = K::NAME,
                handle = %self.handle,
                "stepwise session dropped without destroy; foreign resources leaked"
            );
        }
    }
}

/// Steps `core`; a failed step tears the session down before reporting.
fn advance<K: SessionKind, M: ForeignModule>(
    core: SessionCore<K>,
    exec: &mut Executor<M>,
) -> Result<StepOutcome<K>> {
    match core.step(exec) {
        Ok(true) => Ok(StepOutcome::Continue(Stepping { core })),
        Ok(false) => Ok(StepOutcome::Done(Done { core })),
        Err(err) => {
            let handle = core.handle;
            if let Err(cleanup) = core.destroy(exec) {
                let cleanup = format!("{cleanup:#}");
                warn!(kind = K::NAME, %handle, error = %cleanup, "teardown after failed step");
            }
            Err(err.context(format!("step {} {handle}", K::NAME)))
        }
    }
}

/// Outcome of one step.
pub enum StepOutcome<K: SessionKind> {
    Continue(Stepping<K>),
    Done(Done<K>),
}

/// Set up, not yet stepped.
pub struct Created<K: SessionKind> {
    core: SessionCore<K>,
}

impl<K: SessionKind> Created<K> {
    pub(crate) fn new(ptr: ForeignPtr) -> Self {
        Self {
            core: SessionCore::new(ptr),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.core.handle
    }

    pub fn step<M: ForeignModule>(self, exec: &mut Executor<M>) -> Result<StepOutcome<K>> {
        advance(self.core, exec)
    }

    pub fn destroy<M: ForeignModule>(self, exec: &mut Executor<M>) -> Result<()> {
        self.core.destroy(exec)
    }
}

/// Stepped at least once, with more steps remaining.
pub struct Stepping<K: SessionKind> {
    core: SessionCore<K>,
}

impl<K: SessionKind> Stepping<K> {
    pub fn handle(&self) -> SessionHandle {
        self.core.handle
    }

    pub fn step<M: ForeignModule>(self, exec: &mut Executor<M>) -> Result<StepOutcome<K>> {
        advance(self.core, exec)
    }

    pub fn stack<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<StackSnapshot> {
        self.core.stack(exec)
    }

    pub fn code_position<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<CodePosition> {
        self.core.code_position(exec)
    }

    pub fn destroy<M: ForeignModule>(self, exec: &mut Executor<M>) -> Result<()> {
        self.core.destroy(exec)
    }
}

/// Execution finished; the result is available.
pub struct Done<K: SessionKind> {
    core: SessionCore<K>,
}

impl<K: SessionKind> Done<K> {
    pub fn handle(&self) -> SessionHandle {
        self.core.handle
    }

    pub fn stack<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<StackSnapshot> {
        self.core.stack(exec)
    }

    pub fn code_position<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<CodePosition> {
        self.core.code_position(exec)
    }

    pub fn result<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<CallOutput<K::Outcome>> {
        self.core.result(exec)
    }

    pub fn destroy<M: ForeignModule>(self, exec: &mut Executor<M>) -> Result<()> {
        self.core.destroy(exec)
    }
}

enum Slot<K: SessionKind> {
    Created(Created<K>),
    Stepping(Stepping<K>),
    Done(Done<K>),
    Destroyed,
}

impl<K: SessionKind> Slot<K> {
    fn state(&self) -> SessionState {
        match self {
            Slot::Created(_) => SessionState::Created,
            Slot::Stepping(_) => SessionState::Stepping,
            Slot::Done(_) => SessionState::Done,
            Slot::Destroyed => SessionState::Destroyed,
        }
    }
}

/// A session whose state is checked at run time.
pub struct SbsSession<K: SessionKind> {
    handle: SessionHandle,
    slot: Slot<K>,
}

impl<K: SessionKind> From<Created<K>> for SbsSession<K> {
    fn from(created: Created<K>) -> Self {
        Self {
            handle: created.handle(),
            slot: Slot::Created(created),
        }
    }
}

impl<K: SessionKind> SbsSession<K> {
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.slot.state()
    }

    fn invalid(&self, op: &'static str) -> anyhow::Error {
        SessionError::InvalidState {
            op,
            state: self.state(),
        }
        .into()
    }

    /// Advances one step; `Ok(true)` while more steps remain.
    pub fn step<M: ForeignModule>(&mut self, exec: &mut Executor<M>) -> Result<bool> {
        let stepped = match std::mem::replace(&mut self.slot, Slot::Destroyed) {
            Slot::Created(s) => s.step(exec),
            Slot::Stepping(s) => s.step(exec),
            other => {
                self.slot = other;
                return Err(self.invalid("step"));
            }
        };
        match stepped {
            Ok(StepOutcome::Continue(s)) => {
                self.slot = Slot::Stepping(s);
                Ok(true)
            }
            Ok(StepOutcome::Done(d)) => {
                self.slot = Slot::Done(d);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn stack<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<StackSnapshot> {
        match &self.slot {
            Slot::Stepping(s) => s.stack(exec),
            Slot::Done(d) => d.stack(exec),
            _ => Err(self.invalid("stack")),
        }
    }

    pub fn code_position<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<CodePosition> {
        match &self.slot {
            Slot::Stepping(s) => s.code_position(exec),
            Slot::Done(d) => d.code_position(exec),
            _ => Err(self.invalid("code_position")),
        }
    }

    pub fn result<M: ForeignModule>(&self, exec: &mut Executor<M>) -> Result<CallOutput<K::Outcome>> {
        match &self.slot {
            Slot::Done(d) => d.result(exec),
            _ => Err(self.invalid("result")),
        }
    }

    pub fn destroy<M: ForeignModule>(&mut self, exec: &mut Executor<M>) -> Result<()> {
        match std::mem::replace(&mut self.slot, Slot::Destroyed) {
            Slot::Created(s) => s.destroy(exec),
            Slot::Stepping(s) => s.destroy(exec),
            Slot::Done(d) => d.destroy(exec),
            Slot::Destroyed => Err(self.invalid("destroy")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_position_parses_hash_and_offset() {
        let pos: CodePosition = "abcd1234:17".parse().unwrap();
        assert_eq!(
            pos,
            CodePosition {
                hash: "abcd1234".to_string(),
                offset: 17
            }
        );
        assert_eq!(pos.to_string(), "abcd1234:17");
    }

    #[test]
    fn code_position_rejects_malformed_input() {
        for bad in ["abcd1234", ":17", "abcd:x", "abcd:-1", ""] {
            let err = bad.parse::<CodePosition>().unwrap_err();
            assert!(err.to_string().contains("invalid code position"), "{bad}");
        }
    }

    #[test]
    fn stack_snapshot_decodes_base64() {
        let snap = StackSnapshot {
            boc_base64: "aGVsbG8=".to_string(),
        };
        assert_eq!(snap.to_bytes().unwrap(), b"hello");
        let bad = StackSnapshot {
            boc_base64: "***".to_string(),
        };
        assert!(bad.to_bytes().is_err());
    }

    #[test]
    fn invalid_state_error_names_op_and_state() {
        let err = SessionError::InvalidState {
            op: "result",
            state: SessionState::Stepping,
        };
        assert_eq!(
            err.to_string(),
            "`result` is not valid for a session in state stepping"
        );
    }
}
