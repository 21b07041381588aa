use anyhow::{Context, Result};
use emu_contracts::{
    EXPORT_EMULATE_WITH_EMULATOR, EXPORT_RUN_GET_METHOD, EXPORT_SBS_GET_METHOD_SETUP,
    EXPORT_SBS_TRANSACTION_SETUP, EXPORT_VERSION,
};
use tracing::{debug, warn};

use crate::config::HostConfig;
use crate::emulator::{create_emulator, destroy_emulator, EmulatorCache};
use crate::foreign::ForeignModule;
use crate::handle::{EmulatorHandle, ForeignPtr};
use crate::invoke::{Arg, HostContext};
use crate::outcome::{
    decode_envelope, CallOutput, EmulatorVersion, GetMethodOutcome, TransactionOutcome,
};
use crate::params::{EmulationArgs, GetMethodArgs, TickTock, TickTockArgs, TransactionArgs};
use crate::session::{Created, GetMethodSession, SessionError, SessionKind, TransactionSession};
use crate::wasm::WasmtimeModule;

/// Entry point for every emulator operation.
///
/// Owns the foreign context and the emulator cache as separate fields; every
/// operation takes `&mut self`, so calls into the module never overlap.
pub struct Executor<M: ForeignModule> {
    ctx: HostContext<M>,
    emulators: EmulatorCache,
}

impl Executor<WasmtimeModule> {
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        Ok(Self::new(WasmtimeModule::from_config(config)?))
    }
}

impl<M: ForeignModule> Executor<M> {
    pub fn new(module: M) -> Self {
        Self {
            ctx: HostContext::new(module),
            emulators: EmulatorCache::new(),
        }
    }

    pub fn context(&self) -> &HostContext<M> {
        &self.ctx
    }

    pub fn module(&self) -> &M {
        self.ctx.module()
    }

    pub fn module_mut(&mut self) -> &mut M {
        self.ctx.module_mut()
    }

    pub fn cached_emulator(&self) -> Option<EmulatorHandle> {
        self.emulators.current()
    }

    /// Debug lines of the most recent operation that did not return them.
    pub fn last_debug_logs(&self) -> &[String] {
        self.ctx.debug_log().lines()
    }

    pub(crate) fn begin_call(&mut self) -> &mut HostContext<M> {
        self.ctx.begin_call();
        &mut self.ctx
    }

    pub fn version(&mut self) -> Result<EmulatorVersion> {
        let raw = self.begin_call().invoke_for_string(EXPORT_VERSION, &[])?;
        serde_json::from_str(&raw).with_context(|| format!("decode `{EXPORT_VERSION}` response"))
    }

    /// Returns the cached emulator for `(config, verbosity)`, creating or
    /// replacing it as needed.
    pub fn emulator(
        &mut self,
        config: &str,
        verbosity: emu_verbosity::Verbosity,
    ) -> Result<EmulatorHandle> {
        self.ctx.begin_call();
        self.emulators.get_handle(&mut self.ctx, config, verbosity)
    }

    pub fn run_get_method(&mut self, args: &GetMethodArgs) -> Result<CallOutput<GetMethodOutcome>> {
        let params = serde_json::to_string(&args.params).context("encode get-method params")?;
        let ctx = self.begin_call();
        let raw = ctx.invoke_for_string(
            EXPORT_RUN_GET_METHOD,
            &[
                Arg::from(params),
                Arg::from(args.stack.as_str()),
                Arg::from(args.config.as_str()),
            ],
        )?;
        let debug_logs = ctx.take_debug_logs();
        decode_envelope(EXPORT_RUN_GET_METHOD, &raw, debug_logs)
    }

    pub fn run_transaction(
        &mut self,
        args: &TransactionArgs,
    ) -> Result<CallOutput<TransactionOutcome>> {
        self.emulate(&args.emulation, &args.message, None)
    }

    pub fn run_tick_tock(&mut self, args: &TickTockArgs) -> Result<CallOutput<TransactionOutcome>> {
        self.emulate(&args.emulation, "", Some(args.which))
    }

    fn emulate(
        &mut self,
        args: &EmulationArgs,
        message: &str,
        tick_tock: Option<TickTock>,
    ) -> Result<CallOutput<TransactionOutcome>> {
        let params =
            serde_json::to_string(&args.params(tick_tock)).context("encode transaction params")?;
        self.ctx.begin_call();
        let emulator = self
            .emulators
            .get_handle(&mut self.ctx, &args.config, args.verbosity)?;
        let raw = self.ctx.invoke_for_string(
            EXPORT_EMULATE_WITH_EMULATOR,
            &[
                Arg::from(emulator),
                args.libs_arg(),
                Arg::from(args.shard_account.as_str()),
                Arg::from(message),
                Arg::from(params),
            ],
        )?;
        let debug_logs = self.ctx.take_debug_logs();
        decode_envelope(EXPORT_EMULATE_WITH_EMULATOR, &raw, debug_logs)
    }

    pub fn sbs_get_method_setup(&mut self, args: &GetMethodArgs) -> Result<Created<GetMethodSession>> {
        let params = serde_json::to_string(&args.params).context("encode get-method params")?;
        let raw = self.begin_call().invoke(
            EXPORT_SBS_GET_METHOD_SETUP,
            &[
                Arg::from(params),
                Arg::from(args.stack.as_str()),
                Arg::from(args.config.as_str()),
            ],
        )?;
        let ptr = ForeignPtr::from_result(EXPORT_SBS_GET_METHOD_SETUP, raw)?;
        if ptr.is_null() {
            return Err(SessionError::SetupRejected {
                kind: GetMethodSession::NAME,
            }
            .into());
        }
        debug!(handle = %ptr, "get-method session created");
        Ok(Created::new(ptr))
    }

    /// Sets up a transaction session on a fresh emulator of its own; the
    /// cached emulator is left alone.
    pub fn sbs_transaction_setup(
        &mut self,
        args: &TransactionArgs,
    ) -> Result<Created<TransactionSession>> {
        let emulation = &args.emulation;
        let params =
            serde_json::to_string(&emulation.params(None)).context("encode transaction params")?;
        let ctx = self.begin_call();
        let emulator = create_emulator(ctx, &emulation.config, emulation.verbosity)?;
        if emulator.is_null() {
            return Err(SessionError::SetupRejected {
                kind: TransactionSession::NAME,
            }
            .into());
        }

        let started = ctx.invoke(
            EXPORT_SBS_TRANSACTION_SETUP,
            &[
                Arg::from(emulator),
                emulation.libs_arg(),
                Arg::from(emulation.shard_account.as_str()),
                Arg::from(args.message.as_str()),
                Arg::from(params),
            ],
        );
        match started {
            Ok(0) => {
                destroy_emulator(ctx, emulator)?;
                Err(SessionError::SetupRejected {
                    kind: TransactionSession::NAME,
                }
                .into())
            }
            Ok(_) => {
                debug!(%emulator, "transaction session created");
                Ok(Created::new(emulator.ptr()))
            }
            Err(err) => {
                if let Err(cleanup) = destroy_emulator(ctx, emulator) {
                    let cleanup = format!("{cleanup:#}");
                    warn!(%emulator, error = %cleanup, "teardown after failed session setup");
                }
                Err(err)
            }
        }
    }

    /// Destroys the cached emulator and frees the string arena.
    pub fn shutdown(mut self) -> Result<M> {
        self.ctx.begin_call();
        let cleared = self.emulators.clear(&mut self.ctx);
        let released = self.ctx.release_arena();
        cleared?;
        released?;
        Ok(self.ctx.into_module())
    }
}
