use anyhow::{Context, Result};
use emu_contracts::{EXPORT_CREATE_EMULATOR, EXPORT_DESTROY_EMULATOR};
use emu_verbosity::Verbosity;
use tracing::{debug, warn};

use crate::foreign::ForeignModule;
use crate::handle::{EmulatorHandle, ForeignPtr};
use crate::invoke::{Arg, HostContext};

#[derive(Debug)]
struct CachedEmulator {
    handle: EmulatorHandle,
    config: String,
    verbosity: Verbosity,
}

/// Keeps at most one foreign emulator alive, keyed by its configuration and
/// verbosity.
///
/// Building an emulator from a configuration blob is expensive, so repeated
/// calls with the same key reuse the instance. Callers that need two
/// configurations at once need two caches (and two modules).
#[derive(Debug, Default)]
pub struct EmulatorCache {
    current: Option<CachedEmulator>,
}

impl EmulatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<EmulatorHandle> {
        self.current.as_ref().map(|c| c.handle)
    }

    /// Returns the cached emulator for `(config, verbosity)`, replacing the
    /// cached one when either differs.
    ///
    /// A null handle from the constructor is cached like any other, so the
    /// same key never retries; the foreign side reports the failure on the
    /// next call that uses it.
    pub fn get_handle<M: ForeignModule>(
        &mut self,
        ctx: &mut HostContext<M>,
        config: &str,
        verbosity: Verbosity,
    ) -> Result<EmulatorHandle> {
        if let Some(cached) = &self.current {
            if cached.verbosity == verbosity && cached.config == config {
                return Ok(cached.handle);
            }
        }

        self.clear(ctx)?;

        let handle = create_emulator(ctx, config, verbosity)?;
        if handle.is_null() {
            warn!(%verbosity, "emulator constructor returned a null handle");
        }
        self.current = Some(CachedEmulator {
            handle,
            config: config.to_string(),
            verbosity,
        });
        Ok(handle)
    }

    /// Destroys the cached emulator, if any. A cached null handle is dropped
    /// without a foreign call.
    pub fn clear<M: ForeignModule>(&mut self, ctx: &mut HostContext<M>) -> Result<()> {
        match self.current.take() {
            Some(cached) if !cached.handle.is_null() => destroy_emulator(ctx, cached.handle),
            _ => Ok(()),
        }
    }
}

pub(crate) fn create_emulator<M: ForeignModule>(
    ctx: &mut HostContext<M>,
    config: &str,
    verbosity: Verbosity,
) -> Result<EmulatorHandle> {
    let raw = ctx
        .invoke(
            EXPORT_CREATE_EMULATOR,
            &[Arg::from(config), Arg::from(u32::from(verbosity.level()))],
        )
        .context("create emulator")?;
    let handle = EmulatorHandle::new(ForeignPtr::from_result(EXPORT_CREATE_EMULATOR, raw)?);
    debug!(%handle, %verbosity, config_len = config.len(), "emulator created");
    Ok(handle)
}

pub(crate) fn destroy_emulator<M: ForeignModule>(
    ctx: &mut HostContext<M>,
    handle: EmulatorHandle,
) -> Result<()> {
    ctx.invoke(EXPORT_DESTROY_EMULATOR, &[Arg::from(handle)])
        .with_context(|| format!("destroy {handle}"))?;
    debug!(%handle, "emulator destroyed");
    Ok(())
}
