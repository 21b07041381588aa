//! Pooled foreign-memory buffers for string arguments.
//!
//! Every string passed to a foreign call is copied into a NUL-terminated
//! buffer that lives in the module's linear memory. Buffers are reused across
//! calls: each string takes the smallest free buffer that fits, strings are
//! placed longest first, and after the call the pool is trimmed to the largest
//! number of strings any single call has needed so far.

use anyhow::{Context, Result};
use tracing::debug;

use crate::foreign::ForeignModule;
use crate::handle::ForeignPtr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Buffer {
    /// Bytes, including the terminator.
    capacity: u32,
    ptr: ForeignPtr,
    in_use: bool,
}

/// Foreign allocator traffic caused by the arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub allocations: u64,
    pub releases: u64,
}

#[derive(Debug, Default)]
pub struct StringArena {
    buffers: Vec<Buffer>,
    high_water_mark: usize,
    stats: ArenaStats,
}

impl StringArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest number of strings requested by a single call so far.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers_in_use(&self) -> usize {
        self.buffers.iter().filter(|b| b.in_use).count()
    }

    /// Capacities of the pooled buffers, largest first once a call has finished.
    pub fn capacities(&self) -> Vec<u32> {
        self.buffers.iter().map(|b| b.capacity).collect()
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// Copies `strings` into foreign memory, runs `f` with their addresses in
    /// input order, then trims and releases the pool.
    ///
    /// The addresses are only valid inside `f`. The release runs even when
    /// placement or `f` fails; the first error wins.
    pub fn with_strings<M, R>(
        &mut self,
        module: &mut M,
        strings: &[&str],
        f: impl FnOnce(&mut M, &[ForeignPtr]) -> Result<R>,
    ) -> Result<R>
    where
        M: ForeignModule + ?Sized,
    {
        let out = match self.place_all(module, strings) {
            Ok(ptrs) => f(&mut *module, &ptrs),
            Err(err) => Err(err),
        };
        let released = self.release_after_call(module);
        let out = out?;
        released?;
        Ok(out)
    }

    /// Frees every pooled buffer and forgets the high-water mark.
    pub fn release_all<M>(&mut self, module: &mut M) -> Result<()>
    where
        M: ForeignModule + ?Sized,
    {
        self.high_water_mark = 0;
        self.release_after_call(module)
    }

    fn place_all<M>(&mut self, module: &mut M, strings: &[&str]) -> Result<Vec<ForeignPtr>>
    where
        M: ForeignModule + ?Sized,
    {
        self.high_water_mark = self.high_water_mark.max(strings.len());

        // Stable, so equal lengths keep their input order.
        let mut order: Vec<usize> = (0..strings.len()).collect();
        order.sort_by(|&a, &b| strings[b].len().cmp(&strings[a].len()));

        let mut out = vec![ForeignPtr::NULL; strings.len()];
        for i in order {
            let s = strings[i];
            if s.as_bytes().contains(&0) {
                anyhow::bail!("string argument {i} contains an interior NUL byte");
            }
            let required = u32::try_from(s.len() + 1)
                .with_context(|| format!("string argument {i} is too large for foreign memory"))?;

            let idx = self.acquire(module, required)?;
            let ptr = self.buffers[idx].ptr;

            let mut bytes = Vec::with_capacity(s.len() + 1);
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
            module
                .write_bytes(ptr.addr(), &bytes)
                .with_context(|| format!("write string argument {i} at {ptr}"))?;

            out[i] = ptr;
        }
        Ok(out)
    }

    /// Marks the smallest free buffer holding `required` bytes as in use,
    /// allocating an exact-size one when none fits.
    fn acquire<M>(&mut self, module: &mut M, required: u32) -> Result<usize>
    where
        M: ForeignModule + ?Sized,
    {
        let best = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.in_use && b.capacity >= required)
            .min_by_key(|(_, b)| b.capacity)
            .map(|(i, _)| i);

        let idx = match best {
            Some(i) => i,
            None => {
                let raw = module
                    .malloc(required)
                    .with_context(|| format!("allocate {required}-byte string buffer"))?;
                if raw == 0 {
                    anyhow::bail!("foreign allocator returned null for {required} bytes");
                }
                self.stats.allocations += 1;
                self.buffers.push(Buffer {
                    capacity: required,
                    ptr: ForeignPtr::from_raw(raw),
                    in_use: false,
                });
                debug!(
                    capacity = required,
                    live = self.buffers.len(),
                    "string arena grew"
                );
                self.buffers.len() - 1
            }
        };

        self.buffers[idx].in_use = true;
        Ok(idx)
    }

    fn release_after_call<M>(&mut self, module: &mut M) -> Result<()>
    where
        M: ForeignModule + ?Sized,
    {
        self.buffers.sort_by(|a, b| b.capacity.cmp(&a.capacity));

        let mut first_err = None;
        if self.buffers.len() > self.high_water_mark {
            for buf in self.buffers.drain(self.high_water_mark..) {
                self.stats.releases += 1;
                if let Err(err) = module.free(buf.ptr.addr()) {
                    if first_err.is_none() {
                        first_err = Some(err.context(format!("free string buffer {}", buf.ptr)));
                    }
                }
            }
        }

        for buf in &mut self.buffers {
            buf.in_use = false;
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
