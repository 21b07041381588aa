use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest as _, Sha256};

pub const ENV_WASM_PATH: &str = "EMU_HOST_WASM_PATH";
pub const ENV_WASM_SHA256: &str = "EMU_HOST_WASM_SHA256";
pub const ENV_MAX_MEMORY_BYTES: &str = "EMU_HOST_MAX_MEMORY_BYTES";

/// Largest linear memory a wasm32 module can address.
const WASM32_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// The wasm32 limit, clamped to what the host can address.
pub const DEFAULT_MAX_MEMORY_BYTES: usize = if WASM32_MEMORY_BYTES > usize::MAX as u64 {
    usize::MAX
} else {
    WASM32_MEMORY_BYTES as usize
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub wasm_path: PathBuf,
    /// `sha256:<64-hex>` the module bytes must match, if set.
    pub expected_sha256: Option<String>,
    pub max_memory_bytes: usize,
}

impl HostConfig {
    pub fn new(wasm_path: impl Into<PathBuf>) -> Self {
        Self {
            wasm_path: wasm_path.into(),
            expected_sha256: None,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let wasm_path = lookup(ENV_WASM_PATH)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .with_context(|| format!("missing environment variable {ENV_WASM_PATH}"))?;

        let expected_sha256 = match lookup(ENV_WASM_SHA256) {
            Some(raw) if !raw.trim().is_empty() => Some(
                normalize_sha256_digest(&raw)
                    .with_context(|| format!("invalid environment variable {ENV_WASM_SHA256}"))?,
            ),
            _ => None,
        };

        let max_memory_bytes = match lookup(ENV_MAX_MEMORY_BYTES) {
            Some(raw) => parse_memory_bytes(ENV_MAX_MEMORY_BYTES, &raw)?,
            None => DEFAULT_MAX_MEMORY_BYTES,
        };

        Ok(Self {
            wasm_path: PathBuf::from(wasm_path),
            expected_sha256,
            max_memory_bytes,
        })
    }

    /// Reads the module bytes, verifying them against `expected_sha256`.
    pub fn load_module_bytes(&self) -> Result<Vec<u8>> {
        let bytes = std::fs::read(&self.wasm_path)
            .with_context(|| format!("read emulator module {}", self.wasm_path.display()))?;
        if let Some(expected) = &self.expected_sha256 {
            verify_module_digest(&self.wasm_path, &bytes, expected)?;
        }
        Ok(bytes)
    }
}

fn parse_memory_bytes(name: &str, raw: &str) -> Result<usize> {
    let bytes = raw.trim().parse::<usize>().map_err(|_| {
        anyhow::anyhow!("invalid environment variable {name}={raw:?} (expected a byte count)")
    })?;
    if bytes == 0 {
        anyhow::bail!("invalid environment variable {name}={raw:?} (must be positive)");
    }
    Ok(bytes)
}

pub fn module_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

pub fn verify_module_digest(path: &Path, bytes: &[u8], expected: &str) -> Result<()> {
    let got = module_digest(bytes);
    if got != expected.trim() {
        anyhow::bail!(
            "emulator module digest mismatch for {}: expected {expected:?}, got {got:?}",
            path.display()
        );
    }
    Ok(())
}

fn normalize_sha256_digest(raw: &str) -> Result<String> {
    let s = raw.trim().to_ascii_lowercase();
    let Some(hex) = s.strip_prefix("sha256:") else {
        anyhow::bail!("invalid digest {raw:?} (expected sha256:<64-hex>)");
    };
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        anyhow::bail!("invalid digest {raw:?} (expected sha256:<64-hex>)");
    }
    Ok(s)
}
