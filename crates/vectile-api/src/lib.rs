//! VecTile API: shared surface between the tiling planner and its collaborators.
//!
//! Goals:
//! - Define the element types and the hardware capability descriptor consumed by the planner.
//! - Provide a provider trait so each compiled target can answer the capability query once.
//! - Define the launch parameter payload handed to the kernel dispatch layer.
//! - Keep everything here serializable; collaborators exchange these types across process
//!   boundaries when plans are produced ahead of time.

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Element types accepted by the vector-norm operator family.
///
/// Reduction statistics are always computed in the promoted type regardless of
/// the storage type of the input and output tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElemType {
    F16,
    Bf16,
    F32,
}

impl ElemType {
    /// Storage size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            ElemType::F16 | ElemType::Bf16 => 2,
            ElemType::F32 => 4,
        }
    }

    /// Type used for on-chip partial sums and statistics.
    pub fn promoted(self) -> ElemType {
        ElemType::F32
    }

    /// True for the 16-bit storage types.
    pub fn is_narrow(self) -> bool {
        !matches!(self, ElemType::F32)
    }

    /// Stable small integer used inside tiling keys and cache keys.
    pub fn code(self) -> u64 {
        match self {
            ElemType::F16 => 1,
            ElemType::Bf16 => 2,
            ElemType::F32 => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElemType::F16 => "f16",
            ElemType::Bf16 => "bf16",
            ElemType::F32 => "f32",
        }
    }
}

/// Capability numbers for one compiled target, queried once and treated as
/// constants by every planning call against that target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCaps {
    /// Number of parallel execution units available to one operator launch.
    pub core_count: usize,
    /// Per-core scratch memory capacity in bytes.
    pub scratch_bytes: usize,
    /// SIMD width in elements for the promoted float type.
    pub vector_elems: usize,
    /// Transfer/alignment granule in bytes; tile lengths are aligned to it.
    pub block_align_bytes: usize,
}

impl Default for HardwareCaps {
    fn default() -> Self {
        // Representative mid-range target; real deployments register a provider.
        Self {
            core_count: 48,
            scratch_bytes: 192 * 1024,
            vector_elems: 64,
            block_align_bytes: 32,
        }
    }
}

impl HardwareCaps {
    /// Alignment granule expressed in elements of the given type.
    pub fn align_elems(&self, elem: ElemType) -> usize {
        (self.block_align_bytes / elem.size_of()).max(1)
    }

    /// Sanity check used at planner construction; all fields must be positive
    /// and the block granule may not exceed one vector register.
    pub fn validate(&self) -> Result<()> {
        if self.core_count == 0 || self.scratch_bytes == 0 || self.vector_elems == 0 {
            return Err(anyhow!("capability descriptor has a zero field: {self:?}"));
        }
        if self.block_align_bytes == 0 || !self.block_align_bytes.is_power_of_two() {
            return Err(anyhow!(
                "block alignment must be a positive power of two, got {}",
                self.block_align_bytes
            ));
        }
        if self.block_align_bytes > self.vector_elems * 4 {
            return Err(anyhow!(
                "block alignment {}B exceeds one f32 vector register ({} lanes)",
                self.block_align_bytes,
                self.vector_elems
            ));
        }
        Ok(())
    }
}

/// Scalars the dispatch collaborator needs before launching the selected
/// kernel variant. The serialized plan blob travels next to this payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParams {
    /// Selects the precompiled device kernel variant.
    pub tiling_key: u64,
    /// Launch grid size; cores beyond this index stay idle.
    pub used_cores: usize,
    /// Device workspace to allocate before launch.
    pub workspace_bytes: u64,
    /// Whether the workspace must be zero-filled before launch.
    pub needs_zero_init: bool,
    /// Byte length of the serialized plan blob.
    pub tiling_data_len: usize,
}

/// Target interface answered once per compiled target.
pub trait CapsProvider: Send + Sync {
    /// Query the capability numbers for this target.
    fn query_caps(&self) -> Result<HardwareCaps>;

    /// Short identifier used in logs and cache file names.
    fn target_tag(&self) -> String {
        "generic".to_string()
    }
}

static PROVIDER: OnceCell<Box<dyn CapsProvider>> = OnceCell::new();

/// Register the process-wide capability provider. First registration wins;
/// later calls are ignored so embedders and tests cannot fight over it.
pub fn register_caps_provider(provider: Box<dyn CapsProvider>) {
    let _ = PROVIDER.set(provider);
}

/// The registered provider, if any.
pub fn caps_provider() -> Option<&'static dyn CapsProvider> {
    PROVIDER.get().map(|p| p.as_ref())
}

/// Fixed-value provider used by tests and single-target embedders.
pub struct StaticCapsProvider {
    caps: HardwareCaps,
    tag: String,
}

impl StaticCapsProvider {
    pub fn new(caps: HardwareCaps, tag: impl Into<String>) -> Self {
        Self {
            caps,
            tag: tag.into(),
        }
    }
}

impl CapsProvider for StaticCapsProvider {
    fn query_caps(&self) -> Result<HardwareCaps> {
        Ok(self.caps)
    }

    fn target_tag(&self) -> String {
        self.tag.clone()
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

fn caps_profile_path() -> Option<PathBuf> {
    std::env::var("VECTILE_CAPS_PATH").ok().map(PathBuf::from)
}

fn load_caps_profile(path: &PathBuf) -> Option<HardwareCaps> {
    let data = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<HardwareCaps>(&data) {
        Ok(caps) => Some(caps),
        Err(err) => {
            log::debug!("ignoring capability profile {path:?}: {err}");
            None
        }
    }
}

/// Effective capability numbers: the registered provider (or defaults),
/// overridden by an optional JSON profile (`VECTILE_CAPS_PATH`) and then by
/// individual env variables. Intended for bring-up and benchmarking; steady
/// state uses the provider values untouched.
pub fn effective_caps() -> Result<HardwareCaps> {
    let mut caps = match caps_provider() {
        Some(p) => p.query_caps()?,
        None => HardwareCaps::default(),
    };
    if let Some(path) = caps_profile_path() {
        if let Some(profile) = load_caps_profile(&path) {
            log::debug!("capability profile loaded from {path:?}");
            caps = profile;
        }
    }
    if let Some(v) = env_usize("VECTILE_CORE_COUNT") {
        caps.core_count = v;
    }
    if let Some(v) = env_usize("VECTILE_SCRATCH_BYTES") {
        caps.scratch_bytes = v;
    }
    if let Some(v) = env_usize("VECTILE_VECTOR_ELEMS") {
        caps.vector_elems = v;
    }
    caps.validate()?;
    Ok(caps)
}
