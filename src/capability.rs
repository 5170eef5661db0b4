//! Capability probe: one-shot detection of rendering capability.
//!
//! The probe answers what the runtime can render at all (graphics support,
//! texture limits) and how much hardware is behind it (memory, cores,
//! platform family). It runs once, when a controller is built.

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory holding DRM device nodes on Linux.
pub const DEFAULT_RENDER_NODE_DIR: &str = "/dev/dri";

/// Prefix of unprivileged DRM render nodes.
const RENDER_NODE_PREFIX: &str = "renderD";

/// Texture size assumed when graphics support is missing.
pub const MIN_TEXTURE_SIZE: u32 = 1024;

/// Coarse platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFamily {
    Desktop,
    Mobile,
}

/// Resource tier within a platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    Low,
    Medium,
    High,
}

impl ResourceTier {
    /// Static decision table over reported memory and logical cores.
    pub fn from_resources(memory_gb: f64, logical_cores: u32) -> Self {
        if logical_cores >= 6 && memory_gb >= 6.0 {
            ResourceTier::High
        } else if logical_cores >= 4 && memory_gb >= 4.0 {
            ResourceTier::Medium
        } else {
            ResourceTier::Low
        }
    }
}

/// Platform family crossed with resource tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    DesktopLow,
    DesktopMedium,
    DesktopHigh,
    MobileLow,
    MobileMedium,
    MobileHigh,
}

impl DeviceClass {
    pub fn new(family: PlatformFamily, tier: ResourceTier) -> Self {
        match (family, tier) {
            (PlatformFamily::Desktop, ResourceTier::Low) => DeviceClass::DesktopLow,
            (PlatformFamily::Desktop, ResourceTier::Medium) => DeviceClass::DesktopMedium,
            (PlatformFamily::Desktop, ResourceTier::High) => DeviceClass::DesktopHigh,
            (PlatformFamily::Mobile, ResourceTier::Low) => DeviceClass::MobileLow,
            (PlatformFamily::Mobile, ResourceTier::Medium) => DeviceClass::MobileMedium,
            (PlatformFamily::Mobile, ResourceTier::High) => DeviceClass::MobileHigh,
        }
    }

    /// Classify from a platform hint and the reported resources.
    pub fn classify(family: PlatformFamily, memory_gb: f64, logical_cores: u32) -> Self {
        Self::new(family, ResourceTier::from_resources(memory_gb, logical_cores))
    }

    pub fn family(self) -> PlatformFamily {
        match self {
            DeviceClass::DesktopLow | DeviceClass::DesktopMedium | DeviceClass::DesktopHigh => {
                PlatformFamily::Desktop
            }
            DeviceClass::MobileLow | DeviceClass::MobileMedium | DeviceClass::MobileHigh => {
                PlatformFamily::Mobile
            }
        }
    }

    pub fn tier(self) -> ResourceTier {
        match self {
            DeviceClass::DesktopLow | DeviceClass::MobileLow => ResourceTier::Low,
            DeviceClass::DesktopMedium | DeviceClass::MobileMedium => ResourceTier::Medium,
            DeviceClass::DesktopHigh | DeviceClass::MobileHigh => ResourceTier::High,
        }
    }
}

/// Immutable result of probing the runtime once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub graphics_supported: bool,
    pub device_class: DeviceClass,
    pub max_texture_size: u32,
    pub estimated_memory_gb: f64,
    pub logical_cores: u32,
}

impl CapabilitySnapshot {
    /// Conservative defaults for an environment with no usable graphics.
    pub fn unsupported() -> Self {
        Self {
            graphics_supported: false,
            device_class: DeviceClass::DesktopLow,
            max_texture_size: MIN_TEXTURE_SIZE,
            estimated_memory_gb: 0.0,
            logical_cores: 1,
        }
    }
}

/// Source of a capability snapshot.
///
/// Implementations must not panic or fail: when detection goes wrong they
/// return conservative values (see [`CapabilitySnapshot::unsupported`]).
pub trait CapabilityProbe {
    fn probe(&self) -> CapabilitySnapshot;
}

/// Probe that always reports a fixed snapshot.
///
/// Useful for tests and for hosts that query their own graphics API.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub CapabilitySnapshot);

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> CapabilitySnapshot {
        self.0
    }
}

/// Probe backed by the operating system.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    platform_hint: Option<PlatformFamily>,
    render_node_dir: PathBuf,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            platform_hint: None,
            render_node_dir: PathBuf::from(DEFAULT_RENDER_NODE_DIR),
        }
    }

    /// Override the platform family instead of inferring it from the target OS.
    pub fn with_platform_hint(mut self, family: PlatformFamily) -> Self {
        self.platform_hint = Some(family);
        self
    }

    /// Look for render nodes somewhere other than `/dev/dri`.
    pub fn with_render_node_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.render_node_dir = dir.into();
        self
    }

    fn platform_family(&self) -> PlatformFamily {
        self.platform_hint.unwrap_or(
            if cfg!(any(target_os = "android", target_os = "ios")) {
                PlatformFamily::Mobile
            } else {
                PlatformFamily::Desktop
            },
        )
    }

    fn logical_cores(&self) -> Result<u32, ProbeError> {
        let cores = std::thread::available_parallelism()?;
        Ok(u32::try_from(cores.get()).unwrap_or(u32::MAX))
    }

    #[cfg(unix)]
    fn memory_gb(&self) -> Result<f64, ProbeError> {
        // SAFETY: sysconf has no preconditions and only reads system values.
        let (pages, page_size) =
            unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };

        if pages <= 0 || page_size <= 0 {
            return Err(ProbeError::MemoryQueryFailed(format!(
                "sysconf returned pages={} page_size={}",
                pages, page_size
            )));
        }

        let bytes = pages as f64 * page_size as f64;
        Ok(bytes / (1024.0 * 1024.0 * 1024.0))
    }

    #[cfg(not(unix))]
    fn memory_gb(&self) -> Result<f64, ProbeError> {
        Err(ProbeError::MemoryQueryFailed(
            "no memory query on this platform".to_string(),
        ))
    }

    /// Open the first render node and release it before returning.
    #[cfg(target_os = "linux")]
    fn graphics_supported(&self) -> Result<bool, ProbeError> {
        render_node_available(&self.render_node_dir)
    }

    // Non-Linux desktops always expose a system graphics API.
    #[cfg(not(target_os = "linux"))]
    fn graphics_supported(&self) -> Result<bool, ProbeError> {
        Ok(true)
    }
}

/// Returns `Ok(true)` if a render node under `dir` can be opened.
///
/// The opened handle lives only inside the loop body and is closed on every
/// path out of this function.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn render_node_available(dir: &Path) -> Result<bool, ProbeError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ProbeError::RenderNodeUnavailable {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(RENDER_NODE_PREFIX) {
            continue;
        }
        match File::open(entry.path()) {
            Ok(_node) => {
                debug!("Opened render node {}", name);
                return Ok(true);
            }
            Err(e) => debug!("Render node {} not usable: {}", name, e),
        }
    }

    Ok(false)
}

/// Texture limit estimate for a tier when no graphics API is queried.
fn estimated_texture_size(tier: ResourceTier) -> u32 {
    match tier {
        ResourceTier::High => 16384,
        ResourceTier::Medium => 8192,
        ResourceTier::Low => 4096,
    }
}

impl CapabilityProbe for SystemProbe {
    fn probe(&self) -> CapabilitySnapshot {
        let graphics_supported = match self.graphics_supported() {
            Ok(supported) => supported,
            Err(e) => {
                warn!("Graphics detection failed: {}", e);
                false
            }
        };

        if !graphics_supported {
            return CapabilitySnapshot::unsupported();
        }

        let logical_cores = self.logical_cores().unwrap_or_else(|e| {
            warn!("Core count detection failed: {}, assuming 1", e);
            1
        });
        let estimated_memory_gb = self.memory_gb().unwrap_or_else(|e| {
            warn!("Memory detection failed: {}, assuming 0GB", e);
            0.0
        });

        let device_class =
            DeviceClass::classify(self.platform_family(), estimated_memory_gb, logical_cores);

        let snapshot = CapabilitySnapshot {
            graphics_supported,
            device_class,
            max_texture_size: estimated_texture_size(device_class.tier()),
            estimated_memory_gb,
            logical_cores,
        };
        debug!(?snapshot, "Capability probe complete");
        snapshot
    }
}
