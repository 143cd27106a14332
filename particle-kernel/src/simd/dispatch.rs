// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! CPU capability detection
//!
//! This module provides runtime detection of CPU SIMD capabilities. The
//! probe runs once per process; afterwards [`detect_capabilities`] returns
//! the cached value. Callers that want a different view (tests, forced
//! scalar runs) build a [`Capabilities`] by hand and pass it explicitly.

use std::fmt;
use std::sync::OnceLock;

/// A single CPU feature the kernel cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Feature {
    /// Streaming SIMD Extensions
    Sse = 1 << 0,
    /// SSE2
    Sse2 = 1 << 1,
    /// SSE3
    Sse3 = 1 << 2,
    /// Supplemental SSE3
    Ssse3 = 1 << 3,
    /// SSE4.1
    Sse41 = 1 << 4,
    /// SSE4.2
    Sse42 = 1 << 5,
    /// Advanced Vector Extensions
    Avx = 1 << 6,
    /// AVX2
    Avx2 = 1 << 7,
    /// Fused multiply-add
    Fma = 1 << 8,
    /// AVX-512 Foundation
    Avx512F = 1 << 9,
    /// AVX-512 Double/Quad Word instructions
    Avx512Dq = 1 << 10,
}

impl Feature {
    /// Every feature, in bit order
    pub const ALL: [Feature; 11] = [
        Feature::Sse,
        Feature::Sse2,
        Feature::Sse3,
        Feature::Ssse3,
        Feature::Sse41,
        Feature::Sse42,
        Feature::Avx,
        Feature::Avx2,
        Feature::Fma,
        Feature::Avx512F,
        Feature::Avx512Dq,
    ];

    /// Short lowercase name, matching `target_feature` spelling
    pub fn name(self) -> &'static str {
        match self {
            Feature::Sse => "sse",
            Feature::Sse2 => "sse2",
            Feature::Sse3 => "sse3",
            Feature::Ssse3 => "ssse3",
            Feature::Sse41 => "sse4.1",
            Feature::Sse42 => "sse4.2",
            Feature::Avx => "avx",
            Feature::Avx2 => "avx2",
            Feature::Fma => "fma",
            Feature::Avx512F => "avx512f",
            Feature::Avx512Dq => "avx512dq",
        }
    }
}

/// Bit set of [`Feature`]s
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet(u32);

impl FeatureSet {
    /// Set with no features
    pub const fn empty() -> Self {
        FeatureSet(0)
    }

    /// Build a set from a raw bitmask
    pub const fn from_bits(bits: u32) -> Self {
        FeatureSet(bits)
    }

    /// Raw bitmask
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Return a copy with `feature` added
    pub const fn with(self, feature: Feature) -> Self {
        FeatureSet(self.0 | feature as u32)
    }

    /// Check if `feature` is present
    pub const fn contains(self, feature: Feature) -> bool {
        self.0 & feature as u32 != 0
    }

    /// Iterate over the features present in the set
    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        iter.into_iter().fold(FeatureSet::empty(), FeatureSet::with)
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Feature::name)).finish()
    }
}

/// What the host CPU offers the step kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Detected feature flags
    pub features: FeatureSet,
    /// Widest usable vector register in bytes
    pub max_vector_width: usize,
    /// Alignment (bytes) that suits the widest vector loads
    pub preferred_alignment: usize,
    /// Cache line size in bytes
    pub cache_line_size: usize,
}

/// Cache line size assumed when the CPU does not report one
pub const DEFAULT_CACHE_LINE: usize = 64;

impl Capabilities {
    /// Capabilities with no vector features, forcing the scalar kernel
    pub fn scalar_only() -> Self {
        Self::from_features(FeatureSet::empty(), DEFAULT_CACHE_LINE)
    }

    /// Derive widths and alignment from a feature set
    pub fn from_features(features: FeatureSet, cache_line_size: usize) -> Self {
        let max_vector_width = if features.contains(Feature::Avx512F) {
            64
        } else if features.contains(Feature::Avx) {
            32
        } else if features.contains(Feature::Sse) {
            16
        } else {
            std::mem::size_of::<f32>()
        };
        Capabilities {
            features,
            max_vector_width,
            preferred_alignment: max_vector_width.max(16),
            cache_line_size: if cache_line_size == 0 {
                DEFAULT_CACHE_LINE
            } else {
                cache_line_size
            },
        }
    }

    /// Check if a feature is present
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(feature)
    }
}

/// Global cache of detected capabilities
static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

/// Detect CPU capabilities at runtime
///
/// Uses CPUID to query the processor, then drops any AVX tier the operating
/// system has not enabled. The result is cached for the life of the process,
/// so repeated calls always agree.
///
/// # Platform Support
///
/// - **x86_64**: Full feature detection via CPUID
/// - **Other**: No vector features (scalar only)
pub fn detect_capabilities() -> Capabilities {
    *CAPABILITIES.get_or_init(|| {
        let caps = detect_capabilities_impl();
        log::debug!("detected CPU capabilities: {:?}", caps);
        caps
    })
}

#[cfg(target_arch = "x86_64")]
fn detect_capabilities_impl() -> Capabilities {
    use raw_cpuid::CpuId;

    let cpuid = CpuId::new();
    let mut features = FeatureSet::empty();
    let mut cache_line_size = 0;

    if let Some(info) = cpuid.get_feature_info() {
        for (present, feature) in [
            (info.has_sse(), Feature::Sse),
            (info.has_sse2(), Feature::Sse2),
            (info.has_sse3(), Feature::Sse3),
            (info.has_ssse3(), Feature::Ssse3),
            (info.has_sse41(), Feature::Sse41),
            (info.has_sse42(), Feature::Sse42),
            (info.has_avx(), Feature::Avx),
            (info.has_fma(), Feature::Fma),
        ] {
            if present {
                features = features.with(feature);
            }
        }
        // CLFLUSH line size is reported in 8-byte units
        cache_line_size = info.cflush_cache_line_size() as usize * 8;
    }

    if let Some(extended) = cpuid.get_extended_feature_info() {
        for (present, feature) in [
            (extended.has_avx2(), Feature::Avx2),
            (extended.has_avx512f(), Feature::Avx512F),
            (extended.has_avx512dq(), Feature::Avx512Dq),
        ] {
            if present {
                features = features.with(feature);
            }
        }
    }

    // CPUID reports silicon support; the OS must also save the wider registers
    let os_enabled: FeatureSet = Feature::ALL
        .into_iter()
        .filter(|f| match f {
            Feature::Avx => is_x86_feature_detected!("avx"),
            Feature::Avx2 => is_x86_feature_detected!("avx2"),
            Feature::Fma => is_x86_feature_detected!("fma"),
            Feature::Avx512F => is_x86_feature_detected!("avx512f"),
            Feature::Avx512Dq => is_x86_feature_detected!("avx512dq"),
            _ => true,
        })
        .collect();

    Capabilities::from_features(
        FeatureSet::from_bits(features.bits() & os_enabled.bits()),
        cache_line_size,
    )
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_capabilities_impl() -> Capabilities {
    Capabilities::scalar_only()
}
