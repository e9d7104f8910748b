//! Hardware capability bitmask: the contract between hardware detection and
//! backend selection.
//!
//! The bit assignments are fixed: a mask detected on one machine means the
//! same thing to every backend descriptor, so they must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;
use thiserror::Error;

/// Set of named hardware feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMask(u32);

impl CapabilityMask {
    /// No optional features; only the portable backend is eligible.
    pub const NONE: Self = Self(0);
    /// x86 SSE3.
    pub const SSE3: Self = Self(1 << 0);
    /// x86 SSSE3 (`pmaddubsw`, the unsigned × signed byte multiply).
    pub const SSSE3: Self = Self(1 << 1);
    /// x86 AVX.
    pub const AVX: Self = Self(1 << 2);
    /// x86 AVX2 (256-bit integer SIMD).
    pub const AVX2: Self = Self(1 << 3);
    /// x86 AVX-512 Foundation.
    pub const AVX512F: Self = Self(1 << 5);
    /// ARM NEON (always present on aarch64).
    pub const NEON: Self = Self(1 << 8);

    /// Every flag with a well-known name, in bit order.
    pub const NAMED: [(Self, &'static str); 6] = [
        (Self::SSE3, "sse3"),
        (Self::SSSE3, "ssse3"),
        (Self::AVX, "avx"),
        (Self::AVX2, "avx2"),
        (Self::AVX512F, "avx512f"),
        (Self::NEON, "neon"),
    ];

    const KNOWN_BITS: u32 = Self::SSE3.0
        | Self::SSSE3.0
        | Self::AVX.0
        | Self::AVX2.0
        | Self::AVX512F.0
        | Self::NEON.0;

    /// Wrap a raw mask produced by a detection collaborator.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every flag in `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Bits that have no well-known assignment.
    pub const fn unknown_bits(self) -> u32 {
        self.0 & !Self::KNOWN_BITS
    }

    /// Names of the well-known flags set in this mask.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED.iter().filter(|(flag, _)| self.contains(*flag)).map(|(_, name)| *name).collect()
    }

    fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::NAMED.iter().find(|(_, n)| *n == name).map(|(flag, _)| *flag)
    }
}

impl BitOr for CapabilityMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for CapabilityMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CapabilityMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} [{}]", self.0, self.names().join(","))
    }
}

/// Error returned when a mask string is neither numeric nor a list of known names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized capability '{0}'")]
pub struct ParseCapabilityError(pub String);

impl FromStr for CapabilityMask {
    type Err = ParseCapabilityError;

    /// Accepts `0x1f`, `31`, `none`, or a comma-separated list such as `sse3,avx2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(Self::NONE);
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u32::from_str_radix(hex, 16)
                .map(Self)
                .map_err(|_| ParseCapabilityError(s.to_string()));
        }
        if let Ok(bits) = s.parse::<u32>() {
            return Ok(Self(bits));
        }

        let mut mask = Self::NONE;
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            mask |= Self::from_name(part).ok_or_else(|| ParseCapabilityError(part.to_string()))?;
        }
        Ok(mask)
    }
}
