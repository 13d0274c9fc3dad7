//! CPU architecture names.

use std::fmt;
use std::str::FromStr;

use super::constants::*;

/// A named `(cputype, cpusubtype)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Architecture {
    Ppc,
    I386,
    X86_64,
    X86_64h,
    Armv6,
    Armv6m,
    Armv7,
    Armv7s,
    Armv7m,
    Armv7k,
    Armv7em,
    Arm64,
    /// `arm64` with the v8 subtype.
    Arm64Alt,
    Arm64e,
    /// `arm64e` with the versioned pointer authentication ABI.
    Arm64eVersioned,
    /// `arm64e` with ABI version 1.
    Arm64eV1,
    /// Kernel `arm64e`, ABI versions 0 through 2.
    Arm64eKernel,
    Arm64eKernelV1,
    Arm64eKernelV2,
    Arm64_32,
    /// `arm64_32` with the generic subtype.
    Arm64_32Alt,
}

/// Every architecture with its canonical name and CPU pair.
const ARCHITECTURES: &[(Architecture, &str, u32, u32)] = &[
    (Architecture::Ppc, "ppc", CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_ALL),
    (Architecture::I386, "i386", CPU_TYPE_X86, CPU_SUBTYPE_I386_ALL),
    (Architecture::X86_64, "x86_64", CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL),
    (Architecture::X86_64h, "x86_64h", CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_H),
    (Architecture::Armv6, "armv6", CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V6),
    (Architecture::Armv6m, "armv6m", CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V6M),
    (Architecture::Armv7, "armv7", CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7),
    (Architecture::Armv7s, "armv7s", CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7S),
    (Architecture::Armv7m, "armv7m", CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7M),
    (Architecture::Armv7k, "armv7k", CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7K),
    (Architecture::Armv7em, "armv7em", CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7EM),
    (Architecture::Arm64, "arm64", CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL),
    (Architecture::Arm64Alt, "arm64_alt", CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_V8),
    (Architecture::Arm64e, "arm64e", CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E),
    (
        Architecture::Arm64eVersioned,
        "arm64e.v0",
        CPU_TYPE_ARM64,
        CPU_SUBTYPE_ARM64E | CPU_SUBTYPE_PTRAUTH_ABI,
    ),
    (
        Architecture::Arm64eV1,
        "arm64e.v1",
        CPU_TYPE_ARM64,
        CPU_SUBTYPE_ARM64E | CPU_SUBTYPE_PTRAUTH_ABI | 0x0100_0000,
    ),
    (
        Architecture::Arm64eKernel,
        "arm64e.kernel",
        CPU_TYPE_ARM64,
        CPU_SUBTYPE_ARM64E | CPU_SUBTYPE_PTRAUTH_ABI | CPU_SUBTYPE_PTRAUTH_KERNEL,
    ),
    (
        Architecture::Arm64eKernelV1,
        "arm64e.kernel.v1",
        CPU_TYPE_ARM64,
        CPU_SUBTYPE_ARM64E | CPU_SUBTYPE_PTRAUTH_ABI | CPU_SUBTYPE_PTRAUTH_KERNEL | 0x0100_0000,
    ),
    (
        Architecture::Arm64eKernelV2,
        "arm64e.kernel.v2",
        CPU_TYPE_ARM64,
        CPU_SUBTYPE_ARM64E | CPU_SUBTYPE_PTRAUTH_ABI | CPU_SUBTYPE_PTRAUTH_KERNEL | 0x0200_0000,
    ),
    (Architecture::Arm64_32, "arm64_32", CPU_TYPE_ARM64_32, CPU_SUBTYPE_ARM64_32_V8),
    (Architecture::Arm64_32Alt, "arm64_32_alt", CPU_TYPE_ARM64_32, CPU_SUBTYPE_ARM64_32_ALL),
];

impl Architecture {
    /// Looks up an architecture by exact `(cputype, cpusubtype)`.
    pub fn from_cpu(cputype: u32, cpusubtype: u32) -> Option<Self> {
        ARCHITECTURES
            .iter()
            .find(|(_, _, t, s)| *t == cputype && *s == cpusubtype)
            .map(|(arch, ..)| *arch)
    }

    fn entry(self) -> &'static (Architecture, &'static str, u32, u32) {
        // Every variant has exactly one row.
        ARCHITECTURES
            .iter()
            .find(|(arch, ..)| *arch == self)
            .unwrap_or(&ARCHITECTURES[0])
    }

    /// Returns the canonical name, e.g. `"arm64e"`.
    pub fn name(self) -> &'static str {
        self.entry().1
    }

    /// Returns the `(cputype, cpusubtype)` pair.
    pub fn cpu(self) -> (u32, u32) {
        let (_, _, t, s) = *self.entry();
        (t, s)
    }

    /// Returns true for the arm64e family.
    pub fn is_arm64e(self) -> bool {
        self.cpu().0 == CPU_TYPE_ARM64 && (self.cpu().1 & 0xFF) == CPU_SUBTYPE_ARM64E
    }

    /// Returns every known architecture.
    pub fn all() -> impl Iterator<Item = Architecture> {
        ARCHITECTURES.iter().map(|(arch, ..)| *arch)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ARCHITECTURES
            .iter()
            .find(|(_, name, ..)| *name == s)
            .map(|(arch, ..)| *arch)
            .ok_or_else(|| format!("unknown architecture '{}'", s))
    }
}
