//! Target and ABI resolution
//!
//! A target descriptor is resolved once, either from a supplied triple
//! string or from the host, and is immutable afterwards. Everything else
//! here is a pure function of the descriptor: pointer size, calling
//! convention, linkage-related flags, libc naming.

use crate::ir::{CallConv, Function, Linkage};

/// Supported architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
    Arm,
    Riscv64,
    Unknown,
}

/// Supported operating systems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Macos,
    Windows,
    Freebsd,
    Unknown,
}

/// Supported ABIs / environments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    None,
    Gnu,
    Msvc,
    Mingw,
    Musl,
    Unknown,
}

/// The (architecture, OS, ABI) tuple identifying a compilation target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub arch: Arch,
    pub os: Os,
    pub abi: Abi,
}

impl Target {
    /// Parse a target triple string. Unrecognized components become
    /// `Unknown` rather than errors; whether the backend can actually
    /// build for the result is its own concern.
    pub fn from_triple(triple: &str) -> Target {
        let parts: Vec<&str> = triple.split('-').collect();

        let arch = match parts.first().copied().unwrap_or("") {
            "x86_64" | "amd64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            a if a.starts_with("arm") => Arch::Arm,
            "riscv64" | "riscv64gc" => Arch::Riscv64,
            _ => Arch::Unknown,
        };

        let os = if parts.iter().any(|p| p.contains("linux")) {
            Os::Linux
        } else if parts.iter().any(|p| p.contains("darwin") || p.contains("macos")) {
            Os::Macos
        } else if parts.iter().any(|p| p.contains("windows")) {
            Os::Windows
        } else if parts.iter().any(|p| p.contains("freebsd")) {
            Os::Freebsd
        } else {
            Os::Unknown
        };

        let env = parts.last().copied().unwrap_or("");
        let abi = match os {
            // macOS triples carry no environment component.
            Os::Macos => Abi::None,
            Os::Windows => match env {
                "msvc" => Abi::Msvc,
                "gnu" => Abi::Mingw,
                // Windows with an unidentified environment defaults to MinGW.
                _ => Abi::Mingw,
            },
            _ => match env {
                e if e.starts_with("gnu") => Abi::Gnu,
                e if e.starts_with("musl") => Abi::Musl,
                _ => Abi::Unknown,
            },
        };

        Target { arch, os, abi }
    }

    /// Resolve the host target
    pub fn host() -> Target {
        Target::from_triple(&target_lexicon::HOST.to_string())
    }

    // ── Naming ──────────────────────────────────────────────────────

    pub fn arch_name(&self) -> &'static str {
        match self.arch {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Arm => "arm",
            Arch::Riscv64 => "riscv64",
            Arch::Unknown => "unknown",
        }
    }

    pub fn os_name(&self) -> &'static str {
        match self.os {
            Os::Linux => "linux",
            Os::Macos => "macos",
            Os::Windows => "windows",
            Os::Freebsd => "freebsd",
            Os::Unknown => "unknown",
        }
    }

    pub fn abi_name(&self) -> &'static str {
        match self.abi {
            Abi::None => "none",
            Abi::Gnu => "gnu",
            Abi::Msvc => "msvc",
            Abi::Mingw => "mingw",
            Abi::Musl => "musl",
            Abi::Unknown => "unknown",
        }
    }

    /// Short human-readable name, e.g. `x86_64-linux-gnu`
    pub fn name(&self) -> String {
        format!("{}-{}-{}", self.arch_name(), self.os_name(), self.abi_name())
    }

    /// Canonical triple string, e.g. `x86_64-unknown-linux-gnu`
    pub fn triple(&self) -> String {
        match self.os {
            Os::Macos => format!("{}-apple-darwin", self.arch_name()),
            Os::Windows => {
                let env = if self.abi == Abi::Msvc { "msvc" } else { "gnu" };
                format!("{}-pc-windows-{}", self.arch_name(), env)
            }
            _ => {
                let env = match self.abi {
                    Abi::Gnu => "-gnu",
                    Abi::Musl => "-musl",
                    _ => "",
                };
                format!("{}-unknown-{}{}", self.arch_name(), self.os_name(), env)
            }
        }
    }

    // ── Derived properties ──────────────────────────────────────────

    /// Pointer size in bytes (also the natural alignment)
    pub fn pointer_size(&self) -> u32 {
        match self.arch {
            Arch::Arm => 4,
            _ => 8,
        }
    }

    /// The calling convention externally callable functions receive:
    /// the native C convention everywhere except 64-bit Windows under
    /// MSVC, which uses Win64.
    pub fn calling_convention(&self) -> CallConv {
        if self.os == Os::Windows && self.abi == Abi::Msvc {
            CallConv::Win64
        } else {
            CallConv::C
        }
    }

    /// Per-platform external name decoration. Identity everywhere today;
    /// kept as a seam so mangling targets only touch this function.
    pub fn extern_name<'a>(&self, name: &'a str) -> &'a str {
        name
    }

    pub fn requires_libc(&self) -> bool {
        matches!(self.os, Os::Macos | Os::Freebsd)
    }

    pub fn requires_pic(&self) -> bool {
        self.os == Os::Windows || self.abi == Abi::Gnu
    }

    pub fn requires_pie(&self) -> bool {
        self.os == Os::Macos
    }

    pub fn can_dynamic_link(&self) -> bool {
        true
    }

    pub fn uses_c_abi(&self) -> bool {
        true
    }

    pub fn libc_name(&self) -> &'static str {
        match (self.os, self.abi) {
            (Os::Windows, Abi::Msvc) => "msvcrt",
            (Os::Windows, _) => "mingw",
            (Os::Macos, _) => "darwin",
            (_, Abi::Gnu) | (_, Abi::Mingw) => "glibc",
            (_, Abi::Musl) => "musl",
            _ => "unknown",
        }
    }
}

/// Calling convention choices a function-level override can force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbiCallConv {
    /// Whatever the target resolves to
    #[default]
    Default,
    C,
    Fast,
    Cold,
}

/// A per-function ABI override, applied independently of the triple
#[derive(Debug, Clone, Default)]
pub struct FunctionAbi {
    pub call_conv: AbiCallConv,
    pub is_extern: bool,
    pub is_export: bool,
    pub is_inline: bool,
    pub no_return: bool,
    /// Linker-visible name, if different from the source name
    pub extern_name: Option<String>,
}

impl FunctionAbi {
    /// Force this override onto a generated function
    pub fn apply(&self, func: &mut Function, target: &Target) {
        func.linkage = if self.is_extern || self.is_export {
            Linkage::External
        } else {
            Linkage::Internal
        };
        func.call_conv = match self.call_conv {
            AbiCallConv::Default => target.calling_convention(),
            AbiCallConv::C => CallConv::C,
            AbiCallConv::Fast => CallConv::Fast,
            AbiCallConv::Cold => CallConv::Cold,
        };
        func.is_inline = self.is_inline;
        func.no_return = self.no_return;
        if let Some(name) = &self.extern_name {
            func.name = target.extern_name(name).to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrType;

    #[test]
    fn test_linux_gnu_triple() {
        let t = Target::from_triple("x86_64-unknown-linux-gnu");
        assert_eq!(t.arch, Arch::X86_64);
        assert_eq!(t.os, Os::Linux);
        assert_eq!(t.abi, Abi::Gnu);
        assert_eq!(t.pointer_size(), 8);
        assert!(t.requires_pic());
        assert!(!t.requires_pie());
    }

    #[test]
    fn test_macos_has_no_env() {
        let t = Target::from_triple("aarch64-apple-darwin");
        assert_eq!(t.arch, Arch::Aarch64);
        assert_eq!(t.os, Os::Macos);
        assert_eq!(t.abi, Abi::None);
        assert!(t.requires_pie());
        assert!(t.requires_libc());
        assert_eq!(t.libc_name(), "darwin");
        assert_eq!(t.triple(), "aarch64-apple-darwin");
    }

    #[test]
    fn test_windows_unknown_env_defaults_to_mingw() {
        let t = Target::from_triple("x86_64-pc-windows");
        assert_eq!(t.abi, Abi::Mingw);
        assert_eq!(t.libc_name(), "mingw");
        assert_eq!(t.calling_convention(), CallConv::C);
    }

    #[test]
    fn test_msvc_gets_win64_convention() {
        let t = Target::from_triple("x86_64-pc-windows-msvc");
        assert_eq!(t.abi, Abi::Msvc);
        assert_eq!(t.calling_convention(), CallConv::Win64);
        assert_eq!(t.libc_name(), "msvcrt");
    }

    #[test]
    fn test_musl() {
        let t = Target::from_triple("x86_64-unknown-linux-musl");
        assert_eq!(t.abi, Abi::Musl);
        assert_eq!(t.libc_name(), "musl");
        assert!(!t.requires_pic());
    }

    #[test]
    fn test_arm_pointer_size() {
        let t = Target::from_triple("armv7-unknown-linux-gnueabihf");
        assert_eq!(t.arch, Arch::Arm);
        assert_eq!(t.pointer_size(), 4);
    }

    #[test]
    fn test_riscv() {
        let t = Target::from_triple("riscv64gc-unknown-linux-gnu");
        assert_eq!(t.arch, Arch::Riscv64);
        assert_eq!(t.pointer_size(), 8);
    }

    #[test]
    fn test_extern_name_is_identity() {
        let t = Target::from_triple("x86_64-unknown-linux-gnu");
        assert_eq!(t.extern_name("main"), "main");
        assert_eq!(t.extern_name("_weird$name"), "_weird$name");
    }

    #[test]
    fn test_host_resolves() {
        // Whatever the host is, the descriptor must be self-consistent.
        let t = Target::host();
        assert!(!t.name().is_empty());
        assert!(t.pointer_size() == 4 || t.pointer_size() == 8);
    }

    #[test]
    fn test_function_abi_override() {
        use crate::ir::{CallConv, Function, Linkage};
        let target = Target::from_triple("x86_64-unknown-linux-gnu");
        let mut f = Function {
            name: "helper".to_string(),
            params: vec![],
            ret_type: IrType::Void,
            blocks: vec![],
            linkage: Linkage::Internal,
            call_conv: CallConv::C,
            is_external: false,
            is_vararg: false,
            is_inline: false,
            no_return: false,
        };

        let abi = FunctionAbi {
            call_conv: AbiCallConv::Cold,
            is_export: true,
            no_return: true,
            extern_name: Some("panic_handler".to_string()),
            ..Default::default()
        };
        abi.apply(&mut f, &target);

        assert_eq!(f.linkage, Linkage::External);
        assert_eq!(f.call_conv, CallConv::Cold);
        assert!(f.no_return);
        assert_eq!(f.name, "panic_handler");

        let default_abi = FunctionAbi::default();
        default_abi.apply(&mut f, &target);
        assert_eq!(f.linkage, Linkage::Internal);
        assert_eq!(f.call_conv, CallConv::C);
    }
}
