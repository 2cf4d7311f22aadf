// src/platform.rs

//! Host OS / CPU identifiers as they appear in taskfiles.
//!
//! Taskfiles use the conventional short names (`linux`, `darwin`, `windows`,
//! `amd64`, `arm64`) for OS overlay file names and for the `OS` / `ARCH`
//! template functions, so the std identifiers are mapped accordingly.

/// OS identifier used in overlay file names (`Taskfile_linux.yml`) and the
/// `OS` template function.
pub fn os_identifier() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// CPU architecture identifier exposed by the `ARCH` template function.
pub fn arch_identifier() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Executable extension for the host OS (`.exe` on Windows, empty elsewhere).
pub fn exe_ext() -> &'static str {
    if cfg!(windows) {
        ".exe"
    } else {
        ""
    }
}
