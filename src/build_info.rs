//! Build information captured at compile time.

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git commit hash (7 chars), or `unknown` outside a checkout.
pub const BUILD_HASH: &str = env!("BUILD_HASH");

/// Whether the build was from a dirty working directory.
pub const BUILD_DIRTY: bool = matches!(env!("BUILD_DIRTY").as_bytes(), b"true");

/// Full version string: `0.1.0 (abc1234)`, or `0.1.0 (abc1234*)` if dirty.
pub const VERSION_STRING: &str = env!("BUILD_VERSION");
