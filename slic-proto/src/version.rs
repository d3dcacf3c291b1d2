//! # Slic Version Negotiation
//!
//! 1. The client sends Initialize carrying its preferred version
//! 2. A server that does not support it replies with a Version frame
//!    listing the versions it does support
//! 3. The client retries with a version present in both lists
//! 4. If no common version exists the connection fails

#![forbid(unsafe_code)]

/// Slic version 1
pub const VERSION_1: u64 = 1;

/// Versions this implementation speaks, most preferred first.
pub const SUPPORTED_VERSIONS: &[u64] = &[VERSION_1];

/// Pick the first of `local` (preference order) that `peer` also supports.
pub fn select_version(local: &[u64], peer: &[u64]) -> Option<u64> {
    local.iter().copied().find(|v| peer.contains(v))
}

/// Check if `version` appears in `supported`.
pub fn is_supported(supported: &[u64], version: u64) -> bool {
    supported.contains(&version)
}
