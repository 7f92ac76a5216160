//! Shared identifier validation (spec §3: `MinionIdentity.id` invariant,
//! §4.6 pool-name rules).

/// A minion id: non-empty, no null bytes, no path separators.
pub fn valid_minion_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('\0') && !id.contains('/') && !id.contains('\\')
}

/// A worker-pool name: non-empty, no null byte, no `/` or `\`, and not
/// `..`/`../*`/`..\*`. Other characters (spaces, unicode, punctuation) are
/// allowed.
pub fn valid_pool_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') || name.contains('/') || name.contains('\\') {
        return false;
    }
    if name == ".." || name.starts_with("../") || name.starts_with("..\\") {
        return false;
    }
    true
}
