//! Compiled regex patterns for the built-in risk table.
//!
//! Compiled once on first use. Only patterns with real incident evidence
//! belong here; site-specific rules come in through `FeedConfig::risk_rules`.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Destructive Filesystem Operations
// ═══════════════════════════════════════════════════════════════════════════════

/// Forced recursive removal of the filesystem root: `rm -rf /`, `rm -fr /*`,
/// `rm -r -f /`, `rm --recursive --force /`, optionally with
/// `--no-preserve-root` or `--` before the target.
///
/// `rm` may be invoked by path (`/bin/rm`) or escaped (`\rm`), at the start
/// of a command or after a shell separator or quote. The target is `/`, `/*`
/// or `/.`, bare or quoted.
pub const ROOT_DELETE_PATTERN: &str = r#"(?:^|[\s;&|(`'"])(?:\S*/)?\\?rm\s+(?:--no-preserve-root\s+)?(?:-[a-zA-Z]*[rR][a-zA-Z]*[fF][a-zA-Z]*|-[a-zA-Z]*[fF][a-zA-Z]*[rR][a-zA-Z]*|(?:-[rR]|--recursive)\s+(?:-f|--force)|(?:-f|--force)\s+(?:-[rR]|--recursive))\s+(?:(?:--no-preserve-root|--)\s+)*["']?/[*.]?["']?(?:$|[\s;&|)`'"])"#;

pub static RE_ROOT_DELETE: Lazy<Regex> = Lazy::new(|| Regex::new(ROOT_DELETE_PATTERN).unwrap());
