use std::collections::BTreeSet;

use crate::types::FormId;

/// A record that a specific plugin is known to carry identically to its master on
/// purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownFalsePositive {
    pub plugin: &'static str,
    pub master: &'static str,
    pub fid: FormId,
}

pub const KNOWN_FALSE_POSITIVES: &[KnownFalsePositive] = &[KnownFalsePositive {
    plugin: "Unofficial Oblivion Patch.esp",
    master: "Oblivion.esm",
    fid: FormId(0x00AA3C),
}];

/// Removes listed exceptions for `plugin_name` from an ITM set. Plugin names compare
/// case-insensitively.
pub fn apply_known_exceptions(plugin_name: &str, itm: &mut BTreeSet<FormId>) -> usize {
    let mut removed = 0;
    for exception in KNOWN_FALSE_POSITIVES {
        if exception.plugin.eq_ignore_ascii_case(plugin_name) && itm.remove(&exception.fid) {
            removed += 1;
        }
    }
    removed
}
