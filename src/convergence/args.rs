//! Command line assembly

use std::collections::BTreeMap;

/// Build `binary --k=v ...` from defaults overlaid with user overrides.
///
/// Keys are emitted in sorted order so the same inputs always produce the
/// same command.
pub fn build_command(
    binary: &str,
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut args = defaults.clone();
    args.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    std::iter::once(binary.to_string())
        .chain(args.iter().map(|(key, value)| format!("--{}={}", key, value)))
        .collect()
}
