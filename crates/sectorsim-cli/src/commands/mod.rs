pub mod presets;
pub mod run;
pub mod sweep;

use std::path::Path;

use sectorsim_core::{Config, DMI2, PCIE2, PCIE3, SATA2, SATA3};

/// Named link speed presets exposed on the command line.
pub const PRESETS: &[(&str, u64)] = &[
    ("sata2", SATA2),
    ("sata3", SATA3),
    ("pcie2", PCIE2),
    ("pcie3", PCIE3),
    ("dmi2", DMI2),
];

/// Resolve a preset name to its bytes-per-second rating.
pub fn parse_preset(name: &str) -> Option<u64> {
    PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|&(_, rate)| rate)
}

/// Load a configuration from a JSON file, or fall back to the default.
/// Exits with a diagnostic on unreadable or malformed input.
pub fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("cannot read {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("malformed configuration in {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}
