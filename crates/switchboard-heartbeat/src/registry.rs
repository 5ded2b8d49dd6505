use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// A worker module under supervision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthTarget {
    pub name: String,
    pub port: u16,
    pub health_path: String,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    name: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModuleManifest {
    #[serde(default)]
    health: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

/// Join the registry with each module's `manifest.json`.
///
/// Disabled and port-less modules are left out. A missing or malformed
/// registry yields no targets; a broken manifest falls back to defaults.
/// The result is sorted by name.
pub fn load_health_check_targets(registry_path: &Path, modules_dir: &Path) -> Vec<HealthTarget> {
    let raw = match std::fs::read_to_string(registry_path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %registry_path.display(), error = %e, "module registry not readable");
            return Vec::new();
        }
    };
    let entries: Vec<RegistryEntry> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %registry_path.display(), error = %e, "malformed module registry, skipping");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for entry in entries {
        if entry.status.as_deref() == Some("disabled") {
            continue;
        }
        if !seen.insert(entry.name.clone()) {
            warn!(module = %entry.name, "duplicate registry entry ignored");
            continue;
        }
        let manifest = read_manifest(modules_dir, &entry.name);
        let Some(port) = entry.port.or(manifest.port) else {
            continue;
        };
        targets.push(HealthTarget {
            health_path: normalize_path(manifest.health.as_deref()),
            name: entry.name,
            port,
        });
    }
    targets.sort();
    targets
}

fn read_manifest(modules_dir: &Path, name: &str) -> ModuleManifest {
    let path = modules_dir.join(name).join("manifest.json");
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return ModuleManifest::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(module = name, error = %e, "malformed manifest, using defaults");
        ModuleManifest::default()
    })
}

fn normalize_path(path: Option<&str>) -> String {
    match path.map(str::trim) {
        None | Some("") => DEFAULT_HEALTH_PATH.to_string(),
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) => format!("/{p}"),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn health_path_gets_leading_slash() {
        assert_eq!(normalize_path(None), "/health");
        assert_eq!(normalize_path(Some("")), "/health");
        assert_eq!(normalize_path(Some("status")), "/status");
        assert_eq!(normalize_path(Some("/ping")), "/ping");
    }
}
