//! Player profile persisted as JSON under the config directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use rand::Rng as _;
use serde::{Deserialize, Serialize};

const DIR_NAME: &str = "p2p-tetris";
const FILE_NAME: &str = "profile.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    pub name: String,
}

impl PlayerProfile {
    /// Resolve the display name for this run: an explicit CLI name wins and
    /// is persisted; otherwise the stored profile; otherwise a generated one.
    pub fn resolve(cli_name: Option<String>) -> String {
        let path = default_path();
        if let Some(name) = cli_name {
            let profile = PlayerProfile { name: name.clone() };
            if let Err(e) = profile.save_to(&path) {
                tracing::warn!("failed to persist profile: {e:#}");
            }
            return name;
        }
        if let Some(profile) = Self::load_from(&path) {
            return profile.name;
        }
        let generated = format!("player-{:04}", rand::rng().random_range(0..10_000));
        let profile = PlayerProfile {
            name: generated.clone(),
        };
        if let Err(e) = profile.save_to(&path) {
            tracing::warn!("failed to persist profile: {e:#}");
        }
        generated
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/p2p-tetris/profile.json`, falling back to
/// `~/.config` and finally the working directory.
fn default_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config"))
        })
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(DIR_NAME).join(FILE_NAME)
}
