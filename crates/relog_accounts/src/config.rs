//! JSON config with a versioned migration chain.
//!
//! Nothing in here is secret; it only carries display preferences. The
//! `version` field selects the migrator chain: a file without one is
//! version 1. Each migrator reinterprets the keys of exactly one old
//! version, so the chain walks any old file up to the current shape.

use std::path::Path;

use relog_core::{info, IntoIoError, IntoJsonError, JsonFileError, RELOG_DIR};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CONFIG_FILE: &str = "config.json";
const CURRENT_VERSION: u32 = 3;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

/// Display preferences of the switcher UI.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SwitcherConfig {
    pub version: u32,
    /// Show the current account on the title screen.
    pub title_text: bool,
    /// Positions are expressions like `"w / 2"`, evaluated by the UI.
    pub title_text_x: Option<String>,
    pub title_text_y: Option<String>,
    pub title_text_align: TextAlign,
    /// Offer account switching on the server list screen too.
    pub server_mode: bool,
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            title_text: true,
            title_text_x: None,
            title_text_y: None,
            title_text_align: TextAlign::Center,
            server_mode: false,
        }
    }
}

impl SwitcherConfig {
    /// Loads `RELOG_DIR/config.json`, creating it with defaults when
    /// absent.
    pub async fn load() -> Result<Self, JsonFileError> {
        Self::load_from(&RELOG_DIR.join(CONFIG_FILE)).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, JsonFileError> {
        let document = match tokio::fs::read_to_string(path).await {
            Ok(document) => document,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path).await?;
                return Ok(config);
            }
            Err(error) => {
                return Err(relog_core::IoError {
                    error,
                    path: path.to_path_buf(),
                }
                .into());
            }
        };

        let value: Value = serde_json::from_str(&document).json(document.clone())?;
        let config = Self::from_value(value).json(document)?;
        Ok(config)
    }

    pub async fn save(&self) -> Result<(), JsonFileError> {
        self.save_to(&RELOG_DIR.join(CONFIG_FILE)).await
    }

    /// Same temp-file-and-rename discipline as the account store.
    pub async fn save_to(&self, path: &Path) -> Result<(), JsonFileError> {
        let document = serde_json::to_string_pretty(self).json_to()?;
        let dir = path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir).await.path(dir)?;

        let temp = tempfile::NamedTempFile::new_in(dir).path(dir)?;
        std::fs::write(temp.path(), document).path(temp.path())?;
        temp.persist(path).map_err(|error| relog_core::IoError {
            error: error.error,
            path: path.to_path_buf(),
        })?;
        Ok(())
    }

    /// Runs the migration chain, then deserializes the current shape.
    fn from_value(mut value: Value) -> Result<Self, serde_json::Error> {
        let mut version = value.get("version").and_then(Value::as_u64).unwrap_or(1);
        while version < u64::from(CURRENT_VERSION) {
            info!("Migrating config from version {version}");
            value = match version {
                1 => migrate_v1(value),
                _ => migrate_v2(value),
            };
            version = value
                .get("version")
                .and_then(Value::as_u64)
                .unwrap_or(u64::from(CURRENT_VERSION));
        }
        serde_json::from_value(value)
    }
}

/// Version 1 had no version marker and `showOnTitleScreen` /
/// `textX` / `textY` keys. Yields a version 2 document.
fn migrate_v1(value: Value) -> Value {
    let old = value.as_object().cloned().unwrap_or_default();
    let mut new = Map::new();
    new.insert("version".into(), 2u32.into());
    copy_key(&old, &mut new, "showOnTitleScreen", "titleScreenText");
    copy_key(&old, &mut new, "textX", "titleScreenTextX");
    copy_key(&old, &mut new, "textY", "titleScreenTextY");
    Value::Object(new)
}

/// Version 2 used `titleScreen*` key names and uppercase alignment
/// constants. Yields the current document.
fn migrate_v2(value: Value) -> Value {
    let old = value.as_object().cloned().unwrap_or_default();
    let mut new = Map::new();
    new.insert("version".into(), CURRENT_VERSION.into());
    copy_key(&old, &mut new, "titleScreenText", "title_text");
    copy_key(&old, &mut new, "titleScreenTextX", "title_text_x");
    copy_key(&old, &mut new, "titleScreenTextY", "title_text_y");
    if let Some(align) = old.get("titleScreenTextAlignment").and_then(Value::as_str) {
        new.insert("title_text_align".into(), align.to_lowercase().into());
    }
    // server_mode was false-defaulted in v2 as well, so it carries over.
    copy_key(&old, &mut new, "serverMode", "server_mode");
    Value::Object(new)
}

fn copy_key(old: &Map<String, Value>, new: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = old.get(from) {
        new.insert(to.to_owned(), value.clone());
    }
}
