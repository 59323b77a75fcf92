#![forbid(unsafe_code)]

mod attributes;
mod control;
mod database;
mod error;
mod intercept;
mod persistence;

pub use attributes::Attributes;
pub use control::Control;
pub use database::{Database, MIN_CHUNK_SIZE};
pub use error::Error;
pub use intercept::Intercept;
pub use persistence::Persistence;

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub control: Control,
    pub intercept: Intercept,
    pub persistence: Persistence,
    pub attributes: Attributes,
}

impl Config {
    /// Load configuration from a TOML file. Missing fields are filled with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml_edit::de::from_str(&text)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let toml = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from multiple TOML files. Later files override earlier ones.
    pub fn load_multiple<T, U>(paths: U) -> Result<Self, Error>
    where
        T: AsRef<Path>,
        U: IntoIterator<Item = T>,
    {
        let mut merged = toml_edit::DocumentMut::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let doc: toml_edit::DocumentMut = text.parse()?;
            merge_document(&mut merged, doc);
        }
        let config: Config = toml_edit::de::from_str(&merged.to_string())?;
        Ok(config)
    }
}

fn merge_document(target: &mut toml_edit::DocumentMut, source: toml_edit::DocumentMut) {
    for (key, item) in source.iter() {
        merge_item(
            target.entry(key).or_insert(toml_edit::Item::None),
            item.clone(),
        );
    }
}

fn merge_item(target: &mut toml_edit::Item, source: toml_edit::Item) {
    use toml_edit::Item;
    match (target, source) {
        (Item::Table(target_table), Item::Table(source_table)) => {
            for (key, item) in source_table.iter() {
                merge_item(target_table.entry(key).or_insert(Item::None), item.clone());
            }
        }
        (target_item, source_item) => {
            *target_item = source_item;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.persistence.autosave_interval = Some(Duration::from_secs(300));
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\nchunk_size = 8192\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.database.chunk_size, 8192);
        assert_eq!(cfg.database.path, PathBuf::from("pattern.db"));
        assert!(cfg.persistence.save_on_shutdown);
        assert_eq!(cfg.attributes.taint(), "user.amguard.taint");
    }

    #[test]
    fn load_multiple_merges() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("a.toml");
        let path2 = dir.path().join("b.toml");

        std::fs::write(
            &path1,
            "[database]\nlock_immutable = false\n[intercept]\non_access = true\n",
        )
        .unwrap();
        std::fs::write(
            &path2,
            "[persistence]\nautosave_interval = 120\n[intercept]\nenabled = false\n",
        )
        .unwrap();

        let cfg = Config::load_multiple([path1, path2, dir.path().join("missing.toml")]).unwrap();
        assert!(!cfg.database.lock_immutable);
        assert!(cfg.intercept.on_access);
        assert!(!cfg.intercept.enabled);
        assert_eq!(
            cfg.persistence.autosave_interval,
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn chunk_size_is_clamped() {
        let db = Database {
            chunk_size: 16,
            ..Database::default()
        };
        assert_eq!(db.effective_chunk_size(), MIN_CHUNK_SIZE);
    }
}
