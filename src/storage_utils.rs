use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::AppConfig;

pub const CONFIG_FILE: &str = "config";

/// JSON documents stored under one directory, `<name>.json` each.
pub struct AsyncStorageManager {
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage rooted at `relative_path` next to the running binary.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("could not find binary directory"))?
            .join(relative_path);
        Self::new(base_dir).await
    }

    /// Storage rooted at `base_dir`, created if missing.
    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.json"))
    }

    /// Writes `data` pretty-printed. A `.tmp` file is renamed over the target so
    /// readers never see a half-written document.
    pub async fn save<T: Serialize>(&self, name: &str, data: &T) -> anyhow::Result<()> {
        let final_path = self.path(name);
        let tmp_path = self.base_dir.join(format!("{name}.json.tmp"));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;
        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let path = self.path(name);
        let content = fs::read(&path)
            .await
            .map_err(|err| anyhow::anyhow!("reading {}: {err}", path.display()))?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub async fn load_config(&self) -> anyhow::Result<AppConfig> {
        self.load(CONFIG_FILE).await
    }
}
