use std::path::PathBuf;

use crate::utils::fs::today_str;
use crate::utils::BotResult;

/// 当天进度文件 `<dir>/<YYYYMMDD>_size.txt`，每处理一条覆盖写一次
pub struct ProgressFile {
    dir: PathBuf,
}

impl ProgressFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.path_for(&today_str())
    }

    fn path_for(&self, day: &str) -> PathBuf {
        self.dir.join(format!("{}_size.txt", day))
    }

    pub async fn write(&self, total: usize, current: usize) -> BotResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(
            self.path(),
            format!("all size: {} ;current size: {}\n", total, current),
        )
        .await?;
        Ok(())
    }
}
