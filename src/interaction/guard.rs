//! 会话守卫：检测信号（挑战 / 验证页）与登录态判断
//!
//! 命中检测信号时先截图留档，再以 `InteractionError::Blocked` 上报，由调用方中止本轮。

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use super::Interaction;
use crate::config::AppConfig;
use crate::core::error::InteractionError;

#[derive(Debug, Clone, Default)]
pub struct SessionGuard {
    challenge_selectors: Vec<String>,
    challenge_url_markers: Vec<String>,
    logged_in_selectors: Vec<String>,
    snapshot_dir: PathBuf,
}

impl SessionGuard {
    pub fn new(
        challenge_selectors: Vec<String>,
        challenge_url_markers: Vec<String>,
        logged_in_selectors: Vec<String>,
        snapshot_dir: PathBuf,
    ) -> Self {
        Self {
            challenge_selectors,
            challenge_url_markers: challenge_url_markers
                .into_iter()
                .map(|m| m.to_lowercase())
                .collect(),
            logged_in_selectors,
            snapshot_dir,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.detection.challenge_selectors.clone(),
            cfg.detection.challenge_url_markers.clone(),
            cfg.site.logged_in.clone(),
            cfg.app.snapshot_dir.clone(),
        )
    }

    /// 返回命中的检测信号描述
    pub async fn detect_challenge(
        &self,
        driver: &dyn Interaction,
    ) -> Result<Option<String>, InteractionError> {
        if !self.challenge_url_markers.is_empty() {
            let url = driver.current_url().await?;
            let lowered = url.to_lowercase();
            if let Some(marker) = self
                .challenge_url_markers
                .iter()
                .find(|m| lowered.contains(m.as_str()))
            {
                return Ok(Some(format!("challenge page ({marker}) at {url}")));
            }
        }
        for selector in &self.challenge_selectors {
            if driver.find_element(selector).await?.is_some() {
                return Ok(Some(format!("challenge element `{selector}` present")));
            }
        }
        Ok(None)
    }

    pub async fn is_logged_in(&self, driver: &dyn Interaction) -> Result<bool, InteractionError> {
        for selector in &self.logged_in_selectors {
            if driver.find_element(selector).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 截图到快照目录；失败只记日志
    pub async fn capture(&self, driver: &dyn Interaction, label: &str) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.snapshot_dir) {
            warn!(dir = %self.snapshot_dir.display(), error = %e, "Cannot create snapshot directory");
            return None;
        }
        let file = format!("{}-{}.png", label, Utc::now().format("%Y%m%dT%H%M%S%.3f"));
        let path = self.snapshot_dir.join(file);
        match driver.screenshot(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Saved snapshot");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "Snapshot failed");
                None
            }
        }
    }

    /// 检查当前页面；命中检测信号时返回 `Blocked`
    ///
    /// 检查本身失败（驱动异常）不视为检测信号。
    pub async fn ensure_clear(&self, driver: &dyn Interaction) -> Result<(), InteractionError> {
        match self.detect_challenge(driver).await {
            Ok(Some(reason)) => Err(InteractionError::Blocked(reason)),
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Challenge check failed, continuing");
                Ok(())
            }
        }
    }
}
