//! 错误类型
//!
//! 按关注点划分：配置（启动即致命）、持久化、单目标交互、状态迁移、整轮循环。
//! 单目标交互失败只跳过该目标；会话失效、检测信号与持久化不可用会中止整轮。

use thiserror::Error;

/// 配置错误：启动阶段即报错，进程不再继续
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config source error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid config `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Missing credentials: set [credentials] email/password or CADENCE__CREDENTIALS__*")]
    MissingCredentials,
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 持久化错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// 交互协作方（浏览器驱动）返回的错误
#[derive(Error, Debug, Clone)]
pub enum InteractionError {
    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Interaction failed: {0}")]
    Failed(String),

    /// 遇到验证 / 挑战页等检测信号，本轮必须停止
    #[error("Blocked: {0}")]
    Blocked(String),

    /// 登录态丢失
    #[error("Session lost: {0}")]
    SessionLost(String),
}

impl InteractionError {
    /// 是否只影响当前目标（可跳过继续本阶段）
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Failed(_))
    }
}

/// 状态机迁移错误
#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("No outreach request for target: {0}")]
    NoRequest(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 中止整轮循环的错误
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Blocked by platform: {reason}")]
    Blocked {
        reason: String,
        snapshot: Option<std::path::PathBuf>,
    },

    #[error("Session invalid: {0}")]
    SessionLost(String),

    #[error("Persistence unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Unexpected state: {0}")]
    Transition(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<TransitionError> for CycleError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Store(e) => CycleError::Store(e),
            other => CycleError::Transition(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_error_recoverable() {
        assert!(InteractionError::NotFound("#send".into()).is_recoverable());
        assert!(InteractionError::Failed("click".into()).is_recoverable());
        assert!(!InteractionError::Blocked("challenge".into()).is_recoverable());
        assert!(!InteractionError::SessionLost("logged out".into()).is_recoverable());
    }

    #[test]
    fn test_config_error_message() {
        let err = ConfigError::invalid("rate_limits.connections.per_hour", "must be positive");
        assert!(err.to_string().contains("per_hour"));
    }
}
