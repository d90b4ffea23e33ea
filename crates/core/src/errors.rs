use thiserror::Error;

/// 凭据加解密错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("密文格式错误: {0}")]
    BadFormat(String),

    #[error("不支持的加密算法: {0}")]
    UnsupportedAlgorithm(String),

    #[error("明文无法加密: {0}")]
    Unsealable(String),
}

/// 编排核心错误类型定义
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("参数校验失败: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("权限不足: {0}")]
    Permission(String),

    #[error("{kind}未找到: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("冲突: {0}")]
    Conflict(String),

    #[error("依赖作业失败: {0}")]
    DependencyFailed(String),

    #[error("沙箱错误: {0}")]
    Sandbox(String),

    #[error("执行器错误: {0}")]
    Runner(String),

    #[error("暂时性错误: {0}")]
    Transient(String),

    #[error("凭据错误: {0}")]
    Vault(#[from] VaultError),

    #[error("无效的调度规则: {rule} - {message}")]
    InvalidSchedule { rule: String, message: String },

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Serialization(err.to_string())
    }
}

impl ConductorError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConductorError::Validation(vec![message.into()])
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ConductorError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        ConductorError::Permission(message.into())
    }

    /// 是否可以通过退避重试恢复
    pub fn is_retryable(&self) -> bool {
        match self {
            ConductorError::Transient(_) => true,
            ConductorError::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ) || err.to_string().contains("database is locked"),
            _ => false,
        }
    }

    /// 命令行退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            ConductorError::Validation(_)
            | ConductorError::InvalidSchedule { .. }
            | ConductorError::Conflict(_)
            | ConductorError::Vault(_) => 1,
            ConductorError::Configuration(_) => 2,
            ConductorError::Permission(_) => 3,
            ConductorError::NotFound { .. } => 4,
            _ => 1,
        }
    }
}

/// 统一的Result类型
pub type ConductorResult<T> = std::result::Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ConductorError::validation("bad").exit_code(), 1);
        assert_eq!(ConductorError::Configuration("x".into()).exit_code(), 2);
        assert_eq!(ConductorError::permission("no").exit_code(), 3);
        assert_eq!(ConductorError::not_found("作业", 7).exit_code(), 4);
    }

    #[test]
    fn test_validation_message_joins_all_errors() {
        let err = ConductorError::Validation(vec!["a 必填".into(), "b 超出范围".into()]);
        assert_eq!(err.to_string(), "参数校验失败: a 必填; b 超出范围");
    }

    #[test]
    fn test_retryable() {
        assert!(ConductorError::Transient("locked".into()).is_retryable());
        assert!(!ConductorError::validation("bad").is_retryable());
        assert!(ConductorError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
