use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// 字段加密与作业令牌共用的密钥
    pub secret_key: String,
    pub system_uuid: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            system_uuid: "00000000-0000-0000-0000-000000000000".to_string(),
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.secret_key.is_empty() {
            return Err(anyhow::anyhow!("SECRET_KEY不能为空"));
        }

        if self.secret_key.len() < 16 {
            return Err(anyhow::anyhow!("SECRET_KEY长度不能少于16个字符"));
        }

        if uuid::Uuid::parse_str(&self.system_uuid).is_err() {
            return Err(anyhow::anyhow!("SYSTEM_UUID格式无效: {}", self.system_uuid));
        }

        Ok(())
    }
}
