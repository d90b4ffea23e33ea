use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 启动时需要提示输入的占位值
pub const ASK: &str = "ASK";

/// 加密字段
pub const SECRET_FIELDS: [&str; 7] = [
    "password",
    "security_token",
    "ssh_key_data",
    "ssh_key_unlock",
    "become_password",
    "vault_password",
    "authorize_password",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Machine,
    SourceControl,
    Aws,
    Rax,
    Vmware,
    Gce,
    Azure,
    Openstack,
    Network,
}

impl CredentialKind {
    pub fn is_cloud(&self) -> bool {
        matches!(
            self,
            CredentialKind::Aws
                | CredentialKind::Rax
                | CredentialKind::Vmware
                | CredentialKind::Gce
                | CredentialKind::Azure
                | CredentialKind::Openstack
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Machine => "machine",
            CredentialKind::SourceControl => "source_control",
            CredentialKind::Aws => "aws",
            CredentialKind::Rax => "rax",
            CredentialKind::Vmware => "vmware",
            CredentialKind::Gce => "gce",
            CredentialKind::Azure => "azure",
            CredentialKind::Openstack => "openstack",
            CredentialKind::Network => "network",
        }
    }
}

/// 密码字段的三种状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretState {
    Empty,
    Ask,
    Stored,
}

impl SecretState {
    pub fn of(value: &str) -> Self {
        if value.is_empty() {
            SecretState::Empty
        } else if value == ASK {
            SecretState::Ask
        } else {
            SecretState::Stored
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credential {
    pub id: i64,
    pub name: String,
    pub kind: CredentialKind,
    pub user_id: Option<i64>,
    pub team_id: Option<i64>,
    pub cloud: bool,
    pub host: String,
    pub username: String,
    pub password: String,
    pub security_token: String,
    pub project: String,
    pub domain: String,
    pub ssh_key_data: String,
    pub ssh_key_unlock: String,
    pub become_method: String,
    pub become_username: String,
    pub become_password: String,
    pub vault_password: String,
    pub authorize: bool,
    pub authorize_password: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Credential {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            kind: CredentialKind::Machine,
            user_id: None,
            team_id: None,
            cloud: false,
            host: String::new(),
            username: String::new(),
            password: String::new(),
            security_token: String::new(),
            project: String::new(),
            domain: String::new(),
            ssh_key_data: String::new(),
            ssh_key_unlock: String::new(),
            become_method: String::new(),
            become_username: String::new(),
            become_password: String::new(),
            vault_password: String::new(),
            authorize: false,
            authorize_password: String::new(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl Credential {
    pub fn new(name: impl Into<String>, kind: CredentialKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cloud: kind.is_cloud(),
            ..Default::default()
        }
    }

    pub fn secret(&self, field: &str) -> Option<&str> {
        let value = match field {
            "password" => &self.password,
            "security_token" => &self.security_token,
            "ssh_key_data" => &self.ssh_key_data,
            "ssh_key_unlock" => &self.ssh_key_unlock,
            "become_password" => &self.become_password,
            "vault_password" => &self.vault_password,
            "authorize_password" => &self.authorize_password,
            _ => return None,
        };
        Some(value.as_str())
    }

    pub fn set_secret(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "password" => &mut self.password,
            "security_token" => &mut self.security_token,
            "ssh_key_data" => &mut self.ssh_key_data,
            "ssh_key_unlock" => &mut self.ssh_key_unlock,
            "become_password" => &mut self.become_password,
            "vault_password" => &mut self.vault_password,
            "authorize_password" => &mut self.authorize_password,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// 启动作业时需要用户提供的密码，按提示名返回
    pub fn passwords_needed_to_start(&self) -> Vec<String> {
        let prompts = [
            ("password", "ssh_password"),
            ("ssh_key_unlock", "ssh_key_unlock"),
            ("become_password", "become_password"),
            ("vault_password", "vault_password"),
        ];
        prompts
            .iter()
            .filter(|(field, _)| {
                self.secret(field)
                    .map(|v| SecretState::of(v) == SecretState::Ask)
                    .unwrap_or(false)
            })
            .map(|(_, prompt)| prompt.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_flag_follows_kind() {
        assert!(Credential::new("aws", CredentialKind::Aws).cloud);
        assert!(!Credential::new("ssh", CredentialKind::Machine).cloud);
        assert!(!CredentialKind::Network.is_cloud());
    }

    #[test]
    fn test_passwords_needed_to_start() {
        let mut cred = Credential::new("ssh", CredentialKind::Machine);
        cred.password = ASK.to_string();
        cred.become_password = "secret".to_string();
        cred.vault_password = ASK.to_string();

        assert_eq!(
            cred.passwords_needed_to_start(),
            vec!["ssh_password".to_string(), "vault_password".to_string()]
        );
    }

    #[test]
    fn test_secret_accessors() {
        let mut cred = Credential::new("ssh", CredentialKind::Machine);
        assert!(cred.set_secret("ssh_key_unlock", "pw".into()));
        assert_eq!(cred.secret("ssh_key_unlock"), Some("pw"));
        assert!(!cred.set_secret("username", "x".into()));
        assert_eq!(cred.secret("host"), None);
    }
}
