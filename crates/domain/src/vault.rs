//! 字段级对称加密
//!
//! 密钥由 `SHA1(secret || pk || field)` 的前 16 字节派生，AES-128-ECB 加密，
//! 明文以 0 字节补齐到块长度。密文格式：
//!
//! ```text
//! $encrypted$[UTF8$]AES$<base64>
//! ```

use aes::cipher::{BlockDecrypt, BlockEncrypt, Key, KeyInit};
use aes::{Aes128, Block};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use conductor_core::{models::ASK, VaultError};
use sha1::{Digest, Sha1};

pub const ENCRYPTED_PREFIX: &str = "$encrypted$";
const UTF8_MARKER: &str = "UTF8";
const ALGORITHM: &str = "AES";
const BLOCK_SIZE: usize = 16;

/// 解密结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretValue {
    Text(String),
    Binary(Vec<u8>),
}

impl SecretValue {
    pub fn into_text(self) -> String {
        match self {
            SecretValue::Text(text) => text,
            SecretValue::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

pub struct Vault {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret_key.as_ref().to_vec(),
        }
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    fn cipher(&self, pk: i64, field: &str) -> Aes128 {
        let mut hasher = Sha1::new();
        hasher.update(&self.secret);
        hasher.update(pk.to_string().as_bytes());
        hasher.update(field.as_bytes());
        let digest = hasher.finalize();
        Aes128::new(Key::<Aes128>::from_slice(&digest[..BLOCK_SIZE]))
    }

    /// 加密文本字段，已加密、空值与 `ASK` 原样返回
    pub fn encrypt(&self, value: &str, pk: i64, field: &str) -> String {
        if value.is_empty() || value == ASK || Self::is_encrypted(value) {
            return value.to_string();
        }
        self.seal(value.as_bytes(), pk, field, true)
    }

    /// 加密二进制字段
    ///
    /// 解密时去掉结尾的补齐字节，因此空值和以 0 字节结尾的值无法还原，直接拒绝。
    pub fn encrypt_bytes(&self, value: &[u8], pk: i64, field: &str) -> Result<String, VaultError> {
        match value.last() {
            None => Err(VaultError::Unsealable("二进制值为空".to_string())),
            Some(0) => Err(VaultError::Unsealable("二进制值以 0 字节结尾".to_string())),
            Some(_) => Ok(self.seal(value, pk, field, false)),
        }
    }

    fn seal(&self, plain: &[u8], pk: i64, field: &str, utf8: bool) -> String {
        let cipher = self.cipher(pk, field);
        let mut data = plain.to_vec();
        while data.len() % BLOCK_SIZE != 0 {
            data.push(0);
        }
        for chunk in data.chunks_mut(BLOCK_SIZE) {
            cipher.encrypt_block(Block::from_mut_slice(chunk));
        }

        let mut out = String::from(ENCRYPTED_PREFIX);
        if utf8 {
            out.push_str(UTF8_MARKER);
            out.push('$');
        }
        out.push_str(ALGORITHM);
        out.push('$');
        out.push_str(&STANDARD.encode(data));
        out
    }

    pub fn decrypt(&self, value: &str, pk: i64, field: &str) -> Result<SecretValue, VaultError> {
        let rest = value
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| VaultError::BadFormat("缺少加密前缀".to_string()))?;

        let parts: Vec<&str> = rest.split('$').collect();
        let (utf8, algorithm, payload) = match parts.as_slice() {
            [UTF8_MARKER, algorithm, payload] => (true, *algorithm, *payload),
            [algorithm, payload] => (false, *algorithm, *payload),
            _ => return Err(VaultError::BadFormat("字段数量不正确".to_string())),
        };
        if algorithm != ALGORITHM {
            return Err(VaultError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let mut data = STANDARD
            .decode(payload)
            .map_err(|e| VaultError::BadFormat(format!("base64 解码失败: {e}")))?;
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Err(VaultError::BadFormat(format!(
                "密文长度 {} 不是块长度的整数倍",
                data.len()
            )));
        }

        let cipher = self.cipher(pk, field);
        for chunk in data.chunks_mut(BLOCK_SIZE) {
            cipher.decrypt_block(Block::from_mut_slice(chunk));
        }
        while data.last() == Some(&0) {
            data.pop();
        }

        if utf8 {
            String::from_utf8(data)
                .map(SecretValue::Text)
                .map_err(|_| VaultError::BadFormat("明文不是有效的 UTF-8".to_string()))
        } else {
            Ok(SecretValue::Binary(data))
        }
    }

    /// 解密文本字段，空值与 `ASK` 原样返回
    pub fn reveal(&self, value: &str, pk: i64, field: &str) -> Result<String, VaultError> {
        if value.is_empty() || value == ASK {
            return Ok(value.to_string());
        }
        Ok(self.decrypt(value, pk, field)?.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        Vault::new("a-very-secret-key-for-tests")
    }

    #[test]
    fn test_text_round_trip() {
        let v = vault();
        let sealed = v.encrypt("hunter2", 7, "password");
        assert!(sealed.starts_with("$encrypted$UTF8$AES$"));
        assert_eq!(
            v.decrypt(&sealed, 7, "password").unwrap(),
            SecretValue::Text("hunter2".to_string())
        );
    }

    #[test]
    fn test_binary_round_trip() {
        let v = vault();
        let sealed = v.encrypt_bytes(&[1, 2, 3, 255], 3, "ssh_key_data").unwrap();
        assert!(sealed.starts_with("$encrypted$AES$"));
        assert_eq!(
            v.decrypt(&sealed, 3, "ssh_key_data").unwrap(),
            SecretValue::Binary(vec![1, 2, 3, 255])
        );
    }

    #[test]
    fn test_binary_values_that_cannot_round_trip_are_rejected() {
        let v = vault();
        assert!(matches!(
            v.encrypt_bytes(&[], 3, "ssh_key_data"),
            Err(VaultError::Unsealable(_))
        ));
        assert!(matches!(
            v.encrypt_bytes(&[7, 0], 3, "ssh_key_data"),
            Err(VaultError::Unsealable(_))
        ));

        // 中间的 0 字节不受影响
        let sealed = v.encrypt_bytes(&[0, 7, 0, 9], 3, "ssh_key_data").unwrap();
        assert_eq!(
            v.decrypt(&sealed, 3, "ssh_key_data").unwrap(),
            SecretValue::Binary(vec![0, 7, 0, 9])
        );
    }

    #[test]
    fn test_block_aligned_value() {
        let v = vault();
        let value = "0123456789abcdef";
        let sealed = v.encrypt(value, 1, "password");
        assert_eq!(v.reveal(&sealed, 1, "password").unwrap(), value);
    }

    #[test]
    fn test_key_depends_on_pk_and_field() {
        let v = vault();
        let a = v.encrypt("same", 1, "password");
        assert_ne!(a, v.encrypt("same", 2, "password"));
        assert_ne!(a, v.encrypt("same", 1, "become_password"));
        // 错误的 pk 解出的不是原文
        assert_ne!(
            v.decrypt(&a, 2, "password").ok(),
            Some(SecretValue::Text("same".to_string()))
        );
    }

    #[test]
    fn test_sentinel_idempotence() {
        let v = vault();
        let sealed = v.encrypt("secret", 5, "password");
        assert_eq!(v.encrypt(&sealed, 5, "password"), sealed);
        assert_eq!(v.encrypt("", 5, "password"), "");
        assert_eq!(v.encrypt(ASK, 5, "password"), ASK);
        assert_eq!(v.reveal(ASK, 5, "password").unwrap(), ASK);
    }

    #[test]
    fn test_bad_format() {
        let v = vault();
        assert!(matches!(
            v.decrypt("plain", 1, "password"),
            Err(VaultError::BadFormat(_))
        ));
        assert!(matches!(
            v.decrypt("$encrypted$UTF8$AES$", 1, "password"),
            Err(VaultError::BadFormat(_))
        ));
        assert!(matches!(
            v.decrypt("$encrypted$AES$!!!", 1, "password"),
            Err(VaultError::BadFormat(_))
        ));
        assert!(matches!(
            v.decrypt("$encrypted$AES$AAAA", 1, "password"),
            Err(VaultError::BadFormat(_))
        ));
        assert!(matches!(
            v.decrypt("$encrypted$", 1, "password"),
            Err(VaultError::BadFormat(_))
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let v = vault();
        assert_eq!(
            v.decrypt("$encrypted$UTF8$DES$AAAA", 1, "password"),
            Err(VaultError::UnsupportedAlgorithm("DES".to_string()))
        );
    }
}
