//! 变量文本解析
//!
//! 依次尝试 JSON、YAML、shell 风格的 `key=value`，结果统一为 JSON 对象。

use serde_json::{Map, Value};

use crate::{ConductorError, ConductorResult};

pub type Variables = Map<String, Value>;

pub fn parse_vars(text: &str) -> ConductorResult<Variables> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return into_object(value);
    }

    if let Ok(yaml) = serde_yaml::from_str::<serde_yaml::Value>(trimmed) {
        match yaml {
            serde_yaml::Value::Null => return Ok(Map::new()),
            serde_yaml::Value::Mapping(_) => {
                let value = serde_json::to_value(&yaml).map_err(|e| {
                    ConductorError::validation(format!("YAML变量无法转换为JSON: {e}"))
                })?;
                return into_object(value);
            }
            // 单个标量说明文本不是 YAML 字典，继续尝试 key=value
            _ => {}
        }
    }

    parse_key_value(trimmed)
}

fn into_object(value: Value) -> ConductorResult<Variables> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ConductorError::validation(format!(
            "变量必须是字典，实际为: {other}"
        ))),
    }
}

fn parse_key_value(text: &str) -> ConductorResult<Variables> {
    let tokens = shlex::split(text)
        .ok_or_else(|| ConductorError::validation("变量文本的引号不匹配"))?;

    let mut map = Map::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
            _ => {
                return Err(ConductorError::validation(format!(
                    "无法解析的变量: {token}"
                )))
            }
        }
    }
    Ok(map)
}

/// 规范化为 JSON 文本
pub fn to_json_text(vars: &Variables) -> String {
    Value::Object(vars.clone()).to_string()
}

/// 解析任意格式并重写为 JSON 文本
pub fn canonicalize(text: &str) -> ConductorResult<String> {
    Ok(to_json_text(&parse_vars(text)?))
}

/// 浅合并，`overlay` 中的键覆盖 `base`
pub fn merge(base: &mut Variables, overlay: &Variables) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_object() {
        let vars = parse_vars(r#"{"a": 1, "b": [1, 2]}"#).unwrap();
        assert_eq!(vars["a"], json!(1));
        assert_eq!(vars["b"], json!([1, 2]));
    }

    #[test]
    fn test_yaml_mapping() {
        let vars = parse_vars("---\nregion: us-east-1\ncount: 3\n").unwrap();
        assert_eq!(vars["region"], json!("us-east-1"));
        assert_eq!(vars["count"], json!(3));
    }

    #[test]
    fn test_key_value_tokens() {
        let vars = parse_vars(r#"a=1 msg="hello world""#).unwrap();
        assert_eq!(vars["a"], json!("1"));
        assert_eq!(vars["msg"], json!("hello world"));
    }

    #[test]
    fn test_empty_and_null() {
        assert!(parse_vars("").unwrap().is_empty());
        assert!(parse_vars("   ").unwrap().is_empty());
        assert!(parse_vars("---").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_mapping() {
        assert!(parse_vars("[1, 2]").is_err());
        assert!(parse_vars("just words").is_err());
    }

    #[test]
    fn test_canonicalize_writes_json() {
        let text = canonicalize("a: 1").unwrap();
        assert_eq!(text, r#"{"a":1}"#);
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = parse_vars(r#"{"a": 1, "b": 2}"#).unwrap();
        let overlay = parse_vars(r#"{"b": 3, "c": 4}"#).unwrap();
        merge(&mut base, &overlay);
        assert_eq!(Value::Object(base), json!({"a": 1, "b": 3, "c": 4}));
    }
}
