//! 调查问卷校验
//!
//! 所有错误一次性收集后返回，不在第一个错误处中断。

use std::collections::HashSet;

use conductor_core::models::{QuestionType, SurveyQuestion, SurveySpec};
use conductor_core::vars::Variables;
use conductor_core::{ConductorError, ConductorResult};
use serde_json::Value;

use crate::vault::ENCRYPTED_PREFIX;

/// 模板保存时校验问卷定义
pub fn validate_spec(spec: &SurveySpec) -> ConductorResult<()> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, question) in spec.spec.iter().enumerate() {
        let variable = question.variable.trim();
        if variable.is_empty() {
            errors.push(format!("第 {} 个问题缺少 variable", index + 1));
            continue;
        }
        if !seen.insert(variable) {
            errors.push(format!("变量 {variable} 重复"));
        }
        if matches!(
            question.question_type,
            QuestionType::Multiplechoice | QuestionType::Multiselect
        ) && question.choices.is_empty()
        {
            errors.push(format!("变量 {variable} 缺少 choices"));
        }
        if let (Some(min), Some(max)) = (question.min, question.max) {
            if min > max {
                errors.push(format!("变量 {variable} 的 min 大于 max"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConductorError::Validation(errors))
    }
}

/// 问卷默认值，缺省的问题不出现在结果中
pub fn defaults(spec: &SurveySpec) -> Variables {
    spec.spec
        .iter()
        .filter(|q| q.has_default())
        .map(|q| (q.variable.clone(), q.default.clone()))
        .collect()
}

/// 校验启动时的回答，`answers` 为合并默认值之后的变量
pub fn validate_answers(spec: &SurveySpec, answers: &Variables) -> ConductorResult<()> {
    let mut errors = Vec::new();
    for question in &spec.spec {
        match answers.get(&question.variable) {
            None | Some(Value::Null) => {
                if question.required {
                    errors.push(format!("{} 为必填项", question.variable));
                }
            }
            Some(Value::String(s)) if s.is_empty() && question.required => {
                errors.push(format!("{} 为必填项", question.variable));
            }
            Some(value) => check_value(question, value, &mut errors),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConductorError::Validation(errors))
    }
}

fn check_length(question: &SurveyQuestion, len: usize, errors: &mut Vec<String>) {
    let len = len as i64;
    if let Some(min) = question.min {
        if len < min {
            errors.push(format!("{} 长度不能少于 {}", question.variable, min));
        }
    }
    if let Some(max) = question.max {
        if len > max {
            errors.push(format!("{} 长度不能超过 {}", question.variable, max));
        }
    }
}

fn check_range(question: &SurveyQuestion, value: f64, errors: &mut Vec<String>) {
    if let Some(min) = question.min {
        if value < min as f64 {
            errors.push(format!("{} 不能小于 {}", question.variable, min));
        }
    }
    if let Some(max) = question.max {
        if value > max as f64 {
            errors.push(format!("{} 不能大于 {}", question.variable, max));
        }
    }
}

fn check_value(question: &SurveyQuestion, value: &Value, errors: &mut Vec<String>) {
    let variable = &question.variable;
    match question.question_type {
        QuestionType::Text | QuestionType::Textarea => match value.as_str() {
            Some(text) => check_length(question, text.chars().count(), errors),
            None => errors.push(format!("{variable} 必须是字符串")),
        },
        QuestionType::Password => match value.as_str() {
            // 沿用默认值的密码不检查长度
            Some(text) if text.starts_with(ENCRYPTED_PREFIX) => {}
            Some(text) => check_length(question, text.chars().count(), errors),
            None => errors.push(format!("{variable} 必须是字符串")),
        },
        QuestionType::Integer => match value.as_i64() {
            Some(n) => check_range(question, n as f64, errors),
            None => errors.push(format!("{variable} 必须是整数")),
        },
        QuestionType::Float => match value.as_f64() {
            Some(n) => check_range(question, n, errors),
            None => errors.push(format!("{variable} 必须是数字")),
        },
        QuestionType::Multiplechoice => match value.as_str() {
            Some(choice) if question.choices.iter().any(|c| c == choice) => {}
            Some(choice) => errors.push(format!("{variable} 的值 {choice} 不在可选项中")),
            None => errors.push(format!("{variable} 必须是字符串")),
        },
        QuestionType::Multiselect => {
            let selected: Option<Vec<String>> = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(String::from))
                    .collect(),
                Value::String(text) => Some(
                    text.lines()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect(),
                ),
                _ => None,
            };
            match selected {
                Some(items) => {
                    for item in items {
                        if !question.choices.contains(&item) {
                            errors.push(format!("{variable} 的值 {item} 不在可选项中"));
                        }
                    }
                }
                None => errors.push(format!("{variable} 必须是列表")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(questions: Value) -> SurveySpec {
        serde_json::from_value(json!({"name": "s", "spec": questions})).unwrap()
    }

    fn answers(value: Value) -> Variables {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_spec_validation_collects_errors() {
        let s = spec(json!([
            {"variable": "a", "type": "text"},
            {"variable": "a", "type": "integer", "min": 5, "max": 1},
            {"variable": "", "type": "text"},
            {"variable": "c", "type": "multiplechoice"}
        ]));
        match validate_spec(&s).unwrap_err() {
            ConductorError::Validation(errors) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_required_and_types() {
        let s = spec(json!([
            {"variable": "name", "type": "text", "required": true, "min": 2, "max": 5},
            {"variable": "count", "type": "integer", "min": 1, "max": 10},
            {"variable": "ratio", "type": "float", "max": 1}
        ]));
        assert!(validate_answers(&s, &answers(json!({"name": "abc", "count": 3, "ratio": 0.5}))).is_ok());

        match validate_answers(&s, &answers(json!({"count": "three", "ratio": 2.5}))).unwrap_err() {
            ConductorError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }

        assert!(validate_answers(&s, &answers(json!({"name": "toolongname"}))).is_err());
    }

    #[test]
    fn test_choices() {
        let s = spec(json!([
            {"variable": "color", "type": "multiplechoice", "choices": "red\nblue"},
            {"variable": "sizes", "type": "multiselect", "choices": ["s", "m", "l"]}
        ]));
        assert!(validate_answers(&s, &answers(json!({"color": "red", "sizes": ["s", "l"]}))).is_ok());
        assert!(validate_answers(&s, &answers(json!({"sizes": "s\nm"}))).is_ok());
        assert!(validate_answers(&s, &answers(json!({"color": "green"}))).is_err());
        assert!(validate_answers(&s, &answers(json!({"sizes": ["xl"]}))).is_err());
    }

    #[test]
    fn test_encrypted_password_skips_length() {
        let s = spec(json!([
            {"variable": "pw", "type": "password", "min": 20}
        ]));
        assert!(validate_answers(&s, &answers(json!({"pw": "$encrypted$"}))).is_ok());
        assert!(validate_answers(&s, &answers(json!({"pw": "short"}))).is_err());
    }

    #[test]
    fn test_defaults() {
        let s = spec(json!([
            {"variable": "a", "type": "text", "default": "x"},
            {"variable": "b", "type": "text", "default": ""},
            {"variable": "c", "type": "integer", "default": 3}
        ]));
        let d = defaults(&s);
        assert_eq!(Value::Object(d), json!({"a": "x", "c": 3}));
    }
}
