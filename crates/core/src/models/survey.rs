use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Text,
    Textarea,
    Password,
    Integer,
    Float,
    Multiplechoice,
    Multiselect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub variable: String,
    #[serde(default)]
    pub question_name: String,
    #[serde(default)]
    pub question_description: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_choices")]
    pub choices: Vec<String>,
}

impl SurveyQuestion {
    pub fn has_default(&self) -> bool {
        match &self.default {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveySpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spec: Vec<SurveyQuestion>,
}

impl SurveySpec {
    pub fn password_variables(&self) -> Vec<String> {
        self.spec
            .iter()
            .filter(|q| q.question_type == QuestionType::Password)
            .map(|q| q.variable.clone())
            .collect()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.spec.iter().map(|q| q.variable.as_str())
    }
}

/// 选项既可以是换行分隔的文本，也可以是列表
fn deserialize_choices<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Choices {
        Text(String),
        List(Vec<String>),
    }

    Ok(match Option::<Choices>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Choices::Text(text)) => text
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Choices::List(list)) => list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_choices_accept_text_and_list() {
        let q: SurveyQuestion = serde_json::from_value(json!({
            "variable": "color",
            "type": "multiplechoice",
            "choices": "red\nblue\n\ngreen"
        }))
        .unwrap();
        assert_eq!(q.choices, vec!["red", "blue", "green"]);

        let q: SurveyQuestion = serde_json::from_value(json!({
            "variable": "color",
            "type": "multiselect",
            "choices": ["red", "blue"]
        }))
        .unwrap();
        assert_eq!(q.choices, vec!["red", "blue"]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<SurveyQuestion, _> =
            serde_json::from_value(json!({"variable": "x", "type": "date"}));
        assert!(result.is_err());
    }
}
