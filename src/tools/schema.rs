//! 工具参数 JSON Schema 生成（schemars）与参数解析
//!
//! 参数结构体 derive JsonSchema + Deserialize，声明给模型的 schema 与解析逻辑出自同一类型。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::ToolError;

/// 生成 OpenAI function parameters 可用的 schema：内联子结构，去掉 $schema 与 title
pub fn parameters_for<T: JsonSchema>() -> Value {
    let gen = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
            s.option_add_null_type = false;
        })
        .into_generator();
    let root = gen.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("title");
        obj.remove("definitions");
        obj.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    value
}

/// 解析工具参数；缺字段或类型不符返回 InvalidArguments
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct CreateArgs {
        /// 待办内容
        content: String,
        /// 截止时间
        due_date: Option<String>,
    }

    #[test]
    fn test_parameters_shape() {
        let schema = parameters_for::<CreateArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("title").is_none());
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["properties"]["content"]["description"], "待办内容");
        assert_eq!(schema["required"], serde_json::json!(["content"]));
    }

    #[test]
    fn test_parse_args_reports_missing_field() {
        let err = parse_args::<CreateArgs>(serde_json::json!({})).err().unwrap();
        assert!(matches!(err, ToolError::InvalidArguments(ref m) if m.contains("content")));
        let ok: CreateArgs = parse_args(serde_json::json!({"content": "开会"})).unwrap();
        assert_eq!(ok.content, "开会");
    }
}
