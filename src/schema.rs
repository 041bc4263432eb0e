//! JSON-Schema translation into the three provider dialects.
//!
//! All functions are pure: the unified schema is projected onto a fresh
//! value tree and never mutated in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonSchema, ResponseFormat, Tool};

// ----- OpenAI dialect -----

/// OpenAI `response_format` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<OpenAiJsonSchema>,
}

/// Named schema wrapper with a strictness flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiJsonSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Value,
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub strict: bool,
}

/// Converts a response format to OpenAI's envelope. `json` maps to the
/// untyped `json_object` mode; `json_schema` gets the recursive
/// `additionalProperties: false` pass with strict defaulting to true.
pub fn to_openai(format: &ResponseFormat) -> OpenAiResponseFormat {
    match format {
        ResponseFormat::Text => OpenAiResponseFormat {
            kind: "text".into(),
            json_schema: None,
        },
        ResponseFormat::Json => OpenAiResponseFormat {
            kind: "json_object".into(),
            json_schema: None,
        },
        ResponseFormat::JsonSchema {
            schema,
            name,
            description,
            strict,
        } => OpenAiResponseFormat {
            kind: "json_schema".into(),
            json_schema: Some(OpenAiJsonSchema {
                name: name.clone(),
                description: description.clone(),
                schema: prepare_strict_schema(schema.as_ref()),
                strict: strict.unwrap_or(true),
            }),
        },
    }
}

/// Converts tools to OpenAI's function format, non-strict.
///
/// Strict mode is not enabled here because it requires every property to
/// appear in `required` (no optional parameters). The schema still gets the
/// `additionalProperties: false` pass for tighter validation.
pub fn tools_to_openai(tools: &[Tool]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|tool| OpenAiTool {
            kind: "function".into(),
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: prepare_strict_schema(Some(&tool.parameters)),
                strict: false,
            },
        })
        .collect()
}

/// Strict variant: the caller guarantees all properties are required.
pub fn tools_to_openai_strict(tools: &[Tool]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|tool| OpenAiTool {
            kind: "function".into(),
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: prepare_strict_schema(Some(&tool.parameters)),
                strict: true,
            },
        })
        .collect()
}

fn prepare_strict_schema(schema: Option<&JsonSchema>) -> Value {
    match schema {
        None => Value::Null,
        Some(s) => {
            let mut value = s.to_value();
            add_additional_properties_false(&mut value);
            value
        }
    }
}

/// Recursively sets `additionalProperties: false` on every object schema
/// reachable through the known composition keywords. Idempotent.
fn add_additional_properties_false(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    if obj.get("type").and_then(Value::as_str) == Some("object") {
        obj.insert("additionalProperties".into(), Value::Bool(false));
    }

    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        for prop in props.values_mut() {
            add_additional_properties_false(prop);
        }
    }

    if let Some(items) = obj.get_mut("items") {
        add_additional_properties_false(items);
    }

    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(arr) = obj.get_mut(key).and_then(Value::as_array_mut) {
            for item in arr {
                add_additional_properties_false(item);
            }
        }
    }

    if let Some(defs) = obj.get_mut("$defs").and_then(Value::as_object_mut) {
        for def in defs.values_mut() {
            add_additional_properties_false(def);
        }
    }
}

// ----- Anthropic dialect -----

/// Anthropic `output_config` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicOutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<AnthropicFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicFormat {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Converts a response format to Anthropic's output config. `text` means no
/// directive; plain `json` mode is not offered by this dialect.
pub fn to_anthropic(format: &ResponseFormat) -> Option<AnthropicOutputConfig> {
    match format {
        ResponseFormat::JsonSchema {
            schema: Some(schema),
            ..
        } => {
            let mut value = schema.to_value();
            add_additional_properties_false(&mut value);
            Some(AnthropicOutputConfig {
                format: Some(AnthropicFormat {
                    kind: "json_schema".into(),
                    schema: Some(value),
                }),
            })
        }
        _ => None,
    }
}

/// Converts tools to Anthropic's name/description/input_schema triples. The
/// tool schema is passed through without strict-mode mutation.
pub fn tools_to_anthropic(tools: &[Tool]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| AnthropicTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.parameters.to_value(),
        })
        .collect()
}

// ----- Gemini dialect -----

/// Gemini's reduced, typed schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiSchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, GeminiSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<GeminiSchema>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
}

/// Structured-output directive for Gemini's generation config.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiOutputConfig {
    pub response_mime_type: String,
    pub response_schema: Option<GeminiSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    pub function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiFunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<GeminiSchema>,
}

/// Converts a response format to Gemini's output directive. `json` yields a
/// JSON mime type without a schema.
pub fn to_gemini(format: &ResponseFormat) -> Option<GeminiOutputConfig> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::Json => Some(GeminiOutputConfig {
            response_mime_type: "application/json".into(),
            response_schema: None,
        }),
        ResponseFormat::JsonSchema {
            schema: Some(schema),
            ..
        } => Some(GeminiOutputConfig {
            response_mime_type: "application/json".into(),
            response_schema: Some(to_gemini_schema(schema)),
        }),
        ResponseFormat::JsonSchema { schema: None, .. } => None,
    }
}

/// Rebuilds a reduced schema tree: uppercased types, string-projected
/// enums, and only the fields Gemini understands. Idempotent on that
/// reduced field set.
pub fn to_gemini_schema(schema: &JsonSchema) -> GeminiSchema {
    GeminiSchema {
        kind: map_type_to_gemini(schema.schema_type.as_deref()),
        description: schema.description.clone(),
        enum_values: schema.enum_values.iter().map(value_to_string).collect(),
        properties: schema
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), to_gemini_schema(prop)))
            .collect(),
        required: schema.required.clone(),
        items: schema
            .items
            .as_deref()
            .map(|items| Box::new(to_gemini_schema(items))),
        nullable: false,
    }
}

fn map_type_to_gemini(schema_type: Option<&str>) -> String {
    match schema_type {
        Some("string") => "STRING",
        Some("integer") => "INTEGER",
        Some("number") => "NUMBER",
        Some("boolean") => "BOOLEAN",
        Some("array") => "ARRAY",
        Some("object") => "OBJECT",
        _ => "STRING",
    }
    .to_string()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Converts tools to Gemini function declarations; an empty tool list
/// yields no tool block at all.
pub fn tools_to_gemini(tools: &[Tool]) -> Option<GeminiTool> {
    if tools.is_empty() {
        return None;
    }
    Some(GeminiTool {
        function_declarations: tools
            .iter()
            .map(|tool| GeminiFunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: Some(to_gemini_schema(&tool.parameters)),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_schema() -> JsonSchema {
        JsonSchema::object(
            [
                ("name", JsonSchema::of_type("string")),
                ("age", JsonSchema::of_type("integer")),
            ],
            &["name", "age"],
        )
    }

    #[test]
    fn openai_text_format() {
        let out = to_openai(&ResponseFormat::Text);
        assert_eq!(out.kind, "text");
        assert!(out.json_schema.is_none());
    }

    #[test]
    fn openai_json_format() {
        let out = to_openai(&ResponseFormat::Json);
        assert_eq!(out.kind, "json_object");
    }

    #[test]
    fn openai_json_schema_strict_by_default() {
        let out = to_openai(&ResponseFormat::JsonSchema {
            schema: Some(person_schema()),
            name: "person".into(),
            description: None,
            strict: None,
        });
        assert_eq!(out.kind, "json_schema");
        let wrapped = out.json_schema.unwrap();
        assert_eq!(wrapped.name, "person");
        assert!(wrapped.strict);
        assert_eq!(wrapped.schema["additionalProperties"], json!(false));
    }

    #[test]
    fn openai_strict_false_respected() {
        let out = to_openai(&ResponseFormat::JsonSchema {
            schema: Some(person_schema()),
            name: "person".into(),
            description: None,
            strict: Some(false),
        });
        assert!(!out.json_schema.unwrap().strict);
    }

    #[test]
    fn openai_nil_schema_is_noop() {
        let out = to_openai(&ResponseFormat::JsonSchema {
            schema: None,
            name: "empty".into(),
            description: None,
            strict: None,
        });
        assert_eq!(out.json_schema.unwrap().schema, Value::Null);
    }

    #[test]
    fn additional_properties_reaches_nested_objects() {
        let schema = JsonSchema::object(
            [(
                "address",
                JsonSchema::object([("city", JsonSchema::of_type("string"))], &["city"]),
            )],
            &["address"],
        );
        let mut value = schema.to_value();
        add_additional_properties_false(&mut value);

        assert_eq!(value["additionalProperties"], json!(false));
        assert_eq!(
            value["properties"]["address"]["additionalProperties"],
            json!(false)
        );
    }

    #[test]
    fn additional_properties_reaches_array_items() {
        let schema = JsonSchema {
            schema_type: Some("array".into()),
            items: Some(Box::new(JsonSchema::object(
                [("id", JsonSchema::of_type("integer"))],
                &["id"],
            ))),
            ..Default::default()
        };
        let mut value = schema.to_value();
        add_additional_properties_false(&mut value);
        assert_eq!(value["items"]["additionalProperties"], json!(false));
    }

    #[test]
    fn additional_properties_reaches_compositions_and_defs() {
        let object = JsonSchema::object([("a", JsonSchema::of_type("string"))], &["a"]);
        let schema = JsonSchema {
            any_of: vec![object.clone()],
            one_of: vec![object.clone()],
            all_of: vec![object.clone()],
            defs: [("shared".to_string(), object)].into_iter().collect(),
            ..Default::default()
        };
        let mut value = schema.to_value();
        add_additional_properties_false(&mut value);

        for key in ["anyOf", "oneOf", "allOf"] {
            assert_eq!(
                value[key][0]["additionalProperties"],
                json!(false),
                "missing under {key}"
            );
        }
        assert_eq!(
            value["$defs"]["shared"]["additionalProperties"],
            json!(false)
        );
    }

    #[test]
    fn additional_properties_pass_is_idempotent() {
        let mut value = person_schema().to_value();
        add_additional_properties_false(&mut value);
        let once = value.clone();
        add_additional_properties_false(&mut value);
        assert_eq!(value, once);
    }

    #[test]
    fn tools_to_openai_not_strict() {
        let tools = vec![Tool {
            name: "get_weather".into(),
            description: Some("Look up the weather".into()),
            parameters: JsonSchema::object(
                [("location", JsonSchema::of_type("string"))],
                &["location"],
            ),
        }];
        let out = tools_to_openai(&tools);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, "function");
        assert_eq!(out[0].function.name, "get_weather");
        assert!(!out[0].function.strict);
        assert_eq!(
            out[0].function.parameters["additionalProperties"],
            json!(false)
        );
    }

    #[test]
    fn tools_to_openai_strict_sets_flag() {
        let tools = vec![Tool {
            name: "lookup".into(),
            description: None,
            parameters: person_schema(),
        }];
        let out = tools_to_openai_strict(&tools);
        assert!(out[0].function.strict);
    }

    #[test]
    fn anthropic_text_and_json_yield_nothing() {
        assert!(to_anthropic(&ResponseFormat::Text).is_none());
        assert!(to_anthropic(&ResponseFormat::Json).is_none());
    }

    #[test]
    fn anthropic_json_schema_envelope() {
        let out = to_anthropic(&ResponseFormat::JsonSchema {
            schema: Some(person_schema()),
            name: "person".into(),
            description: None,
            strict: None,
        })
        .unwrap();
        let format = out.format.unwrap();
        assert_eq!(format.kind, "json_schema");
        assert_eq!(format.schema.unwrap()["additionalProperties"], json!(false));
    }

    #[test]
    fn anthropic_tools_do_not_mutate_schema() {
        let tools = vec![Tool {
            name: "search".into(),
            description: Some("Search".into()),
            parameters: JsonSchema::object([("q", JsonSchema::of_type("string"))], &["q"]),
        }];
        let out = tools_to_anthropic(&tools);
        assert_eq!(out[0].name, "search");
        // no strict-mode pass on tool schemas for this dialect
        assert!(out[0].input_schema.get("additionalProperties").is_none());
    }

    #[test]
    fn gemini_type_uppercasing() {
        for (json_type, expected) in [
            ("string", "STRING"),
            ("integer", "INTEGER"),
            ("number", "NUMBER"),
            ("boolean", "BOOLEAN"),
            ("array", "ARRAY"),
            ("object", "OBJECT"),
            ("weird", "STRING"),
        ] {
            assert_eq!(map_type_to_gemini(Some(json_type)), expected);
        }
        assert_eq!(map_type_to_gemini(None), "STRING");
    }

    #[test]
    fn gemini_enum_values_projected_to_strings() {
        let schema = JsonSchema {
            schema_type: Some("string".into()),
            enum_values: vec![json!("celsius"), json!(7), json!(true)],
            ..Default::default()
        };
        let out = to_gemini_schema(&schema);
        assert_eq!(out.enum_values, vec!["celsius", "7", "true"]);
    }

    #[test]
    fn gemini_nested_reduction() {
        let schema = JsonSchema::object(
            [(
                "tags",
                JsonSchema {
                    schema_type: Some("array".into()),
                    items: Some(Box::new(JsonSchema::of_type("string"))),
                    ..Default::default()
                },
            )],
            &["tags"],
        );
        let out = to_gemini_schema(&schema);
        assert_eq!(out.kind, "OBJECT");
        let tags = &out.properties["tags"];
        assert_eq!(tags.kind, "ARRAY");
        assert_eq!(tags.items.as_ref().unwrap().kind, "STRING");
        assert_eq!(out.required, vec!["tags".to_string()]);
    }

    #[test]
    fn gemini_json_mode_has_mime_without_schema() {
        let out = to_gemini(&ResponseFormat::Json).unwrap();
        assert_eq!(out.response_mime_type, "application/json");
        assert!(out.response_schema.is_none());
    }

    #[test]
    fn gemini_text_yields_nothing() {
        assert!(to_gemini(&ResponseFormat::Text).is_none());
    }

    #[test]
    fn gemini_tools_empty_yields_none() {
        assert!(tools_to_gemini(&[]).is_none());
    }

    #[test]
    fn gemini_tools_become_function_declarations() {
        let tools = vec![Tool {
            name: "get_weather".into(),
            description: Some("Weather lookup".into()),
            parameters: JsonSchema::object(
                [("location", JsonSchema::of_type("string"))],
                &["location"],
            ),
        }];
        let out = tools_to_gemini(&tools).unwrap();
        assert_eq!(out.function_declarations.len(), 1);
        let decl = &out.function_declarations[0];
        assert_eq!(decl.name, "get_weather");
        assert_eq!(decl.parameters.as_ref().unwrap().kind, "OBJECT");
    }

    #[test]
    fn gemini_reduction_is_idempotent() {
        // Re-reducing a schema built from the reduced fields changes nothing.
        let original = person_schema();
        let reduced = to_gemini_schema(&original);

        let lowered = JsonSchema {
            schema_type: Some("object".into()),
            properties: original.properties.clone(),
            required: original.required.clone(),
            ..Default::default()
        };
        assert_eq!(to_gemini_schema(&lowered), reduced);
    }
}
