//! The artifact schema the generation backend must answer with.
//!
//! The JSON Schema is sent with every request as a strict `response_format`.
//! The returned object is then checked again here; anything that does not
//! conform is rejected, never coerced.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::artifact::{function_identifier_for, is_valid_slug, Artifact};
use crate::schedule::CronSchedule;

/// Version of the artifact schema exchanged with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    #[default]
    V1,
}

impl SchemaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => "v1",
        }
    }

    /// Name used for the `response_format` schema.
    pub fn schema_name(&self) -> String {
        format!("prefect_deployment_{}", self.as_str())
    }

    /// The JSON Schema document for this version.
    pub fn json_schema(&self) -> Value {
        match self {
            SchemaVersion::V1 => json!({
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "name",
                    "function_identifier",
                    "description",
                    "source_text",
                    "schedule",
                    "parameters"
                ],
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "A slugified name for the deployment: lowercase letters and digits separated by single dashes, starting with a letter."
                    },
                    "function_identifier": {
                        "type": ["string", "null"],
                        "description": "The name of the python function: the slug with dashes replaced by underscores."
                    },
                    "description": {
                        "type": "string",
                        "description": "A description of what the function does."
                    },
                    "source_text": {
                        "type": "string",
                        "description": "The source code for one python function that accomplishes the goal. Only the function definition, no decorators, no module-level code."
                    },
                    "schedule": {
                        "description": "A cron schedule, only if the user describes a recurring task.",
                        "anyOf": [
                            { "type": "null" },
                            {
                                "type": "object",
                                "additionalProperties": false,
                                "required": ["cron", "timezone"],
                                "properties": {
                                    "cron": { "type": "string" },
                                    "timezone": { "type": ["string", "null"] }
                                }
                            }
                        ]
                    },
                    "parameters": {
                        "type": "array",
                        "description": "Default parameters for the flow.",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["name", "value"],
                            "properties": {
                                "name": { "type": "string" },
                                "value": { "type": "string" }
                            }
                        }
                    }
                }
            }),
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "v1" => Ok(SchemaVersion::V1),
            other => Err(format!("unsupported schema version '{}'", other)),
        }
    }
}

/// Artifact exactly as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawArtifact {
    pub name: String,
    #[serde(default)]
    pub function_identifier: Option<String>,
    pub description: String,
    pub source_text: String,
    #[serde(default)]
    pub schedule: Option<RawSchedule>,
    #[serde(default)]
    pub parameters: Option<RawParameters>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSchedule {
    pub cron: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Parameters arrive as a list of pairs under strict mode, or as a plain map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawParameters {
    List(Vec<RawParameter>),
    Map(serde_json::Map<String, Value>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawParameter {
    pub name: String,
    pub value: Value,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

impl RawArtifact {
    /// Checks every field and builds an [`Artifact`].
    ///
    /// A missing or empty `function_identifier` is derived from the name.
    /// An inconsistent one is kept as-is for the normalizer to reconcile.
    pub fn into_artifact(self) -> Result<Artifact, String> {
        let name = self.name.trim().to_string();
        if !is_valid_slug(&name) {
            return Err(format!(
                "name '{}' is not a lowercase, dash-separated slug",
                name
            ));
        }

        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err("description is empty".to_string());
        }

        if self.source_text.trim().is_empty() {
            return Err("source_text is empty".to_string());
        }

        let function_identifier = match self.function_identifier {
            Some(ident) if !ident.trim().is_empty() => {
                let ident = ident.trim().to_string();
                if !identifier_re().is_match(&ident) {
                    return Err(format!(
                        "function_identifier '{}' is not a valid identifier",
                        ident
                    ));
                }
                ident
            }
            _ => function_identifier_for(&name),
        };

        let schedule = match self.schedule {
            Some(raw) => {
                let schedule = CronSchedule::new(&raw.cron)
                    .map_err(|e| format!("schedule: {}", e))?;
                let schedule = match raw.timezone {
                    Some(tz) if !tz.trim().is_empty() => schedule
                        .with_timezone(tz.trim())
                        .map_err(|e| format!("schedule: {}", e))?,
                    _ => schedule,
                };
                Some(schedule)
            }
            None => None,
        };

        let pairs: Vec<(String, Value)> = match self.parameters {
            Some(RawParameters::List(list)) => {
                list.into_iter().map(|p| (p.name, p.value)).collect()
            }
            Some(RawParameters::Map(map)) => map.into_iter().collect(),
            None => Vec::new(),
        };

        let mut parameters = BTreeMap::new();
        for (key, value) in pairs {
            if !identifier_re().is_match(&key) {
                return Err(format!("parameter name '{}' is not a valid identifier", key));
            }
            if parameters.insert(key.clone(), value).is_some() {
                return Err(format!("parameter '{}' is given twice", key));
            }
        }

        Ok(Artifact {
            name,
            function_identifier,
            description,
            source_text: self.source_text,
            schedule,
            parameters,
        })
    }
}

/// Parses backend JSON into a checked [`Artifact`].
pub fn artifact_from_json(json: &str) -> Result<Artifact, String> {
    let raw: RawArtifact = serde_json::from_str(json).map_err(|e| e.to_string())?;
    raw.into_artifact()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> Value {
        json!({
            "name": "eth-price",
            "function_identifier": null,
            "description": "Prints the ETH price in USD.",
            "source_text": "def eth_price():\n    print(1)\n",
            "schedule": null,
            "parameters": []
        })
    }

    #[test]
    fn test_schema_version_parsing() {
        assert_eq!("v1".parse::<SchemaVersion>(), Ok(SchemaVersion::V1));
        assert_eq!("1".parse::<SchemaVersion>(), Ok(SchemaVersion::V1));
        assert!("v2".parse::<SchemaVersion>().is_err());
        assert_eq!(SchemaVersion::default().schema_name(), "prefect_deployment_v1");
    }

    #[test]
    fn test_json_schema_requires_every_property() {
        let schema = SchemaVersion::V1.json_schema();
        let required = schema["required"].as_array().expect("required list");
        let properties = schema["properties"].as_object().expect("properties");
        assert_eq!(required.len(), properties.len());
        assert_eq!(schema["additionalProperties"], json!(false));
    }

    #[test]
    fn test_valid_artifact() {
        let artifact = artifact_from_json(&valid_json().to_string()).expect("valid");
        assert_eq!(artifact.name, "eth-price");
        assert_eq!(artifact.function_identifier, "eth_price");
        assert!(artifact.schedule.is_none());
        assert!(artifact.parameters.is_empty());
    }

    #[test]
    fn test_schedule_and_parameters() {
        let mut value = valid_json();
        value["schedule"] = json!({"cron": "*/5 * * * *", "timezone": "UTC"});
        value["parameters"] = json!([{"name": "currency", "value": "USD"}]);
        let artifact = artifact_from_json(&value.to_string()).expect("valid");
        let schedule = artifact.schedule.expect("schedule");
        assert_eq!(schedule.cron, "*/5 * * * *");
        assert_eq!(schedule.timezone.as_deref(), Some("UTC"));
        assert_eq!(artifact.parameters["currency"], json!("USD"));
    }

    #[test]
    fn test_parameters_as_map() {
        let mut value = valid_json();
        value["parameters"] = json!({"limit": 100});
        let artifact = artifact_from_json(&value.to_string()).expect("valid");
        assert_eq!(artifact.parameters["limit"], json!(100));
    }

    #[test]
    fn test_rejections() {
        let cases = [
            ("name", json!("ETH Price")),
            ("description", json!("   ")),
            ("source_text", json!("")),
            ("function_identifier", json!("eth-price")),
            ("schedule", json!({"cron": "every five minutes", "timezone": null})),
            ("parameters", json!([{"name": "bad name", "value": "x"}])),
        ];
        for (field, bad) in cases {
            let mut value = valid_json();
            value[field] = bad;
            assert!(
                artifact_from_json(&value.to_string()).is_err(),
                "{} should be rejected",
                field
            );
        }
    }

    #[test]
    fn test_unknown_and_missing_fields_rejected() {
        let mut value = valid_json();
        value["extra"] = json!(1);
        assert!(artifact_from_json(&value.to_string()).is_err());

        let mut value = valid_json();
        value.as_object_mut().expect("object").remove("source_text");
        assert!(artifact_from_json(&value.to_string()).is_err());
    }

    #[test]
    fn test_inconsistent_identifier_is_kept_for_reconciliation() {
        let mut value = valid_json();
        value["function_identifier"] = json!("get_price");
        let artifact = artifact_from_json(&value.to_string()).expect("valid");
        assert_eq!(artifact.function_identifier, "get_price");
        assert!(!artifact.names_agree());
    }
}
