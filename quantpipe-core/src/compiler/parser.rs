use crate::error::CompileError;
use crate::types::NodeDecl;
use serde_yaml::Value as Yaml;

/// Everything the parser extracted from a pipeline description.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub nodes: Vec<NodeDecl>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub warnings: Vec<String>,
}

/// Keys the parser understands on a node mapping. Anything else outside
/// `params` is ignored with a warning.
const NODE_KEYS: [&str; 4] = ["id", "type", "depends_on", "params"];

/// Parse a pipeline description into a node list.
///
/// The description is a YAML document whose root mapping contains a
/// `pipeline` sequence; each element declares `id`, `type`, and
/// optionally `depends_on` and `params`. Structural problems are
/// terminal: the parser returns a single syntax error with the source
/// position when the YAML layer surfaced one.
pub fn parse_pipeline(text: &str) -> Result<ParseOutcome, CompileError> {
    if text.trim().is_empty() {
        return Err(CompileError::syntax("empty pipeline description"));
    }

    let doc: Yaml = serde_yaml::from_str(text).map_err(|e| {
        let mut err = CompileError::syntax(format!("malformed document: {}", e));
        if let Some(loc) = e.location() {
            err = err.at(loc.line(), loc.column());
        }
        err
    })?;

    let root = match &doc {
        Yaml::Mapping(m) => m,
        _ => return Err(CompileError::syntax("document root must be a mapping")),
    };

    let mut warnings = Vec::new();
    let mut name = None;
    let mut description = None;
    let mut pipeline = None;

    for (key, value) in root {
        match key.as_str() {
            Some("pipeline") => pipeline = Some(value),
            Some("name") => name = value.as_str().map(str::to_string),
            Some("description") => description = value.as_str().map(str::to_string),
            Some(other) => warnings.push(format!("unknown top-level key '{}' ignored", other)),
            None => warnings.push("non-string top-level key ignored".to_string()),
        }
    }

    let pipeline = pipeline
        .ok_or_else(|| CompileError::syntax("missing 'pipeline' sequence at document root"))?;
    let entries = match pipeline {
        Yaml::Sequence(seq) => seq,
        _ => return Err(CompileError::syntax("'pipeline' must be a sequence of nodes")),
    };

    let mut nodes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        nodes.push(parse_node(index, entry, &mut warnings)?);
    }

    Ok(ParseOutcome {
        nodes,
        name,
        description,
        warnings,
    })
}

fn parse_node(
    index: usize,
    entry: &Yaml,
    warnings: &mut Vec<String>,
) -> Result<NodeDecl, CompileError> {
    let mapping = match entry {
        Yaml::Mapping(m) => m,
        _ => {
            return Err(CompileError::syntax(format!(
                "pipeline entry {} is not a mapping",
                index
            )))
        }
    };

    let id = match mapping.get("id") {
        Some(Yaml::String(s)) => s.clone(),
        Some(other) => {
            return Err(CompileError::syntax(format!(
                "pipeline entry {}: node id must be a string, got {}",
                index,
                yaml_type_name(other)
            )))
        }
        None => {
            return Err(CompileError::syntax(format!(
                "pipeline entry {} is missing required key 'id'",
                index
            )))
        }
    };

    let node_type = match mapping.get("type") {
        Some(Yaml::String(s)) => s.clone(),
        Some(other) => {
            return Err(CompileError::syntax(format!(
                "node '{}': type must be a string, got {}",
                id,
                yaml_type_name(other)
            ))
            .on_node(&id))
        }
        None => {
            return Err(
                CompileError::syntax(format!("node '{}' is missing required key 'type'", id))
                    .on_node(&id),
            )
        }
    };

    let depends_on = match mapping.get("depends_on") {
        None | Some(Yaml::Null) => Vec::new(),
        Some(Yaml::Sequence(seq)) => {
            let mut deps = Vec::with_capacity(seq.len());
            for dep in seq {
                match dep.as_str() {
                    Some(s) => deps.push(s.to_string()),
                    None => {
                        return Err(CompileError::syntax(format!(
                            "node '{}': depends_on entries must be strings",
                            id
                        ))
                        .on_node(&id))
                    }
                }
            }
            deps
        }
        Some(_) => {
            return Err(CompileError::syntax(format!(
                "node '{}': depends_on must be a sequence of node ids",
                id
            ))
            .on_node(&id))
        }
    };

    // Params are carried verbatim, unknown keys included — the schema
    // validator decides what is acceptable per node type.
    let params = match mapping.get("params") {
        None | Some(Yaml::Null) => serde_json::Map::new(),
        Some(Yaml::Mapping(m)) => {
            let mut params = serde_json::Map::new();
            for (k, v) in m {
                let key = match k.as_str() {
                    Some(s) => s.to_string(),
                    None => {
                        warnings.push(format!(
                            "node '{}': non-string params key ignored",
                            id
                        ));
                        continue;
                    }
                };
                params.insert(key, yaml_to_json(v));
            }
            params
        }
        Some(_) => {
            return Err(
                CompileError::syntax(format!("node '{}': params must be a mapping", id))
                    .on_node(&id),
            )
        }
    };

    for (key, _) in mapping {
        if let Some(key) = key.as_str() {
            if !NODE_KEYS.contains(&key) {
                warnings.push(format!("unknown key '{}' on node '{}' ignored", key, id));
            }
        }
    }

    Ok(NodeDecl {
        id,
        node_type,
        depends_on,
        params,
        line: None,
        column: None,
    })
}

fn yaml_type_name(value: &Yaml) -> &'static str {
    match value {
        Yaml::Null => "null",
        Yaml::Bool(_) => "bool",
        Yaml::Number(_) => "number",
        Yaml::String(_) => "string",
        Yaml::Sequence(_) => "sequence",
        Yaml::Mapping(_) => "mapping",
        Yaml::Tagged(_) => "tagged value",
    }
}

/// Convert a YAML value to JSON, stringifying non-string mapping keys.
fn yaml_to_json(value: &Yaml) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(*b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                serde_json::Number::from_f64(n.as_f64().unwrap_or(0.0))
                    .map(Json::Number)
                    .unwrap_or(Json::Null)
            }
        }
        Yaml::String(s) => Json::String(s.clone()),
        Yaml::Sequence(seq) => Json::Array(seq.iter().map(yaml_to_json).collect()),
        Yaml::Mapping(m) => {
            let mut out = serde_json::Map::new();
            for (k, v) in m {
                let key = k
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| serde_yaml::to_string(k).unwrap_or_default().trim().to_string());
                out.insert(key, yaml_to_json(v));
            }
            Json::Object(out)
        }
        Yaml::Tagged(t) => yaml_to_json(&t.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_pipeline_parses() {
        let text = r#"
pipeline:
  - id: price_data
    type: DataLoader
    params:
      symbol: BTC/USD
      timeframe: 1h
      dataset: btc.csv
  - id: fast
    type: Indicator
    depends_on: [price_data]
    params:
      indicator: SMA
      period: 20
"#;
        let out = parse_pipeline(text).unwrap();
        assert_eq!(out.nodes.len(), 2);
        assert!(out.warnings.is_empty());

        let loader = &out.nodes[0];
        assert_eq!(loader.id, "price_data");
        assert_eq!(loader.node_type, "DataLoader");
        assert!(loader.depends_on.is_empty());
        assert_eq!(loader.params["symbol"], "BTC/USD");

        let fast = &out.nodes[1];
        assert_eq!(fast.depends_on, vec!["price_data"]);
        assert_eq!(fast.params["period"], 20);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = parse_pipeline("").unwrap_err();
        assert!(err.message.contains("empty"));
        let err = parse_pipeline("   \n  ").unwrap_err();
        assert!(err.message.contains("empty"));
    }

    #[test]
    fn test_missing_pipeline_root() {
        let err = parse_pipeline("nodes:\n  - id: a\n").unwrap_err();
        assert!(err.message.contains("'pipeline'"));
    }

    #[test]
    fn test_non_sequence_root() {
        let err = parse_pipeline("pipeline: 42\n").unwrap_err();
        assert!(err.message.contains("sequence"));
    }

    #[test]
    fn test_node_missing_id() {
        let err = parse_pipeline("pipeline:\n  - type: DataLoader\n").unwrap_err();
        assert!(err.message.contains("'id'"));
    }

    #[test]
    fn test_node_missing_type() {
        let err = parse_pipeline("pipeline:\n  - id: a\n").unwrap_err();
        assert!(err.message.contains("'type'"));
    }

    #[test]
    fn test_non_string_id() {
        let err = parse_pipeline("pipeline:\n  - id: 17\n    type: DataLoader\n").unwrap_err();
        assert!(err.message.contains("string"));
    }

    #[test]
    fn test_unknown_keys_warn() {
        let text = r#"
color: blue
pipeline:
  - id: a
    type: DataLoader
    retries: 3
    params:
      symbol: X
      custom_extra: kept
"#;
        let out = parse_pipeline(text).unwrap();
        assert_eq!(out.warnings.len(), 2);
        assert!(out.warnings.iter().any(|w| w.contains("'color'")));
        assert!(out.warnings.iter().any(|w| w.contains("'retries'")));
        // Unknown keys *under* params are preserved verbatim
        assert_eq!(out.nodes[0].params["custom_extra"], "kept");
    }

    #[test]
    fn test_name_and_description_carried() {
        let text = "name: ma-cross\ndescription: demo\npipeline: []\n";
        let out = parse_pipeline(text).unwrap();
        assert_eq!(out.name.as_deref(), Some("ma-cross"));
        assert_eq!(out.description.as_deref(), Some("demo"));
        assert!(out.nodes.is_empty());
    }

    #[test]
    fn test_malformed_yaml_reports_location() {
        let err = parse_pipeline("pipeline:\n  - id: [unclosed\n").unwrap_err();
        assert!(err.message.contains("malformed document"));
        assert!(err.line.is_some());
    }

    #[test]
    fn test_nested_params_converted() {
        let text = r#"
pipeline:
  - id: a
    type: Custom
    params:
      thresholds:
        upper: 0.7
        lower: 0.3
      tags: [x, y]
"#;
        let out = parse_pipeline(text).unwrap();
        let params = &out.nodes[0].params;
        assert_eq!(params["thresholds"]["upper"], 0.7);
        assert_eq!(params["tags"][1], "y");
    }
}
