use crate::error::CompileError;
use crate::types::NodeDecl;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Schemas as data ──────────────────────────────────────────

/// The accepted shape of a single parameter value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamKind {
    Str { non_empty: bool },
    Enum { choices: Vec<String> },
    Number {
        min: Option<f64>,
        max: Option<f64>,
        /// When true, `min` itself is rejected (strictly-greater-than).
        exclusive_min: bool,
    },
    Bool,
}

/// One parameter in a node type's contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A node type's full parameter contract. Extra keys are rejected,
/// defaults are filled, and `less_than` pairs assert a strict ordering
/// between two numeric parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    pub params: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub less_than: Vec<(String, String)>,
}

impl ParamSchema {
    fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ─── Validation ───────────────────────────────────────────────

/// Validate a node's params against a schema.
///
/// Returns the normalized parameter map (defaults applied) and every
/// violation found — the validator never stops at the first problem
/// within a node.
pub fn validate_params(
    node: &NodeDecl,
    schema: &ParamSchema,
) -> (serde_json::Map<String, Value>, Vec<CompileError>) {
    let mut errors = Vec::new();
    let mut normalized = serde_json::Map::new();

    for (key, _) in &node.params {
        if schema.spec(key).is_none() {
            errors.push(
                CompileError::schema(format!("unknown parameter '{}'", key))
                    .on_node(&node.id)
                    .on_field(key),
            );
        }
    }

    for spec in &schema.params {
        match node.params.get(&spec.name) {
            Some(value) => {
                if let Some(violation) = check_kind(&spec.kind, value) {
                    errors.push(
                        CompileError::schema(violation)
                            .on_node(&node.id)
                            .on_field(&spec.name),
                    );
                } else {
                    normalized.insert(spec.name.clone(), value.clone());
                }
            }
            None => {
                if let Some(default) = &spec.default {
                    normalized.insert(spec.name.clone(), default.clone());
                } else if spec.required {
                    errors.push(
                        CompileError::schema(format!("missing required parameter '{}'", spec.name))
                            .on_node(&node.id)
                            .on_field(&spec.name),
                    );
                }
            }
        }
    }

    for (smaller, larger) in &schema.less_than {
        if let (Some(a), Some(b)) = (
            normalized.get(smaller).and_then(Value::as_f64),
            normalized.get(larger).and_then(Value::as_f64),
        ) {
            if a >= b {
                errors.push(
                    CompileError::schema(format!(
                        "must be greater than {} (got {} <= {})",
                        smaller, b, a
                    ))
                    .on_node(&node.id)
                    .on_field(larger),
                );
            }
        }
    }

    (normalized, errors)
}

fn check_kind(kind: &ParamKind, value: &Value) -> Option<String> {
    match kind {
        ParamKind::Str { non_empty } => match value.as_str() {
            Some(s) if *non_empty && s.is_empty() => Some("must be a non-empty string".into()),
            Some(_) => None,
            None => Some("must be a string".into()),
        },
        ParamKind::Enum { choices } => match value.as_str() {
            Some(s) if choices.iter().any(|c| c == s) => None,
            Some(s) => Some(format!(
                "'{}' is not one of {}",
                s,
                choices.join(", ")
            )),
            None => Some(format!("must be one of {}", choices.join(", "))),
        },
        ParamKind::Number {
            min,
            max,
            exclusive_min,
        } => {
            let n = match value.as_f64() {
                Some(n) => n,
                None => return Some("must be a number".into()),
            };
            if let Some(min) = min {
                if *exclusive_min && n <= *min {
                    return Some(if *min == 0.0 {
                        "must be a positive number".into()
                    } else {
                        format!("must be greater than {}", min)
                    });
                }
                if !*exclusive_min && n < *min {
                    return Some(format!("must be at least {}", min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Some(format!("must be at most {}", max));
                }
            }
            None
        }
        ParamKind::Bool => {
            if value.is_boolean() {
                None
            } else {
                Some("must be a boolean".into())
            }
        }
    }
}

// ─── Built-in contracts ───────────────────────────────────────

pub const BUILTIN_TYPES: [&str; 4] = ["DataLoader", "Indicator", "CrossoverSignal", "Backtest"];

pub fn is_builtin_type(node_type: &str) -> bool {
    BUILTIN_TYPES.contains(&node_type)
}

/// The parameter contract for a built-in node type.
pub fn builtin_param_schema(node_type: &str) -> Option<ParamSchema> {
    match node_type {
        "DataLoader" => Some(ParamSchema {
            params: vec![
                required("symbol", ParamKind::Str { non_empty: true }),
                required(
                    "timeframe",
                    enum_of(&["1m", "5m", "15m", "30m", "1h", "4h", "1d"]),
                ),
                required("dataset", ParamKind::Str { non_empty: true }),
                optional("start_date", ParamKind::Str { non_empty: false }),
                optional("end_date", ParamKind::Str { non_empty: false }),
            ],
            less_than: vec![],
        }),
        "Indicator" => Some(ParamSchema {
            params: vec![
                required(
                    "indicator",
                    enum_of(&["SMA", "EMA", "RSI", "MACD", "BB", "STOCH", "ATR"]),
                ),
                required("period", positive_number()),
                with_default(
                    "column",
                    enum_of(&["open", "high", "low", "close", "volume"]),
                    Value::from("close"),
                ),
            ],
            less_than: vec![],
        }),
        "CrossoverSignal" => Some(ParamSchema {
            params: vec![
                required("fast_period", positive_number()),
                required("slow_period", positive_number()),
                with_default(
                    "signal_column",
                    ParamKind::Str { non_empty: false },
                    Value::from("signal"),
                ),
                optional("fast_ma_column", ParamKind::Str { non_empty: false }),
                optional("slow_ma_column", ParamKind::Str { non_empty: false }),
                with_default("buy_threshold", non_negative_number(), Value::from(0)),
                with_default("sell_threshold", non_negative_number(), Value::from(0)),
                with_default("confirmation_periods", positive_number(), Value::from(1)),
            ],
            less_than: vec![("fast_period".to_string(), "slow_period".to_string())],
        }),
        "Backtest" => Some(ParamSchema {
            params: vec![
                required("initial_capital", positive_number()),
                with_default("commission", unit_interval(), Value::from(0.001)),
                with_default("slippage", unit_interval(), Value::from(0.001)),
                with_default("position_size", unit_interval(), Value::from(1.0)),
            ],
            less_than: vec![],
        }),
        _ => None,
    }
}

fn required(name: &str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name: name.to_string(),
        kind,
        required: true,
        default: None,
    }
}

fn optional(name: &str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name: name.to_string(),
        kind,
        required: false,
        default: None,
    }
}

fn with_default(name: &str, kind: ParamKind, default: Value) -> ParamSpec {
    ParamSpec {
        name: name.to_string(),
        kind,
        required: false,
        default: Some(default),
    }
}

fn enum_of(choices: &[&str]) -> ParamKind {
    ParamKind::Enum {
        choices: choices.iter().map(|c| c.to_string()).collect(),
    }
}

fn positive_number() -> ParamKind {
    ParamKind::Number {
        min: Some(0.0),
        max: None,
        exclusive_min: true,
    }
}

fn non_negative_number() -> ParamKind {
    ParamKind::Number {
        min: Some(0.0),
        max: None,
        exclusive_min: false,
    }
}

fn unit_interval() -> ParamKind {
    ParamKind::Number {
        min: Some(0.0),
        max: Some(1.0),
        exclusive_min: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(node_type: &str, params: Value) -> NodeDecl {
        NodeDecl {
            id: "n1".to_string(),
            node_type: node_type.to_string(),
            depends_on: vec![],
            params: params.as_object().cloned().unwrap_or_default(),
            line: None,
            column: None,
        }
    }

    fn validate(node_type: &str, params: Value) -> (serde_json::Map<String, Value>, Vec<CompileError>) {
        let schema = builtin_param_schema(node_type).unwrap();
        validate_params(&decl(node_type, params), &schema)
    }

    #[test]
    fn test_dataloader_valid() {
        let (normalized, errors) = validate(
            "DataLoader",
            json!({"symbol": "BTC/USD", "timeframe": "1h", "dataset": "btc.csv"}),
        );
        assert!(errors.is_empty(), "unexpected: {:?}", errors);
        assert_eq!(normalized["symbol"], "BTC/USD");
    }

    #[test]
    fn test_dataloader_violations_accumulate() {
        // Empty symbol, bad timeframe, missing dataset: all three reported.
        let (_, errors) = validate("DataLoader", json!({"symbol": "", "timeframe": "2h"}));
        assert_eq!(errors.len(), 3, "got: {:?}", errors);
        assert!(errors.iter().any(|e| e.field.as_deref() == Some("symbol")));
        assert!(errors.iter().any(|e| e.field.as_deref() == Some("timeframe")));
        assert!(errors.iter().any(|e| e.field.as_deref() == Some("dataset")));
    }

    #[test]
    fn test_indicator_default_column() {
        let (normalized, errors) = validate("Indicator", json!({"indicator": "SMA", "period": 20}));
        assert!(errors.is_empty());
        assert_eq!(normalized["column"], "close");
    }

    #[test]
    fn test_indicator_rejects_zero_period() {
        let (_, errors) = validate("Indicator", json!({"indicator": "SMA", "period": 0}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("positive"));
    }

    #[test]
    fn test_indicator_rejects_unknown_indicator() {
        let (_, errors) = validate("Indicator", json!({"indicator": "WMA", "period": 5}));
        assert!(errors.iter().any(|e| e.message.contains("WMA")));
    }

    #[test]
    fn test_extra_key_rejected() {
        let (_, errors) = validate(
            "Indicator",
            json!({"indicator": "RSI", "period": 14, "smoothing": 3}),
        );
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unknown parameter 'smoothing'")));
    }

    #[test]
    fn test_crossover_fast_must_be_less_than_slow() {
        let (_, errors) = validate(
            "CrossoverSignal",
            json!({"fast_period": 50, "slow_period": 20}),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_deref(), Some("slow_period"));

        // Equal periods are also rejected
        let (_, errors) = validate(
            "CrossoverSignal",
            json!({"fast_period": 20, "slow_period": 20}),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_deref(), Some("slow_period"));
    }

    #[test]
    fn test_crossover_defaults() {
        let (normalized, errors) = validate(
            "CrossoverSignal",
            json!({"fast_period": 20, "slow_period": 50}),
        );
        assert!(errors.is_empty());
        assert_eq!(normalized["signal_column"], "signal");
        assert_eq!(normalized["buy_threshold"], 0);
        assert_eq!(normalized["sell_threshold"], 0);
        assert_eq!(normalized["confirmation_periods"], 1);
    }

    #[test]
    fn test_backtest_range_closure() {
        // Boundary values 0 and 1 are accepted
        let (_, errors) = validate(
            "Backtest",
            json!({"initial_capital": 10000, "commission": 0, "slippage": 1}),
        );
        assert!(errors.is_empty(), "boundaries must pass: {:?}", errors);

        // Just outside the closed interval is rejected on both sides
        let (_, errors) = validate(
            "Backtest",
            json!({"initial_capital": 10000, "commission": -0.001, "slippage": 1.001}),
        );
        assert_eq!(errors.len(), 2, "got: {:?}", errors);
        assert!(errors.iter().any(|e| e.field.as_deref() == Some("commission")));
        assert!(errors.iter().any(|e| e.field.as_deref() == Some("slippage")));
    }

    #[test]
    fn test_backtest_defaults() {
        let (normalized, errors) = validate("Backtest", json!({"initial_capital": 5000}));
        assert!(errors.is_empty());
        assert_eq!(normalized["commission"], 0.001);
        assert_eq!(normalized["slippage"], 0.001);
        assert_eq!(normalized["position_size"], 1.0);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let (_, errors) = validate(
            "Backtest",
            json!({"initial_capital": "lots", "commission": true}),
        );
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.message.contains("number")));
    }

    #[test]
    fn test_builtin_type_lookup() {
        assert!(is_builtin_type("DataLoader"));
        assert!(is_builtin_type("Backtest"));
        assert!(!is_builtin_type("FooBar"));
        assert!(builtin_param_schema("FooBar").is_none());
    }
}
