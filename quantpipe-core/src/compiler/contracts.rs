use crate::error::CompileError;
use crate::registry::NodeRegistry;
use crate::types::{NodeDecl, NodeId, OutputSchema};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Metrics every Backtest node reports.
pub const BACKTEST_METRICS: [&str; 6] = [
    "total_return",
    "sharpe_ratio",
    "max_drawdown",
    "win_rate",
    "profit_factor",
    "total_trades",
];

#[derive(Debug, Clone)]
pub struct ContractOutcome {
    /// Inferred output schema per node. Nodes that failed any check are
    /// recorded as `Null` so downstream diagnostics stay anchored to the
    /// original fault instead of cascading.
    pub output_schemas: BTreeMap<NodeId, OutputSchema>,
    /// Schema of each node's primary (first) input, where known.
    pub input_schemas: BTreeMap<NodeId, OutputSchema>,
    pub errors: Vec<CompileError>,
}

/// Validate input contracts and infer output schemas along the edges,
/// walking nodes in topological order.
///
/// `already_failed` names nodes whose parameters did not validate; they
/// get a `Null` schema up front and no further checks.
pub fn check(
    nodes: &[NodeDecl],
    order: &[String],
    normalized_params: &HashMap<String, serde_json::Map<String, serde_json::Value>>,
    registry: &dyn NodeRegistry,
    already_failed: &HashSet<String>,
) -> ContractOutcome {
    let by_id: HashMap<&str, &NodeDecl> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut outputs: BTreeMap<NodeId, OutputSchema> = BTreeMap::new();
    let mut inputs: BTreeMap<NodeId, OutputSchema> = BTreeMap::new();
    let mut errors = Vec::new();
    let mut failed: HashSet<String> = already_failed.clone();

    for id in order {
        let node = match by_id.get(id.as_str()) {
            Some(n) => *n,
            None => continue,
        };

        if failed.contains(id) {
            outputs.insert(id.clone(), OutputSchema::Null);
            continue;
        }

        let params = normalized_params.get(id).cloned().unwrap_or_default();
        let mut node_errors = Vec::new();
        let mut poisoned = false;

        // A dependency that already failed poisons this node silently —
        // its own diagnostic was reported at the source.
        let dep_schemas: Vec<(&str, &OutputSchema)> = node
            .depends_on
            .iter()
            .map(|d| {
                if failed.contains(d) {
                    poisoned = true;
                }
                (d.as_str(), outputs.get(d).unwrap_or(&OutputSchema::Null))
            })
            .collect();

        let schema = match node.node_type.as_str() {
            "DataLoader" => {
                if !node.depends_on.is_empty() {
                    node_errors.push(
                        CompileError::contract(format!(
                            "DataLoader takes no dependencies, found {}",
                            node.depends_on.len()
                        ))
                        .on_node(id),
                    );
                }
                ohlcv_frame()
            }
            "Indicator" => {
                check_arity_exact(id, "Indicator", &node.depends_on, 1, &mut node_errors);
                require_dataframes(id, &dep_schemas, &failed, &mut node_errors);
                match dep_schemas.first() {
                    Some((_, OutputSchema::Dataframe { .. })) => {
                        let frame = dep_schemas[0].1.clone();
                        indicator_frame(frame, &params)
                    }
                    _ => OutputSchema::Null,
                }
            }
            "CrossoverSignal" => {
                if node.depends_on.is_empty() {
                    node_errors.push(
                        CompileError::contract(
                            "CrossoverSignal requires at least one dependency".to_string(),
                        )
                        .on_node(id),
                    );
                }
                require_dataframes(id, &dep_schemas, &failed, &mut node_errors);
                match dep_schemas.first() {
                    Some((_, OutputSchema::Dataframe { .. })) => {
                        let frame = dep_schemas[0].1.clone();
                        signal_frame(frame, &params)
                    }
                    _ => OutputSchema::Null,
                }
            }
            "Backtest" => {
                check_backtest_inputs(id, &dep_schemas, &failed, &mut node_errors);
                OutputSchema::BacktestResults {
                    metrics: BACKTEST_METRICS.iter().map(|m| m.to_string()).collect(),
                    trade_log: true,
                }
            }
            custom => match registry.info(custom) {
                Some(info) => {
                    match &info.input_schema {
                        None | Some(OutputSchema::Null) => {
                            if !node.depends_on.is_empty() {
                                node_errors.push(
                                    CompileError::contract(format!(
                                        "custom node type '{}' takes no dependencies, found {}",
                                        custom,
                                        node.depends_on.len()
                                    ))
                                    .on_node(id),
                                );
                            }
                        }
                        Some(_) => {
                            if node.depends_on.is_empty() {
                                node_errors.push(
                                    CompileError::contract(format!(
                                        "custom node type '{}' requires at least one dependency",
                                        custom
                                    ))
                                    .on_node(id),
                                );
                            }
                            for (dep, schema) in &dep_schemas {
                                if matches!(schema, OutputSchema::Null) && !failed.contains(*dep) {
                                    node_errors.push(
                                        CompileError::contract(format!(
                                            "dependency '{}' has no known output schema",
                                            dep
                                        ))
                                        .on_node(id),
                                    );
                                }
                            }
                        }
                    }
                    info.output_schema.clone()
                }
                // Unknown types were already reported by the semantic pass.
                None => OutputSchema::Null,
            },
        };

        if let Some((_, first)) = dep_schemas.first() {
            if !matches!(first, OutputSchema::Null) {
                inputs.insert(id.clone(), (*first).clone());
            }
        }

        if poisoned || !node_errors.is_empty() {
            failed.insert(id.clone());
            outputs.insert(id.clone(), OutputSchema::Null);
        } else {
            outputs.insert(id.clone(), schema);
        }
        errors.extend(node_errors);
    }

    ContractOutcome {
        output_schemas: outputs,
        input_schemas: inputs,
        errors,
    }
}

fn check_arity_exact(
    id: &str,
    type_name: &str,
    deps: &[String],
    expected: usize,
    errors: &mut Vec<CompileError>,
) {
    if deps.len() != expected {
        errors.push(
            CompileError::contract(format!(
                "{} requires exactly {} dependency, found {}",
                type_name,
                expected,
                deps.len()
            ))
            .on_node(id),
        );
    }
}

fn require_dataframes(
    id: &str,
    dep_schemas: &[(&str, &OutputSchema)],
    failed: &HashSet<String>,
    errors: &mut Vec<CompileError>,
) {
    for (dep, schema) in dep_schemas {
        if failed.contains(*dep) {
            continue;
        }
        if !schema.is_dataframe() {
            errors.push(
                CompileError::contract(format!(
                    "requires a dataframe input, but dependency '{}' produces {}",
                    dep,
                    schema.tag()
                ))
                .on_node(id),
            );
        }
    }
}

/// Backtest accepts either a single signal-bearing dataframe, or the
/// legacy two-dependency form: signals first, price dataframe second.
fn check_backtest_inputs(
    id: &str,
    dep_schemas: &[(&str, &OutputSchema)],
    failed: &HashSet<String>,
    errors: &mut Vec<CompileError>,
) {
    let any_failed_dep = dep_schemas.iter().any(|(dep, _)| failed.contains(*dep));
    match dep_schemas {
        [(dep, schema)] => {
            if failed.contains(*dep) {
                return;
            }
            if !schema.is_dataframe() {
                errors.push(
                    CompileError::contract(format!(
                        "requires a dataframe input, but dependency '{}' produces {}",
                        dep,
                        schema.tag()
                    ))
                    .on_node(id),
                );
            } else if schema.signal_column().is_none() {
                errors.push(
                    CompileError::contract(format!(
                        "input dataframe from '{}' has no signal column",
                        dep
                    ))
                    .on_node(id),
                );
            }
        }
        [(signals_dep, signals), (prices_dep, prices)] => {
            if any_failed_dep {
                return;
            }
            if !signals.is_dataframe() || signals.signal_column().is_none() {
                errors.push(
                    CompileError::contract(format!(
                        "first dependency '{}' must produce a signal-bearing dataframe",
                        signals_dep
                    ))
                    .on_node(id),
                );
            }
            if !prices.is_dataframe() {
                errors.push(
                    CompileError::contract(format!(
                        "second dependency '{}' must produce a price dataframe",
                        prices_dep
                    ))
                    .on_node(id),
                );
            }
        }
        other => {
            errors.push(
                CompileError::contract(format!(
                    "Backtest requires one signal dataframe or a signals+prices pair, found {} dependencies",
                    other.len()
                ))
                .on_node(id),
            );
        }
    }
}

// ─── Schema constructors ──────────────────────────────────────

/// The dataframe every DataLoader produces.
pub fn ohlcv_frame() -> OutputSchema {
    OutputSchema::Dataframe {
        columns: ["timestamp", "open", "high", "low", "close", "volume"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        required_columns: vec!["timestamp".to_string(), "close".to_string()],
        extra: BTreeMap::new(),
    }
}

/// Input frame plus the indicator's own column, e.g. `sma_20`.
fn indicator_frame(
    input: OutputSchema,
    params: &serde_json::Map<String, serde_json::Value>,
) -> OutputSchema {
    let indicator = params
        .get("indicator")
        .and_then(|v| v.as_str())
        .unwrap_or("indicator")
        .to_lowercase();
    let period = params.get("period").and_then(format_number).unwrap_or_default();
    let column = format!("{}_{}", indicator, period);

    match input {
        OutputSchema::Dataframe {
            mut columns,
            required_columns,
            mut extra,
        } => {
            if !columns.contains(&column) {
                columns.push(column.clone());
            }
            extra.insert("indicator_column".to_string(), serde_json::json!(column));
            OutputSchema::Dataframe {
                columns,
                required_columns,
                extra,
            }
        }
        other => other,
    }
}

/// Input frame plus the configured signal column.
fn signal_frame(
    input: OutputSchema,
    params: &serde_json::Map<String, serde_json::Value>,
) -> OutputSchema {
    let signal = params
        .get("signal_column")
        .and_then(|v| v.as_str())
        .unwrap_or("signal")
        .to_string();

    match input {
        OutputSchema::Dataframe {
            mut columns,
            required_columns,
            mut extra,
        } => {
            if !columns.contains(&signal) {
                columns.push(signal.clone());
            }
            extra.insert("signal_column".to_string(), serde_json::json!(signal));
            OutputSchema::Dataframe {
                columns,
                required_columns,
                extra,
            }
        }
        other => other,
    }
}

/// Render a numeric parameter for use in a column name: integers without
/// a decimal point, anything else as-is.
fn format_number(value: &serde_json::Value) -> Option<String> {
    if let Some(i) = value.as_i64() {
        Some(i.to_string())
    } else {
        value.as_f64().map(|f| f.to_string())
    }
}
