use crate::compiler::CompiledNode;
use crate::runner::NodeRunner;
use crate::types::{ExecutionContext, ExecutionResult, OutputSchema, RuntimeKind};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;

/// In-process runner for the trusted built-in node types.
///
/// These are deterministic reference implementations: they materialize
/// outputs in the exact shape the contract checker inferred, without
/// sandboxing. Nodes are black boxes to the engine, so the reference
/// implementations stay intentionally minimal — orchestration is what
/// the core guarantees, not indicator numerics.
pub struct BuiltinRunner;

impl BuiltinRunner {
    pub fn new() -> Self {
        BuiltinRunner
    }
}

impl Default for BuiltinRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRunner for BuiltinRunner {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn can_handle(&self, node: &CompiledNode) -> bool {
        node.runtime == RuntimeKind::Builtin
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &BTreeMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        match node.node_type.as_str() {
            "DataLoader" => {
                let mut output = materialize(&node.output_schema);
                if let Some(obj) = output.as_object_mut() {
                    for key in ["symbol", "timeframe", "dataset"] {
                        if let Some(value) = node.parameters.get(key) {
                            obj.insert(key.to_string(), value.clone());
                        }
                    }
                    // Resolve the logical dataset name against the run's
                    // dataset map when the caller seeded one.
                    if let Some(name) = node.parameters.get("dataset").and_then(|v| v.as_str()) {
                        if let Some(path) = ctx.datasets.get(name) {
                            obj.insert("dataset_path".to_string(), json!(path.display().to_string()));
                        }
                    }
                }
                ExecutionResult::success(&node.id, output, elapsed(started))
            }
            "Indicator" | "CrossoverSignal" => {
                // Pass-through transforms: the output keeps the input's
                // rows and gains the column the schema promised.
                for dep in &node.dependencies {
                    if !inputs.contains_key(dep) {
                        return ExecutionResult::failure(
                            &node.id,
                            format!("missing input from dependency '{}'", dep),
                            elapsed(started),
                        );
                    }
                }
                let mut output = materialize(&node.output_schema);
                if let (Some(obj), Some(first)) = (
                    output.as_object_mut(),
                    node.dependencies.first().and_then(|d| inputs.get(d)),
                ) {
                    if let Some(rows) = first.get("rows") {
                        obj.insert("rows".to_string(), rows.clone());
                    }
                }
                ExecutionResult::success(&node.id, output, elapsed(started))
            }
            "Backtest" => {
                let mut output = materialize(&node.output_schema);
                if let Some(obj) = output.as_object_mut() {
                    if let Some(capital) = node.parameters.get("initial_capital") {
                        obj.insert("initial_capital".to_string(), capital.clone());
                    }
                }
                ExecutionResult::success(&node.id, output, elapsed(started))
            }
            other => ExecutionResult::failure(
                &node.id,
                format!("no built-in implementation for node type '{}'", other),
                elapsed(started),
            ),
        }
    }
}

/// Build a trivial, well-formed output document matching a schema.
fn materialize(schema: &OutputSchema) -> serde_json::Value {
    match schema {
        OutputSchema::Dataframe { columns, .. } => json!({
            "type": "dataframe",
            "columns": columns,
            "rows": [],
        }),
        OutputSchema::BacktestResults { metrics, trade_log } => {
            let zeroed: serde_json::Map<String, serde_json::Value> = metrics
                .iter()
                .map(|m| (m.clone(), json!(0.0)))
                .collect();
            let mut doc = json!({
                "type": "backtest_results",
                "metrics": zeroed,
            });
            if *trade_log {
                doc["trade_log"] = json!([]);
            }
            doc
        }
        OutputSchema::Null => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::contracts::ohlcv_frame;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            run_id: Uuid::now_v7(),
            pipeline_id: "builtin-test".to_string(),
            working_dir: std::env::temp_dir().join("quantpipe-builtin-tests"),
            datasets: BTreeMap::new(),
        }
    }

    fn node(id: &str, node_type: &str, deps: &[&str], schema: OutputSchema) -> CompiledNode {
        CompiledNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            runtime: RuntimeKind::Builtin,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            parameters: serde_json::Map::new(),
            input_schema: None,
            output_schema: schema,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_dataloader_output_shape() {
        let runner = BuiltinRunner::new();
        let mut n = node("prices", "DataLoader", &[], ohlcv_frame());
        n.parameters.insert("symbol".to_string(), json!("BTC/USD"));
        n.parameters.insert("dataset".to_string(), json!("btc.csv"));

        let result = runner.execute(&n, &BTreeMap::new(), &ctx()).await;
        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["type"], "dataframe");
        assert_eq!(output["symbol"], "BTC/USD");
        assert_eq!(output["columns"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_dataset_path_resolved() {
        let runner = BuiltinRunner::new();
        let mut n = node("prices", "DataLoader", &[], ohlcv_frame());
        n.parameters.insert("dataset".to_string(), json!("btc.csv"));

        let mut c = ctx();
        c.datasets
            .insert("btc.csv".to_string(), "/data/btc.csv".into());
        let result = runner.execute(&n, &BTreeMap::new(), &c).await;
        assert_eq!(result.output.unwrap()["dataset_path"], "/data/btc.csv");
    }

    #[tokio::test]
    async fn test_indicator_requires_inputs_present() {
        let runner = BuiltinRunner::new();
        let n = node("fast", "Indicator", &["prices"], ohlcv_frame());
        let result = runner.execute(&n, &BTreeMap::new(), &ctx()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("'prices'"));
    }

    #[tokio::test]
    async fn test_indicator_passes_rows_through() {
        let runner = BuiltinRunner::new();
        let n = node("fast", "Indicator", &["prices"], ohlcv_frame());
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "prices".to_string(),
            json!({"type": "dataframe", "rows": [[1, 2.0]]}),
        );
        let result = runner.execute(&n, &inputs, &ctx()).await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["rows"], json!([[1, 2.0]]));
    }

    #[tokio::test]
    async fn test_backtest_zeroed_metrics() {
        let runner = BuiltinRunner::new();
        let schema = OutputSchema::BacktestResults {
            metrics: vec!["total_return".to_string(), "sharpe_ratio".to_string()],
            trade_log: true,
        };
        let mut n = node("bt", "Backtest", &["sig"], schema);
        n.parameters
            .insert("initial_capital".to_string(), json!(10000));

        let mut inputs = BTreeMap::new();
        inputs.insert("sig".to_string(), json!({"type": "dataframe"}));
        let result = runner.execute(&n, &inputs, &ctx()).await;
        assert!(result.success);
        let output = result.output.unwrap();
        assert_eq!(output["type"], "backtest_results");
        assert_eq!(output["metrics"]["sharpe_ratio"], 0.0);
        assert_eq!(output["trade_log"], json!([]));
        assert_eq!(output["initial_capital"], 10000);
    }

    #[tokio::test]
    async fn test_unknown_builtin_type_fails() {
        let runner = BuiltinRunner::new();
        let n = node("x", "Mystery", &[], OutputSchema::Null);
        let result = runner.execute(&n, &BTreeMap::new(), &ctx()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Mystery"));
    }

    #[test]
    fn test_only_builtin_runtime_handled() {
        let runner = BuiltinRunner::new();
        let n = node("x", "DataLoader", &[], OutputSchema::Null);
        assert!(runner.can_handle(&n));
        let mut sandboxed = n;
        sandboxed.runtime = RuntimeKind::Python;
        assert!(!runner.can_handle(&sandboxed));
    }
}
