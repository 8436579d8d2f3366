//! Tool registry for provider-issued tool invocations.
//!
//! Argument payloads arrive as JSON strings. Each known tool name parses into a typed
//! variant of [`ToolCall`]; anything else becomes [`ToolCall::Unknown`]. Every invocation
//! resolves to a [`ToolInvocation`] carrying either a result or a structured error, so one
//! bad invocation never prevents its siblings from being answered.

mod calculator;
mod changes;

pub use calculator::{Calculator, NumericEvaluator};
pub use changes::{check_policy, ChangeProposal, ChangeProposer, HttpChangeProposer};

use crate::error::ToolError;
use crate::models::AutonomyPolicy;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const TOOL_CALCULATE: &str = "calculate";
pub const TOOL_PROPOSE_CHANGES: &str = "propose_changes";

/// A pending invocation as issued by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string.
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculateMode {
    Sum,
    Product,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalculateArgs {
    #[serde(default)]
    pub mode: Option<CalculateMode>,
    #[serde(default, alias = "numbers")]
    pub values: Vec<f64>,
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProposeChangesArgs {
    pub changes: Vec<serde_json::Value>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Typed view of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Calculate(CalculateArgs),
    ProposeChanges(ProposeChangesArgs),
    Unknown { name: String },
}

impl ToolCall {
    /// Parse a provider request. Known names with malformed arguments are errors;
    /// unknown names are not (they resolve to an "unhandled tool" result later).
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        let raw = if arguments.trim().is_empty() { "{}" } else { arguments };
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: name.to_string(),
            reason: e.to_string(),
        };
        match name {
            TOOL_CALCULATE => {
                let args: CalculateArgs = serde_json::from_str(raw).map_err(invalid)?;
                Ok(Self::Calculate(args))
            }
            TOOL_PROPOSE_CHANGES => {
                let args: ProposeChangesArgs = serde_json::from_str(raw).map_err(invalid)?;
                if args.changes.is_empty() {
                    return Err(ToolError::InvalidArguments {
                        tool: name.to_string(),
                        reason: "changes must not be empty".into(),
                    });
                }
                Ok(Self::ProposeChanges(args))
            }
            other => Ok(Self::Unknown {
                name: other.to_string(),
            }),
        }
    }
}

/// Who the tools act for.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub project_id: String,
    pub owner_id: String,
    pub autonomy: AutonomyPolicy,
}

/// Resolved invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub outcome: Result<serde_json::Value, ToolError>,
}

impl ToolInvocation {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// JSON string submitted back to the provider as this invocation's output.
    pub fn output_payload(&self) -> String {
        let value = match &self.outcome {
            Ok(result) => serde_json::json!({ "ok": true, "result": result }),
            Err(e) => serde_json::json!({
                "ok": false,
                "error": e.code(),
                "message": e.to_string(),
            }),
        };
        value.to_string()
    }
}

/// Fixed name registry over the two known tools.
#[derive(Clone)]
pub struct ToolRegistry {
    evaluator: Arc<dyn NumericEvaluator>,
    proposer: Arc<dyn ChangeProposer>,
}

impl ToolRegistry {
    pub fn new(evaluator: Arc<dyn NumericEvaluator>, proposer: Arc<dyn ChangeProposer>) -> Self {
        Self {
            evaluator,
            proposer,
        }
    }

    /// Function definitions sent with every run, so the model only sees tools this
    /// registry can parse.
    pub fn definitions() -> serde_json::Value {
        serde_json::json!([
            {
                "type": "function",
                "function": {
                    "name": TOOL_CALCULATE,
                    "description": "Exact arithmetic. Use instead of mental math.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "mode": { "type": "string", "enum": ["sum", "product", "expression"] },
                            "values": { "type": "array", "items": { "type": "number" } },
                            "expression": { "type": "string" }
                        },
                        "required": ["mode"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": TOOL_PROPOSE_CHANGES,
                    "description": "Propose changes to the user's goals, tasks or calendar. Applied according to the project's autonomy policy.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "summary": { "type": "string" },
                            "changes": { "type": "array", "items": { "type": "object" } }
                        },
                        "required": ["changes"]
                    }
                }
            }
        ])
    }

    /// Resolve one invocation. Never fails; errors land in `outcome`.
    pub async fn execute(&self, ctx: &ToolContext, request: &ToolRequest) -> ToolInvocation {
        let outcome = match ToolCall::parse(&request.name, &request.arguments) {
            Ok(call) => self.run(ctx, call).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            tracing::warn!(
                target: "cockpit::tools",
                project_id = %ctx.project_id,
                tool = %request.name,
                call_id = %request.id,
                error = %e,
                "Tool invocation failed"
            );
        }
        ToolInvocation {
            id: request.id.clone(),
            name: request.name.clone(),
            arguments: request.arguments.clone(),
            outcome,
        }
    }

    /// Resolve a whole batch concurrently, preserving request order.
    pub async fn execute_batch(
        &self,
        ctx: &ToolContext,
        requests: &[ToolRequest],
    ) -> Vec<ToolInvocation> {
        join_all(requests.iter().map(|r| self.execute(ctx, r))).await
    }

    async fn run(&self, ctx: &ToolContext, call: ToolCall) -> Result<serde_json::Value, ToolError> {
        match call {
            ToolCall::Calculate(args) => self.calculate(args),
            ToolCall::ProposeChanges(args) => {
                check_policy(ctx.autonomy)?;
                let proposal = ChangeProposal {
                    project_id: ctx.project_id.clone(),
                    owner_id: ctx.owner_id.clone(),
                    policy: ctx.autonomy,
                    summary: args.summary,
                    changes: args.changes,
                };
                self.proposer.propose(&proposal).await
            }
            ToolCall::Unknown { name } => Err(ToolError::Unhandled(name)),
        }
    }

    fn calculate(&self, args: CalculateArgs) -> Result<serde_json::Value, ToolError> {
        let mode = match (args.mode, args.expression.as_deref()) {
            (Some(m), _) => m,
            (None, Some(_)) => CalculateMode::Expression,
            (None, None) => CalculateMode::Sum,
        };
        let value = match mode {
            CalculateMode::Sum => self.evaluator.sum(&args.values)?,
            CalculateMode::Product => self.evaluator.product(&args.values)?,
            CalculateMode::Expression => {
                let expr = args.expression.as_deref().unwrap_or("").trim();
                if expr.is_empty() {
                    return Err(ToolError::InvalidArguments {
                        tool: TOOL_CALCULATE.to_string(),
                        reason: "expression mode needs an expression".into(),
                    });
                }
                self.evaluator.expression(expr)?
            }
        };
        Ok(serde_json::json!({ "mode": mode, "value": value }))
    }
}
