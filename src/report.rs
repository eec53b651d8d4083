//! Rendering export outcomes for terminal and machine consumers

use crate::export::ExportOutcome;
use crate::symbol::ReflectionPayload;
use serde_json::{Map, Value};

/// Structured and human-readable forms of an export outcome
#[derive(Debug, Clone)]
pub struct RenderedOutcome {
    /// JSON for downstream consumers
    pub json: Value,
    /// Lines for terminal presentation
    pub human: Vec<String>,
}

/// Render `outcome` for the export of `payload`.
pub fn render_outcome(
    outcome: &ExportOutcome,
    payload: Option<&ReflectionPayload>,
) -> RenderedOutcome {
    RenderedOutcome {
        json: outcome_value(outcome, payload),
        human: human_lines(outcome, payload),
    }
}

/// JSON object describing the outcome
pub fn outcome_value(outcome: &ExportOutcome, payload: Option<&ReflectionPayload>) -> Value {
    let mut root = match serde_json::to_value(outcome) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert(
                "outcome".to_string(),
                Value::String(outcome.label().to_string()),
            );
            map
        }
    };
    if let Some(payload) = payload {
        root.insert(
            "payload".to_string(),
            Value::String(payload.as_str().to_string()),
        );
    }
    root.insert("delivered".to_string(), Value::Bool(outcome.is_delivered()));
    Value::Object(root)
}

fn human_lines(outcome: &ExportOutcome, payload: Option<&ReflectionPayload>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(payload) = payload {
        lines.push(format!("Reveal URL: {payload}"));
    }
    match outcome {
        ExportOutcome::Shared => lines.push("QR code shared".to_string()),
        ExportOutcome::Downloaded { location: Some(path) } => {
            lines.push(format!("QR code saved to {}", path.display()))
        }
        ExportOutcome::Downloaded { location: None } => {
            lines.push("QR code downloaded".to_string())
        }
        ExportOutcome::Cancelled => lines.push("Sharing cancelled".to_string()),
        ExportOutcome::Busy => lines.push("An export is already running".to_string()),
        ExportOutcome::Superseded => {
            lines.push("Export discarded: a newer QR code was requested".to_string())
        }
        ExportOutcome::Failed(reason) => {
            lines.push("Export failed".to_string());
            lines.push(format!("  Reason: {}", reason.detail));
        }
    }
    lines
}
