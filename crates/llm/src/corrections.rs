//! Correction side-channel
//!
//! The generator offers the model a single `report_corrections` tool.
//! Its arguments arrive as fragments spread over many stream chunks and
//! are reassembled here before being parsed.

use std::collections::BTreeMap;

use parley_core::{Correction, CorrectionCategory};
use serde::Deserialize;
use serde_json::{json, Value};

/// Name of the correction-reporting tool
pub const REPORT_CORRECTIONS: &str = "report_corrections";

/// Distinct tool calls tracked per response; fragments for further
/// indices are dropped
pub const MAX_TOOL_CALLS: usize = 8;

/// Tool definition in chat-completions format
pub fn report_corrections_tool() -> Value {
    let categories: Vec<&str> = CorrectionCategory::ALL.iter().map(|c| c.as_str()).collect();

    json!({
        "type": "function",
        "function": {
            "name": REPORT_CORRECTIONS,
            "description": "Report language errors found in the user's latest message",
            "parameters": {
                "type": "object",
                "properties": {
                    "corrections": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "category": {
                                    "type": "string",
                                    "enum": categories,
                                },
                                "original": {
                                    "type": "string",
                                    "description": "The incorrect fragment from the user's message",
                                },
                                "correction": {
                                    "type": "string",
                                    "description": "The corrected version",
                                },
                                "explanation": {
                                    "type": "string",
                                    "description": "Brief explanation in the user's native language",
                                },
                            },
                            "required": ["category", "original", "correction", "explanation"],
                        },
                    },
                },
                "required": ["corrections"],
            },
        },
    })
}

/// One streamed fragment of a tool call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// A tool call reassembled from its fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    /// Merge fragments into per-index accumulators
    ///
    /// The first non-empty id and name win; argument fragments are
    /// concatenated in arrival order. Indices are provider-chosen, so a
    /// new index is only opened while fewer than [`MAX_TOOL_CALLS`] are
    /// being tracked.
    pub fn absorb(calls: &mut BTreeMap<usize, ToolCallAccumulator>, deltas: &[ToolCallDelta]) {
        for delta in deltas {
            if !calls.contains_key(&delta.index) && calls.len() >= MAX_TOOL_CALLS {
                tracing::debug!(index = delta.index, "Ignoring tool call fragment past limit");
                continue;
            }
            let call = calls.entry(delta.index).or_default();

            if call.id.is_empty() {
                if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
                    call.id = id.to_string();
                }
            }

            if let Some(function) = &delta.function {
                if call.name.is_empty() {
                    if let Some(name) = function.name.as_deref().filter(|n| !n.is_empty()) {
                        call.name = name.to_string();
                    }
                }
                if let Some(arguments) = &function.arguments {
                    call.arguments.push_str(arguments);
                }
            }
        }
    }

    pub fn is_report(&self) -> bool {
        self.name == REPORT_CORRECTIONS
    }

    /// Corrections carried by this call; a call that never streamed any
    /// arguments reports nothing
    pub fn corrections(&self) -> Vec<Correction> {
        if self.arguments.trim().is_empty() {
            return Vec::new();
        }
        parse_corrections(&self.arguments)
    }
}

#[derive(Deserialize)]
struct ReportArguments {
    corrections: Vec<Correction>,
}

/// Parse the arguments of a `report_corrections` call
///
/// Malformed or schema-violating arguments yield no corrections; the
/// reply itself is unaffected.
pub fn parse_corrections(arguments: &str) -> Vec<Correction> {
    match serde_json::from_str::<ReportArguments>(arguments) {
        Ok(report) => report.corrections,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding malformed correction report");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            function: Some(FunctionDelta {
                name: name.map(String::from),
                arguments: args.map(String::from),
            }),
        }
    }

    #[test]
    fn test_fragments_are_reassembled() {
        let mut calls = BTreeMap::new();
        ToolCallAccumulator::absorb(
            &mut calls,
            &[delta(0, Some("call_1"), Some(REPORT_CORRECTIONS), Some("{\"correc"))],
        );
        ToolCallAccumulator::absorb(&mut calls, &[delta(0, Some(""), Some(""), Some("tions\":[]}"))]);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[&0].id, "call_1");
        assert!(calls[&0].is_report());
        assert_eq!(calls[&0].arguments, "{\"corrections\":[]}");
    }

    #[test]
    fn test_calls_are_tracked_by_index() {
        let mut calls = BTreeMap::new();
        ToolCallAccumulator::absorb(
            &mut calls,
            &[
                delta(1, Some("call_b"), Some("other"), Some("{}")),
                delta(0, Some("call_a"), Some(REPORT_CORRECTIONS), Some("{")),
            ],
        );

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[&0].id, "call_a");
        assert_eq!(calls[&1].name, "other");
    }

    #[test]
    fn test_huge_index_is_sparse() {
        let mut calls = BTreeMap::new();
        ToolCallAccumulator::absorb(
            &mut calls,
            &[
                delta(usize::MAX, Some("call_x"), Some("other"), Some("{}")),
                delta(1_000_000_000, Some("call_r"), Some(REPORT_CORRECTIONS), Some("{")),
            ],
        );

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[&usize::MAX].id, "call_x");
        assert!(calls[&1_000_000_000].is_report());
    }

    #[test]
    fn test_calls_past_limit_are_ignored() {
        let mut calls = BTreeMap::new();
        let deltas: Vec<ToolCallDelta> = (0..MAX_TOOL_CALLS + 4)
            .map(|i| delta(i * 1000, Some("call"), Some("other"), Some("{}")))
            .collect();
        ToolCallAccumulator::absorb(&mut calls, &deltas);
        assert_eq!(calls.len(), MAX_TOOL_CALLS);

        // Already-tracked indices keep accepting fragments
        ToolCallAccumulator::absorb(&mut calls, &[delta(0, None, None, Some(" "))]);
        ToolCallAccumulator::absorb(&mut calls, &[delta(1, Some("late"), Some(REPORT_CORRECTIONS), None)]);
        assert_eq!(calls[&0].arguments, "{} ");
        assert!(!calls.contains_key(&1));
        assert_eq!(calls.len(), MAX_TOOL_CALLS);
    }

    #[test]
    fn test_empty_arguments_report_nothing() {
        let call = ToolCallAccumulator {
            id: "call_1".to_string(),
            name: REPORT_CORRECTIONS.to_string(),
            arguments: "  ".to_string(),
        };
        assert!(call.corrections().is_empty());

        let call = ToolCallAccumulator {
            arguments: r#"{"corrections":[{"category":"spelling","original":"ola","correction":"hola","explanation":"Silent h"}]}"#.to_string(),
            ..call
        };
        assert_eq!(call.corrections()[0].category, CorrectionCategory::Spelling);
    }

    #[test]
    fn test_parse_corrections() {
        let args = r#"{"corrections":[{"category":"word order","original":"rojo coche","correction":"coche rojo","explanation":"Adjectives usually follow the noun"}]}"#;
        let corrections = parse_corrections(args);

        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].category, CorrectionCategory::WordOrder);
        assert_eq!(corrections[0].correction, "coche rojo");
    }

    #[test]
    fn test_malformed_arguments_yield_nothing() {
        assert!(parse_corrections("{\"corrections\":[{\"category\":").is_empty());
        assert!(parse_corrections(r#"{"corrections":[{"category":"tone","original":"a","correction":"b","explanation":"c"}]}"#).is_empty());
        assert!(parse_corrections("").is_empty());
    }

    #[test]
    fn test_tool_schema_lists_categories() {
        let tool = report_corrections_tool();
        let categories = &tool["function"]["parameters"]["properties"]["corrections"]["items"]
            ["properties"]["category"]["enum"];

        assert_eq!(tool["function"]["name"], REPORT_CORRECTIONS);
        assert_eq!(categories.as_array().map(|a| a.len()), Some(5));
        assert!(categories.as_array().unwrap().contains(&json!("word order")));
    }
}
