//! Resume commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value injected into a paused workflow to resume it.
///
/// Each interrupt inside a node matches resume values in order: the i-th
/// `interrupt` call consumes the i-th value queued for the current node
/// visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    /// Payload handed to the interrupted node.
    pub resume: Value,
}

impl Command {
    /// Create a resume command.
    pub fn resume(value: Value) -> Self {
        Self { resume: value }
    }

    /// Approval-gate convenience: `{approved: true, payload?}`.
    pub fn approve(payload: Option<Value>) -> Self {
        Self::resume(serde_json::json!({
            "approved": true,
            "payload": payload,
        }))
    }

    /// Approval-gate convenience: `{approved: false, feedback}`.
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self::resume(serde_json::json!({
            "approved": false,
            "feedback": feedback.into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approve_shape() {
        let cmd = Command::approve(Some(json!({"note": "lgtm"})));
        assert_eq!(cmd.resume["approved"], true);
        assert_eq!(cmd.resume["payload"]["note"], "lgtm");
    }

    #[test]
    fn reject_shape() {
        let cmd = Command::reject("add tests");
        assert_eq!(cmd.resume["approved"], false);
        assert_eq!(cmd.resume["feedback"], "add tests");
    }
}
