use serde::{Deserialize, Serialize};

/// One event streamed by the executor for a single request.
///
/// On the wire each event is a JSON object tagged by `type`
/// (`{"type":"text","delta":"..."}`), one object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DispatchEvent {
    /// First event of a brand-new session.
    Init { session_id: String },
    /// Incremental output. Deltas are concatenated, never replaced.
    Text { delta: String },
    ToolStart { tool: String },
    ToolEnd,
    /// Terminal success.
    Result {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Executor-raised failure (unknown session, internal error, ...).
    Error { message: String },
    /// A gated action is waiting for a human decision.
    ApprovalRequired {
        id: String,
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl DispatchEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::Text {
            delta: delta.into(),
        }
    }

    pub fn init(session_id: impl Into<String>) -> Self {
        Self::Init {
            session_id: session_id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Text { .. } => "text",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::ApprovalRequired { .. } => "approval_required",
        }
    }
}
