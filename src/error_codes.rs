use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    /// Bad timecode table or room config. Fix the file, not the runtime.
    Config,
    Usage,
    /// Anything that went wrong while running, e.g. an unreadable script.
    Runtime,
}

impl CodedErrorKind {
    /// Process exit status for `stevesroom` when this kind ends a command.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Runtime => 1,
            Self::Usage => 2,
            Self::Config => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Config,
        }
    }

    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn runtime(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Runtime,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                kind: self.kind,
                exit_code: self.kind.exit_code(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub kind: CodedErrorKind,
    pub exit_code: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};
    use serde_json::json;

    use super::{find_coded_error, CodedError, CodedErrorKind};

    #[test]
    fn coded_error_survives_context_wrapping() {
        let error = Err::<(), _>(anyhow!(CodedError::config(
            "UNKNOWN_SUCCESSOR",
            "transition 'intro' names unknown next_state 'nowhere'",
        )))
        .context("failed to load timecodes")
        .unwrap_err();

        let coded = find_coded_error(&error).expect("coded error in chain");
        assert_eq!(coded.code, "UNKNOWN_SUCCESSOR");
        assert_eq!(coded.kind, CodedErrorKind::Config);
        assert_eq!(coded.kind.exit_code(), 3);
    }

    #[test]
    fn envelope_omits_missing_details() {
        let plain = serde_json::to_value(CodedError::usage("EMPTY_SCRIPT", "nothing to do").envelope())
            .expect("serialize");
        assert_eq!(plain["ok"], json!(false));
        assert_eq!(plain["error"]["kind"], json!("usage"));
        assert_eq!(plain["error"]["exit_code"], json!(2));
        assert!(plain["error"].get("details").is_none());

        let detailed = CodedError::usage("EMPTY_SCRIPT", "nothing to do")
            .with_details(json!({ "path": "give_up.rehearsal" }))
            .envelope();
        assert_eq!(detailed.error.details, Some(json!({ "path": "give_up.rehearsal" })));
    }
}
