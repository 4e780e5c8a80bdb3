//! Request and response documents.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environment::InterpreterKind;
use crate::error::{EngineError, ErrorKind, TransportError};

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id chosen by the client; echoed in the response.
    #[serde(default)]
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Method-specific parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    /// Creates a request.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Decodes a frame body.
    ///
    /// # Errors
    ///
    /// Returns the id, if one could be recovered from the body (otherwise
    /// `null`), together with the decoding failure.
    pub fn decode(body: &[u8]) -> Result<Self, (Value, TransportError)> {
        let text = std::str::from_utf8(body).map_err(|_| (Value::Null, TransportError::InvalidUtf8))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| (Value::Null, TransportError::Undecodable(e.to_string())))?;
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| (id, TransportError::Undecodable(e.to_string())))
    }
}

/// Error payload of a failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
}

/// Either a result or an error, flattened into the response document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// Method-specific result.
    #[serde(rename = "result")]
    Result(Value),
    /// Failure.
    #[serde(rename = "error")]
    Error(ErrorDescriptor),
}

/// The single answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request being answered.
    pub id: Value,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// A successful response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// A failed response.
    pub fn failure(id: Value, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error(ErrorDescriptor {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Builds a response from an engine result.
    pub fn from_result(id: Value, result: crate::error::Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::failure(id, e.kind(), e.to_string()),
        }
    }

    /// The result payload, if the request succeeded.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    /// The error payload, if the request failed.
    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(error) => Some(error),
        }
    }
}

/// Params of `completion.get` and `hover.get`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionParams {
    /// File the buffer belongs to.
    pub path: PathBuf,
    /// Current, possibly unsaved, buffer text.
    pub buffer: String,
    /// Cursor offset in chars.
    pub offset: usize,
}

/// Params of `diagnostics.run`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferParams {
    /// File the buffer belongs to.
    pub path: PathBuf,
    /// Current, possibly unsaved, buffer text.
    pub buffer: String,
}

/// Params of `format.run`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatParams {
    /// File the buffer belongs to.
    pub path: PathBuf,
    /// Current, possibly unsaved, buffer text.
    pub buffer: String,
    /// Answer with line edits next to the text instead of the bare text.
    #[serde(default)]
    pub edits: bool,
}

/// Params of `environment.set`. Exactly one of the two must be given.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentParams {
    /// Explicit interpreter executable.
    #[serde(default)]
    pub interpreter_path: Option<PathBuf>,
    /// Re-run auto-detection.
    #[serde(default)]
    pub auto: bool,
    /// Restrict auto-detection to one kind.
    #[serde(default)]
    pub kind: Option<InterpreterKind>,
}

/// Params of `workspace.set`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceParams {
    /// New project root.
    pub root: PathBuf,
}

/// A request with its params decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// Liveness probe; echoes its params.
    Ping(Value),
    /// Begin orderly shutdown.
    Shutdown,
    /// Change interpreter.
    EnvironmentSet(EnvironmentParams),
    /// Change project root.
    WorkspaceSet(WorkspaceParams),
    /// Report the current environment.
    Capabilities,
    /// Completion candidates.
    Completion(PositionParams),
    /// Hover documentation.
    Hover(PositionParams),
    /// Format a buffer.
    Format(FormatParams),
    /// Diagnose a buffer.
    Diagnostics(BufferParams),
}

impl Call {
    /// Decodes the params of `method`.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedMethod`] for unknown names,
    /// [`EngineError::InvalidParams`] when params do not fit the method.
    pub fn from_request(method: &str, params: Value) -> Result<Self, EngineError> {
        let call = match method {
            "ping" => Self::Ping(params),
            "shutdown" => Self::Shutdown,
            "environment.set" => {
                let env: EnvironmentParams = decode_params(method, params)?;
                if env.interpreter_path.is_some() == env.auto {
                    return Err(EngineError::InvalidParams(
                        "environment.set needs exactly one of interpreterPath or auto".to_string(),
                    ));
                }
                Self::EnvironmentSet(env)
            }
            "workspace.set" => Self::WorkspaceSet(decode_params(method, params)?),
            "capabilities" => Self::Capabilities,
            "completion.get" => Self::Completion(decode_params(method, params)?),
            "hover.get" => Self::Hover(decode_params(method, params)?),
            "format.run" => Self::Format(decode_params(method, params)?),
            "diagnostics.run" => Self::Diagnostics(decode_params(method, params)?),
            other => return Err(EngineError::UnsupportedMethod(other.to_string())),
        };
        Ok(call)
    }

    /// Whether the call changes engine-wide state.
    pub fn is_environment_affecting(&self) -> bool {
        matches!(
            self,
            Self::Shutdown | Self::EnvironmentSet(_) | Self::WorkspaceSet(_)
        )
    }
}

fn decode_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, EngineError> {
    serde_json::from_value(params).map_err(|e| EngineError::InvalidParams(format!("{method}: {e}")))
}
