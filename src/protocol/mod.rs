//! Wire protocol between the editor client and the engine.
//!
//! # Architecture
//!
//! - `codec`: `Content-Length` framing over a byte stream
//! - `message`: Request/response documents and the typed method table

pub mod codec;
pub mod message;

pub use codec::{MAX_FRAME_LEN, encode_frame, read_frame, write_frame};
pub use message::{
    BufferParams, Call, EnvironmentParams, ErrorDescriptor, FormatParams, Outcome, PositionParams,
    Request, Response, WorkspaceParams,
};
