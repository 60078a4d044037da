//! Wire protocol for the StrataDB native driver: magic preamble,
//! length-prefixed MessagePack frames, control messages and transaction
//! envelopes.

pub mod codec;
pub mod message;

pub use codec::{
    decode_frame, encode_frame, write_magic, FrameReader, FrameWriter, DRIVER_MAGIC,
    MAX_MESSAGE_SIZE,
};
pub use message::{
    ControlBody, ControlRequest, ControlResponse, RequestBody, RequestEnvelope, ResponseBody,
    ResponseEnvelope, StreamSignal, DRIVER_LANG, DRIVER_VERSION, PROTOCOL_VERSION,
};
