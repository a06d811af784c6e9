//! Exchange protocol
//!
//! Fixed-header binary frames and the session-keyed request queue that
//! matches responses to the requests that caused them.

pub mod codec;
pub mod exchange;
pub mod queue;

pub use codec::CodecError;
pub use exchange::{
    Exchange, ExchangeType, FrameError, ProtocolError, Status, Version, HEADER_LEN, MAX_PAYLOAD,
};
pub use queue::{QueueOptions, RequestQueue, SessionTable};
