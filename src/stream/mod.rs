//! Line-delimited event stream decoding.

mod decoder;

pub use decoder::{decode_stream, parse_line, EventDecoder, Frame};

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

/// Raw body of a running turn, as handed out by the agent service.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;
