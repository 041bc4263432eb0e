//! Shared streaming-body plumbing for the adapters.

use bytes::Bytes;
use eventsource_stream::{Event, Eventsource};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};

use crate::error::RouterError;
use crate::types::Provider;

/// A boxed SSE event stream with transport errors already mapped.
pub(crate) type EventStream = BoxStream<'static, Result<Event, RouterError>>;

/// A boxed raw byte stream with transport errors already mapped.
pub(crate) type ByteStream = BoxStream<'static, Result<Bytes, RouterError>>;

/// Wraps an HTTP response body as an SSE event stream.
pub(crate) fn event_stream(provider: Provider, response: reqwest::Response) -> EventStream {
    response
        .bytes_stream()
        .eventsource()
        .map_err(move |e| {
            RouterError::server_error(provider, "stream read failed").with_cause(e)
        })
        .boxed()
}

/// Wraps an HTTP response body as a raw byte stream.
pub(crate) fn byte_stream(provider: Provider, response: reqwest::Response) -> ByteStream {
    response
        .bytes_stream()
        .map_err(move |e| {
            RouterError::server_error(provider, "stream read failed").with_cause(e)
        })
        .boxed()
}
