//! Point-to-point channels connecting the two parties of a session.
//!
//! Concrete transports implement [`Sink`] for outgoing items and [`Stream`] of results for
//! incoming ones. [`into_boxed_parts`] erases the transport so that protocol code can hold a
//! send half and a receive half without being generic over it.
use futures::{Sink, SinkExt, Stream, StreamExt, TryStreamExt};
use std::error::Error as StdError;
use std::pin::Pin;

pub use in_memory::InMemory;
pub use tcp::Tcp;

pub mod in_memory;
pub mod tcp;

pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Unable to send value to remote")]
    Send(#[source] BoxError),
    #[error("Unable to receive value from remote")]
    Recv(#[source] BoxError),
    #[error("Remote closed the channel")]
    RemoteClosed,
}

pub type BoxSink<Item> = Pin<Box<dyn Sink<Item, Error = ChannelError> + Send>>;
pub type BoxStream<Item> = Pin<Box<dyn Stream<Item = Result<Item, ChannelError>> + Send>>;

/// Split a channel into a type erased sending and receiving half.
///
/// The halves can be polled concurrently, which is needed when both parties send before they
/// receive.
pub fn into_boxed_parts<Item, C, E>(channel: C) -> (BoxSink<Item>, BoxStream<Item>)
where
    C: Sink<Item> + Stream<Item = Result<Item, E>> + Send + 'static,
    <C as Sink<Item>>::Error: StdError + Send + Sync + 'static,
    E: StdError + Send + Sync + 'static,
    Item: Send + 'static,
{
    let (sink, stream) = channel.split();
    let sink = sink.sink_map_err(|err| ChannelError::Send(Box::new(err)));
    let stream = stream.map_err(|err| ChannelError::Recv(Box::new(err)));
    (Box::pin(sink), Box::pin(stream))
}
