//! Message based communication with the remote party.
use crate::errors::ProtocolError;
use crate::metrics::CommReport;
use bitvec::vec::BitVec;
use futures::{SinkExt, Sink, Stream, StreamExt};
use seclayer_channel::{into_boxed_parts, BoxSink, BoxStream, ChannelError, InMemory};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::mem;
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Msg {
    Seed([u8; 32]),
    Elements(Vec<u64>),
    Bits(BitVec),
    Report(CommReport),
    Sync,
}

/// A channel endpoint which counts the bytes it sends and the rounds it takes part in.
pub struct NetIo {
    sink: BoxSink<Msg>,
    stream: BoxStream<Msg>,
    bytes_sent: u64,
    rounds: u64,
}

impl NetIo {
    pub fn new<C, E>(channel: C) -> Self
    where
        C: Sink<Msg> + Stream<Item = Result<Msg, E>> + Send + 'static,
        <C as Sink<Msg>>::Error: StdError + Send + Sync + 'static,
        E: StdError + Send + Sync + 'static,
    {
        let (sink, stream) = into_boxed_parts(channel);
        Self {
            sink,
            stream,
            bytes_sent: 0,
            rounds: 0,
        }
    }

    pub fn new_in_memory_pair() -> (Self, Self) {
        let (ch1, ch2) = InMemory::new_pair();
        (Self::new(ch1), Self::new(ch2))
    }

    /// Bytes sent so far. A message accounts for its serialized size plus a length prefix.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    fn wire_size(msg: &Msg) -> u64 {
        bincode::serialized_size(msg).unwrap_or_default() + mem::size_of::<u32>() as u64
    }

    pub async fn send(&mut self, msg: Msg) -> Result<(), ProtocolError> {
        self.bytes_sent += Self::wire_size(&msg);
        self.rounds += 1;
        trace!(?msg, "Sending");
        self.sink.send(msg).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Msg, ProtocolError> {
        let msg = self.stream.next().await.ok_or(ChannelError::RemoteClosed)??;
        trace!(?msg, "Received");
        Ok(msg)
    }

    /// Send `msg` and receive the message the remote sends in the same round. Sending and
    /// receiving happen concurrently so that both parties may call this at the same time.
    pub async fn exchange(&mut self, msg: Msg) -> Result<Msg, ProtocolError> {
        self.bytes_sent += Self::wire_size(&msg);
        self.rounds += 1;
        let (sent, received) = futures::join!(self.sink.send(msg), self.stream.next());
        sent?;
        Ok(received.ok_or(ChannelError::RemoteClosed)??)
    }

    pub async fn exchange_elements(&mut self, values: Vec<u64>) -> Result<Vec<u64>, ProtocolError> {
        let expected = values.len();
        match self.exchange(Msg::Elements(values)).await? {
            Msg::Elements(remote) if remote.len() == expected => Ok(remote),
            Msg::Elements(remote) => Err(ProtocolError::LengthMismatch {
                expected,
                got: remote.len(),
            }),
            got => Err(ProtocolError::UnexpectedMessage {
                expected: "Elements",
                got,
            }),
        }
    }

    pub async fn exchange_bits(&mut self, bits: BitVec) -> Result<BitVec, ProtocolError> {
        let expected = bits.len();
        match self.exchange(Msg::Bits(bits)).await? {
            Msg::Bits(remote) if remote.len() == expected => Ok(remote),
            Msg::Bits(remote) => Err(ProtocolError::LengthMismatch {
                expected,
                got: remote.len(),
            }),
            got => Err(ProtocolError::UnexpectedMessage {
                expected: "Bits",
                got,
            }),
        }
    }

    pub async fn recv_elements(&mut self, expected: usize) -> Result<Vec<u64>, ProtocolError> {
        match self.recv().await? {
            Msg::Elements(remote) if remote.len() == expected => Ok(remote),
            Msg::Elements(remote) => Err(ProtocolError::LengthMismatch {
                expected,
                got: remote.len(),
            }),
            got => Err(ProtocolError::UnexpectedMessage {
                expected: "Elements",
                got,
            }),
        }
    }

    /// Returns once both parties have called `sync`.
    pub async fn sync(&mut self) -> Result<(), ProtocolError> {
        match self.exchange(Msg::Sync).await? {
            Msg::Sync => Ok(()),
            got => Err(ProtocolError::UnexpectedMessage {
                expected: "Sync",
                got,
            }),
        }
    }
}
