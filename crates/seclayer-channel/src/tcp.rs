//! TCP implementation of a channel.
use futures::{Sink, Stream};
use pin_project::pin_project;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::Instant;
use tokio_serde::formats::SymmetricalBincode;
use tokio_serde::SymmetricallyFramed;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info};

type SinkPart<Item> = SymmetricallyFramed<
    FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    Item,
    SymmetricalBincode<Item>,
>;

type StreamPart<Item> = SymmetricallyFramed<
    FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    Item,
    SymmetricalBincode<Item>,
>;

/// Length delimited, bincode serialized values over a TCP connection.
#[pin_project]
pub struct Tcp<Item> {
    #[pin]
    sender: SinkPart<Item>,
    #[pin]
    receiver: StreamPart<Item>,
}

impl<Item: DeserializeOwned> Stream for Tcp<Item> {
    type Item = Result<Item, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        this.receiver.poll_next(cx)
    }
}

impl<Item: Serialize> Sink<Item> for Tcp<Item> {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.sender.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Item) -> Result<(), Self::Error> {
        let this = self.project();
        this.sender.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.sender.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.sender.poll_close(cx)
    }
}

impl<Item> Tcp<Item> {
    #[tracing::instrument(err)]
    pub async fn listen(addr: impl ToSocketAddrs + Debug) -> Result<Self, io::Error> {
        info!("Listening for connections");
        let listener = TcpListener::bind(addr).await?;
        let (socket, remote_addr) = listener.accept().await?;
        info!(?remote_addr, "Established connection to remote");
        // send data ASAP
        socket.set_nodelay(true)?;
        Ok(Self::from_tcp_stream(socket))
    }

    #[tracing::instrument(err)]
    pub async fn connect(addr: impl ToSocketAddrs + Debug) -> Result<Self, io::Error> {
        info!("Connecting to remote");
        let socket = TcpStream::connect(addr).await?;
        // send data ASAP
        socket.set_nodelay(true)?;
        Ok(Self::from_tcp_stream(socket))
    }

    /// Connect to remote and retry upon failure for `timeout` time.
    #[tracing::instrument(err)]
    pub async fn connect_with_timeout(
        addr: impl ToSocketAddrs + Debug,
        timeout: Duration,
    ) -> Result<Self, io::Error> {
        info!("Connecting to remote with timeout {timeout:?}");
        let mut wait = Duration::from_millis(10);
        let exp_wait_factor = 1.2;
        let start = Instant::now();
        loop {
            match TcpStream::connect(&addr).await {
                Ok(socket) => {
                    socket.set_nodelay(true)?;
                    info!("Established connection to remote");
                    return Ok(Self::from_tcp_stream(socket));
                }
                Err(err) if start.elapsed() >= timeout => return Err(err),
                Err(err) => {
                    debug!(%err, ?wait, "Connection attempt failed, retrying");
                    tokio::time::sleep(wait).await;
                    wait = Duration::from_millis(
                        (wait.as_millis() as f64 * exp_wait_factor) as u64,
                    );
                }
            }
        }
    }

    /// For testing purposes. Create two parties communicating via TcpStreams on localhost:port
    /// If None is supplied, a random available port is selected
    pub async fn new_local_pair(port: Option<u16>) -> Result<(Self, Self), io::Error> {
        // use port 0 to bind to available random one
        let mut port = port.unwrap_or(0);
        let addr = ("127.0.0.1", port);
        let listener = TcpListener::bind(addr).await?;
        if port == 0 {
            // get the actual port bound to
            port = listener.local_addr()?.port();
        }
        let addr = ("127.0.0.1", port);
        let accept = async {
            let (socket, _) = listener.accept().await?;
            socket.set_nodelay(true)?;
            Ok(Self::from_tcp_stream(socket))
        };
        let (server, client) = tokio::try_join!(accept, Self::connect(addr))?;
        Ok((server, client))
    }

    fn from_tcp_stream(socket: TcpStream) -> Self {
        let (read_half, write_half) = socket.into_split();
        let framed_read = FramedRead::new(read_half, LengthDelimitedCodec::new());
        let framed_write = FramedWrite::new(write_half, LengthDelimitedCodec::new());
        let receiver = SymmetricallyFramed::new(framed_read, SymmetricalBincode::<Item>::default());
        let sender = SymmetricallyFramed::new(framed_write, SymmetricalBincode::<Item>::default());
        Self { sender, receiver }
    }
}
