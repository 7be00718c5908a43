use crate::primitives::net::Msg;
use seclayer_channel::ChannelError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Channel failure during protocol execution")]
    Channel(#[from] ChannelError),
    #[error("Received unexpected message. Expected {expected}, got {got:?}")]
    UnexpectedMessage { expected: &'static str, got: Msg },
    #[error("Received {got} elements but expected {expected}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("Worker task failed")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("Unable to establish channel")]
    Io(#[from] io::Error),
    #[error("Protocol error during session setup or teardown")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read config file")]
    Io(#[from] io::Error),
    #[error("Unable to parse config")]
    Yaml(#[from] serde_yaml::Error),
}
