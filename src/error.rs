//! 信号処理と OSC 送受信のエラー型

use std::net::SocketAddr;

use thiserror::Error;

use crate::signal::PersonId;

/// 信号側のエラー。いずれも回復可能で、該当フレームを捨てる (または未定義とする) だけで処理は続く
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("Shape error: expected {expected_rows}x{expected_width}, got {rows}x{width}")]
    Shape {
        expected_rows: usize,
        expected_width: usize,
        rows: usize,
        width: usize,
    },

    #[error("Order error: person {person} frame {frame} is before last frame {last}")]
    Order {
        person: PersonId,
        frame: u64,
        last: u64,
    },

    #[error("Insufficient data at frame {frame}: {valid} valid keypoints, need {required}")]
    InsufficientData {
        frame: u64,
        valid: usize,
        required: usize,
    },

    #[error("Unknown person: {0}")]
    UnknownPerson(PersonId),
}

/// 信号処理の Result
pub type SignalResult<T> = Result<T, SignalError>;

/// 送受信のエラー
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket failure while listening: {0}")]
    Socket(#[source] std::io::Error),

    #[error("OSC encode error: {0}")]
    Encode(String),

    #[error("Invalid OSC address: {0}")]
    InvalidAddress(String),

    #[error("Cannot resolve {0}")]
    Resolve(String),

    #[error("Server is {0:?}, expected {1:?}")]
    InvalidState(crate::osc::ServerState, crate::osc::ServerState),
}

/// ディスパッチしたメッセージのハンドラ失敗。ルーターがログに出し、受信ループからは返さない
#[derive(Error, Debug)]
#[error("Handler for {pattern} failed on {addr}: {reason}")]
pub struct HandlerError {
    pub pattern: String,
    pub addr: String,
    pub reason: String,
}
