//! Transport of encoded messages between a session and the server.
//!
//! The server speaks ZeroMQ REQ/REP over tcp. A send must be followed by exactly one receive before
//! the next send. The session handles retries, a transport only reports whether one raw attempt
//! could complete.


use std::time::Duration;

use crate::error::{ClientError, Result};

/// outcome of a failed raw send or receive
#[derive(Debug)]
pub enum TransportError {
    /// could not complete now (zmq EAGAIN), may succeed later
    NotReady,
    /// anything else
    Failed(String),
}

/// a request/reply message transport. One per session, never shared.
pub trait Transport {
    /// one attempt at sending a message
    fn send(&mut self, msg: &[u8]) -> std::result::Result<(), TransportError>;
    /// one attempt at receiving a message, bounded by the transport receive timeout
    fn recv(&mut self) -> std::result::Result<Vec<u8>, TransportError>;
    /// drop and recreate the underlying connection after the peer stopped answering.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
    /// a description of the peer for logs
    fn endpoint(&self) -> String;
}

/// receive timeout of one raw attempt
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ZmqTransport {
    /// tcp://host:port
    endpoint: String,
    recv_timeout: Duration,
    // Socket keeps an Arc to the Context it comes from, we keep the context to recreate sockets.
    context: zmq::Context,
    socket: zmq::Socket,
}

fn zmq_error(e: zmq::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

impl ZmqTransport {
    /// open a REQ socket on tcp://host:port. Linger is 0 so dropping a session never blocks on unsent messages.
    pub fn connect(host: &str, port: u16, recv_timeout: Duration) -> Result<ZmqTransport> {
        let mut endpoint = String::from("tcp://");
        endpoint.push_str(host);
        endpoint.push(':');
        endpoint.push_str(&port.to_string());
        let context = zmq::Context::new();
        let socket = ZmqTransport::open_socket(&context, &endpoint, recv_timeout)?;
        log::info!("connected REQ socket to {}", endpoint);
        Ok(ZmqTransport { endpoint, recv_timeout, context, socket })
    } // end of connect

    fn open_socket(context: &zmq::Context, endpoint: &str, recv_timeout: Duration) -> Result<zmq::Socket> {
        let timeout_ms = recv_timeout.as_millis().min(i32::MAX as u128) as i32;
        let socket = context.socket(zmq::REQ).map_err(zmq_error)?;
        socket.set_linger(0).map_err(zmq_error)?;
        socket.set_rcvtimeo(timeout_ms).map_err(zmq_error)?;
        socket.set_sndtimeo(timeout_ms).map_err(zmq_error)?;
        socket.connect(endpoint).map_err(zmq_error)?;
        Ok(socket)
    }
} // end of impl ZmqTransport

impl Transport for ZmqTransport {
    fn send(&mut self, msg: &[u8]) -> std::result::Result<(), TransportError> {
        match self.socket.send(msg, 0) {
            Ok(()) => Ok(()),
            Err(zmq::Error::EAGAIN) => Err(TransportError::NotReady),
            Err(e) => Err(TransportError::Failed(e.to_string())),
        }
    }

    fn recv(&mut self) -> std::result::Result<Vec<u8>, TransportError> {
        match self.socket.recv_bytes(0) {
            Ok(v) => {
                log::trace!("received {} bytes from {}", v.len(), self.endpoint);
                Ok(v)
            }
            Err(zmq::Error::EAGAIN) => Err(TransportError::NotReady),
            Err(e) => Err(TransportError::Failed(e.to_string())),
        }
    }

    // a REQ socket that missed its reply is stuck waiting for it, the only way out is a new socket
    fn reset(&mut self) -> Result<()> {
        log::warn!("resetting REQ socket to {}", self.endpoint);
        self.socket = ZmqTransport::open_socket(&self.context, &self.endpoint, self.recv_timeout)?;
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
} // end of impl Transport for ZmqTransport

// end of mod tests
