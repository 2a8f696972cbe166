//! This module contains the client session to the basecall server.
//!
//! A session owns one transport (a REQ socket) and dialogs strictly one request at a time :
//! every request is followed by exactly one reply.
//!
//! Dialog:
//! - connect : make sure the config is loaded (GET_CONFIGS, LOAD_CONFIG then poll GET_CONFIGS), then CONNECT with
//!   the config name, the server answers with our client id which is the sender id of all our next messages.
//! - submit a read : a ReadBlockData message with the whole raw signal.
//! - poll : GET_FIRST_CALLED_BLOCK, answered by NONE_PENDING or the first block of a called read.
//!   While the called read is not complete, GET_NEXT_CALLED_BLOCK with the read tag.
//! - disconnect : DISCONNECT.
//!
//! Timeouts are counted in retries : a receive is tried `retries` times with a sleep of `timeout` in between,
//! so a call waits at most around `retries * timeout`.


use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ClientError, Result};
use crate::ipc::{self, Config, Content, RequestType, ReplyType, ServerStats};
use crate::read::{decode_block, merge, CalledReadData, ReadData};
use crate::transport::{Transport, TransportError, ZmqTransport, DEFAULT_RECV_TIMEOUT};
use crate::utils::parse_config;

/// parameters of a session
#[derive(Clone, Debug)]
pub struct ClientParams {
    pub host: String,
    pub port: u16,
    /// sleep between retries
    pub timeout: Duration,
    /// bound on the number of attempts of any retried operation
    pub retries: usize,
    /// receive timeout of one raw attempt on the socket
    pub recv_timeout: Duration,
}

impl Default for ClientParams {
    fn default() -> ClientParams {
        ClientParams {
            host: String::from("127.0.0.1"),
            port: 5555,
            timeout: Duration::from_millis(100),
            retries: 50,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    } // end of function default
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A session with the basecall server for one config.
pub struct BasecallClient<T: Transport = ZmqTransport> {
    transport: T,
    /// name of the config as known by the server
    config_name: String,
    /// assigned by the server at connection
    client_id: u64,
    state: SessionState,
    timeout: Duration,
    retries: usize,
}

impl BasecallClient<ZmqTransport> {
    /// a session on a zmq socket, not yet connected. config can be a path to a .cfg file.
    pub fn new(config: &str, params: &ClientParams) -> Result<BasecallClient<ZmqTransport>> {
        let transport = ZmqTransport::connect(&params.host, params.port, params.recv_timeout)?;
        Ok(BasecallClient::with_transport(config, transport, params.timeout, params.retries))
    }
} // end of impl BasecallClient<ZmqTransport>

impl<T: Transport> BasecallClient<T> {
    pub fn with_transport(config: &str, transport: T, timeout: Duration, retries: usize) -> BasecallClient<T> {
        let config_name = parse_config(Some(config)).unwrap_or_default();
        BasecallClient {
            transport,
            config_name,
            client_id: 0,
            state: SessionState::Disconnected,
            timeout,
            retries: retries.max(1),
        }
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    // ============== raw exchange =====================

    // a send is retried once if the transport was not ready
    fn send_raw(&mut self, msg: &[u8]) -> Result<()> {
        match self.transport.send(msg) {
            Ok(()) => Ok(()),
            Err(TransportError::NotReady) => {
                log::debug!("send not ready, retrying once");
                match self.transport.send(msg) {
                    Ok(()) => Ok(()),
                    Err(TransportError::NotReady) => Err(ClientError::TransportUnavailable { attempts: 2 }),
                    Err(TransportError::Failed(e)) => Err(ClientError::Transport(e)),
                }
            }
            Err(TransportError::Failed(e)) => Err(ClientError::Transport(e)),
        }
    } // end of send_raw

    fn recv_raw(&mut self) -> Result<Vec<u8>> {
        for attempt in 1..=self.retries {
            match self.transport.recv() {
                Ok(v) => return Ok(v),
                Err(TransportError::NotReady) => {
                    log::trace!("recv not ready, attempt {}", attempt);
                    if attempt < self.retries {
                        thread::sleep(self.timeout);
                    }
                }
                Err(TransportError::Failed(e)) => return Err(ClientError::Transport(e)),
            }
        }
        log::warn!("no reply from {} after {} attempts", self.transport.endpoint(), self.retries);
        self.transport.reset()?;
        Err(ClientError::TransportUnavailable { attempts: self.retries })
    } // end of recv_raw

    /// Send an encoded message and get the reply content.
    /// Returns None for NONE_PENDING, errors for BAD_REQUEST, BAD_REPLY and INVALID_CONFIG.
    fn exchange(&mut self, msg: &[u8]) -> Result<Option<Content>> {
        self.send_raw(msg)?;
        let buf = self.recv_raw()?;
        let envelope = ipc::decode(&buf)?;
        match envelope.content {
            Content::SimpleReply(reply) => {
                let text = reply.text.clone().unwrap_or_default();
                match reply.reply_type {
                    ReplyType::NonePending => Ok(None),
                    ReplyType::InvalidConfig => Err(ClientError::InvalidConfig(text)),
                    ReplyType::BadRequest => Err(ClientError::BadRequest(text)),
                    ReplyType::BadReply => Err(ClientError::BadReply(text)),
                    ReplyType::Ok => Ok(Some(Content::SimpleReply(reply))),
                }
            }
            content => Ok(Some(content)),
        }
    } // end of exchange

    fn request(&mut self, request_type: RequestType, data: Option<i64>, text: Option<&str>) -> Result<Option<Content>> {
        let msg = ipc::simple_request(request_type, self.client_id, data, text)?;
        self.exchange(&msg)
    }

    // ============== config management =====================

    /// configs currently loaded by the server
    pub fn get_configs(&mut self) -> Result<Vec<Config>> {
        match self.request(RequestType::GetConfigs, None, None)? {
            Some(Content::ConfigList(c)) => Ok(c.configs),
            other => Err(unexpected(RequestType::GetConfigs, other)),
        }
    }

    pub fn get_statistics(&mut self) -> Result<ServerStats> {
        match self.request(RequestType::GetStatistics, None, None)? {
            Some(Content::ServerStats(s)) => Ok(s),
            other => Err(unexpected(RequestType::GetStatistics, other)),
        }
    }

    /// Make sure config_name is loaded by the server, asking it to load it if needed,
    /// and return its description.
    pub fn load_config(&mut self, config_name: &str) -> Result<Config> {
        if let Some(c) = self.get_configs()?.into_iter().find(|c| c.name == config_name) {
            return Ok(c);
        }
        log::info!("asking server to load config {}", config_name);
        match self.request(RequestType::LoadConfig, None, Some(config_name)) {
            Ok(_) => (),
            // not retried, the config does not exist
            Err(ClientError::InvalidConfig(_)) => return Err(ClientError::InvalidConfig(String::from(config_name))),
            Err(e) => return Err(e),
        }
        // loading takes time, poll
        let mut attempts = 0;
        while attempts < self.retries {
            attempts += 1;
            if let Some(c) = self.get_configs()?.into_iter().find(|c| c.name == config_name) {
                log::info!("config {} loaded after {} polls", config_name, attempts);
                return Ok(c);
            }
            thread::sleep(self.timeout);
        }
        Err(ClientError::ConfigTimeout { config: String::from(config_name), attempts })
    } // end of load_config

    // ============== session lifecycle =====================

    fn try_connect(&mut self) -> Result<u64> {
        let config_name = self.config_name.clone();
        let config = self.load_config(&config_name)?;
        match self.request(RequestType::Connect, Some(0), Some(&config.name))? {
            Some(Content::SimpleReply(reply)) => match reply.data {
                Some(id) if id >= 0 => Ok(id as u64),
                _ => Err(ClientError::UnexpectedReply(format!(
                    "CONNECT reply without client id : {:?}",
                    reply.data
                ))),
            },
            other => Err(unexpected(RequestType::Connect, other)),
        }
    }

    /// Connect to the server for our config. Transient failures are retried up to `retries` times,
    /// an invalid config or a protocol error fails at once.
    pub fn connect(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        let mut attempts = 0;
        while attempts < self.retries {
            attempts += 1;
            match self.try_connect() {
                Ok(id) => {
                    self.client_id = id;
                    self.state = SessionState::Connected;
                    log::info!(
                        "connected to {} with config {}, client id {}",
                        self.transport.endpoint(),
                        self.config_name,
                        id
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    log::debug!("connect attempt {} failed : {}", attempts, e);
                    thread::sleep(self.timeout);
                }
                Err(e) => {
                    self.state = SessionState::Disconnected;
                    return Err(e);
                }
            }
        }
        self.state = SessionState::Disconnected;
        Err(ClientError::Connection { config: self.config_name.clone(), attempts })
    } // end of connect

    /// best effort, no retry
    pub fn disconnect(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.request(RequestType::Disconnect, None, None)?;
        log::debug!("client {} disconnected", self.client_id);
        Ok(())
    }

    /// ask the server to shut down. best effort, no retry
    pub fn terminate(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.request(RequestType::Terminate, None, None)?;
        Ok(())
    }

    // ============== reads =====================

    fn check_connected(&self) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(ClientError::NotConnected(self.config_name.clone()));
        }
        Ok(())
    }

    /// send a read to the server. Its result has to be fetched by polling.
    pub fn submit(&mut self, read: &ReadData) -> Result<()> {
        self.check_connected()?;
        let msg = ipc::encode(self.client_id, Content::ReadBlock(read.to_read_block()))?;
        log::trace!("submitting read {} tag {} nb samples {}", read.read_id, read.read_tag, read.signal.len());
        // the acknowledgement carries nothing we need
        let _ack = self.exchange(&msg)?;
        Ok(())
    }

    /// Fetch a called read if the server has one ready, reassembling all its blocks.
    /// Returns the read as echoed by the server and its complete basecall, or None if nothing is pending.
    pub fn poll_result(&mut self, trace: bool, state: bool) -> Result<Option<(ReadData, CalledReadData)>> {
        self.check_connected()?;
        let flag = (!trace as i64) | ((state as i64) << 1);
        let block = match self.request(RequestType::GetFirstCalledBlock, Some(flag), None)? {
            None => return Ok(None),
            Some(Content::ReadBlock(b)) => b,
            Some(other) => return Err(unexpected(RequestType::GetFirstCalledBlock, Some(other))),
        };
        let (read, called) = decode_block(block)?;
        let mut called = called.ok_or_else(|| {
            ClientError::UnexpectedReply(format!("first block of read {} without called data", read.read_id))
        })?;
        while !called.complete {
            let block = match self.request(RequestType::GetNextCalledBlock, Some(read.read_tag as i64), None)? {
                Some(Content::ReadBlock(b)) => b,
                Some(other) => return Err(unexpected(RequestType::GetNextCalledBlock, Some(other))),
                None => return Err(ClientError::UnexpectedReply(format!("no next block pending for read {}", read.read_id))),
            };
            if block.read_tag != read.read_tag {
                return Err(ClientError::UnexpectedReply(format!(
                    "got block for tag {} while reassembling tag {}",
                    block.read_tag, read.read_tag
                )));
            }
            log::trace!("read {} got block {}/{}", read.read_id, block.block_index + 1, block.total_blocks);
            let next = decode_block(block)?.1.ok_or_else(|| {
                ClientError::UnexpectedReply(format!("block of read {} without called data", read.read_id))
            })?;
            called = merge(called, next)?;
        }
        Ok(Some((read, called)))
    } // end of poll_result

    /// submit a read and wait for its basecall.
    pub fn basecall(&mut self, read: &ReadData, trace: bool, state: bool) -> Result<CalledReadData> {
        let start_t = Instant::now();
        self.submit(read)?;
        let mut polls = 0;
        while polls < self.retries {
            polls += 1;
            if let Some((_, called)) = self.poll_result(trace, state)? {
                log::debug!("read {} called in {} polls", read.read_id, polls);
                return Ok(called);
            }
            thread::sleep(self.timeout);
        }
        Err(ClientError::BasecallTimeout { read_id: read.read_id.clone(), elapsed_ms: start_t.elapsed().as_millis() })
    } // end of basecall
} // end of impl BasecallClient

// a reply whose content does not fit the request
fn unexpected(request: RequestType, content: Option<Content>) -> ClientError {
    ClientError::UnexpectedReply(format!("{} answered by {:?}", request.name(), content.map(|c| c.content_type())))
}

impl<T: Transport> Drop for BasecallClient<T> {
    fn drop(&mut self) {
        if self.state == SessionState::Connected {
            if let Err(e) = self.disconnect() {
                log::warn!("disconnect of client {} on drop failed : {}", self.client_id, e);
            }
        }
    }
}

// end of mod tests
