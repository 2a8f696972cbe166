// An in memory basecall server speaking the ipc protocol, plugged as a transport.
// Each read submitted is answered after a given number of empty polls, split in a given number of blocks.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use basecallclient::ipc::{
    self, CalledData, Config, ConfigData, Content, FlipflopTraceData, ReadBlockData, ReplyType, RequestType, ServerStats,
    SimpleReplyData, StatEntry, TraceResults,
};
use basecallclient::transport::{Transport, TransportError};

/// what the server saw, shared with the test
#[derive(Default)]
pub struct ServerLog {
    pub requests: Vec<RequestType>,
    pub nb_submitted: usize,
    pub nb_none_pending: usize,
    pub sender_ids: Vec<u64>,
}

pub struct FakeServer {
    pub loaded: Vec<String>,
    /// configs the server knows how to load, and after how many GET_CONFIGS they appear
    pub loadable: Vec<String>,
    pub load_delay: usize,
    loading: Vec<(String, usize)>,
    pub client_id: i64,
    /// empty polls answered before each read result
    pub empty_polls: usize,
    pub nb_blocks: u32,
    pub trim: u64,
    /// recv never answers
    pub dead: bool,
    submitted: VecDeque<(ReadBlockData, usize)>,
    streaming: HashMap<u32, VecDeque<ReadBlockData>>,
    reply: Option<Vec<u8>>,
    pub log: Arc<Mutex<ServerLog>>,
}

impl FakeServer {
    pub fn new(loaded: &[&str]) -> FakeServer {
        FakeServer {
            loaded: loaded.iter().map(|s| s.to_string()).collect(),
            loadable: Vec::new(),
            load_delay: 0,
            loading: Vec::new(),
            client_id: 7,
            empty_polls: 0,
            nb_blocks: 1,
            trim: 0,
            dead: false,
            submitted: VecDeque::new(),
            streaming: HashMap::new(),
            reply: None,
            log: Arc::new(Mutex::new(ServerLog::default())),
        }
    }

    fn simple(reply_type: ReplyType, data: Option<i64>) -> Content {
        Content::SimpleReply(SimpleReplyData { reply_type, data, text: None })
    }

    fn configs(&self) -> Content {
        let configs = self
            .loaded
            .iter()
            .map(|n| Config { name: n.clone(), label_length: 1, model_type: String::from("flipflop"), model_stride: 2 })
            .collect();
        Content::ConfigList(ConfigData { configs })
    }

    // split the call of a read in nb_blocks blocks, block b has sequence "ACGT" and b+1 state rows
    fn called_blocks(&self, read: &ReadBlockData) -> VecDeque<ReadBlockData> {
        (0..self.nb_blocks)
            .map(|b| ReadBlockData {
                read_tag: read.read_tag,
                block_index: b,
                total_blocks: self.nb_blocks,
                total_samples: read.total_samples,
                daq_offset: read.daq_offset,
                daq_scaling: read.daq_scaling,
                read_id: read.read_id.clone(),
                raw_data: Vec::new(),
                called_data: Some(CalledData {
                    sequence: String::from("ACGT"),
                    qstring: String::from("++++"),
                    total_events: 8,
                    total_sequence_length: 4 * self.nb_blocks as u64,
                    state_size: 2,
                    model_type: String::from("flipflop"),
                    trimmed_samples: self.trim,
                    model_stride: 2,
                    mean_qscore: 10.0,
                    state_data: vec![b as f32; 2 * (b as usize + 1)],
                    trace_results: Some(TraceResults::Flipflop(FlipflopTraceData {
                        move_data: vec![1, 0],
                        trace_data: vec![0; 8],
                    })),
                    ..Default::default()
                }),
            })
            .collect()
    }

    fn answer(&mut self, content: Content) -> Content {
        match content {
            Content::ReadBlock(block) => {
                self.log.lock().nb_submitted += 1;
                self.submitted.push_back((block, self.empty_polls));
                FakeServer::simple(ReplyType::Ok, None)
            }
            Content::SimpleRequest(req) => {
                self.log.lock().requests.push(req.request_type);
                match req.request_type {
                    RequestType::GetConfigs => {
                        for l in self.loading.iter_mut() {
                            l.1 = l.1.saturating_sub(1);
                        }
                        let ready: Vec<String> = self.loading.iter().filter(|l| l.1 == 0).map(|l| l.0.clone()).collect();
                        self.loading.retain(|l| l.1 > 0);
                        self.loaded.extend(ready);
                        self.configs()
                    }
                    RequestType::LoadConfig => {
                        let name = req.text.unwrap_or_default();
                        if self.loadable.contains(&name) {
                            self.loading.push((name, self.load_delay));
                            FakeServer::simple(ReplyType::Ok, None)
                        } else {
                            FakeServer::simple(ReplyType::InvalidConfig, None)
                        }
                    }
                    RequestType::Connect => {
                        let name = req.text.unwrap_or_default();
                        if self.loaded.contains(&name) {
                            FakeServer::simple(ReplyType::Ok, Some(self.client_id))
                        } else {
                            FakeServer::simple(ReplyType::InvalidConfig, None)
                        }
                    }
                    RequestType::Disconnect | RequestType::Terminate => FakeServer::simple(ReplyType::Ok, None),
                    RequestType::GetStatistics => {
                        let value = self.log.lock().nb_submitted as f64;
                        let entry = StatEntry { name: String::from("reads_submitted"), value };
                        Content::ServerStats(ServerStats { entries: vec![entry] })
                    }
                    RequestType::GetFirstCalledBlock => {
                        let ready = match self.submitted.front_mut() {
                            None => false,
                            Some(front) if front.1 > 0 => {
                                front.1 -= 1;
                                false
                            }
                            Some(_) => true,
                        };
                        if !ready {
                            self.log.lock().nb_none_pending += 1;
                            return FakeServer::simple(ReplyType::NonePending, None);
                        }
                        let (read, _) = self.submitted.pop_front().unwrap();
                        let mut blocks = self.called_blocks(&read);
                        let first = blocks.pop_front().unwrap();
                        if !blocks.is_empty() {
                            self.streaming.insert(read.read_tag, blocks);
                        }
                        Content::ReadBlock(first)
                    }
                    RequestType::GetNextCalledBlock => {
                        let tag = req.data.unwrap_or(-1) as u32;
                        match self.streaming.get_mut(&tag).and_then(|q| q.pop_front()) {
                            Some(b) => Content::ReadBlock(b),
                            None => FakeServer::simple(ReplyType::NonePending, None),
                        }
                    }
                }
            }
            _ => FakeServer::simple(ReplyType::BadRequest, None),
        }
    } // end of answer
} // end of impl FakeServer

impl Transport for FakeServer {
    fn send(&mut self, msg: &[u8]) -> Result<(), TransportError> {
        let envelope = ipc::decode(msg).map_err(|e| TransportError::Failed(e.to_string()))?;
        self.log.lock().sender_ids.push(envelope.sender_id);
        let content = self.answer(envelope.content);
        self.reply = Some(ipc::encode(0, content).map_err(|e| TransportError::Failed(e.to_string()))?);
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.dead {
            return Err(TransportError::NotReady);
        }
        self.reply.take().ok_or(TransportError::NotReady)
    }

    fn endpoint(&self) -> String {
        String::from("fake")
    }
}

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}
