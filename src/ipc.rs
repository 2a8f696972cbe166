//! This module contains the message codec used to talk to the basecall server.
//!
//! Every message is an envelope :
//!    - a 4 bytes identifier : the protocol major version written as 4 lowercase hex ascii digits ("0001")
//!    - the protocol version triple (major, minor, patch) as xdr u32
//!    - the sender id (client id assigned by server at connection) as xdr u64
//!    - the content type as xdr u32
//!    - the content itself.
//!
//! Scalars are xdr encoded (big endian). Bulk vectors (raw signal, state, trace and modification tables)
//! are not xdr encoded element by element, we write a u64 element count (xdr) followed by the raw little endian bytes.
//! Optional fields are a xdr bool followed by the value if the bool is true.
//!
//! Decoding checks the identifier (and the version triple) against our own major version and fails
//! with [ClientError::ProtocolMismatch] if they do not match.



use std::io::{Cursor, Read, Write};

use xdr_codec::{Pack, Unpack};

use crate::error::{ClientError, Result};

/// version of the ipc protocol we speak
pub const PROTO_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0, patch: 0 };

/// length of the identifier at the beginning of each message
pub const IDENTIFIER_LEN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    /// the 4 bytes identifier corresponding to major version
    pub fn identifier(&self) -> [u8; IDENTIFIER_LEN] {
        let tag = format!("{:04x}", self.major & 0xffff);
        let mut id = [0u8; IDENTIFIER_LEN];
        id.copy_from_slice(tag.as_bytes());
        id
    }
} // end of impl ProtocolVersion

/// parse the major version out of an identifier
fn parse_identifier(id: &[u8]) -> Option<u32> {
    let s = std::str::from_utf8(id).ok()?;
    if s.len() != IDENTIFIER_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

//==========================================================================================
//   message kinds
//==========================================================================================

///
/// requests a client can send in a SimpleRequestData
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    Connect = 1,
    Disconnect = 2,
    Terminate = 3,
    GetConfigs = 4,
    LoadConfig = 5,
    GetStatistics = 6,
    GetFirstCalledBlock = 7,
    GetNextCalledBlock = 8,
}

impl RequestType {
    pub fn from_u32(code: u32) -> Option<RequestType> {
        match code {
            1 => Some(RequestType::Connect),
            2 => Some(RequestType::Disconnect),
            3 => Some(RequestType::Terminate),
            4 => Some(RequestType::GetConfigs),
            5 => Some(RequestType::LoadConfig),
            6 => Some(RequestType::GetStatistics),
            7 => Some(RequestType::GetFirstCalledBlock),
            8 => Some(RequestType::GetNextCalledBlock),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RequestType::Connect => "CONNECT",
            RequestType::Disconnect => "DISCONNECT",
            RequestType::Terminate => "TERMINATE",
            RequestType::GetConfigs => "GET_CONFIGS",
            RequestType::LoadConfig => "LOAD_CONFIG",
            RequestType::GetStatistics => "GET_STATISTICS",
            RequestType::GetFirstCalledBlock => "GET_FIRST_CALLED_BLOCK",
            RequestType::GetNextCalledBlock => "GET_NEXT_CALLED_BLOCK",
        }
    }
} // end of impl RequestType

///
/// status of a SimpleReplyData
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyType {
    /// generic success, possibly with data or text
    Ok = 1,
    InvalidConfig = 2,
    BadRequest = 3,
    BadReply = 4,
    /// no called read available at the moment. Not an error
    NonePending = 5,
}

impl ReplyType {
    pub fn from_u32(code: u32) -> Option<ReplyType> {
        match code {
            1 => Some(ReplyType::Ok),
            2 => Some(ReplyType::InvalidConfig),
            3 => Some(ReplyType::BadRequest),
            4 => Some(ReplyType::BadReply),
            5 => Some(ReplyType::NonePending),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReplyType::Ok => "OK",
            ReplyType::InvalidConfig => "INVALID_CONFIG",
            ReplyType::BadRequest => "BAD_REQUEST",
            ReplyType::BadReply => "BAD_REPLY",
            ReplyType::NonePending => "NONE_PENDING",
        }
    }
} // end of impl ReplyType

/// discriminant of the content of an envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    SimpleRequestData = 1,
    SimpleReplyData = 2,
    ReadBlockData = 3,
    ConfigData = 4,
    ServerStats = 5,
}

impl ContentType {
    pub fn from_u32(code: u32) -> Option<ContentType> {
        match code {
            1 => Some(ContentType::SimpleRequestData),
            2 => Some(ContentType::SimpleReplyData),
            3 => Some(ContentType::ReadBlockData),
            4 => Some(ContentType::ConfigData),
            5 => Some(ContentType::ServerStats),
            _ => None,
        }
    }
}

//==========================================================================================
//   payloads
//==========================================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct SimpleRequestData {
    pub request_type: RequestType,
    pub data: Option<i64>,
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimpleReplyData {
    pub reply_type: ReplyType,
    pub data: Option<i64>,
    pub text: Option<String>,
}

/// description of a basecalling model loaded in the server
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// unique key server side
    pub name: String,
    pub label_length: i32,
    pub model_type: String,
    pub model_stride: i32,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ConfigData {
    pub configs: Vec<Config>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatEntry {
    pub name: String,
    pub value: f64,
}

/// server statistics, a list of named counters. The server decides which.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ServerStats {
    pub entries: Vec<StatEntry>,
}

impl ServerStats {
    /// value of counter name if server sent it
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.value)
    }
}

/// per end barcode alignment
#[derive(Clone, Debug, PartialEq, Default)]
pub struct BarcodeEnd {
    pub id: String,
    pub barcode_sequence: String,
    pub aligned_sequence: String,
    pub score: f32,
    pub begin: i32,
}

/// mid (internal) barcode hit
#[derive(Clone, Debug, PartialEq, Default)]
pub struct BarcodeMid {
    pub id: String,
    pub score: f32,
    pub end: i32,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct BarcodeResults {
    pub trim_front: i32,
    pub trim_rear: i32,
    pub id: String,
    pub normalised_id: String,
    pub kit: String,
    pub variant: String,
    pub score: f32,
    pub front: Option<BarcodeEnd>,
    pub back: Option<BarcodeEnd>,
    pub mid_front: Option<BarcodeMid>,
    pub mid_rear: Option<BarcodeMid>,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ScalingResults {
    pub median: f32,
    pub med_abs_dev: f32,
    pub pt_median: f32,
    pub ptsd: f32,
    pub adapter_max: f32,
    pub pt_detect_success: bool,
}

/// modified base probabilities, scaled to 0..255
#[derive(Clone, Debug, PartialEq, Default)]
pub struct BaseModResults {
    pub alphabet: String,
    /// space separated
    pub long_names: String,
    pub mod_probs: Vec<u8>,
}

/// flipflop trace. move table and trace table scaled to 0..255, 8 columns
#[derive(Clone, Debug, PartialEq, Default)]
pub struct FlipflopTraceData {
    pub move_data: Vec<u8>,
    pub trace_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct RunlengthTraceData {
    pub base: Vec<u8>,
    pub shape: Vec<f32>,
    pub scale: Vec<f32>,
    pub weight: Vec<f32>,
    pub index: Vec<u32>,
    pub runlength: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TraceResults {
    Flipflop(FlipflopTraceData),
    Runlength(RunlengthTraceData),
}

/// basecall result for one block of a read, as sent by the server
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CalledData {
    pub sequence: String,
    pub qstring: String,
    pub total_events: u64,
    pub total_sequence_length: u64,
    pub state_size: u32,
    pub model_type: String,
    pub trimmed_samples: u64,
    pub model_stride: u32,
    pub mean_qscore: f32,
    pub state_data: Vec<f32>,
    pub trace_results: Option<TraceResults>,
    pub barcode_results: Option<BarcodeResults>,
    pub base_mod_results: Option<BaseModResults>,
    pub scaling_results: Option<ScalingResults>,
}

/// a block of a read. Raw data going to the server, called data coming back.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ReadBlockData {
    pub read_tag: u32,
    pub block_index: u32,
    pub total_blocks: u32,
    pub total_samples: u64,
    pub daq_offset: f32,
    pub daq_scaling: f32,
    pub read_id: String,
    pub raw_data: Vec<i16>,
    pub called_data: Option<CalledData>,
}

/// content of an envelope. Exhaustive, matched at decode.
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    SimpleRequest(SimpleRequestData),
    SimpleReply(SimpleReplyData),
    ReadBlock(ReadBlockData),
    ConfigList(ConfigData),
    ServerStats(ServerStats),
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::SimpleRequest(_) => ContentType::SimpleRequestData,
            Content::SimpleReply(_) => ContentType::SimpleReplyData,
            Content::ReadBlock(_) => ContentType::ReadBlockData,
            Content::ConfigList(_) => ContentType::ConfigData,
            Content::ServerStats(_) => ContentType::ServerStats,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub version: ProtocolVersion,
    pub sender_id: u64,
    pub content: Content,
}

//==========================================================================================
//   low level helpers
//==========================================================================================

// xdr scalars

fn put<W: Write, T: Pack<W>>(value: T, out: &mut W) -> Result<()> {
    value.pack(out)?;
    Ok(())
}

fn get<R: Read, T: Unpack<R>>(input: &mut R) -> Result<T> {
    let (value, _) = T::unpack(input)?;
    Ok(value)
}

// bulk bytes : u64 count then raw bytes. Reading goes through take() so a corrupted count
// cannot make us allocate more than what the message holds.

fn put_bytes<W: Write>(bytes: &[u8], count: usize, out: &mut W) -> Result<()> {
    put(count as u64, out)?;
    out.write_all(bytes)?;
    Ok(())
}

fn get_bytes<R: Read>(input: &mut R, item_size: usize) -> Result<(Vec<u8>, usize)> {
    let count: u64 = get(input)?;
    let nb_bytes = count
        .checked_mul(item_size as u64)
        .ok_or_else(|| ClientError::Decode(format!("bulk length overflow {}", count)))?;
    let mut bytes = Vec::new();
    input.by_ref().take(nb_bytes).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != nb_bytes {
        return Err(ClientError::Decode(format!("truncated bulk field, expected {} bytes got {}", nb_bytes, bytes.len())));
    }
    Ok((bytes, count as usize))
}

fn put_u8s<W: Write>(v: &[u8], out: &mut W) -> Result<()> {
    put_bytes(v, v.len(), out)
}

fn get_u8s<R: Read>(input: &mut R) -> Result<Vec<u8>> {
    Ok(get_bytes(input, 1)?.0)
}

fn put_string<W: Write>(s: &str, out: &mut W) -> Result<()> {
    put_bytes(s.as_bytes(), s.len(), out)
}

fn get_string<R: Read>(input: &mut R) -> Result<String> {
    String::from_utf8(get_u8s(input)?).map_err(|e| ClientError::Decode(format!("invalid utf8 string : {}", e)))
}

fn put_i16s<W: Write>(v: &[i16], out: &mut W) -> Result<()> {
    let bytes: Vec<u8> = v.iter().flat_map(|x| x.to_le_bytes()).collect();
    put_bytes(&bytes, v.len(), out)
}

fn get_i16s<R: Read>(input: &mut R) -> Result<Vec<i16>> {
    let (bytes, _) = get_bytes(input, 2)?;
    Ok(bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
}

fn put_f32s<W: Write>(v: &[f32], out: &mut W) -> Result<()> {
    let bytes: Vec<u8> = v.iter().flat_map(|x| x.to_le_bytes()).collect();
    put_bytes(&bytes, v.len(), out)
}

fn get_f32s<R: Read>(input: &mut R) -> Result<Vec<f32>> {
    let (bytes, _) = get_bytes(input, 4)?;
    Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

fn put_u32s<W: Write>(v: &[u32], out: &mut W) -> Result<()> {
    let bytes: Vec<u8> = v.iter().flat_map(|x| x.to_le_bytes()).collect();
    put_bytes(&bytes, v.len(), out)
}

fn get_u32s<R: Read>(input: &mut R) -> Result<Vec<u32>> {
    let (bytes, _) = get_bytes(input, 4)?;
    Ok(bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

// optionals : xdr bool then value

fn put_opt<W: Write, T>(v: &Option<T>, out: &mut W, f: impl FnOnce(&T, &mut W) -> Result<()>) -> Result<()> {
    match v {
        Some(value) => {
            put(true, out)?;
            f(value, out)
        }
        None => put(false, out),
    }
}

fn get_opt<R: Read, T>(input: &mut R, f: impl FnOnce(&mut R) -> Result<T>) -> Result<Option<T>> {
    let present: bool = get(input)?;
    if present {
        Ok(Some(f(input)?))
    } else {
        Ok(None)
    }
}

fn put_opt_text<W: Write>(v: &Option<String>, out: &mut W) -> Result<()> {
    put_opt(v, out, |s, o| put_string(s, o))
}

fn get_opt_text<R: Read>(input: &mut R) -> Result<Option<String>> {
    get_opt(input, |i| get_string(i))
}

fn put_opt_i64<W: Write>(v: &Option<i64>, out: &mut W) -> Result<()> {
    put_opt(v, out, |d, o| put(*d, o))
}

fn get_opt_i64<R: Read>(input: &mut R) -> Result<Option<i64>> {
    get_opt(input, |i| get::<R, i64>(i))
}

//==========================================================================================
//   payload encoding
//==========================================================================================

/// encoding of a payload into / out of a byte stream
trait WireFormat: Sized {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()>;
    fn unpack_from<R: Read>(input: &mut R) -> Result<Self>;
}

impl WireFormat for SimpleRequestData {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put(self.request_type as u32, out)?;
        put_opt_i64(&self.data, out)?;
        put_opt_text(&self.text, out)
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        let code: u32 = get(input)?;
        let request_type =
            RequestType::from_u32(code).ok_or_else(|| ClientError::Decode(format!("unknown request type {}", code)))?;
        let data = get_opt_i64(input)?;
        let text = get_opt_text(input)?;
        Ok(SimpleRequestData { request_type, data, text })
    }
}

impl WireFormat for SimpleReplyData {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put(self.reply_type as u32, out)?;
        put_opt_i64(&self.data, out)?;
        put_opt_text(&self.text, out)
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        let code: u32 = get(input)?;
        let reply_type =
            ReplyType::from_u32(code).ok_or_else(|| ClientError::Decode(format!("unknown reply type {}", code)))?;
        let data = get_opt_i64(input)?;
        let text = get_opt_text(input)?;
        Ok(SimpleReplyData { reply_type, data, text })
    }
}

impl WireFormat for Config {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put_string(&self.name, out)?;
        put(self.label_length, out)?;
        put_string(&self.model_type, out)?;
        put(self.model_stride, out)
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(Config {
            name: get_string(input)?,
            label_length: get(input)?,
            model_type: get_string(input)?,
            model_stride: get(input)?,
        })
    }
}

impl WireFormat for ConfigData {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put(self.configs.len() as u32, out)?;
        for c in &self.configs {
            c.pack_into(out)?;
        }
        Ok(())
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        let nb: u32 = get(input)?;
        let mut configs = Vec::new();
        for _ in 0..nb {
            configs.push(Config::unpack_from(input)?);
        }
        Ok(ConfigData { configs })
    }
}

impl WireFormat for ServerStats {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put(self.entries.len() as u32, out)?;
        for e in &self.entries {
            put_string(&e.name, out)?;
            put(e.value, out)?;
        }
        Ok(())
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        let nb: u32 = get(input)?;
        let mut entries = Vec::new();
        for _ in 0..nb {
            let name = get_string(input)?;
            let value: f64 = get(input)?;
            entries.push(StatEntry { name, value });
        }
        Ok(ServerStats { entries })
    }
}

impl WireFormat for BarcodeEnd {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put_string(&self.id, out)?;
        put_string(&self.barcode_sequence, out)?;
        put_string(&self.aligned_sequence, out)?;
        put(self.score, out)?;
        put(self.begin, out)
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(BarcodeEnd {
            id: get_string(input)?,
            barcode_sequence: get_string(input)?,
            aligned_sequence: get_string(input)?,
            score: get(input)?,
            begin: get(input)?,
        })
    }
}

impl WireFormat for BarcodeMid {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put_string(&self.id, out)?;
        put(self.score, out)?;
        put(self.end, out)
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(BarcodeMid { id: get_string(input)?, score: get(input)?, end: get(input)? })
    }
}

impl WireFormat for BarcodeResults {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put(self.trim_front, out)?;
        put(self.trim_rear, out)?;
        put_string(&self.id, out)?;
        put_string(&self.normalised_id, out)?;
        put_string(&self.kit, out)?;
        put_string(&self.variant, out)?;
        put(self.score, out)?;
        put_opt(&self.front, out, |b, o| b.pack_into(o))?;
        put_opt(&self.back, out, |b, o| b.pack_into(o))?;
        put_opt(&self.mid_front, out, |b, o| b.pack_into(o))?;
        put_opt(&self.mid_rear, out, |b, o| b.pack_into(o))
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(BarcodeResults {
            trim_front: get(input)?,
            trim_rear: get(input)?,
            id: get_string(input)?,
            normalised_id: get_string(input)?,
            kit: get_string(input)?,
            variant: get_string(input)?,
            score: get(input)?,
            front: get_opt(input, |i| BarcodeEnd::unpack_from(i))?,
            back: get_opt(input, |i| BarcodeEnd::unpack_from(i))?,
            mid_front: get_opt(input, |i| BarcodeMid::unpack_from(i))?,
            mid_rear: get_opt(input, |i| BarcodeMid::unpack_from(i))?,
        })
    }
}

impl WireFormat for ScalingResults {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put(self.median, out)?;
        put(self.med_abs_dev, out)?;
        put(self.pt_median, out)?;
        put(self.ptsd, out)?;
        put(self.adapter_max, out)?;
        put(self.pt_detect_success, out)
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(ScalingResults {
            median: get(input)?,
            med_abs_dev: get(input)?,
            pt_median: get(input)?,
            ptsd: get(input)?,
            adapter_max: get(input)?,
            pt_detect_success: get(input)?,
        })
    }
}

impl WireFormat for BaseModResults {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put_string(&self.alphabet, out)?;
        put_string(&self.long_names, out)?;
        put_u8s(&self.mod_probs, out)
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(BaseModResults { alphabet: get_string(input)?, long_names: get_string(input)?, mod_probs: get_u8s(input)? })
    }
}

// trace discriminant : 1 flipflop, 2 runlength. Absence is handled by the optional bool.
const TRACE_FLIPFLOP: u32 = 1;
const TRACE_RUNLENGTH: u32 = 2;

impl WireFormat for TraceResults {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        match self {
            TraceResults::Flipflop(ff) => {
                put(TRACE_FLIPFLOP, out)?;
                put_u8s(&ff.move_data, out)?;
                put_u8s(&ff.trace_data, out)
            }
            TraceResults::Runlength(rl) => {
                put(TRACE_RUNLENGTH, out)?;
                put_u8s(&rl.base, out)?;
                put_f32s(&rl.shape, out)?;
                put_f32s(&rl.scale, out)?;
                put_f32s(&rl.weight, out)?;
                put_u32s(&rl.index, out)?;
                put_u32s(&rl.runlength, out)
            }
        }
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        let kind: u32 = get(input)?;
        match kind {
            TRACE_FLIPFLOP => Ok(TraceResults::Flipflop(FlipflopTraceData {
                move_data: get_u8s(input)?,
                trace_data: get_u8s(input)?,
            })),
            TRACE_RUNLENGTH => Ok(TraceResults::Runlength(RunlengthTraceData {
                base: get_u8s(input)?,
                shape: get_f32s(input)?,
                scale: get_f32s(input)?,
                weight: get_f32s(input)?,
                index: get_u32s(input)?,
                runlength: get_u32s(input)?,
            })),
            _ => Err(ClientError::Decode(format!("unknown trace type {}", kind))),
        }
    }
}

impl WireFormat for CalledData {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put_string(&self.sequence, out)?;
        put_string(&self.qstring, out)?;
        put(self.total_events, out)?;
        put(self.total_sequence_length, out)?;
        put(self.state_size, out)?;
        put_string(&self.model_type, out)?;
        put(self.trimmed_samples, out)?;
        put(self.model_stride, out)?;
        put(self.mean_qscore, out)?;
        put_f32s(&self.state_data, out)?;
        put_opt(&self.trace_results, out, |t, o| t.pack_into(o))?;
        put_opt(&self.barcode_results, out, |b, o| b.pack_into(o))?;
        put_opt(&self.base_mod_results, out, |m, o| m.pack_into(o))?;
        put_opt(&self.scaling_results, out, |s, o| s.pack_into(o))
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(CalledData {
            sequence: get_string(input)?,
            qstring: get_string(input)?,
            total_events: get(input)?,
            total_sequence_length: get(input)?,
            state_size: get(input)?,
            model_type: get_string(input)?,
            trimmed_samples: get(input)?,
            model_stride: get(input)?,
            mean_qscore: get(input)?,
            state_data: get_f32s(input)?,
            trace_results: get_opt(input, |i| TraceResults::unpack_from(i))?,
            barcode_results: get_opt(input, |i| BarcodeResults::unpack_from(i))?,
            base_mod_results: get_opt(input, |i| BaseModResults::unpack_from(i))?,
            scaling_results: get_opt(input, |i| ScalingResults::unpack_from(i))?,
        })
    }
}

impl WireFormat for ReadBlockData {
    fn pack_into<W: Write>(&self, out: &mut W) -> Result<()> {
        put(self.read_tag, out)?;
        put(self.block_index, out)?;
        put(self.total_blocks, out)?;
        put(self.total_samples, out)?;
        put(self.daq_offset, out)?;
        put(self.daq_scaling, out)?;
        put_string(&self.read_id, out)?;
        put_i16s(&self.raw_data, out)?;
        put_opt(&self.called_data, out, |c, o| c.pack_into(o))
    }

    fn unpack_from<R: Read>(input: &mut R) -> Result<Self> {
        Ok(ReadBlockData {
            read_tag: get(input)?,
            block_index: get(input)?,
            total_blocks: get(input)?,
            total_samples: get(input)?,
            daq_offset: get(input)?,
            daq_scaling: get(input)?,
            read_id: get_string(input)?,
            raw_data: get_i16s(input)?,
            called_data: get_opt(input, |i| CalledData::unpack_from(i))?,
        })
    }
}

//==========================================================================================
//   envelope
//==========================================================================================

impl Envelope {
    /// an envelope at our protocol version
    pub fn new(sender_id: u64, content: Content) -> Envelope {
        Envelope { version: PROTO_VERSION, sender_id, content }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out: Vec<u8> = Vec::with_capacity(64);
        out.write_all(&self.version.identifier())?;
        put(self.version.major, &mut out)?;
        put(self.version.minor, &mut out)?;
        put(self.version.patch, &mut out)?;
        put(self.sender_id, &mut out)?;
        put(self.content.content_type() as u32, &mut out)?;
        match &self.content {
            Content::SimpleRequest(r) => r.pack_into(&mut out)?,
            Content::SimpleReply(r) => r.pack_into(&mut out)?,
            Content::ReadBlock(b) => b.pack_into(&mut out)?,
            Content::ConfigList(c) => c.pack_into(&mut out)?,
            Content::ServerStats(s) => s.pack_into(&mut out)?,
        }
        log_message("->", &self.content);
        Ok(out)
    } // end of encode
} // end of impl Envelope

/// encode content sent by sender_id at our protocol version
pub fn encode(sender_id: u64, content: Content) -> Result<Vec<u8>> {
    Envelope::new(sender_id, content).encode()
}

/// shortcut for a SimpleRequestData message
pub fn simple_request(request_type: RequestType, sender_id: u64, data: Option<i64>, text: Option<&str>) -> Result<Vec<u8>> {
    let request = SimpleRequestData { request_type, data, text: text.map(String::from) };
    encode(sender_id, Content::SimpleRequest(request))
}

/// decode a message. Fails with ProtocolMismatch if the peer major version is not ours.
pub fn decode(buf: &[u8]) -> Result<Envelope> {
    if buf.len() < IDENTIFIER_LEN {
        return Err(ClientError::Decode(format!("message too short : {} bytes", buf.len())));
    }
    let tag_major = parse_identifier(&buf[0..IDENTIFIER_LEN])
        .ok_or_else(|| ClientError::Decode(format!("bad message identifier {:?}", &buf[0..IDENTIFIER_LEN])))?;
    if tag_major != PROTO_VERSION.major {
        return Err(ClientError::ProtocolMismatch { got: tag_major, expected: PROTO_VERSION.major });
    }
    let mut cursor = Cursor::new(&buf[IDENTIFIER_LEN..]);
    let version = ProtocolVersion { major: get(&mut cursor)?, minor: get(&mut cursor)?, patch: get(&mut cursor)? };
    if version.major != PROTO_VERSION.major {
        return Err(ClientError::ProtocolMismatch { got: version.major, expected: PROTO_VERSION.major });
    }
    let sender_id: u64 = get(&mut cursor)?;
    let code: u32 = get(&mut cursor)?;
    let content_type =
        ContentType::from_u32(code).ok_or_else(|| ClientError::Decode(format!("unhandled content type {}", code)))?;
    let content = match content_type {
        ContentType::SimpleRequestData => Content::SimpleRequest(SimpleRequestData::unpack_from(&mut cursor)?),
        ContentType::SimpleReplyData => Content::SimpleReply(SimpleReplyData::unpack_from(&mut cursor)?),
        ContentType::ReadBlockData => Content::ReadBlock(ReadBlockData::unpack_from(&mut cursor)?),
        ContentType::ConfigData => Content::ConfigList(ConfigData::unpack_from(&mut cursor)?),
        ContentType::ServerStats => Content::ServerStats(ServerStats::unpack_from(&mut cursor)?),
    };
    log_message("<-", &content);
    Ok(Envelope { version, sender_id, content })
} // end of decode

fn log_message(direction: &str, content: &Content) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }
    match content {
        Content::SimpleRequest(r) => {
            log::trace!("{} SimpleRequestData {:<23} {:?} {:?}", direction, r.request_type.name(), r.data, r.text)
        }
        Content::SimpleReply(r) => {
            log::trace!("{} SimpleReplyData   {:<23} {:?} {:?}", direction, r.reply_type.name(), r.data, r.text)
        }
        Content::ReadBlock(b) => log::trace!(
            "{} ReadBlockData     tag {} block {}/{} id {}",
            direction,
            b.read_tag,
            b.block_index,
            b.total_blocks,
            b.read_id
        ),
        Content::ConfigList(c) => log::trace!("{} ConfigData        nb configs {}", direction, c.configs.len()),
        Content::ServerStats(s) => log::trace!("{} ServerStats       nb entries {}", direction, s.entries.len()),
    }
}

//==========================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(content: Content) {
        let buf = encode(17, content.clone()).unwrap();
        let env = decode(&buf).unwrap();
        assert_eq!(env.version, PROTO_VERSION);
        assert_eq!(env.sender_id, 17);
        assert_eq!(env.content.content_type(), content.content_type());
        assert_eq!(env.content, content);
    }

    fn full_called_data() -> CalledData {
        CalledData {
            sequence: String::from("ACGTTGCA"),
            qstring: String::from("%%&&''(("),
            total_events: 16,
            total_sequence_length: 8,
            state_size: 2,
            model_type: String::from("flipflop"),
            trimmed_samples: 120,
            model_stride: 2,
            mean_qscore: 11.5,
            state_data: (0..32).map(|i| i as f32 * 0.5).collect(),
            trace_results: Some(TraceResults::Flipflop(FlipflopTraceData {
                move_data: vec![1, 0, 1, 1],
                trace_data: (0..32).map(|i| i as u8).collect(),
            })),
            barcode_results: Some(BarcodeResults {
                trim_front: 10,
                trim_rear: 12,
                id: String::from("barcode01"),
                normalised_id: String::from("barcode01"),
                kit: String::from("EXP-NBD104"),
                variant: String::from("var1"),
                score: 88.5,
                front: Some(BarcodeEnd {
                    id: String::from("NB01"),
                    barcode_sequence: String::from("AAGG"),
                    aligned_sequence: String::from("AAGC"),
                    score: 77.0,
                    begin: 3,
                }),
                back: None,
                mid_front: Some(BarcodeMid { id: String::from("NB01_mid"), score: 12.0, end: 40 }),
                mid_rear: None,
            }),
            base_mod_results: Some(BaseModResults {
                alphabet: String::from("ACGTZ"),
                long_names: String::from("5mC"),
                mod_probs: vec![0, 255, 128, 3, 4],
            }),
            scaling_results: Some(ScalingResults {
                median: 90.0,
                med_abs_dev: 12.0,
                pt_median: 85.0,
                ptsd: 3.0,
                adapter_max: 110.0,
                pt_detect_success: true,
            }),
        }
    }

    #[test]
    fn test_roundtrip_simple_request() {
        let request = |request_type, data, text: Option<&str>| {
            Content::SimpleRequest(SimpleRequestData { request_type, data, text: text.map(String::from) })
        };
        roundtrip(request(RequestType::Connect, Some(0), Some("dna_r9.4.1_450bps_fast")));
        roundtrip(request(RequestType::Disconnect, None, None));
        roundtrip(request(RequestType::GetNextCalledBlock, Some(4_294_967_295), None));
    }

    #[test]
    fn test_roundtrip_simple_reply() {
        let ok = SimpleReplyData { reply_type: ReplyType::Ok, data: Some(-3), text: Some(String::from("ok")) };
        roundtrip(Content::SimpleReply(ok));
        roundtrip(Content::SimpleReply(SimpleReplyData { reply_type: ReplyType::NonePending, data: None, text: None }));
    }

    #[test]
    fn test_roundtrip_configs_and_stats() {
        let config = |name: &str| Config {
            name: String::from(name),
            label_length: 1,
            model_type: String::from("flipflop"),
            model_stride: 2,
        };
        let configs = ConfigData { configs: vec![config("dna_r9.4.1_450bps_fast"), config("dna_r9.4.1_450bps_hac")] };
        roundtrip(Content::ConfigList(configs));
        roundtrip(Content::ConfigList(ConfigData::default()));
        let stats = ServerStats { entries: vec![StatEntry { name: String::from("reads_processed"), value: 1234.0 }] };
        roundtrip(Content::ServerStats(stats.clone()));
        assert_eq!(stats.get("reads_processed"), Some(1234.0));
        assert_eq!(stats.get("uptime"), None);
    }

    #[test]
    fn test_roundtrip_read_block() {
        let raw = ReadBlockData {
            read_tag: 0xdead_beef,
            block_index: 0,
            total_blocks: 1,
            total_samples: 6,
            daq_offset: 13.0,
            daq_scaling: 0.1755,
            read_id: String::from("b7f5b0a2-read"),
            raw_data: vec![-32768, -1, 0, 1, 500, 32767],
            called_data: None,
        };
        roundtrip(Content::ReadBlock(raw));
        let called = ReadBlockData {
            read_tag: 7,
            block_index: 2,
            total_blocks: 3,
            total_samples: 4000,
            called_data: Some(full_called_data()),
            ..Default::default()
        };
        roundtrip(Content::ReadBlock(called));
        let mut rl = full_called_data();
        rl.trace_results = Some(TraceResults::Runlength(RunlengthTraceData {
            base: vec![0, 1, 2],
            shape: vec![1.0, 2.0, 3.0],
            scale: vec![0.1, 0.2, 0.3],
            weight: vec![0.5, 0.25, 0.25],
            index: vec![0, 4, 9],
            runlength: vec![1, 2, 1],
        }));
        rl.barcode_results = None;
        roundtrip(Content::ReadBlock(ReadBlockData { called_data: Some(rl), ..Default::default() }));
    }

    #[test]
    fn test_identifier_encodes_major() {
        let buf = simple_request(RequestType::GetConfigs, 0, None, None).unwrap();
        assert_eq!(&buf[0..4], b"0001");
        let v = ProtocolVersion { major: 0x2a, minor: 0, patch: 0 };
        assert_eq!(&v.identifier(), b"002a");
    }

    #[test]
    fn test_major_version_mismatch() {
        let content = Content::SimpleReply(SimpleReplyData { reply_type: ReplyType::Ok, data: Some(1), text: None });
        let version = ProtocolVersion { major: PROTO_VERSION.major + 1, minor: 0, patch: 0 };
        let other = Envelope { version, sender_id: 0, content };
        let buf = other.encode().unwrap();
        match decode(&buf) {
            Err(ClientError::ProtocolMismatch { got, expected }) => {
                assert_eq!(got, PROTO_VERSION.major + 1);
                assert_eq!(expected, PROTO_VERSION.major);
            }
            other => panic!("expected protocol mismatch, got {:?}", other),
        }
        // payload garbage after a wrong tag does not matter
        let mut garbage = b"0009".to_vec();
        garbage.extend_from_slice(&[0xff; 3]);
        assert!(matches!(decode(&garbage), Err(ClientError::ProtocolMismatch { got: 9, .. })));
    }

    #[test]
    fn test_minor_version_is_accepted() {
        let content = Content::SimpleReply(SimpleReplyData { reply_type: ReplyType::Ok, data: None, text: None });
        let version = ProtocolVersion { major: PROTO_VERSION.major, minor: 7, patch: 3 };
        let env = Envelope { version, sender_id: 5, content };
        let decoded = decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded.version.minor, 7);
        assert_eq!(decoded.version.patch, 3);
    }

    #[test]
    fn test_truncated_and_garbage() {
        assert!(matches!(decode(b"00"), Err(ClientError::Decode(_))));
        assert!(matches!(decode(b"zz!!rest"), Err(ClientError::Decode(_))));
        let buf = encode(1, Content::ReadBlock(ReadBlockData { raw_data: vec![1; 100], ..Default::default() })).unwrap();
        let cut = &buf[0..buf.len() - 40];
        assert!(matches!(decode(cut), Err(ClientError::Decode(_))));
    }
} // end of mod tests
