//! Reads going to the server and called reads coming back.
//!
//! A [ReadData] is built by a read source, one per record, and is not modified after submission.
//! A [CalledReadData] is built from the first block the server sends back and accumulated with
//! [merge] until its `complete` flag is set.
//!
//! Conversion from the wire block is done here : the state table is reshaped as (events, state_size),
//! the flipflop trace (scaled on a byte) is rescaled to [0,1] and reshaped as (n, 8),
//! the modified base probabilities are rescaled to [0,1] and reshaped as (n, alphabet size).

use ndarray::{Array, Array1, Array2, Axis, RemoveAxis};
use rand::{thread_rng, Rng};

use crate::error::{ClientError, Result};
use crate::ipc::{BarcodeResults, CalledData, ReadBlockData, RunlengthTraceData, ScalingResults, TraceResults};

/// number of columns of a flipflop trace table
pub const FLIPFLOP_TRACE_COLUMNS: usize = 8;

// scaled byte to probability
const BYTE_SCALE: f32 = 1.0 / 255.0;

/// A raw read to basecall.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadData {
    /// raw daq signal
    pub signal: Vec<i16>,
    pub read_id: String,
    /// correlation key of the blocks returned by the server for this read.
    /// Randomly drawn at construction, so two reads of one session can collide with probability 2^-32 per pair.
    pub read_tag: u32,
    pub daq_offset: f32,
    pub daq_scaling: f32,
    pub total_samples: u64,
    /// only set for reads decoded from a server block
    pub block_index: Option<u32>,
    pub total_blocks: Option<u32>,
}

impl ReadData {
    pub fn new(signal: Vec<i16>, read_id: &str, daq_offset: f32, daq_scaling: f32) -> ReadData {
        let total_samples = signal.len() as u64;
        ReadData {
            signal,
            read_id: String::from(read_id),
            read_tag: thread_rng().gen::<u32>(),
            daq_offset,
            daq_scaling,
            total_samples,
            block_index: None,
            total_blocks: None,
        }
    } // end of new

    /// replace the random tag. Useful for callers allocating tags from a counter.
    pub fn with_read_tag(mut self, read_tag: u32) -> ReadData {
        self.read_tag = read_tag;
        self
    }

    /// the block sent to the server. We never split a read, so block 0 of 1.
    pub fn to_read_block(&self) -> ReadBlockData {
        ReadBlockData {
            read_tag: self.read_tag,
            block_index: 0,
            total_blocks: 1,
            total_samples: self.signal.len() as u64,
            daq_offset: self.daq_offset,
            daq_scaling: self.daq_scaling,
            read_id: self.read_id.clone(),
            raw_data: self.signal.clone(),
            called_data: None,
        }
    }
} // end of impl ReadData

/// Basecall result of a read (or of the blocks received so far).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CalledReadData {
    pub seq: String,
    pub qual: String,
    /// mean qscore
    pub qscore: f32,
    pub events: u64,
    pub seqlen: u64,
    pub state_size: u32,
    pub model_type: String,
    pub model_stride: u32,
    /// samples discarded by the server (adapter ...)
    pub trimmed_samples: u64,
    /// number of samples of the read as reported by the server block
    pub total_samples: u64,
    /// posteriors, (events, state_size)
    pub state: Option<Array2<f32>>,
    /// move table of a flipflop trace
    pub move_table: Option<Array1<u8>>,
    /// flipflop trace, (n, 8) in [0,1]
    pub trace: Option<Array2<f32>>,
    pub runlength: Option<RunlengthTraceData>,
    /// (n, alphabet size) in [0,1]
    pub mod_probs: Option<Array2<f32>>,
    pub mod_alphabet: Option<String>,
    pub mod_long_names: Option<Vec<String>>,
    pub barcode: Option<BarcodeResults>,
    pub scaling: Option<ScalingResults>,
    /// false while blocks are missing
    pub complete: bool,
}

impl CalledReadData {
    /// samples that went into the call
    pub fn sample_count(&self) -> u64 {
        self.total_samples.saturating_sub(self.trimmed_samples)
    }

    /// weights of a runlength trace if any
    pub fn weight(&self) -> Option<&[f32]> {
        self.runlength.as_ref().map(|rl| rl.weight.as_slice())
    }
} // end of impl CalledReadData

fn reshape(data: Vec<f32>, ncols: usize, what: &str) -> Result<Array2<f32>> {
    if ncols == 0 {
        return Err(ClientError::Decode(format!("{} : 0 columns", what)));
    }
    if data.len() % ncols != 0 {
        return Err(ClientError::Decode(format!(
            "{} : {} values not a multiple of {} columns",
            what,
            data.len(),
            ncols
        )));
    }
    let nrows = data.len() / ncols;
    Array2::from_shape_vec((nrows, ncols), data).map_err(|e| ClientError::Decode(format!("{} : {}", what, e)))
}

fn scale_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes.iter().map(|b| *b as f32 * BYTE_SCALE).collect()
}

fn called_from_wire(called: CalledData, block: &ReadBlockData) -> Result<CalledReadData> {
    let mut called_read = CalledReadData {
        seq: called.sequence,
        qual: called.qstring,
        qscore: called.mean_qscore,
        events: called.total_events,
        seqlen: called.total_sequence_length,
        state_size: called.state_size,
        model_type: called.model_type,
        model_stride: called.model_stride,
        trimmed_samples: called.trimmed_samples,
        total_samples: block.total_samples,
        // block index comes from the server, may be anything
        complete: block.block_index.checked_add(1) == Some(block.total_blocks),
        ..Default::default()
    };
    //
    if !called.state_data.is_empty() {
        called_read.state = Some(reshape(called.state_data, called.state_size as usize, "state data")?);
    }
    //
    match called.trace_results {
        Some(TraceResults::Flipflop(ff)) => {
            if !ff.move_data.is_empty() {
                called_read.move_table = Some(Array1::from(ff.move_data));
            }
            if !ff.trace_data.is_empty() {
                called_read.trace = Some(reshape(scale_bytes(&ff.trace_data), FLIPFLOP_TRACE_COLUMNS, "trace data")?);
            }
        }
        Some(TraceResults::Runlength(rl)) => {
            called_read.runlength = Some(rl);
        }
        None => (),
    }
    //
    if let Some(mods) = called.base_mod_results {
        let alphabet_size = mods.alphabet.chars().count();
        called_read.mod_long_names = Some(mods.long_names.split(' ').map(String::from).collect());
        called_read.mod_probs = Some(reshape(scale_bytes(&mods.mod_probs), alphabet_size, "mod probs")?);
        called_read.mod_alphabet = Some(mods.alphabet);
    }
    called_read.barcode = called.barcode_results;
    called_read.scaling = called.scaling_results;
    //
    Ok(called_read)
} // end of called_from_wire

/// Split a block received from the server into the read it echoes and the called data it carries if any.
pub fn decode_block(block: ReadBlockData) -> Result<(ReadData, Option<CalledReadData>)> {
    let mut block = block;
    let called_data = block.called_data.take();
    let called = match called_data {
        Some(c) => Some(called_from_wire(c, &block)?),
        None => None,
    };
    let read = ReadData {
        signal: block.raw_data,
        read_id: block.read_id,
        read_tag: block.read_tag,
        daq_offset: block.daq_offset,
        daq_scaling: block.daq_scaling,
        total_samples: block.total_samples,
        block_index: Some(block.block_index),
        total_blocks: Some(block.total_blocks),
    };
    Ok((read, called))
} // end of decode_block

// concatenate along first axis, absent stays absent
fn concat<A, D>(a: Option<Array<A, D>>, b: Option<Array<A, D>>, what: &str) -> Result<Option<Array<A, D>>>
where
    A: Clone,
    D: RemoveAxis,
{
    match (a, b) {
        (Some(a), Some(b)) => {
            let c = ndarray::concatenate(Axis(0), &[a.view(), b.view()])
                .map_err(|e| ClientError::Decode(format!("cannot merge {} : {}", what, e)))?;
            Ok(Some(c))
        }
        (a, _) => Ok(a),
    }
}

/// Merge the next block of a called read into what has been accumulated so far.
///
/// Sequence and quality strings are appended, tables are concatenated along their sample axis when present
/// in the accumulator, and the complete flag is the one of the new block.
pub fn merge(partial: CalledReadData, next: CalledReadData) -> Result<CalledReadData> {
    let mut acc = partial;
    acc.complete = next.complete;
    acc.seq.push_str(&next.seq);
    acc.qual.push_str(&next.qual);
    acc.state = concat(acc.state, next.state, "state")?;
    acc.move_table = concat(acc.move_table, next.move_table, "move")?;
    acc.trace = concat(acc.trace, next.trace, "trace")?;
    acc.mod_probs = concat(acc.mod_probs, next.mod_probs, "mod probs")?;
    if let (Some(rl), Some(next_rl)) = (acc.runlength.as_mut(), next.runlength) {
        rl.base.extend(next_rl.base);
        rl.shape.extend(next_rl.shape);
        rl.scale.extend(next_rl.scale);
        rl.weight.extend(next_rl.weight);
        rl.index.extend(next_rl.index);
        rl.runlength.extend(next_rl.runlength);
    }
    Ok(acc)
} // end of merge

// end of mod tests
