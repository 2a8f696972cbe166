//! Basecalling of a list of files with several sessions in parallel.
//!
//! Files are dispatched on workers round robin, each worker runs in its own thread with its own session
//! and socket. A worker submits a batch of reads, polls until all of them are called and then goes to the next batch,
//! so a worker never has more than a batch of reads in flight on the server.
//!
//! Called reads are handed to a user callback together with the sink the callback writes to.
//! The sink sits behind one mutex shared by all workers so the callback is never run concurrently.


use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::client::{BasecallClient, ClientParams};
use crate::error::{ClientError, Result};
use crate::io::ReadSource;
use crate::read::{CalledReadData, ReadData};
use crate::transport::{Transport, ZmqTransport};
use crate::utils::{bases_fmt, batches, parse_config, shard};

/// parameters of the batch layer
#[derive(Clone, Debug)]
pub struct CallerParams {
    /// number of workers (sessions)
    pub procs: usize,
    /// max number of reads in flight per worker
    pub inflight: usize,
    /// sleep between empty polls
    pub snooze: Duration,
    /// a worker fails after that many consecutive empty polls
    pub max_idle_polls: usize,
    /// ask the server for trace tables
    pub trace: bool,
    /// ask the server for state tables
    pub state: bool,
}

impl Default for CallerParams {
    fn default() -> CallerParams {
        CallerParams {
            procs: 4,
            inflight: 50,
            snooze: Duration::from_millis(10),
            max_idle_polls: 100_000,
            trace: false,
            state: false,
        }
    } // end of function default
}

/// what a worker did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub nb_reads: u64,
    /// samples that went into calls
    pub nb_samples: u64,
    pub nb_bases: u64,
}

impl WorkerStats {
    fn add(&mut self, other: &WorkerStats) {
        self.nb_reads += other.nb_reads;
        self.nb_samples += other.nb_samples;
        self.nb_bases += other.nb_bases;
    }
}

/// Basecalls files with several sessions.
pub struct Caller<'a, Src: ReadSource> {
    /// config name as known by the server
    config: String,
    client_params: ClientParams,
    params: CallerParams,
    source: &'a Src,
}

impl<'a, Src: ReadSource> Caller<'a, Src> {
    /// config can be a path to a .cfg file
    pub fn new(config: &str, source: &'a Src, client_params: ClientParams, params: CallerParams) -> Caller<'a, Src> {
        let config = parse_config(Some(config)).unwrap_or_default();
        Caller { config, client_params, params, source }
    }

    /// size of the batches of reads a worker submits at once
    pub fn batch_size(&self, nb_files: usize) -> usize {
        let procs = self.params.procs.max(1);
        let per_proc = (nb_files + procs - 1) / procs;
        per_proc.min(self.params.inflight).max(1)
    }

    /// Basecall files on zmq sessions. Returns the number of samples called.
    pub fn basecall<Sink, F>(&self, files: &[PathBuf], sink: &Mutex<Sink>, callback: F) -> Result<u64>
    where
        Sink: Send,
        F: Fn(&ReadData, &CalledReadData, &mut Sink) + Sync,
    {
        let params = &self.client_params;
        self.basecall_with(files, sink, callback, |_| ZmqTransport::connect(&params.host, params.port, params.recv_timeout))
    }

    /// Same as basecall with transports given by connector, called once per worker with the worker rank.
    pub fn basecall_with<T, C, Sink, F>(
        &self,
        files: &[PathBuf],
        sink: &Mutex<Sink>,
        callback: F,
        connector: C,
    ) -> Result<u64>
    where
        T: Transport,
        C: Fn(usize) -> Result<T> + Sync,
        Sink: Send,
        F: Fn(&ReadData, &CalledReadData, &mut Sink) + Sync,
    {
        if files.is_empty() {
            return Err(ClientError::EmptyBatch);
        }
        let start_t = Instant::now();
        let batch_size = self.batch_size(files.len());
        let shards: Vec<Vec<PathBuf>> = shard(files, self.params.procs).into_iter().filter(|s| !s.is_empty()).collect();
        log::info!("basecalling {} files with {} workers, batch size {}", files.len(), shards.len(), batch_size);
        //
        let callback = &callback;
        let connector = &connector;
        let results: Vec<Result<WorkerStats>> = crossbeam_utils::thread::scope(|scope| {
            let mut join_handles = Vec::with_capacity(shards.len());
            for (i, files_i) in shards.iter().enumerate() {
                let handle = scope.spawn(move |_| {
                    let transport = connector(i)?;
                    let session = BasecallClient::with_transport(
                        &self.config,
                        transport,
                        self.client_params.timeout,
                        self.client_params.retries,
                    );
                    self.basecall_shard(i, session, files_i, batch_size, sink, callback)
                }); // end of spawn
                join_handles.push(handle);
            }
            join_handles
                .into_iter()
                .enumerate()
                .map(|(i, h)| {
                    h.join().unwrap_or_else(|_| Err(ClientError::Worker { worker: i, msg: String::from("worker panicked") }))
                })
                .collect()
        })
        .map_err(|_| ClientError::Worker { worker: 0, msg: String::from("thread scope panicked") })?;
        //
        let mut total = WorkerStats::default();
        for res in results {
            total.add(&res?);
        }
        log::info!(
            "called {} reads, {} samples, {} in {} s",
            total.nb_reads,
            total.nb_samples,
            bases_fmt(total.nb_bases),
            start_t.elapsed().as_secs_f64()
        );
        Ok(total.nb_samples)
    } // end of basecall_with

    // the job of one worker
    fn basecall_shard<T, Sink, F>(
        &self,
        worker: usize,
        session: BasecallClient<T>,
        files: &[PathBuf],
        batch_size: usize,
        sink: &Mutex<Sink>,
        callback: &F,
    ) -> Result<WorkerStats>
    where
        T: Transport,
        F: Fn(&ReadData, &CalledReadData, &mut Sink),
    {
        let mut session = session;
        session.connect()?;
        log::debug!("worker {} connected, client id {}, nb files {}", worker, session.client_id(), files.len());
        let mut stats = WorkerStats::default();
        //
        let mut reads_iter = Vec::new();
        for f in files {
            reads_iter.push(self.source.reads(f)?);
        }
        for batch in batches(reads_iter.into_iter().flatten(), batch_size) {
            let batch: Vec<ReadData> = batch.into_iter().collect::<Result<Vec<ReadData>>>()?;
            let batch_stats = self.basecall_batch(worker, &mut session, batch, sink, callback)?;
            stats.add(&batch_stats);
        }
        if let Err(e) = session.disconnect() {
            log::warn!("worker {} : disconnect failed : {}", worker, e);
        }
        log::debug!("worker {} done, {} reads {} samples", worker, stats.nb_reads, stats.nb_samples);
        Ok(stats)
    } // end of basecall_shard

    fn basecall_batch<T, Sink, F>(
        &self,
        worker: usize,
        session: &mut BasecallClient<T>,
        batch: Vec<ReadData>,
        sink: &Mutex<Sink>,
        callback: &F,
    ) -> Result<WorkerStats>
    where
        T: Transport,
        F: Fn(&ReadData, &CalledReadData, &mut Sink),
    {
        let mut stats = WorkerStats::default();
        let nb_reads = batch.len();
        // submit reads. Tags may collide, the server echoes the read id so reads sharing a tag are told apart by id.
        let mut pending: HashMap<u32, Vec<ReadData>> = HashMap::with_capacity(nb_reads);
        for read in batch {
            session.submit(&read)?;
            let same_tag = pending.entry(read.read_tag).or_insert_with(Vec::new);
            if !same_tag.is_empty() {
                log::warn!(
                    "worker {} : read tag {} shared by reads {} and {}",
                    worker,
                    read.read_tag,
                    same_tag[0].read_id,
                    read.read_id
                );
            }
            same_tag.push(read);
        }
        // poll to collect called reads
        let mut done = 0;
        let mut idle = 0;
        let mut idle_start: Option<Instant> = None;
        while done < nb_reads {
            match session.poll_result(self.params.trace, self.params.state)? {
                None => {
                    idle += 1;
                    let since = *idle_start.get_or_insert_with(Instant::now);
                    if idle >= self.params.max_idle_polls {
                        let read_id = pending.values().flatten().next().map(|r| r.read_id.clone()).unwrap_or_default();
                        let elapsed_ms = since.elapsed().as_millis();
                        return Err(ClientError::BasecallTimeout { read_id, elapsed_ms });
                    }
                    thread::sleep(self.params.snooze);
                }
                Some((echo, called)) => {
                    idle = 0;
                    idle_start = None;
                    done += 1;
                    let read = match take_pending(&mut pending, &echo) {
                        Some(r) => r,
                        None => {
                            log::warn!(
                                "worker {} : got unknown read tag {} for read {}",
                                worker,
                                echo.read_tag,
                                echo.read_id
                            );
                            echo
                        }
                    };
                    stats.nb_reads += 1;
                    stats.nb_samples += called.sample_count();
                    stats.nb_bases += called.seq.len() as u64;
                    let mut guard = sink.lock();
                    callback(&read, &called, &mut *guard);
                }
            }
        } // end of while
        Ok(stats)
    } // end of basecall_batch
} // end of impl Caller

// the submitted read a server echo stands for : same tag and same id
fn take_pending(pending: &mut HashMap<u32, Vec<ReadData>>, echo: &ReadData) -> Option<ReadData> {
    let same_tag = pending.get_mut(&echo.read_tag)?;
    let pos = same_tag.iter().position(|r| r.read_id == echo.read_id)?;
    let read = same_tag.swap_remove(pos);
    if same_tag.is_empty() {
        pending.remove(&echo.read_tag);
    }
    Some(read)
}

// end of mod tests
