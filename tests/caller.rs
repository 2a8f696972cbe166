// batch basecalling of several files with several workers, each on its own in memory server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use basecallclient::prelude::*;

mod common;
use common::{init_log, FakeServer, ServerLog};

// files of reads with distinct tags, returns the source, the file names and the expected number of called samples
fn make_source(trim: u64) -> (MemoryReadSource, Vec<PathBuf>, u64) {
    let layout: [(usize, usize); 4] = [(3, 100), (2, 200), (1, 50), (4, 30)];
    let mut source = MemoryReadSource::new();
    let mut files = Vec::new();
    let mut expected = 0;
    let mut tag = 0;
    for (f, (nb_reads, len)) in layout.iter().enumerate() {
        let name = PathBuf::from(format!("run_{}.fast5", f));
        let mut reads = Vec::new();
        for r in 0..*nb_reads {
            reads.push(ReadData::new(vec![10; *len], &format!("f{}_r{}", f, r), 0.0, 1.0).with_read_tag(tag));
            tag += 1;
            expected += *len as u64 - trim;
        }
        source.insert(&name, reads);
        files.push(name);
    }
    (source, files, expected)
}

#[test]
fn test_caller_all_reads_called_once() {
    init_log();
    let trim = 10;
    let (source, files, expected) = make_source(trim);
    let client_params = ClientParams { timeout: Duration::from_millis(1), retries: 10, ..Default::default() };
    let params = CallerParams { procs: 3, inflight: 2, snooze: Duration::from_millis(1), ..Default::default() };
    let caller = Caller::new("fast", &source, client_params, params);
    //
    let log = Arc::new(Mutex::new(ServerLog::default()));
    let connector = |_rank: usize| -> Result<FakeServer> {
        let mut server = FakeServer::new(&["fast"]);
        server.empty_polls = 1;
        server.trim = trim;
        server.log = log.clone();
        Ok(server)
    };
    let sink = Mutex::new(Vec::<(String, usize)>::new());
    let nb_samples = caller
        .basecall_with(
            &files,
            &sink,
            |read, called, out: &mut Vec<(String, usize)>| {
                assert!(called.complete);
                out.push((read.read_id.clone(), read.signal.len()));
            },
            connector,
        )
        .unwrap();
    assert_eq!(nb_samples, expected);
    //
    let mut got = sink.into_inner();
    got.sort();
    assert_eq!(got.len(), source.nb_reads());
    got.dedup();
    assert_eq!(got.len(), source.nb_reads());
    // callback gets the read as submitted, with its signal
    assert!(got.contains(&(String::from("f1_r1"), 200)));
    assert_eq!(log.lock().nb_submitted, source.nb_reads());
}

#[test]
fn test_caller_missing_file() {
    init_log();
    let (source, mut files, _) = make_source(0);
    files.push(PathBuf::from("nosuch.fast5"));
    let client_params = ClientParams { timeout: Duration::from_millis(1), retries: 10, ..Default::default() };
    let params = CallerParams { procs: 2, snooze: Duration::from_millis(1), ..Default::default() };
    let caller = Caller::new("fast", &source, client_params, params);
    let sink = Mutex::new(0usize);
    let connector = |_rank: usize| -> Result<FakeServer> { Ok(FakeServer::new(&["fast"])) };
    let res = caller.basecall_with(&files, &sink, |_, _, n: &mut usize| *n += 1, connector);
    assert!(matches!(res, Err(ClientError::Io(_))));
}

#[test]
fn test_caller_stalled_server() {
    init_log();
    let (source, files, _) = make_source(0);
    let client_params = ClientParams { timeout: Duration::from_millis(1), retries: 10, ..Default::default() };
    let params = CallerParams { procs: 1, snooze: Duration::from_millis(1), max_idle_polls: 5, ..Default::default() };
    let caller = Caller::new("fast", &source, client_params, params);
    let sink = Mutex::new(0usize);
    let connector = |_rank: usize| -> Result<FakeServer> {
        let mut server = FakeServer::new(&["fast"]);
        // never ready
        server.empty_polls = usize::MAX;
        Ok(server)
    };
    let res = caller.basecall_with(&files, &sink, |_, _, n: &mut usize| *n += 1, connector);
    assert!(matches!(res, Err(ClientError::BasecallTimeout { .. })));
    assert_eq!(*sink.lock(), 0);
}

#[test]
fn test_caller_shared_read_tag() {
    init_log();
    let mut source = MemoryReadSource::new();
    source.insert("a.fast5", vec![ReadData::new(vec![1; 40], "A", 0.0, 1.0).with_read_tag(5)]);
    source.insert("b.fast5", vec![ReadData::new(vec![2; 60], "B", 0.0, 1.0).with_read_tag(5)]);
    let files = vec![PathBuf::from("a.fast5"), PathBuf::from("b.fast5")];
    let client_params = ClientParams { timeout: Duration::from_millis(1), retries: 10, ..Default::default() };
    let params = CallerParams { procs: 1, snooze: Duration::from_millis(1), ..Default::default() };
    let caller = Caller::new("fast", &source, client_params, params);
    // both reads go in the same batch
    assert_eq!(caller.batch_size(files.len()), 2);
    let connector = |_rank: usize| -> Result<FakeServer> { Ok(FakeServer::new(&["fast"])) };
    let sink = Mutex::new(Vec::<(String, usize)>::new());
    let nb_samples = caller
        .basecall_with(
            &files,
            &sink,
            |read, _, out: &mut Vec<(String, usize)>| out.push((read.read_id.clone(), read.signal.len())),
            connector,
        )
        .unwrap();
    assert_eq!(nb_samples, 100);
    let mut got = sink.into_inner();
    got.sort();
    assert_eq!(got, vec![(String::from("A"), 40), (String::from("B"), 60)]);
}

#[test]
fn test_caller_timeout_reports_measured_time() {
    init_log();
    let (source, files, _) = make_source(0);
    let client_params = ClientParams { timeout: Duration::from_millis(1), retries: 10, ..Default::default() };
    // gives up at the first empty poll, before any snooze
    let params = CallerParams { procs: 1, snooze: Duration::from_secs(3600), max_idle_polls: 1, ..Default::default() };
    let caller = Caller::new("fast", &source, client_params, params);
    let sink = Mutex::new(0usize);
    let connector = |_rank: usize| -> Result<FakeServer> {
        let mut server = FakeServer::new(&["fast"]);
        server.empty_polls = usize::MAX;
        Ok(server)
    };
    match caller.basecall_with(&files, &sink, |_, _, n: &mut usize| *n += 1, connector) {
        Err(ClientError::BasecallTimeout { read_id, elapsed_ms }) => {
            assert!(!read_id.is_empty());
            assert!(elapsed_ms < 60_000);
        }
        other => panic!("expected basecall timeout, got {:?}", other.err()),
    }
}
