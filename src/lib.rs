//! A client for a signal basecalling server.
//!
//! Raw signal of reads is sent to the server over a ZeroMQ REQ socket, basecalls come back
//! possibly in several blocks which are reassembled here.
//!
//! - [ipc] : message codec
//! - [client] : one session with the server, connect, submit, poll, basecall
//! - [read] : reads and called reads, block reassembly
//! - [caller] : basecall many files with several sessions in parallel

// for logging (debug mostly, switched at compile time in cargo.toml)
#[macro_use]
extern crate lazy_static;

pub mod error;
pub mod ipc;
pub mod read;
pub mod transport;
pub mod client;
pub mod caller;

pub mod io;
pub mod utils;

pub mod prelude;

lazy_static! {
    #[allow(dead_code)]
    pub static ref LOG: u64 = {
        let res = init_log();
        res
    };
}
// install a logger facility
// set RUST_LOG to trace, warn debug off ....
fn init_log() -> u64 {
    let _ = env_logger::Builder::from_default_env().try_init();
    log::info!("logger initialized from env");
    1
}
