// gathers the types most users need

pub use crate::caller::{Caller, CallerParams};
pub use crate::client::{BasecallClient, ClientParams, SessionState};
pub use crate::error::{ClientError, Result};
pub use crate::io::{write_fasta, write_fastq, MemoryReadSource, ReadSource};
pub use crate::ipc::{Config, ServerStats};
pub use crate::read::{merge, CalledReadData, ReadData};
pub use crate::transport::{Transport, TransportError, ZmqTransport};
pub use crate::utils::{batches, distribute, parse_config};
