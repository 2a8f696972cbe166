//! basecallclient : administration of a basecall server.
//!
//! usage basecallclient --host h --port p [--config name] [--list] [--load] [--stats] [--terminate]
//!
//! set RUST_LOG=trace to see every message exchanged with the server.

use ::clap::{App, Arg};

use ::std::process;
use ::std::time::Duration;

use basecallclient::prelude::*;

fn main() {
    // the reference to LOG will force the call to lazy_static! call to init_log to get LOG initialized.
    if *basecallclient::LOG != 1 {
        println!(" LOG = {:?}", *basecallclient::LOG);
    }

    let matches = App::new("basecallclient")
        .arg(Arg::with_name("host")
             .long("host")
             .takes_value(true)
             .help("server host, default 127.0.0.1"))
        .arg(Arg::with_name("port")
             .long("port")
             .short("p")
             .takes_value(true)
             .help("server port, default 5555"))
        .arg(Arg::with_name("config")
             .long("config")
             .short("c")
             .takes_value(true)
             .help("config name or path to a .cfg file"))
        .arg(Arg::with_name("retries")
             .long("retries")
             .takes_value(true)
             .help("number of attempts of retried operations, default 50"))
        .arg(Arg::with_name("timeout")
             .long("timeout")
             .takes_value(true)
             .help("sleep between retries in ms, default 100"))
        .arg(Arg::with_name("list")
             .long("list")
             .short("l")
             .help("list configs loaded by the server"))
        .arg(Arg::with_name("load")
             .long("load")
             .requires("config")
             .help("load config in the server"))
        .arg(Arg::with_name("stats")
             .long("stats")
             .short("s")
             .help("print server statistics"))
        .arg(Arg::with_name("terminate")
             .long("terminate")
             .help("shut down the server"))
        .get_matches();

    let mut params = ClientParams::default();
    if let Some(host) = matches.value_of("host") {
        params.host = String::from(host);
    }
    if let Some(port) = matches.value_of("port") {
        params.port = port.parse::<u16>().unwrap_or_else(|_| {
            println!("bad port number {}, expecting >= 1024 and < 65536", port);
            process::exit(1);
        });
    }
    if let Some(retries) = matches.value_of("retries") {
        params.retries = retries.parse::<usize>().unwrap_or(params.retries);
    }
    if let Some(timeout) = matches.value_of("timeout") {
        if let Ok(ms) = timeout.parse::<u64>() {
            params.timeout = Duration::from_millis(ms);
        }
    }
    let config = matches.value_of("config").unwrap_or("");
    log::info!("server {}:{} config {:?}", params.host, params.port, config);

    let mut client = match BasecallClient::new(config, &params) {
        Ok(c) => c,
        Err(e) => {
            println!("cannot open socket : {}", e);
            process::exit(1);
        }
    };

    let mut status = 0;
    if matches.is_present("load") {
        match client.load_config(&parse_config(Some(config)).unwrap_or_default()) {
            Ok(c) => println!("loaded {} model type {} stride {}", c.name, c.model_type, c.model_stride),
            Err(e) => {
                println!("load failed : {}", e);
                status = 1;
            }
        }
    }
    if matches.is_present("list") {
        match client.get_configs() {
            Ok(configs) => {
                for c in configs {
                    println!("{}\tlabel_length {}\t{}\tstride {}", c.name, c.label_length, c.model_type, c.model_stride);
                }
            }
            Err(e) => {
                println!("get configs failed : {}", e);
                status = 1;
            }
        }
    }
    if matches.is_present("stats") {
        match client.get_statistics() {
            Ok(stats) => {
                for e in stats.entries {
                    println!("{}\t{}", e.name, e.value);
                }
            }
            Err(e) => {
                println!("get statistics failed : {}", e);
                status = 1;
            }
        }
    }
    if matches.is_present("terminate") {
        if let Err(e) = client.terminate() {
            println!("terminate failed : {}", e);
            status = 1;
        }
    }
    process::exit(status);
} // end of main
