#[macro_use]
extern crate log;

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};

use consensus::{Config, MemStore, Store};

enum Command {
    /// Commit `body` at `path`
    Set {
        path: String,
        body: String,
    },

    /// Commit the removal of `path`
    Del {
        path: String,
    },

    /// Read `path` from the local store
    Get {
        path: String,
    },

    /// Print manager statistics
    Stats,

    Help,
}

fn usage() {
    println!(
        "{}{}{}{}{}{}{}{}",
        "--------------------------------------------------------------\n",
        "Possible commands:\n",
        "set <PATH> <BODY> | s <PATH> <BODY>  -- Commit <BODY> at <PATH>\n",
        "del <PATH>        | d <PATH>         -- Commit removal of <PATH>\n",
        "get <PATH>        | g <PATH>         -- Read <PATH> locally\n",
        "stats                                -- Show manager statistics\n",
        "help              | h                -- Show this message\n",
        "--------------------------------------------------------------",
    );
}

impl std::str::FromStr for Command {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut iter = s.trim().splitn(3, ' ');
        let path = |path: Option<&str>| {
            path.filter(|path| !path.is_empty())
                .map(str::to_string)
                .ok_or(())
        };
        match iter.next() {
        | Some("help") | Some("h") => Ok(Command::Help),
        | Some("stats") => Ok(Command::Stats),
        | Some("get") | Some("g") => path(iter.next()).map(|path| Command::Get { path }),
        | Some("del") | Some("d") => path(iter.next()).map(|path| Command::Del { path }),
        | Some("set") | Some("s") => {
            let path = path(iter.next())?;
            let body = iter.next().unwrap_or("").to_string();
            Ok(Command::Set { path, body })
        }
        | _ => Err(()),
        }
    }
}

fn parse_peer(s: &str) -> Result<(String, SocketAddr), String> {
    let (id, addr) = s.split_once('=')
        .ok_or_else(|| format!("expected ID=ADDR, found {:?}", s))?;
    let addr = addr.parse::<SocketAddr>()
        .map_err(|error| format!("invalid address {:?}: {}", addr, error))?;
    Ok((id.to_string(), addr))
}

#[derive(StructOpt)]
#[structopt(name = "consensus-node")]
struct Opt {
    /// Unique node ID
    #[structopt(short = "i", long = "id")]
    id: String,

    /// Address to bind for acceptor traffic [default: this node's peer address]
    #[structopt(short = "l", long = "listen")]
    listen: Option<SocketAddr>,

    /// Cluster member as ID=ADDR. Every member must be started with the same list.
    #[structopt(short = "p", long = "peer", parse(try_from_str = parse_peer))]
    peers: Vec<(String, SocketAddr)>,

    /// Number of instances in flight
    #[structopt(short = "a", long = "alpha", default_value = "50")]
    alpha: i64,

    /// Delay before filling another leader's stalled seqn (in milliseconds)
    #[structopt(short = "f", long = "fill", default_value = "5000")]
    fill: u64,

    /// Retry polling interval (in milliseconds)
    #[structopt(short = "t", long = "tick", default_value = "10")]
    tick: u64,

    /// Logging verbosity, repeat for more
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

fn setup_logger(verbose: u8) -> Result<(), fern::InitError> {
    let level = match verbose {
    | 0 => log::LevelFilter::Warn,
    | 1 => log::LevelFilter::Info,
    | 2 => log::LevelFilter::Debug,
    | _ => log::LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}][{}] {}", record.level(), record.target(), message))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

/// Static membership, sorted so that every member seeds the same log.
fn membership(opt: &Opt) -> Result<(SocketAddr, Vec<(String, SocketAddr)>), String> {
    let mut members = opt.peers.clone();
    let own = members.iter()
        .find(|(id, _)| *id == opt.id)
        .map(|(_, addr)| *addr);
    let listen = match (opt.listen, own) {
    | (Some(listen), _) => listen,
    | (None, Some(own)) => own,
    | (None, None) => return Err(format!("no address for {}: pass --listen or --peer {}=ADDR", opt.id, opt.id)),
    };
    if own.is_none() {
        members.push((opt.id.clone(), listen));
    }
    members.sort();
    members.dedup_by(|a, b| a.0 == b.0);
    Ok((listen, members))
}

async fn run(opt: Opt) -> Result<(), String> {
    let (listen, members) = membership(&opt)?;
    let store = MemStore::new();
    let def_rev = store.seed(&members, opt.alpha);
    info!("seeded {} members; participating from seqn {}", members.len(), def_rev + opt.alpha);

    let node = Config::new(&opt.id, listen)
        .with_alpha(opt.alpha)
        .with_def_rev(def_rev)
        .with_fill_delay(Duration::from_millis(opt.fill))
        .with_tick_interval(Duration::from_millis(opt.tick))
        .run(store.clone())
        .await
        .map_err(|error| format!("failed to start: {}", error))?;

    println!("[RESPONSE]: {} listening on {}", opt.id, node.local_addr());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Main interaction loop
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = match lines.next_line().await {
        | Ok(Some(line)) => line,
        | Ok(None) => break,
        | Err(error) => return Err(format!("failed to read stdin: {}", error)),
        };

        let command = match line.parse::<Command>() {
        | Ok(command) => command,
        | Err(()) => {
            println!("[ERROR]: could not parse command");
            continue
        }
        };

        let committed = match command {
        | Command::Set { path, body } => node.proposer().set(&path, &body).await,
        | Command::Del { path } => node.proposer().del(&path).await,
        | Command::Get { path } => {
            match store.get(&path) {
            | Some(body) => println!("[RESPONSE]: {}", body),
            | None => println!("[RESPONSE]: {} is not set", path),
            }
            continue
        }
        | Command::Stats => {
            println!("{}", node.stats().snapshot());
            println!("head:          {}", store.head());
            continue
        }
        | Command::Help => {
            usage();
            continue
        }
        };

        match committed {
        | Ok(event) => println!("[RESPONSE]: committed at seqn {}", event.seqn),
        | Err(error) => println!("[ERROR]: {}", error),
        }
    }

    store.close();
    Ok(())
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    if let Err(error) = setup_logger(opt.verbose) {
        eprintln!("[ERROR]: could not install logger: {}", error);
    }

    if let Err(error) = run(opt).await {
        eprintln!("[ERROR]: {}", error);
        std::process::exit(1);
    }
}
