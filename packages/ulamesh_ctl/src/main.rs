//! Command-line admin console for a running ulamesh node.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{miette, Context, IntoDiagnostic};
use ulamesh_proto::admin::{self, Reply, Request, RequestTag};

#[derive(Parser)]
#[clap(name = "ulamesh", version, about = "administer a running ulamesh node")]
struct Opt {
    /// Path to the node's admin socket.
    #[clap(long, default_value = "/run/ulamesh/admin.sock")]
    socket: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List tunnel interfaces.
    Tunnels,
    /// Dump the prototype route table.
    Routes,
    /// Dump the realised route table.
    Realised,
    /// Run a route reconciliation pass now.
    Realise,
    /// Flush learned routes and restart discovery.
    Reset,
    /// Raise trust for every active tunnel peer.
    Trust,
    /// Whitelist a peer and ask the overlay to connect to it.
    Add {
        /// The peer's base64-encoded identity.
        peer: String,
    },
    /// Toggle verbose per-packet logging on the node.
    Debug {
        #[clap(value_enum)]
        state: DebugState,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum DebugState {
    On,
    Off,
}

fn main() -> miette::Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let opt = Opt::parse();
    let request = match opt.command {
        Command::Tunnels => Request::new(RequestTag::Tunnels),
        Command::Routes => Request::new(RequestTag::Routes),
        Command::Realised => Request::new(RequestTag::Realised),
        Command::Realise => Request::new(RequestTag::Realise),
        Command::Reset => Request::new(RequestTag::Reset),
        Command::Trust => Request::new(RequestTag::Trust),
        Command::Add { peer } => Request {
            tag: RequestTag::Add,
            param: peer,
        },
        Command::Debug {
            state: DebugState::On,
        } => Request::new(RequestTag::DebugOn),
        Command::Debug {
            state: DebugState::Off,
        } => Request::new(RequestTag::DebugOff),
    };

    let mut stream = UnixStream::connect(&opt.socket)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to connect to admin socket {}", opt.socket.display()))?;
    log::debug!("connected to {}", opt.socket.display());
    stream
        .write_all(&request.encode())
        .into_diagnostic()
        .wrap_err("failed to send request")?;

    loop {
        match read_reply(&mut stream)? {
            Reply::Line(line) => println!("{line}"),
            Reply::Done { summary, .. } => {
                println!("{summary}");
                return Ok(());
            }
        }
    }
}

fn read_reply(stream: &mut UnixStream) -> miette::Result<Reply> {
    let mut header = [0u8; 3];
    stream
        .read_exact(&mut header)
        .into_diagnostic()
        .wrap_err("connection closed before the reply completed")?;
    let mut frame = header.to_vec();
    frame.resize(3 + admin::body_len(&header), 0);
    stream
        .read_exact(&mut frame[3..])
        .into_diagnostic()
        .wrap_err("connection closed mid-frame")?;
    Reply::parse(&frame).map_err(|err| miette!("malformed reply: {err}"))
}
