use clap::Parser;
use std::time::{Duration, Instant};
use tracing_subscriber::filter::EnvFilter;

use easy_socket::{EasySocket, Listened, ListenerGroup, SocketConfig};

/// Per-connection throughput sampling state.
struct Meter {
    cid: usize,
    start: Instant,
    total_recv: usize,
    sampling_period: Duration,
}

fn run_client_mode(args: Args) -> easy_socket::Result<()> {
    let config = SocketConfig::default().nodelay(true);
    let mut sock = EasySocket::client_from_host_with(&args.host, args.port, &config)?;
    println!("Connected successfully to {}:{}", args.host, args.port);

    let mut buf = vec![0u8; args.size];
    buf.fill(42);

    loop {
        match sock.send(&buf) {
            Ok(_) => {}
            Err(easy_socket::Error::Disconnected) => {
                println!("Connection closed by remote peer");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

fn run_server_mode(args: Args) -> easy_socket::Result<()> {
    let server = EasySocket::server(args.port, args.backlog)?;
    println!("Listening on port {}", args.port);
    let mut workers = ListenerGroup::default();
    let mut sid = 0;
    loop {
        let conn: Listened<Meter> = match server.accept(args.size) {
            Ok(conn) => conn,
            Err(e) => {
                println!("Failed to accept connection: {e}");
                continue;
            }
        };
        println!("Accepted connection from: {}", conn.peer_addr());
        let meter = Meter {
            cid: sid,
            start: Instant::now(),
            total_recv: 0,
            sampling_period: Duration::from_secs(args.period),
        };
        sid += 1;
        let handle = conn.with_data(meter).listen(
            |c| {
                let n = c.message().len();
                let Some(m) = c.data_mut() else { return };
                m.total_recv += n;
                let delta = m.start.elapsed();
                if delta >= m.sampling_period {
                    let throughput = ((m.total_recv * 8) as f32 / delta.as_secs_f32()) / (10u64.pow(6) as f32);
                    println!("[{}]: {throughput} Mbps", m.cid);
                    m.start = Instant::now();
                    m.total_recv = 0;
                }
            },
            |c| println!("Socket close from remote party {}...", c.peer_addr()),
        )?;
        workers.push(handle);
        workers.reap_finished();
    }
}

fn init_env_filter(env_filter: EnvFilter) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_level(true)
        .with_target(true);

    let subscriber = subscriber.finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> easy_socket::Result<()> {
    tracing_log::LogTracer::init().expect("Failed to set logger");

    // Initialize tracing subscriber
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        init_env_filter(env_filter);
    }

    let runtime = easy_socket::init()?;
    let args = Args::parse();
    let result = if args.client {
        run_client_mode(args)
    } else {
        run_server_mode(args)
    };
    runtime.end();
    result
}

/// The throughput benchmarking application for EasySocket
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Set the client mode for the application
    #[arg(short, long)]
    client: bool,
    /// The host to connect to in client mode
    #[arg(long, default_value = "localhost")]
    host: String,
    /// The port to listen on or connect to, depending on the mode
    #[arg(short, long)]
    port: u16,
    /// The read buffer size of each connection (server) or write size (client)
    #[arg(short, long)]
    size: usize,
    /// The listen backlog
    #[arg(short, long, default_value = "100")]
    backlog: i32,
    /// The sampling period in seconds
    #[arg(long, default_value = "1")]
    period: u64,
}
