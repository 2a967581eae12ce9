use clap::Parser;
use std::time::Duration;
use tracing_subscriber::filter::EnvFilter;

use easy_socket::EasySocket;

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
    // Initialize log bridge to capture log crate messages - MUST be first!
    tracing_log::LogTracer::init().expect("Failed to set logger");

    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        init_env_filter(env_filter);
    }

    let args = Args::parse();
    let _runtime = easy_socket::init()?;
    println!("Connecting to {}:{}", args.host, args.port);
    let mut sock = EasySocket::client_from_host(&args.host, args.port)?;
    println!("Connected successfully");

    for i in 0..args.count {
        let msg = format!("{} #{i}", args.message);
        sock.send_str(&msg)?;
        match sock.receive()? {
            Some(answer) => println!("Received: {}", String::from_utf8_lossy(&answer)),
            None => {
                println!("Connection closed by remote peer");
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(args.period));
    }
    sock.close()
}

/// A simple client talking to the echo server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The server host
    #[arg(long, default_value = "localhost")]
    host: String,
    /// The server port
    #[arg(short, long, default_value = "1337")]
    port: u16,
    /// The message to send
    #[arg(short, long, default_value = "Hello")]
    message: String,
    /// How many messages to send
    #[arg(short, long, default_value = "5")]
    count: usize,
    /// Pause between messages in milli-sec
    #[arg(long, default_value = "500")]
    period: u64,
}
