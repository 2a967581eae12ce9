use clap::{Parser, Subcommand};
use tracing_subscriber::filter::EnvFilter;

use easy_socket::{http, EasySocket, Listened, ListenerGroup};

fn serve(port: u16, message: String) -> easy_socket::Result<()> {
    let server = EasySocket::server(port, 100)?;
    println!("Answering HTTP requests on port {port}");
    let mut workers = ListenerGroup::default();
    loop {
        let conn: Listened = server.accept(8192)?;
        let message = message.clone();
        let handle = conn.listen(
            move |c| {
                let request = c.message_str();
                let line = request.lines().next().unwrap_or_default().to_owned();
                tracing::info!(peer = %c.peer_addr(), "{line}");
                if let Err(e) = http::answer_request(c, &message) {
                    tracing::warn!("Failed to answer {}: {e}", c.peer_addr());
                }
                let _ = c.close();
            },
            |_| {},
        )?;
        workers.push(handle);
        workers.reap_finished();
    }
}

fn get(host: &str, port: u16, path: &str, headers: bool) -> easy_socket::Result<()> {
    let mut sock = EasySocket::client_from_host(host, port)?;
    let text = if headers {
        http::get(&mut sock, path)?
    } else {
        http::get_contents(&mut sock, path)?
    };
    println!("{text}");
    sock.close()
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

    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        init_env_filter(env_filter);
    }

    let _runtime = easy_socket::init()?;
    match Args::parse().command {
        Command::Serve { port, message } => serve(port, message),
        Command::Get { host, port, path, headers } => get(&host, port, &path, headers),
    }
}

/// A tiny HTTP client and server built on EasySocket
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer every request with a plain-text message
    Serve {
        /// The port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// The body sent back to every client
        #[arg(short, long, default_value = "Hello from easy-socket")]
        message: String,
    },
    /// Fetch a path and print the answer
    Get {
        /// The host to connect to
        #[arg(long, default_value = "localhost")]
        host: String,
        /// The port to connect to
        #[arg(short, long, default_value = "80")]
        port: u16,
        /// The path to request
        #[arg(long, default_value = "/")]
        path: String,
        /// Print the response headers too
        #[arg(long)]
        headers: bool,
    },
}
