use tracing::info;
use tracing_subscriber::filter::EnvFilter;

use easy_socket::{EasySocket, Listened};

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

    let _runtime = easy_socket::init()?;
    println!("Starting echo server on port 1337");
    let server = EasySocket::server(1337, 100)?;

    loop {
        let client: Listened = server.accept(1024)?;
        println!("Accepted connection from: {}", client.peer_addr());
        client.listen(
            |c| {
                info!("Hi! You said: {}", c.message_str());
                let echo = c.message().to_vec();
                let _ = c.send(&echo);
            },
            |c| println!("{} is freed!", c.peer_addr()),
        )?;
    }
}
