//! Listener worker lifecycle over loopback connections.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use easy_socket::{ConnectionHandler, EasySocket, Listened, ListenerGroup, SocketConfig};

fn loopback_server() -> (EasySocket, u16) {
    let config = SocketConfig::default().bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let server = EasySocket::server_with(0, &config).unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

/// Counts messages into its user data and reports on finish.
struct Counter {
    finished: Arc<AtomicUsize>,
    done: mpsc::Sender<usize>,
}

impl ConnectionHandler<usize> for Counter {
    fn on_data(&mut self, conn: &mut Listened<usize>) {
        let n = conn.message().len();
        if let Some(count) = conn.data_mut() {
            *count += n;
        }
    }

    fn on_finish(self, mut conn: Listened<usize>) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        let _ = self.done.send(conn.take_data().unwrap_or_default());
    }
}

#[test]
fn terminal_callback_fires_once_after_peer_close() {
    let (server, port) = loopback_server();
    let mut client = EasySocket::client_from_ip("127.0.0.1", port).unwrap();
    let conn: Listened<usize> = server.accept(32).unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();
    let handle = conn
        .with_data(0)
        .listen_with(Counter { finished: finished.clone(), done: done_tx })
        .unwrap();

    client.send(&[7u8; 100]).unwrap();
    client.close().unwrap();

    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 100);
    handle.join().unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(done_rx.try_recv().is_err());
}

#[test]
fn each_read_is_delivered_as_a_message() {
    let (server, port) = loopback_server();
    let mut client = EasySocket::client_from_ip("127.0.0.1", port).unwrap();
    let conn: Listened = server.accept(1024).unwrap();

    let (tx, rx) = mpsc::channel();
    let handle = conn
        .listen(
            move |c| {
                tx.send(c.message_str().into_owned()).unwrap();
                c.send_str("ok").unwrap();
            },
            |_| {},
        )
        .unwrap();

    for word in ["first", "second", "third"] {
        client.send_str(word).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), word);
        let mut ack = [0u8; 2];
        assert!(client.receive_fixed(&mut ack));
    }
    client.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn cancel_stops_an_idle_worker() {
    let (server, port) = loopback_server();
    let mut client = EasySocket::client_from_ip("127.0.0.1", port).unwrap();
    let conn: Listened = server.accept(64).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let handle = conn
        .listen(|_| {}, move |c| done_tx.send(c.peer_addr()).unwrap())
        .unwrap();
    assert!(!handle.is_finished());

    handle.cancel().unwrap();
    let peer = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(peer, handle.peer_addr());
    handle.join().unwrap();

    assert_eq!(client.receive().unwrap(), None);
}

#[test]
fn group_shuts_every_worker_down() {
    let (server, port) = loopback_server();
    let finished = Arc::new(AtomicUsize::new(0));
    let mut group = ListenerGroup::default();
    let mut clients = Vec::new();

    for _ in 0..3 {
        clients.push(EasySocket::client_from_ip("127.0.0.1", port).unwrap());
        let conn: Listened = server.accept(64).unwrap();
        let finished = finished.clone();
        group.push(
            conn.listen(|_| {}, move |_| {
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );
    }
    assert_eq!(group.len(), 3);
    assert_eq!(group.reap_finished(), 0);

    group.shutdown().unwrap();
    assert!(group.is_empty());
    assert_eq!(finished.load(Ordering::SeqCst), 3);
}

#[test]
fn finished_workers_are_reaped() {
    let (server, port) = loopback_server();
    let mut group = ListenerGroup::default();
    let mut client = EasySocket::client_from_ip("127.0.0.1", port).unwrap();
    let conn: Listened = server.accept(64).unwrap();
    let (done_tx, done_rx) = mpsc::channel();
    group.push(conn.listen(|_| {}, move |_| done_tx.send(()).unwrap()).unwrap());

    client.close().unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    while group.reap_finished() == 0 {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(group.is_empty());
}
