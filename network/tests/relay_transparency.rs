//! The relay must be a byte-transparent pipe in both directions.

#![cfg(target_os = "linux")]

use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::thread;

use rand::RngCore;
use warren_network::redirector::relay;

/// Client and proxy stand-ins on the outside, the relay in between.
struct Harness {
    client: UnixStream,
    proxy: UnixStream,
    relay: thread::JoinHandle<()>,
}

fn start_relay() -> Harness {
    let (client, inside) = UnixStream::pair().unwrap();
    let (proxy, outside) = UnixStream::pair().unwrap();

    let relay = thread::spawn(move || {
        relay(inside.as_raw_fd(), outside.as_raw_fd()).unwrap();
        // inside/outside drop here, closing the relay's ends.
    });

    Harness {
        client,
        proxy,
        relay,
    }
}

#[test]
fn forwards_a_request_verbatim() {
    let mut h = start_relay();

    let request = b"GET /index.html HTTP/1.1\r\nHost: example.com\n\n";
    h.client.write_all(request).unwrap();

    let mut seen = vec![0u8; request.len()];
    h.proxy.read_exact(&mut seen).unwrap();
    assert_eq!(seen, request);

    drop(h.client);
    h.relay.join().unwrap();
}

#[test]
fn forwards_the_return_path_verbatim() {
    let mut h = start_relay();

    let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
    h.proxy.write_all(reply).unwrap();

    let mut seen = vec![0u8; reply.len()];
    h.client.read_exact(&mut seen).unwrap();
    assert_eq!(seen, reply);

    drop(h.proxy);
    h.relay.join().unwrap();
}

#[test]
fn carries_streams_larger_than_the_scratch_buffer_in_order() {
    let mut h = start_relay();

    let mut payload = vec![0u8; 1 << 20];
    rand::thread_rng().fill_bytes(&mut payload);

    let expected = payload.clone();
    let mut client = h.client.try_clone().unwrap();
    let writer = thread::spawn(move || {
        client.write_all(&payload).unwrap();
    });

    let mut seen = vec![0u8; expected.len()];
    h.proxy.read_exact(&mut seen).unwrap();
    assert_eq!(seen, expected, "stream reordered or corrupted");

    writer.join().unwrap();
    drop(h.client);
    h.relay.join().unwrap();
}

#[test]
fn peer_close_tears_the_relay_down() {
    let h = start_relay();

    drop(h.client);
    h.relay.join().unwrap();

    // With the relay gone its proxy-side end is closed too.
    let mut proxy = h.proxy;
    let mut rest = Vec::new();
    proxy.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn close_with_queued_bytes_still_delivers_them() {
    let mut h = start_relay();

    let parting = b"final bytes before hangup";
    h.client.write_all(parting).unwrap();
    drop(h.client);

    let mut seen = Vec::new();
    h.proxy.read_to_end(&mut seen).unwrap();
    assert_eq!(seen, parting);

    h.relay.join().unwrap();
}
