//! Full-stack smoke test: real sockets, real threads, one request flow
//! end to end through acceptor → ring → worker → engine.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rcache_core::metrics::MetricGroup;
use rcache_server::{Instance, ServerOptions};
use rcache_slab::{SlabEngine, SlabOptions};

fn start_instance() -> (std::net::SocketAddr, std::net::SocketAddr) {
    let opts = ServerOptions {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        admin_host: "127.0.0.1".to_string(),
        admin_port: 0,
        ..ServerOptions::default()
    };
    let engine = SlabEngine::new(&SlabOptions {
        prealloc: false,
        slab_size: 64 * 1024,
        maxbytes: 16 * 64 * 1024,
        hash_power: 8,
        ..SlabOptions::default()
    });
    let groups: Vec<Arc<dyn MetricGroup>> = vec![engine.metrics()];

    let instance = Instance::setup(&opts, engine, groups).unwrap();
    let data = instance.data_addr();
    let admin = instance.admin_addr();
    std::thread::spawn(move || instance.run());
    (data, admin)
}

fn send_recv(stream: &mut TcpStream, req: &[u8], want: &[u8]) {
    stream.write_all(req).unwrap();
    let mut got = vec![0u8; want.len()];
    stream.read_exact(&mut got).unwrap();
    assert_eq!(
        got,
        want,
        "request {:?}",
        String::from_utf8_lossy(req)
    );
}

#[test]
fn test_data_port_end_to_end() {
    let (data, _admin) = start_instance();
    let mut c = TcpStream::connect(data).unwrap();
    c.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    send_recv(&mut c, b"set foo 0 0 3\r\nbar\r\n", b"STORED\r\n");
    send_recv(&mut c, b"get foo\r\n", b"VALUE foo 0 3\r\nbar\r\nEND\r\n");
    send_recv(&mut c, b"add foo 0 0 3\r\nbaz\r\n", b"NOT_STORED\r\n");
    send_recv(&mut c, b"cas foo 0 0 3 999\r\nqux\r\n", b"EXISTS\r\n");
    send_recv(&mut c, b"incr n 1\r\n", b"NOT_FOUND\r\n");
    send_recv(&mut c, b"set n 0 0 1\r\n4\r\n", b"STORED\r\n");
    send_recv(&mut c, b"incr n 3\r\n", b"7\r\n");
    send_recv(&mut c, b"delete foo\r\n", b"DELETED\r\n");
    send_recv(&mut c, b"get foo\r\n", b"END\r\n");

    // quit closes the connection without a reply
    c.write_all(b"quit\r\n").unwrap();
    let mut rest = Vec::new();
    let n = c.read_to_end(&mut rest).unwrap();
    assert_eq!(n, 0);
}

#[test]
fn test_multiple_connections_are_isolated_in_order() {
    let (data, _admin) = start_instance();
    let mut a = TcpStream::connect(data).unwrap();
    let mut b = TcpStream::connect(data).unwrap();
    a.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    b.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    send_recv(&mut a, b"set from_a 0 0 1\r\na\r\n", b"STORED\r\n");
    send_recv(&mut b, b"get from_a\r\n", b"VALUE from_a 0 1\r\na\r\nEND\r\n");

    // pipelined requests answered strictly in order
    send_recv(
        &mut a,
        b"set x 0 0 1\r\n1\r\nget x\r\nget missing\r\n",
        b"STORED\r\nVALUE x 0 1\r\n1\r\nEND\r\nEND\r\n",
    );
}

#[test]
fn test_admin_endpoint() {
    let (_data, admin) = start_instance();
    let mut c = TcpStream::connect(admin).unwrap();
    c.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    c.write_all(b"version\r\n").unwrap();
    let mut buf = [0u8; 64];
    let n = c.read(&mut buf).unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]).to_string();
    assert!(reply.starts_with("VERSION "), "got {:?}", reply);

    c.write_all(b"stats\r\n").unwrap();
    let mut stats = String::new();
    let mut chunk = [0u8; 4096];
    while !stats.ends_with("END\r\n") {
        let n = c.read(&mut chunk).unwrap();
        assert!(n > 0, "admin closed early");
        stats.push_str(&String::from_utf8_lossy(&chunk[..n]));
    }
    assert!(stats.contains("STAT "), "got {:?}", stats);

    c.write_all(b"quit\r\n").unwrap();
    let mut rest = Vec::new();
    assert_eq!(c.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn test_protocol_error_closes_connection() {
    let (data, _admin) = start_instance();
    let mut c = TcpStream::connect(data).unwrap();
    c.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    c.write_all(b"bogus command\r\n").unwrap();
    let mut reply = Vec::new();
    c.read_to_end(&mut reply).unwrap();
    let text = String::from_utf8_lossy(&reply);
    assert!(text.starts_with("CLIENT_ERROR"), "got {:?}", text);
    // connection is closed after the error (read_to_end returned)
}
