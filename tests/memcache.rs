use cacheprobe::memcache::{MemcacheClient, MemcacheError};
use cacheprobe::TcpClient;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Minimal memcache text-protocol server for one connection
///
/// Understands `stats`, `get`, `set` (with `noreply`). Key `full` always
/// fails to store; a malformed `set` gets a CLIENT_ERROR and a hang-up.
fn memcache_server() -> (SocketAddr, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let (sock, _) = listener.accept().expect("accept");
        serve(sock);
    });
    (addr, handle)
}

fn serve(sock: TcpStream) {
    let mut out = sock.try_clone().expect("clone");
    let mut reader = BufReader::new(sock);
    let mut store: HashMap<String, (u32, Vec<u8>)> = HashMap::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let parts: Vec<&str> = line.trim_end().split(' ').collect();
        match parts.as_slice() {
            ["stats"] => {
                // Split across two writes so the client has to buffer
                out.write_all(b"STAT pid 42\r\nSTAT curr_").unwrap();
                out.flush().unwrap();
                thread::sleep(Duration::from_millis(20));
                out.write_all(format!("items {}\r\nEND\r\n", store.len()).as_bytes()).unwrap();
            }
            ["get", keys @ ..] => {
                let mut reply = Vec::new();
                for k in keys {
                    if let Some((flags, data)) = store.get(*k) {
                        reply.extend_from_slice(format!("VALUE {} {} {}\r\n", k, flags, data.len()).as_bytes());
                        reply.extend_from_slice(data);
                        reply.extend_from_slice(b"\r\n");
                    }
                }
                reply.extend_from_slice(b"END\r\n");
                out.write_all(&reply).unwrap();
            }
            ["set", key, flags, _exptime, len, rest @ ..] => {
                let len: usize = len.parse().unwrap();
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data).unwrap();
                data.truncate(len);

                let reply: &[u8] = if *key == "full" {
                    b"SERVER_ERROR out of memory storing object\r\n"
                } else {
                    store.insert(key.to_string(), (flags.parse().unwrap(), data));
                    b"STORED\r\n"
                };
                if rest != ["noreply"] {
                    out.write_all(reply).unwrap();
                }
            }
            _ => {
                out.write_all(b"CLIENT_ERROR bad command line format\r\n").unwrap();
                return;
            }
        }
    }
}

#[test]
fn stats_are_ordered_and_buffered() {
    let (addr, server) = memcache_server();
    let mut mc = MemcacheClient::new("127.0.0.1", addr.port());

    let stats = mc.get_stats().unwrap();
    let names: Vec<&str> = stats.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, ["pid", "curr_items"]);
    assert_eq!(stats[0].1, "42");
    assert_eq!(stats[1].1, "0");

    drop(mc);
    server.join().unwrap();
}

#[test]
fn set_then_get() {
    let (addr, server) = memcache_server();
    let mut mc = MemcacheClient::new("127.0.0.1", addr.port());

    mc.set("greeting", b"hello\r\nworld", 5, 0, false).unwrap();
    mc.set("quiet", b"shh", 0, 0, true).unwrap();

    let item = mc.get("greeting").unwrap();
    assert_eq!(item.flags, 5);
    assert_eq!(&item.value[..], b"hello\r\nworld");

    let items = mc.get_multi(&["quiet", "absent", "greeting"]).unwrap();
    let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(keys, ["quiet", "greeting"]);

    let stats = mc.get_stats().unwrap();
    assert_eq!(stats[1].0, "curr_items");
    assert_eq!(stats[1].1, "2");

    drop(mc);
    server.join().unwrap();
}

#[test]
fn missing_item_is_not_found() {
    let (addr, server) = memcache_server();
    let mut mc = MemcacheClient::new("127.0.0.1", addr.port());

    assert!(matches!(mc.get("nope"), Err(MemcacheError::ItemNotFound(ref k)) if k == "nope"));

    drop(mc);
    server.join().unwrap();
}

#[test]
fn rejected_set_reports_reply() {
    let (addr, server) = memcache_server();
    let mut mc = MemcacheClient::new("127.0.0.1", addr.port());

    match mc.set("full", b"x", 0, 0, false) {
        Err(MemcacheError::SetFailed { key, reply }) => {
            assert_eq!(key, "full");
            assert!(reply.starts_with("SERVER_ERROR"));
        }
        other => panic!("expected SetFailed, got {:?}", other),
    }

    drop(mc);
    server.join().unwrap();
}

#[test]
fn invalid_key_fails_before_connecting() {
    let mut mc = MemcacheClient::new("this-host-does-not-exist.invalid", 11211);
    assert!(matches!(mc.set("bad key", b"v", 0, 0, false), Err(MemcacheError::InvalidKey(_))));
    assert!(matches!(mc.get_multi(&["ok", ""]), Err(MemcacheError::InvalidKey(_))));
    assert!(!mc.client().is_connected());
}

#[test]
fn malformed_command_gets_client_error() {
    let (addr, server) = memcache_server();
    let mut mc = MemcacheClient::from_client(TcpClient::new("127.0.0.1", addr.port()));

    let reply = mc.send_malformed_cmd().unwrap();
    assert_eq!(&reply[..], b"CLIENT_ERROR bad command line format");

    server.join().unwrap();
}

#[test]
fn hang_up_mid_reply_is_connection_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        let _ = sock.read(&mut buf).unwrap();
        sock.write_all(b"STAT pid 1\r\n").unwrap();
    });

    let mut mc = MemcacheClient::new("127.0.0.1", addr.port());
    assert!(matches!(mc.get_stats(), Err(MemcacheError::ConnectionClosed)));

    server.join().unwrap();
}
