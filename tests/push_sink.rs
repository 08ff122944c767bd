use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    thread,
    time::Duration,
};

use pushwire::{Config, DispatchResult, Dispatcher};

/// Minimal ZMTP 3.0 PULL peer: completes the handshake on every accepted connection and
/// forwards each received message body over `tx`.
fn spawn_pull_sink() -> (u16, mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let tx = tx.clone();
            thread::spawn(move || serve(stream, tx));
        }
    });

    (port, rx)
}

fn serve(mut stream: TcpStream, tx: mpsc::Sender<Vec<u8>>) -> Option<()> {
    let mut greeting = [0u8; 64];
    stream.read_exact(&mut greeting).ok()?;
    assert_eq!(greeting[0], 0xFF);
    assert_eq!(&greeting[12..16], b"NULL");

    let mut ours = [0u8; 64];
    ours[0] = 0xFF;
    ours[9] = 0x7F;
    ours[10] = 3;
    ours[12..16].copy_from_slice(b"NULL");
    stream.write_all(&ours).ok()?;

    let (flags, ready) = read_frame(&mut stream)?;
    assert_eq!(flags & 0x04, 0x04);
    assert!(ready.starts_with(b"\x05READY"));
    assert!(ready.windows(4).any(|w| w == b"PUSH"));

    let mut body = vec![5];
    body.extend_from_slice(b"READY");
    body.push(11);
    body.extend_from_slice(b"Socket-Type");
    body.extend_from_slice(&4u32.to_be_bytes());
    body.extend_from_slice(b"PULL");
    stream.write_all(&[0x04, body.len() as u8]).ok()?;
    stream.write_all(&body).ok()?;

    loop {
        let (flags, message) = read_frame(&mut stream)?;
        assert_eq!(flags & 0x05, 0, "expected a single-part message frame");
        tx.send(message).ok()?;
    }
}

fn read_frame(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut flags = [0u8; 1];
    stream.read_exact(&mut flags).ok()?;
    let size = if flags[0] & 0x02 != 0 {
        let mut size = [0u8; 8];
        stream.read_exact(&mut size).ok()?;
        u64::from_be_bytes(size) as usize
    } else {
        let mut size = [0u8; 1];
        stream.read_exact(&mut size).ok()?;
        size[0] as usize
    };
    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).ok()?;
    Some((flags[0], body))
}

fn dispatcher(port: u16, format: &str, lazy: bool) -> Dispatcher {
    let mut config = Config {
        server: format!("tcp://127.0.0.1:{port}"),
        format: format.to_string(),
        lazy_connect: lazy,
        ..Default::default()
    };
    config.pool.max = 2;
    Dispatcher::from_settings(&config.validate().unwrap()).unwrap()
}

#[test]
fn raw_messages_reach_the_sink() {
    let (port, rx) = spawn_pull_sink();
    let dispatcher = dispatcher(port, "raw", true);

    assert!(dispatcher.dispatch(b"hello").is_sent());
    assert!(dispatcher.dispatch(&vec![b'x'; 1000]).is_sent());

    let timeout = Duration::from_secs(5);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), b"hello");
    assert_eq!(rx.recv_timeout(timeout).unwrap(), vec![b'x'; 1000]);
    assert_eq!(dispatcher.status().active, 1);
}

#[test]
fn structured_messages_arrive_as_bson() {
    let (port, rx) = spawn_pull_sink();
    let dispatcher = dispatcher(port, "structured", false);
    assert_eq!(dispatcher.status().idle, 1);

    assert!(dispatcher.dispatch(br#"{"a":1}"#).is_sent());
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        vec![0x0C, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 0]
    );
}

#[test]
fn unreachable_sink_is_skipped_when_lazy() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dispatcher = dispatcher(port, "raw", true);
    assert!(matches!(
        dispatcher.dispatch(b"hello"),
        DispatchResult::Skipped
    ));
    assert_eq!(dispatcher.status().active, 0);
}

#[test]
fn unreachable_sink_aborts_eager_startup() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = Config {
        server: format!("tcp://127.0.0.1:{port}"),
        lazy_connect: false,
        ..Default::default()
    };
    let err = Dispatcher::from_settings(&config.validate().unwrap())
        .err()
        .unwrap();
    assert!(matches!(err, pushwire::ConfigError::InitialConnect(_)));
}
