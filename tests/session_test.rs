use pretty_assertions::assert_eq;
use rosc::{decoder::decode, encoder::encode, OscBundle, OscMessage, OscPacket, OscType};
use std::{
    net::{SocketAddr, UdpSocket},
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::{Duration, Instant},
};
use tidal_bridge::{
    config::Config,
    decode::{Level, MeteringEvent, TempoEvent, TriggerEvent, Value},
    session::{Event, Session},
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_trigger_events_from_bundle() {
    let peer = Peer::new();
    let (session, events) = Session::open(peer.config()).unwrap();
    expect_ready(&events);

    let sent_at = Instant::now();
    peer.send_to(
        session.local_addr().unwrap(),
        bundle(vec![
            message("/play2", vec![arg("s"), arg("sn"), arg("delta"), arg(0.2f32)]),
            message("/foo", vec![arg("s"), arg("ignored")]),
            message("/play2", vec![arg("s"), arg("bd"), arg("n"), arg(7)]),
        ]),
    );

    assert_eq!(
        expect_message(&events),
        trigger(vec![("s", Value::from("bd")), ("n", Value::Int(7))])
    );
    assert_eq!(
        expect_message(&events),
        trigger(vec![("s", Value::from("sn"))])
    );
    assert!(sent_at.elapsed() >= Duration::from_millis(200));
    assert_no_event(&events, Duration::from_millis(100));
}

#[test]
fn test_midi_data() {
    let peer = Peer::new();
    let (session, events) = Session::open(peer.config().add_midi_data(true)).unwrap();
    expect_ready(&events);

    peer.send_to(
        session.local_addr().unwrap(),
        message("/play2/extra", vec![arg("n"), arg(7)]),
    );

    let event = expect_message(&events);
    assert_eq!(event.get("midinote"), Some(&Value::Int(79)));
}

#[test]
fn test_malformed_messages_do_not_stop_the_session() {
    let peer = Peer::new();
    let (session, events) = Session::open(peer.config()).unwrap();
    expect_ready(&events);
    let addr = session.local_addr().unwrap();

    peer.send_to(addr, message("/play2", vec![arg("s")]));
    peer.socket.send_to(b"garbage", addr).unwrap();
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Error(_) => {}
        other => panic!("expected error, got {:?}", other),
    }

    peer.send_to(addr, message("/play2", vec![arg("s"), arg("hh")]));
    assert_eq!(
        expect_message(&events),
        trigger(vec![("s", Value::from("hh"))])
    );
}

#[test]
fn test_control_messages() {
    let peer = Peer::new();
    let (session, _events) = Session::open(peer.config()).unwrap();

    session.send_float("cutoff", "abc").unwrap();
    session.send_int("step", "x").unwrap();
    session.send_float("cutoff", "1.5").unwrap();
    session.send_int("step", 3).unwrap();
    session.send_string("scale", "major").unwrap();

    assert_eq!(
        peer.recv(),
        message("/ctrl", vec![arg("cutoff"), arg(1.5f32)])
    );
    assert_eq!(peer.recv(), message("/ctrl", vec![arg("step"), arg(3)]));
    assert_eq!(
        peer.recv(),
        message("/ctrl", vec![arg("scale"), arg("major")])
    );
}

#[test]
fn test_close_abandons_delayed_events() {
    let peer = Peer::new();
    let (session, events) = Session::open(peer.config()).unwrap();
    expect_ready(&events);

    peer.send_to(
        session.local_addr().unwrap(),
        message("/play2", vec![arg("s"), arg("bd"), arg("delta"), arg(0.5f32)]),
    );
    std::thread::sleep(Duration::from_millis(100));
    session.close();

    match events.recv_timeout(Duration::from_secs(1)) {
        Err(RecvTimeoutError::Disconnected) => {}
        other => panic!("expected no more events, got {:?}", other),
    }
}

#[test]
fn test_tempo_and_metering_subscriptions() {
    let tidal = Peer::new();
    let superdirt = Peer::new();
    let (session, events, in_port) = open_with_free_ports(|in_port| {
        tidal
            .config()
            .in_port(in_port)
            .listen_tempo(true)
            .tempo_port(tidal.port())
            .listen_rms(true)
            .rms_port(superdirt.port())
    });
    expect_ready(&events);

    assert_eq!(tidal.recv(), message("/hello", vec![]));
    assert_eq!(superdirt.recv(), message("/notify", vec![arg(1)]));

    let local: SocketAddr = ([127, 0, 0, 1], in_port + 1).into();
    tidal.send_to(
        local,
        message("/cps/cycle", vec![arg(2.0f32), arg(0.5f32), arg(false)]),
    );
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Tempo(event) => assert_eq!(
            event,
            TempoEvent {
                at_cycle: 2.0,
                cps: 0.5,
                paused: false,
            }
        ),
        other => panic!("expected tempo, got {:?}", other),
    }

    let local: SocketAddr = ([127, 0, 0, 1], in_port + 2).into();
    superdirt.send_to(
        local,
        message(
            "/rms",
            vec![arg(0), arg(3), arg(-6.0f32), arg(0.25f32), arg(-3.0f32), arg(0.5f32)],
        ),
    );
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Rms(event) => assert_eq!(
            event,
            MeteringEvent {
                orbit: 3,
                channels: vec![
                    Level {
                        peak: -6.0,
                        power: 0.25
                    },
                    Level {
                        peak: -3.0,
                        power: 0.5
                    },
                ],
            }
        ),
        other => panic!("expected rms, got {:?}", other),
    }

    drop(session);
}

struct Peer {
    socket: UdpSocket,
}

impl Peer {
    fn new() -> Peer {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        Peer { socket }
    }

    fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    fn config(&self) -> Config {
        Config::default().in_port(0).out_port(self.port())
    }

    fn send_to(&self, addr: SocketAddr, packet: OscPacket) {
        let bytes = encode(&packet).unwrap();
        self.socket.send_to(&bytes, addr).unwrap();
    }

    fn recv(&self) -> OscPacket {
        let mut buffer = [0; 65536];
        let (len, _) = self.socket.recv_from(&mut buffer).unwrap();
        decode(&buffer[..len]).unwrap()
    }
}

// The tempo and metering listeners bind fixed offsets from the main port, so search for a block
// of three free ports.
fn open_with_free_ports<F>(config: F) -> (Session, Receiver<Event>, u16)
where
    F: Fn(u16) -> Config,
{
    for in_port in (42000..43000).step_by(3) {
        if let Ok((session, events)) = Session::open(config(in_port)) {
            return (session, events, in_port);
        }
    }
    panic!("no free block of ports found");
}

fn expect_ready(events: &Receiver<Event>) {
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Ready => {}
        other => panic!("expected ready, got {:?}", other),
    }
}

fn expect_message(events: &Receiver<Event>) -> TriggerEvent {
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Message(event) => event,
        other => panic!("expected message, got {:?}", other),
    }
}

fn assert_no_event(events: &Receiver<Event>, wait: Duration) {
    if let Ok(event) = events.recv_timeout(wait) {
        panic!("unexpected event: {:?}", event);
    }
}

fn trigger(fields: Vec<(&str, Value)>) -> TriggerEvent {
    fields.into_iter().collect()
}

fn bundle(messages: Vec<OscPacket>) -> OscPacket {
    OscPacket::Bundle(OscBundle {
        timetag: (0, 1).into(),
        content: messages,
    })
}

fn message(addr: &str, args: Vec<OscType>) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: addr.to_owned(),
        args,
    })
}

fn arg(x: impl Into<OscType>) -> OscType {
    x.into()
}
