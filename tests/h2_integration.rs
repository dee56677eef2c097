//! HTTP/2 integration tests driving `H2Server` with raw client frames.
//!
//! The client side is hand-rolled from the crate's own frame encoder and
//! HPACK codec, so every test sees exactly the bytes a real peer would put
//! on the wire and exactly the frames the server answers with.

use milli_h2::error::{Error, ErrorCode};
use milli_h2::h2::frame::{Frame, decode_frame, encode_frame};
use milli_h2::h2::{
    CONNECTION_PREFACE, H2Config, H2Event, H2Server, SettingsParams, TimeoutConfig,
    UnknownFramePolicy,
};
use milli_h2::hpack::{HpackDecoder, HpackEncoder};
use milli_h2::http::{FieldBlock, HeaderName, StatusCode};

// ---------------------------------------------------------------------------
// Test infrastructure
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A frame the server sent, with header blocks already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Got {
    Settings { ack: bool, params: SettingsParams },
    Headers { stream_id: u32, fields: FieldBlock, end_stream: bool },
    Data { stream_id: u32, data: Vec<u8>, end_stream: bool },
    Reset { stream_id: u32, code: ErrorCode },
    GoAway { last_stream_id: u32, code: ErrorCode },
    WindowUpdate { stream_id: u32, increment: u32 },
    Ping { ack: bool, data: [u8; 8] },
}

fn wire(frame: &Frame<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    encode_frame(frame, &mut out);
    out
}

/// A frame with an arbitrary header, for inputs the encoder refuses to make.
fn raw(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, frame_type, flags];
    out.extend_from_slice(&stream_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn data(stream_id: u32, bytes: &[u8], end_stream: bool) -> Vec<u8> {
    wire(&Frame::Data {
        stream_id,
        data: bytes,
        end_stream,
        pad: None,
    })
}

fn window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    wire(&Frame::WindowUpdate {
        stream_id,
        increment,
    })
}

fn settings(params: SettingsParams) -> Vec<u8> {
    wire(&Frame::Settings { ack: false, params })
}

struct Client {
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    pending: Option<(u32, bool, Vec<u8>)>,
    unread: Vec<u8>,
    continuations: usize,
}

impl Client {
    fn new() -> Self {
        Self {
            encoder: HpackEncoder::default(),
            decoder: HpackDecoder::default(),
            pending: None,
            unread: Vec::new(),
            continuations: 0,
        }
    }

    fn preface(&self, params: SettingsParams) -> Vec<u8> {
        let mut out = CONNECTION_PREFACE.to_vec();
        out.extend(settings(params));
        out
    }

    fn headers(&mut self, stream_id: u32, fields: &FieldBlock, end_stream: bool) -> Vec<u8> {
        let mut block = Vec::new();
        self.encoder.encode(fields, &mut block);
        wire(&Frame::Headers {
            stream_id,
            fragment: &block,
            end_stream,
            end_headers: true,
            priority: None,
            pad: None,
        })
    }

    fn request(&mut self, stream_id: u32, method: &str, path: &str, end_stream: bool) -> Vec<u8> {
        let mut fields = FieldBlock::new();
        fields.add(":method", method);
        fields.add(":scheme", "https");
        fields.add(":authority", "example.com");
        fields.add(":path", path);
        self.headers(stream_id, &fields, end_stream)
    }

    /// Drain the server's output and decode every complete frame.
    fn read(&mut self, server: &mut H2Server) -> Vec<Got> {
        let mut buf = [0u8; 4096];
        while let Some(chunk) = server.poll_output(&mut buf) {
            self.unread.extend_from_slice(chunk);
        }

        let unread = std::mem::take(&mut self.unread);
        let mut got = Vec::new();
        let mut pos = 0;
        while pos < unread.len() {
            let (frame, n) = match decode_frame(&unread[pos..], 1 << 24) {
                Ok(decoded) => decoded,
                Err(Error::BufferTooSmall { .. }) => break,
                Err(err) => panic!("server sent a malformed frame: {err}"),
            };
            pos += n;
            match frame {
                Frame::Settings { ack, params } => got.push(Got::Settings { ack, params }),
                Frame::Headers {
                    stream_id,
                    fragment,
                    end_stream,
                    end_headers,
                    ..
                } => {
                    if end_headers {
                        got.push(self.decode_block(stream_id, fragment, end_stream));
                    } else {
                        self.pending = Some((stream_id, end_stream, fragment.to_vec()));
                    }
                }
                Frame::Continuation {
                    stream_id,
                    fragment,
                    end_headers,
                } => {
                    self.continuations += 1;
                    let (pending_id, end_stream, mut block) =
                        self.pending.take().expect("CONTINUATION without HEADERS");
                    assert_eq!(pending_id, stream_id);
                    block.extend_from_slice(fragment);
                    if end_headers {
                        got.push(self.decode_block(stream_id, &block, end_stream));
                    } else {
                        self.pending = Some((stream_id, end_stream, block));
                    }
                }
                Frame::Data {
                    stream_id,
                    data,
                    end_stream,
                    ..
                } => got.push(Got::Data {
                    stream_id,
                    data: data.to_vec(),
                    end_stream,
                }),
                Frame::RstStream {
                    stream_id,
                    error_code,
                } => got.push(Got::Reset {
                    stream_id,
                    code: error_code,
                }),
                Frame::GoAway {
                    last_stream_id,
                    error_code,
                    ..
                } => got.push(Got::GoAway {
                    last_stream_id,
                    code: error_code,
                }),
                Frame::WindowUpdate {
                    stream_id,
                    increment,
                } => got.push(Got::WindowUpdate {
                    stream_id,
                    increment,
                }),
                Frame::Ping { data, ack } => got.push(Got::Ping { ack, data }),
                other => panic!("unexpected frame from server: {other:?}"),
            }
        }
        self.unread = unread[pos..].to_vec();
        got
    }

    fn decode_block(&mut self, stream_id: u32, block: &[u8], end_stream: bool) -> Got {
        Got::Headers {
            stream_id,
            fields: self.decoder.decode(block).expect("server header block"),
            end_stream,
        }
    }
}

fn drain_events(server: &mut H2Server) -> Vec<H2Event> {
    let mut events = Vec::new();
    while let Some(ev) = server.poll_event() {
        events.push(ev);
    }
    events
}

/// Connect with our SETTINGS acknowledged and `Connected` drained.
fn connect_with(config: H2Config, params: SettingsParams) -> (Client, H2Server) {
    init_tracing();
    let mut server = H2Server::new(config);
    let mut client = Client::new();
    server.feed_data(&client.preface(params)).unwrap();
    server
        .feed_data(&wire(&Frame::Settings {
            ack: true,
            params: SettingsParams::default(),
        }))
        .unwrap();

    let got = client.read(&mut server);
    assert!(matches!(got[0], Got::Settings { ack: false, .. }), "got {got:?}");
    assert!(got.contains(&Got::Settings {
        ack: true,
        params: SettingsParams::default()
    }));
    assert_eq!(drain_events(&mut server), [H2Event::Connected]);
    assert!(server.is_established());
    (client, server)
}

fn connect(config: H2Config) -> (Client, H2Server) {
    connect_with(config, SettingsParams::default())
}

fn status_of(got: &Got) -> &[u8] {
    match got {
        Got::Headers { fields, .. } => fields.get(&HeaderName::Status).expect(":status"),
        other => panic!("expected HEADERS, got {other:?}"),
    }
}

fn respond(server: &mut H2Server, stream_id: u32, body: &[u8]) {
    server
        .send_response(stream_id, StatusCode::OK, &FieldBlock::new(), false)
        .unwrap();
    assert_eq!(server.send_data(stream_id, body, true).unwrap(), body.len());
}

fn assert_goaway(server: &mut H2Server, client: &mut Client, last_stream_id: u32, code: ErrorCode) {
    let got = client.read(server);
    assert_eq!(got.last(), Some(&Got::GoAway { last_stream_id, code }), "got {got:?}");
    assert!(server.is_closed());
}

fn feed_expect_error(server: &mut H2Server, bytes: &[u8], code: ErrorCode) {
    match server.feed_data(bytes) {
        Err(Error::Http2(err)) => {
            assert!(err.is_connection(), "{err}");
            assert_eq!(err.code, code, "{err}");
        }
        other => panic!("expected connection error {code}, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Basic exchange
// ---------------------------------------------------------------------------

#[test]
fn get_hello_answered_with_single_headers_frame() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/hello", true)).unwrap();

    let events = drain_events(&mut server);
    let [H2Event::Headers {
        stream_id: 1,
        fields,
        end_stream: true,
    }] = &events[..]
    else {
        panic!("expected request headers, got {events:?}");
    };
    assert_eq!(fields.get(&HeaderName::Method), Some(&b"GET"[..]));
    assert_eq!(fields.get(&HeaderName::Path), Some(&b"/hello"[..]));

    let head = server.request_head(1).unwrap();
    assert_eq!(head.authority.as_deref(), Some(&b"example.com"[..]));

    server
        .send_response(1, StatusCode::ACCEPTED, &FieldBlock::new(), true)
        .unwrap();
    let got = client.read(&mut server);
    assert_eq!(got.len(), 1, "got {got:?}");
    assert_eq!(status_of(&got[0]), b"202");
    assert!(matches!(
        got[0],
        Got::Headers {
            stream_id: 1,
            end_stream: true,
            ..
        }
    ));
    assert_eq!(
        drain_events(&mut server),
        [H2Event::StreamComplete {
            stream_id: 1,
            success: true
        }]
    );
    assert_eq!(server.stats().completed_requests, 1);
}

#[test]
fn request_body_and_trailers_in_both_directions() {
    let (mut client, mut server) = connect(H2Config::default());
    let mut bytes = client.request(1, "POST", "/upload", false);
    bytes.extend(data(1, b"body", false));
    let mut trailers = FieldBlock::new();
    trailers.add("x-checksum", "abc");
    bytes.extend(client.headers(1, &trailers, true));
    server.feed_data(&bytes).unwrap();

    let events = drain_events(&mut server);
    assert_eq!(events.len(), 3, "{events:?}");
    assert_eq!(
        events[1],
        H2Event::Data {
            stream_id: 1,
            data: b"body".to_vec(),
            end_stream: false
        }
    );
    let H2Event::Headers {
        fields, end_stream, ..
    } = &events[2]
    else {
        panic!("expected trailers, got {:?}", events[2]);
    };
    assert!(end_stream);
    assert_eq!(fields.get(&HeaderName::from_bytes(b"x-checksum")), Some(&b"abc"[..]));

    server
        .send_response(1, StatusCode::OK, &FieldBlock::new(), false)
        .unwrap();
    assert_eq!(server.send_data(1, b"ok", false).unwrap(), 2);
    let mut response_trailers = FieldBlock::new();
    response_trailers.add("grpc-status", "0");
    server.send_trailers(1, &response_trailers).unwrap();

    let got = client.read(&mut server);
    assert_eq!(got.len(), 3, "{got:?}");
    assert_eq!(
        got[1],
        Got::Data {
            stream_id: 1,
            data: b"ok".to_vec(),
            end_stream: false
        }
    );
    let Got::Headers {
        fields,
        end_stream: true,
        ..
    } = &got[2]
    else {
        panic!("expected response trailers, got {:?}", got[2]);
    };
    assert_eq!(fields.get(&HeaderName::from_bytes(b"grpc-status")), Some(&b"0"[..]));
    assert_eq!(server.stats().completed_requests, 1);
}

#[test]
fn trailers_need_a_response_head() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    assert_eq!(
        server.send_trailers(1, &FieldBlock::new()),
        Err(Error::InvalidState)
    );
}

#[test]
fn informational_response_precedes_final() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "POST", "/", false)).unwrap();
    server
        .send_response(1, StatusCode::CONTINUE, &FieldBlock::new(), false)
        .unwrap();
    assert_eq!(
        server.send_response(1, StatusCode::CONTINUE, &FieldBlock::new(), true),
        Err(Error::InvalidState)
    );
    server.feed_data(&data(1, b"x", true)).unwrap();
    respond(&mut server, 1, b"done");

    let got = client.read(&mut server);
    assert_eq!(status_of(&got[0]), b"100");
    assert_eq!(status_of(&got[1]), b"200");
    assert_eq!(server.stats().completed_requests, 1);
}

#[test]
fn statistics_count_bytes_both_ways() {
    let (mut client, mut server) = connect(H2Config::default());
    let before_in = server.stats().bytes_received;
    let bytes = client.request(1, "GET", "/", true);
    server.feed_data(&bytes).unwrap();
    assert_eq!(server.stats().bytes_received, before_in + bytes.len() as u64);

    let before_out = server.stats().bytes_sent;
    respond(&mut server, 1, b"hello");
    let mut buf = [0u8; 64];
    let mut sent = 0;
    while let Some(chunk) = server.poll_output(&mut buf) {
        sent += chunk.len();
    }
    assert_eq!(server.stats().bytes_sent, before_out + sent as u64);
}

// ---------------------------------------------------------------------------
// Preface and SETTINGS
// ---------------------------------------------------------------------------

#[test]
fn invalid_preface_gets_goaway_zero() {
    init_tracing();
    let mut server = H2Server::default();
    let mut client = Client::new();
    feed_expect_error(&mut server, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", ErrorCode::ProtocolError);
    let got = client.read(&mut server);
    assert!(matches!(got[0], Got::Settings { ack: false, .. }));
    assert_eq!(
        got[1],
        Got::GoAway {
            last_stream_id: 0,
            code: ErrorCode::ProtocolError
        }
    );
    assert_eq!(server.feed_data(b"more"), Err(Error::Closed));
}

#[test]
fn first_frame_must_be_settings() {
    init_tracing();
    let mut server = H2Server::default();
    let mut client = Client::new();
    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend(window_update(0, 100));
    feed_expect_error(&mut server, &bytes, ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);
}

#[test]
fn settings_ack_with_payload_is_frame_size_error() {
    let (mut client, mut server) = connect(H2Config::default());
    feed_expect_error(&mut server, &raw(0x4, 0x1, 0, &[0, 3, 0, 0, 0, 1]), ErrorCode::FrameSizeError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::FrameSizeError);
}

#[test]
fn settings_values_are_range_checked() {
    let cases: [(&[u8], ErrorCode); 4] = [
        (&[0, 2, 0, 0, 0, 2], ErrorCode::ProtocolError),
        (&[0, 4, 0x80, 0, 0, 0], ErrorCode::FlowControlError),
        (&[0, 5, 0, 0, 0x3f, 0xff], ErrorCode::ProtocolError),
        (&[0, 5, 0x01, 0, 0, 0], ErrorCode::ProtocolError),
    ];
    for (payload, code) in cases {
        let (mut client, mut server) = connect(H2Config::default());
        feed_expect_error(&mut server, &raw(0x4, 0, 0, payload), code);
        assert_goaway(&mut server, &mut client, 0, code);
    }
}

#[test]
fn unknown_settings_are_ignored() {
    let (mut client, mut server) = connect(H2Config::default());
    server
        .feed_data(&raw(0x4, 0, 0, &[0, 0x2, 0, 0, 0, 1, 0x12, 0x34, 0xde, 0xad, 0xbe, 0xef]))
        .unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Settings {
            ack: true,
            params: SettingsParams::default()
        }]
    );
}

#[test]
fn peer_table_size_zero_keeps_responses_decodable() {
    let (mut client, mut server) = connect(H2Config::default());
    server
        .feed_data(&settings(SettingsParams {
            header_table_size: Some(0),
            ..SettingsParams::default()
        }))
        .unwrap();
    client.read(&mut server);

    for stream_id in [1, 3] {
        server.feed_data(&client.request(stream_id, "GET", "/", true)).unwrap();
        let mut headers = FieldBlock::new();
        headers.add("x-served-by", "milli");
        server
            .send_response(stream_id, StatusCode::OK, &headers, true)
            .unwrap();
        let got = client.read(&mut server);
        let Got::Headers { fields, .. } = &got[0] else {
            panic!("expected HEADERS, got {got:?}");
        };
        assert_eq!(fields.get(&HeaderName::from_bytes(b"x-served-by")), Some(&b"milli"[..]));
    }
    assert_eq!(client.decoder.table().size(), 0);
}

#[test]
fn oversized_frame_is_frame_size_error() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "POST", "/", false)).unwrap();
    feed_expect_error(&mut server, &data(1, &[0u8; 16_385], false), ErrorCode::FrameSizeError);
    assert_goaway(&mut server, &mut client, 1, ErrorCode::FrameSizeError);
}

#[test]
fn ping_is_answered_and_flags_ignored() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&raw(0x6, 0xf6, 0, b"pingpong")).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Ping {
            ack: true,
            data: *b"pingpong"
        }]
    );

    // An ACK is not answered.
    server.feed_data(&raw(0x6, 0x1, 0, b"pingpong")).unwrap();
    assert!(client.read(&mut server).is_empty());

    feed_expect_error(&mut server, &raw(0x6, 0, 0, b"short"), ErrorCode::FrameSizeError);
}

// ---------------------------------------------------------------------------
// Stream id admission
// ---------------------------------------------------------------------------

#[test]
fn increasing_odd_ids_open() {
    let (mut client, mut server) = connect(H2Config::default());
    for stream_id in [1, 3, 7, 101, 0x7fff_ffff] {
        server.feed_data(&client.request(stream_id, "GET", "/", true)).unwrap();
    }
    let opened: Vec<u32> = drain_events(&mut server)
        .into_iter()
        .map(|ev| match ev {
            H2Event::Headers { stream_id, .. } => stream_id,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(opened, [1, 3, 7, 101, 0x7fff_ffff]);
    assert!(client.read(&mut server).is_empty());
}

#[test]
fn even_stream_id_is_connection_error() {
    let (mut client, mut server) = connect(H2Config::default());
    let mut bytes = client.request(2, "GET", "/", true);
    bytes.extend(raw(0x6, 0, 0, b"12345678"));
    feed_expect_error(&mut server, &bytes, ErrorCode::ProtocolError);
    // The PING behind the bad frame is never processed.
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);
}

#[test]
fn stream_zero_headers_is_connection_error() {
    let (mut client, mut server) = connect(H2Config::default());
    feed_expect_error(&mut server, &client.request(0, "GET", "/", true), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);
}

#[test]
fn reused_stream_id_is_connection_error() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    respond(&mut server, 1, b"");
    client.read(&mut server);

    feed_expect_error(&mut server, &client.request(1, "GET", "/", true), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 1, ErrorCode::ProtocolError);
}

#[test]
fn decreasing_stream_id_is_connection_error() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(5, "GET", "/", true)).unwrap();
    feed_expect_error(&mut server, &client.request(3, "GET", "/", true), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 5, ErrorCode::ProtocolError);

    let events = drain_events(&mut server);
    assert_eq!(
        events.last(),
        Some(&H2Event::StreamComplete {
            stream_id: 5,
            success: false
        })
    );
}

#[test]
fn concurrency_limit_refuses_then_admits_retry() {
    let (mut client, mut server) = connect(H2Config::default().with_max_concurrent_streams(2));
    let mut bytes = client.request(1, "GET", "/a", true);
    bytes.extend(client.request(3, "GET", "/b", true));
    bytes.extend(client.request(5, "GET", "/c", true));
    server.feed_data(&bytes).unwrap();

    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 5,
            code: ErrorCode::RefusedStream
        }]
    );
    assert_eq!(drain_events(&mut server).len(), 2);
    assert_eq!(server.stats().refused_streams, 1);

    // Completion order is up to the application.
    respond(&mut server, 3, b"b");
    respond(&mut server, 1, b"a");
    let got = client.read(&mut server);
    assert_eq!(got.len(), 4);
    assert!(matches!(got[0], Got::Headers { stream_id: 3, .. }));
    assert!(matches!(got[2], Got::Headers { stream_id: 1, .. }));

    // The refused id was never consumed.
    server.feed_data(&client.request(5, "GET", "/c", true)).unwrap();
    server.feed_data(&client.request(7, "GET", "/d", true)).unwrap();
    let events = drain_events(&mut server);
    assert!(matches!(events[..], [
        H2Event::StreamComplete { stream_id: 3, success: true },
        H2Event::StreamComplete { stream_id: 1, success: true },
        H2Event::Headers { stream_id: 5, .. },
        H2Event::Headers { stream_id: 7, .. },
    ]), "{events:?}");
    assert!(client.read(&mut server).is_empty());
}

#[test]
fn headers_on_half_closed_stream_is_stream_closed() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    let mut trailers = FieldBlock::new();
    trailers.add("x-late", "1");
    server.feed_data(&client.headers(1, &trailers, true)).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 1,
            code: ErrorCode::StreamClosed
        }]
    );
    assert!(!server.is_closed());
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

#[test]
fn malformed_requests_are_stream_errors() {
    let (mut client, mut server) = connect(H2Config::default());

    let mut upper = FieldBlock::new();
    upper.add(":method", "GET");
    upper.add(":scheme", "https");
    upper.add(":path", "/");
    upper.add("X-Upper", "1");
    server.feed_data(&client.headers(1, &upper, true)).unwrap();

    let mut connection_specific = FieldBlock::new();
    connection_specific.add(":method", "GET");
    connection_specific.add(":scheme", "https");
    connection_specific.add(":path", "/");
    connection_specific.add("connection", "keep-alive");
    server.feed_data(&client.headers(3, &connection_specific, true)).unwrap();

    let mut status = FieldBlock::new();
    status.add(":method", "GET");
    status.add(":scheme", "https");
    status.add(":path", "/");
    status.add(":status", "200");
    server.feed_data(&client.headers(5, &status, true)).unwrap();

    let got = client.read(&mut server);
    assert_eq!(
        got,
        [1, 3, 5].map(|stream_id| Got::Reset {
            stream_id,
            code: ErrorCode::ProtocolError
        })
    );
    assert_eq!(server.stats().invalid_requests, 3);
    assert!(drain_events(&mut server).is_empty());

    // The connection keeps serving.
    server.feed_data(&client.request(7, "GET", "/", true)).unwrap();
    assert_eq!(drain_events(&mut server).len(), 1);
}

#[test]
fn content_length_mismatch_resets_stream() {
    let (mut client, mut server) = connect(H2Config::default());
    let mut fields = FieldBlock::new();
    fields.add(":method", "POST");
    fields.add(":scheme", "https");
    fields.add(":path", "/");
    fields.add("content-length", "10");
    let mut bytes = client.headers(1, &fields, false);
    bytes.extend(data(1, b"four", true));
    server.feed_data(&bytes).unwrap();

    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 1,
            code: ErrorCode::ProtocolError
        }]
    );
    assert_eq!(server.stats().failed_requests, 1);
}

#[test]
fn connect_request_needs_only_authority() {
    let (mut client, mut server) = connect(H2Config::default());
    let mut fields = FieldBlock::new();
    fields.add(":method", "CONNECT");
    fields.add(":authority", "proxy.example:443");
    server.feed_data(&client.headers(1, &fields, false)).unwrap();
    assert!(client.read(&mut server).is_empty());
    let head = server.request_head(1).unwrap();
    assert_eq!(head.path, None);
    assert_eq!(head.authority.as_deref(), Some(&b"proxy.example:443"[..]));
}

// ---------------------------------------------------------------------------
// CONTINUATION and header limits
// ---------------------------------------------------------------------------

#[test]
fn request_split_across_continuations() {
    let (mut client, mut server) = connect(H2Config::default());
    let mut fields = FieldBlock::new();
    fields.add(":method", "GET");
    fields.add(":scheme", "https");
    fields.add(":path", "/split");
    fields.add("x-filler", "0123456789abcdef");
    let mut block = Vec::new();
    client.encoder.encode(&fields, &mut block);
    let third = block.len() / 3;

    let mut bytes = wire(&Frame::Headers {
        stream_id: 1,
        fragment: &block[..third],
        end_stream: true,
        end_headers: false,
        priority: None,
        pad: None,
    });
    bytes.extend(wire(&Frame::Continuation {
        stream_id: 1,
        fragment: &block[third..2 * third],
        end_headers: false,
    }));
    bytes.extend(wire(&Frame::Continuation {
        stream_id: 1,
        fragment: &block[2 * third..],
        end_headers: true,
    }));
    // Deliver in awkward pieces.
    for piece in bytes.chunks(7) {
        server.feed_data(piece).unwrap();
    }

    let events = drain_events(&mut server);
    let [H2Event::Headers { fields: got, .. }] = &events[..] else {
        panic!("expected one header block, got {events:?}");
    };
    assert_eq!(got, &fields);
}

#[test]
fn continuation_on_other_stream_is_connection_error() {
    let (mut client, mut server) = connect(H2Config::default());
    let mut bytes = wire(&Frame::Headers {
        stream_id: 1,
        fragment: &[0x82],
        end_stream: true,
        end_headers: false,
        priority: None,
        pad: None,
    });
    bytes.extend(wire(&Frame::Continuation {
        stream_id: 3,
        fragment: &[0x87],
        end_headers: true,
    }));
    feed_expect_error(&mut server, &bytes, ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);
}

#[test]
fn large_response_head_uses_continuation() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    let big = "a".repeat(40_000);
    let mut headers = FieldBlock::new();
    headers.add("x-big", big.as_str());
    server
        .send_response(1, StatusCode::OK, &headers, true)
        .unwrap();

    let got = client.read(&mut server);
    assert_eq!(got.len(), 1);
    assert!(client.continuations >= 1);
    let Got::Headers { fields, .. } = &got[0] else {
        panic!("expected HEADERS");
    };
    assert_eq!(fields.get(&HeaderName::from_bytes(b"x-big")), Some(big.as_bytes()));
}

#[test]
fn oversized_header_list_refused_per_stream() {
    let (mut client, mut server) = connect(H2Config::default().with_max_header_list_size(256));
    let mut fields = FieldBlock::new();
    fields.add(":method", "GET");
    fields.add(":scheme", "https");
    fields.add(":path", "/");
    fields.add("cookie", "c".repeat(300).as_str());
    server.feed_data(&client.headers(1, &fields, true)).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 1,
            code: ErrorCode::ProtocolError
        }]
    );

    // Table state survived the refused block.
    server.feed_data(&client.headers(3, &fields, true)).unwrap();
    server.feed_data(&client.request(5, "GET", "/ok", true)).unwrap();
    let events = drain_events(&mut server);
    assert!(matches!(events[..], [H2Event::Headers { stream_id: 5, .. }]), "{events:?}");
}

// ---------------------------------------------------------------------------
// Unknown frames, RST_STREAM, WINDOW_UPDATE
// ---------------------------------------------------------------------------

#[test]
fn unknown_frames_are_ignored() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "POST", "/", false)).unwrap();
    drain_events(&mut server);

    server.feed_data(&raw(0x20, 0xff, 0, b"conn")).unwrap();
    server.feed_data(&raw(0x21, 0x00, 1, b"open")).unwrap();
    server.feed_data(&raw(0x22, 0x01, 9, b"idle")).unwrap();
    assert!(client.read(&mut server).is_empty());
    assert!(drain_events(&mut server).is_empty());

    // Stream 9 was not opened by the extension frame, so 5 is still fresh.
    server.feed_data(&client.request(5, "GET", "/", true)).unwrap();
    assert_eq!(drain_events(&mut server).len(), 1);
}

#[test]
fn unknown_frame_on_idle_stream_rejected_when_configured() {
    let (mut client, mut server) = connect(
        H2Config::default().with_unknown_frame_policy(UnknownFramePolicy::RejectOnIdleStream),
    );
    server.feed_data(&raw(0x20, 0, 0, b"conn")).unwrap();
    feed_expect_error(&mut server, &raw(0x22, 0, 9, b"idle"), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);
}

#[test]
fn priority_frames_are_ignored() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&raw(0x2, 0, 3, &[0, 0, 0, 1, 16])).unwrap();
    assert!(client.read(&mut server).is_empty());

    // Wrong length is a stream error; self-dependency too.
    server.feed_data(&raw(0x2, 0, 3, &[0, 0, 0, 1])).unwrap();
    server.feed_data(&raw(0x2, 0, 5, &[0, 0, 0, 5, 16])).unwrap();
    assert_eq!(
        client.read(&mut server),
        [
            Got::Reset {
                stream_id: 3,
                code: ErrorCode::FrameSizeError
            },
            Got::Reset {
                stream_id: 5,
                code: ErrorCode::ProtocolError
            },
        ]
    );
    assert!(!server.is_closed());
}

#[test]
fn rst_stream_cancels_stream() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "POST", "/", false)).unwrap();
    drain_events(&mut server);

    server
        .feed_data(&wire(&Frame::RstStream {
            stream_id: 1,
            error_code: ErrorCode::Cancel,
        }))
        .unwrap();
    assert_eq!(
        drain_events(&mut server),
        [
            H2Event::StreamReset {
                stream_id: 1,
                error_code: ErrorCode::Cancel
            },
            H2Event::StreamComplete {
                stream_id: 1,
                success: false
            }
        ]
    );
    assert_eq!(
        server.send_response(1, StatusCode::OK, &FieldBlock::new(), true),
        Err(Error::StreamReset(ErrorCode::Cancel))
    );
    assert_eq!(
        server.send_data(1, b"late", true),
        Err(Error::StreamReset(ErrorCode::Cancel))
    );

    // Frames already in flight for the stream.
    server.feed_data(&data(1, b"late body", false)).unwrap();
    server.feed_data(&window_update(1, 10)).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 1,
            code: ErrorCode::StreamClosed
        }]
    );
    assert!(!server.is_closed());
}

#[test]
fn rst_stream_with_unassigned_code_is_reported() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    drain_events(&mut server);
    server
        .feed_data(&raw(0x3, 0, 1, &0xdead_beefu32.to_be_bytes()))
        .unwrap();
    assert_eq!(
        drain_events(&mut server)[0],
        H2Event::StreamReset {
            stream_id: 1,
            error_code: ErrorCode::Unknown(0xdead_beef)
        }
    );
}

#[test]
fn rst_stream_on_idle_or_zero_is_connection_error() {
    let (mut client, mut server) = connect(H2Config::default());
    feed_expect_error(&mut server, &raw(0x3, 0, 7, &[0, 0, 0, 8]), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);

    let (mut client, mut server) = connect(H2Config::default());
    feed_expect_error(&mut server, &raw(0x3, 0, 0, &[0, 0, 0, 8]), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);

    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    feed_expect_error(&mut server, &raw(0x3, 0, 1, &[0, 0, 8]), ErrorCode::FrameSizeError);
    assert_goaway(&mut server, &mut client, 1, ErrorCode::FrameSizeError);
}

#[test]
fn window_update_rules() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", false)).unwrap();

    // Zero increment and overflow on a stream only reset that stream.
    server.feed_data(&raw(0x8, 0, 1, &[0, 0, 0, 0])).unwrap();
    server.feed_data(&client.request(3, "GET", "/", false)).unwrap();
    server.feed_data(&window_update(3, 0x7fff_ffff)).unwrap();
    assert_eq!(
        client.read(&mut server),
        [
            Got::Reset {
                stream_id: 1,
                code: ErrorCode::ProtocolError
            },
            Got::Reset {
                stream_id: 3,
                code: ErrorCode::FlowControlError
            },
        ]
    );

    // Closed streams ignore it; idle streams do not.
    server.feed_data(&window_update(1, 5)).unwrap();
    assert!(client.read(&mut server).is_empty());
    feed_expect_error(&mut server, &window_update(9, 5), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 3, ErrorCode::ProtocolError);
}

#[test]
fn connection_window_update_errors() {
    let (mut client, mut server) = connect(H2Config::default());
    feed_expect_error(&mut server, &raw(0x8, 0, 0, &[0, 0, 0, 0]), ErrorCode::ProtocolError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::ProtocolError);

    let (mut client, mut server) = connect(H2Config::default());
    feed_expect_error(&mut server, &window_update(0, 0x7fff_ffff), ErrorCode::FlowControlError);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::FlowControlError);
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

#[test]
fn receive_window_of_four_is_enforced_and_replenished() {
    let (mut client, mut server) = connect(H2Config::default().with_initial_window_size(4));
    server.feed_data(&client.request(1, "POST", "/", false)).unwrap();
    server.feed_data(&data(1, b"abcd", false)).unwrap();
    let events = drain_events(&mut server);
    assert_eq!(
        events[1],
        H2Event::Data {
            stream_id: 1,
            data: b"abcd".to_vec(),
            end_stream: false
        }
    );

    server.release_capacity(1, 1).unwrap();
    assert!(client.read(&mut server).is_empty());
    server.release_capacity(1, 1).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::WindowUpdate {
            stream_id: 1,
            increment: 2
        }]
    );

    server.feed_data(&data(1, b"ef", false)).unwrap();
    server.feed_data(&data(1, b"g", false)).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 1,
            code: ErrorCode::FlowControlError
        }]
    );
    assert!(!server.is_closed());
}

#[test]
fn padding_counts_against_window_but_is_not_delivered() {
    let (mut client, mut server) = connect(H2Config::default().with_initial_window_size(16));
    server.feed_data(&client.request(1, "POST", "/", false)).unwrap();
    server
        .feed_data(&wire(&Frame::Data {
            stream_id: 1,
            data: b"hi",
            end_stream: false,
            pad: Some(10),
        }))
        .unwrap();

    let events = drain_events(&mut server);
    assert_eq!(
        events[1],
        H2Event::Data {
            stream_id: 1,
            data: b"hi".to_vec(),
            end_stream: false
        }
    );
    // 13 bytes withdrawn, the 11 padding bytes handed straight back.
    assert_eq!(
        client.read(&mut server),
        [Got::WindowUpdate {
            stream_id: 1,
            increment: 11
        }]
    );
}

#[test]
fn connection_window_overrun_is_connection_error() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "POST", "/", false)).unwrap();
    server.feed_data(&client.request(3, "POST", "/", false)).unwrap();
    let chunk = vec![0u8; 16_000];
    for _ in 0..3 {
        server.feed_data(&data(1, &chunk, false)).unwrap();
    }
    server.feed_data(&data(3, &chunk, false)).unwrap();
    // 64_000 of 65_535 used; nothing released.
    feed_expect_error(&mut server, &data(3, &chunk, false), ErrorCode::FlowControlError);
    assert_goaway(&mut server, &mut client, 3, ErrorCode::FlowControlError);
}

#[test]
fn send_window_blocks_and_resumes() {
    let (mut client, mut server) = connect_with(
        H2Config::default(),
        SettingsParams {
            initial_window_size: Some(4),
            ..SettingsParams::default()
        },
    );
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    drain_events(&mut server);
    server
        .send_response(1, StatusCode::OK, &FieldBlock::new(), false)
        .unwrap();

    assert_eq!(server.send_data(1, b"0123456789", true).unwrap(), 4);
    assert_eq!(server.send_data(1, b"456789", true), Err(Error::WouldBlock));

    server.feed_data(&window_update(1, 2)).unwrap();
    assert_eq!(drain_events(&mut server), [H2Event::Writable(1)]);
    assert_eq!(server.send_data(1, b"456789", true).unwrap(), 2);

    // A larger initial window grows the open stream's window.
    server
        .feed_data(&settings(SettingsParams {
            initial_window_size: Some(10),
            ..SettingsParams::default()
        }))
        .unwrap();
    assert_eq!(drain_events(&mut server), [H2Event::Writable(1)]);
    assert_eq!(server.send_data(1, b"6789", true).unwrap(), 4);

    let got = client.read(&mut server);
    let body: Vec<u8> = got
        .iter()
        .filter_map(|g| match g {
            Got::Data { data, .. } => Some(data.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(body, b"0123456789");
    assert!(matches!(
        got.last(),
        Some(Got::Data {
            end_stream: true,
            ..
        })
    ));
    assert_eq!(server.stats().completed_requests, 1);
}

#[test]
fn settings_shrink_drives_send_window_negative() {
    let (mut client, mut server) = connect_with(
        H2Config::default(),
        SettingsParams {
            initial_window_size: Some(10),
            ..SettingsParams::default()
        },
    );
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    drain_events(&mut server);
    server
        .send_response(1, StatusCode::OK, &FieldBlock::new(), false)
        .unwrap();
    assert_eq!(server.send_data(1, b"12345678", false).unwrap(), 8);

    // 10 -> 4 leaves the stream at 2 - 6 = -4.
    server
        .feed_data(&settings(SettingsParams {
            initial_window_size: Some(4),
            ..SettingsParams::default()
        }))
        .unwrap();
    assert_eq!(server.send_data(1, b"x", true), Err(Error::WouldBlock));

    server.feed_data(&window_update(1, 4)).unwrap();
    assert!(drain_events(&mut server).is_empty());
    assert_eq!(server.send_data(1, b"x", true), Err(Error::WouldBlock));

    server.feed_data(&window_update(1, 1)).unwrap();
    assert_eq!(drain_events(&mut server), [H2Event::Writable(1)]);
    assert_eq!(server.send_data(1, b"x", true).unwrap(), 1);
    client.read(&mut server);
}

#[test]
fn large_body_respects_connection_window() {
    let (mut client, mut server) = connect_with(
        H2Config::default(),
        SettingsParams {
            initial_window_size: Some(1 << 20),
            ..SettingsParams::default()
        },
    );
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    server
        .send_response(1, StatusCode::OK, &FieldBlock::new(), false)
        .unwrap();
    let body = vec![b'z'; 100_000];
    assert_eq!(server.send_data(1, &body, true).unwrap(), 65_535);

    let got = client.read(&mut server);
    let frames: Vec<usize> = got
        .iter()
        .filter_map(|g| match g {
            Got::Data { data, .. } => Some(data.len()),
            _ => None,
        })
        .collect();
    assert!(frames.iter().all(|&n| n <= 16_384));
    assert_eq!(frames.iter().sum::<usize>(), 65_535);

    server.feed_data(&window_update(0, 40_000)).unwrap();
    assert_eq!(drain_events(&mut server).last(), Some(&H2Event::Writable(1)));
    assert_eq!(server.send_data(1, &body[65_535..], true).unwrap(), 34_465);
}

// ---------------------------------------------------------------------------
// Shutdown and timeouts
// ---------------------------------------------------------------------------

#[test]
fn graceful_shutdown_two_phase_goaway() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/one", true)).unwrap();
    server.feed_data(&client.request(3, "GET", "/three", true)).unwrap();
    drain_events(&mut server);

    server.begin_shutdown(0);
    assert_eq!(
        client.read(&mut server),
        [Got::GoAway {
            last_stream_id: 0x7fff_ffff,
            code: ErrorCode::NoError
        }]
    );

    // New streams after the warning are refused.
    server.feed_data(&client.request(5, "GET", "/late", true)).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 5,
            code: ErrorCode::RefusedStream
        }]
    );

    respond(&mut server, 3, b"three");
    assert!(!server.is_closed());
    respond(&mut server, 1, b"one");

    let got = client.read(&mut server);
    assert_eq!(got.len(), 5, "{got:?}");
    assert_eq!(
        got[1],
        Got::Data {
            stream_id: 3,
            data: b"three".to_vec(),
            end_stream: true
        }
    );
    assert_eq!(
        got[3],
        Got::Data {
            stream_id: 1,
            data: b"one".to_vec(),
            end_stream: true
        }
    );
    assert_eq!(
        got[4],
        Got::GoAway {
            last_stream_id: 3,
            code: ErrorCode::NoError
        }
    );
    assert!(server.is_closed());
}

#[test]
fn idle_connection_shutdown_goes_straight_to_final_goaway() {
    let (mut client, mut server) = connect(H2Config::default());
    server.begin_shutdown(0);
    assert_eq!(
        client.read(&mut server),
        [
            Got::GoAway {
                last_stream_id: 0x7fff_ffff,
                code: ErrorCode::NoError
            },
            Got::GoAway {
                last_stream_id: 0,
                code: ErrorCode::NoError
            },
        ]
    );
    assert!(server.is_closed());
}

#[test]
fn idle_timeout_sends_goaway() {
    let (mut client, mut server) = connect(H2Config::default());
    server.set_timeouts(
        TimeoutConfig {
            idle_timeout_us: Some(5_000_000),
            header_timeout_us: None,
        },
        0,
    );
    assert_eq!(server.next_timeout(), Some(5_000_000));
    server.handle_timeout(4_999_999);
    assert!(!server.is_closed());

    server.handle_timeout(5_000_000);
    assert_eq!(drain_events(&mut server), [H2Event::Timeout]);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::NoError);
}

#[test]
fn header_timeout_covers_settings_exchange() {
    init_tracing();
    let timeouts = TimeoutConfig {
        idle_timeout_us: None,
        header_timeout_us: Some(1_000_000),
    };
    let mut server = H2Server::new(H2Config::default().with_timeouts(timeouts));
    let mut client = Client::new();
    assert_eq!(server.connection().config().timeouts, timeouts);
    server.set_timeouts(timeouts, 0);
    server.feed_data_timed(CONNECTION_PREFACE, 10).unwrap();
    assert_eq!(server.next_timeout(), Some(1_000_000));

    server.handle_timeout(1_000_000);
    assert_eq!(drain_events(&mut server), [H2Event::Timeout]);
    assert_goaway(&mut server, &mut client, 0, ErrorCode::NoError);
}

#[test]
fn peer_goaway_stops_new_streams() {
    let (mut client, mut server) = connect(H2Config::default());
    server.feed_data(&client.request(1, "GET", "/", true)).unwrap();
    drain_events(&mut server);
    server
        .feed_data(&wire(&Frame::GoAway {
            last_stream_id: 0,
            error_code: ErrorCode::NoError,
            debug: b"client leaving",
        }))
        .unwrap();
    assert_eq!(
        drain_events(&mut server),
        [H2Event::GoAway {
            last_stream_id: 0,
            error_code: ErrorCode::NoError
        }]
    );
    server.feed_data(&client.request(3, "GET", "/", true)).unwrap();
    assert_eq!(
        client.read(&mut server),
        [Got::Reset {
            stream_id: 3,
            code: ErrorCode::RefusedStream
        }]
    );

    respond(&mut server, 1, b"bye");
    assert!(server.is_closed());
}
