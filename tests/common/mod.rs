//! Scripted in-process backend for connection tests
//!
//! A `MockServer` listens on `127.0.0.1:0`; each accepted socket becomes a
//! `Backend` that test scripts drive frame by frame.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use herodb_wire::auth::{ScramAlgorithm, StandardAlgorithm};
use herodb_wire::HostEndpoint;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

pub const FIXTURE_CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/server.crt");
pub const FIXTURE_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/server.key");

const SSL_REQUEST_CODE: i32 = 80877103;
const PROTOCOL_VERSION: i32 = 196608;

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct MockServer {
    listener: TcpListener,
    endpoint: HostEndpoint,
}

impl MockServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self {
            listener,
            endpoint: HostEndpoint::new("127.0.0.1", port),
        }
    }

    pub fn endpoint(&self) -> HostEndpoint {
        self.endpoint.clone()
    }

    pub async fn accept(&self) -> Backend {
        let (socket, _) = self.listener.accept().await.unwrap();
        Backend {
            conn: Conn::Plain(socket),
        }
    }
}

/// A port with nothing listening on it
pub fn dead_endpoint() -> HostEndpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    HostEndpoint::new("127.0.0.1", port)
}

enum Conn {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Upgrading,
}

/// What the client sent first
#[derive(Debug, PartialEq, Eq)]
pub enum Opening {
    SslRequest,
    Startup(Vec<(String, String)>),
}

pub struct Backend {
    conn: Conn,
}

impl Backend {
    pub async fn write(&mut self, bytes: &[u8]) {
        match &mut self.conn {
            Conn::Plain(s) => {
                s.write_all(bytes).await.unwrap();
                s.flush().await.unwrap();
            }
            Conn::Tls(s) => {
                s.write_all(bytes).await.unwrap();
                s.flush().await.unwrap();
            }
            Conn::Upgrading => unreachable!(),
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match &mut self.conn {
            Conn::Plain(s) => s.read_exact(buf).await.map(|_| ()),
            Conn::Tls(s) => s.read_exact(buf).await.map(|_| ()),
            Conn::Upgrading => unreachable!(),
        }
    }

    async fn read_i32(&mut self) -> i32 {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).await.unwrap();
        i32::from_be_bytes(buf)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.conn, Conn::Tls(_))
    }

    /// Read the untagged opening packet
    pub async fn read_opening(&mut self) -> Opening {
        let len = self.read_i32().await as usize;
        let code = self.read_i32().await;
        let mut body = vec![0u8; len - 8];
        self.read_exact(&mut body).await.unwrap();
        match code {
            SSL_REQUEST_CODE => Opening::SslRequest,
            PROTOCOL_VERSION => Opening::Startup(parse_pairs(&body)),
            other => panic!("unexpected opening code {}", other),
        }
    }

    pub async fn expect_startup(&mut self) -> Vec<(String, String)> {
        match self.read_opening().await {
            Opening::Startup(params) => params,
            Opening::SslRequest => panic!("expected startup, got SSLRequest"),
        }
    }

    pub async fn expect_ssl_request(&mut self) {
        assert_eq!(self.read_opening().await, Opening::SslRequest);
    }

    /// Answer `S` and complete a TLS handshake with the fixture certificate
    pub async fn accept_tls(&mut self) {
        self.write(b"S").await;
        let plain = match std::mem::replace(&mut self.conn, Conn::Upgrading) {
            Conn::Plain(s) => s,
            _ => panic!("already encrypted"),
        };
        let tls = tls_acceptor().accept(plain).await.unwrap();
        self.conn = Conn::Tls(Box::new(tls));
    }

    /// Read one tagged frame
    pub async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let mut tag = [0u8; 1];
        self.read_exact(&mut tag).await.unwrap();
        let len = self.read_i32().await as usize;
        let mut body = vec![0u8; len - 4];
        self.read_exact(&mut body).await.unwrap();
        (tag[0], body)
    }

    /// Read one `'p'` frame
    pub async fn read_password(&mut self) -> Vec<u8> {
        let (tag, body) = self.read_frame().await;
        assert_eq!(tag, b'p', "expected password frame");
        body
    }

    /// Whether the client closed the socket
    pub async fn at_eof(&mut self) -> bool {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf).await.is_err()
    }

    pub async fn send_auth(&mut self, code: i32, payload: &[u8]) {
        self.write(&auth_request(code, payload)).await;
    }

    pub async fn send_auth_ok(&mut self) {
        self.send_auth(0, &[]).await;
    }

    pub async fn send_error(&mut self, code: &str, message: &str) {
        self.write(&error_response(code, message)).await;
    }

    /// ParameterStatus, BackendKeyData, ReadyForQuery
    pub async fn finish_startup(&mut self) {
        let mut frames = parameter_status("server_version", "16.2");
        frames.extend(parameter_status("client_encoding", "UTF8"));
        frames.extend(backend_key(4242, 99));
        frames.extend(ready_for_query());
        self.write(&frames).await;
    }

    /// Answer one simple query with a single text value
    pub async fn answer_query(&mut self, expected_sql: &str, value: &str) {
        let (tag, body) = self.read_frame().await;
        assert_eq!(tag, b'Q');
        assert_eq!(cstr(&body), expected_sql);
        let mut frames = data_row(&[value]);
        frames.extend(command_complete("SHOW"));
        frames.extend(ready_for_query());
        self.write(&frames).await;
    }

    /// Terminate frame, then EOF
    pub async fn expect_terminate(&mut self) {
        let (tag, _) = self.read_frame().await;
        assert_eq!(tag, b'X');
    }

    /// Run the server side of SCRAM-SHA-256 for `password`.
    ///
    /// `binding` is the expected tls-server-end-point hash when the client
    /// should use `-PLUS`. With `tamper` the server signature is corrupted.
    pub async fn scram_sha256(&mut self, password: &str, binding: Option<&[u8]>, tamper: bool) {
        let mechanisms: &[u8] = if binding.is_some() {
            b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0"
        } else {
            b"SCRAM-SHA-256\0\0"
        };
        self.send_auth(10, mechanisms).await;

        let body = self.read_password().await;
        let mechanism = cstr(&body).to_string();
        let data_start = mechanism.len() + 1 + 4;
        let client_first = String::from_utf8(body[data_start..].to_vec()).unwrap();

        let expected_gs2 = if binding.is_some() {
            assert_eq!(mechanism, "SCRAM-SHA-256-PLUS");
            "p=tls-server-end-point,,"
        } else {
            assert_eq!(mechanism, "SCRAM-SHA-256");
            "n,,"
        };
        let bare = client_first
            .strip_prefix(expected_gs2)
            .expect("unexpected GS2 header");
        assert!(bare.starts_with("n=*,r="));
        let client_nonce = &bare["n=*,r=".len()..];

        let salt = b"herodb-test-salt";
        let iterations = 4096;
        let server_first = format!(
            "r={}srvNonce42,s={},i={}",
            client_nonce,
            BASE64.encode(salt),
            iterations
        );
        self.send_auth(11, server_first.as_bytes()).await;

        let client_final = String::from_utf8(self.read_password().await).unwrap();
        let (without_proof, proof) = client_final.rsplit_once(",p=").unwrap();

        let mut cbind_input = expected_gs2.as_bytes().to_vec();
        if let Some(data) = binding {
            cbind_input.extend_from_slice(data);
        }
        assert!(without_proof.starts_with(&format!("c={},", BASE64.encode(&cbind_input))));

        let alg = StandardAlgorithm::Sha256;
        let salted = alg
            .salted_password(password.as_bytes(), salt, iterations)
            .unwrap();
        let client_key = alg.keyed(&salted, b"Client Key").unwrap();
        let stored_key = alg.digest(&client_key).unwrap();
        let server_key = alg.keyed(&salted, b"Server Key").unwrap();
        let auth_message = format!("{},{},{}", bare, server_first, without_proof);

        let client_signature = alg.keyed(&stored_key, auth_message.as_bytes()).unwrap();
        let expected_proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(proof, BASE64.encode(&expected_proof), "client proof mismatch");

        let mut signature = alg.keyed(&server_key, auth_message.as_bytes()).unwrap();
        if tamper {
            signature[0] ^= 0x01;
        }
        let server_final = format!("v={}", BASE64.encode(&signature));
        self.send_auth(12, server_final.as_bytes()).await;
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let cert_pem = std::fs::read(FIXTURE_CERT).unwrap();
    let key_pem = std::fs::read(FIXTURE_KEY).unwrap();
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<_, _>>()
        .unwrap();
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .unwrap()
        .unwrap();
    let provider = Arc::new(tokio_rustls::rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// DER of the fixture certificate
pub fn fixture_cert_der() -> Vec<u8> {
    let cert_pem = std::fs::read(FIXTURE_CERT).unwrap();
    let cert = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .next()
        .unwrap()
        .unwrap();
    cert.as_ref().to_vec()
}

fn cstr(body: &[u8]) -> &str {
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    std::str::from_utf8(&body[..end]).unwrap()
}

fn parse_pairs(body: &[u8]) -> Vec<(String, String)> {
    let mut parts: Vec<String> = body
        .split(|b| *b == 0)
        .map(|s| String::from_utf8(s.to_vec()).unwrap())
        .collect();
    // trailing terminator plus the split remainder
    while parts.last().is_some_and(|s| s.is_empty()) {
        parts.pop();
    }
    parts
        .chunks(2)
        .map(|kv| (kv[0].clone(), kv.get(1).cloned().unwrap_or_default()))
        .collect()
}

fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(4 + body.len() as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn auth_request(code: i32, payload: &[u8]) -> Vec<u8> {
    let mut body = code.to_be_bytes().to_vec();
    body.extend_from_slice(payload);
    frame(b'R', &body)
}

pub fn error_response(code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', "FATAL"), (b'C', code), (b'M', message)] {
        body.push(field);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    frame(b'E', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let body = [name.as_bytes(), b"\0", value.as_bytes(), b"\0"].concat();
    frame(b'S', &body)
}

pub fn backend_key(process_id: i32, secret: i32) -> Vec<u8> {
    let body = [process_id.to_be_bytes(), secret.to_be_bytes()].concat();
    frame(b'K', &body)
}

pub fn ready_for_query() -> Vec<u8> {
    frame(b'Z', b"I")
}

pub fn data_row(values: &[&str]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        body.extend_from_slice(&(value.len() as i32).to_be_bytes());
        body.extend_from_slice(value.as_bytes());
    }
    frame(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let body = [tag.as_bytes(), b"\0"].concat();
    frame(b'C', &body)
}
