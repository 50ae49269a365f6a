//! In-process fake SMTP submission server
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   Server sends greeting: "220 fake.smtp ESMTP ready\r\n"
//!       |
//!   Client sends STARTTLS, server replies 220
//!       |
//!   TLS handshake (after this, all traffic is encrypted)
//!       |
//!   Client sends EHLO, server lists AUTH PLAIN
//!       |
//!   AUTH PLAIN <base64>  ->  235 or 535
//!       |
//!   MAIL FROM / RCPT TO / DATA ... "."  ->  250 each
//!       |
//!   QUIT  ->  221
//! ```
//!
//! Every accepted DATA payload is recorded as a [`Delivery`].

use super::handlers::{EHLO_PLAIN_REPLY, EHLO_REPLY, check_plain, parse_path, read_data};
use super::io::write_line;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// One message accepted by the server.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub data: Vec<u8>,
}

impl Delivery {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// A fake SMTP server on localhost with an OS-assigned port.
///
/// Uses a self-signed certificate generated with `rcgen`, so clients
/// must accept invalid certificates.
pub struct FakeSmtpServer {
    port: u16,
    outbox: Arc<Mutex<Vec<Delivery>>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeSmtpServer {
    /// Start a server that accepts only `username` / `password`.
    pub async fn start(username: &str, password: &str) -> Self {
        // Several tests may race to install the provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let outbox = Arc::new(Mutex::new(Vec::new()));
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };

        let handle = {
            let outbox = outbox.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _addr)) = listener.accept().await else {
                        break;
                    };
                    let acceptor = acceptor.clone();
                    let outbox = outbox.clone();
                    let credentials = credentials.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, acceptor, &credentials, &outbox).await;
                    });
                }
            })
        };

        Self {
            port,
            outbox,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Messages accepted so far, in arrival order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.outbox.lock().unwrap().clone()
    }
}

/// Greeting and STARTTLS on the raw TCP stream, then the TLS session.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    credentials: &Credentials,
    outbox: &Mutex<Vec<Delivery>>,
) {
    let mut reader = BufReader::new(stream);

    if write_line(&mut reader, "220 fake.smtp ESMTP ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let verb = line.trim().to_uppercase();
        let reply = if verb.starts_with("EHLO") || verb.starts_with("HELO") {
            EHLO_PLAIN_REPLY
        } else if verb == "STARTTLS" {
            if write_line(&mut reader, "220 2.0.0 Ready to start TLS\r\n")
                .await
                .is_err()
            {
                return;
            }
            break;
        } else if verb == "QUIT" {
            let _ = write_line(&mut reader, "221 2.0.0 Bye\r\n").await;
            return;
        } else {
            "530 5.7.0 Must issue a STARTTLS command first\r\n"
        };
        if write_line(&mut reader, reply).await.is_err() {
            return;
        }
    }

    let tcp = reader.into_inner();
    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };

    handle_session(tls_stream, credentials, outbox).await;
}

/// Envelope collected between MAIL FROM and the end of DATA.
#[derive(Default)]
struct Envelope {
    mail_from: Option<String>,
    rcpt_to: Vec<String>,
}

async fn handle_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    credentials: &Credentials,
    outbox: &Mutex<Vec<Delivery>>,
) {
    let mut reader = BufReader::new(stream);
    let mut authenticated = false;
    let mut envelope = Envelope::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        let (verb, arg) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        let verb = verb.to_uppercase();

        let reply = match verb.as_str() {
            "EHLO" | "HELO" => EHLO_REPLY.to_string(),
            "AUTH" => {
                let (mechanism, initial) = arg.split_once(' ').unwrap_or((arg, ""));
                if mechanism.eq_ignore_ascii_case("PLAIN") {
                    let response = if initial.is_empty() {
                        if write_line(&mut reader, "334 \r\n").await.is_err() {
                            break;
                        }
                        let mut next = String::new();
                        if reader.read_line(&mut next).await.is_err() {
                            break;
                        }
                        next
                    } else {
                        initial.to_string()
                    };
                    authenticated =
                        check_plain(&response, &credentials.username, &credentials.password);
                    if authenticated {
                        "235 2.7.0 Authentication successful\r\n".to_string()
                    } else {
                        "535 5.7.8 Authentication credentials invalid\r\n".to_string()
                    }
                } else {
                    "504 5.5.4 Unrecognized authentication type\r\n".to_string()
                }
            }
            "MAIL" if !authenticated => "530 5.7.0 Authentication required\r\n".to_string(),
            "MAIL" => match parse_path(arg) {
                Some(from) => {
                    envelope = Envelope {
                        mail_from: Some(from),
                        rcpt_to: Vec::new(),
                    };
                    "250 2.1.0 OK\r\n".to_string()
                }
                None => "501 5.5.4 Syntax error in MAIL FROM\r\n".to_string(),
            },
            "RCPT" if envelope.mail_from.is_none() => {
                "503 5.5.1 Need MAIL before RCPT\r\n".to_string()
            }
            "RCPT" => match parse_path(arg) {
                Some(to) => {
                    envelope.rcpt_to.push(to);
                    "250 2.1.5 OK\r\n".to_string()
                }
                None => "501 5.5.4 Syntax error in RCPT TO\r\n".to_string(),
            },
            "DATA" if envelope.rcpt_to.is_empty() => {
                "503 5.5.1 Need RCPT before DATA\r\n".to_string()
            }
            "DATA" => {
                if write_line(&mut reader, "354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await
                    .is_err()
                {
                    break;
                }
                let Some(data) = read_data(&mut reader).await else {
                    break;
                };
                let done = std::mem::take(&mut envelope);
                outbox.lock().unwrap().push(Delivery {
                    mail_from: done.mail_from.unwrap_or_default(),
                    rcpt_to: done.rcpt_to,
                    data,
                });
                "250 2.0.0 Queued\r\n".to_string()
            }
            "RSET" => {
                envelope = Envelope::default();
                "250 2.0.0 OK\r\n".to_string()
            }
            "NOOP" => "250 2.0.0 OK\r\n".to_string(),
            "QUIT" => {
                let _ = write_line(&mut reader, "221 2.0.0 Bye\r\n").await;
                break;
            }
            _ => "500 5.5.2 Unknown command\r\n".to_string(),
        };

        if write_line(&mut reader, &reply).await.is_err() {
            break;
        }
    }
}
