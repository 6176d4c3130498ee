//! In-process IMAP server stub for migration tests.
//!
//! Speaks just enough IMAP4rev1 for the migration handler's command set:
//! greeting, STARTTLS, LOGIN, LIST, EXAMINE, UID SEARCH, UID FETCH (with
//! counted literals), CREATE, APPEND, LOGOUT. TLS uses a self-signed
//! certificate generated at startup, so tests run with certificate
//! verification disabled (the debug-mode dial path).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (an "imaps" port). A plaintext client never
    /// gets a greeting.
    Implicit,
    /// Plaintext greeting, TLS only after a STARTTLS command. A client
    /// attempting an implicit TLS handshake fails fast because the
    /// greeting arrives as non-TLS bytes.
    StartTls,
}

#[derive(Clone, Debug)]
pub struct StubMessage {
    pub uid: u32,
    /// IMAP flags list syntax, e.g. `(\Seen)`.
    pub flags: String,
    pub message_id: String,
    /// RFC 2822 date used in the ENVELOPE.
    pub date: String,
    pub body: Vec<u8>,
}

impl StubMessage {
    pub fn new(uid: u32, message_id: &str) -> Self {
        let body = format!(
            "Message-ID: {message_id}\r\nSubject: message {uid}\r\nDate: Tue, 01 Jul 2025 10:00:00 +0000\r\n\r\nbody of message {uid}\r\n"
        );
        Self {
            uid,
            flags: "(\\Seen)".to_string(),
            message_id: message_id.to_string(),
            date: "Tue, 01 Jul 2025 10:00:00 +0000".to_string(),
            body: body.into_bytes(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StubFolder {
    pub uid_validity: u32,
    pub uid_next: u32,
    pub messages: Vec<StubMessage>,
}

impl StubFolder {
    pub fn new(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            uid_next: 1,
            messages: Vec::new(),
        }
    }

    pub fn add(&mut self, message: StubMessage) {
        self.uid_next = self.uid_next.max(message.uid + 1);
        self.messages.push(message);
    }

    /// Messages whose body contains the given Message-ID header value.
    fn contains_message_id(&self, message_id: &str) -> Vec<u32> {
        self.messages
            .iter()
            .filter(|m| {
                m.body
                    .windows(message_id.len())
                    .any(|w| w == message_id.as_bytes())
            })
            .map(|m| m.uid)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct StubState {
    pub folders: BTreeMap<String, StubFolder>,
    /// When non-empty, LOGIN is checked against these.
    pub user: String,
    pub password: String,
}

pub type SharedState = Arc<Mutex<StubState>>;

pub struct FakeImapServer {
    pub port: u16,
    pub state: SharedState,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for FakeImapServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeImapServer {
    pub async fn start(mode: TlsMode, state: StubState) -> Self {
        // Multiple tests race to install the provider; losing is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed certificate");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let state = Arc::new(Mutex::new(state));
        let shared = state.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let state = shared.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, acceptor, state, mode).await;
                });
            }
        });

        Self { port, state, handle }
    }

    pub fn message_count(&self, folder: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(folder)
            .map(|f| f.messages.len())
            .unwrap_or(0)
    }
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    state: SharedState,
    mode: TlsMode,
) -> std::io::Result<()> {
    match mode {
        TlsMode::Implicit => {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(_) => return Ok(()),
            };
            serve(tls_stream, state, true).await
        }
        TlsMode::StartTls => {
            let mut conn = BufStream::new(stream);
            write_line(&mut conn, "* OK IMAP4rev1 Service Ready").await?;

            // Plaintext phase: only CAPABILITY and STARTTLS make sense.
            loop {
                let mut line = String::new();
                if conn.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                let trimmed = line.trim_end();
                let Some((tag, rest)) = trimmed.split_once(' ') else {
                    continue;
                };

                let command = rest.split_whitespace().next().unwrap_or("").to_uppercase();
                match command.as_str() {
                    "CAPABILITY" => {
                        write_line(&mut conn, "* CAPABILITY IMAP4rev1 STARTTLS").await?;
                        write_line(&mut conn, &format!("{tag} OK CAPABILITY completed")).await?;
                    }
                    "STARTTLS" => {
                        write_line(&mut conn, &format!("{tag} OK Begin TLS negotiation now"))
                            .await?;
                        break;
                    }
                    "LOGOUT" => {
                        write_line(&mut conn, "* BYE signing off").await?;
                        write_line(&mut conn, &format!("{tag} OK LOGOUT completed")).await?;
                        return Ok(());
                    }
                    _ => {
                        write_line(&mut conn, &format!("{tag} BAD STARTTLS first")).await?;
                    }
                }
            }

            let stream = conn.into_inner();
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(_) => return Ok(()),
            };
            serve(tls_stream, state, false).await
        }
    }
}

async fn serve<S>(stream: S, state: SharedState, send_greeting: bool) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = BufStream::new(stream);
    if send_greeting {
        write_line(&mut conn, "* OK IMAP4rev1 Service Ready").await?;
    }

    let mut selected: Option<String> = None;

    loop {
        let mut line = String::new();
        if conn.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end().to_string();
        let Some((tag, rest)) = trimmed.split_once(' ') else {
            continue;
        };
        let command = rest.split_whitespace().next().unwrap_or("").to_uppercase();

        match command.as_str() {
            "CAPABILITY" => {
                write_line(&mut conn, "* CAPABILITY IMAP4rev1").await?;
                write_line(&mut conn, &format!("{tag} OK CAPABILITY completed")).await?;
            }
            "NOOP" => {
                write_line(&mut conn, &format!("{tag} OK NOOP completed")).await?;
            }
            "LOGIN" => {
                let ok = {
                    let state = state.lock().unwrap();
                    if state.user.is_empty() {
                        true
                    } else {
                        let args = quoted_strings(rest);
                        args.len() == 2 && args[0] == state.user && args[1] == state.password
                    }
                };
                if ok {
                    write_line(&mut conn, &format!("{tag} OK LOGIN completed")).await?;
                } else {
                    write_line(
                        &mut conn,
                        &format!("{tag} NO [AUTHENTICATIONFAILED] Authentication failed"),
                    )
                    .await?;
                }
            }
            "LIST" => {
                let names: Vec<String> = {
                    let state = state.lock().unwrap();
                    state.folders.keys().cloned().collect()
                };
                for name in names {
                    write_line(&mut conn, &format!("* LIST (\\HasNoChildren) \"/\" \"{name}\""))
                        .await?;
                }
                write_line(&mut conn, &format!("{tag} OK LIST completed")).await?;
            }
            "EXAMINE" | "SELECT" => {
                let name = mailbox_arg(rest);

                let info = {
                    let state = state.lock().unwrap();
                    state
                        .folders
                        .get(&name)
                        .map(|f| (f.messages.len(), f.uid_validity, f.uid_next))
                };

                match info {
                    Some((exists, uid_validity, uid_next)) => {
                        write_line(&mut conn, "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)").await?;
                        write_line(&mut conn, &format!("* {exists} EXISTS")).await?;
                        write_line(&mut conn, "* 0 RECENT").await?;
                        write_line(
                            &mut conn,
                            &format!("* OK [UIDVALIDITY {uid_validity}] UIDs valid"),
                        )
                        .await?;
                        write_line(&mut conn, &format!("* OK [UIDNEXT {uid_next}] Predicted next UID"))
                            .await?;
                        write_line(&mut conn, &format!("{tag} OK [READ-ONLY] {command} completed"))
                            .await?;
                        selected = Some(name);
                    }
                    None => {
                        write_line(&mut conn, &format!("{tag} NO No such mailbox")).await?;
                    }
                }
            }
            "CREATE" => {
                let name = mailbox_arg(rest);

                let created = {
                    let mut state = state.lock().unwrap();
                    if state.folders.contains_key(&name) {
                        false
                    } else {
                        state.folders.insert(name.clone(), StubFolder::new(1));
                        true
                    }
                };
                if created {
                    write_line(&mut conn, &format!("{tag} OK CREATE completed")).await?;
                } else {
                    write_line(
                        &mut conn,
                        &format!("{tag} NO [ALREADYEXISTS] Mailbox already exists"),
                    )
                    .await?;
                }
            }
            "UID" => {
                let sub = rest
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("")
                    .to_uppercase();
                match sub.as_str() {
                    "SEARCH" => {
                        let query = rest
                            .splitn(3, ' ')
                            .nth(2)
                            .unwrap_or("")
                            .trim()
                            .to_string();
                        let uids = run_search(&state, selected.as_deref(), &query);
                        let listing = uids
                            .iter()
                            .map(u32::to_string)
                            .collect::<Vec<_>>()
                            .join(" ");
                        if listing.is_empty() {
                            write_line(&mut conn, "* SEARCH").await?;
                        } else {
                            write_line(&mut conn, &format!("* SEARCH {listing}")).await?;
                        }
                        write_line(&mut conn, &format!("{tag} OK SEARCH completed")).await?;
                    }
                    "FETCH" => {
                        let set = rest.split_whitespace().nth(2).unwrap_or("");
                        let wanted = parse_uid_set(set);
                        let messages: Vec<(usize, StubMessage)> = {
                            let state = state.lock().unwrap();
                            selected
                                .as_deref()
                                .and_then(|name| state.folders.get(name))
                                .map(|folder| {
                                    folder
                                        .messages
                                        .iter()
                                        .enumerate()
                                        .filter(|(_, m)| wanted.contains(&m.uid))
                                        .map(|(i, m)| (i + 1, m.clone()))
                                        .collect()
                                })
                                .unwrap_or_default()
                        };

                        for (seq, message) in messages {
                            let envelope = format!(
                                "(\"{}\" \"message {}\" NIL NIL NIL NIL NIL NIL NIL \"{}\")",
                                message.date, message.uid, message.message_id
                            );
                            let header = format!(
                                "* {seq} FETCH (UID {} FLAGS {} INTERNALDATE \"01-Jul-2025 10:00:00 +0000\" ENVELOPE {} BODY[] {{{}}}",
                                message.uid,
                                message.flags,
                                envelope,
                                message.body.len()
                            );
                            conn.write_all(header.as_bytes()).await?;
                            conn.write_all(b"\r\n").await?;
                            conn.write_all(&message.body).await?;
                            conn.write_all(b")\r\n").await?;
                        }
                        conn.flush().await?;
                        write_line(&mut conn, &format!("{tag} OK FETCH completed")).await?;
                    }
                    _ => {
                        write_line(&mut conn, &format!("{tag} BAD Unknown UID command")).await?;
                    }
                }
            }
            "APPEND" => {
                handle_append(&mut conn, &state, tag, rest).await?;
            }
            "LOGOUT" => {
                write_line(&mut conn, "* BYE signing off").await?;
                write_line(&mut conn, &format!("{tag} OK LOGOUT completed")).await?;
                return Ok(());
            }
            _ => {
                write_line(&mut conn, &format!("{tag} BAD Unknown command")).await?;
            }
        }
    }
}

async fn handle_append<S>(
    conn: &mut BufStream<S>,
    state: &SharedState,
    tag: &str,
    rest: &str,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let folder = mailbox_arg(rest);

    // `... {123}` or `... {123+}` (LITERAL+, no continuation wanted).
    let Some(open) = rest.rfind('{') else {
        write_line(conn, &format!("{tag} BAD APPEND needs a literal")).await?;
        return Ok(());
    };
    let literal = rest[open + 1..].trim_end_matches('}');
    let synchronizing = !literal.ends_with('+');
    let length: usize = literal.trim_end_matches('+').parse().unwrap_or(0);

    if synchronizing {
        write_line(conn, "+ OK send literal").await?;
    }

    let mut body = vec![0u8; length];
    conn.read_exact(&mut body).await?;
    // Trailing CRLF after the literal.
    let mut crlf = String::new();
    conn.read_line(&mut crlf).await?;

    let uid = {
        let mut state = state.lock().unwrap();
        let entry = state
            .folders
            .entry(folder.clone())
            .or_insert_with(|| StubFolder::new(1));
        let uid = entry.uid_next;
        entry.uid_next += 1;

        let message_id = extract_message_id(&body).unwrap_or_else(|| format!("<appended-{uid}>"));
        let mut message = StubMessage::new(uid, &message_id);
        message.body = body;
        message.flags = "()".to_string();
        entry.messages.push(message);
        uid
    };

    write_line(conn, &format!("{tag} OK [APPENDUID 1 {uid}] APPEND completed")).await?;
    Ok(())
}

fn run_search(state: &SharedState, selected: Option<&str>, query: &str) -> Vec<u32> {
    let state = state.lock().unwrap();
    let Some(folder) = selected.and_then(|name| state.folders.get(name)) else {
        return Vec::new();
    };

    let upper = query.to_uppercase();
    if upper.contains("HEADER") && upper.contains("MESSAGE-ID") {
        let id = quoted_strings(query).into_iter().next().unwrap_or_default();
        if id.is_empty() {
            return Vec::new();
        }
        return folder.contains_message_id(&id);
    }

    let mut uids: Vec<u32> = folder.messages.iter().map(|m| m.uid).collect();
    uids.sort_unstable();

    if let Some(range) = upper.strip_prefix("UID ") {
        if let Some((start, _)) = range.split_once(":*") {
            let start: u32 = start.trim().parse().unwrap_or(1);
            let highest = uids.last().copied();
            let mut matched: Vec<u32> = uids.iter().copied().filter(|u| *u >= start).collect();
            // `N:*` always covers the highest-UID message, even when the
            // folder has nothing at or above N.
            if matched.is_empty() {
                if let Some(highest) = highest {
                    matched.push(highest);
                }
            }
            return matched;
        }
    }

    uids
}

fn parse_uid_set(set: &str) -> Vec<u32> {
    set.split(',')
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .collect()
}

/// The mailbox argument of commands shaped like `CMD "name" ...`, with or
/// without quoting.
fn mailbox_arg(rest: &str) -> String {
    rest.split_whitespace()
        .nth(1)
        .unwrap_or("")
        .trim_matches('"')
        .to_string()
}

/// Contents of every double-quoted string in the input, in order.
fn quoted_strings(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find('"') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('"') else { break };
        out.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    out
}

fn extract_message_id(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    for line in text.lines() {
        let lower = line.to_lowercase();
        if let Some(value) = lower.strip_prefix("message-id:") {
            let offset = line.len() - value.len();
            return Some(line[offset..].trim().to_string());
        }
    }
    None
}

async fn write_line<S>(conn: &mut BufStream<S>, line: &str) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(line.as_bytes()).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await
}
