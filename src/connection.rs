//! The server connection: protocol state machine, command formatters, and
//! the receive-path classifier that turns decoded lines into [`Event`]s.
//!
//! Mirrors the teacher's sans-IO `state::HandshakeMachine` in spirit (a pure
//! transition core fed parsed messages) but folds the transitions directly
//! into [`ServerConnection`], since this crate's receive path already owns
//! the socket and buffer the teacher's state machine left external.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::ctcp::{self, CtcpChunk};
use crate::error::CoreError;
use crate::isupport::FeatureSet;
use crate::line_buffer::{Decoding, LineBuffer};
use crate::message::{self, Event, NickMask, Tag};
use crate::socket::{ConnectSpec, Socket, SocketFactory};

const MAX_FRAME_BYTES: usize = 512;
const READ_CHUNK_BYTES: usize = 16384;

/// All arguments to `connect()`, saved for a later `reconnect()`.
#[derive(Clone, Debug)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
    pub use_ipv6: bool,
    pub bind: Option<SocketAddr>,
}

impl ConnectParams {
    pub fn new(host: impl Into<String>, port: u16, nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        Self {
            host: host.into(),
            port,
            username: nickname.clone(),
            realname: nickname.clone(),
            nickname,
            password: None,
            use_ipv6: false,
            bind: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Registering,
    Registered,
}

/// CAP subcommands a client may send. Anything else is a programmer error
/// caught at compile time rather than a stringly-typed mistake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapSubCommand {
    Ls,
    List,
    Req,
    Ack,
    Clear,
    End,
}

impl CapSubCommand {
    fn as_str(self) -> &'static str {
        match self {
            CapSubCommand::Ls => "LS",
            CapSubCommand::List => "LIST",
            CapSubCommand::Req => "REQ",
            CapSubCommand::Ack => "ACK",
            CapSubCommand::Clear => "CLEAR",
            CapSubCommand::End => "END",
        }
    }
}

/// Throttles `send_raw` to at most `n` calls per second by sleeping the
/// caller the minimum remaining interval.
pub struct RateLimiter {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl RateLimiter {
    pub fn per_second(n: u32) -> Self {
        let n = n.max(1);
        Self {
            min_interval: Duration::from_secs_f64(1.0 / n as f64),
            last_sent: None,
        }
    }

    async fn throttle(&mut self) {
        if let Some(last) = self.last_sent {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        self.last_sent = Some(Instant::now());
    }
}

fn is_channel_name(s: &str) -> bool {
    s.chars().next().is_some_and(|c| "#&+!".contains(c))
}

fn format_command(tokens: &[&str]) -> String {
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A live or disconnected connection to one IRC server.
pub struct ServerConnection {
    reader: Option<Box<dyn tokio::io::AsyncRead + Send + Unpin>>,
    writer: Option<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>,
    buffer: LineBuffer,
    decoding: Decoding,
    pub features: FeatureSet,
    pub real_nickname: String,
    pub real_server_name: Option<String>,
    pub state: ConnectionState,
    saved_connect_args: Option<ConnectParams>,
    rate_limiter: Option<RateLimiter>,
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConnection {
    pub fn new() -> Self {
        Self {
            reader: None,
            writer: None,
            buffer: LineBuffer::new(),
            decoding: Decoding::Strict,
            features: FeatureSet::new(),
            real_nickname: String::new(),
            real_server_name: None,
            state: ConnectionState::Disconnected,
            saved_connect_args: None,
            rate_limiter: None,
        }
    }

    pub fn with_decoding(mut self, decoding: Decoding) -> Self {
        self.decoding = decoding;
        self
    }

    /// Wraps future `send_raw` calls with a per-second throttle. Unwraps an
    /// already-installed limiter first, so wrapping twice never compounds.
    pub fn set_rate_limit(&mut self, per_second: u32) {
        self.rate_limiter = Some(RateLimiter::per_second(per_second));
    }

    pub fn clear_rate_limit(&mut self) {
        self.rate_limiter = None;
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.state, ConnectionState::Disconnected)
    }

    pub fn saved_connect_args(&self) -> Option<&ConnectParams> {
        self.saved_connect_args.as_ref()
    }

    /// Open the socket, send `PASS`/`NICK`/`USER`, and transition to
    /// `REGISTERING`. Re-entry while already connected first sends `QUIT`
    /// and closes before reconnecting.
    pub async fn connect(
        &mut self,
        factory: &SocketFactory,
        params: ConnectParams,
    ) -> Result<(), CoreError> {
        if self.is_connected() {
            let _ = self.quit(Some("reconnecting")).await;
            self.close();
        }

        let spec = ConnectSpec {
            host: params.host.clone(),
            port: params.port,
            use_ipv6: params.use_ipv6,
            bind: params.bind,
        };
        let socket = factory.connect(&spec).await?;
        self.install_socket(socket);

        self.real_nickname = params.nickname.clone();
        self.real_server_name = None;
        self.state = ConnectionState::Registering;

        if let Some(pw) = &params.password {
            self.pass(pw).await?;
        }
        self.nick(&params.nickname).await?;
        self.user(&params.username, &params.realname).await?;

        self.saved_connect_args = Some(params);
        Ok(())
    }

    /// Re-run `connect()` with the previously saved arguments.
    pub async fn reconnect(&mut self, factory: &SocketFactory) -> Result<(), CoreError> {
        let params = self
            .saved_connect_args
            .clone()
            .ok_or(CoreError::NotConnected)?;
        self.connect(factory, params).await
    }

    fn install_socket(&mut self, socket: Socket) {
        let (r, w) = socket.split();
        self.reader = Some(r);
        self.writer = Some(w);
        self.buffer = LineBuffer::new();
    }

    /// Tear down the socket without notifying the peer. Terminal: the
    /// connection is not reusable until `connect()` is called again.
    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Read up to one chunk, decode complete lines, and classify each into
    /// zero or more events. Socket errors and EOF transition to
    /// `DISCONNECTED` and return a single `disconnect` event.
    pub async fn receive(&mut self) -> Result<Vec<Event>, CoreError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(CoreError::NotConnected);
        };

        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                self.close();
                return Ok(vec![disconnect_event("connection closed by peer")]);
            }
            Ok(n) => n,
            Err(e) => {
                self.close();
                return Ok(vec![disconnect_event(&e.to_string())]);
            }
        };
        self.buffer.feed(&chunk[..n]);

        let lines = match self.decoding {
            Decoding::Strict => self.buffer.drain_lines_strict(),
            #[cfg(feature = "lenient-decode")]
            Decoding::Lenient => self
                .buffer
                .drain_lines_lenient()
                .into_iter()
                .map(Ok)
                .collect(),
        };

        let mut events = Vec::new();
        for line in lines {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("dropping undecodable line: {e}");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let mut raw_event = Event::new("all_raw_messages");
            raw_event.arguments.push(line.clone());
            events.push(raw_event);

            match message::parse_raw(&line) {
                Ok(raw) => events.extend(self.classify(raw)),
                Err(e) => tracing::warn!("protocol violation, dropping line: {e}"),
            }
        }
        Ok(events)
    }

    fn classify(&mut self, raw: message::RawMessage) -> Vec<Event> {
        let kind = message::normalize_command(&raw.command);
        let source = raw.prefix.as_deref().map(NickMask::new);
        let tags: Vec<Tag> = raw.tags;

        if kind == "nick" {
            if let Some(src) = &source {
                if crate::casefold::eq(src.nick(), &self.real_nickname) {
                    if let Some(new_nick) = raw.args.first() {
                        self.real_nickname = new_nick.clone();
                    }
                }
            }
        }

        if kind == "welcome" {
            if let Some(nick) = raw.args.first() {
                self.real_nickname = nick.clone();
            }
            if self.real_server_name.is_none() {
                self.real_server_name = source.as_ref().map(|s| s.nick().to_string());
            }
            self.state = ConnectionState::Registered;
        }

        if kind == "featurelist" {
            let params: Vec<&str> = raw.args.iter().map(String::as_str).collect();
            self.features.apply_params(&params);
        }

        if kind == "privmsg" || kind == "notice" {
            return self.classify_privmsg_notice(kind, source, tags, raw.args);
        }

        let mut event = Event::new(kind.clone());
        event.source = source;
        event.tags = tags;

        let mut args = raw.args;
        if !args.is_empty() && kind != "quit" {
            event.target = Some(args.remove(0));
        }
        event.arguments = args;

        if kind == "mode" {
            let is_channel = event.target.as_deref().is_some_and(is_channel_name);
            if !is_channel {
                event.kind = "umode".to_string();
            }
        }

        vec![event]
    }

    fn classify_privmsg_notice(
        &self,
        kind: String,
        source: Option<NickMask>,
        tags: Vec<Tag>,
        mut args: Vec<String>,
    ) -> Vec<Event> {
        if args.len() < 2 {
            let mut ev = Event::new(kind);
            ev.source = source;
            ev.tags = tags;
            ev.arguments = args;
            return vec![ev];
        }
        let body = args.pop().expect("checked len >= 2");
        let target = args.pop().expect("checked len >= 2");
        let is_channel = is_channel_name(&target);

        let mut out = Vec::new();
        for chunk in ctcp::split_ctcp(&body) {
            match chunk {
                CtcpChunk::Text(text) => {
                    let text = String::from_utf8_lossy(&ctcp::low_level_dequote(text.as_bytes()))
                        .into_owned();
                    if text.is_empty() {
                        continue;
                    }
                    let derived_kind = match (kind.as_str(), is_channel) {
                        ("privmsg", true) => "pubmsg",
                        ("privmsg", false) => "privmsg",
                        ("notice", true) => "pubnotice",
                        ("notice", false) => "privnotice",
                        _ => kind.as_str(),
                    };
                    let mut ev = Event::new(derived_kind);
                    ev.source = source.clone();
                    ev.tags = tags.clone();
                    ev.target = Some(target.clone());
                    ev.arguments = vec![text];
                    out.push(ev);
                }
                CtcpChunk::Tagged { tag, data } => {
                    let ctcp_kind = if kind == "notice" { "ctcpreply" } else { "ctcp" };
                    let mut ev = Event::new(ctcp_kind);
                    ev.source = source.clone();
                    ev.tags = tags.clone();
                    ev.target = Some(target.clone());
                    ev.arguments = match &data {
                        Some(d) => vec![tag.clone(), d.clone()],
                        None => vec![tag.clone()],
                    };
                    let is_action = ctcp_kind == "ctcp" && tag == "ACTION";
                    out.push(ev);

                    if is_action {
                        let mut action_ev = Event::new("action");
                        action_ev.source = source.clone();
                        action_ev.tags = tags.clone();
                        action_ev.target = Some(target.clone());
                        action_ev.arguments = data.into_iter().collect();
                        out.push(action_ev);
                    }
                }
            }
        }
        out
    }

    /// Validate and write one command. Appends `\r\n`; rejects embedded `\n`
    /// and frames over 512 bytes.
    pub async fn send_raw(&mut self, command: &str) -> Result<(), CoreError> {
        if command.contains('\n') {
            return Err(CoreError::InvalidCharacters);
        }
        let mut frame = String::with_capacity(command.len() + 2);
        frame.push_str(command);
        frame.push_str("\r\n");
        if frame.len() > MAX_FRAME_BYTES {
            return Err(CoreError::MessageTooLong(frame.len()));
        }

        if let Some(limiter) = &mut self.rate_limiter {
            limiter.throttle().await;
        }

        let writer = self.writer.as_mut().ok_or(CoreError::NotConnected)?;
        writer.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    // ---- command vocabulary (§4.4) ----

    pub async fn admin(&mut self, server: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["ADMIN", server.unwrap_or("")]))
            .await
    }

    pub async fn cap(&mut self, sub: CapSubCommand, args: &[&str]) -> Result<(), CoreError> {
        let tail = match args.len() {
            0 => String::new(),
            1 => args[0].to_string(),
            _ => format!(":{}", args.join(" ")),
        };
        self.send_raw(&format_command(&["CAP", sub.as_str(), &tail]))
            .await
    }

    pub async fn info(&mut self) -> Result<(), CoreError> {
        self.send_raw("INFO").await
    }

    pub async fn invite(&mut self, nick: &str, channel: &str) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["INVITE", nick, channel])).await
    }

    pub async fn ison(&mut self, nicks: &[&str]) -> Result<(), CoreError> {
        let joined = nicks.join(" ");
        self.send_raw(&format_command(&["ISON", &joined])).await
    }

    pub async fn join(&mut self, channel: &str, key: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["JOIN", channel, key.unwrap_or("")]))
            .await
    }

    pub async fn kick(
        &mut self,
        channel: &str,
        nick: &str,
        comment: Option<&str>,
    ) -> Result<(), CoreError> {
        let tail = comment.map(|c| format!(":{c}")).unwrap_or_default();
        self.send_raw(&format_command(&["KICK", channel, nick, &tail]))
            .await
    }

    pub async fn links(&mut self, remote: Option<&str>, mask: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&[
            "LINKS",
            remote.unwrap_or(""),
            mask.unwrap_or(""),
        ]))
        .await
    }

    pub async fn list(&mut self, channels: &[&str], server: Option<&str>) -> Result<(), CoreError> {
        let chans = channels.join(",");
        self.send_raw(&format_command(&["LIST", &chans, server.unwrap_or("")]))
            .await
    }

    pub async fn lusers(&mut self, server: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["LUSERS", server.unwrap_or("")]))
            .await
    }

    pub async fn mode(&mut self, target: &str, flags: &str) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["MODE", target, flags])).await
    }

    pub async fn motd(&mut self) -> Result<(), CoreError> {
        self.send_raw("MOTD").await
    }

    pub async fn names(&mut self, channels: &[&str]) -> Result<(), CoreError> {
        let chans = channels.join(",");
        self.send_raw(&format_command(&["NAMES", &chans])).await
    }

    pub async fn nick(&mut self, nickname: &str) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["NICK", nickname])).await
    }

    pub async fn notice(&mut self, target: &str, text: &str) -> Result<(), CoreError> {
        self.send_raw(&format!("NOTICE {target} :{text}")).await
    }

    pub async fn oper(&mut self, nick: &str, password: &str) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["OPER", nick, password])).await
    }

    pub async fn part(&mut self, channels: &[&str], message: Option<&str>) -> Result<(), CoreError> {
        let chans = channels.join(",");
        let tail = message.map(|m| format!(":{m}")).unwrap_or_default();
        self.send_raw(&format_command(&["PART", &chans, &tail])).await
    }

    pub async fn pass(&mut self, password: &str) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["PASS", password])).await
    }

    pub async fn ping(&mut self, t1: &str, t2: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["PING", t1, t2.unwrap_or("")]))
            .await
    }

    pub async fn pong(&mut self, t1: &str, t2: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["PONG", t1, t2.unwrap_or("")]))
            .await
    }

    pub async fn privmsg(&mut self, target: &str, text: &str) -> Result<(), CoreError> {
        self.send_raw(&format!("PRIVMSG {target} :{text}")).await
    }

    pub async fn action(&mut self, target: &str, text: &str) -> Result<(), CoreError> {
        let body = ctcp::encode_ctcp("ACTION", Some(text));
        self.privmsg(target, &body).await
    }

    pub async fn quit(&mut self, message: Option<&str>) -> Result<(), CoreError> {
        let tail = message.map(|m| format!(":{m}")).unwrap_or_default();
        self.send_raw(&format_command(&["QUIT", &tail])).await
    }

    pub async fn squit(&mut self, server: &str, comment: Option<&str>) -> Result<(), CoreError> {
        let tail = comment.map(|c| format!(":{c}")).unwrap_or_default();
        self.send_raw(&format_command(&["SQUIT", server, &tail])).await
    }

    pub async fn stats(&mut self, query: &str, server: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["STATS", query, server.unwrap_or("")]))
            .await
    }

    pub async fn time(&mut self) -> Result<(), CoreError> {
        self.send_raw("TIME").await
    }

    pub async fn topic(&mut self, channel: &str, text: Option<&str>) -> Result<(), CoreError> {
        let tail = text.map(|t| format!(":{t}")).unwrap_or_default();
        self.send_raw(&format_command(&["TOPIC", channel, &tail])).await
    }

    pub async fn trace(&mut self, target: Option<&str>) -> Result<(), CoreError> {
        self.send_raw(&format_command(&["TRACE", target.unwrap_or("")]))
            .await
    }

    pub async fn user(&mut self, username: &str, realname: &str) -> Result<(), CoreError> {
        self.send_raw(&format!("USER {username} 0 * :{realname}")).await
    }

    pub async fn userhost(&mut self, nicks: &[&str]) -> Result<(), CoreError> {
        let joined = nicks.join(",");
        self.send_raw(&format_command(&["USERHOST", &joined])).await
    }

    pub async fn users(&mut self) -> Result<(), CoreError> {
        self.send_raw("USERS").await
    }

    pub async fn version(&mut self) -> Result<(), CoreError> {
        self.send_raw("VERSION").await
    }

    pub async fn wallops(&mut self, text: &str) -> Result<(), CoreError> {
        self.send_raw(&format!("WALLOPS :{text}")).await
    }

    pub async fn who(&mut self, target: Option<&str>, operators_only: bool) -> Result<(), CoreError> {
        let o = if operators_only { "o" } else { "" };
        self.send_raw(&format_command(&["WHO", target.unwrap_or(""), o]))
            .await
    }

    pub async fn whois(&mut self, nicks: &[&str]) -> Result<(), CoreError> {
        let joined = nicks.join(",");
        self.send_raw(&format_command(&["WHOIS", &joined])).await
    }

    pub async fn whowas(&mut self, nick: &str, max: Option<u32>, server: Option<&str>) -> Result<(), CoreError> {
        let max_s = max.map(|m| m.to_string()).unwrap_or_default();
        self.send_raw(&format_command(&["WHOWAS", nick, &max_s, server.unwrap_or("")]))
            .await
    }
}

fn disconnect_event(reason: &str) -> Event {
    let mut ev = Event::new("disconnect");
    ev.arguments.push(reason.to_string());
    ev
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered_conn() -> ServerConnection {
        let mut conn = ServerConnection::new();
        conn.real_nickname = "alice".to_string();
        conn.state = ConnectionState::Registered;
        conn
    }

    #[test]
    fn s1_welcome_sets_nickname_and_classifies() {
        let mut conn = ServerConnection::new();
        let raw = message::parse_raw(":irc.example.net 001 alice :Welcome").unwrap();
        let events = conn.classify(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "welcome");
        assert_eq!(events[0].source.as_ref().unwrap().as_str(), "irc.example.net");
        assert_eq!(events[0].target.as_deref(), Some("alice"));
        assert_eq!(events[0].arguments, vec!["Welcome"]);
        assert_eq!(conn.real_nickname, "alice");
        assert_eq!(conn.state, ConnectionState::Registered);
    }

    #[test]
    fn s2_channel_pubmsg() {
        let mut conn = registered_conn();
        let raw = message::parse_raw(":bob!b@h PRIVMSG #room :hi all").unwrap();
        let events = conn.classify(raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "pubmsg");
        assert_eq!(events[0].source.as_ref().unwrap().as_str(), "bob!b@h");
        assert_eq!(events[0].target.as_deref(), Some("#room"));
        assert_eq!(events[0].arguments, vec!["hi all"]);
    }

    #[test]
    fn s3_ctcp_action_order() {
        let mut conn = registered_conn();
        let raw = message::parse_raw(":bob!b@h PRIVMSG #r :\u{1}ACTION waves\u{1}").unwrap();
        let events = conn.classify(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "ctcp");
        assert_eq!(events[0].arguments, vec!["ACTION", "waves"]);
        assert_eq!(events[1].kind, "action");
        assert_eq!(events[1].arguments, vec!["waves"]);
    }

    #[test]
    fn s4_featurelist_updates_prefix_in_order() {
        let mut conn = ServerConnection::new();
        let raw = message::parse_raw(":s 005 alice PREFIX=(ov)@+ :are supported").unwrap();
        conn.classify(raw);
        assert_eq!(conn.features.prefix(), &[('@', 'o'), ('+', 'v')]);
    }

    #[test]
    fn mode_on_non_channel_becomes_umode() {
        let mut conn = registered_conn();
        let raw = message::parse_raw(":alice MODE alice +i").unwrap();
        let events = conn.classify(raw);
        assert_eq!(events[0].kind, "umode");
    }

    #[test]
    fn send_raw_rejects_embedded_newline() {
        let mut conn = ServerConnection::new();
        let fut = conn.send_raw("PRIVMSG #c :a\nb");
        let result = futures_lite_block_on(fut);
        assert!(matches!(result, Err(CoreError::InvalidCharacters)));
    }

    #[test]
    fn send_raw_rejects_oversize_frame() {
        let mut conn = ServerConnection::new();
        let long = "x".repeat(600);
        let fut = conn.send_raw(&format!("PRIVMSG #c :{long}"));
        let result = futures_lite_block_on(fut);
        assert!(matches!(result, Err(CoreError::MessageTooLong(_))));
    }

    // Minimal same-thread executor for the two synchronous-path tests above
    // (no socket I/O is reached before the validation errors return).
    fn futures_lite_block_on<F: std::future::Future>(fut: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("build current-thread runtime");
        rt.block_on(fut)
    }
}
