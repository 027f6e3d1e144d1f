//! Single-server client/bot: owns a reactor-managed connection, tracks
//! joined channels, applies a reconnect policy with jittered exponential
//! backoff, and answers routine CTCP queries by default.
//!
//! Channel bookkeeping is grounded on the teacher's case-folded-dict
//! redesign direction (`casefold::CaseFoldedMap`); default CTCP replies and
//! the reconnect formula are supplemented from `original_source/irc/client.py`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::casefold::{self, CaseFoldedMap};
use crate::connection::ConnectParams;
use crate::ctcp;
use crate::error::CoreError;
use crate::message::Event;
use crate::mode::{self, ModeArgPolicy, Sign};
use crate::reactor::{ConnectionHandle, HandlerResult, Reactor};

/// Per-channel membership and mode state.
#[derive(Clone, Debug)]
pub struct ChannelRecord {
    pub name: String,
    users: CaseFoldedMap<()>,
    mode_users: HashMap<char, CaseFoldedMap<()>>,
    modes: HashMap<char, Option<String>>,
}

impl ChannelRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: CaseFoldedMap::new(),
            mode_users: HashMap::new(),
            modes: HashMap::new(),
        }
    }

    fn add_user(&mut self, nick: &str) {
        self.users.insert(nick, ());
    }

    fn remove_user(&mut self, nick: &str) {
        self.users.remove(nick);
        for set in self.mode_users.values_mut() {
            set.remove(nick);
        }
    }

    fn rename_user(&mut self, from: &str, to: &str) {
        if self.users.rename(from, to) {
            for set in self.mode_users.values_mut() {
                set.rename(from, to);
            }
        }
    }

    fn add_user_mode(&mut self, letter: char, nick: &str) {
        self.mode_users.entry(letter).or_default().insert(nick, ());
    }

    fn remove_user_mode(&mut self, letter: char, nick: &str) {
        if let Some(set) = self.mode_users.get_mut(&letter) {
            set.remove(nick);
        }
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.keys()
    }

    pub fn has_user(&self, nick: &str) -> bool {
        self.users.contains_key(nick)
    }

    pub fn user_has_mode(&self, letter: char, nick: &str) -> bool {
        self.mode_users.get(&letter).is_some_and(|s| s.contains_key(nick))
    }

    pub fn mode_value(&self, letter: char) -> Option<Option<&str>> {
        self.modes.get(&letter).map(|v| v.as_deref())
    }
}

/// Common per-user and list-queryable channel mode letters. The tracker
/// acts on events alone (no access to a live `FeatureSet`), so it uses this
/// fixed, widely-supported set rather than the connection's negotiated
/// CHANMODES.
struct TrackerModePolicy;

impl ModeArgPolicy for TrackerModePolicy {
    fn takes_arg(&self, _sign: Sign, letter: char) -> bool {
        matches!(letter, 'o' | 'v' | 'h' | 'a' | 'q' | 'k' | 'l' | 'b' | 'e' | 'I')
    }
    fn is_list_query(&self, letter: char) -> bool {
        matches!(letter, 'b' | 'e' | 'I')
    }
}

const USER_MODE_LETTERS: &str = "ovhaq";

/// Default prefix-char -> mode-letter table used by the tracker's NAMES
/// parsing, for the same reason `TrackerModePolicy` is fixed rather than live.
const DEFAULT_PREFIXES: &[(char, char)] = &[('@', 'o'), ('+', 'v'), ('%', 'h'), ('&', 'a'), ('~', 'q')];

fn strip_default_prefixes(name: &str) -> (&str, Vec<char>) {
    let mut modes = Vec::new();
    let mut rest = name;
    while let Some(c) = rest.chars().next() {
        match DEFAULT_PREFIXES.iter().find(|(p, _)| *p == c) {
            Some((_, m)) => {
                modes.push(*m);
                rest = &rest[c.len_utf8()..];
            }
            None => break,
        }
    }
    (rest, modes)
}

type Channels = Arc<Mutex<CaseFoldedMap<ChannelRecord>>>;

/// Registers the channel-tracking handlers (priority -20, per spec) onto a
/// reactor for a single connection, keyed by a shared view of "our" nick.
fn install_channel_tracker(reactor: &mut Reactor, own_nick: Arc<Mutex<String>>, channels: Channels) {
    const PRIORITY: i32 = -20;

    {
        let own_nick = own_nick.clone();
        let channels = channels.clone();
        reactor.add_global_handler(
            "join",
            PRIORITY,
            Box::new(move |event: &Event| {
                let Some(source) = &event.source else {
                    return (HandlerResult::Continue, vec![]);
                };
                let Some(chan) = &event.target else {
                    return (HandlerResult::Continue, vec![]);
                };
                let nick = source.nick();
                let mut channels = channels.lock().unwrap();
                if casefold::eq(nick, &own_nick.lock().unwrap()) {
                    channels.insert(chan, ChannelRecord::new(chan));
                }
                if let Some(record) = channels.get_mut(chan.as_str()) {
                    record.add_user(nick);
                }
                (HandlerResult::Continue, vec![])
            }),
        );
    }

    {
        let own_nick = own_nick.clone();
        let channels = channels.clone();
        reactor.add_global_handler(
            "kick",
            PRIORITY,
            Box::new(move |event: &Event| {
                let Some(chan) = &event.target else {
                    return (HandlerResult::Continue, vec![]);
                };
                let Some(kicked) = event.arguments.first() else {
                    return (HandlerResult::Continue, vec![]);
                };
                let mut channels = channels.lock().unwrap();
                if casefold::eq(kicked, &own_nick.lock().unwrap()) {
                    channels.remove(chan.as_str());
                } else if let Some(record) = channels.get_mut(chan.as_str()) {
                    record.remove_user(kicked);
                }
                (HandlerResult::Continue, vec![])
            }),
        );
    }

    {
        let channels = channels.clone();
        reactor.add_global_handler(
            "mode",
            PRIORITY,
            Box::new(move |event: &Event| {
                let Some(chan) = &event.target else {
                    return (HandlerResult::Continue, vec![]);
                };
                if event.arguments.is_empty() {
                    return (HandlerResult::Continue, vec![]);
                }
                let pieces: Vec<&str> = event.arguments.iter().map(String::as_str).collect();
                let Ok(changes) = mode::parse_modes(&pieces, &TrackerModePolicy) else {
                    return (HandlerResult::Continue, vec![]);
                };
                let mut channels = channels.lock().unwrap();
                let Some(record) = channels.get_mut(chan.as_str()) else {
                    return (HandlerResult::Continue, vec![]);
                };
                for change in changes {
                    if USER_MODE_LETTERS.contains(change.letter) {
                        if let Some(arg) = &change.arg {
                            match change.sign {
                                Sign::Plus => record.add_user_mode(change.letter, arg),
                                Sign::Minus => record.remove_user_mode(change.letter, arg),
                            }
                        }
                    } else {
                        match change.sign {
                            Sign::Plus => {
                                record.modes.insert(change.letter, change.arg.clone());
                            }
                            Sign::Minus => {
                                record.modes.remove(&change.letter);
                            }
                        }
                    }
                }
                (HandlerResult::Continue, vec![])
            }),
        );
    }

    {
        let channels = channels.clone();
        reactor.add_global_handler(
            "namreply",
            PRIORITY,
            Box::new(move |event: &Event| {
                let Some(chan) = event.arguments.get(1) else {
                    return (HandlerResult::Continue, vec![]);
                };
                if chan == "*" {
                    return (HandlerResult::Continue, vec![]);
                }
                let Some(names) = event.arguments.get(2) else {
                    return (HandlerResult::Continue, vec![]);
                };
                let mut channels = channels.lock().unwrap();
                let Some(record) = channels.get_mut(chan.as_str()) else {
                    return (HandlerResult::Continue, vec![]);
                };
                for raw_name in names.split_whitespace() {
                    let (nick, modes) = strip_default_prefixes(raw_name);
                    record.add_user(nick);
                    for m in modes {
                        record.add_user_mode(m, nick);
                    }
                }
                (HandlerResult::Continue, vec![])
            }),
        );
    }

    {
        let channels = channels.clone();
        reactor.add_global_handler(
            "nick",
            PRIORITY,
            Box::new(move |event: &Event| {
                let (Some(source), Some(new_nick)) = (&event.source, &event.target) else {
                    return (HandlerResult::Continue, vec![]);
                };
                let old_nick = source.nick().to_string();
                let mut channels = channels.lock().unwrap();
                let names: Vec<String> = channels.keys().map(str::to_string).collect();
                for chan in names {
                    if let Some(record) = channels.get_mut(chan.as_str()) {
                        record.rename_user(&old_nick, new_nick);
                    }
                }
                (HandlerResult::Continue, vec![])
            }),
        );
    }

    {
        let channels = channels.clone();
        reactor.add_global_handler(
            "part",
            PRIORITY,
            Box::new(move |event: &Event| {
                let (Some(source), Some(chan)) = (&event.source, &event.target) else {
                    return (HandlerResult::Continue, vec![]);
                };
                if let Some(record) = channels.lock().unwrap().get_mut(chan.as_str()) {
                    record.remove_user(source.nick());
                }
                (HandlerResult::Continue, vec![])
            }),
        );
    }

    {
        let channels = channels.clone();
        reactor.add_global_handler(
            "quit",
            PRIORITY,
            Box::new(move |event: &Event| {
                let Some(source) = &event.source else {
                    return (HandlerResult::Continue, vec![]);
                };
                let nick = source.nick().to_string();
                let mut channels = channels.lock().unwrap();
                let names: Vec<String> = channels.keys().map(str::to_string).collect();
                for chan in names {
                    if let Some(record) = channels.get_mut(chan.as_str()) {
                        record.remove_user(&nick);
                    }
                }
                (HandlerResult::Continue, vec![])
            }),
        );
    }

    reactor.add_global_handler(
        "disconnect",
        PRIORITY,
        Box::new(move |_event: &Event| {
            *channels.lock().unwrap() = CaseFoldedMap::new();
            (HandlerResult::Continue, vec![])
        }),
    );
}

/// Replies to routine CTCP queries a user handler hasn't already answered.
/// Registered at a deliberately high (late-running) priority so any user
/// handler for `ctcp` that returns `HandlerResult::NoMore` preempts it.
fn install_default_ctcp_replies(reactor: &mut Reactor) {
    const LATE_PRIORITY: i32 = 1000;
    reactor.add_global_handler(
        "ctcp",
        LATE_PRIORITY,
        Box::new(|event: &Event| {
            let Some(source) = &event.source else {
                return (HandlerResult::Continue, vec![]);
            };
            let Some(tag) = event.arguments.first() else {
                return (HandlerResult::Continue, vec![]);
            };
            let reply = match tag.as_str() {
                "VERSION" => Some(("VERSION", "ircore:0.1.0:rust".to_string())),
                "PING" => Some(("PING", event.arguments.get(1).cloned().unwrap_or_default())),
                "TIME" => Some(("TIME", chrono::Utc::now().to_rfc2822())),
                "CLIENTINFO" => Some(("CLIENTINFO", "VERSION PING TIME CLIENTINFO ACTION".to_string())),
                _ => None,
            };
            match reply {
                Some((reply_tag, data)) => {
                    let body = ctcp::encode_ctcp(reply_tag, Some(&data));
                    let line = format!("NOTICE {} :{body}", source.nick());
                    (HandlerResult::Continue, vec![line])
                }
                None => (HandlerResult::Continue, vec![]),
            }
        }),
    );
}

/// Exponential-backoff-with-jitter reconnect strategy: attempt `k`'s delay
/// is `clamp(jitter(2^k - 1), min_interval, max_interval)`.
struct ReconnectState {
    min_interval: Duration,
    max_interval: Duration,
    attempt: u32,
}

impl ReconnectState {
    fn next_delay(&mut self) -> Duration {
        let k = self.attempt;
        self.attempt = self.attempt.saturating_add(1);
        let raw = 2f64.powi(k as i32) - 1.0;
        let jittered = raw * rand::random::<f64>();
        Duration::from_secs_f64(jittered.max(0.0)).clamp(self.min_interval, self.max_interval)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// A single-server client: one managed connection, channel tracking,
/// default CTCP replies, and reconnect-on-disconnect with backoff.
pub struct Client {
    reactor: Reactor,
    handle: ConnectionHandle,
    servers: Vec<(String, u16)>,
    server_idx: usize,
    nickname: String,
    username: String,
    realname: String,
    password: Option<String>,
    own_nick: Arc<Mutex<String>>,
    channels: Channels,
    reconnect: ReconnectState,
    reconnect_pending: bool,
    reconnect_due: Arc<AtomicBool>,
}

impl Client {
    pub fn new(mut reactor: Reactor, servers: Vec<(String, u16)>, nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        let handle = reactor.server();
        let own_nick = Arc::new(Mutex::new(nickname.clone()));
        let channels: Channels = Arc::new(Mutex::new(CaseFoldedMap::new()));

        install_channel_tracker(&mut reactor, own_nick.clone(), channels.clone());
        install_default_ctcp_replies(&mut reactor);

        Self {
            reactor,
            handle,
            servers,
            server_idx: 0,
            username: nickname.clone(),
            realname: nickname.clone(),
            nickname,
            password: None,
            own_nick,
            channels,
            reconnect: ReconnectState {
                min_interval: Duration::from_secs(60),
                max_interval: Duration::from_secs(300),
                attempt: 0,
            },
            reconnect_pending: false,
            reconnect_due: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_backoff(mut self, min_interval: Duration, max_interval: Duration) -> Self {
        self.reconnect.min_interval = min_interval;
        self.reconnect.max_interval = max_interval;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn reactor(&mut self) -> &mut Reactor {
        &mut self.reactor
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn channel(&self, name: &str) -> Option<ChannelRecord> {
        self.channels.lock().unwrap().get(name).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    fn connect_params(&self) -> ConnectParams {
        let (host, port) = self.servers[self.server_idx].clone();
        let mut params = ConnectParams::new(host, port, self.nickname.clone());
        params.username = self.username.clone();
        params.realname = self.realname.clone();
        params.password = self.password.clone();
        params
    }

    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let params = self.connect_params();
        self.reactor.connect(self.handle, params).await
    }

    /// Run one reactor tick, then detect a connect/disconnect transition and
    /// drive the reconnect policy. Reconnect scheduling needs the reactor's
    /// scheduler, which handler closures don't have access to by design, so
    /// it's driven here instead of through the generic handler table.
    pub async fn tick(&mut self, timeout: Duration) -> Result<(), CoreError> {
        self.reactor.process_once(timeout).await?;

        let connected = self
            .reactor
            .connection(self.handle)
            .map(|c| c.is_connected())
            .unwrap_or(false);

        if connected {
            if self.reconnect_pending {
                self.reconnect.reset();
                self.reconnect_pending = false;
            }
        } else if !self.reconnect_pending {
            self.reconnect_pending = true;
            self.schedule_next_check();
        }

        if self.reconnect_due.swap(false, Ordering::SeqCst) {
            self.attempt_reconnect().await;
        }

        if let Some(conn) = self.reactor.connection(self.handle) {
            *self.own_nick.lock().unwrap() = conn.real_nickname.clone();
        }

        Ok(())
    }

    fn schedule_next_check(&mut self) {
        let delay = self.reconnect.next_delay();
        self.server_idx = (self.server_idx + 1) % self.servers.len();
        let flag = self.reconnect_due.clone();
        self.reactor
            .scheduler()
            .execute_after(delay, Box::new(move || flag.store(true, Ordering::SeqCst)));
    }

    async fn attempt_reconnect(&mut self) {
        let params = self.connect_params();
        if let Err(e) = self.reactor.connect(self.handle, params).await {
            tracing::warn!("reconnect attempt failed: {e}");
            self.reconnect_pending = false; // tick() will reschedule next pass
        }
    }
}
