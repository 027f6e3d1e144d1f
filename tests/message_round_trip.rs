//! Integration tests for raw line splitting.
//!
//! [`parse_raw`] only splits a decoded line into tags/prefix/command/args —
//! it does not reassemble a line, so these tests check the split is correct
//! rather than a parse/serialize/reparse round trip.

use ircore::message::{normalize_command, parse_raw, NickMask};

#[test]
fn simple_ping() {
    let raw = parse_raw("PING :irc.example.com").unwrap();
    assert_eq!(raw.command, "PING");
    assert_eq!(raw.args, vec!["irc.example.com"]);
    assert!(raw.prefix.is_none());
}

#[test]
fn privmsg_with_prefix() {
    let raw = parse_raw(":nick!user@host PRIVMSG #channel :Hello, world!").unwrap();
    assert_eq!(raw.prefix.as_deref(), Some("nick!user@host"));
    assert_eq!(raw.command, "PRIVMSG");
    assert_eq!(raw.args, vec!["#channel", "Hello, world!"]);
}

#[test]
fn message_with_tags() {
    let raw = parse_raw("@time=2023-01-01T00:00:00.000Z;msgid=abc123 :nick!user@host PRIVMSG #channel :Tagged message").unwrap();
    assert_eq!(raw.tags.len(), 2);
    assert_eq!(raw.tags[0].key, "time");
    assert_eq!(raw.tags[0].value.as_deref(), Some("2023-01-01T00:00:00.000Z"));
    assert_eq!(raw.tags[1].key, "msgid");
    assert_eq!(raw.tags[1].value.as_deref(), Some("abc123"));
}

#[test]
fn numeric_response_normalizes_to_welcome() {
    let raw = parse_raw(":irc.server.net 001 nickname :Welcome to the IRC Network").unwrap();
    assert_eq!(raw.command, "001");
    assert_eq!(normalize_command(&raw.command), "welcome");
    assert_eq!(raw.args, vec!["nickname", "Welcome to the IRC Network"]);
}

#[test]
fn empty_trailing_parameter_is_preserved() {
    let raw = parse_raw("PRIVMSG #channel :").unwrap();
    assert_eq!(raw.args, vec!["#channel", ""]);
}

#[test]
fn mode_command_args() {
    let raw = parse_raw(":server MODE #channel +o nick").unwrap();
    assert_eq!(raw.command, "MODE");
    assert_eq!(raw.args, vec!["#channel", "+o", "nick"]);
}

#[test]
fn join_command_variations() {
    let cases = [
        ("JOIN #channel", vec!["#channel"]),
        ("JOIN #channel key", vec!["#channel", "key"]),
        (":nick!user@host JOIN #channel", vec!["#channel"]),
        ("JOIN #channel1,#channel2 key1,key2", vec!["#channel1,#channel2", "key1,key2"]),
    ];

    for (line, expected_args) in cases {
        let raw = parse_raw(line).unwrap_or_else(|e| panic!("failed to parse '{line}': {e}"));
        assert_eq!(raw.command, "JOIN");
        assert_eq!(raw.args, expected_args, "args mismatch for '{line}'");
    }
}

#[test]
fn batch_messages() {
    let open = parse_raw("BATCH +abc123 chathistory #channel").unwrap();
    assert_eq!(open.args, vec!["+abc123", "chathistory", "#channel"]);

    let close = parse_raw("BATCH -abc123").unwrap();
    assert_eq!(close.args, vec!["-abc123"]);

    let tagged = parse_raw("@batch=abc123 :server PRIVMSG #channel :Batched message").unwrap();
    assert_eq!(tagged.tags[0].key, "batch");
    assert_eq!(tagged.tags[0].value.as_deref(), Some("abc123"));
}

#[test]
fn operator_ban_commands() {
    let cases = [
        "KLINE 60 *@badhost.com :Spamming",
        "KLINE user@host.com :No reason given",
        "DLINE 3600 192.168.1.0/24 :Network abuse",
        "DLINE 10.0.0.1 :Suspicious activity",
        "UNKLINE user@host.com",
        "UNDLINE 192.168.1.0/24",
    ];

    for line in cases {
        parse_raw(line).unwrap_or_else(|e| panic!("failed to parse '{line}': {e}"));
    }
}

#[test]
fn knock_command() {
    let without_message = parse_raw("KNOCK #channel").unwrap();
    assert_eq!(without_message.args, vec!["#channel"]);

    let with_message = parse_raw("KNOCK #secretroom :Please let me in!").unwrap();
    assert_eq!(with_message.args, vec!["#secretroom", "Please let me in!"]);
}

#[test]
fn nick_mask_extraction_from_prefix() {
    let raw = parse_raw(":bob!b@host.example.com PRIVMSG #chan :hi").unwrap();
    let mask = NickMask::new(raw.prefix.unwrap());
    assert_eq!(mask.nick(), "bob");
    assert_eq!(mask.user(), Some("b"));
    assert_eq!(mask.host(), Some("host.example.com"));
}
