//! Link resolution covering every supported shape and the canonical id
//! normalization rules.

use tg_courier::link::{canonical_channel_id, is_invite_link, resolve, ChatLocator, LinkKind, ParseError};

#[test]
fn private_link_normalizes_channel_id() {
    let parsed = resolve("https://t.me/c/1234567890/55", 0).expect("parse");
    assert_eq!(parsed.chat, ChatLocator::Id(-1_001_234_567_890));
    assert_eq!(parsed.message_id, 55);
    assert_eq!(parsed.kind, LinkKind::Private);
}

#[test]
fn public_link_strips_single_suffix() {
    let parsed = resolve("https://t.me/somechannel/10?single", 0).expect("parse");
    assert_eq!(parsed.chat, ChatLocator::Handle("somechannel".to_string()));
    assert_eq!(parsed.message_id, 10);
    assert_eq!(parsed.kind, LinkKind::Public);
}

#[test]
fn bot_scoped_link_carries_handle() {
    let parsed = resolve("https://t.me/b/helperbot/7", 0).expect("parse");
    assert_eq!(parsed.chat, ChatLocator::Handle("helperbot".to_string()));
    assert_eq!(parsed.kind, LinkKind::BotScoped);
}

#[test]
fn offset_supports_batch_retrieval() {
    for offset in 0..5 {
        let parsed = resolve("https://t.me/somechannel/100", offset).expect("parse");
        assert_eq!(parsed.message_id, 100 + offset);
    }
}

#[test]
fn unrecognized_shapes_fail_with_parse_error() {
    for input in [
        "",
        "hello world",
        "https://example.com/c/123/45",
        "https://t.me/onlyhandle",
        "https://t.me/c/12a34/55",
    ] {
        assert_eq!(
            resolve(input, 0),
            Err(ParseError::UnrecognizedShape),
            "input {input:?} should not parse"
        );
    }
}

#[test]
fn normalization_is_idempotent() {
    let first = canonical_channel_id("1234567890").expect("normalize");
    let again = canonical_channel_id(&first.to_string()).expect("re-normalize");
    assert_eq!(first, again);
    assert_eq!(first, -1_001_234_567_890);
}

#[test]
fn invite_links_are_not_message_links() {
    assert!(is_invite_link("https://t.me/+AAAA"));
    assert!(is_invite_link("https://t.me/joinchat/AAAA"));
    assert!(resolve("https://t.me/+AAAA", 0).is_err());
}
