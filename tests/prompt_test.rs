// Prompt construction

use focal::error::ChatError;
use focal::llm::{PromptBuilder, PromptEntry, Role, Topic, Turn, TITLE_INSTRUCTION};

#[test]
fn test_single_message_without_topic() {
    let prompt = PromptBuilder::build(&[Turn::new("user", "hi")], None).unwrap();
    assert_eq!(prompt.entries, vec![PromptEntry::new(Role::User, "hi")]);
}

#[test]
fn test_topic_only_yields_one_system_entry() {
    let prompt = PromptBuilder::build(&[], Some(&Topic::parse("code"))).unwrap();
    assert_eq!(
        prompt.entries,
        vec![PromptEntry::new(
            Role::System,
            "This is a code related conversation."
        )]
    );
}

#[test]
fn test_title_topic_takes_priority() {
    let prompt = PromptBuilder::build(
        &[Turn::new("user", "hello"), Turn::new("assistant", "hey")],
        Some(&Topic::Title),
    )
    .unwrap();

    assert_eq!(prompt.len(), 3);
    assert_eq!(prompt.entries[0], PromptEntry::new(Role::System, TITLE_INSTRUCTION));
    assert_eq!(prompt.entries[1].role, Role::User);
    assert_eq!(prompt.entries[2].role, Role::Assistant);
}

#[test]
fn test_order_preserved_and_deterministic() {
    let turns = [
        Turn::new("system", "be terse"),
        Turn::new("user", "a"),
        Turn::new("assistant", "b"),
        Turn::new("user", "c"),
    ];
    let first = PromptBuilder::build(&turns, None).unwrap();
    let second = PromptBuilder::build(&turns, None).unwrap();

    assert_eq!(first, second);
    let contents: Vec<&str> = first.entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["be terse", "a", "b", "c"]);
    assert_eq!(first.system_text().as_deref(), Some("be terse"));
    assert_eq!(first.conversation().count(), 3);
}

#[test]
fn test_invalid_messages_rejected() {
    let cases = [
        Turn { role: None, content: Some("x") },
        Turn { role: Some("user"), content: None },
        Turn { role: Some("tool"), content: Some("x") },
        Turn { role: Some("User"), content: Some("x") },
    ];
    for turn in cases {
        let err = PromptBuilder::build(&[turn], None).unwrap_err();
        assert!(matches!(err, ChatError::InvalidMessage(_)), "{:?}", turn);
    }
}

#[test]
fn test_topic_tags_are_open_strings() {
    assert_eq!(Topic::parse("Title"), Topic::Title);
    assert_eq!(Topic::parse("summarize"), Topic::Summarize);
    assert_eq!(Topic::parse("summarise"), Topic::Summarize);
    assert_eq!(Topic::parse("Travel"), Topic::Tag("travel".to_string()));

    let topic: Topic = serde_json::from_str("\"fitness\"").unwrap();
    assert_eq!(topic.to_string(), "fitness");
}
