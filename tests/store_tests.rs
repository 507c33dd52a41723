use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use gatekeep::session::MessageQueue;
use gatekeep::store::{ClientStore, FileClientStore, Preferences};
use gatekeep::types::{ImageAttachment, QueuedMessage};

#[test]
fn two_item_queue_survives_reload_without_images() {
    let temp = TempDir::new().expect("tempdir");
    let store: Arc<dyn ClientStore> = Arc::new(FileClientStore::new(temp.path()));

    let mut queue = MessageQueue::empty("chat-1", store.clone());
    queue.push(QueuedMessage::new("first prompt").with_display_text("first"));
    queue.push(
        QueuedMessage::new("second prompt")
            .with_display_text("second")
            .with_images(vec![ImageAttachment::from_bytes("image/png", b"\x89PNG")]),
    );

    let reopened: Arc<dyn ClientStore> = Arc::new(FileClientStore::new(temp.path()));
    let restored = MessageQueue::restore("chat-1", reopened).expect("restore");
    let items = restored.items();
    assert_eq!(
        items
            .iter()
            .map(|m| (m.prompt.as_str(), m.display_text.as_str()))
            .collect::<Vec<_>>(),
        vec![("first prompt", "first"), ("second prompt", "second")]
    );
    assert!(items.iter().all(|m| m.images.is_empty()));

    let raw = std::fs::read_to_string(temp.path().join("queues").join("chat-1.json")).expect("file");
    assert!(!raw.contains("image/png"));
}

#[test]
fn chat_ids_cannot_escape_the_state_dir() {
    let temp = TempDir::new().expect("tempdir");
    let store = FileClientStore::new(temp.path());
    store.save_draft("../../etc/passwd", "hello").expect("save");

    assert_eq!(
        store.load_draft("../../etc/passwd").expect("load").as_deref(),
        Some("hello")
    );
    let drafts: Vec<_> = std::fs::read_dir(temp.path().join("drafts"))
        .expect("drafts dir")
        .map(|entry| entry.expect("entry").file_name().into_string().expect("utf8"))
        .collect();
    assert_eq!(drafts.len(), 1);
    assert!(drafts[0].starts_with("______etc_passwd-"));
    assert!(drafts[0].ends_with(".txt"));
}

#[test]
fn ids_differing_only_in_unsafe_characters_keep_separate_queues() {
    let temp = TempDir::new().expect("tempdir");
    let store = FileClientStore::new(temp.path());
    store
        .save_queue("a/b", &[QueuedMessage::new("from slash")])
        .expect("save");
    store
        .save_queue("a_b", &[QueuedMessage::new("from underscore")])
        .expect("save");

    assert_eq!(store.load_queue("a/b").expect("load")[0].prompt, "from slash");
    assert_eq!(store.load_queue("a_b").expect("load")[0].prompt, "from underscore");
}

#[test]
fn preferences_persist_across_instances() {
    let temp = TempDir::new().expect("tempdir");
    FileClientStore::new(temp.path())
        .save_prefs(&Preferences {
            last_chat_id: Some("chat-9".into()),
            last_model: Some("opus".into()),
        })
        .expect("save");

    let prefs = FileClientStore::new(temp.path()).load_prefs().expect("load");
    assert_eq!(prefs.last_chat_id.as_deref(), Some("chat-9"));
    assert_eq!(prefs.last_model.as_deref(), Some("opus"));
}
