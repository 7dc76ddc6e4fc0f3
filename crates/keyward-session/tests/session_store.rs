//! Integration tests for generation guarding across the store, the durable
//! mirror, and the validator.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use keyward_protocol::{Generation, SubjectId};
use keyward_provider::MemoryProvider;
use keyward_session::{
    FileMirror, SessionDraft, SessionMirror, SessionStore, TokenValidator,
};

// =========================================================================
// Helpers
// =========================================================================

fn draft(id: &str) -> SessionDraft {
    SessionDraft {
        subject_id: SubjectId::new(id),
        provider_uid: format!("uid-{id}"),
        display_name: id.to_uppercase(),
        email: format!("{id}@x.com"),
        avatar_ref: format!("https://avatars.test/{id}"),
        access_token: format!("token-{id}"),
        token_expiry: SystemTime::now() + Duration::from_secs(3600),
    }
}

// =========================================================================
// Generation
// =========================================================================

#[test]
fn test_generation_strictly_increases_across_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(Arc::new(FileMirror::new(
        dir.path().join("session.json"),
    )));

    let mut seen = Vec::new();
    for id in ["a", "b", "c"] {
        let session = store.begin(store.generation(), draft(id)).unwrap();
        seen.push(session.generation);
        store.end();
    }

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
    assert!(store.generation() > seen[2]);
}

#[test]
fn test_file_mirror_tracks_session_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let store = SessionStore::new(Arc::new(FileMirror::new(&path)));

    store.begin(Generation(0), draft("u1"));
    let persisted = FileMirror::new(&path).load().unwrap().unwrap();
    assert_eq!(persisted.subject_id.as_str(), "u1");
    assert_eq!(persisted.access_token, "token-u1");

    store.end();
    assert!(!path.exists());
    assert!(store.persisted().is_none());
}

#[tokio::test]
async fn test_validation_issued_before_logout_cannot_renew_new_session() {
    let provider = Arc::new(
        MemoryProvider::new(Duration::from_secs(3600)).with_account(
            "ada@example.com",
            "secret1",
            Some("Ada"),
        ),
    );
    provider.restore_signed_in("ada@example.com");
    let store = SessionStore::new(Arc::new(keyward_session::MemoryMirror::new()));
    let validator = TokenValidator::new(
        provider.clone(),
        store.reader(),
        Duration::from_secs(5),
    );

    let old = store.begin(Generation(0), draft("old")).unwrap();
    let verdict = validator.validate().await;
    assert_eq!(verdict.generation, old.generation);

    // Logout and a fresh login land while the verdict is "in flight".
    store.end();
    let new = store.begin(store.generation(), draft("new")).unwrap();

    let renewed = store.renew(
        verdict.generation,
        "late-token".into(),
        verdict.expires_at.unwrap(),
    );

    assert!(renewed.is_none());
    let live = store.current().unwrap();
    assert_eq!(live.generation, new.generation);
    assert_eq!(live.access_token, "token-new");
}

#[tokio::test]
async fn test_reader_changed_wakes_on_end() {
    let store = SessionStore::new(Arc::new(keyward_session::MemoryMirror::new()));
    store.begin(Generation(0), draft("u1"));
    let mut reader = store.reader();

    let waiter = tokio::spawn(async move {
        let woke = reader.changed().await;
        (woke, reader.current().is_none())
    });
    tokio::task::yield_now().await;
    store.end();

    assert_eq!(waiter.await.unwrap(), (true, true));
}
