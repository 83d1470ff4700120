//! End-to-end collaboration tests.
//!
//! A real manager, in-process transports and several editor connections
//! typing at the same time.

use quire_collab::{
    ClientConfig, Comm, ConnectionHandle, ConnectionParams, DiskConfig, EditorConnection,
    LocalDisk, LocalTransport, Manager, ManagerConfig, MemoryStorage, NullView, Status, Storage,
};
use quire_core::{ClientId, TextDoc, TextStep};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(10);

fn start_manager(config: ManagerConfig) -> (Arc<Manager<TextDoc>>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let disk = LocalDisk::new(
        storage.clone() as Arc<dyn Storage>,
        DiskConfig::for_testing(),
        TextDoc::new("shared"),
    );
    (Arc::new(Manager::new(config, Arc::new(disk))), storage)
}

fn join(manager: &Arc<Manager<TextDoc>>, doc: &str, client: &str) -> ConnectionHandle<TextDoc> {
    EditorConnection::spawn(
        Arc::new(LocalTransport::new(manager.clone())),
        ConnectionParams::new(doc, client).with_client_id(ClientId::new(client)),
        Box::new(NullView),
        ClientConfig::for_testing(),
    )
}

async fn wait(
    handle: &ConnectionHandle<TextDoc>,
    pred: impl FnMut(&Status<TextDoc>) -> bool,
) -> Status<TextDoc> {
    timeout(WAIT, handle.wait_for(pred))
        .await
        .expect("timed out waiting for connection status")
        .expect("connection closed")
}

async fn server_text(manager: &Manager<TextDoc>, doc: &str) -> (String, u64) {
    let snap = manager
        .get_document(quire_collab::protocol::GetDocument {
            doc_name: doc.into(),
            user_id: "inspector".into(),
        })
        .await
        .unwrap();
    let text: TextDoc = serde_json::from_value(snap.doc).unwrap();
    (text.text().to_string(), snap.version)
}

#[tokio::test]
async fn test_two_editors_converge() {
    let (manager, _) = start_manager(ManagerConfig::default());
    let alice = join(&manager, "doc1", "alice");
    let bob = join(&manager, "doc1", "bob");
    wait(&alice, |s| s.comm == Comm::Poll).await;
    wait(&bob, |s| s.comm == Comm::Poll).await;

    alice.edit(vec![TextStep::insert(0, "A")]).unwrap();
    bob.edit(vec![TextStep::insert(6, "B")]).unwrap();

    let a = wait(&alice, |s| s.version == Some(2) && s.unconfirmed == 0).await;
    let b = wait(&bob, |s| s.version == Some(2) && s.unconfirmed == 0).await;
    assert_eq!(a.doc, b.doc);
    assert_eq!(a.doc.as_ref().unwrap().text(), "AsharedB");
    assert_eq!(server_text(&manager, "doc1").await, ("AsharedB".to_string(), 2));

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_concurrent_typing_converges() {
    let (manager, _) = start_manager(ManagerConfig::default());
    let editors: Vec<_> = ["ann", "ben", "cat"]
        .iter()
        .map(|name| join(&manager, "doc1", name))
        .collect();
    for editor in &editors {
        wait(editor, |s| s.comm == Comm::Poll).await;
    }

    // Each editor appends its own letter at the start of its local copy.
    for round in 0..5 {
        for (i, editor) in editors.iter().enumerate() {
            let letter = (b'a' + i as u8) as char;
            editor
                .edit(vec![TextStep::insert(0, format!("{letter}{round}"))])
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let total = 15;
    let mut docs = Vec::new();
    for editor in &editors {
        let status = wait(editor, |s| s.version == Some(total) && s.unconfirmed == 0).await;
        docs.push(status.doc.unwrap());
    }
    assert!(docs.windows(2).all(|w| w[0] == w[1]));

    let (text, version) = server_text(&manager, "doc1").await;
    assert_eq!(version, total);
    assert_eq!(text, docs[0].text());
    assert_eq!(text.len(), "shared".len() + 2 * total as usize);

    for editor in editors {
        editor.close().await;
    }
}

#[tokio::test]
async fn test_documents_are_independent() {
    let (manager, _) = start_manager(ManagerConfig::default());
    let one = join(&manager, "one", "ann");
    let two = join(&manager, "two", "ben");
    wait(&one, |s| s.comm == Comm::Poll).await;
    wait(&two, |s| s.comm == Comm::Poll).await;

    one.edit(vec![TextStep::insert(0, "1")]).unwrap();
    wait(&one, |s| s.version == Some(1) && s.unconfirmed == 0).await;

    assert_eq!(server_text(&manager, "one").await, ("1shared".to_string(), 1));
    assert_eq!(server_text(&manager, "two").await, ("shared".to_string(), 0));
    assert_eq!(two.status().version, Some(0));

    let names: Vec<_> = manager.documents().await.into_iter().map(|i| i.doc_name).collect();
    assert_eq!(names, vec!["one".to_string(), "two".to_string()]);

    one.close().await;
    two.close().await;
}

#[tokio::test]
async fn test_late_joiner_loads_current_state() {
    let (manager, _) = start_manager(ManagerConfig {
        history_limit: Some(2),
        poll_timeout_ms: None,
    });
    let writer = join(&manager, "doc1", "writer");
    wait(&writer, |s| s.comm == Comm::Poll).await;

    for i in 0..5 {
        writer.edit(vec![TextStep::insert(0, i.to_string())]).unwrap();
        wait(&writer, |s| s.version == Some(i + 1) && s.unconfirmed == 0).await;
    }
    assert_eq!(manager.instance_info("doc1").await.unwrap().retained_steps, 2);

    let reader = join(&manager, "doc1", "reader");
    let status = wait(&reader, |s| s.comm == Comm::Poll).await;
    assert_eq!(status.version, Some(5));
    assert_eq!(status.doc.unwrap().text(), "43210shared");

    writer.edit(vec![TextStep::insert(11, "!")]).unwrap();
    let status = wait(&reader, |s| s.version == Some(6)).await;
    assert_eq!(status.doc.unwrap().text(), "43210shared!");

    writer.close().await;
    reader.close().await;
}

#[tokio::test]
async fn test_persisted_after_flush() {
    let (manager, storage) = start_manager(ManagerConfig::default());
    let editor = join(&manager, "doc1", "ann");
    wait(&editor, |s| s.comm == Comm::Poll).await;
    editor.edit(vec![TextStep::insert(6, " notes")]).unwrap();
    wait(&editor, |s| s.version == Some(1) && s.unconfirmed == 0).await;
    editor.close().await;

    manager.flush_all().await.unwrap();
    let record = storage.get("doc1").unwrap().unwrap();
    assert_eq!(record.title, "shared notes");
    let doc: TextDoc = serde_json::from_str(&record.doc).unwrap();
    assert_eq!(doc.text(), "shared notes");
}
