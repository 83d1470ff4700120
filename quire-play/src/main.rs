//! Quire play: several editors typing into one shared document.
//!
//! Starts a manager over memory or RocksDB storage, connects `--editors`
//! in-process editor connections, lets them type concurrently, then checks
//! that every editor converged on the manager's document and flushes
//! pending writes before exiting.

use clap::Parser;
use log::{debug, error, info};
use quire_collab::{
    CollabConfig, Comm, ConnectionHandle, ConnectionParams, EditorConnection, EditorView,
    LocalDisk, LocalTransport, Manager, MemoryStorage, RocksStorage, Status, Storage, StoreConfig,
};
use quire_core::{Document, EditState, TextDoc, TextStep};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "quire-play", about = "Concurrent editing demo for the Quire sync core")]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// RocksDB directory (overrides the config's store path)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Document to edit
    #[arg(long, default_value = "play")]
    doc: String,
    /// Number of editors
    #[arg(long, default_value_t = 3)]
    editors: usize,
    /// Insertions per editor
    #[arg(long, default_value_t = 20)]
    edits: usize,
}

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Logs what an editor would show.
struct LogView {
    name: String,
}

impl EditorView<TextDoc> for LogView {
    fn update_state(&mut self, state: &EditState<TextDoc>) {
        debug!(
            "[{}] v{} {} chars, {} unconfirmed",
            self.name,
            state.version(),
            state.doc().len(),
            state.unconfirmed().len()
        );
    }

    fn destroy(&mut self) {
        debug!("[{}] view closed", self.name);
    }
}

async fn type_into(
    handle: &ConnectionHandle<TextDoc>,
    editor: usize,
    edits: usize,
) -> Result<(), Box<dyn Error>> {
    let letter = (b'a' + (editor % 26) as u8) as char;
    for n in 0..edits {
        // Only insertions happen, so a stale length is still a valid position.
        let len = handle.status().doc.map_or(0, |d| d.len());
        let pos = (n * 7 + editor * 3) % (len + 1);
        handle.edit(vec![TextStep::insert(pos, letter.to_string())])?;
        tokio::time::sleep(Duration::from_millis(2 + (editor as u64 * 3) % 7)).await;
    }
    Ok(())
}

async fn settled(
    handle: &ConnectionHandle<TextDoc>,
    pred: impl FnMut(&Status<TextDoc>) -> bool,
) -> Result<Status<TextDoc>, Box<dyn Error>> {
    let status = tokio::time::timeout(CONVERGE_TIMEOUT, handle.wait_for(pred)).await??;
    Ok(status)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CollabConfig::load(path)?,
        None => CollabConfig::default(),
    };
    if let Some(db) = args.db {
        config.store = Some(StoreConfig {
            path: db,
            ..config.store.unwrap_or_default()
        });
    }

    let storage: Arc<dyn Storage> = match &config.store {
        Some(store) => Arc::new(RocksStorage::open(store.clone())?),
        None => {
            info!("No database configured, documents stay in memory");
            Arc::new(MemoryStorage::new())
        }
    };
    let disk = LocalDisk::new(storage, config.disk.clone(), TextDoc::default());
    let manager = Arc::new(Manager::new(config.manager.clone(), Arc::new(disk)));
    let transport = Arc::new(LocalTransport::new(manager.clone()));

    let handles: Vec<_> = (0..args.editors)
        .map(|i| {
            let name = format!("editor-{i}");
            EditorConnection::spawn(
                transport.clone(),
                ConnectionParams::new(args.doc.clone(), name.clone()),
                Box::new(LogView { name }),
                config.client.clone(),
            )
        })
        .collect();
    for handle in &handles {
        settled(handle, |s| s.comm != Comm::Start).await?;
    }
    info!("{} editors connected to {}", handles.len(), args.doc);

    let typing = handles
        .iter()
        .enumerate()
        .map(|(i, handle)| type_into(handle, i, args.edits));
    for result in futures_util::future::join_all(typing).await {
        result?;
    }

    for handle in &handles {
        settled(handle, |s| s.unconfirmed == 0 || s.comm == Comm::Detached).await?;
    }
    let server_version = manager
        .instance_info(&args.doc)
        .await
        .map_or(0, |info| info.version);

    let mut converged = true;
    let mut reference: Option<TextDoc> = None;
    for handle in &handles {
        let status = settled(handle, |s| {
            s.version == Some(server_version) || s.comm == Comm::Detached
        })
        .await?;
        let Some(doc) = status.doc else {
            converged = false;
            continue;
        };
        match reference.as_ref() {
            None => reference = Some(doc),
            Some(expected) if *expected != doc => converged = false,
            Some(_) => {}
        }
    }

    match (&reference, converged) {
        (Some(doc), true) => info!(
            "Converged at version {server_version}: {} chars, {:?}",
            doc.len(),
            doc.title().unwrap_or_default()
        ),
        _ => error!("Editors did not converge at version {server_version}"),
    }

    for handle in handles {
        handle.close().await;
    }
    for info in manager.documents().await {
        info!(
            "{}: version {}, {} retained steps, users {:?}",
            info.doc_name, info.version, info.retained_steps, info.users
        );
    }
    manager.flush_all().await?;

    if converged {
        Ok(())
    } else {
        Err("editors diverged".into())
    }
}
