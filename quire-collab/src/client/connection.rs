//! Async driver for the connection state machine.
//!
//! ```text
//!  ConnectionHandle ── Edit / Close ──┐
//!                                     ▼
//!                         ┌─────────────────────┐  effects   ┌────────────┐
//!                         │  driver task        │ ─────────► │ Transport  │
//!                         │  Machine::apply     │            └─────┬──────┘
//!                         └──────────▲──────────┘                  │
//!                                    │ Completed{ticket} / Timer   │
//!                                    └─────────────────────────────┘
//!  status: watch<Status> ◄── published after every step
//! ```

use log::{debug, error, info, trace, warn};
use quire_core::{ClientId, Document, EditState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::request::{RequestSlot, Settled, Ticket};
use super::state::{
    on_fetched, on_polled, on_pushed, Action, ClientConfig, Comm, ConnectionError, Effect,
    Machine, Transaction, Wake,
};
use crate::protocol::{CollabError, DocumentSnapshot, GetDocument, GetEvents, PushEvents};
use crate::transport::Transport;

/// The view bound to a connection.
pub trait EditorView<D: Document>: Send {
    /// Show a new edit state.
    fn update_state(&mut self, state: &EditState<D>);
    /// Tear the view down. A later `update_state` brings it back.
    fn destroy(&mut self);
}

/// View that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl<D: Document> EditorView<D> for NullView {
    fn update_state(&mut self, _state: &EditState<D>) {}
    fn destroy(&mut self) {}
}

/// Who connects to which document.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub doc_name: String,
    pub user_id: String,
    pub client_id: ClientId,
}

impl ConnectionParams {
    /// Parameters with a freshly generated client id.
    pub fn new(doc_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            doc_name: doc_name.into(),
            user_id: user_id.into(),
            client_id: ClientId::random(),
        }
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }
}

/// Observable connection state.
#[derive(Debug, Clone, PartialEq)]
pub struct Status<D> {
    pub comm: Comm,
    pub version: Option<u64>,
    pub unconfirmed: usize,
    pub doc: Option<D>,
}

impl<D: Document> Status<D> {
    fn of(machine: &Machine<D>) -> Self {
        let edit = machine.state().edit();
        Self {
            comm: machine.comm(),
            version: edit.map(|e| e.version()),
            unconfirmed: edit.map_or(0, |e| e.unconfirmed().len()),
            doc: edit.map(|e| e.doc().clone()),
        }
    }
}

enum Command<S> {
    Edit(Vec<S>),
    Close,
}

enum Event<D: Document> {
    Completed { ticket: Ticket, action: Action<D> },
    Timer(Wake),
}

/// Handle to a running connection.
pub struct ConnectionHandle<D: Document> {
    client_id: ClientId,
    commands: mpsc::UnboundedSender<Command<D::Step>>,
    status: watch::Receiver<Status<D>>,
    task: JoinHandle<()>,
}

impl<D: Document> ConnectionHandle<D> {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Dispatch local edits to the connection.
    pub fn edit(&self, steps: Vec<D::Step>) -> Result<(), ConnectionError> {
        self.commands
            .send(Command::Edit(steps))
            .map_err(|_| ConnectionError::Closed)
    }

    pub fn status(&self) -> Status<D> {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status<D>> {
        self.status.clone()
    }

    /// Wait until the status satisfies `pred`.
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&Status<D>) -> bool,
    ) -> Result<Status<D>, ConnectionError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| pred(s))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        Ok(status.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the connection and return its final status.
    pub async fn close(self) -> Status<D> {
        let _ = self.commands.send(Command::Close);
        if let Err(e) = self.task.await {
            error!("Connection task for {} failed: {e}", self.client_id);
        }
        let status = self.status.borrow().clone();
        status
    }
}

/// Client side of one document: owns the machine, runs its effects.
pub struct EditorConnection<D: Document, T> {
    machine: Machine<D>,
    transport: Arc<T>,
    view: Box<dyn EditorView<D>>,
    doc_name: String,
    user_id: String,
    requests: RequestSlot,
    timer: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<Event<D>>,
    status_tx: watch::Sender<Status<D>>,
}

fn decode_snapshot<D: Document>(snapshot: DocumentSnapshot) -> Result<(D, u64), CollabError> {
    let doc = serde_json::from_value(snapshot.doc)
        .map_err(|e| CollabError::Unprocessable(format!("Undecodable document: {e}")))?;
    Ok((doc, snapshot.version))
}

impl<D, T> EditorConnection<D, T>
where
    D: Document,
    T: Transport<D::Step> + 'static,
{
    /// Start a connection task. It fetches the document right away.
    pub fn spawn(
        transport: Arc<T>,
        params: ConnectionParams,
        view: Box<dyn EditorView<D>>,
        config: ClientConfig,
    ) -> ConnectionHandle<D> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let machine = Machine::new(params.client_id.clone(), config);
        let (status_tx, status_rx) = watch::channel(Status::of(&machine));

        let connection = Self {
            machine,
            transport,
            view,
            doc_name: params.doc_name,
            user_id: params.user_id,
            requests: RequestSlot::new(),
            timer: None,
            events_tx,
            status_tx,
        };
        let task = tokio::spawn(connection.run(commands_rx, events_rx));
        ConnectionHandle {
            client_id: params.client_id,
            commands: commands_tx,
            status: status_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<D::Step>>,
        mut events: mpsc::UnboundedReceiver<Event<D>>,
    ) {
        info!("{} connecting to {}", self.machine.client_id(), self.doc_name);
        let effects = self.machine.start();
        self.execute(effects);
        self.publish();

        while self.machine.comm() != Comm::Terminal {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Edit(steps)) => self.dispatch(Action::Transaction {
                        tr: Transaction::Local(steps),
                        request_done: false,
                    }),
                    Some(Command::Close) | None => self.dispatch(Action::Close),
                },
                Some(event) = events.recv() => match event {
                    Event::Completed { ticket, action } => match self.requests.settle(ticket, action) {
                        Settled::Done(action) => self.dispatch(action),
                        Settled::Canceled => trace!("Dropped response to a canceled request"),
                    },
                    Event::Timer(wake) => self.dispatch(Action::Timer(wake)),
                },
            }
            self.publish();
        }

        self.requests.cancel();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        info!("{} left {}", self.machine.client_id(), self.doc_name);
    }

    fn dispatch(&mut self, action: Action<D>) {
        let effects = self.machine.apply(action);
        self.execute(effects);
    }

    fn publish(&self) {
        self.status_tx.send_replace(Status::of(&self.machine));
    }

    fn execute(&mut self, effects: Vec<Effect<D::Step>>) {
        for effect in effects {
            match effect {
                Effect::Fetch => {
                    let transport = Arc::clone(&self.transport);
                    let req = GetDocument {
                        doc_name: self.doc_name.clone(),
                        user_id: self.user_id.clone(),
                    };
                    self.request(async move {
                        on_fetched(transport.get_document(req).await.and_then(decode_snapshot::<D>))
                    });
                }
                Effect::Poll { version } => {
                    let transport = Arc::clone(&self.transport);
                    let req = GetEvents {
                        doc_name: self.doc_name.clone(),
                        version,
                        user_id: self.user_id.clone(),
                    };
                    self.request(async move { on_polled::<D>(transport.get_events(req).await) });
                }
                Effect::Push(sendable) => {
                    let transport = Arc::clone(&self.transport);
                    let req = PushEvents {
                        client_id: sendable.client_id.clone(),
                        version: sendable.version,
                        steps: sendable.steps.clone(),
                        doc_name: self.doc_name.clone(),
                        user_id: self.user_id.clone(),
                    };
                    debug!("Pushing {} steps on version {}", req.steps.len(), req.version);
                    self.request(async move {
                        let result = transport.push_events(req).await;
                        on_pushed::<D>(sendable, result)
                    });
                }
                Effect::Schedule { delay, wake } => self.schedule(delay, wake),
                Effect::CancelRequest => self.requests.cancel(),
                Effect::UpdateView => {
                    if let Some(edit) = self.machine.state().edit() {
                        self.view.update_state(edit);
                    }
                }
                Effect::DestroyView => self.view.destroy(),
                Effect::Report(e) => error!("{}: {e}", self.doc_name),
            }
        }
    }

    fn request<F>(&mut self, future: F)
    where
        F: Future<Output = Action<D>> + Send + 'static,
    {
        let ticket = self.requests.issue();
        let events_tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let action = future.await;
            let _ = events_tx.send(Event::Completed { ticket, action });
        });
        self.requests.attach(ticket, task);
    }

    fn schedule(&mut self, delay: Duration, wake: Wake) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if delay >= Duration::from_secs(1) {
            warn!("{}: connection trouble, retrying in {delay:?}", self.doc_name);
        } else {
            debug!("{}: retrying in {delay:?}", self.doc_name);
        }
        let events_tx = self.events_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx.send(Event::Timer(wake));
        }));
    }
}
