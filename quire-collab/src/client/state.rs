//! Connection state machine.
//!
//! ```text
//!            Loaded                 poll ok (steps)            sendable
//!  Start ───────────► Poll ◄──────────────────────────────┐ ┌──────────► Send
//!    ▲                 │  ▲                                │ │             │
//!    │ Restart         │  │ Poll (empty poll, 409, timer)  │ │   push ok   │
//!    │ (400 / 410)     │  └────────────────────────────────┴─┴─────────────┘
//!    │                 ▼
//!    └───────────── Recover ── error < 500 ──► Terminal ◄── Close
//!                      (backoff)
//!  Poll/Send ── doc too large ──► Detached (local edits only, until Close)
//! ```
//!
//! [`Machine::transition`] is pure: it returns the next machine and the
//! effects the driver must run. Request completions come back in as
//! actions built by [`on_fetched`], [`on_polled`] and [`on_pushed`].

use quire_core::{ClientId, Document, EditState, Sendable, StepError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{CollabError, Events};

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// First retry delay after a transient failure (default: 200ms)
    pub backoff_base_ms: u64,
    /// Retry delay ceiling (default: 60000ms)
    pub backoff_max_ms: u64,
    /// Content size above which the connection detaches (default: 40000)
    pub max_doc_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 200,
            backoff_max_ms: 60_000,
            max_doc_size: 40_000,
        }
    }
}

impl ClientConfig {
    /// Fast retries and a small size limit for tests.
    pub fn for_testing() -> Self {
        Self {
            backoff_base_ms: 10,
            backoff_max_ms: 100,
            max_doc_size: 1_000,
        }
    }
}

/// Communication state, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comm {
    Start,
    Poll,
    Send,
    Recover,
    Detached,
    Terminal,
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Comm::Start => "start",
            Comm::Poll => "poll",
            Comm::Send => "send",
            Comm::Recover => "recover",
            Comm::Detached => "detached",
            Comm::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Connection state. Only the states that can edit carry an edit state.
#[derive(Debug, Clone)]
pub enum ConnState<D: Document> {
    Start,
    Poll(EditState<D>),
    Send(EditState<D>),
    Recover(EditState<D>),
    Detached(EditState<D>),
    Terminal,
}

impl<D: Document> ConnState<D> {
    pub fn comm(&self) -> Comm {
        match self {
            ConnState::Start => Comm::Start,
            ConnState::Poll(_) => Comm::Poll,
            ConnState::Send(_) => Comm::Send,
            ConnState::Recover(_) => Comm::Recover,
            ConnState::Detached(_) => Comm::Detached,
            ConnState::Terminal => Comm::Terminal,
        }
    }

    pub fn edit(&self) -> Option<&EditState<D>> {
        match self {
            ConnState::Poll(e) | ConnState::Send(e) | ConnState::Recover(e) | ConnState::Detached(e) => Some(e),
            ConnState::Start | ConnState::Terminal => None,
        }
    }

    fn into_edit(self) -> Option<EditState<D>> {
        match self {
            ConnState::Poll(e) | ConnState::Send(e) | ConnState::Recover(e) | ConnState::Detached(e) => Some(e),
            ConnState::Start | ConnState::Terminal => None,
        }
    }

    fn with_comm(comm: Comm, edit: EditState<D>) -> Self {
        match comm {
            Comm::Send => ConnState::Send(edit),
            Comm::Recover => ConnState::Recover(edit),
            Comm::Detached => ConnState::Detached(edit),
            Comm::Start | Comm::Poll | Comm::Terminal => ConnState::Poll(edit),
        }
    }
}

/// A change to the edit state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction<S> {
    /// Edits made in the local view.
    Local(Vec<S>),
    /// A batch confirmed by the authority.
    Receive {
        steps: Vec<S>,
        client_ids: Vec<ClientId>,
    },
}

/// What a scheduled timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Poll,
    Restart,
}

/// Machine input.
#[derive(Debug, Clone)]
pub enum Action<D: Document> {
    Loaded { doc: D, version: u64 },
    Transaction {
        tr: Transaction<D::Step>,
        request_done: bool,
    },
    Poll,
    Restart,
    Recover(CollabError),
    /// A scheduled retry fired.
    Timer(Wake),
    Close,
}

/// Work the driver performs on behalf of the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect<S> {
    Fetch,
    Poll { version: u64 },
    Push(Sendable<S>),
    Schedule { delay: Duration, wake: Wake },
    CancelRequest,
    UpdateView,
    DestroyView,
    Report(ConnectionError),
}

/// Failures surfaced to the user of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Document too large ({size} > {max}), detached from collaboration")]
    DocumentTooLarge { size: usize, max: usize },
    #[error("Request failed: {0}")]
    Request(#[from] CollabError),
    #[error("Received steps do not apply: {0}")]
    Receive(StepError),
    #[error("Local edit rejected: {0}")]
    LocalEdit(StepError),
    #[error("Connection closed")]
    Closed,
}

/// Exponential retry delay. Zero means no failure since the last success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    delay_ms: u64,
}

impl Backoff {
    pub fn next(&mut self, config: &ClientConfig) -> Duration {
        self.delay_ms = if self.delay_ms == 0 {
            config.backoff_base_ms
        } else {
            (self.delay_ms * 2).min(config.backoff_max_ms)
        };
        Duration::from_millis(self.delay_ms)
    }

    pub fn reset(&mut self) {
        self.delay_ms = 0;
    }

    pub fn current_ms(&self) -> u64 {
        self.delay_ms
    }
}

/// The connection state machine.
#[derive(Debug, Clone)]
pub struct Machine<D: Document> {
    state: ConnState<D>,
    client_id: ClientId,
    config: ClientConfig,
    backoff: Backoff,
}

impl<D: Document> Machine<D> {
    pub fn new(client_id: ClientId, config: ClientConfig) -> Self {
        Self {
            state: ConnState::Start,
            client_id,
            config,
            backoff: Backoff::default(),
        }
    }

    pub fn state(&self) -> &ConnState<D> {
        &self.state
    }

    pub fn comm(&self) -> Comm {
        self.state.comm()
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Effects to run when the connection starts.
    pub fn start(&self) -> Vec<Effect<D::Step>> {
        vec![Effect::Fetch]
    }

    pub fn transition(mut self, action: Action<D>) -> (Self, Vec<Effect<D::Step>>) {
        let effects = self.apply(action);
        (self, effects)
    }

    /// In-place form of [`Machine::transition`].
    pub fn apply(&mut self, action: Action<D>) -> Vec<Effect<D::Step>> {
        let had_view = self.state.edit().is_some();
        let prev = std::mem::replace(&mut self.state, ConnState::Terminal);
        let prev_comm = prev.comm();
        let mut effects = Vec::new();

        self.state = match action {
            // Detached only takes local edits and Close.
            Action::Loaded { .. }
            | Action::Restart
            | Action::Poll
            | Action::Timer(_)
            | Action::Recover(_)
            | Action::Transaction {
                tr: Transaction::Receive { .. },
                ..
            } if prev_comm == Comm::Detached => prev,
            Action::Loaded { doc, version } => {
                self.backoff.reset();
                effects.push(Effect::Poll { version });
                ConnState::Poll(EditState::new(doc, version, self.client_id.clone()))
            }
            Action::Restart => {
                effects.push(Effect::Fetch);
                ConnState::Start
            }
            Action::Poll => {
                self.backoff.reset();
                self.poll(prev, &mut effects)
            }
            Action::Timer(Wake::Poll) if prev_comm == Comm::Recover => self.poll(prev, &mut effects),
            Action::Timer(Wake::Restart) if prev_comm == Comm::Start => {
                effects.push(Effect::Fetch);
                ConnState::Start
            }
            Action::Timer(_) => prev,
            Action::Recover(err) => self.recover(prev, err, &mut effects),
            Action::Transaction { tr, request_done } => {
                self.transaction(prev, tr, request_done, &mut effects)
            }
            Action::Close => {
                effects.push(Effect::CancelRequest);
                ConnState::Terminal
            }
        };

        match self.state.edit() {
            Some(_) => effects.push(Effect::UpdateView),
            None if had_view => effects.push(Effect::DestroyView),
            None => {}
        }
        effects
    }

    fn poll(&mut self, prev: ConnState<D>, effects: &mut Vec<Effect<D::Step>>) -> ConnState<D> {
        match prev.into_edit() {
            Some(edit) => {
                effects.push(Effect::Poll {
                    version: edit.version(),
                });
                ConnState::Poll(edit)
            }
            None => ConnState::Start,
        }
    }

    fn recover(
        &mut self,
        prev: ConnState<D>,
        err: CollabError,
        effects: &mut Vec<Effect<D::Step>>,
    ) -> ConnState<D> {
        if matches!(prev, ConnState::Terminal) {
            return prev;
        }
        if !err.is_retryable() {
            effects.push(Effect::Report(ConnectionError::Request(err)));
            effects.push(Effect::CancelRequest);
            return ConnState::Terminal;
        }

        let delay = self.backoff.next(&self.config);
        match prev.into_edit() {
            Some(edit) => {
                effects.push(Effect::Schedule {
                    delay,
                    wake: Wake::Poll,
                });
                ConnState::Recover(edit)
            }
            None => {
                effects.push(Effect::Schedule {
                    delay,
                    wake: Wake::Restart,
                });
                ConnState::Start
            }
        }
    }

    fn transaction(
        &mut self,
        prev: ConnState<D>,
        tr: Transaction<D::Step>,
        request_done: bool,
        effects: &mut Vec<Effect<D::Step>>,
    ) -> ConnState<D> {
        let comm = prev.comm();
        let Some(edit) = prev.edit() else {
            return prev;
        };

        let next = match tr {
            Transaction::Local(steps) => match edit.apply_local(&steps) {
                Ok(next) => next,
                Err(e) => {
                    effects.push(Effect::Report(ConnectionError::LocalEdit(e)));
                    return prev;
                }
            },
            Transaction::Receive { steps, client_ids } => match edit.receive(&steps, &client_ids) {
                Ok(next) => next,
                Err(e) => {
                    effects.push(Effect::Report(ConnectionError::Receive(e)));
                    effects.push(Effect::Fetch);
                    return ConnState::Start;
                }
            },
        };
        if request_done {
            self.backoff.reset();
        }

        let size = next.doc().content_size();
        if size > self.config.max_doc_size {
            if comm != Comm::Detached {
                effects.push(Effect::Report(ConnectionError::DocumentTooLarge {
                    size,
                    max: self.config.max_doc_size,
                }));
                effects.push(Effect::CancelRequest);
            }
            return ConnState::Detached(next);
        }
        if comm == Comm::Detached {
            return ConnState::Detached(next);
        }

        if comm == Comm::Poll || request_done {
            if let Some(sendable) = next.sendable() {
                effects.push(Effect::CancelRequest);
                effects.push(Effect::Push(sendable));
                return ConnState::Send(next);
            }
        }
        if request_done {
            effects.push(Effect::Poll {
                version: next.version(),
            });
            return ConnState::Poll(next);
        }
        ConnState::with_comm(comm, next)
    }
}

/// Action for a finished `get_document`.
pub fn on_fetched<D: Document>(result: Result<(D, u64), CollabError>) -> Action<D> {
    match result {
        Ok((doc, version)) => Action::Loaded { doc, version },
        Err(err) => Action::Recover(err),
    }
}

/// Action for a finished `get_events`.
pub fn on_polled<D: Document>(result: Result<Events<D::Step>, CollabError>) -> Action<D> {
    match result {
        Ok(events) if events.is_empty() => Action::Poll,
        Ok(events) => Action::Transaction {
            tr: Transaction::Receive {
                steps: events.steps,
                client_ids: events.client_ids,
            },
            request_done: true,
        },
        Err(err) if err.requires_restart() => Action::Restart,
        Err(err) => Action::Recover(err),
    }
}

/// Action for a finished `push_events` of `sent`.
pub fn on_pushed<D: Document>(sent: Sendable<D::Step>, result: Result<(), CollabError>) -> Action<D> {
    match result {
        Ok(()) => {
            let client_ids = vec![sent.client_id; sent.steps.len()];
            Action::Transaction {
                tr: Transaction::Receive {
                    steps: sent.steps,
                    client_ids,
                },
                request_done: true,
            }
        }
        Err(CollabError::Conflict(_)) => Action::Poll,
        Err(err) if err.requires_restart() => Action::Restart,
        Err(err) => Action::Recover(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{TextDoc, TextStep};

    type M = Machine<TextDoc>;

    fn loaded(text: &str, version: u64) -> M {
        let m = M::new(ClientId::new("me"), ClientConfig::default());
        let (m, effects) = m.transition(Action::Loaded {
            doc: TextDoc::new(text),
            version,
        });
        assert_eq!(effects, vec![Effect::Poll { version }, Effect::UpdateView]);
        m
    }

    fn local(steps: Vec<TextStep>) -> Action<TextDoc> {
        Action::Transaction {
            tr: Transaction::Local(steps),
            request_done: false,
        }
    }

    fn text(m: &M) -> &str {
        m.state().edit().unwrap().doc().text()
    }

    fn pushes(effects: &[Effect<TextStep>]) -> Vec<&Sendable<TextStep>> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Push(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_fetches() {
        let m = M::new(ClientId::new("me"), ClientConfig::default());
        assert_eq!(m.comm(), Comm::Start);
        assert_eq!(m.start(), vec![Effect::Fetch]);
    }

    #[test]
    fn test_poll_with_peer_steps_applies_them() {
        let m = loaded("hello world", 0);
        let action = on_polled::<TextDoc>(Ok(Events {
            steps: vec![TextStep::replace(5, 7, "-W")],
            client_ids: vec![ClientId::new("peer")],
        }));
        let (m, effects) = m.transition(action);

        assert_eq!(text(&m), "hello-World");
        assert_eq!(m.state().edit().unwrap().version(), 1);
        assert_eq!(m.comm(), Comm::Poll);
        assert_eq!(effects, vec![Effect::Poll { version: 1 }, Effect::UpdateView]);
    }

    #[test]
    fn test_empty_poll_repolls_without_mutation() {
        let m = loaded("hello", 3);
        let action = on_polled::<TextDoc>(Ok(Events::empty()));
        assert!(matches!(action, Action::Poll));

        let (m, effects) = m.transition(action);
        assert_eq!(text(&m), "hello");
        assert_eq!(m.state().edit().unwrap().version(), 3);
        let polls = effects
            .iter()
            .filter(|e| matches!(e, Effect::Poll { .. }))
            .count();
        assert_eq!(polls, 1);
        assert_eq!(effects[0], Effect::Poll { version: 3 });
    }

    #[test]
    fn test_local_edit_while_polling_sends() {
        let m = loaded("abc", 0);
        let (m, effects) = m.transition(local(vec![TextStep::insert(3, "d")]));

        assert_eq!(m.comm(), Comm::Send);
        assert_eq!(effects[0], Effect::CancelRequest);
        let sent = pushes(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].version, 0);
        assert_eq!(sent[0].steps, vec![TextStep::insert(3, "d")]);
        assert_eq!(sent[0].client_id, ClientId::new("me"));
    }

    #[test]
    fn test_local_edit_while_sending_waits() {
        let m = loaded("abc", 0);
        let (m, _) = m.transition(local(vec![TextStep::insert(3, "d")]));
        let (m, effects) = m.transition(local(vec![TextStep::insert(4, "e")]));

        assert_eq!(m.comm(), Comm::Send);
        assert!(pushes(&effects).is_empty());
        assert_eq!(text(&m), "abcde");
        assert_eq!(m.state().edit().unwrap().unconfirmed().len(), 2);
    }

    #[test]
    fn test_push_confirmation_then_remaining_steps_sent() {
        let m = loaded("abc", 0);
        let (m, effects) = m.transition(local(vec![TextStep::insert(3, "d")]));
        let sent = pushes(&effects)[0].clone();
        let (m, _) = m.transition(local(vec![TextStep::insert(4, "e")]));

        let (m, effects) = m.transition(on_pushed::<TextDoc>(sent, Ok(())));
        assert_eq!(m.comm(), Comm::Send);
        let next = pushes(&effects);
        assert_eq!(next[0].version, 1);
        assert_eq!(next[0].steps, vec![TextStep::insert(4, "e")]);
    }

    #[test]
    fn test_push_confirmation_returns_to_poll() {
        let m = loaded("abc", 0);
        let (m, effects) = m.transition(local(vec![TextStep::insert(0, "x")]));
        let sent = pushes(&effects)[0].clone();

        let (m, effects) = m.transition(on_pushed::<TextDoc>(sent, Ok(())));
        assert_eq!(m.comm(), Comm::Poll);
        assert_eq!(effects, vec![Effect::Poll { version: 1 }, Effect::UpdateView]);
        let edit = m.state().edit().unwrap();
        assert!(edit.unconfirmed().is_empty());
        assert_eq!(edit.confirmed_doc().text(), "xabc");
    }

    #[test]
    fn test_push_conflict_polls_again() {
        let m = loaded("abc", 0);
        let (m, effects) = m.transition(local(vec![TextStep::insert(0, "x")]));
        let sent = pushes(&effects)[0].clone();

        let action = on_pushed::<TextDoc>(sent, Err(CollabError::conflict(0, 1)));
        let (m, effects) = m.transition(action);
        assert_eq!(m.comm(), Comm::Poll);
        assert_eq!(effects[0], Effect::Poll { version: 0 });
        assert_eq!(text(&m), "xabc");
    }

    #[test]
    fn test_invalid_version_restarts() {
        let m = loaded("abc", 5);
        let action = on_polled::<TextDoc>(Err(CollabError::InvalidVersion("Invalid version 43".into())));
        assert!(matches!(action, Action::Restart));

        let (m, effects) = m.transition(action);
        assert_eq!(m.comm(), Comm::Start);
        assert_eq!(effects, vec![Effect::Fetch, Effect::DestroyView]);

        let (m, effects) = m.transition(on_fetched(Ok((TextDoc::new("server"), 9))));
        assert_eq!(m.comm(), Comm::Poll);
        assert_eq!(effects[0], Effect::Poll { version: 9 });
    }

    #[test]
    fn test_too_far_behind_restarts() {
        let action = on_polled::<TextDoc>(Err(CollabError::too_far_behind(1, 7)));
        assert!(matches!(action, Action::Restart));
        let action = on_pushed::<TextDoc>(
            Sendable {
                version: 1,
                steps: vec![],
                client_id: ClientId::new("me"),
            },
            Err(CollabError::invalid_version(1)),
        );
        assert!(matches!(action, Action::Restart));
    }

    #[test]
    fn test_server_error_backs_off_exponentially() {
        let mut m = loaded("abc", 0);
        let mut delays = Vec::new();
        for _ in 0..12 {
            let effects = m.apply(Action::Recover(CollabError::server("down")));
            assert_eq!(m.comm(), Comm::Recover);
            match &effects[0] {
                Effect::Schedule { delay, wake: Wake::Poll } => delays.push(delay.as_millis() as u64),
                other => panic!("unexpected effect {other:?}"),
            }
            m.apply(Action::Timer(Wake::Poll));
            assert_eq!(m.comm(), Comm::Poll);
        }
        assert_eq!(
            delays,
            vec![200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 60000, 60000, 60000]
        );

        // Any success resets the delay.
        m.apply(Action::Poll);
        assert_eq!(m.backoff().current_ms(), 0);
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut m = loaded("abc", 0);
        let effects = m.apply(Action::Timer(Wake::Poll));
        assert_eq!(m.comm(), Comm::Poll);
        assert_eq!(effects, vec![Effect::UpdateView]);
    }

    #[test]
    fn test_client_error_is_terminal() {
        let m = loaded("abc", 0);
        let err = CollabError::Client {
            code: 403,
            body: "forbidden".into(),
        };
        let (m, effects) = m.transition(Action::Recover(err.clone()));
        assert_eq!(m.comm(), Comm::Terminal);
        assert!(m.state().edit().is_none());
        assert_eq!(
            effects,
            vec![
                Effect::Report(ConnectionError::Request(err)),
                Effect::CancelRequest,
                Effect::DestroyView
            ]
        );
    }

    #[test]
    fn test_start_failure_retries_or_stops() {
        let m = M::new(ClientId::new("me"), ClientConfig::default());
        let (m, effects) = m.transition(on_fetched(Err(CollabError::server("down"))));
        assert_eq!(m.comm(), Comm::Start);
        assert_eq!(
            effects,
            vec![Effect::Schedule {
                delay: Duration::from_millis(200),
                wake: Wake::Restart
            }]
        );
        let (m, effects) = m.transition(Action::Timer(Wake::Restart));
        assert_eq!(effects, vec![Effect::Fetch]);

        let (m, _) = m.transition(on_fetched(Err(CollabError::Client {
            code: 404,
            body: "no such document".into(),
        })));
        assert_eq!(m.comm(), Comm::Terminal);
    }

    #[test]
    fn test_oversized_document_detaches_once() {
        let config = ClientConfig {
            max_doc_size: 10,
            ..ClientConfig::default()
        };
        let m = M::new(ClientId::new("me"), config);
        let (m, _) = m.transition(Action::Loaded {
            doc: TextDoc::new("12345"),
            version: 0,
        });

        let (m, effects) = m.transition(local(vec![TextStep::insert(5, "678901")]));
        assert_eq!(m.comm(), Comm::Detached);
        assert!(pushes(&effects).is_empty());
        assert_eq!(
            effects,
            vec![
                Effect::Report(ConnectionError::DocumentTooLarge { size: 11, max: 10 }),
                Effect::CancelRequest,
                Effect::UpdateView
            ]
        );

        let (m, effects) = m.transition(local(vec![TextStep::insert(0, "x")]));
        assert_eq!(m.comm(), Comm::Detached);
        assert_eq!(text(&m), "x12345678901");
        assert_eq!(effects, vec![Effect::UpdateView]);
    }

    #[test]
    fn test_detached_ignores_network_results() {
        let config = ClientConfig {
            max_doc_size: 10,
            ..ClientConfig::default()
        };
        let m = M::new(ClientId::new("me"), config);
        let (m, _) = m.transition(Action::Loaded {
            doc: TextDoc::new("12345"),
            version: 0,
        });
        let (mut m, _) = m.transition(local(vec![TextStep::insert(5, "678901")]));
        assert_eq!(m.comm(), Comm::Detached);

        let late = [
            Action::Poll,
            Action::Restart,
            Action::Timer(Wake::Poll),
            Action::Timer(Wake::Restart),
            Action::Recover(CollabError::server("down")),
            Action::Loaded {
                doc: TextDoc::new("server"),
                version: 4,
            },
            on_polled::<TextDoc>(Ok(Events {
                steps: vec![TextStep::insert(0, "p")],
                client_ids: vec![ClientId::new("peer")],
            })),
        ];
        for action in late {
            let effects = m.apply(action);
            assert_eq!(m.comm(), Comm::Detached);
            assert_eq!(effects, vec![Effect::UpdateView]);
        }
        assert_eq!(text(&m), "12345678901");

        // Shrinking back under the limit does not resume sending.
        let effects = m.apply(local(vec![TextStep::delete(0, 8)]));
        assert_eq!(m.comm(), Comm::Detached);
        assert!(pushes(&effects).is_empty());
        assert_eq!(text(&m), "901");
        assert_eq!(m.state().edit().unwrap().version(), 0);

        let (m, effects) = m.transition(Action::Close);
        assert_eq!(m.comm(), Comm::Terminal);
        assert_eq!(effects, vec![Effect::CancelRequest, Effect::DestroyView]);
    }

    #[test]
    fn test_bad_local_edit_reported_and_ignored() {
        let m = loaded("abc", 0);
        let (m, effects) = m.transition(local(vec![TextStep::delete(2, 9)]));
        assert_eq!(m.comm(), Comm::Poll);
        assert_eq!(text(&m), "abc");
        assert!(matches!(effects[0], Effect::Report(ConnectionError::LocalEdit(_))));
    }

    #[test]
    fn test_unappliable_receive_restarts() {
        let m = loaded("abc", 0);
        let action = on_polled::<TextDoc>(Ok(Events {
            steps: vec![TextStep::delete(10, 20)],
            client_ids: vec![ClientId::new("peer")],
        }));
        let (m, effects) = m.transition(action);
        assert_eq!(m.comm(), Comm::Start);
        assert!(effects.contains(&Effect::Fetch));
    }

    #[test]
    fn test_edits_without_state_are_ignored() {
        let m = M::new(ClientId::new("me"), ClientConfig::default());
        let (m, effects) = m.transition(local(vec![TextStep::insert(0, "x")]));
        assert_eq!(m.comm(), Comm::Start);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_close_is_terminal() {
        let m = loaded("abc", 0);
        let (m, effects) = m.transition(Action::Close);
        assert_eq!(m.comm(), Comm::Terminal);
        assert_eq!(effects, vec![Effect::CancelRequest, Effect::DestroyView]);

        let (m, effects) = m.transition(Action::Recover(CollabError::server("late")));
        assert_eq!(m.comm(), Comm::Terminal);
        assert!(effects.is_empty());
    }
}
