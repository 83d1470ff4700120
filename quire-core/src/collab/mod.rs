use log::warn;

use crate::{Bias, ClientId, Document, Step, StepError};

/// Steps ready to be pushed to the authority, with the version they were
/// built on.
#[derive(Debug, Clone, PartialEq)]
pub struct Sendable<S> {
    pub version: u64,
    pub steps: Vec<S>,
    pub client_id: ClientId,
}

/// Collaboration state of one editor.
///
/// `confirmed` is the document at `version` as the authority knows it;
/// `doc` is `confirmed` plus every unconfirmed local step.
#[derive(Debug, Clone)]
pub struct EditState<D: Document> {
    doc: D,
    confirmed: D,
    version: u64,
    unconfirmed: Vec<D::Step>,
    client_id: ClientId,
}

impl<D: Document> EditState<D> {
    pub fn new(doc: D, version: u64, client_id: ClientId) -> Self {
        Self {
            confirmed: doc.clone(),
            doc,
            version,
            unconfirmed: Vec::new(),
            client_id,
        }
    }

    /// Local document, including unconfirmed edits.
    pub fn doc(&self) -> &D {
        &self.doc
    }

    /// Document at the last confirmed version.
    pub fn confirmed_doc(&self) -> &D {
        &self.confirmed
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn unconfirmed(&self) -> &[D::Step] {
        &self.unconfirmed
    }

    /// Apply local edits. They stay unconfirmed until received back.
    pub fn apply_local(&self, steps: &[D::Step]) -> Result<Self, StepError> {
        let doc = self.doc.apply_all(steps)?;
        let mut unconfirmed = self.unconfirmed.clone();
        unconfirmed.extend_from_slice(steps);
        Ok(Self {
            doc,
            confirmed: self.confirmed.clone(),
            version: self.version,
            unconfirmed,
            client_id: self.client_id.clone(),
        })
    }

    /// Unconfirmed steps to push, if any.
    pub fn sendable(&self) -> Option<Sendable<D::Step>> {
        if self.unconfirmed.is_empty() {
            return None;
        }
        Some(Sendable {
            version: self.version,
            steps: self.unconfirmed.clone(),
            client_id: self.client_id.clone(),
        })
    }

    /// Receive a batch the authority applied after `version`.
    ///
    /// The leading run of steps carrying our client id confirms that many
    /// unconfirmed steps. Remaining steps are applied to the confirmed
    /// document and the rest of the unconfirmed steps are rebased over them.
    /// The version always advances by `steps.len()`.
    pub fn receive(&self, steps: &[D::Step], client_ids: &[ClientId]) -> Result<Self, StepError> {
        if steps.is_empty() {
            return Ok(self.clone());
        }

        let own = steps
            .iter()
            .zip(client_ids)
            .take_while(|(_, id)| **id == self.client_id)
            .count();
        let unconfirmed = &self.unconfirmed[own.min(self.unconfirmed.len())..];
        let confirmed = self.confirmed.apply_all(&steps[..own])?;
        let version = self.version + steps.len() as u64;

        let foreign = &steps[own..];
        if foreign.is_empty() {
            return Ok(Self {
                doc: self.doc.clone(),
                confirmed,
                version,
                unconfirmed: unconfirmed.to_vec(),
                client_id: self.client_id.clone(),
            });
        }

        let confirmed = confirmed.apply_all(foreign)?;
        let mut remote = foreign.to_vec();
        let mut doc = confirmed.clone();
        let mut rebased = Vec::with_capacity(unconfirmed.len());
        for local in unconfirmed {
            let mut step = local.clone();
            for r in remote.iter_mut() {
                let next = step.rebase(r, Bias::After);
                *r = r.rebase(&step, Bias::Before);
                step = next;
            }
            match doc.apply(&step) {
                Ok(next) => {
                    doc = next;
                    rebased.push(step);
                }
                Err(e) => warn!("Dropping unconfirmed step that no longer applies: {e}"),
            }
        }

        Ok(Self {
            doc,
            confirmed,
            version,
            unconfirmed: rebased,
            client_id: self.client_id.clone(),
        })
    }
}
