//! Plain-text document with character-addressed replace steps.
//!
//! Positions count Unicode scalar values, not bytes. A single step kind,
//! [`TextStep::Replace`], covers insertion (`from == to`), deletion (empty
//! text) and replacement.

use serde::{Deserialize, Serialize};

use crate::{Bias, Document, Step, StepError};

/// A plain-text document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDoc {
    text: String,
}

impl TextDoc {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn byte_offset(&self, pos: usize) -> usize {
        self.text
            .char_indices()
            .nth(pos)
            .map_or(self.text.len(), |(i, _)| i)
    }
}

/// Replace the characters in `from..to` with `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stepType", rename_all = "camelCase")]
pub enum TextStep {
    Replace { from: usize, to: usize, text: String },
}

impl TextStep {
    pub fn replace(from: usize, to: usize, text: impl Into<String>) -> Self {
        Self::Replace { from, to, text: text.into() }
    }

    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        Self::replace(pos, pos, text)
    }

    pub fn delete(from: usize, to: usize) -> Self {
        Self::replace(from, to, "")
    }

    /// Map a position in the document before this step to the document
    /// after it.
    pub fn map_pos(&self, pos: usize, bias: Bias) -> usize {
        let Self::Replace { from, to, text } = self;
        let inserted = text.chars().count();
        if pos < *from {
            return pos;
        }
        if pos > *to {
            return pos - (to - from) + inserted;
        }
        let side = if from == to {
            bias
        } else if pos == *from {
            Bias::Before
        } else if pos == *to {
            Bias::After
        } else {
            bias
        };
        match side {
            Bias::Before => *from,
            Bias::After => from + inserted,
        }
    }
}

impl Step for TextStep {
    fn rebase(&self, over: &Self, bias: Bias) -> Self {
        let Self::Replace { from, to, text } = self;
        if from == to {
            let pos = over.map_pos(*from, bias);
            return Self::replace(pos, pos, text.clone());
        }
        let new_from = over.map_pos(*from, Bias::After);
        let new_to = over.map_pos(*to, Bias::Before).max(new_from);
        Self::replace(new_from, new_to, text.clone())
    }
}

impl Document for TextDoc {
    type Step = TextStep;

    fn apply(&self, step: &TextStep) -> Result<Self, StepError> {
        let TextStep::Replace { from, to, text } = step;
        let size = self.len();
        if from > to {
            return Err(StepError::InvalidRange { from: *from, to: *to });
        }
        if *to > size {
            return Err(StepError::OutOfRange { pos: *to, size });
        }
        let start = self.byte_offset(*from);
        let end = self.byte_offset(*to);
        let mut out = String::with_capacity(self.text.len() - (end - start) + text.len());
        out.push_str(&self.text[..start]);
        out.push_str(text);
        out.push_str(&self.text[end..]);
        Ok(Self { text: out })
    }

    fn content_size(&self) -> usize {
        self.len()
    }

    fn title(&self) -> Option<String> {
        self.text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}
