//! Composite undo sessions spanning every registered index.
//!
//! A composite bundles one sub-session per index, opened in registration
//! order, and treats them as a unit: pushed together, squashed together,
//! or rolled back together. `push`, `squash` and `undo` consume the
//! composite, so a pushed session cannot be pushed twice.

use anyhow::Result;

use crate::index::AbstractSession;

pub struct Session<'db> {
    subs: Vec<Box<dyn AbstractSession + 'db>>,
    applied: bool,
}

impl<'db> Session<'db> {
    pub(crate) fn new(subs: Vec<Box<dyn AbstractSession + 'db>>) -> Self {
        Self {
            subs,
            applied: false,
        }
    }

    /// A disabled composite: discards every operation, rolls nothing back.
    pub(crate) fn inert() -> Self {
        Self {
            subs: Vec::new(),
            applied: true,
        }
    }

    /// Whether this composite actually carries sub-sessions.
    pub fn enabled(&self) -> bool {
        !self.subs.is_empty()
    }

    /// Keep every sub-frame; the undo stacks own them from here on.
    pub fn push(mut self) {
        for sub in &mut self.subs {
            sub.push();
        }
        self.applied = true;
    }

    /// Merge every sub-frame into its parent, in registration order.
    pub fn squash(mut self) -> Result<()> {
        self.applied = true;
        for sub in &mut self.subs {
            sub.squash()?;
        }
        Ok(())
    }

    /// Roll every sub-frame back now, in registration order.
    pub fn undo(mut self) -> Result<()> {
        self.applied = true;
        for sub in &mut self.subs {
            sub.undo()?;
        }
        Ok(())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.applied {
            // Dropping a sub-session rolls its frame back; unwind in
            // reverse registration order.
            while let Some(sub) = self.subs.pop() {
                drop(sub);
            }
        }
    }
}
