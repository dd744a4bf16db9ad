//! In-flight tool calls of one session.
//!
//! Owned by the session task alone; handler tasks report back over a channel
//! and never touch the table.

use std::collections::{HashMap, HashSet};

/// Progress of one call id through the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Received,
    Dispatched,
    ResultReady,
    Replied,
}

#[derive(Debug)]
struct Call {
    state: CallState,
    response_id: Option<String>,
    previous_item_id: Option<String>,
}

/// What the model said about a call before asking for it to run.
#[derive(Debug, Default)]
struct Announced {
    name: Option<String>,
    previous_item_id: Option<String>,
}

#[derive(Debug, Default)]
struct ResponseCalls {
    outstanding: HashSet<String>,
    issued: usize,
    done: bool,
}

/// Per-session call bookkeeping.
///
/// A response is forgotten, together with the answered calls it issued, as
/// soon as it is done and has nothing outstanding, so the table only holds
/// the turns still in progress.
#[derive(Debug, Default)]
pub struct CallTable {
    calls: HashMap<String, Call>,
    /// Answered call ids and the response that issued them.
    retired: HashMap<String, Option<String>>,
    announced: HashMap<String, Announced>,
    responses: HashMap<String, ResponseCalls>,
}

impl CallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a function-call item the model announced: the tool it names and,
    /// once the item lands in the conversation, the item it follows.
    pub fn note_item(&mut self, call_id: &str, name: Option<&str>, previous_item_id: Option<String>) {
        if let Some(call) = self.calls.get_mut(call_id) {
            if previous_item_id.is_some() {
                call.previous_item_id = previous_item_id;
            }
        } else if !self.retired.contains_key(call_id) {
            let announced = self.announced.entry(call_id.to_string()).or_default();
            if let Some(name) = name {
                announced.name = Some(name.to_string());
            }
            if previous_item_id.is_some() {
                announced.previous_item_id = previous_item_id;
            }
        }
    }

    /// Tool name announced for a call that has not been received yet.
    #[must_use]
    pub fn announced_name(&self, call_id: &str) -> Option<&str> {
        self.announced
            .get(call_id)
            .and_then(|announced| announced.name.as_deref())
    }

    /// Starts tracking a call. Returns `false` for a call id that is already
    /// in flight or has been answered, so a repeated request is never run twice.
    pub fn receive(&mut self, call_id: &str, response_id: Option<&str>) -> bool {
        if self.calls.contains_key(call_id) || self.retired.contains_key(call_id) {
            return false;
        }
        if let Some(response_id) = response_id {
            let response = self.responses.entry(response_id.to_string()).or_default();
            response.outstanding.insert(call_id.to_string());
            response.issued += 1;
        }
        let previous_item_id = self
            .announced
            .remove(call_id)
            .and_then(|announced| announced.previous_item_id);
        self.calls.insert(
            call_id.to_string(),
            Call {
                state: CallState::Received,
                response_id: response_id.map(str::to_string),
                previous_item_id,
            },
        );
        true
    }

    pub fn mark_dispatched(&mut self, call_id: &str) {
        self.advance(call_id, CallState::Received, CallState::Dispatched);
    }

    /// Accepts a handler's completion. Returns `false` if the call is not
    /// waiting for one.
    pub fn result_ready(&mut self, call_id: &str) -> bool {
        self.advance(call_id, CallState::Dispatched, CallState::ResultReady)
    }

    fn advance(&mut self, call_id: &str, from: CallState, to: CallState) -> bool {
        match self.calls.get_mut(call_id) {
            Some(call) if call.state == from => {
                call.state = to;
                true
            }
            Some(call) => {
                tracing::debug!(call_id, state = ?call.state, next = ?to, "Ignored out-of-order call transition");
                false
            }
            None => false,
        }
    }

    #[must_use]
    pub fn state(&self, call_id: &str) -> Option<CallState> {
        if self.retired.contains_key(call_id) {
            return Some(CallState::Replied);
        }
        self.calls.get(call_id).map(|call| call.state)
    }

    #[must_use]
    pub fn previous_item_id(&self, call_id: &str) -> Option<&str> {
        self.calls
            .get(call_id)
            .and_then(|call| call.previous_item_id.as_deref())
    }

    /// Calls not yet answered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.calls.len()
    }

    /// Retires a call whose output has been sent. Returns `true` when this
    /// was the last open call of a finished response, meaning the model should
    /// now be asked to continue.
    pub fn retire(&mut self, call_id: &str) -> bool {
        let Some(call) = self.calls.remove(call_id) else {
            return false;
        };
        self.retired.insert(call_id.to_string(), call.response_id.clone());
        let Some(response_id) = call.response_id else {
            return false;
        };
        if let Some(response) = self.responses.get_mut(&response_id) {
            response.outstanding.remove(call_id);
        }
        self.settle(&response_id)
    }

    /// Marks a response finished. `call_ids` are the function calls its
    /// output listed. Returns `true` when every one of them has already been
    /// answered.
    pub fn response_done<'a>(
        &mut self,
        response_id: &str,
        call_ids: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        let response = self.responses.entry(response_id.to_string()).or_default();
        response.done = true;
        for call_id in call_ids {
            // Announced but never requested; nothing will follow for it.
            self.announced.remove(call_id);
            if response.outstanding.contains(call_id) {
                continue;
            }
            if let Some(call) = self.calls.get_mut(call_id) {
                if call.response_id.is_none() {
                    call.response_id = Some(response_id.to_string());
                    response.outstanding.insert(call_id.to_string());
                    response.issued += 1;
                }
            } else if let Some(owner) = self.retired.get_mut(call_id) {
                if owner.is_none() {
                    // Answered before the response announced it.
                    *owner = Some(response_id.to_string());
                    response.issued += 1;
                }
            }
        }
        self.settle(response_id)
    }

    /// Forgets a response that is done with nothing outstanding. Returns
    /// whether it issued any calls.
    fn settle(&mut self, response_id: &str) -> bool {
        let finished = self
            .responses
            .get(response_id)
            .is_some_and(|response| response.done && response.outstanding.is_empty());
        if !finished {
            return false;
        }
        let issued = self
            .responses
            .remove(response_id)
            .is_some_and(|response| response.issued > 0);
        self.retired
            .retain(|_, owner| owner.as_deref() != Some(response_id));
        issued
    }
}
