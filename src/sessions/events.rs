//! Session events for embedders.
//!
//! The coordinator does not depend on any UI toolkit; everything an
//! observer (admin surface, reporting view, tests) needs to know is pushed
//! into a bounded queue and drained through [`EventDrain`].

use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::iter::FusedIterator;

use crate::sessions::coordinator::SessionState;
use crate::sessions::participant::ParticipantStatus;
use crate::transport::session_transport::LinkStatus;
use crate::ParticipantId;

/// Something observable happened inside a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The broker binding's status changed.
    TransportStatusChanged(LinkStatus),
    /// The session moved between waiting and active.
    StatusChanged(SessionState),
    /// A participant joined, readied, left or was reset.
    ParticipantStatusChanged {
        /// The participant whose status changed.
        participant: ParticipantId,
        /// Its new status.
        status: ParticipantStatus,
    },
    /// A new question was selected.
    QuestionChanged {
        /// The selected collection.
        collection_id: String,
        /// The selected question.
        question_id: String,
    },
    /// The countdown began.
    Started {
        /// Target end of the active period, epoch milliseconds.
        target_end_epoch_ms: i64,
    },
    /// The active period ended and artifacts were finalized.
    Stopped,
}

/// An opaque draining iterator over a session's pending events.
///
/// Wraps the internal queue drain so the queue type stays private.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain<'a> {
    inner: Drain<'a, SessionEvent>,
}

impl<'a> EventDrain<'a> {
    pub(crate) fn new(queue: &'a mut VecDeque<SessionEvent>) -> Self {
        EventDrain {
            inner: queue.drain(..),
        }
    }
}

impl Iterator for EventDrain<'_> {
    type Item = SessionEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for EventDrain<'_> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FusedIterator for EventDrain<'_> {}

impl std::fmt::Debug for EventDrain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .finish()
    }
}
