//! Outbound command queue for request/reply hardware links
//!
//! A hardware device answers one query at a time with an anonymous line, so
//! the only way to know what a reply answers is its position: replies arrive
//! in the order queries were transmitted. The queue therefore keeps every
//! transmitted entry ahead of every waiting one and matches each reply to
//! the head entry without inspecting its text.
//!
//! The only mutators are [`enqueue`](OutboundQueue::enqueue),
//! [`tick`](OutboundQueue::tick), [`on_reply`](OutboundQueue::on_reply) and
//! [`clear`](OutboundQueue::clear); together they keep two invariants:
//! - transmitted entries always precede untransmitted ones
//! - only the head entry can be awaiting a reply

use core::fmt;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------------

/// Wire name of the engine's own polling source
pub const SELF_SOURCE: &str = "self";

/// Who queued an entry and therefore who receives its reply
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// The engine's status polling; replies update the device status
    Engine,
    /// A named requester; replies are forwarded to it verbatim
    Named(String),
}

impl Source {
    pub fn named(name: impl Into<String>) -> Self {
        Source::Named(name.into())
    }

    /// Name of the requester waiting for the reply, if any
    pub fn requester(&self) -> Option<&str> {
        match self {
            Source::Engine => None,
            Source::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Engine => f.write_str(SELF_SOURCE),
            Source::Named(name) => f.write_str(name),
        }
    }
}

// ----------------------------------------------------------------------------
// Queue Entry
// ----------------------------------------------------------------------------

/// One queued device command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    text: String,
    source: Source,
    keep: bool,
    sent_at: Option<Instant>,
}

impl QueueEntry {
    fn new(text: String, source: Source, keep: bool) -> Self {
        Self {
            text,
            source,
            keep,
            sent_at: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Whether a reply is expected
    pub fn keep(&self) -> bool {
        self.keep
    }

    /// Whether the entry has been transmitted and awaits its reply
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }
}

// ----------------------------------------------------------------------------
// Tick Outcome
// ----------------------------------------------------------------------------

/// What one queue tick asks the link to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    /// Write `text` to the device
    Transmit { text: String, awaiting_reply: bool },
    /// The head is in flight and still within its reply timeout
    Waiting,
    /// The queue was empty and has been refilled with `count` poll commands
    Refilled { count: usize },
    /// The head waited longer than the reply timeout and was dropped
    Expired(QueueEntry),
}

// ----------------------------------------------------------------------------
// Outbound Queue
// ----------------------------------------------------------------------------

/// FIFO of device commands with reply correlation
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    entries: VecDeque<QueueEntry>,
    poll_commands: Vec<String>,
    reply_timeout: Option<Duration>,
}

impl OutboundQueue {
    /// Create a queue refilled with `poll_commands` whenever it runs dry
    pub fn new(poll_commands: Vec<String>) -> Self {
        Self {
            entries: VecDeque::new(),
            poll_commands,
            reply_timeout: None,
        }
    }

    /// Drop in-flight entries whose reply takes longer than `timeout`
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout
    }

    pub fn poll_commands(&self) -> &[String] {
        &self.poll_commands
    }

    /// Queue a command behind every transmitted entry and ahead of the
    /// untransmitted ones; returns the insertion index
    pub fn enqueue(&mut self, text: impl Into<String>, source: Source, keep: bool) -> usize {
        let index = self
            .entries
            .iter()
            .position(|entry| !entry.is_sent())
            .unwrap_or(self.entries.len());

        self.entries
            .insert(index, QueueEntry::new(text.into(), source, keep));
        index
    }

    /// Advance the queue by one step
    pub fn tick(&mut self, now: Instant) -> TickAction {
        let Some(head) = self.entries.front_mut() else {
            self.refill();
            return TickAction::Refilled {
                count: self.entries.len(),
            };
        };

        if let Some(sent_at) = head.sent_at {
            let timed_out = self
                .reply_timeout
                .is_some_and(|timeout| now.saturating_duration_since(sent_at) >= timeout);

            if !timed_out {
                return TickAction::Waiting;
            }
            return self
                .entries
                .pop_front()
                .map_or(TickAction::Waiting, TickAction::Expired);
        }

        let text = head.text.clone();
        if head.keep {
            head.sent_at = Some(now);
            TickAction::Transmit {
                text,
                awaiting_reply: true,
            }
        } else {
            self.entries.pop_front();
            TickAction::Transmit {
                text,
                awaiting_reply: false,
            }
        }
    }

    /// Match a reply to the head entry
    ///
    /// Returns `None` when nothing is awaiting a reply: either the queue is
    /// empty or its head has not been transmitted yet. Such replies are
    /// unsolicited and the queue is left untouched.
    pub fn on_reply(&mut self) -> Option<QueueEntry> {
        match self.entries.front() {
            Some(head) if head.is_sent() => self.entries.pop_front(),
            _ => None,
        }
    }

    /// Drop every entry, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of transmitted entries still awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.entries.iter().take_while(|entry| entry.is_sent()).count()
    }

    fn refill(&mut self) {
        self.entries.extend(
            self.poll_commands
                .iter()
                .map(|command| QueueEntry::new(command.clone(), Source::Engine, true)),
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
