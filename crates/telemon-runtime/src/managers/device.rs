//! Request/reply hardware links
//!
//! A device answers each query with one anonymous line, in query order. The
//! [`DeviceLink`] owns the device's [`OutboundQueue`], transmits on every
//! tick while connected and turns replies either into status fields (for its
//! own polling) or into lines forwarded to whoever asked.

use std::time::Instant;

use telemon_core::{
    ConnectionId, DeviceConfig, OutboundQueue, QueueEntry, Source, StatusMap, TickAction,
};
use tracing::{debug, warn};

use crate::transport::LinkSender;

/// Status field holding the link indicator
pub const CONNECTED_FIELD: &str = "connected";

/// Value of a poll field while the device is unreachable
pub const UNKNOWN_VALUE: &str = "nan";

/// What a device reply turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// A poll reply was stored in the status field `key`
    Updated { key: String, value: String },
    /// A reply to a named requester, to be forwarded verbatim
    Forward { to: String, text: String },
    /// An engine query outside the poll list; nothing to update
    Ignored { command: String },
    /// Nothing was awaiting a reply
    Unsolicited,
}

/// One configured hardware device and its link
#[derive(Debug)]
pub struct DeviceLink {
    name: String,
    config: DeviceConfig,
    queue: OutboundQueue,
    status: StatusMap,
    link: Option<(ConnectionId, LinkSender)>,
}

impl DeviceLink {
    pub fn new(name: impl Into<String>, config: DeviceConfig) -> Self {
        let mut queue = OutboundQueue::new(config.poll_commands());
        if let Some(timeout) = config.reply_timeout() {
            queue = queue.with_reply_timeout(timeout);
        }

        let mut device = Self {
            name: name.into(),
            config,
            queue,
            status: StatusMap::new(),
            link: None,
        };
        device.reset_status();
        device
    }

    /// Attach a fresh link: clear the queue, raise the indicator and write
    /// the init commands directly
    pub fn on_connected(&mut self, id: ConnectionId, outbound: LinkSender) -> usize {
        let dropped = self.queue.clear();
        self.status
            .insert(CONNECTED_FIELD.to_string(), "1".to_string());

        for line in &self.config.init {
            if outbound.send(line.clone()).is_err() {
                warn!("{}: link closed while sending init command '{}'", self.name, line);
            }
        }

        self.link = Some((id, outbound));
        dropped
    }

    /// Detach the link: drop every pending entry and mark all fields unknown
    pub fn on_disconnected(&mut self) -> usize {
        self.link = None;
        let dropped = self.queue.clear();
        self.reset_status();
        dropped
    }

    /// Queue a command; replies are expected when it ends with `?`
    pub fn enqueue(&mut self, text: &str, source: Source) -> usize {
        let keep = text.trim_end().ends_with('?');
        self.queue.enqueue(text, source, keep)
    }

    /// Advance the queue; does nothing while unlinked
    ///
    /// Returns the entry whose reply timed out, if any.
    pub fn tick(&mut self, now: Instant) -> Option<QueueEntry> {
        let (_, outbound) = self.link.as_ref()?;

        match self.queue.tick(now) {
            TickAction::Transmit { text, .. } => {
                if outbound.send(text).is_err() {
                    debug!("{}: link task gone, transmit dropped", self.name);
                }
                None
            }
            TickAction::Refilled { count } => {
                debug!("{}: queued {} poll commands", self.name, count);
                None
            }
            TickAction::Waiting => None,
            TickAction::Expired(entry) => Some(entry),
        }
    }

    /// Match a reply line to the in-flight query
    pub fn on_reply(&mut self, line: &str) -> ReplyOutcome {
        let Some(entry) = self.queue.on_reply() else {
            return ReplyOutcome::Unsolicited;
        };

        if let Some(requester) = entry.source().requester() {
            return ReplyOutcome::Forward {
                to: requester.to_string(),
                text: line.to_string(),
            };
        }

        let Some(poll) = self
            .config
            .poll
            .iter()
            .find(|poll| poll.command == entry.text())
        else {
            return ReplyOutcome::Ignored {
                command: entry.text().to_string(),
            };
        };

        let key = poll.status_key();
        let value = parse_reading(line);
        self.status.insert(key.clone(), value.clone());
        ReplyOutcome::Updated { key, value }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn status(&self) -> &StatusMap {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.link.as_ref().map(|(id, _)| *id)
    }

    /// Status for the aggregated view; `None` while unlinked
    pub fn snapshot(&self) -> Option<StatusMap> {
        self.is_connected().then(|| self.status.clone())
    }

    fn reset_status(&mut self) {
        self.status
            .insert(CONNECTED_FIELD.to_string(), "0".to_string());
        for poll in &self.config.poll {
            self.status.insert(poll.status_key(), UNKNOWN_VALUE.to_string());
        }
    }
}

/// Extract the value from a device reply such as `V1 12.000V`
///
/// Takes the last token and strips trailing unit letters; the stripped token
/// is used when it is numeric, the raw token otherwise.
pub fn parse_reading(line: &str) -> String {
    let token = line.split_whitespace().last().unwrap_or_default();
    let stripped = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());

    if !stripped.is_empty() && stripped.parse::<f64>().is_ok() {
        stripped.to_string()
    } else {
        token.to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
