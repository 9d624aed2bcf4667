// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::VecDeque;
use std::time::Duration;

use minidom::Element;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::stanza::sm::Nonza;

/// How long outbound ack emissions are coalesced. The flushed `<a/>` always
/// carries the counter at flush time, not at the time of the first `<r/>`.
pub const ACK_DEBOUNCE: Duration = Duration::from_millis(250);

/// The resumption window we request from the server, in seconds.
pub const RESUME_MAX: u32 = 600;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A new SM session was established.
    Enabled,
    /// The previous SM session was resumed; no catch-up is needed.
    Resumed,
    /// A queued stanza was acknowledged by the server.
    StanzaAcked { stanza: Element },
    /// The previous session could not be resumed; this queued stanza was
    /// never acknowledged and is likely lost.
    StanzaLostOnResume { stanza: Element },
    /// Sending failed after a completed resume.
    StanzaSendFailed { stanza: Element },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmSessionInfo {
    pub id: String,
    pub resume: bool,
}

#[derive(Default)]
struct State {
    session: Option<SmSessionInfo>,
    inbound: u32,
    outbound_queue: VecDeque<Element>,
    outbound_acked: u32,
    resume_completed: bool,
    ack_scheduled: bool,
    negotiation: Option<oneshot::Sender<Nonza>>,
    verification: Option<oneshot::Sender<u32>>,
}

/// XEP-0198 bookkeeping. Holds the inbound counter, the outbound queue and
/// the pending negotiation/verification channels; all stream interaction is
/// driven by the session.
#[derive(Default)]
pub struct StreamManager {
    state: Mutex<State>,
}

impl StreamManager {
    pub fn is_enabled(&self) -> bool {
        self.state.lock().session.is_some()
    }

    pub fn session_info(&self) -> Option<SmSessionInfo> {
        self.state.lock().session.clone()
    }

    pub fn inbound(&self) -> u32 {
        self.state.lock().inbound
    }

    pub fn resume_completed(&self) -> bool {
        self.state.lock().resume_completed
    }

    /// Increments the inbound counter for a received stanza and returns the
    /// new value. The counter is monotonic (modulo 2^32 per XEP-0198) for
    /// the life of an SM session.
    pub fn record_inbound(&self) -> u32 {
        let mut state = self.state.lock();
        state.inbound = state.inbound.wrapping_add(1);
        state.inbound
    }

    /// Starts tracking the given SM session. Counters restart for a fresh
    /// session and continue for a resumed one.
    pub fn start_session(&self, info: SmSessionInfo, inbound: u32) {
        let mut state = self.state.lock();
        state.session = Some(info);
        state.inbound = inbound;
        state.outbound_acked = 0;
    }

    pub fn mark_resume_completed(&self) {
        self.state.lock().resume_completed = true;
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = State {
            // The queue survives a reset so unacked stanzas can be reported
            // or replayed after a reconnect.
            outbound_queue: std::mem::take(&mut state.outbound_queue),
            ..State::default()
        };
    }

    pub fn enqueue_outbound(&self, stanza: Element) {
        self.state.lock().outbound_queue.push_back(stanza);
    }

    /// Applies a server ack carrying `h`. Returns one entry per newly acked
    /// slot; slots past the live queue tail yield `None`. This protects
    /// against the server reporting a higher count than we have queued,
    /// which happens routinely after a resume across a process restart.
    pub fn ack_queue(&self, h: u32) -> Vec<Option<Element>> {
        let mut state = self.state.lock();
        let delta = h.wrapping_sub(state.outbound_acked);
        state.outbound_acked = h;

        let mut acked = Vec::with_capacity(delta as usize);
        for _ in 0..delta {
            acked.push(state.outbound_queue.pop_front());
        }
        acked
    }

    /// Empties the queue, e.g. when a resume failed and the stanzas are
    /// lost for good.
    pub fn drain_queue(&self) -> Vec<Element> {
        self.state.lock().outbound_queue.drain(..).collect()
    }

    /// Marks the debounced ack as scheduled. Returns false if one is
    /// already in flight; setting the deadline is idempotent.
    pub fn schedule_ack(&self) -> bool {
        let mut state = self.state.lock();
        if state.ack_scheduled {
            return false;
        }
        state.ack_scheduled = true;
        true
    }

    /// Clears the debounce flag and returns the counter to send.
    pub fn take_scheduled_ack(&self) -> u32 {
        let mut state = self.state.lock();
        state.ack_scheduled = false;
        state.inbound
    }

    pub fn begin_negotiation(&self) -> oneshot::Receiver<Nonza> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().negotiation = Some(tx);
        rx
    }

    /// Routes an enabled/resumed/failed nonza to the pending negotiation.
    /// Returns the nonza back if no negotiation is waiting.
    pub fn complete_negotiation(&self, nonza: Nonza) -> Option<Nonza> {
        let Some(tx) = self.state.lock().negotiation.take() else {
            return Some(nonza);
        };
        tx.send(nonza).err()
    }

    pub fn begin_verification(&self) -> oneshot::Receiver<u32> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().verification = Some(tx);
        rx
    }

    pub fn complete_verification(&self, h: u32) {
        if let Some(tx) = self.state.lock().verification.take() {
            _ = tx.send(h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_queue_yields_sentinels_past_tail() {
        let sm = StreamManager::default();
        sm.start_session(
            SmSessionInfo {
                id: "sm-1".to_string(),
                resume: true,
            },
            0,
        );

        sm.enqueue_outbound(Element::builder("message", "jabber:client").build());

        // The server saw three stanzas from the previous life of this
        // session, we only have one queued.
        let acked = sm.ack_queue(3);
        assert_eq!(acked.len(), 3);
        assert!(acked[0].is_some());
        assert!(acked[1].is_none());
        assert!(acked[2].is_none());

        // Subsequent acks start from the new baseline.
        sm.enqueue_outbound(Element::builder("message", "jabber:client").build());
        let acked = sm.ack_queue(4);
        assert_eq!(acked.len(), 1);
        assert!(acked[0].is_some());
    }

    #[test]
    fn test_inbound_counter_is_monotonic() {
        let sm = StreamManager::default();
        assert_eq!(sm.record_inbound(), 1);
        assert_eq!(sm.record_inbound(), 2);
        assert_eq!(sm.inbound(), 2);
    }

    #[test]
    fn test_ack_debounce_flag() {
        let sm = StreamManager::default();
        assert!(sm.schedule_ack());
        assert!(!sm.schedule_ack());
        sm.record_inbound();
        sm.record_inbound();
        // The flush carries the counter at flush time.
        assert_eq!(sm.take_scheduled_ack(), 2);
        assert!(sm.schedule_ack());
    }
}
