use crate::{Frame, Result, Timestamp, Transport, TransportError, MAX_PAYLOAD};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

/// Something observed on the mock bus, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockEvent {
    Sent(Frame),
    Received(Frame),
}

struct MockState {
    connected: bool,
    latency: Duration,
    responder: Option<Responder>,
    inbox: VecDeque<(Instant, Frame)>,
    events: Vec<MockEvent>,
}

/// An in-process mock bus.
///
/// Replies are produced by an optional responder closure at send time and become
/// receivable after the configured latency. Without a responder the bus never answers.
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

/// Cloneable view into a [`MockTransport`] that stays usable after the transport has
/// been handed to a channel.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// A bus that accepts every frame and never answers.
    pub fn silent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                latency: Duration::ZERO,
                responder: None,
                inbox: VecDeque::new(),
                events: Vec::new(),
            })),
        }
    }

    pub fn with_responder<F>(name: &str, responder: F) -> Self
    where
        F: FnMut(&Frame) -> Vec<Frame> + Send + 'static,
    {
        let transport = Self::silent(name);
        lock(&transport.state).responder = Some(Box::new(responder));
        transport
    }

    /// Delay every reply by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        lock(&self.state).latency = latency;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MockHandle {
    pub fn events(&self) -> Vec<MockEvent> {
        lock(&self.state).events.clone()
    }

    pub fn sent(&self) -> Vec<Frame> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Sent(f) => Some(f.clone()),
                MockEvent::Received(_) => None,
            })
            .collect()
    }

    /// Queue a frame as if a device had sent it unprompted.
    pub fn inject(&self, frame: Frame) {
        lock(&self.state).inbox.push_back((Instant::now(), frame));
    }

    /// Change the reply delay for frames sent from now on.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Frames queued but not yet received.
    pub fn queued(&self) -> usize {
        lock(&self.state).inbox.len()
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if frame.data.len() > MAX_PAYLOAD {
            return Err(TransportError::InvalidFrame("payload > 64"));
        }
        state.events.push(MockEvent::Sent(frame.clone()));
        let ready_at = Instant::now() + state.latency;
        let replies = match state.responder.as_mut() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        for reply in replies {
            state.inbox.push_back((ready_at, reply));
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let now = Instant::now();
            let wake = {
                let mut state = lock(&self.state);
                if !state.connected {
                    return Err(TransportError::Disconnected);
                }
                match state.inbox.front() {
                    Some((ready_at, _)) if *ready_at <= now => {
                        if let Some((_, mut frame)) = state.inbox.pop_front() {
                            frame.timestamp = Some(Timestamp::now());
                            state.events.push(MockEvent::Received(frame.clone()));
                            return Ok(frame);
                        }
                        continue;
                    }
                    Some((ready_at, _)) => Some(*ready_at),
                    None => None,
                }
            };
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return Err(TransportError::Timeout);
                }
            }
            let target = match (wake, deadline) {
                (Some(w), Some(d)) => w.min(d),
                (Some(w), None) => w,
                (None, Some(d)) => d,
                (None, None) => now + Duration::from_millis(1),
            };
            // Short naps so frames injected from other threads are noticed.
            let nap = target
                .saturating_duration_since(now)
                .min(Duration::from_millis(1));
            thread::sleep(nap);
        }
    }
}
