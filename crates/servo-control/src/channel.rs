//! Diagnostic command channel: one in-flight request per transport, FIFO dispatch.

use crate::metrics::ChannelMetrics;
use crate::wire;
use crate::{ControlError, Register, Resolution, Result, ResultFrame};
use servo_transport::{DeviceId, Frame, Transport, TransportError, MAX_PAYLOAD};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on frames discarded in one resynchronization pass.
const MAX_DRAIN: usize = 256;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// How long to wait for a reply once a request is on the bus.
    pub timeout: Duration,
    /// Our own bus address.
    pub host: DeviceId,
    /// Granularity at which a cancel token is checked while waiting.
    pub poll_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            host: DeviceId::HOST,
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl ChannelOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Explicit cancellation flag for a pending request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Queue {
    next_ticket: u64,
    serving: u64,
}

/// The transport plus what is known about replies still in flight on it.
struct Link {
    transport: Box<dyn Transport>,
    /// Requests per device that were abandoned while awaiting a reply.
    abandoned: HashMap<DeviceId, usize>,
    /// Late replies are awaited until this instant.
    late_until: Option<Instant>,
}

/// Serializes console text and register queries onto a shared [`Transport`].
///
/// Callers on any number of threads are dispatched one at a time in the order they
/// called. A request that times out or is cancelled flags the channel. Before the next
/// request goes out the channel discards frames until every abandoned request has been
/// answered or one more timeout period has passed.
pub struct DiagnosticChannel {
    link: Mutex<Link>,
    queue: Mutex<Queue>,
    turn: Condvar,
    resync: AtomicBool,
    options: ChannelOptions,
    metrics: Option<ChannelMetrics>,
}

struct Turn<'a> {
    channel: &'a DiagnosticChannel,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let mut queue = self.channel.lock_queue();
        queue.serving += 1;
        drop(queue);
        self.channel.turn.notify_all();
        if let Some(m) = &self.channel.metrics {
            m.pending_requests.dec();
        }
    }
}

fn text_payload(text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(text.len() + 1);
    payload.extend_from_slice(text.as_bytes());
    payload.push(b'\n');
    payload
}

impl DiagnosticChannel {
    pub fn new(transport: impl Transport + 'static, options: ChannelOptions) -> Self {
        Self::from_boxed(Box::new(transport), options)
    }

    pub fn from_boxed(transport: Box<dyn Transport>, options: ChannelOptions) -> Self {
        Self {
            link: Mutex::new(Link {
                transport,
                abandoned: HashMap::new(),
                late_until: None,
            }),
            queue: Mutex::new(Queue::default()),
            turn: Condvar::new(),
            resync: AtomicBool::new(false),
            options,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ChannelMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// Requests queued or in flight.
    pub fn pending(&self) -> usize {
        let queue = self.lock_queue();
        (queue.next_ticket - queue.serving) as usize
    }

    /// Requests ever submitted to this channel.
    pub fn submitted(&self) -> u64 {
        self.lock_queue().next_ticket
    }

    /// Whether stale frames will be drained before the next request.
    pub fn needs_resync(&self) -> bool {
        self.resync.load(Ordering::SeqCst)
    }

    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn acquire(&self) -> Turn<'_> {
        let mut queue = self.lock_queue();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        if let Some(m) = &self.metrics {
            m.pending_requests.inc();
        }
        while queue.serving != ticket {
            queue = self.turn.wait(queue).unwrap_or_else(|p| p.into_inner());
        }
        Turn { channel: self }
    }

    fn count(&self, f: impl FnOnce(&ChannelMetrics)) {
        if let Some(m) = &self.metrics {
            f(m);
        }
    }

    /// Give up on the request in flight to `dest`; its reply may still arrive.
    fn abandon(&self, link: &mut Link, dest: DeviceId) {
        *link.abandoned.entry(dest).or_insert(0) += 1;
        let until = Instant::now() + self.options.timeout;
        link.late_until = Some(link.late_until.map_or(until, |t| t.max(until)));
        self.resync.store(true, Ordering::SeqCst);
    }

    fn drain(&self, link: &mut Link) -> Result<()> {
        let late_until = link.late_until.unwrap_or_else(Instant::now);
        let mut dropped = 0usize;
        while dropped < MAX_DRAIN {
            let awaiting = link.abandoned.values().any(|n| *n > 0);
            let wait = if awaiting {
                late_until.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            };
            match link.transport.recv(Some(wait)) {
                Ok(frame) => {
                    dropped += 1;
                    if let Some(n) = link.abandoned.get_mut(&frame.source) {
                        *n = n.saturating_sub(1);
                    }
                    debug!(source = %frame.source, len = frame.data.len(), "discarding stale frame");
                    self.count(|m| m.discarded_frames.inc());
                }
                Err(TransportError::Timeout) => break,
                Err(e) => return Err(e.into()),
            }
        }
        let lost: usize = link.abandoned.values().sum();
        if lost > 0 {
            debug!(lost, "late replies never arrived");
        }
        link.abandoned.clear();
        link.late_until = None;
        self.resync.store(false, Ordering::SeqCst);
        if dropped > 0 {
            debug!(dropped, "channel resynchronized");
        }
        Ok(())
    }

    /// Send `payload` to `dest` and return the data of its reply.
    ///
    /// A token cancelled while the request is still queued takes effect when the request
    /// reaches the front, before anything is written to the transport.
    pub fn exchange(
        &self,
        dest: DeviceId,
        payload: &[u8],
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        let _turn = self.acquire();
        let mut link = self.lock_link();
        self.exchange_in_turn(&mut link, dest, payload, cancel)
    }

    fn exchange_in_turn(
        &self,
        link: &mut Link,
        dest: DeviceId,
        payload: &[u8],
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(ControlError::Cancelled);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(ControlError::InvalidArgument(format!(
                "request of {} bytes exceeds the {MAX_PAYLOAD} byte frame limit",
                payload.len()
            )));
        }
        if self.needs_resync() {
            self.drain(link)?;
        }

        let host = self.options.host;
        link.transport
            .send(&Frame::request(host, dest, payload.to_vec()))?;
        self.count(|m| m.tx_frames.inc());
        debug!(dest = %dest, len = payload.len(), "request sent");

        let deadline = Instant::now() + self.options.timeout;
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                self.abandon(link, dest);
                debug!(dest = %dest, "request cancelled while awaiting reply");
                return Err(ControlError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.abandon(link, dest);
                self.count(|m| m.timeouts.inc());
                warn!(dest = %dest, timeout = ?self.options.timeout, "request timed out");
                return Err(ControlError::Timeout(self.options.timeout));
            }
            let wait = match cancel {
                Some(_) => remaining.min(self.options.poll_interval),
                None => remaining,
            };
            match link.transport.recv(Some(wait)) {
                Ok(frame) if frame.source == dest && frame.dest == host => {
                    self.count(|m| m.rx_frames.inc());
                    debug!(dest = %dest, len = frame.data.len(), "reply received");
                    return Ok(frame.data);
                }
                Ok(frame) => {
                    self.count(|m| m.discarded_frames.inc());
                    debug!(source = %frame.source, dest = %frame.dest, "discarding out-of-band frame");
                }
                Err(TransportError::Timeout) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Issue a console command and return the reply text.
    ///
    /// Unless `allow_any_response` is set, the reply must start with `OK`.
    pub fn send(&self, dest: DeviceId, text: &str, allow_any_response: bool) -> Result<String> {
        self.send_inner(dest, text, allow_any_response, None)
    }

    pub fn send_with_cancel(
        &self,
        dest: DeviceId,
        text: &str,
        allow_any_response: bool,
        cancel: &CancelToken,
    ) -> Result<String> {
        self.send_inner(dest, text, allow_any_response, Some(cancel))
    }

    fn send_inner(
        &self,
        dest: DeviceId,
        text: &str,
        allow_any_response: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<String> {
        let raw = self.exchange(dest, &text_payload(text), cancel)?;
        self.text_reply(text, raw, allow_any_response)
    }

    fn text_reply(&self, text: &str, raw: Vec<u8>, allow_any_response: bool) -> Result<String> {
        let reply = match String::from_utf8(raw) {
            Ok(s) => s,
            Err(e) => {
                self.count(|m| m.protocol_errors.inc());
                return Err(ControlError::protocol(
                    format!("non-text reply to `{text}`"),
                    e.as_bytes(),
                ));
            }
        };
        let reply = reply.trim_end_matches(['\r', '\n']).to_string();
        if allow_any_response {
            return Ok(reply);
        }
        if reply.starts_with("OK") {
            return Ok(reply);
        }
        self.count(|m| m.protocol_errors.inc());
        let message = match reply.strip_prefix("ERR") {
            Some(msg) => format!("device rejected `{text}`:{msg}"),
            None => format!("unexpected reply to `{text}`"),
        };
        Err(ControlError::protocol(message, reply.as_bytes()))
    }

    /// Query `registers` and decode the reply in request order.
    pub fn query(
        &self,
        dest: DeviceId,
        registers: &[(Register, Resolution)],
    ) -> Result<ResultFrame> {
        let payload = wire::encode_query(registers)?;
        let raw = self.exchange(dest, &payload, None)?;
        self.decode(&raw, registers)
    }

    /// Issue a console command and query `registers` in the same turn.
    ///
    /// When both do not fit one frame the command goes out first as plain text and must
    /// be acknowledged with `OK` before the query is sent.
    pub fn command_query(
        &self,
        dest: DeviceId,
        text: &str,
        registers: &[(Register, Resolution)],
    ) -> Result<ResultFrame> {
        let payload = wire::encode_command_query(text, registers)?;
        let _turn = self.acquire();
        let mut link = self.lock_link();
        let raw = if payload.len() <= MAX_PAYLOAD {
            self.exchange_in_turn(&mut link, dest, &payload, None)?
        } else {
            debug!(dest = %dest, len = payload.len(), "command and query split over two frames");
            let ack = self.exchange_in_turn(&mut link, dest, &text_payload(text), None)?;
            self.text_reply(text, ack, false)?;
            let query = wire::encode_query(registers)?;
            self.exchange_in_turn(&mut link, dest, &query, None)?
        };
        drop(link);
        self.decode(&raw, registers)
    }

    fn decode(&self, raw: &[u8], registers: &[(Register, Resolution)]) -> Result<ResultFrame> {
        wire::decode_reply(raw, registers).map_err(|e| {
            self.count(|m| m.protocol_errors.inc());
            e
        })
    }
}
