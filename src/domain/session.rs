//! The peripheral control session.
//!
//! One actor task owns the attribute store, the debounced writer, and the
//! transport. Everything that can mutate session state arrives as a tagged
//! message on a single channel: driver commands, transport completions, and
//! debounce firings. Debounce timers run on the tokio timer wheel, but their
//! firings are marshalled back onto this channel before touching anything,
//! so no locking is needed anywhere in the session.
//!
//! The connect sequence is scan -> connect -> discover -> initial reads ->
//! ready. The four initial reads are issued concurrently; `Ready` is entered
//! only once all four have completed. There is no timeout or retry policy:
//! transport errors are reported to the driver and the current operation is
//! abandoned.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::debounce::DebouncedWriter;
use crate::domain::models::{
    Attribute, AttributeRequest, AttributeValue, OutOfRange, SessionEvent, SessionState,
};
use crate::domain::store::AttributeStore;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    Transport, TransportError, TransportEvent, TransportEventSender,
};

/// How a local change to one attribute is propagated to the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Write on every change, no coalescing. Suits discrete controls.
    Immediate,
    /// Write only after the control has been quiet for the given delay.
    Debounced(Duration),
    /// Write on every change and send one confirming write after the
    /// quiet period, so the peripheral always ends on the final value
    /// even if an intermediate write was dropped by the link.
    ImmediateThenConfirm(Duration),
}

/// Per-attribute write policies.
///
/// The defaults mirror the shipped controller app: sliders (brightness,
/// delay) confirm after 250 ms, the color picker is debounce-only at 50 ms,
/// and the animation picker writes immediately.
#[derive(Debug, Clone, Copy)]
pub struct WritePolicies {
    pub brightness: WritePolicy,
    pub animation: WritePolicy,
    pub delay_time: WritePolicy,
    pub color: WritePolicy,
}

impl WritePolicies {
    pub fn for_attribute(&self, attribute: Attribute) -> WritePolicy {
        match attribute {
            Attribute::Brightness => self.brightness,
            Attribute::Animation => self.animation,
            Attribute::DelayTime => self.delay_time,
            Attribute::Color => self.color,
        }
    }
}

impl Default for WritePolicies {
    fn default() -> Self {
        Self {
            brightness: WritePolicy::ImmediateThenConfirm(Duration::from_millis(250)),
            animation: WritePolicy::Immediate,
            delay_time: WritePolicy::ImmediateThenConfirm(Duration::from_millis(250)),
            color: WritePolicy::Debounced(Duration::from_millis(50)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub policies: WritePolicies,
}

/// Driver-originated commands.
#[derive(Debug)]
pub enum SessionCommand {
    /// Start scanning and run the connect sequence to `Ready`.
    Connect,
    /// Apply an already-validated value locally and propagate it.
    Set(AttributeValue),
    /// Re-emit the current state and all known attribute values.
    Report,
    Disconnect,
    Shutdown,
}

/// Everything the session task consumes, in arrival order.
#[derive(Debug)]
pub(crate) enum SessionMessage {
    Command(SessionCommand),
    Transport(TransportEvent),
    /// A debounce timer for this attribute has fired. The generation tags
    /// the firing so a stale one (timer replaced after firing but before
    /// this message was consumed) can be recognized and dropped.
    WriteDue { attribute: Attribute, generation: u64 },
}

/// Cheap, cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl SessionHandle {
    pub fn connect(&self) {
        self.send(SessionCommand::Connect);
    }

    /// Validate a requested change and hand it to the session. Range
    /// errors are reported here, before anything reaches the transport.
    pub fn set(&self, request: AttributeRequest) -> Result<(), OutOfRange> {
        let value = request.validate()?;
        self.send(SessionCommand::Set(value));
        Ok(())
    }

    pub fn report(&self) {
        self.send(SessionCommand::Report);
    }

    pub fn disconnect(&self) {
        self.send(SessionCommand::Disconnect);
    }

    pub fn shutdown(&self) {
        self.send(SessionCommand::Shutdown);
    }

    fn send(&self, command: SessionCommand) {
        // A closed channel means the session task is gone; the driver
        // notices through its event stream.
        let _ = self.tx.send(SessionMessage::Command(command));
    }
}

pub struct Session {
    state: SessionState,
    /// Link is up. Set on reaching `Ready`, cleared on link loss.
    connected: bool,
    /// The peripheral has been fully brought up at least once this run.
    bonded: bool,
    store: AttributeStore,
    debouncer: DebouncedWriter,
    transport: Box<dyn Transport>,
    pending_reads: HashSet<Attribute>,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl Session {
    /// Spawn the session actor. The transport is built from the event
    /// sender it must post completions on; the returned receiver carries
    /// session notifications for the driver.
    pub fn spawn<T, F>(
        config: SessionConfig,
        make_transport: F,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)
    where
        T: Transport + 'static,
        F: FnOnce(TransportEventSender) -> T,
    {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Transport completions are marshalled onto the single session
        // channel so they interleave with commands in arrival order.
        let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
        let forward = msg_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                if forward.send(SessionMessage::Transport(event)).is_err() {
                    break;
                }
            }
        });

        let transport = Box::new(make_transport(transport_tx));

        let mut store = AttributeStore::new();
        let notify = event_tx.clone();
        store.subscribe(move |value| {
            let _ = notify.send(SessionEvent::AttributeChanged(value));
        });

        let session = Session {
            state: SessionState::Idle,
            connected: false,
            bonded: false,
            store,
            debouncer: DebouncedWriter::new(msg_tx.clone()),
            transport,
            pending_reads: HashSet::new(),
            config,
            events: event_tx,
            rx: msg_rx,
        };
        tokio::spawn(session.run());

        (SessionHandle { tx: msg_tx }, event_rx)
    }

    async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            if let SessionMessage::Command(SessionCommand::Shutdown) = message {
                info!("session shutting down");
                self.teardown().await;
                break;
            }
            self.handle(message).await;
        }
    }

    async fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Command(command) => self.handle_command(command).await,
            SessionMessage::Transport(event) => self.handle_transport(event).await,
            SessionMessage::WriteDue {
                attribute,
                generation,
            } => {
                if !self.debouncer.acknowledge(attribute, generation) {
                    debug!(%attribute, generation, "stale debounce firing dropped");
                } else if self.state == SessionState::Ready {
                    self.write_current(attribute).await;
                } else {
                    debug!(%attribute, "debounce fired outside ready state, dropped");
                }
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => {
                if self.state != SessionState::Idle {
                    warn!(state = %self.state, "connect ignored, session not idle");
                    return;
                }
                match self.transport.start_scan().await {
                    Ok(()) => self.set_state(SessionState::Scanning),
                    Err(error) => self.report_failure(error),
                }
            }
            SessionCommand::Set(value) => {
                self.store.apply(value);
                if self.state == SessionState::Ready {
                    self.propagate(value.attribute()).await;
                } else {
                    debug!(%value, "stored locally, no active connection");
                }
            }
            SessionCommand::Report => {
                debug!(
                    state = %self.state,
                    connected = self.connected,
                    bonded = self.bonded,
                    "status report"
                );
                let _ = self.events.send(SessionEvent::StateChanged(self.state));
                for attribute in Attribute::ALL {
                    if let Some(value) = self.store.get(attribute) {
                        let _ = self.events.send(SessionEvent::AttributeChanged(value));
                    }
                }
            }
            SessionCommand::Disconnect => {
                self.teardown().await;
                if self.state != SessionState::Idle {
                    self.set_state(SessionState::Idle);
                }
            }
            SessionCommand::Shutdown => {
                // Handled in run(); unreachable here.
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeripheralDiscovered(peripheral) => {
                if self.state != SessionState::Scanning {
                    debug!(%peripheral, "peripheral ignored outside scanning state");
                    return;
                }
                info!(%peripheral, "peripheral discovered");
                if let Err(error) = self.transport.stop_scan().await {
                    warn!(%error, "failed to stop scan cleanly");
                }
                match self.transport.connect(&peripheral).await {
                    Ok(()) => self.set_state(SessionState::Connecting),
                    Err(error) => self.report_failure(error),
                }
            }
            TransportEvent::Connected => {
                if self.state != SessionState::Connecting {
                    debug!(state = %self.state, "unexpected connected event");
                    return;
                }
                match self.transport.discover_attributes().await {
                    Ok(()) => self.set_state(SessionState::DiscoveringServices),
                    Err(error) => self.report_failure(error),
                }
            }
            TransportEvent::AttributesDiscovered => {
                if self.state != SessionState::DiscoveringServices {
                    debug!(state = %self.state, "unexpected discovery event");
                    return;
                }
                // All four initial reads go out at once; Ready is gated on
                // every one of them completing.
                self.pending_reads = Attribute::ALL.into_iter().collect();
                self.set_state(SessionState::ReadingInitial);
                for attribute in Attribute::ALL {
                    if let Err(error) = self.transport.read_attribute(attribute).await {
                        self.report_failure(error);
                    }
                }
            }
            TransportEvent::ReadCompleted { attribute, bytes } => {
                match protocol::decode(attribute, &bytes) {
                    Ok(value) => {
                        self.store.apply(value);
                        if self.state == SessionState::ReadingInitial {
                            self.pending_reads.remove(&attribute);
                            if self.pending_reads.is_empty() {
                                self.connected = true;
                                self.bonded = true;
                                self.set_state(SessionState::Ready);
                            }
                        }
                    }
                    Err(error) => {
                        error!(%attribute, %error, "discarding undecodable read");
                        self.report_failure(TransportError::ReadFailed(attribute));
                    }
                }
            }
            TransportEvent::WriteCompleted { attribute } => {
                // Purely observational, mirrors the write-confirmation log
                // of the original app.
                if let Some(value) = self.store.get(attribute) {
                    info!(%value, "write confirmed");
                }
            }
            TransportEvent::Disconnected => {
                info!("link lost");
                self.connected = false;
                self.pending_reads.clear();
                self.debouncer.cancel_all();
                // Distinct from the Idle a commanded disconnect produces:
                // only real link loss should trigger a driver rescan.
                let _ = self.events.send(SessionEvent::LinkLost);
                if self.state != SessionState::Idle {
                    self.set_state(SessionState::Idle);
                }
            }
            TransportEvent::Failed(error) => {
                self.report_failure(error);
            }
        }
    }

    /// Push a locally changed attribute to the peripheral according to its
    /// write policy.
    async fn propagate(&mut self, attribute: Attribute) {
        match self.config.policies.for_attribute(attribute) {
            WritePolicy::Immediate => {
                self.write_current(attribute).await;
            }
            WritePolicy::Debounced(delay) => {
                self.debouncer.schedule(attribute, delay);
            }
            WritePolicy::ImmediateThenConfirm(delay) => {
                self.write_current(attribute).await;
                self.debouncer.schedule(attribute, delay);
            }
        }
    }

    /// Write the store's *current* value for the attribute. Called both
    /// for immediate writes and when a debounce timer fires, so a burst of
    /// changes always ends with the latest value on the wire.
    async fn write_current(&mut self, attribute: Attribute) {
        let Some(value) = self.store.get(attribute) else {
            debug!(%attribute, "no value to write");
            return;
        };
        let payload = protocol::encode(&value);
        if let Err(error) = self.transport.write_attribute(attribute, &payload).await {
            self.report_failure(error);
        }
    }

    async fn teardown(&mut self) {
        self.debouncer.cancel_all();
        self.pending_reads.clear();
        self.transport.disconnect().await;
        self.connected = false;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "session state change");
        self.state = state;
        let _ = self.events.send(SessionEvent::StateChanged(state));
    }

    fn report_failure(&self, error: TransportError) {
        error!(%error, "transport operation failed");
        let _ = self.events.send(SessionEvent::Failed(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AnimationMode;
    use crate::infrastructure::bluetooth::mock::{MockTransport, RecordedWrite};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    struct Harness {
        handle: SessionHandle,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        writes: Arc<Mutex<Vec<RecordedWrite>>>,
        transport_events: TransportEventSender,
    }

    fn spawn_session(config: SessionConfig, auto_reads: bool) -> Harness {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let injector: Arc<Mutex<Option<TransportEventSender>>> = Arc::new(Mutex::new(None));

        let (handle, events) = Session::spawn(config, {
            let writes = writes.clone();
            let injector = injector.clone();
            move |tx| {
                injector.lock().unwrap().replace(tx.clone());
                MockTransport::new(tx)
                    .recording_to(writes)
                    .auto_reads(auto_reads)
            }
        });

        let transport_events = injector
            .lock()
            .unwrap()
            .take()
            .expect("transport factory not invoked");
        Harness {
            handle,
            events,
            writes,
            transport_events,
        }
    }

    /// Drive the event stream until the session reports the given state,
    /// returning every event seen along the way.
    async fn events_until_state(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        target: SessionState,
    ) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event, SessionEvent::StateChanged(s) if s == target);
            seen.push(event);
            if done {
                return seen;
            }
        }
        panic!("event stream ended before state {target}");
    }

    fn recorded(writes: &Arc<Mutex<Vec<RecordedWrite>>>) -> Vec<RecordedWrite> {
        writes.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_sequence_reaches_ready_after_all_four_reads() {
        let mut h = spawn_session(SessionConfig::default(), true);
        h.handle.connect();

        let seen = events_until_state(&mut h.events, SessionState::Ready).await;

        let states: Vec<SessionState> = seen
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Scanning,
                SessionState::Connecting,
                SessionState::DiscoveringServices,
                SessionState::ReadingInitial,
                SessionState::Ready,
            ]
        );

        let changed: HashSet<Attribute> = seen
            .iter()
            .filter_map(|e| match e {
                SessionEvent::AttributeChanged(v) => Some(v.attribute()),
                _ => None,
            })
            .collect();
        assert_eq!(changed.len(), 4, "all four initial reads surfaced");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_before_reads_complete_returns_to_idle_not_ready() {
        let mut h = spawn_session(SessionConfig::default(), false);
        h.handle.connect();

        events_until_state(&mut h.events, SessionState::ReadingInitial).await;
        h.transport_events.send(TransportEvent::Disconnected).unwrap();

        let seen = events_until_state(&mut h.events, SessionState::Idle).await;
        assert!(
            !seen
                .iter()
                .any(|e| matches!(e, SessionEvent::StateChanged(SessionState::Ready))),
            "session must never report ready with reads outstanding"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_burst_produces_one_write_with_the_latest_value() {
        let config = SessionConfig {
            policies: WritePolicies {
                brightness: WritePolicy::Debounced(Duration::from_millis(250)),
                ..WritePolicies::default()
            },
        };
        let mut h = spawn_session(config, true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;
        h.writes.lock().unwrap().clear();

        let burst_start = Instant::now();
        h.handle.set(AttributeRequest::Brightness(10)).unwrap();
        h.handle.set(AttributeRequest::Brightness(200)).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        let writes = recorded(&h.writes);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].attribute, Attribute::Brightness);
        assert_eq!(writes[0].payload, vec![200]);
        assert!(
            writes[0].at.duration_since(burst_start) >= Duration::from_millis(250),
            "write must not reach the transport before the quiet period"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_then_confirm_writes_twice() {
        let mut h = spawn_session(SessionConfig::default(), true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;
        h.writes.lock().unwrap().clear();

        let set_at = Instant::now();
        h.handle.set(AttributeRequest::Brightness(200)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let writes = recorded(&h.writes);
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.payload == vec![200]));
        assert!(writes[0].at.duration_since(set_at) < Duration::from_millis(250));
        assert!(writes[1].at.duration_since(set_at) >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn different_attributes_debounce_independently() {
        let config = SessionConfig {
            policies: WritePolicies {
                brightness: WritePolicy::Debounced(Duration::from_millis(250)),
                color: WritePolicy::Debounced(Duration::from_millis(50)),
                ..WritePolicies::default()
            },
        };
        let mut h = spawn_session(config, true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;
        h.writes.lock().unwrap().clear();

        h.handle.set(AttributeRequest::Brightness(42)).unwrap();
        h.handle
            .set(AttributeRequest::Color {
                hue: 1,
                saturation: 2,
                value: 3,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        let writes = recorded(&h.writes);
        assert_eq!(writes.len(), 2);
        // The shorter color timer fires first even though it was armed last.
        assert_eq!(writes[0].attribute, Attribute::Color);
        assert_eq!(writes[0].payload, vec![1, 2, 3]);
        assert_eq!(writes[1].attribute, Attribute::Brightness);
        assert_eq!(writes[1].payload, vec![42]);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_drops_pending_writes_unflushed() {
        let config = SessionConfig {
            policies: WritePolicies {
                brightness: WritePolicy::Debounced(Duration::from_millis(250)),
                ..WritePolicies::default()
            },
        };
        let mut h = spawn_session(config, true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;
        h.writes.lock().unwrap().clear();

        h.handle.set(AttributeRequest::Brightness(99)).unwrap();
        h.transport_events.send(TransportEvent::Disconnected).unwrap();
        events_until_state(&mut h.events, SessionState::Idle).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(recorded(&h.writes).is_empty(), "pending write must be dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_policy_writes_without_delay() {
        let mut h = spawn_session(SessionConfig::default(), true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;
        h.writes.lock().unwrap().clear();

        h.handle.set(AttributeRequest::Animation(3)).unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let writes = recorded(&h.writes);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].attribute, Attribute::Animation);
        assert_eq!(
            writes[0].payload,
            vec![AnimationMode::Fade.ordinal()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_set_is_rejected_before_the_session_sees_it() {
        let mut h = spawn_session(SessionConfig::default(), true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;
        h.writes.lock().unwrap().clear();

        let err = h.handle.set(AttributeRequest::DelayTime(0)).unwrap_err();
        assert_eq!(err.attribute, Attribute::DelayTime);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(recorded(&h.writes).is_empty());
        assert!(
            h.events.try_recv().is_err(),
            "a rejected set must not produce events"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_is_reported_distinctly_from_idle() {
        let mut h = spawn_session(SessionConfig::default(), true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;

        h.transport_events.send(TransportEvent::Disconnected).unwrap();
        let seen = events_until_state(&mut h.events, SessionState::Idle).await;
        assert!(
            seen.iter().any(|e| matches!(e, SessionEvent::LinkLost)),
            "transport-reported link loss must surface as LinkLost"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn commanded_disconnect_does_not_report_link_loss() {
        let mut h = spawn_session(SessionConfig::default(), true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;

        h.handle.disconnect();
        let seen = events_until_state(&mut h.events, SessionState::Idle).await;
        assert!(
            !seen.iter().any(|e| matches!(e, SessionEvent::LinkLost)),
            "a commanded disconnect is not link loss"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn values_stay_frozen_after_link_loss() {
        let mut h = spawn_session(SessionConfig::default(), true);
        h.handle.connect();
        events_until_state(&mut h.events, SessionState::Ready).await;

        h.transport_events.send(TransportEvent::Disconnected).unwrap();
        events_until_state(&mut h.events, SessionState::Idle).await;

        // Report still shows the last-known values from the initial reads.
        h.handle.report();
        let mut reported = 0;
        // StateChanged(Idle) first, then one AttributeChanged per attribute.
        for _ in 0..5 {
            match h.events.recv().await {
                Some(SessionEvent::AttributeChanged(_)) => reported += 1,
                Some(_) => {}
                None => break,
            }
        }
        assert_eq!(reported, 4);
    }
}
