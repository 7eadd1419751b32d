use crate::bus::pending::{PendingRequests, Resolution, Resolver};
use crate::bus::{BroadcastReport, BusSettings, BusStatistics, Handler, SubscriptionId};
use crate::codec::Codec;
use crate::error::bus::BusError;
use crate::error::spawn::SpawnError;
use crate::error::transport::TransportError;
use crate::health::{HealthTracker, LinkState, ProcessStatus, WorkerStatus};
use crate::message::{Envelope, MessageBody, MessageKind};
use crate::queue::{EnqueueOutcome, FlushReport, OfflineQueue};
use crate::retry::RetryDecision;
use crate::state::{AppState, DataChannel};
use crate::supervisor::{ProcessExit, ProcessHandle, Supervisor};
use crate::transport::{Channel, ChannelId, TransportEvent};
use crate::ui::UiEvent;
use crate::worker::WorkerIdentity;

use common::ErrorLocation;

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, Location, catch_unwind};
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, error, info, trace, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep as TokioSleep;

pub(crate) enum BusCommand {
    Send {
        target: WorkerIdentity,
        message: Envelope,
        reply: oneshot::Sender<bool>,
    },
    Request {
        target: WorkerIdentity,
        message: Envelope,
        timeout: Duration,
        reply: Resolver,
    },
    Broadcast {
        message: Envelope,
        reply: oneshot::Sender<BroadcastReport>,
    },
    Subscribe {
        kind: MessageKind,
        handler: Handler,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    SpawnWorkers {
        reply: oneshot::Sender<Result<(), SpawnError>>,
    },
    Status {
        reply: oneshot::Sender<Vec<WorkerStatus>>,
    },
    Statistics {
        reply: oneshot::Sender<BusStatistics>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Timer expiries fed back into the actor.
#[derive(Debug, Clone, Copy)]
enum Timer {
    RequestExpired(u64),
    RestartDue(WorkerIdentity),
    /// Reconnect window for one launch of a worker.
    ReconnectDue {
        identity: WorkerIdentity,
        generation: u64,
    },
    /// The writer of `channel` has room for queued messages again.
    FlushDue {
        identity: WorkerIdentity,
        channel: ChannelId,
    },
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

fn transmit(
    health: &HealthTracker,
    codec: &Codec,
    target: WorkerIdentity,
    message: &Envelope,
) -> Result<(), TransportError> {
    let channel = health
        .channel(target)
        .ok_or_else(|| TransportError::NotConnected {
            worker: target,
            location: ErrorLocation::from(Location::caller()),
        })?;

    let bytes = codec
        .encode(message)
        .map_err(|e| TransportError::WriteFailed {
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

    channel.send(bytes)
}

pub(crate) struct BusActor {
    codec: Codec,
    health: HealthTracker,
    queue: OfflineQueue,
    /// Channels with a flush parked until their writer drains.
    flush_waiting: BTreeSet<(WorkerIdentity, ChannelId)>,
    pending: PendingRequests,
    subscribers: BTreeMap<MessageKind, Vec<(SubscriptionId, Handler)>>,
    next_subscription: SubscriptionId,
    supervisor: Supervisor,
    state: AppState,
    ui: broadcast::Sender<UiEvent>,
    links: watch::Sender<BTreeMap<WorkerIdentity, LinkState>>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    timer_rx: Option<mpsc::UnboundedReceiver<Timer>>,
    endpoint_tasks: Vec<JoinHandle<()>>,
    shutting_down: bool,
}

impl BusActor {
    pub(crate) fn new(
        settings: BusSettings,
        codec: Codec,
        supervisor: Supervisor,
        state: AppState,
        ui: broadcast::Sender<UiEvent>,
        links: watch::Sender<BTreeMap<WorkerIdentity, LinkState>>,
        endpoint_tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            codec,
            health: HealthTracker::new(settings.max_retries, settings.retry_delay),
            queue: OfflineQueue::new(settings.queue_capacity, settings.overflow),
            flush_waiting: BTreeSet::new(),
            pending: PendingRequests::new(),
            subscribers: BTreeMap::new(),
            next_subscription: 1,
            supervisor,
            state,
            ui,
            links,
            timer_tx,
            timer_rx: Some(timer_rx),
            endpoint_tasks,
            shutting_down: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<BusCommand>,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
        mut exits: mpsc::UnboundedReceiver<ProcessExit>,
    ) {
        let Some(mut timers) = self.timer_rx.take() else {
            error!("Bus actor started twice");
            return;
        };

        debug!("Bus actor running");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await == Flow::Stop {
                            break;
                        }
                    }
                    None => {
                        info!("All bus handles dropped, shutting down");
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = transport.recv() => self.handle_transport(event).await,
                Some(exit) = exits.recv() => self.handle_exit(exit),
                Some(timer) = timers.recv() => self.handle_timer(timer),
            }
        }

        debug!("Bus actor stopped");
    }

    // ---------------------------------------------------------------------
    // commands
    // ---------------------------------------------------------------------

    async fn handle_command(&mut self, command: BusCommand) -> Flow {
        match command {
            BusCommand::Send {
                target,
                message,
                reply,
            } => {
                let sent = self.send(target, message);
                let _ = reply.send(sent);
            }
            BusCommand::Request {
                target,
                message,
                timeout,
                reply,
            } => self.start_request(target, message, timeout, reply),
            BusCommand::Broadcast { message, reply } => {
                let report = self.broadcast(message);
                let _ = reply.send(report);
            }
            BusCommand::Subscribe {
                kind,
                handler,
                reply,
            } => {
                let id = self.next_subscription;
                self.next_subscription += 1;
                self.subscribers.entry(kind).or_default().push((id, handler));
                debug!("Subscription {id} registered for {kind}");
                let _ = reply.send(id);
            }
            BusCommand::Unsubscribe { id, reply } => {
                let mut removed = false;
                for handlers in self.subscribers.values_mut() {
                    let before = handlers.len();
                    handlers.retain(|(sub, _)| *sub != id);
                    removed |= handlers.len() != before;
                }
                let _ = reply.send(removed);
            }
            BusCommand::SpawnWorkers { reply } => {
                let result = self.spawn_workers();
                let _ = reply.send(result);
            }
            BusCommand::Status { reply } => {
                let _ = reply.send(self.health.snapshot());
            }
            BusCommand::Statistics { reply } => {
                let _ = reply.send(self.statistics());
            }
            BusCommand::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn send(&mut self, target: WorkerIdentity, message: Envelope) -> bool {
        match self.transmit_in_order(target, &message) {
            Ok(()) => {
                trace!("Sent {} to {target}", message.kind());
                true
            }
            Err(e) => {
                debug!("Send of {} to {target} deferred: {e}", message.kind());
                if let EnqueueOutcome::Rejected = self.queue.enqueue(target, message) {
                    error!("Message for {target} dropped: offline queue full");
                    return false;
                }
                self.flush_queue(target).remaining == 0
            }
        }
    }

    /// Write `message` now unless earlier messages for `target` are still queued.
    fn transmit_in_order(
        &mut self,
        target: WorkerIdentity,
        message: &Envelope,
    ) -> Result<(), TransportError> {
        if self.queue.len(target) > 0 {
            self.flush_queue(target);
        }

        match self.queue.len(target) {
            0 => transmit(&self.health, &self.codec, target, message),
            backlog => Err(TransportError::WriteFailed {
                message: format!("{backlog} earlier messages for {target} are still queued"),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    /// Drain `target`'s offline queue into its channel, oldest first.
    ///
    /// If the writer fills up part way, the rest goes out once it has room.
    fn flush_queue(&mut self, target: WorkerIdentity) -> FlushReport {
        let Some(channel) = self.health.channel(target) else {
            return FlushReport {
                sent: 0,
                remaining: self.queue.len(target),
            };
        };

        let codec = &self.codec;
        let report = self.queue.flush(target, |message| match codec.encode(message) {
            Ok(bytes) => channel.send(bytes),
            Err(e) => {
                error!("Dropping queued {} for {target}: {e}", message.kind());
                Ok(())
            }
        });

        if report.remaining > 0
            && channel.is_open()
            && self.flush_waiting.insert((target, channel.id()))
        {
            let writable = channel.writable();
            let channel_id = channel.id();
            let tx = self.timer_tx.clone();
            tokio::spawn(async move {
                writable.await;
                let _ = tx.send(Timer::FlushDue {
                    identity: target,
                    channel: channel_id,
                });
            });
        }

        report
    }

    fn start_request(
        &mut self,
        target: WorkerIdentity,
        message: Envelope,
        timeout: Duration,
        reply: Resolver,
    ) {
        let id = self.pending.next_id();
        let message = message.with_request_id(id);

        if let Err(e) = self.transmit_in_order(target, &message) {
            warn!("Request {id} ({}) to {target} not sent: {e}", message.kind());
            let _ = reply.send(Err(BusError::SendFailed {
                worker: target,
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
            }));
            return;
        }

        debug!("Request {id} ({}) sent to {target}", message.kind());
        self.pending.insert(id, target, timeout, reply);
        self.schedule(timeout, Timer::RequestExpired(id));
    }

    fn broadcast(&mut self, message: Envelope) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for target in WorkerIdentity::ALL {
            let delivered = match self.transmit_in_order(target, &message) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Broadcast of {} to {target} failed: {e}", message.kind());
                    false
                }
            };
            report.delivered.insert(target, delivered);
        }
        self.emit(UiEvent::Broadcast { message });
        report
    }

    fn spawn_workers(&mut self) -> Result<(), SpawnError> {
        for identity in WorkerIdentity::ALL {
            let handle = self.supervisor.spawn(identity)?;
            let state = self.health.state_mut(identity);
            state.process = Some(handle);
            state.process_status = ProcessStatus::Running;
        }
        Ok(())
    }

    fn statistics(&self) -> BusStatistics {
        let queued: BTreeMap<WorkerIdentity, usize> = WorkerIdentity::ALL
            .iter()
            .map(|id| (*id, self.queue.len(*id)))
            .collect();
        BusStatistics {
            total_queued: self.queue.total_len(),
            queued,
            subscribers: self.subscribers.values().map(Vec::len).sum(),
            last_request_id: self.pending.last_id(),
            in_flight: self.pending.len(),
        }
    }

    async fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("Shutting down message bus");

        let cancelled = self.pending.cancel_all(|_| BusError::Shutdown {
            location: ErrorLocation::from(Location::caller()),
        });
        if cancelled > 0 {
            info!("Cancelled {cancelled} in-flight requests");
        }

        for task in self.endpoint_tasks.drain(..) {
            task.abort();
        }

        let mut processes: Vec<ProcessHandle> = Vec::new();
        for identity in WorkerIdentity::ALL {
            if let Some(channel) = self.health.drop_channel(identity) {
                channel.close();
            }
            self.supervisor.retire(identity);

            let state = self.health.state_mut(identity);
            if let Some(handle) = state.process.take() {
                processes.push(handle);
            }
            state.process_status = ProcessStatus::Stopped;
            self.publish_link(identity);
        }

        join_all(processes.into_iter().map(ProcessHandle::terminate)).await;

        let dropped = self.queue.total_len();
        if dropped > 0 {
            warn!("{dropped} queued messages discarded at shutdown");
        }
        info!("Message bus stopped");
    }

    // ---------------------------------------------------------------------
    // transport
    // ---------------------------------------------------------------------

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened(channel) => self.channel_opened(channel),
            TransportEvent::Frame {
                identity,
                channel,
                bytes,
            } => self.frame(identity, channel, &bytes).await,
            TransportEvent::Closed { identity, channel } => self.channel_closed(identity, channel),
        }
    }

    fn channel_opened(&mut self, channel: Channel) {
        let identity = channel.identity();

        if self.shutting_down {
            channel.close();
            return;
        }

        if let Some(previous) = self.health.connect(channel) {
            info!(
                "New {identity} connection supersedes channel {}",
                previous.id()
            );
            previous.close();
        }

        self.publish_link(identity);
        self.emit(UiEvent::HealthChanged {
            worker: identity,
            link: LinkState::Connected,
            retry_count: 0,
        });

        let report = self.flush_queue(identity);
        if report.sent > 0 || report.remaining > 0 {
            info!(
                "Flushed {} queued messages to {identity} ({} remaining)",
                report.sent, report.remaining
            );
        }
    }

    async fn frame(&mut self, identity: WorkerIdentity, channel: ChannelId, bytes: &[u8]) {
        if !self.health.is_current(identity, channel) {
            debug!("Ignoring frame from superseded {identity} channel {channel}");
            return;
        }
        self.health.touch(identity);

        let envelope = match self.codec.decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Discarding frame from {identity}: {e}");
                return;
            }
        };

        let kind = envelope.kind();
        trace!("Received {kind} from {identity}");

        if let Some(request_id) = envelope.request_id {
            match self.pending.resolve(request_id, identity, envelope) {
                Resolution::Delivered => debug!("Request {request_id} answered by {identity}"),
                Resolution::Unknown => {
                    info!("Discarding late or unknown {kind} reply {request_id} from {identity}")
                }
                Resolution::WrongWorker { expected } => warn!(
                    "Discarding {kind} reply {request_id} from {identity}; it was sent to {expected}"
                ),
            }
            return;
        }

        if let MessageBody::Hello { .. } = envelope.body {
            debug!("Ignoring repeated HELLO from {identity}");
            return;
        }

        self.dispatch(identity, envelope).await;
    }

    async fn dispatch(&mut self, from: WorkerIdentity, envelope: Envelope) {
        if let Some(snapshot) = self.state.apply(&envelope).await {
            let event = match DataChannel::from(from) {
                DataChannel::Core => UiEvent::CoreData { snapshot },
                DataChannel::Ai => UiEvent::AiData { snapshot },
            };
            self.emit(event);
        }

        let kind = envelope.kind();
        let Some(handlers) = self.subscribers.get(&kind) else {
            return;
        };

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(from, &envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Subscriber {id} failed on {kind}: {e}"),
                Err(_) => error!("Subscriber {id} panicked on {kind}"),
            }
        }
    }

    fn channel_closed(&mut self, identity: WorkerIdentity, channel: ChannelId) {
        if !self.health.disconnect(identity, channel) {
            debug!("Superseded {identity} channel {channel} closed");
            return;
        }

        self.publish_link(identity);
        self.emit(UiEvent::HealthChanged {
            worker: identity,
            link: LinkState::Disconnected,
            retry_count: self.health.state(identity).retry_count(),
        });

        if self.shutting_down {
            return;
        }

        if self.health.state(identity).process_status == ProcessStatus::Running {
            self.reconnect_failed(identity);
        }
    }

    // ---------------------------------------------------------------------
    // process lifecycle
    // ---------------------------------------------------------------------

    fn handle_exit(&mut self, exit: ProcessExit) {
        let identity = exit.identity;

        if !self.supervisor.is_current(&exit) {
            debug!(
                "Ignoring exit of superseded {identity} generation {}",
                exit.generation
            );
            return;
        }
        self.supervisor.retire(identity);

        if self.shutting_down {
            return;
        }

        let state = self.health.state_mut(identity);
        state.process = None;

        if exit.is_clean() {
            info!("{identity} exited cleanly; not restarting");
            state.process_status = ProcessStatus::Stopped;
            return;
        }

        warn!("{identity} crashed (exit code {:?})", exit.code);
        self.crashed(identity, exit.code);
    }

    /// Apply the restart policy after `identity` died.
    fn crashed(&mut self, identity: WorkerIdentity, exit_code: Option<i32>) {
        if let Some(channel) = self.health.drop_channel(identity) {
            channel.close();
        }
        self.publish_link(identity);

        let cancelled = self.pending.cancel_for(identity, |entry| BusError::WorkerRestarting {
            worker: identity,
            request_id: entry.id,
            location: ErrorLocation::from(Location::caller()),
        });
        if cancelled > 0 {
            info!("Cancelled {cancelled} requests to crashed {identity}");
        }

        let state = self.health.state_mut(identity);
        let decision = state.restart_budget.record_failure();
        let retry_count = state.restart_budget.count();
        let max_retries = state.restart_budget.max_retries();
        state.process_status = match decision {
            RetryDecision::RetryAfter { .. } => ProcessStatus::Restarting,
            RetryDecision::Exhausted { .. } => ProcessStatus::Failed,
        };

        self.emit(UiEvent::ComponentCrashed {
            worker: identity,
            exit_code,
            retry_count,
        });

        match decision {
            RetryDecision::RetryAfter { attempt, delay } => {
                warn!("Restarting {identity} in {delay:?} (attempt {attempt}/{max_retries})");
                self.schedule(delay, Timer::RestartDue(identity));
            }
            RetryDecision::Exhausted { failures } => {
                let err = BusError::MaxRetriesExceeded {
                    worker: identity,
                    retries: failures,
                    location: ErrorLocation::from(Location::caller()),
                };
                error!("Giving up on {identity}: {err}");
                self.emit(UiEvent::Fatal {
                    worker: Some(identity),
                    category: err.error_category().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    fn restart(&mut self, identity: WorkerIdentity) {
        if self.shutting_down {
            return;
        }

        let state = self.health.state_mut(identity);
        if state.process_status != ProcessStatus::Restarting {
            debug!("Restart of {identity} no longer needed");
            return;
        }
        if let Some(mut stale) = state.process.take() {
            stale.kill();
        }
        self.supervisor.retire(identity);

        match self.supervisor.spawn(identity) {
            Ok(handle) => {
                let state = self.health.state_mut(identity);
                state.process = Some(handle);
                state.process_status = ProcessStatus::Running;
            }
            Err(e) => {
                error!("Restart of {identity} failed: {e}");
                self.crashed(identity, None);
            }
        }
    }

    /// Count one missed reconnect window; escalate to a restart when exhausted.
    fn reconnect_failed(&mut self, identity: WorkerIdentity) {
        let decision = self
            .health
            .state_mut(identity)
            .reconnect_budget
            .record_failure();

        match decision {
            RetryDecision::RetryAfter { attempt, delay } => {
                let Some(generation) = self
                    .health
                    .state(identity)
                    .process
                    .as_ref()
                    .map(ProcessHandle::generation)
                else {
                    debug!("{identity} has no live process; not waiting for a reconnect");
                    return;
                };
                info!("Waiting {delay:?} for {identity} to reconnect (attempt {attempt})");
                self.schedule(
                    delay,
                    Timer::ReconnectDue {
                        identity,
                        generation,
                    },
                );
            }
            RetryDecision::Exhausted { failures } => {
                warn!("{identity} did not reconnect after {failures} attempts; restarting it");
                let state = self.health.state_mut(identity);
                if let Some(mut handle) = state.process.take() {
                    handle.kill();
                }
                state.reconnect_budget.reset();
                self.supervisor.retire(identity);
                self.crashed(identity, None);
            }
        }
    }

    // ---------------------------------------------------------------------
    // timers
    // ---------------------------------------------------------------------

    fn schedule(&self, delay: Duration, timer: Timer) {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            TokioSleep(delay).await;
            let _ = tx.send(timer);
        });
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::RequestExpired(id) => {
                if let Some(entry) = self.pending.expire(id) {
                    let err = BusError::Timeout {
                        worker: entry.target,
                        request_id: id,
                        timeout_ms: entry.timeout.as_millis() as u64,
                        location: ErrorLocation::from(Location::caller()),
                    };
                    warn!("{err}");
                    PendingRequests::fail(entry, err);
                }
            }
            Timer::RestartDue(identity) => self.restart(identity),
            Timer::ReconnectDue {
                identity,
                generation,
            } => {
                if self.shutting_down {
                    return;
                }
                if self.health.state(identity).awaiting_reconnect(generation) {
                    self.reconnect_failed(identity);
                } else {
                    debug!("Reconnect window for {identity} generation {generation} no longer applies");
                }
            }
            Timer::FlushDue { identity, channel } => {
                self.flush_waiting.remove(&(identity, channel));
                if self.shutting_down || !self.health.is_current(identity, channel) {
                    return;
                }
                let report = self.flush_queue(identity);
                debug!(
                    "Resumed flush to {identity}: {} sent, {} remaining",
                    report.sent, report.remaining
                );
            }
        }
    }

    // ---------------------------------------------------------------------
    // outputs
    // ---------------------------------------------------------------------

    fn publish_link(&self, identity: WorkerIdentity) {
        let link = self.health.state(identity).link;
        self.links.send_modify(|links| {
            links.insert(identity, link);
        });
    }

    fn emit(&self, event: UiEvent) {
        trace!("UI event on {}", event.channel());
        let _ = self.ui.send(event);
    }
}
