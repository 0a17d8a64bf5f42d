//! The node: endpoints, channels and the dispatcher tying them together
//!
//! ```text
//! endpoint threads ──spawn──> channel reader/writer threads
//!                                   │ Control           ▲ Outgoing
//!                                   ▼                   │
//! heartbeat / API ──Control──> dispatcher ──Event──> application
//! ```
//!
//! The dispatcher thread is the only owner of the channel set. Everything
//! else talks to it through the bounded control queue, so channel open,
//! close, routing and stream-request bookkeeping never race each other.

use crate::channel::{ChannelContext, ChannelId, ChannelRecord, Outgoing};
use crate::command::{CommandRequest, CommandResponse, CommandTracker};
use crate::config::{NodeConfig, Timeouts};
use crate::endpoint::EndpointShape;
use crate::error::{Error, Result};
use crate::heartbeat::Heartbeat;
use crate::shutdown::{Shutdown, ShutdownTrigger};
use crate::stream_request::StreamRequester;
use crate::transport::{Listener, POLL_INTERVAL, Reconnector};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vayu_wire::{Dialect, Frame, FrameMessage, FrameSigner, MessageCodec, MessageRaw, Value, Version};

/// Interval of the pending-command expiry sweep
const COMMAND_SWEEP: Duration = Duration::from_secs(1);

/// Something that happened on the node
#[derive(Debug)]
pub enum Event {
    /// A channel started
    ChannelOpen { channel: ChannelId, label: String },
    /// A channel ended; `cause` is `None` when the node closed it
    ChannelClose {
        channel: ChannelId,
        label: String,
        cause: Option<Error>,
    },
    /// A frame was received
    Frame { channel: ChannelId, frame: Frame },
    /// Bytes were received that did not form a valid frame
    ParseError {
        channel: ChannelId,
        error: vayu_wire::Error,
    },
    /// Data streams were requested from a remote autopilot
    StreamRequested {
        channel: ChannelId,
        system_id: u8,
        component_id: u8,
    },
}

/// Which channels a write goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    To(ChannelId),
    All,
    Except(ChannelId),
}

/// Requests handled by the dispatcher
pub(crate) enum Control {
    Open(ChannelRecord),
    Close {
        channel: ChannelId,
        cause: Option<Error>,
    },
    Frame {
        channel: ChannelId,
        frame: Frame,
    },
    ParseError {
        channel: ChannelId,
        error: vayu_wire::Error,
    },
    Write {
        target: Target,
        item: Outgoing,
        reply: Option<Sender<Result<()>>>,
    },
    Channels {
        reply: Sender<Vec<(ChannelId, String)>>,
    },
}

/// Field values of a frame's message, decoding a raw payload through `codec`
pub(crate) fn frame_values(codec: &MessageCodec, frame: &Frame) -> Option<Vec<Value>> {
    match frame.message() {
        FrameMessage::Typed(m) => Some(m.values()),
        FrameMessage::Raw(raw) => codec
            .decode_values(&raw.payload, frame.version() == Version::V2)
            .ok(),
    }
}

/// A running MAVLink node
///
/// Created from a [`NodeConfig`]; all endpoints are opened before `new`
/// returns. Received traffic and channel lifecycle arrive on [`Node::events`].
/// Closing (explicitly or on drop) stops every thread the node started.
///
/// The event queue is bounded: an application that stops draining it stalls
/// the dispatcher, and with it every write and command.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vayu_node::{Endpoint, Event, Node, NodeConfig};
/// use vayu_wire::Version;
/// use vayu_wire::dialects::common;
///
/// let config = NodeConfig::new(Version::V2, 255, vec![Endpoint::udp_server("0.0.0.0:14550")])
///     .with_dialect(Arc::new(common::dialect()));
/// let node = Node::new(config)?;
/// for event in node.events() {
///     if let Event::Frame { channel, frame } = event {
///         println!("{channel}: message {}", frame.message_id());
///     }
/// }
/// # Ok::<(), vayu_node::Error>(())
/// ```
pub struct Node {
    ctx: ChannelContext,
    trigger: ShutdownTrigger,
    events: Receiver<Event>,
    signer: Mutex<Option<FrameSigner>>,
    commands: Option<Arc<CommandTracker>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Validate the configuration, open every endpoint and start the node
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let NodeConfig {
            dialect,
            version,
            system_id,
            component_id,
            inbound_key,
            outbound_key,
            signature_link_id,
            heartbeat,
            stream_request,
            timeouts,
            queue_capacity,
            endpoints,
        } = config;

        // bind and open before any thread starts, so a bad endpoint fails cleanly
        let shapes = endpoints
            .into_iter()
            .map(|e| e.open())
            .collect::<Result<Vec<_>>>()?;
        let heartbeat = Heartbeat::new(&heartbeat, dialect.as_deref(), version)?;
        let stream_requester = StreamRequester::new(&stream_request, dialect.as_ref(), version);
        let commands =
            CommandTracker::new(dialect.as_ref(), version, timeouts.command).map(Arc::new);

        let trigger = ShutdownTrigger::new();
        let (control_tx, control_rx) = bounded(queue_capacity);
        let (event_tx, events) = bounded(queue_capacity);
        let signer = outbound_key
            .as_ref()
            .map(|key| FrameSigner::new(key.clone(), signature_link_id));

        let ctx = ChannelContext {
            dialect,
            version,
            system_id,
            component_id,
            inbound_key,
            outbound_key,
            signature_link_id,
            read_timeout: timeouts.read,
            write_timeout: timeouts.write,
            mailbox_capacity: queue_capacity,
            control: control_tx,
            shutdown: trigger.signal(),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let dispatcher = Dispatcher {
            channels: BTreeMap::new(),
            events: event_tx,
            shutdown: trigger.signal(),
            stream_requester,
            commands: commands.clone(),
        };
        let dispatcher = thread::Builder::new()
            .name("node-dispatcher".to_string())
            .spawn(move || dispatcher.run(control_rx))?;

        let node = Node {
            ctx,
            trigger,
            events,
            signer: Mutex::new(signer),
            commands,
            dispatcher: Mutex::new(Some(dispatcher)),
            threads: Mutex::new(Vec::new()),
        };
        // on error, dropping `node` stops whatever already started
        node.start(shapes, heartbeat, &timeouts)?;

        log::info!(
            "Node started: {} system {}:{}",
            node.ctx.version,
            node.ctx.system_id,
            node.ctx.component_id
        );
        Ok(node)
    }

    fn start(
        &self,
        shapes: Vec<EndpointShape>,
        heartbeat: Option<Heartbeat>,
        timeouts: &Timeouts,
    ) -> io::Result<()> {
        for shape in shapes {
            let handle = spawn_endpoint(shape, &self.ctx, timeouts)?;
            self.threads.lock().push(handle);
        }
        if let Some(heartbeat) = heartbeat {
            let handle = heartbeat.spawn(self.ctx.clone())?;
            self.threads.lock().push(handle);
        }
        if let Some(commands) = &self.commands {
            let commands = Arc::clone(commands);
            let shutdown = self.ctx.shutdown.clone();
            let handle = thread::Builder::new()
                .name("command-sweep".to_string())
                .spawn(move || {
                    while !shutdown.wait(COMMAND_SWEEP) {
                        commands.expire(Instant::now());
                    }
                })?;
            self.threads.lock().push(handle);
        }
        Ok(())
    }

    /// Node events; the receiver disconnects once the node has closed
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn dialect(&self) -> Option<&Arc<Dialect>> {
        self.ctx.dialect.as_ref()
    }

    pub fn version(&self) -> Version {
        self.ctx.version
    }

    /// Open channels with their labels
    pub fn channels(&self) -> Result<Vec<(ChannelId, String)>> {
        let (reply, rx) = bounded(1);
        self.submit(Control::Channels { reply })?;
        rx.recv().map_err(|_| Error::Terminated)
    }

    /// Send a message on one channel
    pub fn write_message_to(&self, channel: ChannelId, message: impl Into<FrameMessage>) -> Result<()> {
        let raw = self.freeze(message.into())?;
        self.write(Target::To(channel), Outgoing::Message(raw))
    }

    /// Send a message on every channel
    pub fn write_message_all(&self, message: impl Into<FrameMessage>) -> Result<()> {
        let raw = self.freeze(message.into())?;
        self.write(Target::All, Outgoing::Message(raw))
    }

    /// Send a message on every channel except one
    pub fn write_message_except(&self, except: ChannelId, message: impl Into<FrameMessage>) -> Result<()> {
        let raw = self.freeze(message.into())?;
        self.write(Target::Except(except), Outgoing::Message(raw))
    }

    /// Write an existing frame verbatim on one channel
    pub fn write_frame_to(&self, channel: ChannelId, frame: Frame) -> Result<()> {
        self.write(Target::To(channel), Outgoing::Frame(Arc::new(frame)))
    }

    /// Write an existing frame verbatim on every channel
    pub fn write_frame_all(&self, frame: Frame) -> Result<()> {
        self.write(Target::All, Outgoing::Frame(Arc::new(frame)))
    }

    /// Write an existing frame verbatim on every channel except one
    ///
    /// This is the routing primitive: forward what arrived on `except` to
    /// everybody else.
    pub fn write_frame_except(&self, except: ChannelId, frame: Frame) -> Result<()> {
        self.write(Target::Except(except), Outgoing::Frame(Arc::new(frame)))
    }

    /// Recompute a frame's checksum, and its signature when the node signs
    ///
    /// Use before forwarding a frame whose content was modified.
    pub fn fix_frame(&self, frame: &mut Frame) -> Result<()> {
        let dialect = self.ctx.dialect.as_deref();
        match self.signer.lock().as_mut() {
            Some(signer) => signer.fix(frame, dialect)?,
            None => frame.refresh_checksum(dialect)?,
        }
        Ok(())
    }

    /// Send a command on `channel` and block until it is acknowledged
    ///
    /// A command that got no final ACK in time resolves to a response with
    /// `timed_out` set rather than an error.
    pub fn send_command(&self, channel: ChannelId, request: CommandRequest) -> Result<CommandResponse> {
        let commands = self
            .commands
            .as_ref()
            .ok_or(Error::DialectMissing("COMMAND_LONG / COMMAND_INT / COMMAND_ACK"))?;
        let message = commands.encode(&request)?;
        let registration = commands.register(channel, &request)?;
        log::debug!(
            "Command {} to {}:{} on channel {}",
            request.command,
            request.target_system,
            request.target_component,
            channel
        );
        if let Err(e) = self.write(Target::To(channel), Outgoing::Message(message)) {
            commands.abandon(&registration);
            return Err(e);
        }
        commands.wait(registration)
    }

    /// Stop every thread and close every channel; idempotent
    pub fn close(&self) {
        if !self.trigger.trigger() {
            return;
        }
        log::info!("Node closing");
        if let Some(handle) = self.dispatcher.lock().take()
            && handle.join().is_err()
        {
            log::error!("Dispatcher thread panicked");
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                log::error!("Node thread panicked");
            }
        }
        if let Some(commands) = &self.commands {
            commands.cancel_all();
        }
        log::info!("Node closed");
    }

    /// Encode a message once so every channel can frame the same payload
    fn freeze(&self, message: FrameMessage) -> Result<Arc<MessageRaw>> {
        let id = message.id();
        if self.ctx.version == Version::V1 && id > u8::MAX as u32 {
            return Err(vayu_wire::Error::V1IdOverflow(id).into());
        }
        let dialect = self
            .ctx
            .dialect
            .as_deref()
            .ok_or(Error::DialectMissing("message encoding"))?;
        if !dialect.contains(id) {
            return Err(vayu_wire::Error::UnknownMessageId(id).into());
        }
        let payload = message.payload(self.ctx.version, Some(dialect))?.into_owned();
        Ok(Arc::new(MessageRaw { id, payload }))
    }

    fn write(&self, target: Target, item: Outgoing) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.submit(Control::Write {
            target,
            item,
            reply: Some(reply),
        })?;
        rx.recv().map_err(|_| Error::Terminated)?
    }

    fn submit(&self, control: Control) -> Result<()> {
        if self.ctx.shutdown.is_triggered() || !self.ctx.send_control(control) {
            return Err(Error::Terminated);
        }
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start the thread that runs one endpoint
fn spawn_endpoint(shape: EndpointShape, ctx: &ChannelContext, timeouts: &Timeouts) -> io::Result<JoinHandle<()>> {
    match shape {
        EndpointShape::Single { stream, label } => ctx.spawn(stream, label, false),
        EndpointShape::Dialing { dialer, label } => {
            let ctx = ctx.clone();
            let reconnector = Reconnector::new(
                dialer,
                label.clone(),
                timeouts.dial,
                timeouts.reconnect,
                ctx.shutdown.clone(),
            );
            thread::Builder::new()
                .name("endpoint-dial".to_string())
                .spawn(move || run_dialer(ctx, reconnector, label))
        }
        EndpointShape::Accepting { listener, label } => {
            let ctx = ctx.clone();
            thread::Builder::new()
                .name("endpoint-accept".to_string())
                .spawn(move || run_listener(ctx, listener, label))
        }
    }
}

/// One channel at a time: dial, run until the channel ends, dial again
fn run_dialer(ctx: ChannelContext, mut reconnector: Reconnector, label: String) {
    while let Some(stream) = reconnector.connect() {
        match ctx.spawn(stream, label.clone(), true) {
            Ok(reader) => {
                if reader.join().is_err() {
                    log::error!("{}: channel reader panicked", label);
                }
            }
            Err(e) => {
                log::warn!("{}: failed to start channel: {}", label, e);
                if ctx.shutdown.wait(POLL_INTERVAL) {
                    break;
                }
            }
        }
        if ctx.shutdown.is_triggered() {
            break;
        }
    }
    log::debug!("{}: dialer exiting", label);
}

/// One channel per accepted peer until shutdown
fn run_listener(ctx: ChannelContext, mut listener: Box<dyn Listener>, label: String) {
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    while !ctx.shutdown.is_triggered() {
        match listener.accept(POLL_INTERVAL) {
            Ok(Some((stream, peer))) => match ctx.spawn(stream, format!("{label} <- {peer}"), true) {
                Ok(reader) => readers.push(reader),
                Err(e) => log::warn!("{}: failed to start channel for {}: {}", label, peer, e),
            },
            Ok(None) => {}
            Err(e) => {
                if !ctx.shutdown.is_triggered() {
                    log::error!("{}: accept failed: {}", label, e);
                }
                break;
            }
        }
        readers.retain(|r| !r.is_finished());
    }
    listener.close();
    for reader in readers {
        if reader.join().is_err() {
            log::error!("{}: channel reader panicked", label);
        }
    }
    log::debug!("{}: listener exiting", label);
}

/// Single owner of the channel set
struct Dispatcher {
    channels: BTreeMap<ChannelId, ChannelRecord>,
    events: Sender<Event>,
    shutdown: Shutdown,
    stream_requester: Option<StreamRequester>,
    commands: Option<Arc<CommandTracker>>,
}

impl Dispatcher {
    fn run(mut self, control: Receiver<Control>) {
        loop {
            let msg = select! {
                recv(control) -> msg => msg,
                recv(self.shutdown.receiver()) -> _ => break,
            };
            let Ok(msg) = msg else { break };
            if !self.handle(msg) {
                break;
            }
        }

        for (_, record) in std::mem::take(&mut self.channels) {
            record.close();
        }
        log::debug!("Dispatcher exiting");
    }

    /// Returns false once the node is shutting down
    fn handle(&mut self, msg: Control) -> bool {
        match msg {
            Control::Open(record) => {
                let event = Event::ChannelOpen {
                    channel: record.id,
                    label: record.label.clone(),
                };
                self.channels.insert(record.id, record);
                self.emit(event)
            }
            Control::Close { channel, cause } => {
                let Some(record) = self.channels.remove(&channel) else {
                    return true;
                };
                let label = record.label.clone();
                record.close();
                if let Some(commands) = &self.commands {
                    commands.cancel_channel(channel);
                }
                if let Some(requester) = &mut self.stream_requester {
                    requester.forget_channel(channel);
                }
                self.emit(Event::ChannelClose {
                    channel,
                    label,
                    cause,
                })
            }
            Control::Frame { channel, frame } => self.handle_frame(channel, frame),
            Control::ParseError { channel, error } => self.emit(Event::ParseError { channel, error }),
            Control::Write {
                target,
                item,
                reply,
            } => {
                let result = self.route(target, item);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                true
            }
            Control::Channels { reply } => {
                let list = self
                    .channels
                    .values()
                    .map(|r| (r.id, r.label.clone()))
                    .collect();
                let _ = reply.send(list);
                true
            }
        }
    }

    fn handle_frame(&mut self, channel: ChannelId, frame: Frame) -> bool {
        let mut requested = None;
        if let Some(requester) = &mut self.stream_requester {
            match requester.observe(channel, &frame, Instant::now()) {
                Ok(Some((target, messages))) => {
                    if let Some(record) = self.channels.get(&channel) {
                        for message in messages {
                            record.push(Outgoing::Message(message));
                        }
                    }
                    requested = Some(target);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to build stream requests: {}", e),
            }
        }
        if let Some(commands) = &self.commands {
            commands.handle_ack(channel, &frame);
        }

        if !self.emit(Event::Frame { channel, frame }) {
            return false;
        }
        match requested {
            Some(target) => self.emit(Event::StreamRequested {
                channel,
                system_id: target.system_id,
                component_id: target.component_id,
            }),
            None => true,
        }
    }

    fn route(&self, target: Target, item: Outgoing) -> Result<()> {
        match target {
            Target::To(id) => {
                let record = self.channels.get(&id).ok_or(Error::ChannelNotFound(id))?;
                record.push(item);
            }
            Target::All => {
                for record in self.channels.values() {
                    record.push(item.clone());
                }
            }
            Target::Except(except) => {
                for record in self.channels.values().filter(|r| r.id != except) {
                    record.push(item.clone());
                }
            }
        }
        Ok(())
    }

    /// Deliver an event, blocking while the queue is full
    fn emit(&self, event: Event) -> bool {
        select! {
            // a dropped receiver only means nobody listens
            send(self.events, event) -> _ => true,
            recv(self.shutdown.receiver()) -> _ => false,
        }
    }
}
