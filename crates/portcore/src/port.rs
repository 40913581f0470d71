//! Typed connection points and the process-scoped streaming protocol.
//!
//! An [`OutPort`] fans out to any number of [`InPort`]s. Traffic never flows
//! through the ports directly: a process opens a [`Writer`] on the out port
//! and a [`Reader`] on each linked in port, and every packet written is
//! answered by exactly one acknowledgment packet travelling back upstream.
//!
//! ```text
//!  Writer --write(p)--> Reader 1 --read()-->  ...  --receive(ack1)--+
//!         \-----------> Reader 2 --read()-->  ...  --receive(ack2)--+
//!  Writer <--receive()-- merge(ack1, ack2) <------------------------+
//! ```

use crate::packet::{self, Packet};
use crate::process::{Process, ProcessId};
use crate::NodeError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub const PORT_IN: &str = "in";
pub const PORT_OUT: &str = "out";
pub const PORT_ERROR: &str = "error";

/// Buffered deliveries per reader before writers wait.
pub const DEFAULT_CAPACITY: usize = 64;

/// `port_with_index("out", 1)` is `"out[1]"`.
pub fn port_with_index(name: &str, index: usize) -> String {
    format!("{}[{}]", name, index)
}

/// Base name of an indexed port; plain names are returned as is.
pub fn name_of_port(port: &str) -> &str {
    split_port(port).map(|(name, _)| name).unwrap_or(port)
}

/// Index of an indexed port, `None` for plain names.
pub fn index_of_port(port: &str) -> Option<usize> {
    split_port(port).map(|(_, index)| index)
}

fn split_port(port: &str) -> Option<(&str, usize)> {
    let (name, index) = port.strip_suffix(']')?.rsplit_once('[')?;
    let index = index.parse().ok()?;
    Some((name, index))
}

/// Invoked once per process, the first time that process opens the in port.
/// Implementations typically spawn the read loop for the process.
pub trait Listener: Send + Sync {
    fn accept(&self, proc: &Process, reader: Reader);
}

impl<F> Listener for F
where
    F: Fn(&Process, Reader) + Send + Sync,
{
    fn accept(&self, proc: &Process, reader: Reader) {
        self(proc, reader)
    }
}

/// Receiving side of a link.
#[derive(Clone)]
pub struct InPort {
    inner: Arc<InPortInner>,
}

struct InPortInner {
    capacity: usize,
    links: Mutex<Vec<Weak<OutPortInner>>>,
    readers: Mutex<HashMap<ProcessId, Reader>>,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
}

impl InPort {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(InPortInner {
                capacity: capacity.max(1),
                links: Mutex::new(Vec::new()),
                readers: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn add_listener(&self, listener: impl Listener + 'static) {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    /// Number of linked out ports.
    pub fn links(&self) -> usize {
        self.inner
            .links
            .lock()
            .iter()
            .filter(|link| link.strong_count() > 0)
            .count()
    }

    pub fn link(&self, out: &OutPort) {
        out.link(self);
    }

    pub fn unlink(&self, out: &OutPort) {
        out.unlink(self);
    }

    /// Reader bound to `proc`. Opening twice for one process returns the same
    /// reader; the first open notifies the listeners.
    pub fn open(&self, proc: &Process) -> Reader {
        let reader = {
            let mut readers = self.inner.readers.lock();
            if let Some(reader) = readers.get(&proc.id()) {
                return reader.clone();
            }
            let reader = Reader::new(self.inner.capacity);
            readers.insert(proc.id(), reader.clone());
            reader
        };

        let port = Arc::downgrade(&self.inner);
        let id = proc.id();
        let closing = reader.clone();
        proc.add_exit_hook(move |_| {
            if let Some(port) = port.upgrade() {
                port.readers.lock().remove(&id);
            }
            closing.close();
        });
        if reader.is_closed() {
            return reader;
        }

        let listeners: Vec<Arc<dyn Listener>> = self.inner.listeners.lock().clone();
        for listener in listeners {
            listener.accept(proc, reader.clone());
        }
        reader
    }

    /// Unlinks every peer, closes every open reader and drops the listeners.
    pub fn close(&self) {
        let outs: Vec<OutPort> = self
            .inner
            .links
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| OutPort { inner })
            .collect();
        for out in outs {
            out.unlink(self);
        }

        let readers: Vec<Reader> = self.inner.readers.lock().drain().map(|(_, r)| r).collect();
        for reader in readers {
            reader.close();
        }
        self.inner.listeners.lock().clear();
    }

    fn ptr_eq(&self, other: &InPort) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for InPort {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InPort")
            .field("links", &self.links())
            .finish()
    }
}

/// Sending side of a link.
#[derive(Clone)]
pub struct OutPort {
    inner: Arc<OutPortInner>,
}

struct OutPortInner {
    links: Mutex<Vec<InPort>>,
    writers: Mutex<HashMap<ProcessId, Writer>>,
}

impl OutPort {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OutPortInner {
                links: Mutex::new(Vec::new()),
                writers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of linked in ports.
    pub fn links(&self) -> usize {
        self.inner.links.lock().len()
    }

    pub fn is_linked(&self, in_port: &InPort) -> bool {
        self.inner.links.lock().iter().any(|p| p.ptr_eq(in_port))
    }

    /// Links both directions. Linking an existing pair is a no-op.
    pub fn link(&self, in_port: &InPort) {
        let mut links = self.inner.links.lock();
        if links.iter().any(|p| p.ptr_eq(in_port)) {
            return;
        }
        links.push(in_port.clone());
        in_port.inner.links.lock().push(Arc::downgrade(&self.inner));
    }

    pub fn unlink(&self, in_port: &InPort) {
        let mut links = self.inner.links.lock();
        let before = links.len();
        links.retain(|p| !p.ptr_eq(in_port));
        if links.len() == before {
            return;
        }
        let this = Arc::as_ptr(&self.inner);
        in_port
            .inner
            .links
            .lock()
            .retain(|link| link.strong_count() > 0 && !std::ptr::eq(link.as_ptr(), this));
    }

    /// Writer bound to `proc`. Opening twice for one process returns the same
    /// writer.
    pub fn open(&self, proc: &Process) -> Writer {
        let writer = {
            let mut writers = self.inner.writers.lock();
            if let Some(writer) = writers.get(&proc.id()) {
                return writer.clone();
            }
            let writer = Writer::new(Arc::downgrade(&self.inner), proc.clone());
            writers.insert(proc.id(), writer.clone());
            writer
        };

        let port = Arc::downgrade(&self.inner);
        let id = proc.id();
        let closing = Arc::downgrade(&writer.inner);
        proc.add_exit_hook(move |_| {
            if let Some(port) = port.upgrade() {
                port.writers.lock().remove(&id);
            }
            if let Some(inner) = closing.upgrade() {
                Writer { inner }.close();
            }
        });
        writer
    }

    /// Unlinks every peer and closes every open writer.
    pub fn close(&self) {
        let links: Vec<InPort> = self.inner.links.lock().clone();
        for in_port in &links {
            self.unlink(in_port);
        }

        let writers: Vec<Writer> = self.inner.writers.lock().drain().map(|(_, w)| w).collect();
        for writer in writers {
            writer.close();
        }
    }
}

impl Default for OutPort {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutPort")
            .field("links", &self.links())
            .finish()
    }
}

struct Delivery {
    packet: Packet,
    ack: AckTarget,
}

/// Where the acknowledgment for one delivery goes.
struct AckTarget {
    writer: Weak<WriterInner>,
    seq: u64,
}

impl AckTarget {
    fn ack(self, pck: Packet) -> bool {
        match self.writer.upgrade() {
            Some(writer) => {
                writer.acknowledge(self.seq, pck);
                true
            }
            None => false,
        }
    }
}

/// Identifies a packet taken with [`Reader::take`] until it is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Process-scoped view of an [`InPort`].
#[derive(Clone)]
pub struct Reader {
    inner: Arc<ReaderInner>,
}

struct ReaderInner {
    tx: mpsc::Sender<Delivery>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Delivery>>,
    outstanding: Mutex<Outstanding>,
    closed: CancellationToken,
}

#[derive(Default)]
struct Outstanding {
    next: u64,
    targets: BTreeMap<u64, AckTarget>,
}

/// Holds the receive side; rejects whatever is still buffered if the reader
/// was closed while the guard was held.
struct ReadGuard<'a> {
    rx: tokio::sync::MutexGuard<'a, mpsc::Receiver<Delivery>>,
    closed: &'a CancellationToken,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if self.closed.is_cancelled() {
            reject_buffered(&mut self.rx);
        }
    }
}

impl Reader {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(ReaderInner {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                outstanding: Mutex::new(Outstanding::default()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Next inbound packet, `None` once the reader is closed.
    ///
    /// Every packet read must be answered with [`Reader::receive`], in read
    /// order, or the writer that sent it waits forever.
    pub async fn read(&self) -> Option<Packet> {
        self.take().await.map(|(_, pck)| pck)
    }

    /// Next inbound packet together with the ticket that answers it through
    /// [`Reader::answer`]. Tickets may be answered in any order.
    pub async fn take(&self) -> Option<(Ticket, Packet)> {
        let mut guard = ReadGuard {
            rx: self.inner.rx.lock().await,
            closed: &self.inner.closed,
        };
        let delivery = tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => None,
            delivery = guard.rx.recv() => delivery,
        };
        let delivery = delivery?;

        let mut outstanding = self.inner.outstanding.lock();
        if self.inner.closed.is_cancelled() {
            drop(outstanding);
            delivery.ack.ack(Packet::error(NodeError::Closed));
            return None;
        }
        let ticket = outstanding.next;
        outstanding.next += 1;
        outstanding.targets.insert(ticket, delivery.ack);
        Some((Ticket(ticket), delivery.packet))
    }

    /// Acknowledges the oldest unacknowledged packet. Returns `false` when
    /// nothing is outstanding or its writer is gone.
    pub fn receive(&self, pck: Packet) -> bool {
        let target = self.inner.outstanding.lock().targets.pop_first();
        match target {
            Some((_, target)) => target.ack(pck),
            None => false,
        }
    }

    /// Acknowledges the packet taken with `ticket`. Returns `false` when it
    /// was already answered, rejected by [`Reader::close`], or its writer is
    /// gone.
    pub fn answer(&self, ticket: Ticket, pck: Packet) -> bool {
        let target = self.inner.outstanding.lock().targets.remove(&ticket.0);
        match target {
            Some(target) => target.ack(pck),
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Closes the reader. Outstanding and buffered deliveries are answered
    /// with an error packet.
    pub fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();

        let pending = std::mem::take(&mut self.inner.outstanding.lock().targets);
        for target in pending.into_values() {
            target.ack(Packet::error(NodeError::Closed));
        }
        // Otherwise the current lock holder drains when its guard drops.
        if let Ok(mut rx) = self.inner.rx.try_lock() {
            reject_buffered(&mut rx);
        }
    }

    async fn deliver(&self, delivery: Delivery) -> bool {
        if self.inner.closed.is_cancelled() {
            return false;
        }
        let sent = tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => false,
            sent = self.inner.tx.send(delivery) => sent.is_ok(),
        };
        // Raced with close after its drain.
        if sent && self.inner.closed.is_cancelled() {
            if let Ok(mut rx) = self.inner.rx.try_lock() {
                reject_buffered(&mut rx);
            }
        }
        sent
    }
}

fn reject_buffered(rx: &mut mpsc::Receiver<Delivery>) {
    rx.close();
    while let Ok(delivery) = rx.try_recv() {
        delivery.ack.ack(Packet::error(NodeError::Closed));
    }
}

/// Acknowledgment of one [`Writer::send`], independent of other writes in
/// flight on the same writer.
pub struct Reply {
    state: ReplyState,
}

enum ReplyState {
    Ready(Packet),
    Pending(oneshot::Receiver<Packet>),
}

impl Reply {
    pub fn ready(pck: Packet) -> Self {
        Self {
            state: ReplyState::Ready(pck),
        }
    }

    /// Waits for the acknowledgment. A write nobody received resolves to the
    /// written packet; a writer closed before acknowledging resolves to an
    /// error packet.
    pub async fn wait(self) -> Packet {
        match self.state {
            ReplyState::Ready(pck) => pck,
            ReplyState::Pending(rx) => rx
                .await
                .unwrap_or_else(|_| Packet::error(NodeError::Closed)),
        }
    }
}

/// Process-scoped view of an [`OutPort`].
#[derive(Clone)]
pub struct Writer {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    port: Weak<OutPortInner>,
    process: Process,
    state: Mutex<WriterState>,
    serial: tokio::sync::Mutex<()>,
    acks: mpsc::UnboundedSender<Packet>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
    closed: CancellationToken,
}

#[derive(Default)]
struct WriterState {
    next_seq: u64,
    inflight: VecDeque<Inflight>,
}

/// One write awaiting its acknowledgments. `expected` stays `None` until the
/// write has finished delivering. Writes with a `reply` bypass the ordered
/// ack stream.
struct Inflight {
    seq: u64,
    expected: Option<usize>,
    acks: Vec<Packet>,
    reply: Option<oneshot::Sender<Packet>>,
}

impl Inflight {
    fn is_complete(&self) -> bool {
        self.expected.is_some_and(|n| self.acks.len() >= n)
    }
}

impl Writer {
    fn new(port: Weak<OutPortInner>, process: Process) -> Self {
        let (acks, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(WriterInner {
                port,
                process,
                state: Mutex::new(WriterState::default()),
                serial: tokio::sync::Mutex::new(()),
                acks,
                receiver: tokio::sync::Mutex::new(receiver),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn process(&self) -> &Process {
        &self.inner.process
    }

    /// Delivers `pck` to every linked in port opened for this writer's
    /// process and returns how many readers accepted it.
    ///
    /// Zero means nobody is listening and no acknowledgment will follow.
    pub async fn write(&self, pck: Packet) -> usize {
        self.deliver(pck, None).await
    }

    /// Delivers `pck` like [`Writer::write`], but its acknowledgment comes
    /// back through the returned [`Reply`] instead of [`Writer::receive`].
    /// Replies resolve as soon as their own write is acknowledged.
    pub async fn send(&self, pck: Packet) -> Reply {
        let (tx, rx) = oneshot::channel();
        match self.deliver(pck.clone(), Some(tx)).await {
            0 => Reply::ready(pck),
            _ => Reply {
                state: ReplyState::Pending(rx),
            },
        }
    }

    /// Next acknowledgment of a [`Writer::write`], in write order. `None` once
    /// the writer is closed.
    pub async fn receive(&self) -> Option<Packet> {
        let mut receiver = self.inner.receiver.lock().await;
        tokio::select! {
            biased;
            pck = receiver.recv() => pck,
            _ = self.inner.closed.cancelled() => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn close(&self) {
        self.inner.closed.cancel();
        self.inner.state.lock().inflight.clear();
    }

    async fn deliver(&self, pck: Packet, reply: Option<oneshot::Sender<Packet>>) -> usize {
        if self.inner.closed.is_cancelled() {
            return 0;
        }
        let targets: Vec<InPort> = match self.inner.port.upgrade() {
            Some(port) => port.links.lock().clone(),
            None => return 0,
        };

        let _serial = self.inner.serial.lock().await;
        let mut settle = Settle {
            writer: &self.inner,
            seq: self.inner.begin(reply),
            count: 0,
        };
        for target in targets {
            let reader = target.open(&self.inner.process);
            let delivery = Delivery {
                packet: pck.clone(),
                ack: AckTarget {
                    writer: Arc::downgrade(&self.inner),
                    seq: settle.seq,
                },
            };
            if reader.deliver(delivery).await {
                settle.count += 1;
            }
        }
        settle.count
    }
}

impl WriterInner {
    fn begin(&self, reply: Option<oneshot::Sender<Packet>>) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.inflight.push_back(Inflight {
            seq,
            expected: None,
            acks: Vec::new(),
            reply,
        });
        seq
    }

    fn settle(&self, seq: u64, count: usize) {
        let mut state = self.state.lock();
        if count == 0 {
            state.inflight.retain(|write| write.seq != seq);
        } else if let Some(write) = state.inflight.iter_mut().find(|write| write.seq == seq) {
            write.expected = Some(count);
        }
        self.flush(&mut state);
    }

    fn acknowledge(&self, seq: u64, pck: Packet) {
        let mut state = self.state.lock();
        if let Some(write) = state.inflight.iter_mut().find(|write| write.seq == seq) {
            write.acks.push(pck);
        }
        self.flush(&mut state);
    }

    /// Resolves completed writes. Replies resolve as soon as their write
    /// completes; plain writes feed the ack stream strictly in write order.
    fn flush(&self, state: &mut WriterState) {
        let mut ordered = true;
        let mut i = 0;
        while i < state.inflight.len() {
            let write = &state.inflight[i];
            let targeted = write.reply.is_some();
            if write.is_complete() && (targeted || ordered) {
                if let Some(write) = state.inflight.remove(i) {
                    let ack = packet::merge(write.acks);
                    match write.reply {
                        Some(reply) => {
                            let _ = reply.send(ack);
                        }
                        None => {
                            let _ = self.acks.send(ack);
                        }
                    }
                }
                continue;
            }
            if !targeted {
                ordered = false;
            }
            i += 1;
        }
    }
}

/// Finalizes a write's expected ack count even if the write future is dropped.
struct Settle<'a> {
    writer: &'a WriterInner,
    seq: u64,
    count: usize,
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        self.writer.settle(self.seq, self.count);
    }
}
