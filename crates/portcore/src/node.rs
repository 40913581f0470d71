use crate::packet::{self, Packet};
use crate::port::{
    index_of_port, name_of_port, InPort, Listener, OutPort, Reader, Reply, Ticket, PORT_ERROR,
    PORT_IN, PORT_OUT,
};
use crate::process::Process;
use crate::NodeError;
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;

/// Highest number of `out[i]` ports a [`OneToManyNode`] exposes.
pub const MAX_OUT_PORTS: usize = 1024;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Input port by name, `None` if the node has no such port
    fn in_port(&self, name: &str) -> Option<InPort>;

    /// Output port by name, `None` if the node has no such port
    fn out_port(&self, name: &str) -> Option<OutPort>;

    /// Release ports and any resources held by the node
    async fn close(&self) -> Result<(), NodeError>;
}

/// Per-packet logic of a [`OneToOneNode`].
///
/// Returns `(out, err)`: the first element is written to `out`, the second
/// to `error`. Only one should be set; both empty means "no output".
#[async_trait]
pub trait OneToOneAction: Send + Sync {
    async fn run(&self, proc: &Process, inpck: Packet) -> (Option<Packet>, Option<Packet>);
}

/// Per-packet logic of a [`OneToManyNode`].
///
/// Returns one optional packet per `out[i]` port plus an optional error.
#[async_trait]
pub trait OneToManyAction: Send + Sync {
    async fn run(&self, proc: &Process, inpck: Packet) -> (Vec<Option<Packet>>, Option<Packet>);
}

struct FnOneToOne<F>(F);

#[async_trait]
impl<F> OneToOneAction for FnOneToOne<F>
where
    F: Fn(&Process, Packet) -> (Option<Packet>, Option<Packet>) + Send + Sync,
{
    async fn run(&self, proc: &Process, inpck: Packet) -> (Option<Packet>, Option<Packet>) {
        (self.0)(proc, inpck)
    }
}

struct FnOneToMany<F>(F);

#[async_trait]
impl<F> OneToManyAction for FnOneToMany<F>
where
    F: Fn(&Process, Packet) -> (Vec<Option<Packet>>, Option<Packet>) + Send + Sync,
{
    async fn run(&self, proc: &Process, inpck: Packet) -> (Vec<Option<Packet>>, Option<Packet>) {
        (self.0)(proc, inpck)
    }
}

/// One `in`, one `out`, one `error` port.
pub struct OneToOneNode {
    in_port: InPort,
    out_port: OutPort,
    err_port: OutPort,
}

impl OneToOneNode {
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&Process, Packet) -> (Option<Packet>, Option<Packet>) + Send + Sync + 'static,
    {
        Self::with_action(FnOneToOne(action))
    }

    pub fn with_action(action: impl OneToOneAction + 'static) -> Self {
        let in_port = InPort::new();
        let out_port = OutPort::new();
        let err_port = OutPort::new();

        in_port.add_listener(OneToOneLoop {
            action: Arc::new(action),
            out_port: out_port.clone(),
            err_port: err_port.clone(),
        });

        Self {
            in_port,
            out_port,
            err_port,
        }
    }
}

#[async_trait]
impl Node for OneToOneNode {
    fn in_port(&self, name: &str) -> Option<InPort> {
        (name == PORT_IN).then(|| self.in_port.clone())
    }

    fn out_port(&self, name: &str) -> Option<OutPort> {
        match name {
            PORT_OUT => Some(self.out_port.clone()),
            PORT_ERROR => Some(self.err_port.clone()),
            _ => None,
        }
    }

    async fn close(&self) -> Result<(), NodeError> {
        self.in_port.close();
        self.out_port.close();
        self.err_port.close();
        Ok(())
    }
}

struct OneToOneLoop {
    action: Arc<dyn OneToOneAction>,
    out_port: OutPort,
    err_port: OutPort,
}

impl Listener for OneToOneLoop {
    fn accept(&self, proc: &Process, reader: Reader) {
        let action = self.action.clone();
        let out_port = self.out_port.clone();
        let err_port = self.err_port.clone();
        let task_proc = proc.clone();

        proc.spawn(async move {
            let proc = task_proc;
            while let Some((ticket, inpck)) = next(&proc, &reader).await {
                let reply = match action.run(&proc, inpck).await {
                    (Some(outpck), _) => out_port.open(&proc).send(outpck).await,
                    (None, Some(errpck)) => err_port.open(&proc).send(errpck).await,
                    (None, None) => Reply::ready(Packet::none()),
                };
                answer(&proc, &reader, ticket, vec![reply]);
            }
            tracing::trace!(process = %proc.id(), "one-to-one read loop stopped");
        });
    }
}

/// One `in` port, `out[0..n]` ports and one `error` port.
///
/// Out ports are created on first lookup; `"out"` is the same port as `"out[0]"`.
pub struct OneToManyNode {
    in_port: InPort,
    out_ports: Arc<Mutex<Vec<OutPort>>>,
    err_port: OutPort,
}

impl OneToManyNode {
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&Process, Packet) -> (Vec<Option<Packet>>, Option<Packet>) + Send + Sync + 'static,
    {
        Self::with_action(FnOneToMany(action))
    }

    pub fn with_action(action: impl OneToManyAction + 'static) -> Self {
        let in_port = InPort::new();
        let out_ports = Arc::new(Mutex::new(Vec::new()));
        let err_port = OutPort::new();

        in_port.add_listener(OneToManyLoop {
            action: Arc::new(action),
            out_ports: out_ports.clone(),
            err_port: err_port.clone(),
        });

        Self {
            in_port,
            out_ports,
            err_port,
        }
    }
}

#[async_trait]
impl Node for OneToManyNode {
    fn in_port(&self, name: &str) -> Option<InPort> {
        (name == PORT_IN).then(|| self.in_port.clone())
    }

    fn out_port(&self, name: &str) -> Option<OutPort> {
        if name == PORT_ERROR {
            return Some(self.err_port.clone());
        }
        if name_of_port(name) != PORT_OUT {
            return None;
        }
        let index = match index_of_port(name) {
            Some(index) => index,
            None if name == PORT_OUT => 0,
            None => return None,
        };

        if index >= MAX_OUT_PORTS {
            return None;
        }

        let mut ports = self.out_ports.lock();
        while ports.len() <= index {
            ports.push(OutPort::new());
        }
        Some(ports[index].clone())
    }

    async fn close(&self) -> Result<(), NodeError> {
        self.in_port.close();
        let ports: Vec<OutPort> = self.out_ports.lock().drain(..).collect();
        for port in ports {
            port.close();
        }
        self.err_port.close();
        Ok(())
    }
}

struct OneToManyLoop {
    action: Arc<dyn OneToManyAction>,
    out_ports: Arc<Mutex<Vec<OutPort>>>,
    err_port: OutPort,
}

impl Listener for OneToManyLoop {
    fn accept(&self, proc: &Process, reader: Reader) {
        let action = self.action.clone();
        let out_ports = self.out_ports.clone();
        let err_port = self.err_port.clone();
        let task_proc = proc.clone();

        proc.spawn(async move {
            let proc = task_proc;
            while let Some((ticket, inpck)) = next(&proc, &reader).await {
                let (outpcks, errpck) = action.run(&proc, inpck).await;

                let mut replies = Vec::new();
                if outpcks.iter().any(Option::is_some) {
                    let ports: Vec<OutPort> = out_ports.lock().clone();
                    for (i, pck) in outpcks.into_iter().enumerate() {
                        let Some(pck) = pck else { continue };
                        let reply = match ports.get(i) {
                            Some(port) => port.open(&proc).send(pck).await,
                            None => Reply::ready(pck),
                        };
                        replies.push(reply);
                    }
                } else if let Some(errpck) = errpck {
                    replies.push(err_port.open(&proc).send(errpck).await);
                } else {
                    replies.push(Reply::ready(Packet::none()));
                }
                answer(&proc, &reader, ticket, replies);
            }
            tracing::trace!(process = %proc.id(), "one-to-many read loop stopped");
        });
    }
}

/// Next packet for the read loop, or `None` once the process is cancelled
/// or the reader closed.
async fn next(proc: &Process, reader: &Reader) -> Option<(Ticket, Packet)> {
    tokio::select! {
        biased;
        _ = proc.cancelled() => None,
        taken = reader.take() => taken,
    }
}

/// Answers `ticket` once every reply is in, without holding up the read loop.
/// A packet that comes back around a cycle is read while this one waits.
fn answer(proc: &Process, reader: &Reader, ticket: Ticket, replies: Vec<Reply>) {
    let reader = reader.clone();
    proc.spawn(async move {
        let acks = join_all(replies.into_iter().map(Reply::wait)).await;
        reader.answer(ticket, packet::merge(acks));
    });
}
