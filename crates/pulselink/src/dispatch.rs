//! Worker pool running server-side message handlers.
//!
//! Jobs are sharded by connection id, so one connection's messages are handled serially
//! and in arrival order while different connections proceed in parallel.

use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use pulselink_proto::Message;
use tracing::{error, trace};

use crate::connection::ConnId;
use crate::handler::Handler;
use crate::queue::MessageQueue;

pub(crate) struct Job<M: Message> {
    pub(crate) conn_id: ConnId,
    pub(crate) peer: SocketAddr,
    pub(crate) message: M,
    pub(crate) handler: Handler<M>,
    pub(crate) replies: MessageQueue<M>,
}

pub(crate) struct DispatchPool<M: Message> {
    senders: Vec<Sender<Job<M>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<M: Message> DispatchPool<M> {
    pub(crate) fn new(name: &str, workers: usize) -> io::Result<Self> {
        let count = workers.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = unbounded::<Job<M>>();
            let handle = thread::Builder::new()
                .name(format!("{name}-dispatch-{index}"))
                .spawn(move || worker_loop(rx))?;
            senders.push(tx);
            handles.push(handle);
        }
        Ok(Self {
            senders,
            workers: handles,
        })
    }

    pub(crate) fn dispatch(&self, job: Job<M>) {
        let index = (job.conn_id % self.senders.len() as u64) as usize;
        if let Err(err) = self.senders[index].send(job) {
            let job = err.into_inner();
            error!(
                conn_id = job.conn_id,
                peer = %job.peer,
                "Dispatch worker is gone, dropping message"
            );
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub(crate) fn shutdown(mut self) {
        self.join_workers();
    }

    fn join_workers(&mut self) {
        self.senders.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl<M: Message> Drop for DispatchPool<M> {
    fn drop(&mut self) {
        self.join_workers();
    }
}

fn worker_loop<M: Message>(rx: Receiver<Job<M>>) {
    for job in rx {
        run_job(job);
    }
}

fn run_job<M: Message>(job: Job<M>) {
    let Job {
        conn_id,
        peer,
        message,
        handler,
        replies,
    } = job;
    let kind = message.kind();
    trace!(conn_id, ?kind, "Dispatching message");

    match panic::catch_unwind(AssertUnwindSafe(|| handler(message, &replies))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(conn_id, %peer, ?kind, "Handler failed: {e:#}");
        }
        Err(payload) => {
            error!(
                conn_id,
                %peer,
                ?kind,
                "Handler panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
