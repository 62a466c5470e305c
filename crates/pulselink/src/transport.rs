//! Byte streams a connection can run over.
//!
//! Transports are used in non-blocking mode: `WouldBlock` means "nothing to read" or
//! "cannot write right now", and a read returning `Ok(0)` means the peer closed the stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::ops::{Deref, DerefMut};

use rustls::{ConnectionCommon, SideData, StreamOwned};

pub trait Transport: Read + Write + Send {
    /// Tear the stream down, attempting every step even if an earlier one fails.
    fn shutdown(&mut self) -> Vec<io::Error>;
}

/// Plain TCP.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap `stream`, switching it to non-blocking mode.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);
        Ok(Self { stream })
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn shutdown(&mut self) -> Vec<io::Error> {
        shutdown_socket(&self.stream).into_iter().collect()
    }
}

/// TLS over TCP, for either side of the handshake.
///
/// The handshake has already completed by the time a `TlsTransport` is built.
pub struct TlsTransport<C> {
    stream: StreamOwned<C, TcpStream>,
}

impl<C, S> TlsTransport<C>
where
    C: DerefMut + Deref<Target = ConnectionCommon<S>>,
    S: SideData,
{
    /// Wrap an established session, switching the socket to non-blocking mode.
    pub fn new(conn: C, sock: TcpStream) -> io::Result<Self> {
        sock.set_read_timeout(None)?;
        sock.set_write_timeout(None)?;
        sock.set_nonblocking(true)?;
        let _ = sock.set_nodelay(true);
        Ok(Self {
            stream: StreamOwned::new(conn, sock),
        })
    }
}

impl<C, S> Read for TlsTransport<C>
where
    C: DerefMut + Deref<Target = ConnectionCommon<S>>,
    S: SideData,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl<C, S> Write for TlsTransport<C>
where
    C: DerefMut + Deref<Target = ConnectionCommon<S>>,
    S: SideData,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl<C, S> Transport for TlsTransport<C>
where
    C: DerefMut + Deref<Target = ConnectionCommon<S>> + Send,
    S: SideData,
{
    fn shutdown(&mut self) -> Vec<io::Error> {
        let mut errors = Vec::new();

        self.stream.conn.send_close_notify();
        while self.stream.conn.wants_write() {
            match self.stream.conn.write_tls(&mut self.stream.sock) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // The peer is not draining the socket; give up on a clean close.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    errors.push(e);
                    break;
                }
            }
        }

        errors.extend(shutdown_socket(&self.stream.sock));
        errors
    }
}

fn shutdown_socket(stream: &TcpStream) -> Option<io::Error> {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => None,
        // Already torn down by the peer.
        Err(e) if e.kind() == io::ErrorKind::NotConnected => None,
        Err(e) => Some(e),
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-memory transport driven step by step from tests.

    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::Transport;

    pub enum ReadStep {
        Data(Vec<u8>),
        Eof,
        Fail(io::ErrorKind),
    }

    #[derive(Default)]
    struct Script {
        reads: VecDeque<ReadStep>,
        written: Vec<u8>,
        /// Bytes the transport will accept before reporting `WouldBlock`.
        write_budget: Option<usize>,
        write_error: Option<io::ErrorKind>,
        shutdown_errors: Vec<io::ErrorKind>,
        shutdown_calls: usize,
    }

    /// Test-side handle controlling a [`ScriptedTransport`].
    #[derive(Clone, Default)]
    pub struct ScriptHandle {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptHandle {
        pub fn new() -> (Self, ScriptedTransport) {
            let handle = Self::default();
            let transport = ScriptedTransport {
                script: Arc::clone(&handle.script),
            };
            (handle, transport)
        }

        pub fn push_bytes(&self, bytes: &[u8]) {
            self.script
                .lock()
                .reads
                .push_back(ReadStep::Data(bytes.to_vec()));
        }

        pub fn push_eof(&self) {
            self.script.lock().reads.push_back(ReadStep::Eof);
        }

        pub fn push_error(&self, kind: io::ErrorKind) {
            self.script.lock().reads.push_back(ReadStep::Fail(kind));
        }

        pub fn set_write_budget(&self, budget: Option<usize>) {
            self.script.lock().write_budget = budget;
        }

        pub fn fail_writes(&self, kind: io::ErrorKind) {
            self.script.lock().write_error = Some(kind);
        }

        pub fn fail_shutdown(&self, kinds: &[io::ErrorKind]) {
            self.script.lock().shutdown_errors = kinds.to_vec();
        }

        /// Drain everything written so far.
        pub fn take_written(&self) -> Vec<u8> {
            std::mem::take(&mut self.script.lock().written)
        }

        pub fn shutdown_calls(&self) -> usize {
            self.script.lock().shutdown_calls
        }
    }

    pub struct ScriptedTransport {
        script: Arc<Mutex<Script>>,
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut script = self.script.lock();
            match script.reads.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(ReadStep::Eof) => Ok(0),
                Some(ReadStep::Fail(kind)) => Err(kind.into()),
                Some(ReadStep::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        let rest = data.split_off(n);
                        script.reads.push_front(ReadStep::Data(rest));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut script = self.script.lock();
            if let Some(kind) = script.write_error {
                return Err(kind.into());
            }
            let n = match script.write_budget {
                Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(budget) => {
                    let n = budget.min(buf.len());
                    script.write_budget = Some(budget - n);
                    n
                }
                None => buf.len(),
            };
            script.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedTransport {
        fn shutdown(&mut self) -> Vec<io::Error> {
            let mut script = self.script.lock();
            script.shutdown_calls += 1;
            script
                .shutdown_errors
                .iter()
                .map(|&kind| io::Error::from(kind))
                .collect()
        }
    }
}
