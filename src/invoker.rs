// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: TCP endpoint executing framed naming calls against a tree.
// Author: Lukas Bower

//! Server side of the naming RPC protocol.

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::{NamingError, WireFault};
use crate::naming::Naming;
use crate::wire::{read_frame, write_frame, NamingCall, NamingReply, NamingRequest, NamingStub};

/// Execute `request` against `naming`.
///
/// Requests addressed to another instance get a `NoSuchObject` fault so the
/// caller can refresh its handle.
pub fn execute(naming: &dyn Naming, request: NamingRequest) -> NamingReply {
    let live = naming.instance_id();
    if request.instance != live {
        debug!(
            "rejecting {} for instance {:#x}; live instance is {live:#x}",
            request.call.label(),
            request.instance
        );
        return NamingReply::Fault {
            fault: WireFault::NoSuchObject {
                requested: request.instance,
            },
        };
    }
    let outcome = match request.call {
        NamingCall::Bind {
            name,
            object,
            class_name,
        } => naming.bind(&name, object, &class_name).map(|()| NamingReply::Done),
        NamingCall::Rebind {
            name,
            object,
            class_name,
        } => naming
            .rebind(&name, object, &class_name)
            .map(|()| NamingReply::Done),
        NamingCall::Unbind { name } => naming.unbind(&name).map(|()| NamingReply::Done),
        NamingCall::Lookup { name } => naming
            .lookup(&name)
            .map(|result| NamingReply::Lookup { result }),
        NamingCall::List { name } => naming
            .list(&name)
            .map(|entries| NamingReply::List { entries }),
        NamingCall::ListBindings { name } => naming
            .list_bindings(&name)
            .map(|bindings| NamingReply::Bindings { bindings }),
        NamingCall::CreateSubcontext { name } => naming
            .create_subcontext(&name)
            .map(|context| NamingReply::Context { context }),
    };
    outcome.unwrap_or_else(|error: NamingError| NamingReply::Fault {
        fault: WireFault::from(&error),
    })
}

/// TCP listener serving naming calls for one tree.
pub struct NamingInvoker {
    local_addr: SocketAddr,
    instance: u64,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl fmt::Debug for NamingInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingInvoker")
            .field("local_addr", &self.local_addr)
            .field("instance", &format_args!("{:#x}", self.instance))
            .finish_non_exhaustive()
    }
}

impl NamingInvoker {
    /// Bind `address` and start serving `naming`.
    pub fn start(
        naming: Arc<dyn Naming>,
        address: SocketAddr,
        timeout: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let instance = naming.instance_id();
        let acceptor = {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("naming-invoker".into())
                .spawn(move || accept_loop(listener, naming, shutdown, timeout))?
        };
        info!("naming endpoint listening on {local_addr}");
        Ok(Self {
            local_addr,
            instance,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    /// Address the endpoint is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stub advertising this endpoint under `host`.
    #[must_use]
    pub fn stub(&self, host: impl Into<String>) -> NamingStub {
        NamingStub {
            host: host.into(),
            port: self.local_addr.port(),
            instance: self.instance,
        }
    }

    /// Stop accepting connections. In-flight calls run to completion.
    pub fn stop(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        wake_acceptor(self.local_addr);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("naming endpoint acceptor panicked");
            }
        }
        info!("naming endpoint on {} stopped", self.local_addr);
    }
}

impl Drop for NamingInvoker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Connect to a listener so a blocked `accept` returns.
pub(crate) fn wake_acceptor(address: SocketAddr) {
    let mut target = address;
    if target.ip().is_unspecified() {
        let loopback = match target {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        };
        target.set_ip(loopback);
    }
    if let Err(error) = TcpStream::connect_timeout(&target, Duration::from_secs(1)) {
        debug!("wake-up connect to {target} failed: {error}");
    }
}

fn accept_loop(
    listener: TcpListener,
    naming: Arc<dyn Naming>,
    shutdown: Arc<AtomicBool>,
    timeout: Duration,
) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let naming = Arc::clone(&naming);
                let spawned = thread::Builder::new()
                    .name("naming-call".into())
                    .spawn(move || {
                        if let Err(error) = serve_connection(stream, naming.as_ref(), timeout) {
                            debug!("naming connection ended: {error}");
                        }
                    });
                if let Err(error) = spawned {
                    warn!("failed to spawn naming call handler: {error}");
                }
            }
            Err(error) => warn!("naming endpoint accept failed: {error}"),
        }
    }
}

fn serve_connection(stream: TcpStream, naming: &dyn Naming, timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let peer = stream.peer_addr()?;
    let mut reader = stream.try_clone()?;
    let mut writer = stream;
    loop {
        let request: NamingRequest = match read_frame(&mut reader) {
            Ok(request) => request,
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(error) => return Err(error),
        };
        trace!("{peer} -> {}", request.call.label());
        let reply = execute(naming, request);
        write_frame(&mut writer, &reply)?;
    }
    let _ = writer.shutdown(Shutdown::Both);
    Ok(())
}
