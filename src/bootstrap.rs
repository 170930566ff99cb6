// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bootstrap listener vending serialized naming handles over TCP.
// Author: Lukas Bower

//! Bootstrap protocol.
//!
//! A client connects, the listener writes one [`NamingStub`] frame and closes
//! the socket. The connection itself is the request.

use std::fmt;
use std::io::{self, BufWriter};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::NamingError;
use crate::invoker::wake_acceptor;
use crate::name::{bootstrap_url, HostPort};
use crate::wire::{write_frame, NamingStub};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Addresses to bind; each gets its own accept loop.
    pub bind_addresses: Vec<IpAddr>,
    /// Port; `0` picks an ephemeral port, a negative value disables the listener.
    pub port: i32,
    /// Accept backlog, already normalized.
    pub backlog: u32,
    /// Worker threads; defaults to one per address plus one.
    pub pool_size: Option<usize>,
    /// Write timeout for vending the handle.
    pub timeout: Duration,
}

impl BootstrapConfig {
    /// Listener settings from a daemon configuration.
    pub fn from_server_config(config: &ServerConfig) -> Result<Self, NamingError> {
        let bind_addresses = config
            .bind_addresses
            .iter()
            .map(|address| resolve_bind_address(address))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            bind_addresses,
            port: config.port,
            backlog: config.effective_backlog(),
            pool_size: config.pool_size,
            timeout: config.timeout(),
        })
    }

    fn effective_pool_size(&self) -> usize {
        let minimum = self.bind_addresses.len() + 1;
        self.pool_size.map_or(minimum, |size| size.max(minimum))
    }
}

fn resolve_bind_address(address: &str) -> Result<IpAddr, NamingError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }
    (address, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut resolved| resolved.next())
        .map(|resolved| resolved.ip())
        .ok_or_else(|| NamingError::Configuration(format!("unresolvable bind address {address}")))
}

/// Accepts bootstrap connections and hands out the naming stub.
pub struct BootstrapListener {
    local_addrs: Vec<SocketAddr>,
    urls: Vec<String>,
    port: i32,
    shutdown: Arc<AtomicBool>,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl fmt::Debug for BootstrapListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapListener")
            .field("urls", &self.urls)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl BootstrapListener {
    /// Bind every configured address and start vending `stub`.
    ///
    /// A negative port leaves the listener disabled with no URLs.
    pub fn start(stub: NamingStub, config: &BootstrapConfig) -> Result<Self, NamingError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        if config.port < 0 {
            info!("bootstrap listener disabled (port {})", config.port);
            return Ok(Self {
                local_addrs: Vec::new(),
                urls: Vec::new(),
                port: config.port,
                shutdown,
                jobs: None,
                workers: Vec::new(),
            });
        }
        let mut port = u16::try_from(config.port).map_err(|_| {
            NamingError::Configuration(format!("bootstrap port {} out of range", config.port))
        })?;
        let backlog = config.backlog;
        let mut listeners = Vec::with_capacity(config.bind_addresses.len());
        for address in &config.bind_addresses {
            let requested = SocketAddr::new(*address, port);
            let listener = TcpListener::bind(requested).map_err(|error| {
                error!("could not start bootstrap listener on {requested}: {error}");
                NamingError::io(format!("failed to bind bootstrap listener on {requested}"), error)
            })?;
            let local = listener
                .local_addr()
                .map_err(|error| NamingError::io("bootstrap listener has no address", error))?;
            if port == 0 {
                port = local.port();
            }
            debug!("bootstrap listener bound {local}, backlog={backlog}");
            listeners.push((listener, local));
        }

        let (jobs, queue) = unbounded::<Job>();
        let pool_size = config.effective_pool_size();
        let mut workers = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let queue = queue.clone();
            let worker = thread::Builder::new()
                .name(format!("naming-bootstrap#{}", index + 1))
                .spawn(move || worker_loop(queue))
                .map_err(|error| NamingError::io("failed to spawn bootstrap worker", error))?;
            workers.push(worker);
        }

        let stub = Arc::new(stub);
        let mut local_addrs = Vec::with_capacity(listeners.len());
        let mut urls = Vec::with_capacity(listeners.len());
        for (listener, local) in listeners {
            let url = bootstrap_url(&HostPort::new(local.ip().to_string(), local.port()));
            info!("bootstrap listener at {url}, naming endpoint {}", stub.endpoint());
            let accept: Job = {
                let stub = Arc::clone(&stub);
                let shutdown = Arc::clone(&shutdown);
                let jobs = jobs.clone();
                let timeout = config.timeout;
                Box::new(move || accept_loop(listener, stub, shutdown, jobs, timeout))
            };
            if jobs.send(accept).is_err() {
                return Err(NamingError::communication("bootstrap worker pool closed", None));
            }
            local_addrs.push(local);
            urls.push(url);
        }

        Ok(Self {
            local_addrs,
            urls,
            port: i32::from(port),
            shutdown,
            jobs: Some(jobs),
            workers,
        })
    }

    /// One URL per bound address, in bind order. Empty once stopped or when disabled.
    #[must_use]
    pub fn bootstrap_urls(&self) -> &[String] {
        &self.urls
    }

    /// First bootstrap URL, if any.
    #[must_use]
    pub fn bootstrap_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    /// Bound port, or the configured value when disabled.
    #[must_use]
    pub fn port(&self) -> i32 {
        self.port
    }

    /// Addresses actually bound.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Close the listening sockets and join the worker pool.
    pub fn stop(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        for address in &self.local_addrs {
            wake_acceptor(*address);
        }
        self.jobs = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("bootstrap worker panicked");
            }
        }
        self.urls.clear();
        info!("bootstrap listener stopped");
    }
}

impl Drop for BootstrapListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(queue: Receiver<Job>) {
    for job in queue {
        job();
    }
}

fn accept_loop(
    listener: TcpListener,
    stub: Arc<NamingStub>,
    shutdown: Arc<AtomicBool>,
    jobs: Sender<Job>,
    timeout: Duration,
) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let stub = Arc::clone(&stub);
                let job: Job = Box::new(move || {
                    if let Err(error) = vend_stub(stream, &stub, timeout) {
                        debug!("bootstrap client dropped: {error}");
                    }
                });
                if jobs.send(job).is_err() {
                    break;
                }
            }
            Err(error) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                warn!("bootstrap accept failed: {error}");
            }
        }
    }
}

fn vend_stub(stream: TcpStream, stub: &NamingStub, timeout: Duration) -> io::Result<()> {
    stream.set_write_timeout(Some(timeout))?;
    let peer = stream.peer_addr()?;
    trace!("vending naming stub to {peer}");
    let mut writer = BufWriter::new(&stream);
    write_frame(&mut writer, stub)?;
    drop(writer);
    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}
