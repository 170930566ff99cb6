// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: UDP discovery of naming servers and the matching responder.
// Author: Lukas Bower

//! Discovery protocol.
//!
//! The client sends `GET_ADDRESS` (or `GET_ADDRESS:<partition>`) to the
//! discovery group and waits for a `host:port` reply. Replies that echo the
//! request marker or do not parse are skipped until the timeout.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::config::Environment;
use crate::error::NamingError;
use crate::name::HostPort;

/// Request marker token.
pub const DISCOVERY_MARKER: &str = "GET_ADDRESS";

const MAX_DATAGRAM: usize = 512;
const RESPONDER_POLL: Duration = Duration::from_millis(200);

/// Whether discovery runs given the process default and a per-context override.
///
/// An explicit per-context value wins: `"true"` disables discovery, anything
/// else enables it. Without one the global flag decides.
#[must_use]
pub fn should_discovery_happen(global_disable: bool, per_context: Option<&str>) -> bool {
    match per_context {
        Some(value) => !value.trim().eq_ignore_ascii_case("true"),
        None => !global_disable,
    }
}

/// Request payload for an optional partition.
#[must_use]
pub fn discovery_request(partition: Option<&str>) -> String {
    match partition {
        Some(partition) => format!("{DISCOVERY_MARKER}:{partition}"),
        None => DISCOVERY_MARKER.to_owned(),
    }
}

fn decode(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_owned()
}

/// Leaves the multicast group when dropped.
struct Membership<'a> {
    socket: &'a UdpSocket,
    group: Option<IpAddr>,
}

impl<'a> Membership<'a> {
    fn join(socket: &'a UdpSocket, group: IpAddr) -> io::Result<Self> {
        if !group.is_multicast() {
            return Ok(Self {
                socket,
                group: None,
            });
        }
        match group {
            IpAddr::V4(group) => socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(group) => socket.join_multicast_v6(&group, 0)?,
        }
        Ok(Self {
            socket,
            group: Some(group),
        })
    }
}

impl Drop for Membership<'_> {
    fn drop(&mut self) {
        let left = match self.group {
            Some(IpAddr::V4(group)) => self.socket.leave_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED),
            Some(IpAddr::V6(group)) => self.socket.leave_multicast_v6(&group, 0),
            None => Ok(()),
        };
        if let Err(error) = left {
            debug!("failed to leave discovery group: {error}");
        }
    }
}

fn unspecified_for(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Client half of the discovery protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryClient {
    group: IpAddr,
    port: u16,
    ttl: u32,
    timeout: Duration,
    local_address: Option<IpAddr>,
    local_port: u16,
    partition: Option<String>,
}

impl DiscoveryClient {
    /// Client configured from the discovery keys of `env`.
    pub fn from_env(env: &Environment) -> Result<Self, NamingError> {
        Ok(Self {
            group: env.discovery_group()?,
            port: env.discovery_port()?,
            ttl: env.discovery_ttl()?,
            timeout: env.discovery_timeout()?,
            local_address: env.local_address()?,
            local_port: env.local_port()?,
            partition: env.partition_name().map(str::to_owned),
        })
    }

    /// Group and port requests are sent to.
    #[must_use]
    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }

    /// Send one request and wait for a server address.
    ///
    /// The socket is closed and the group left on every exit path.
    pub fn discover(&self) -> Result<HostPort, NamingError> {
        self.exchange().map_err(|error| {
            trace!("discovery via {} failed: {error}", self.target());
            NamingError::io(format!("discovery via {} failed", self.target()), error)
        })
    }

    fn exchange(&self) -> io::Result<HostPort> {
        let local = SocketAddr::new(
            self.local_address.unwrap_or_else(|| unspecified_for(self.group)),
            self.local_port,
        );
        let socket = UdpSocket::bind(local)?;
        let _membership = Membership::join(&socket, self.group)?;
        if self.group.is_multicast() {
            match self.group {
                IpAddr::V4(_) => {
                    socket.set_multicast_ttl_v4(self.ttl)?;
                    socket.set_multicast_loop_v4(true)?;
                }
                IpAddr::V6(_) => socket.set_multicast_loop_v6(true)?,
            }
        } else {
            socket.set_ttl(self.ttl)?;
        }

        let request = discovery_request(self.partition.as_deref());
        trace!("sending discovery packet({request}) to {}", self.target());
        socket.send_to(request.as_bytes(), self.target())?;

        let deadline = Instant::now() + self.timeout;
        let mut buffer = [0u8; MAX_DATAGRAM];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no discovery reply"));
            }
            socket.set_read_timeout(Some(remaining))?;
            let (len, from) = socket.recv_from(&mut buffer)?;
            let reply = decode(&buffer[..len]);
            trace!("received discovery answer {reply:?} from {from}");
            if reply.starts_with(DISCOVERY_MARKER) {
                continue;
            }
            match parse_reply(&reply) {
                Ok(endpoint) => return Ok(endpoint),
                Err(error) => warn!("skipping discovery reply from {from}: {error}"),
            }
        }
    }
}

fn parse_reply(reply: &str) -> io::Result<HostPort> {
    let (host, port) = reply.rsplit_once(':').ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, format!("malformed discovery reply {reply:?}"))
    })?;
    let port = port.trim().parse::<u16>().map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, format!("bad port in discovery reply {reply:?}"))
    })?;
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    Ok(HostPort::new(host, port))
}

/// Server half: answers discovery requests with the bootstrap endpoint.
pub struct DiscoveryResponder {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for DiscoveryResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryResponder")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl DiscoveryResponder {
    /// Bind `bind:port`, join `group` when it is multicast and answer with `advertised`.
    pub fn start(
        bind: IpAddr,
        group: IpAddr,
        port: u16,
        partition: Option<String>,
        advertised: HostPort,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(bind, port))?;
        if group.is_multicast() {
            match group {
                IpAddr::V4(group) => socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?,
                IpAddr::V6(group) => socket.join_multicast_v6(&group, 0)?,
            }
        }
        socket.set_read_timeout(Some(RESPONDER_POLL))?;
        let local_addr = socket.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("naming-discovery".into())
                .spawn(move || respond_loop(socket, partition, advertised, shutdown))?
        };
        info!("discovery responder listening on {local_addr}");
        Ok(Self {
            local_addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Address the responder is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop answering and join the responder thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("discovery responder panicked");
            }
        }
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn respond_loop(
    socket: UdpSocket,
    partition: Option<String>,
    advertised: HostPort,
    shutdown: Arc<AtomicBool>,
) {
    let answer = advertised.to_string();
    let mut buffer = [0u8; MAX_DATAGRAM];
    while !shutdown.load(Ordering::SeqCst) {
        let (len, from) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(error) => {
                warn!("discovery receive failed: {error}");
                continue;
            }
        };
        let request = decode(&buffer[..len]);
        let Some(rest) = request.strip_prefix(DISCOVERY_MARKER) else {
            trace!("ignoring discovery datagram {request:?} from {from}");
            continue;
        };
        let requested = rest.strip_prefix(':').filter(|name| !name.is_empty());
        if let Some(requested) = requested {
            if partition.as_deref() != Some(requested) {
                trace!("ignoring discovery for partition {requested} from {from}");
                continue;
            }
        }
        debug!("answering discovery from {from} with {answer}");
        if let Err(error) = socket.send_to(answer.as_bytes(), from) {
            warn!("discovery reply to {from} failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_context_flag_overrides_global_default() {
        assert!(should_discovery_happen(false, None));
        assert!(!should_discovery_happen(false, Some("true")));
        assert!(should_discovery_happen(false, Some("false")));
        assert!(!should_discovery_happen(true, None));
        assert!(!should_discovery_happen(true, Some("true")));
        assert!(should_discovery_happen(true, Some("false")));
    }

    #[test]
    fn request_carries_optional_partition() {
        assert_eq!(discovery_request(None), "GET_ADDRESS");
        assert_eq!(discovery_request(Some("blue")), "GET_ADDRESS:blue");
    }

    #[test]
    fn replies_parse_into_host_and_port() {
        let endpoint = parse_reply("127.0.0.1:1099").unwrap();
        assert_eq!(endpoint, HostPort::new("127.0.0.1", 1099));
        let v6 = parse_reply("[::1]:1100").unwrap();
        assert_eq!(v6, HostPort::new("::1", 1100));
        assert!(parse_reply("nonsense").is_err());
    }

    #[test]
    fn padding_is_stripped_from_payloads() {
        assert_eq!(decode(b"host:1\0\0\0  "), "host:1");
    }
}
