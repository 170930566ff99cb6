// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Client proxy implementing the naming interface over TCP frames.
// Author: Lukas Bower

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::trace;

use crate::binding::{Binding, ContextRef, LookupResult, NameClassPair, NamingObject};
use crate::config::{Environment, DEFAULT_SOCKET_TIMEOUT};
use crate::error::NamingError;
use crate::name::{HostPort, Name};
use crate::naming::Naming;
use crate::wire::{read_frame, write_frame, NamingCall, NamingReply, NamingRequest, NamingStub};

/// Resolve `endpoint` and connect within `timeout`.
///
/// A refused connection maps to [`NamingError::ConnectRefused`]; any other
/// failure is a communication failure.
pub fn connect(endpoint: &HostPort, timeout: Duration) -> Result<TcpStream, NamingError> {
    let addresses: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|error| NamingError::io(format!("failed to resolve {endpoint}"), error))?
        .collect();
    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }
    match last_error {
        Some(error) if error.kind() == io::ErrorKind::ConnectionRefused => {
            Err(NamingError::ConnectRefused {
                target: endpoint.to_string(),
                source: error,
            })
        }
        Some(error) => Err(NamingError::io(format!("failed to connect to {endpoint}"), error)),
        None => Err(NamingError::communication(
            format!("no addresses resolved for {endpoint}"),
            None,
        )),
    }
}

/// Proxy to a tree served by a remote naming endpoint.
pub struct RemoteNaming {
    stub: NamingStub,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl fmt::Debug for RemoteNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteNaming")
            .field("endpoint", &self.stub.endpoint().to_string())
            .field("instance", &format_args!("{:#x}", self.stub.instance))
            .finish_non_exhaustive()
    }
}

impl RemoteNaming {
    /// Proxy for `stub` with default timeouts.
    #[must_use]
    pub fn new(stub: NamingStub) -> Self {
        Self {
            stub,
            connect_timeout: DEFAULT_SOCKET_TIMEOUT,
            read_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }

    /// Proxy for `stub` with timeouts taken from `env`.
    pub fn from_env(stub: NamingStub, env: &Environment) -> Result<Self, NamingError> {
        Ok(Self {
            stub,
            connect_timeout: env.connect_timeout()?,
            read_timeout: env.read_timeout()?,
        })
    }

    /// The stub this proxy speaks for.
    #[must_use]
    pub fn stub(&self) -> &NamingStub {
        &self.stub
    }

    fn call(&self, call: NamingCall) -> Result<NamingReply, NamingError> {
        let endpoint = self.stub.endpoint();
        let label = call.label();
        let stream = connect(&endpoint, self.connect_timeout)?;
        let io_error = |error: io::Error| NamingError::io(format!("{label} on {endpoint} failed"), error);
        stream.set_read_timeout(Some(self.read_timeout)).map_err(io_error)?;
        stream.set_write_timeout(Some(self.read_timeout)).map_err(io_error)?;
        let mut reader = stream.try_clone().map_err(io_error)?;
        let mut writer = stream;
        trace!("{label} -> {endpoint}");
        write_frame(
            &mut writer,
            &NamingRequest {
                instance: self.stub.instance,
                call,
            },
        )
        .map_err(io_error)?;
        match read_frame(&mut reader).map_err(io_error)? {
            NamingReply::Fault { fault } => Err(NamingError::from(fault)),
            reply => Ok(reply),
        }
    }

    fn unexpected(reply: NamingReply) -> NamingError {
        NamingError::communication(format!("unexpected naming reply {reply:?}"), None)
    }
}

impl Naming for RemoteNaming {
    fn bind(&self, name: &Name, object: NamingObject, class_name: &str) -> Result<(), NamingError> {
        match self.call(NamingCall::Bind {
            name: name.clone(),
            object,
            class_name: class_name.to_owned(),
        })? {
            NamingReply::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    fn rebind(
        &self,
        name: &Name,
        object: NamingObject,
        class_name: &str,
    ) -> Result<(), NamingError> {
        match self.call(NamingCall::Rebind {
            name: name.clone(),
            object,
            class_name: class_name.to_owned(),
        })? {
            NamingReply::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    fn unbind(&self, name: &Name) -> Result<(), NamingError> {
        match self.call(NamingCall::Unbind { name: name.clone() })? {
            NamingReply::Done => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    fn lookup(&self, name: &Name) -> Result<LookupResult, NamingError> {
        match self.call(NamingCall::Lookup { name: name.clone() })? {
            NamingReply::Lookup { result } => Ok(result),
            other => Err(Self::unexpected(other)),
        }
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError> {
        match self.call(NamingCall::List { name: name.clone() })? {
            NamingReply::List { entries } => Ok(entries),
            other => Err(Self::unexpected(other)),
        }
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding>, NamingError> {
        match self.call(NamingCall::ListBindings { name: name.clone() })? {
            NamingReply::Bindings { bindings } => Ok(bindings),
            other => Err(Self::unexpected(other)),
        }
    }

    fn create_subcontext(&self, name: &Name) -> Result<ContextRef, NamingError> {
        match self.call(NamingCall::CreateSubcontext { name: name.clone() })? {
            NamingReply::Context { context } => Ok(context),
            other => Err(Self::unexpected(other)),
        }
    }

    fn instance_id(&self) -> u64 {
        self.stub.instance
    }
}
