// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Length-prefixed JSON frames for naming calls and the bootstrap stub.
// Author: Lukas Bower

//! Wire formats.
//!
//! Every frame is a little-endian `u32` byte count followed by a JSON body.
//! The bootstrap listener writes one [`NamingStub`] frame per connection. The
//! naming endpoint reads [`NamingRequest`] frames and answers each with a
//! [`NamingReply`].

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::binding::{Binding, ContextRef, LookupResult, NameClassPair, NamingObject};
use crate::error::WireFault;
use crate::name::{HostPort, Name};

/// Largest frame body accepted.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Serialized handle to a naming tree instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingStub {
    /// Host of the naming endpoint.
    pub host: String,
    /// Port of the naming endpoint.
    pub port: u16,
    /// Tree instance the handle is bound to.
    pub instance: u64,
}

impl NamingStub {
    /// Endpoint of the naming RPC listener.
    #[must_use]
    pub fn endpoint(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.port)
    }
}

/// Operation carried by a request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingCall {
    /// `bind`
    Bind {
        /// Target name.
        name: Name,
        /// Object to bind.
        object: NamingObject,
        /// Type tag.
        class_name: String,
    },
    /// `rebind`
    Rebind {
        /// Target name.
        name: Name,
        /// Object to bind.
        object: NamingObject,
        /// Type tag.
        class_name: String,
    },
    /// `unbind`
    Unbind {
        /// Target name.
        name: Name,
    },
    /// `lookup`
    Lookup {
        /// Target name.
        name: Name,
    },
    /// `list`
    List {
        /// Context name.
        name: Name,
    },
    /// `listBindings`
    ListBindings {
        /// Context name.
        name: Name,
    },
    /// `createSubcontext`
    CreateSubcontext {
        /// New context name.
        name: Name,
    },
}

impl NamingCall {
    /// Operation label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            NamingCall::Bind { .. } => "bind",
            NamingCall::Rebind { .. } => "rebind",
            NamingCall::Unbind { .. } => "unbind",
            NamingCall::Lookup { .. } => "lookup",
            NamingCall::List { .. } => "list",
            NamingCall::ListBindings { .. } => "listBindings",
            NamingCall::CreateSubcontext { .. } => "createSubcontext",
        }
    }
}

/// Request frame: the instance the caller believes it talks to plus the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingRequest {
    /// Instance id from the caller's stub.
    pub instance: u64,
    /// Operation.
    pub call: NamingCall,
}

/// Reply frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingReply {
    /// Mutation succeeded.
    Done,
    /// Lookup result.
    Lookup {
        /// Raw result.
        result: LookupResult,
    },
    /// Listing.
    List {
        /// Entries.
        entries: Vec<NameClassPair>,
    },
    /// Binding listing.
    Bindings {
        /// Bindings.
        bindings: Vec<Binding>,
    },
    /// New subcontext.
    Context {
        /// Handle.
        context: ContextRef,
    },
    /// Operation failed.
    Fault {
        /// Error description.
        fault: WireFault,
    },
}

/// Write one frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> io::Result<()> {
    let body = serde_json::to_vec(message).map_err(io::Error::from)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Read one frame.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stub_frame_has_length_prefix() {
        let stub = NamingStub {
            host: "127.0.0.1".into(),
            port: 1098,
            instance: 42,
        };
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &stub).expect("write");
        let declared = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        assert_eq!(declared, buffer.len() - 4);
        let decoded: NamingStub = read_frame(&mut Cursor::new(buffer)).expect("read");
        assert_eq!(decoded, stub);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut buffer = (MAX_FRAME_LEN + 1).to_le_bytes().to_vec();
        buffer.extend_from_slice(b"{}");
        let error = read_frame::<_, NamingStub>(&mut Cursor::new(buffer)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_frames_fail() {
        let buffer = 10u32.to_le_bytes().to_vec();
        let error = read_frame::<_, NamingStub>(&mut Cursor::new(buffer)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }
}
