// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Hierarchical name syntax, URL scheme stripping, and host:port parsing.
// Author: Lukas Bower

//! Name syntax for the naming tree.
//!
//! Names are ordered component lists separated by `/`. A backslash escapes
//! the next character so components may contain separators. A leading empty
//! component marks an absolute name.

use std::fmt;
use std::net::IpAddr;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::NamingError;

/// Separator between name components.
pub const SEPARATOR: char = '/';
/// Escape character inside a component.
pub const ESCAPE: char = '\\';
/// Port used when a provider URL omits one.
pub const DEFAULT_BOOTSTRAP_PORT: u16 = 1099;

/// URL schemes recognised at the head of a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `local:` names resolved against the in-process tree.
    Local,
    /// `nd:` plain TCP transport.
    Nd,
    /// `nds:` TLS transport.
    Nds,
    /// `nd-http:` HTTP tunnelled transport.
    NdHttp,
    /// `nd-https:` HTTPS tunnelled transport.
    NdHttps,
}

impl Scheme {
    const ALL: [Scheme; 5] = [
        Scheme::NdHttps,
        Scheme::NdHttp,
        Scheme::Nds,
        Scheme::Nd,
        Scheme::Local,
    ];

    /// Literal prefix, including the trailing colon.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Scheme::Local => "local:",
            Scheme::Nd => "nd:",
            Scheme::Nds => "nds:",
            Scheme::NdHttp => "nd-http:",
            Scheme::NdHttps => "nd-https:",
        }
    }

    /// Detect the scheme that prefixes `component`, if any.
    #[must_use]
    pub fn detect(component: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|scheme| component.starts_with(scheme.prefix()))
    }
}

/// Ordered sequence of name components.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    /// The empty name, denoting "this context".
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a slash-separated name.
    pub fn parse(text: &str) -> Result<Self, NamingError> {
        if text.is_empty() {
            return Ok(Self::empty());
        }
        if text == "/" {
            return Ok(Self::from_components([""]));
        }
        let mut components = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars();
        while let Some(ch) = chars.next() {
            match ch {
                ESCAPE => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(NamingError::InvalidName(format!(
                            "trailing escape in {text:?}"
                        )))
                    }
                },
                SEPARATOR => components.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        components.push(current);
        Ok(Self { components })
    }

    /// Build a name from raw components without any parsing.
    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether this is the empty name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Component at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.components.get(index).map(String::as_str)
    }

    /// Borrow the components.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether the name is absolute (leading empty component).
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.get(0) == Some("")
    }

    /// First `count` components.
    #[must_use]
    pub fn prefix(&self, count: usize) -> Name {
        let end = count.min(self.components.len());
        Self {
            components: self.components[..end].to_vec(),
        }
    }

    /// Components from `start` onwards.
    #[must_use]
    pub fn suffix(&self, start: usize) -> Name {
        let start = start.min(self.components.len());
        Self {
            components: self.components[start..].to_vec(),
        }
    }

    /// Whether `other` is a component-wise prefix of this name.
    #[must_use]
    pub fn starts_with(&self, other: &Name) -> bool {
        self.components.starts_with(&other.components)
    }

    /// Append `other` to a copy of this name.
    #[must_use]
    pub fn concat(&self, other: &Name) -> Name {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        Self { components }
    }

    /// Append a component.
    pub fn push(&mut self, component: impl Into<String>) {
        self.components.push(component.into());
    }

    /// Insert a component at `index`.
    pub fn insert(&mut self, index: usize, component: impl Into<String>) {
        self.components.insert(index, component.into());
    }

    /// Remove and return the component at `index`.
    pub fn remove(&mut self, index: usize) -> Option<String> {
        (index < self.components.len()).then(|| self.components.remove(index))
    }
}

impl Index<usize> for Name {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.components[index]
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.len() == 1 && self.components[0].is_empty() {
            return f.write_str("/");
        }
        for (index, component) in self.components.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            for ch in component.chars() {
                if ch == SEPARATOR || ch == ESCAPE {
                    write!(f, "{ESCAPE}")?;
                }
                write!(f, "{ch}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

/// Outcome of stripping a URL scheme from a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Name left after the scheme and server info were removed.
    pub name: Name,
    /// `host:port` embedded in a `scheme://host:port/...` name.
    pub server_info: Option<String>,
}

/// Strip a recognised scheme prefix from `name`.
///
/// `scheme:` alone is dropped, `scheme://host:port/rest` yields the
/// server info and `rest`, and `scheme:literal` keeps `literal` as the first
/// component. Names without a scheme pass through untouched.
#[must_use]
pub fn parse_name_for_scheme(name: &Name) -> ParsedName {
    let Some(first) = name.get(0) else {
        return ParsedName {
            name: name.clone(),
            server_info: None,
        };
    };
    let Some(scheme) = Scheme::detect(first) else {
        return ParsedName {
            name: name.clone(),
            server_info: None,
        };
    };
    let suffix = first[scheme.prefix().len()..].to_owned();
    let mut rest = name.clone();
    let mut server_info = None;
    rest.remove(0);
    if suffix.is_empty() {
        if rest.len() > 1 && rest.get(0) == Some("") {
            server_info = rest.remove(1);
            rest.remove(0);
            if rest.len() == 1 && rest.get(0) == Some("") {
                rest.remove(0);
            }
        }
    } else {
        rest.insert(0, suffix);
    }
    ParsedName {
        name: rest,
        server_info,
    }
}

/// Network endpoint of a naming server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    /// Hostname or literal address, without IPv6 brackets.
    pub host: String,
    /// TCP or UDP port.
    pub port: u16,
}

impl HostPort {
    /// Construct an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]`, or `[v6]:port`.
    pub fn parse(text: &str, default_port: u16) -> Result<Self, NamingError> {
        let text = text.trim();
        let invalid = || NamingError::Configuration(format!("invalid server address {text:?}"));
        if text.is_empty() {
            return Err(invalid());
        }
        if let Some(rest) = text.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => default_port,
                None => return Err(invalid()),
            };
            return Ok(Self::new(host, port));
        }
        // An unbracketed IPv6 literal carries no port.
        if text.parse::<IpAddr>().map(|ip| ip.is_ipv6()).unwrap_or(false) {
            return Ok(Self::new(text, default_port));
        }
        match text.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                Ok(Self::new(host, port.parse().map_err(|_| invalid())?))
            }
            Some(_) => Err(invalid()),
            None => Ok(Self::new(text, default_port)),
        }
    }

    /// Parse a provider URL such as `nd://host:port/path` or `host:port`.
    pub fn parse_url(url: &str, default_port: u16) -> Result<Self, NamingError> {
        let mut rest = url.trim();
        if let Some(scheme) = Scheme::detect(rest) {
            rest = &rest[scheme.prefix().len()..];
        }
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let authority = match rest.find('/') {
            Some(end) => &rest[..end],
            None => rest,
        };
        Self::parse(authority, default_port)
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Format a bootstrap URL for the given endpoint.
#[must_use]
pub fn bootstrap_url(endpoint: &HostPort) -> String {
    format!("nd://{endpoint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        Name::parse(text).expect("valid name")
    }

    #[test]
    fn parses_components_and_escapes() {
        assert!(name("").is_empty());
        assert_eq!(name("a/b/c").components(), ["a", "b", "c"]);
        assert_eq!(name("/a").components(), ["", "a"]);
        assert_eq!(name("a/").components(), ["a", ""]);
        assert_eq!(name("/").components(), [""]);
        assert_eq!(name(r"a\/b/c").components(), ["a/b", "c"]);
        assert!(Name::parse("a\\").is_err());
    }

    #[test]
    fn display_round_trips_escaped_separators() {
        for text in ["a/b", "/", "/a/b", r"x\/y/z", "a/"] {
            assert_eq!(name(text).to_string(), text);
        }
    }

    #[test]
    fn strips_scheme_with_server_info() {
        let parsed = parse_name_for_scheme(&name("nd://10.0.0.2:1099/a/b"));
        assert_eq!(parsed.server_info.as_deref(), Some("10.0.0.2:1099"));
        assert_eq!(parsed.name, name("a/b"));

        let parsed = parse_name_for_scheme(&name("nd://host:1099/"));
        assert_eq!(parsed.server_info.as_deref(), Some("host:1099"));
        assert!(parsed.name.is_empty());
    }

    #[test]
    fn strips_bare_scheme_and_reinserts_literal() {
        let parsed = parse_name_for_scheme(&name("local:"));
        assert!(parsed.name.is_empty());
        assert!(parsed.server_info.is_none());

        let parsed = parse_name_for_scheme(&name("local:comp/env"));
        assert_eq!(parsed.name, name("comp/env"));

        let parsed = parse_name_for_scheme(&name("nd-https:x"));
        assert_eq!(parsed.name, name("x"));

        let untouched = name("plain/name");
        assert_eq!(parse_name_for_scheme(&untouched).name, untouched);
    }

    #[test]
    fn host_port_handles_ipv6_brackets() {
        let v4 = HostPort::parse("127.0.0.1:1099", 1).expect("v4");
        assert_eq!(v4, HostPort::new("127.0.0.1", 1099));
        let v6 = HostPort::parse("[::1]:2000", 1).expect("v6");
        assert_eq!(v6, HostPort::new("::1", 2000));
        assert_eq!(v6.to_string(), "[::1]:2000");
        assert_eq!(HostPort::parse("::1", 7).expect("bare v6").port, 7);
        assert_eq!(HostPort::parse("host", 1099).expect("no port").port, 1099);
        assert!(HostPort::parse("host:notaport", 1).is_err());
        assert_eq!(
            HostPort::parse_url("nd://server:1199/a/b", 1099).expect("url"),
            HostPort::new("server", 1199)
        );
        assert_eq!(bootstrap_url(&v6), "nd://[::1]:2000");
    }
}
