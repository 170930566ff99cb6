// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Path permissions for naming operations and the pluggable checker.
// Author: Lukas Bower

//! Permission patterns guarding tree operations.
//!
//! A permission pairs a path pattern with an action set. Patterns are a
//! literal path, `dir/*` (exactly one level below `dir`), `dir/-` (any depth
//! below `dir`), or the universal `<<ALL BINDINGS>>`.

use std::fmt;

use bitflags::bitflags;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::name::Name;

/// Pattern that implies every path.
pub const ALL_BINDINGS: &str = "<<ALL BINDINGS>>";

bitflags! {
    /// Naming actions a permission grants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Actions: u32 {
        /// `bind`
        const BIND = 1;
        /// `rebind`
        const REBIND = 2;
        /// `unbind`
        const UNBIND = 4;
        /// `lookup`
        const LOOKUP = 8;
        /// `list`
        const LIST = 16;
        /// `listBindings`
        const LIST_BINDINGS = 32;
        /// `createSubcontext`
        const CREATE_SUBCONTEXT = 64;
        /// `*`
        const ALL = 127;
    }
}

const ACTION_NAMES: [(Actions, &str); 7] = [
    (Actions::BIND, "bind"),
    (Actions::REBIND, "rebind"),
    (Actions::UNBIND, "unbind"),
    (Actions::LOOKUP, "lookup"),
    (Actions::LIST, "list"),
    (Actions::LIST_BINDINGS, "listBindings"),
    (Actions::CREATE_SUBCONTEXT, "createSubcontext"),
];

/// Errors raised while building a permission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    /// The action list named something other than a known action.
    #[error("unknown naming action {0:?}")]
    UnknownAction(String),
    /// The action list was empty.
    #[error("empty naming action list")]
    EmptyActions,
}

impl Actions {
    /// Parse a comma-separated list such as `"bind,lookup"` or `"*"`.
    pub fn parse(text: &str) -> Result<Self, PermissionError> {
        let mut actions = Actions::empty();
        let mut seen = false;
        for token in text.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            seen = true;
            if token == "*" {
                actions |= Actions::ALL;
                continue;
            }
            let (action, _) = ACTION_NAMES
                .iter()
                .find(|(_, name)| *name == token)
                .ok_or_else(|| PermissionError::UnknownAction(token.to_owned()))?;
            actions |= *action;
        }
        if !seen {
            return Err(PermissionError::EmptyActions);
        }
        Ok(actions)
    }

    /// Canonical comma-separated form.
    #[must_use]
    pub fn names(self) -> String {
        if self.contains(Actions::ALL) {
            return "*".to_owned();
        }
        ACTION_NAMES
            .iter()
            .filter(|(action, _)| self.contains(*action))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Path pattern plus action set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamingPermission {
    path: String,
    actions: Actions,
}

impl NamingPermission {
    /// Build a permission from an action list such as `"bind,rebind"`.
    pub fn new(path: impl Into<String>, actions: &str) -> Result<Self, PermissionError> {
        Ok(Self::with_actions(path, Actions::parse(actions)?))
    }

    /// Build a permission from an action mask.
    pub fn with_actions(path: impl Into<String>, actions: Actions) -> Self {
        Self {
            path: path.into(),
            actions,
        }
    }

    /// Candidate permission for an operation on `name`.
    #[must_use]
    pub fn for_name(name: &Name, action: Actions) -> Self {
        Self::with_actions(name.to_string(), action)
    }

    /// Path pattern.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Action mask.
    #[must_use]
    pub fn actions(&self) -> Actions {
        self.actions
    }

    /// Whether holding `self` grants `other`.
    #[must_use]
    pub fn implies(&self, other: &NamingPermission) -> bool {
        self.actions.contains(other.actions) && self.implies_path(&other.path)
    }

    fn implies_path(&self, candidate: &str) -> bool {
        if self.path == ALL_BINDINGS {
            return true;
        }
        if self.path == candidate {
            return true;
        }
        let (Ok(pattern), Ok(candidate)) = (Name::parse(&self.path), Name::parse(candidate))
        else {
            return false;
        };
        let Some(last) = pattern.get(pattern.len().wrapping_sub(1)) else {
            return false;
        };
        let base = pattern.prefix(pattern.len() - 1);
        match last {
            "*" => candidate.len() == pattern.len() && candidate.starts_with(&base),
            "-" => candidate.len() > base.len() && candidate.starts_with(&base),
            _ => pattern == candidate,
        }
    }
}

impl fmt::Display for NamingPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(\"{}\" \"{}\")", self.path, self.actions.names())
    }
}

/// Decides whether a candidate permission is granted.
pub trait PermissionChecker: Send + Sync {
    /// Return `true` when `candidate` is allowed.
    fn permits(&self, candidate: &NamingPermission) -> bool;
}

/// Checker that allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn permits(&self, _candidate: &NamingPermission) -> bool {
        true
    }
}

/// Grant entry as written in the server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PermissionGrant {
    /// Path pattern.
    pub path: String,
    /// Comma-separated action names.
    pub actions: String,
}

/// Checker backed by a fixed list of granted permissions.
#[derive(Debug, Default, Clone)]
pub struct PolicyChecker {
    grants: Vec<NamingPermission>,
}

impl PolicyChecker {
    /// Build a checker from granted permissions.
    #[must_use]
    pub fn new(grants: Vec<NamingPermission>) -> Self {
        Self { grants }
    }

    /// Build a checker from configuration entries.
    pub fn from_grants(grants: &[PermissionGrant]) -> Result<Self, PermissionError> {
        let grants = grants
            .iter()
            .map(|grant| NamingPermission::new(grant.path.clone(), &grant.actions))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(grants))
    }

    /// Add a grant.
    pub fn grant(&mut self, permission: NamingPermission) {
        self.grants.push(permission);
    }
}

impl PermissionChecker for PolicyChecker {
    fn permits(&self, candidate: &NamingPermission) -> bool {
        let allowed = self.grants.iter().any(|grant| grant.implies(candidate));
        if !allowed {
            debug!("policy denies {candidate}");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(path: &str, actions: &str) -> NamingPermission {
        NamingPermission::new(path, actions).expect("valid permission")
    }

    #[test]
    fn action_masks_match_names() {
        assert_eq!(Actions::parse("bind").unwrap().bits(), 1);
        assert_eq!(Actions::parse("createSubcontext").unwrap().bits(), 64);
        assert_eq!(Actions::parse("*").unwrap(), Actions::ALL);
        assert_eq!(
            Actions::parse(" lookup , list ").unwrap(),
            Actions::LOOKUP | Actions::LIST
        );
        assert_eq!(
            Actions::parse("bind,bogus"),
            Err(PermissionError::UnknownAction("bogus".into()))
        );
        assert_eq!(Actions::parse(" , "), Err(PermissionError::EmptyActions));
        assert_eq!((Actions::BIND | Actions::LIST_BINDINGS).names(), "bind,listBindings");
        assert_eq!(Actions::ALL.names(), "*");
    }

    #[test]
    fn single_level_wildcard_matches_one_component() {
        let holder = perm("/path1/*", "*");
        assert!(holder.implies(&perm("/path1/", "bind")));
        assert!(holder.implies(&perm("/path1/x", "bind")));
        assert!(!holder.implies(&perm("/path1", "bind")));
        assert!(!holder.implies(&perm("/path1/x/y", "bind")));
    }

    #[test]
    fn literal_paths_do_not_imply_children_or_parents() {
        assert!(!perm("1/2", "*").implies(&perm("1/2/3", "bind")));
        assert!(!perm("1/2/3/4", "*").implies(&perm("1/2/3", "bind")));
        assert!(perm("1/2", "bind").implies(&perm("1/2", "bind")));
    }

    #[test]
    fn actions_must_be_a_superset() {
        let holder = perm("a", "bind,lookup");
        assert!(holder.implies(&perm("a", "lookup")));
        assert!(!holder.implies(&perm("a", "lookup,unbind")));
    }

    #[test]
    fn policy_checker_uses_any_grant() {
        let grants = [
            PermissionGrant {
                path: "path1".into(),
                actions: "lookup".into(),
            },
            PermissionGrant {
                path: "path1/*".into(),
                actions: "bind".into(),
            },
        ];
        let checker = PolicyChecker::from_grants(&grants).expect("grants");
        assert!(checker.permits(&perm("path1", "lookup")));
        assert!(checker.permits(&perm("path1/x", "bind")));
        assert!(!checker.permits(&perm("path2", "lookup")));
    }
}
