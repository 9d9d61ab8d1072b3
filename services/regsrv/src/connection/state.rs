//! Connection state record and its transitions
//!
//! The record is only mutated through the methods below, each of which checks
//! the current phase. `connected`/`connecting` are derived from the phase, so
//! they can never both be true.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::error::{RegsrvError, Result};
use crate::transport::{TransportMode, TransportStats};

/// Lifecycle phase of the single device link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl LinkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPhase::Disconnected => "disconnected",
            LinkPhase::Connecting => "connecting",
            LinkPhase::Connected => "connected",
            LinkPhase::Disconnecting => "disconnecting",
        }
    }
}

/// Where the connection is going
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub ip: String,
    pub port: u16,
    pub unit_id: u8,
    pub mode: TransportMode,
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    phase: LinkPhase,
    // Bumped on every connect so late results of an old attempt are ignored
    session: u64,
    target: Option<Target>,
    message: String,
    last_error: Option<String>,
    last_keep_alive_ok: Option<DateTime<Utc>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: LinkPhase::Disconnected,
            session: 0,
            target: None,
            message: "Disconnected".to_string(),
            last_error: None,
            last_keep_alive_ok: None,
        }
    }
}

impl ConnectionState {
    pub(crate) fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub(crate) fn session(&self) -> u64 {
        self.session
    }

    pub(crate) fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub(crate) fn is_connected_session(&self, session: u64) -> bool {
        self.phase == LinkPhase::Connected && self.session == session
    }

    /// Reject a connect request unless fully disconnected
    pub(crate) fn ensure_idle(&self) -> Result<()> {
        match self.phase {
            LinkPhase::Disconnected => Ok(()),
            _ => Err(RegsrvError::AlreadyActive),
        }
    }

    /// Record a failed reachability probe; no transition
    pub(crate) fn record_probe_failure(&mut self, target: Target, error: String) {
        if self.phase != LinkPhase::Disconnected {
            return;
        }
        self.target = Some(target);
        self.message = "Connection failed".to_string();
        self.last_error = Some(error);
        self.last_keep_alive_ok = None;
    }

    /// Disconnected -> Connecting. Returns the new session id.
    pub(crate) fn begin_connect(&mut self, target: Target) -> Result<u64> {
        self.ensure_idle()?;
        self.session = self.session.wrapping_add(1);
        self.phase = LinkPhase::Connecting;
        self.message = format!("Connecting ({})...", target.mode);
        self.target = Some(target);
        self.last_error = None;
        self.last_keep_alive_ok = None;
        Ok(self.session)
    }

    /// Connecting -> Connected, only for the current session
    pub(crate) fn mark_connected(&mut self, session: u64, message: &str) -> bool {
        if self.session != session || self.phase != LinkPhase::Connecting {
            return false;
        }
        self.phase = LinkPhase::Connected;
        self.message = if message.is_empty() {
            "Connected".to_string()
        } else {
            message.to_string()
        };
        self.last_error = None;
        true
    }

    /// Connecting -> Disconnected after the worker gave up, only for the
    /// current session
    pub(crate) fn fail_connect(&mut self, session: u64, message: String, error: String) -> bool {
        if self.session != session || self.phase != LinkPhase::Connecting {
            return false;
        }
        self.reset(message, Some(error));
        true
    }

    /// Connecting|Connected -> Disconnecting. Returns the phase left.
    pub(crate) fn begin_disconnect(&mut self) -> Result<LinkPhase> {
        match self.phase {
            LinkPhase::Connecting | LinkPhase::Connected => {
                let previous = self.phase;
                self.phase = LinkPhase::Disconnecting;
                self.message = "Disconnecting...".to_string();
                Ok(previous)
            },
            LinkPhase::Disconnected | LinkPhase::Disconnecting => Err(RegsrvError::NotConnected),
        }
    }

    /// Back to the initial record; the session counter is kept
    pub(crate) fn reset(&mut self, message: String, error: Option<String>) {
        self.phase = LinkPhase::Disconnected;
        self.target = None;
        self.message = message;
        self.last_error = error;
        self.last_keep_alive_ok = None;
    }

    /// Record a failure that leaves the link up
    pub(crate) fn set_last_error(&mut self, session: u64, error: String) {
        if self.is_connected_session(session) {
            self.last_error = Some(error);
        }
    }

    pub(crate) fn clear_last_error(&mut self, session: u64) {
        if self.is_connected_session(session) {
            self.last_error = None;
        }
    }

    pub(crate) fn stamp_keep_alive(&mut self, session: u64, at: DateTime<Utc>) {
        if self.is_connected_session(session) {
            self.last_keep_alive_ok = Some(at);
        }
    }

    pub(crate) fn snapshot(&self, uptime: Duration, stats: Option<TransportStats>) -> ConnectionStatus {
        let target = self.target.as_ref();
        ConnectionStatus {
            connected: self.phase == LinkPhase::Connected,
            connecting: self.phase == LinkPhase::Connecting,
            phase: self.phase,
            ip: target.map(|t| t.ip.clone()),
            port: target.map(|t| t.port),
            unit_id: target.map(|t| t.unit_id),
            mode: target.map(|t| t.mode),
            message: self.message.clone(),
            uptime: if self.phase == LinkPhase::Connected {
                uptime
            } else {
                Duration::ZERO
            },
            last_error: self.last_error.clone(),
            last_keep_alive_ok: self.last_keep_alive_ok,
            stats,
        }
    }
}

/// Copy of the connection state handed to callers
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub connecting: bool,
    pub phase: LinkPhase,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
    pub mode: Option<TransportMode>,
    pub message: String,
    #[serde(rename = "uptime_secs", serialize_with = "serialize_secs")]
    pub uptime: Duration,
    pub last_error: Option<String>,
    pub last_keep_alive_ok: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<TransportStats>,
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}
