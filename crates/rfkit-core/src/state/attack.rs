//! Attack/session state machine of the ButteRFly firmware.
//!
//! Transitions are driven only by Connection_Report and Injection_Report
//! notifications. A report with no valid transition is rejected and the
//! current state is kept.

use std::fmt;

use tracing::{info, warn};

use super::connection::ConnectionTracker;
use crate::device::DeviceError;
use crate::protocol::butterfly::{AttackCode, ConnectionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttackKind {
    #[default]
    None,
    Injection,
    Mitm,
    MasterHijacking,
    SlaveHijacking,
}

impl AttackKind {
    pub fn code(self) -> AttackCode {
        match self {
            AttackKind::None => AttackCode::None,
            AttackKind::Injection => AttackCode::Injection,
            AttackKind::Mitm => AttackCode::Mitm,
            AttackKind::MasterHijacking => AttackCode::MasterHijacking,
            AttackKind::SlaveHijacking => AttackCode::SlaveHijacking,
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackKind::None => write!(f, "NONE"),
            AttackKind::Injection => write!(f, "INJECTION"),
            AttackKind::Mitm => write!(f, "MITM"),
            AttackKind::MasterHijacking => write!(f, "MASTER_HIJACKING"),
            AttackKind::SlaveHijacking => write!(f, "SLAVE_HIJACKING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttackStatus {
    #[default]
    Stopped,
    Launched,
    Running,
    Success,
    Failure,
}

impl fmt::Display for AttackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackStatus::Stopped => write!(f, "STOPPED"),
            AttackStatus::Launched => write!(f, "LAUNCHED"),
            AttackStatus::Running => write!(f, "RUNNING"),
            AttackStatus::Success => write!(f, "SUCCESS"),
            AttackStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Connection role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Slave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Synchronizing,
    Synchronized,
    /// We replaced the given role.
    Hijacking(Role),
    Mitming,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "IDLE"),
            LinkState::Synchronizing => write!(f, "SYNCHRONIZING"),
            LinkState::Synchronized => write!(f, "SYNCHRONIZED"),
            LinkState::Hijacking(Role::Master) => write!(f, "HIJACKING_MASTER"),
            LinkState::Hijacking(Role::Slave) => write!(f, "HIJACKING_SLAVE"),
            LinkState::Mitming => write!(f, "MITMING"),
        }
    }
}

/// What a sniffer is currently listening for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SniffingMode {
    #[default]
    Advertisements,
    NewConnection,
    ExistingConnection,
}

impl fmt::Display for SniffingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SniffingMode::Advertisements => write!(f, "ADVERTISEMENT"),
            SniffingMode::NewConnection => write!(f, "NEW_CONNECTION"),
            SniffingMode::ExistingConnection => write!(f, "EXISTING_CONNECTION"),
        }
    }
}

/// Follow-up the driver must perform after a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    None,
    /// Link followed; announce the parameters.
    Synchronized,
    /// Parameters were cleared; restart sniffing in this mode.
    RestartSniffing(SniffingMode),
    /// The attack succeeded and these roles can now be driven.
    RolesAvailable { master: bool, slave: bool },
    /// Status changed with nothing else to do.
    StatusChanged,
}

#[derive(Debug, Default)]
pub struct AttackSession {
    attack: AttackKind,
    status: AttackStatus,
    link: LinkState,
    mode: SniffingMode,
    connection: ConnectionTracker,
}

impl AttackSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attack(&self) -> AttackKind {
        self.attack
    }

    pub fn status(&self) -> AttackStatus {
        self.status
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn mode(&self) -> SniffingMode {
        self.mode
    }

    pub fn connection(&self) -> &ConnectionTracker {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionTracker {
        &mut self.connection
    }

    /// Following a connection with every parameter known.
    pub fn is_synchronized(&self) -> bool {
        matches!(
            self.link,
            LinkState::Synchronized | LinkState::Hijacking(_) | LinkState::Mitming
        ) && self.connection.is_synchronized()
    }

    pub fn is_hijacked(&self) -> bool {
        matches!(self.link, LinkState::Hijacking(_))
    }

    pub fn is_mitmed(&self) -> bool {
        self.link == LinkState::Mitming
    }

    fn goto(&mut self, link: LinkState) {
        if self.link != link {
            info!(from = %self.link, to = %link, "Link state transition");
            self.link = link;
        }
    }

    fn set_status(&mut self, status: AttackStatus) {
        info!(attack = %self.attack, from = %self.status, to = %status, "Attack status");
        self.status = status;
    }

    fn reject(&self, what: impl fmt::Display) -> DeviceError {
        let err = DeviceError::StateTransition(format!(
            "{} in link={} attack={} status={}",
            what, self.link, self.attack, self.status
        ));
        warn!(error = %err, "Ignoring report");
        err
    }

    /// Reset everything and start listening in `mode`.
    pub fn restart_sniffing(&mut self, mode: SniffingMode) {
        self.mode = mode;
        self.attack = AttackKind::None;
        self.status = AttackStatus::Stopped;
        self.connection.clear();
        self.goto(match mode {
            SniffingMode::Advertisements => LinkState::Idle,
            _ => LinkState::Synchronizing,
        });
    }

    /// Mark the link followed once existing-connection recovery completed.
    pub fn recovery_complete(&mut self) -> SessionAction {
        if self.connection.is_synchronized() {
            self.goto(LinkState::Synchronized);
            SessionAction::Synchronized
        } else {
            SessionAction::None
        }
    }

    /// Record that START_ATTACK was sent.
    pub fn launch(&mut self, attack: AttackKind) -> Result<(), DeviceError> {
        if attack == AttackKind::None {
            return Err(self.reject("launch of attack NONE"));
        }
        if !self.is_synchronized() {
            return Err(self.reject(format!("launch of {}", attack)));
        }
        self.attack = attack;
        self.set_status(AttackStatus::Launched);
        Ok(())
    }

    /// Undo [`AttackSession::launch`] when START_ATTACK was never acknowledged.
    pub fn cancel_launch(&mut self) {
        if self.status == AttackStatus::Launched {
            self.attack = AttackKind::None;
            self.set_status(AttackStatus::Stopped);
        }
    }

    fn clear_after_failure(&mut self) -> SessionAction {
        self.connection.mark_lost();
        let mode = self.mode;
        let link = match mode {
            SniffingMode::Advertisements => LinkState::Idle,
            _ => LinkState::Synchronizing,
        };
        self.goto(link);
        SessionAction::RestartSniffing(mode)
    }

    pub fn apply_connection_report(
        &mut self,
        status: ConnectionStatus,
    ) -> Result<SessionAction, DeviceError> {
        match status {
            ConnectionStatus::Started => {
                if !matches!(self.link, LinkState::Idle | LinkState::Synchronizing) {
                    return Err(self.reject("connection started"));
                }
                self.goto(LinkState::Synchronized);
                if !self.connection.is_synchronized() {
                    warn!("Connection followed before its parameters were captured");
                }
                Ok(SessionAction::Synchronized)
            }
            ConnectionStatus::Lost => {
                if self.link == LinkState::Idle && !self.connection.parameters().is_complete() {
                    return Err(self.reject("connection lost"));
                }
                if matches!(self.status, AttackStatus::Launched | AttackStatus::Running) {
                    self.set_status(AttackStatus::Failure);
                }
                self.attack = AttackKind::None;
                Ok(self.clear_after_failure())
            }
            ConnectionStatus::AttackStarted => {
                if self.status != AttackStatus::Launched {
                    return Err(self.reject("attack started"));
                }
                self.set_status(AttackStatus::Running);
                Ok(SessionAction::StatusChanged)
            }
            ConnectionStatus::AttackSuccess => {
                if !matches!(self.status, AttackStatus::Launched | AttackStatus::Running)
                    || self.attack == AttackKind::Injection
                {
                    return Err(self.reject("attack success"));
                }
                self.set_status(AttackStatus::Success);
                let (link, master, slave) = match self.attack {
                    AttackKind::Mitm => (LinkState::Mitming, true, true),
                    // Hijacking the slave means we now act as the slave.
                    AttackKind::SlaveHijacking => (LinkState::Hijacking(Role::Slave), false, true),
                    _ => (LinkState::Hijacking(Role::Master), true, false),
                };
                self.goto(link);
                Ok(SessionAction::RolesAvailable { master, slave })
            }
            ConnectionStatus::AttackFailure => {
                if !matches!(self.status, AttackStatus::Launched | AttackStatus::Running) {
                    return Err(self.reject("attack failure"));
                }
                self.set_status(AttackStatus::Failure);
                Ok(self.clear_after_failure())
            }
        }
    }

    /// Injection reports finish an injection attack without touching the link.
    pub fn apply_injection_report(
        &mut self,
        success: bool,
        count: u32,
    ) -> Result<SessionAction, DeviceError> {
        if self.attack != AttackKind::Injection
            || !matches!(self.status, AttackStatus::Launched | AttackStatus::Running)
        {
            return Err(self.reject("injection report"));
        }
        info!(success, attempts = count, "Injection report");
        self.set_status(if success {
            AttackStatus::Success
        } else {
            AttackStatus::Failure
        });
        Ok(SessionAction::StatusChanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synchronized_session() -> AttackSession {
        let mut session = AttackSession::new();
        session.restart_sniffing(SniffingMode::NewConnection);
        session.connection_mut().seed(Some(0x50654A2B), Some(0x123456), Some(0x1F_FFFF_FFFF));
        session.connection_mut().update_hop_interval(36).unwrap();
        session.connection_mut().update_hop_increment(7).unwrap();
        session.apply_connection_report(ConnectionStatus::Started).unwrap();
        assert!(session.is_synchronized());
        session
    }

    #[test]
    fn test_mitm_success_exposes_both_roles() {
        let mut session = synchronized_session();
        session.launch(AttackKind::Mitm).unwrap();
        session.apply_connection_report(ConnectionStatus::AttackStarted).unwrap();
        assert_eq!(session.status(), AttackStatus::Running);

        let action = session.apply_connection_report(ConnectionStatus::AttackSuccess).unwrap();
        assert_eq!(action, SessionAction::RolesAvailable { master: true, slave: true });
        assert!(session.is_mitmed());
        assert!(session.is_synchronized());
    }

    #[test]
    fn test_single_hijack_exposes_one_role() {
        let mut session = synchronized_session();
        session.launch(AttackKind::MasterHijacking).unwrap();
        let action = session.apply_connection_report(ConnectionStatus::AttackSuccess).unwrap();
        assert_eq!(action, SessionAction::RolesAvailable { master: true, slave: false });
        assert_eq!(session.link(), LinkState::Hijacking(Role::Master));
    }

    #[test]
    fn test_connection_lost_clears_and_restarts() {
        let mut session = synchronized_session();
        session.launch(AttackKind::SlaveHijacking).unwrap();
        session.apply_connection_report(ConnectionStatus::AttackSuccess).unwrap();
        assert!(session.is_hijacked());

        let action = session.apply_connection_report(ConnectionStatus::Lost).unwrap();
        assert_eq!(action, SessionAction::RestartSniffing(SniffingMode::NewConnection));
        assert!(!session.is_synchronized());
        assert!(!session.is_hijacked());
        assert_eq!(session.connection().parameters().access_address, None);
        assert_eq!(session.connection().parameters().hop_increment, None);
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut session = synchronized_session();
        let err = session.apply_connection_report(ConnectionStatus::AttackSuccess);
        assert!(matches!(err, Err(DeviceError::StateTransition(_))));
        assert_eq!(session.link(), LinkState::Synchronized);
        assert_eq!(session.status(), AttackStatus::Stopped);
        assert!(session.apply_injection_report(true, 1).is_err());
    }

    #[test]
    fn test_injection_failure_does_not_restart() {
        let mut session = synchronized_session();
        session.launch(AttackKind::Injection).unwrap();
        let action = session.apply_injection_report(false, 10).unwrap();
        assert_eq!(action, SessionAction::StatusChanged);
        assert_eq!(session.status(), AttackStatus::Failure);
        assert!(session.is_synchronized());
    }

    #[test]
    fn test_attack_needs_synchronization() {
        let mut session = AttackSession::new();
        assert!(session.launch(AttackKind::Mitm).is_err());
        assert_eq!(session.status(), AttackStatus::Stopped);
    }
}
