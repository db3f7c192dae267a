//! Observer session that prints what happens to applications.

use anyhow::Result;
use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;

use crate::bus::{Bus, CloseReason, Message, Payload};
use crate::core::{Role, SessionId};
use crate::logger::status_warning;

#[derive(Debug, PartialEq, Eq)]
enum StatusLine {
    Info(String),
    Warning(String),
}

/// Connect an observer and print session events until the bus shuts down.
pub(super) fn spawn(bus: &Bus) -> Result<JoinHandle<()>> {
    let mut inbox = bus.subscribe(|m| {
        matches!(
            m.payload,
            Payload::Hello { .. } | Payload::RestartRequired { .. } | Payload::SessionClosed { .. }
        )
    });
    let session = bus.connect(Role::Observer)?;
    crate::debug!("status"; "observing as {}", session);

    Ok(tokio::spawn(async move {
        let mut applications = FxHashSet::default();
        while let Some(message) = inbox.recv().await {
            match describe(&message, &mut applications) {
                Some(StatusLine::Info(line)) => crate::log!("session"; "{}", line),
                Some(StatusLine::Warning(line)) => status_warning(&line),
                None => {}
            }
        }
    }))
}

fn describe(message: &Message, applications: &mut FxHashSet<SessionId>) -> Option<StatusLine> {
    match &message.payload {
        Payload::Hello {
            role: Role::Application,
        } => {
            applications.insert(message.session);
            Some(StatusLine::Info(format!("application {} connected", message.session)))
        }
        Payload::RestartRequired {
            generation_id,
            consecutive,
        } => Some(StatusLine::Warning(format!(
            "application {} needs a restart: {} incompatible changes in a row (last {})",
            message.session, consecutive, generation_id
        ))),
        Payload::SessionClosed { session, reason } if applications.remove(session) => {
            match reason {
                CloseReason::BusShutdown => None,
                reason => Some(StatusLine::Info(format!("application {session} left: {reason}"))),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GenerationId;

    fn message(session: u64, payload: Payload) -> Message {
        Message {
            session: SessionId::new(session),
            seq: 0,
            target: None,
            payload,
        }
    }

    #[test]
    fn test_only_applications_are_tracked() {
        let mut apps = FxHashSet::default();
        let compiler = message(1, Payload::Hello { role: Role::Compiler });
        assert_eq!(describe(&compiler, &mut apps), None);

        let app = message(2, Payload::Hello { role: Role::Application });
        assert_eq!(
            describe(&app, &mut apps),
            Some(StatusLine::Info("application s2 connected".into()))
        );

        let compiler_left = message(
            0,
            Payload::SessionClosed {
                session: SessionId::new(1),
                reason: CloseReason::Normal,
            },
        );
        assert_eq!(describe(&compiler_left, &mut apps), None);

        let app_left = message(
            0,
            Payload::SessionClosed {
                session: SessionId::new(2),
                reason: CloseReason::Normal,
            },
        );
        assert_eq!(
            describe(&app_left, &mut apps),
            Some(StatusLine::Info("application s2 left: disconnected".into()))
        );
        assert!(apps.is_empty());
    }

    #[test]
    fn test_restart_required_is_a_warning() {
        let mut apps = FxHashSet::default();
        let restart = message(
            3,
            Payload::RestartRequired {
                generation_id: GenerationId::new(4),
                consecutive: 3,
            },
        );
        let Some(StatusLine::Warning(line)) = describe(&restart, &mut apps) else {
            panic!("expected a warning");
        };
        assert!(line.contains("s3"));
        assert!(line.contains("#4"));
    }
}
