//! The per-session alarm.
//!
//! One task per coordinator; there is never more than one outstanding
//! wake. The coordinator re-arms it through a watch channel whenever the
//! earliest interesting instant changes (call deadline, push flush), and
//! the task itself caps the sleep at the lifecycle check interval. The
//! task holds only a weak handle so a coordinator that is dropped takes
//! its alarm with it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use fila_core::{Timestamp, consts};
use tokio::sync::watch;
use tracing::trace;

use super::Coordinator;

const LOG_TARGET: &str = "fila::alarm";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AlarmSchedule {
    /// Sleep until the given instant (or just the lifecycle cadence when
    /// `None`).
    Wake(Option<Timestamp>),
    /// Session is closed; stop the task.
    Shutdown,
}

pub(super) fn spawn_alarm(coordinator: &Arc<Coordinator>, mut rx: watch::Receiver<AlarmSchedule>) {
    let weak: Weak<Coordinator> = Arc::downgrade(coordinator);
    let session = coordinator.session_id();

    tokio::spawn(async move {
        trace!(target: LOG_TARGET, %session, "Alarm task started");
        loop {
            let schedule = *rx.borrow_and_update();
            let wake = match schedule {
                AlarmSchedule::Shutdown => break,
                AlarmSchedule::Wake(wake) => wake,
            };

            let now = Timestamp::now();
            let sleep_for = wake
                .map(|at| at.remaining_from(now).unwrap_or(Duration::ZERO))
                .unwrap_or(consts::LIFECYCLE_CHECK_INTERVAL)
                .min(consts::LIFECYCLE_CHECK_INTERVAL);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let Some(coordinator) = weak.upgrade() else {
                        break;
                    };
                    coordinator.handle_alarm().await;
                }
                res = rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        trace!(target: LOG_TARGET, %session, "Alarm task stopped");
    });
}
