use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Arm unless a timeout is already pending
    Set(Duration),
    /// Cancel whatever is pending and arm again
    Restart(Duration),
    Remove,
}

/// Owner's handle to its single timeout slot. Every command replaces the
/// previous state of the slot; there is never more than one pending fire.
#[derive(Clone)]
pub struct TimerHandle {
    tx: mpsc::UnboundedSender<TimerCommand>,
}

impl TimerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn set_timeout(&self, after: Duration) {
        self.send(TimerCommand::Set(after));
    }

    pub fn restart_timeout(&self, after: Duration) {
        self.send(TimerCommand::Restart(after));
    }

    pub fn remove_timeout(&self) {
        self.send(TimerCommand::Remove);
    }

    fn send(&self, cmd: TimerCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::debug!("Scheduler is gone, dropping {:?}", cmd);
        }
    }
}

#[async_trait]
pub trait TimeoutHandler: Send + Sync {
    /// Returns how long to wait before firing again when nothing re-arms the
    /// slot while the handler runs.
    async fn on_timeout(&self) -> Option<Duration>;
}

fn apply(deadline: &mut Option<Instant>, cmd: TimerCommand) {
    match cmd {
        TimerCommand::Set(after) => {
            if deadline.is_none() {
                *deadline = Some(Instant::now() + after);
            }
        }
        TimerCommand::Restart(after) => *deadline = Some(Instant::now() + after),
        TimerCommand::Remove => *deadline = None,
    }
}

/// Drive one timeout slot: wait for the deadline, fire the handler, and
/// apply re-arm commands as they arrive.
pub async fn run(
    mut rx: mpsc::UnboundedReceiver<TimerCommand>,
    handler: Arc<dyn TimeoutHandler>,
    cancel: CancellationToken,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let next = deadline;
        let fire = async move {
            match next {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(cmd) => apply(&mut deadline, cmd),
                    None => break,
                }
            }
            _ = fire => {
                deadline = None;
                let follow_up = handler.on_timeout().await;

                // Commands queued while the handler ran win over the follow-up.
                let mut rearmed = false;
                while let Ok(cmd) = rx.try_recv() {
                    apply(&mut deadline, cmd);
                    rearmed = true;
                }
                if !rearmed {
                    deadline = follow_up.map(|after| Instant::now() + after);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Scheduler shutting down");
                break;
            }
        }
    }
}
