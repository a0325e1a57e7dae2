//! Structures to keep the process alive until some event occurs

use futures::{
    channel::mpsc::{channel, Receiver, Sender},
    pin_mut,
    prelude::*,
    select,
};
use std::fmt::{self, Display, Formatter};
use tokio::signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tracing::{debug, error};

/// Reason why the heart stopped beating
#[derive(Debug, Clone)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// SIGINT or other process-external cause
    Terminated,
}

impl Display for DeathReason {
    fn fmt(&self, w: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeathReason::Killed(reason) => write!(w, "Killed ({})", reason),
            DeathReason::Terminated => write!(w, "Terminated due to external signal"),
        }
    }
}

/// Lifecycle management struct that can be used to keep the application alive
pub struct Heart {
    /// Receiver for kill reasons sent by a heart stone
    rx: Receiver<String>,
}

impl Heart {
    /// Creates a new heart and linked stone
    pub fn new() -> (Self, HeartStone) {
        let (tx, rx) = channel(2);

        (Self { rx }, HeartStone::new(tx))
    }

    /// Creates a new heart and discards the linked stone
    pub fn without_heart_stone() -> Self {
        Heart::new().0
    }

    /// Future that waits until the heart dies for the returned reason
    pub async fn death(&mut self) -> DeathReason {
        debug!("Heart starts beating");

        loop {
            select! {
                reason = self.rx.next() => {
                    if let Some(reason) = reason {
                        return DeathReason::Killed(reason);
                    }
                },
                () = Heart::termination_signal().fuse() => return DeathReason::Terminated,
            };
        }
    }

    async fn termination_signal() {
        let mut sigterm_stream = signal(SignalKind::terminate()).unwrap();
        let sigterm = sigterm_stream.recv().fuse();
        let ctrl_c = ctrl_c().fuse();

        pin_mut!(sigterm, ctrl_c);

        select! {
            _ = sigterm => {},
            _ = ctrl_c => {},
        };
    }
}

/// Remote controller for the heart
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<String>,
}

impl HeartStone {
    fn new(remote: Sender<String>) -> Self {
        Self { remote }
    }

    /// Kill the associated heart
    pub async fn kill(&mut self, reason: String) {
        if let Err(e) = self.remote.send(reason).await {
            error!("Failed to interact with Heart: {}", e);
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use futures::poll;
    use std::time::Duration;
    use tokio::task::{spawn, yield_now};
    use tokio::time::sleep;

    #[tokio::test]
    async fn live_until_killed() {
        let (mut heart, _stone) = Heart::new();

        let handle = spawn(async move { heart.death().await });
        sleep(Duration::from_millis(100)).await;
        yield_now().await;

        assert!(!poll!(handle).is_ready());
    }

    #[tokio::test]
    async fn die_when_killed() {
        let (mut heart, mut stone) = Heart::new();

        let handle = spawn(async move { heart.death().await });
        stone.kill("Testing".to_owned()).await;
        yield_now().await;

        assert!(poll!(handle).is_ready());
    }
}
