use tokio::sync::watch;

/// Fires the shutdown signal. Dropping it without firing never stops anything.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

/// Cloneable view of the shutdown state, awaited by the server loops and the
/// process supervisor.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fires; pends forever if it was dropped unfired.
    pub async fn fired(&mut self) {
        let trigger_dropped = self.rx.wait_for(|fired| *fired).await.is_err();
        if trigger_dropped {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::never()
    }
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fire_wakes_every_clone() {
        let (trigger, signal) = channel();
        let mut first = signal.clone();
        let mut second = signal.clone();
        assert!(!signal.is_fired());

        trigger.fire();
        first.fired().await;
        second.fired().await;
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_fired_after_the_fact_resolves_immediately() {
        let (trigger, mut signal) = channel();
        trigger.fire();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(1), signal.fired())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_and_dropped_trigger_do_not_fire() {
        let mut never = ShutdownSignal::never();
        assert!(tokio::time::timeout(Duration::from_millis(50), never.fired())
            .await
            .is_err());

        let (trigger, mut signal) = channel();
        drop(trigger);
        assert!(tokio::time::timeout(Duration::from_millis(50), signal.fired())
            .await
            .is_err());
    }
}
