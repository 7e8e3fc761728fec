//! A per-replica flag bitmap with wakeups, used for the ready barrier and
//! the done set.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct FlagBoard {
    inner: Arc<Inner>,
}

struct Inner {
    flags: Mutex<Vec<bool>>,
    notify: Notify,
}

impl FlagBoard {
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                flags: Mutex::new(vec![false; size]),
                notify: Notify::new(),
            }),
        }
    }

    pub fn set(&self, index: usize) {
        self.inner.flags.lock()[index] = true;
        self.inner.notify.notify_waiters();
    }

    pub fn set_all(&self) {
        self.inner.flags.lock().iter_mut().for_each(|flag| *flag = true);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.inner.flags.lock()[index]
    }

    pub fn all_set(&self) -> bool {
        self.inner.flags.lock().iter().all(|flag| *flag)
    }

    /// Wait until every flag is set.
    pub async fn wait_all(&self) {
        loop {
            // Arm the wakeup before checking, so a set between the check and
            // the await is not lost.
            let notified = self.inner.notify.notified();
            if self.all_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_all_wakes_on_last_flag() {
        let board = FlagBoard::new(3);
        let waiter = {
            let board = board.clone();
            tokio::spawn(async move { board.wait_all().await })
        };

        board.set(0);
        board.set(2);
        assert!(!board.all_set());
        board.set(1);

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn set_all_completes_the_board() {
        let board = FlagBoard::new(4);
        board.set_all();
        assert!(board.all_set());
        board.wait_all().await;
    }
}
