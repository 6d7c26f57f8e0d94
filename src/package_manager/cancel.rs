//! 取消信号：外部中断（Ctrl+C）与超时共用同一条强制终止路径

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// 用户中断
    Interrupted,
    /// 超过配置的截止时间
    TimedOut,
}

impl CancelReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Interrupted => "Update cancelled by user",
            Self::TimedOut => "Update timed out",
        }
    }
}

/// 发出取消请求的一端。只有第一次调用生效
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
}

/// 观察取消请求的一端，可随意克隆给每个后端
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<CancelReason>>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self, reason: CancelReason) {
        let changed = self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if changed {
            log::warn!("收到取消请求: {}", reason.message());
        }
    }

    #[cfg(test)]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// 永远不会触发的信号，用于不需要取消的场景（如单独调用某个后端）
    #[cfg(test)]
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// 等待取消发生；发送端全部释放后永远挂起
    pub async fn cancelled(&mut self) -> CancelReason {
        loop {
            let current = *self.rx.borrow_and_update();
            if let Some(reason) = current {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_reason_wins() {
        let (handle, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        handle.cancel(CancelReason::TimedOut);
        handle.cancel(CancelReason::Interrupted);

        assert_eq!(signal.cancelled().await, CancelReason::TimedOut);
        assert_eq!(signal.reason(), Some(CancelReason::TimedOut));
    }

    #[tokio::test]
    async fn test_clones_observe_cancellation() {
        let (handle, signal) = cancel_pair();
        let mut a = signal.clone();
        let mut b = handle.signal();

        let waiter = tokio::spawn(async move { a.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel(CancelReason::Interrupted);

        assert_eq!(waiter.await.unwrap(), CancelReason::Interrupted);
        assert_eq!(b.cancelled().await, CancelReason::Interrupted);
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut signal = CancelSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
