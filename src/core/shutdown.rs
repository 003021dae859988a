use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 共享的退出标志
///
/// 替代全局 `quit` 变量：构造时显式传给 Dispatcher 和音频回调，
/// 任意线程都可以读取，只能从 false 变为 true 一次。
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 置位退出标志
    ///
    /// 返回 true 表示本次调用真正完成了置位（之前未退出）。
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    /// 是否已经请求退出
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn trigger_is_write_once() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[test]
    fn clones_share_state_across_threads() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();

        thread::spawn(move || signal.trigger())
            .join()
            .unwrap();

        assert!(observer.is_triggered());
    }
}
