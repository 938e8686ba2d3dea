//! 硬件操作串行队列
//!
//! 同一张卡同一时刻只允许一个操作；tokio 的 Mutex 按申请顺序唤醒，
//! 因此排队的操作按提交顺序执行，前一个失败不影响后续。

use std::future::Future;

use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct ExclusiveQueue {
    gate: Mutex<()>,
}

impl ExclusiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 排队执行 `task`，返回其结果
    pub async fn run<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.gate.lock().await;
        task().await
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let queue = Arc::new(ExclusiveQueue::new());
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u64 {
            let queue = queue.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .run(|| async {
                        log.lock().unwrap().push(format!("start{}", i));
                        tokio::time::sleep(Duration::from_millis(5 * (5 - i))).await;
                        log.lock().unwrap().push(format!("end{}", i));
                    })
                    .await
            }));
            // 保证提交顺序
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let log = log.lock().unwrap().clone();
        for pair in log.chunks(2) {
            assert_eq!(pair[0].replace("start", ""), pair[1].replace("end", ""));
        }
        assert_eq!(log[0], "start0");
    }

    #[tokio::test]
    async fn test_failure_does_not_block_queue() {
        let queue = ExclusiveQueue::new();
        let first: Result<(), &str> = queue.run(|| async { Err("boom") }).await;
        assert!(first.is_err());
        let second = queue.run(|| async { 7 }).await;
        assert_eq!(second, 7);
    }
}
