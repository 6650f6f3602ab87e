use crate::domain::errors::DomainResult;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// 批量落地函数
pub type FlushFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, DomainResult<()>> + Send + Sync>;

/// 停止时最后一次落地的尝试次数
const FINAL_FLUSH_ATTEMPTS: u32 = 3;
const FINAL_FLUSH_BACKOFF: Duration = Duration::from_millis(50);

/// 批处理器：累积到阈值时同步落地，否则按周期落地
///
/// 落地失败的批次放回缓冲区队首，下次落地时重试，不丢弃。
/// `stop` 之后加入的项立即落地。
pub struct BatchProcessor<T: Clone + Send + 'static> {
    buffer: Arc<tokio::sync::Mutex<Vec<T>>>,
    batch_size: usize,
    flush_fn: FlushFn<T>,
    stopped: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

async fn flush_or_requeue<T: Clone>(
    buffer: &tokio::sync::Mutex<Vec<T>>,
    flush_fn: &FlushFn<T>,
    batch: Vec<T>,
) -> DomainResult<()> {
    let size = batch.len();
    debug!(size, "Flushing batch");

    match flush_fn(batch.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(size, "Batch flush failed, keeping items for retry: {}", e);
            let mut buffer = buffer.lock().await;
            let newer = std::mem::replace(&mut *buffer, batch);
            buffer.extend(newer);
            Err(e)
        }
    }
}

async fn drain_and_flush<T: Clone>(
    buffer: &tokio::sync::Mutex<Vec<T>>,
    flush_fn: &FlushFn<T>,
) -> DomainResult<()> {
    let batch = std::mem::take(&mut *buffer.lock().await);
    if batch.is_empty() {
        return Ok(());
    }
    flush_or_requeue(buffer, flush_fn, batch).await
}

impl<T: Clone + Send + 'static> BatchProcessor<T> {
    /// 需要在 tokio 运行时内创建
    pub fn new(batch_size: usize, interval: Duration, flush_fn: FlushFn<T>) -> Self {
        let buffer = Arc::new(tokio::sync::Mutex::new(Vec::with_capacity(batch_size)));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let ticker = {
            let buffer = buffer.clone();
            let flush_fn = flush_fn.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval.max(Duration::from_millis(1)));
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            // 失败的批次已放回缓冲区
                            let _ = drain_and_flush(&buffer, &flush_fn).await;
                        }
                        _ = &mut shutdown_rx => break,
                    }
                }
            })
        };

        Self {
            buffer,
            batch_size: batch_size.max(1),
            flush_fn,
            stopped: AtomicBool::new(false),
            shutdown: Mutex::new(Some(shutdown_tx)),
            ticker: Mutex::new(Some(ticker)),
        }
    }

    /// 加入一项，达到阈值或已停止时立即落地
    pub async fn add(&self, item: T) -> DomainResult<()> {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(item);
            if buffer.len() >= self.batch_size || self.stopped.load(Ordering::SeqCst) {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        match batch {
            Some(batch) => flush_or_requeue(&self.buffer, &self.flush_fn, batch).await,
            None => Ok(()),
        }
    }

    pub async fn flush(&self) -> DomainResult<()> {
        drain_and_flush(&self.buffer, &self.flush_fn).await
    }

    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// 停止定时器并完成最后一次落地；重试后仍失败则返回错误，未落地的项留在缓冲区
    pub async fn stop(&self) -> DomainResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        let shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).take();
        let ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = ticker {
            let _ = handle.await;
        }

        let mut attempt = 1;
        loop {
            match self.flush().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= FINAL_FLUSH_ATTEMPTS => {
                    error!(pending = self.pending().await, "Final flush gave up: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, "Final flush failed, retrying: {}", e);
                    tokio::time::sleep(FINAL_FLUSH_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use futures::FutureExt;

    fn collecting_flush(sink: Arc<Mutex<Vec<Vec<u32>>>>) -> FlushFn<u32> {
        Arc::new(move |batch: Vec<u32>| -> BoxFuture<'static, DomainResult<()>> {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(batch);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_flushes_at_size_threshold() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let processor =
            BatchProcessor::new(3, Duration::from_secs(3600), collecting_flush(flushed.clone()));

        for i in 0..7 {
            processor.add(i).await.unwrap();
        }

        assert_eq!(*flushed.lock().unwrap(), vec![vec![0, 1, 2], vec![3, 4, 5]]);
        assert_eq!(processor.pending().await, 1);
        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_flushes_on_interval() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let processor =
            BatchProcessor::new(100, Duration::from_millis(20), collecting_flush(flushed.clone()));

        processor.add(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(*flushed.lock().unwrap(), vec![vec![1]]);
        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_performs_final_flush() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let processor =
            BatchProcessor::new(100, Duration::from_secs(3600), collecting_flush(flushed.clone()));

        processor.add(1).await.unwrap();
        processor.add(2).await.unwrap();
        processor.stop().await.unwrap();

        assert_eq!(*flushed.lock().unwrap(), vec![vec![1, 2]]);
    }

    /// 前 `failures` 次落地失败，之后恢复
    fn flaky_flush(failures: u32, sink: Arc<Mutex<Vec<Vec<u32>>>>) -> FlushFn<u32> {
        let remaining = Arc::new(std::sync::atomic::AtomicU32::new(failures));
        Arc::new(move |batch: Vec<u32>| -> BoxFuture<'static, DomainResult<()>> {
            let sink = sink.clone();
            let remaining = remaining.clone();
            async move {
                let left = remaining.load(Ordering::SeqCst);
                if left > 0 {
                    remaining.store(left - 1, Ordering::SeqCst);
                    return Err(DomainError::InternalError("sink down".to_string()));
                }
                sink.lock().unwrap().push(batch);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_items_in_order() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let processor =
            BatchProcessor::new(2, Duration::from_secs(3600), flaky_flush(1, flushed.clone()));

        processor.add(1).await.unwrap();
        assert!(processor.add(2).await.is_err());
        assert_eq!(processor.pending().await, 2);

        processor.add(3).await.unwrap();
        processor.stop().await.unwrap();

        assert_eq!(*flushed.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(processor.pending().await, 0);
    }

    #[tokio::test]
    async fn test_stop_retries_then_surfaces_error() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let processor = BatchProcessor::new(
            100,
            Duration::from_secs(3600),
            flaky_flush(FINAL_FLUSH_ATTEMPTS, flushed.clone()),
        );

        processor.add(1).await.unwrap();
        assert!(processor.stop().await.is_err());
        assert_eq!(processor.pending().await, 1);
        assert!(flushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_after_stop_flushes_inline() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let processor =
            BatchProcessor::new(100, Duration::from_secs(3600), collecting_flush(flushed.clone()));

        processor.stop().await.unwrap();
        processor.add(7).await.unwrap();

        assert_eq!(*flushed.lock().unwrap(), vec![vec![7]]);
        assert_eq!(processor.pending().await, 0);
    }
}
