use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

/// cron 定时任务。上一次执行还没结束时，本次触发直接跳过
pub struct TaskScheduler {
    scheduler: JobScheduler,
}

impl TaskScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler })
    }

    pub async fn add_daily_job<F, Fut>(&self, cron_expr: &str, job_fn: Arc<F>) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(false));
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let job_fn = Arc::clone(&job_fn);
            let running = Arc::clone(&running);
            Box::pin(async move {
                run_exclusive(&running, || job_fn()).await;
            })
        })
        .with_context(|| format!("无效的 cron 表达式: {}", cron_expr))?;

        self.scheduler.add(job).await?;
        info!("已添加定时任务: {}", cron_expr);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("任务调度器已启动");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("任务调度器已关闭");
        Ok(())
    }
}

/// 返回本次是否真正执行了任务
async fn run_exclusive<F, Fut>(running: &AtomicBool, job: F) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    if running.swap(true, Ordering::AcqRel) {
        warn!("上一次定时任务仍在执行，跳过本次触发");
        return false;
    }

    let started = Instant::now();
    info!("执行定时任务");
    job().await;
    running.store(false, Ordering::Release);
    info!("定时任务完成，耗时 {:.1} 秒", started.elapsed().as_secs_f64());
    true
}
