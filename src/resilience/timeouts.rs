//! Deadline racing for in-flight work.

use std::future::Future;
use std::time::Duration;

/// Outcome of racing a future against an optional deadline.
#[derive(Debug, PartialEq, Eq)]
pub enum Race<T> {
    Completed(T),
    TimedOut,
}

/// Drive `fut` to completion unless `deadline` elapses first.
///
/// When the deadline wins the future is dropped, which cancels whatever it
/// was doing (including an in-flight upstream call). With no deadline the
/// future simply runs to completion.
pub async fn race_deadline<F>(deadline: Option<Duration>, fut: F) -> Race<F::Output>
where
    F: Future,
{
    let Some(deadline) = deadline else {
        return Race::Completed(fut.await);
    };

    tokio::select! {
        biased;
        out = fut => Race::Completed(out),
        _ = tokio::time::sleep(deadline) => Race::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fast_future_completes() {
        let out = race_deadline(Some(Duration::from_secs(30)), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            7
        })
        .await;
        assert_eq!(out, Race::Completed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_future_times_out() {
        let start = tokio::time::Instant::now();
        let out = race_deadline(Some(Duration::from_secs(30)), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await;
        assert_eq!(out, Race::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_waits() {
        let out = race_deadline(None, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            "done"
        })
        .await;
        assert_eq!(out, Race::Completed("done"));
    }
}
