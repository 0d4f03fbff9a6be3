use std::time::Duration;

/// Poll `cond` until it returns true, panicking if it does not within 5s.
pub(crate) async fn wait_for<F>(mut cond: F)
where
    F: FnMut() -> bool + Send,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not satisfied within timeout");
}
