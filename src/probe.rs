use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns true only if `url` answers HTTP 200 within `timeout`.
///
/// Every failure mode is logged and reported as `false`.
pub async fn check_connectivity(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    tracing::info!("Checking connectivity -> {}", url);

    match client.get(url).timeout(timeout).send().await {
        Ok(res) if res.status() == reqwest::StatusCode::OK => {
            tracing::info!("Connectivity OK, {} answered 200", url);
            true
        }
        Ok(res) => {
            tracing::warn!("{} answered with unexpected status {}", url, res.status());
            false
        }
        Err(why) if why.is_timeout() => {
            tracing::warn!("Request to {} timed out after {:?}", url, timeout);
            false
        }
        Err(why) if why.is_connect() => {
            tracing::warn!("Cannot connect to {}, network is probably down: {}", url, why);
            false
        }
        Err(why) => {
            tracing::error!("Unexpected error while checking {}: {:?}", url, why);
            false
        }
    }
}
