//! Platform-aware clock and timer helpers.
//!
//! On native platforms the wall clock comes from `chrono::Utc::now()` and
//! timers from tokio. On WASM, `std::time::SystemTime` is unavailable and
//! there is no tokio timer driver, so both go through JavaScript.

use std::future::Future;
use std::time::Duration;

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now() as i64
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A `Send` future that completes after `duration`.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn sleep(duration: Duration) -> impl Future<Output = ()> + Send {
    tokio::time::sleep(duration)
}

/// A `Send` future that completes after `duration`.
#[cfg(target_arch = "wasm32")]
pub(crate) fn sleep(duration: Duration) -> impl Future<Output = ()> + Send {
    use wasm_bindgen::JsCast;

    let ms = duration.as_millis().min(i32::MAX as u128) as i32;
    send_wrapper::SendWrapper::new(async move {
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let scheduled = match web_sys::window() {
                Some(window) => {
                    window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms)
                }
                None => js_sys::global()
                    .unchecked_into::<web_sys::WorkerGlobalScope>()
                    .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms),
            };
            if scheduled.is_err() {
                tracing::warn!("setTimeout unavailable; timer will never fire");
            }
        });
        let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_millis_is_reasonable() {
        let ts = now_timestamp_millis();
        // Should be after 2024-01-01 in millis
        assert!(ts > 1704067200_000, "Timestamp {} is too old", ts);
        // Should be before 2100-01-01 in millis
        assert!(ts < 4102444800_000, "Timestamp {} is too far in future", ts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits_for_duration() {
        let start = tokio::time::Instant::now();
        sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
