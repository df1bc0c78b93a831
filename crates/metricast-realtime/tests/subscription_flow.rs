//! 구독 관리자 통합 테스트

mod common;

use common::RecordingHub;
use futures::future::join_all;
use metricast_core::error::CoreError;
use metricast_core::models::metric::{metric_event_name, MetricUpdate};
use metricast_core::ports::hub::{HubClient, SUBSCRIBE_METHOD, UNSUBSCRIBE_METHOD};
use metricast_realtime::{
    MetricCallback, MetricSubscriptionManager, MultiMetricCallback, RealtimeError,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn manager_over(hub: &Arc<RecordingHub>) -> MetricSubscriptionManager {
    let hub: Arc<dyn HubClient> = hub.clone();
    MetricSubscriptionManager::new(hub)
}

fn counting_callback() -> (MetricCallback, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let callback: MetricCallback = Arc::new(move |_update: &MetricUpdate| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (callback, count)
}

#[tokio::test]
async fn reference_count_tracks_every_step() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let mut handles = Vec::new();
    for expected in 1..=3 {
        let (callback, _) = counting_callback();
        handles.push(manager.subscribe("cpu_usage", callback).await.unwrap());
        assert_eq!(manager.subscriber_count("cpu_usage"), expected);
        assert!(manager.is_metric_active("cpu_usage"));
    }

    for (remaining, handle) in (0..3).rev().zip(handles.iter()) {
        handle.unsubscribe().await;
        assert_eq!(manager.subscriber_count("cpu_usage"), remaining);
        assert_eq!(manager.is_metric_active("cpu_usage"), remaining > 0);
    }

    // 첫 등록과 마지막 해제에서만 원격 호출
    assert_eq!(hub.invocations_of(SUBSCRIBE_METHOD), vec!["cpu_usage"]);
    assert_eq!(hub.invocations_of(UNSUBSCRIBE_METHOD), vec!["cpu_usage"]);
    assert_eq!(hub.handler_count(&metric_event_name("cpu_usage")), 0);
    assert!(manager.active_metrics().is_empty());
}

#[tokio::test]
async fn concurrent_subscribes_issue_one_remote_call() {
    let hub = Arc::new(RecordingHub::connected().with_latency(Duration::from_millis(20)));
    let manager = manager_over(&hub);

    let attempts = (0..10).map(|_| {
        let (callback, _) = counting_callback();
        let manager = manager.clone();
        async move { manager.subscribe("memory_usage", callback).await }
    });
    let handles: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(hub.invocations_of(SUBSCRIBE_METHOD), vec!["memory_usage"]);
    assert_eq!(manager.subscriber_count("memory_usage"), 10);
    assert_eq!(hub.handler_count(&metric_event_name("memory_usage")), 1);

    join_all(handles.iter().map(|h| h.unsubscribe())).await;
    assert_eq!(hub.invocations_of(UNSUBSCRIBE_METHOD), vec!["memory_usage"]);
    assert_eq!(manager.subscriber_count("memory_usage"), 0);
}

#[tokio::test]
async fn panicking_callback_does_not_block_others() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let panicking: MetricCallback = Arc::new(|_update: &MetricUpdate| panic!("callback failure"));
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let recording: MetricCallback = Arc::new(move |update: &MetricUpdate| {
        sink.lock().push(update.value);
    });

    let _a = manager.subscribe("cpu_usage", panicking).await.unwrap();
    let _b = manager.subscribe("cpu_usage", recording).await.unwrap();

    hub.push_update("cpu_usage", 12.5, 1);
    hub.push_update("cpu_usage", 13.0, 2);

    assert_eq!(received.lock().clone(), vec![12.5, 13.0]);
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let (first_cb, _) = counting_callback();
    let (second_cb, _) = counting_callback();
    let first = manager.subscribe("cpu_usage", first_cb).await.unwrap();
    let second = manager.subscribe("cpu_usage", second_cb).await.unwrap();

    first.unsubscribe().await;
    first.unsubscribe().await;
    assert_eq!(manager.subscriber_count("cpu_usage"), 1);
    assert!(hub.invocations_of(UNSUBSCRIBE_METHOD).is_empty());

    second.unsubscribe().await;
    second.unsubscribe().await;
    assert_eq!(hub.invocations_of(UNSUBSCRIBE_METHOD), vec!["cpu_usage"]);
}

#[tokio::test]
async fn failed_remote_subscribe_rolls_back() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);
    hub.fail(SUBSCRIBE_METHOD, "error_rate");

    let (callback, count) = counting_callback();
    let err = manager
        .subscribe("error_rate", callback.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RealtimeError::Core(CoreError::RemoteSubscribeFailed { ref metric_id, .. }) if metric_id == "error_rate"
    ));
    assert_eq!(manager.subscriber_count("error_rate"), 0);
    assert!(!manager.is_metric_active("error_rate"));
    assert_eq!(hub.handler_count(&metric_event_name("error_rate")), 0);

    // 롤백 후 푸시는 전달되지 않음
    hub.push_update("error_rate", 1.0, 1);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    hub.clear_failures();
    let _subscription = manager.subscribe("error_rate", callback).await.unwrap();
    assert!(manager.is_metric_active("error_rate"));
    assert_eq!(
        hub.invocations_of(SUBSCRIBE_METHOD),
        vec!["error_rate", "error_rate"]
    );
}

#[tokio::test]
async fn subscribe_while_disconnected_is_not_connected() {
    let hub = Arc::new(RecordingHub::disconnected());
    let manager = manager_over(&hub);

    let (callback, _) = counting_callback();
    let err = manager.subscribe("cpu_usage", callback).await.unwrap_err();

    assert!(matches!(err, RealtimeError::Core(CoreError::NotConnected)));
    assert!(hub.log().is_empty());
    assert!(manager.active_metrics().is_empty());
    assert_eq!(hub.handler_count(&metric_event_name("cpu_usage")), 0);
}

#[tokio::test]
async fn subscribe_multiple_end_to_end() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let callback: MultiMetricCallback = Arc::new(move |metric_id: &str, update: &MetricUpdate| {
        sink.lock().push((metric_id.to_string(), update.value));
    });

    let subscription = manager
        .subscribe_multiple(&["cpu_usage", "memory_usage"], callback)
        .await
        .unwrap();

    let mut subscribed = hub.invocations_of(SUBSCRIBE_METHOD);
    subscribed.sort();
    assert_eq!(subscribed, vec!["cpu_usage", "memory_usage"]);
    assert_eq!(manager.active_metrics(), vec!["cpu_usage", "memory_usage"]);
    assert_eq!(subscription.len(), 2);

    hub.push_update("cpu_usage", 40.0, 1);
    hub.push_update("memory_usage", 60.0, 1);
    assert_eq!(
        received.lock().clone(),
        vec![
            ("cpu_usage".to_string(), 40.0),
            ("memory_usage".to_string(), 60.0)
        ]
    );

    subscription.unsubscribe().await;

    let mut unsubscribed = hub.invocations_of(UNSUBSCRIBE_METHOD);
    unsubscribed.sort();
    assert_eq!(unsubscribed, vec!["cpu_usage", "memory_usage"]);
    assert!(manager.active_metrics().is_empty());
}

#[tokio::test]
async fn subscribe_multiple_keeps_partial_successes() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);
    hub.fail(SUBSCRIBE_METHOD, "memory_usage");

    let callback: MultiMetricCallback = Arc::new(|_: &str, _: &MetricUpdate| {});
    let err = manager
        .subscribe_multiple(&["cpu_usage", "memory_usage"], callback)
        .await
        .unwrap_err();

    let RealtimeError::PartialSubscribe {
        failed,
        total,
        first_error,
        subscribed,
    } = err
    else {
        panic!("PartialSubscribe가 아님");
    };
    assert_eq!((failed, total), (1, 2));
    assert!(matches!(
        first_error,
        CoreError::RemoteSubscribeFailed { ref metric_id, .. } if metric_id == "memory_usage"
    ));
    assert_eq!(subscribed.metric_ids(), vec!["cpu_usage"]);
    assert_eq!(manager.active_metrics(), vec!["cpu_usage"]);

    // 호출자가 부분 성공분을 정리
    subscribed.unsubscribe().await;
    assert!(manager.active_metrics().is_empty());
}

#[tokio::test]
async fn unsubscribe_all_is_best_effort() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let mut handles = Vec::new();
    for metric_id in ["cpu_usage", "memory_usage", "request_rate"] {
        let (callback, _) = counting_callback();
        handles.push(manager.subscribe(metric_id, callback).await.unwrap());
    }
    hub.fail(UNSUBSCRIBE_METHOD, "memory_usage");

    let report = manager.unsubscribe_all().await;

    assert_eq!(
        report.attempted,
        vec!["cpu_usage", "memory_usage", "request_rate"]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "memory_usage");
    assert!(matches!(
        report.failed[0].1,
        CoreError::RemoteUnsubscribeFailed { .. }
    ));

    let mut unsubscribed = hub.invocations_of(UNSUBSCRIBE_METHOD);
    unsubscribed.sort();
    assert_eq!(unsubscribed, vec!["cpu_usage", "memory_usage", "request_rate"]);
    assert!(manager.active_metrics().is_empty());
    for metric_id in ["cpu_usage", "memory_usage", "request_rate"] {
        assert_eq!(hub.handler_count(&metric_event_name(metric_id)), 0);
    }

    // 이전 핸들은 no-op
    for handle in &handles {
        handle.unsubscribe().await;
    }
    assert_eq!(hub.invocations_of(UNSUBSCRIBE_METHOD).len(), 3);
}

#[tokio::test]
async fn stale_handle_does_not_touch_new_subscription() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let (old_cb, _) = counting_callback();
    let stale = manager.subscribe("cpu_usage", old_cb).await.unwrap();
    manager.unsubscribe_all().await;

    let (new_cb, count) = counting_callback();
    let _fresh = manager.subscribe("cpu_usage", new_cb).await.unwrap();
    stale.unsubscribe().await;

    assert_eq!(manager.subscriber_count("cpu_usage"), 1);
    hub.push_update("cpu_usage", 1.0, 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_payload_is_dropped() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);
    let (callback, count) = counting_callback();
    let _subscription = manager.subscribe("cpu_usage", callback).await.unwrap();

    hub.emit(&metric_event_name("cpu_usage"), json!("not an update"));
    hub.emit(&metric_event_name("cpu_usage"), json!({"metricId": "cpu_usage"}));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    hub.push_update("cpu_usage", 3.0, 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn update_without_subscribers_is_ignored() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    manager.handle_update("unknown", &MetricUpdate::new("unknown", 1.0, 1));
    assert!(manager.active_metrics().is_empty());
}

#[tokio::test]
async fn fan_out_preserves_arrival_order() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let timestamps = Arc::new(Mutex::new(Vec::new()));
    let sink = timestamps.clone();
    let callback: MetricCallback = Arc::new(move |update: &MetricUpdate| {
        sink.lock().push(update.timestamp);
    });
    let _subscription = manager.subscribe("response_time", callback).await.unwrap();

    for ts in 1..=5 {
        hub.push_update("response_time", 10.0, ts);
    }
    assert_eq!(timestamps.lock().clone(), vec![1, 2, 3, 4, 5]);
}

/// 허브가 해당 메서드 호출을 받을 때까지 양보
async fn until_invoked(hub: &RecordingHub, method: &str, times: usize) {
    while hub.invocations_of(method).len() < times {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn pending_first_registration_is_not_counted() {
    let hub = Arc::new(RecordingHub::connected().with_latency(Duration::from_secs(5)));
    let manager = manager_over(&hub);

    let (callback, count) = counting_callback();
    let subscriber = manager.clone();
    let task = tokio::spawn(async move { subscriber.subscribe("cpu_usage", callback).await });
    until_invoked(&hub, SUBSCRIBE_METHOD, 1).await;

    assert!(!manager.is_metric_active("cpu_usage"));
    assert_eq!(manager.subscriber_count("cpu_usage"), 0);
    assert!(manager.active_metrics().is_empty());

    // 확정 전 도착한 업데이트도 대기 중인 콜백에 전달
    hub.push_update("cpu_usage", 5.0, 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let _subscription = task.await.unwrap().unwrap();
    assert!(manager.is_metric_active("cpu_usage"));
    assert_eq!(manager.subscriber_count("cpu_usage"), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_subscribe_is_rolled_back_and_released() {
    let hub = Arc::new(RecordingHub::connected().with_latency(Duration::from_secs(5)));
    let manager = manager_over(&hub);
    let event = metric_event_name("cpu_usage");

    let (callback, count) = counting_callback();
    let raced = tokio::time::timeout(
        Duration::from_secs(1),
        manager.subscribe("cpu_usage", callback),
    )
    .await;
    assert!(raced.is_err());

    assert_eq!(hub.handler_count(&event), 0);
    assert!(!manager.is_metric_active("cpu_usage"));
    assert_eq!(manager.subscriber_count("cpu_usage"), 0);
    hub.push_update("cpu_usage", 1.0, 1);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // 서버가 이미 수락했을 수 있는 구독은 백그라운드에서 해제
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(hub.invocations_of(SUBSCRIBE_METHOD), vec!["cpu_usage"]);
    assert_eq!(hub.invocations_of(UNSUBSCRIBE_METHOD), vec!["cpu_usage"]);
}

#[tokio::test(start_paused = true)]
async fn resubscribe_after_cancelled_subscribe_delivers_once() {
    let hub = Arc::new(RecordingHub::connected().with_latency(Duration::from_secs(5)));
    let manager = manager_over(&hub);
    let event = metric_event_name("cpu_usage");

    let (abandoned_cb, abandoned_count) = counting_callback();
    let raced = tokio::time::timeout(
        Duration::from_secs(1),
        manager.subscribe("cpu_usage", abandoned_cb),
    )
    .await;
    assert!(raced.is_err());

    let (callback, count) = counting_callback();
    let subscription = manager.subscribe("cpu_usage", callback).await.unwrap();
    assert_eq!(hub.handler_count(&event), 1);
    assert_eq!(manager.subscriber_count("cpu_usage"), 1);

    hub.push_update("cpu_usage", 2.0, 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(abandoned_count.load(Ordering::SeqCst), 0);

    subscription.unsubscribe().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(hub.handler_count(&event), 0);
    hub.push_update("cpu_usage", 3.0, 2);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(manager.active_metrics().is_empty());
    // 원격 상태의 마지막 조작은 해제
    assert_eq!(
        hub.log().last().map(String::as_str),
        Some("UnsubscribeFromMetric:cpu_usage")
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_unsubscribe_still_releases_remote() {
    let hub = Arc::new(RecordingHub::connected().with_latency(Duration::from_secs(5)));
    let manager = manager_over(&hub);

    let (callback, _) = counting_callback();
    let subscription = manager.subscribe("cpu_usage", callback).await.unwrap();

    let raced = tokio::time::timeout(Duration::from_secs(1), subscription.unsubscribe()).await;
    assert!(raced.is_err());
    assert_eq!(manager.subscriber_count("cpu_usage"), 0);

    // 재시도는 안전하게 no-op
    subscription.unsubscribe().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    // 취소된 호출 + 백그라운드 재해제
    assert_eq!(
        hub.invocations_of(UNSUBSCRIBE_METHOD),
        vec!["cpu_usage", "cpu_usage"]
    );
    assert_eq!(hub.handler_count(&metric_event_name("cpu_usage")), 0);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_all_during_first_subscribe_cancels_it() {
    let hub = Arc::new(RecordingHub::connected().with_latency(Duration::from_secs(5)));
    let manager = manager_over(&hub);
    let event = metric_event_name("memory_usage");

    let (callback, _) = counting_callback();
    let subscriber = manager.clone();
    let task = tokio::spawn(async move { subscriber.subscribe("memory_usage", callback).await });
    until_invoked(&hub, SUBSCRIBE_METHOD, 1).await;
    assert_eq!(hub.handler_count(&event), 1);

    let report = manager.unsubscribe_all().await;
    // 확정 전이므로 원격 해제 대상이 아님
    assert!(report.attempted.is_empty());
    assert_eq!(hub.handler_count(&event), 0);

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        RealtimeError::Core(CoreError::RemoteSubscribeFailed { ref metric_id, .. }) if metric_id == "memory_usage"
    ));
    assert_eq!(hub.invocations_of(UNSUBSCRIBE_METHOD), vec!["memory_usage"]);
    assert_eq!(hub.handler_count(&event), 0);
    assert!(manager.active_metrics().is_empty());
}

#[tokio::test]
async fn callback_unsubscribing_itself_does_not_disturb_siblings() {
    let hub = Arc::new(RecordingHub::connected());
    let manager = manager_over(&hub);

    let own_handle: Arc<Mutex<Option<metricast_realtime::MetricSubscription>>> =
        Arc::new(Mutex::new(None));
    let self_calls = Arc::new(AtomicUsize::new(0));
    let slot = own_handle.clone();
    let calls = self_calls.clone();
    let leaving: MetricCallback = Arc::new(move |_update: &MetricUpdate| {
        calls.fetch_add(1, Ordering::SeqCst);
        let handle = slot.lock().take();
        if let Some(handle) = handle {
            futures::executor::block_on(handle.unsubscribe());
        }
    });

    let (first_cb, first) = counting_callback();
    let _first = manager.subscribe("cpu_usage", first_cb).await.unwrap();
    let leaving_handle = manager.subscribe("cpu_usage", leaving).await.unwrap();
    *own_handle.lock() = Some(leaving_handle);
    let (last_cb, last) = counting_callback();
    let _last = manager.subscribe("cpu_usage", last_cb).await.unwrap();
    assert_eq!(manager.subscriber_count("cpu_usage"), 3);

    hub.push_update("cpu_usage", 1.0, 1);
    assert_eq!(self_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 1);
    assert_eq!(manager.subscriber_count("cpu_usage"), 2);

    hub.push_update("cpu_usage", 2.0, 2);
    assert_eq!(self_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(last.load(Ordering::SeqCst), 2);
    assert!(hub.invocations_of(UNSUBSCRIBE_METHOD).is_empty());
}
