mod common;

use common::*;
use std::time::Duration;
use task_payment_engine::domain::errors::DomainError;
use task_payment_engine::domain::{Money, OrderType, TaskStatus, TradeStatus};

#[tokio::test]
async fn test_prepay_then_callback_marks_paid_once() {
    let h = Harness::new();
    let order_no = publish_order(&h).await;

    let trade = h.store.trade(&order_no).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);
    assert_eq!(trade.third_party_trade_no.as_deref(), Some(format!("T-{}", order_no).as_str()));
    assert!(trade.pay_url.is_some());

    let notice = h.gateway.pay_notice(&order_no, "SUCCESS", "100.00");
    let paid = h.engine.process_callback(notice.clone()).await.unwrap();
    assert_eq!(paid.status, TradeStatus::Paid);
    assert_eq!(paid.pay_method.as_deref(), Some("wechat"));

    // 重放同一通知
    let replay = h.engine.process_callback(notice).await.unwrap();
    assert_eq!(replay.status, TradeStatus::Paid);
    assert_eq!(replay.version, paid.version);

    let task = h.store.task(7).await.unwrap();
    assert_eq!(task.status, TaskStatus::PendingAudit);
    let logs = h.store.task_logs(7).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "pay_publish");

    let events = h.drain_events().await;
    assert_eq!(
        events.iter().filter(|e| *e == "PaymentSucceeded").count(),
        1
    );
    assert!(events.contains(&"PaymentOrderCreated".to_string()));
}

#[tokio::test]
async fn test_prepay_request_carries_notify_url_and_amount() {
    let h = Harness::new();
    let order_no = publish_order(&h).await;

    let requests = h.gateway.prepay_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].order_no, order_no);
    assert_eq!(requests[0].amount, Money::from_yuan(100));
    assert_eq!(requests[0].notify_url, "https://engine.example/api/v1/pay/callback");
    assert_eq!(requests[0].extra, "user_id=1&task_id=7");
    assert!(order_no.starts_with("SQ"));
}

#[tokio::test]
async fn test_task_take_payment_assigns_taker() {
    let h = Harness::new();
    h.store.seed_task(task(8, TaskStatus::Open, None)).await;

    let (trade, _) = h
        .engine
        .create_prepay_order(prepay_request(2, Some(8), OrderType::TaskTake, Money::from_yuan(10)))
        .await
        .unwrap();
    h.engine
        .process_callback(h.gateway.pay_notice(&trade.order_no, "SUCCESS", "10.00"))
        .await
        .unwrap();

    let task = h.store.task(8).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.taker_id, Some(2));
    assert!(task.take_time.is_some());
    assert_eq!(h.store.task_logs(8).await[0].action, "pay_take");
}

#[tokio::test]
async fn test_prepay_rejects_unpayable_task() {
    let h = Harness::new();
    h.store.seed_task(task(9, TaskStatus::Completed, Some(2))).await;

    let err = h
        .engine
        .create_prepay_order(prepay_request(1, Some(9), OrderType::TaskPublish, Money::from_yuan(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::StateConflict(_)));

    let err = h
        .engine
        .create_prepay_order(prepay_request(1, Some(404), OrderType::TaskPublish, Money::from_yuan(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
    assert_eq!(FakeGateway::calls(&h.gateway.prepay_calls), 0);
}

#[tokio::test]
async fn test_prepay_validation() {
    let h = Harness::new();

    let err = h
        .engine
        .create_prepay_order(prepay_request(5, None, OrderType::Deposit, Money::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));

    let err = h
        .engine
        .create_prepay_order(prepay_request(5, None, OrderType::TaskPublish, Money::from_yuan(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));
    assert!(h.store.trades().await.is_empty());
}

#[tokio::test]
async fn test_amount_mismatch_leaves_trade_pending() {
    let h = Harness::new();
    let order_no = publish_order(&h).await;

    let err = h
        .engine
        .process_callback(h.gateway.pay_notice(&order_no, "SUCCESS", "99.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::AmountMismatch { .. }));

    let trade = h.store.trade(&order_no).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);
    assert_eq!(h.store.task(7).await.unwrap().status, TaskStatus::Draft);

    let events = h.drain_events().await;
    assert!(events.contains(&"ReconciliationRequired".to_string()));
}

#[tokio::test]
async fn test_sub_cent_difference_is_an_amount_mismatch() {
    let h = Harness::new();
    let order_no = publish_order(&h).await;

    let err = h
        .engine
        .process_callback(h.gateway.pay_notice(&order_no, "SUCCESS", "100.001"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::AmountMismatch { .. }));

    let err = h
        .engine
        .process_callback(h.gateway.pay_notice(&order_no, "SUCCESS", "one hundred"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));
    assert_eq!(h.store.trade(&order_no).await.unwrap().status, TradeStatus::Pending);

    let trade = h
        .engine
        .process_callback(h.gateway.pay_notice(&order_no, "SUCCESS", "100.0"))
        .await
        .unwrap();
    assert_eq!(trade.status, TradeStatus::Paid);
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let h = Harness::new();
    let order_no = publish_order(&h).await;

    let mut notice = h.gateway.pay_notice(&order_no, "SUCCESS", "100.00");
    notice.insert("amount".to_string(), "100.01".to_string());

    let err = h.engine.process_callback(notice).await.unwrap_err();
    assert!(matches!(err, DomainError::SecurityError(_)));
    assert_eq!(h.store.trade(&order_no).await.unwrap().status, TradeStatus::Pending);

    let mut unsigned = h.gateway.pay_notice(&order_no, "SUCCESS", "100.00");
    unsigned.remove("sign");
    assert!(matches!(
        h.engine.process_callback(unsigned).await,
        Err(DomainError::SecurityError(_))
    ));
}

#[tokio::test]
async fn test_callback_for_unknown_order() {
    let h = Harness::new();
    let err = h
        .engine
        .process_callback(h.gateway.pay_notice("SQ-missing", "SUCCESS", "1.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn test_failed_callback_and_unsupported_status() {
    let h = Harness::new();
    let order_no = publish_order(&h).await;

    let err = h
        .engine
        .process_callback(h.gateway.pay_notice(&order_no, "WAITING", "100.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));

    let trade = h
        .engine
        .process_callback(h.gateway.pay_notice(&order_no, "CLOSED", "100.00"))
        .await
        .unwrap();
    assert_eq!(trade.status, TradeStatus::Failed);
}

#[tokio::test]
async fn test_late_payment_on_failed_trade_is_not_resurrected() {
    let h = Harness::new();
    h.gateway.script_prepay(vec![Scripted::Reject]);

    let err = h
        .engine
        .create_prepay_order(prepay_request(5, None, OrderType::Deposit, Money::from_yuan(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::GatewayError(_)));

    let trades = h.store.trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Failed);
    let order_no = trades[0].order_no.clone();

    let err = h
        .engine
        .process_callback(h.gateway.pay_notice(&order_no, "SUCCESS", "20.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::StateConflict(_)));
    assert_eq!(h.store.trade(&order_no).await.unwrap().status, TradeStatus::Failed);

    let events = h.drain_events().await;
    assert!(events.contains(&"PaymentFailed".to_string()));
    assert!(events.contains(&"ReconciliationRequired".to_string()));
}

#[tokio::test]
async fn test_query_self_heals_missed_callback() {
    let h = Harness::new();
    let order_no = publish_order(&h).await;

    h.gateway.set_query_status("NOTPAY", None);
    let trade = h.engine.query_trade_status(&order_no).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);

    h.gateway.set_query_status("SUCCESS", Some("100.00"));
    let trade = h.engine.query_trade_status(&order_no).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Paid);
    assert_eq!(h.store.task(7).await.unwrap().status, TaskStatus::PendingAudit);

    // 已是终态，不再访问网关
    let before = FakeGateway::calls(&h.gateway.query_calls);
    h.engine.query_trade_status(&order_no).await.unwrap();
    assert_eq!(FakeGateway::calls(&h.gateway.query_calls), before);
}

#[tokio::test]
async fn test_expired_trades_are_closed() {
    let h = Harness::with_config(task_payment_engine::infrastructure::config::EngineConfig {
        order_expire: Duration::from_millis(1),
        ..engine_config()
    });

    let (first, _) = h
        .engine
        .create_prepay_order(prepay_request(5, None, OrderType::Deposit, Money::from_yuan(1)))
        .await
        .unwrap();
    let (second, _) = h
        .engine
        .create_prepay_order(prepay_request(6, None, OrderType::ServiceFee, Money::from_yuan(2)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.gateway.set_query_status("NOTPAY", None);
    let trade = h.engine.query_trade_status(&first.order_no).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Failed);

    let closed = h.engine.close_expired_trades(10).await.unwrap();
    assert_eq!(closed, 1);
    assert_eq!(
        h.store.trade(&second.order_no).await.unwrap().status,
        TradeStatus::Failed
    );
    assert_eq!(h.engine.close_expired_trades(10).await.unwrap(), 0);
}

#[tokio::test]
async fn test_prepay_rate_limit_per_user() {
    let h = Harness::with_config(task_payment_engine::infrastructure::config::EngineConfig {
        prepay_rate_per_sec: 0.001,
        prepay_burst: 2,
        ..engine_config()
    });

    for _ in 0..2 {
        h.engine
            .create_prepay_order(prepay_request(5, None, OrderType::Deposit, Money::from_yuan(1)))
            .await
            .unwrap();
    }
    let err = h
        .engine
        .create_prepay_order(prepay_request(5, None, OrderType::Deposit, Money::from_yuan(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RateLimited(_)));

    // 其他用户不受影响
    h.engine
        .create_prepay_order(prepay_request(6, None, OrderType::Deposit, Money::from_yuan(1)))
        .await
        .unwrap();
    assert_eq!(FakeGateway::calls(&h.gateway.prepay_calls), 3);
}
