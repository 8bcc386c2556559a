use super::*;
use crate::amqp::{ErrorScope, Properties};

use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

fn setup() -> (Arc<Broker>, Connection, UnboundedReceiver<Frame>) {
    let broker = Arc::new(Broker::default());
    broker.declare_queue("tasks", false).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Connection::new(broker.clone(), tx);
    (broker, connection, rx)
}

async fn next_frame(rx: &mut UnboundedReceiver<Frame>) -> Frame {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed")
}

async fn assert_quiet(rx: &mut UnboundedReceiver<Frame>) {
    let res = timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(res.is_err(), "unexpected frame: {res:?}");
}

fn consume(queue: &str, tag: &str, no_ack: bool) -> Method {
    Method::BasicConsume {
        queue: queue.to_string(),
        consumer_tag: tag.to_string(),
        no_local: false,
        no_ack,
        exclusive: false,
        no_wait: false,
    }
}

fn publish(routing_key: &str) -> Method {
    Method::BasicPublish {
        exchange: String::new(),
        routing_key: routing_key.to_string(),
        mandatory: false,
        immediate: false,
    }
}

async fn send(channel: &Channel, routing_key: &str, body: &str) {
    channel.handle_method(publish(routing_key)).await.unwrap();
    channel
        .handle_content(Properties::default(), body.as_bytes().to_vec())
        .unwrap();
}

fn delivery(frame: Frame) -> (u64, Vec<u8>) {
    match frame.method {
        Method::BasicDeliver { delivery_tag, .. } => (delivery_tag, frame.content.unwrap().body),
        other => panic!("expected BasicDeliver, got {other:?}"),
    }
}

#[tokio::test]
async fn test_qos_updates_channel_or_connection_scope() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    let qos = Method::BasicQos {
        prefetch_size: 0,
        prefetch_count: 5,
        global: false,
    };
    channel.handle_method(qos).await.unwrap();
    assert_eq!(next_frame(&mut rx).await.method, Method::BasicQosOk);
    assert_eq!(channel.qos().snapshot().prefetch_count, 5);
    assert_eq!(connection.qos().snapshot().prefetch_count, 0);

    let global = Method::BasicQos {
        prefetch_size: 1024,
        prefetch_count: 9,
        global: true,
    };
    channel.handle_method(global).await.unwrap();
    assert_eq!(next_frame(&mut rx).await.method, Method::BasicQosOk);
    let snapshot = connection.qos().snapshot();
    assert_eq!((snapshot.prefetch_count, snapshot.prefetch_size), (9, 1024));
}

#[tokio::test]
async fn test_prefetch_one_end_to_end() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    channel
        .handle_method(Method::BasicQos {
            prefetch_size: 0,
            prefetch_count: 1,
            global: false,
        })
        .await
        .unwrap();
    next_frame(&mut rx).await;

    for body in ["1", "2", "3"] {
        send(&channel, "tasks", body).await;
    }
    channel.handle_method(consume("tasks", "worker", false)).await.unwrap();
    assert_eq!(
        next_frame(&mut rx).await.method,
        Method::BasicConsumeOk {
            consumer_tag: "worker".to_string()
        }
    );

    for expected in ["1", "2", "3"] {
        let (tag, body) = delivery(next_frame(&mut rx).await);
        assert_eq!(body, expected.as_bytes());
        assert_quiet(&mut rx).await;
        channel
            .handle_method(Method::BasicAck {
                delivery_tag: tag,
                multiple: false,
            })
            .await
            .unwrap();
    }
    connection.close().await;
}

#[tokio::test]
async fn test_consume_unknown_queue_is_not_found() {
    let (_broker, connection, _rx) = setup();
    let channel = connection.open_channel(1);

    let err = channel.handle_method(consume("missing", "c", false)).await.unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::NotFound);
    assert_eq!(err.scope, ErrorScope::Channel);
    assert_eq!((err.class_id, err.method_id), (60, 20));
}

#[tokio::test]
async fn test_consume_generates_tag_and_rejects_duplicates() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    channel.handle_method(consume("tasks", "", false)).await.unwrap();
    match next_frame(&mut rx).await.method {
        Method::BasicConsumeOk { consumer_tag } => {
            assert!(consumer_tag.starts_with("amq.ctag-"));
            assert!(channel.consumer(&consumer_tag).is_some());
        }
        other => panic!("expected BasicConsumeOk, got {other:?}"),
    }

    channel.handle_method(consume("tasks", "dup", false)).await.unwrap();
    next_frame(&mut rx).await;
    let err = channel.handle_method(consume("tasks", "dup", false)).await.unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::NotAllowed);
    assert!(err.is_connection_error());
    connection.close().await;
}

#[tokio::test]
async fn test_consume_no_wait_sends_no_reply() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    let method = Method::BasicConsume {
        queue: "tasks".to_string(),
        consumer_tag: "quiet".to_string(),
        no_local: false,
        no_ack: false,
        exclusive: false,
        no_wait: true,
    };
    channel.handle_method(method).await.unwrap();
    assert_quiet(&mut rx).await;
    connection.close().await;
}

#[tokio::test]
async fn test_publish_immediate_not_implemented() {
    let (_broker, connection, _rx) = setup();
    let channel = connection.open_channel(1);

    let err = channel
        .handle_method(Method::BasicPublish {
            exchange: String::new(),
            routing_key: "tasks".to_string(),
            mandatory: false,
            immediate: true,
        })
        .await
        .unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::NotImplemented);
    assert_eq!(err.scope, ErrorScope::Channel);
    assert_eq!(err.reply_text, "Immediate = true");
}

#[tokio::test]
async fn test_publish_unknown_exchange_not_found() {
    let (_broker, connection, _rx) = setup();
    let channel = connection.open_channel(1);

    let err = channel
        .handle_method(Method::BasicPublish {
            exchange: "nope".to_string(),
            routing_key: "tasks".to_string(),
            mandatory: false,
            immediate: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::NotFound);
    assert_eq!(err.scope, ErrorScope::Channel);
}

#[tokio::test]
async fn test_content_without_publish_is_unexpected() {
    let (_broker, connection, _rx) = setup();
    let channel = connection.open_channel(1);

    let err = channel
        .handle_content(Properties::default(), b"stray".to_vec())
        .unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::UnexpectedFrame);
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn test_mandatory_unroutable_is_returned() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    channel
        .handle_method(Method::BasicPublish {
            exchange: String::new(),
            routing_key: "missing".to_string(),
            mandatory: true,
            immediate: false,
        })
        .await
        .unwrap();
    channel
        .handle_content(Properties::default(), b"bounce".to_vec())
        .unwrap();

    let frame = next_frame(&mut rx).await;
    match frame.method {
        Method::BasicReturn {
            reply_code,
            routing_key,
            ..
        } => {
            assert_eq!(reply_code, 312);
            assert_eq!(routing_key, "missing");
        }
        other => panic!("expected BasicReturn, got {other:?}"),
    }
    assert_eq!(frame.content.unwrap().body, b"bounce".to_vec());
}

#[tokio::test]
async fn test_non_mandatory_unroutable_is_dropped() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);
    send(&channel, "missing", "lost").await;
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_ack_unknown_tag_precondition_failed() {
    let (_broker, connection, _rx) = setup();
    let channel = connection.open_channel(1);

    let err = channel
        .handle_method(Method::BasicAck {
            delivery_tag: 42,
            multiple: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::PreconditionFailed);
    assert_eq!(err.scope, ErrorScope::Channel);
    assert_eq!(err.method_id, 80);
}

#[tokio::test]
async fn test_ack_multiple_spans_consumers() {
    let (broker, connection, mut rx) = setup();
    broker.declare_queue("other", false).unwrap();
    let channel = connection.open_channel(1);

    channel.handle_method(consume("tasks", "a", false)).await.unwrap();
    next_frame(&mut rx).await;
    channel.handle_method(consume("other", "b", false)).await.unwrap();
    next_frame(&mut rx).await;

    send(&channel, "tasks", "x").await;
    delivery(next_frame(&mut rx).await);
    send(&channel, "other", "y").await;
    let (last, _) = delivery(next_frame(&mut rx).await);

    channel
        .handle_method(Method::BasicAck {
            delivery_tag: last,
            multiple: true,
        })
        .await
        .unwrap();
    assert_eq!(channel.consumer("a").unwrap().unacked_count(), 0);
    assert_eq!(channel.consumer("b").unwrap().unacked_count(), 0);
    assert_eq!(channel.qos().snapshot().in_flight_count, 0);
    connection.close().await;
}

#[tokio::test]
async fn test_ack_multiple_with_nothing_outstanding_precondition_failed() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    channel.handle_method(consume("tasks", "c", false)).await.unwrap();
    next_frame(&mut rx).await;
    send(&channel, "tasks", "once").await;
    let (tag, _) = delivery(next_frame(&mut rx).await);

    let ack_all = Method::BasicAck {
        delivery_tag: 0,
        multiple: true,
    };
    channel.handle_method(ack_all.clone()).await.unwrap();

    // Everything up to `tag` is already settled.
    let err = channel
        .handle_method(Method::BasicAck {
            delivery_tag: tag,
            multiple: true,
        })
        .await
        .unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::PreconditionFailed);
    assert_eq!(err.scope, ErrorScope::Channel);

    let err = channel.handle_method(ack_all).await.unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::PreconditionFailed);
    connection.close().await;
}

#[tokio::test]
async fn test_nack_requeues_for_redelivery() {
    let (_broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    channel.handle_method(consume("tasks", "c", false)).await.unwrap();
    next_frame(&mut rx).await;
    send(&channel, "tasks", "retry").await;
    let (tag, _) = delivery(next_frame(&mut rx).await);

    channel
        .handle_method(Method::BasicNack {
            delivery_tag: tag,
            multiple: false,
            requeue: true,
        })
        .await
        .unwrap();

    let frame = next_frame(&mut rx).await;
    assert!(matches!(frame.method, Method::BasicDeliver { redelivered: true, .. }));
    connection.close().await;
}

#[tokio::test]
async fn test_cancel_consumer() {
    let (broker, connection, mut rx) = setup();
    let channel = connection.open_channel(1);

    channel.handle_method(consume("tasks", "c", false)).await.unwrap();
    next_frame(&mut rx).await;
    send(&channel, "tasks", "pending").await;
    delivery(next_frame(&mut rx).await);

    channel
        .handle_method(Method::BasicCancel {
            consumer_tag: "c".to_string(),
            no_wait: false,
        })
        .await
        .unwrap();
    assert_eq!(
        next_frame(&mut rx).await.method,
        Method::BasicCancelOk {
            consumer_tag: "c".to_string()
        }
    );
    assert!(channel.consumer("c").is_none());

    let queue = broker.get_queue("tasks").unwrap();
    assert_eq!(queue.len(), 1);
    assert!(queue.ready_messages()[0].redelivered);

    let err = channel
        .handle_method(Method::BasicCancel {
            consumer_tag: "c".to_string(),
            no_wait: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::NotFound);
    assert_eq!(err.scope, ErrorScope::Channel);
}

#[tokio::test]
async fn test_unsupported_method_is_connection_error() {
    let (_broker, connection, _rx) = setup();
    let channel = connection.open_channel(1);

    let err = channel
        .handle_method(Method::BasicGet {
            queue: "tasks".to_string(),
            no_ack: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.reply_code, ReplyCode::NotImplemented);
    assert!(err.is_connection_error());
    assert_eq!(err.method_id, 70);
    assert!(err.reply_text.contains("BasicGet"));
}

#[tokio::test]
async fn test_connection_close_requeues_everything() {
    let (broker, connection, mut rx) = setup();
    let first = connection.open_channel(1);
    let second = connection.open_channel(2);
    assert!(Arc::ptr_eq(&first, &connection.open_channel(1)));

    first.handle_method(consume("tasks", "a", false)).await.unwrap();
    next_frame(&mut rx).await;
    send(&second, "tasks", "one").await;
    delivery(next_frame(&mut rx).await);

    connection.close().await;
    assert_eq!(connection.channel_count(), 0);

    let queue = broker.get_queue("tasks").unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.consumer_count(), 0);
    assert_eq!(connection.qos().snapshot().in_flight_count, 0);
}

#[tokio::test]
async fn test_channel_uses_broker_default_prefetch() {
    let broker = Arc::new(Broker::default().with_default_prefetch(3, 0));
    let (tx, _rx) = mpsc::unbounded_channel();
    let connection = Connection::new(broker, tx);

    let channel = connection.open_channel(7);
    assert_eq!(channel.id(), 7);
    assert_eq!(channel.qos().snapshot().prefetch_count, 3);
    assert!(connection.close_channel(7).await);
    assert!(!connection.close_channel(7).await);
}
