use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{
    ensure_queue_schema, DequeueBroker, PostgresClient, PostgresConfig, PostgresQueueBroker,
    PostgresQueuePublisher, QueuePublisher, TapEvent, TapType,
};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

async fn start_postgres() -> (ContainerAsync<Postgres>, PostgresClient) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .unwrap();
    client
        .connect_with_retry(10, Duration::from_millis(500))
        .await
        .unwrap();
    ensure_queue_schema(&client).await.unwrap();

    (postgres, client)
}

fn taps(n: usize) -> Vec<TapEvent> {
    (0..n)
        .map(|i| {
            TapEvent::new(
                Uuid::new_v4(),
                format!("card-{i}"),
                "central",
                if i % 2 == 0 { TapType::Entry } else { TapType::Exit },
                Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, i as u32).unwrap(),
                vec![i as u8; 16],
            )
        })
        .collect()
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_published_batch_dequeues_in_order() {
    let (_container, client) = start_postgres().await;
    let publisher = PostgresQueuePublisher::new(client.clone(), "taps");
    let broker = PostgresQueueBroker::new(client, "taps");

    let batch = taps(5);
    publisher.publish_batch(&batch).await.unwrap();

    let mut tx = broker.begin().await.unwrap();
    let mut dequeued = Vec::new();
    while let Some(event) = tx.dequeue_one().await.unwrap() {
        dequeued.push(event);
    }
    tx.commit().await.unwrap();
    assert_eq!(dequeued, batch);

    let mut tx = broker.begin().await.unwrap();
    assert!(tx.dequeue_one().await.unwrap().is_none());
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_rollback_and_dropped_transactions_return_messages() {
    let (_container, client) = start_postgres().await;
    let publisher = PostgresQueuePublisher::new(client.clone(), "taps");
    let broker = PostgresQueueBroker::new(client, "taps");
    let batch = taps(2);
    publisher.publish_batch(&batch).await.unwrap();

    let mut tx = broker.begin().await.unwrap();
    assert_eq!(tx.dequeue_one().await.unwrap().as_ref(), Some(&batch[0]));
    tx.rollback().await.unwrap();

    {
        let mut tx = broker.begin().await.unwrap();
        assert_eq!(tx.dequeue_one().await.unwrap().as_ref(), Some(&batch[0]));
    }

    // The server releases the dropped connection's locks once it notices the disconnect.
    let mut redelivered = Vec::new();
    for _ in 0..20 {
        let mut tx = broker.begin().await.unwrap();
        while let Some(event) = tx.dequeue_one().await.unwrap() {
            redelivered.push(event);
        }
        if redelivered.len() == batch.len() {
            tx.commit().await.unwrap();
            break;
        }
        redelivered.clear();
        tx.rollback().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(redelivered, batch);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_queue_names_are_isolated() {
    let (_container, client) = start_postgres().await;
    let publisher = PostgresQueuePublisher::new(client.clone(), "north");
    let other = PostgresQueueBroker::new(client, "south");
    publisher.publish_batch(&taps(3)).await.unwrap();

    let mut tx = other.begin().await.unwrap();
    assert!(tx.dequeue_one().await.unwrap().is_none());
    tx.rollback().await.unwrap();
}

async fn queued_rows(client: &PostgresClient, queue_name: &str) -> i64 {
    let conn = client.get_connection().await.unwrap();
    conn.query_one(
        "SELECT count(*) FROM tap_queue WHERE queue_name = $1",
        &[&queue_name],
    )
    .await
    .unwrap()
    .get(0)
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_undecodable_rows_are_removed_by_an_empty_poll() {
    let (_container, client) = start_postgres().await;
    let conn = client.get_connection().await.unwrap();
    conn.execute(
        "INSERT INTO tap_queue (queue_name, message_id, payload) VALUES ($1, $2, $3)",
        &[&"taps", &Uuid::new_v4(), &vec![0xffu8, 0x00, 0x13]],
    )
    .await
    .unwrap();
    drop(conn);
    let broker = PostgresQueueBroker::new(client.clone(), "taps");

    let mut tx = broker.begin().await.unwrap();
    assert!(tx.dequeue_one().await.unwrap().is_none());
    tx.rollback().await.unwrap();
    assert_eq!(queued_rows(&client, "taps").await, 0);

    let mut tx = broker.begin().await.unwrap();
    assert!(tx.dequeue_one().await.unwrap().is_none());
    tx.rollback().await.unwrap();
    assert_eq!(queued_rows(&client, "taps").await, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_undecodable_row_is_skipped_ahead_of_valid_messages() {
    let (_container, client) = start_postgres().await;
    let conn = client.get_connection().await.unwrap();
    conn.execute(
        "INSERT INTO tap_queue (queue_name, message_id, payload) VALUES ($1, $2, $3)",
        &[&"taps", &Uuid::new_v4(), &vec![0x01u8]],
    )
    .await
    .unwrap();
    drop(conn);
    let publisher = PostgresQueuePublisher::new(client.clone(), "taps");
    let broker = PostgresQueueBroker::new(client.clone(), "taps");
    let batch = taps(2);
    publisher.publish_batch(&batch).await.unwrap();

    let mut tx = broker.begin().await.unwrap();
    let mut dequeued = Vec::new();
    while let Some(event) = tx.dequeue_one().await.unwrap() {
        dequeued.push(event);
    }
    tx.commit().await.unwrap();

    assert_eq!(dequeued, batch);
    assert_eq!(queued_rows(&client, "taps").await, 0);
}
