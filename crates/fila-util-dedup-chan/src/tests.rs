use super::*;

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn can_send_an_item() {
    let (tx, mut rx) = channel(10);

    tx.send(8).unwrap();

    assert_eq!(rx.recv().await, Ok(8));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn can_detect_tx_drop() {
    let (tx, mut rx) = channel(10);

    tx.send(8).unwrap();

    assert_eq!(rx.recv().await, Ok(8));

    drop(tx);

    assert_eq!(rx.recv().await, Err(RecvError::Closed));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn dedups_pending_items() {
    let (tx, mut rx) = channel(10);

    tx.send(8).unwrap();
    tx.send(8).unwrap();
    tx.send(9).unwrap();

    assert_eq!(rx.recv().await, Ok(8));
    assert_eq!(rx.recv().await, Ok(9));

    // Once picked up, the same item can be queued again.
    tx.send(8).unwrap();
    assert_eq!(rx.recv().await, Ok(8));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn workers_load_balance() {
    let (tx, mut rx1) = channel(10);
    let mut rx2 = rx1.clone();

    tx.send(1).unwrap();
    tx.send(2).unwrap();

    let a = rx1.recv().await.unwrap();
    let b = rx2.recv().await.unwrap();

    let mut got = [a, b];
    got.sort();
    assert_eq!(got, [1, 2]);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn reports_lagging_once() {
    let (tx, mut rx) = channel(2);

    tx.send(1).unwrap();
    tx.send(2).unwrap();
    assert!(matches!(tx.send(3), Err(SendError::Lagging(3))));

    assert_eq!(rx.recv().await, Ok(1));
    assert_eq!(rx.recv().await, Ok(2));
    assert_eq!(rx.recv().await, Err(RecvError::Lagging));

    tx.send(4).unwrap();
    assert_eq!(rx.recv().await, Ok(4));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn send_fails_when_receivers_gone() {
    let (tx, rx) = channel(10);
    drop(rx);

    assert!(matches!(tx.send(1), Err(SendError::Closed(1))));
}
