mod common;

use common::{TestCluster, secrets};

use std::time::Duration;

use bytes::Bytes;
use secret_cluster::{ClusterLauncher, Error, JoinMethod, NodeRole};
use secret_kv_memory::{MemoryConnector, MemoryEngine, MemoryNetwork};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_bootstrapper_creates_cluster_when_join_fails() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let store = cluster
        .acquisition(0, NodeRole::Bootstrapper)
        .run(&cancel)
        .await
        .unwrap();

    assert_eq!(store.name(), "secret-service-0");
    store.set(&secrets(&[("a", "1")]), 0).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_second_node_joins_and_shares_secrets() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let first = cluster
        .acquisition(0, NodeRole::Bootstrapper)
        .run(&cancel)
        .await
        .unwrap();
    let second = cluster
        .acquisition(1, NodeRole::Follower)
        .run(&cancel)
        .await
        .unwrap();

    first.set(&secrets(&[("shared", "value")]), 0).await.unwrap();

    assert_eq!(
        second.get("shared").await.unwrap(),
        Some(Bytes::from_static(b"value"))
    );
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_follower_waits_for_bootstrapper() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let follower = cluster.acquisition(1, NodeRole::Follower);
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { follower.run(&cancel).await }
    });

    // Past the first poll, with nothing to join yet.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(!task.is_finished());

    let bootstrapper = cluster
        .launcher(0)
        .launch(JoinMethod::Bootstrap, &cancel)
        .await
        .unwrap();

    let follower = task.await.unwrap().unwrap();
    assert_eq!(follower.name(), "secret-service-1");

    bootstrapper.set(&secrets(&[("a", "1")]), 0).await.unwrap();
    assert!(follower.get("a").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_follower_gives_up_at_deadline() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let result = cluster
        .acquisition(1, NodeRole::Follower)
        .run(&cancel)
        .await;

    assert!(matches!(result, Err(Error::WaitDeadline(deadline)) if deadline == Duration::from_secs(120)));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_cancel_stops_waiting() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let follower = cluster.acquisition(1, NodeRole::Follower);
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { follower.run(&cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(30)).await;
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_store_that_never_becomes_ready_is_closed() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let _bootstrapper = cluster
        .launcher(0)
        .launch(JoinMethod::Bootstrap, &cancel)
        .await
        .unwrap();

    // Membership is repaired through the real cluster, but the store itself
    // starts on a network where no peer can be reached.
    let isolated = MemoryNetwork::new();
    let options = cluster.options(1);
    let peer_url = options.names.peer_url(&options.node_name).unwrap();
    let launcher = ClusterLauncher::new(
        MemoryEngine::new(isolated.clone()),
        MemoryConnector::new(cluster.network.clone()),
        options,
    )
    .unwrap();

    let result = launcher.launch(JoinMethod::Join, &cancel).await;

    assert!(matches!(result, Err(Error::NotReady(_))));
    assert!(!isolated.is_listening(&peer_url));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_cancel_while_waiting_for_readiness_closes_store() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let _bootstrapper = cluster
        .launcher(0)
        .launch(JoinMethod::Bootstrap, &cancel)
        .await
        .unwrap();

    let isolated = MemoryNetwork::new();
    let options = cluster.options(1);
    let peer_url = options.names.peer_url(&options.node_name).unwrap();
    let readiness_timeout = options.readiness_timeout;
    let launcher = ClusterLauncher::new(
        MemoryEngine::new(isolated.clone()),
        MemoryConnector::new(cluster.network.clone()),
        options,
    )
    .unwrap();

    let (result, ()) = tokio::join!(launcher.launch(JoinMethod::Join, &cancel), async {
        tokio::time::sleep(readiness_timeout / 5).await;
        assert!(isolated.is_listening(&peer_url));
        cancel.cancel();
    });

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!isolated.is_listening(&peer_url));
}

#[tokio::test]
#[traced_test]
async fn test_node_name_without_ordinal_is_rejected() {
    let cluster = TestCluster::new();
    let mut options = cluster.options(0);
    options.node_name = "secret-service".to_string();

    let result = ClusterLauncher::new(
        MemoryEngine::new(cluster.network.clone()),
        MemoryConnector::new(cluster.network.clone()),
        options,
    );

    assert!(matches!(result, Err(Error::Config(_))));
}
