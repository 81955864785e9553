mod common;

use common::{TestCluster, secrets};

use std::time::Duration;

use bytes::Bytes;
use secret_cluster::{JoinMethod, LaunchOptions, MembershipRepairer};
use secret_kv::{ClientConfig, ClientTlsInfo, ClusterClient, ClusterConnector, Member};
use secret_kv_memory::MemoryConnector;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

async fn members(cluster: &TestCluster, options: &LaunchOptions) -> Vec<Member> {
    let config = ClientConfig {
        endpoints: vec![cluster.names.service_client_url().unwrap()],
        tls: ClientTlsInfo {
            cert_file: options.cert_file.clone(),
            key_file: options.key_file.clone(),
            trusted_ca_file: options.ca_file.clone(),
        },
        dial_timeout: Duration::from_secs(1),
    };

    MemoryConnector::new(cluster.network.clone())
        .connect(config)
        .await
        .unwrap()
        .member_list()
        .await
        .unwrap()
}

#[tokio::test]
#[traced_test]
async fn test_restarted_node_rejoins_under_its_name() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let first = cluster
        .launcher(0)
        .launch(JoinMethod::Bootstrap, &cancel)
        .await
        .unwrap();
    let second = cluster
        .launcher(1)
        .launch(JoinMethod::Join, &cancel)
        .await
        .unwrap();
    first.set(&secrets(&[("a", "1")]), 0).await.unwrap();

    // The node goes away without leaving the cluster.
    second.close();

    let options = cluster.options(1);
    let second = cluster
        .launcher_with(options.clone())
        .launch(JoinMethod::Join, &cancel)
        .await
        .unwrap();

    assert_eq!(
        second.get("a").await.unwrap(),
        Some(Bytes::from_static(b"1"))
    );

    let members = members(&cluster, &options).await;
    let names: Vec<&str> = members.iter().map(|member| member.name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"secret-service-0"));
    assert!(names.contains(&"secret-service-1"));

    let own = members
        .iter()
        .find(|member| member.name == "secret-service-1")
        .unwrap();
    assert_eq!(
        own.peer_urls,
        vec![options.names.peer_url("secret-service-1").unwrap()]
    );
}

#[tokio::test]
#[traced_test]
async fn test_repair_lists_peers_up_to_own_ordinal() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let _first = cluster
        .launcher(0)
        .launch(JoinMethod::Bootstrap, &cancel)
        .await
        .unwrap();

    // Node 1 never came up; node 2 still starts with it as a peer.
    let options = cluster.options(2);
    let connector = MemoryConnector::new(cluster.network.clone());
    let peers = MembershipRepairer::new(&connector, &options)
        .repair()
        .await
        .unwrap();

    let names: Vec<&str> = peers.iter().map(|peer| peer.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["secret-service-0", "secret-service-1", "secret-service-2"]
    );
    assert_eq!(peers[1].id, 0);
    assert_ne!(peers[2].id, 0);
}

#[tokio::test]
#[traced_test]
async fn test_repair_twice_keeps_one_registration() {
    let cluster = TestCluster::new();
    let cancel = CancellationToken::new();

    let _first = cluster
        .launcher(0)
        .launch(JoinMethod::Bootstrap, &cancel)
        .await
        .unwrap();

    let options = cluster.options(1);
    let connector = MemoryConnector::new(cluster.network.clone());

    // A registration that was added but never started is replaced.
    MembershipRepairer::new(&connector, &options)
        .repair()
        .await
        .unwrap();
    MembershipRepairer::new(&connector, &options)
        .repair()
        .await
        .unwrap();

    let own_peer_url = options.names.peer_url("secret-service-1").unwrap();
    let registrations = members(&cluster, &options)
        .await
        .into_iter()
        .filter(|member| member.peer_urls.contains(&own_peer_url))
        .count();
    assert_eq!(registrations, 1);
}
