use relay_core::config::ChainFamily;
use relay_core::simulation::{ClusterOptions, LocalCluster};
use relay_core::CrossChainState;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn three_peers_threshold_two_commit_exactly_once() {
    let cluster = LocalCluster::start(&ClusterOptions::new(3, 2)).unwrap();
    cluster.publish(&cluster.request_started("M1", b"hello"));

    assert!(cluster.wait_for_state("M1", CrossChainState::Committed, LIMIT).await.unwrap());
    // nothing else lands after the request settles
    tokio::time::sleep(Duration::from_secs(30)).await;

    let submissions = cluster.chain().submissions_for("M1");
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.context.round_id, 0);
    assert_eq!(submission.signatures.len(), 2);
    assert_eq!(submission.signatures[0].index, 0);

    for peer in 0..3 {
        let record = cluster.record(peer, "M1").await.unwrap().unwrap();
        assert_eq!(record.state, CrossChainState::Committed);
        assert_eq!(record.commit_transaction_id.as_deref(), Some(submission.transaction_id.as_str()));
    }
    cluster.shutdown();
}

#[tokio::test(start_paused = true)]
async fn pending_transaction_is_polled_until_success() {
    for family in [ChainFamily::Native, ChainFamily::Evm, ChainFamily::Ton] {
        let mut options = ClusterOptions::new(4, 3);
        options.family = family;
        options.pending_polls = 3;
        let cluster = LocalCluster::start(&options).unwrap();
        cluster.publish(&cluster.request_started("M1", family.to_string().as_bytes()));

        assert!(cluster.wait_for_state("M1", CrossChainState::Committed, LIMIT).await.unwrap());
        assert_eq!(cluster.chain().submissions_for("M1").len(), 1);
        cluster.shutdown();
    }
}

#[tokio::test(start_paused = true)]
async fn offline_leader_is_replaced_by_next_round() {
    let cluster = LocalCluster::start(&ClusterOptions::new(3, 2)).unwrap();
    cluster.set_reachable(0, false);
    cluster.publish(&cluster.request_started("M1", b"hello"));

    assert!(cluster.wait_for_state("M1", CrossChainState::Committed, LIMIT).await.unwrap());
    let submissions = cluster.chain().submissions_for("M1");
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].context.round_id, 1);
    assert!(cluster.record(0, "M1").await.unwrap().is_none());
    for peer in 1..3 {
        let record = cluster.record(peer, "M1").await.unwrap().unwrap();
        assert_eq!(record.report_context.round_id, 1);
    }
    cluster.shutdown();
}

#[tokio::test(start_paused = true)]
async fn many_messages_commit_independently() {
    let cluster = LocalCluster::start(&ClusterOptions::new(5, 3)).unwrap();
    let ids: Vec<String> = (0..8).map(|i| format!("M{}", i)).collect();
    for id in &ids {
        cluster.publish(&cluster.request_started(id, id.as_bytes()));
    }
    for id in &ids {
        assert!(cluster.wait_for_state(id, CrossChainState::Committed, LIMIT).await.unwrap());
        assert_eq!(cluster.chain().submissions_for(id).len(), 1);
    }
    assert_eq!(cluster.chain().submissions().len(), ids.len());
    cluster.shutdown();
}

#[tokio::test]
async fn rejects_bad_cluster_shapes() {
    assert!(LocalCluster::start(&ClusterOptions::new(3, 4)).is_err());
    assert!(LocalCluster::start(&ClusterOptions::new(0, 0)).is_err());
}
