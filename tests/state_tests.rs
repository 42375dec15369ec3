mod test_helpers;

use artemis_verify::resources::{AddressSpec, ClusterSpec, DesiredResource, ResourceKind};
use artemis_verify::retry::poll;
use artemis_verify::state::{
    Lookup, NotConverged, PersistedProbe, ReadyWorkersProbe, ResourceStateReader,
};
use artemis_verify::store::{MemoryStore, ResourceStore, StoreError};
use std::time::Duration;
use test_helpers::window;
use tokio::time::Instant;

fn broker(replicas: u32) -> ClusterSpec {
    ClusterSpec::new("ex-aao-broker", "default", replicas)
}

#[artemis_verify::test]
async fn reader_reports_missing_resource_as_not_found() {
    let store = MemoryStore::new();
    let reader = ResourceStateReader::new(&store);

    let lookup = reader
        .read(ResourceKind::Cluster, "default", "nothing-here")
        .await
        .unwrap();

    assert_eq!(lookup, Lookup::NotFound);
}

#[artemis_verify::test]
async fn reader_returns_ready_worker_names() {
    let store = MemoryStore::new();
    let cluster = broker(3);
    store
        .create(&DesiredResource::Cluster(cluster.clone()))
        .await
        .unwrap();
    store.set_ready(&cluster.resource_ref(), 2).await;

    let state = ResourceStateReader::new(&store)
        .read_ref(&cluster.resource_ref())
        .await
        .unwrap()
        .found()
        .expect("cluster should exist");

    assert_eq!(state.ready_count(), 2);
    assert_eq!(
        state.ready_workers,
        vec!["ex-aao-broker-ss-0", "ex-aao-broker-ss-1"]
    );
    assert!(state.resource_version.is_some());
}

#[artemis_verify::test]
async fn ready_probe_treats_not_found_as_a_failed_attempt() {
    let store = MemoryStore::new();
    let cluster = broker(5);
    let mut probe = ReadyWorkersProbe::new(&store, cluster.resource_ref(), 5);

    let err = artemis_verify::retry::Probe::attempt(&mut probe)
        .await
        .unwrap_err();

    assert_eq!(err, NotConverged::Missing(cluster.resource_ref()));
    assert_eq!(probe.last_observed(), None);
}

#[artemis_verify::test]
async fn ready_probe_requires_exact_count() {
    let store = MemoryStore::new();
    let cluster = broker(5);
    store
        .create(&DesiredResource::Cluster(cluster.clone()))
        .await
        .unwrap();
    store.set_ready(&cluster.resource_ref(), 6).await;

    let mut probe = ReadyWorkersProbe::new(&store, cluster.resource_ref(), 5);
    let err = artemis_verify::retry::Probe::attempt(&mut probe)
        .await
        .unwrap_err();

    assert_eq!(err.observed_ready(), Some(6));
    assert_eq!(probe.last_observed(), Some(6));
}

#[artemis_verify::test(start_paused = true)]
async fn rollout_converges_before_the_deadline() {
    let store = MemoryStore::new();
    let cluster = broker(5);
    store
        .create(&DesiredResource::Cluster(cluster.clone()))
        .await
        .unwrap();
    store
        .script_rollout(&cluster.resource_ref(), vec![0, 2, 3, 5])
        .await;
    let start = Instant::now();

    let mut probe = ReadyWorkersProbe::new(&store, cluster.resource_ref(), 5);
    let state = poll(&mut probe, window(180, 10)).await.unwrap();

    assert_eq!(state.ready_count(), 5);
    assert_eq!(start.elapsed().as_secs(), 30);
    assert!(start.elapsed() < Duration::from_secs(180));
}

#[artemis_verify::test(start_paused = true)]
async fn stalled_rollout_reports_last_observed_count() {
    let store = MemoryStore::new();
    let cluster = broker(5);
    store
        .create(&DesiredResource::Cluster(cluster.clone()))
        .await
        .unwrap();
    store
        .script_rollout(&cluster.resource_ref(), vec![1, 3])
        .await;

    let mut probe = ReadyWorkersProbe::new(&store, cluster.resource_ref(), 5);
    let err = poll(&mut probe, window(30, 10)).await.unwrap_err();

    assert_eq!(err.attempts, 4);
    assert_eq!(err.last_error.observed_ready(), Some(3));
    assert_eq!(probe.last_observed(), Some(3));
}

#[artemis_verify::test(start_paused = true)]
async fn probes_never_mutate_the_store() {
    let store = MemoryStore::new();
    let cluster = broker(5);
    let address = AddressSpec::new("ex-aaoaddress0", "default", "myAddress0", "myQueue0");
    store
        .create(&DesiredResource::Cluster(cluster.clone()))
        .await
        .unwrap();
    store
        .create(&DesiredResource::Address(address.clone()))
        .await
        .unwrap();
    let mutations = store.mutation_count();
    let reads = store.read_count();

    let mut ready = ReadyWorkersProbe::new(&store, cluster.resource_ref(), 5);
    let _ = poll(&mut ready, window(30, 10)).await;
    let mut persisted = PersistedProbe::new(&store, address.resource_ref());
    poll(&mut persisted, window(5, 1)).await.unwrap();

    assert_eq!(store.mutation_count(), mutations);
    assert_eq!(store.read_count(), reads + 5);
}

#[artemis_verify::test]
async fn persisted_probe_passes_once_created() {
    let store = MemoryStore::new();
    let address = AddressSpec::new("ex-aaoaddress1", "default", "myAddress1", "myQueue1");
    let mut probe = PersistedProbe::new(&store, address.resource_ref());

    assert!(matches!(
        artemis_verify::retry::Probe::attempt(&mut probe).await,
        Err(NotConverged::Missing(_))
    ));

    store
        .create(&DesiredResource::Address(address.clone()))
        .await
        .unwrap();
    let state = artemis_verify::retry::Probe::attempt(&mut probe)
        .await
        .unwrap();
    assert_eq!(state.resource, address.resource_ref());
    assert!(state.ready_workers.is_empty());
}

#[artemis_verify::test]
async fn create_collision_is_reported() {
    let store = MemoryStore::new();
    let cluster = broker(1);
    let desired = DesiredResource::Cluster(cluster.clone());
    store.create(&desired).await.unwrap();

    assert_eq!(
        store.create(&desired).await,
        Err(StoreError::AlreadyExists(cluster.resource_ref()))
    );
    assert_eq!(store.len().await, 1);
}

#[artemis_verify::test]
async fn delete_is_idempotent() {
    let store = MemoryStore::new();
    let cluster = broker(1);
    store
        .create(&DesiredResource::Cluster(cluster.clone()))
        .await
        .unwrap();

    store.delete(&cluster.resource_ref()).await.unwrap();
    store.delete(&cluster.resource_ref()).await.unwrap();

    assert!(store.is_empty().await);
    assert_eq!(store.mutation_count(), 2);
}
