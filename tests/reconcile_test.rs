//! Reconciliation integration tests
//!
//! Outside writes go straight to the store with `WriteOptions::external()`; the [Codex] event loop
//! has to apply their inverse edges exactly once.

mod common;

use codex_core::{
    codex::Codex,
    config::CodexConfig,
    error::CodexError,
    event::EventOrigin,
    properties::{Field, FieldValue, LinkField, MemberRef, NodeData, NodeId, NodeKind},
    reconcile::DeltaOp,
    store::{EntityStore, MemoryStore, WriteOptions},
};
use common::{add_node, init_logging, node, FlakyStore};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

async fn external_write(
    store: &dyn EntityStore,
    id: &NodeId,
    field: LinkField,
    value: FieldValue,
) {
    store
        .set_field(id, field.into(), value, WriteOptions::external())
        .await
        .unwrap();
}

fn ids(ids: &[NodeId]) -> FieldValue {
    FieldValue::Ids(ids.iter().copied().collect::<BTreeSet<_>>())
}

#[tokio::test]
async fn test_diff_touches_only_changed_ids() {
    init_logging();
    let store = MemoryStore::with_write_log();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let npc = add_node(&store, NodeKind::Npc, "npc").await;
    let x = add_node(&store, NodeKind::Npc, "x").await;
    let y = add_node(&store, NodeKind::Npc, "y").await;
    let z = add_node(&store, NodeKind::Npc, "z").await;

    external_write(&store, &npc, LinkField::Associates, ids(&[x, y])).await;
    codex.process_pending().await;
    assert!(node(&store, &x).has_link(LinkField::Associates, &npc));
    assert!(node(&store, &y).has_link(LinkField::Associates, &npc));

    store.clear_writes();
    external_write(&store, &npc, LinkField::Associates, ids(&[y, z])).await;
    let report = codex.process_pending().await;

    assert_eq!(report.reconciled.len(), 1);
    assert_eq!(report.reconciled[0].linked, 1);
    assert_eq!(report.reconciled[0].unlinked, 1);
    assert!(!node(&store, &x).has_link(LinkField::Associates, &npc));
    assert!(node(&store, &z).has_link(LinkField::Associates, &npc));
    assert!(store.writes_to(&y).is_empty());
}

#[tokio::test]
async fn test_internal_writes_are_not_reconciled_again() {
    init_logging();
    let store = MemoryStore::with_write_log();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let a = add_node(&store, NodeKind::Npc, "a").await;
    let b = add_node(&store, NodeKind::Npc, "b").await;

    external_write(&store, &a, LinkField::Associates, ids(&[b])).await;
    let report = codex.process_pending().await;

    // The outside write plus the one inverse write, and nothing bouncing back.
    assert_eq!(report.events, 2);
    assert_eq!(report.reconciled.len(), 1);
    assert_eq!(store.write_count(), 2);
    let inverse = store.writes_to(&b);
    assert_eq!(inverse.len(), 1);
    assert_eq!(inverse[0].origin, EventOrigin::Local);

    let report = codex.process_pending().await;
    assert_eq!(report.events, 0);
    assert_eq!(store.write_count(), 2);
}

#[tokio::test]
async fn test_external_container_change_reassigns_the_shop() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let l1 = add_node(&store, NodeKind::Location, "l1").await;
    let l2 = add_node(&store, NodeKind::Location, "l2").await;
    let shop = add_node(&store, NodeKind::Shop, "shop").await;

    codex.link_location_to_shop(&l1, &shop).await.unwrap();
    codex.process_pending().await;

    external_write(
        &store,
        &shop,
        LinkField::Container,
        FieldValue::Ref(Some(l2)),
    )
    .await;
    let report = codex.process_pending().await;

    assert!(report.reconciled[0].is_clean());
    assert!(!node(&store, &l1).has_link(LinkField::LinkedShops, &shop));
    assert!(node(&store, &l2).has_link(LinkField::LinkedShops, &shop));
    assert_eq!(node(&store, &shop).parent(LinkField::Container), Some(l2));
}

#[tokio::test]
async fn test_external_roster_edit_steals_the_shop() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let region = add_node(&store, NodeKind::Region, "region").await;
    let market = add_node(&store, NodeKind::Location, "market").await;
    let shop = add_node(&store, NodeKind::Shop, "shop").await;

    codex.link_region_to_shop(&region, &shop).await.unwrap();
    codex.process_pending().await;

    external_write(&store, &market, LinkField::LinkedShops, ids(&[shop])).await;
    codex.process_pending().await;

    assert_eq!(node(&store, &shop).parent(LinkField::Container), Some(market));
    assert!(node(&store, &region).link_ids(LinkField::LinkedShops).is_empty());
}

fn members(store: &MemoryStore, group: &NodeId) -> BTreeSet<MemberRef> {
    match node(store, group).data {
        NodeData::Group(data) => data.members,
        other => panic!("expected a group, got {other:?}"),
    }
}

#[tokio::test]
async fn test_external_member_edit_updates_groups() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let guild = add_node(&store, NodeKind::Group, "guild").await;
    let npc = add_node(&store, NodeKind::Npc, "npc").await;
    let shop = add_node(&store, NodeKind::Shop, "shop").await;

    let roster = BTreeSet::from([MemberRef::Npc(npc), MemberRef::Shop(shop)]);
    store
        .set_field(
            &guild,
            LinkField::Members.into(),
            FieldValue::Members(roster.clone()),
            WriteOptions::external(),
        )
        .await
        .unwrap();
    let report = codex.process_pending().await;
    assert!(report.reconciled[0].is_clean());
    assert_eq!(report.reconciled[0].linked, 2);
    assert!(node(&store, &npc).has_link(LinkField::Groups, &guild));
    assert!(node(&store, &shop).has_link(LinkField::Groups, &guild));
    assert_eq!(members(&store, &guild), roster);

    store
        .set_field(
            &guild,
            LinkField::Members.into(),
            FieldValue::Members(BTreeSet::from([MemberRef::Shop(shop)])),
            WriteOptions::external(),
        )
        .await
        .unwrap();
    codex.process_pending().await;
    assert!(!node(&store, &npc).has_link(LinkField::Groups, &guild));
    assert!(node(&store, &shop).has_link(LinkField::Groups, &guild));
}

#[tokio::test]
async fn test_external_groups_edit_stores_typed_member() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let guild = add_node(&store, NodeKind::Group, "guild").await;
    let council = add_node(&store, NodeKind::Group, "council").await;
    let region = add_node(&store, NodeKind::Region, "region").await;

    external_write(&store, &region, LinkField::Groups, ids(&[guild])).await;
    external_write(&store, &council, LinkField::Groups, ids(&[guild])).await;
    codex.process_pending().await;

    assert_eq!(
        members(&store, &guild),
        BTreeSet::from([MemberRef::Region(region), MemberRef::Group(council)])
    );
    assert!(members(&store, &council).is_empty());
}

#[tokio::test]
async fn test_external_region_roster_reparents_the_location() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let north = add_node(&store, NodeKind::Region, "north").await;
    let south = add_node(&store, NodeKind::Region, "south").await;
    let harbor = add_node(&store, NodeKind::Location, "harbor").await;
    codex.link_region_to_location(&north, &harbor).await.unwrap();
    codex.process_pending().await;

    external_write(&store, &south, LinkField::LinkedLocations, ids(&[harbor])).await;
    let report = codex.process_pending().await;

    assert!(report.reconciled[0].is_clean());
    assert_eq!(
        node(&store, &harbor).parent(LinkField::ParentRegion),
        Some(south)
    );
    assert!(node(&store, &north)
        .link_ids(LinkField::LinkedLocations)
        .is_empty());
    assert!(node(&store, &south).has_link(LinkField::LinkedLocations, &harbor));
}

#[tokio::test]
async fn test_non_link_edits_are_not_reconciled() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let npc = add_node(&store, NodeKind::Npc, "npc").await;

    store
        .set_field(
            &npc,
            Field::Notes,
            FieldValue::Text("owes the guild".to_string()),
            WriteOptions::external(),
        )
        .await
        .unwrap();
    let report = codex.process_pending().await;
    assert_eq!(report.events, 1);
    assert!(report.reconciled.is_empty());
    assert!(report.cascade.affected.contains(&npc));
}

#[tokio::test]
async fn test_failed_inverse_write_does_not_stop_siblings() {
    init_logging();
    let memory = MemoryStore::new();
    let flaky = Arc::new(FlakyStore::new(memory.clone()));
    let codex = Codex::new(flaky.clone(), CodexConfig::default());
    let npc = add_node(&memory, NodeKind::Npc, "npc").await;
    let l1 = add_node(&memory, NodeKind::Location, "l1").await;
    let l2 = add_node(&memory, NodeKind::Location, "l2").await;
    let l3 = add_node(&memory, NodeKind::Location, "l3").await;
    flaky.fail_writes_to(l2);

    external_write(
        flaky.as_ref(),
        &npc,
        LinkField::LinkedLocations,
        ids(&[l1, l2, l3]),
    )
    .await;
    let report = codex.process_pending().await;

    let reconciled = &report.reconciled[0];
    assert_eq!(reconciled.linked, 2);
    assert_eq!(reconciled.failures.len(), 1);
    let (delta, error) = &reconciled.failures[0];
    assert_eq!(delta.target, l2);
    assert_eq!(delta.op, DeltaOp::Link);
    assert!(error.is_store_failure());
    assert!(matches!(error, CodexError::Store(_)));

    assert!(node(&memory, &l1).has_link(LinkField::LinkedNpcs, &npc));
    assert!(!node(&memory, &l2).has_link(LinkField::LinkedNpcs, &npc));
    assert!(node(&memory, &l3).has_link(LinkField::LinkedNpcs, &npc));
    // Viewers are still refreshed for what did land.
    assert!(report.cascade.affected.contains(&l1));
}

#[tokio::test]
async fn test_dangling_targets_are_skipped() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let npc = add_node(&store, NodeKind::Npc, "npc").await;
    let ghost = NodeId::new();

    external_write(&store, &npc, LinkField::Associates, ids(&[ghost])).await;
    let report = codex.process_pending().await;

    assert!(report.reconciled[0].is_clean());
    assert_eq!(report.reconciled[0].skipped, vec![ghost]);
}

#[tokio::test]
async fn test_paused_reconciliation_still_refreshes() {
    init_logging();
    let store = MemoryStore::new();
    let codex = Codex::new(Arc::new(store.clone()), CodexConfig::default());
    let a = add_node(&store, NodeKind::Npc, "a").await;
    let b = add_node(&store, NodeKind::Npc, "b").await;

    codex.pause_reconciliation();
    external_write(&store, &a, LinkField::Associates, ids(&[b])).await;
    let report = codex.process_pending().await;
    assert!(report.reconciled.is_empty());
    assert!(report.cascade.affected.contains(&a));
    assert!(!node(&store, &b).has_link(LinkField::Associates, &a));

    codex.resume_reconciliation();
    external_write(&store, &b, LinkField::Associates, ids(&[a])).await;
    codex.process_pending().await;
    assert!(node(&store, &b).has_link(LinkField::Associates, &a));
    assert!(node(&store, &a).has_link(LinkField::Associates, &b));
}

#[tokio::test]
async fn test_run_loop_reconciles_until_the_feed_closes() {
    init_logging();
    let store = MemoryStore::new();
    let a = add_node(&store, NodeKind::Npc, "a").await;
    let b = add_node(&store, NodeKind::Npc, "b").await;
    let codex = Arc::new(Codex::new(Arc::new(store.clone()), CodexConfig::default()));

    let runner = tokio::spawn({
        let codex = codex.clone();
        async move { codex.run().await }
    });
    external_write(&store, &a, LinkField::Associates, ids(&[b])).await;

    let mut linked = false;
    for _ in 0..50 {
        if node(&store, &b).has_link(LinkField::Associates, &a) {
            linked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(linked);
    runner.abort();
}
