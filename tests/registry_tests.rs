// PluginRegistry tests: registration, lookup, ranking by active servers

mod common;

use common::{B0, stack, store_config};
use graphstats::models::EntityKind;

const DAY: i64 = 24 * 60 * 60;

#[tokio::test]
async fn register_plugin_is_get_or_create() {
    let s = stack(store_config(0)).await;
    let first = s.registry.register_plugin("Essentials", "ess-team").await.unwrap();
    let again = s.registry.register_plugin("Essentials", "someone-else").await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(again.author, "ess-team");
    assert_eq!(again.kind, EntityKind::Plugin);
    assert_eq!(again.global_hits, 0);
    assert!(!again.hidden);
}

#[tokio::test]
async fn plugin_and_server_names_do_not_collide() {
    let s = stack(store_config(0)).await;
    let plugin = s.registry.register_plugin("abc", "").await.unwrap();
    let server = s.registry.register_server("abc").await.unwrap();

    assert_ne!(plugin.id, server.id);
    assert_eq!(server.kind, EntityKind::Server);
    assert_eq!(
        s.registry.load_by_name("abc").await.unwrap().map(|e| e.id),
        Some(plugin.id)
    );
    assert_eq!(
        s.registry.load_server("abc").await.unwrap().map(|e| e.id),
        Some(server.id)
    );
}

#[tokio::test]
async fn load_by_name_is_exact_and_case_sensitive() {
    let s = stack(store_config(0)).await;
    let plugin = s.registry.register_plugin("WorldEdit", "").await.unwrap();

    assert!(s.registry.load_by_name("worldedit").await.unwrap().is_none());
    assert!(s.registry.load_by_name("World").await.unwrap().is_none());
    assert_eq!(
        s.registry.load_by_id(plugin.id).await.unwrap().map(|e| e.name),
        Some("WorldEdit".to_string())
    );
}

#[tokio::test]
async fn global_hits_and_hidden_flag_persist() {
    let s = stack(store_config(0)).await;
    let plugin = s.registry.register_plugin("Vault", "").await.unwrap();
    for _ in 0..3 {
        s.registry.increment_global_hits(plugin.id).await.unwrap();
    }
    s.registry.set_hidden(plugin.id, true).await.unwrap();

    let loaded = s.registry.load_by_name("Vault").await.unwrap().unwrap();
    assert_eq!(loaded.global_hits, 3);
    assert!(loaded.hidden);
}

#[tokio::test]
async fn ranking_counts_distinct_recent_servers() {
    let s = stack(store_config(0)).await;
    let now = B0;
    let a = s.registry.register_plugin("A", "").await.unwrap();
    let b = s.registry.register_plugin("B", "").await.unwrap();
    let c = s.registry.register_plugin("C", "").await.unwrap();
    let hidden = s.registry.register_plugin("Hidden", "").await.unwrap();
    s.registry.set_hidden(hidden.id, true).await.unwrap();

    let servers: Vec<_> = futures_util::future::try_join_all(
        ["s1", "s2", "s3"].map(|g| s.registry.register_server(g)),
    )
    .await
    .unwrap();

    // B: three servers, one of them twice (still counted once).
    for server in &servers {
        s.registry.record_server_plugin(server.id, b.id, now - 60).await.unwrap();
    }
    s.registry.record_server_plugin(servers[0].id, b.id, now).await.unwrap();
    // C: one recent server, one outside the window.
    s.registry.record_server_plugin(servers[0].id, c.id, now - 60).await.unwrap();
    s.registry.record_server_plugin(servers[1].id, c.id, now - 2 * DAY).await.unwrap();
    // Hidden: two servers; hidden plugins are still ranked.
    s.registry.record_server_plugin(servers[1].id, hidden.id, now).await.unwrap();
    s.registry.record_server_plugin(servers[2].id, hidden.id, now).await.unwrap();

    let ranked = s.registry.list_ranked(DAY, now).await.unwrap();
    let names: Vec<_> = ranked.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["B", "Hidden", "C", "A"]);
    assert!(ranked.iter().all(|e| e.kind == EntityKind::Plugin));
    assert_eq!(ranked[3].id, a.id);
}

#[tokio::test]
async fn ranking_ties_keep_insertion_order() {
    let s = stack(store_config(0)).await;
    for name in ["Zeta", "Alpha", "Mid"] {
        s.registry.register_plugin(name, "").await.unwrap();
    }
    let ranked = s.registry.list_ranked(DAY, B0).await.unwrap();
    let names: Vec<_> = ranked.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
}

#[tokio::test]
async fn ranking_without_plugins_is_empty() {
    let s = stack(store_config(0)).await;
    s.registry.register_server("only-a-server").await.unwrap();
    assert!(s.registry.list_ranked(DAY, B0).await.unwrap().is_empty());
}
