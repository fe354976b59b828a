mod common;

use assert_matches::assert_matches;
use common::{
    jar_bytes, remote_file, setup_mods_dir, summary, wait_until, write_file, FakeEngine,
    FakeRegistry,
};
use camino::Utf8Path;
use mod_sync_lib::config::{PostUpdate, Settings};
use mod_sync_lib::core::binding::RemoteBinding;
use mod_sync_lib::core::collection::{Collection, Phase};
use mod_sync_lib::core::context::AppContext;
use mod_sync_lib::core::mod_file::FileState;
use mod_sync_lib::core::registry::Registries;
use mod_sync_lib::models::error::SError;
use mod_sync_lib::models::events::CollectionEvent;
use mod_sync_lib::models::loader::{GameVersion, LoaderType};
use mod_sync_lib::models::remote::RegistryKind;
use mod_sync_lib::utils::events::EventSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    collection: Collection,
    events: UnboundedReceiver<CollectionEvent>,
    ctx: Arc<AppContext>,
}

impl Harness {
    fn drain(&mut self) -> Vec<CollectionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn harness(
    dir: &Utf8Path,
    settings: Settings,
    registries: Registries,
    engine: Arc<FakeEngine>,
) -> Harness {
    let ctx = AppContext::new(settings, registries, engine, EventSink::disconnected());
    let (sink, events) = EventSink::channel();
    let collection = Collection::new(ctx.clone(), dir, GameVersion::Any, LoaderType::Any, sink);
    Harness {
        collection,
        events,
        ctx,
    }
}

#[tokio::test]
async fn test_load_classifies_files() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "Foo.jar", b"foo");
    write_file(&dir, "Bar.jar.disabled", b"bar");
    write_file(&dir, "readme.txt", b"not a mod");
    write_file(&dir, "Baz.jar.downloading", b"partial");

    let mut h = harness(&dir, Settings::default(), Registries::new(), FakeEngine::auto());
    let summary = h.collection.load().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.collection.len(), 2);
    assert_eq!(h.collection.get("foo").unwrap().state(), FileState::Active);
    assert_eq!(h.collection.get("bar").unwrap().state(), FileState::Disabled);
    assert!(h.collection.get("baz").is_none());

    let events = h.drain();
    assert_eq!(events.first(), Some(&CollectionEvent::LoadStarted));
    assert!(events.contains(&CollectionEvent::LoadProgress { loaded: 2, total: 2 }));
    assert!(events.contains(&CollectionEvent::LoadFinished { mods: 2, failed: 0 }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_load_counts_unreadable_files() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "Foo.jar", b"foo");
    std::os::unix::fs::symlink(dir.join("gone.jar"), dir.join("Broken.jar")).unwrap();

    let mut h = harness(&dir, Settings::default(), Registries::new(), FakeEngine::auto());
    let summary = h.collection.load().await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(h.collection.get("foo").is_some());
    assert!(h.collection.get("broken").is_none());
    assert!(h
        .drain()
        .contains(&CollectionEvent::LoadFinished { mods: 1, failed: 1 }));
}

#[tokio::test]
async fn test_load_groups_superseded_files_by_declared_id() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "sodium-0.5.jar", &jar_bytes("sodium", "0.5"));
    write_file(&dir, "sodium-0.4.jar.old", &jar_bytes("sodium", "0.4"));
    write_file(&dir, "lithium-0.1.jar.old", &jar_bytes("lithium", "0.1"));
    write_file(&dir, "sodium-copy.jar", &jar_bytes("sodium", "0.5"));

    let mut h = harness(&dir, Settings::default(), Registries::new(), FakeEngine::auto());
    h.collection.load().await.unwrap();

    let sodium = h.collection.get("sodium").unwrap();
    assert_eq!(sodium.current().file_name(), "sodium-0.5.jar");
    assert_eq!(sodium.superseded().len(), 1);
    assert!(h.collection.get("sodium#sodium-copy").is_some());
    assert_eq!(h.collection.orphaned().len(), 1);
    assert_eq!(h.collection.orphaned()[0].file_name(), "lithium-0.1.jar.old");
}

#[tokio::test]
async fn test_load_of_missing_folder_fails_the_phase() {
    let (_tmp, dir) = setup_mods_dir();
    let mut h = harness(
        &dir.join("missing"),
        Settings::default(),
        Registries::new(),
        FakeEngine::auto(),
    );

    assert_matches!(h.collection.load().await, Err(SError::IOError(_)));
    assert_eq!(h.collection.phase(), None);
}

#[tokio::test]
async fn test_matching_remote_file_is_not_an_update() {
    let (_tmp, dir) = setup_mods_dir();
    let bytes = jar_bytes("foo", "1.0");
    write_file(&dir, "foo-1.0.jar", &bytes);

    let modrinth = FakeRegistry::new(RegistryKind::Modrinth);
    modrinth.has_files("AAA", vec![remote_file("v1", "foo-1.0.jar", &bytes, 1)]);
    let registries = Registries::new().with(modrinth);

    let mut h = harness(&dir, Settings::default(), registries, FakeEngine::auto());
    h.collection.load().await.unwrap();
    h.collection
        .bind("foo", RemoteBinding::new(RegistryKind::Modrinth, "AAA"))
        .unwrap();

    let summary = h.collection.check().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.collection.updatable_count(), 0);
    let binding = h.collection.get("foo").unwrap().binding(RegistryKind::Modrinth).unwrap();
    assert_eq!(binding.files.len(), 1);
    assert!(h.drain().contains(&CollectionEvent::CheckFinished {
        updatable: 0,
        failed: 0,
        cancelled: false
    }));
}

#[tokio::test]
async fn test_link_by_fingerprint_then_by_name() {
    let (_tmp, dir) = setup_mods_dir();
    let foo = jar_bytes("foo", "1.0");
    let bar = jar_bytes("bar", "2.0");
    write_file(&dir, "foo-1.0.jar", &foo);
    write_file(&dir, "bar-2.0.jar", &bar);
    write_file(&dir, "mystery.jar", b"unknown");

    let curseforge = FakeRegistry::new(RegistryKind::CurseForge);
    curseforge.knows_content(&foo, summary(RegistryKind::CurseForge, "100", "Foo", None));
    let modrinth = FakeRegistry::new(RegistryKind::Modrinth);
    modrinth.search_returns(vec![
        summary(RegistryKind::Modrinth, "B1", "Bar Reloaded", Some("bar")),
        summary(RegistryKind::Modrinth, "B2", "Barometer", Some("barometer")),
    ]);
    let registries = Registries::new().with(curseforge).with(modrinth);

    let mut h = harness(&dir, Settings::default(), registries, FakeEngine::auto());
    h.collection.load().await.unwrap();
    let summary = h.collection.link_all_files().await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    let foo = h.collection.get("foo").unwrap();
    assert_eq!(foo.binding(RegistryKind::CurseForge).unwrap().remote_mod_id, "100");
    assert!(foo.binding(RegistryKind::Modrinth).is_none());
    let bar = h.collection.get("bar").unwrap();
    assert_eq!(bar.binding(RegistryKind::Modrinth).unwrap().remote_mod_id, "B1");
    assert!(!h.collection.get("mystery").unwrap().is_bound());
}

#[tokio::test]
async fn test_check_counts_network_failures() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "foo.jar", b"foo");
    write_file(&dir, "bar.jar", b"bar");

    let modrinth = FakeRegistry::new(RegistryKind::Modrinth);
    modrinth.set_offline(true);
    let mut h = harness(
        &dir,
        Settings::default(),
        Registries::new().with(modrinth),
        FakeEngine::auto(),
    );
    h.collection.load().await.unwrap();
    h.collection
        .bind("foo", RemoteBinding::new(RegistryKind::Modrinth, "F"))
        .unwrap();
    h.collection
        .bind("bar", RemoteBinding::new(RegistryKind::Modrinth, "B"))
        .unwrap();

    let summary = h.collection.check().await.unwrap();

    assert_eq!(summary.failed, 2);
    assert!(h.drain().contains(&CollectionEvent::CheckFinished {
        updatable: 0,
        failed: 2,
        cancelled: false
    }));
}

#[tokio::test]
async fn test_link_stops_when_cancelled() {
    let (_tmp, dir) = setup_mods_dir();
    for n in 0..6 {
        write_file(&dir, &format!("mod{n}.jar"), format!("mod {n}").as_bytes());
    }
    let modrinth = FakeRegistry::new(RegistryKind::Modrinth);
    modrinth.set_delay(Duration::from_millis(20));
    let settings = Settings {
        thread_count: 1,
        ..Settings::default()
    };
    let Harness {
        mut collection,
        mut events,
        ..
    } = harness(&dir, settings, Registries::new().with(modrinth), FakeEngine::auto());
    collection.load().await.unwrap();

    let cancel = collection.cancel_handle();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                CollectionEvent::LinkProgress { done: 2, .. } => cancel.cancel(),
                CollectionEvent::LinkFinished(summary) => return Some(summary),
                _ => {}
            }
        }
        None
    });
    let summary = collection.link().await.unwrap();

    assert_eq!(summary.total, 6);
    assert!(summary.cancelled);
    assert!(summary.processed() >= 2);
    assert!(summary.processed() < summary.total);
    assert_eq!(watcher.await.unwrap(), Some(summary));
    assert_eq!(collection.phase(), None);

    // The next run starts from a cleared flag.
    let again = collection.link().await.unwrap();
    assert!(!again.cancelled);
    assert_eq!(again.processed(), 6);
}

async fn updatable_foo(
    dir: &Utf8Path,
    settings: Settings,
    engine: Arc<FakeEngine>,
    served: &[u8],
) -> Harness {
    let v1 = jar_bytes("foo", "1.0");
    let v2 = jar_bytes("foo", "2.0");
    write_file(dir, "foo-1.0.jar", &v1);

    let modrinth = FakeRegistry::new(RegistryKind::Modrinth);
    let new_file = remote_file("v2", "foo-2.0.jar", &v2, 2);
    engine.serve(&new_file.url, served);
    modrinth.has_files(
        "AAA",
        vec![remote_file("v1", "foo-1.0.jar", &v1, 1), new_file],
    );

    let mut h = harness(dir, settings, Registries::new().with(modrinth), engine);
    h.collection.load().await.unwrap();
    h.collection
        .bind("foo", RemoteBinding::new(RegistryKind::Modrinth, "AAA"))
        .unwrap();
    h.collection.check().await.unwrap();
    assert_eq!(h.collection.updatable_count(), 1);
    h
}

#[tokio::test]
async fn test_update_keeps_previous_file() {
    let (_tmp, dir) = setup_mods_dir();
    let v2 = jar_bytes("foo", "2.0");
    let engine = FakeEngine::auto();
    let mut h = updatable_foo(&dir, Settings::default(), engine, &v2).await;
    h.drain();

    let result = h.collection.update().await.unwrap();

    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 0);
    let foo = h.collection.get("foo").unwrap();
    assert_eq!(foo.current().path(), dir.join("foo-2.0.jar"));
    assert_eq!(foo.state(), FileState::Active);
    assert_eq!(foo.superseded().len(), 1);
    assert_eq!(foo.superseded()[0].path(), dir.join("foo-1.0.jar.old"));
    assert!(!dir.join("foo-2.0.jar.downloading").exists());
    assert_eq!(h.collection.updatable_count(), 0);
    assert!(h.ctx.downloads().snapshots().is_empty());

    let events = h.drain();
    assert!(events.contains(&CollectionEvent::UpdatesStarted { total: 1 }));
    assert!(events.contains(&CollectionEvent::UpdatesDoneCountUpdated { done: 1, total: 1 }));
    assert!(events.contains(&CollectionEvent::UpdatesDone {
        succeeded: 1,
        failed: 0
    }));
    assert!(events.contains(&CollectionEvent::ModUpdated {
        key: "foo".into(),
        registry: RegistryKind::Modrinth
    }));
}

#[tokio::test]
async fn test_update_with_delete_policy_removes_previous_file() {
    let (_tmp, dir) = setup_mods_dir();
    let settings = Settings {
        post_update: PostUpdate::Delete,
        ..Settings::default()
    };
    let v2 = jar_bytes("foo", "2.0");
    let mut h = updatable_foo(&dir, settings, FakeEngine::auto(), &v2).await;

    h.collection.update().await.unwrap();

    let foo = h.collection.get("foo").unwrap();
    assert_eq!(foo.current().path(), dir.join("foo-2.0.jar"));
    assert!(foo.superseded().is_empty());
    assert!(!dir.join("foo-1.0.jar").exists());
    assert!(!dir.join("foo-1.0.jar.old").exists());
}

#[tokio::test]
async fn test_update_with_bad_hash_leaves_mod_untouched() {
    let (_tmp, dir) = setup_mods_dir();
    let mut h = updatable_foo(&dir, Settings::default(), FakeEngine::auto(), b"corrupted").await;
    let before = std::fs::read(dir.join("foo-1.0.jar")).unwrap();

    let result = h.collection.update().await.unwrap();

    assert_eq!(result.failed, 1);
    assert_eq!(result.succeeded, 0);
    let foo = h.collection.get("foo").unwrap();
    assert_eq!(foo.current().path(), dir.join("foo-1.0.jar"));
    assert_eq!(std::fs::read(dir.join("foo-1.0.jar")).unwrap(), before);
    assert!(!dir.join("foo-2.0.jar.downloading").exists());
    assert!(!dir.join("foo-2.0.jar").exists());
    assert!(foo.updates().contains_key(&RegistryKind::Modrinth));
    assert_eq!(h.collection.updatable_count(), 1);
    assert!(h.ctx.downloads().snapshots().is_empty());
}

#[tokio::test]
async fn test_phases_are_exclusive_while_updates_drain() {
    let (_tmp, dir) = setup_mods_dir();
    let v2 = jar_bytes("foo", "2.0");
    let engine = FakeEngine::manual();
    let mut h = updatable_foo(&dir, Settings::default(), engine.clone(), &v2).await;

    assert_eq!(h.collection.update_all().unwrap(), 1);
    assert_eq!(h.collection.phase(), Some(Phase::Updating));
    assert_matches!(h.collection.check().await, Err(SError::Busy(_)));
    assert_matches!(h.collection.load().await, Err(SError::Busy(_)));
    assert_matches!(h.collection.link().await, Err(SError::Busy(_)));
    assert_matches!(h.collection.update_all(), Err(SError::Busy(_)));
    assert_matches!(h.collection.delete_all_superseded(), Err(SError::Busy(_)));
    assert_matches!(h.collection.delete_mod("foo"), Err(SError::Busy(_)));

    wait_until(|| engine.enqueued().len() == 1).await;
    engine.finish(&engine.enqueued()[0]);
    let result = h.collection.finish_updates().await.unwrap();

    assert_eq!(result.succeeded, 1);
    assert_eq!(h.collection.phase(), None);
    assert!(h.collection.check().await.is_ok());
}

#[tokio::test]
async fn test_ignored_update_is_not_offered() {
    let (_tmp, dir) = setup_mods_dir();
    let v2 = jar_bytes("foo", "2.0");
    let mut h = updatable_foo(&dir, Settings::default(), FakeEngine::auto(), &v2).await;

    h.collection.ignore_update("foo", RegistryKind::Modrinth).unwrap();
    assert_eq!(h.collection.updatable_count(), 0);

    h.collection.check().await.unwrap();
    assert_eq!(h.collection.updatable_count(), 0);
    assert_eq!(h.collection.update().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_disabled_registry_is_not_checked() {
    let (_tmp, dir) = setup_mods_dir();
    let settings = Settings {
        use_modrinth_update: false,
        ..Settings::default()
    };
    write_file(&dir, "foo.jar", b"foo");
    let modrinth = FakeRegistry::new(RegistryKind::Modrinth);
    modrinth.set_offline(true);
    let mut h = harness(&dir, settings, Registries::new().with(modrinth), FakeEngine::auto());
    h.collection.load().await.unwrap();
    h.collection
        .bind("foo", RemoteBinding::new(RegistryKind::Modrinth, "F"))
        .unwrap();

    let summary = h.collection.check().await.unwrap();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_delete_all_superseded() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "foo-1.3.jar", &jar_bytes("foo", "1.3"));
    for version in ["1.0", "1.1", "1.2"] {
        write_file(&dir, &format!("foo-{version}.jar.old"), &jar_bytes("foo", version));
    }

    let mut h = harness(&dir, Settings::default(), Registries::new(), FakeEngine::auto());
    h.collection.load().await.unwrap();
    assert_eq!(h.collection.get("foo").unwrap().superseded().len(), 3);

    let report = h.collection.delete_all_superseded().unwrap();

    assert_eq!(report.deleted, 3);
    assert_eq!(report.failed, 0);
    assert!(dir.join("foo-1.3.jar").exists());
    assert!(h.collection.get("foo").unwrap().superseded().is_empty());
    for version in ["1.0", "1.1", "1.2"] {
        assert!(!dir.join(format!("foo-{version}.jar.old")).exists());
    }
}

#[tokio::test]
async fn test_delete_mod_removes_it() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "Foo.jar", b"foo");
    write_file(&dir, "Bar.jar", b"bar");
    let mut h = harness(&dir, Settings::default(), Registries::new(), FakeEngine::auto());
    h.collection.load().await.unwrap();

    h.collection.delete_mod("foo").unwrap();

    assert!(!dir.join("Foo.jar").exists());
    assert!(h.collection.get("foo").is_none());
    assert!(h.collection.orphaned().is_empty());
    assert_eq!(h.collection.len(), 1);
    assert_matches!(h.collection.delete_mod("foo"), Err(SError::ModNotFound(_)));
}

#[tokio::test]
async fn test_delete_mod_orphans_previous_versions() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "foo-1.3.jar", &jar_bytes("foo", "1.3"));
    write_file(&dir, "foo-1.2.jar.old", &jar_bytes("foo", "1.2"));
    let mut h = harness(&dir, Settings::default(), Registries::new(), FakeEngine::auto());
    h.collection.load().await.unwrap();

    h.collection.delete_mod("foo").unwrap();

    assert!(!dir.join("foo-1.3.jar").exists());
    assert!(dir.join("foo-1.2.jar.old").exists());
    assert!(h.collection.get("foo").is_none());
    let orphans: Vec<_> = h.collection.orphaned().iter().map(|f| f.path().to_owned()).collect();
    assert_eq!(orphans, vec![dir.join("foo-1.2.jar.old")]);
}

#[tokio::test]
async fn test_edits_survive_reload() {
    let (_tmp, dir) = setup_mods_dir();
    write_file(&dir, "Foo.jar", b"foo");
    let mut h = harness(&dir, Settings::default(), Registries::new(), FakeEngine::auto());
    h.collection.load().await.unwrap();

    h.collection.set_enabled("foo", false).unwrap();
    h.collection.add_tag("foo", "performance").unwrap();
    h.collection.set_alias("foo", Some("Fancy Foo".into())).unwrap();
    h.collection.set_featured("foo", true).unwrap();
    assert!(dir.join("Foo.jar.disabled").exists());

    h.collection.load().await.unwrap();

    let foo = h.collection.get("foo").unwrap();
    assert_eq!(foo.state(), FileState::Disabled);
    assert_eq!(foo.display_name(), "Fancy Foo");
    assert!(foo.is_featured());
    assert!(h.collection.tags().contains("performance"));
    assert_matches!(
        h.collection.set_enabled("nope", true),
        Err(SError::ModNotFound(_))
    );
}
