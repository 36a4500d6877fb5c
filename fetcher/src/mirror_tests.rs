//! Tests for directory mirroring and its ledger bookkeeping.

use super::*;
use crate::ledger::EntryKind;
use crate::listing::MockTreeLister;
use crate::test_utils::{StubResponse, StubTransport, StubTreeLister};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Env {
    _dir: TempDir,
    root: Utf8PathBuf,
    ledger: Ledger,
}

#[fixture]
fn env() -> Env {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    Env {
        ledger: Ledger::new(root.join("models.ini")),
        root,
        _dir: dir,
    }
}

fn body() -> StubTransport {
    StubTransport::always(StubResponse::Body(b"bytes".to_vec()))
}

fn tree_record(ledger: &Ledger, repo: &str) -> RemoteTreeRecord {
    let (_, entry) = ledger
        .find_by_source(EntryKind::RemoteTree, repo)
        .expect("lookup")
        .expect("recorded");
    match entry.record {
        LedgerRecord::RemoteTree(record) => record,
        other => panic!("expected a remote tree record, got {other:?}"),
    }
}

#[rstest]
fn excluded_names_are_not_downloaded(env: Env) {
    let lister = StubTreeLister::from_files(&["a.bin", "README.md"]);
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root);
    let request = MirrorRequest::new("org/repo", "vae/repo")
        .with_exclusions(vec!["README.md".to_owned()])
        .recording(false);

    let report = mirror.mirror(&request).expect("mirror");

    assert_eq!(report.total, 2);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.excluded, 1);
    assert!(report.failed.is_empty());
    assert_eq!(transport.calls(), 1);
    assert!(env.root.join("vae/repo/a.bin").is_file());
    assert!(!env.root.join("vae/repo/README.md").exists());
}

#[rstest]
fn remote_structure_below_the_subpath_is_reproduced(env: Env) {
    let lister = StubTreeLister::from_files(&[
        "unet/config.json",
        "unet/fp16/model.bin",
        "vae/other.bin",
    ]);
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root);
    let request = MirrorRequest::new("org/repo", "diffusers/unet")
        .with_subpath("unet")
        .recording(false);

    let report = mirror.mirror(&request).expect("mirror");

    assert_eq!(report.total, 2);
    assert_eq!(report.downloaded, 2);
    assert!(env.root.join("diffusers/unet/config.json").is_file());
    assert!(env.root.join("diffusers/unet/fp16/model.bin").is_file());
    assert_eq!(
        transport.requested_urls(),
        [
            "https://huggingface.co/org/repo/resolve/main/unet/config.json",
            "https://huggingface.co/org/repo/resolve/main/unet/fp16/model.bin",
        ]
    );
}

#[rstest]
fn files_already_present_are_skipped(env: Env) {
    let existing = env.root.join("dest/a.bin");
    std::fs::create_dir_all(existing.parent().expect("parent")).expect("mkdir");
    std::fs::write(&existing, b"old").expect("seed");
    let lister = StubTreeLister::from_files(&["a.bin", "b.bin"]);
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root);

    let report = mirror
        .mirror(&MirrorRequest::new("org/repo", "dest").recording(false))
        .expect("mirror");

    assert_eq!((report.downloaded, report.skipped), (1, 1));
    assert_eq!(std::fs::read(&existing).expect("read"), b"old");
}

#[rstest]
fn one_failing_file_does_not_stop_the_rest(env: Env) {
    let lister = StubTreeLister::from_files(&["bad.bin", "good.bin"]);
    let transport = body().with_route(
        "https://huggingface.co/org/repo/resolve/main/bad.bin",
        StubResponse::Status(500),
    );
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root).with_ledger(&env.ledger);
    let request = MirrorRequest::new("org/repo", "dest").with_max_attempts(2);

    let report = mirror.mirror(&request).expect("mirror completes");

    assert_eq!(report.failed, ["bad.bin"]);
    assert_eq!(report.downloaded, 1);
    assert_eq!(transport.calls(), 3);
    assert!(!report.is_success());
    assert!(report.ledger_section.is_some(), "recorded despite failures");
}

#[rstest]
fn listing_failure_aborts_before_any_transfer(env: Env) {
    let mut lister = MockTreeLister::new();
    lister.expect_list_directory().returning(|_, _, _| {
        Err(ListingError::Http {
            url: "u".to_owned(),
            reason: "timed out".to_owned(),
        })
    });
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root).with_ledger(&env.ledger);

    let err = mirror
        .mirror(&MirrorRequest::new("org/repo", "dest"))
        .expect_err("listing failed");

    assert!(matches!(err, MirrorError::Listing(_)));
    assert_eq!(transport.calls(), 0);
    assert!(!env.ledger.exists());
}

#[rstest]
fn invalid_destination_is_rejected(env: Env) {
    let lister = StubTreeLister::from_files(&["a.bin"]);
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root);

    let err = mirror
        .mirror(&MirrorRequest::new("org/repo", "../escape"))
        .expect_err("invalid");

    assert!(matches!(err, MirrorError::InvalidDestination(_)));
    assert_eq!(lister.listing_calls(), 0);
}

#[rstest]
fn hostile_remote_paths_fail_individually(env: Env) {
    let lister = StubTreeLister::default()
        .with_directory("", vec![
            RemoteTreeNode::file("../evil.bin"),
            RemoteTreeNode::file("fine.bin"),
        ]);
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root);

    let report = mirror
        .mirror(&MirrorRequest::new("org/repo", "dest").recording(false))
        .expect("mirror");

    assert_eq!(report.failed, ["../evil.bin"]);
    assert_eq!(report.downloaded, 1);
    assert!(!env.root.join("evil.bin").exists());
}

#[rstest]
fn unchanged_structure_keeps_the_ledger_entry(env: Env) {
    let lister = StubTreeLister::from_files(&["a.bin", "README.md"]);
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root).with_ledger(&env.ledger);
    let request = MirrorRequest::new("org/sdxl-vae", "vae/sdxl")
        .with_exclusions(vec!["README.md".to_owned()]);

    let first = mirror.mirror(&request).expect("first");
    let recorded = tree_record(&env.ledger, "org/sdxl-vae");
    let second = mirror.mirror(&request).expect("second");

    assert_eq!(first.ledger_section.as_deref(), Some("sdxl-vae"));
    assert!(first.ledger_updated);
    assert_eq!(recorded.file_count, 1);
    assert_eq!(recorded.save_folder, "vae/sdxl");
    assert_eq!(recorded.exclude_files, ["README.md"]);
    assert_eq!(second.ledger_section.as_deref(), Some("sdxl-vae"));
    assert!(!second.ledger_updated);
    assert_eq!(second.skipped, 1);
}

#[rstest]
fn changed_file_count_updates_the_entry(env: Env) {
    let transport = body();
    let request = MirrorRequest::new("org/repo", "dest");
    let before = StubTreeLister::from_files(&["a.bin"]);
    DirectoryMirror::new(&before, &transport, &env.root)
        .with_ledger(&env.ledger)
        .mirror(&request)
        .expect("first");

    let after = StubTreeLister::from_files(&["a.bin", "b.bin"]);
    let report = DirectoryMirror::new(&after, &transport, &env.root)
        .with_ledger(&env.ledger)
        .mirror(&request)
        .expect("second");

    assert!(report.ledger_updated);
    assert_eq!(tree_record(&env.ledger, "org/repo").file_count, 2);
    assert_eq!(env.ledger.all().expect("load").len(), 1);
}

#[rstest]
fn tree_url_origin_records_a_directory_entry(env: Env) {
    let url = "https://huggingface.co/org/repo/tree/main/unet";
    let lister = StubTreeLister::from_files(&["unet/a.bin"]);
    let transport = body();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root).with_ledger(&env.ledger);
    let request = MirrorRequest::new("org/repo", "diffusers/unet")
        .with_subpath("unet")
        .with_origin(MirrorOrigin::TreeUrl(url.to_owned()));

    let report = mirror.mirror(&request).expect("mirror");

    assert_eq!(report.ledger_section.as_deref(), Some("unet"));
    let (_, entry) = env
        .ledger
        .find_by_source(EntryKind::Directory, url)
        .expect("lookup")
        .expect("recorded");
    let LedgerRecord::Directory(record) = entry.record else {
        panic!("expected a directory record");
    };
    assert_eq!(record.directory_path, "unet");
    assert_eq!(record.file_count, 1);
}

#[rstest]
fn cancellation_stops_between_files(env: Env) {
    let lister = StubTreeLister::from_files(&["a.bin"]);
    let transport = body();
    let token = CancelToken::new();
    token.cancel();
    let mirror = DirectoryMirror::new(&lister, &transport, &env.root).with_cancel(token);

    let err = mirror
        .mirror(&MirrorRequest::new("org/repo", "dest"))
        .expect_err("cancelled");

    assert!(matches!(err, MirrorError::Cancelled { .. }));
    assert_eq!(transport.calls(), 0);
}

fn remote_tree(file_count: usize, exclude: &[&str]) -> LedgerRecord {
    LedgerRecord::RemoteTree(RemoteTreeRecord {
        model_id: "o/r".to_owned(),
        save_folder: "dest".to_owned(),
        revision: "main".to_owned(),
        exclude_files: exclude.iter().map(|s| (*s).to_owned()).collect(),
        file_count,
    })
}

#[rstest]
#[case::same(remote_tree(2, &["a", "b"]), remote_tree(2, &["b", "a"]), false)]
#[case::count(remote_tree(2, &[]), remote_tree(3, &[]), true)]
#[case::exclusions(remote_tree(2, &["a"]), remote_tree(2, &[]), true)]
fn structure_comparison(
    #[case] recorded: LedgerRecord,
    #[case] current: LedgerRecord,
    #[case] changed: bool,
) {
    assert_eq!(structure_changed(&recorded, &current), changed);
}

#[test]
fn equivalent_destinations_are_not_a_change() {
    let LedgerRecord::RemoteTree(mut spelled) = remote_tree(1, &[]) else {
        panic!("remote tree");
    };
    spelled.save_folder = "./dest/".to_owned();
    assert!(!structure_changed(
        &LedgerRecord::RemoteTree(spelled),
        &remote_tree(1, &[])
    ));
}
