//! End-to-end build scenarios driving the real copy-compiler subprocess.

use assetforge::{build_project, channel, BuildEvent, BuildSummary, Project, SkipReason};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const COPY_COMPILER: &str = env!("CARGO_BIN_EXE_copy-compiler");

/// Lay out an empty project named `game` with a pipeline mapping `txt` to
/// the copy compiler, returning the project root.
fn setup_project(tmp: &TempDir) -> PathBuf {
    let root = tmp.path().join("game");
    fs::create_dir_all(&root).unwrap();
    let pipeline = serde_json::json!({
        "txt": { "executable": COPY_COMPILER }
    });
    fs::write(
        root.join("pipeline.json"),
        serde_json::to_string_pretty(&pipeline).unwrap(),
    )
    .unwrap();
    root
}

fn add_source(root: &Path, package: &str, name: &str, content: &str) -> PathBuf {
    let dir = root.join("packages").join(format!("{}.source", package));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

async fn build(root: &Path, platform: &str) -> (BuildSummary, Vec<BuildEvent>) {
    let name = root.file_name().unwrap().to_string_lossy().into_owned();
    let parent = root.parent().unwrap().to_path_buf();
    let mut project = Project::create(&parent, &name).unwrap();

    let (events, mut receiver) = channel();
    let summary = build_project(&mut project, platform, &events).await.unwrap();
    drop(events);

    let mut collected = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        collected.push(event);
    }
    (summary, collected)
}

fn started(events: &[BuildEvent], path: &Path) -> bool {
    events.iter().any(|event| {
        matches!(event, BuildEvent::FileStarted { source_path, .. } if source_path == path)
    })
}

fn succeeded(events: &[BuildEvent], path: &Path) -> bool {
    events.iter().any(|event| {
        matches!(event, BuildEvent::FileSuccess { source_path, .. } if source_path == path)
    })
}

fn skipped(events: &[BuildEvent], path: &Path, reason: SkipReason) -> bool {
    events.iter().any(|event| {
        matches!(
            event,
            BuildEvent::FileSkipped { source_path, reason: r, .. }
                if source_path == path && *r == reason
        )
    })
}

#[tokio::test]
async fn fresh_build_compiles_and_records() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    let bar = add_source(&root, "foo", "bar.txt", "hello");

    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.built, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(
        events,
        vec![
            BuildEvent::Ready,
            BuildEvent::PackageStarted {
                package: "foo".to_string()
            },
            BuildEvent::FileStarted {
                package: "foo".to_string(),
                source_path: bar.clone()
            },
            BuildEvent::FileSuccess {
                package: "foo".to_string(),
                source_path: bar.clone()
            },
            BuildEvent::PackageComplete {
                package: "foo".to_string(),
                error_count: 0
            },
            BuildEvent::ProjectComplete { error_count: 0 },
        ]
    );

    // "bar" hashes to 18b0f2; the compiler appends the resource type.
    let output = root.join("packages/foo.generic.target/18b0f2.txt");
    assert_eq!(fs::read_to_string(&output).unwrap(), "hello");

    let source_db: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(root.join("database/foo.source.json")).unwrap())
            .unwrap();
    assert_eq!(source_db["bundleName"], "foo");
    assert_eq!(source_db["entries"][0]["resourceType"], "txt");

    let target_db: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(root.join("database/foo.generic.target.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(target_db["platform"], "generic");
    assert_eq!(target_db["entries"][0]["sourcePath"], "bar.txt");
    assert_eq!(target_db["entries"][0]["compilerName"], "copy-compiler");
}

#[tokio::test]
async fn unchanged_rerun_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    let bar = add_source(&root, "foo", "bar.txt", "hello");

    build(&root, "").await;
    let output = root.join("packages/foo.generic.target/18b0f2.txt");
    let first_mtime = fs::metadata(&output).unwrap().modified().unwrap();

    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.built, 0);
    assert_eq!(summary.errors, 0);
    assert!(skipped(&events, &bar, SkipReason::UpToDate));
    assert!(!started(&events, &bar));
    assert_eq!(
        fs::metadata(&output).unwrap().modified().unwrap(),
        first_mtime
    );
}

#[tokio::test]
async fn touched_dependency_invalidates_the_dependent() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    let bar = add_source(&root, "foo", "bar.txt", "@depends baz.dep\npayload");
    add_source(&root, "foo", "baz.dep", "v1");

    let (summary, _) = build(&root, "").await;
    assert_eq!(summary.built, 1);

    // The dependency changes; its dependent must rebuild.
    add_source(&root, "foo", "baz.dep", "v2-longer");
    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.built, 1);
    assert!(started(&events, &bar));
    assert!(succeeded(&events, &bar));

    // And with nothing touched the project settles back to up to date.
    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.built, 0);
    assert!(skipped(&events, &bar, SkipReason::UpToDate));
}

#[tokio::test]
async fn deleted_output_triggers_rebuild() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    let bar = add_source(&root, "foo", "bar.txt", "hello");

    build(&root, "").await;
    let output = root.join("packages/foo.generic.target/18b0f2.txt");
    fs::remove_file(&output).unwrap();

    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.built, 1);
    assert!(started(&events, &bar));
    assert!(succeeded(&events, &bar));
    assert!(output.exists());
}

#[tokio::test]
async fn platform_mismatch_skips_without_compiling() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    let ios_file = add_source(&root, "mobile", "bar.ios.txt", "hello");

    let (summary, events) = build(&root, "android").await;
    assert_eq!(summary.built, 0);
    assert_eq!(summary.errors, 0);
    assert!(skipped(&events, &ios_file, SkipReason::PlatformMismatch));
    assert!(!started(&events, &ios_file));
    assert!(root.join("packages/mobile.android.target").is_dir());
}

#[tokio::test]
async fn compiler_failure_is_reported_and_counted() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    let bad = add_source(&root, "foo", "bad.txt", "@fail bad input");

    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.built, 0);
    assert!(events.iter().any(|event| matches!(
        event,
        BuildEvent::FileError { source_path, errors, .. }
            if source_path == &bad && errors == &vec!["bad input".to_string()]
    )));
    assert!(events.contains(&BuildEvent::PackageComplete {
        package: "foo".to_string(),
        error_count: 1
    }));
    assert!(events.contains(&BuildEvent::ProjectComplete { error_count: 1 }));
}

#[tokio::test]
async fn one_worker_serves_a_whole_package() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    let a = add_source(&root, "foo", "a.txt", "alpha");
    let b = add_source(&root, "foo", "b.txt", "beta");
    let c = add_source(&root, "foo", "c.txt", "gamma");

    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.built, 3);
    for path in [&a, &b, &c] {
        assert!(succeeded(&events, path));
    }
    // One worker, FIFO: completions come back in submission order.
    let successes: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            BuildEvent::FileSuccess { source_path, .. } => Some(source_path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(successes, vec![a, b, c]);
}

#[tokio::test]
async fn packages_complete_before_the_project() {
    let tmp = TempDir::new().unwrap();
    let root = setup_project(&tmp);
    add_source(&root, "audio", "music.txt", "notes");
    add_source(&root, "video", "intro.txt", "frames");

    let (summary, events) = build(&root, "").await;
    assert_eq!(summary.packages, 2);
    assert_eq!(summary.built, 2);

    let complete_positions: Vec<_> = events
        .iter()
        .enumerate()
        .filter_map(|(at, event)| match event {
            BuildEvent::PackageComplete { .. } => Some(at),
            _ => None,
        })
        .collect();
    assert_eq!(complete_positions.len(), 2);
    let project_position = events
        .iter()
        .position(|event| matches!(event, BuildEvent::ProjectComplete { .. }))
        .unwrap();
    assert!(complete_positions.iter().all(|&at| at < project_position));
}
