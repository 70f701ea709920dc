use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use wikimirror::cache::writer;

const SHORT: &str = "<html>short</html>";

fn long_body() -> String {
    format!("<html>{}</html>", "x".repeat(64 * 1024))
}

#[tokio::test]
async fn readers_never_observe_partial_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("DOC").join("Home.html");
    let paths = BTreeSet::from([path.clone()]);
    let long = long_body();

    writer::write_all(&paths, SHORT.as_bytes().to_vec())
        .await
        .expect("initial write");

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        let path = path.clone();
        let long = long.clone();
        thread::spawn(move || {
            let mut reads = 0usize;
            while !done.load(Ordering::Acquire) {
                let contents = std::fs::read_to_string(&path).expect("artifact always present");
                assert!(
                    contents == SHORT || contents == long,
                    "observed a torn artifact of {} bytes",
                    contents.len()
                );
                reads += 1;
            }
            reads
        })
    };

    for round in 0..100 {
        let body = if round % 2 == 0 { long.as_str() } else { SHORT };
        writer::write_all(&paths, body.as_bytes().to_vec())
            .await
            .expect("rewrite");
    }
    done.store(true, Ordering::Release);

    let reads = reader.join().expect("reader thread should not panic");
    assert!(reads > 0);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("DOC"))
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() != "Home.html")
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind");
}

#[tokio::test]
async fn removal_after_write_leaves_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = BTreeSet::from([
        dir.path().join("DOC").join("Release Notes.html"),
        dir.path().join("DOC").join("Release+Notes.html"),
    ]);

    let written = writer::write_all(&paths, b"<html/>".to_vec())
        .await
        .expect("write");
    assert_eq!(written, 2);

    let removed = writer::remove_all(&paths).await.expect("remove");
    assert_eq!(removed, 2);
    assert_eq!(writer::remove_all(&paths).await.expect("second remove"), 0);
    assert!(paths.iter().all(|path| !path.exists()));
}
