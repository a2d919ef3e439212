mod fake_catalog;

use predicates::prelude::*;

use fake_catalog::{FakeCatalog, detailed_card, results_page};

fn spawn_catalog() -> FakeCatalog {
    FakeCatalog::spawn(|page, _| {
        let cards = if page > 1 {
            Vec::new()
        } else {
            vec![
                detailed_card(
                    "/v2/record/1",
                    "Dune",
                    "Herbert, Frank",
                    "PAPERBACK, 1965",
                    (4.2, 890),
                ),
                detailed_card(
                    "/v2/record/2",
                    "Foundation",
                    "Asimov, Isaac",
                    "BOOK, 1951",
                    (4.1, 420),
                ),
                detailed_card(
                    "/v2/record/3",
                    "Neuromancer",
                    "Gibson, William",
                    "EBOOK, 1984",
                    (3.9, 380),
                ),
            ]
        };
        (200, results_page(3, &cards))
    })
}

#[test]
fn scrape_stats_export_round_trip() {
    let catalog = spawn_catalog();
    let workdir = tempfile::tempdir().expect("create temp workdir");
    let db = workdir.path().join("library.db");
    let out_dir = workdir.path().join("results");

    let mut scrape = assert_cmd::cargo::cargo_bin_cmd!("bibliostat");
    scrape
        .args([
            "scrape",
            "--query",
            "science fiction",
            "--db",
            db.to_str().expect("db path"),
            "--base-url",
            &catalog.base_url,
            "--backoff-ms",
            "1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Scraped 3 of 3 items for 'science fiction'",
        ));

    let mut stats = assert_cmd::cargo::cargo_bin_cmd!("bibliostat");
    stats
        .args([
            "stats",
            "--query",
            "science fiction",
            "--db",
            db.to_str().expect("db path"),
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"item_count\": 3"))
        .stdout(predicate::str::contains("Herbert, Frank"));

    let mut export = assert_cmd::cargo::cargo_bin_cmd!("bibliostat");
    export
        .args([
            "export",
            "--query",
            "science fiction",
            "--db",
            db.to_str().expect("db path"),
            "--out",
            out_dir.to_str().expect("out path"),
        ])
        .assert()
        .success();

    for name in ["library_items.txt", "library_results.txt", "library_items.csv"] {
        assert!(out_dir.join(name).exists(), "missing artifact: {name}");
    }
    let csv = std::fs::read_to_string(out_dir.join("library_items.csv")).expect("read csv");
    assert_eq!(csv.lines().count(), 4);
}

#[test]
fn stats_on_an_empty_scope_still_succeeds() {
    let workdir = tempfile::tempdir().expect("create temp workdir");
    let db = workdir.path().join("library.db");

    let mut stats = assert_cmd::cargo::cargo_bin_cmd!("bibliostat");
    stats
        .args([
            "stats",
            "--query",
            "nothing scraped",
            "--db",
            db.to_str().expect("db path"),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("LIBRARY RESULTS: nothing scraped"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let workdir = tempfile::tempdir().expect("create temp workdir");
    let db = workdir.path().join("library.db");

    let mut stats = assert_cmd::cargo::cargo_bin_cmd!("bibliostat");
    stats
        .env("RUST_LOG", "debug")
        .args([
            "stats",
            "--query",
            "anything",
            "--db",
            db.to_str().expect("db path"),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
