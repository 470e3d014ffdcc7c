use super::{load_settings_from, normalize_database_url, prepare_database_url, Settings};

use std::{collections::HashMap, fs, path::Path};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_apply_without_file_or_env() {
    let settings = load_settings_from(Path::new("does-not-exist.toml"), env_from(&[]));
    assert_eq!(settings, Settings::default());
}

#[test]
fn file_values_are_overridden_by_env() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("server.toml");
    fs::write(
        &path,
        r#"
bind_addr = "0.0.0.0:9000"
database_url = "sqlite://./file.db"
feed_capacity = 64
scoring_admins = ["jury-1", "jury-2"]
"#,
    )
    .expect("write settings");

    let from_file = load_settings_from(&path, env_from(&[]));
    assert_eq!(from_file.server_bind, "0.0.0.0:9000");
    assert_eq!(from_file.feed_capacity, 64);
    assert_eq!(from_file.scoring_admins, vec!["jury-1", "jury-2"]);

    let overridden = load_settings_from(
        &path,
        env_from(&[
            ("SERVER_BIND", "127.0.0.1:1"),
            ("APP__BIND_ADDR", "127.0.0.1:2"),
            ("DATABASE_URL", "memory"),
            ("APP__SCORING_ADMINS", " jury-3 , ,jury-4"),
            ("APP__FEED_CAPACITY", "0"),
        ]),
    );
    assert_eq!(overridden.server_bind, "127.0.0.1:2");
    assert_eq!(overridden.database_url, "memory");
    assert_eq!(overridden.scoring_admins, vec!["jury-3", "jury-4"]);
    assert_eq!(overridden.feed_capacity, 64, "zero capacity is ignored");
}

#[test]
fn unreadable_file_falls_back_to_defaults() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("server.toml");
    fs::write(&path, "feed_capacity = \"many\"").expect("write settings");
    let settings = load_settings_from(&path, env_from(&[]));
    assert_eq!(settings.feed_capacity, Settings::default().feed_capacity);
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn memory_urls_pass_through() {
    assert_eq!(normalize_database_url("memory"), "memory");
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url(""), Settings::default().database_url);
}

#[test]
fn keeps_windows_absolute_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("sqlite:C:\\Users\\alice\\test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[test]
fn normalizes_windows_plain_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("C:\\Users\\alice\\test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[test]
fn converts_sqlite_double_slash_windows_path() {
    assert_eq!(
        normalize_database_url("sqlite://C:/Users/alice/test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("review.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    assert!(temp_root.path().join("nested").exists());

    let backend = storage::open_backend(&prepared).await.expect("open sqlite");
    backend.health_check().await.expect("health");
    drop(backend);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );
}
