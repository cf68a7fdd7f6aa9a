use super::*;

fn new_marker(name: &str, country: &str) -> NewMarker {
    NewMarker {
        lat: 48.85,
        lng: 2.35,
        name: name.to_string(),
        message: "hello".to_string(),
        country: country.to_string(),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn list_is_empty_before_any_insert() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let markers = storage.list_markers().await.expect("list");
    assert!(markers.is_empty());
}

#[tokio::test]
async fn insert_returns_the_stored_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let stored = storage
        .insert_marker(&new_marker("Ann", "France"))
        .await
        .expect("insert");

    assert!(stored.id.0 > 0);
    assert_eq!(stored.lat, 48.85);
    assert_eq!(stored.lng, 2.35);
    assert_eq!(stored.name, "Ann");
    assert_eq!(stored.message, "hello");
    assert_eq!(stored.country, "France");
}

#[tokio::test]
async fn list_preserves_insertion_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for name in ["first", "second", "third"] {
        storage
            .insert_marker(&new_marker(name, "Japan"))
            .await
            .expect("insert");
    }

    let markers = storage.list_markers().await.expect("list");
    let names: Vec<&str> = markers.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
    assert!(markers.windows(2).all(|w| w[0].id.0 < w[1].id.0));
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("pinboard_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("markers.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}
