use rockpool::db::init_db;
use tempfile::tempdir;

#[tokio::test]
async fn test_migrations_and_schema() {
    let dir = match tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let db_path = dir.path().join("test_rockpool.db");

    // 1. Initialize DB (runs migrations)
    let pool = match init_db(&db_path).await {
        Ok(p) => p,
        Err(e) => panic!("Failed to init DB: {:?}", e),
    };

    // 2. Verify WAL mode
    let journal_mode: (String,) = match sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
    {
        Ok(jm) => jm,
        Err(e) => panic!("Failed to query journal_mode: {:?}", e),
    };
    assert_eq!(journal_mode.0.to_uppercase(), "WAL");

    // 3. Verify tables exist
    let tables: Vec<(String,)> =
        match sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&pool)
            .await
        {
            Ok(t) => t,
            Err(e) => panic!("Failed to query tables: {:?}", e),
        };

    let table_names: Vec<String> = tables.into_iter().map(|t| t.0).collect();
    for expected in [
        "users",
        "sessions",
        "chats",
        "messages",
        "streams",
        "api_keys",
        "schema_metadata",
    ] {
        assert!(
            table_names.contains(&expected.to_string()),
            "missing table {}",
            expected
        );
    }

    // 4. Verify indexes exist
    let indexes: Vec<(String,)> =
        match sqlx::query_as("SELECT name FROM sqlite_master WHERE type='index'")
            .fetch_all(&pool)
            .await
        {
            Ok(i) => i,
            Err(e) => panic!("Failed to query indexes: {:?}", e),
        };

    let index_names: Vec<String> = indexes.into_iter().map(|i| i.0).collect();
    for expected in [
        "idx_messages_chat_id",
        "idx_messages_stream_id",
        "idx_chats_user_id",
        "idx_sessions_user_id",
    ] {
        assert!(
            index_names.contains(&expected.to_string()),
            "missing index {}",
            expected
        );
    }

    // 5. Verify messages carry the generation bookkeeping columns
    let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
        match sqlx::query_as("PRAGMA table_info(messages)")
            .fetch_all(&pool)
            .await
        {
            Ok(c) => c,
            Err(e) => panic!("Failed to query table_info: {:?}", e),
        };

    let col_names: Vec<String> = columns.into_iter().map(|c| c.1).collect();
    for expected in [
        "generation_done",
        "stream_id",
        "client_id",
        "force_tool",
        "error",
    ] {
        assert!(
            col_names.contains(&expected.to_string()),
            "missing messages column {}",
            expected
        );
    }

    // 6. One credential cell per provider family
    let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
        match sqlx::query_as("PRAGMA table_info(api_keys)")
            .fetch_all(&pool)
            .await
        {
            Ok(c) => c,
            Err(e) => panic!("Failed to query table_info: {:?}", e),
        };

    let col_names: Vec<String> = columns.into_iter().map(|c| c.1).collect();
    for expected in ["openai", "groq", "anthropic", "google", "openrouter"] {
        assert!(
            col_names.contains(&expected.to_string()),
            "missing api_keys column {}",
            expected
        );
    }

    // 7. Schema version is recorded
    let version: (String,) =
        match sqlx::query_as("SELECT value FROM schema_metadata WHERE key = 'schema_version'")
            .fetch_one(&pool)
            .await
        {
            Ok(v) => v,
            Err(e) => panic!("Failed to query schema_version: {:?}", e),
        };
    assert_eq!(version.0, "1");

    pool.close().await;

    // 8. Re-opening an existing database re-runs migrations as a no-op
    let pool = match init_db(&db_path).await {
        Ok(p) => p,
        Err(e) => panic!("Failed to re-init DB: {:?}", e),
    };
    pool.close().await;
}

#[tokio::test]
async fn test_check_constraints_reject_bad_rows() {
    let dir = match tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let db_path = dir.path().join("test_constraints.db");
    let pool = match init_db(&db_path).await {
        Ok(p) => p,
        Err(e) => panic!("Failed to init DB: {:?}", e),
    };

    // Roles outside the user/assistant union are rejected.
    let bad_role = sqlx::query(
        "INSERT INTO messages (id, chat_id, user_id, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind("msg_1")
    .bind("chat_1")
    .bind("user_1")
    .bind("system")
    .bind(0_i64)
    .execute(&pool)
    .await;
    assert!(bad_role.is_err(), "role CHECK should reject 'system'");

    let good_role = sqlx::query(
        "INSERT INTO messages (id, chat_id, user_id, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind("msg_1")
    .bind("chat_1")
    .bind("user_1")
    .bind("user")
    .bind(0_i64)
    .execute(&pool)
    .await;
    assert!(good_role.is_ok(), "role CHECK should accept 'user'");

    // Stream statuses outside the lifecycle are rejected.
    let bad_status =
        sqlx::query("INSERT INTO streams (id, status, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind("stream_1")
            .bind("exploded")
            .bind(0_i64)
            .bind(0_i64)
            .execute(&pool)
            .await;
    assert!(bad_status.is_err(), "status CHECK should reject 'exploded'");

    let good_status =
        sqlx::query("INSERT INTO streams (id, status, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind("stream_1")
            .bind("streaming")
            .bind(0_i64)
            .bind(0_i64)
            .execute(&pool)
            .await;
    assert!(good_status.is_ok(), "status CHECK should accept 'streaming'");

    pool.close().await;
}
