#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use rockpool::api::build_router;
    use rockpool::chats;
    use rockpool::db::{init_db, now_ms, DbPool};
    use rockpool::reader::{run_reader, HttpSource};
    use rockpool::streams::StreamStore;
    use rockpool::types::{StreamStatus, UserId};
    use rockpool::{AppState, Args};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tower::util::ServiceExt;

    fn test_args() -> Args {
        Args {
            port: 0,
            host: "127.0.0.1".to_string(),
            database: String::new(),
            stream_wait_secs: 1,
            generation_timeout_secs: 5,
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
            max_retries: 0,
            max_body_size: 2 * 1024 * 1024,
        }
    }

    async fn state_in(dir: &TempDir) -> Arc<AppState> {
        let db = init_db(&dir.path().join("api_test.db")).await.unwrap();
        let streams = Arc::new(StreamStore::new(db.clone()));
        Arc::new(AppState {
            client: reqwest::Client::new(),
            db,
            streams,
            encryption_secret: "api-test-secret".to_string(),
            args: Arc::new(test_args()),
        })
    }

    async fn seed_session(db: &DbPool, user: &str, token: &str, expires_at: i64) {
        sqlx::query("INSERT INTO users (id, email, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(user)
            .bind(format!("{}@example.com", user))
            .bind(user)
            .bind(now_ms())
            .execute(db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO sessions (id, token, user_id, expires_at, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(format!("sess_{}", user))
        .bind(token)
        .bind(user)
        .bind(expires_at)
        .bind(now_ms())
        .execute(db)
        .await
        .unwrap();
    }

    fn get(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(path: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn delete(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("DELETE").uri(path);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        let app = build_router(state);

        let response = app.clone().oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");

        let response = app.oneshot(get("/readyz", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn test_unauthenticated_requests_are_rejected() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        // A session that expired a second ago is as good as no session.
        seed_session(&state.db, "user_old", "tok_old", now_ms() - 1_000).await;
        let app = build_router(state);

        for request in [
            get("/v1/chats", None),
            get("/v1/chats", Some("tok_bogus")),
            get("/v1/chats", Some("tok_old")),
        ] {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body = json_body(response).await;
            assert_eq!(body["code"], "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn test_send_message_flow_without_credentials() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        seed_session(&state.db, "user_1", "tok_1", now_ms() + 3_600_000).await;
        let app = build_router(state);

        // 1. Send a message. The ticket comes back before generation settles.
        let send = post_json(
            "/v1/messages",
            Some("tok_1"),
            json!({"prompt": "Hello", "model": "gpt-4.1", "client_id": "client_1"}),
        );
        let response = app.clone().oneshot(send).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ticket = json_body(response).await;
        let chat_id = ticket["chat_id"].as_str().unwrap().to_string();
        let stream_id = ticket["stream_id"].as_str().unwrap().to_string();
        assert!(ticket["message_id"].as_str().is_some());

        // 2. Long-poll the stream. No OpenAI key is on file, so the worker
        // fails during resolution and the stream closes empty.
        let path = format!("/v1/streams/{}?from=0&wait_ms=2000", stream_id);
        let mut last = Value::Null;
        for _ in 0..20 {
            let response = app.clone().oneshot(get(&path, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            last = json_body(response).await;
            match last["status"].as_str() {
                Some("pending") | Some("streaming") => continue,
                _ => break,
            }
        }
        assert_eq!(last["status"], "error");
        assert_eq!(last["body"], "");
        assert_eq!(last["len"], 0);

        // 3. The chat shows up under Today with the placeholder title.
        let response = app
            .clone()
            .oneshot(get("/v1/chats", Some("tok_1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let groups = json_body(response).await;
        assert_eq!(groups[0]["label"], "Today");
        assert_eq!(groups[0]["chats"][0]["id"], chat_id.as_str());
        assert_eq!(groups[0]["chats"][0]["title"], "New Chat");

        // 4. The transcript has both rows; the assistant row is patched with
        // the resolver's message shortly after the stream closes.
        let transcript_path = format!("/v1/chats/{}/messages", chat_id);
        let mut assistant = Value::Null;
        for _ in 0..40 {
            let response = app
                .clone()
                .oneshot(get(&transcript_path, Some("tok_1")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let records = json_body(response).await;
            if records[1]["generation_done"] == true {
                assert_eq!(records.as_array().map(|a| a.len()), Some(2));
                assert_eq!(records[0]["role"], "user");
                assert_eq!(records[0]["content"], "Hello");
                assistant = records[1].clone();
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(
            assistant["error"],
            "API key not configured for model: gpt-4.1"
        );
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["stream_id"], stream_id.as_str());
    }

    #[tokio::test]
    async fn test_stream_reads_deliver_deltas_on_byte_boundaries() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        let app = build_router(state.clone());

        let id = state.streams.create().await.unwrap();
        state.streams.append(&id, "Hello, world").await.unwrap();
        state
            .streams
            .finalize(&id, StreamStatus::Done, None)
            .await
            .unwrap();

        // A caller holding the first 5 bytes gets just the suffix.
        let response = app
            .clone()
            .oneshot(get(&format!("/v1/streams/{}?from=5&wait_ms=0", id), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "done");
        assert_eq!(body["body"], ", world");
        assert_eq!(body["len"], 12);

        // An offset past the end falls back to the full body.
        let response = app
            .clone()
            .oneshot(get(&format!("/v1/streams/{}?from=999&wait_ms=0", id), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["body"], "Hello, world");
        assert_eq!(body["len"], 12);

        // An offset inside a multi-byte char also falls back to the full body.
        let accented = state.streams.create().await.unwrap();
        state.streams.append(&accented, "héllo").await.unwrap();
        state
            .streams
            .finalize(&accented, StreamStatus::Done, None)
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(get(
                &format!("/v1/streams/{}?from=2&wait_ms=0", accented),
                None,
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["body"], "héllo");
        assert_eq!(body["len"], 6);

        // Unknown streams are a 404, not an empty body.
        let response = app
            .clone()
            .oneshot(get("/v1/streams/stream_missing?wait_ms=0", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_stream_route_allows_cross_origin_reads() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        let app = build_router(state.clone());

        let id = state.streams.create().await.unwrap();
        state
            .streams
            .finalize(&id, StreamStatus::Done, Some("done"))
            .await
            .unwrap();

        let request = Request::builder()
            .uri(format!("/v1/streams/{}?wait_ms=0", id))
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let allow = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok());
        assert_eq!(allow, Some("*"));

        // The authenticated surface does not advertise CORS.
        let request = Request::builder()
            .uri("/v1/chats")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_key_management_roundtrip() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        seed_session(&state.db, "user_1", "tok_1", now_ms() + 3_600_000).await;
        let app = build_router(state);

        // Empty to start.
        let response = app
            .clone()
            .oneshot(get("/v1/keys", Some("tok_1")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!([]));

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/keys",
                Some("tok_1"),
                json!({"provider": "openai", "key": "sk-proj-abcdef123456"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // The listing exposes only a masked preview, never the key itself.
        let response = app
            .clone()
            .oneshot(get("/v1/keys", Some("tok_1")))
            .await
            .unwrap();
        let listing = json_body(response).await;
        assert_eq!(
            listing,
            json!([{"provider": "openai", "preview": "sk-p...3456"}])
        );

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/keys",
                Some("tok_1"),
                json!({"provider": "frobnicator", "key": "whatever"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "INVALID_REQUEST");

        let response = app
            .clone()
            .oneshot(delete("/v1/keys/openai", Some("tok_1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(get("/v1/keys", Some("tok_1")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_chat_access_is_owner_scoped() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        seed_session(&state.db, "user_1", "tok_1", now_ms() + 3_600_000).await;
        seed_session(&state.db, "user_2", "tok_2", now_ms() + 3_600_000).await;

        let chat = chats::create_chat(&state.db, &UserId("user_1".to_string()))
            .await
            .unwrap();
        let app = build_router(state);
        let path = format!("/v1/chats/{}/messages", chat);

        // Another user's chat reads exactly like a missing one.
        let response = app
            .clone()
            .oneshot(get(&path, Some("tok_2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["code"], "NOT_FOUND");

        let response = app
            .clone()
            .oneshot(get(&path, Some("tok_1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!([]));

        // The owner's listing has the chat; the other user's is empty.
        let response = app
            .clone()
            .oneshot(get("/v1/chats", Some("tok_2")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_http_reader_follows_live_stream() {
        let dir = tempdir().unwrap();
        let state = state_in(&dir).await;
        let app = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("test server error: {}", e);
            }
        });

        let id = state.streams.create().await.unwrap();

        // Trickle the body out while a remote reader follows it.
        let writer = {
            let streams = state.streams.clone();
            let id = id.clone();
            tokio::spawn(async move {
                for chunk in ["The ", "rock", "pool ", "refills."] {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    streams.append(&id, chunk).await?;
                }
                streams.finalize(&id, StreamStatus::Done, None).await
            })
        };

        let source = HttpSource {
            client: reqwest::Client::new(),
            base_url: format!("http://{}", addr),
        };
        let mut updates = 0usize;
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            run_reader(&source, &id, Duration::from_secs(2), |_, _| {
                updates += 1;
            }),
        )
        .await;
        let (status, body) = match outcome {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => panic!("reader failed: {:?}", e),
            Err(_) => panic!("reader never reached a terminal status"),
        };

        assert_eq!(status, StreamStatus::Done);
        assert_eq!(body, "The rockpool refills.");
        assert!(updates >= 1);

        match writer.await {
            Ok(Ok(())) => {}
            other => panic!("writer failed: {:?}", other),
        }
    }
}
