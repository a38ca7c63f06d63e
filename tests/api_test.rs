use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use huddle::board::models::UserId;
use huddle::config::Config;
use huddle::db;
use huddle::extractors::VIEWER_HEADER;

struct TestApp {
    _dir: TempDir,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = db::create_pool(&dir.path().join("test.db")).expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");
        let router = huddle::app(huddle::build_state(pool, &Config::default()));
        Self { _dir: dir, router }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<UserId>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header(VIEWER_HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Owner creates a two-column board; returns (board id, column ids)
    async fn board(&self, owner: UserId) -> (String, Vec<String>) {
        let (status, board) = self
            .send(
                Method::POST,
                "/boards",
                Some(owner),
                Some(json!({"name": "retro", "ownerName": "olga", "columns": ["Went well", "To improve"]})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = board["id"].as_str().unwrap().to_string();

        let (_, view) = self
            .send(Method::GET, &format!("/boards/{id}"), Some(owner), None)
            .await;
        let columns = view["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap().to_string())
            .collect();
        (id, columns)
    }

    async fn join(&self, board: &str, user: UserId, name: &str) {
        let (status, _) = self
            .send(
                Method::POST,
                &format!("/boards/{board}/participants"),
                Some(user),
                Some(json!({"name": name})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn note(&self, board: &str, user: UserId, column: &str, text: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            &format!("/boards/{board}/notes"),
            Some(user),
            Some(json!({"column": column, "text": text})),
        )
        .await
    }
}

fn ids(value: &Value, key: &str) -> Vec<String> {
    value[key]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn identity_and_membership_are_enforced() {
    let app = TestApp::new();
    let owner = UserId::generate();
    let (board, _) = app.board(owner).await;

    let (status, _) = app.send(Method::GET, &format!("/boards/{board}"), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::GET, &format!("/boards/{board}"), Some(UserId::generate()), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::GET,
            &format!("/boards/{}", UserId::generate()),
            Some(owner),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn participants_see_only_visible_columns_and_their_notes() {
    let app = TestApp::new();
    let owner = UserId::generate();
    let alice = UserId::generate();
    let (board, columns) = app.board(owner).await;
    app.join(&board, alice, "alice").await;

    let (status, mine) = app.note(&board, alice, &columns[0], "mine").await;
    assert_eq!(status, StatusCode::CREATED);
    app.note(&board, owner, &columns[0], "theirs").await;
    app.note(&board, owner, &columns[1], "hidden soon").await;

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/boards/{board}/columns/{}", columns[1]),
            Some(owner),
            Some(json!({"visible": false})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/boards/{board}"),
            Some(owner),
            Some(json!({"showNotesOfOtherUsers": false})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, view) = app
        .send(Method::GET, &format!("/boards/{board}"), Some(alice), None)
        .await;
    assert_eq!(ids(&view, "columns"), vec![columns[0].clone()]);
    assert_eq!(ids(&view, "notes"), vec![mine["id"].as_str().unwrap().to_string()]);

    let (_, full) = app
        .send(Method::GET, &format!("/boards/{board}"), Some(owner), None)
        .await;
    assert_eq!(ids(&full, "columns").len(), 2);
    assert_eq!(ids(&full, "notes").len(), 3);
}

#[tokio::test]
async fn moderator_actions_are_rejected_for_participants() {
    let app = TestApp::new();
    let owner = UserId::generate();
    let alice = UserId::generate();
    let (board, _) = app.board(owner).await;
    app.join(&board, alice, "alice").await;

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/boards/{board}"),
            Some(alice),
            Some(json!({"isLocked": true})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/boards/{board}/votings"),
            Some(alice),
            Some(json!({"voteLimit": 3})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::DELETE, &format!("/boards/{board}"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // promoting alice lifts the restriction, but she still cannot delete the board
    let (status, promoted) = app
        .send(
            Method::PUT,
            &format!("/boards/{board}/participants/{alice}"),
            Some(owner),
            Some(json!({"role": "MODERATOR"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(promoted["role"], "MODERATOR");

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/boards/{board}"),
            Some(alice),
            Some(json!({"isLocked": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .send(Method::DELETE, &format!("/boards/{board}"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn locked_boards_reject_participant_notes() {
    let app = TestApp::new();
    let owner = UserId::generate();
    let alice = UserId::generate();
    let (board, columns) = app.board(owner).await;
    app.join(&board, alice, "alice").await;

    app.send(
        Method::PUT,
        &format!("/boards/{board}"),
        Some(owner),
        Some(json!({"isLocked": true})),
    )
    .await;

    let (status, _) = app.note(&board, alice, &columns[0], "late").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.note(&board, owner, &columns[0], "still fine").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn only_authors_edit_their_notes() {
    let app = TestApp::new();
    let owner = UserId::generate();
    let alice = UserId::generate();
    let bob = UserId::generate();
    let (board, columns) = app.board(owner).await;
    app.join(&board, alice, "alice").await;
    app.join(&board, bob, "bob").await;

    let (_, note) = app.note(&board, alice, &columns[0], "draft").await;
    let uri = format!("/boards/{board}/notes/{}", note["id"].as_str().unwrap());

    let (status, _) = app
        .send(Method::PUT, &uri, Some(bob), Some(json!({"text": "hijacked"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, notes) = app
        .send(Method::PUT, &uri, Some(alice), Some(json!({"text": "final"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notes[0]["text"], "final");
    assert_eq!(notes[0]["edited"], true);

    let (status, _) = app.send(Method::DELETE, &uri, Some(bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.send(Method::DELETE, &uri, Some(alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.send(Method::DELETE, &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn voting_round_trip() {
    let app = TestApp::new();
    let owner = UserId::generate();
    let alice = UserId::generate();
    let (board, columns) = app.board(owner).await;
    app.join(&board, alice, "alice").await;
    let (_, note) = app.note(&board, alice, &columns[0], "vote for me").await;
    let note_id = note["id"].as_str().unwrap();

    let (status, voting) = app
        .send(
            Method::POST,
            &format!("/boards/{board}/votings"),
            Some(owner),
            Some(json!({"voteLimit": 2, "allowMultipleVotes": true})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let votes_uri = format!("/boards/{board}/votings/{}/votes", voting["id"].as_str().unwrap());

    // a second open voting is a conflict
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/boards/{board}/votings"),
            Some(owner),
            Some(json!({"voteLimit": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    for _ in 0..2 {
        let (status, _) = app
            .send(Method::POST, &votes_uri, Some(alice), Some(json!({"note": note_id})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = app
        .send(Method::POST, &votes_uri, Some(alice), Some(json!({"note": note_id})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, removed) = app
        .send(
            Method::DELETE,
            &format!("{votes_uri}?note={note_id}"),
            Some(alice),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed.as_array().unwrap().len(), 1);

    let (status, closed) = app
        .send(
            Method::PUT,
            &format!("/boards/{board}/votings/{}", voting["id"].as_str().unwrap()),
            Some(owner),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "CLOSED");
    assert_eq!(closed["results"]["total"], 1);
    assert_eq!(closed["results"]["votes"][note_id]["total"], 1);
}

#[tokio::test]
async fn reactions_belong_to_their_author() {
    let app = TestApp::new();
    let owner = UserId::generate();
    let alice = UserId::generate();
    let (board, columns) = app.board(owner).await;
    app.join(&board, alice, "alice").await;
    let (_, note) = app.note(&board, owner, &columns[0], "ship it").await;

    let (status, reaction) = app
        .send(
            Method::POST,
            &format!("/boards/{board}/notes/{}/reactions", note["id"].as_str().unwrap()),
            Some(alice),
            Some(json!({"reactionType": "heart"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reaction["user"], alice.to_string());
    let uri = format!("/boards/{board}/reactions/{}", reaction["id"].as_str().unwrap());

    let (status, _) = app
        .send(Method::PUT, &uri, Some(owner), Some(json!({"reactionType": "poop"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, updated) = app
        .send(Method::PUT, &uri, Some(alice), Some(json!({"reactionType": "joy"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["reactionType"], "joy");

    let (_, view) = app
        .send(Method::GET, &format!("/boards/{board}"), Some(owner), None)
        .await;
    assert_eq!(view["reactions"].as_array().unwrap().len(), 1);

    let (status, _) = app.send(Method::DELETE, &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.send(Method::DELETE, &uri, Some(alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.send(Method::DELETE, &uri, Some(alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // a note on another board is not reachable through this one
    let (other, other_columns) = app.board(owner).await;
    let (_, foreign) = app.note(&other, owner, &other_columns[0], "elsewhere").await;
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/boards/{board}/notes/{}/reactions", foreign["id"].as_str().unwrap()),
            Some(alice),
            Some(json!({"reactionType": "like"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
