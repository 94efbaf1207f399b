// chatstats-server/src/api.rs
//
// Control-plane HTTP surface. Handlers are thin request-validation wrappers
// around core operations; every response carries the {ok, message} envelope.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use chatstats_core::auth::{bot_id_from_token, hash_token, login_bot};
use chatstats_core::models::Bot;

use crate::context::AppContext;

#[derive(Debug, Serialize)]
struct ApiResponse {
    ok: bool,
    message: String,
}

fn ok() -> Response {
    (StatusCode::OK, Json(ApiResponse { ok: true, message: String::new() })).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiResponse { ok: false, message })).into_response()
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/add_bot", get(add_bot))
        .route("/get_bot", get(get_bot))
        .route("/insert_users", post(insert_users))
        .with_state(ctx)
}

async fn ping() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "message": "pong" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct AddBotParams {
    #[serde(default)]
    source: String,
    #[serde(default)]
    app: String,
    token: String,
    #[serde(default)]
    force_auth: bool,
}

async fn add_bot(State(ctx): State<Arc<AppContext>>, Query(params): Query<AddBotParams>) -> Response {
    let bot_id = match bot_id_from_token(&params.token) {
        Ok(id) => id,
        Err(_) => return bad_request("Invalid token: bot id is not int".to_string()),
    };

    let session = ctx.state.session_view(bot_id);
    if let Err(e) = login_bot(ctx.factory.as_ref(), session, &params.token, params.force_auth).await
    {
        info!(bot_id, "login failed: {e}");
        return bad_request(format!("Error logging in bot: {e}"));
    }

    let bot = Bot {
        bot_id,
        source: params.source.clone(),
        app: params.app.clone(),
        token_hash: Some(hash_token(&params.token, &ctx.config.token_salt)),
        logged_in: true,
    };
    if let Err(e) = ctx.bots.upsert(&bot).await {
        return bad_request(format!("Error adding bot to database: {e}"));
    }

    if let Err(e) = ctx.pool.add_bot(bot_id).await {
        return bad_request(format!("Error registering bot: {e}"));
    }
    // First registration: accept the stream from now on instead of trying
    // to recover a cursor that never existed.
    if let Err(e) = ctx.pool.run_bot(bot_id, true).await {
        return bad_request(format!("Error starting bot: {e}"));
    }

    info!(bot_id, source = %params.source, app = %params.app, "bot added");
    ok()
}

#[derive(Debug, Deserialize)]
struct GetBotParams {
    #[serde(default)]
    source: String,
    bot_id: i64,
}

#[derive(Debug, Serialize)]
struct GetBotResponse {
    ok: bool,
    message: String,
    app: String,
    logged_in: bool,
}

async fn get_bot(State(ctx): State<Arc<AppContext>>, Query(params): Query<GetBotParams>) -> Response {
    match ctx.bots.get(params.bot_id).await {
        Ok(Some(bot)) => {
            if !params.source.is_empty() && bot.source != params.source {
                return bad_request("Bot not found".to_string());
            }
            (
                StatusCode::OK,
                Json(GetBotResponse {
                    ok: true,
                    message: String::new(),
                    app: bot.app,
                    logged_in: bot.logged_in,
                }),
            )
                .into_response()
        }
        Ok(None) => bad_request("Bot not found".to_string()),
        Err(e) => bad_request(format!("Error reading bot: {e}")),
    }
}

#[derive(Debug, Deserialize)]
struct InsertUsersRequest {
    bot_id: i64,
    #[serde(default)]
    force_check: bool,
    user_ids: Vec<i64>,
}

async fn insert_users(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<InsertUsersRequest>,
) -> Response {
    if body.user_ids.is_empty() {
        return bad_request("user_ids is empty".to_string());
    }

    match ctx
        .users
        .insert_missing(body.bot_id, &body.user_ids, Utc::now(), body.force_check)
        .await
    {
        Ok(()) => ok(),
        Err(e) => bad_request(format!("Error inserting users: {e}")),
    }
}
