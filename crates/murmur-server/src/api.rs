use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_core::{
    BatchRegistration, ConversationView, FriendshipStatus, MarkRead, NewConversation, ReadStats,
    Registration, Services, UnreadCount,
};
use murmur_shared::{ConversationId, MessageId, UserId};
use murmur_store::{Friendship, Message, MessageKind, User, UserSummary};

use crate::error::ServerError;

/// Header carrying the authenticated caller id, set by the upstream gateway.
pub const CALLER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(register))
        .route("/users/batch", post(register_batch))
        .route("/users/search/:prefix", get(search_users))
        .route("/users/:id", get(get_user).delete(delete_user))
        .route("/friends", get(list_friends))
        .route(
            "/friends/requests",
            post(send_friend_request).get(pending_friend_requests),
        )
        .route("/friends/requests/:sender_id/accept", post(accept_friend_request))
        .route("/friends/requests/:sender_id/reject", post(reject_friend_request))
        .route("/friends/:other_id", delete(remove_friend))
        .route("/friends/:other_id/status", get(friendship_status))
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/:id/participants", post(add_participant))
        .route(
            "/conversations/:id/participants/:user_id",
            delete(remove_participant),
        )
        .route(
            "/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/:id/unread", get(unread_count))
        .route("/messages/:id", put(edit_message).delete(delete_message))
        .route("/messages/:id/read", post(mark_read))
        .route("/messages/:id/read-stats", get(read_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Caller identity ───

/// Caller id taken from [`CALLER_HEADER`].
pub struct Caller(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::Unauthorized(format!("missing {CALLER_HEADER} header")))?;
        let id = UserId::parse(raw.trim())
            .map_err(|_| ServerError::Unauthorized(format!("malformed {CALLER_HEADER} header")))?;
        Ok(Caller(id))
    }
}

/// Run a service call off the async runtime. The call runs to completion
/// even if the request is dropped.
async fn blocking<T, F>(f: F) -> Result<T, ServerError>
where
    F: FnOnce() -> murmur_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("service task failed: {e}")))?
        .map_err(ServerError::from)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password_hash: String,
}

#[derive(Deserialize)]
struct FriendRequestBody {
    receiver_id: UserId,
}

#[derive(Serialize)]
struct FriendshipStatusResponse {
    status: FriendshipStatus,
}

#[derive(Deserialize)]
struct CreateConversationRequest {
    /// The caller is always added.
    participants: Vec<UserId>,
    #[serde(default)]
    is_group: Option<bool>,
    #[serde(default)]
    group_name: Option<String>,
}

/// A conversation view with its full history, oldest message first.
#[derive(Serialize)]
struct ConversationDetail {
    #[serde(flatten)]
    conversation: ConversationView,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct ParticipantBody {
    user_id: UserId,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
    #[serde(default)]
    kind: MessageKind,
}

#[derive(Deserialize)]
struct EditMessageRequest {
    content: String,
}

// ─── Health ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Users ───

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    let services = state.services.clone();
    let user = blocking(move || {
        services
            .identity
            .register(&req.username, &req.email, &req.password_hash)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// 201 when at least one account was created, otherwise 400 with the
/// per-entry errors.
async fn register_batch(
    State(state): State<AppState>,
    Json(batch): Json<Vec<Registration>>,
) -> Result<(StatusCode, Json<BatchRegistration>), ServerError> {
    let services = state.services.clone();
    let outcome = blocking(move || services.identity.register_many(&batch)).await?;
    let status = if outcome.created.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

async fn get_user(
    State(state): State<AppState>,
    Caller(_caller): Caller,
    Path(id): Path<UserId>,
) -> Result<Json<User>, ServerError> {
    let services = state.services.clone();
    Ok(Json(blocking(move || services.identity.get(id)).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    if id != caller {
        return Err(ServerError::Forbidden("users can only delete themselves".into()));
    }
    let services = state.services.clone();
    blocking(move || services.identity.delete(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn search_users(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(prefix): Path<String>,
) -> Result<Json<Vec<UserSummary>>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.identity.search(caller, &prefix)).await?,
    ))
}

// ─── Friends ───

async fn send_friend_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(body): Json<FriendRequestBody>,
) -> Result<(StatusCode, Json<Friendship>), ServerError> {
    let services = state.services.clone();
    let friendship =
        blocking(move || services.friendships.send_request(caller, body.receiver_id)).await?;
    Ok((StatusCode::CREATED, Json(friendship)))
}

async fn pending_friend_requests(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Friendship>>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.friendships.pending_requests(caller)).await?,
    ))
}

async fn accept_friend_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(sender): Path<UserId>,
) -> Result<Json<Friendship>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.friendships.accept(caller, sender, caller)).await?,
    ))
}

async fn reject_friend_request(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(sender): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    let services = state.services.clone();
    blocking(move || services.friendships.reject(caller, sender, caller)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_friends(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<UserId>>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.friendships.list_friends(caller)).await?,
    ))
}

async fn friendship_status(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(other): Path<UserId>,
) -> Result<Json<FriendshipStatusResponse>, ServerError> {
    let services = state.services.clone();
    let status = blocking(move || services.friendships.status(caller, other)).await?;
    Ok(Json(FriendshipStatusResponse { status }))
}

async fn remove_friend(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(other): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    let services = state.services.clone();
    blocking(move || services.friendships.remove(caller, other)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Conversations ───

async fn create_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationView>), ServerError> {
    let services = state.services.clone();
    let (created, view) = blocking(move || {
        let mut participants = req.participants;
        participants.push(caller);

        let outcome = services.conversations.find_or_create(NewConversation {
            participants,
            created_by: caller,
            is_group: req.is_group,
            group_name: req.group_name,
        })?;
        let view = services.conversations.get(outcome.conversation().id)?;
        Ok((outcome.was_created(), view))
    })
    .await?;

    if created {
        info!(conversation = %view.id, caller = %caller, "conversation created via API");
        Ok((StatusCode::CREATED, Json(view)))
    } else {
        Ok((StatusCode::OK, Json(view)))
    }
}

async fn list_conversations(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<ConversationView>>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.conversations.get_for_user(caller)).await?,
    ))
}

async fn get_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<ConversationDetail>, ServerError> {
    let services = state.services.clone();
    let (conversation, messages) = blocking(move || {
        services.conversations.require_participant(id, caller)?;
        services.conversations.get_with_messages(id)
    })
    .await?;
    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, ServerError> {
    let services = state.services.clone();
    blocking(move || {
        services.conversations.require_participant(id, caller)?;
        services.conversations.delete(id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_participant(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(body): Json<ParticipantBody>,
) -> Result<Json<ConversationView>, ServerError> {
    let services = state.services.clone();
    let view = blocking(move || {
        services.conversations.require_participant(id, caller)?;
        services.conversations.add_participant(id, body.user_id)?;
        services.conversations.get(id)
    })
    .await?;
    Ok(Json(view))
}

async fn remove_participant(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((id, user)): Path<(ConversationId, UserId)>,
) -> Result<Json<ConversationView>, ServerError> {
    let services = state.services.clone();
    let view = blocking(move || {
        services.conversations.require_participant(id, caller)?;
        services.conversations.remove_participant(id, user)?;
        services.conversations.get(id)
    })
    .await?;
    Ok(Json(view))
}

async fn unread_count(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<UnreadCount>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.receipts.unread_count_for_user(id, caller)).await?,
    ))
}

// ─── Messages ───

async fn list_messages(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let services = state.services.clone();
    let messages = blocking(move || {
        services.conversations.require_participant(id, caller)?;
        services
            .messages
            .list_for_conversation(id)?
            .collect::<murmur_core::Result<Vec<_>>>()
    })
    .await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let services = state.services.clone();
    let message =
        blocking(move || services.messages.send(id, caller, &req.content, req.kind)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.messages.edit(id, caller, &req.content)).await?,
    ))
}

async fn delete_message(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
) -> Result<StatusCode, ServerError> {
    let services = state.services.clone();
    blocking(move || services.messages.delete(id, caller)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
) -> Result<Json<MarkRead>, ServerError> {
    let services = state.services.clone();
    Ok(Json(
        blocking(move || services.receipts.mark_read(id, caller)).await?,
    ))
}

async fn read_stats(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
) -> Result<Json<ReadStats>, ServerError> {
    let services = state.services.clone();
    let stats = blocking(move || {
        let message = services.messages.get(id)?;
        services
            .conversations
            .require_participant(message.conversation_id, caller)?;
        services.receipts.read_stats(id)
    })
    .await?;
    Ok(Json(stats))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
