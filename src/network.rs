use crate::{
    Result, message::GameMessage, profile::ProfileStore, profile::UserProfile,
    registry::SessionRegistry, session::PlayerId, session::SessionSnapshot,
};
use axum::{
    Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error};

/// WebSocket服务器，负责事件分发和消息广播
pub struct WebSocketServer {
    registry: Arc<SessionRegistry>,
    profiles: Arc<ProfileStore>,
    connection_manager: Arc<ConnectionManager>,
}

/// 全局连接管理器，跟踪每个玩家的WebSocket连接
pub struct ConnectionManager {
    /// 玩家ID -> 连接发送器 的映射
    player_connections: DashMap<PlayerId, mpsc::Sender<GameMessage>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            player_connections: DashMap::new(),
        }
    }

    /// 注册玩家的连接，返回被替换掉的旧连接
    pub fn register_connection(
        &self,
        player_id: PlayerId,
        tx: mpsc::Sender<GameMessage>,
    ) -> Option<mpsc::Sender<GameMessage>> {
        self.player_connections.insert(player_id, tx)
    }

    /// 移除玩家的连接
    pub fn remove_connection(&self, player_id: &str) {
        self.player_connections.remove(player_id);
    }

    /// 给指定玩家发送消息，未连接时静默丢弃
    pub async fn send_to(&self, player_id: &str, message: GameMessage) {
        let channel = self
            .player_connections
            .get(player_id)
            .map(|entry| entry.value().clone());

        if let Some(channel) = channel {
            if let Err(e) = channel.send(message).await {
                error!("向玩家 {} 发送消息失败: {}", player_id, e);
                self.player_connections.remove(player_id);
            }
        }
    }

    /// 把消息广播给对局双方
    pub async fn broadcast_to_session(&self, snapshot: &SessionSnapshot, message: GameMessage) {
        self.send_to(&snapshot.player_a, message.clone()).await;
        if let Some(player_b) = &snapshot.player_b {
            self.send_to(player_b, message).await;
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketServer {
    pub fn new(registry: Arc<SessionRegistry>, profiles: Arc<ProfileStore>) -> Self {
        WebSocketServer {
            registry,
            profiles,
            connection_manager: Arc::new(ConnectionManager::new()),
        }
    }

    /// 启动HTTP服务器（管理接口）
    pub async fn start_http_server(&self, http_addr: &str) -> Result<()> {
        let config = crate::config::Config::get();

        // 根据配置文件设置CORS
        let cors = if config.cors.allow_all_origins.unwrap_or(true) {
            debug!("CORS配置: 允许所有来源");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else if let Some(allowed_origins) = &config.cors.allowed_origins {
            let origins = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
                .collect::<Vec<_>>();

            debug!("CORS允许的来源: {:?}", origins);
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_credentials(true)
        } else {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        };

        let http_app = Router::new()
            .route(
                "/api",
                post({
                    let profiles = self.profiles.clone();
                    let registry = self.registry.clone();
                    move |headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                        handle_api(headers, body, profiles.clone(), registry.clone()).await
                    }
                }),
            )
            .route(
                "/sessions/status",
                get({
                    let registry = self.registry.clone();
                    move |headers: HeaderMap| async move {
                        handle_sessions_status(headers, registry.clone()).await
                    }
                }),
            )
            .layer(cors);

        let http_listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| crate::Error::Network(anyhow::anyhow!(e)))?;

        // 启动HTTP服务器
        tokio::spawn(async move {
            axum::serve(http_listener, http_app).await.map_err(|e| {
                error!("HTTP服务器错误: {}", e);
                crate::Error::Network(anyhow::anyhow!(e))
            })
        });

        Ok(())
    }

    /// 启动WebSocket服务器
    pub async fn start_ws_server(&self, ws_addr: &str) -> Result<()> {
        let registry = self.registry.clone();
        let profiles = self.profiles.clone();
        let connection_manager = self.connection_manager.clone();

        let ws_app = Router::new().route(
            "/ws",
            get({
                move |ws: WebSocketUpgrade| async move {
                    ws.on_upgrade(move |socket| async move {
                        debug!("WebSocket连接已升级，开始处理连接");
                        handle_connection(
                            socket,
                            registry.clone(),
                            profiles.clone(),
                            connection_manager.clone(),
                        )
                        .await;
                        debug!("WebSocket连接处理完成");
                    })
                }
            }),
        );

        let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
            error!("绑定WebSocket地址失败: {} - {}", ws_addr, e);
            crate::Error::Network(anyhow::anyhow!(e))
        })?;

        axum::serve(ws_listener, ws_app).await.map_err(|e| {
            error!("WebSocket服务器运行错误: {}", e);
            crate::Error::Network(anyhow::anyhow!(e))
        })?;
        Ok(())
    }
}

/// 处理单条WebSocket连接上的事件流
async fn handle_connection(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    profiles: Arc<ProfileStore>,
    connection_manager: Arc<ConnectionManager>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));

    // 本连接的出站通道，注册表的广播也走这里
    let (tx, mut rx) = mpsc::channel::<GameMessage>(100);

    let ws_sender_clone = ws_sender.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&message) {
                let mut sender = ws_sender_clone.lock().await;
                if let Err(e) = sender.send(Message::Text(text)).await {
                    error!("发送消息失败: {}", e);
                    break;
                }
            } else {
                error!("消息序列化失败");
            }
        }
    });

    // 本连接已join的玩家，断开时据此清理连接记录
    let mut joined_player: Option<PlayerId> = None;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!("收到消息: {}", text);
                match serde_json::from_str::<GameMessage>(&text) {
                    Ok(message) => {
                        handle_event(
                            message,
                            &tx,
                            &mut joined_player,
                            &registry,
                            &profiles,
                            &connection_manager,
                        )
                        .await;
                    }
                    Err(e) => {
                        error!("解析消息失败: {}", e);
                        let error = GameMessage::new(
                            "error",
                            serde_json::json!({
                                "code": "ParseError",
                                "message": "消息格式错误"
                            }),
                        );
                        let _ = tx.send(error).await;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!("收到关闭消息");
                break;
            }
            Ok(Message::Ping(data)) => {
                if let Err(e) = ws_sender.lock().await.send(Message::Pong(data)).await {
                    error!("发送pong消息失败: {}", e);
                }
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                debug!("收到二进制消息，忽略");
            }
            Err(e) => {
                error!("WebSocket错误: {}", e);
                break;
            }
        }
    }

    // 连接关闭时，移除玩家连接记录
    if let Some(player) = &joined_player {
        connection_manager.remove_connection(player);
    }

    debug!("WebSocket连接关闭");
}

/// 按事件类型分发到注册表操作
async fn handle_event(
    message: GameMessage,
    tx: &mpsc::Sender<GameMessage>,
    joined_player: &mut Option<PlayerId>,
    registry: &Arc<SessionRegistry>,
    profiles: &Arc<ProfileStore>,
    connection_manager: &Arc<ConnectionManager>,
) {
    match message.type_.as_str() {
        "join" => {
            let Some(username) = message.data["username"].as_str() else {
                let _ = tx
                    .send(GameMessage::error(&crate::Error::Profile(
                        "缺少用户名".to_string(),
                    )))
                    .await;
                return;
            };

            // 玩家身份由存档仓库解析，没有存档不能进入对局
            match profiles.load(username).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    let _ = tx
                        .send(GameMessage::error(&crate::Error::Profile(
                            "用户不存在".to_string(),
                        )))
                        .await;
                    return;
                }
                Err(e) => {
                    let _ = tx.send(GameMessage::error(&e)).await;
                    return;
                }
            }

            connection_manager.register_connection(username.to_string(), tx.clone());
            *joined_player = Some(username.to_string());

            let outcome = registry.join_or_create(username).await;
            match registry.get(&outcome.session_id).await {
                Some(snapshot) => {
                    connection_manager
                        .broadcast_to_session(&snapshot, GameMessage::session_joined(&snapshot))
                        .await;
                }
                None => {
                    // join和广播之间对局被回收
                    let _ = tx
                        .send(GameMessage::error(&crate::Error::SessionNotFound))
                        .await;
                }
            }
        }
        "submit_word" => {
            // 提交者的身份在join时就已确定，不信任载荷里的自称
            let Some(username) = joined_player.clone() else {
                let _ = tx
                    .send(GameMessage::error(&crate::Error::PlayerNotInSession))
                    .await;
                return;
            };
            let session_id = message.data["session_id"].as_str().unwrap_or_default();
            let word = message.data["word"].as_str().unwrap_or_default();

            match registry.submit_score(session_id, &username, word).await {
                Ok((score_a, score_b)) => {
                    let update = GameMessage::score_update(score_a, score_b);
                    match registry.get(session_id).await {
                        Some(snapshot) => {
                            connection_manager
                                .broadcast_to_session(&snapshot, update)
                                .await;
                        }
                        // 广播前对局被回收，至少把比分回给提交者
                        None => {
                            let _ = tx.send(update).await;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(GameMessage::error(&e)).await;
                }
            }
        }
        "get_timer" => {
            let session_id = message.data["session_id"].as_str().unwrap_or_default();
            match registry.elapsed(session_id).await {
                Ok(elapsed) => {
                    let _ = tx.send(GameMessage::timer_update(elapsed)).await;
                }
                Err(e) => {
                    let _ = tx.send(GameMessage::error(&e)).await;
                }
            }
        }
        other => {
            let error = GameMessage::new(
                "error",
                serde_json::json!({
                    "code": "UnknownEvent",
                    "message": format!("未知的消息类型: {}", other)
                }),
            );
            let _ = tx.send(error).await;
        }
    }
}

/// 处理HTTP管理接口请求
async fn handle_api(
    headers: HeaderMap,
    body: serde_json::Value,
    profiles: Arc<ProfileStore>,
    registry: Arc<SessionRegistry>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !api_key_valid(&headers) {
        return invalid_api_key();
    }

    match body["action"].as_str() {
        Some("get_user") => {
            let username = body["username"].as_str().unwrap_or_default();
            match profiles.load(username).await {
                Ok(Some(profile)) => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "status": "success",
                        "data": profile
                    })),
                ),
                Ok(None) => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "status": "error",
                        "message": "用户不存在"
                    })),
                ),
                Err(e) => internal_error(e),
            }
        }
        Some("create_user") => {
            let username = body["username"].as_str().unwrap_or_default();
            let password = body["password"].as_str().unwrap_or_default();

            if password.len() != 4 || !password.chars().all(|c| c.is_ascii_digit()) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "status": "error",
                        "message": "密码必须是4位数字"
                    })),
                );
            }

            match profiles.load(username).await {
                Ok(Some(_)) => (
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({
                        "status": "error",
                        "message": "用户名已存在"
                    })),
                ),
                Ok(None) => {
                    let profile = UserProfile::new(username, password);
                    match profiles.save(&profile).await {
                        Ok(()) => (
                            StatusCode::OK,
                            Json(serde_json::json!({
                                "status": "success",
                                "message": "用户创建成功"
                            })),
                        ),
                        Err(e) => (
                            StatusCode::BAD_REQUEST,
                            Json(serde_json::json!({
                                "status": "error",
                                "message": e.to_string()
                            })),
                        ),
                    }
                }
                Err(e) => internal_error(e),
            }
        }
        Some("update_score") => {
            let username = body["username"].as_str().unwrap_or_default();
            let score = body["score"].as_u64().unwrap_or(0);

            match profiles.add_score(username, score).await {
                Ok(Some(profile)) => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "status": "success",
                        "message": "分数更新成功",
                        "data": profile
                    })),
                ),
                Ok(None) => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "status": "error",
                        "message": "用户不存在"
                    })),
                ),
                Err(e) => internal_error(e),
            }
        }
        Some("get_game") => {
            let game_id = body["game_id"].as_str().unwrap_or_default();
            match registry.get(game_id).await {
                Some(snapshot) => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "status": "success",
                        "game": snapshot
                    })),
                ),
                None => (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "status": "error",
                        "message": "对局不存在"
                    })),
                ),
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "message": "未知的操作"
            })),
        ),
    }
}

/// 处理对局状态查询
///
/// 对局快照包含玩家身份和字母架，和/api一样只对持有API密钥的调用方开放。
async fn handle_sessions_status(
    headers: HeaderMap,
    registry: Arc<SessionRegistry>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !api_key_valid(&headers) {
        return invalid_api_key();
    }

    let sessions = registry.session_list().await;
    let total_sessions = sessions.len();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "sessions": sessions,
            "total_sessions": total_sessions
        })),
    )
}

/// 校验请求头里的API密钥
fn api_key_valid(headers: &HeaderMap) -> bool {
    let config = crate::config::Config::get();
    headers
        .get("API-KEY")
        .and_then(|value| value.to_str().ok())
        .map(|key| key == config.security.api_key)
        .unwrap_or(false)
}

fn invalid_api_key() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({
            "status": "error",
            "message": "无效的API密钥"
        })),
    )
}

fn internal_error(e: crate::Error) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "status": "error",
            "message": e.to_string()
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::score::{AlphabeticValidator, LetterCountRule};
    use std::path::PathBuf;

    fn setup() -> (
        Arc<SessionRegistry>,
        Arc<ProfileStore>,
        Arc<ConnectionManager>,
        PathBuf,
    ) {
        let dir = std::env::temp_dir().join(format!("word-duel-test-{}", uuid::Uuid::new_v4()));
        let profiles = Arc::new(ProfileStore::new(&dir).unwrap());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(LetterCountRule::default()),
            Arc::new(AlphabeticValidator),
            9,
        ));
        (registry, profiles, Arc::new(ConnectionManager::new()), dir)
    }

    #[tokio::test]
    async fn submit_word_uses_identity_resolved_at_join() {
        let (registry, profiles, connections, dir) = setup();
        profiles.save(&UserProfile::new("ana", "1234")).await.unwrap();

        let (tx, mut rx) = mpsc::channel::<GameMessage>(16);
        let mut joined = None;
        handle_event(
            GameMessage::new("join", serde_json::json!({"username": "ana"})),
            &tx,
            &mut joined,
            &registry,
            &profiles,
            &connections,
        )
        .await;

        assert_eq!(joined.as_deref(), Some("ana"));
        let joined_msg = rx.recv().await.unwrap();
        assert_eq!(joined_msg.type_, "session_joined");
        let session_id = joined_msg.data["session_id"].as_str().unwrap().to_string();

        // 载荷里只带session_id和word，提交者身份取join时确定的玩家
        handle_event(
            GameMessage::new(
                "submit_word",
                serde_json::json!({"session_id": session_id, "word": "CAT"}),
            ),
            &tx,
            &mut joined,
            &registry,
            &profiles,
            &connections,
        )
        .await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.type_, "score_update");
        assert_eq!(update.data["score_a"], 30);
        assert_eq!(update.data["score_b"], 0);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn submit_word_without_join_is_rejected() {
        let (registry, profiles, connections, dir) = setup();
        profiles.save(&UserProfile::new("ana", "1234")).await.unwrap();

        // 另一条连接先以ana的身份开好对局
        let (ana_tx, _ana_rx) = mpsc::channel::<GameMessage>(16);
        let mut ana_joined = None;
        handle_event(
            GameMessage::new("join", serde_json::json!({"username": "ana"})),
            &ana_tx,
            &mut ana_joined,
            &registry,
            &profiles,
            &connections,
        )
        .await;
        let session_id = registry.session_list().await[0].id.clone();

        // 未join的连接不能冒充任何玩家提交单词
        let (tx, mut rx) = mpsc::channel::<GameMessage>(16);
        let mut joined = None;
        handle_event(
            GameMessage::new(
                "submit_word",
                serde_json::json!({"session_id": session_id, "word": "CAT"}),
            ),
            &tx,
            &mut joined,
            &registry,
            &profiles,
            &connections,
        )
        .await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.type_, "error");
        assert_eq!(reply.data["code"], "PlayerNotInSession");

        let snapshot = registry.get(&session_id).await.unwrap();
        assert_eq!((snapshot.score_a, snapshot.score_b), (0, 0));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn join_requires_existing_profile() {
        let (registry, profiles, connections, dir) = setup();

        let (tx, mut rx) = mpsc::channel::<GameMessage>(16);
        let mut joined = None;
        handle_event(
            GameMessage::new("join", serde_json::json!({"username": "nobody"})),
            &tx,
            &mut joined,
            &registry,
            &profiles,
            &connections,
        )
        .await;

        assert!(joined.is_none());
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.type_, "error");
        assert_eq!(reply.data["code"], "ProfileError");
        assert!(registry.is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn sessions_status_requires_api_key() {
        let _ = crate::config::Config::init();
        let (registry, _profiles, _connections, dir) = setup();

        let (status, _body) = handle_sessions_status(HeaderMap::new(), registry.clone()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut headers = HeaderMap::new();
        let api_key = crate::config::Config::get().security.api_key.clone();
        headers.insert(
            "API-KEY",
            axum::http::HeaderValue::from_str(&api_key).unwrap(),
        );
        let (status, body) = handle_sessions_status(headers, registry).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0["success"], true);

        let _ = std::fs::remove_dir_all(dir);
    }
}
