use crate::session::SessionSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 客户端与服务端之间的JSON消息帧
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMessage {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: serde_json::Value,
}

impl GameMessage {
    pub fn new(type_: &str, data: serde_json::Value) -> Self {
        GameMessage {
            type_: type_.to_string(),
            data,
        }
    }

    /// join成功后广播给对局双方的通知
    pub fn session_joined(snapshot: &SessionSnapshot) -> Self {
        GameMessage::new(
            "session_joined",
            serde_json::json!({
                "session_id": snapshot.id,
                "player_a": snapshot.player_a,
                "player_b": snapshot.player_b,
                "rack": snapshot.rack,
            }),
        )
    }

    /// 计分成功后广播给对局双方的比分
    pub fn score_update(score_a: u32, score_b: u32) -> Self {
        GameMessage::new(
            "score_update",
            serde_json::json!({
                "score_a": score_a,
                "score_b": score_b,
            }),
        )
    }

    /// 计时查询的应答
    pub fn timer_update(elapsed: Duration) -> Self {
        GameMessage::new(
            "timer_update",
            serde_json::json!({
                "elapsed_seconds": elapsed.as_secs_f64(),
            }),
        )
    }

    /// 下发给出错方的错误通知
    pub fn error(error: &crate::Error) -> Self {
        GameMessage::new(
            "error",
            serde_json::json!({
                "code": error.code(),
                "message": error.to_string(),
            }),
        )
    }
}
