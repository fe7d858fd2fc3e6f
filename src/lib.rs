pub mod config;
pub mod message;
pub mod network;
pub mod profile;
pub mod registry;
pub mod score;
pub mod session;

pub use config::Config;
pub use message::GameMessage;
pub use network::WebSocketServer;
pub use profile::{ProfileStore, UserProfile};
pub use registry::{JoinOutcome, SessionRegistry};
pub use score::{AlphabeticValidator, LetterCountRule, ScoreRule, WordValidator};
pub use session::{PlayerId, Session, SessionId, SessionPhase, SessionSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("网络错误: {0}")]
    Network(#[from] anyhow::Error),
    #[error("对局不存在")]
    SessionNotFound,
    #[error("无效的单词: {0}")]
    InvalidWord(String),
    #[error("玩家不在对局中")]
    PlayerNotInSession,
    #[error("对局尚未开始，计时器不可用")]
    TimerUnavailable,
    #[error("存档错误: {0}")]
    Profile(String),
    #[error("配置错误: {0}")]
    Config(String),
}

impl Error {
    /// 返回下发给客户端的错误码
    pub fn code(&self) -> &'static str {
        match self {
            Error::Network(_) => "NetworkError",
            Error::SessionNotFound => "SessionNotFound",
            Error::InvalidWord(_) => "InvalidWord",
            Error::PlayerNotInSession => "PlayerNotInSession",
            Error::TimerUnavailable => "TimerUnavailable",
            Error::Profile(_) => "ProfileError",
            Error::Config(_) => "ConfigError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
