use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub game: GameConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
    pub security: SecurityConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub http_port: Option<u16>, // HTTP服务器端口，如果为None则使用port
    pub ws_port: Option<u16>,   // WebSocket服务器端口，如果为None则使用port
}

#[derive(Debug, Deserialize)]
pub struct GameConfig {
    /// 每个字母的分值
    pub points_per_letter: u32,
    /// 对局开始时发放的字母数量
    pub rack_size: usize,
    /// 对局空闲多少秒后被回收
    pub idle_timeout: u64,
    /// 回收任务的扫描间隔（秒）
    pub reap_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// 用户存档目录
    pub user_data_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    /// HTTP管理接口的API密钥
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CorsConfig {
    pub allow_all_origins: Option<bool>,
    pub allowed_origins: Option<Vec<String>>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config"))
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    /// 初始化全局配置
    pub fn init() -> Result<()> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| anyhow::anyhow!("配置已经初始化"))?;
        Ok(())
    }

    /// 获取全局配置实例
    pub fn get() -> &'static Config {
        CONFIG.get().expect("配置未初始化，请先调用 Config::init()")
    }

    pub fn http_addr(&self) -> SocketAddr {
        let port = self.server.http_port.unwrap_or(self.server.port);
        format!("{}:{}", self.server.host, port)
            .parse()
            .expect("Invalid HTTP server address")
    }

    pub fn ws_addr(&self) -> SocketAddr {
        let port = self.server.ws_port.unwrap_or(self.server.port);
        format!("{}:{}", self.server.host, port)
            .parse()
            .expect("Invalid WebSocket server address")
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.game.idle_timeout)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.game.reap_interval)
    }

    pub fn log_filter(&self) -> String {
        format!("word_duel={}", self.log.level)
    }
}
