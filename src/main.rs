use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use word_duel::*;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化全局配置
    Config::init().map_err(|e| Error::Config(e.to_string()))?;
    let config = Config::get();

    // 初始化日志
    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.log_filter()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("配置加载成功: {:?}", config);

    let registry = Arc::new(SessionRegistry::new(
        Arc::new(LetterCountRule::new(config.game.points_per_letter)),
        Arc::new(AlphabeticValidator),
        config.game.rack_size,
    ));
    let profiles = Arc::new(ProfileStore::new(&config.storage.user_data_dir)?);

    // 启动对局回收任务
    registry.spawn_reaper(config.idle_timeout(), config.reap_interval());

    let server = WebSocketServer::new(registry, profiles);

    let http_addr = config.http_addr().to_string();
    let ws_addr = config.ws_addr().to_string();

    tracing::info!("HTTP服务器启动在 {}", http_addr);
    tracing::info!("WebSocket服务器启动在 {}", ws_addr);

    server.start_http_server(&http_addr).await?;

    server.start_ws_server(&ws_addr).await?;

    Ok(())
}
