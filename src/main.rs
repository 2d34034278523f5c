use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use devpool_rs::api::{ApiServer, AppState};
use devpool_rs::config::ManagerConfig;
use devpool_rs::health::{AdbDiscovery, DeviceDiscovery, HealthService, IdeviceDiscovery};
use devpool_rs::logger;
use devpool_rs::reservation::{ReconnectBackoff, ReservationService, StaticSettings};
use devpool_rs::session::{DisabledSessionManager, HttpSessionManager, SessionManager};
use devpool_rs::store::MemoryStore;
use devpool_rs::utils::pool_lock;

/// 配置文件路径：命令行第一个参数，其次 `DEVPOOL_CONFIG`
fn config_path() -> Option<String> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DEVPOOL_CONFIG").ok())
}

fn load_config() -> anyhow::Result<ManagerConfig> {
    match config_path() {
        Some(path) => ManagerConfig::from_file_with_env(&path)
            .with_context(|| format!("加载配置文件失败: {}", path)),
        None => {
            let mut config = ManagerConfig::default();
            config
                .apply_env(|key| std::env::var(key).ok())
                .context("环境变量配置无效")?;
            Ok(config)
        }
    }
}

fn build_sessions(config: &ManagerConfig) -> anyhow::Result<Arc<dyn SessionManager>> {
    match &config.session.base_url {
        Some(url) => {
            let manager = HttpSessionManager::new(url.clone(), Duration::from_millis(config.session.timeout_ms))
                .context("创建会话客户端失败")?;
            Ok(Arc::new(manager))
        }
        None => {
            warn!("未配置 session.base_url，Appium 预约将无法锁定设备");
            Ok(Arc::new(DisabledSessionManager))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _log_guard = logger::init(&config.logging);

    info!("启动设备池服务...");

    let store = Arc::new(MemoryStore::with_devices(config.devices.clone()));
    info!("已注册 {} 台设备", config.devices.len());

    let sessions = build_sessions(&config)?;

    let settings = Arc::new(StaticSettings::new(
        config.reservation.refresh_interval_ms,
        config.reservation.reconnect_interval_ms,
    ));
    let backoff = match config.reservation.reconnect_max_interval_ms {
        Some(max) => ReconnectBackoff::exponential(max, 2.0),
        None => ReconnectBackoff::Fixed,
    };

    let cancel = CancellationToken::new();
    let pool = pool_lock();

    let scheduler = Arc::new(ReservationService::new(
        store.clone(),
        Arc::clone(&sessions),
        settings,
        backoff,
    )
    .with_pool_lock(pool.clone()));
    let scheduler_handle = scheduler.spawn(cancel.child_token());

    let health_handle = if config.health.enabled {
        let mut sources: Vec<Arc<dyn DeviceDiscovery>> = Vec::new();
        if config.health.android {
            sources.push(Arc::new(AdbDiscovery::new()));
        }
        if config.health.ios {
            sources.push(Arc::new(IdeviceDiscovery::default()));
        }

        let health = Arc::new(HealthService::new(
            store.clone(),
            sources,
            Duration::from_millis(config.health.check_interval_ms),
        )
        .with_pool_lock(pool.clone()));
        Some(health.spawn(cancel.child_token()))
    } else {
        info!("设备健康检查已关闭");
        None
    };

    let state = AppState::new(store, sessions, config.api.lock_timeout()).with_pool_lock(pool);
    let api_server = ApiServer::new(state);

    let shutdown = cancel.clone();
    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听退出信号失败: {:?}", e);
        }
        info!("收到退出信号，开始关闭...");
        shutdown.cancel();
    };

    if let Err(e) = api_server.run(&config.api.bind, signal).await {
        error!("API 服务器运行失败: {}", e);
        cancel.cancel();
    }

    scheduler_handle.shutdown().await;
    if let Some(handle) = health_handle {
        handle.shutdown().await;
    }

    info!("设备池服务已退出");
    Ok(())
}
