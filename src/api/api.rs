use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::{Device, DeviceProperty, Reservation, ReservationApplied};
use crate::reservation::{release_applied_reservation, submit_reservation};
use crate::session::SessionManager;
use crate::store::Store;
use crate::utils::{KeyedLock, PoolLock, pool_lock};

/// API 响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

/// 全部存储内容快照
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySnapshot {
    pub devices: Vec<Device>,
    pub reservations: Vec<Reservation>,
    pub applied_reservations: Vec<ReservationApplied>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("请求处理失败: {}", self);
        } else {
            debug!("请求被拒绝: {}", self);
        }

        let body: ApiResponse<()> = ApiResponse {
            success: false,
            message: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

/// 处理函数共享的状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<dyn SessionManager>,
    pub locks: KeyedLock,
    pub lock_timeout: Duration,
    pub pool_lock: PoolLock,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<dyn SessionManager>, lock_timeout: Duration) -> Self {
        Self {
            store,
            sessions,
            locks: KeyedLock::new(),
            lock_timeout,
            pool_lock: pool_lock(),
        }
    }

    /// 与后台服务共用的设备池锁
    pub fn with_pool_lock(mut self, pool_lock: PoolLock) -> Self {
        self.pool_lock = pool_lock;
        self
    }

    /// 获取设备池锁，等待后台轮次结束
    async fn lock_pool(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::time::timeout(self.lock_timeout, self.pool_lock.lock())
            .await
            .map_err(|_| AppError::LockTimeout(format!("设备池 ({:?})", self.lock_timeout)))
    }
}

pub struct ApiServer {
    pub app: Router,
}

type Reply<T> = Result<Json<ApiResponse<T>>>;

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        let app = Router::new()
            .route("/devices", get(Self::list_devices).post(Self::register_device))
            .route("/devices/properties", get(Self::list_property_keys))
            .route("/devices/properties/{id}", get(Self::get_device_properties))
            .route(
                "/devices/{id}",
                get(Self::get_device).put(Self::update_device).delete(Self::delete_device),
            )
            .route(
                "/reservations",
                get(Self::list_reservations).post(Self::create_reservation),
            )
            .route("/reservations/applied", get(Self::list_applied))
            .route(
                "/reservations/applied/{id}",
                get(Self::get_applied).delete(Self::release_applied),
            )
            .route(
                "/reservations/{id}",
                get(Self::get_reservation)
                    .put(Self::update_reservation)
                    .delete(Self::cancel_reservation),
            )
            .route("/admin/repositories", get(Self::repositories))
            .layer(CorsLayer::permissive())
            .with_state(state);
        ApiServer { app }
    }

    /// 启动 API 服务器，`shutdown` 完成后停止接收新连接
    pub async fn run<F>(self, bind: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("API 服务器运行在 http://{}", bind);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("API 服务器已停止");
        Ok(())
    }

    async fn list_devices(State(state): State<AppState>) -> Reply<Vec<Device>> {
        let devices = state.store.list_devices().await?;
        let count = devices.len();
        Ok(ApiResponse::ok(format!("共 {} 台设备", count), devices))
    }

    async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> Reply<Device> {
        let device = state
            .store
            .get_device(&id)
            .await?
            .ok_or_else(|| AppError::DeviceNotFound(id.clone()))?;
        Ok(ApiResponse::ok("ok", device))
    }

    /// 注册设备
    async fn register_device(State(state): State<AppState>, Json(device): Json<Device>) -> Reply<Device> {
        if device.id.trim().is_empty() {
            return Err(AppError::Validation("设备 ID 不能为空".to_string()));
        }

        let _guard = state
            .locks
            .acquire(&format!("device:{}", device.id), state.lock_timeout)
            .await?;
        let _pool = state.lock_pool().await?;

        let device = state.store.add_device(device).await?;
        info!(device_id = %device.id, "设备已注册: {} [{}]", device.name, device.device_type);
        Ok(ApiResponse::ok("设备已注册", device))
    }

    /// 覆盖设备记录，路径与请求体中的 ID 必须一致
    async fn update_device(
        State(state): State<AppState>,
        Path(id): Path<String>,
        Json(device): Json<Device>,
    ) -> Reply<Device> {
        if device.id != id {
            return Err(AppError::Validation(format!(
                "请求中的设备 ID {} 与路径 {} 不一致",
                device.id, id
            )));
        }

        let _guard = state
            .locks
            .acquire(&format!("device:{}", id), state.lock_timeout)
            .await?;
        let _pool = state.lock_pool().await?;

        let previous = state
            .store
            .get_device(&id)
            .await?
            .ok_or_else(|| AppError::DeviceNotFound(id.clone()))?;

        let device = state.store.update_device(device).await?;
        debug!(
            device_id = %id,
            "设备已更新: [{}/{}] → [{}/{}]",
            previous.status, previous.available, device.status, device.available
        );
        Ok(ApiResponse::ok("设备已更新", device))
    }

    /// 移除设备，锁定中的设备不能移除
    async fn delete_device(State(state): State<AppState>, Path(id): Path<String>) -> Reply<String> {
        let _guard = state
            .locks
            .acquire(&format!("device:{}", id), state.lock_timeout)
            .await?;
        let _pool = state.lock_pool().await?;

        let device = state
            .store
            .get_device(&id)
            .await?
            .ok_or_else(|| AppError::DeviceNotFound(id.clone()))?;

        if device.status.is_locked() {
            return Err(AppError::DeviceLocked(id));
        }

        state.store.delete_device(&id).await?;
        info!(device_id = %id, "设备已移除");
        Ok(ApiResponse::ok("设备已移除", id))
    }

    /// 设备池中出现过的全部属性键，按首次出现顺序
    async fn list_property_keys(State(state): State<AppState>) -> Reply<Vec<String>> {
        let mut keys: Vec<String> = Vec::new();
        for device in state.store.list_devices().await? {
            for property in device.properties {
                if !keys.contains(&property.key) {
                    keys.push(property.key);
                }
            }
        }
        Ok(ApiResponse::ok(format!("共 {} 个属性键", keys.len()), keys))
    }

    async fn get_device_properties(
        State(state): State<AppState>,
        Path(id): Path<String>,
    ) -> Reply<Vec<DeviceProperty>> {
        let device = state
            .store
            .get_device(&id)
            .await?
            .ok_or_else(|| AppError::DeviceNotFound(id.clone()))?;
        Ok(ApiResponse::ok("ok", device.properties))
    }

    async fn list_reservations(State(state): State<AppState>) -> Reply<Vec<Reservation>> {
        let reservations = state.store.list_reservations().await?;
        Ok(ApiResponse::ok(format!("队列中 {} 个预约", reservations.len()), reservations))
    }

    /// 提交预约，校验失败返回 400
    async fn create_reservation(
        State(state): State<AppState>,
        Json(reservation): Json<Reservation>,
    ) -> Reply<Reservation> {
        debug!(reservation_id = %reservation.id, "收到预约请求");
        let queued = submit_reservation(&*state.store, reservation).await?;
        Ok(ApiResponse::ok("预约已入队", queued))
    }

    async fn get_reservation(State(state): State<AppState>, Path(id): Path<String>) -> Reply<Reservation> {
        let reservation = state
            .store
            .get_reservation(&id)
            .await?
            .ok_or_else(|| AppError::ReservationNotFound(id.clone()))?;
        Ok(ApiResponse::ok("ok", reservation))
    }

    /// 更新排队中的预约，路径与请求体中的 ID 必须一致
    async fn update_reservation(
        State(state): State<AppState>,
        Path(id): Path<String>,
        Json(reservation): Json<Reservation>,
    ) -> Reply<Reservation> {
        if reservation.id != id {
            return Err(AppError::Validation(format!(
                "请求中的预约 ID {} 与路径 {} 不一致",
                reservation.id, id
            )));
        }

        let _guard = state
            .locks
            .acquire(&format!("reservation:{}", id), state.lock_timeout)
            .await?;

        if state.store.get_reservation(&id).await?.is_none() {
            return Err(AppError::ReservationNotFound(id));
        }

        let updated = state.store.update_reservation(reservation).await?;
        info!(reservation_id = %id, "预约已更新");
        Ok(ApiResponse::ok("预约已更新", updated))
    }

    /// 取消排队中的预约
    async fn cancel_reservation(State(state): State<AppState>, Path(id): Path<String>) -> Reply<String> {
        let _guard = state
            .locks
            .acquire(&format!("reservation:{}", id), state.lock_timeout)
            .await?;

        if state.store.get_reservation(&id).await?.is_none() {
            return Err(AppError::ReservationNotFound(id));
        }

        state.store.delete_reservation(&id).await?;
        info!(reservation_id = %id, "预约已取消");
        Ok(ApiResponse::ok("预约已取消", id))
    }

    async fn list_applied(State(state): State<AppState>) -> Reply<Vec<ReservationApplied>> {
        let applied = state.store.list_applied_reservations().await?;
        Ok(ApiResponse::ok(format!("{} 个已生效预约", applied.len()), applied))
    }

    async fn get_applied(State(state): State<AppState>, Path(id): Path<String>) -> Reply<ReservationApplied> {
        let applied = state
            .store
            .get_applied_reservation(&id)
            .await?
            .ok_or_else(|| AppError::ReservationNotFound(id.clone()))?;
        Ok(ApiResponse::ok("ok", applied))
    }

    /// 释放已生效预约，同一预约的并发释放按顺序执行
    async fn release_applied(State(state): State<AppState>, Path(id): Path<String>) -> Reply<String> {
        let _guard = state
            .locks
            .acquire(&format!("reservation:{}", id), state.lock_timeout)
            .await?;
        let _pool = state.lock_pool().await?;

        release_applied_reservation(&*state.store, &*state.sessions, &id).await?;
        Ok(ApiResponse::ok("预约已释放", id))
    }

    async fn repositories(State(state): State<AppState>) -> Reply<RepositorySnapshot> {
        let snapshot = RepositorySnapshot {
            devices: state.store.list_devices().await?,
            reservations: state.store.list_reservations().await?,
            applied_reservations: state.store.list_applied_reservations().await?,
        };
        Ok(ApiResponse::ok("ok", snapshot))
    }
}
