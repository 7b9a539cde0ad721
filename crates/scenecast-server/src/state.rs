//! 服务器上下文
//!
//! 所有共享注册表（会话表、限流桶、观众连接、事件日志）都是这个值的字段，
//! 由 main.rs 创建并传给每个 handler；测试可以各自构造独立实例。

use std::sync::Arc;
use std::time::Duration;

use scenecast_config::Config;
use scenecast_core::{EventLog, SceneState};
use scenecast_session::{SessionManager, SessionManagerConfig, StoreHandle};
use tokio::sync::mpsc;

use crate::access::AccessGate;
use crate::hub::{Audience, BroadcastHub, HubConfig, ViewerId};
use crate::protocol::SceneProtocol;
use crate::rate_limit::RateLimiter;

/// 客户端回传协议消息的路径
pub const MESSAGES_PATH: &str = "/messages";

pub struct AppState {
    pub config: Config,
    pub gate: AccessGate,
    pub limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionManager>,
    pub hub: Arc<BroadcastHub>,
    pub scene: Arc<SceneState>,
    pub event_log: Arc<EventLog>,
}

impl AppState {
    /// 按配置装配所有组件
    ///
    /// 装配顺序：事件日志 → hub → 场景状态 → 协议处理器 → 会话管理器，
    /// 最后把会话管理器挂到 hub 上作为协议受众。
    pub fn new(config: Config, store: StoreHandle) -> Self {
        let event_log = Arc::new(EventLog::new(config.broadcast.event_log_capacity));

        let hub = Arc::new(BroadcastHub::new(
            HubConfig {
                channel_capacity: config.broadcast.channel_capacity,
                retry_ms: config.broadcast.retry_ms,
            },
            Arc::clone(&event_log),
        ));

        let scene = Arc::new(SceneState::new(hub.clone()));
        let protocol = Arc::new(SceneProtocol::new(Arc::clone(&scene)));

        let sessions = Arc::new(
            SessionManager::new(
                SessionManagerConfig {
                    heartbeat_interval: Duration::from_secs(config.session.heartbeat_interval_secs),
                    store_ttl: Duration::from_secs(config.session.store_ttl_secs),
                    outbound_buffer: config.session.outbound_buffer,
                    endpoint_path: MESSAGES_PATH.to_string(),
                },
                Arc::new(store),
                protocol,
            )
            .with_event_log(Arc::clone(&event_log)),
        );
        hub.set_protocol_sink(&sessions);

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.capacity,
            config.rate_limit.refill_per_sec,
        ));
        let gate = AccessGate::new(
            config.access.api_key.clone(),
            config.access.allowed_origins.clone(),
            Arc::clone(&limiter),
        );

        Self {
            config,
            gate,
            limiter,
            sessions,
            hub,
            scene,
            event_log,
        }
    }

    /// 注册一个观众连接
    ///
    /// 快照与注册都在场景读锁内完成：场景变更在写锁内发出事件，
    /// 因此每次变更要么已体现在 init 快照里，要么会作为事件送达。
    pub fn open_viewer(&self, audience: Audience) -> (ViewerId, mpsc::Receiver<String>) {
        self.scene.observe(|snapshot| match audience {
            Audience::Stream => self.hub.register_stream(snapshot),
            Audience::Socket => self.hub.register_socket(snapshot),
        })
    }

    /// 观众 SSE 连接的心跳间隔，与协议会话一致
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.config.session.heartbeat_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenecast_core::BroadcastEvent;
    use serde_json::Value;

    fn state(channel_capacity: usize) -> Arc<AppState> {
        let mut config = Config::default();
        config.broadcast.channel_capacity = channel_capacity;
        Arc::new(AppState::new(config, StoreHandle::unavailable()))
    }

    /// 读完所有帧后，socket 观众所知道的最新资源路径
    fn last_known_asset(frames: &mut mpsc::Receiver<String>) -> Option<String> {
        let mut path = None;
        while let Ok(text) = frames.try_recv() {
            let event: BroadcastEvent = serde_json::from_str(&text).unwrap();
            match event.event_type() {
                "init" => {
                    path = event.data()["currentAssetPath"].as_str().map(String::from);
                }
                "assetLoaded" => path = event.data()["path"].as_str().map(String::from),
                _ => {}
            }
        }
        path
    }

    #[test]
    fn test_viewer_opened_after_mutation_sees_it_in_init() {
        let state = state(16);
        state.scene.load_asset("robot.glb").unwrap();
        let (_, mut frames) = state.open_viewer(Audience::Socket);
        assert_eq!(last_known_asset(&mut frames).as_deref(), Some("robot.glb"));
    }

    #[test]
    fn test_viewers_opened_during_mutations_converge() {
        let state = state(1024);
        let writer = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for i in 0..200 {
                    state.scene.load_asset(&format!("asset-{i}.glb")).unwrap();
                }
            })
        };

        let mut viewers = Vec::new();
        for _ in 0..50 {
            viewers.push(state.open_viewer(Audience::Socket).1);
            std::thread::yield_now();
        }
        writer.join().unwrap();

        let expected = state.scene.snapshot().current_asset_path;
        assert_eq!(expected.as_deref(), Some("asset-199.glb"));
        for frames in &mut viewers {
            assert_eq!(last_known_asset(frames), expected);
        }
    }

    #[test]
    fn test_state_is_freed_on_drop() {
        let state = state(16);
        let hub = Arc::downgrade(&state.hub);
        let sessions = Arc::downgrade(&state.sessions);
        drop(state);
        assert!(hub.upgrade().is_none());
        assert!(sessions.upgrade().is_none());
    }
}
