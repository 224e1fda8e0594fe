//! MCDR 控制台程式
//!
//! 載入設定、啟動並守護 Minecraft 伺服器，將控制台輸入轉交給伺服器。
//! 第一次 Ctrl-C 正常關閉伺服器，第二次直接強制終止

use std::path::PathBuf;

use mcdrcore::event::{PlayerJoinedEvent, ServerLaunchedEvent, ServerShutdownEvent};
use mcdrcore::{McdrConfig, ProcessSupervisor, Server};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(McdrConfig::config_path);
    let loaded = McdrConfig::load_or_create(&config_path);
    let debug = loaded.as_ref().map(|c| c.debug).unwrap_or(false);

    // 初始化日誌
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("無法載入設定檔 {}: {}", config_path.display(), e);
            return Err(e.into());
        }
    };

    let server = Server::new(config)?;
    register_listeners(&server);
    spawn_console_reader(server.clone());

    let supervisor = ProcessSupervisor::new(server.clone());
    let runner = supervisor.clone();
    let mut run = tokio::spawn(async move { runner.run().await });

    let mut interrupts = 0;
    loop {
        tokio::select! {
            result = &mut run => {
                if let Err(e) = result {
                    error!("守護工作異常結束: {}", e);
                    supervisor.kill_server();
                }
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("無法監聽 Ctrl-C: {}", e);
                    break;
                }
                interrupts += 1;
                if interrupts == 1 {
                    info!("正在關閉伺服器，再按一次 Ctrl-C 強制終止");
                    server.request_shutdown();
                } else {
                    warn!("強制終止伺服器");
                    supervisor.kill_server();
                }
            }
        }
    }

    info!("再見");
    Ok(())
}

/// 在控制台顯示主要事件
fn register_listeners(server: &Server) {
    server
        .bus()
        .subscribe::<ServerLaunchedEvent, _>("console", |event| {
            let info = event.server.server_information();
            info!(
                "伺服器已就緒 (版本 {}, 位址 {}:{})",
                info.version.as_deref().unwrap_or("?"),
                info.ip.as_deref().unwrap_or("*"),
                info.port.map_or_else(|| "?".to_string(), |p| p.to_string())
            );
            Ok(())
        });

    server
        .bus()
        .subscribe::<PlayerJoinedEvent, _>("console", |event| {
            if let Some(level) = event.server.permission_level_of(&event.player, false) {
                info!("{} 的權限等級: {}", event.player, level);
            }
            Ok(())
        });

    server
        .bus()
        .subscribe::<ServerShutdownEvent, _>("console", |event| {
            if !event.requested {
                warn!("伺服器非預期結束，結束碼 {:?}", event.exit_code);
            }
            Ok(())
        });
}

/// 讀取控制台輸入，每一行交給伺服器處理
fn spawn_console_reader(server: Server) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    server.feed_console_input(line.trim_end());
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("讀取控制台輸入失敗: {}", e);
                    break;
                }
            }
        }
    });
}
