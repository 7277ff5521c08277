// ==========================================
// 委托编号台账 - 守护进程入口
// ==========================================
// 用法:
//   mandate-ledger [--once] [db_path]
// --once: 立即执行一次巡检后退出；否则按 SWEEP_AT 每日巡检直到 Ctrl-C
// ==========================================

use anyhow::Context;
use mandate_ledger::app::{get_default_db_path, run_daily, AppState, DailyTrigger};
use mandate_ledger::{i18n, logging, Clock};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} 版本: {}", mandate_ledger::APP_NAME, mandate_ledger::VERSION);
    tracing::info!("==================================================");

    let mut once = false;
    let mut db_path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--once" => once = true,
            other => db_path = Some(other.to_string()),
        }
    }
    let db_path = db_path.unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)
        .map_err(anyhow::Error::msg)
        .context("无法初始化AppState")?;
    i18n::set_locale(&state.config.locale);

    if once {
        let report = state.scheduler.run_sweep_once(state.clock.now()).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let trigger = DailyTrigger::from_config(&state.config);
    let worker = tokio::spawn(run_daily(
        state.scheduler.clone(),
        trigger,
        state.clock.clone(),
        shutdown_rx,
    ));

    tracing::info!(sweep_at = %state.config.sweep_at(), "每日巡检已启动，Ctrl-C 退出");
    tokio::signal::ctrl_c().await.context("监听 Ctrl-C 失败")?;
    tracing::info!("收到退出信号");

    // 接收端已退出时发送失败可忽略
    let _ = shutdown_tx.send(true);
    worker.await.context("巡检任务异常退出")?;
    Ok(())
}
