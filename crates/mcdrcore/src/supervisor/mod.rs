//! 子行程守護
//!
//! 每次執行同時跑兩個工作：
//! - 讀取工作：逐行讀取合併後的 stdout/stderr，解碼後交給解析器與反應器管線
//! - 監控工作：出現關閉意圖時送出停止指令，逾時未結束則強制終止
//!
//! 任一工作結束即取消另一個。外層迴圈在沒有關閉意圖時自動重新啟動伺服器

pub mod kill;

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::event::{ServerLaunchingEvent, ServerShutdownEvent};
use crate::server::Server;

pub use kill::{kill_order, process_tree, ProcessKiller, SystemKiller};

/// 單行輸出上限，超過的部分捨棄
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// 守護程式錯誤
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("無法啟動伺服器 `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// 子行程結束狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    Running,
    Exited(Option<i32>),
}

/// 一次執行中的行程資源
struct RunningProcess {
    pid: Option<u32>,
    lines: mpsc::UnboundedReceiver<Vec<u8>>,
    exit: watch::Receiver<ExitState>,
    waiter: JoinHandle<()>,
    io_tasks: Vec<JoinHandle<()>>,
    /// 本次執行是否已強制終止
    killed: AtomicBool,
}

fn has_exited(exit: &watch::Receiver<ExitState>) -> bool {
    matches!(*exit.borrow(), ExitState::Exited(_))
}

/// 伺服器行程守護者
#[derive(Clone)]
pub struct ProcessSupervisor {
    server: Server,
    killer: Arc<dyn ProcessKiller>,
}

impl ProcessSupervisor {
    pub fn new(server: Server) -> Self {
        Self::with_killer(server, Arc::new(SystemKiller))
    }

    pub fn with_killer(server: Server, killer: Arc<dyn ProcessKiller>) -> Self {
        Self { server, killer }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// 外層迴圈：啟動、守護，非預期結束時重新啟動，直到出現關閉意圖
    pub async fn run(&self) {
        let restart_delay = self.server.config().restart_delay();
        while !self.server.is_exiting() {
            match self.start() {
                Ok(process) => self.supervise(process).await,
                Err(e) => {
                    error!("{}", e);
                    if self.server.is_exiting() {
                        break;
                    }
                    sleep(restart_delay).await;
                    continue;
                }
            }

            if !self.server.is_exiting() {
                warn!(
                    "伺服器非預期結束，{} 秒後重新啟動",
                    restart_delay.as_secs()
                );
                sleep(restart_delay).await;
            }
        }
        info!("守護程式結束");
    }

    /// 強制終止目前的伺服器行程樹（異常關閉時使用）
    pub fn kill_server(&self) -> usize {
        match self.server.pid() {
            Some(pid) => self.killer.kill_tree(pid),
            None => {
                debug!("沒有執行中的伺服器行程");
                0
            }
        }
    }

    /// 啟動伺服器行程
    fn start(&self) -> Result<RunningProcess, SupervisorError> {
        let config = self.server.config();
        info!("啟動伺服器: {}", config.start_command);
        info!("工作目錄: {}", config.working_directory.display());

        let mut child = shell_command(&config.start_command)
            .current_dir(&config.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: config.start_command.clone(),
                source,
            })?;
        let pid = child.id();
        info!("伺服器行程已啟動，pid = {:?}", pid);

        let mut io_tasks = Vec::new();
        let (line_tx, lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            io_tasks.push(spawn_reader("stdout", stdout, line_tx));
        }

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        if let Some(stdin) = child.stdin.take() {
            io_tasks.push(spawn_writer(stdin, stdin_rx));
        }

        let (exit_tx, exit) = watch::channel(ExitState::Running);
        let waiter = tokio::spawn(async move {
            let state = match child.wait().await {
                Ok(status) => {
                    info!("伺服器行程已結束，結束碼 {:?}", status.code());
                    ExitState::Exited(status.code())
                }
                Err(e) => {
                    error!("等待伺服器行程失敗: {}", e);
                    ExitState::Exited(None)
                }
            };
            // 接收端可能已隨本次執行結束
            let _ = exit_tx.send(state);
        });

        self.server.attach_process(pid, stdin_tx);
        self.server.update_information(|info| info.clear());
        self.server.pipeline().on_server_start(&self.server);
        let event = ServerLaunchingEvent {
            server: self.server.clone(),
            pid,
        };
        if let Err(e) = self.server.bus().publish(&event) {
            warn!("{}", e);
        }

        Ok(RunningProcess {
            pid,
            lines,
            exit,
            waiter,
            io_tasks,
            killed: AtomicBool::new(false),
        })
    }

    /// 守護一次執行直到行程結束
    async fn supervise(&self, mut process: RunningProcess) {
        let pid = process.pid;
        tokio::select! {
            _ = self.receive(&mut process.lines, &process.exit, &process.killed, pid) => {
                debug!("讀取工作結束");
            }
            _ = self.watchdog(&process.exit, &process.killed, pid) => {
                debug!("監控工作結束");
            }
        }

        if !has_exited(&process.exit) {
            warn!("工作已結束但伺服器行程仍在執行");
            self.force_kill(pid, &process.killed);
        }

        let reap_timeout = self.server.config().tick() * self.server.config().stream_close_ticks.max(1);
        if timeout(reap_timeout, &mut process.waiter).await.is_err() {
            error!("無法回收伺服器行程 {:?}", pid);
            process.waiter.abort();
        }
        for task in &process.io_tasks {
            task.abort();
        }

        let exit_code = match *process.exit.borrow() {
            ExitState::Exited(code) => code,
            ExitState::Running => None,
        };
        let requested = self.server.is_exiting();
        self.server.detach_process();
        self.server.pipeline().on_server_stop(&self.server);
        let event = ServerShutdownEvent {
            server: self.server.clone(),
            requested,
            exit_code,
        };
        if let Err(e) = self.server.bus().publish(&event) {
            warn!("{}", e);
        }
        info!("伺服器已停止");
    }

    /// 讀取工作
    async fn receive(
        &self,
        lines: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        exit: &watch::Receiver<ExitState>,
        killed: &AtomicBool,
        pid: Option<u32>,
    ) {
        while let Some(bytes) = lines.recv().await {
            match self.server.codec().decode_line(&bytes) {
                Ok(text) => {
                    self.server.feed_server_line(&text);
                }
                Err(e) => error!("{}", e),
            }
        }
        debug!("伺服器輸出已關閉");

        let config = self.server.config();
        if self.wait_for_exit(exit, config.stream_close_ticks).await {
            return;
        }
        warn!(
            "輸出關閉後 {} 次輪詢內行程仍未結束",
            config.stream_close_ticks
        );
        self.force_kill(pid, killed);
    }

    /// 監控工作
    async fn watchdog(&self, exit: &watch::Receiver<ExitState>, killed: &AtomicBool, pid: Option<u32>) {
        let config = self.server.config();
        let tick = config.tick();
        sleep(tick).await;

        loop {
            if has_exited(exit) {
                // 讓讀取工作把剩下的輸出讀完
                sleep(tick * config.stream_close_ticks).await;
                return;
            }
            if self.server.is_exiting() {
                break;
            }
            sleep(tick).await;
        }

        self.server.send_stop_command();
        info!("等待伺服器關閉");
        if self.wait_for_exit(exit, config.stop_timeout_ticks).await {
            sleep(tick * config.stream_close_ticks).await;
            return;
        }
        error!(
            "伺服器在 {} 次輪詢內未關閉，強制終止",
            config.stop_timeout_ticks
        );
        self.force_kill(pid, killed);
    }

    /// 輪詢等待行程結束，回傳是否已結束
    async fn wait_for_exit(&self, exit: &watch::Receiver<ExitState>, ticks: u32) -> bool {
        let tick = self.server.config().tick();
        for _ in 0..ticks {
            if has_exited(exit) {
                return true;
            }
            sleep(tick).await;
        }
        has_exited(exit)
    }

    /// 強制終止本次執行的行程樹（每次執行最多一次）
    fn force_kill(&self, pid: Option<u32>, killed: &AtomicBool) {
        if killed.swap(true, Ordering::AcqRel) {
            return;
        }
        match pid {
            Some(pid) => {
                let count = self.killer.kill_tree(pid);
                info!("已強制終止 {} 個行程", count);
            }
            None => warn!("伺服器行程沒有 pid，無法強制終止"),
        }
    }
}

/// 以系統 shell 執行指令，stderr 在 shell 內併入 stdout 以保留輸出順序
fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(format!("({}) 2>&1", command_line));
        command
    }

    #[cfg(not(windows))]
    {
        let mut command = Command::new("sh");
        command.arg("-c").arg(format!("exec 2>&1\n{}", command_line));
        command
    }
}

/// 逐行讀取輸出（保留原始位元組，解碼交給讀取工作）
fn spawn_reader<R>(name: &'static str, reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        read_lines(name, BufReader::new(reader), tx, MAX_LINE_BYTES).await;
        debug!("{} 已關閉", name);
    })
}

async fn read_lines<R>(name: &str, mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>, max_line: u64)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = Vec::new();
        match (&mut reader).take(max_line).read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if !line.ends_with(b"\n") && line.len() as u64 >= max_line {
                    warn!("{} 單行輸出超過 {} 位元組，已截斷", name, max_line);
                    trim_partial_char(&mut line);
                    if let Err(e) = skip_rest_of_line(&mut reader).await {
                        warn!("讀取 {} 失敗: {}", name, e);
                        let _ = tx.send(line);
                        break;
                    }
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("讀取 {} 失敗: {}", name, e);
                break;
            }
        }
    }
}

/// 丟棄到下一個換行為止的資料
async fn skip_rest_of_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = buf.len();
        reader.consume(len);
    }
}

/// 截斷處若切在 UTF-8 字元中間，移除不完整的尾端
fn trim_partial_char(line: &mut Vec<u8>) {
    if let Err(e) = std::str::from_utf8(line) {
        if e.error_len().is_none() {
            line.truncate(e.valid_up_to());
        }
    }
}

/// 將佇列中的資料寫入 stdin
fn spawn_writer(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Bytes>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let result = async {
                stdin.write_all(&bytes).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = result {
                warn!("寫入伺服器 stdin 失敗: {}", e);
                break;
            }
        }
    })
}
