//! 行程樹強制終止
//!
//! 先列舉根行程的所有子孫行程，再由最深的子行程往上逐一終止，
//! 行程已經不存在不視為錯誤

use std::collections::HashSet;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// 強制終止行程樹
pub trait ProcessKiller: Send + Sync {
    /// 終止 `root` 及其所有子孫行程，回傳實際終止的行程數
    fn kill_tree(&self, root: u32) -> usize;
}

/// 使用 sysinfo 的實作
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKiller;

impl ProcessKiller for SystemKiller {
    fn kill_tree(&self, root: u32) -> usize {
        let system = refreshed_system();
        let order = kill_order(root, &process_table(&system));
        info!("強制終止行程樹 {} (共 {} 個行程)", root, order.len());

        let mut killed = 0;
        for pid in order {
            match system.process(Pid::from_u32(pid)) {
                Some(process) => {
                    let name = process.name().to_string_lossy().into_owned();
                    if process.kill() {
                        debug!("已終止行程 {} ({})", pid, name);
                        killed += 1;
                    } else {
                        warn!("無法終止行程 {} ({})，可能已結束", pid, name);
                    }
                }
                None => debug!("行程 {} 已不存在", pid),
            }
        }
        killed
    }
}

fn refreshed_system() -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
}

/// (pid, 父行程 pid)，不含執行緒
fn process_table(system: &System) -> Vec<(u32, Option<u32>)> {
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.thread_kind().is_none())
        .map(|(pid, process)| (pid.as_u32(), process.parent().map(|p| p.as_u32())))
        .collect()
}

/// 逐層列出 `root` 的子孫行程，根行程在最前面
fn descendants(root: u32, table: &[(u32, Option<u32>)]) -> Vec<u32> {
    let mut result = vec![root];
    let mut seen: HashSet<u32> = HashSet::from([root]);
    let mut index = 0;
    while index < result.len() {
        let parent = result[index];
        for &(pid, ppid) in table {
            if ppid == Some(parent) && seen.insert(pid) {
                result.push(pid);
            }
        }
        index += 1;
    }
    result
}

/// 終止順序：子行程先於父行程，根行程最後
pub fn kill_order(root: u32, table: &[(u32, Option<u32>)]) -> Vec<u32> {
    let mut order = descendants(root, table);
    order.reverse();
    order
}

/// 目前系統中 `root` 及其子孫行程的 pid，根行程在最前面
pub fn process_tree(root: u32) -> Vec<u32> {
    let system = refreshed_system();
    descendants(root, &process_table(&system))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_before_parent() {
        // 1 -> 2 -> 4
        //   -> 3
        let table = [
            (1, None),
            (2, Some(1)),
            (3, Some(1)),
            (4, Some(2)),
            (5, Some(99)),
        ];
        let order = kill_order(1, &table);
        assert_eq!(order.len(), 4);
        assert_eq!(order.last(), Some(&1));
        let position = |pid| order.iter().position(|&p| p == pid).unwrap();
        assert!(position(4) < position(2));
        assert!(position(2) < position(1));
        assert!(position(3) < position(1));
        assert!(!order.contains(&5));
    }

    #[test]
    fn test_single_process() {
        assert_eq!(kill_order(7, &[(7, Some(1))]), vec![7]);
        // 根行程不在表中（已結束）仍回傳自己
        assert_eq!(kill_order(8, &[]), vec![8]);
    }

    #[test]
    fn test_cycle_terminates() {
        let table = [(1, Some(2)), (2, Some(1))];
        assert_eq!(kill_order(1, &table), vec![2, 1]);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_kill_real_tree() {
        use std::time::Duration;
        use tokio::process::Command;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & wait")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(process_tree(pid).len() >= 2);
        let killed = SystemKiller.kill_tree(pid);
        assert!(killed >= 2);

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_missing_process() {
        // 很大的 pid 幾乎不可能存在
        assert_eq!(SystemKiller.kill_tree(u32::MAX - 1), 0);
    }
}
