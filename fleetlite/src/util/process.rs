//! Process liveness checks and process-tree teardown.

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::collections::{HashMap, VecDeque};
use sysinfo::System;

/// Kill a process with SIGKILL.
///
/// # Returns
/// * `true` - Process was killed or doesn't exist
/// * `false` - Failed to kill (permission denied)
pub fn kill_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGKILL) == 0 || !is_process_alive(pid) }
}

/// Check if a process with the given PID exists and has not exited.
///
/// Uses `libc::kill(pid, 0)`. On Linux a zombie (exited, not yet reaped)
/// counts as dead.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let exists = unsafe { libc::kill(pid as i32, 0) == 0 };
    exists && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // /proc/<pid>/stat: "pid (comm) S ...", comm may contain spaces or parens
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rfind(')')
            .and_then(|end| stat[end + 1..].split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// All descendants of `pid` (children, grandchildren, ...), parents first.
pub fn descendant_pids(pid: u32) -> Vec<u32> {
    let mut sys = System::new();
    sys.refresh_processes();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (child, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(child.as_u32());
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([pid]);
    while let Some(current) = queue.pop_front() {
        if let Some(kids) = children.get(&current) {
            for &kid in kids {
                if kid != pid && !found.contains(&kid) {
                    found.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }
    found
}

/// Kill `pid` and every process below it.
///
/// The process table is walked before anything is killed, since children are
/// reparented once their parent dies. The process group led by `pid` is
/// signalled too, which catches children that were forked during the walk.
///
/// # Returns
/// `true` if no process of the tree is alive afterwards.
pub fn kill_process_tree(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return true;
    }

    let descendants = descendant_pids(pid);

    // ESRCH is expected when pid was not a group leader or is already gone
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);

    for &child in descendants.iter().rev() {
        kill_process(child);
    }
    kill_process(pid);

    tracing::debug!(
        pid,
        descendants = descendants.len(),
        "Killed process tree"
    );

    !is_process_alive(pid) && descendants.iter().all(|&p| !is_process_alive(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    fn wait_dead(pid: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !is_process_alive(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_is_process_alive_current() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        // u32::MAX becomes -1 when cast to i32, which has special meaning in kill()
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(u32::MAX));
        assert!(!is_process_alive(0));
    }

    #[test]
    fn test_kill_process_tree_takes_grandchildren() {
        // sh forks a background sleep (grandchild of the test) and waits on it
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30 & echo $!; wait")
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();

        let mut line = String::new();
        use std::io::BufRead;
        std::io::BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let grandchild: u32 = line.trim().parse().unwrap();

        assert!(is_process_alive(grandchild));
        assert!(descendant_pids(pid).contains(&grandchild));

        kill_process_tree(pid);
        let _ = child.wait();

        assert!(wait_dead(pid));
        assert!(wait_dead(grandchild));
    }

    #[test]
    fn test_kill_process_tree_missing_pid_is_ok() {
        assert!(kill_process_tree(999999999));
    }
}
