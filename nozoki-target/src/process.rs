//! プロセス制御機能

use crate::Result;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::debug;

/// デバッグ対象のプロセス
///
/// アタッチ中はプロセスが停止しています。ドロップ時にデタッチします。
pub struct Process {
    pid: Pid,
}

impl Process {
    /// 既存のプロセスにアタッチし、停止するまで待機する
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        nix::sys::ptrace::attach(pid)
            .map_err(|e| anyhow::anyhow!("Failed to attach to process {}: {}", pid, e))?;

        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, signal) => {
                debug!("attached to {} (stopped by {:?})", pid, signal);
                Ok(Self { pid })
            }
            status => Err(anyhow::anyhow!(
                "Unexpected wait status after attach: {:?}",
                status
            )),
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if nix::sys::ptrace::detach(self.pid, None).is_ok() {
            debug!("detached from {}", self.pid);
        }
    }
}
