//! レジスタアクセス機能

use crate::Result;
use nix::unistd::Pid;

/// レジスタ情報
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<nix::libc::user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        Ok(self.read()?.rip)
    }

    /// フレームベース（RBP）を取得する
    pub fn get_frame_base(&self) -> Result<u64> {
        Ok(self.read()?.rbp)
    }
}
