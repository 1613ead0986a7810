//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom, Write as _};
use tracing::{trace, warn};

/// メモリマッピング情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: usize,
    pub end: usize,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

impl MemoryMapping {
    /// /proc/pid/maps の1行をパースする
    ///
    /// フォーマット: "address perms offset dev inode pathname"
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let mut parts = line.split_whitespace();
        let (Some(range), Some(perms)) = (parts.next(), parts.next()) else {
            return Ok(None);
        };
        let Some((start, end)) = range.split_once('-') else {
            return Ok(None);
        };

        let start = usize::from_str_radix(start, 16)
            .map_err(|e| anyhow::anyhow!("Failed to parse start address: {}", e))?;
        let end = usize::from_str_radix(end, 16)
            .map_err(|e| anyhow::anyhow!("Failed to parse end address: {}", e))?;

        let perms = perms.as_bytes();
        Ok(Some(Self {
            start,
            end,
            readable: perms.first() == Some(&b'r'),
            writable: perms.get(1) == Some(&b'w'),
            executable: perms.get(2) == Some(&b'x'),
        }))
    }
}

/// `[addr, addr + size)` が読み取り可能なマッピングで連続して覆われているか
///
/// `mappings` は開始アドレス順に並んでいること（/proc/pid/maps の順序）。
pub fn range_is_mapped(mappings: &[MemoryMapping], addr: usize, size: usize) -> bool {
    range_is_covered(mappings, addr, size, |m| m.readable)
}

/// `[addr, addr + size)` が書き込み可能なマッピングで連続して覆われているか
pub fn range_is_writable(mappings: &[MemoryMapping], addr: usize, size: usize) -> bool {
    range_is_covered(mappings, addr, size, |m| m.writable)
}

fn range_is_covered(
    mappings: &[MemoryMapping],
    addr: usize,
    size: usize,
    usable: impl Fn(&MemoryMapping) -> bool,
) -> bool {
    let Some(end) = addr.checked_add(size) else {
        return false;
    };

    let mut cursor = addr;
    for m in mappings.iter().filter(|m| usable(m)) {
        if m.start <= cursor && cursor < m.end {
            cursor = m.end;
            if cursor >= end {
                return true;
            }
        }
    }
    false
}

/// メモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    pub fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(nix::libc::EIO) {
                        trace!("EIO reading 0x{:x}, falling back to ptrace", addr);
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// メモリにデータを書き込む
    ///
    /// /proc/pid/mem への1回の書き込みで行います。途中までしか書けなかった場合はエラー。
    pub fn write(&self, addr: usize, data: &[u8]) -> Result<()> {
        let mem_path = self.mem_path();
        let mut file = OpenOptions::new()
            .write(true)
            .open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {} for writing: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))
            .map_err(|e| anyhow::anyhow!("Failed to seek to address 0x{:x}: {}", addr, e))?;

        let written = file
            .write(data)
            .map_err(|e| anyhow::anyhow!("Failed to write {} bytes to 0x{:x}: {}", data.len(), addr, e))?;
        if written != data.len() {
            warn!("partial write at 0x{:x}: {} of {} bytes", addr, written, data.len());
            return Err(anyhow::anyhow!(
                "Partial write to 0x{:x} ({} of {} bytes)",
                addr,
                written,
                data.len()
            ));
        }

        Ok(())
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn get_mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        let mut mappings = Vec::new();
        for line in reader.lines() {
            if let Some(mapping) = MemoryMapping::parse_line(&line?)? {
                mappings.push(mapping);
            }
        }

        Ok(mappings)
    }

    /// 指定された範囲が読み取り可能なメモリマッピング内にあるかチェックする
    pub fn is_mapped(&self, addr: usize, size: usize) -> Result<bool> {
        let mappings = self.get_mappings()?;
        Ok(range_is_mapped(&mappings, addr, size))
    }

    /// 指定された範囲全体が書き込み可能なメモリマッピング内にあるかチェックする
    pub fn is_writable(&self, addr: usize, size: usize) -> Result<bool> {
        let mappings = self.get_mappings()?;
        Ok(range_is_writable(&mappings, addr, size))
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    pub fn read_via_ptrace(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr).map_err(|e| {
                anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr + offset, e)
            })?;

            let bytes = word.to_ne_bytes();
            let copy_size = (size - offset).min(word_size);
            data.extend_from_slice(&bytes[..copy_size]);
        }

        Ok(data)
    }
}

/// nozoki_evalのTargetMemoryトレイトを実装
impl nozoki_eval::TargetMemory for Memory {
    fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        self.read(addr, size)
    }

    fn write(&self, addr: usize, data: &[u8]) -> Result<()> {
        self.write(addr, data)
    }

    fn is_mapped(&self, addr: usize, size: usize) -> Result<bool> {
        self.is_mapped(addr, size)
    }

    fn is_writable(&self, addr: usize, size: usize) -> Result<bool> {
        self.is_writable(addr, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(start: usize, end: usize, readable: bool) -> MemoryMapping {
        MemoryMapping {
            start,
            end,
            readable,
            writable: true,
            executable: false,
        }
    }

    #[test]
    fn test_parse_maps_line() {
        let m = MemoryMapping::parse_line(
            "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so",
        )
        .unwrap()
        .unwrap();
        assert_eq!(m.start, 0x7f1234567000);
        assert_eq!(m.end, 0x7f1234568000);
        assert!(m.readable && !m.writable && m.executable);

        assert!(MemoryMapping::parse_line("").unwrap().is_none());
        assert!(MemoryMapping::parse_line("zz-10 rw-p").is_err());
    }

    #[test]
    fn test_range_spanning_adjacent_mappings() {
        let maps = vec![
            mapping(0x1000, 0x2000, true),
            mapping(0x2000, 0x3000, true),
            mapping(0x4000, 0x5000, true),
        ];
        assert!(range_is_mapped(&maps, 0x1ff8, 0x10));
        assert!(!range_is_mapped(&maps, 0x2ff8, 0x10));
        assert!(!range_is_mapped(&maps, 0x500, 4));
    }

    #[test]
    fn test_unreadable_mapping_is_not_mapped() {
        let maps = vec![mapping(0x1000, 0x2000, false)];
        assert!(!range_is_mapped(&maps, 0x1000, 4));
    }

    #[test]
    fn test_write_straddling_read_only_page() {
        let mut read_only = mapping(0x2000, 0x3000, true);
        read_only.writable = false;
        let maps = vec![mapping(0x1000, 0x2000, true), read_only];

        assert!(range_is_writable(&maps, 0x1ff0, 0x10));
        assert!(!range_is_writable(&maps, 0x1ffe, 4));
        assert!(range_is_mapped(&maps, 0x1ffe, 4));
    }

    #[test]
    fn test_overflowing_range() {
        let maps = vec![mapping(0x1000, 0x2000, true)];
        assert!(!range_is_mapped(&maps, usize::MAX - 1, 4));
    }
}
