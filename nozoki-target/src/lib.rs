//! Nozoki ターゲットプロセス制御
//!
//! このクレートは、停止中のデバッグ対象プロセスにアクセスするための低レベル機能を提供します。
//! ptraceによるアタッチ、レジスタの読み取り、メモリの読み書きを行います。

pub mod memory;
pub mod process;
pub mod registers;

pub use memory::{Memory, MemoryMapping};
pub use process::Process;
pub use registers::Registers;

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
