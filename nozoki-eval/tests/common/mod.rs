//! 統合テスト用のモックメモリと呼び出し回数を数えるランタイム

#![allow(dead_code)]

use nozoki_eval::{
    CancellationToken, EvaluationContext, EvaluationResult, FieldInfo, FormatParameters,
    FrameLocal, Result, RuntimeAdapter, StackFrame, TargetMemory, TargetRuntime, TypeInfo, Value,
    ValueFormatOptions, ValueHandle, ValueNode,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BASE: u64 = 0x1000;

pub const X_ADDR: u64 = 0x1000; // i32 = 42
pub const R_ADDR: u64 = 0x1008; // &i32 -> x
pub const R2_ADDR: u64 = 0x1010; // &i32 -> x
pub const Y_ADDR: u64 = 0x1018; // i32 = 42
pub const RY_ADDR: u64 = 0x1020; // &i32 -> y
pub const NULL_REF_ADDR: u64 = 0x1028; // &i32 = null
pub const POINT_ADDR: u64 = 0x1030; // Point { x: 1, y: 2 }
pub const ARR_ADDR: u64 = 0x1040; // [i32; 5] = [10, 11, 12, 13, 14]
pub const PP_ADDR: u64 = 0x1058; // *Point -> point

/// テスト用のメモリ（`BASE` から始まるバイト列）
pub struct MockMemory {
    data: Mutex<Vec<u8>>,
    /// この番地以降は読み取り専用
    read_only_from: Mutex<Option<u64>>,
    /// 立っている間は読み書きがバックエンド障害になる
    faulty: AtomicBool,
}

impl MockMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
            read_only_from: Mutex::new(None),
            faulty: AtomicBool::new(false),
        }
    }

    pub fn set_read_only_from(&self, addr: u64) {
        *self.read_only_from.lock().unwrap() = Some(addr);
    }

    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    fn check_fault(&self, addr: usize) -> anyhow::Result<()> {
        if self.faulty.load(Ordering::SeqCst) {
            anyhow::bail!("I/O error at 0x{:x}", addr);
        }
        Ok(())
    }

    pub fn put(&self, addr: u64, bytes: &[u8]) {
        let start = (addr - BASE) as usize;
        self.data.lock().unwrap()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn get(&self, addr: u64, size: usize) -> Vec<u8> {
        let start = (addr - BASE) as usize;
        self.data.lock().unwrap()[start..start + size].to_vec()
    }

    pub fn get_i32(&self, addr: u64) -> i32 {
        i32::from_le_bytes(self.get(addr, 4).try_into().unwrap())
    }

    fn range(&self, addr: usize, size: usize) -> Option<std::ops::Range<usize>> {
        let start = addr.checked_sub(BASE as usize)?;
        let end = start.checked_add(size)?;
        (end <= self.data.lock().unwrap().len()).then_some(start..end)
    }
}

impl TargetMemory for MockMemory {
    fn read(&self, addr: usize, size: usize) -> anyhow::Result<Vec<u8>> {
        self.check_fault(addr)?;
        let range = self
            .range(addr, size)
            .ok_or_else(|| anyhow::anyhow!("read out of range at 0x{:x}", addr))?;
        Ok(self.data.lock().unwrap()[range].to_vec())
    }

    fn write(&self, addr: usize, bytes: &[u8]) -> anyhow::Result<()> {
        self.check_fault(addr)?;
        let range = self
            .range(addr, bytes.len())
            .ok_or_else(|| anyhow::anyhow!("write out of range at 0x{:x}", addr))?;

        // /proc/pid/mem と同じく、読み取り専用の手前までは書き込んでしまう
        let limit = self
            .read_only_from
            .lock()
            .unwrap()
            .map(|ro| (ro - BASE) as usize)
            .unwrap_or(usize::MAX);
        let end = range.end.min(limit.max(range.start));
        let written = end - range.start;
        self.data.lock().unwrap()[range.start..end].copy_from_slice(&bytes[..written]);
        if written != bytes.len() {
            anyhow::bail!("Partial write to 0x{:x} ({} of {} bytes)", addr, written, bytes.len());
        }
        Ok(())
    }

    fn is_mapped(&self, addr: usize, size: usize) -> anyhow::Result<bool> {
        self.check_fault(addr)?;
        Ok(self.range(addr, size).is_some())
    }

    fn is_writable(&self, addr: usize, size: usize) -> anyhow::Result<bool> {
        self.check_fault(addr)?;
        let Some(range) = self.range(addr, size) else {
            return Ok(false);
        };
        Ok(match *self.read_only_from.lock().unwrap() {
            Some(ro) => range.end <= (ro - BASE) as usize,
            None => true,
        })
    }
}

/// アダプタ呼び出しの回数
#[derive(Default)]
pub struct CallCounts {
    pub load_indirect: AtomicUsize,
    pub store_indirect: AtomicUsize,
    pub load: AtomicUsize,
    pub store: AtomicUsize,
    pub record_value: AtomicUsize,
    pub generation: AtomicUsize,
}

/// 呼び出しを数えながら `TargetRuntime` に委譲するランタイム
pub struct CountingRuntime {
    inner: TargetRuntime<MockMemory>,
    pub calls: CallCounts,
    /// 書き込みが済んだ直後にトークンをキャンセルする
    cancel_after_store: AtomicBool,
}

impl CountingRuntime {
    pub fn new(memory: MockMemory) -> Self {
        Self {
            inner: TargetRuntime::new(memory),
            calls: CallCounts::default(),
            cancel_after_store: AtomicBool::new(false),
        }
    }

    pub fn cancel_after_store(&self) {
        self.cancel_after_store.store(true, Ordering::SeqCst);
    }

    fn after_store(&self, token: &CancellationToken) {
        if self.cancel_after_store.load(Ordering::SeqCst) {
            token.cancel();
        }
    }

    pub fn memory(&self) -> &MockMemory {
        self.inner.memory()
    }

    pub fn recorded_values(&self) -> usize {
        self.inner.recorded_values()
    }

    /// すべての呼び出し回数の合計
    pub fn total_calls(&self) -> usize {
        let c = &self.calls;
        [
            &c.load_indirect,
            &c.store_indirect,
            &c.load,
            &c.store,
            &c.record_value,
            &c.generation,
        ]
        .iter()
        .map(|n| n.load(Ordering::SeqCst))
        .sum()
    }

    pub fn reset_counts(&self) {
        let c = &self.calls;
        for n in [
            &c.load_indirect,
            &c.store_indirect,
            &c.load,
            &c.store,
            &c.record_value,
            &c.generation,
        ] {
            n.store(0, Ordering::SeqCst);
        }
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

impl RuntimeAdapter for CountingRuntime {
    fn load_indirect(&self, cell: &Value, token: &CancellationToken) -> Result<Option<Value>> {
        bump(&self.calls.load_indirect);
        self.inner.load_indirect(cell, token)
    }

    fn store_indirect(&self, cell: &Value, value: &Value, token: &CancellationToken) -> Result<()> {
        bump(&self.calls.store_indirect);
        self.inner.store_indirect(cell, value, token)?;
        self.after_store(token);
        Ok(())
    }

    fn load(
        &self,
        address: u64,
        type_info: &TypeInfo,
        token: &CancellationToken,
    ) -> Result<Option<Value>> {
        bump(&self.calls.load);
        self.inner.load(address, type_info, token)
    }

    fn store(
        &self,
        address: u64,
        type_info: &TypeInfo,
        value: &Value,
        token: &CancellationToken,
    ) -> Result<()> {
        bump(&self.calls.store);
        self.inner.store(address, type_info, value, token)?;
        self.after_store(token);
        Ok(())
    }

    fn record_value(&self, value: Value) -> EvaluationResult {
        bump(&self.calls.record_value);
        self.inner.record_value(value)
    }

    fn resolve(&self, handle: ValueHandle) -> Option<Value> {
        self.inner.resolve(handle)
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        self.inner.values_equal(a, b)
    }

    fn generation(&self) -> u64 {
        bump(&self.calls.generation);
        self.inner.generation()
    }

    fn end_session(&self) -> usize {
        self.inner.end_session()
    }
}

pub fn i32_type() -> TypeInfo {
    TypeInfo::primitive("i32").unwrap()
}

pub fn ref_i32() -> TypeInfo {
    TypeInfo::reference_to(i32_type())
}

pub fn point_type() -> TypeInfo {
    TypeInfo::Struct {
        name: "Point".to_string(),
        size: 8,
        fields: vec![
            FieldInfo::new("x", 0, i32_type()),
            FieldInfo::new("y", 4, i32_type()),
        ],
    }
}

/// 値を配置したメモリとそれを指すローカル変数を持つフレームを作る
pub fn fixture() -> (Arc<CountingRuntime>, StackFrame) {
    let memory = MockMemory::new(0x100);
    memory.put(X_ADDR, &42i32.to_le_bytes());
    memory.put(R_ADDR, &X_ADDR.to_le_bytes());
    memory.put(R2_ADDR, &X_ADDR.to_le_bytes());
    memory.put(Y_ADDR, &42i32.to_le_bytes());
    memory.put(RY_ADDR, &Y_ADDR.to_le_bytes());
    memory.put(POINT_ADDR, &1i32.to_le_bytes());
    memory.put(POINT_ADDR + 4, &2i32.to_le_bytes());
    for i in 0..5u64 {
        memory.put(ARR_ADDR + i * 4, &(10 + i as i32).to_le_bytes());
    }
    memory.put(PP_ADDR, &POINT_ADDR.to_le_bytes());

    let frame = StackFrame {
        pc: 0x401000,
        frame_base: BASE + 0x100,
        locals: vec![
            FrameLocal::new("x", X_ADDR, i32_type()),
            FrameLocal::new("r", R_ADDR, ref_i32()),
            FrameLocal::new("r2", R2_ADDR, ref_i32()),
            FrameLocal::new("y", Y_ADDR, i32_type()),
            FrameLocal::new("ry", RY_ADDR, ref_i32()),
            FrameLocal::new("null_ref", NULL_REF_ADDR, ref_i32()),
            FrameLocal::new("point", POINT_ADDR, point_type()),
            FrameLocal::new("arr", ARR_ADDR, TypeInfo::array_of(i32_type(), 5)),
            FrameLocal::new("pp", PP_ADDR, TypeInfo::pointer_to(point_type())),
        ],
    };

    (Arc::new(CountingRuntime::new(memory)), frame)
}

/// 値フィールドだけを書式化する
pub fn format_value(
    node: &ValueNode,
    ctx: &EvaluationContext,
    frame: &StackFrame,
    options: ValueFormatOptions,
) -> String {
    let mut value = String::new();
    let mut params = FormatParameters::new(options).with_value(&mut value);
    node.format(ctx, frame, &mut params, None, &CancellationToken::new())
        .unwrap();
    value
}
