//! アタッチ中のデバッグ対象に対するインスペクションセッション

use anyhow::Result;
use nozoki_eval::parse::parse_frame_address;
use nozoki_eval::{
    AssignmentFlags, CancellationToken, ChildOptions, EvaluationContext, EvaluationOptions,
    FormatParameters, FrameLocal, InspectConfig, Inspector, StackFrame, TargetRuntime, TypeInfo,
    ValueFormatOptions, ValueNode,
};
use nozoki_target::{Memory, Process, Registers};
use std::sync::Arc;
use tracing::debug;

/// 登録されたローカル変数（アドレスはフレームベース相対でもよい）
struct LocalSpec {
    name: String,
    type_info: TypeInfo,
    address: String,
}

/// インスペクションセッション
pub struct Session {
    process: Process,
    registers: Registers,
    inspector: Inspector,
    ctx: EvaluationContext,
    frame: StackFrame,
    locals: Vec<LocalSpec>,
}

impl Session {
    /// プロセスにアタッチしてセッションを開始する
    pub fn attach(pid: i32, config: InspectConfig) -> Result<Self> {
        let process = Process::attach(pid)?;
        let registers = Registers::new(pid);
        let runtime = Arc::new(TargetRuntime::new(Memory::new(pid)));

        let mut session = Self {
            process,
            registers,
            inspector: Inspector::new(runtime),
            ctx: EvaluationContext::new(config),
            frame: StackFrame::default(),
            locals: Vec::new(),
        };
        session.reload_frame()?;
        Ok(session)
    }

    /// アタッチ中のプロセスID
    pub fn pid(&self) -> i32 {
        self.process.pid()
    }

    /// 現在のフレーム
    pub fn frame(&self) -> &StackFrame {
        &self.frame
    }

    /// レジスタを読み直してフレームを作り直す
    fn reload_frame(&mut self) -> Result<()> {
        let pc = self.registers.get_pc()?;
        let frame_base = self.registers.get_frame_base()?;

        let mut locals = Vec::with_capacity(self.locals.len());
        for spec in &self.locals {
            let address = parse_frame_address(&spec.address, frame_base)?;
            locals.push(FrameLocal::new(&spec.name, address, spec.type_info.clone()));
        }

        debug!("frame reloaded: pc=0x{:x} fb=0x{:x}", pc, frame_base);
        self.frame = StackFrame {
            pc,
            frame_base,
            locals,
        };
        Ok(())
    }

    /// ローカル変数を登録する
    pub fn add_local(&mut self, name: &str, type_info: TypeInfo, address: &str) -> Result<()> {
        let resolved = parse_frame_address(address, self.frame.frame_base)?;
        println!("{}: {} @ 0x{:x}", name, type_info.name(), resolved);

        self.frame
            .locals
            .push(FrameLocal::new(name, resolved, type_info.clone()));
        self.locals.push(LocalSpec {
            name: name.to_string(),
            type_info,
            address: address.to_string(),
        });
        Ok(())
    }

    /// ローカル変数を一覧表示する
    pub fn print_locals(&self) -> Result<()> {
        if self.frame.locals.is_empty() {
            println!("No locals registered (use 'local <name> <type> <addr>')");
            return Ok(());
        }

        let token = CancellationToken::new();
        for node in self.inspector.locals(&self.ctx, &self.frame, &token)? {
            println!("  {}", self.describe(&node, ValueFormatOptions::empty(), &token)?);
        }
        Ok(())
    }

    /// 式の値を表示する
    pub fn print(&self, expression: &str, hex: bool) -> Result<()> {
        let token = CancellationToken::new();
        let node = self
            .inspector
            .watch(&self.ctx, &self.frame, expression, &token)?;

        let options = if hex {
            ValueFormatOptions::HEX
        } else {
            ValueFormatOptions::DIGIT_SEPARATORS
        };
        println!("{}", self.describe(&node, options, &token)?);
        Ok(())
    }

    /// 子要素を表示する
    pub fn print_children(&self, expression: &str, index: u64, count: Option<usize>) -> Result<()> {
        let token = CancellationToken::new();
        let mut node = self
            .inspector
            .watch(&self.ctx, &self.frame, expression, &token)?;

        let total = node.get_child_count(&self.ctx, &self.frame, &token)?;
        let count = count.unwrap_or(self.ctx.config.children_page_size);
        let children = node.get_children(
            &self.ctx,
            &self.frame,
            index,
            count,
            ChildOptions::empty(),
            &token,
        )?;

        if children.is_empty() {
            println!("No children (total: {})", total);
            return Ok(());
        }
        for child in &children {
            println!(
                "  {}",
                self.describe(child, ValueFormatOptions::empty(), &token)?
            );
        }
        println!(
            "({}..{} of {})",
            index,
            index + children.len() as u64,
            total
        );
        Ok(())
    }

    /// 代入する
    pub fn set(&self, target: &str, value: &str) -> Result<()> {
        let token = CancellationToken::new();
        let mut node = self.inspector.watch(&self.ctx, &self.frame, target, &token)?;

        let result = node.assign(
            &self.ctx,
            &self.frame,
            value,
            EvaluationOptions::empty(),
            &token,
        )?;
        if let Some(error) = result.error_message() {
            println!("Error: {}", error);
            return Ok(());
        }

        let flags = result.flags();
        if !flags.contains(AssignmentFlags::VALUE_CHANGED) {
            println!("(value unchanged)");
        }
        if flags.contains(AssignmentFlags::TYPE_CHANGED) {
            println!("(converted to {})", node.type_info().name());
        }
        println!("{}", self.describe(&node, ValueFormatOptions::empty(), &token)?);
        Ok(())
    }

    /// 評価セッションを終了してフレームを読み直す
    pub fn refresh(&mut self) -> Result<()> {
        let released = self.inspector.end_session();
        self.reload_frame()?;
        println!(
            "Session refreshed ({} values released), pc=0x{:x}",
            released, self.frame.pc
        );
        Ok(())
    }

    /// ノードを1行で表示する
    fn describe(
        &self,
        node: &ValueNode,
        options: ValueFormatOptions,
        token: &CancellationToken,
    ) -> Result<String> {
        let mut name = String::new();
        let mut type_name = String::new();
        let mut value = String::new();
        let mut params = FormatParameters::new(options)
            .with_name(&mut name)
            .with_type(&mut type_name)
            .with_value(&mut value);
        node.format(&self.ctx, &self.frame, &mut params, None, token)?;

        if node.error_message().is_some() {
            return Ok(format!("{} = <error: {}>", name, value));
        }
        Ok(format!("{}: {} = {}", name, type_name, value))
    }
}
