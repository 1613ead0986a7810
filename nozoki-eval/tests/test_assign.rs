//! 代入の統合テスト

mod common;

use common::*;
use nozoki_eval::errors::{ERR_CANNOT_ASSIGN, ERR_READ_ONLY};
use nozoki_eval::{
    AssignmentFlags, CancellationToken, ChildOptions, EvaluationContext, EvaluationOptions,
    EvalError, FrameLocal, Inspector, RuntimeAdapter, StackFrame, TypeInfo, ValueFormatOptions,
    ValueNode,
};
use std::sync::Arc;

struct Env {
    counting: Arc<CountingRuntime>,
    frame: StackFrame,
    inspector: Inspector,
    ctx: EvaluationContext,
    token: CancellationToken,
}

impl Env {
    fn new() -> Self {
        let (counting, frame) = fixture();
        let rt: Arc<dyn RuntimeAdapter> = counting.clone();
        Self {
            counting,
            frame,
            inspector: Inspector::new(rt),
            ctx: EvaluationContext::default(),
            token: CancellationToken::new(),
        }
    }

    fn watch(&self, expr: &str) -> ValueNode {
        self.inspector
            .watch(&self.ctx, &self.frame, expr, &self.token)
            .unwrap()
    }

    fn assign(&self, node: &mut ValueNode, expr: &str) -> nozoki_eval::AssignmentResult {
        node.assign(
            &self.ctx,
            &self.frame,
            expr,
            EvaluationOptions::empty(),
            &self.token,
        )
        .unwrap()
    }
}

#[test]
fn test_invalid_expression_leaves_value_unchanged() {
    let env = Env::new();
    let mut x = env.watch("x");

    for expr in ["1 +", "", "(x", "x..y"] {
        let result = env.assign(&mut x, expr);
        assert!(!result.is_success(), "{}", expr);
        assert!(!result.error_message().unwrap().is_empty());
        assert!(result.flags().contains(AssignmentFlags::COMPILER_ERROR));
    }

    let result = env.assign(&mut x, "missing");
    assert_eq!(result.error_message(), Some("Variable 'missing' not found"));

    assert_eq!(env.counting.memory().get_i32(X_ADDR), 42);
    assert_eq!(
        format_value(&x, &env.ctx, &env.frame, ValueFormatOptions::empty()),
        "42"
    );
}

#[test]
fn test_assign_literal_converts_and_refreshes() {
    let env = Env::new();
    let mut x = env.watch("x");

    let result = env.assign(&mut x, "100");
    assert!(result.is_success());
    assert!(result.flags().contains(AssignmentFlags::VALUE_CHANGED));
    // リテラルは代入先の型で書き込まれる
    assert!(!result.flags().contains(AssignmentFlags::TYPE_CHANGED));
    assert!(!result.flags().contains(AssignmentFlags::EXECUTED_CODE));

    assert_eq!(env.counting.memory().get_i32(X_ADDR), 100);
    assert_eq!(
        format_value(&x, &env.ctx, &env.frame, ValueFormatOptions::empty()),
        "100"
    );
}

#[test]
fn test_assign_typed_value_of_other_type() {
    let mut env = Env::new();
    let wide_addr = PP_ADDR + 8;
    env.counting.memory().put(wide_addr, &7i64.to_le_bytes());
    env.frame.locals.push(FrameLocal::new(
        "wide",
        wide_addr,
        TypeInfo::primitive("i64").unwrap(),
    ));
    let mut x = env.watch("x");

    let result = env.assign(&mut x, "wide");
    assert!(result.is_success());
    assert!(result.flags().contains(AssignmentFlags::TYPE_CHANGED));
    assert!(result.flags().contains(AssignmentFlags::VALUE_CHANGED));
    assert_eq!(x.type_info().name(), "i32");
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 7);
}

#[test]
fn test_assign_same_value_and_same_type() {
    let env = Env::new();
    let mut x = env.watch("x");

    // y も i32 の 42
    let result = env.assign(&mut x, "y");
    assert!(result.is_success());
    assert!(result.flags().is_empty());
}

#[test]
fn test_exact_type_rejects_conversion() {
    let env = Env::new();
    let mut x = env.watch("x");

    let result = x
        .assign(
            &env.ctx,
            &env.frame,
            "7",
            EvaluationOptions::EXACT_TYPE,
            &env.token,
        )
        .unwrap();
    assert_eq!(
        result.error_message(),
        Some("Type mismatch: expected 'i32', found 'i64'")
    );
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 42);
}

#[test]
fn test_out_of_range_is_structured_failure() {
    let env = Env::new();
    let mut x = env.watch("x");

    let result = env.assign(&mut x, "5000000000");
    assert_eq!(
        result.error_message(),
        Some("Value 5000000000 does not fit in 'i32'")
    );
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 42);
}

#[test]
fn test_assign_through_reference() {
    let env = Env::new();
    let mut target = env.watch("*r");

    let result = env.assign(&mut target, "-3");
    assert!(result.is_success());
    assert_eq!(env.counting.memory().get_i32(X_ADDR), -3);
}

#[test]
fn test_assign_struct_field_child() {
    let env = Env::new();
    let mut point = env.watch("point");
    let mut fields = point
        .get_children(&env.ctx, &env.frame, 0, 2, ChildOptions::empty(), &env.token)
        .unwrap();

    let result = env.assign(&mut fields[1], "arr[4]");
    assert!(result.is_success());
    assert_eq!(env.counting.memory().get_i32(POINT_ADDR + 4), 14);
    assert_eq!(env.counting.memory().get_i32(POINT_ADDR), 1);
}

#[test]
fn test_assign_without_refresh_keeps_snapshot() {
    let env = Env::new();
    let mut x = env.watch("x");

    let result = x
        .assign(
            &env.ctx,
            &env.frame,
            "8",
            EvaluationOptions::NO_REFRESH,
            &env.token,
        )
        .unwrap();
    assert!(result.flags().contains(AssignmentFlags::VALUE_CHANGED));
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 8);
    assert_eq!(
        format_value(&x, &env.ctx, &env.frame, ValueFormatOptions::empty()),
        "42"
    );
}

#[test]
fn test_read_only_and_error_nodes() {
    let env = Env::new();

    let mut literal = env.watch("42");
    assert!(literal.is_read_only());
    assert_eq!(env.assign(&mut literal, "1").error_message(), Some(ERR_READ_ONLY));

    let mut error = env.watch("*null_ref");
    assert_eq!(
        env.assign(&mut error, "1").error_message(),
        Some(ERR_CANNOT_ASSIGN)
    );
}

#[test]
fn test_cancelled_assignment_writes_nothing() {
    let env = Env::new();
    let mut x = env.watch("x");

    let token = CancellationToken::new();
    token.cancel();
    let err = x
        .assign(&env.ctx, &env.frame, "1", EvaluationOptions::empty(), &token)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 42);
}

#[test]
fn test_cancel_after_store_still_succeeds() {
    let env = Env::new();
    let mut x = env.watch("x");
    env.counting.cancel_after_store();

    let token = CancellationToken::new();
    let result = x
        .assign(&env.ctx, &env.frame, "100", EvaluationOptions::empty(), &token)
        .unwrap();
    assert!(token.is_cancelled());
    assert!(result.is_success());
    assert!(result.flags().contains(AssignmentFlags::VALUE_CHANGED));

    // 書き込み後の値がノードにも反映されている
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 100);
    assert_eq!(
        format_value(&x, &env.ctx, &env.frame, ValueFormatOptions::empty()),
        "100"
    );
}

#[test]
fn test_read_only_memory_is_structured_failure() {
    let env = Env::new();
    let mut x = env.watch("x");
    // x の途中から読み取り専用
    env.counting.memory().set_read_only_from(X_ADDR + 2);

    let result = env.assign(&mut x, "-1");
    assert_eq!(
        result.error_message(),
        Some("Target memory is not writable at 0x1000")
    );
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 42);
}

#[test]
fn test_backend_fault_propagates_from_assign() {
    let env = Env::new();
    let mut x = env.watch("x");
    env.counting.memory().set_faulty(true);

    let err = x
        .assign(&env.ctx, &env.frame, "1", EvaluationOptions::empty(), &env.token)
        .unwrap_err();
    assert!(matches!(err, EvalError::Adapter(_)), "{:?}", err);
    assert!(err.structured_message().is_none());

    env.counting.memory().set_faulty(false);
    assert_eq!(env.counting.memory().get_i32(X_ADDR), 42);
}
