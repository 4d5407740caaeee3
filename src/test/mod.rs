//! End-to-end tests against the public `execute`/`LuaVM` surface (spec §8
//! "Testable properties" — invariants and scenarios S1-S6).

use crate::lua_vm::{LuaVM, Status, MULTRET};
use crate::{execute, Value};

fn number_at(v: &Value) -> f64 {
    v.as_number().unwrap_or_else(|| panic!("expected a number, got {v:?}"))
}

#[test]
fn s1_constant_folded_arithmetic() {
    let results = execute("return 1 + 2 * 3").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(number_at(&results[0]), 7.0);
}

#[test]
fn s2_short_circuit_skips_rhs_call() {
    let results = execute(
        r#"
        local function f() error("boom") end
        return false and f()
        "#,
    )
    .unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Value::Boolean(false)));
}

#[test]
fn s3_table_array_promotion() {
    let results = execute(
        r#"
        local t = {}
        t[2] = "b"
        t[1] = "a"
        return #t, t[1], t[2]
        "#,
    )
    .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(number_at(&results[0]), 2.0);
    assert!(matches!(results[1], Value::Str(_)));
    assert!(matches!(results[2], Value::Str(_)));
}

#[test]
fn s4_multiple_assignment_pads_with_nil() {
    let results = execute("local a,b,c = 1,2; return a,b,c").unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(number_at(&results[0]), 1.0);
    assert_eq!(number_at(&results[1]), 2.0);
    assert!(results[2].is_nil());
}

#[test]
fn s5_interned_strings_compare_equal() {
    let results = execute(r#"local s = "hello"; local t = "he".."llo"; return s == t"#).unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Value::Boolean(true)));
}

#[test]
fn s6_protected_call_reports_index_error() {
    let mut vm = LuaVM::new();
    vm.load("local t = nil; return t.x", "=(test)").unwrap();
    let status = vm.pcall(0, 0);
    assert_eq!(status, Status::Runtime);

    let top = vm.get_top();
    assert_eq!(top, 1);
    let message = match vm.value_at(1) {
        Value::Str(handle) => vm.store.string_at(handle).as_str().to_string(),
        other => panic!("expected a string error message, got {other:?}"),
    };
    assert!(message.contains("attempt to index"), "message was: {message}");
    assert!(message.contains("nil value"), "message was: {message}");
}

#[test]
fn invariant_pcall_ok_leaves_only_declared_returns() {
    let mut vm = LuaVM::new();
    vm.load("return 1, 2", "=(test)").unwrap();
    let status = vm.pcall(0, MULTRET);
    assert_eq!(status, Status::Ok);
    assert_eq!(vm.get_top(), 2);
}

#[test]
fn invariant_table_set_unset_roundtrip() {
    let results = execute(
        r#"
        local t = {}
        t.x = 5
        local before = t.x
        t.x = nil
        return before, t.x
        "#,
    )
    .unwrap();
    assert_eq!(number_at(&results[0]), 5.0);
    assert!(results[1].is_nil());
}

#[test]
fn runtime_error_attributes_named_local() {
    let mut vm = LuaVM::new();
    vm.load("local x = nil; return x + 1", "=(test)").unwrap();
    let status = vm.pcall(0, 0);
    assert_eq!(status, Status::Runtime);
    let message = match vm.value_at(1) {
        Value::Str(handle) => vm.store.string_at(handle).as_str().to_string(),
        other => panic!("expected a string error message, got {other:?}"),
    };
    assert!(message.contains("'x'"), "message was: {message}");
}

#[test]
fn numeric_for_loop_sums_range() {
    let results = execute(
        r#"
        local sum = 0
        for i = 1, 5 do
            sum = sum + i
        end
        return sum
        "#,
    )
    .unwrap();
    assert_eq!(number_at(&results[0]), 15.0);
}

#[test]
fn host_c_function_round_trip() {
    fn double(vm: &mut LuaVM) -> Result<i32, crate::LuaError> {
        let n = vm.to_number(1).unwrap_or(0.0);
        vm.pop(vm.get_top() as usize);
        vm.push_number(n * 2.0);
        Ok(1)
    }

    let mut vm = LuaVM::new();
    vm.push_cfunction(double);
    let func_value = vm.value_at(-1);
    vm.pop(1);
    vm.set_global("double", func_value).unwrap();

    vm.load("return double(21)", "=(test)").unwrap();
    let results = vm.call(0, MULTRET).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(number_at(&results[0]), 42.0);
}

#[test]
fn literal_comparisons_fold_to_booleans() {
    let results = execute(
        r#"
        return 1 < 2, 2 < 1, 3 == 3, 3 ~= 3, "abc" < "abd", "abc" == "abc"
        "#,
    )
    .unwrap();
    assert_eq!(results.len(), 6);
    assert!(matches!(results[0], Value::Boolean(true)));
    assert!(matches!(results[1], Value::Boolean(false)));
    assert!(matches!(results[2], Value::Boolean(true)));
    assert!(matches!(results[3], Value::Boolean(false)));
    assert!(matches!(results[4], Value::Boolean(true)));
    assert!(matches!(results[5], Value::Boolean(true)));
}

#[test]
fn if_runs_body_only_when_condition_is_true() {
    let results = execute(
        r#"
        local x = 1
        local y = 10
        if x < y then
            return 1
        else
            return 2
        end
        "#,
    )
    .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(number_at(&results[0]), 1.0);
}

#[test]
fn while_loop_terminates_and_counts_correctly() {
    let results = execute(
        r#"
        local i = 0
        local n = 0
        while i < 5 do
            n = n + 1
            i = i + 1
        end
        return n
        "#,
    )
    .unwrap();
    assert_eq!(number_at(&results[0]), 5.0);
}

#[test]
fn repeat_until_runs_body_at_least_once_and_stops_on_true() {
    let results = execute(
        r#"
        local i = 0
        repeat
            i = i + 1
        until i >= 3
        return i
        "#,
    )
    .unwrap();
    assert_eq!(number_at(&results[0]), 3.0);
}

#[test]
fn or_short_circuits_on_true_left_operand() {
    let results = execute(
        r#"
        local function f() error("boom") end
        return true or f()
        "#,
    )
    .unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Value::Boolean(true)));
}
