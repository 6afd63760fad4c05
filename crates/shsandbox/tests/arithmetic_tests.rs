//! Arithmetic evaluation: property tests against native i64 semantics and
//! end-to-end checks through `$(( ))`

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use shsandbox::{Environment, Error, atoi, eval_arith, parse_arithmetic, source};

fn eval_with(env: &mut Environment, src: &str) -> Result<i64, Error> {
    let expr = parse_arithmetic(src)?;
    eval_arith(&expr, env)
}

fn eval_ab(src: &str, a: i64, b: i64) -> Result<i64, Error> {
    let mut env = Environment::new();
    env.set("a", a.to_string());
    env.set("b", b.to_string());
    eval_with(&mut env, src)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn wrapping_ring_ops(a: i64, b: i64) {
        prop_assert_eq!(eval_ab("a + b", a, b).unwrap(), a.wrapping_add(b));
        prop_assert_eq!(eval_ab("a - b", a, b).unwrap(), a.wrapping_sub(b));
        prop_assert_eq!(eval_ab("a * b", a, b).unwrap(), a.wrapping_mul(b));
    }

    #[test]
    fn division_truncates_toward_zero(a: i64, b in any::<i64>().prop_filter("nonzero", |b| *b != 0)) {
        prop_assert_eq!(eval_ab("a / b", a, b).unwrap(), a.wrapping_div(b));
        prop_assert_eq!(eval_ab("a % b", a, b).unwrap(), a.wrapping_rem(b));
    }

    #[test]
    fn bitwise_and_comparison(a: i64, b: i64) {
        prop_assert_eq!(eval_ab("a & b", a, b).unwrap(), a & b);
        prop_assert_eq!(eval_ab("a | b", a, b).unwrap(), a | b);
        prop_assert_eq!(eval_ab("a ^ b", a, b).unwrap(), a ^ b);
        prop_assert_eq!(eval_ab("a < b", a, b).unwrap(), (a < b) as i64);
        prop_assert_eq!(eval_ab("a >= b", a, b).unwrap(), (a >= b) as i64);
        prop_assert_eq!(eval_ab("a == b", a, b).unwrap(), (a == b) as i64);
    }

    #[test]
    fn shifts_in_range(a: i64, s in 0i64..64) {
        prop_assert_eq!(eval_ab("a << b", a, s).unwrap(), a << s);
        prop_assert_eq!(eval_ab("a >> b", a, s).unwrap(), a >> s);
    }

    #[test]
    fn small_powers(base in -20i64..20, exp in 0u32..12) {
        prop_assert_eq!(
            eval_ab("a ** b", base, exp as i64).unwrap(),
            base.wrapping_pow(exp)
        );
    }

    #[test]
    fn logical_ops_are_boolean(a: i64, b: i64) {
        prop_assert_eq!(eval_ab("a && b", a, b).unwrap(), (a != 0 && b != 0) as i64);
        prop_assert_eq!(eval_ab("a || b", a, b).unwrap(), (a != 0 || b != 0) as i64);
        prop_assert_eq!(eval_ab("!a", a, b).unwrap(), (a == 0) as i64);
    }

    #[test]
    fn atoi_accepts_every_decimal(n: i64) {
        prop_assert_eq!(atoi(&n.to_string()), n);
    }

    #[test]
    fn atoi_never_panics(s in "\\PC*") {
        let _ = atoi(&s);
    }

    #[test]
    fn compound_assignment_matches_binary(a: i64, b in 1i64..1000) {
        let mut env = Environment::new();
        env.set("a", a.to_string());
        env.set("b", b.to_string());
        let value = eval_with(&mut env, "a *= b").unwrap();
        prop_assert_eq!(value, a.wrapping_mul(b));
        prop_assert_eq!(env.get("a"), a.wrapping_mul(b).to_string());
    }
}

// =============================================================================
// EDGE CASES
// =============================================================================

#[test]
fn test_min_over_minus_one_wraps() {
    assert_eq!(eval_ab("a / b", i64::MIN, -1).unwrap(), i64::MIN);
    assert_eq!(eval_ab("a % b", i64::MIN, -1).unwrap(), 0);
}

#[test]
fn test_division_by_zero_is_an_arithmetic_error() {
    for src in ["a / b", "a % b", "a /= b", "a %= b"] {
        let err = eval_ab(src, 7, 0).unwrap_err();
        assert!(matches!(err, Error::Arithmetic(_)), "{}: {}", src, err);
        assert!(!err.is_internal());
    }
}

#[test]
fn test_short_circuit_skips_side_effects() {
    let mut env = Environment::new();
    assert_eq!(eval_with(&mut env, "0 && (x = 1)").unwrap(), 0);
    assert_eq!(eval_with(&mut env, "1 || (y = 1)").unwrap(), 1);
    assert_eq!(eval_with(&mut env, "1 ? (p = 5) : (q = 6)").unwrap(), 5);
    assert!(!env.is_set("x"));
    assert!(!env.is_set("y"));
    assert!(!env.is_set("q"));
    assert_eq!(env.get("p"), "5");
}

#[test]
fn test_indirection_and_cycles() {
    let mut env = Environment::new();
    env.set("a", "b");
    env.set("b", "c");
    env.set("c", "41");
    assert_eq!(eval_with(&mut env, "a + 1").unwrap(), 42);

    env.set("x", "y");
    env.set("y", "x");
    assert_eq!(eval_with(&mut env, "x").unwrap(), 0);
}

#[test]
fn test_non_numeric_values_are_zero() {
    let mut env = Environment::new();
    env.set("hex", "0x10");
    env.set("text", "12abc");
    env.set("empty", "");
    assert_eq!(eval_with(&mut env, "hex + text + empty + unset").unwrap(), 0);
}

#[test]
fn test_increment_forms() {
    let mut env = Environment::new();
    assert_eq!(eval_with(&mut env, "i++").unwrap(), 0);
    assert_eq!(eval_with(&mut env, "++i").unwrap(), 2);
    assert_eq!(eval_with(&mut env, "i--").unwrap(), 2);
    assert_eq!(eval_with(&mut env, "--i").unwrap(), 0);
    assert_eq!(env.get("i"), "0");
}

// =============================================================================
// THROUGH THE ENGINE
// =============================================================================

#[tokio::test]
async fn test_expansion_inside_expression() {
    let got = source("n=3; arr=(10 20 30); r=$(( arr[n - 1] * $(echo 2) + ${#arr[@]} ))")
        .await
        .unwrap();
    assert_eq!(got.scalar("r"), Some("63"));
}

#[tokio::test]
async fn test_arith_command_status() {
    let got = source("(( 0 )); zero=$?; (( 5 > 2 )); five=$?").await.unwrap();
    assert_eq!(got.scalar("zero"), Some("1"));
    assert_eq!(got.scalar("five"), Some("0"));
}

#[tokio::test]
async fn test_let_status_and_no_args() {
    let got = source("let 'x = 0'; s0=$?; let 'x = 3'; s1=$?; let; s2=$?")
        .await
        .unwrap();
    assert_eq!(got.scalar("x"), Some("3"));
    assert_eq!(got.scalar("s0"), Some("1"));
    assert_eq!(got.scalar("s1"), Some("0"));
    assert_eq!(got.scalar("s2"), Some("2"));
}
