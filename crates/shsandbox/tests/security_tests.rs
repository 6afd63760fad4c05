//! Policy enforcement tests: command whitelist and path roots
//!
//! Every test builds its own temporary directory tree so path rules are
//! checked against real files.

use pretty_assertions::assert_eq;
use shsandbox::{Error, Policy, Sandbox};
use std::fs;
use tempfile::TempDir;

fn tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("in")).unwrap();
    fs::create_dir(dir.path().join("out")).unwrap();
    fs::write(dir.path().join("in/data.txt"), "alpha\nbeta\n").unwrap();
    fs::write(dir.path().join("secret.txt"), "hunter2\n").unwrap();
    dir
}

fn sandbox(dir: &TempDir) -> Sandbox {
    Sandbox::builder()
        .policy(
            Policy::default_pure()
                .allow_read_root(dir.path().join("in"))
                .allow_write_root(dir.path().join("out")),
        )
        .cwd(dir.path())
        .build()
}

// =============================================================================
// COMMAND WHITELIST
// =============================================================================

#[tokio::test]
async fn test_whitelist_is_exact_match() {
    let sandbox = Sandbox::builder()
        .policy(Policy::new().allow_command("echo"))
        .build();

    for script in ["/bin/echo hi", "ECHO hi", "echo2 hi"] {
        let err = sandbox.source(script).await.unwrap_err();
        assert!(matches!(err, Error::NotInWhitelist(_)), "{}: {}", script, err);
    }
}

#[tokio::test]
async fn test_expanded_command_name_is_checked() {
    let err = Sandbox::new().source("c=rm; $c -rf /").await.unwrap_err();
    assert_eq!(err.to_string(), "command not in whitelist: rm");
}

#[tokio::test]
async fn test_denial_in_pipeline_stage_aborts_run() {
    let err = Sandbox::new()
        .source("a=1; echo x | sh -c 'touch /tmp/pwned'; b=2")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "command not in whitelist: sh");
}

#[tokio::test]
async fn test_denial_inside_compound_commands() {
    for script in [
        "if true; then rm x; fi",
        "while true; do curl x; done",
        "for i in 1; do wget x; done",
        "(nc -l 80)",
        "x=$(( $(python -c 1) + 1 ))",
    ] {
        let err = Sandbox::new().source(script).await.unwrap_err();
        assert!(err.is_policy_violation(), "{}: {}", script, err);
    }
}

#[tokio::test]
async fn test_state_builtins_need_no_whitelist() {
    let sandbox = Sandbox::builder().policy(Policy::new()).build();
    let got = sandbox
        .source("true; false; let 'n = 2 + 2'; x=1; unset x; [ a = a ]; ok=$?")
        .await
        .unwrap();
    assert_eq!(got.scalar("n"), Some("4"));
    assert_eq!(got.scalar("ok"), Some("0"));
    assert!(!got.contains("x"));
}

// =============================================================================
// WRITES AND PROGRAMS HIDDEN IN ARGUMENTS
// =============================================================================

#[tokio::test]
async fn test_env_cannot_launch_programs() {
    for script in ["env touch /tmp/pwned", "env -i sh -c id", "a=$(env)"] {
        let err = Sandbox::new().source(script).await.unwrap_err();
        assert_eq!(err.to_string(), "command not in whitelist: env", "{}", script);
    }
}

#[tokio::test]
async fn test_sort_output_file_needs_write_root() {
    let dir = tree();
    let sandbox = sandbox(&dir);

    for script in [
        "echo x | sort -o ../pwned",
        "echo x | sort -o in/pwned",
        "echo x | sort --output=secret.txt",
        "echo x | sort -T /tmp",
    ] {
        let err = sandbox.source(script).await.unwrap_err();
        assert!(matches!(err, Error::PathDenied(_)), "{}: {}", script, err);
    }
    assert_eq!(fs::read_to_string(dir.path().join("secret.txt")).unwrap(), "hunter2\n");
    assert!(!dir.path().join("in/pwned").exists());

    sandbox.source("echo b a | tr ' ' '\\n' | sort -o out/sorted").await.unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("out/sorted")).unwrap(), "a\nb\n");
}

#[tokio::test]
async fn test_sort_compress_program_is_whitelisted() {
    let err = Sandbox::new()
        .source("echo x | sort --compress-program=sh")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "command not in whitelist: sh");
}

#[tokio::test]
async fn test_sed_write_commands_need_write_root() {
    let dir = tree();
    let sandbox = sandbox(&dir);

    for script in [
        "echo x | sed 'w secret.txt'",
        "echo x | sed -n '/x/w in/copy'",
        "echo x | sed 's/x/y/w /tmp/pwned'",
        "echo x | sed -e p -e 'W ../pwned'",
    ] {
        let err = sandbox.source(script).await.unwrap_err();
        assert!(matches!(err, Error::PathDenied(_)), "{}: {}", script, err);
    }
    assert_eq!(fs::read_to_string(dir.path().join("secret.txt")).unwrap(), "hunter2\n");

    let got = sandbox.source("a=$(echo x | sed 's/x/y/w out/log')").await.unwrap();
    assert_eq!(got.scalar("a"), Some("y"));
    assert_eq!(fs::read_to_string(dir.path().join("out/log")).unwrap(), "y\n");
}

#[tokio::test]
async fn test_sed_execute_forms_are_whitelisted() {
    for script in [
        "echo x | sed 's/x/id -u/e'",
        "echo x | sed '1e touch /tmp/pwned'",
        "echo x | sed -e p -e 'e id'",
    ] {
        let err = Sandbox::new().source(script).await.unwrap_err();
        assert_eq!(err.to_string(), "command not in whitelist: sh", "{}", script);
    }
}

#[tokio::test]
async fn test_sed_script_files_are_refused() {
    let dir = tree();
    fs::write(dir.path().join("in/cmds.sed"), "w /tmp/pwned\n").unwrap();
    let err = sandbox(&dir)
        .source("sed -f in/cmds.sed in/data.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotInWhitelist(_)), "{}", err);
}

#[tokio::test]
async fn test_sed_in_place_needs_write_root() {
    let dir = tree();
    let sandbox = sandbox(&dir);

    for script in ["sed -i s/a/b/ secret.txt", "sed -i.bak s/a/b/ in/data.txt"] {
        let err = sandbox.source(script).await.unwrap_err();
        assert!(matches!(err, Error::PathDenied(_)), "{}: {}", script, err);
    }
    assert_eq!(fs::read_to_string(dir.path().join("secret.txt")).unwrap(), "hunter2\n");
    assert_eq!(
        fs::read_to_string(dir.path().join("in/data.txt")).unwrap(),
        "alpha\nbeta\n"
    );

    fs::write(dir.path().join("out/notes.txt"), "foo\n").unwrap();
    sandbox.source("sed -i s/o/a/g out/notes.txt").await.unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("out/notes.txt")).unwrap(), "faa\n");
}

#[tokio::test]
async fn test_uniq_output_operand_needs_write_root() {
    let dir = tree();
    let err = sandbox(&dir)
        .source("uniq in/data.txt secret.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PathDenied(_)), "{}", err);
}

#[tokio::test]
async fn test_plain_text_filters_still_run() {
    let got = Sandbox::new()
        .source("a=$(echo foo | sed 's/o/a/g'); b=$(printf 'b\\na\\nb\\n' | sort | uniq | wc -l)")
        .await
        .unwrap();
    assert_eq!(got.scalar("a"), Some("faa"));
    assert_eq!(got.scalar("b"), Some("2"));
}

// =============================================================================
// PATH ROOTS
// =============================================================================

#[tokio::test]
async fn test_read_root_allows_input_redirect() {
    let dir = tree();
    let got = sandbox(&dir)
        .source("first=$(head -n 1 <in/data.txt)")
        .await
        .unwrap();
    assert_eq!(got.scalar("first"), Some("alpha"));
}

#[tokio::test]
async fn test_read_root_does_not_grant_writes() {
    let dir = tree();
    let err = sandbox(&dir)
        .source("echo x >in/data.txt")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot open path: \"in/data.txt\"");
    assert_eq!(
        fs::read_to_string(dir.path().join("in/data.txt")).unwrap(),
        "alpha\nbeta\n"
    );
}

#[tokio::test]
async fn test_write_root_allows_truncate_and_append() {
    let dir = tree();
    sandbox(&dir)
        .source("echo one >out/log; echo two >>out/log; sort -r <out/log >out/sorted")
        .await
        .unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("out/log")).unwrap(),
        "one\ntwo\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("out/sorted")).unwrap(),
        "two\none\n"
    );
}

#[tokio::test]
async fn test_outside_roots_is_denied() {
    let dir = tree();
    let err = sandbox(&dir)
        .source("s=$(cat <secret.txt)")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot open path: \"secret.txt\"");
}

#[tokio::test]
async fn test_parent_traversal_is_denied() {
    let dir = tree();
    let err = sandbox(&dir)
        .source("echo pwned >out/../escape.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PathDenied(ref p) if p == "out/../escape.txt"));
    assert!(!dir.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_traversal_that_stays_inside_is_allowed() {
    let dir = tree();
    sandbox(&dir)
        .source("echo ok >out/../out/kept.txt")
        .await
        .unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("out/kept.txt")).unwrap(),
        "ok\n"
    );
}

#[tokio::test]
async fn test_dev_null_needs_no_root() {
    let sandbox = Sandbox::builder()
        .policy(Policy::new().allow_command("echo").allow_command("cat"))
        .build();
    let got = sandbox
        .source("echo gone >/dev/null 2>/dev/null; empty=$(cat </dev/null); s=$?")
        .await
        .unwrap();
    assert_eq!(got.scalar("empty"), Some(""));
    assert_eq!(got.scalar("s"), Some("0"));
}

#[tokio::test]
async fn test_expanded_redirect_target_is_checked() {
    let dir = tree();
    let err = sandbox(&dir)
        .source("f=secret.txt; x=$(cat <$f)")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot open path: \"secret.txt\"");
}

#[tokio::test]
async fn test_file_tests_respect_read_roots() {
    let dir = tree();
    let sandbox = sandbox(&dir);

    let got = sandbox
        .source("[ -f in/data.txt ]; f=$?; test -d out; d=$?; [ -e in/missing ]; m=$?")
        .await
        .unwrap();
    assert_eq!(got.scalar("f"), Some("0"));
    assert_eq!(got.scalar("d"), Some("0"));
    assert_eq!(got.scalar("m"), Some("1"));

    let err = sandbox.source("[ -e secret.txt ]").await.unwrap_err();
    assert!(matches!(err, Error::PathDenied(ref p) if p == "secret.txt"));
}

#[tokio::test]
async fn test_cd_changes_where_relative_paths_resolve() {
    let dir = tree();
    let sandbox = sandbox(&dir);

    let got = sandbox
        .source("cd out; echo here >note; n=$(cat <note)")
        .await
        .unwrap();
    assert_eq!(got.scalar("n"), Some("here"));

    let err = sandbox.source("cd /etc").await.unwrap_err();
    assert!(matches!(err, Error::PathDenied(ref p) if p == "/etc"));
}

#[tokio::test]
async fn test_subshell_cd_does_not_leak() {
    let dir = tree();
    let got = sandbox(&dir)
        .source("(cd in); echo kept >out/x; v=$(cat <out/x)")
        .await
        .unwrap();
    assert_eq!(got.scalar("v"), Some("kept"));
}

// =============================================================================
// SYMLINKS
// =============================================================================

#[cfg(unix)]
fn linked_tree() -> TempDir {
    let dir = tree();
    std::os::unix::fs::symlink(dir.path(), dir.path().join("out/escape")).unwrap();
    std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("out/dangling")).unwrap();
    dir
}

#[cfg(unix)]
#[tokio::test]
async fn test_lexical_roots_follow_links_by_default() {
    let dir = linked_tree();
    sandbox(&dir)
        .source("echo overwritten >out/escape/secret.txt")
        .await
        .unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("secret.txt")).unwrap(),
        "overwritten\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_resolved_roots_refuse_links_out() {
    let dir = linked_tree();
    let sandbox = Sandbox::builder()
        .policy(
            Policy::default_pure()
                .allow_read_root(dir.path().join("in"))
                .allow_write_root(dir.path().join("out"))
                .resolve_symlinks(true),
        )
        .cwd(dir.path())
        .build();

    for script in [
        "echo x >out/escape/secret.txt",
        "echo x >out/dangling",
        "v=$(cat <out/escape/secret.txt)",
        "echo x | sort -o out/escape/sorted",
    ] {
        let err = sandbox.source(script).await.unwrap_err();
        assert!(matches!(err, Error::PathDenied(_)), "{}: {}", script, err);
    }
    assert_eq!(fs::read_to_string(dir.path().join("secret.txt")).unwrap(), "hunter2\n");
    assert!(!dir.path().join("gone").exists());

    let got = sandbox
        .source("echo fine >out/new.txt; v=$(cat <out/new.txt); w=$(cat <in/data.txt)")
        .await
        .unwrap();
    assert_eq!(got.scalar("v"), Some("fine"));
    assert_eq!(got.scalar("w"), Some("alpha\nbeta"));
}
