//! End-to-end scenarios against the built `bf` binary.
//!
//! Every test spawns the real binary so the whole pipeline runs: parse,
//! optimize, emit, map, guard-paged tape, execute, and (where asked) the
//! sampling profiler. Console-facing behavior can only be observed here,
//! since the emitted code writes straight to the process's file descriptors.

use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const HELLO_WORLD: &str = "++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";

fn bf() -> Command {
    Command::new(env!("CARGO_BIN_EXE_bf"))
}

fn write_program(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("bfjit-e2e-{}-{name}.b", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

fn run(args: &[&str], program: &Path, input: &[u8]) -> Output {
    let mut child = bf()
        .args(args)
        .arg(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.as_mut().unwrap().write_all(input).unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn hello_world_prints_the_sentinel() {
    let program = write_program("hello", HELLO_WORLD);
    let out = run(&[], &program, b"");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"Hello World!\n");
}

#[test]
fn optimization_and_unsafe_mode_do_not_change_output() {
    let program = write_program("hello-variants", HELLO_WORLD);
    let baseline = run(&[], &program, b"");
    let unoptimized = run(&["--no-optimize"], &program, b"");
    let unchecked = run(&["--unsafe"], &program, b"");

    assert!(baseline.status.success());
    assert!(unoptimized.status.success());
    assert!(unchecked.status.success());
    assert_eq!(baseline.stdout, unoptimized.stdout);
    assert_eq!(baseline.stdout, unchecked.stdout);
}

#[test]
fn echo_copies_stdin_until_eof() {
    let program = write_program("echo", ",[.,]");
    let out = run(&[], &program, b"ab\n");
    assert!(out.status.success());
    assert_eq!(out.stdout, b"ab\n");
}

#[test]
fn clear_loop_is_silent_and_succeeds() {
    let program = write_program("clear", "+++++[-]");
    let out = run(&[], &program, b"");
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
fn empty_and_comment_only_programs_are_no_ops() {
    let empty = write_program("empty", "");
    let out = run(&[], &empty, b"");
    assert!(out.status.success());
    assert!(out.stdout.is_empty());

    let comments = write_program("comments", "just words\nand punctuation!?\n");
    let out = run(&[], &comments, b"");
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
fn stepping_onto_the_guard_page_is_a_fatal_fault() {
    // With the cursor starting at offset 0, a single step left lands on the
    // leading guard page. The safe-mode probe must fault, not return.
    let program = write_program("guard", "<");
    let out = run(&["--memory", "4096", "--memory-offset", "0"], &program, b"");
    assert!(!out.status.success());
    assert_eq!(out.status.signal(), Some(libc::SIGSEGV));
}

#[test]
fn unmatched_brackets_are_fatal_parse_errors() {
    let open = write_program("unmatched-open", "++[>");
    let out = run(&[], &open, b"");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unmatched '['"), "stderr: {stderr}");
    assert!(stderr.contains("1:3"), "stderr: {stderr}");

    let close = write_program("unmatched-close", "+]");
    let out = run(&[], &close, b"");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unmatched ']'"));
}

#[test]
fn invalid_memory_layout_fails_before_running() {
    let program = write_program("layout", "+");
    let out = run(&["--memory", "4096", "--memory-offset", "4096"], &program, b"");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("memory offset"));
}

#[test]
fn unknown_flags_and_missing_files_exit_nonzero() {
    let program = write_program("flags", "+");
    let out = run(&["--definitely-not-a-flag"], &program, b"");
    assert!(!out.status.success());

    let out = bf()
        .arg("/definitely/not/a/real/file.b")
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(!out.status.success());
}

#[test]
fn debug_flag_dumps_ir_and_machine_code() {
    let program = write_program("debug", "+++[>++<-]");
    let out = run(&["--debug"], &program, b"");
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("MUL"), "stderr: {stderr}");
    assert!(stderr.contains("SET_CONST"), "stderr: {stderr}");
    assert!(stderr.contains("Dumping"), "stderr: {stderr}");
}

#[test]
fn timing_flag_reports_each_phase() {
    let program = write_program("timing", "+");
    let out = run(&["--timing"], &program, b"");
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    for phase in ["parse:", "optimize:", "compile:", "execute:"] {
        assert!(stderr.contains(phase), "missing {phase} in: {stderr}");
    }
}

#[test]
fn profiler_writes_folded_stacks_with_loop_frames() {
    // Three nested loops; the innermost moves a freshly refilled cell 255
    // times per output, so the run burns a few hundred million instructions
    // inside the JIT region and the 1 kHz timer lands plenty of samples.
    // --no-optimize keeps the inner copy loop a real loop.
    let program = write_program("profile", "-[>-[>-[->+<]<.-]<-]");
    let profile_path = std::env::temp_dir().join(format!(
        "bfjit-e2e-{}-profile.folded",
        std::process::id()
    ));

    let out = run(
        &["--no-optimize", "--profile", profile_path.to_str().unwrap()],
        &program,
        b"",
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout.len(), 255 * 255);

    let profile = std::fs::read_to_string(&profile_path).unwrap();
    assert!(profile.starts_with("# Folded stack format"));

    let data_lines: Vec<&str> = profile
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    assert!(!data_lines.is_empty(), "no samples in: {profile}");
    for line in &data_lines {
        // Frame grammar: `@line:col TAG` frames joined by ';', then a count.
        assert!(line.starts_with('@'), "malformed line: {line}");
        let count = line.rsplit(' ').next().unwrap();
        assert!(count.parse::<u32>().is_ok(), "malformed count: {line}");
    }
    // Samples inside the nested loops carry the outer loop's frame prefix.
    assert!(
        data_lines.iter().any(|l| l.contains("LOOP;")),
        "no loop-nested samples in: {profile}"
    );
}

#[test]
fn unwritable_profile_path_fails_after_the_run() {
    let program = write_program("profile-bad-path", "+");
    let out = run(
        &["--profile", "/definitely/not/a/dir/out.folded"],
        &program,
        b"",
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("profile file"));
}

#[test]
fn memory_flags_accept_small_tapes() {
    // One page of tape, cursor at the start; the program stays in range.
    let program = write_program("small-tape", "+++>++<[->+<]");
    let out = run(&["--memory", "4096", "--memory-offset", "0"], &program, b"");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
}
