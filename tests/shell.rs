use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tempfile::TempDir;

struct Run {
	stdout: String,
	stderr: String,
	code: Option<i32>,
}

fn run_in(dir: &Path, script: &str) -> Run {
	let mut child = Command::new(env!("CARGO_BIN_EXE_jsh"))
		.current_dir(dir)
		.env("JSH_HISTORY", "off")
		.env_remove("JSH_LOG")
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
		.expect("failed to start jsh");
	child.stdin.take().unwrap().write_all(script.as_bytes()).unwrap();
	let out = child.wait_with_output().unwrap();
	Run {
		stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
		stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
		code: out.status.code(),
	}
}

fn run(script: &str) -> Run {
	let dir = TempDir::new().unwrap();
	run_in(dir.path(), script)
}

fn position(haystack: &str, needle: &str) -> usize {
	haystack.find(needle).unwrap_or_else(|| panic!("{:?} not found in {:?}", needle, haystack))
}

fn have_kill() -> bool {
	Path::new("/bin/kill").exists() || Path::new("/usr/bin/kill").exists()
}

#[test]
fn pipeline_in_foreground() {
	let r = run("echo hello | tr a-z A-Z\n");
	assert_eq!(r.stdout, "HELLO\nlogout\n");
	assert_eq!(r.code, Some(0));
}

#[test]
fn pipeline_sees_end_of_file() {
	let r = run("printf x | cat\nseq 1 1000 | sort -n | tail -n 1 | cat\n");
	assert_eq!(r.stdout, "x1000\nlogout\n");
}

#[test]
fn clauses_run_in_order() {
	let r = run("echo a ; echo b;echo c\n");
	assert_eq!(r.stdout, "a\nb\nc\nlogout\n");
}

#[test]
fn exit_status_of_last_command() {
	assert_eq!(run("true\n").code, Some(0));
	assert_eq!(run("false\n").code, Some(1));
	assert_eq!(run("false | true\n").code, Some(0));
}

#[test]
fn missing_input_fails_the_stage() {
	let r = run("echo hi < missing.txt\n");
	assert!(r.stderr.contains("No such file or directory"), "{}", r.stderr);
	assert_eq!(r.stdout, "logout\n");
	assert_eq!(r.code, Some(1));
}

#[test]
fn every_bad_redirection_is_reported() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("in.txt"), "data\n").unwrap();
	let r = run_in(dir.path(), "cat < nope1 < in.txt < nope2\n");
	assert_eq!(r.stderr.matches("No such file or directory").count(), 2, "{}", r.stderr);
	assert_eq!(r.stdout, "logout\n");
	assert_eq!(r.code, Some(1));

	let r = run_in(dir.path(), "echo hi > no/such/dir/out.txt\n");
	assert!(r.stderr.contains("Unable to create file for writing"), "{}", r.stderr);
	assert_eq!(r.code, Some(1));
}

#[test]
fn redirections_override_pipes() {
	let dir = TempDir::new().unwrap();
	fs::write(dir.path().join("in.txt"), "from file\n").unwrap();
	let r = run_in(dir.path(), "echo ignored | cat < in.txt > out.txt\necho skipped | cat < in.txt | tr a-z A-Z\n");
	assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "from file\n");
	assert_eq!(r.stdout, "FROM FILE\nlogout\n");
}

#[test]
fn output_append_and_last_wins() {
	let dir = TempDir::new().unwrap();
	run_in(dir.path(), "echo one > f.txt\necho two >> f.txt\necho hi > a.txt > b.txt\n");
	assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "one\ntwo\n");
	assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "");
	assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "hi\n");
}

#[test]
fn command_not_found() {
	let r = run("jsh_no_such_program --flag\n");
	assert!(r.stderr.contains("jsh_no_such_program: Command not found!"), "{}", r.stderr);
	assert_eq!(r.code, Some(127));

	let r = run("jsh_no_such_program | echo still runs\n");
	assert_eq!(r.stdout, "still runs\nlogout\n");
}

#[test]
fn invalid_syntax() {
	let r = run("| ls\nls >\n");
	assert_eq!(r.stderr.matches("Invalid Syntax!").count(), 2, "{}", r.stderr);
}

#[test]
fn background_job_lifecycle() {
	let r = run("sleep 0.3 &\nactivities\nsleep 0.6\necho end\n");
	let first = r.stdout.lines().next().unwrap_or("");
	assert!(first.starts_with("[1] "), "{}", r.stdout);
	let pgid = first.trim_start_matches("[1] ");
	assert!(pgid.parse::<i32>().is_ok(), "{}", first);

	assert!(r.stdout.contains(&format!("[{}] : sleep 0.3 & - Running", pgid)), "{}", r.stdout);
	let done = position(&r.stdout, "[1]+ Done\t\tsleep 0.3 &");
	assert!(done < position(&r.stdout, "end\n"));
}

#[test]
fn job_ids_are_never_reused() {
	let r = run("sleep 0.1 &\nsleep 0.4\nsleep 5 &\nactivities\n");
	assert!(r.stdout.contains("[1]+ Done\t\tsleep 0.1 &"), "{}", r.stdout);
	let second = r.stdout.lines().find(|l| l.starts_with("[2] "));
	assert!(second.is_some(), "{}", r.stdout);
	assert!(!r.stdout.contains("sleep 0.1 & - Running"));
	assert!(r.stdout.contains(" : sleep 5 & - Running"));
}

#[test]
fn activities_are_sorted() {
	let r = run("sleep 7 &\nsleep 5 &\nsleep 6 &\nactivities\n");
	let listing: Vec<&str> = r.stdout.lines().filter(|l| l.contains(" : ")).collect();
	assert_eq!(listing.len(), 3, "{}", r.stdout);
	assert!(listing[0].ends_with(" : sleep 5 & - Running"));
	assert!(listing[1].ends_with(" : sleep 6 & - Running"));
	assert!(listing[2].ends_with(" : sleep 7 & - Running"));
}

#[test]
fn job_builtins_without_jobs() {
	let r = run("fg\nfg 2\nbg 4\nbg\n");
	assert_eq!(r.stdout.matches("No such job").count(), 3, "{}", r.stdout);
	assert!(r.stderr.contains("bg: Invalid syntax"));
}

#[test]
fn ping_reports_missing_process() {
	let r = run("ping 2147483647 9\nping 1\n");
	assert!(r.stdout.contains("No such process found"));
	assert!(r.stderr.contains("ping: Invalid syntax"));
}

#[test]
fn stopped_job_resumes_with_fg() {
	if !have_kill() {
		return;
	}
	let r = run("kill -STOP 0\nactivities\nfg 1\nactivities\necho end\n");
	let stopped = position(&r.stdout, "[1]+ Stopped\t\tkill -STOP 0\n");
	let listed = position(&r.stdout, " : kill -STOP 0 - Stopped\n");
	assert!(stopped < listed);
	// fg echoes the command, then the job is gone from the listing.
	assert!(r.stdout.ends_with(" - Stopped\nkill -STOP 0\nend\nlogout\n"), "{}", r.stdout);
	assert_eq!(r.code, Some(0));
}

#[test]
fn stopped_job_resumes_with_bg() {
	if !have_kill() {
		return;
	}
	let r = run("kill -STOP 0\nbg 1\nsleep 0.3\necho end\n");
	assert!(r.stdout.contains("[1]+ Stopped\t\tkill -STOP 0"), "{}", r.stdout);
	assert!(r.stdout.contains("[1] kill -STOP 0 &"), "{}", r.stdout);
	let done = position(&r.stdout, "[1]+ Done\t\tkill -STOP 0");
	assert!(done < position(&r.stdout, "end\n"));
}

#[test]
fn builtins_in_pipelines() {
	let r = run("fg | cat\nlog purge | cat\nreveal -l . | tr a-z A-Z\n");
	assert!(r.stderr.contains("fg: cannot be used in a pipeline"), "{}", r.stderr);
	assert!(r.stderr.contains("log: cannot be used in a pipeline"), "{}", r.stderr);
}

#[test]
fn background_builtin_gets_a_job() {
	let r = run("reveal &\nsleep 0.3\necho end\n");
	let first = r.stdout.lines().next().unwrap_or("");
	assert!(first.starts_with("[1] "), "{}", r.stdout);
	let done = position(&r.stdout, "[1]+ Done\t\treveal &");
	assert!(done < position(&r.stdout, "end\n"));
}

#[test]
fn log_listing_is_pipeable() {
	let dir = TempDir::new().unwrap();
	let r = run_in(dir.path(), "echo one\necho two\nlog | grep two\nlog > out.txt\n");
	assert_eq!(r.stdout, "one\ntwo\necho two\nlogout\n");
	assert_eq!(r.stderr, "");
	assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "echo one\necho two\n");
}

#[test]
fn shell_builtins_refuse_redirections() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("sub")).unwrap();
	let r = run_in(dir.path(), "hop sub > out.txt\nfg > out.txt\nlog purge > out.txt\nreveal\n");
	assert!(r.stderr.contains("hop: redirection is not supported"), "{}", r.stderr);
	assert!(r.stderr.contains("fg: redirection is not supported"), "{}", r.stderr);
	assert!(r.stderr.contains("log: redirection is not supported"), "{}", r.stderr);
	assert!(!dir.path().join("out.txt").exists());
	// The hop did not happen, so the listing still shows the subdirectory.
	assert_eq!(r.stdout, "sub\nlogout\n");
}

#[test]
fn hop_and_reveal() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("sub")).unwrap();
	fs::write(dir.path().join("sub").join("inner.txt"), "").unwrap();
	fs::write(dir.path().join("sub").join(".dot"), "").unwrap();
	let r = run_in(dir.path(), "hop sub\nreveal\nhop nowhere\nhop ~\nreveal -l sub | tr a-z A-Z\n");
	assert!(r.stdout.starts_with("inner.txt\n"), "{}", r.stdout);
	assert!(r.stdout.contains("INNER.TXT\n"));
	assert!(!r.stdout.contains(".dot"));
	assert!(r.stderr.contains("No such directory!"));
}

#[test]
fn log_execute() {
	let r = run("echo first\necho second\nlog\nlog execute 2\nlog execute 1 | tr a-z A-Z\nlog execute 9\n");
	assert_eq!(
		r.stdout,
		"first\nsecond\necho first\necho second\necho first\nfirst\nSECOND\nlogout\n"
	);
	assert!(r.stderr.contains("log: invalid index"));
}

#[test]
fn history_is_persisted() {
	let dir = TempDir::new().unwrap();
	let history = dir.path().join("history");
	let mut child = Command::new(env!("CARGO_BIN_EXE_jsh"))
		.current_dir(dir.path())
		.env("JSH_HISTORY", &history)
		.stdin(Stdio::piped())
		.stdout(Stdio::null())
		.spawn()
		.unwrap();
	child.stdin.take().unwrap().write_all(b"echo persisted\nlog\n").unwrap();
	child.wait().unwrap();
	assert_eq!(fs::read_to_string(&history).unwrap(), "echo persisted\n");
}
