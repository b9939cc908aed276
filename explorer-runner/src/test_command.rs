// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launching the test runner and reading records from its output.

use crate::errors::{ProcessSpawnError, ProcessSpawnErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use explorer_metadata::RawRecord;
use futures::prelude::*;
use std::{collections::VecDeque, io, process::Stdio};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split},
    process::{Child, ChildStderr, ChildStdout},
    sync::watch,
};
use tracing::debug;

/// The number of trailing stderr lines kept for [`CommandOutcome::stderr`].
pub const STDERR_LINES: usize = 100;

/// A command line to be run in a fixed working directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessCommand {
    command_line: String,
    cwd: Utf8PathBuf,
}

impl ProcessCommand {
    /// Creates a new command out of a full command line, split with shell quoting rules at spawn
    /// time.
    pub fn new(command_line: impl Into<String>, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            command_line: command_line.into(),
            cwd: cwd.into(),
        }
    }

    /// Creates a new command out of a program and its arguments, quoting them as necessary.
    pub fn from_args<I, S>(program: &str, args: I, cwd: impl Into<Utf8PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = std::iter::once(program.to_owned())
            .chain(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        Self::new(shell_words::join(words), cwd)
    }

    /// Returns the command line.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Returns the working directory.
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Spawns the process, returning its record stream and a handle that cancels it.
    pub fn spawn(&self) -> Result<(RecordStream, CancelHandle), ProcessSpawnError> {
        let argv = shell_words::split(&self.command_line).map_err(|err| {
            ProcessSpawnError::new(&self.command_line, ProcessSpawnErrorKind::Split(err))
        })?;
        let Some((program, args)) = argv.split_first() else {
            return Err(ProcessSpawnError::new(
                &self.command_line,
                ProcessSpawnErrorKind::Empty,
            ));
        };

        debug!("spawning `{}` in `{}`", self.command_line, self.cwd);
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                // A Ctrl-C at the terminal only reaches the explorer, which cancels the run.
                cmd.process_group(0);
            }
        }
        let mut child = cmd.spawn().map_err(|err| {
            ProcessSpawnError::new(&self.command_line, ProcessSpawnErrorKind::Exec(err))
        })?;

        let stdout = child.stdout.take().map(|out| BufReader::new(out).split(b'\n'));
        let stderr = child.stderr.take().map(|err| BufReader::new(err).split(b'\n'));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let stream = RecordStream {
            child,
            stdout,
            stderr,
            stderr_lines: VecDeque::new(),
            cancel_rx,
            cancelled: false,
        };
        Ok((stream, CancelHandle { sender: cancel_tx }))
    }
}

/// Cancels a running [`RecordStream`].
///
/// Dropping the handle doesn't cancel the process.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation: the process is killed and no further records are produced.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// How a process ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutcome {
    /// The exit code, or `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Whether the process was cancelled through its [`CancelHandle`].
    pub cancelled: bool,

    /// The last [`STDERR_LINES`] lines the process wrote to stderr.
    pub stderr: String,
}

impl CommandOutcome {
    /// Returns true if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

enum Step {
    Cancel,
    Stdout(io::Result<Option<String>>),
    Stderr(io::Result<Option<String>>),
}

/// The ordered sequence of records a spawned process writes to stdout.
///
/// Records are produced in the order the process wrote them. Lines that aren't valid UTF-8 are
/// decoded lossily. Stderr is read concurrently and its tail kept for [`CommandOutcome::stderr`].
#[derive(Debug)]
pub struct RecordStream {
    child: Child,
    stdout: Option<Split<BufReader<ChildStdout>>>,
    stderr: Option<Split<BufReader<ChildStderr>>>,
    stderr_lines: VecDeque<String>,
    cancel_rx: watch::Receiver<bool>,
    cancelled: bool,
}

impl RecordStream {
    /// Returns the next record, or `None` once stdout is closed or the process is cancelled.
    pub async fn next_record(&mut self) -> Option<RawRecord> {
        while self.stdout.is_some() {
            match self.step().await {
                Step::Cancel => self.kill(),
                Step::Stdout(Ok(Some(line))) => {
                    if let Some(record) = extract_record(&line) {
                        return Some(record);
                    }
                }
                Step::Stdout(res) => {
                    if let Err(error) = res {
                        debug!("error reading runner stdout: {error}");
                    }
                    self.stdout = None;
                }
                Step::Stderr(res) => self.on_stderr(res),
            }
        }
        None
    }

    /// Returns a stream over the remaining records.
    pub fn records(&mut self) -> impl Stream<Item = RawRecord> + '_ {
        stream::unfold(self, |this| async move {
            let record = this.next_record().await?;
            Some((record, this))
        })
    }

    /// Waits for the process to exit, discarding any records that haven't been read.
    ///
    /// A non-zero exit code is not an error.
    pub async fn finish(mut self) -> io::Result<CommandOutcome> {
        while self.stdout.is_some() || self.stderr.is_some() {
            match self.step().await {
                Step::Cancel => self.kill(),
                Step::Stdout(Ok(Some(_))) => {}
                Step::Stdout(_) => self.stdout = None,
                Step::Stderr(res) => self.on_stderr(res),
            }
        }

        let status = self.child.wait().await?;
        debug!("runner exited with {status}");
        Ok(CommandOutcome {
            exit_code: status.code(),
            cancelled: self.cancelled,
            stderr: Vec::from(self.stderr_lines).join("\n"),
        })
    }

    async fn step(&mut self) -> Step {
        tokio::select! {
            biased;

            () = wait_for_cancel(&mut self.cancel_rx), if !self.cancelled => Step::Cancel,
            line = next_line(&mut self.stdout) => Step::Stdout(line),
            line = next_line(&mut self.stderr) => Step::Stderr(line),
        }
    }

    fn on_stderr(&mut self, res: io::Result<Option<String>>) {
        match res {
            Ok(Some(line)) => {
                debug!(target: "phpunit_explorer::runner_stderr", "{line}");
                if self.stderr_lines.len() == STDERR_LINES {
                    self.stderr_lines.pop_front();
                }
                self.stderr_lines.push_back(line);
            }
            Ok(None) => self.stderr = None,
            Err(error) => {
                debug!("error reading runner stderr: {error}");
                self.stderr = None;
            }
        }
    }

    fn kill(&mut self) {
        self.cancelled = true;
        self.stdout = None;
        self.stderr = None;
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                // The runner leads its own process group: take down everything it spawned.
                let pid = self.child.id().and_then(|pid| libc::pid_t::try_from(pid).ok());
                if let Some(pid) = pid {
                    unsafe {
                        libc::kill(-pid, libc::SIGKILL);
                    }
                }
            }
        }
        if let Err(error) = self.child.start_kill() {
            // The process may have exited already.
            debug!("failed to kill runner: {error}");
        }
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // All handles were dropped without cancelling.
        future::pending::<()>().await;
    }
}

async fn next_line<R: AsyncBufRead + Unpin>(
    lines: &mut Option<Split<R>>,
) -> io::Result<Option<String>> {
    let Some(lines) = lines else {
        return future::pending().await;
    };
    let Some(mut line) = lines.next_segment().await? else {
        return Ok(None);
    };
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(match String::from_utf8(line) {
        Ok(line) => line,
        Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
    }))
}

/// Extracts a record from a single line of runner output.
///
/// ANSI escapes are removed, and any text before the first `{` is ignored. Returns `None` for
/// lines that don't carry a record.
pub fn extract_record(line: &str) -> Option<RawRecord> {
    let line = strip_ansi_escapes::strip_str(line);
    let start = line.find('{')?;
    RawRecord::parse(line[start..].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(r#"{"event":"testStarted","id":"testBar"}"#, Some("testBar") ; "bare record")]
    #[test_case(r#"##teamcity {"event":"testStarted","id":"testBar"}  "#, Some("testBar") ; "prefixed")]
    #[test_case("\u{1b}[32m{\"event\":\"testStarted\",\"id\":\"testBar\"}\u{1b}[0m", Some("testBar") ; "colored")]
    #[test_case("PHPUnit 10.5.0 by Sebastian Bergmann and contributors.", None ; "banner")]
    #[test_case(r#"{"time": "0.01s"}"#, None ; "not a record")]
    #[test_case("{ truncated", None ; "invalid json")]
    fn extract(line: &str, id: Option<&str>) {
        let record = extract_record(line);
        assert_eq!(record.as_ref().and_then(|record| record.id()), id);
    }

    #[test]
    fn from_args_quotes() {
        let command = ProcessCommand::from_args(
            "vendor/bin/phpunit",
            ["tests/Foo Test.php", "--filter", "^(?:FooTest::testBar)$"],
            "/project",
        );
        assert_eq!(
            shell_words::split(command.command_line()).expect("command line splits"),
            vec![
                "vendor/bin/phpunit",
                "tests/Foo Test.php",
                "--filter",
                "^(?:FooTest::testBar)$"
            ]
        );
        assert_eq!(command.cwd(), Utf8Path::new("/project"));
    }

    #[test]
    fn spawn_errors() {
        let error = ProcessCommand::new("", "/").spawn().unwrap_err();
        assert!(matches!(error.kind(), ProcessSpawnErrorKind::Empty));

        let error = ProcessCommand::new("phpunit 'unterminated", "/").spawn().unwrap_err();
        assert!(matches!(error.kind(), ProcessSpawnErrorKind::Split(_)));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use camino_tempfile::Utf8TempDir;
        use pretty_assertions::assert_eq;
        use std::time::Duration;

        fn sh(script: &str) -> ProcessCommand {
            ProcessCommand::from_args("sh", ["-c", script], std::env::temp_dir().to_str().unwrap())
        }

        #[tokio::test]
        async fn records_in_order() {
            let script = r#"
                echo 'PHPUnit banner'
                echo '{"event":"testStarted","id":"testA"}'
                echo 'to stderr' >&2
                echo '{"foo":"bar"}'
                echo '{"event":"testFinished","id":"testA","duration":1}'
                exit 3
            "#;
            let (mut stream, _cancel) = sh(script).spawn().expect("spawned sh");

            let events: Vec<_> = stream
                .records()
                .map(|record| record.event().map(str::to_owned))
                .collect()
                .await;
            assert_eq!(
                events,
                vec![
                    Some("testStarted".to_owned()),
                    Some("testFinished".to_owned())
                ]
            );

            let outcome = stream.finish().await.expect("waited for sh");
            assert_eq!(
                outcome,
                CommandOutcome {
                    exit_code: Some(3),
                    cancelled: false,
                    stderr: "to stderr".to_owned(),
                }
            );
            assert!(!outcome.success());
        }

        #[tokio::test]
        async fn finish_without_reading() {
            let script = r#"echo '{"event":"testStarted","id":"testA"}'"#;
            let (stream, _cancel) = sh(script).spawn().expect("spawned sh");
            let outcome = stream.finish().await.expect("waited for sh");
            assert!(outcome.success());
        }

        #[tokio::test]
        async fn cancel() {
            let script = r#"
                echo '{"event":"testStarted","id":"testA"}'
                sleep 30
                echo '{"event":"testFinished","id":"testA","duration":1}'
            "#;
            let (mut stream, cancel) = sh(script).spawn().expect("spawned sh");

            let first = stream.next_record().await.expect("first record");
            assert_eq!(first.id(), Some("testA"));

            cancel.cancel();
            assert!(cancel.is_cancelled());
            assert_eq!(stream.next_record().await, None);

            let outcome = stream.finish().await.expect("waited for sh");
            assert!(outcome.cancelled);
            assert_eq!(outcome.exit_code, None);
        }

        #[tokio::test]
        async fn invalid_utf8_line() {
            let script = r#"
                echo '{"event":"testStarted","id":"testA"}'
                printf 'garbage \377\376 line\n'
                printf '{"event":"testIgnored","id":"caf\303"}\n'
                echo '{"event":"testFinished","id":"testA","duration":1}'
            "#;
            let (mut stream, _cancel) = sh(script).spawn().expect("spawned sh");

            let ids: Vec<_> = stream
                .records()
                .map(|record| record.id().map(str::to_owned))
                .collect()
                .await;
            assert_eq!(
                ids,
                vec![
                    Some("testA".to_owned()),
                    Some("caf\u{fffd}".to_owned()),
                    Some("testA".to_owned())
                ]
            );
            assert!(stream.finish().await.expect("waited for sh").success());
        }

        #[tokio::test]
        async fn stderr_tail() {
            let script = format!(
                "i=0; while [ $i -lt {} ]; do echo \"line $i\" >&2; i=$((i + 1)); done; exit 1",
                STDERR_LINES + 50
            );
            let (stream, _cancel) = sh(&script).spawn().expect("spawned sh");
            let outcome = stream.finish().await.expect("waited for sh");

            let lines: Vec<_> = outcome.stderr.lines().collect();
            assert_eq!(lines.len(), STDERR_LINES);
            assert_eq!(lines.first(), Some(&"line 50"));
            assert_eq!(lines.last(), Some(&format!("line {}", STDERR_LINES + 49).as_str()));
        }

        /// Returns true if `pid` names a process that hasn't exited (zombies count as exited).
        fn is_running(pid: &str) -> bool {
            let output = std::process::Command::new("ps")
                .args(["-o", "stat=", "-p", pid])
                .output()
                .expect("ran ps");
            let stat = String::from_utf8_lossy(&output.stdout);
            let stat = stat.trim();
            !stat.is_empty() && !stat.starts_with('Z')
        }

        #[tokio::test]
        async fn cancel_kills_process_group() {
            let dir = Utf8TempDir::new().expect("created temp dir");
            let script = r#"
                sleep 300 &
                echo $! > grandchild.pid
                echo '{"event":"testStarted","id":"testA"}'
                wait
            "#;
            let (mut stream, cancel) = ProcessCommand::from_args("sh", ["-c", script], dir.path())
                .spawn()
                .expect("spawned sh");

            stream.next_record().await.expect("first record");
            let pid = std::fs::read_to_string(dir.path().join("grandchild.pid"))
                .expect("read pid file");
            let pid = pid.trim();
            assert!(is_running(pid), "grandchild {pid} is running before cancel");

            cancel.cancel();
            let outcome = stream.finish().await.expect("waited for sh");
            assert!(outcome.cancelled);

            for _ in 0..50 {
                if !is_running(pid) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            panic!("grandchild {pid} is still running after cancel");
        }

        #[tokio::test]
        async fn exec_error() {
            let error = ProcessCommand::new("/definitely/not/a/phpunit", "/")
                .spawn()
                .unwrap_err();
            assert!(matches!(error.kind(), ProcessSpawnErrorKind::Exec(_)));
        }
    }
}
