// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use explorer_runner::{
    config::ExplorerConfig,
    discovery::TestRegistry,
    errors::WriteEventError,
    filesystem::{Env, Filesystem},
    reporter::{Reporter, RunEvent},
};
use std::{
    os::unix::fs::PermissionsExt,
    sync::{Arc, Once},
};
use tokio::sync::Notify;

pub(crate) const FOO_TEST: &str = "\
<?php

use PHPUnit\\Framework\\TestCase;

class FooTest extends TestCase
{
    public function testBar()
    {
        $this->assertTrue(true);
    }

    /**
     * @dataProvider provider
     */
    public function testSum($a, $b)
    {
        $this->assertSame($a, $b);
    }
}
";

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        color_eyre::install().expect("color-eyre installed once");
    });
}

/// A temporary workspace with a fake test runner.
pub(crate) struct Workspace {
    dir: Utf8TempDir,
}

impl Workspace {
    /// Creates a workspace containing `files`, whose runner writes `stdout` and exits with
    /// `exit_code`.
    pub(crate) fn new(files: &[(&str, &str)], stdout: &str, exit_code: i32) -> Result<Self> {
        let body = format!("cat <<'RECORDS'\n{stdout}\nRECORDS\nexit {exit_code}\n");
        Self::with_script(files, &body)
    }

    /// Creates a workspace containing `files`, whose runner runs the shell script `body`.
    ///
    /// The runner's arguments are saved to `args.txt`, one per line.
    pub(crate) fn with_script(files: &[(&str, &str)], body: &str) -> Result<Self> {
        let dir = camino_tempfile::tempdir()?;
        for (path, contents) in files {
            write_file(&dir.path().join(path), contents)?;
        }

        let script = dir.path().join("bin/fake-phpunit");
        write_file(
            &script,
            &format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > args.txt\n{body}"),
        )?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        write_file(
            &dir.path().join(ExplorerConfig::CONFIG_PATH),
            "[runner]\nbinary = \"bin/fake-phpunit\"\n",
        )?;
        Ok(Self { dir })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn path(&self, rel: &str) -> Utf8PathBuf {
        self.dir.path().join(rel)
    }

    pub(crate) fn config(&self) -> Result<ExplorerConfig> {
        Ok(ExplorerConfig::from_sources(self.root(), None)?)
    }

    pub(crate) fn filesystem(&self) -> Filesystem {
        Filesystem::new(&Env::new("", ':', [""]))
    }

    pub(crate) async fn registry(&self, config: &ExplorerConfig) -> Result<TestRegistry> {
        let registry = TestRegistry::new();
        registry
            .refresh(self.root(), config.discovery(), &self.filesystem())
            .await?;
        Ok(registry)
    }

    /// Returns the arguments the fake runner was last invoked with.
    pub(crate) fn runner_args(&self) -> Result<Vec<String>> {
        let args = std::fs::read_to_string(self.path("args.txt"))?;
        Ok(args.lines().map(str::to_owned).collect())
    }
}

fn write_file(path: &Utf8Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// Records events as `<event> <test>[ <detail>]` lines.
#[derive(Default)]
pub(crate) struct RecordingReporter {
    pub(crate) events: Vec<String>,
    started: Option<Arc<Notify>>,
}

impl RecordingReporter {
    /// Notifies `started` whenever a test starts.
    pub(crate) fn notify_on_start(started: Arc<Notify>) -> Self {
        Self {
            events: Vec::new(),
            started: Some(started),
        }
    }
}

impl Reporter for RecordingReporter {
    fn report_event(&mut self, event: RunEvent<'_>) -> Result<(), WriteEventError> {
        let line = match event {
            RunEvent::RunStarted { test_count, .. } => format!("{} {test_count}", event.name()),
            RunEvent::TestQueued { case } => format!("{} {}", event.name(), case.qualified_id()),
            RunEvent::TestStarted { case } => {
                if let Some(started) = &self.started {
                    started.notify_one();
                }
                format!("{} {}", event.name(), case.qualified_id())
            }
            RunEvent::TestPassed { case, data_set, .. }
            | RunEvent::TestSkipped { case, data_set } => match data_set {
                Some(id) => format!("{} {id}", event.name()),
                None => format!("{} {}", event.name(), case.qualified_id()),
            },
            RunEvent::TestFailed { case, report, .. } => format!(
                "{} {} at {}",
                event.name(),
                case.qualified_id(),
                report
                    .location
                    .as_ref()
                    .map_or_else(|| "-".to_owned(), |location| location.line.to_string()),
            ),
            RunEvent::RunErrored { exit_code, stderr } => {
                format!("{} {exit_code:?} {stderr}", event.name())
            }
            RunEvent::RunFailedToStart { .. } | RunEvent::RunFinished { .. } => {
                event.name().to_owned()
            }
        };
        self.events.push(line);
        Ok(())
    }
}
