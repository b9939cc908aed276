// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use phpunit_explorer::ExplorerApp;

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = enable_ansi_support::enable_ansi_support();

    let app = ExplorerApp::parse();
    let styles = app.stderr_styles();

    match app.init_output().and_then(|output| app.exec(output)) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&styles);
            std::process::exit(error.process_exit_code())
        }
    }
}
