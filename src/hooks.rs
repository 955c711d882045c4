use crate::config::PostSyncCommand;
use duct_sh::sh_dangerous;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A custom error describing the error cases for post-sync commands.
#[derive(Debug, Error)]
pub enum HookError {
    /// The underlying command creation failed. The parameter contains the error.
    #[error("the command cannot run: {0}")]
    HookFailure(#[from] std::io::Error),
    /// The command returned a non-zero exit code. The parameters are the
    /// exit code and the captured output.
    #[error("the command returned non-zero exit code {0} with message: {1}")]
    NonZeroExitcode(i32, String),
    /// The command output contains non-UTF8 characters.
    #[error("the command returned invalid characters")]
    NonUtf8Return,
}

/// Run every post-sync command of a repository, each one independently.
///
/// Relative directories resolve against the workspace root. A missing
/// directory skips the entry with a warning; a failing command is logged.
/// Neither stops the remaining commands nor fails the sync, the commands
/// are best-effort side effects.
pub fn run_post_sync_commands(
    workspace_root: &Path,
    repository: &str,
    commands: &[PostSyncCommand],
) {
    for entry in commands {
        let directory = resolve_directory(workspace_root, &entry.directory);
        if !directory.is_dir() {
            warn!(
                "[{repository}] Skipping command {:?}: directory {} does not exist.",
                entry.command,
                directory.display()
            );
            continue;
        }

        info!(
            "[{repository}] Running {} in {}.",
            command_name(&entry.command),
            directory.display()
        );
        match run_command(&directory, repository, &entry.command) {
            Ok(output) => {
                output.lines().for_each(|line| {
                    debug!("[{repository}] {line}");
                });
            }
            Err(err) => {
                error!("[{repository}] Command failed: {err}.");
            }
        }
    }
}

fn resolve_directory(workspace_root: &Path, directory: &str) -> PathBuf {
    let path = PathBuf::from(directory);
    if path.is_absolute() {
        path
    } else {
        workspace_root.join(path)
    }
}

/// The first word of the command line, for log readability.
fn command_name(command: &str) -> String {
    shlex::split(command)
        .and_then(|parts| parts.first().cloned())
        .unwrap_or_else(|| command.to_string())
}

fn run_command(directory: &Path, repository: &str, command: &str) -> Result<String, HookError> {
    // The command runs in a subshell (`/bin/sh` on *nix, `cmd.exe` on
    // Windows), so variable expansion, pipes and redirection all work.
    // We can run `sh_dangerous`, because it is on the user's computer.
    let output = sh_dangerous(command)
        .env("STACKSYNC_REPOSITORY", repository)
        .env("STACKSYNC_DIRECTORY", directory)
        .stderr_to_stdout()
        .stdout_capture()
        .dir(directory)
        .unchecked()
        .run()?;

    let output_str = std::str::from_utf8(&output.stdout).map_err(|_| HookError::NonUtf8Return)?;
    let output_str = output_str.trim_end().to_string();

    if output.status.success() {
        Ok(output_str)
    } else {
        Err(HookError::NonZeroExitcode(
            output.status.code().unwrap_or(-1),
            output_str,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use rand::distributions::{Alphanumeric, DistString};
    use std::{error::Error, fs};

    fn create_workspace() -> Result<PathBuf, Box<dyn Error>> {
        let id = Alphanumeric.sample_string(&mut rand::thread_rng(), 16);
        let root = PathBuf::from(format!("test_directories/{id}"));
        fs::create_dir_all(&root)?;
        Ok(root)
    }

    #[test]
    fn it_should_capture_the_command_output() -> Result<(), HookError> {
        let output = run_command(Path::new("."), "protos", "echo test")?;
        assert_eq!("test", output);

        Ok(())
    }

    #[test]
    fn it_should_capture_the_error_output() -> Result<(), HookError> {
        let output = run_command(Path::new("."), "protos", "echo err >&2")?;
        assert_eq!("err", output);

        Ok(())
    }

    #[test]
    fn it_should_set_the_env_vars() -> Result<(), HookError> {
        let output = run_command(Path::new("."), "protos", "printenv")?;
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines.contains(&"STACKSYNC_REPOSITORY=protos"));

        Ok(())
    }

    #[test]
    fn it_should_fail_if_the_command_fails() {
        let result = run_command(Path::new("."), "protos", "false");
        assert!(
            matches!(result, Err(HookError::NonZeroExitcode(1, _))),
            "{result:?} should be NonZeroExitcode"
        );
    }

    #[test]
    fn it_should_extract_the_command_name() {
        assert_eq!("protoc", command_name("protoc --version"));
        assert_eq!("echo", command_name("echo 'a b'"));
    }

    #[test]
    fn it_should_skip_missing_directories_and_keep_going() -> Result<(), Box<dyn Error>> {
        let workspace = create_workspace()?;
        testing_logger::setup();

        let commands = vec![
            PostSyncCommand {
                directory: String::from("missing"),
                command: String::from("echo never"),
            },
            PostSyncCommand {
                directory: String::from("."),
                command: String::from("touch hook-ran"),
            },
        ];
        run_post_sync_commands(&workspace, "protos", &commands);

        // The second command still ran.
        assert!(workspace.join("hook-ran").exists());

        testing_logger::validate(|captured_logs| {
            let warnings: Vec<_> = captured_logs
                .iter()
                .filter(|log| log.level == Level::Warn)
                .collect();
            assert_eq!(1, warnings.len());
            assert!(warnings[0].body.contains("does not exist"));
        });

        fs::remove_dir_all(workspace)?;

        Ok(())
    }

    #[test]
    fn it_should_keep_going_after_a_failing_command() -> Result<(), Box<dyn Error>> {
        let workspace = create_workspace()?;

        let commands = vec![
            PostSyncCommand {
                directory: String::from("."),
                command: String::from("false"),
            },
            PostSyncCommand {
                directory: String::from("."),
                command: String::from("touch after-failure"),
            },
        ];
        run_post_sync_commands(&workspace, "protos", &commands);

        assert!(workspace.join("after-failure").exists());

        fs::remove_dir_all(workspace)?;

        Ok(())
    }
}
