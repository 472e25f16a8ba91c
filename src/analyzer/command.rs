//! External tool invocation without a shell.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::AnalyzerError;

/// Program plus argument list, run with captured output.
///
/// Arguments are passed as-is; nothing is interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build from an argv list; `None` when the list is empty.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(AsRef::<str>::as_ref(program)).args(args.iter().map(AsRef::<str>::as_ref)))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn arg_list(&self) -> &[OsString] {
        &self.args
    }

    /// Run in `cwd` and return stdout on a zero exit status.
    pub async fn run(&self, cwd: &Path) -> Result<Vec<u8>, AnalyzerError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AnalyzerError::Spawn {
                program: self.program(),
                source,
            })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(AnalyzerError::NonZeroExit {
                program: self.program(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_argv() {
        assert_eq!(ExternalCommand::from_argv::<&str>(&[]), None);
        let cmd = ExternalCommand::from_argv(&["make", "graph", "-j4"]).unwrap();
        assert_eq!(cmd.program(), "make");
        assert_eq!(cmd.arg_list(), &[OsString::from("graph"), OsString::from("-j4")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout_in_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let stdout = ExternalCommand::new("ls").run(dir.path()).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&stdout).trim(), "marker.txt");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_arguments_are_not_shell_expanded() {
        let dir = TempDir::new().unwrap();
        let stdout = ExternalCommand::new("echo")
            .arg("$HOME; rm -rf nothing")
            .run(dir.path())
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&stdout).trim(), "$HOME; rm -rf nothing");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let err = ExternalCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run(dir.path())
            .await
            .unwrap_err();
        match err {
            AnalyzerError::NonZeroExit { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let err = ExternalCommand::new("codegraphd-no-such-tool")
            .run(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::Spawn { .. }));
    }
}
