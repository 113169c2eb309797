//! Structured remote commands
//!
//! Commands are built as argument vectors and only turned into a shell string
//! at the very edge, with every argument quoted. Anything secret travels as a
//! stdin line and is never part of the rendered command.
//!
//! Privileged commands go through a small wrapper that always consumes the
//! password line itself, whether or not sudo ends up asking for it. Lines
//! after it reach the command untouched under NOPASSWD or a cached timestamp.

use std::fmt;

/// Wrapper for commands that need root on the remote host.
///
/// The first stdin line is the password. It is piped to `sudo -v` on its own,
/// then the command runs under `sudo -n` with the rest of stdin.
const SUDO_WRAPPER: &str = r#"IFS= read -r pw; printf "%s\n" "$pw" | sudo -S -p "" -v || exit; unset pw; exec sudo -n -- "$@""#;

/// A command to run on a remote host
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    argv: Vec<String>,
    privileged: bool,
    stdin_lines: Vec<String>,
}

impl RemoteCommand {
    /// Start a command with the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            privileged: false,
            stdin_lines: Vec::new(),
        }
    }

    /// A `sh -c` script. Values go in through [`arg`](Self::arg) and are
    /// available to the script as `$1`, `$2`, ...
    pub fn script(body: impl Into<String>) -> Self {
        Self {
            argv: vec!["sh".to_string(), "-c".to_string(), body.into(), "sh".to_string()],
            privileged: false,
            stdin_lines: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run through sudo, authenticated with the node password over stdin
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Feed a line to the command's stdin (after the sudo password, if any)
    pub fn stdin_line(mut self, line: impl Into<String>) -> Self {
        self.stdin_lines.push(line.into());
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Program name, used as a short label in logs
    pub fn program(&self) -> &str {
        match self.argv.first().map(String::as_str) {
            Some("sh") if self.argv.get(1).map(String::as_str) == Some("-c") => "sh -c",
            Some(program) => program,
            None => "",
        }
    }

    /// Shell string sent over the exec channel
    pub fn to_shell_string(&self) -> String {
        let wrapper = ["sh", "-c", SUDO_WRAPPER, "sh"];
        let prefix = if self.privileged { &wrapper[..] } else { &[][..] };
        prefix
            .iter()
            .copied()
            .chain(self.argv.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Bytes to write to the channel's stdin, or `None` if nothing is fed
    pub fn stdin_payload(&self, password: &str) -> Option<String> {
        if !self.privileged && self.stdin_lines.is_empty() {
            return None;
        }

        let mut payload = String::new();
        if self.privileged {
            payload.push_str(password);
            payload.push('\n');
        }
        for line in &self.stdin_lines {
            payload.push_str(line);
            payload.push('\n');
        }
        Some(payload)
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("argv", &self.argv)
            .field("privileged", &self.privileged)
            .field("stdin_lines", &self.stdin_lines.len())
            .finish()
    }
}

/// Quote a word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
