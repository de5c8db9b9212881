//! Shell completion scripts for the CLI.

use std::io::Write;

use clap::CommandFactory;
use clap_complete::{generate, shells::Shell};

use crate::cli::Cli;

/// Writes the completion script for `shell` to `out`.
pub fn generate_completion(shell: Shell, out: &mut impl Write) {
    let mut app = Cli::command();
    generate(shell, &mut app, "courier", out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_script_names_the_binary() {
        let mut out = Vec::new();
        generate_completion(Shell::Bash, &mut out);
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("courier"));
        assert!(script.contains("send-group"));
    }
}
