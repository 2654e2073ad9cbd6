//! Synchronous child-process helper shared by the remapper and converters
//! (spec.md §5: "tools are invoked synchronously with stdout/stderr
//! captured; exit-code != 0 is fatal unless explicitly marked
//! ignorable").
//!
//! Grounded on the teacher's `commands::qemu_img`/`commands::qemu_system`
//! `Command::new(...).output()` wrappers, generalized into a single
//! helper that maps a missing binary to `DependencyMissing` and a
//! nonzero exit to `ExternalCommandFailed` with a truncated stderr tail.

use std::process::Command;

use crate::error::{ConvertError, Result};

const STDERR_TAIL_BYTES: usize = 4096;

/// Run `command` with `args`, returning captured stdout on success.
/// `install_hint` is surfaced in `DependencyMissing` if the binary can't
/// be found at all.
pub fn run(command: &str, args: &[&str], install_hint: &str) -> Result<String> {
    let output = Command::new(command).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConvertError::DependencyMissing {
                tool: command.to_string(),
                suggestion: install_hint.to_string(),
            }
        } else {
            ConvertError::Io(e)
        }
    })?;

    if !output.status.success() {
        return Err(ConvertError::ExternalCommandFailed {
            command: format!("{} {}", command, args.join(" ")),
            code: output.status.code(),
            stderr_tail: tail(&output.stderr),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Like [`run`], but retried once on failure before giving up
/// (spec.md §7's `TransientCommand` policy).
pub fn run_transient(command: &str, args: &[&str], install_hint: &str) -> Result<String> {
    match run(command, args, install_hint) {
        Ok(out) => Ok(out),
        Err(ConvertError::ExternalCommandFailed { stderr_tail, .. }) => {
            run(command, args, install_hint).map_err(|_| ConvertError::TransientCommand {
                command: command.to_string(),
                message: stderr_tail,
            })
        }
        Err(other) => Err(other),
    }
}

fn tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    if text.len() <= STDERR_TAIL_BYTES {
        text.into_owned()
    } else {
        text[text.len() - STDERR_TAIL_BYTES..].to_string()
    }
}
