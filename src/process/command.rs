//! Command name recovery from the kernel argument area.
//!
//! The accounting name the BSD layer keeps is short and often truncated, so
//! the display name is taken from the process's first argument instead. The
//! argument area is parsed with a bounded cursor; anything unexpected falls
//! back to the accounting name in parentheses.
//!
//! Layouts handled here, as reported by the kernel backend:
//! ```text
//! WithArgc: [argc: u32][exec path]\0...\0[argv0]\0[argv1]\0...
//! Bare:     [argv0]\0[argv1]\0...
//! ```

use serde::Serialize;
use tracing::debug;

use crate::kernel::{ArgumentLayout, HostKernel, Pid};

/// Why an argument area yielded no usable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentParseError {
    #[error("argument area is empty")]
    Empty,
    #[error("argument count is not positive")]
    NoArguments,
    #[error("argument area ended while {0}")]
    Truncated(&'static str),
    #[error("first argument is not a usable path")]
    UnusableName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    ArgcEnd,
    Argv0,
    ExecPathPrefix,
    Path,
}

/// Extracts the basename of argv0 from a raw argument area.
pub fn parse_argument_area(
    buf: &[u8],
    layout: ArgumentLayout,
) -> Result<String, ArgumentParseError> {
    if buf.is_empty() {
        return Err(ArgumentParseError::Empty);
    }

    let has_header = layout == ArgumentLayout::WithArgc;
    let mut cursor = 0usize;
    let mut state = if has_header { Scan::ArgcEnd } else { Scan::Argv0 };

    loop {
        state = match state {
            Scan::ArgcEnd => {
                let word = buf
                    .get(0..4)
                    .ok_or(ArgumentParseError::Truncated("reading the argument count"))?;
                let argc = i32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
                if argc <= 0 {
                    return Err(ArgumentParseError::NoArguments);
                }
                cursor = 4;
                Scan::Argv0
            }
            Scan::Argv0 => {
                cursor = skip_nul(buf, cursor).ok_or(ArgumentParseError::Truncated(
                    "locating the first argument",
                ))?;
                if has_header {
                    Scan::ExecPathPrefix
                } else {
                    Scan::Path
                }
            }
            Scan::ExecPathPrefix => {
                let end = find_nul(buf, cursor)
                    .ok_or(ArgumentParseError::Truncated("skipping the exec path"))?;
                cursor = skip_nul(buf, end)
                    .ok_or(ArgumentParseError::Truncated("skipping the exec path"))?;
                Scan::Path
            }
            Scan::Path => {
                let end = find_nul(buf, cursor).unwrap_or(buf.len());
                let path = &buf[cursor..end];
                let name = match path.iter().rposition(|&b| b == b'/') {
                    Some(slash) => &path[slash + 1..],
                    None => path,
                };
                return match name.first() {
                    Some(&first) if first != b'-' && first != b'?' && first > b' ' => {
                        Ok(String::from_utf8_lossy(name).into_owned())
                    }
                    _ => Err(ArgumentParseError::UnusableName),
                };
            }
        };
    }
}

fn skip_nul(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b != 0)
        .map(|offset| from + offset)
}

fn find_nul(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b == 0)
        .map(|offset| from + offset)
}

fn truncate_chars(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// `"(name)"` with the name cut so the whole string fits `width`.
pub fn fallback_command(comm: &str, width: usize) -> String {
    format!("({})", truncate_chars(comm, width.saturating_sub(2)))
}

/// Display command for one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub text: String,
    /// False when the accounting-name fallback was used.
    pub recovered: bool,
}

/// Fetches and parses the argument area of `pid`.
pub fn recover_command(kernel: &dyn HostKernel, pid: Pid, comm: &str, width: usize) -> CommandLine {
    let parsed = kernel
        .process_arguments(pid)
        .map_err(|e| e.to_string())
        .and_then(|area| {
            parse_argument_area(&area.bytes, area.layout).map_err(|e| e.to_string())
        });

    match parsed {
        Ok(name) => CommandLine {
            text: truncate_chars(&name, width),
            recovered: true,
        },
        Err(reason) => {
            debug!("Command recovery for pid {} fell back: {}", pid, reason);
            CommandLine {
                text: fallback_command(comm, width),
                recovered: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::simulated::{procargs2, HostSnapshot, SimProcess, SimulatedKernel};

    fn with_header(argc: i32, rest: &[u8]) -> Vec<u8> {
        let mut buf = argc.to_ne_bytes().to_vec();
        buf.extend_from_slice(rest);
        buf
    }

    fn parse(buf: &[u8]) -> Result<String, ArgumentParseError> {
        parse_argument_area(buf, ArgumentLayout::WithArgc)
    }

    #[test]
    fn test_bare_argument_area() {
        assert_eq!(
            parse_argument_area(b"/usr/bin/foo\0--flag\0", ArgumentLayout::Bare),
            Ok("foo".to_string())
        );
    }

    #[test]
    fn test_header_and_exec_path_are_skipped() {
        let buf = with_header(2, b"/Applications/X.app/x\0\0\0\0/opt/bin/xtool\0-v\0");
        assert_eq!(parse(&buf), Ok("xtool".to_string()));
    }

    #[test]
    fn test_large_argument_count_keeps_header() {
        let buf = with_header(5000, b"/usr/bin/foo\0\0\0\0/usr/bin/foo\0-a\0");
        assert_eq!(parse(&buf), Ok("foo".to_string()));

        let argv: Vec<String> = std::iter::once("/usr/bin/foo".to_string())
            .chain((1..5000).map(|i| format!("arg{}", i)))
            .collect();
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        assert_eq!(parse(&procargs2("/usr/bin/foo", &argv)), Ok("foo".to_string()));
    }

    #[test]
    fn test_argv0_without_directory() {
        let buf = with_header(1, b"/bin/sh\0sh\0");
        assert_eq!(parse(&buf), Ok("sh".to_string()));
    }

    #[test]
    fn test_unusable_first_character() {
        let bare_areas: [&[u8]; 4] = [b"-bash\0", b"?\0", b"/usr/bin/\0", b"\x13x\0"];
        for bare in bare_areas {
            assert_eq!(
                parse_argument_area(bare, ArgumentLayout::Bare),
                Err(ArgumentParseError::UnusableName)
            );
        }
        assert_eq!(
            parse(&procargs2("/bin/bash", &["-bash"])),
            Err(ArgumentParseError::UnusableName)
        );
    }

    #[test]
    fn test_truncated_buffers_fail() {
        assert_eq!(parse(b""), Err(ArgumentParseError::Empty));
        assert!(matches!(
            parse(b"\x01\0"),
            Err(ArgumentParseError::Truncated(_))
        ));
        assert_eq!(
            parse(&with_header(0, b"/bin/x\0")),
            Err(ArgumentParseError::NoArguments)
        );
        assert_eq!(
            parse(&with_header(-1, b"/bin/x\0x\0")),
            Err(ArgumentParseError::NoArguments)
        );
        assert!(matches!(
            parse(&with_header(1, b"/bin/x\0\0\0")),
            Err(ArgumentParseError::Truncated(_))
        ));
        assert!(matches!(
            parse(&with_header(1, b"\0\0\0\0")),
            Err(ArgumentParseError::Truncated(_))
        ));
    }

    #[test]
    fn test_fallback_fits_width() {
        assert_eq!(fallback_command("foo", 16), "(foo)");
        assert_eq!(fallback_command("averyveryverylongname", 8), "(avery)");
    }

    #[test]
    fn test_failed_fetch_uses_accounting_name() {
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![SimProcess::new(
            1234, "foo",
        )]));
        let cmd = recover_command(&kernel, 1234, "foo", 16);
        assert_eq!(cmd.text, "(foo)");
        assert!(!cmd.recovered);
    }

    #[test]
    fn test_recovered_name_is_truncated() {
        let path = "/System/Library/com.apple.WebKit.WebContent";
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![SimProcess::new(
            7,
            "com.apple.Web",
        )
        .with_command_line(path, &[path])]));
        let cmd = recover_command(&kernel, 7, "com.apple.Web", 16);
        assert_eq!(cmd.text, "com.apple.WebKit");
        assert!(cmd.recovered);
    }
}
