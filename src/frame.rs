//! Wire framing for the 1202 server-to-server dialect.
//!
//! One logical message is one CRLF-delimited line of the form:
//!
//! ```text
//! [:source] <COMMAND> [args...] [:trailing]
//! ```
//!
//! The source token is a bare SID or UID (no `nick!user@host` prefixes and
//! no IRCv3 tags in this dialect). A `:`-led token after the command starts
//! the trailing argument, which consumes the rest of the line verbatim.
//! Argument scanning is positional, so repeated tokens cannot confuse it.

use std::fmt;

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::error::FrameError;

/// A parsed wire frame: optional source, canonical command, arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Originating SID or UID. `None` means the frame came from the peer
    /// itself (pre-burst `SERVER` and `CAPAB` lines).
    pub source: Option<String>,
    /// Command name, canonicalized to uppercase.
    pub command: String,
    /// Arguments in wire order. A trailing argument keeps its spaces.
    pub args: Vec<String>,
}

/// Parse the source token (the part after `:` and before the first space).
fn parse_source(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command name (alphanumeric characters).
fn parse_command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric())(input)
}

fn spaces(input: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ')(input)
}

/// Scan the remaining input into arguments.
///
/// Regular arguments end at the next space; a `:`-led argument takes the
/// rest of the line with the colon stripped and interior spaces preserved.
/// Runs of spaces between arguments collapse.
fn scan_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut rest = input;

    while rest.starts_with(' ') {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() {
            break;
        }

        if let Some(trailing) = rest.strip_prefix(':') {
            args.push(trailing.to_string());
            break;
        }

        let end = rest.find(' ').unwrap_or(rest.len());
        args.push(rest[..end].to_string());
        rest = &rest[end..];
    }

    args
}

impl Frame {
    /// Parse a single line into a frame.
    ///
    /// Lines carrying fewer than two whitespace-delimited tokens cannot
    /// yield both a source (or command) and a command (or argument) and are
    /// rejected as [`FrameError::Malformed`]; callers drop them silently.
    pub fn parse(line: &str) -> Result<Frame, FrameError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(FrameError::Empty);
        }
        if line.split(' ').filter(|t| !t.is_empty()).count() < 2 {
            return Err(FrameError::Malformed(line.to_string()));
        }

        let (rest, source) =
            opt(parse_source)(line).map_err(|_| FrameError::Malformed(line.to_string()))?;
        let (rest, _) = spaces(rest).map_err(|_| FrameError::Malformed(line.to_string()))?;
        let (rest, command) =
            parse_command(rest).map_err(|_| FrameError::Malformed(line.to_string()))?;

        Ok(Frame {
            source: source.map(str::to_string),
            command: command.to_ascii_uppercase(),
            args: scan_args(rest),
        })
    }
}

impl fmt::Display for Frame {
    /// Serialize back to wire form (without the CRLF terminator).
    ///
    /// The last argument is emitted as trailing whenever it would not
    /// survive whitespace tokenization on re-parse.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, ":{} ", source)?;
        }
        write!(f, "{}", self.command)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i + 1 == self.args.len() && (arg.is_empty() || arg.contains(' ') || arg.starts_with(':'))
            {
                write!(f, " :{}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}
