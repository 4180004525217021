//! Operator commands read from stdin.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload { path: PathBuf, file_name: String },
    Download { file_name: String },
    Nodes,
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
}

pub const HELP: &str = "\
commands:
  upload <path> <name>   split a local file into pieces and place them in the swarm
  download <name>        fetch a file from the swarm into the download directory
  nodes                  list the nodes the tracker knows about
  help                   show this message
  exit                   disconnect and quit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();
    let command = match (verb, args.as_slice()) {
        ("upload", [path, name]) => Command::Upload {
            path: PathBuf::from(*path),
            file_name: name.to_string(),
        },
        ("upload", _) => return Err(ParseError::Usage("upload <path> <name>")),
        ("download", [name]) => Command::Download {
            file_name: name.to_string(),
        },
        ("download", _) => return Err(ParseError::Usage("download <name>")),
        ("nodes", []) => Command::Nodes,
        ("help", _) => Command::Help,
        ("exit" | "quit", []) => Command::Exit,
        ("nodes" | "exit" | "quit", _) => return Err(ParseError::Usage("nodes | exit")),
        (other, _) => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}
