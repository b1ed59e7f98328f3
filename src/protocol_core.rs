//! Shared protocol logic for both the server and the client
//!
//! Header lines are plain text: a verb or status token followed by fields
//! joined with [`SEP`]. Everything here is pure (no I/O) so both ends and the
//! tests can use it directly.

use crate::error::{Error, Result};
use crate::protocol::{cmd, resp, SEP};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A client request, parsed from one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    /// `None` when the client sent `DOWNLOAD` without a filename
    Download(Option<String>),
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse a command line. The argument is everything after the first
    /// separator, so filenames are passed through verbatim.
    pub fn parse(line: &str) -> Command {
        let mut parts = line.splitn(2, SEP);
        let verb = parts.next().unwrap_or("").trim();
        let arg = parts.next().filter(|a| !a.is_empty()).map(str::to_string);
        match verb {
            cmd::LIST => Command::List,
            cmd::DOWNLOAD => Command::Download(arg),
            cmd::QUIT => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List => f.write_str(cmd::LIST),
            Command::Download(Some(name)) => write!(f, "{}{}{}", cmd::DOWNLOAD, SEP, name),
            Command::Download(None) => f.write_str(cmd::DOWNLOAD),
            Command::Quit => f.write_str(cmd::QUIT),
            Command::Unknown(verb) => f.write_str(verb),
        }
    }
}

/// A server response header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    Error(String),
    FileNotFound(String),
    FileInfo {
        name: String,
        size: u64,
        chunk_count: u32,
    },
}

impl Response {
    pub fn parse(line: &str) -> Result<Response> {
        let mut parts = line.splitn(2, SEP);
        let status = parts.next().unwrap_or("");
        let rest = parts.next();
        match status {
            resp::OK => Ok(Response::Ok(rest.unwrap_or("").to_string())),
            resp::ERROR => Ok(Response::Error(rest.unwrap_or("").to_string())),
            resp::FILE_NOT_FOUND => Ok(Response::FileNotFound(rest.unwrap_or("").to_string())),
            resp::FILE_INFO => {
                let rest =
                    rest.ok_or_else(|| Error::protocol(format!("malformed FILE_INFO: {}", line)))?;
                // Numbers are the last two fields; the name may itself contain SEP.
                let mut fields = rest.rsplitn(3, SEP);
                let count = fields.next();
                let size = fields.next();
                let name = fields.next();
                let (name, size, count) = match (name, size, count) {
                    (Some(n), Some(s), Some(c)) => (n, s, c),
                    _ => return Err(Error::protocol(format!("malformed FILE_INFO: {}", line))),
                };
                let size: u64 = size
                    .trim()
                    .parse()
                    .map_err(|_| Error::protocol(format!("invalid file size: {}", size)))?;
                let chunk_count: u32 = count
                    .trim()
                    .parse()
                    .map_err(|_| Error::protocol(format!("invalid chunk count: {}", count)))?;
                Ok(Response::FileInfo {
                    name: name.to_string(),
                    size,
                    chunk_count,
                })
            }
            other => Err(Error::protocol(format!("unknown response status: {}", other))),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(msg) => write!(f, "{}{}{}", resp::OK, SEP, msg),
            Response::Error(msg) => write!(f, "{}{}{}", resp::ERROR, SEP, msg),
            Response::FileNotFound(msg) => write!(f, "{}{}{}", resp::FILE_NOT_FOUND, SEP, msg),
            Response::FileInfo {
                name,
                size,
                chunk_count,
            } => write!(
                f,
                "{}{}{}{}{}{}{}",
                resp::FILE_INFO,
                SEP,
                name,
                SEP,
                size,
                SEP,
                chunk_count
            ),
        }
    }
}

/// Resolve a requested filename to a regular file path directly inside `root`.
///
/// Only a single plain name is accepted. Rejected, all as `NotFound` so the
/// reply never reveals what exists outside the served directory:
/// 1. empty names and names containing NUL
/// 2. absolute paths, parent/root/prefix components and nested paths
/// 3. symlinks whose target lands outside `root`
///
/// `root` is expected to be canonical (the daemon canonicalizes it at startup).
pub fn normalize_under_root(root: &Path, name: &str) -> Result<PathBuf> {
    let rejected = || Error::not_found(format!("File '{}' not found.", name));

    if name.is_empty() || name.contains('\0') {
        return Err(rejected());
    }

    let p = Path::new(name);
    let mut components = p.components();
    let single = match (components.next(), components.next()) {
        (Some(Component::Normal(s)), None) => s,
        _ => return Err(rejected()),
    };
    // On Windows, reject ':' (ADS defense)
    #[cfg(windows)]
    if single.to_string_lossy().contains(':') {
        return Err(rejected());
    }

    let joined = root.join(single);
    if !joined.exists() {
        return Err(rejected());
    }
    let final_path = joined.canonicalize()?;
    if !final_path.starts_with(root) {
        return Err(rejected());
    }
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("LIST"), Command::List);
        assert_eq!(Command::parse("QUIT"), Command::Quit);
        assert_eq!(
            Command::parse("DOWNLOAD<|>report.pdf"),
            Command::Download(Some("report.pdf".into()))
        );
        assert_eq!(Command::parse("DOWNLOAD"), Command::Download(None));
        assert_eq!(Command::parse("DOWNLOAD<|>"), Command::Download(None));
        assert_eq!(Command::parse("PUT<|>x"), Command::Unknown("PUT".into()));
    }

    #[test]
    fn test_command_argument_keeps_separator() {
        assert_eq!(
            Command::parse("DOWNLOAD<|>odd<|>name"),
            Command::Download(Some("odd<|>name".into()))
        );
    }

    #[test]
    fn test_command_display_matches_wire_format() {
        assert_eq!(Command::List.to_string(), "LIST");
        assert_eq!(
            Command::Download(Some("a.txt".into())).to_string(),
            "DOWNLOAD<|>a.txt"
        );
    }

    #[test]
    fn test_response_parse_file_info() {
        let r = Response::parse("FILE_INFO<|>big.bin<|>2147483648<|>2048").unwrap();
        assert_eq!(
            r,
            Response::FileInfo {
                name: "big.bin".into(),
                size: 2_147_483_648,
                chunk_count: 2048
            }
        );
    }

    #[test]
    fn test_response_parse_file_info_name_with_separator() {
        let r = Response::parse("FILE_INFO<|>a<|>b<|>5<|>1").unwrap();
        assert_eq!(
            r,
            Response::FileInfo {
                name: "a<|>b".into(),
                size: 5,
                chunk_count: 1
            }
        );
    }

    #[test]
    fn test_response_parse_malformed() {
        let bad = [
            "FILE_INFO",
            "FILE_INFO<|>only",
            "FILE_INFO<|>x<|>12",
            "FILE_INFO<|>x<|>abc<|>1",
            "FILE_INFO<|>x<|>10<|>-1",
            "WHATEVER<|>x",
        ];
        for line in bad {
            let err = Response::parse(line).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::ProtocolViolation, "{}", line);
        }
    }

    #[test]
    fn test_response_display() {
        assert_eq!(Response::Ok("3".into()).to_string(), "OK<|>3");
        assert_eq!(
            Response::FileNotFound("File 'x' not found.".into()).to_string(),
            "FILE_NOT_FOUND<|>File 'x' not found."
        );
        let info = Response::FileInfo {
            name: "x".into(),
            size: 0,
            chunk_count: 1,
        };
        assert_eq!(info.to_string(), "FILE_INFO<|>x<|>0<|>1");
        assert_eq!(Response::parse(&info.to_string()).unwrap(), info);
    }

    #[test]
    fn test_normalize_under_root_safe_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        fs::write(root.join("file.txt"), "test").unwrap();

        let result = normalize_under_root(&root, "file.txt").unwrap();
        assert_eq!(result, root.join("file.txt"));
    }

    #[test]
    fn test_normalize_under_root_unsafe_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("served");
        fs::create_dir(&root).unwrap();
        let root = root.canonicalize().unwrap();
        fs::write(temp_dir.path().join("secret.txt"), "s").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("inner.txt"), "i").unwrap();

        for name in [
            "../secret.txt",
            "/etc/passwd",
            "sub/inner.txt",
            "..",
            ".",
            "",
            "file\0.txt",
            "missing.txt",
        ] {
            let err = normalize_under_root(&root, name).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::NotFound, "{:?}", name);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_rejects_symlink_escape() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("served");
        fs::create_dir(&root).unwrap();
        let root = root.canonicalize().unwrap();
        fs::write(temp_dir.path().join("outside.txt"), "o").unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("outside.txt"), root.join("link.txt"))
            .unwrap();

        assert!(normalize_under_root(&root, "link.txt").is_err());
    }
}
