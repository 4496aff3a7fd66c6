//! Configuration file and interface specification parsing
//!
//! Two sources describe the same thing: an INI-like config file with
//! one section per endpoint, and inline command line specifications of
//! the form `type:key=value,key=value,...`. Both produce
//! [`EndpointSpec`] records; the `[global]` section additionally
//! carries engine settings (queue size, background mode, log
//! facility).
//!
//! File grammar:
//!
//! ```text
//! [serial]                     # section names are case-sensitive
//! filename = /dev/ttyUSB0     # '#' starts a comment
//! direction = in              # keys are case-insensitive
//! baud = "4800"               # values may be quoted with ' or "
//! ```
//!
//! `direction` is required for every endpoint section. At most one
//! `[global]` section may appear. Unknown global keys produce a
//! warning (the engine ignores them); unknown section names and
//! malformed lines are fatal.

use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use seamux_core::{Direction, EndpointKind, MIN_QUEUE_SIZE};

use crate::facility::Facility;

/// Config-file search: `$KPLEXCONF` always wins, then the per-user
/// file, then the system one, each only if present.
const HOME_CONFIG: &str = ".kplex.conf";
const SYSTEM_CONFIG: &str = "/etc/kplex.conf";
const CONFIG_ENV: &str = "KPLEXCONF";

/// Errors from config file or interface specification parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config file {path}:{line}: {reason}")]
    Syntax {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("invalid interface specification '{spec}': {reason}")]
    Spec { spec: String, reason: String },
}

/// One configured endpoint, before its adapter runs.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub kind: EndpointKind,
    pub direction: Direction,
    /// Adapter-specific options in source order. Keys are matched
    /// case-insensitively.
    pub options: Vec<(String, String)>,
}

impl EndpointSpec {
    /// Look up an adapter option by key, case-insensitively.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Settings from the `[global]` section.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub qsize: Option<usize>,
    pub background: bool,
    pub facility: Option<Facility>,
}

/// Locate the default config file, if any.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let home = env::var("HOME").ok().or_else(|| {
        nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|user| user.dir.to_string_lossy().into_owned())
    });
    if let Some(home) = home {
        let path = Path::new(&home).join(HOME_CONFIG);
        if path.exists() {
            return Some(path);
        }
    }
    let system = Path::new(SYSTEM_CONFIG);
    if system.exists() {
        return Some(system.to_path_buf());
    }
    None
}

/// Parse a config file into its global settings and endpoint specs.
pub fn parse_file(path: &Path) -> Result<(GlobalConfig, Vec<EndpointSpec>), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&content, path)
}

/// Which section the parser is currently inside.
enum Section {
    Global,
    Endpoint(SectionBuilder),
}

struct SectionBuilder {
    kind: EndpointKind,
    direction: Option<Direction>,
    options: Vec<(String, String)>,
    /// Line of the section header, for error reporting.
    line: usize,
}

fn parse_str(content: &str, path: &Path) -> Result<(GlobalConfig, Vec<EndpointSpec>), ConfigError> {
    let syntax = |line: usize, reason: String| ConfigError::Syntax {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut global = GlobalConfig::default();
    let mut global_seen = false;
    let mut endpoints = Vec::new();
    let mut current: Option<Section> = None;

    let finish =
        |section: Option<Section>, endpoints: &mut Vec<EndpointSpec>| -> Result<(), ConfigError> {
            if let Some(Section::Endpoint(builder)) = section {
                let direction = builder.direction.ok_or_else(|| {
                    syntax(
                        builder.line,
                        format!("[{}] section needs a direction (in/out/both)", builder.kind),
                    )
                })?;
                endpoints.push(EndpointSpec {
                    kind: builder.kind,
                    direction,
                    options: builder.options,
                });
            }
            Ok(())
        };

    for (idx, raw) in content.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            finish(current.take(), &mut endpoints)?;
            let name = parse_section_header(rest).map_err(|reason| syntax(lineno, reason))?;
            if name == "global" {
                if global_seen {
                    return Err(syntax(lineno, "duplicate [global] section".into()));
                }
                global_seen = true;
                current = Some(Section::Global);
            } else {
                let kind = name
                    .parse::<EndpointKind>()
                    .map_err(|()| syntax(lineno, format!("unknown section [{name}]")))?;
                current = Some(Section::Endpoint(SectionBuilder {
                    kind,
                    direction: None,
                    options: Vec::new(),
                    line: lineno,
                }));
            }
            continue;
        }

        let (key, value) = parse_key_value(line).map_err(|reason| syntax(lineno, reason))?;
        match current {
            None => return Err(syntax(lineno, "option before any section header".into())),
            Some(Section::Global) => {
                apply_global_key(&mut global, &key, &value)
                    .map_err(|reason| syntax(lineno, reason))?;
            }
            Some(Section::Endpoint(ref mut builder)) => {
                if key.eq_ignore_ascii_case("direction") {
                    let direction = value.parse::<Direction>().map_err(|()| {
                        syntax(lineno, format!("invalid direction '{value}'"))
                    })?;
                    builder.direction = Some(direction);
                } else {
                    builder.options.push((key, value));
                }
            }
        }
    }
    finish(current.take(), &mut endpoints)?;

    Ok((global, endpoints))
}

/// Parse the remainder of a section header after the opening '['.
fn parse_section_header(rest: &str) -> Result<&str, String> {
    let Some(close) = rest.find(']') else {
        return Err("unterminated section header".into());
    };
    let name = rest[..close].trim();
    if name.is_empty() {
        return Err("empty section name".into());
    }
    let trailing = rest[close + 1..].trim();
    if !trailing.is_empty() && !trailing.starts_with('#') {
        return Err("unexpected characters after section header".into());
    }
    Ok(name)
}

/// Parse one `key = value` line, honoring quotes and comments.
fn parse_key_value(line: &str) -> Result<(String, String), String> {
    let Some((key_part, value_part)) = line.split_once('=') else {
        return Err("expected key = value".into());
    };
    let key = key_part.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err("malformed option name".into());
    }

    let value_part = value_part.trim_start();
    let (value, after) = match value_part.chars().next() {
        Some(quote @ ('\'' | '"')) => {
            let rest = &value_part[1..];
            let Some(end) = rest.find(quote) else {
                return Err("unterminated quoted value".into());
            };
            (&rest[..end], rest[end + 1..].trim_start())
        }
        Some(_) => {
            let end = value_part
                .find(|c: char| c.is_whitespace() || c == '#')
                .unwrap_or(value_part.len());
            (&value_part[..end], value_part[end..].trim_start())
        }
        None => return Err("missing value".into()),
    };
    if value.is_empty() {
        return Err("missing value".into());
    }
    if !after.is_empty() && !after.starts_with('#') {
        return Err("unexpected characters after value".into());
    }
    Ok((key.to_string(), value.to_string()))
}

fn apply_global_key(global: &mut GlobalConfig, key: &str, value: &str) -> Result<(), String> {
    if key.eq_ignore_ascii_case("qsize") {
        let qsize = value
            .parse::<usize>()
            .map_err(|_| format!("invalid queue size '{value}'"))?;
        if qsize < MIN_QUEUE_SIZE {
            return Err(format!("minimum queue size is {MIN_QUEUE_SIZE}"));
        }
        global.qsize = Some(qsize);
    } else if key.eq_ignore_ascii_case("mode") {
        if value.eq_ignore_ascii_case("background") {
            global.background = true;
        } else {
            eprintln!("seamuxd: warning: unrecognized mode '{value}' in config file");
        }
    } else if key.eq_ignore_ascii_case("logto") {
        let facility = Facility::from_str(value)
            .map_err(|()| format!("unknown log facility '{value}'"))?;
        global.facility = Some(facility);
    } else {
        eprintln!("seamuxd: warning: unrecognized option '{key}' in config file");
    }
    Ok(())
}

/// Parse an inline interface specification: `type:key=value,...`.
///
/// The type is matched case-insensitively; `direction` is required.
pub fn parse_spec(arg: &str) -> Result<EndpointSpec, ConfigError> {
    let err = |reason: String| ConfigError::Spec {
        spec: arg.to_string(),
        reason,
    };

    let Some((type_part, rest)) = arg.split_once(':') else {
        return Err(err("expected type:key=value,...".into()));
    };
    let kind = type_part
        .to_ascii_lowercase()
        .parse::<EndpointKind>()
        .map_err(|()| err(format!("unrecognized interface type '{type_part}'")))?;

    let mut direction = None;
    let mut options = Vec::new();
    for piece in rest.split(',') {
        let Some((key, value)) = piece.split_once('=') else {
            return Err(err(format!("expected key=value, got '{piece}'")));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(err(format!("expected key=value, got '{piece}'")));
        }
        if key.eq_ignore_ascii_case("direction") {
            direction = Some(
                value
                    .parse::<Direction>()
                    .map_err(|()| err(format!("invalid direction '{value}'")))?,
            );
        } else {
            options.push((key.to_string(), value.to_string()));
        }
    }

    let direction = direction.ok_or_else(|| err("direction (in/out/both) not specified".into()))?;
    Ok(EndpointSpec {
        kind,
        direction,
        options,
    })
}
