//! Wire command vocabulary and status codes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ProtoError;

/// Name of the argument that carries the content hash.
pub const SHA_ARG: &str = "sha";

/// Capability token a server advertises when it can act as a big-file store.
pub const STORE_CAPABILITY: &str = "bfilestore=serve";

const STORE_CAPABILITY_KEY: &str = "bfilestore";

/// A wire protocol command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireCommand {
    /// List the server's capabilities.
    Capabilities,
    /// Upload content for a hash.
    PutFile,
    /// Download content for a hash.
    GetFile,
    /// Check whether the server holds valid content for a hash.
    StatFile,
}

impl WireCommand {
    /// Returns the command's name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capabilities => "capabilities",
            Self::PutFile => "putbfile",
            Self::GetFile => "getbfile",
            Self::StatFile => "statbfile",
        }
    }

    /// Returns true if the command needs the `sha` argument.
    pub fn takes_hash(&self) -> bool {
        !matches!(self, Self::Capabilities)
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireCommand {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capabilities" => Ok(Self::Capabilities),
            "putbfile" => Ok(Self::PutFile),
            "getbfile" => Ok(Self::GetFile),
            "statbfile" => Ok(Self::StatFile),
            other => Err(ProtoError::UnknownCommand(other.to_string())),
        }
    }
}

/// Answer to a `statbfile` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatStatus {
    /// Content is present and hashes correctly.
    Ok = 0,
    /// Content is present but hashes to something else.
    Mismatch = 1,
    /// Content is absent.
    Missing = 2,
}

impl StatStatus {
    /// Numeric code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Wire form: the code followed by a newline.
    pub fn encode(&self) -> String {
        format!("{}\n", self.code())
    }

    /// Parses a wire answer. Anything unrecognized is `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        match std::str::from_utf8(data).ok()?.trim() {
            "0" => Some(Self::Ok),
            "1" => Some(Self::Mismatch),
            "2" => Some(Self::Missing),
            _ => None,
        }
    }
}

/// Answer to a `putbfile` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Content verified and stored.
    Success = 0,
    /// Content rejected; nothing stored.
    Failure = 1,
}

impl PushStatus {
    /// Wire form: the code followed by a newline.
    pub fn encode(&self) -> String {
        format!("{}\n", *self as u8)
    }

    /// Parses a wire answer.
    pub fn parse(data: &[u8]) -> Option<Self> {
        match std::str::from_utf8(data).ok()?.trim() {
            "0" => Some(Self::Success),
            "1" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// A server's advertised capabilities.
///
/// Tokens are separated by whitespace; a token is either a bare name or
/// `name=value[,value...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    tokens: BTreeMap<String, Vec<String>>,
}

impl Capabilities {
    /// Capabilities of a ballast store server.
    pub fn server() -> Self {
        Self::parse(STORE_CAPABILITY)
    }

    /// Parses an advertisement.
    pub fn parse(advertised: &str) -> Self {
        let tokens = advertised
            .split_whitespace()
            .map(|token| match token.split_once('=') {
                Some((name, values)) => (
                    name.to_string(),
                    values.split(',').map(str::to_string).collect(),
                ),
                None => (token.to_string(), Vec::new()),
            })
            .collect();
        Self { tokens }
    }

    /// Returns true if `name` is advertised.
    pub fn has(&self, name: &str) -> bool {
        self.tokens.contains_key(name)
    }

    /// Returns the values advertised for `name`.
    pub fn values(&self, name: &str) -> &[String] {
        self.tokens.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns true if the server can serve big-file content.
    pub fn supports_store(&self) -> bool {
        self.values(STORE_CAPABILITY_KEY).iter().any(|v| v == "serve")
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, values) in &self.tokens {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            f.write_str(name)?;
            if !values.is_empty() {
                write!(f, "={}", values.join(","))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_roundtrip() {
        for cmd in [
            WireCommand::Capabilities,
            WireCommand::PutFile,
            WireCommand::GetFile,
            WireCommand::StatFile,
        ] {
            assert_eq!(cmd.as_str().parse::<WireCommand>().unwrap(), cmd);
        }
        assert!(matches!(
            "pushkey".parse::<WireCommand>(),
            Err(ProtoError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_stat_status_wire_form() {
        assert_eq!(StatStatus::Ok.encode(), "0\n");
        assert_eq!(StatStatus::Mismatch.encode(), "1\n");
        assert_eq!(StatStatus::Missing.encode(), "2\n");
        assert_eq!(StatStatus::parse(b"1\n"), Some(StatStatus::Mismatch));
        assert_eq!(StatStatus::parse(b"garbage"), None);
    }

    #[test]
    fn test_push_status_wire_form() {
        assert_eq!(PushStatus::Success.encode(), "0\n");
        assert_eq!(PushStatus::parse(b"1"), Some(PushStatus::Failure));
        assert_eq!(PushStatus::parse(b"7"), None);
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::parse("lookup branchmap bfilestore=serve,other unbundle=HG10GZ");
        assert!(caps.supports_store());
        assert!(caps.has("lookup"));
        assert_eq!(caps.values("unbundle"), ["HG10GZ".to_string()]);

        let plain = Capabilities::parse("lookup branchmap");
        assert!(!plain.supports_store());
        assert!(Capabilities::server().supports_store());
        assert_eq!(Capabilities::server().to_string(), STORE_CAPABILITY);
    }
}
