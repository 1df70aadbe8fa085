use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// A user or device destination.
///
/// `directory_qualified` addresses name one specific device (as returned by a
/// directory query). Message recipients are always unqualified; device index 0
/// is the user's primary device.
///
/// Equality and hashing only consider `user` and `device`.
#[derive(Debug, Clone)]
pub struct DeviceAddress {
    pub user: String,
    pub device: u8,
    pub server: String,
    pub directory_qualified: bool,
}

impl DeviceAddress {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
            directory_qualified: false,
        }
    }

    /// A device-qualified address on the default user server.
    pub fn device(user: impl Into<String>, device: u8) -> Self {
        Self {
            user: user.into(),
            device,
            server: DEFAULT_USER_SERVER.to_string(),
            directory_qualified: true,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(id, GROUP_SERVER)
    }

    /// The bare server address (no user part).
    pub fn server_only(server: impl Into<String>) -> Self {
        Self::new(String::new(), server)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Address as it would be queried in the user directory.
    pub fn to_user_address(&self) -> Self {
        Self::new(self.user.clone(), DEFAULT_USER_SERVER)
    }
}

impl PartialEq for DeviceAddress {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user && self.device == other.device
    }
}

impl Eq for DeviceAddress {}

impl Hash for DeviceAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user.hash(state);
        self.device.hash(state);
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else if self.directory_qualified {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid address: {0}")]
pub struct ParseAddressError(pub String);

impl FromStr for DeviceAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((local, server)) = s.split_once('@') else {
            if s.is_empty() || s.contains(':') {
                return Err(ParseAddressError(s.to_string()));
            }
            return Ok(Self::server_only(s));
        };
        if server.is_empty() {
            return Err(ParseAddressError(s.to_string()));
        }

        match local.split_once(':') {
            Some((user, device)) => {
                let device: u8 = device
                    .parse()
                    .map_err(|_| ParseAddressError(s.to_string()))?;
                if user.is_empty() {
                    return Err(ParseAddressError(s.to_string()));
                }
                Ok(Self {
                    user: user.to_string(),
                    device,
                    server: server.to_string(),
                    directory_qualified: true,
                })
            }
            None => Ok(Self::new(local, server)),
        }
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
