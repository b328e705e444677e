use serde::{Deserialize, Serialize};

/// The `permissions` object the host attaches to repository metadata for
/// authenticated callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    Admin = 3,
}

impl Permission {
    pub fn has_write(&self) -> bool {
        *self >= Permission::Write
    }
}

impl From<RepoPermissions> for Permission {
    fn from(p: RepoPermissions) -> Self {
        if p.admin {
            Permission::Admin
        } else if p.push {
            Permission::Write
        } else if p.pull {
            Permission::Read
        } else {
            Permission::None
        }
    }
}

/// Whether the caller may write, or `None` when the host did not say.
pub fn writable(permissions: Option<RepoPermissions>) -> Option<bool> {
    permissions.map(|p| Permission::from(p).has_write())
}
