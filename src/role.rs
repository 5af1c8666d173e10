use serde::{Deserialize, Serialize};

/// Account type stored on every user.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    #[default]
    User,
    Author,
}

/// Things a handler may need permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ManageCatalog,
    ManageCirculation,
    ViewReports,
    ManageStaff,
}

impl Role {
    // single place where roles are mapped to permissions
    pub fn can(self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Author => capability == Capability::ManageCatalog,
            Role::User => false,
        }
    }

    pub fn is_staff(self) -> bool {
        self.can(Capability::ViewReports)
    }

    // administrators are promoted through staff profiles, never self-registered
    pub fn is_self_assignable(self) -> bool {
        !matches!(self, Role::Admin)
    }
}

impl Capability {
    pub fn action(self) -> &'static str {
        match self {
            Capability::ManageCatalog => "manage the catalog",
            Capability::ManageCirculation => "record transactions",
            Capability::ViewReports => "view reports",
            Capability::ManageStaff => "manage staff",
        }
    }
}
