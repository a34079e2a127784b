use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of the currently authenticated employee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedEmployee {
    pub employee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// Supplies the current employee identity. `None` means nobody is logged in;
/// the services treat that as "nothing to do", never as an error.
#[async_trait]
pub trait UserContext: Send + Sync {
    async fn retrieve(&self) -> Option<AuthenticatedEmployee>;
}

/// Fixed identity, for hosts that resolve authentication once at startup and
/// for tests.
pub struct StaticUserContext {
    employee: Option<AuthenticatedEmployee>,
}

impl StaticUserContext {
    pub fn new(employee_id: impl Into<String>) -> Self {
        Self {
            employee: Some(AuthenticatedEmployee {
                employee_id: employee_id.into(),
                organization_id: None,
            }),
        }
    }

    pub fn logged_out() -> Self {
        Self { employee: None }
    }
}

#[async_trait]
impl UserContext for StaticUserContext {
    async fn retrieve(&self) -> Option<AuthenticatedEmployee> {
        self.employee.clone()
    }
}
