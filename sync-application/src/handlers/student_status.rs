//! `student_status_changed`：学籍状态变更
//!
//! 状态值先解析为 [`StudentStatus`]，无法识别时以 `InvalidValue` 失败且不产生写入。
//! 随后依次把状态同步到 CRM、LMS 访问权限与目录账号。
//!
use super::{contact_by_email, reconcile_contact};
use crate::clients::ServiceClients;
use crate::context::HandlerContext;
use crate::event_type::EventType;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use sync_domain::envelope::decode_payload;
use sync_domain::eventing::EventHandler;
use sync_domain::reconcile::fields;
use sync_domain::{EventData, FeatureGate, SyncError, SyncResult};

pub const UPDATE_CRM_STATUS: &str = "update_crm_status";
pub const SYNC_LMS_ACCESS: &str = "sync_lms_access";
pub const SYNC_DIRECTORY_ACCOUNT: &str = "sync_directory_account";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StudentStatus {
    Enrolled,
    Started,
    Completed,
    Dropped,
    Withdrawn,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Enrolled => "Enrolled",
            StudentStatus::Started => "Started",
            StudentStatus::Completed => "Completed",
            StudentStatus::Dropped => "Dropped",
            StudentStatus::Withdrawn => "Withdrawn",
        }
    }

    /// 是否保留课程平台访问权限
    pub fn has_lms_access(&self) -> bool {
        matches!(self, StudentStatus::Enrolled | StudentStatus::Started)
    }

    /// 目录账号是否应停用
    pub fn suspends_account(&self) -> bool {
        matches!(self, StudentStatus::Dropped | StudentStatus::Withdrawn)
    }
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudentStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enrolled" => Ok(StudentStatus::Enrolled),
            "started" => Ok(StudentStatus::Started),
            "completed" => Ok(StudentStatus::Completed),
            "dropped" => Ok(StudentStatus::Dropped),
            "withdrawn" => Ok(StudentStatus::Withdrawn),
            _ => Err(SyncError::invalid_value(format!("unrecognized student status `{s}`"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StudentStatusChanged {
    email: String,
    status: String,
}

pub struct StudentStatusChangedHandler {
    clients: Arc<ServiceClients>,
    gate: FeatureGate,
}

impl StudentStatusChangedHandler {
    pub fn new(ctx: &HandlerContext) -> Self {
        Self {
            clients: ctx.clients.clone(),
            gate: ctx.gate(EventType::StudentStatusChanged.as_str()),
        }
    }

    async fn update_crm_status(&self, email: &str, status: StudentStatus) -> SyncResult<()> {
        let crm = self.clients.crm().await?;
        let contact = contact_by_email(crm.as_ref(), email).await?;
        reconcile_contact(crm.as_ref(), &contact, &fields([("status", json!(status.as_str()))]))
            .await?;
        Ok(())
    }

    async fn sync_lms_access(&self, email: &str, status: StudentStatus) -> SyncResult<()> {
        let lms = self.clients.lms().await?;
        let wanted = status.has_lms_access();

        let Some(user) = lms.find_user_by_email(email).await? else {
            if wanted {
                return Err(SyncError::not_found(format!("lms user {email}")));
            }
            tracing::debug!(email, "no lms user to deactivate");
            return Ok(());
        };

        if user.active != wanted {
            tracing::info!(user_id = %user.id, active = wanted, "updating lms access");
            lms.set_user_active(&user.id, wanted).await?;
        }
        Ok(())
    }

    async fn sync_directory_account(&self, email: &str, status: StudentStatus) -> SyncResult<()> {
        let directory = self.clients.directory().await?;
        let account = directory
            .find_account(email)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("directory account {email}")))?;

        let suspend = status.suspends_account();
        if account.suspended != suspend {
            tracing::info!(email, suspended = suspend, "updating directory account");
            directory.set_suspended(&account.email, suspend).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for StudentStatusChangedHandler {
    fn event_type(&self) -> &str {
        EventType::StudentStatusChanged.as_str()
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["email", "status"]
    }

    async fn handle(&self, data: &EventData) -> SyncResult<()> {
        let payload: StudentStatusChanged = decode_payload(self.event_type(), data)?;
        let status: StudentStatus = payload.status.parse()?;
        let email = payload.email.trim();

        if self.gate.should_run(UPDATE_CRM_STATUS) {
            self.update_crm_status(email, status).await?;
        }
        if self.gate.should_run(SYNC_LMS_ACCESS) {
            self.sync_lms_access(email, status).await?;
        }
        if self.gate.should_run(SYNC_DIRECTORY_ACCOUNT) {
            self.sync_directory_account(email, status).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{CrmContact, DirectoryAccount, LmsUser};
    use crate::sandbox::Sandbox;
    use sync_domain::{FeatureFlags, FlagSet};

    fn seeded() -> Sandbox {
        let sandbox = Sandbox::new();
        sandbox.crm.insert_contact(CrmContact {
            id: "003A".into(),
            email: "ada@example.edu".into(),
            fields: fields([("status", json!("Started"))]),
        });
        sandbox.lms.insert_user(LmsUser {
            id: "42".into(),
            email: "ada@example.edu".into(),
            active: true,
        });
        sandbox.directory.insert_account(DirectoryAccount {
            email: "ada@example.edu".into(),
            suspended: false,
        });
        sandbox
    }

    fn data(status: &str) -> EventData {
        json!({"email": "ada@example.edu", "status": status})
            .as_object()
            .unwrap()
            .clone()
    }

    fn handler(sandbox: &Sandbox, flags: FlagSet) -> StudentStatusChangedHandler {
        let flags = FeatureFlags::default().with(EventType::StudentStatusChanged.as_str(), flags);
        StudentStatusChangedHandler::new(&sandbox.context(flags))
    }

    fn all() -> FlagSet {
        FlagSet {
            active: true,
            enabled: ["ALL".to_string()].into(),
        }
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(" dropped ".parse::<StudentStatus>().unwrap(), StudentStatus::Dropped);
        assert!(matches!(
            "graduated".parse::<StudentStatus>(),
            Err(SyncError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn dropped_student_is_reconciled_everywhere() {
        let sandbox = seeded();
        handler(&sandbox, all()).handle(&data("Dropped")).await.unwrap();

        assert_eq!(sandbox.crm.contact("003A").unwrap().fields["status"], json!("Dropped"));
        assert!(!sandbox.lms.user("42").unwrap().active);
        assert!(sandbox.directory.account("ada@example.edu").unwrap().suspended);
    }

    #[tokio::test]
    async fn unrecognized_status_writes_nothing() {
        let sandbox = seeded();
        let err = handler(&sandbox, all()).handle(&data("Graduated")).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidValue { .. }));
        assert_eq!(sandbox.writes(), 0);
    }

    #[tokio::test]
    async fn disabled_operations_are_skipped() {
        let sandbox = seeded();
        let flags = FlagSet {
            active: true,
            enabled: [SYNC_LMS_ACCESS.to_string()].into(),
        };
        handler(&sandbox, flags).handle(&data("Withdrawn")).await.unwrap();

        assert!(!sandbox.lms.user("42").unwrap().active);
        assert_eq!(sandbox.crm.calls().total(), 0);
        assert_eq!(sandbox.directory.calls().total(), 0);
    }

    #[tokio::test]
    async fn ambiguous_contact_is_a_duplicate() {
        let sandbox = seeded();
        sandbox.crm.insert_contact(CrmContact {
            id: "003B".into(),
            email: "ADA@example.edu".into(),
            fields: Default::default(),
        });
        let err = handler(&sandbox, all()).handle(&data("Started")).await.unwrap_err();
        assert!(matches!(err, SyncError::Duplicate { .. }));
    }
}
