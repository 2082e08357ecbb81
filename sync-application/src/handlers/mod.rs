//! 事件处理器
//!
//! 每个处理器按固定顺序执行若干步骤，每步执行前询问 `FeatureGate`；
//! 写操作先计算最小变更集，变更为空时跳过，保证重复投递不产生额外写入。
//!
mod device_shipment;
mod esign;
mod lms_grade;
mod student_status;
mod submission;
mod term_grade;

pub use device_shipment::DeviceShippedHandler;
pub use esign::ESignEnvelopeCompletedHandler;
pub use lms_grade::LmsGradePostedHandler;
pub use student_status::{StudentStatus, StudentStatusChangedHandler};
pub use submission::SubmissionUpdatedHandler;
pub use term_grade::TermGradeCertifiedHandler;

use crate::ports::{CrmClient, CrmContact};
use sync_domain::{FieldDelta, Fields, SyncError, SyncResult};

/// 期望恰好一条记录：零条为 `NotFound`，多条为 `Duplicate`
pub(crate) fn exactly_one<T>(mut found: Vec<T>, what: &str) -> SyncResult<T> {
    match found.len() {
        0 => Err(SyncError::not_found(what.to_string())),
        1 => Ok(found.remove(0)),
        n => Err(SyncError::duplicate(format!("{n} matches for {what}"))),
    }
}

/// 以邮箱定位唯一的 CRM 联系人
pub(crate) async fn contact_by_email(crm: &dyn CrmClient, email: &str) -> SyncResult<CrmContact> {
    let contacts = crm.find_contacts_by_email(email).await?;
    exactly_one(contacts, &format!("crm contact {email}"))
}

/// 只写入与当前值不同的字段，返回是否发生写入
pub(crate) async fn reconcile_contact(
    crm: &dyn CrmClient,
    contact: &CrmContact,
    desired: &Fields,
) -> SyncResult<bool> {
    let delta = FieldDelta::between(&contact.fields, desired);
    if delta.is_empty() {
        tracing::debug!(contact_id = %contact.id, "crm contact already up to date");
        return Ok(false);
    }

    tracing::info!(contact_id = %contact.id, fields = ?delta.field_names(), "updating crm contact");
    crm.update_contact(&contact.id, &delta.into_updates()).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_distinguishes_missing_and_ambiguous() {
        assert_eq!(exactly_one(vec![7], "x").unwrap(), 7);
        assert!(matches!(
            exactly_one(Vec::<u8>::new(), "contact a@b.c"),
            Err(SyncError::NotFound { reason }) if reason == "contact a@b.c"
        ));
        assert!(matches!(
            exactly_one(vec![1, 2], "contact a@b.c"),
            Err(SyncError::Duplicate { reason }) if reason == "2 matches for contact a@b.c"
        ));
    }
}
