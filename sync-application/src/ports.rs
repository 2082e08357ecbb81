//! 外部记录系统端口（Ports）
//!
//! 以 trait 描述处理器依赖的外部系统能力，具体客户端（CRM、LMS、目录服务、
//! 电子签名、设备供应商、学籍数据库）由基础设施实现并通过 [`ClientFactory`]
//! 注入。写操作均以自然键定位，重复调用结果一致。
//!
//! [`ClientFactory`]: crate::clients::ClientFactory
//!
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sync_domain::{Fields, SyncResult};

// --- CRM ---

/// CRM 联系人
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrmContact {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub fields: Fields,
}

/// CRM 成绩记录，自然键为 (contact_id, course_code)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrmGrade {
    pub id: String,
    pub contact_id: String,
    pub course_code: String,
    #[serde(default)]
    pub fields: Fields,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn find_contacts_by_email(&self, email: &str) -> SyncResult<Vec<CrmContact>>;

    /// 只写入给定字段
    async fn update_contact(&self, contact_id: &str, updates: &Fields) -> SyncResult<()>;

    async fn get_grade(&self, grade_id: &str) -> SyncResult<Option<CrmGrade>>;

    async fn find_grades(&self, contact_id: &str, course_code: &str) -> SyncResult<Vec<CrmGrade>>;

    /// 返回新记录 ID
    async fn create_grade(
        &self,
        contact_id: &str,
        course_code: &str,
        fields: &Fields,
    ) -> SyncResult<String>;

    async fn update_grade(&self, grade_id: &str, updates: &Fields) -> SyncResult<()>;
}

// --- LMS ---

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsUser {
    pub id: String,
    pub email: String,
    pub active: bool,
}

#[async_trait]
pub trait LmsClient: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> SyncResult<Option<LmsUser>>;

    async fn get_user(&self, user_id: &str) -> SyncResult<Option<LmsUser>>;

    async fn set_user_active(&self, user_id: &str, active: bool) -> SyncResult<()>;
}

// --- 目录服务 ---

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAccount {
    pub email: String,
    pub suspended: bool,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn find_account(&self, email: &str) -> SyncResult<Option<DirectoryAccount>>;

    async fn set_suspended(&self, email: &str, suspended: bool) -> SyncResult<()>;
}

// --- 电子签名 ---

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub id: String,
    pub status: String,
    pub signer_email: String,
    pub form_name: String,
    pub completed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ESignClient: Send + Sync {
    async fn get_envelope(&self, envelope_id: &str) -> SyncResult<Option<SignatureEnvelope>>;
}

// --- 设备供应商 ---

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentOrder {
    pub id: String,
    pub email: String,
    pub device: String,
    pub tracking_number: Option<String>,
    pub shipped_on: Option<NaiveDate>,
}

#[async_trait]
pub trait EquipmentClient: Send + Sync {
    async fn get_order(&self, order_id: &str) -> SyncResult<Option<EquipmentOrder>>;
}

// --- 学籍数据库 ---

/// 学期
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// 学期成绩记录，自然键为 (enrollment_id, course_id, term_id)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentCourseTerm {
    pub id: String,
    pub enrollment_id: String,
    pub course_id: String,
    pub term_id: String,
    pub progress: Option<f64>,
    pub grade: Option<String>,
}

impl EnrollmentCourseTerm {
    pub fn natural_key(&self) -> (&str, &str, &str) {
        (&self.enrollment_id, &self.course_id, &self.term_id)
    }
}

/// 学籍数据库：每次调用开启一个会话
#[async_trait]
pub trait StudentRecords: Send + Sync {
    async fn begin(&self) -> SyncResult<Box<dyn RecordSession>>;
}

/// 先累积后提交的会话：
/// - 读操作直接访问数据库；
/// - `stage` 只在会话内暂存，`commit` 时按自然键一次性 upsert；
/// - 会话未提交即丢弃时，不留下任何持久化变更。
#[async_trait]
pub trait RecordSession: Send {
    async fn enrollment_course_term(&mut self, id: &str) -> SyncResult<Option<EnrollmentCourseTerm>>;

    async fn find_enrollment_course_term(
        &mut self,
        enrollment_id: &str,
        course_id: &str,
        term_id: &str,
    ) -> SyncResult<Option<EnrollmentCourseTerm>>;

    async fn term(&mut self, id: &str) -> SyncResult<Option<Term>>;

    async fn terms_starting_on(&mut self, date: NaiveDate) -> SyncResult<Vec<Term>>;

    /// 暂存一条记录，提交时按自然键插入；已存在的行只补齐缺失字段
    fn stage(&mut self, record: EnrollmentCourseTerm);

    /// 返回写入的行数
    async fn commit(self: Box<Self>) -> SyncResult<usize>;
}
