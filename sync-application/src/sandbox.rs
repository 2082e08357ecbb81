//! 沙箱后端（Sandbox）
//!
//! 全部外部端口的内存实现，记录读写次数，可模拟系统不可用：
//! - 测试中断言“零调用/零写入”与幂等性；
//! - worker 的 `sample` 模式在本地跑通示例事件。
//!
//! 写操作与真实系统一样按自然键 upsert；学籍库会话在 `commit` 前不落地任何变更。
//!
use crate::clients::{ClientFactory, Secret, SecretProvider, ServiceClients};
use crate::context::HandlerContext;
use crate::ports::{
    CrmClient, CrmContact, CrmGrade, DirectoryAccount, DirectoryClient, ESignClient,
    EnrollmentCourseTerm, EquipmentClient, EquipmentOrder, LmsClient, LmsUser, RecordSession,
    SignatureEnvelope, StudentRecords, Term,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use sync_domain::config::names;
use sync_domain::{ConfigSet, Environment, FeatureFlags, Fields, SyncError, SyncResult};
use uuid::Uuid;

/// 单个后端的调用计数
#[derive(Debug, Default)]
pub struct CallLog {
    system: &'static str,
    reads: AtomicUsize,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl CallLog {
    fn new(system: &'static str) -> Self {
        Self {
            system,
            ..Default::default()
        }
    }

    fn read(&self) -> SyncResult<()> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self) -> SyncResult<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn check(&self) -> SyncResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(SyncError::client(self.system, "service unavailable"));
        }
        Ok(())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.reads() + self.writes()
    }

    /// 模拟系统不可用：之后的每次调用都返回客户端错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

fn merge(target: &mut Fields, updates: &Fields) {
    for (name, value) in updates {
        target.insert(name.clone(), value.clone());
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

// --- CRM ---

pub struct SandboxCrm {
    contacts: DashMap<String, CrmContact>,
    grades: DashMap<String, CrmGrade>,
    calls: CallLog,
}

impl Default for SandboxCrm {
    fn default() -> Self {
        Self {
            contacts: DashMap::new(),
            grades: DashMap::new(),
            calls: CallLog::new(names::CRM),
        }
    }
}

impl SandboxCrm {
    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn insert_contact(&self, contact: CrmContact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn insert_grade(&self, grade: CrmGrade) {
        self.grades.insert(grade.id.clone(), grade);
    }

    pub fn contact(&self, id: &str) -> Option<CrmContact> {
        self.contacts.get(id).map(|c| c.clone())
    }

    pub fn grade(&self, id: &str) -> Option<CrmGrade> {
        self.grades.get(id).map(|g| g.clone())
    }

    pub fn grades(&self) -> Vec<CrmGrade> {
        let grades = self.grades.iter().map(|g| g.clone()).collect();
        sorted_by(grades, |g: &CrmGrade| g.id.clone())
    }
}

#[async_trait]
impl CrmClient for SandboxCrm {
    async fn find_contacts_by_email(&self, email: &str) -> SyncResult<Vec<CrmContact>> {
        self.calls.read()?;
        let found = self
            .contacts
            .iter()
            .filter(|c| c.email.eq_ignore_ascii_case(email))
            .map(|c| c.clone())
            .collect();
        Ok(sorted_by(found, |c: &CrmContact| c.id.clone()))
    }

    async fn update_contact(&self, contact_id: &str, updates: &Fields) -> SyncResult<()> {
        self.calls.write()?;
        let mut contact = self
            .contacts
            .get_mut(contact_id)
            .ok_or_else(|| SyncError::not_found(format!("crm contact {contact_id}")))?;
        merge(&mut contact.fields, updates);
        Ok(())
    }

    async fn get_grade(&self, grade_id: &str) -> SyncResult<Option<CrmGrade>> {
        self.calls.read()?;
        Ok(self.grade(grade_id))
    }

    async fn find_grades(&self, contact_id: &str, course_code: &str) -> SyncResult<Vec<CrmGrade>> {
        self.calls.read()?;
        let found = self
            .grades
            .iter()
            .filter(|g| g.contact_id == contact_id && g.course_code == course_code)
            .map(|g| g.clone())
            .collect();
        Ok(sorted_by(found, |g: &CrmGrade| g.id.clone()))
    }

    async fn create_grade(
        &self,
        contact_id: &str,
        course_code: &str,
        fields: &Fields,
    ) -> SyncResult<String> {
        self.calls.write()?;
        let id = Uuid::new_v4().to_string();
        self.insert_grade(CrmGrade {
            id: id.clone(),
            contact_id: contact_id.to_string(),
            course_code: course_code.to_string(),
            fields: fields.clone(),
        });
        Ok(id)
    }

    async fn update_grade(&self, grade_id: &str, updates: &Fields) -> SyncResult<()> {
        self.calls.write()?;
        let mut grade = self
            .grades
            .get_mut(grade_id)
            .ok_or_else(|| SyncError::not_found(format!("crm grade {grade_id}")))?;
        merge(&mut grade.fields, updates);
        Ok(())
    }
}

// --- LMS ---

pub struct SandboxLms {
    users: DashMap<String, LmsUser>,
    calls: CallLog,
}

impl Default for SandboxLms {
    fn default() -> Self {
        Self {
            users: DashMap::new(),
            calls: CallLog::new(names::LMS),
        }
    }
}

impl SandboxLms {
    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn insert_user(&self, user: LmsUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn user(&self, id: &str) -> Option<LmsUser> {
        self.users.get(id).map(|u| u.clone())
    }
}

#[async_trait]
impl LmsClient for SandboxLms {
    async fn find_user_by_email(&self, email: &str) -> SyncResult<Option<LmsUser>> {
        self.calls.read()?;
        Ok(self
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| u.clone()))
    }

    async fn get_user(&self, user_id: &str) -> SyncResult<Option<LmsUser>> {
        self.calls.read()?;
        Ok(self.user(user_id))
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> SyncResult<()> {
        self.calls.write()?;
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| SyncError::not_found(format!("lms user {user_id}")))?;
        user.active = active;
        Ok(())
    }
}

// --- 目录服务 ---

pub struct SandboxDirectory {
    accounts: DashMap<String, DirectoryAccount>,
    calls: CallLog,
}

impl Default for SandboxDirectory {
    fn default() -> Self {
        Self {
            accounts: DashMap::new(),
            calls: CallLog::new(names::DIRECTORY),
        }
    }
}

impl SandboxDirectory {
    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn insert_account(&self, account: DirectoryAccount) {
        self.accounts
            .insert(account.email.to_ascii_lowercase(), account);
    }

    pub fn account(&self, email: &str) -> Option<DirectoryAccount> {
        self.accounts
            .get(&email.to_ascii_lowercase())
            .map(|a| a.clone())
    }
}

#[async_trait]
impl DirectoryClient for SandboxDirectory {
    async fn find_account(&self, email: &str) -> SyncResult<Option<DirectoryAccount>> {
        self.calls.read()?;
        Ok(self.account(email))
    }

    async fn set_suspended(&self, email: &str, suspended: bool) -> SyncResult<()> {
        self.calls.write()?;
        let mut account = self
            .accounts
            .get_mut(&email.to_ascii_lowercase())
            .ok_or_else(|| SyncError::not_found(format!("directory account {email}")))?;
        account.suspended = suspended;
        Ok(())
    }
}

// --- 电子签名 ---

pub struct SandboxESign {
    envelopes: DashMap<String, SignatureEnvelope>,
    calls: CallLog,
}

impl Default for SandboxESign {
    fn default() -> Self {
        Self {
            envelopes: DashMap::new(),
            calls: CallLog::new(names::ESIGN),
        }
    }
}

impl SandboxESign {
    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn insert_envelope(&self, envelope: SignatureEnvelope) {
        self.envelopes.insert(envelope.id.clone(), envelope);
    }
}

#[async_trait]
impl ESignClient for SandboxESign {
    async fn get_envelope(&self, envelope_id: &str) -> SyncResult<Option<SignatureEnvelope>> {
        self.calls.read()?;
        Ok(self.envelopes.get(envelope_id).map(|e| e.clone()))
    }
}

// --- 设备供应商 ---

pub struct SandboxEquipment {
    orders: DashMap<String, EquipmentOrder>,
    calls: CallLog,
}

impl Default for SandboxEquipment {
    fn default() -> Self {
        Self {
            orders: DashMap::new(),
            calls: CallLog::new(names::EQUIPMENT),
        }
    }
}

impl SandboxEquipment {
    pub fn calls(&self) -> &CallLog {
        &self.calls
    }

    pub fn insert_order(&self, order: EquipmentOrder) {
        self.orders.insert(order.id.clone(), order);
    }
}

#[async_trait]
impl EquipmentClient for SandboxEquipment {
    async fn get_order(&self, order_id: &str) -> SyncResult<Option<EquipmentOrder>> {
        self.calls.read()?;
        Ok(self.orders.get(order_id).map(|o| o.clone()))
    }
}

// --- 学籍数据库 ---

struct RecordStore {
    terms: DashMap<String, Term>,
    enrollment_course_terms: DashMap<String, EnrollmentCourseTerm>,
    calls: CallLog,
}

impl RecordStore {
    fn find_by_natural_key(
        &self,
        enrollment_id: &str,
        course_id: &str,
        term_id: &str,
    ) -> Option<EnrollmentCourseTerm> {
        self.enrollment_course_terms
            .iter()
            .find(|r| r.natural_key() == (enrollment_id, course_id, term_id))
            .map(|r| r.clone())
    }
}

pub struct SandboxRecords {
    store: Arc<RecordStore>,
}

impl Default for SandboxRecords {
    fn default() -> Self {
        Self {
            store: Arc::new(RecordStore {
                terms: DashMap::new(),
                enrollment_course_terms: DashMap::new(),
                calls: CallLog::new(names::SIS_WRITE),
            }),
        }
    }
}

impl SandboxRecords {
    pub fn calls(&self) -> &CallLog {
        &self.store.calls
    }

    pub fn insert_term(&self, term: Term) {
        self.store.terms.insert(term.id.clone(), term);
    }

    pub fn insert_enrollment_course_term(&self, record: EnrollmentCourseTerm) {
        self.store
            .enrollment_course_terms
            .insert(record.id.clone(), record);
    }

    /// 全部学期成绩记录（按 ID 排序）
    pub fn enrollment_course_terms(&self) -> Vec<EnrollmentCourseTerm> {
        let records = self
            .store
            .enrollment_course_terms
            .iter()
            .map(|r| r.clone())
            .collect();
        sorted_by(records, |r: &EnrollmentCourseTerm| r.id.clone())
    }
}

#[async_trait]
impl StudentRecords for SandboxRecords {
    async fn begin(&self) -> SyncResult<Box<dyn RecordSession>> {
        self.store.calls.check()?;
        Ok(Box::new(SandboxSession {
            store: self.store.clone(),
            staged: Vec::new(),
        }))
    }
}

struct SandboxSession {
    store: Arc<RecordStore>,
    staged: Vec<EnrollmentCourseTerm>,
}

#[async_trait]
impl RecordSession for SandboxSession {
    async fn enrollment_course_term(&mut self, id: &str) -> SyncResult<Option<EnrollmentCourseTerm>> {
        self.store.calls.read()?;
        Ok(self
            .store
            .enrollment_course_terms
            .get(id)
            .map(|r| r.clone()))
    }

    async fn find_enrollment_course_term(
        &mut self,
        enrollment_id: &str,
        course_id: &str,
        term_id: &str,
    ) -> SyncResult<Option<EnrollmentCourseTerm>> {
        self.store.calls.read()?;
        Ok(self.store.find_by_natural_key(enrollment_id, course_id, term_id))
    }

    async fn term(&mut self, id: &str) -> SyncResult<Option<Term>> {
        self.store.calls.read()?;
        Ok(self.store.terms.get(id).map(|t| t.clone()))
    }

    async fn terms_starting_on(&mut self, date: NaiveDate) -> SyncResult<Vec<Term>> {
        self.store.calls.read()?;
        let found = self
            .store
            .terms
            .iter()
            .filter(|t| t.start_date == date)
            .map(|t| t.clone())
            .collect();
        Ok(sorted_by(found, |t: &Term| t.id.clone()))
    }

    fn stage(&mut self, record: EnrollmentCourseTerm) {
        self.staged.push(record);
    }

    async fn commit(self: Box<Self>) -> SyncResult<usize> {
        let SandboxSession { store, staged } = *self;
        if staged.is_empty() {
            return Ok(0);
        }
        store.calls.check()?;

        let written = staged.len();
        for mut record in staged {
            store.calls.write()?;
            let (enrollment_id, course_id, term_id) = record.natural_key();
            // 已存在时只补齐缺失字段，不覆盖并发写入的成绩与进度
            if let Some(existing) = store.find_by_natural_key(enrollment_id, course_id, term_id) {
                record.id = existing.id;
                record.grade = existing.grade.or(record.grade);
                record.progress = existing.progress.or(record.progress);
            }
            store
                .enrollment_course_terms
                .insert(record.id.clone(), record);
        }
        Ok(written)
    }
}

// --- 凭据 ---

/// 内存凭据表，以连接标识为键
#[derive(Debug, Default)]
pub struct StaticSecrets {
    secrets: DashMap<String, Secret>,
}

impl StaticSecrets {
    /// 为 `ConfigSet` 中的每个连接标识生成占位凭据
    pub fn for_configs(configs: &ConfigSet) -> Self {
        let secrets = Self::default();
        for (_, config_ref) in configs.iter() {
            secrets.insert(config_ref, Secret::new(format!("sandbox:{config_ref}")));
        }
        secrets
    }

    pub fn insert(&self, config_ref: impl Into<String>, secret: Secret) {
        self.secrets.insert(config_ref.into(), secret);
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn secret(&self, config_ref: &str) -> SyncResult<Secret> {
        self.secrets
            .get(config_ref)
            .map(|s| s.clone())
            .ok_or_else(|| SyncError::config(format!("no secret for {config_ref}")))
    }
}

// --- 汇总 ---

/// 全部沙箱后端；克隆共享同一份数据
#[derive(Clone, Default)]
pub struct Sandbox {
    pub crm: Arc<SandboxCrm>,
    pub lms: Arc<SandboxLms>,
    pub directory: Arc<SandboxDirectory>,
    pub esign: Arc<SandboxESign>,
    pub equipment: Arc<SandboxEquipment>,
    pub records: Arc<SandboxRecords>,
    constructions: Arc<AtomicUsize>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 客户端构造次数
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::Relaxed)
    }

    fn logs(&self) -> [&CallLog; 6] {
        [
            self.crm.calls(),
            self.lms.calls(),
            self.directory.calls(),
            self.esign.calls(),
            self.equipment.calls(),
            self.records.calls(),
        ]
    }

    /// 所有后端的调用总数
    pub fn calls(&self) -> usize {
        self.logs().iter().map(|log| log.total()).sum()
    }

    /// 所有后端的写入总数
    pub fn writes(&self) -> usize {
        self.logs().iter().map(|log| log.writes()).sum()
    }

    /// 以 dev 环境构造处理器上下文
    pub fn context(&self, flags: FeatureFlags) -> HandlerContext {
        self.context_for(ConfigSet::resolve(Environment::Dev), flags)
    }

    pub fn context_for(&self, configs: ConfigSet, flags: FeatureFlags) -> HandlerContext {
        let clients = ServiceClients::builder()
            .secrets(Arc::new(StaticSecrets::for_configs(&configs)))
            .configs(configs)
            .factory(Arc::new(self.clone()))
            .build();
        HandlerContext::new(Arc::new(clients), Arc::new(flags))
    }

    fn constructed(&self, config_ref: &str, secret: &Secret) -> SyncResult<()> {
        if secret.expose().is_empty() {
            return Err(SyncError::config(format!("empty secret for {config_ref}")));
        }
        self.constructions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(config_ref, "sandbox client constructed");
        Ok(())
    }
}

#[async_trait]
impl ClientFactory for Sandbox {
    async fn crm(&self, config_ref: &str, secret: Secret) -> SyncResult<Arc<dyn CrmClient>> {
        self.constructed(config_ref, &secret)?;
        Ok(self.crm.clone())
    }

    async fn lms(&self, config_ref: &str, secret: Secret) -> SyncResult<Arc<dyn LmsClient>> {
        self.constructed(config_ref, &secret)?;
        Ok(self.lms.clone())
    }

    async fn directory(
        &self,
        config_ref: &str,
        secret: Secret,
    ) -> SyncResult<Arc<dyn DirectoryClient>> {
        self.constructed(config_ref, &secret)?;
        Ok(self.directory.clone())
    }

    async fn esign(&self, config_ref: &str, secret: Secret) -> SyncResult<Arc<dyn ESignClient>> {
        self.constructed(config_ref, &secret)?;
        Ok(self.esign.clone())
    }

    async fn equipment(
        &self,
        config_ref: &str,
        secret: Secret,
    ) -> SyncResult<Arc<dyn EquipmentClient>> {
        self.constructed(config_ref, &secret)?;
        Ok(self.equipment.clone())
    }

    async fn student_records(
        &self,
        config_ref: &str,
        secret: Secret,
    ) -> SyncResult<Arc<dyn StudentRecords>> {
        self.constructed(config_ref, &secret)?;
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ect(id: &str, term_id: &str, progress: f64) -> EnrollmentCourseTerm {
        EnrollmentCourseTerm {
            id: id.into(),
            enrollment_id: "enr1".into(),
            course_id: "c1".into(),
            term_id: term_id.into(),
            progress: Some(progress),
            grade: None,
        }
    }

    #[tokio::test]
    async fn dropped_session_persists_nothing() {
        let records = SandboxRecords::default();
        let mut session = records.begin().await.unwrap();
        session.stage(ect("new", "t2", 0.5));
        drop(session);

        assert!(records.enrollment_course_terms().is_empty());
        assert_eq!(records.calls().writes(), 0);
    }

    #[tokio::test]
    async fn commit_upserts_by_natural_key() {
        let records = SandboxRecords::default();
        records.insert_enrollment_course_term(ect("existing", "t2", 0.1));

        let mut session = records.begin().await.unwrap();
        session.stage(ect("fresh-id", "t2", 0.7));
        assert_eq!(session.commit().await.unwrap(), 1);

        let all = records.enrollment_course_terms();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "existing");
        assert_eq!(all[0].progress, Some(0.1));
    }

    #[tokio::test]
    async fn racing_commit_keeps_grade_written_first() {
        let records = SandboxRecords::default();
        let mut first = records.begin().await.unwrap();
        let mut second = records.begin().await.unwrap();
        first.stage(ect("a", "t2", 0.4));
        second.stage(ect("b", "t2", 0.4));
        first.commit().await.unwrap();

        // 第一次提交后成绩已录入
        let mut graded = records.enrollment_course_terms().remove(0);
        graded.grade = Some("A".into());
        graded.progress = None;
        records.insert_enrollment_course_term(graded);

        second.commit().await.unwrap();

        let all = records.enrollment_course_terms();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].grade.as_deref(), Some("A"));
        assert_eq!(all[0].progress, Some(0.4));
    }

    #[tokio::test]
    async fn unavailable_backend_fails_calls() {
        let sandbox = Sandbox::new();
        sandbox.crm.calls().set_unavailable(true);
        let err = sandbox.crm.find_contacts_by_email("a@b.c").await.unwrap_err();
        assert!(matches!(err, SyncError::Client { ref system, .. } if system == "crm"));
        assert_eq!(sandbox.calls(), 0);
    }
}
