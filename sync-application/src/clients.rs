//! 服务客户端（Service Clients）
//!
//! 把 `ConfigSet` 中的连接标识、[`SecretProvider`] 与 [`ClientFactory`] 串起来，
//! 通过 `ClientRegistry` 保证每个 (system, config_ref) 只构造一次客户端。
//! 处理器只依赖这里暴露的端口句柄，不直接接触密钥与构造细节。
//!
use crate::ports::{
    CrmClient, DirectoryClient, ESignClient, EquipmentClient, LmsClient, StudentRecords,
};
use async_trait::async_trait;
use bon::Builder;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use sync_domain::config::names;
use sync_domain::{ClientRegistry, ConfigSet, SyncResult};

/// 连接凭据；`Debug` 输出不包含明文
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// 以连接标识换取凭据
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn secret(&self, config_ref: &str) -> SyncResult<Secret>;
}

/// 构造各外部系统客户端
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn crm(&self, config_ref: &str, secret: Secret) -> SyncResult<Arc<dyn CrmClient>>;

    async fn lms(&self, config_ref: &str, secret: Secret) -> SyncResult<Arc<dyn LmsClient>>;

    async fn directory(
        &self,
        config_ref: &str,
        secret: Secret,
    ) -> SyncResult<Arc<dyn DirectoryClient>>;

    async fn esign(&self, config_ref: &str, secret: Secret) -> SyncResult<Arc<dyn ESignClient>>;

    async fn equipment(
        &self,
        config_ref: &str,
        secret: Secret,
    ) -> SyncResult<Arc<dyn EquipmentClient>>;

    async fn student_records(
        &self,
        config_ref: &str,
        secret: Secret,
    ) -> SyncResult<Arc<dyn StudentRecords>>;
}

/// 进程内共享的客户端集合
#[derive(Builder)]
pub struct ServiceClients {
    configs: ConfigSet,
    factory: Arc<dyn ClientFactory>,
    secrets: Arc<dyn SecretProvider>,
    #[builder(default)]
    registry: ClientRegistry,
}

impl ServiceClients {
    pub fn configs(&self) -> &ConfigSet {
        &self.configs
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub async fn crm(&self) -> SyncResult<Arc<dyn CrmClient>> {
        self.client(names::CRM, |config_ref, secret| async move {
            self.factory.crm(&config_ref, secret).await
        })
        .await
    }

    pub async fn lms(&self) -> SyncResult<Arc<dyn LmsClient>> {
        self.client(names::LMS, |config_ref, secret| async move {
            self.factory.lms(&config_ref, secret).await
        })
        .await
    }

    pub async fn directory(&self) -> SyncResult<Arc<dyn DirectoryClient>> {
        self.client(names::DIRECTORY, |config_ref, secret| async move {
            self.factory.directory(&config_ref, secret).await
        })
        .await
    }

    pub async fn esign(&self) -> SyncResult<Arc<dyn ESignClient>> {
        self.client(names::ESIGN, |config_ref, secret| async move {
            self.factory.esign(&config_ref, secret).await
        })
        .await
    }

    pub async fn equipment(&self) -> SyncResult<Arc<dyn EquipmentClient>> {
        self.client(names::EQUIPMENT, |config_ref, secret| async move {
            self.factory.equipment(&config_ref, secret).await
        })
        .await
    }

    /// 学籍数据库（写库）
    pub async fn student_records(&self) -> SyncResult<Arc<dyn StudentRecords>> {
        self.client(names::SIS_WRITE, |config_ref, secret| async move {
            self.factory.student_records(&config_ref, secret).await
        })
        .await
    }

    /// 使某系统的客户端失效（如凭据轮换后）
    pub fn invalidate(&self, system: &str) -> SyncResult<()> {
        let config_ref = self.configs.get(system)?;
        self.registry.invalidate(system, config_ref);
        Ok(())
    }

    pub fn reset(&self) {
        self.registry.reset();
    }

    async fn client<C, F, Fut>(&self, system: &str, build: F) -> SyncResult<C>
    where
        C: Clone + Send + Sync + 'static,
        F: FnOnce(String, Secret) -> Fut,
        Fut: Future<Output = SyncResult<C>>,
    {
        let config_ref = self.configs.get(system)?;
        self.registry
            .get_or_try_init(system, config_ref, move || async move {
                let secret = self.secrets.secret(config_ref).await?;
                build(config_ref.to_string(), secret).await
            })
            .await
    }
}
