//! 服务客户端注册表（Client Registry）
//!
//! 以 `(system, config_ref)` 为键，惰性构造并缓存外部系统客户端：
//! - 同一键在进程内至多构造一次，并发的首次调用也只会执行一次构造；
//! - 构造失败不缓存，后续调用可以重试；
//! - 长驻部署可通过 `invalidate`/`reset` 主动失效。
//!
//! 缓存值以类型擦除（Any）方式保存，取出时按调用方期望的类型还原。
//!
use crate::error::{SyncError, SyncResult};
use dashmap::DashMap;
use std::any::{Any, type_name};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

type ClientKey = (String, String);
type ClientSlot = Arc<OnceCell<Arc<dyn Any + Send + Sync>>>;

#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientKey, ClientSlot>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（必要时构造）某系统的客户端
    ///
    /// `C` 通常是 `Arc<dyn XxxClient>` 这类可廉价克隆的句柄。
    pub async fn get_or_try_init<C, F, Fut>(
        &self,
        system: &str,
        config_ref: &str,
        init: F,
    ) -> SyncResult<C>
    where
        C: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<C>>,
    {
        // 先取出槽位再 await，避免持有 DashMap 分片锁跨越挂起点
        let slot = self
            .clients
            .entry((system.to_string(), config_ref.to_string()))
            .or_default()
            .clone();

        let value = slot
            .get_or_try_init(|| async {
                tracing::info!(system, config_ref, "constructing service client");
                let client = init().await.inspect_err(|e| {
                    tracing::warn!(system, config_ref, error = %e, "service client construction failed");
                })?;
                Ok::<_, SyncError>(Arc::new(client) as Arc<dyn Any + Send + Sync>)
            })
            .await?;

        value
            .downcast_ref::<C>()
            .cloned()
            .ok_or_else(|| SyncError::TypeMismatch {
                expected: type_name::<C>().to_string(),
                found: format!("client cached for {system}@{config_ref}"),
            })
    }

    /// 是否已有构造完成的客户端
    pub fn contains(&self, system: &str, config_ref: &str) -> bool {
        self.clients
            .get(&(system.to_string(), config_ref.to_string()))
            .is_some_and(|slot| slot.initialized())
    }

    /// 使单个客户端失效，下次获取时重新构造
    pub fn invalidate(&self, system: &str, config_ref: &str) {
        if self
            .clients
            .remove(&(system.to_string(), config_ref.to_string()))
            .is_some()
        {
            tracing::info!(system, config_ref, "service client invalidated");
        }
    }

    /// 清空全部缓存
    pub fn reset(&self) {
        self.clients.clear();
        tracing::info!("service client registry reset");
    }

    pub fn len(&self) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    trait Greeter: std::fmt::Debug + Send + Sync {
        fn greet(&self) -> String;
    }

    #[derive(Debug)]
    struct Hello(usize);
    impl Greeter for Hello {
        fn greet(&self) -> String {
            format!("hello #{}", self.0)
        }
    }

    fn build(counter: &Arc<AtomicUsize>) -> SyncResult<Arc<dyn Greeter>> {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(Hello(n)))
    }

    #[tokio::test]
    async fn constructs_once_per_key() {
        let registry = ClientRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let c: Arc<dyn Greeter> = registry
                .get_or_try_init("crm", "crm/dev", || async { build(&counter) })
                .await
                .unwrap();
            assert_eq!(c.greet(), "hello #1");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let other: Arc<dyn Greeter> = registry
            .get_or_try_init("crm", "crm/prod", || async { build(&counter) })
            .await
            .unwrap();
        assert_eq!(other.greet(), "hello #2");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let registry = ClientRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let err = registry
            .get_or_try_init::<Arc<dyn Greeter>, _, _>("lms", "lms/dev", || async {
                Err(SyncError::client("lms", "secret unavailable"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Client { .. }));
        assert!(!registry.contains("lms", "lms/dev"));

        let ok: Arc<dyn Greeter> = registry
            .get_or_try_init("lms", "lms/dev", || async { build(&counter) })
            .await
            .unwrap();
        assert_eq!(ok.greet(), "hello #1");
        assert!(registry.contains("lms", "lms/dev"));
    }

    #[tokio::test]
    async fn invalidate_and_reset_force_reconstruction() {
        let registry = ClientRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let _: Arc<dyn Greeter> = registry
            .get_or_try_init("crm", "crm/dev", || async { build(&counter) })
            .await
            .unwrap();
        registry.invalidate("crm", "crm/dev");
        let again: Arc<dyn Greeter> = registry
            .get_or_try_init("crm", "crm/dev", || async { build(&counter) })
            .await
            .unwrap();
        assert_eq!(again.greet(), "hello #2");

        registry.reset();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wrong_type_is_type_mismatch() {
        let registry = ClientRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let _: Arc<dyn Greeter> = registry
            .get_or_try_init("crm", "crm/dev", || async { build(&counter) })
            .await
            .unwrap();

        let err = registry
            .get_or_try_init::<String, _, _>("crm", "crm/dev", || async { Ok(String::new()) })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_construct_once() {
        let registry = Arc::new(ClientRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for _ in 0..32 {
            let registry = registry.clone();
            let counter = counter.clone();
            set.spawn(async move {
                let c: Arc<dyn Greeter> = registry
                    .get_or_try_init("directory", "directory/dev", || async {
                        tokio::task::yield_now().await;
                        build(&counter)
                    })
                    .await
                    .unwrap();
                c.greet()
            });
        }
        while let Some(res) = set.join_next().await {
            assert_eq!(res.unwrap(), "hello #1");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
