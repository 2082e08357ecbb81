//! 环境配置解析（Configuration Resolver）
//!
//! 将环境标签（`dev`/`stage`/`prod`）解析为各下游系统的连接标识。
//! 标识不是密钥本身，由客户端注册表在构造客户端时换取真实凭据。
//!
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 队列名称默认前缀
pub const DEFAULT_QUEUE_PREFIX: &str = "student_sync";

/// 各逻辑名称（`ConfigSet` 的键）
pub mod names {
    pub const CRM: &str = "crm";
    pub const SIS_WRITE: &str = "sis-write";
    pub const LMS: &str = "lms";
    pub const DIRECTORY: &str = "directory";
    pub const ESIGN: &str = "esign";
    pub const EQUIPMENT: &str = "equipment";
    pub const WORK_QUEUE: &str = "work-queue";
    pub const DEAD_LETTER_QUEUE: &str = "dead-letter-queue";
}

/// 部署环境
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Stage,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Stage, Environment::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Stage => "stage",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = SyncError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "stage" | "staging" => Ok(Environment::Stage),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(SyncError::UnknownEnvironment {
                tag: tag.to_string(),
            }),
        }
    }
}

/// `<prefix>_<env>_dlq`
pub fn dead_letter_queue_name(prefix: &str, env: Environment) -> String {
    format!("{prefix}_{env}_dlq")
}

/// `<prefix>_<env>_events`
pub fn work_queue_name(prefix: &str, env: Environment) -> String {
    format!("{prefix}_{env}_events")
}

/// 某一环境下的连接标识集合（构造后不可变）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigSet {
    environment: Environment,
    entries: BTreeMap<&'static str, String>,
}

impl ConfigSet {
    /// 以默认队列前缀解析
    pub fn resolve(environment: Environment) -> Self {
        Self::resolve_with_prefix(environment, DEFAULT_QUEUE_PREFIX)
    }

    pub fn resolve_with_prefix(environment: Environment, queue_prefix: &str) -> Self {
        let env = environment.as_str();
        let entries = BTreeMap::from([
            (names::CRM, format!("crm/{env}")),
            (names::SIS_WRITE, format!("postgres/{env}/write")),
            (names::LMS, format!("lms/{env}")),
            (names::DIRECTORY, format!("directory/{env}")),
            (names::ESIGN, format!("esign/{env}")),
            (names::EQUIPMENT, format!("equipment/{env}")),
            (names::WORK_QUEUE, work_queue_name(queue_prefix, environment)),
            (
                names::DEAD_LETTER_QUEUE,
                dead_letter_queue_name(queue_prefix, environment),
            ),
        ]);

        Self {
            environment,
            entries,
        }
    }

    /// 从环境标签解析，标签非法时返回 `UnknownEnvironment`
    pub fn for_tag(tag: &str) -> SyncResult<Self> {
        Ok(Self::resolve(tag.parse()?))
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn get(&self, name: &str) -> SyncResult<&str> {
        self.entries
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| SyncError::config(format!("no connection identifier for `{name}`")))
    }

    pub fn work_queue(&self) -> SyncResult<&str> {
        self.get(names::WORK_QUEUE)
    }

    pub fn dead_letter_queue(&self) -> SyncResult<&str> {
        self.get(names::DEAD_LETTER_QUEUE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}
