//! 学籍同步应用层（sync-application）
//!
//! 在 `sync-domain` 的派发机制之上提供具体业务：
//! - `ports`：外部记录系统端口；
//! - `clients`：凭据、客户端工厂与进程内共享的 `ServiceClients`；
//! - `event_type`：封闭的事件类型枚举及其注册表；
//! - `handlers`：各事件类型的处理器；
//! - `sandbox` / `samples`：内存后端与示例事件。
//!
pub mod clients;
pub mod context;
pub mod event_type;
pub mod handlers;
pub mod ports;
pub mod samples;
pub mod sandbox;

pub use clients::{ClientFactory, Secret, SecretProvider, ServiceClients};
pub use context::HandlerContext;
pub use event_type::{EventType, EventTypeRegistry};
pub use sandbox::{Sandbox, StaticSecrets};
