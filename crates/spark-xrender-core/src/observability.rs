//! 日志订阅器安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：库代码只通过 `tracing` 宏发出事件，由宿主进程在启动时决定如何输出；
//!   本模块为没有自带订阅器的宿主提供"一键式"安装，替代早期直接打印到标准输出的做法。
//! - **逻辑（How）**：组装 `fmt + EnvFilter` 订阅器，`RUST_LOG` 缺省时使用 `info` 级别，并设置为全局默认。
//! - **契约（What）**：进程内只允许成功安装一次；外部已设置订阅器时返回 [`InstallError::SubscriberAlreadySet`]。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装过程可能出现的错误。
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("the xrender tracing subscriber is already installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber was set by someone else")]
    SubscriberAlreadySet,
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
}

/// 安装全局 `tracing` 订阅器。
pub fn install() -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
