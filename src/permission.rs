use crate::config::CoreSettings;
use crate::event::{Event, MessageType};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// 权限检查时可用的发送者信息
#[derive(Debug, Clone)]
pub struct SenderRoles {
    pub event: Event,
    pub is_superuser: bool,
}

impl SenderRoles {
    pub fn new(settings: &CoreSettings, event: &Event) -> Self {
        Self {
            event: event.clone(),
            is_superuser: settings.is_superuser(event.user_id),
        }
    }

    pub fn is_groupchat(&self) -> bool {
        self.event.message_type == MessageType::Group
    }

    pub fn is_privatechat(&self) -> bool {
        self.event.message_type == MessageType::Private
    }

    pub fn is_discusschat(&self) -> bool {
        self.event.message_type == MessageType::Discuss
    }

    pub fn sent_by(&self, users: &[i64]) -> bool {
        users.contains(&self.event.user_id)
    }

    pub fn from_group(&self, groups: &[i64]) -> bool {
        self.event.group_id.is_some_and(|g| groups.contains(&g))
    }
}

type SyncPolicy = Arc<dyn Fn(&SenderRoles) -> bool + Send + Sync>;
type AsyncPolicy = Arc<dyn Fn(SenderRoles) -> BoxFuture<'static, bool> + Send + Sync>;

/// 权限策略：同步或异步的判定函数
#[derive(Clone)]
pub enum Permission {
    Sync(SyncPolicy),
    Async(AsyncPolicy),
}

impl Permission {
    /// 所有人均可触发
    pub fn everybody() -> Self {
        Permission::Sync(Arc::new(|_| true))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&SenderRoles) -> bool + Send + Sync + 'static,
    {
        Permission::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(SenderRoles) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        Permission::Async(Arc::new(move |roles| Box::pin(f(roles))))
    }

    pub async fn check(&self, roles: SenderRoles) -> bool {
        match self {
            Permission::Sync(f) => f(&roles),
            Permission::Async(f) => f(roles).await,
        }
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Sync(_) => f.write_str("Permission::Sync"),
            Permission::Async(_) => f.write_str("Permission::Async"),
        }
    }
}

/// 检查事件发送者是否满足权限策略
pub async fn check_permission(settings: &CoreSettings, event: &Event, policy: &Permission) -> bool {
    policy.check(SenderRoles::new(settings, event)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_and_async_policies() {
        let settings = CoreSettings {
            superusers: vec![1],
            ..Default::default()
        };
        let su_only = Permission::from_fn(|s| s.is_superuser);
        let group_only = Permission::from_async(|s: SenderRoles| async move { s.is_groupchat() });

        let private = Event::private(1, "x");
        let group = Event::group(9, 2, "x");

        assert!(check_permission(&settings, &private, &su_only).await);
        assert!(!check_permission(&settings, &group, &su_only).await);
        assert!(!check_permission(&settings, &private, &group_only).await);
        assert!(check_permission(&settings, &group, &group_only).await);
        assert!(check_permission(&settings, &group, &Permission::everybody()).await);
    }
}
