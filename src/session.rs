use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::notice::{Notice, Notices};
use crate::storage::{Storage, StorageError, MOCK_USER_KEY};

pub const DEFAULT_LOGIN_EMAIL: &str = "admin@example.com";
const SIMULATED_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockUser {
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("username must not be empty")]
    EmptyUsername,

    #[error("failed to persist session: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 模拟登录会话
///
/// 显式的会话对象：由 `init` 从存储恢复，`teardown` 结束时刷盘。
/// 谁需要就把它传给谁，不存在全局状态。
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    user: Option<MockUser>,
    delay: Duration,
    notices: Notices,
}

impl SessionStore {
    /// 读取 `mock_user`。记录损坏时丢弃并按未登录处理。
    pub fn init(storage: Arc<dyn Storage>) -> Self {
        let user = match storage.get(MOCK_USER_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<MockUser>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!("Discarding corrupt session record: {}", e);
                    if let Err(e) = storage.remove(MOCK_USER_KEY) {
                        warn!("Failed to remove corrupt session record: {}", e);
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read session: {}", e);
                None
            }
        };

        if let Some(user) = &user {
            info!("Restored session for {}", user.username);
        }

        Self {
            storage,
            user,
            delay: SIMULATED_DELAY,
            notices: Notices::default(),
        }
    }

    /// 覆盖模拟延迟 (测试里设为 0)。
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn current_user(&self) -> Option<&MockUser> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    fn persist(&self, user: &MockUser) -> Result<(), SessionError> {
        let raw = serde_json::to_string(user)?;
        self.storage.set(MOCK_USER_KEY, &raw)?;
        Ok(())
    }

    /// 登录。mock 阶段所有登录用户都是 admin。
    pub fn login(
        &mut self,
        username: &str,
        email: Option<&str>,
    ) -> Result<&MockUser, SessionError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SessionError::EmptyUsername);
        }
        let user = MockUser {
            username: username.to_string(),
            email: email.unwrap_or(DEFAULT_LOGIN_EMAIL).to_string(),
            role: Role::Admin,
        };
        self.persist(&user)?;
        self.notices.push(Notice::success(format!("Welcome back, {}!", username)));
        info!("Logged in as {}", username);
        Ok(self.user.insert(user))
    }

    /// 注册并直接登录，角色为普通用户。密码不做任何校验和保存。
    pub async fn register(
        &mut self,
        username: &str,
        email: &str,
        _password: &str,
    ) -> Result<&MockUser, SessionError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(SessionError::EmptyUsername);
        }
        tokio::time::sleep(self.delay).await;
        let user = MockUser {
            username: username.to_string(),
            email: email.to_string(),
            role: Role::User,
        };
        self.persist(&user)?;
        self.notices.push(Notice::success("Account created successfully!"));
        info!("Registered {}", username);
        Ok(self.user.insert(user))
    }

    pub async fn reset_password(&mut self, email: &str) {
        tokio::time::sleep(self.delay).await;
        self.notices
            .push(Notice::success(format!("Password reset link sent to {}", email)));
    }

    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.user = None;
        self.storage.remove(MOCK_USER_KEY)?;
        self.notices.push(Notice::info("Logged out successfully"));
        Ok(())
    }

    /// 结束会话对象的生命周期，把存储刷盘。
    pub fn teardown(self) -> Result<(), SessionError> {
        self.storage.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn fresh() -> (Arc<MemoryStorage>, SessionStore) {
        let storage = Arc::new(MemoryStorage::new());
        let session = SessionStore::init(storage.clone()).with_delay(Duration::ZERO);
        (storage, session)
    }

    #[test]
    fn test_login_persists_admin_user() {
        let (storage, mut session) = fresh();
        assert!(!session.is_authenticated());

        let user = session.login("amy", None).unwrap().clone();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.email, DEFAULT_LOGIN_EMAIL);

        let restored = SessionStore::init(storage);
        assert_eq!(restored.current_user(), Some(&user));
    }

    #[test]
    fn test_login_rejects_blank_username() {
        let (_storage, mut session) = fresh();
        assert!(matches!(session.login("  ", None), Err(SessionError::EmptyUsername)));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_register_creates_user_role() {
        let (_storage, mut session) = fresh();
        let user = session.register("bo", "bo@example.com", "secret").await.unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.email, "bo@example.com");
        assert_eq!(
            session.take_notices(),
            vec![Notice::success("Account created successfully!")]
        );
    }

    #[test]
    fn test_logout_clears_storage() {
        let (storage, mut session) = fresh();
        session.login("amy", Some("amy@example.com")).unwrap();
        session.logout().unwrap();

        assert!(!session.is_authenticated());
        assert!(storage.get(MOCK_USER_KEY).unwrap().is_none());
        assert!(!SessionStore::init(storage).is_authenticated());
    }

    #[test]
    fn test_corrupt_record_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(MOCK_USER_KEY, "][").unwrap();

        let session = SessionStore::init(storage.clone());
        assert!(!session.is_authenticated());
        assert!(storage.get(MOCK_USER_KEY).unwrap().is_none());
    }

    #[test]
    fn test_login_storage_failure_leaves_session_unchanged() {
        let (storage, mut session) = fresh();
        storage.set_fail_writes(true);
        assert!(matches!(session.login("amy", None), Err(SessionError::Storage(_))));
        assert!(!session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_password_notice() {
        let storage = Arc::new(MemoryStorage::new());
        let mut session = SessionStore::init(storage);
        session.reset_password("amy@example.com").await;
        assert_eq!(
            session.take_notices(),
            vec![Notice::success("Password reset link sent to amy@example.com")]
        );
        session.teardown().unwrap();
    }
}
