use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 用户存档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub password: String,
    pub score: u64,
    pub money_earned: f64,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(username: &str, password: &str) -> Self {
        UserProfile {
            username: username.to_string(),
            password: password.to_string(),
            score: 0,
            money_earned: 0.0,
            created_at: Utc::now(),
        }
    }
}

/// 用户存档仓库，每个用户一个JSON文件
///
/// 对局核心不依赖它；网关在join时用它解析玩家身份，HTTP管理接口
/// 通过它读写存档。
pub struct ProfileStore {
    data_dir: PathBuf,
    /// 串行化读-改-写，防止并发加分互相覆盖
    write_lock: tokio::sync::Mutex<()>,
}

impl ProfileStore {
    /// 打开存档目录，不存在时创建
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| Error::Profile(format!("无法创建存档目录: {}", e)))?;
        Ok(ProfileStore {
            data_dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// 加载用户存档，不存在时返回None
    pub async fn load(&self, username: &str) -> Result<Option<UserProfile>> {
        let path = self.profile_path(username)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let profile = serde_json::from_str(&content)
                    .map_err(|e| Error::Profile(format!("存档格式错误: {}", e)))?;
                Ok(Some(profile))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Profile(format!("读取存档失败: {}", e))),
        }
    }

    /// 保存用户存档
    pub async fn save(&self, profile: &UserProfile) -> Result<()> {
        let path = self.profile_path(&profile.username)?;
        let content = serde_json::to_string_pretty(profile)
            .map_err(|e| Error::Profile(format!("序列化存档失败: {}", e)))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::Profile(format!("写入存档失败: {}", e)))?;
        debug!("已保存用户存档: {}", profile.username);
        Ok(())
    }

    /// 为用户累加得分，同时按得分的10%折算金币
    ///
    /// 用户不存在时返回None。
    pub async fn add_score(&self, username: &str, score: u64) -> Result<Option<UserProfile>> {
        let _guard = self.write_lock.lock().await;

        let Some(mut profile) = self.load(username).await? else {
            return Ok(None);
        };

        profile.score += score;
        profile.money_earned += score as f64 * 0.1;
        self.save(&profile).await?;
        Ok(Some(profile))
    }

    /// 列出所有存档的用户名
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut usernames = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir)
            .await
            .map_err(|e| Error::Profile(format!("读取存档目录失败: {}", e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Profile(format!("读取存档目录失败: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    usernames.push(stem.to_string());
                }
            }
        }

        usernames.sort();
        Ok(usernames)
    }

    /// 用户名只允许字母、数字、下划线和连字符，避免拼出越界路径
    fn profile_path(&self, username: &str) -> Result<PathBuf> {
        if username.is_empty()
            || !username
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Profile(format!("非法的用户名: {}", username)));
        }
        Ok(self.data_dir.join(format!("{}.json", username)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (ProfileStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("word-duel-test-{}", uuid::Uuid::new_v4()));
        let store = ProfileStore::new(&dir).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (store, dir) = temp_store();

        let profile = UserProfile::new("ana", "1234");
        store.save(&profile).await.unwrap();

        let loaded = store.load("ana").await.unwrap().unwrap();
        assert_eq!(loaded.username, "ana");
        assert_eq!(loaded.password, "1234");
        assert_eq!(loaded.score, 0);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn load_missing_profile_returns_none() {
        let (store, dir) = temp_store();
        assert!(store.load("nobody").await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn add_score_credits_ten_percent_money() {
        let (store, dir) = temp_store();
        store.save(&UserProfile::new("ana", "1234")).await.unwrap();

        let updated = store.add_score("ana", 30).await.unwrap().unwrap();
        assert_eq!(updated.score, 30);
        assert!((updated.money_earned - 3.0).abs() < f64::EPSILON);

        let updated = store.add_score("ana", 20).await.unwrap().unwrap();
        assert_eq!(updated.score, 50);
        assert!((updated.money_earned - 5.0).abs() < f64::EPSILON);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_score_loses_no_updates() {
        let (store, dir) = temp_store();
        store.save(&UserProfile::new("ana", "1234")).await.unwrap();
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.add_score("ana", 10).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let profile = store.load("ana").await.unwrap().unwrap();
        assert_eq!(profile.score, 200);
        assert!((profile.money_earned - 20.0).abs() < 1e-9);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn add_score_for_unknown_user_returns_none() {
        let (store, dir) = temp_store();
        assert!(store.add_score("nobody", 10).await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn rejects_path_escaping_usernames() {
        let (store, dir) = temp_store();
        assert!(store.load("../evil").await.is_err());
        assert!(store.load("").await.is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn list_returns_saved_usernames() {
        let (store, dir) = temp_store();
        store.save(&UserProfile::new("bob", "0000")).await.unwrap();
        store.save(&UserProfile::new("ana", "1234")).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["ana", "bob"]);

        let _ = std::fs::remove_dir_all(dir);
    }
}
