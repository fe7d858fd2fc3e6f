use crate::score::{ScoreRule, WordValidator};
use crate::session::{PlayerId, SeatClaim, Session, SessionId, SessionSnapshot};
use crate::{Error, Result};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 加入对局的结果
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub session_id: SessionId,
    /// 被匹配进已有对局时，返回先到玩家的身份
    pub opponent: Option<PlayerId>,
    /// 对局凑满两人时发放的字母架
    pub rack: Option<String>,
}

/// 对局注册表，持有所有存活的对局并负责匹配、计分和计时
///
/// 对局映射是进程内唯一的共享可变结构。匹配走waiting指针的互斥锁，
/// 保证并发join时一个等待中的空座只会被一个玩家占到；计分和计时
/// 只碰各自对局的锁，不同对局完全并行。
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    /// 当前等待第二名玩家的对局；任何时刻至多一个
    waiting: Mutex<Option<SessionId>>,
    score_rule: Arc<dyn ScoreRule>,
    validator: Arc<dyn WordValidator>,
    rack_size: usize,
}

impl SessionRegistry {
    pub fn new(
        score_rule: Arc<dyn ScoreRule>,
        validator: Arc<dyn WordValidator>,
        rack_size: usize,
    ) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            waiting: Mutex::new(None),
            score_rule,
            validator,
            rack_size,
        }
    }

    /// 为玩家匹配对局：有空座就占座，否则新建一个等待中的对局
    ///
    /// 整个检查-占座流程在waiting锁内完成。两个玩家同时抢同一个空座时
    /// 只有一个会成功，输掉的一方会新建（或加入）另一个对局；玩家重复
    /// join自己等待中的对局时原样返回，不会和自己匹配。
    pub async fn join_or_create(&self, player: &str) -> JoinOutcome {
        let mut waiting = self.waiting.lock().await;

        if let Some(waiting_id) = waiting.clone() {
            // 不持有DashMap守卫跨越await，先把Arc克隆出来
            let session = self
                .sessions
                .get(&waiting_id)
                .map(|entry| entry.value().clone());

            match session {
                Some(session) => {
                    let rack = self.deal_rack();
                    match session.try_claim_seat(player, rack.clone()).await {
                        SeatClaim::Claimed { opponent } => {
                            *waiting = None;
                            info!("玩家 {} 加入对局 {}，对手 {}", player, waiting_id, opponent);
                            return JoinOutcome {
                                session_id: waiting_id,
                                opponent: Some(opponent),
                                rack: Some(rack),
                            };
                        }
                        SeatClaim::AlreadySeated => {
                            debug!("玩家 {} 重复加入等待中的对局 {}", player, waiting_id);
                            return JoinOutcome {
                                session_id: waiting_id,
                                opponent: None,
                                rack: None,
                            };
                        }
                        SeatClaim::Full => {
                            // 指针过期（对局已满却没被清掉），丢弃后新建
                            *waiting = None;
                        }
                    }
                }
                None => {
                    // 等待中的对局已被回收
                    *waiting = None;
                }
            }
        }

        let session = Arc::new(Session::new(player));
        let session_id = session.id().clone();
        self.sessions.insert(session_id.clone(), session);
        *waiting = Some(session_id.clone());
        info!("玩家 {} 创建了新对局 {}", player, session_id);

        JoinOutcome {
            session_id,
            opponent: None,
            rack: None,
        }
    }

    /// 获取对局快照
    pub async fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        let session = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())?;
        Some(session.snapshot().await)
    }

    /// 为玩家提交单词计分，返回更新后的双方分数
    pub async fn submit_score(
        &self,
        session_id: &str,
        player: &str,
        word: &str,
    ) -> Result<(u32, u32)> {
        let session = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::SessionNotFound)?;

        if !self.validator.is_valid(word) {
            return Err(Error::InvalidWord(word.to_string()));
        }

        let points = self.score_rule.score(word);
        let scores = session.submit_word(player, points).await?;
        debug!(
            "对局 {} 玩家 {} 提交 {} 得 {} 分，比分 {}:{}",
            session_id, player, word, points, scores.0, scores.1
        );
        Ok(scores)
    }

    /// 查询对局已进行的时长
    pub async fn elapsed(&self, session_id: &str) -> Result<Duration> {
        let session = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::SessionNotFound)?;
        session.elapsed().await
    }

    /// 从注册表移除对局
    pub async fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);

        // 等待指针若指向被移除的对局必须一并清掉，
        // 否则后续join会匹配到一个已经不存在的对局
        let mut waiting = self.waiting.lock().await;
        if waiting.as_deref() == Some(session_id) {
            *waiting = None;
        }
    }

    /// 回收空闲超时的对局，返回回收数量
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<(SessionId, Arc<Session>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut reaped = 0;
        for (session_id, session) in candidates {
            if session.idle_for().await >= max_idle {
                self.remove(&session_id).await;
                info!("回收空闲对局 {}", session_id);
                reaped += 1;
            }
        }
        reaped
    }

    /// 启动后台回收任务
    pub fn spawn_reaper(
        self: &Arc<Self>,
        max_idle: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reaped = registry.reap_idle(max_idle).await;
                if reaped > 0 {
                    debug!("本轮回收了 {} 个对局", reaped);
                }
            }
        })
    }

    /// 存活对局数量
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 所有存活对局的快照，供管理接口使用
    pub async fn session_list(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.snapshot().await);
        }
        snapshots
    }

    /// 发放随机大写字母组成的字母架
    fn deal_rack(&self) -> String {
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::rng();

        (0..self.rack_size)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}
