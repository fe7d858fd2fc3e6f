use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 玩家ID类型
pub type PlayerId = String;

/// 对局ID类型
pub type SessionId = String;

/// 对局阶段
///
/// Waiting（等待第二名玩家）-> Active（双方就位，开始计时计分）。
/// 没有反向转换；对局结束由注册表的回收策略负责，不在此建模。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Waiting,
    Active,
}

/// 占座结果
#[derive(Debug, Clone)]
pub enum SeatClaim {
    /// 成功占下第二个座位，返回先到玩家的身份
    Claimed { opponent: PlayerId },
    /// 该玩家已经坐在这个对局里
    AlreadySeated,
    /// 两个座位都已被占
    Full,
}

/// 对局内部状态，只能持有写锁时修改
#[derive(Debug)]
struct SessionState {
    player_a: PlayerId,
    player_b: Option<PlayerId>,
    score_a: u32,
    score_b: u32,
    started_at: Option<Instant>,
    rack: Option<String>,
    last_activity: DateTime<Utc>,
}

/// 对局实体，持有两个玩家座位、双方分数和开始时间
///
/// 每个对局是一个独立的互斥单元：可变状态统一放在一把RwLock后面，
/// 同一对局的操作串行化，不同对局互不阻塞。
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

/// 对局状态快照，外部只能通过快照观察对局
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub phase: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub player_a: PlayerId,
    pub player_b: Option<PlayerId>,
    pub score_a: u32,
    pub score_b: u32,
    pub rack: Option<String>,
    pub elapsed_seconds: Option<f64>,
}

impl Session {
    /// 创建新对局，先到的玩家占据A座
    pub fn new(player_a: impl Into<PlayerId>) -> Self {
        Session {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            state: RwLock::new(SessionState {
                player_a: player_a.into(),
                player_b: None,
                score_a: 0,
                score_b: 0,
                started_at: None,
                rack: None,
                last_activity: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// 尝试占据B座
    ///
    /// 成功时设置开始时间并发放字母架，两者只会被设置一次。
    /// 检查与写入在同一把写锁内完成，并发占座只会有一个赢家。
    pub async fn try_claim_seat(&self, player: &str, rack: String) -> SeatClaim {
        let mut state = self.state.write().await;
        state.last_activity = Utc::now();

        if state.player_a == player || state.player_b.as_deref() == Some(player) {
            return SeatClaim::AlreadySeated;
        }
        if state.player_b.is_some() {
            return SeatClaim::Full;
        }

        state.player_b = Some(player.to_string());
        state.started_at = Some(Instant::now());
        state.rack = Some(rack);
        SeatClaim::Claimed {
            opponent: state.player_a.clone(),
        }
    }

    /// 为指定玩家累加得分，返回更新后的双方分数
    pub async fn submit_word(&self, player: &str, points: u32) -> Result<(u32, u32)> {
        let mut state = self.state.write().await;
        state.last_activity = Utc::now();

        if state.player_a == player {
            state.score_a += points;
        } else if state.player_b.as_deref() == Some(player) {
            state.score_b += points;
        } else {
            return Err(Error::PlayerNotInSession);
        }

        Ok((state.score_a, state.score_b))
    }

    /// 返回对局已进行的时长
    ///
    /// 基于单调时钟，重复调用的返回值不会回退。
    pub async fn elapsed(&self) -> Result<Duration> {
        let mut state = self.state.write().await;
        state.last_activity = Utc::now();

        state
            .started_at
            .map(|t| t.elapsed())
            .ok_or(Error::TimerUnavailable)
    }

    /// 对局距离上次活动已经空闲了多久
    pub async fn idle_for(&self) -> Duration {
        let state = self.state.read().await;
        (Utc::now() - state.last_activity)
            .to_std()
            .unwrap_or_default()
    }

    /// 生成当前状态的快照
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            phase: if state.player_b.is_some() {
                SessionPhase::Active
            } else {
                SessionPhase::Waiting
            },
            player_a: state.player_a.clone(),
            player_b: state.player_b.clone(),
            score_a: state.score_a,
            score_b: state.score_b,
            rack: state.rack.clone(),
            elapsed_seconds: state.started_at.map(|t| t.elapsed().as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_session_is_waiting_with_zero_scores() {
        let session = Session::new("ana");
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Waiting);
        assert_eq!(snapshot.player_a, "ana");
        assert_eq!(snapshot.player_b, None);
        assert_eq!((snapshot.score_a, snapshot.score_b), (0, 0));
        assert!(snapshot.rack.is_none());
        assert!(snapshot.elapsed_seconds.is_none());
        assert!(snapshot.created_at <= Utc::now());
    }

    #[tokio::test]
    async fn claiming_seat_activates_session() {
        let session = Session::new("ana");
        match session.try_claim_seat("bob", "ABCDEFGHI".to_string()).await {
            SeatClaim::Claimed { opponent } => assert_eq!(opponent, "ana"),
            other => panic!("意外的占座结果: {:?}", other),
        }

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert_eq!(snapshot.player_b.as_deref(), Some("bob"));
        assert_eq!(snapshot.rack.as_deref(), Some("ABCDEFGHI"));
        assert!(snapshot.elapsed_seconds.is_some());
    }

    #[tokio::test]
    async fn same_player_cannot_take_both_seats() {
        let session = Session::new("ana");
        assert!(matches!(
            session.try_claim_seat("ana", "ABCDEFGHI".to_string()).await,
            SeatClaim::AlreadySeated
        ));
        assert_eq!(session.snapshot().await.player_b, None);
    }

    #[tokio::test]
    async fn full_session_rejects_third_player() {
        let session = Session::new("ana");
        session.try_claim_seat("bob", "ABCDEFGHI".to_string()).await;
        assert!(matches!(
            session.try_claim_seat("cleo", "JKLMNOPQR".to_string()).await,
            SeatClaim::Full
        ));
    }

    #[tokio::test]
    async fn submit_word_accumulates_per_slot() {
        let session = Session::new("ana");
        session.try_claim_seat("bob", "ABCDEFGHI".to_string()).await;

        assert_eq!(session.submit_word("ana", 30).await.unwrap(), (30, 0));
        assert_eq!(session.submit_word("bob", 40).await.unwrap(), (30, 40));
        assert_eq!(session.submit_word("ana", 20).await.unwrap(), (50, 40));
    }

    #[tokio::test]
    async fn submit_word_rejects_outsider() {
        let session = Session::new("ana");
        session.try_claim_seat("bob", "ABCDEFGHI".to_string()).await;

        let err = session.submit_word("cleo", 10).await.unwrap_err();
        assert!(matches!(err, Error::PlayerNotInSession));
        let snapshot = session.snapshot().await;
        assert_eq!((snapshot.score_a, snapshot.score_b), (0, 0));
    }

    #[tokio::test]
    async fn elapsed_unavailable_while_waiting() {
        let session = Session::new("ana");
        assert!(matches!(
            session.elapsed().await.unwrap_err(),
            Error::TimerUnavailable
        ));
    }

    #[tokio::test]
    async fn elapsed_is_monotonic_once_active() {
        let session = Session::new("ana");
        session.try_claim_seat("bob", "ABCDEFGHI".to_string()).await;

        let first = session.elapsed().await.unwrap();
        let second = session.elapsed().await.unwrap();
        assert!(second >= first);
    }
}
