use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::{Money, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务在支付视角下的投影
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub publisher_id: u64,
    pub taker_id: Option<u64>,
    pub title: String,
    /// 任务金额（托管金额）
    pub amount: Money,
    pub status: TaskStatus,
    pub take_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 发布费用已支付，进入待审核
    pub fn mark_pending_audit(&mut self) -> DomainResult<TaskStatus> {
        let old = self.status;
        match old {
            TaskStatus::Draft | TaskStatus::PendingAudit => {
                self.status = TaskStatus::PendingAudit;
                self.updated_at = Utc::now();
                Ok(old)
            }
            other => Err(DomainError::StateConflict(format!(
                "Task {} cannot enter audit from {}",
                self.id, other
            ))),
        }
    }

    /// 接取预缴已支付，原子地绑定接取方并进入进行中
    pub fn assign_taker(&mut self, taker_id: u64, now: DateTime<Utc>) -> DomainResult<TaskStatus> {
        let old = self.status;
        if old != TaskStatus::Open || self.taker_id.is_some() {
            return Err(DomainError::StateConflict(format!(
                "Task {} is {} with taker {:?}, cannot be taken by {}",
                self.id, old, self.taker_id, taker_id
            )));
        }
        if taker_id == self.publisher_id {
            return Err(DomainError::StateConflict(format!(
                "Publisher {} cannot take own task {}",
                taker_id, self.id
            )));
        }

        self.taker_id = Some(taker_id);
        self.status = TaskStatus::InProgress;
        self.take_time = Some(now);
        self.updated_at = now;
        Ok(old)
    }

    /// 结算成功后完成任务
    pub fn mark_completed(&mut self) -> DomainResult<TaskStatus> {
        let old = self.status;
        if !self.is_settleable() {
            return Err(DomainError::StateConflict(format!(
                "Task {} cannot be completed from {}",
                self.id, old
            )));
        }
        self.status = TaskStatus::Completed;
        self.updated_at = Utc::now();
        Ok(old)
    }

    /// 已有接取方并且工作已开始，才能进入结算
    pub fn is_settleable(&self) -> bool {
        self.taker_id.is_some()
            && matches!(
                self.status,
                TaskStatus::InProgress | TaskStatus::PendingAcceptance
            )
    }
}

/// 任务操作日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub task_id: u64,
    pub user_id: u64,
    pub action: String,
    pub content: String,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl TaskLog {
    pub fn new(
        task: &Task,
        user_id: u64,
        action: &str,
        content: String,
        old_status: TaskStatus,
    ) -> Self {
        Self {
            task_id: task.id,
            user_id,
            action: action.to_string(),
            content,
            old_status,
            new_status: task.status,
            created_at: Utc::now(),
        }
    }
}

/// 收款账户，用于结算转账
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayeeAccount {
    pub user_id: u64,
    pub account_no: String,
    pub real_name: String,
    pub bank_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_task() -> Task {
        Task {
            id: 7,
            publisher_id: 1,
            taker_id: None,
            title: "translate".to_string(),
            amount: Money::from_yuan(100),
            status: TaskStatus::Open,
            take_time: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_assign_taker() {
        let mut task = open_task();
        let old = task.assign_taker(2, Utc::now()).unwrap();

        assert_eq!(old, TaskStatus::Open);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.taker_id, Some(2));
        assert!(task.is_settleable());
    }

    #[test]
    fn test_assign_taker_twice_conflicts() {
        let mut task = open_task();
        task.assign_taker(2, Utc::now()).unwrap();

        let err = task.assign_taker(3, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert_eq!(task.taker_id, Some(2));
    }

    #[test]
    fn test_publisher_cannot_take_own_task() {
        let mut task = open_task();
        assert!(task.assign_taker(1, Utc::now()).is_err());
    }

    #[test]
    fn test_completion_requires_taker() {
        let mut task = open_task();
        assert!(task.mark_completed().is_err());

        task.assign_taker(2, Utc::now()).unwrap();
        task.mark_completed().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!task.is_settleable());
    }

    #[test]
    fn test_pending_audit_from_draft() {
        let mut task = open_task();
        task.status = TaskStatus::Draft;
        assert_eq!(task.mark_pending_audit().unwrap(), TaskStatus::Draft);
        assert_eq!(task.status, TaskStatus::PendingAudit);
    }
}
